/// Module model: one catalog entry per proxied AI tool
///
/// The `slug` is the stable identifier used in module tokens, proxy paths
/// (`/proxy/<slug>/...`) and `<SLUG>_SERVICE_URL` environment variables.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE modules (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     slug VARCHAR(64) NOT NULL UNIQUE,
///     title VARCHAR(255) NOT NULL,
///     description TEXT NOT NULL DEFAULT '',
///     category VARCHAR(64) NOT NULL DEFAULT 'general',
///     price_cents BIGINT NOT NULL DEFAULT 0,
///     url VARCHAR(512),
///     image_url VARCHAR(512),
///     default_max_usage INTEGER,
///     default_access_days INTEGER,
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

const MODULE_COLUMNS: &str = "id, slug, title, description, category, price_cents, url, image_url, \
     default_max_usage, default_access_days, is_active, created_at, updated_at";

/// Catalog entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Module {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub category: String,

    /// Price in euro cents; 0 means the module can be self-activated
    pub price_cents: i64,

    /// Backend base URL used when no `<SLUG>_SERVICE_URL` override is set
    pub url: Option<String>,

    pub image_url: Option<String>,

    /// Quota given to new grants (None = unlimited)
    pub default_max_usage: Option<i32>,

    /// Validity of new grants in days (None = no expiry)
    pub default_access_days: Option<i32>,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateModule {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub price_cents: i64,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub default_max_usage: Option<i32>,
    pub default_access_days: Option<i32>,
}

fn default_category() -> String {
    "general".to_string()
}

/// Partial update; only `Some` fields are written
///
/// Nullable columns use `Option<Option<_>>` so they can be cleared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateModule {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price_cents: Option<i64>,
    pub url: Option<Option<String>>,
    pub image_url: Option<Option<String>>,
    pub default_max_usage: Option<Option<i32>>,
    pub default_access_days: Option<Option<i32>>,
    pub is_active: Option<bool>,
}

impl UpdateModule {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.price_cents.is_none()
            && self.url.is_none()
            && self.image_url.is_none()
            && self.default_max_usage.is_none()
            && self.default_access_days.is_none()
            && self.is_active.is_none()
    }
}

/// Whether `slug` is a valid module slug (`[a-z0-9][a-z0-9-]*`, max 64)
pub fn is_valid_slug(slug: &str) -> bool {
    let mut chars = slug.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    slug.len() <= 64 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl Module {
    /// Whether users may activate this module without a purchase
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }

    pub async fn create(pool: &PgPool, data: CreateModule) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO modules (slug, title, description, category, price_cents, url, image_url,
                                  default_max_usage, default_access_days)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {MODULE_COLUMNS}"
        );

        sqlx::query_as::<_, Module>(&query)
            .bind(data.slug)
            .bind(data.title)
            .bind(data.description)
            .bind(data.category)
            .bind(data.price_cents)
            .bind(data.url)
            .bind(data.image_url)
            .bind(data.default_max_usage)
            .bind(data.default_access_days)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {MODULE_COLUMNS} FROM modules WHERE id = $1");

        sqlx::query_as::<_, Module>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_slug(pool: &PgPool, slug: &str) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {MODULE_COLUMNS} FROM modules WHERE slug = $1");

        sqlx::query_as::<_, Module>(&query)
            .bind(slug)
            .fetch_optional(pool)
            .await
    }

    /// Active modules ordered by title, optionally filtered by category
    pub async fn list_active(
        pool: &PgPool,
        category: Option<&str>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {MODULE_COLUMNS} FROM modules
             WHERE is_active AND ($1::TEXT IS NULL OR category = $1)
             ORDER BY title"
        );

        sqlx::query_as::<_, Module>(&query)
            .bind(category)
            .fetch_all(pool)
            .await
    }

    /// Applies a partial update; returns None if the module does not exist
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateModule,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = String::from("UPDATE modules SET updated_at = NOW()");
        let mut bind_count = 1;

        let mut push = |column: &str, present: bool| {
            if present {
                bind_count += 1;
                query.push_str(&format!(", {} = ${}", column, bind_count));
            }
        };

        push("title", data.title.is_some());
        push("description", data.description.is_some());
        push("category", data.category.is_some());
        push("price_cents", data.price_cents.is_some());
        push("url", data.url.is_some());
        push("image_url", data.image_url.is_some());
        push("default_max_usage", data.default_max_usage.is_some());
        push("default_access_days", data.default_access_days.is_some());
        push("is_active", data.is_active.is_some());

        query.push_str(&format!(" WHERE id = $1 RETURNING {MODULE_COLUMNS}"));

        let mut q = sqlx::query_as::<_, Module>(&query).bind(id);

        if let Some(title) = data.title {
            q = q.bind(title);
        }
        if let Some(description) = data.description {
            q = q.bind(description);
        }
        if let Some(category) = data.category {
            q = q.bind(category);
        }
        if let Some(price) = data.price_cents {
            q = q.bind(price);
        }
        if let Some(url) = data.url {
            q = q.bind(url);
        }
        if let Some(image_url) = data.image_url {
            q = q.bind(image_url);
        }
        if let Some(max_usage) = data.default_max_usage {
            q = q.bind(max_usage);
        }
        if let Some(days) = data.default_access_days {
            q = q.bind(days);
        }
        if let Some(active) = data.is_active {
            q = q.bind(active);
        }

        q.fetch_optional(pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_validation() {
        assert!(is_valid_slug("whisper"));
        assert!(is_valid_slug("stable-diffusion"));
        assert!(is_valid_slug("qrcodes2"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("-leading"));
        assert!(!is_valid_slug("Upper"));
        assert!(!is_valid_slug("with space"));
        assert!(!is_valid_slug("../etc"));
        assert!(!is_valid_slug(&"a".repeat(65)));
    }

    #[test]
    fn test_update_module_is_empty() {
        assert!(UpdateModule::default().is_empty());

        let update = UpdateModule {
            url: Some(None),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn test_create_module_defaults_from_json() {
        let data: CreateModule =
            serde_json::from_str(r#"{"slug":"whisper","title":"Whisper"}"#).unwrap();
        assert_eq!(data.category, "general");
        assert_eq!(data.price_cents, 0);
        assert!(data.description.is_empty());
    }
}
