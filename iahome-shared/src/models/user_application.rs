/// UserApplication model: a user's access grant to one module
///
/// A grant carries the activation flag, the usage quota and the expiry that
/// every module token validation re-checks. Grants are never deleted by the
/// application; they are switched off with `is_active = false`.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE user_applications (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
///     module_id UUID NOT NULL REFERENCES modules(id) ON DELETE CASCADE,
///     module_slug VARCHAR(64) NOT NULL,
///     access_level VARCHAR(16) NOT NULL DEFAULT 'basic',
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     usage_count INTEGER NOT NULL DEFAULT 0,
///     max_usage INTEGER,                 -- NULL = unlimited
///     expires_at TIMESTAMPTZ,            -- NULL = never
///     last_used_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     UNIQUE (user_id, module_id),
///     CHECK (max_usage IS NULL OR usage_count <= max_usage)
/// );
/// ```
///
/// # Concurrency
///
/// [`UserApplication::try_increment_usage`] is a single conditional
/// `UPDATE ... RETURNING`; parallel callers are serialised by the row lock
/// and the `usage_count < max_usage` predicate, so the counter cannot pass
/// the ceiling.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

const GRANT_COLUMNS: &str = "id, user_id, module_id, module_slug, access_level, is_active, \
     usage_count, max_usage, expires_at, last_used_at, created_at, updated_at";

/// Access tier of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Basic,
    Premium,
    Admin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Basic => "basic",
            AccessLevel::Premium => "premium",
            AccessLevel::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(AccessLevel::Basic),
            "premium" => Some(AccessLevel::Premium),
            "admin" => Some(AccessLevel::Admin),
            _ => None,
        }
    }
}

/// Evaluated state of a grant at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// Usable
    Active,

    /// Switched off (`is_active = false`)
    Inactive,

    /// `expires_at` has passed
    Expired,

    /// `usage_count` has reached `max_usage`
    QuotaExhausted,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Active => "active",
            GrantStatus::Inactive => "inactive",
            GrantStatus::Expired => "expired",
            GrantStatus::QuotaExhausted => "quota_exhausted",
        }
    }
}

/// Access grant row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserApplication {
    pub id: Uuid,
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub module_slug: String,
    pub access_level: String,
    pub is_active: bool,
    pub usage_count: i32,
    pub max_usage: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for activating (or re-activating) a grant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateGrant {
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub module_slug: String,
    pub access_level: AccessLevel,
    pub max_usage: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ActivateGrant {
    /// Builds an activation using a module's default quota and validity
    pub fn from_module_defaults(
        user_id: Uuid,
        module: &super::module::Module,
        access_level: AccessLevel,
    ) -> Self {
        Self {
            user_id,
            module_id: module.id,
            module_slug: module.slug.clone(),
            access_level,
            max_usage: module.default_max_usage,
            expires_at: module
                .default_access_days
                .map(|days| Utc::now() + Duration::days(days as i64)),
        }
    }
}

impl UserApplication {
    /// Parsed access level; unknown values degrade to `basic`
    pub fn get_access_level(&self) -> AccessLevel {
        AccessLevel::from_str(&self.access_level).unwrap_or(AccessLevel::Basic)
    }

    /// Evaluates the grant at `now`
    ///
    /// Checks run in order: activation, expiry, quota.
    pub fn status_at(&self, now: DateTime<Utc>) -> GrantStatus {
        if !self.is_active {
            return GrantStatus::Inactive;
        }

        if self.is_expired_at(now) {
            return GrantStatus::Expired;
        }

        if self.is_quota_spent() {
            return GrantStatus::QuotaExhausted;
        }

        GrantStatus::Active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    /// Whether every allowed use is consumed, active or not
    pub fn is_quota_spent(&self) -> bool {
        matches!(self.max_usage, Some(max) if self.usage_count >= max)
    }

    pub fn status(&self) -> GrantStatus {
        self.status_at(Utc::now())
    }

    /// Uses left before the quota is exhausted (None = unlimited)
    pub fn remaining_uses(&self) -> Option<i32> {
        self.max_usage
            .map(|max| max.saturating_sub(self.usage_count).max(0))
    }

    /// Creates the grant, or renews an existing one with a fresh quota
    ///
    /// Renewal resets `usage_count` to zero and replaces quota, expiry and
    /// access level. Use [`UserApplication::reactivate`] to switch a grant
    /// back on without touching its counter.
    pub async fn activate(pool: &PgPool, data: ActivateGrant) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO user_applications
                 (user_id, module_id, module_slug, access_level, max_usage, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (user_id, module_id) DO UPDATE SET
                 module_slug = EXCLUDED.module_slug,
                 access_level = EXCLUDED.access_level,
                 max_usage = EXCLUDED.max_usage,
                 expires_at = EXCLUDED.expires_at,
                 usage_count = 0,
                 is_active = TRUE,
                 updated_at = NOW()
             RETURNING {GRANT_COLUMNS}"
        );

        sqlx::query_as::<_, UserApplication>(&query)
            .bind(data.user_id)
            .bind(data.module_id)
            .bind(data.module_slug)
            .bind(data.access_level.as_str())
            .bind(data.max_usage)
            .bind(data.expires_at)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {GRANT_COLUMNS} FROM user_applications WHERE id = $1");

        sqlx::query_as::<_, UserApplication>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Looks up the grant a module token refers to
    pub async fn find_for_module(
        pool: &PgPool,
        user_id: Uuid,
        module_slug: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {GRANT_COLUMNS} FROM user_applications
             WHERE user_id = $1 AND module_slug = $2"
        );

        sqlx::query_as::<_, UserApplication>(&query)
            .bind(user_id)
            .bind(module_slug)
            .fetch_optional(pool)
            .await
    }

    /// All grants of a user, newest first
    pub async fn list_by_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {GRANT_COLUMNS} FROM user_applications
             WHERE user_id = $1
             ORDER BY created_at DESC"
        );

        sqlx::query_as::<_, UserApplication>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Atomically consumes one use of the grant
    ///
    /// Returns the updated row, or `None` when the grant is missing,
    /// inactive, expired or already at its quota. Callers re-read the grant
    /// to tell those cases apart.
    pub async fn try_increment_usage(
        pool: &PgPool,
        user_id: Uuid,
        module_slug: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE user_applications
             SET usage_count = usage_count + 1, last_used_at = NOW(), updated_at = NOW()
             WHERE user_id = $1
               AND module_slug = $2
               AND is_active
               AND (expires_at IS NULL OR expires_at > NOW())
               AND (max_usage IS NULL OR usage_count < max_usage)
             RETURNING {GRANT_COLUMNS}"
        );

        sqlx::query_as::<_, UserApplication>(&query)
            .bind(user_id)
            .bind(module_slug)
            .fetch_optional(pool)
            .await
    }

    /// Switches the grant off; returns false if it was already inactive
    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE user_applications
            SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1 AND is_active
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Switches an inactive grant back on, keeping its usage and expiry
    ///
    /// Returns `None` unless the grant is inactive, unexpired and has uses
    /// left.
    pub async fn reactivate(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE user_applications
             SET is_active = TRUE, updated_at = NOW()
             WHERE id = $1
               AND NOT is_active
               AND (expires_at IS NULL OR expires_at > NOW())
               AND (max_usage IS NULL OR usage_count < max_usage)
             RETURNING {GRANT_COLUMNS}"
        );

        sqlx::query_as::<_, UserApplication>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Switches off every active grant whose expiry has passed
    pub async fn deactivate_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE user_applications
            SET is_active = FALSE, updated_at = NOW()
            WHERE is_active AND expires_at IS NOT NULL AND expires_at <= NOW()
            "#,
        )
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}
