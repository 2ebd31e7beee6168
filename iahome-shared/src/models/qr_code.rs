/// QR code model: short-code redirects with scan counting
///
/// # Schema
///
/// ```sql
/// CREATE TABLE qr_codes (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     code VARCHAR(16) NOT NULL UNIQUE,
///     user_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
///     name VARCHAR(255),
///     destination_url VARCHAR(2048) NOT NULL,
///     scans BIGINT NOT NULL DEFAULT 0,
///     last_scan_at TIMESTAMPTZ,
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Length of generated short codes (base62)
pub const CODE_LENGTH: usize = 8;

/// Insert attempts before giving up on code collisions
const MAX_CODE_ATTEMPTS: usize = 3;

const QR_COLUMNS: &str =
    "id, code, user_id, name, destination_url, scans, last_scan_at, is_active, created_at";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QrCode {
    pub id: Uuid,

    /// Public short code used in `/qr/<code>`
    pub code: String,

    pub user_id: Uuid,
    pub name: Option<String>,
    pub destination_url: String,
    pub scans: i64,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQrCode {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub destination_url: String,
}

/// Generates a random base62 short code
pub fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(char::from)
        .collect()
}

/// Whether `code` has the shape of a generated short code
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.chars().all(|c| c.is_ascii_alphanumeric())
}

fn is_code_collision(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .constraint()
            .map(|c| c.contains("code"))
            .unwrap_or(false),
        _ => false,
    }
}

impl QrCode {
    /// Creates a QR code with a fresh short code
    ///
    /// Retries with a new code if the generated one is already taken.
    pub async fn create(pool: &PgPool, data: CreateQrCode) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO qr_codes (code, user_id, name, destination_url)
             VALUES ($1, $2, $3, $4)
             RETURNING {QR_COLUMNS}"
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = sqlx::query_as::<_, QrCode>(&query)
                .bind(generate_code())
                .bind(data.user_id)
                .bind(&data.name)
                .bind(&data.destination_url)
                .fetch_one(pool)
                .await;

            match result {
                Err(e) if attempt < MAX_CODE_ATTEMPTS && is_code_collision(&e) => {
                    tracing::debug!(attempt, "QR code collision, regenerating");
                }
                other => return other,
            }
        }
    }

    pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {QR_COLUMNS} FROM qr_codes WHERE code = $1");

        sqlx::query_as::<_, QrCode>(&query)
            .bind(code)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {QR_COLUMNS} FROM qr_codes WHERE user_id = $1 ORDER BY created_at DESC"
        );

        sqlx::query_as::<_, QrCode>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Counts one scan and returns the updated row
    ///
    /// One statement per hit: the increment and the destination read cannot
    /// interleave with another scan. Unknown or inactive codes return `None`
    /// and are not counted.
    pub async fn record_scan(pool: &PgPool, code: &str) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE qr_codes
             SET scans = scans + 1, last_scan_at = NOW()
             WHERE code = $1 AND is_active
             RETURNING {QR_COLUMNS}"
        );

        sqlx::query_as::<_, QrCode>(&query)
            .bind(code)
            .fetch_optional(pool)
            .await
    }

    /// Disables a code owned by `user_id`
    pub async fn deactivate(pool: &PgPool, id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE qr_codes SET is_active = FALSE WHERE id = $1 AND user_id = $2 AND is_active",
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
