/// Profile model and database operations
///
/// A profile is a platform account. Profiles are never hard-deleted:
/// deactivation flips `is_active` and leaves grants and QR codes in place.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE profiles (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     email VARCHAR(320) NOT NULL,              -- unique on LOWER(email)
///     role VARCHAR(16) NOT NULL DEFAULT 'user', -- 'user' | 'admin'
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     password_hash VARCHAR(255) NOT NULL,
///     full_name VARCHAR(255),
///     email_verified BOOLEAN NOT NULL DEFAULT FALSE,
///     email_verification_token_hash VARCHAR(64),
///     password_reset_token_hash VARCHAR(64),
///     password_reset_expires_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     last_login_at TIMESTAMPTZ
/// );
/// ```
///
/// Secret tokens (verification, reset) are stored as SHA-256 hex digests; see
/// [`crate::auth::secret_token`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

const PROFILE_COLUMNS: &str = "id, email, role, is_active, password_hash, full_name, \
     email_verified, email_verification_token_hash, password_reset_token_hash, \
     password_reset_expires_at, created_at, updated_at, last_login_at";

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    /// Converts role to string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Parses role from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Platform account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: Uuid,

    /// Stored lowercase
    pub email: String,

    /// `user` or `admin`; see [`Profile::get_role`]
    pub role: String,

    /// False once the account has been deactivated
    pub is_active: bool,

    /// Argon2id PHC string
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub full_name: Option<String>,

    pub email_verified: bool,

    #[serde(skip_serializing)]
    pub email_verification_token_hash: Option<String>,

    #[serde(skip_serializing)]
    pub password_reset_token_hash: Option<String>,

    #[serde(skip_serializing)]
    pub password_reset_expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Input for creating a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProfile {
    /// Email address (normalised to lowercase on insert)
    pub email: String,

    /// Argon2id password hash (NOT plaintext password!)
    pub password_hash: String,

    pub full_name: Option<String>,

    pub role: Role,

    /// SHA-256 digest of the email verification token sent to the user
    pub email_verification_token_hash: Option<String>,
}

/// Normalises an email address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Profile {
    /// Parsed role; unknown values are treated as `user`
    pub fn get_role(&self) -> Role {
        Role::from_str(&self.role).unwrap_or(Role::User)
    }

    pub fn is_admin(&self) -> bool {
        self.get_role() == Role::Admin
    }

    /// Creates a new profile
    ///
    /// # Errors
    ///
    /// Fails with a unique-constraint violation (`idx_profiles_email`) when
    /// the email is already registered.
    pub async fn create(pool: &PgPool, data: CreateProfile) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO profiles (email, password_hash, full_name, role, email_verification_token_hash)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {PROFILE_COLUMNS}"
        );

        sqlx::query_as::<_, Profile>(&query)
            .bind(normalize_email(&data.email))
            .bind(data.password_hash)
            .bind(data.full_name)
            .bind(data.role.as_str())
            .bind(data.email_verification_token_hash)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1");

        sqlx::query_as::<_, Profile>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Case-insensitive lookup by email
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE LOWER(email) = $1");

        sqlx::query_as::<_, Profile>(&query)
            .bind(normalize_email(email))
            .fetch_optional(pool)
            .await
    }

    /// Marks the email as verified if `token_hash` matches a pending token
    ///
    /// The token is cleared in the same statement so it can only be used once.
    pub async fn verify_email(pool: &PgPool, token_hash: &str) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE profiles
             SET email_verified = TRUE, email_verification_token_hash = NULL, updated_at = NOW()
             WHERE email_verification_token_hash = $1
             RETURNING {PROFILE_COLUMNS}"
        );

        sqlx::query_as::<_, Profile>(&query)
            .bind(token_hash)
            .fetch_optional(pool)
            .await
    }

    /// Stores a password reset token digest with its expiry
    pub async fn set_password_reset(
        pool: &PgPool,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET password_reset_token_hash = $2, password_reset_expires_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replaces the password if the reset token is valid and unexpired
    ///
    /// Consumes the token. Returns `None` when no profile holds a live token
    /// with that digest.
    pub async fn reset_password(
        pool: &PgPool,
        token_hash: &str,
        new_password_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE profiles
             SET password_hash = $2,
                 password_reset_token_hash = NULL,
                 password_reset_expires_at = NULL,
                 updated_at = NOW()
             WHERE password_reset_token_hash = $1
               AND password_reset_expires_at > NOW()
               AND is_active
             RETURNING {PROFILE_COLUMNS}"
        );

        sqlx::query_as::<_, Profile>(&query)
            .bind(token_hash)
            .bind(new_password_hash)
            .fetch_optional(pool)
            .await
    }

    /// Clears reset tokens whose expiry has passed; returns rows touched
    pub async fn purge_expired_reset_tokens(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET password_reset_token_hash = NULL, password_reset_expires_at = NULL
            WHERE password_reset_expires_at IS NOT NULL
              AND password_reset_expires_at <= NOW()
            "#,
        )
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn update_last_login(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE profiles SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_role(pool: &PgPool, id: Uuid, role: Role) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE profiles SET role = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(role.as_str())
                .execute(pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-deletes the account
    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE profiles SET is_active = FALSE, updated_at = NOW() WHERE id = $1 AND is_active",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!(Role::from_str(Role::Admin.as_str()), Some(Role::Admin));
        assert_eq!(Role::from_str(Role::User.as_str()), Some(Role::User));
        assert_eq!(Role::from_str("root"), None);
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn test_unknown_role_defaults_to_user() {
        let now = Utc::now();
        let profile = Profile {
            id: Uuid::new_v4(),
            email: "a@b.c".to_string(),
            role: "superuser".to_string(),
            is_active: true,
            password_hash: String::new(),
            full_name: None,
            email_verified: false,
            email_verification_token_hash: None,
            password_reset_token_hash: None,
            password_reset_expires_at: None,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };

        assert_eq!(profile.get_role(), Role::User);
        assert!(!profile.is_admin());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let now = Utc::now();
        let profile = Profile {
            id: Uuid::new_v4(),
            email: "a@b.c".to_string(),
            role: "admin".to_string(),
            is_active: true,
            password_hash: "$argon2id$secret".to_string(),
            full_name: None,
            email_verified: true,
            email_verification_token_hash: Some("abc".to_string()),
            password_reset_token_hash: Some("def".to_string()),
            password_reset_expires_at: Some(now),
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };

        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("password_reset_token_hash").is_none());
        assert_eq!(json["role"], "admin");
    }
}
