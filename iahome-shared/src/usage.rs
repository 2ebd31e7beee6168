/// Per-grant usage counter
///
/// Each tool invocation consumes one use of the caller's grant. The
/// increment is a single conditional `UPDATE` (see
/// [`UserApplication::try_increment_usage`]): the quota check and the write
/// happen in one statement, so concurrent requests can never push
/// `usage_count` past `max_usage`.
///
/// When the update matches no row, the grant is read back once to report
/// why.
///
/// # Example
///
/// ```no_run
/// use iahome_shared::usage::UsageCounter;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, user_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let counter = UsageCounter::new(pool);
/// let outcome = counter.record(user_id, "whisper").await?;
/// if outcome.exhausted {
///     println!("that was the last use");
/// }
/// # Ok(())
/// # }
/// ```

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use std::fmt;
use uuid::Uuid;

use crate::models::user_application::{GrantStatus, UserApplication};

/// Usage counting error
#[derive(Debug)]
pub enum UsageError {
    /// No grant for this user and module
    NotFound,

    /// Grant is switched off
    Inactive,

    /// Grant expired
    Expired,

    /// Quota already used up
    QuotaExhausted { usage_count: i32, max_usage: i32 },

    DatabaseError(sqlx::Error),
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageError::NotFound => write!(f, "Module is not activated for this account"),
            UsageError::Inactive => write!(f, "Module access has been deactivated"),
            UsageError::Expired => write!(f, "Module access has expired"),
            UsageError::QuotaExhausted {
                usage_count,
                max_usage,
            } => write!(f, "Usage quota exhausted ({}/{})", usage_count, max_usage),
            UsageError::DatabaseError(err) => write!(f, "Database error: {}", err),
        }
    }
}

impl std::error::Error for UsageError {}

impl From<sqlx::Error> for UsageError {
    fn from(err: sqlx::Error) -> Self {
        UsageError::DatabaseError(err)
    }
}

/// Result of a counted use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageOutcome {
    pub usage_count: i32,

    /// None = unlimited
    pub max_usage: Option<i32>,

    /// Uses left after this one (None = unlimited)
    pub remaining: Option<i32>,

    /// True when this use consumed the last one
    pub exhausted: bool,
}

impl UsageOutcome {
    pub fn from_grant(grant: &UserApplication) -> Self {
        let remaining = grant.remaining_uses();

        Self {
            usage_count: grant.usage_count,
            max_usage: grant.max_usage,
            remaining,
            exhausted: remaining == Some(0),
        }
    }
}

/// Classifies a refused increment from the re-read grant
pub fn classify_refusal(grant: Option<&UserApplication>) -> UsageError {
    let Some(grant) = grant else {
        return UsageError::NotFound;
    };

    match grant.status_at(Utc::now()) {
        GrantStatus::Inactive => UsageError::Inactive,
        GrantStatus::Expired => UsageError::Expired,
        GrantStatus::QuotaExhausted => UsageError::QuotaExhausted {
            usage_count: grant.usage_count,
            max_usage: grant.max_usage.unwrap_or(grant.usage_count),
        },
        // Raced with a reactivation between the update and the read
        GrantStatus::Active => UsageError::NotFound,
    }
}

/// Records tool invocations against grants
#[derive(Clone)]
pub struct UsageCounter {
    pool: PgPool,
}

impl UsageCounter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Consumes one use of the (user, module) grant
    pub async fn record(&self, user_id: Uuid, module_slug: &str) -> Result<UsageOutcome, UsageError> {
        match UserApplication::try_increment_usage(&self.pool, user_id, module_slug).await? {
            Some(grant) => {
                let outcome = UsageOutcome::from_grant(&grant);
                tracing::debug!(
                    user_id = %user_id,
                    module = module_slug,
                    usage_count = outcome.usage_count,
                    exhausted = outcome.exhausted,
                    "Usage recorded"
                );
                Ok(outcome)
            }
            None => {
                let grant =
                    UserApplication::find_for_module(&self.pool, user_id, module_slug).await?;
                let err = classify_refusal(grant.as_ref());
                tracing::info!(
                    user_id = %user_id,
                    module = module_slug,
                    error = %err,
                    "Usage refused"
                );
                Err(err)
            }
        }
    }
}
