/// Module access validation
///
/// Validating a module token has two halves:
///
/// 1. The token itself: signature, issuer, audience, `nbf`, `exp`, version
///    (see [`crate::auth::module_token`]), then target module and the
///    `access` permission.
/// 2. The grant behind it: the `user_applications` row for (user, module)
///    is re-read on every call and must be active and unexpired.
///
/// The quota only gates new sessions. [`AccessValidator::validate`] refuses
/// a grant with no uses left; [`AccessValidator::validate_session`] is for
/// requests inside a session that was already counted, and lets them
/// through once the last use is spent.
///
/// The second half is what makes grant changes (deactivation, expiry) take
/// effect before the token's own `exp`.
///
/// # Example
///
/// ```no_run
/// use iahome_shared::access::AccessValidator;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool, token: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let validator = AccessValidator::new(pool, "secret-key-at-least-32-bytes-long!!");
/// let access = validator.validate(token, "whisper").await?;
/// println!("user {} may use {}", access.claims.sub, access.grant.module_slug);
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::auth::module_token::{decode_module_token, ModuleClaims, ModuleTokenError, Permission};
use crate::models::user_application::{GrantStatus, UserApplication};

/// Why a well-formed, correctly signed token was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Token was issued for a different module
    WrongModule,
    /// Token lacks the `access` permission
    MissingPermission,
    NoGrant,
    GrantInactive,
    GrantExpired,
    QuotaExhausted,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::WrongModule => "wrong_module",
            DenyReason::MissingPermission => "missing_permission",
            DenyReason::NoGrant => "no_grant",
            DenyReason::GrantInactive => "grant_inactive",
            DenyReason::GrantExpired => "grant_expired",
            DenyReason::QuotaExhausted => "quota_exhausted",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::WrongModule => "Token was not issued for this module",
            DenyReason::MissingPermission => "Token does not grant access",
            DenyReason::NoGrant => "Module is not activated for this account",
            DenyReason::GrantInactive => "Module access has been deactivated",
            DenyReason::GrantExpired => "Module access has expired",
            DenyReason::QuotaExhausted => "Usage quota exhausted",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// Token could not be parsed (400)
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// Token failed signature or claim checks (401)
    #[error("Invalid token: {0}")]
    Invalid(String),

    /// Token `exp` has passed (401)
    #[error("Token has expired")]
    Expired,

    /// Token is valid but does not open this module right now (403)
    #[error("{}", .0.message())]
    Denied(DenyReason),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<ModuleTokenError> for AccessError {
    fn from(err: ModuleTokenError) -> Self {
        match err {
            ModuleTokenError::Expired => AccessError::Expired,
            ModuleTokenError::Malformed(msg) => AccessError::Malformed(msg),
            ModuleTokenError::UnsupportedVersion(ver) => {
                AccessError::Malformed(format!("unsupported token version {}", ver))
            }
            ModuleTokenError::InvalidSignature => AccessError::Invalid("bad signature".to_string()),
            ModuleTokenError::InvalidClaims(msg) => AccessError::Invalid(msg),
            ModuleTokenError::Signing(msg) => AccessError::Invalid(msg),
        }
    }
}

/// Checks a grant (if any) at `now`
pub fn check_grant(grant: Option<&UserApplication>, now: DateTime<Utc>) -> Result<(), DenyReason> {
    let grant = grant.ok_or(DenyReason::NoGrant)?;

    match grant.status_at(now) {
        GrantStatus::Active => Ok(()),
        GrantStatus::Inactive => Err(DenyReason::GrantInactive),
        GrantStatus::Expired => Err(DenyReason::GrantExpired),
        GrantStatus::QuotaExhausted => Err(DenyReason::QuotaExhausted),
    }
}

/// Checks token claims against the module being opened
pub fn check_claims(claims: &ModuleClaims, module_slug: &str) -> Result<(), DenyReason> {
    if claims.module != module_slug {
        return Err(DenyReason::WrongModule);
    }

    if !claims.has_permission(Permission::Access) {
        return Err(DenyReason::MissingPermission);
    }

    Ok(())
}

/// Like [`check_grant`], but a spent quota does not end an open session
pub fn check_session_grant(
    grant: Option<&UserApplication>,
    now: DateTime<Utc>,
) -> Result<(), DenyReason> {
    match check_grant(grant, now) {
        Err(DenyReason::QuotaExhausted) => Ok(()),
        other => other,
    }
}

/// Token plus the grant it was checked against
#[derive(Debug, Clone)]
pub struct ValidatedAccess {
    pub claims: ModuleClaims,
    pub grant: UserApplication,
}

/// Validates module tokens against live grants
#[derive(Clone)]
pub struct AccessValidator {
    pool: PgPool,
    secret: String,
}

impl AccessValidator {
    pub fn new(pool: PgPool, secret: impl Into<String>) -> Self {
        Self {
            pool,
            secret: secret.into(),
        }
    }

    /// Decodes the token only; no grant lookup
    pub fn decode(&self, token: &str) -> Result<ModuleClaims, AccessError> {
        Ok(decode_module_token(token, &self.secret)?)
    }

    /// Full validation of `token` for `module_slug`, quota included
    pub async fn validate(
        &self,
        token: &str,
        module_slug: &str,
    ) -> Result<ValidatedAccess, AccessError> {
        self.validate_with(token, module_slug, check_grant).await
    }

    /// Validation for requests inside an already counted session
    pub async fn validate_session(
        &self,
        token: &str,
        module_slug: &str,
    ) -> Result<ValidatedAccess, AccessError> {
        self.validate_with(token, module_slug, check_session_grant).await
    }

    async fn validate_with(
        &self,
        token: &str,
        module_slug: &str,
        grant_check: fn(Option<&UserApplication>, DateTime<Utc>) -> Result<(), DenyReason>,
    ) -> Result<ValidatedAccess, AccessError> {
        let claims = self.decode(token)?;
        check_claims(&claims, module_slug).map_err(AccessError::Denied)?;

        let grant = UserApplication::find_for_module(&self.pool, claims.sub, module_slug).await?;
        let denied = |reason: DenyReason| {
            tracing::debug!(
                user_id = %claims.sub,
                module = module_slug,
                reason = reason.as_str(),
                "Module access denied"
            );
            AccessError::Denied(reason)
        };

        grant_check(grant.as_ref(), Utc::now()).map_err(denied)?;
        let grant = grant.ok_or_else(|| denied(DenyReason::NoGrant))?;

        Ok(ValidatedAccess { claims, grant })
    }
}
