/// Module access tokens
///
/// A module token lets one user open one module through the proxy. It is an
/// HS256 JWT with a fixed audience and a format version:
///
/// | claim       | meaning                                           |
/// |-------------|---------------------------------------------------|
/// | `sub`       | profile id                                        |
/// | `email`     | profile email                                     |
/// | `module`    | module slug                                       |
/// | `module_id` | module id                                         |
/// | `perms`     | subset of `read`, `access`, `write`, `advanced_features` |
/// | `iss`/`aud` | `iahome` / `iahome-module`                        |
/// | `iat`/`nbf`/`exp` | Unix timestamps                             |
/// | `ver`       | format version, currently `1`                     |
///
/// Tokens cannot be revoked before `exp`; validation re-reads the grant
/// (see [`crate::access`]) so a deactivated or exhausted grant still blocks
/// them.
///
/// # Example
///
/// ```
/// use iahome_shared::auth::module_token::{decode_module_token, ModuleTokenIssuer, Permission};
/// use iahome_shared::models::user_application::AccessLevel;
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let issuer = ModuleTokenIssuer::new("secret-key-at-least-32-bytes-long!!", 3600, 604800);
/// let perms = Permission::resolve(None, AccessLevel::Basic);
/// let issued = issuer.issue(Uuid::new_v4(), "a@b.c", Uuid::new_v4(), "whisper", perms, None)?;
///
/// let claims = decode_module_token(&issued.token, "secret-key-at-least-32-bytes-long!!")?;
/// assert_eq!(claims.module, "whisper");
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jwt::ISSUER;
use crate::models::user_application::AccessLevel;

/// Audience of module tokens; keeps session tokens from opening modules
pub const AUDIENCE: &str = "iahome-module";

/// Current token format version
pub const TOKEN_VERSION: u32 = 1;

/// Shortest lifetime a caller may request
pub const MIN_TTL_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ModuleTokenError {
    /// Not a JWT, or claims missing / of the wrong shape
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    /// Wrong issuer or audience, or used before `nbf`
    #[error("Invalid token claims: {0}")]
    InvalidClaims(String),

    #[error("Unsupported token version {0}")]
    UnsupportedVersion(u32),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// What a module token allows inside the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Access,
    Write,
    AdvancedFeatures,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Access => "access",
            Permission::Write => "write",
            Permission::AdvancedFeatures => "advanced_features",
        }
    }

    /// Permissions given when the caller does not ask for any
    pub fn defaults() -> Vec<Permission> {
        vec![Permission::Read, Permission::Access]
    }

    /// Highest set of permissions a grant's access level can carry
    pub fn allowed_for(level: AccessLevel) -> &'static [Permission] {
        match level {
            AccessLevel::Basic => &[Permission::Read, Permission::Access],
            AccessLevel::Premium => &[Permission::Read, Permission::Access, Permission::Write],
            AccessLevel::Admin => &[
                Permission::Read,
                Permission::Access,
                Permission::Write,
                Permission::AdvancedFeatures,
            ],
        }
    }

    /// Requested permissions (or the defaults) narrowed to what `level` allows
    ///
    /// Duplicates are dropped; order follows the request.
    pub fn resolve(requested: Option<Vec<Permission>>, level: AccessLevel) -> Vec<Permission> {
        let allowed = Self::allowed_for(level);
        let mut resolved = Vec::new();

        for perm in requested.unwrap_or_else(Self::defaults) {
            if allowed.contains(&perm) && !resolved.contains(&perm) {
                resolved.push(perm);
            }
        }

        resolved
    }
}

/// Claims carried by a module token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleClaims {
    pub sub: Uuid,
    pub email: String,
    pub module: String,
    pub module_id: Uuid,
    pub perms: Vec<Permission>,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub ver: u32,
}

impl ModuleClaims {
    pub fn new(
        user_id: Uuid,
        email: &str,
        module_id: Uuid,
        module_slug: &str,
        perms: Vec<Permission>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();

        Self {
            sub: user_id,
            email: email.to_string(),
            module: module_slug.to_string(),
            module_id,
            perms,
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
            ver: TOKEN_VERSION,
        }
    }

    pub fn has_permission(&self, perm: Permission) -> bool {
        self.perms.contains(&perm)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn sign(&self, secret: &str) -> Result<String, ModuleTokenError> {
        let key = EncodingKey::from_secret(secret.as_bytes());

        encode(&Header::new(Algorithm::HS256), self, &key)
            .map_err(|e| ModuleTokenError::Signing(e.to_string()))
    }
}

/// A freshly signed token
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub claims: ModuleClaims,
}

/// Signs module tokens with a configured default and maximum lifetime
#[derive(Debug, Clone)]
pub struct ModuleTokenIssuer {
    secret: String,
    default_ttl_secs: i64,
    max_ttl_secs: i64,
}

impl ModuleTokenIssuer {
    pub fn new(secret: impl Into<String>, default_ttl_secs: i64, max_ttl_secs: i64) -> Self {
        let max_ttl_secs = max_ttl_secs.max(MIN_TTL_SECS);

        Self {
            secret: secret.into(),
            default_ttl_secs: default_ttl_secs.clamp(MIN_TTL_SECS, max_ttl_secs),
            max_ttl_secs,
        }
    }

    /// Lifetime actually granted for a requested TTL
    pub fn effective_ttl(&self, requested_secs: Option<i64>) -> Duration {
        let secs = requested_secs
            .unwrap_or(self.default_ttl_secs)
            .clamp(MIN_TTL_SECS, self.max_ttl_secs);
        Duration::seconds(secs)
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        module_id: Uuid,
        module_slug: &str,
        perms: Vec<Permission>,
        ttl_secs: Option<i64>,
    ) -> Result<IssuedToken, ModuleTokenError> {
        let claims = ModuleClaims::new(
            user_id,
            email,
            module_id,
            module_slug,
            perms,
            self.effective_ttl(ttl_secs),
        );
        let token = claims.sign(&self.secret)?;

        tracing::debug!(
            user_id = %user_id,
            module = module_slug,
            exp = claims.exp,
            "Issued module token"
        );

        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
            claims,
        })
    }
}

/// Verifies signature, issuer, audience, `nbf`, `exp` and version
pub fn decode_module_token(token: &str, secret: &str) -> Result<ModuleClaims, ModuleTokenError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.set_audience(&[AUDIENCE]);
    validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.leeway = 0;

    let data = decode::<ModuleClaims>(token, &key, &validation).map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => ModuleTokenError::Expired,
        ErrorKind::InvalidSignature => ModuleTokenError::InvalidSignature,
        ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience | ErrorKind::ImmatureSignature => {
            ModuleTokenError::InvalidClaims(e.to_string())
        }
        _ => ModuleTokenError::Malformed(e.to_string()),
    })?;

    if data.claims.ver != TOKEN_VERSION {
        return Err(ModuleTokenError::UnsupportedVersion(data.claims.ver));
    }

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "module-token-secret-at-least-32-bytes";

    fn issuer() -> ModuleTokenIssuer {
        ModuleTokenIssuer::new(SECRET, 3600, 7 * 24 * 3600)
    }

    #[test]
    fn test_issue_and_decode() {
        let user_id = Uuid::new_v4();
        let module_id = Uuid::new_v4();
        let issued = issuer()
            .issue(user_id, "user@example.com", module_id, "whisper", Permission::defaults(), None)
            .unwrap();

        let claims = decode_module_token(&issued.token, SECRET).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.module_id, module_id);
        assert_eq!(claims.module, "whisper");
        assert_eq!(claims.aud, AUDIENCE);
        assert_eq!(claims.ver, TOKEN_VERSION);
        assert!(claims.has_permission(Permission::Access));
        assert!(!claims.has_permission(Permission::Write));
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_ttl_is_clamped() {
        let issuer = issuer();
        assert_eq!(issuer.effective_ttl(None), Duration::seconds(3600));
        assert_eq!(issuer.effective_ttl(Some(5)), Duration::seconds(MIN_TTL_SECS));
        assert_eq!(issuer.effective_ttl(Some(-100)), Duration::seconds(MIN_TTL_SECS));
        assert_eq!(
            issuer.effective_ttl(Some(30 * 24 * 3600)),
            Duration::seconds(7 * 24 * 3600)
        );
        assert_eq!(issuer.effective_ttl(Some(600)), Duration::seconds(600));
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut claims = ModuleClaims::new(
            Uuid::new_v4(),
            "user@example.com",
            Uuid::new_v4(),
            "whisper",
            Permission::defaults(),
            Duration::seconds(3600),
        );
        claims.iat -= 7200;
        claims.nbf -= 7200;
        claims.exp = Utc::now().timestamp() - 1;

        let token = claims.sign(SECRET).unwrap();
        assert!(matches!(
            decode_module_token(&token, SECRET),
            Err(ModuleTokenError::Expired)
        ));
    }

    #[test]
    fn test_bad_signature_rejected() {
        let issued = issuer()
            .issue(Uuid::new_v4(), "a@b.c", Uuid::new_v4(), "whisper", Permission::defaults(), None)
            .unwrap();

        assert!(matches!(
            decode_module_token(&issued.token, "a-completely-different-secret-value"),
            Err(ModuleTokenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            decode_module_token("not-a-token", SECRET),
            Err(ModuleTokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut claims = ModuleClaims::new(
            Uuid::new_v4(),
            "a@b.c",
            Uuid::new_v4(),
            "whisper",
            Permission::defaults(),
            Duration::seconds(600),
        );
        claims.ver = 2;

        let token = claims.sign(SECRET).unwrap();
        assert!(matches!(
            decode_module_token(&token, SECRET),
            Err(ModuleTokenError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_session_token_cannot_open_module() {
        use crate::auth::jwt::{create_token, Claims, TokenType};
        use crate::models::profile::Role;

        let session = create_token(&Claims::new(Uuid::new_v4(), Role::User, TokenType::Access), SECRET)
            .unwrap();
        assert!(decode_module_token(&session, SECRET).is_err());
    }

    #[test]
    fn test_permissions_follow_access_level() {
        let requested = Some(vec![
            Permission::Read,
            Permission::Access,
            Permission::Write,
            Permission::AdvancedFeatures,
            Permission::Read,
        ]);

        assert_eq!(
            Permission::resolve(requested.clone(), AccessLevel::Basic),
            vec![Permission::Read, Permission::Access]
        );
        assert_eq!(
            Permission::resolve(requested.clone(), AccessLevel::Premium),
            vec![Permission::Read, Permission::Access, Permission::Write]
        );
        assert_eq!(Permission::resolve(requested, AccessLevel::Admin).len(), 4);
        assert_eq!(
            Permission::resolve(None, AccessLevel::Admin),
            Permission::defaults()
        );
    }

    #[test]
    fn test_permission_wire_names() {
        let json = serde_json::to_string(&Permission::AdvancedFeatures).unwrap();
        assert_eq!(json, "\"advanced_features\"");
        assert_eq!(Permission::AdvancedFeatures.as_str(), "advanced_features");
    }
}
