/// Authentication primitives for IAHome
///
/// # Modules
///
/// - [`password`]: Argon2id password hashing and strength rules
/// - [`jwt`]: Session tokens (access / refresh) for the platform API
/// - [`module_token`]: Signed, versioned tokens that open one module
/// - [`secret_token`]: Single-use random tokens stored as SHA-256 digests
/// - [`context`]: Authenticated caller attached to requests
///
/// # Example
///
/// ```no_run
/// use iahome_shared::auth::password::{hash_password, verify_password};
/// use iahome_shared::auth::jwt::{create_token, validate_access_token, Claims, TokenType};
/// use iahome_shared::models::profile::Role;
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("Sup3rSecret")?;
/// assert!(verify_password("Sup3rSecret", &hash)?);
///
/// let claims = Claims::new(Uuid::new_v4(), Role::User, TokenType::Access);
/// let token = create_token(&claims, "secret-key-at-least-32-bytes-long!!")?;
/// let validated = validate_access_token(&token, "secret-key-at-least-32-bytes-long!!")?;
/// assert_eq!(validated.sub, claims.sub);
/// # Ok(())
/// # }
/// ```

pub mod context;
pub mod jwt;
pub mod module_token;
pub mod password;
pub mod secret_token;
