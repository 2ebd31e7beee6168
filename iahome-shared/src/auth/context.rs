/// Authenticated caller of a session-protected route
///
/// Built from validated session claims by the API's auth middleware and
/// stored as a request extension.
use uuid::Uuid;

use super::jwt::Claims;
use crate::models::profile::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthContext {
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether the caller may act on a resource owned by `owner_id`
    pub fn can_access(&self, owner_id: Uuid) -> bool {
        self.user_id == owner_id || self.is_admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::TokenType;

    #[test]
    fn test_from_claims() {
        let claims = Claims::new(Uuid::new_v4(), Role::User, TokenType::Access);
        let ctx = AuthContext::from_claims(&claims);

        assert_eq!(ctx.user_id, claims.sub);
        assert!(!ctx.is_admin());
    }

    #[test]
    fn test_ownership() {
        let owner = Uuid::new_v4();
        let user = AuthContext { user_id: owner, role: Role::User };
        let other = AuthContext { user_id: Uuid::new_v4(), role: Role::User };
        let admin = AuthContext { user_id: Uuid::new_v4(), role: Role::Admin };

        assert!(user.can_access(owner));
        assert!(!other.can_access(owner));
        assert!(admin.can_access(owner));
    }
}
