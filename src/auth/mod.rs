//! Authentication and authorization module

pub mod api_key;
pub mod jwt;
pub mod middleware;
pub mod password;

pub use api_key::{require_api_key, ApiKeyGenerator, ApiKeySet};
pub use jwt::{Claims, TokenKind, TokenPair, TokenService};
pub use middleware::{
    authenticate, extract_token, optional_auth, require_admin, require_auth, require_role,
    AuthContext, MaybeAuth, RoleGuard,
};
pub use password::PasswordHasher;
