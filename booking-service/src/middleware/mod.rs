pub mod auth;

pub use auth::{identify, require_admin, require_super_user, Authenticator, RequestMeta};
