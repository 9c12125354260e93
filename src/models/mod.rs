pub mod auth;
pub mod usage;
pub mod user;

pub use auth::*;
pub use usage::*;
pub use user::*;
