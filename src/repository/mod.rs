//! Storage layer

pub mod memory;
pub mod usage_repo;
pub mod user_repo;

pub use memory::{MemoryUsageStore, MemoryUserStore};
pub use usage_repo::{PgUsageStore, UsageStore};
pub use user_repo::{PgUserStore, UserStore};
