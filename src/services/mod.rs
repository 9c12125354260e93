//! Business logic services layer

pub mod account_service;
pub mod usage_service;

pub use account_service::AccountService;
pub use usage_service::UsageService;
