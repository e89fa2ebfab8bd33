pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{ServiceError, ServiceResult};
