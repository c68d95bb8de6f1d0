//! volley binary crate: configuration and process supervision.

pub mod app;
pub mod config;
pub mod error;

pub use app::{Mode, Supervisor};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
