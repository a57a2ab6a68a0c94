//! StoreFlow Warehouse Loan Tracking
//!
//! REST JSON API for equipment loans: instructors request items from the
//! warehouse, warehouse staff move loans through their lifecycle, and item
//! stock follows every change.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
