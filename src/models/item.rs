//! Warehouse stock levels (`elementos.ele_cantidad_actual`)

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Refreshed availability of one item after a stock movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct StockLevel {
    pub ele_id: i32,
    pub ele_cantidad_actual: i32,
}
