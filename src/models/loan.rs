//! Loan (préstamo) model, line items and the status history audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use super::item::StockLevel;
use super::status::{LoanState, Status};
use crate::error::{AppError, AppResult};

// ---------------------------------------------------------------------------
// Status history
// ---------------------------------------------------------------------------

/// One audit record: which status was entered, by whom and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    /// Status name at the time of the change
    pub estado: String,
    /// Display name of the acting user
    pub usuario: String,
    pub fecha: DateTime<Utc>,
}

/// Append-only, ordered status log stored as JSON text in `historial_estados`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct StatusHistory(Vec<HistoryEntry>);

impl StatusHistory {
    /// History of a freshly created loan
    pub fn created(actor: &str, at: DateTime<Utc>) -> Self {
        let mut history = Self::default();
        history.push(LoanState::CREATED_LABEL, actor, at);
        history
    }

    pub fn push(&mut self, estado: &str, usuario: &str, fecha: DateTime<Utc>) {
        self.0.push(HistoryEntry {
            estado: estado.to_string(),
            usuario: usuario.to_string(),
            fecha,
        });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.0.last()
    }

    /// Serialize for the `historial_estados` column
    pub fn to_json(&self) -> AppResult<String> {
        serde_json::to_string(&self.0)
            .map_err(|e| AppError::Internal(format!("Failed to serialize status history: {}", e)))
    }

    /// Parse the stored column. Missing or malformed JSON yields an empty
    /// history: the log is display data and must never fail a request.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::default();
        };

        match serde_json::from_str::<Option<Vec<HistoryEntry>>>(raw) {
            Ok(entries) => Self(entries.unwrap_or_default()),
            Err(e) => {
                tracing::warn!("Discarding malformed status history: {}", e);
                Self::default()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Loans
// ---------------------------------------------------------------------------

/// Loan row joined with its status name
#[derive(Debug, Clone, FromRow)]
pub struct LoanRow {
    pub pre_id: i32,
    pub usr_cedula: i64,
    pub est_id: i32,
    pub est_nombre: String,
    pub pre_inicio: DateTime<Utc>,
    pub pre_fin: Option<DateTime<Utc>>,
    pub pre_actualizacion: Option<DateTime<Utc>>,
    pub historial_estados: Option<String>,
}

impl From<LoanRow> for Loan {
    fn from(row: LoanRow) -> Self {
        Self {
            historial_estados: StatusHistory::parse_lenient(row.historial_estados.as_deref()),
            pre_id: row.pre_id,
            usr_cedula: row.usr_cedula,
            est_id: row.est_id,
            est_nombre: row.est_nombre,
            pre_inicio: row.pre_inicio,
            pre_fin: row.pre_fin,
            pre_actualizacion: row.pre_actualizacion,
        }
    }
}

/// Loan as exposed by the API, with a typed history
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Loan {
    pub pre_id: i32,
    /// Requester (owning user)
    pub usr_cedula: i64,
    pub est_id: i32,
    pub est_nombre: String,
    pub pre_inicio: DateTime<Utc>,
    pub pre_fin: Option<DateTime<Utc>>,
    pub pre_actualizacion: Option<DateTime<Utc>>,
    pub historial_estados: StatusHistory,
}

impl Loan {
    pub fn state(&self) -> LoanState {
        LoanState::from(self.est_id)
    }
}

/// Line item joined with item name and the parent loan's status
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LoanLine {
    pub pre_ele_id: i32,
    pub pre_id: i32,
    pub ele_id: i32,
    pub ele_nombre: String,
    pub pre_ele_cantidad_prestado: i32,
    pub ele_cantidad_actual: i32,
    pub est_nombre: String,
}

/// Loan with its line items for display
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    #[serde(flatten)]
    pub loan: Loan,
    pub elementos: Vec<LoanLine>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One requested line of a new loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct NewLoanLine {
    #[validate(range(min = 1, message = "ele_id must be positive"))]
    pub ele_id: i32,
    #[validate(range(min = 1, message = "Borrowed quantity must be at least 1"))]
    pub pre_ele_cantidad_prestado: i32,
}

/// Create loan request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateLoan {
    /// Requester
    #[validate(required(message = "usr_cedula is required"))]
    pub usr_cedula: Option<i64>,
    /// Initial status (must be the Creado status)
    #[validate(required(message = "est_id is required"))]
    pub est_id: Option<i32>,
    #[serde(default)]
    #[validate(length(min = 1, message = "At least one item is required"))]
    #[validate(nested)]
    pub elementos: Vec<NewLoanLine>,
}

/// Update loan request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateLoan {
    #[validate(required(message = "pre_id is required"))]
    pub pre_id: Option<i32>,
    /// New end date (warehouse only)
    pub pre_fin: Option<DateTime<Utc>>,
    #[validate(required(message = "usr_cedula is required"))]
    pub usr_cedula: Option<i64>,
    /// New status (warehouse only)
    pub est_id: Option<i32>,
}

/// Status transition request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangeStatus {
    #[validate(required(message = "est_id is required"))]
    pub est_id: Option<i32>,
}

/// Line quantity correction request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateLineQuantity {
    #[validate(required(message = "pre_id is required"))]
    pub pre_id: Option<i32>,
    #[validate(required(message = "ele_id is required"))]
    pub ele_id: Option<i32>,
    #[validate(required(message = "pre_ele_cantidad_prestado is required"))]
    #[validate(range(min = 1, message = "Borrowed quantity must be at least 1"))]
    pub pre_ele_cantidad_prestado: Option<i32>,
}

// ---------------------------------------------------------------------------
// Store commands
// ---------------------------------------------------------------------------

/// Validated loan ready to be persisted
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub requester: i64,
    pub status_id: i32,
    pub lines: Vec<NewLoanLine>,
    pub history: StatusHistory,
    pub created_at: DateTime<Utc>,
}

/// A move of one loan into `status`, recorded under `actor`
#[derive(Debug, Clone)]
pub struct Transition {
    pub pre_id: i32,
    pub status: Status,
    pub actor: String,
    pub at: DateTime<Utc>,
}

impl Transition {
    /// Terminal targets stamp the end date and hand reserved stock back
    pub fn closes_loan(&self) -> bool {
        self.status.state().is_terminal()
    }
}

/// Result of applying a [`Transition`]
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub history: StatusHistory,
    /// Stock levels of every item released by a terminal transition
    pub released: Vec<StockLevel>,
}

/// Field changes of an `UpdateLoan` after authorization has been applied
#[derive(Debug, Clone)]
pub struct LoanUpdate {
    pub pre_id: i32,
    pub requester: i64,
    pub end_date: Option<DateTime<Utc>>,
    pub transition: Option<Transition>,
    pub at: DateTime<Utc>,
}

/// Outcome of a line quantity correction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineAdjustment {
    pub previous: i32,
    pub quantity: i32,
    pub stock: StockLevel,
}

impl LineAdjustment {
    /// Units to take from (positive) or give back to (negative) the shelf
    /// when a line moves from `previous` to `quantity`.
    pub fn delta(previous: i32, quantity: i32) -> i32 {
        quantity - previous
    }
}
