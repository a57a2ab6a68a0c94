//! Loan status catalog (`estados`) and the lifecycle state machine

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Status row from the `estados` catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Status {
    pub est_id: i32,
    pub est_nombre: String,
}

impl Status {
    pub fn state(&self) -> LoanState {
        LoanState::from(self.est_id)
    }
}

/// Lifecycle position of a loan, derived from its `est_id`.
///
/// Codes 1-4 are fixed in the catalog. Any other configured status is
/// treated as an intermediate, non-terminal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanState {
    Created,
    InProcess,
    Delivered,
    Cancelled,
    Custom(i32),
}

impl LoanState {
    /// Label written to the history when a loan is first created
    pub const CREATED_LABEL: &'static str = "Creado";

    pub fn id(self) -> i32 {
        match self {
            LoanState::Created => 1,
            LoanState::InProcess => 2,
            LoanState::Delivered => 3,
            LoanState::Cancelled => 4,
            LoanState::Custom(id) => id,
        }
    }

    /// Delivered and Cancelled close the loan: no further edits or transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, LoanState::Delivered | LoanState::Cancelled)
    }

    fn stage(self) -> u8 {
        match self {
            LoanState::Created => 0,
            LoanState::InProcess | LoanState::Custom(_) => 1,
            LoanState::Delivered | LoanState::Cancelled => 2,
        }
    }

    /// Loans only move forward. Staying at the same stage is allowed, so a
    /// status may be recorded again.
    pub fn can_move_to(self, target: LoanState) -> bool {
        !self.is_terminal() && target.stage() >= self.stage()
    }
}

impl From<i32> for LoanState {
    fn from(v: i32) -> Self {
        match v {
            1 => LoanState::Created,
            2 => LoanState::InProcess,
            3 => LoanState::Delivered,
            4 => LoanState::Cancelled,
            other => LoanState::Custom(other),
        }
    }
}
