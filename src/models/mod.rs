//! Data models for StoreFlow

pub mod item;
pub mod loan;
pub mod status;
pub mod user;

// Re-export commonly used types
pub use item::StockLevel;
pub use loan::{HistoryEntry, Loan, LoanDetails, LoanLine, StatusHistory};
pub use status::{LoanState, Status};
pub use user::{ActingUser, Role, UserClaims};
