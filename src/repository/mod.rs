//! Repository layer for database operations

pub mod items;
pub mod loans;
pub mod statuses;
pub mod users;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::{
        loan::{LineAdjustment, Loan, LoanLine, LoanUpdate, NewLoan, Transition, TransitionOutcome},
        status::Status,
    },
};

/// Main repository struct holding database connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub loans: loans::LoansRepository,
    pub statuses: statuses::StatusesRepository,
    pub users: users::UsersRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            loans: loans::LoansRepository::new(pool.clone()),
            statuses: statuses::StatusesRepository::new(pool.clone()),
            users: users::UsersRepository::new(pool.clone()),
            pool,
        }
    }

    /// Round-trip to the database (readiness probe)
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Storage consumed by the loan lifecycle.
///
/// Mutating methods are atomic: they either commit every statement or none.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn find_status(&self, est_id: i32) -> AppResult<Option<Status>>;

    async fn display_name(&self, usr_cedula: i64) -> AppResult<Option<String>>;

    async fn find_loan(&self, pre_id: i32) -> AppResult<Option<Loan>>;

    async fn list_loans(&self) -> AppResult<Vec<Loan>>;

    async fn list_loans_by_requester(&self, usr_cedula: i64) -> AppResult<Vec<Loan>>;

    async fn loan_lines(&self, pre_id: i32) -> AppResult<Vec<LoanLine>>;

    async fn create_loan(&self, loan: &NewLoan) -> AppResult<i32>;

    async fn update_loan(&self, update: &LoanUpdate) -> AppResult<()>;

    async fn transition_loan(&self, transition: &Transition) -> AppResult<TransitionOutcome>;

    async fn delete_loan(&self, pre_id: i32) -> AppResult<()>;

    async fn set_line_quantity(
        &self,
        pre_id: i32,
        ele_id: i32,
        quantity: i32,
        at: DateTime<Utc>,
    ) -> AppResult<LineAdjustment>;
}

#[async_trait]
impl LoanStore for Repository {
    async fn find_status(&self, est_id: i32) -> AppResult<Option<Status>> {
        self.statuses.get_by_id(est_id).await
    }

    async fn display_name(&self, usr_cedula: i64) -> AppResult<Option<String>> {
        self.users.display_name(usr_cedula).await
    }

    async fn find_loan(&self, pre_id: i32) -> AppResult<Option<Loan>> {
        self.loans.get_by_id(pre_id).await
    }

    async fn list_loans(&self) -> AppResult<Vec<Loan>> {
        self.loans.list().await
    }

    async fn list_loans_by_requester(&self, usr_cedula: i64) -> AppResult<Vec<Loan>> {
        self.loans.list_by_requester(usr_cedula).await
    }

    async fn loan_lines(&self, pre_id: i32) -> AppResult<Vec<LoanLine>> {
        self.loans.lines(pre_id).await
    }

    async fn create_loan(&self, loan: &NewLoan) -> AppResult<i32> {
        self.loans.create(loan).await
    }

    async fn update_loan(&self, update: &LoanUpdate) -> AppResult<()> {
        self.loans.update(update).await
    }

    async fn transition_loan(&self, transition: &Transition) -> AppResult<TransitionOutcome> {
        self.loans.transition(transition).await
    }

    async fn delete_loan(&self, pre_id: i32) -> AppResult<()> {
        self.loans.delete(pre_id).await
    }

    async fn set_line_quantity(
        &self,
        pre_id: i32,
        ele_id: i32,
        quantity: i32,
        at: DateTime<Utc>,
    ) -> AppResult<LineAdjustment> {
        self.loans.set_line_quantity(pre_id, ele_id, quantity, at).await
    }
}

/// Commit `tx` when `result` is Ok, roll it back otherwise.
///
/// Driver failures inside the transaction are logged and surfaced as a
/// generic `Transaction` error; domain errors pass through unchanged.
pub(crate) async fn finish<T>(
    tx: Transaction<'_, Postgres>,
    result: AppResult<T>,
    operation: &'static str,
) -> AppResult<T> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| into_transaction_error(operation, AppError::Database(e)))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!("Rollback of {} failed: {:?}", operation, rollback_err);
            }
            Err(into_transaction_error(operation, err))
        }
    }
}

fn into_transaction_error(operation: &'static str, err: AppError) -> AppError {
    match err {
        AppError::Database(e) => {
            tracing::error!("{} failed inside transaction: {:?}", operation, e);
            AppError::Transaction(operation.to_string())
        }
        other => other,
    }
}
