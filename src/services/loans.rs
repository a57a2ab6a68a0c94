//! Loan lifecycle service
//!
//! Decides who may do what to a loan and in which state, then hands the
//! atomic work to the [`LoanStore`]. Validation and authorization failures
//! are raised before any write reaches the store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        item::StockLevel,
        loan::{
            ChangeStatus, CreateLoan, LineAdjustment, Loan, LoanDetails, LoanLine, LoanUpdate,
            NewLoan, StatusHistory, Transition, TransitionOutcome, UpdateLineQuantity, UpdateLoan,
        },
        status::{LoanState, Status},
        user::ActingUser,
    },
    repository::LoanStore,
};

#[derive(Clone)]
pub struct LoansService {
    store: Arc<dyn LoanStore>,
}

impl LoansService {
    pub fn new(store: Arc<dyn LoanStore>) -> Self {
        Self { store }
    }

    /// Name written to the history for `usr_cedula`, falling back to the raw id
    async fn actor_name(&self, usr_cedula: i64) -> String {
        match self.store.display_name(usr_cedula).await {
            Ok(Some(name)) => name,
            Ok(None) => {
                tracing::warn!("No display name for user {}, recording id instead", usr_cedula);
                usr_cedula.to_string()
            }
            Err(e) => {
                tracing::warn!("Display name lookup for user {} failed: {}", usr_cedula, e);
                usr_cedula.to_string()
            }
        }
    }

    async fn require_loan(&self, pre_id: i32) -> AppResult<Loan> {
        self.store
            .find_loan(pre_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Préstamo {} not found", pre_id)))
    }

    async fn require_status(&self, est_id: i32) -> AppResult<Status> {
        self.store
            .find_status(est_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Estado {} not found", est_id)))
    }

    fn ensure_open(loan: &Loan) -> AppResult<()> {
        if loan.state().is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Préstamo {} is {} and can no longer change",
                loan.pre_id, loan.est_nombre
            )));
        }
        Ok(())
    }

    fn ensure_forward(loan: &Loan, status: &Status) -> AppResult<()> {
        if !loan.state().can_move_to(status.state()) {
            return Err(AppError::InvalidState(format!(
                "Préstamo {} cannot go back from {} to {}",
                loan.pre_id, loan.est_nombre, status.est_nombre
            )));
        }
        Ok(())
    }

    async fn move_to(
        &self,
        actor: ActingUser,
        loan: &Loan,
        status: Status,
    ) -> AppResult<TransitionOutcome> {
        Self::ensure_open(loan)?;
        Self::ensure_forward(loan, &status)?;

        let transition = Transition {
            pre_id: loan.pre_id,
            actor: self.actor_name(actor.user_id).await,
            status,
            at: Utc::now(),
        };
        let outcome = self.store.transition_loan(&transition).await?;

        tracing::info!(
            "Loan {} moved from {} to {} by user {}",
            loan.pre_id,
            loan.est_nombre,
            transition.status.est_nombre,
            actor.user_id
        );
        Ok(outcome)
    }

    /// Create a loan with its line items. Returns the new id and its history.
    pub async fn create_loan(
        &self,
        actor: ActingUser,
        request: CreateLoan,
    ) -> AppResult<(i32, StatusHistory)> {
        request.validate()?;

        let (Some(requester), Some(status_id)) = (request.usr_cedula, request.est_id) else {
            return Err(AppError::Validation("usr_cedula and est_id are required".to_string()));
        };

        if LoanState::from(status_id) != LoanState::Created {
            return Err(AppError::Validation(format!(
                "New loans must start in status {}",
                LoanState::Created.id()
            )));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = request.elementos.iter().find(|l| !seen.insert(l.ele_id)) {
            return Err(AppError::Validation(format!(
                "Elemento {} is listed more than once",
                dup.ele_id
            )));
        }

        actor.require_create_for(requester)?;

        let created_at = Utc::now();
        let loan = NewLoan {
            requester,
            status_id,
            history: StatusHistory::created(&self.actor_name(requester).await, created_at),
            lines: request.elementos,
            created_at,
        };

        let pre_id = self.store.create_loan(&loan).await?;

        tracing::info!(
            "Loan {} created for user {} with {} line(s)",
            pre_id,
            requester,
            loan.lines.len()
        );
        Ok((pre_id, loan.history))
    }

    /// Update requester, end date and status. Returns the original start date.
    ///
    /// End date and status changes from anyone but the warehouse are dropped.
    /// Owners cannot hand their loan to another user.
    pub async fn update_loan(
        &self,
        actor: ActingUser,
        request: UpdateLoan,
    ) -> AppResult<DateTime<Utc>> {
        request.validate()?;

        let (Some(pre_id), Some(requester)) = (request.pre_id, request.usr_cedula) else {
            return Err(AppError::Validation("pre_id and usr_cedula are required".to_string()));
        };

        let loan = self.require_loan(pre_id).await?;
        actor.require_modify(loan.usr_cedula)?;
        // Only staff may reassign a loan to another requester
        actor.require_create_for(requester)?;
        Self::ensure_open(&loan)?;

        let at = Utc::now();
        let (mut end_date, target) = if actor.can_reschedule() {
            (
                request.pre_fin.or(loan.pre_fin),
                request.est_id.filter(|id| *id != loan.est_id),
            )
        } else {
            if request.pre_fin.is_some() || request.est_id.is_some() {
                tracing::debug!(
                    "Ignoring end date/status change on loan {} from user {}",
                    pre_id,
                    actor.user_id
                );
            }
            (loan.pre_fin, None)
        };

        let transition = match target {
            Some(est_id) => {
                let status = self.require_status(est_id).await?;
                Self::ensure_forward(&loan, &status)?;
                Some(Transition {
                    pre_id,
                    status,
                    actor: self.actor_name(actor.user_id).await,
                    at,
                })
            }
            None => None,
        };

        if request.pre_fin.is_none() && transition.as_ref().is_some_and(Transition::closes_loan) {
            end_date = Some(at);
        }

        self.store
            .update_loan(&LoanUpdate {
                pre_id,
                requester,
                end_date,
                transition,
                at,
            })
            .await?;

        tracing::info!("Loan {} updated by user {}", pre_id, actor.user_id);
        Ok(loan.pre_inicio)
    }

    /// Hard-delete a loan and its line items
    pub async fn delete_loan(&self, actor: ActingUser, pre_id: i32) -> AppResult<()> {
        let loan = self.require_loan(pre_id).await?;
        actor.require_delete(loan.usr_cedula)?;

        self.store.delete_loan(pre_id).await?;

        tracing::info!("Loan {} deleted by user {}", pre_id, actor.user_id);
        Ok(())
    }

    /// Move a loan into `est_id`. Returns the status name and full history.
    ///
    /// Only the warehouse may pick the target; owners may only cancel.
    pub async fn transition_status(
        &self,
        actor: ActingUser,
        pre_id: i32,
        request: ChangeStatus,
    ) -> AppResult<(String, StatusHistory)> {
        request.validate()?;
        let Some(est_id) = request.est_id else {
            return Err(AppError::Validation("est_id is required".to_string()));
        };

        let status = self.require_status(est_id).await?;
        let loan = self.require_loan(pre_id).await?;
        actor.require_modify(loan.usr_cedula)?;

        if !actor.can_reschedule() && status.state() != LoanState::Cancelled {
            return Err(AppError::Authorization(
                "Only warehouse staff may change a loan's status".to_string(),
            ));
        }

        let name = status.est_nombre.clone();
        let outcome = self.move_to(actor, &loan, status).await?;
        Ok((name, outcome.history))
    }

    /// Cancel a loan. Returns the refreshed stock of every item it held.
    pub async fn cancel_loan(&self, actor: ActingUser, pre_id: i32) -> AppResult<Vec<StockLevel>> {
        let loan = self.require_loan(pre_id).await?;
        actor.require_modify(loan.usr_cedula)?;

        let cancelled = self.require_status(LoanState::Cancelled.id()).await?;
        let outcome = self.move_to(actor, &loan, cancelled).await?;
        Ok(outcome.released)
    }

    /// Correct the borrowed quantity of one line item.
    ///
    /// Stock moves by the difference between the old and new quantity, so
    /// submitting the same correction twice leaves stock untouched.
    pub async fn update_line_quantity(
        &self,
        actor: ActingUser,
        request: UpdateLineQuantity,
    ) -> AppResult<LineAdjustment> {
        request.validate()?;

        let (Some(pre_id), Some(ele_id), Some(quantity)) =
            (request.pre_id, request.ele_id, request.pre_ele_cantidad_prestado)
        else {
            return Err(AppError::Validation(
                "pre_id, ele_id and pre_ele_cantidad_prestado are required".to_string(),
            ));
        };

        let loan = self.require_loan(pre_id).await?;
        actor.require_modify(loan.usr_cedula)?;
        Self::ensure_open(&loan)?;

        let adjustment = self
            .store
            .set_line_quantity(pre_id, ele_id, quantity, Utc::now())
            .await?;

        tracing::info!(
            "Loan {} line {}: {} -> {} (stock now {})",
            pre_id,
            ele_id,
            adjustment.previous,
            adjustment.quantity,
            adjustment.stock.ele_cantidad_actual
        );
        Ok(adjustment)
    }

    pub async fn list_loans(&self, actor: ActingUser) -> AppResult<Vec<Loan>> {
        actor.require_list_all_loans()?;
        self.store.list_loans().await
    }

    /// Loan with its line items
    pub async fn get_loan(&self, actor: ActingUser, pre_id: i32) -> AppResult<LoanDetails> {
        let loan = self.require_loan(pre_id).await?;
        actor.require_view(loan.usr_cedula)?;

        let elementos = self.store.loan_lines(pre_id).await?;
        Ok(LoanDetails { loan, elementos })
    }

    pub async fn list_loans_by_requester(
        &self,
        actor: ActingUser,
        usr_cedula: i64,
    ) -> AppResult<Vec<Loan>> {
        actor.require_view(usr_cedula)?;
        self.store.list_loans_by_requester(usr_cedula).await
    }

    pub async fn loan_lines(&self, actor: ActingUser, pre_id: i32) -> AppResult<Vec<LoanLine>> {
        let loan = self.require_loan(pre_id).await?;
        actor.require_view(loan.usr_cedula)?;
        self.store.loan_lines(pre_id).await
    }

    pub async fn status_history(&self, actor: ActingUser, pre_id: i32) -> AppResult<StatusHistory> {
        let loan = self.require_loan(pre_id).await?;
        actor.require_view(loan.usr_cedula)?;
        Ok(loan.historial_estados)
    }
}
