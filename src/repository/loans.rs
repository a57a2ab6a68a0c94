//! Loans repository for database operations
//!
//! Every mutation runs inside one transaction. The loan row is locked with
//! `SELECT ... FOR UPDATE` before its history is rewritten, so concurrent
//! transitions on the same loan serialize instead of losing entries.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, Pool, Postgres};

use super::{finish, items};
use crate::{
    error::{AppError, AppResult},
    models::{
        loan::{
            LineAdjustment, Loan, LoanLine, LoanRow, LoanUpdate, NewLoan, StatusHistory,
            Transition, TransitionOutcome,
        },
        status::LoanState,
    },
};

const LOAN_SELECT: &str = r#"
    SELECT p.pre_id, p.usr_cedula, p.est_id, e.est_nombre,
           p.pre_inicio, p.pre_fin, p.pre_actualizacion, p.historial_estados
    FROM prestamos p
    JOIN estados e ON e.est_id = p.est_id
"#;

/// Loan row as seen under the row lock
#[derive(Debug, FromRow)]
struct LockedLoan {
    est_id: i32,
    historial_estados: Option<String>,
}

impl LockedLoan {
    fn ensure_open(&self, pre_id: i32) -> AppResult<()> {
        if LoanState::from(self.est_id).is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Préstamo {} is already closed",
                pre_id
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get loan by ID
    pub async fn get_by_id(&self, pre_id: i32) -> AppResult<Option<Loan>> {
        let row = sqlx::query_as::<_, LoanRow>(&format!("{} WHERE p.pre_id = $1", LOAN_SELECT))
            .bind(pre_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Loan::from))
    }

    /// All loans, newest first
    pub async fn list(&self) -> AppResult<Vec<Loan>> {
        let rows = sqlx::query_as::<_, LoanRow>(&format!(
            "{} ORDER BY p.pre_inicio DESC, p.pre_id DESC",
            LOAN_SELECT
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Loan::from).collect())
    }

    /// Loans requested by a user, newest first
    pub async fn list_by_requester(&self, usr_cedula: i64) -> AppResult<Vec<Loan>> {
        let rows = sqlx::query_as::<_, LoanRow>(&format!(
            "{} WHERE p.usr_cedula = $1 ORDER BY p.pre_inicio DESC, p.pre_id DESC",
            LOAN_SELECT
        ))
        .bind(usr_cedula)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Loan::from).collect())
    }

    /// Line items of a loan with item names and the loan's status name
    pub async fn lines(&self, pre_id: i32) -> AppResult<Vec<LoanLine>> {
        let lines = sqlx::query_as::<_, LoanLine>(
            r#"
            SELECT pe.pre_ele_id, pe.pre_id, pe.ele_id, el.ele_nombre,
                   pe.pre_ele_cantidad_prestado, el.ele_cantidad_actual, es.est_nombre
            FROM prestamos_elementos pe
            JOIN elementos el ON el.ele_id = pe.ele_id
            JOIN prestamos p ON p.pre_id = pe.pre_id
            JOIN estados es ON es.est_id = p.est_id
            WHERE pe.pre_id = $1
            ORDER BY pe.pre_ele_id
            "#,
        )
        .bind(pre_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lines)
    }

    /// Create a loan with its line items and initial history
    pub async fn create(&self, loan: &NewLoan) -> AppResult<i32> {
        let mut tx = self.pool.begin().await?;
        let result = create_in(&mut tx, loan).await;
        finish(tx, result, "create loan").await
    }

    /// Apply an `UpdateLoan`, including its status change if any
    pub async fn update(&self, update: &LoanUpdate) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = update_in(&mut tx, update).await;
        finish(tx, result, "update loan").await
    }

    /// Move a loan into a new status and append the history entry
    pub async fn transition(&self, transition: &Transition) -> AppResult<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;
        let result = transition_in(&mut tx, transition).await;
        finish(tx, result, "change loan status").await
    }

    /// Hard-delete a loan and its line items
    pub async fn delete(&self, pre_id: i32) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = delete_in(&mut tx, pre_id).await;
        finish(tx, result, "delete loan").await
    }

    /// Correct the borrowed quantity of one line and move the difference
    /// between shelf and loan
    pub async fn set_line_quantity(
        &self,
        pre_id: i32,
        ele_id: i32,
        quantity: i32,
        at: DateTime<Utc>,
    ) -> AppResult<LineAdjustment> {
        let mut tx = self.pool.begin().await?;
        let result = set_line_quantity_in(&mut tx, pre_id, ele_id, quantity, at).await;
        finish(tx, result, "update loan line quantity").await
    }
}

async fn lock_loan(conn: &mut PgConnection, pre_id: i32) -> AppResult<LockedLoan> {
    sqlx::query_as::<_, LockedLoan>(
        "SELECT est_id, historial_estados FROM prestamos WHERE pre_id = $1 FOR UPDATE",
    )
    .bind(pre_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Préstamo {} not found", pre_id)))
}

async fn create_in(conn: &mut PgConnection, loan: &NewLoan) -> AppResult<i32> {
    let pre_id: Option<i32> = sqlx::query_scalar(
        r#"
        INSERT INTO prestamos (usr_cedula, est_id, pre_inicio, pre_actualizacion)
        VALUES ($1, $2, $3, $3)
        RETURNING pre_id
        "#,
    )
    .bind(loan.requester)
    .bind(loan.status_id)
    .bind(loan.created_at)
    .fetch_optional(&mut *conn)
    .await?;

    let pre_id =
        pre_id.ok_or_else(|| AppError::Transaction("loan insert returned no id".to_string()))?;

    let ele_ids: Vec<i32> = loan.lines.iter().map(|l| l.ele_id).collect();
    let quantities: Vec<i32> = loan.lines.iter().map(|l| l.pre_ele_cantidad_prestado).collect();

    items::lock_items(conn, &ele_ids).await?;

    // Single statement: either every line lands or none does
    let inserted = sqlx::query(
        r#"
        INSERT INTO prestamos_elementos (pre_id, ele_id, pre_ele_cantidad_prestado)
        SELECT $1, l.ele_id, l.cantidad
        FROM UNNEST($2::int4[], $3::int4[]) AS l(ele_id, cantidad)
        "#,
    )
    .bind(pre_id)
    .bind(&ele_ids)
    .bind(&quantities)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted != loan.lines.len() as u64 {
        return Err(AppError::Transaction(format!(
            "inserted {} of {} loan lines",
            inserted,
            loan.lines.len()
        )));
    }

    for line in &loan.lines {
        items::take(conn, line.ele_id, line.pre_ele_cantidad_prestado).await?;
    }

    sqlx::query(
        "UPDATE prestamos SET historial_estados = $2, pre_actualizacion = $3 WHERE pre_id = $1",
    )
    .bind(pre_id)
    .bind(loan.history.to_json()?)
    .bind(loan.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(pre_id)
}

/// Append `transition` to a locked loan. Terminal targets stamp `pre_fin`
/// and release the loan's stock.
async fn apply_transition(
    conn: &mut PgConnection,
    locked: &LockedLoan,
    transition: &Transition,
) -> AppResult<TransitionOutcome> {
    locked.ensure_open(transition.pre_id)?;
    if !LoanState::from(locked.est_id).can_move_to(transition.status.state()) {
        return Err(AppError::InvalidState(format!(
            "Préstamo {} cannot go back to {}",
            transition.pre_id, transition.status.est_nombre
        )));
    }

    let mut history = StatusHistory::parse_lenient(locked.historial_estados.as_deref());
    history.push(&transition.status.est_nombre, &transition.actor, transition.at);

    let closes = transition.closes_loan();
    let released = if closes {
        items::release_loan(conn, transition.pre_id).await?
    } else {
        Vec::new()
    };

    sqlx::query(
        r#"
        UPDATE prestamos
        SET est_id = $2,
            historial_estados = $3,
            pre_actualizacion = $4,
            pre_fin = CASE WHEN $5 THEN $4 ELSE pre_fin END
        WHERE pre_id = $1
        "#,
    )
    .bind(transition.pre_id)
    .bind(transition.status.est_id)
    .bind(history.to_json()?)
    .bind(transition.at)
    .bind(closes)
    .execute(&mut *conn)
    .await?;

    Ok(TransitionOutcome { history, released })
}

async fn transition_in(
    conn: &mut PgConnection,
    transition: &Transition,
) -> AppResult<TransitionOutcome> {
    let locked = lock_loan(conn, transition.pre_id).await?;
    apply_transition(conn, &locked, transition).await
}

async fn update_in(conn: &mut PgConnection, update: &LoanUpdate) -> AppResult<()> {
    let locked = lock_loan(conn, update.pre_id).await?;
    locked.ensure_open(update.pre_id)?;

    if let Some(transition) = &update.transition {
        apply_transition(conn, &locked, transition).await?;
    }

    sqlx::query(
        r#"
        UPDATE prestamos
        SET usr_cedula = $2, pre_fin = $3, pre_actualizacion = $4
        WHERE pre_id = $1
        "#,
    )
    .bind(update.pre_id)
    .bind(update.requester)
    .bind(update.end_date)
    .bind(update.at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn delete_in(conn: &mut PgConnection, pre_id: i32) -> AppResult<()> {
    let est_id: Option<i32> =
        sqlx::query_scalar("SELECT est_id FROM prestamos WHERE pre_id = $1 FOR UPDATE")
            .bind(pre_id)
            .fetch_optional(&mut *conn)
            .await?;

    let already_deleted = || AppError::NotFound(format!("Préstamo {} already deleted", pre_id));
    let est_id = est_id.ok_or_else(already_deleted)?;

    // An open loan still holds its units
    if !LoanState::from(est_id).is_terminal() {
        items::release_loan(conn, pre_id).await?;
    }

    sqlx::query("DELETE FROM prestamos_elementos WHERE pre_id = $1")
        .bind(pre_id)
        .execute(&mut *conn)
        .await?;

    let deleted = sqlx::query("DELETE FROM prestamos WHERE pre_id = $1")
        .bind(pre_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(already_deleted());
    }
    Ok(())
}

async fn set_line_quantity_in(
    conn: &mut PgConnection,
    pre_id: i32,
    ele_id: i32,
    quantity: i32,
    at: DateTime<Utc>,
) -> AppResult<LineAdjustment> {
    let locked = lock_loan(conn, pre_id).await?;
    locked.ensure_open(pre_id)?;

    let previous: i32 = sqlx::query_scalar(
        r#"
        SELECT pre_ele_cantidad_prestado
        FROM prestamos_elementos
        WHERE pre_id = $1 AND ele_id = $2
        FOR UPDATE
        "#,
    )
    .bind(pre_id)
    .bind(ele_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        AppError::NotFound(format!("Elemento {} is not part of préstamo {}", ele_id, pre_id))
    })?;

    sqlx::query(
        r#"
        UPDATE prestamos_elementos
        SET pre_ele_cantidad_prestado = $3
        WHERE pre_id = $1 AND ele_id = $2
        "#,
    )
    .bind(pre_id)
    .bind(ele_id)
    .bind(quantity)
    .execute(&mut *conn)
    .await?;

    let stock = items::take(conn, ele_id, LineAdjustment::delta(previous, quantity)).await?;

    sqlx::query("UPDATE prestamos SET pre_actualizacion = $2 WHERE pre_id = $1")
        .bind(pre_id)
        .bind(at)
        .execute(&mut *conn)
        .await?;

    Ok(LineAdjustment {
        previous,
        quantity,
        stock,
    })
}
