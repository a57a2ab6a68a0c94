//! Stock movements made by loans
//!
//! Every function runs on a caller-supplied connection so it joins the
//! transaction of the loan operation that causes it. Item rows are always
//! locked in `ele_id` order.

use sqlx::PgConnection;

use crate::{
    error::{AppError, AppResult},
    models::item::StockLevel,
};

/// Lock the given items for the rest of the transaction, failing on the
/// first id that does not exist.
pub async fn lock_items(conn: &mut PgConnection, ids: &[i32]) -> AppResult<()> {
    let found: Vec<i32> = sqlx::query_scalar(
        "SELECT ele_id FROM elementos WHERE ele_id = ANY($1) ORDER BY ele_id FOR UPDATE",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    match ids.iter().find(|id| !found.contains(*id)) {
        Some(missing) => Err(AppError::NotFound(format!("Elemento {} not found", missing))),
        None => Ok(()),
    }
}

/// Take `units` off the shelf. Negative values give units back, capped at
/// the item's total. Fails with `Conflict` when the shelf would go negative.
pub async fn take(conn: &mut PgConnection, ele_id: i32, units: i32) -> AppResult<StockLevel> {
    sqlx::query_as::<_, StockLevel>(
        r#"
        UPDATE elementos
        SET ele_cantidad_actual = LEAST(ele_cantidad_total, ele_cantidad_actual - $2)
        WHERE ele_id = $1 AND ele_cantidad_actual - $2 >= 0
        RETURNING ele_id, ele_cantidad_actual
        "#,
    )
    .bind(ele_id)
    .bind(units)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        AppError::Conflict(format!("Not enough units of elemento {} available", ele_id))
    })
}

/// Put every unit held by a loan back on the shelf
pub async fn release_loan(conn: &mut PgConnection, pre_id: i32) -> AppResult<Vec<StockLevel>> {
    let held: Vec<i32> = sqlx::query_scalar(
        "SELECT ele_id FROM prestamos_elementos WHERE pre_id = $1 ORDER BY ele_id",
    )
    .bind(pre_id)
    .fetch_all(&mut *conn)
    .await?;

    // Same lock order as loan creation
    lock_items(conn, &held).await?;

    let levels = sqlx::query_as::<_, StockLevel>(
        r#"
        UPDATE elementos e
        SET ele_cantidad_actual = LEAST(e.ele_cantidad_total,
                                        e.ele_cantidad_actual + pe.pre_ele_cantidad_prestado)
        FROM prestamos_elementos pe
        WHERE pe.pre_id = $1 AND pe.ele_id = e.ele_id
        RETURNING e.ele_id, e.ele_cantidad_actual
        "#,
    )
    .bind(pre_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(levels)
}
