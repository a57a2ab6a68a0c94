//! Loan lifecycle against a real PostgreSQL database.
//!
//! Requires `DATABASE_URL` pointing at a server where the test user may
//! create databases; `#[sqlx::test]` gives every test a fresh, migrated one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use storeflow_server::{
    error::AppError,
    models::{
        loan::{ChangeStatus, CreateLoan, NewLoanLine, UpdateLineQuantity, UpdateLoan},
        user::{ActingUser, Role},
    },
    repository::Repository,
    services::loans::LoansService,
};

const INSTRUCTOR: i64 = 123;
const WAREHOUSE: i64 = 900;

fn instructor() -> ActingUser {
    ActingUser::new(INSTRUCTOR, Role::Instructor)
}

fn warehouse() -> ActingUser {
    ActingUser::new(WAREHOUSE, Role::Warehouse)
}

fn service(pool: &PgPool) -> LoansService {
    LoansService::new(Arc::new(Repository::new(pool.clone())))
}

/// Seed two users and two items (10 drills, 5 multimeters)
async fn seed(pool: &PgPool) -> (i32, i32) {
    sqlx::query(
        r#"
        INSERT INTO usuarios (usr_cedula, usr_nombre, usr_apellido, rol_id)
        VALUES (123, 'Ana', 'Gómez', 2), (900, 'Bodega', 'Central', 3)
        "#,
    )
    .execute(pool)
    .await
    .expect("Failed to seed users");

    let drill: i32 = sqlx::query_scalar(
        "INSERT INTO elementos (ele_nombre, ele_cantidad_total, ele_cantidad_actual) VALUES ('Taladro', 10, 10) RETURNING ele_id",
    )
    .fetch_one(pool)
    .await
    .expect("Failed to seed drill");

    let meter: i32 = sqlx::query_scalar(
        "INSERT INTO elementos (ele_nombre, ele_cantidad_total, ele_cantidad_actual) VALUES ('Multímetro', 5, 5) RETURNING ele_id",
    )
    .fetch_one(pool)
    .await
    .expect("Failed to seed multimeter");

    (drill, meter)
}

fn request(lines: &[(i32, i32)]) -> CreateLoan {
    CreateLoan {
        usr_cedula: Some(INSTRUCTOR),
        est_id: Some(1),
        elementos: lines
            .iter()
            .map(|&(ele_id, qty)| NewLoanLine {
                ele_id,
                pre_ele_cantidad_prestado: qty,
            })
            .collect(),
    }
}

async fn stock(pool: &PgPool, ele_id: i32) -> i32 {
    sqlx::query_scalar("SELECT ele_cantidad_actual FROM elementos WHERE ele_id = $1")
        .bind(ele_id)
        .fetch_one(pool)
        .await
        .expect("Item should exist")
}

async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .expect("Count failed")
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_create_loan_persists_lines_history_and_stock(pool: PgPool) {
    let (drill, meter) = seed(&pool).await;
    let loans = service(&pool);

    let (pre_id, history) = loans
        .create_loan(instructor(), request(&[(drill, 2), (meter, 1)]))
        .await
        .unwrap();

    assert!(pre_id > 0);
    assert_eq!(history.len(), 1);

    let details = loans.get_loan(instructor(), pre_id).await.unwrap();
    assert_eq!(details.elementos.len(), 2);
    assert_eq!(details.loan.est_nombre, "Creado");
    assert_eq!(details.loan.historial_estados.len(), 1);
    let entry = &details.loan.historial_estados.entries()[0];
    assert_eq!(entry.estado, "Creado");
    assert_eq!(entry.usuario, "Ana Gómez");

    assert_eq!(stock(&pool, drill).await, 8);
    assert_eq!(stock(&pool, meter).await, 4);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_unknown_requester_is_recorded_by_id(pool: PgPool) {
    let (drill, _) = seed(&pool).await;
    let mut req = request(&[(drill, 1)]);
    req.usr_cedula = Some(555);

    let (_, history) = service(&pool).create_loan(warehouse(), req).await.unwrap();
    assert_eq!(history.entries()[0].usuario, "555");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_failed_create_leaves_no_rows(pool: PgPool) {
    let (drill, meter) = seed(&pool).await;
    let loans = service(&pool);

    let unknown = loans
        .create_loan(instructor(), request(&[(drill, 1), (9999, 1)]))
        .await;
    assert!(matches!(unknown, Err(AppError::NotFound(_))));

    let too_many = loans
        .create_loan(instructor(), request(&[(drill, 2), (meter, 6)]))
        .await;
    assert!(matches!(too_many, Err(AppError::Conflict(_))));

    let empty = loans.create_loan(instructor(), request(&[])).await;
    assert!(matches!(empty, Err(AppError::Validation(_))));

    let mut anonymous = request(&[(drill, 1)]);
    anonymous.usr_cedula = None;
    let result = loans.create_loan(instructor(), anonymous).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let mut statusless = request(&[(drill, 1)]);
    statusless.est_id = None;
    let result = loans.create_loan(instructor(), statusless).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    assert_eq!(count(&pool, "prestamos").await, 0);
    assert_eq!(count(&pool, "prestamos_elementos").await, 0);
    assert_eq!(stock(&pool, drill).await, 10);
    assert_eq!(stock(&pool, meter).await, 5);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_transitions_append_history_in_order(pool: PgPool) {
    let (drill, _) = seed(&pool).await;
    let loans = service(&pool);
    let (pre_id, _) = loans.create_loan(instructor(), request(&[(drill, 1)])).await.unwrap();

    for _ in 0..3 {
        let (name, _) = loans
            .transition_status(warehouse(), pre_id, ChangeStatus { est_id: Some(2) })
            .await
            .unwrap();
        assert_eq!(name, "En proceso");
    }

    let history = loans.status_history(warehouse(), pre_id).await.unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.entries()[1..].iter().all(|e| e.estado == "En proceso" && e.usuario == "Bodega Central"));
    assert!(history.entries().windows(2).all(|w| w[0].fecha <= w[1].fecha));

    let loan = loans.get_loan(warehouse(), pre_id).await.unwrap().loan;
    assert!(loan.pre_fin.is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_delivery_stamps_end_date_releases_stock_and_closes(pool: PgPool) {
    let (drill, _) = seed(&pool).await;
    let loans = service(&pool);
    let (pre_id, _) = loans.create_loan(instructor(), request(&[(drill, 4)])).await.unwrap();
    assert_eq!(stock(&pool, drill).await, 6);

    loans
        .transition_status(warehouse(), pre_id, ChangeStatus { est_id: Some(3) })
        .await
        .unwrap();

    let loan = loans.get_loan(warehouse(), pre_id).await.unwrap().loan;
    assert!(loan.pre_fin.is_some());
    assert_eq!(loan.historial_estados.last().unwrap().estado, loan.est_nombre);
    assert_eq!(stock(&pool, drill).await, 10);

    let again = loans
        .transition_status(warehouse(), pre_id, ChangeStatus { est_id: Some(2) })
        .await;
    assert!(matches!(again, Err(AppError::InvalidState(_))));

    let update = loans
        .update_loan(
            warehouse(),
            UpdateLoan {
                pre_id: Some(pre_id),
                pre_fin: None,
                usr_cedula: Some(INSTRUCTOR),
                est_id: None,
            },
        )
        .await;
    assert!(matches!(update, Err(AppError::InvalidState(_))));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_cancel_reports_refreshed_stock(pool: PgPool) {
    let (drill, meter) = seed(&pool).await;
    let loans = service(&pool);
    let (pre_id, _) = loans
        .create_loan(instructor(), request(&[(drill, 3), (meter, 2)]))
        .await
        .unwrap();

    let mut released = loans.cancel_loan(instructor(), pre_id).await.unwrap();
    released.sort_by_key(|s| s.ele_id);

    let mut expected = vec![(drill, 10), (meter, 5)];
    expected.sort();
    let got: Vec<_> = released.iter().map(|s| (s.ele_id, s.ele_cantidad_actual)).collect();
    assert_eq!(got, expected);

    let loan = loans.get_loan(instructor(), pre_id).await.unwrap().loan;
    assert_eq!(loan.est_nombre, "Cancelado");
    assert!(loan.pre_fin.is_some());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_delete_missing_loan_leaves_lines(pool: PgPool) {
    let (drill, _) = seed(&pool).await;
    let loans = service(&pool);
    loans.create_loan(instructor(), request(&[(drill, 1)])).await.unwrap();

    let result = loans.delete_loan(warehouse(), 9999).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert_eq!(count(&pool, "prestamos_elementos").await, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_delete_removes_loan_and_lines(pool: PgPool) {
    let (drill, meter) = seed(&pool).await;
    let loans = service(&pool);
    let (pre_id, _) = loans
        .create_loan(instructor(), request(&[(drill, 2), (meter, 1)]))
        .await
        .unwrap();

    loans.delete_loan(instructor(), pre_id).await.unwrap();

    let gone = loans.get_loan(instructor(), pre_id).await;
    assert!(matches!(gone, Err(AppError::NotFound(_))));
    assert_eq!(count(&pool, "prestamos_elementos").await, 0);
    assert_eq!(stock(&pool, drill).await, 10);

    let twice = loans.delete_loan(instructor(), pre_id).await;
    assert!(matches!(twice, Err(AppError::NotFound(_))));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_line_quantity_moves_only_the_difference(pool: PgPool) {
    let (drill, _) = seed(&pool).await;
    let loans = service(&pool);
    let (pre_id, _) = loans.create_loan(instructor(), request(&[(drill, 2)])).await.unwrap();
    assert_eq!(stock(&pool, drill).await, 8);

    let correction = |qty| UpdateLineQuantity {
        pre_id: Some(pre_id),
        ele_id: Some(drill),
        pre_ele_cantidad_prestado: Some(qty),
    };

    let adjustment = loans.update_line_quantity(warehouse(), correction(5)).await.unwrap();
    assert_eq!((adjustment.previous, adjustment.quantity), (2, 5));
    assert_eq!(stock(&pool, drill).await, 5);

    // Same correction submitted again must not take more stock
    loans.update_line_quantity(warehouse(), correction(5)).await.unwrap();
    assert_eq!(stock(&pool, drill).await, 5);

    loans.update_line_quantity(warehouse(), correction(1)).await.unwrap();
    assert_eq!(stock(&pool, drill).await, 9);

    let too_many = loans.update_line_quantity(warehouse(), correction(20)).await;
    assert!(matches!(too_many, Err(AppError::Conflict(_))));
    assert_eq!(stock(&pool, drill).await, 9);

    let lines = loans.loan_lines(warehouse(), pre_id).await.unwrap();
    assert_eq!(lines[0].pre_ele_cantidad_prestado, 1);
    assert_eq!(lines[0].est_nombre, "Creado");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_malformed_history_reads_as_empty(pool: PgPool) {
    let (drill, _) = seed(&pool).await;
    let loans = service(&pool);
    let (pre_id, _) = loans.create_loan(instructor(), request(&[(drill, 1)])).await.unwrap();

    sqlx::query("UPDATE prestamos SET historial_estados = '{oops' WHERE pre_id = $1")
        .bind(pre_id)
        .execute(&pool)
        .await
        .unwrap();

    let loan = loans.get_loan(instructor(), pre_id).await.unwrap().loan;
    assert!(loan.historial_estados.is_empty());

    // A transition starts a fresh log instead of failing
    let (_, history) = loans
        .transition_status(warehouse(), pre_id, ChangeStatus { est_id: Some(2) })
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_concurrent_transitions_stay_consistent(pool: PgPool) {
    let (drill, _) = seed(&pool).await;
    sqlx::query("INSERT INTO estados (est_id, est_nombre) VALUES (5, 'En revisión')")
        .execute(&pool)
        .await
        .unwrap();

    let loans = service(&pool);
    let (pre_id, _) = loans.create_loan(instructor(), request(&[(drill, 1)])).await.unwrap();

    let a = {
        let loans = loans.clone();
        tokio::spawn(async move {
            loans
                .transition_status(warehouse(), pre_id, ChangeStatus { est_id: Some(2) })
                .await
        })
    };
    let b = {
        let loans = loans.clone();
        tokio::spawn(async move {
            loans
                .transition_status(warehouse(), pre_id, ChangeStatus { est_id: Some(5) })
                .await
        })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let loan = loans.get_loan(warehouse(), pre_id).await.unwrap().loan;
    assert_eq!(loan.historial_estados.len(), 3);
    assert_eq!(loan.historial_estados.last().unwrap().estado, loan.est_nombre);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_instructor_update_cannot_touch_schedule(pool: PgPool) {
    let (drill, _) = seed(&pool).await;
    let loans = service(&pool);
    let (pre_id, _) = loans.create_loan(instructor(), request(&[(drill, 1)])).await.unwrap();

    let started = loans
        .update_loan(
            instructor(),
            UpdateLoan {
                pre_id: Some(pre_id),
                pre_fin: Some(Utc::now()),
                usr_cedula: Some(INSTRUCTOR),
                est_id: Some(3),
            },
        )
        .await
        .unwrap();

    let loan = loans.get_loan(instructor(), pre_id).await.unwrap().loan;
    assert_eq!(loan.pre_inicio, started);
    assert_eq!(loan.est_id, 1);
    assert!(loan.pre_fin.is_none());
    assert_eq!(loan.historial_estados.len(), 1);

    let stranger = ActingUser::new(456, Role::Instructor);
    let forbidden = loans
        .update_loan(
            stranger,
            UpdateLoan {
                pre_id: Some(pre_id),
                pre_fin: None,
                usr_cedula: Some(456),
                est_id: None,
            },
        )
        .await;
    assert!(matches!(forbidden, Err(AppError::Authorization(_))));

    let after = loans.get_loan(instructor(), pre_id).await.unwrap().loan;
    assert_eq!(after.usr_cedula, INSTRUCTOR);
    assert_eq!(after.pre_actualizacion, loan.pre_actualizacion);
}

fn warehouse_update(pre_id: i32, est_id: i32, pre_fin: Option<DateTime<Utc>>) -> UpdateLoan {
    UpdateLoan {
        pre_id: Some(pre_id),
        pre_fin,
        usr_cedula: Some(INSTRUCTOR),
        est_id: Some(est_id),
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_update_to_delivered_closes_loan(pool: PgPool) {
    let (drill, meter) = seed(&pool).await;
    let loans = service(&pool);
    let (pre_id, _) = loans
        .create_loan(instructor(), request(&[(drill, 3), (meter, 2)]))
        .await
        .unwrap();

    loans
        .update_loan(warehouse(), warehouse_update(pre_id, 3, None))
        .await
        .unwrap();

    let loan = loans.get_loan(warehouse(), pre_id).await.unwrap().loan;
    assert_eq!(loan.est_id, 3);
    assert_eq!(loan.usr_cedula, INSTRUCTOR);
    assert_eq!(loan.historial_estados.len(), 2);
    let last = loan.historial_estados.last().unwrap();
    assert_eq!(last.estado, loan.est_nombre);
    assert_eq!(last.usuario, "Bodega Central");
    assert!(loan.pre_fin.is_some());

    assert_eq!(stock(&pool, drill).await, 10);
    assert_eq!(stock(&pool, meter).await, 5);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_update_keeps_explicit_end_date_when_closing(pool: PgPool) {
    let (drill, _) = seed(&pool).await;
    let loans = service(&pool);
    let (pre_id, _) = loans.create_loan(instructor(), request(&[(drill, 2)])).await.unwrap();

    let agreed = DateTime::<Utc>::from_timestamp(1_800_000_000, 0).unwrap();
    loans
        .update_loan(warehouse(), warehouse_update(pre_id, 4, Some(agreed)))
        .await
        .unwrap();

    let loan = loans.get_loan(warehouse(), pre_id).await.unwrap().loan;
    assert_eq!(loan.est_nombre, "Cancelado");
    assert_eq!(loan.pre_fin, Some(agreed));
    assert_eq!(loan.historial_estados.len(), 2);
    assert_eq!(stock(&pool, drill).await, 10);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_owner_cannot_reassign_loan(pool: PgPool) {
    let (drill, _) = seed(&pool).await;
    let loans = service(&pool);
    let (pre_id, _) = loans.create_loan(instructor(), request(&[(drill, 1)])).await.unwrap();

    let result = loans
        .update_loan(
            instructor(),
            UpdateLoan {
                pre_id: Some(pre_id),
                pre_fin: None,
                usr_cedula: Some(456),
                est_id: None,
            },
        )
        .await;
    assert!(matches!(result, Err(AppError::Authorization(_))));

    let loan = loans.get_loan(instructor(), pre_id).await.unwrap().loan;
    assert_eq!(loan.usr_cedula, INSTRUCTOR);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_loans_never_move_backwards(pool: PgPool) {
    let (drill, _) = seed(&pool).await;
    let loans = service(&pool);
    let (pre_id, _) = loans.create_loan(instructor(), request(&[(drill, 1)])).await.unwrap();

    loans
        .transition_status(warehouse(), pre_id, ChangeStatus { est_id: Some(2) })
        .await
        .unwrap();

    let via_status = loans
        .transition_status(warehouse(), pre_id, ChangeStatus { est_id: Some(1) })
        .await;
    assert!(matches!(via_status, Err(AppError::InvalidState(_))));

    let via_update = loans
        .update_loan(warehouse(), warehouse_update(pre_id, 1, None))
        .await;
    assert!(matches!(via_update, Err(AppError::InvalidState(_))));

    let loan = loans.get_loan(warehouse(), pre_id).await.unwrap().loan;
    assert_eq!(loan.est_nombre, "En proceso");
    assert_eq!(loan.historial_estados.len(), 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_cancel_racing_create_on_shared_items(pool: PgPool) {
    let (drill, meter) = seed(&pool).await;
    let loans = service(&pool);

    for _ in 0..10 {
        let (held, _) = loans
            .create_loan(instructor(), request(&[(meter, 1), (drill, 1)]))
            .await
            .unwrap();

        let cancel = {
            let loans = loans.clone();
            tokio::spawn(async move { loans.cancel_loan(instructor(), held).await })
        };
        let create = {
            let loans = loans.clone();
            tokio::spawn(async move {
                loans
                    .create_loan(instructor(), request(&[(drill, 1), (meter, 1)]))
                    .await
            })
        };

        cancel.await.unwrap().unwrap();
        let (fresh, _) = create.await.unwrap().unwrap();
        loans.cancel_loan(instructor(), fresh).await.unwrap();
    }

    assert_eq!(stock(&pool, drill).await, 10);
    assert_eq!(stock(&pool, meter).await, 5);
}
