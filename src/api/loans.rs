//! Loan (préstamo) endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{
        item::StockLevel,
        loan::{
            ChangeStatus, CreateLoan, HistoryEntry, Loan, LoanDetails, LoanLine, StatusHistory,
            UpdateLineQuantity, UpdateLoan,
        },
    },
};

use super::AuthenticatedUser;

/// Envelope of read endpoints
#[derive(Serialize, ToSchema)]
#[aliases(
    LoansResponse = DataResponse<Vec<Loan>>,
    LoanDetailsResponse = DataResponse<LoanDetails>,
    LoanLinesResponse = DataResponse<Vec<LoanLine>>,
    HistoryResponse = DataResponse<Vec<HistoryEntry>>
)]
pub struct DataResponse<T> {
    pub respuesta: bool,
    pub mensaje: String,
    pub data: T,
}

impl<T> DataResponse<T> {
    fn ok(mensaje: &str, data: T) -> Json<Self> {
        Json(Self {
            respuesta: true,
            mensaje: mensaje.to_string(),
            data,
        })
    }
}

/// Loan creation result
#[derive(Serialize, ToSchema)]
pub struct CreateLoanResponse {
    pub success: bool,
    #[serde(rename = "prestamoId")]
    pub prestamo_id: i32,
    pub historial: StatusHistory,
}

/// Loan update result
#[derive(Serialize, ToSchema)]
pub struct UpdateLoanResponse {
    pub respuesta: bool,
    pub mensaje: String,
    /// Original start date, unchanged
    pub pre_inicio: DateTime<Utc>,
}

/// Status change result
#[derive(Serialize, ToSchema)]
pub struct StatusChangeResponse {
    pub respuesta: bool,
    pub nuevo_estado: String,
    pub historial_estados: StatusHistory,
}

/// Deletion result
#[derive(Serialize, ToSchema)]
pub struct DeleteLoanResponse {
    pub success: bool,
    pub message: String,
}

/// Cancellation result with refreshed stock per item
#[derive(Serialize, ToSchema)]
pub struct CancelLoanResponse {
    pub success: bool,
    pub message: String,
    pub data: Vec<StockLevel>,
}

/// Line quantity correction result
#[derive(Serialize, ToSchema)]
pub struct LineQuantityResponse {
    pub respuesta: bool,
    pub mensaje: String,
}

/// Create a new loan
#[utoipa::path(
    post,
    path = "/prestamos/crear",
    tag = "prestamos",
    security(("bearer_auth" = [])),
    request_body = CreateLoan,
    responses(
        (status = 201, description = "Loan created", body = CreateLoanResponse),
        (status = 400, description = "Missing requester, status or items"),
        (status = 404, description = "Item not found"),
        (status = 409, description = "Not enough stock")
    )
)]
pub async fn create_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Json(request): Json<CreateLoan>,
) -> AppResult<(StatusCode, Json<CreateLoanResponse>)> {
    let (prestamo_id, historial) = state.services.loans.create_loan(actor, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateLoanResponse {
            success: true,
            prestamo_id,
            historial,
        }),
    ))
}

/// Update requester, end date or status of a loan
#[utoipa::path(
    put,
    path = "/prestamos/actualizar",
    tag = "prestamos",
    security(("bearer_auth" = [])),
    request_body = UpdateLoan,
    responses(
        (status = 200, description = "Loan updated", body = UpdateLoanResponse),
        (status = 400, description = "Loan already delivered or cancelled"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn update_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Json(request): Json<UpdateLoan>,
) -> AppResult<Json<UpdateLoanResponse>> {
    let pre_inicio = state.services.loans.update_loan(actor, request).await?;

    Ok(Json(UpdateLoanResponse {
        respuesta: true,
        mensaje: "Préstamo actualizado correctamente".to_string(),
        pre_inicio,
    }))
}

/// Delete a loan and its line items
#[utoipa::path(
    delete,
    path = "/prestamos/{pre_id}",
    tag = "prestamos",
    security(("bearer_auth" = [])),
    params(("pre_id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan deleted", body = DeleteLoanResponse),
        (status = 404, description = "Loan not found or already deleted")
    )
)]
pub async fn delete_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(pre_id): Path<i32>,
) -> AppResult<Json<DeleteLoanResponse>> {
    state.services.loans.delete_loan(actor, pre_id).await?;

    Ok(Json(DeleteLoanResponse {
        success: true,
        message: "Préstamo eliminado correctamente".to_string(),
    }))
}

/// List every loan
#[utoipa::path(
    get,
    path = "/prestamos",
    tag = "prestamos",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All loans", body = LoansResponse),
        (status = 403, description = "Warehouse or admin only")
    )
)]
pub async fn list_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
) -> AppResult<Json<DataResponse<Vec<Loan>>>> {
    let loans = state.services.loans.list_loans(actor).await?;
    Ok(DataResponse::ok("Préstamos obtenidos correctamente", loans))
}

/// Get a loan with its line items
#[utoipa::path(
    get,
    path = "/prestamos/{pre_id}",
    tag = "prestamos",
    security(("bearer_auth" = [])),
    params(("pre_id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan details", body = LoanDetailsResponse),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(pre_id): Path<i32>,
) -> AppResult<Json<DataResponse<LoanDetails>>> {
    let details = state.services.loans.get_loan(actor, pre_id).await?;
    Ok(DataResponse::ok("Préstamo obtenido correctamente", details))
}

/// Line items of a loan
#[utoipa::path(
    get,
    path = "/prestamos/{pre_id}/elementos",
    tag = "prestamos",
    security(("bearer_auth" = [])),
    params(("pre_id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Line items with the loan's status", body = LoanLinesResponse),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan_lines(
    State(state): State<crate::AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(pre_id): Path<i32>,
) -> AppResult<Json<DataResponse<Vec<LoanLine>>>> {
    let lines = state.services.loans.loan_lines(actor, pre_id).await?;
    Ok(DataResponse::ok("Elementos del préstamo obtenidos correctamente", lines))
}

/// Status history of a loan
#[utoipa::path(
    get,
    path = "/prestamos/{pre_id}/historial",
    tag = "prestamos",
    security(("bearer_auth" = [])),
    params(("pre_id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Status history, oldest first", body = HistoryResponse),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_status_history(
    State(state): State<crate::AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(pre_id): Path<i32>,
) -> AppResult<Json<DataResponse<Vec<HistoryEntry>>>> {
    let history = state.services.loans.status_history(actor, pre_id).await?;
    Ok(DataResponse::ok(
        "Historial obtenido correctamente",
        history.entries().to_vec(),
    ))
}

/// Loans requested by a user
#[utoipa::path(
    get,
    path = "/usuarios/{usr_cedula}/prestamos",
    tag = "prestamos",
    security(("bearer_auth" = [])),
    params(("usr_cedula" = i64, Path, description = "Requester ID")),
    responses(
        (status = 200, description = "User's loans", body = LoansResponse),
        (status = 403, description = "Not your loans")
    )
)]
pub async fn get_user_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(usr_cedula): Path<i64>,
) -> AppResult<Json<DataResponse<Vec<Loan>>>> {
    let loans = state
        .services
        .loans
        .list_loans_by_requester(actor, usr_cedula)
        .await?;
    Ok(DataResponse::ok("Préstamos obtenidos correctamente", loans))
}

/// Move a loan to another status
#[utoipa::path(
    put,
    path = "/prestamos/{pre_id}/estado",
    tag = "prestamos",
    security(("bearer_auth" = [])),
    params(("pre_id" = i32, Path, description = "Loan ID")),
    request_body = ChangeStatus,
    responses(
        (status = 200, description = "Status changed", body = StatusChangeResponse),
        (status = 400, description = "Loan already delivered or cancelled"),
        (status = 403, description = "Not allowed to set this status"),
        (status = 404, description = "Loan or status not found")
    )
)]
pub async fn change_status(
    State(state): State<crate::AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(pre_id): Path<i32>,
    Json(request): Json<ChangeStatus>,
) -> AppResult<Json<StatusChangeResponse>> {
    let (nuevo_estado, historial_estados) = state
        .services
        .loans
        .transition_status(actor, pre_id, request)
        .await?;

    Ok(Json(StatusChangeResponse {
        respuesta: true,
        nuevo_estado,
        historial_estados,
    }))
}

/// Cancel a loan and put its items back on the shelf
#[utoipa::path(
    delete,
    path = "/prestamos/{pre_id}/cancelar",
    tag = "prestamos",
    security(("bearer_auth" = [])),
    params(("pre_id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan cancelled", body = CancelLoanResponse),
        (status = 400, description = "Loan already delivered or cancelled"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn cancel_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(pre_id): Path<i32>,
) -> AppResult<Json<CancelLoanResponse>> {
    let data = state.services.loans.cancel_loan(actor, pre_id).await?;

    Ok(Json(CancelLoanResponse {
        success: true,
        message: "Préstamo cancelado correctamente".to_string(),
        data,
    }))
}

/// Correct the borrowed quantity of one line item
#[utoipa::path(
    put,
    path = "/prestamos/elemento",
    tag = "prestamos",
    security(("bearer_auth" = [])),
    request_body = UpdateLineQuantity,
    responses(
        (status = 200, description = "Quantity updated", body = LineQuantityResponse),
        (status = 400, description = "Invalid quantity or loan closed"),
        (status = 404, description = "Loan line not found"),
        (status = 409, description = "Not enough stock")
    )
)]
pub async fn update_line_quantity(
    State(state): State<crate::AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Json(request): Json<UpdateLineQuantity>,
) -> AppResult<Json<LineQuantityResponse>> {
    state
        .services
        .loans
        .update_line_quantity(actor, request)
        .await?;

    Ok(Json(LineQuantityResponse {
        respuesta: true,
        mensaje: "Cantidad actualizada correctamente".to_string(),
    }))
}
