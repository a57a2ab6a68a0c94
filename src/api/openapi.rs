//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{health, loans};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "StoreFlow API",
        version = "0.1.0",
        description = "Warehouse equipment loan tracking REST API"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Loans
        loans::create_loan,
        loans::update_loan,
        loans::delete_loan,
        loans::list_loans,
        loans::get_loan,
        loans::get_loan_lines,
        loans::get_status_history,
        loans::get_user_loans,
        loans::change_status,
        loans::cancel_loan,
        loans::update_line_quantity,
    ),
    components(
        schemas(
            health::HealthResponse,
            crate::error::ErrorResponse,
            // Loans
            crate::models::loan::Loan,
            crate::models::loan::LoanDetails,
            crate::models::loan::LoanLine,
            crate::models::loan::HistoryEntry,
            crate::models::loan::StatusHistory,
            crate::models::loan::CreateLoan,
            crate::models::loan::NewLoanLine,
            crate::models::loan::UpdateLoan,
            crate::models::loan::ChangeStatus,
            crate::models::loan::UpdateLineQuantity,
            crate::models::item::StockLevel,
            loans::CreateLoanResponse,
            loans::UpdateLoanResponse,
            loans::StatusChangeResponse,
            loans::DeleteLoanResponse,
            loans::CancelLoanResponse,
            loans::LineQuantityResponse,
            loans::LoansResponse,
            loans::LoanDetailsResponse,
            loans::LoanLinesResponse,
            loans::HistoryResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Service health"),
        (name = "prestamos", description = "Loan lifecycle")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
