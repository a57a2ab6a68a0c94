//! API integration tests
//!
//! Expect a server on localhost:8080 sharing `JWT_SECRET` with this process
//! and an `elementos` row with id 1 and some stock.

use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use storeflow_server::models::user::UserClaims;

const BASE_URL: &str = "http://localhost:8080/api/v1";

/// Mint a bearer token the way the identity service would
fn token_for(usr_cedula: i64, rol_id: i32) -> String {
    let secret = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "change-this-secret-in-production".to_string());
    let now = Utc::now().timestamp();
    UserClaims {
        sub: usr_cedula.to_string(),
        usr_cedula,
        rol_id,
        exp: now + 3600,
        iat: now,
    }
    .create_token(&secret)
    .expect("Failed to sign token")
}

fn instructor_token() -> String {
    token_for(123, 2)
}

fn warehouse_token() -> String {
    token_for(900, 3)
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_missing_token_is_rejected() {
    let client = Client::new();

    let response = client
        .get(format!("{}/prestamos/1", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_list_all_loans_requires_warehouse() {
    let client = Client::new();

    let response = client
        .get(format!("{}/prestamos", BASE_URL))
        .bearer_auth(instructor_token())
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 403);

    let response = client
        .get(format!("{}/prestamos", BASE_URL))
        .bearer_auth(warehouse_token())
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["respuesta"], true);
    assert!(body["data"].is_array());
}

#[tokio::test]
#[ignore]
async fn test_create_loan_without_items() {
    let client = Client::new();

    let response = client
        .post(format!("{}/prestamos/crear", BASE_URL))
        .bearer_auth(instructor_token())
        .json(&json!({
            "usr_cedula": 123,
            "est_id": 1,
            "elementos": []
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "BadValue");
}

#[tokio::test]
#[ignore]
async fn test_get_unknown_loan() {
    let client = Client::new();

    let response = client
        .get(format!("{}/prestamos/{}", BASE_URL, i32::MAX))
        .bearer_auth(warehouse_token())
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 404);
}

#[tokio::test]
#[ignore]
async fn test_loan_lifecycle() {
    let client = Client::new();

    // Create
    let response = client
        .post(format!("{}/prestamos/crear", BASE_URL))
        .bearer_auth(instructor_token())
        .json(&json!({
            "usr_cedula": 123,
            "est_id": 1,
            "elementos": [{ "ele_id": 1, "pre_ele_cantidad_prestado": 1 }]
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);

    let body: Value = response.json().await.expect("Failed to parse response");
    let pre_id = body["prestamoId"].as_i64().expect("No prestamoId");
    assert_eq!(body["historial"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["historial"][0]["estado"], "Creado");

    // Instructors may not move a loan forward
    let response = client
        .put(format!("{}/prestamos/{}/estado", BASE_URL, pre_id))
        .bearer_auth(instructor_token())
        .json(&json!({ "est_id": 2 }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 403);

    // Warehouse moves it to "En proceso"
    let response = client
        .put(format!("{}/prestamos/{}/estado", BASE_URL, pre_id))
        .bearer_auth(warehouse_token())
        .json(&json!({ "est_id": 2, "usr_cedula": 900 }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["nuevo_estado"], "En proceso");
    assert_eq!(body["historial_estados"].as_array().map(Vec::len), Some(2));

    // Details carry the lines
    let response = client
        .get(format!("{}/prestamos/{}", BASE_URL, pre_id))
        .bearer_auth(instructor_token())
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["est_nombre"], "En proceso");
    assert_eq!(body["data"]["elementos"].as_array().map(Vec::len), Some(1));

    // Owner cancels
    let response = client
        .delete(format!("{}/prestamos/{}/cancelar", BASE_URL, pre_id))
        .bearer_auth(instructor_token())
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["success"], true);
    assert!(body["data"].is_array());

    // Closed loans stay closed
    let response = client
        .put(format!("{}/prestamos/{}/estado", BASE_URL, pre_id))
        .bearer_auth(warehouse_token())
        .json(&json!({ "est_id": 2 }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 400);

    // History is still readable
    let response = client
        .get(format!("{}/prestamos/{}/historial", BASE_URL, pre_id))
        .bearer_auth(instructor_token())
        .send()
        .await
        .expect("Failed to send request");
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"].as_array().map(Vec::len), Some(3));
    assert_eq!(body["data"][2]["estado"], "Cancelado");

    // Delete
    let response = client
        .delete(format!("{}/prestamos/{}", BASE_URL, pre_id))
        .bearer_auth(warehouse_token())
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let response = client
        .delete(format!("{}/prestamos/{}", BASE_URL, pre_id))
        .bearer_auth(warehouse_token())
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 404);
}
