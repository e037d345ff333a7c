//! REST API server example for the clinic ledger.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /operations` - Apply a package operation (create, deduct, top_up, apply, adjust, update, complete, delete, link)
//! - `GET /patients/{id}/packages` - Active packages of a patient
//! - `GET /packages/{kind}/{id}` - One package
//! - `GET /packages/{kind}/{id}/history` - Usage and audit history, newest first
//! - `POST /inventory/items` - Add a medicine item
//! - `GET /inventory/items` - List active medicine items
//! - `GET /inventory/low-stock` - Items at or below the low-stock threshold
//! - `POST /inventory/dispense` - Dispense stock to a patient
//!
//! ## Example Usage
//!
//! ```bash
//! # Create a 6-round herbal package
//! curl -X POST http://localhost:3000/operations \
//!   -H "Content-Type: application/json" \
//!   -d '{"op": "create", "patient_id": 1, "terms": {"kind": "herbal", "herbal_name": "시함마농"}, "total_units": 6, "start_date": "2026-03-02"}'
//!
//! # Deduct two rounds
//! curl -X POST http://localhost:3000/operations \
//!   -H "Content-Type: application/json" \
//!   -d '{"op": "deduct", "package": {"kind": "herbal", "id": 1}, "count": 2, "usage_date": "2026-03-05"}'
//!
//! # History
//! curl http://localhost:3000/packages/herbal/1/history
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clinic_ledger::{
    Dispense, HistoryEntry, Ledger, LedgerConfig, LedgerError, MedicineItem, MedicineUsageRecord,
    NewMedicineItem, Operation, Package, PackageId, PackageKey, PackageKind, PatientId,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
}

// === Error Handling ===

/// Wrapper for converting `LedgerError` into HTTP responses.
pub struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::Validation(_)
            | LedgerError::KindMismatch { .. }
            | LedgerError::InvalidAdjustment { .. } => StatusCode::BAD_REQUEST,
            LedgerError::InsufficientBalance { .. } | LedgerError::InsufficientStock { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            LedgerError::PackageNotActive { .. }
            | LedgerError::AlreadyLinked(_)
            | LedgerError::ItemInactive(_)
            | LedgerError::MembershipExpired { .. } => StatusCode::CONFLICT,
            LedgerError::Billing(_) => StatusCode::BAD_GATEWAY,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: self.0.code().to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /operations - Apply one package operation.
async fn post_operation(
    State(state): State<AppState>,
    Json(operation): Json<Operation>,
) -> Result<(StatusCode, Json<Package>), AppError> {
    let status = match operation {
        Operation::Create(_) => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    let package = state.ledger.process(operation)?;
    Ok((status, Json(package)))
}

/// GET /patients/{id}/packages
async fn list_packages(
    State(state): State<AppState>,
    Path(patient): Path<u32>,
) -> Json<Vec<Package>> {
    Json(state.ledger.packages().list_active(PatientId(patient)))
}

/// GET /packages/{kind}/{id}
async fn get_package(
    State(state): State<AppState>,
    Path((kind, id)): Path<(PackageKind, u64)>,
) -> Result<Json<Package>, AppError> {
    let key = PackageKey::new(kind, PackageId(id));
    Ok(Json(state.ledger.packages().get(key)?))
}

/// GET /packages/{kind}/{id}/history
async fn get_history(
    State(state): State<AppState>,
    Path((kind, id)): Path<(PackageKind, u64)>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let key = PackageKey::new(kind, PackageId(id));
    Ok(Json(state.ledger.packages().history(key)?))
}

/// POST /inventory/items
async fn add_item(
    State(state): State<AppState>,
    Json(new): Json<NewMedicineItem>,
) -> Result<(StatusCode, Json<MedicineItem>), AppError> {
    let item = state.ledger.inventory().add_item(new)?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// GET /inventory/items
async fn list_items(State(state): State<AppState>) -> Json<Vec<MedicineItem>> {
    Json(state.ledger.inventory().list(true))
}

/// GET /inventory/low-stock
async fn low_stock(State(state): State<AppState>) -> Json<Vec<MedicineItem>> {
    Json(state.ledger.inventory().low_stock())
}

/// POST /inventory/dispense
async fn dispense(
    State(state): State<AppState>,
    Json(request): Json<Dispense>,
) -> Result<(StatusCode, Json<MedicineUsageRecord>), AppError> {
    let record = state.ledger.inventory().dispense(request)?;
    Ok((StatusCode::CREATED, Json(record)))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/operations", post(post_operation))
        .route("/patients/{id}/packages", get(list_packages))
        .route("/packages/{kind}/{id}", get(get_package))
        .route("/packages/{kind}/{id}/history", get(get_history))
        .route("/inventory/items", get(list_items).post(add_item))
        .route("/inventory/low-stock", get(low_stock))
        .route("/inventory/dispense", post(dispense))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let state = AppState {
        ledger: Arc::new(Ledger::in_memory(LedgerConfig::from_env())),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Clinic ledger API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /operations                    - Apply a package operation");
    println!("  GET  /patients/:id/packages         - Active packages of a patient");
    println!("  GET  /packages/:kind/:id            - One package");
    println!("  GET  /packages/:kind/:id/history    - Package history");
    println!("  GET  /inventory/items               - List medicine items");
    println!("  POST /inventory/items               - Add a medicine item");
    println!("  GET  /inventory/low-stock           - Low-stock items");
    println!("  POST /inventory/dispense            - Dispense stock");

    axum::serve(listener, app).await.unwrap();
}
