//! REST API server example for the settlement engine.
//!
//! Run with: `cargo run --example server`
//!
//! The caller is identified by the `x-user-id` header; the role is the one
//! the user was registered with. Three users are seeded at startup:
//! `1` admin, `2` instructor, `3` learner.
//!
//! ## Endpoints
//!
//! - `POST /courses` - Publish a course (instructor)
//! - `POST /courses/{id}/purchase` - Buy a course
//! - `PUT  /courses/{id}/progress` - Update progress in a purchased course
//! - `POST /courses/{id}/certificate` - Issue the completion certificate
//! - `GET  /certificates/{id}` - Verify a certificate
//! - `GET  /payouts/pending` - List pending payouts (instructor)
//! - `POST /payouts/{id}/collect` - Collect a pending payout (instructor)
//! - `GET  /balance` - Caller's bank balance
//! - `GET  /transactions` - Caller's transactions
//! - `GET  /organization/balance` - Treasury balance (admin)
//! - `GET  /organization/stats` - Platform statistics (admin)
//!
//! ## Example Usage
//!
//! ```bash
//! # Publish
//! curl -X POST http://localhost:3000/courses -H "x-user-id: 2" \
//!   -H "Content-Type: application/json" -d '{"title": "Rust", "price": "99"}'
//!
//! # Purchase
//! curl -X POST http://localhost:3000/courses/1/purchase -H "x-user-id: 3"
//!
//! # Collect
//! curl http://localhost:3000/payouts/pending -H "x-user-id: 2"
//! curl -X POST http://localhost:3000/payouts/2/collect -H "x-user-id: 2"
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use lms_settlement::{
    Balance, BankAccount, Caller, Certificate, Config, CourseId, Engine, Enrollment, NewCourse,
    OrganizationBalance, OrganizationStats, PayoutOutcome, PendingPayouts, PublishOutcome,
    PurchaseOutcome, RecordId, Role, SettlementError, TransactionRecord, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub title: String,
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub progress: i64,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
    pub code: &'static str,
}

// === Application State ===

/// Shared application state containing the settlement engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    /// Resolves the `x-user-id` header to a registered caller.
    fn caller(&self, headers: &HeaderMap) -> Result<Caller, AppError> {
        let id = headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u32>().ok())
            .map(UserId)
            .ok_or(AppError::Unauthenticated)?;
        let role = self
            .engine
            .get_user(&id)
            .map(|user| user.role())
            .ok_or(AppError::Unauthenticated)?;
        Ok(Caller::new(id, role))
    }
}

// === Error Handling ===

pub enum AppError {
    Unauthenticated,
    Settlement(SettlementError),
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        AppError::Settlement(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "missing or unknown x-user-id".to_string(),
            ),
            AppError::Settlement(err) => {
                let status = match &err {
                    SettlementError::Authorization => StatusCode::UNAUTHORIZED,
                    SettlementError::Forbidden { .. } => StatusCode::FORBIDDEN,
                    SettlementError::NotFound(_) => StatusCode::NOT_FOUND,
                    SettlementError::AlreadyEnrolled => StatusCode::CONFLICT,
                    SettlementError::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
                    SettlementError::Validation | SettlementError::InvalidAmount => {
                        StatusCode::BAD_REQUEST
                    }
                    SettlementError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code(), err.to_string())
            }
        };

        (
            status,
            Json(ErrorResponse {
                status: "error",
                message,
                code,
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /courses - Publish a course.
async fn publish_course(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishOutcome>), AppError> {
    let caller = state.caller(&headers)?;
    let outcome = state
        .engine
        .publish_course(caller, NewCourse::new(request.title, request.price))?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /courses/{id}/purchase - Buy a course for the caller.
async fn purchase(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(course): Path<u32>,
) -> Result<(StatusCode, Json<PurchaseOutcome>), AppError> {
    let caller = state.caller(&headers)?;
    let outcome = state.engine.purchase(caller.id, CourseId(course))?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// PUT /courses/{id}/progress - Update the caller's progress.
async fn update_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(course): Path<u32>,
    Json(request): Json<ProgressRequest>,
) -> Result<Json<Enrollment>, AppError> {
    let caller = state.caller(&headers)?;
    let enrollment = state
        .engine
        .update_progress(caller.id, CourseId(course), request.progress)?;
    Ok(Json(enrollment))
}

/// POST /courses/{id}/certificate - Issue the caller's certificate.
async fn issue_certificate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(course): Path<u32>,
) -> Result<Json<Certificate>, AppError> {
    let caller = state.caller(&headers)?;
    Ok(Json(
        state.engine.issue_certificate(caller.id, CourseId(course))?,
    ))
}

/// GET /certificates/{id} - Verify a certificate.
async fn verify_certificate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Certificate>, AppError> {
    Ok(Json(state.engine.verify_certificate(id)?))
}

/// GET /payouts/pending - List the caller's pending payouts.
async fn pending_payouts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PendingPayouts>, AppError> {
    let caller = state.caller(&headers)?;
    Ok(Json(state.engine.list_pending_payouts(caller)?))
}

/// POST /payouts/{id}/collect - Collect a pending payout.
async fn collect_payout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(record): Path<u64>,
) -> Result<Json<PayoutOutcome>, AppError> {
    let caller = state.caller(&headers)?;
    Ok(Json(state.engine.collect_payout(caller, RecordId(record))?))
}

/// GET /balance - The caller's bank balance.
async fn balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Balance>, AppError> {
    let caller = state.caller(&headers)?;
    Ok(Json(state.engine.get_balance(caller.id)?))
}

/// GET /transactions - The caller's transactions, newest first.
async fn transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<TransactionRecord>>, AppError> {
    let caller = state.caller(&headers)?;
    Ok(Json(state.engine.transactions_for(caller.id)?))
}

/// GET /organization/balance - Treasury balance and totals.
async fn organization_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OrganizationBalance>, AppError> {
    let caller = state.caller(&headers)?;
    Ok(Json(state.engine.organization_balance(caller)?))
}

/// GET /organization/stats - Platform statistics.
async fn organization_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OrganizationStats>, AppError> {
    let caller = state.caller(&headers)?;
    Ok(Json(state.engine.organization_stats(caller)?))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/courses", post(publish_course))
        .route("/courses/{id}/purchase", post(purchase))
        .route("/courses/{id}/progress", put(update_progress))
        .route("/courses/{id}/certificate", post(issue_certificate))
        .route("/certificates/{id}", get(verify_certificate))
        .route("/payouts/pending", get(pending_payouts))
        .route("/payouts/{id}/collect", post(collect_payout))
        .route("/balance", get(balance))
        .route("/transactions", get(transactions))
        .route("/organization/balance", get(organization_balance))
        .route("/organization/stats", get(organization_stats))
        .with_state(state)
}

fn seed(engine: &Engine) -> Result<(), SettlementError> {
    let balance = engine.config().default_user_balance;
    let users = [
        (1, "Ada Admin", Role::Admin),
        (2, "Ivan Instructor", Role::Instructor),
        (3, "Lea Learner", Role::Learner),
    ];
    for (id, name, role) in users {
        engine.register_user(
            UserId(id),
            name,
            role,
            BankAccount::new(format!("ACC{id:03}"), Some(format!("secret-{id}")), balance),
        )?;
    }
    Ok(())
}

// === Main ===

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let engine = Engine::new(Config::default());
    seed(&engine)?;
    let state = AppState {
        engine: Arc::new(engine),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!(addr = %listener.local_addr()?, "settlement API listening");

    axum::serve(listener, app).await?;
    Ok(())
}
