//! API route handlers.
//!
//! User identity arrives as an already-authenticated `X-User-Id` header
//! set by the session layer in front of this service. Domain errors are
//! mapped to status codes in one place (`ApiError`).

use axum::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::engine::orders::{self, SubmitOutcome};
use crate::engine::{balance, WithdrawalAdmission};
use crate::storage::{OrderStore, WithdrawalStore};
use crate::types::{Balance, LoyaltyError, Order, OrderStatus, UserId, Withdrawal};

/// Header carrying the authenticated user's UUID.
pub const USER_HEADER: &str = "x-user-id";

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub orders: Arc<dyn OrderStore>,
    pub withdrawals: Arc<dyn WithdrawalStore>,
    pub admission: WithdrawalAdmission,
}

impl ApiState {
    pub fn new(orders: Arc<dyn OrderStore>, withdrawals: Arc<dyn WithdrawalStore>) -> Self {
        let admission = WithdrawalAdmission::new(orders.clone(), withdrawals.clone());
        Self {
            orders,
            withdrawals,
            admission,
        }
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The caller's identity, taken from `X-User-Id`.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(AuthenticatedUser)
            .ok_or((StatusCode::UNAUTHORIZED, "authentication required"))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub struct ApiError(LoyaltyError);

impl From<LoyaltyError> for ApiError {
    fn from(e: LoyaltyError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LoyaltyError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LoyaltyError::Conflict(_) => StatusCode::CONFLICT,
            LoyaltyError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            LoyaltyError::Integrity { .. }
            | LoyaltyError::RejectedAnswer(_)
            | LoyaltyError::Persistence(_) => {
                error!(error = %self.0, "Request failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
            }
        };
        debug!(status = status.as_u16(), error = %self.0, "Request rejected");
        (status, self.0.to_string()).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub number: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderView {
    fn from(o: Order) -> Self {
        let accrual = (o.status == OrderStatus::Processed).then_some(o.accrual);
        Self {
            number: o.id,
            status: o.status,
            accrual,
            uploaded_at: o.uploaded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalView {
    pub order: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalView {
    fn from(w: Withdrawal) -> Self {
        Self {
            order: w.id,
            sum: w.sum,
            processed_at: w.processed_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: Decimal,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /api/user/orders
pub async fn submit_order(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    body: String,
) -> Result<(StatusCode, &'static str), ApiError> {
    if body.trim().is_empty() {
        return Ok((StatusCode::BAD_REQUEST, "empty order number"));
    }
    match orders::submit_order(state.orders.as_ref(), user, &body).await? {
        SubmitOutcome::Accepted(_) => Ok((StatusCode::ACCEPTED, "accepted")),
        SubmitOutcome::AlreadyUploaded(_) => Ok((StatusCode::OK, "already uploaded")),
    }
}

/// GET /api/user/orders
pub async fn list_orders(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Response, ApiError> {
    let found = orders::list_orders(state.orders.as_ref(), user).await?;
    if found.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let views: Vec<OrderView> = found.into_iter().map(OrderView::from).collect();
    Ok(Json(views).into_response())
}

/// GET /api/user/balance
pub async fn get_balance(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Balance>, ApiError> {
    let balance = balance::load(state.orders.as_ref(), state.withdrawals.as_ref(), user)
        .await
        .map_err(LoyaltyError::from)?;
    Ok(Json(balance))
}

/// POST /api/user/balance/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(req): Json<WithdrawRequest>,
) -> Result<StatusCode, ApiError> {
    state.admission.withdraw(user, &req.order, req.sum).await?;
    Ok(StatusCode::OK)
}

/// GET /api/user/withdrawals
pub async fn list_withdrawals(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Response, ApiError> {
    let found = orders::list_withdrawals(state.withdrawals.as_ref(), user).await?;
    if found.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let views: Vec<WithdrawalView> = found.into_iter().map(WithdrawalView::from).collect();
    Ok(Json(views).into_response())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
