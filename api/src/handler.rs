use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{
    models::{ConverterPair, Currency, CurrencyType, Exchange, ThresholdConvertPair},
    Error as CommonError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use store::RequestScope;
use tracing::{error, warn};

use crate::service::ConverterService;

/// Header carrying the caller's already-resolved user id.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConverterService>,
    pub request_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/pairs/available", get(available_pairs))
        .route("/api/v1/pairs", get(stored_pairs))
        .route("/api/v1/pairs/mine", get(my_pairs).post(subscribe))
        .route(
            "/api/v1/currencies/mine",
            get(my_currencies).post(add_currency).delete(delete_currency),
        )
        .route("/api/v1/exchange", post(current_exchange))
        .route("/api/v1/thresholds", get(my_thresholds).post(set_threshold))
        .with_state(state)
}

// Create a wrapper for our common::Error type
pub struct ApiError(CommonError);

impl From<CommonError> for ApiError {
    fn from(err: CommonError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(CommonError::BadRequest(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(CommonError::BadRequest(rejection.body_text()))
    }
}

/// Well-formed JSON that fails model validation is reported with the route's
/// own error kind; any other rejection is a plain bad request.
fn rejected_body(rejection: JsonRejection, invalid: fn(String) -> CommonError) -> ApiError {
    match rejection {
        JsonRejection::JsonDataError(e) => ApiError(invalid(e.body_text())),
        other => other.into(),
    }
}

fn status_for(err: &CommonError) -> StatusCode {
    match err {
        CommonError::BadRequest(_)
        | CommonError::InvalidConverterPair(_)
        | CommonError::InvalidCurrency(_) => StatusCode::BAD_REQUEST,
        CommonError::NotAuthorized => StatusCode::UNAUTHORIZED,
        CommonError::CurrencyNotFound(_) | CommonError::ConverterPairNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        CommonError::CurrencyAlreadyExists(_) | CommonError::ConverterPairAlreadyExists(_) => {
            StatusCode::CONFLICT
        }
        CommonError::ExternalProvider(_) => StatusCode::BAD_GATEWAY,
        CommonError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        CommonError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        CommonError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        CommonError::TransactionNotFound
        | CommonError::Database(_)
        | CommonError::Config(_)
        | CommonError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Convert our API error wrapper to an Axum response
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(status = %status, error = %self.0, "Request failed");
        }

        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: &'static str,
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: self.0.kind(),
            }),
        )
            .into_response()
    }
}

/// Request scope for one call: caller identity from [`USER_ID_HEADER`] and the
/// configured deadline. An unparseable identity is rejected outright.
fn request_scope(state: &AppState, headers: &HeaderMap) -> Result<RequestScope, ApiError> {
    let scope = RequestScope::new().with_timeout(state.request_timeout);

    match headers.get(USER_ID_HEADER) {
        None => Ok(scope),
        Some(value) => {
            let user_id = value
                .to_str()
                .ok()
                .and_then(|raw| raw.trim().parse::<i64>().ok())
                .ok_or_else(|| {
                    warn!("Rejecting request with malformed {} header", USER_ID_HEADER);
                    CommonError::NotAuthorized
                })?;
            Ok(scope.with_user(user_id))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairRequest {
    pub pair: ConverterPair,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub id: i64,
    pub pair: ConverterPair,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserCurrencyResponse {
    pub id: i64,
    pub currency: Currency,
}

#[derive(Debug, Deserialize)]
pub struct CurrencyFilter {
    #[serde(rename = "type")]
    pub currency_type: Option<CurrencyType>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExchangeResponse {
    pub pair: ConverterPair,
    pub exchange: Exchange,
}

// Chains offered for subscription
pub async fn available_pairs(State(state): State<AppState>) -> Json<Vec<ConverterPair>> {
    Json(state.service.available_pairs())
}

pub async fn stored_pairs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConverterPair>>, ApiError> {
    let scope = request_scope(&state, &headers)?;
    let pairs = state.service.stored_pairs(&scope).await?;
    Ok(Json(pairs))
}

pub async fn my_pairs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConverterPair>>, ApiError> {
    let scope = request_scope(&state, &headers)?;
    let pairs = state.service.my_pairs(&scope).await?;
    Ok(Json(pairs))
}

pub async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<PairRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), ApiError> {
    let scope = request_scope(&state, &headers)?;
    let Json(PairRequest { pair }) =
        body.map_err(|e| rejected_body(e, CommonError::InvalidConverterPair))?;

    let id = state.service.subscribe(&scope, &pair).await?;
    Ok((StatusCode::CREATED, Json(SubscriptionResponse { id, pair })))
}

pub async fn current_exchange(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<PairRequest>, JsonRejection>,
) -> Result<Json<ExchangeResponse>, ApiError> {
    let scope = request_scope(&state, &headers)?;
    let Json(PairRequest { pair }) =
        body.map_err(|e| rejected_body(e, CommonError::InvalidConverterPair))?;

    let exchange = state.service.current_exchange(&scope, &pair).await?;
    Ok(Json(ExchangeResponse { pair, exchange }))
}

pub async fn my_currencies(
    State(state): State<AppState>,
    headers: HeaderMap,
    filter: Result<Query<CurrencyFilter>, QueryRejection>,
) -> Result<Json<Vec<Currency>>, ApiError> {
    let scope = request_scope(&state, &headers)?;
    let Query(filter) = filter?;

    let currencies = state
        .service
        .my_currencies(&scope, filter.currency_type)
        .await?;
    Ok(Json(currencies))
}

pub async fn add_currency(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Currency>, JsonRejection>,
) -> Result<(StatusCode, Json<UserCurrencyResponse>), ApiError> {
    let scope = request_scope(&state, &headers)?;
    let Json(currency) = body.map_err(|e| rejected_body(e, CommonError::InvalidCurrency))?;

    let id = state.service.add_currency(&scope, &currency).await?;
    Ok((StatusCode::CREATED, Json(UserCurrencyResponse { id, currency })))
}

pub async fn delete_currency(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Currency>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let scope = request_scope(&state, &headers)?;
    let Json(currency) = body.map_err(|e| rejected_body(e, CommonError::InvalidCurrency))?;

    state.service.delete_currency(&scope, &currency).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn my_thresholds(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ThresholdConvertPair>>, ApiError> {
    let scope = request_scope(&state, &headers)?;
    let thresholds = state.service.my_thresholds(&scope).await?;
    Ok(Json(thresholds))
}

pub async fn set_threshold(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ThresholdConvertPair>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let scope = request_scope(&state, &headers)?;
    let Json(threshold) = body?;

    state.service.set_threshold(&scope, &threshold).await?;
    Ok(StatusCode::NO_CONTENT)
}
