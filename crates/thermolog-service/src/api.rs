//! Read-only HTTP API over the reading store.
//!
//! Every handler takes the store lock only for the duration of one query, so
//! an in-progress acquisition never blocks a request for long.
//!
//! ## Error Handling
//!
//! Errors are returned as `{"message": "..."}` via [`AppError`]. Invalid query
//! parameters are 400, missing data is 404 and store failures are 500.
//!
//! # Example
//!
//! ```ignore
//! use thermolog_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::error;

use thermolog_store::{SortOrder, StoredReading, timestamp};

use crate::state::AppState;

/// Minute-resolution time of day used in responses.
const TIME_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]");

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/latest", get(latest))
        .route("/api/history", get(history))
        .route("/api/daily_history/{date}", get(daily_history))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// A stored reading as presented to clients.
///
/// Values are pre-formatted strings: `time` is `HH:MM`, `temp` has two
/// decimals and `humid` is an integer percentage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadingResponse {
    pub time: String,
    pub temp: String,
    pub humid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl ReadingResponse {
    /// Format a reading without its date.
    pub fn from_stored(reading: &StoredReading) -> Result<Self, AppError> {
        let time = reading
            .timestamp
            .format(TIME_FORMAT)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        Ok(Self {
            time,
            temp: format!("{:.2}", reading.temperature),
            humid: reading.humidity.to_string(),
            date: None,
        })
    }

    /// Format a reading including its `YYYY-MM-DD` date.
    pub fn with_date(reading: &StoredReading) -> Result<Self, AppError> {
        let date = reading
            .date()
            .format(timestamp::DATE_FORMAT)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        Ok(Self {
            date: Some(date),
            ..Self::from_stored(reading)?
        })
    }
}

/// Most recent reading.
async fn latest(State(state): State<Arc<AppState>>) -> Result<Json<ReadingResponse>, AppError> {
    let reading = state
        .store
        .lock()
        .await
        .latest()?
        .ok_or_else(|| AppError::NotFound("No sensor data found.".to_string()))?;

    Ok(Json(ReadingResponse::from_stored(&reading)?))
}

/// Query parameters for `/api/history`.
///
/// Both are taken as raw strings so that bad values produce the JSON error
/// body rather than the extractor's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of rows, a positive integer.
    pub limit: Option<String>,
    /// `asc` or `desc` (default).
    pub order: Option<String>,
}

impl HistoryQuery {
    /// Parse and validate the parameters.
    pub fn parse(&self) -> Result<(Option<u32>, SortOrder), AppError> {
        let order = match self.order.as_deref() {
            None => SortOrder::Descending,
            Some(text) => text.parse::<SortOrder>().map_err(|_| {
                AppError::BadRequest("Invalid order parameter. Use 'asc' or 'desc'.".to_string())
            })?,
        };

        let limit = match self.limit.as_deref() {
            None => None,
            Some(text) => match text.parse::<u32>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    return Err(AppError::BadRequest(
                        "Invalid limit parameter. Use a positive integer.".to_string(),
                    ));
                }
            },
        };

        Ok((limit, order))
    }
}

/// All readings, newest first unless `order=asc`, optionally limited.
async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ReadingResponse>>, AppError> {
    let (limit, order) = query.parse()?;

    let readings = state.store.lock().await.query_all(limit, order)?;

    let body = readings
        .iter()
        .map(ReadingResponse::with_date)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(body))
}

/// Readings for one calendar day, oldest first.
async fn daily_history(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
) -> Result<Json<Vec<ReadingResponse>>, AppError> {
    let day = timestamp::parse_date(&date)
        .map_err(|_| AppError::BadRequest("Invalid date format. Use YYYY-MM-DD.".to_string()))?;

    let readings = state
        .store
        .lock()
        .await
        .query_day(day, SortOrder::Ascending)?;

    if readings.is_empty() {
        return Err(AppError::NotFound(format!("No data found for {}.", date)));
    }

    let body = readings
        .iter()
        .map(ReadingResponse::with_date)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(body))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(thermolog_store::Error),
    Internal(String),
}

impl From<thermolog_store::Error> for AppError {
    fn from(e: thermolog_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => {
                error!("Store error while serving request: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error.".to_string(),
                )
            }
            AppError::Internal(msg) => {
                error!("Internal error while serving request: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error.".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
