//! HTTP control surface for the dashboard.
//!
//! Read endpoints expose engine state as JSON; command endpoints drive
//! start/stop and manual trades. All state flows through the shared engine
//! handle, so the dashboard never holds its own trading state.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::application::engine::{
    EngineStatus, MarketView, OrderbookView, PositionView, TradingEngine,
};
use crate::domain::entities::position::{Position, Side};
use crate::domain::errors::{EngineError, PositionError};
use crate::domain::services::position_manager::ClosedPosition;
use crate::persistence::store::PerformanceSummary;

#[derive(Debug, Serialize)]
pub struct ApiMessage {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenRequest {
    pub side: String,
}

type ApiError = (StatusCode, Json<ApiMessage>);

fn api_error(status: StatusCode, message: String) -> ApiError {
    (
        status,
        Json(ApiMessage {
            success: false,
            message,
        }),
    )
}

fn engine_error(error: EngineError) -> ApiError {
    let status = match &error {
        EngineError::AlreadyRunning | EngineError::NotRunning => StatusCode::CONFLICT,
        EngineError::NoMarketData => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Strategy(_) => StatusCode::BAD_REQUEST,
        EngineError::Position(PositionError::Exchange(_)) => StatusCode::BAD_GATEWAY,
        EngineError::Position(PositionError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::Position(_) => StatusCode::CONFLICT,
    };
    api_error(status, error.to_string())
}

pub fn router(engine: Arc<TradingEngine>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/market", get(market))
        .route("/orderbook", get(orderbook))
        .route("/position", get(position))
        .route("/summary", get(summary))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/open", post(open))
        .route("/close", post(close))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn status(State(engine): State<Arc<TradingEngine>>) -> Json<EngineStatus> {
    Json(engine.status().await)
}

async fn market(State(engine): State<Arc<TradingEngine>>) -> Json<MarketView> {
    Json(engine.market_view().await)
}

async fn orderbook(State(engine): State<Arc<TradingEngine>>) -> Json<OrderbookView> {
    Json(engine.orderbook().await)
}

async fn position(State(engine): State<Arc<TradingEngine>>) -> Json<Option<PositionView>> {
    Json(engine.position().await)
}

async fn summary(
    State(engine): State<Arc<TradingEngine>>,
) -> Result<Json<PerformanceSummary>, ApiError> {
    engine.summary().await.map(Json).map_err(engine_error)
}

async fn start(State(engine): State<Arc<TradingEngine>>) -> Result<Json<ApiMessage>, ApiError> {
    engine.start().await.map_err(engine_error)?;
    Ok(Json(ApiMessage {
        success: true,
        message: "Trading bot started".to_string(),
    }))
}

async fn stop(State(engine): State<Arc<TradingEngine>>) -> Result<Json<ApiMessage>, ApiError> {
    engine.stop().map_err(engine_error)?;
    Ok(Json(ApiMessage {
        success: true,
        message: "Stop signal sent".to_string(),
    }))
}

async fn open(
    State(engine): State<Arc<TradingEngine>>,
    Json(request): Json<OpenRequest>,
) -> Result<Json<Position>, ApiError> {
    let side = Side::parse(&request.side)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    engine
        .manual_open(side)
        .await
        .map(Json)
        .map_err(engine_error)
}

async fn close(
    State(engine): State<Arc<TradingEngine>>,
) -> Result<Json<ClosedPosition>, ApiError> {
    engine.manual_close().await.map(Json).map_err(engine_error)
}
