use std::{future::Future, sync::Arc};

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    clients::health::HealthChecker,
    models::{
        health::HealthStatus, outcome::DispatchOutcome, request::DispatchRequest,
        response::ApiResponse,
    },
    services::dispatcher::Dispatcher,
};

const DEFAULT_LOG_LIMIT: i64 = 50;

pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    health_checker: HealthChecker,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub user_id: Option<String>,
    pub limit: Option<i64>,
}

/// Operator-facing routes: health, synthetic test, stats, logs and replay.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    let state = Arc::new(AppState {
        health_checker: HealthChecker::new(Arc::clone(&dispatcher)),
        dispatcher,
    });

    Router::new()
        .route("/health", get(health_check))
        .route("/automation/dispatch", post(dispatch))
        .route("/automation/test", post(send_test))
        .route("/automation/stats", get(stats))
        .route("/automation/logs", get(logs))
        .route("/automation/replay", post(replay))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server<F>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: F,
) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(address = %listener.local_addr()?, "Admin API server started");

    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.health_checker.report().await;

    let status_code = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(report))
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DispatchRequest>,
) -> impl IntoResponse {
    let outcome = state.dispatcher.dispatch_outcome(request).await;

    let status_code = match outcome {
        DispatchOutcome::Sent => StatusCode::OK,
        DispatchOutcome::Deferred => StatusCode::ACCEPTED,
        DispatchOutcome::Rejected => StatusCode::BAD_REQUEST,
        DispatchOutcome::Throttled => StatusCode::TOO_MANY_REQUESTS,
        DispatchOutcome::ConsentRefused => StatusCode::FORBIDDEN,
        DispatchOutcome::Failed => StatusCode::BAD_GATEWAY,
        DispatchOutcome::Disabled => StatusCode::SERVICE_UNAVAILABLE,
    };

    let body = match outcome {
        DispatchOutcome::Sent | DispatchOutcome::Deferred => {
            ApiResponse::success(outcome, "Webhook processed successfully".to_string())
        }
        _ => ApiResponse::error(
            outcome.to_string(),
            "Webhook processing failed".to_string(),
        ),
    };

    (status_code, Json(body))
}

async fn send_test(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.dispatcher.send_test().await;

    if report.success {
        (
            StatusCode::OK,
            Json(ApiResponse::success(report, "Test webhook successful".to_string())),
        )
    } else {
        let error = report.error.clone().unwrap_or_else(|| report.message.clone());
        (
            StatusCode::BAD_GATEWAY,
            Json(
                ApiResponse::error(error, "Test webhook failed".to_string()).with_data(report),
            ),
        )
    }
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let summary = state.dispatcher.summary().await;

    Json(ApiResponse::success(
        summary,
        "Automation stats retrieved".to_string(),
    ))
}

async fn logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);

    match state
        .dispatcher
        .recent_logs(query.user_id.as_deref(), limit)
        .await
    {
        Ok(entries) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                entries,
                "Delivery logs retrieved".to_string(),
            )),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(
                e.to_string(),
                "Failed to fetch delivery logs".to_string(),
            )),
        ),
    }
}

async fn replay(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.dispatcher.drain().await;

    Json(ApiResponse::success(report, "Replay pass completed".to_string()))
}
