//! HTTP control and reporting surface.
//!
//! Runs on WEB_PORT (default 8080) next to the polling dispatcher. `/api/*` requires
//! `Authorization: Bearer <ADMIN_API_TOKEN>` when the token is configured.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tryoncore::core::metrics;
use tryoncore::storage::{surveys, DateFilter};
use tryoncore::{get_connection, AppError};

/// Shared state for the web server.
#[derive(Clone)]
pub struct WebState {
    bot: tryoncore::Router,
    admin_token: Option<Arc<str>>,
    start_time: Instant,
}

impl WebState {
    pub fn new(bot: tryoncore::Router, admin_token: Option<String>) -> Self {
        Self {
            bot,
            admin_token: admin_token.map(Arc::from),
            start_time: Instant::now(),
        }
    }
}

pub fn create_router(state: WebState) -> Router {
    let api = Router::new()
        .route("/metrics", get(report_handler))
        .route("/profiles", get(profiles_handler))
        .route("/surveys", get(surveys_handler))
        .route("/gift", post(gift_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api)
        .with_state(state)
}

/// Start the HTTP server.
pub async fn start_web_server(port: u16, state: WebState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = create_router(state);

    log::info!("Starting web server on http://{}", addr);
    log::info!("  /health        - Health check");
    log::info!("  /metrics       - Prometheus metrics");
    log::info!("  /api/metrics   - Analytics report (?filter=7d)");
    log::info!("  /api/profiles  - User profiles");
    log::info!("  /api/surveys   - Survey responses");
    log::info!("  /api/gift      - Grant credits (POST)");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn require_token(State(state): State<WebState>, request: Request, next: Next) -> Response {
    if let Some(expected) = state.admin_token.as_deref() {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected) {
            return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
        }
    }
    next.run(request).await
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn internal_error(context: &str, e: &AppError) -> Response {
    log::error!("{}: {}", context, e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}

/// GET /health
async fn health_handler(State(state): State<WebState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /metrics (Prometheus text format)
async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok((content_type, body)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    filter: Option<String>,
}

/// GET /api/metrics?filter=7d
async fn report_handler(State(state): State<WebState>, Query(query): Query<ReportQuery>) -> Response {
    let filter = match query.filter.as_deref().map(str::parse::<DateFilter>) {
        None => DateFilter::default(),
        Some(Ok(filter)) => filter,
        Some(Err(message)) => return error_response(StatusCode::BAD_REQUEST, &message),
    };
    match state.bot.analytics().report(filter) {
        Ok(report) => Json(report).into_response(),
        Err(e) => internal_error("Failed to build report", &e),
    }
}

/// GET /api/profiles
async fn profiles_handler(State(state): State<WebState>) -> Response {
    match state.bot.analytics().profiles() {
        Ok(profiles) => Json(profiles).into_response(),
        Err(e) => internal_error("Failed to list profiles", &e),
    }
}

/// GET /api/surveys
async fn surveys_handler(State(state): State<WebState>) -> Response {
    let responses = get_connection(state.bot.machine().pool())
        .map_err(AppError::from)
        .and_then(|conn| surveys::list_survey_responses(&conn));
    match responses {
        Ok(responses) => Json(responses).into_response(),
        Err(e) => internal_error("Failed to list surveys", &e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GiftRequest {
    chat_id: i64,
    amount: i64,
}

/// POST /api/gift {"chatId": 1, "amount": 30}
async fn gift_handler(State(state): State<WebState>, Json(request): Json<GiftRequest>) -> Response {
    match state.bot.machine().get(request.chat_id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "User not found"),
        Err(e) => return internal_error("Failed to load session", &e),
    }
    if request.amount <= 0 {
        return error_response(StatusCode::BAD_REQUEST, "Amount must be positive");
    }

    match state.bot.gift(request.chat_id, request.amount).await {
        Ok(Some(balance)) => {
            log::info!("Admin gift: chat {} +{} credits", request.chat_id, request.amount);
            Json(json!({ "success": true, "newCredits": balance })).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, "User not found"),
        Err(e) => internal_error("Failed to gift credits", &e),
    }
}
