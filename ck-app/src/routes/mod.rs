pub mod actions;
pub mod cooldowns;
pub mod health;
pub mod preferences;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ck_engine::EngineError;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(cooldowns::router())
        .merge(preferences::router())
        .merge(actions::router())
}

fn engine_error_response(error: EngineError) -> Response {
    let status = match &error {
        EngineError::UnknownAction(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        EngineError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "status": "error", "error": error.to_string() })),
    )
        .into_response()
}
