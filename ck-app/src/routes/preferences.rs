use crate::server::AppState;
use axum::extract::Path;
use axum::routing::get;
use axum::{Extension, Json};
use ck_engine::OperatorId;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetPreferenceRequest {
    deliver_direct: bool,
}

pub fn router() -> axum::Router {
    axum::Router::new().route(
        "/api/v1/operators/{id}/preference",
        get(get_preference).put(set_preference),
    )
}

#[tracing::instrument(level = "debug", skip_all, fields(operator = %id))]
async fn get_preference(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let operator = OperatorId::new(id);
    let pref = state.engine.delivery_preference(&operator);
    Json(serde_json::json!({ "operator": operator, "deliver_direct": pref.deliver_direct }))
}

#[tracing::instrument(level = "info", skip_all, fields(operator = %id))]
async fn set_preference(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetPreferenceRequest>,
) -> Json<serde_json::Value> {
    let operator = OperatorId::new(id);
    let pref = state
        .engine
        .set_delivery_preference(&operator, req.deliver_direct)
        .await;
    Json(serde_json::json!({
        "status": "ok",
        "operator": operator,
        "deliver_direct": pref.deliver_direct,
    }))
}
