use super::engine_error_response;
use crate::server::AppState;
use axum::extract::Path;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetDurationRequest {
    seconds: u64,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/actions", get(list_actions))
        .route("/api/v1/actions/{action}/duration", put(set_duration))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_actions(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "actions": state.engine.actions() }))
}

#[tracing::instrument(level = "info", skip_all, fields(action = %action))]
async fn set_duration(
    Extension(state): Extension<Arc<AppState>>,
    Path(action): Path<String>,
    Json(req): Json<SetDurationRequest>,
) -> Response {
    match state.engine.set_action_duration(&action, req.seconds).await {
        Ok(name) => Json(serde_json::json!({
            "status": "ok",
            "action": name,
            "duration_seconds": req.seconds,
        }))
        .into_response(),
        Err(e) => engine_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{json_body, request, test_app};
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::util::ServiceExt;

    #[tokio::test(start_paused = true)]
    async fn lists_catalog_with_effective_durations() {
        let (app, _) = test_app().await;
        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                "/api/v1/actions/summon/duration",
                Some(json!({ "seconds": 900 })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", "/api/v1/actions", None))
            .await
            .expect("response");
        let body = json_body(response).await;
        let summon = body["actions"]
            .as_array()
            .expect("array")
            .iter()
            .find(|a| a["name"] == "summon")
            .expect("summon listed")
            .clone();
        assert_eq!(summon["default_duration_seconds"], 1800);
        assert_eq!(summon["effective_duration_seconds"], 900);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_zero_and_unknown() {
        let (app, _) = test_app().await;
        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                "/api/v1/actions/summon/duration",
                Some(json!({ "seconds": 0 })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(request(
                "PUT",
                "/api/v1/actions/daily/duration",
                Some(json!({ "seconds": 10 })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
