use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "checked_at": Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "pending_reminders": state.engine.pending_reminders(),
        "actions": state.engine.actions().len(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{json_body, request, test_app};
    use axum::http::StatusCode;
    use tower::util::ServiceExt;

    #[tokio::test(start_paused = true)]
    async fn health_reports_engine_counters() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(request("GET", "/api/v1/health", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["pending_reminders"], 0);
        assert_eq!(body["actions"], 3);
    }
}
