use super::engine_error_response;
use crate::server::AppState;
use axum::extract::Path;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Extension, Json};
use ck_engine::OperatorId;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/operators/{id}/cooldowns", get(list_cooldowns))
        .route(
            "/api/v1/operators/{id}/cooldowns/{action}",
            delete(clear_cooldown),
        )
}

#[tracing::instrument(level = "debug", skip_all, fields(operator = %id))]
async fn list_cooldowns(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let operator = OperatorId::new(id);
    let cooldowns: Vec<serde_json::Value> = state
        .engine
        .active_cooldowns(&operator)
        .into_iter()
        .map(|c| {
            serde_json::json!({
                "action": c.action,
                "display_name": state.engine.display_name(&c.action),
                "remaining_seconds": c.remaining_seconds,
            })
        })
        .collect();
    Json(serde_json::json!({ "operator": operator, "cooldowns": cooldowns }))
}

#[tracing::instrument(level = "info", skip_all, fields(operator = %id, action = %action))]
async fn clear_cooldown(
    Extension(state): Extension<Arc<AppState>>,
    Path((id, action)): Path<(String, String)>,
) -> Response {
    let operator = OperatorId::new(id);
    match state.engine.clear_cooldown(&operator, &action).await {
        Ok(cleared) => Json(serde_json::json!({
            "status": if cleared { "ok" } else { "not_found" },
            "cleared": cleared,
        }))
        .into_response(),
        Err(e) => engine_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{json_body, request, test_app};
    use axum::http::StatusCode;
    use ck_engine::{ObservedEvent, OperatorId};
    use tower::util::ServiceExt;

    #[tokio::test(start_paused = true)]
    async fn list_then_clear() {
        let (app, state) = test_app().await;
        state
            .engine
            .handle_event(ObservedEvent {
                trigger: Some("premium-pack".to_string()),
                operator: Some(OperatorId::new("42")),
                summary: Some("You opened a Premium Pack".to_string()),
                ..ObservedEvent::default()
            })
            .await;

        let response = app
            .clone()
            .oneshot(request("GET", "/api/v1/operators/42/cooldowns", None))
            .await
            .expect("response");
        let body = json_body(response).await;
        assert_eq!(body["cooldowns"][0]["action"], "premium-pack");
        assert_eq!(body["cooldowns"][0]["display_name"], "Premium Pack");
        assert_eq!(body["cooldowns"][0]["remaining_seconds"], 60);

        let response = app
            .clone()
            .oneshot(request("DELETE", "/api/v1/operators/42/cooldowns/Premium%20Pack", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["cleared"], true);
        assert!(state.engine.active_cooldowns(&OperatorId::new("42")).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_unknown_action_is_not_found() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(request("DELETE", "/api/v1/operators/42/cooldowns/daily", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
