use crate::config::CooldownKeeperConfig;
use axum::Json;
use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Read-only routes are open; mutating routes need the configured bearer
/// token and are refused outright when none is configured.
#[derive(Debug, Clone, Default)]
pub struct MutatingAuthPolicy {
    pub admin_token: Option<String>,
}

impl MutatingAuthPolicy {
    pub fn from_config(cfg: &CooldownKeeperConfig) -> Self {
        Self {
            admin_token: cfg
                .http
                .admin_token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MutatingAuthPolicyExt(pub MutatingAuthPolicy);

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn parse_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = raw.trim().splitn(2, char::is_whitespace);
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// Constant-time over the longer of the two inputs.
fn tokens_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

fn unauthorized(code: &str, message: impl Into<String>) -> Response {
    let message = message.into();
    tracing::warn!(error_code = code, error = %message, "mutating auth rejected");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "status": "error",
            "error": message,
            "error_code": code,
        })),
    )
        .into_response()
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn require_mutating_auth(req: Request<Body>, next: Next) -> Response {
    if !is_mutating(req.method()) {
        return next.run(req).await;
    }

    let policy = req
        .extensions()
        .get::<MutatingAuthPolicyExt>()
        .map(|v| v.0.clone())
        .unwrap_or_default();
    let Some(expected) = policy.admin_token.as_deref() else {
        return unauthorized(
            "missing_admin_token_config",
            "mutating requests require http.admin_token",
        );
    };
    let Some(provided) = parse_bearer_token(req.headers()) else {
        return unauthorized("missing_bearer_token", "missing bearer token");
    };
    if !tokens_match(&provided, expected) {
        return unauthorized("invalid_bearer_token", "invalid bearer token");
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::to_bytes;
    use axum::extract::Extension;
    use axum::middleware;
    use axum::routing::{get, put};
    use tower::util::ServiceExt;

    fn build_auth_test_router(policy: MutatingAuthPolicy) -> Router {
        Router::new()
            .route(
                "/api/v1/actions",
                get(|| async { Json(json!({ "status": "ok" })) }),
            )
            .route(
                "/api/v1/actions/summon/duration",
                put(|| async { Json(json!({ "status": "ok" })) }),
            )
            .layer(middleware::from_fn(require_mutating_auth))
            .layer(Extension(MutatingAuthPolicyExt(policy)))
    }

    fn put_request(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("PUT")
            .uri("/api/v1/actions/summon/duration");
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth);
        }
        builder.body(Body::empty()).expect("request")
    }

    async fn response_body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        serde_json::from_slice(&body).expect("response json")
    }

    fn policy(token: &str) -> MutatingAuthPolicy {
        MutatingAuthPolicy {
            admin_token: Some(token.to_string()),
        }
    }

    #[test]
    fn parse_bearer_token_accepts_case_insensitive_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "bEaReR  abc ".parse().expect("header"));
        assert_eq!(parse_bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert(AUTHORIZATION, "Basic abc".parse().expect("header"));
        assert_eq!(parse_bearer_token(&headers), None);
    }

    #[test]
    fn tokens_match_requires_exact_equality() {
        assert!(tokens_match("secret", "secret"));
        assert!(!tokens_match("secret", "secret2"));
        assert!(!tokens_match("", "secret"));
        assert!(!tokens_match("Secret", "secret"));
    }

    #[test]
    fn blank_config_token_counts_as_unset() {
        let mut cfg = CooldownKeeperConfig::default();
        cfg.http.admin_token = Some("   ".to_string());
        assert!(MutatingAuthPolicy::from_config(&cfg).admin_token.is_none());
    }

    #[tokio::test]
    async fn reads_are_open() {
        let app = build_auth_test_router(MutatingAuthPolicy::default());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/actions")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn mutating_refused_without_configured_token() {
        let app = build_auth_test_router(MutatingAuthPolicy::default());
        let response = app
            .oneshot(put_request(Some("Bearer anything")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response_body_json(response).await;
        assert_eq!(body["error_code"], "missing_admin_token_config");
    }

    #[tokio::test]
    async fn mutating_rejects_missing_and_wrong_tokens() {
        let app = build_auth_test_router(policy("secret"));
        let response = app.clone().oneshot(put_request(None)).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response_body_json(response).await["error_code"], "missing_bearer_token");

        let response = app
            .oneshot(put_request(Some("Bearer nope")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response_body_json(response).await["error_code"], "invalid_bearer_token");
    }

    #[tokio::test]
    async fn mutating_allows_valid_token() {
        let app = build_auth_test_router(policy("secret"));
        let response = app
            .oneshot(put_request(Some("Bearer secret")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
