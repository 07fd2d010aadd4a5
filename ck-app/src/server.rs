//! cooldown-keeper service wiring.
//!
//! Starts the engine against the state file, connects the Discord adapter and
//! gateway, and optionally mounts the admin HTTP API.

use crate::config::CooldownKeeperConfig;
use crate::delivery::{ChannelDelivery, DisabledDelivery};
use crate::gateway::Gateway;
use crate::http_auth;
use crate::routes;
use anyhow::Result;
use axum::Extension;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use axum::response::Response;
use chrono::Utc;
use ck_channels::{ChannelAdapter, DiscordAdapter};
use ck_engine::{
    CooldownEngine, DeliveryTransport, JsonFileBackend, StateBackend, messages::format_duration,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const INBOUND_QUEUE_CAPACITY: usize = 1024;

pub struct AppState {
    pub engine: Arc<CooldownEngine>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(engine: Arc<CooldownEngine>) -> Self {
        Self {
            engine,
            started_at: Instant::now(),
        }
    }
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = CooldownKeeperConfig::load_with_path(config_path).await?;
    let settings = cfg.engine_settings();
    let state_file = cfg.state_file_path()?;
    for spec in &settings.actions {
        tracing::info!(
            action = %spec.name,
            display_name = %spec.display_name,
            duration = %format_duration(Duration::from_secs(spec.duration_seconds)),
            triggers = ?spec.triggers,
            titles = ?spec.titles,
            "action configured"
        );
    }

    let backend = JsonFileBackend::new(&state_file);
    let snapshot = backend
        .load()
        .await
        .map_err(|e| anyhow::anyhow!("state file {}: {e}", state_file.display()))?;
    tracing::info!(
        config_path = %path.display(),
        state_file = %state_file.display(),
        state_present = snapshot.is_some(),
        persisted_cooldowns = snapshot.as_ref().map_or(0, |s| s.cooldowns.len()),
        discord_enabled = cfg.discord.enabled,
        watched_bot_id = %cfg.discord.watched_bot_id,
        http_enabled = cfg.http.enabled,
        already_active = ?cfg.notifications.already_active,
        "config ok"
    );
    Ok(())
}

/// Offline view of the persisted state; does not contact Discord.
pub async fn status(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = CooldownKeeperConfig::load_with_path(config_path).await?;
    let state_file = cfg.state_file_path()?;
    let backend = JsonFileBackend::new(&state_file);
    let Some(snapshot) = backend
        .load()
        .await
        .map_err(|e| anyhow::anyhow!("state file {}: {e}", state_file.display()))?
    else {
        tracing::info!(
            config_path = %path.display(),
            state_file = %state_file.display(),
            "no saved state"
        );
        return Ok(());
    };

    let now = Utc::now();
    let (live, expired) = snapshot.live_entries(now);
    for (key, entry) in &live {
        let remaining = (entry.expires_at - now).to_std().unwrap_or_default();
        tracing::info!(
            operator = %key.operator,
            action = %key.action,
            remaining = %format_duration(remaining),
            expires_at = %entry.expires_at,
            "active cooldown"
        );
    }
    tracing::info!(
        config_path = %path.display(),
        state_file = %state_file.display(),
        active = live.len(),
        expired,
        preferences = snapshot.preferences.len(),
        duration_overrides = snapshot.duration_overrides.len(),
        "status ok"
    );
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = CooldownKeeperConfig::load_with_path(config_path).await?;
    let cfg = Arc::new(cfg);
    let state_file = cfg.state_file_path()?;
    tracing::info!(
        config_path = %cfg_path.display(),
        state_file = %state_file.display(),
        discord_enabled = cfg.discord.enabled,
        watched_bot_id = %cfg.discord.watched_bot_id,
        command_prefix = %cfg.discord.command_prefix,
        admin_count = cfg.discord.admin_user_ids.len(),
        already_active = ?cfg.notifications.already_active,
        sweep_interval_seconds = cfg.engine.sweep_interval_seconds,
        sweep_grace_seconds = cfg.engine.sweep_grace_seconds,
        http_enabled = cfg.http.enabled,
        http_bind_addr = %cfg.http.bind_addr,
        http_timeout_seconds = cfg.http.timeout_seconds,
        http_max_in_flight = cfg.http.max_in_flight,
        "server configuration loaded"
    );

    // Bind before anything is started so a taken port fails fast.
    let listener = if cfg.http.enabled {
        Some(preflight_bind_listener(cfg.http_bind_addr()?).await?)
    } else {
        None
    };

    let adapter: Option<Arc<dyn ChannelAdapter>> = if cfg.discord.enabled {
        let discord = DiscordAdapter::new(cfg.discord.bot_token.trim())?
            .with_gateway_intents(cfg.discord.gateway_intents);
        Some(Arc::new(discord))
    } else {
        tracing::warn!("discord disabled; no events will be observed and reminders cannot be delivered");
        None
    };
    let transport: Arc<dyn DeliveryTransport> = match &adapter {
        Some(adapter) => Arc::new(ChannelDelivery::new(adapter.clone())),
        None => Arc::new(DisabledDelivery),
    };

    let engine = Arc::new(
        CooldownEngine::start(
            cfg.engine_settings(),
            transport,
            Arc::new(JsonFileBackend::new(&state_file)),
        )
        .await,
    );

    let shutdown = CancellationToken::new();
    let gateway_handle = match &adapter {
        Some(adapter) => Some(start_gateway(cfg.clone(), engine.clone(), adapter.clone(), &shutdown).await?),
        None => None,
    };

    match listener {
        Some(listener) => serve_http(&cfg, engine.clone(), listener, shutdown.clone()).await?,
        None => shutdown_signal(shutdown.clone()).await,
    }

    shutdown.cancel();
    if let Some(handle) = gateway_handle {
        match handle.await {
            Ok(()) => tracing::info!("gateway shutdown completed"),
            Err(e) => tracing::error!(error = %e, "gateway task join failed during shutdown"),
        }
    }
    engine.shutdown().await;
    tracing::info!("cooldown-keeper stopped");
    Ok(())
}

async fn start_gateway(
    cfg: Arc<CooldownKeeperConfig>,
    engine: Arc<CooldownEngine>,
    adapter: Arc<dyn ChannelAdapter>,
    shutdown: &CancellationToken,
) -> Result<JoinHandle<()>> {
    let (tx, rx) = tokio::sync::mpsc::channel(INBOUND_QUEUE_CAPACITY);
    adapter
        .start(tx)
        .await
        .map_err(|e| anyhow::anyhow!("start channel {}: {e}", adapter.channel_id()))?;
    tracing::info!(channel = adapter.channel_id(), "channel adapter started");
    let gateway = Arc::new(Gateway::new(cfg, engine, adapter, rx));
    Ok(gateway.start(shutdown.child_token()))
}

async fn serve_http(
    cfg: &CooldownKeeperConfig,
    engine: Arc<CooldownEngine>,
    listener: tokio::net::TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    let auth_policy = http_auth::MutatingAuthPolicy::from_config(cfg);
    if auth_policy.admin_token.is_none() {
        tracing::warn!("http.admin_token is not set; mutating admin routes will be refused");
    }
    let state = Arc::new(AppState::new(engine));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router()
        .layer(axum::middleware::from_fn(http_auth::require_mutating_auth))
        .layer(Extension(http_auth::MutatingAuthPolicyExt(auth_policy)))
        .layer(Extension(state))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.http.max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.http.timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let addr = listener.local_addr()?;
    tracing::info!(%addr, "admin api serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;
    tracing::info!("http server shutdown completed");
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_falls_back_to_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id_from_headers(&headers), "missing");
        headers.insert("x-request-id", "abc".parse().expect("header"));
        assert_eq!(request_id_from_headers(&headers), "abc");
    }

    #[tokio::test]
    async fn preflight_bind_reports_taken_port() {
        let first = preflight_bind_listener("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind");
        let addr = first.local_addr().expect("local addr");
        let err = preflight_bind_listener(addr).await.expect_err("port in use");
        assert!(err.to_string().contains("preflight bind failed"));
    }

    #[tokio::test]
    async fn status_without_state_file_is_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("config.toml");
        let state_path = dir.path().join("state.json");
        std::fs::write(
            &config_path,
            format!(
                "[general]\nstate_file = {:?}\n[discord]\nenabled = false\n",
                state_path.display().to_string()
            ),
        )
        .expect("write config");
        status(Some(config_path.clone())).await.expect("status");
        doctor(Some(config_path)).await.expect("doctor");
    }
}
