use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The platform refused the request for this recipient (closed DMs,
    /// missing channel permissions).
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("http status={status} body={body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway error: {0}")]
    Gateway(String),

    /// Closed with a code that reconnecting cannot fix (bad token, intents).
    #[error("gateway rejected the session: code={code} reason={reason}")]
    GatewayRejected { code: u16, reason: String },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("inbound queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
