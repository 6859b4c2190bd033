use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Failed to connect to the API server: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Stream read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unexpected response body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("The conversation has grown too long for the model. Start a new room or reset this one.")]
    ContextLengthExceeded,
    #[error("API request limit exceeded.\nCheck that billing information is registered on your OpenAI account.")]
    RateLimited,
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("No API key set. Use `key <token>` to add one.")]
    MissingApiKey,
    #[error("A message is already being sent")]
    Busy,
    #[error("Nothing to resend")]
    NothingToResend,
    #[error("No room with id {0}")]
    UnknownRoom(u64),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Could not determine a data directory")]
    NoDataDir,
    #[error("Storage I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not serialize '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
