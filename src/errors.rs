use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures of the record store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Outcome of a key operation that is not a success.
///
/// Business outcomes (`InvalidRequest`, `ValueTooLarge`, `Conflict`,
/// `NotFound`) map 1:1 to 4xx codes. `Storage` is always rendered as a
/// generic 500 and its detail only goes to the log.
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Value too large ({len} > {max})")]
    ValueTooLarge { len: usize, max: usize },

    #[error("Key with this name already exists")]
    Conflict,

    /// Also returned when a read-only key is used for a write.
    #[error("Key with this name does not exist")]
    NotFound,

    #[error("Rate limit exceeded, retry in {retry_after} seconds")]
    TooManyRequests { retry_after: u64 },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type KeyResult<T> = Result<T, KeyError>;

impl KeyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            KeyError::InvalidRequest(_) | KeyError::ValueTooLarge { .. } => {
                StatusCode::BAD_REQUEST
            }
            KeyError::Conflict => StatusCode::CONFLICT,
            KeyError::NotFound => StatusCode::NOT_FOUND,
            KeyError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            KeyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for KeyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            KeyError::Storage(e) => {
                tracing::error!("storage failure: {e}");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if let KeyError::TooManyRequests { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}

/// Invalid or unreadable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config.json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("invalid interval {0:?} (expected e.g. \"30 days\" or a number of seconds)")]
    Interval(String),

    #[error("{0}")]
    Invalid(String),
}
