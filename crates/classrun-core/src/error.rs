use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("{operation} timed out after {seconds} seconds")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<tungstenite::Error> for ExecError {
    fn from(err: tungstenite::Error) -> Self {
        ExecError::WebSocket(Box::new(err))
    }
}

impl ExecError {
    /// Short message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ExecError::Http(e) if e.is_connect() => {
                "Could not reach the execution service".to_string()
            }
            ExecError::Http(e) => e.to_string(),
            ExecError::Api(message) | ExecError::Rejected(message) => message.clone(),
            ExecError::WebSocket(e) => e.to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            ExecError::Timeout { .. } => true,
            ExecError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecError>;

/// Runs `fut` with an upper bound on its duration.
pub(crate) async fn with_deadline<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExecError::Timeout {
            operation,
            seconds: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let result: Result<()> = with_deadline("session start", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "session start timed out after 5 seconds");
    }

    #[tokio::test]
    async fn test_deadline_passes_result_through() {
        let result = with_deadline("stop", Duration::from_secs(5), async {
            Err::<(), _>(ExecError::Rejected("container not found".to_string()))
        })
        .await;

        assert_eq!(result.unwrap_err().user_message(), "container not found");
    }
}
