//! Client for the execution orchestrator's REST endpoints.

use crate::config::ApiConfig;
use crate::error::{ExecError, Result};
use async_trait::async_trait;
use classrun_proto::{
    AnalyzeRequest, AnalyzeResponse, BatchRequest, BatchResponse, BatchResult,
    StartSessionRequest, StartSessionResponse, StopSessionResponse,
};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// A session the orchestrator has accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedSession {
    pub container_id: String,
    pub language: Option<String>,
}

/// Remote operations the session controller, summarizer and batch client
/// depend on.
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    /// `POST /execute-interactive`
    async fn start_session(&self, request: &StartSessionRequest) -> Result<StartedSession>;

    /// `POST /stop/{containerId}`
    async fn stop_session(&self, container_id: &str) -> Result<()>;

    /// `POST /analyze-output`. The raw response is returned so the caller
    /// decides what counts as a usable report.
    async fn analyze_output(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse>;

    /// `POST /execute`
    async fn execute_batch(&self, request: &BatchRequest) -> Result<BatchResult>;
}

/// `OrchestratorApi` over HTTP.
pub struct HttpOrchestrator {
    client: Client,
    config: ApiConfig,
}

impl HttpOrchestrator {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    async fn post_json<B, R>(&self, operation: &str, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.config.endpoint(path)?;
        debug!("POST {} ({})", url, operation);

        let response = self
            .client
            .post(url)
            .header("accept", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExecError::Api(format!(
                "Failed to {}: {} - {}",
                operation, status, body
            )));
        }

        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl OrchestratorApi for HttpOrchestrator {
    async fn start_session(&self, request: &StartSessionRequest) -> Result<StartedSession> {
        info!("Requesting interactive session for submission {}", request.submission_id);

        let response: StartSessionResponse = self
            .post_json("start session", "execute-interactive", request)
            .await?;

        if !response.success {
            return Err(ExecError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| "The execution service refused to start a session".to_string()),
            ));
        }

        let container_id = response
            .container_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ExecError::Api("Start response is missing containerId".to_string()))?;

        info!("Session started in container {}", container_id);
        Ok(StartedSession {
            container_id,
            language: response.language.filter(|l| !l.is_empty()),
        })
    }

    async fn stop_session(&self, container_id: &str) -> Result<()> {
        info!("Stopping container {}", container_id);

        // The container id is untrusted input; encode it as a single segment.
        let mut url = self.config.endpoint("stop")?;
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(container_id);
        }
        debug!("POST {} (stop session)", url);

        let response = self
            .client
            .post(url)
            .header("accept", "application/json")
            .json(&serde_json::json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExecError::Api(format!(
                "Failed to stop session: {} - {}",
                status, body
            )));
        }

        let stop: StopSessionResponse = response.json().await?;
        if stop.success {
            Ok(())
        } else {
            Err(ExecError::Rejected(
                stop.message
                    .unwrap_or_else(|| "The execution service could not stop the session".to_string()),
            ))
        }
    }

    async fn analyze_output(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse> {
        info!(
            "Submitting {} bytes of terminal output for analysis ({})",
            request.terminal_log.len(),
            request.language_hint
        );
        self.post_json("analyze output", "analyze-output", request)
            .await
    }

    async fn execute_batch(&self, request: &BatchRequest) -> Result<BatchResult> {
        info!(
            "Submitting {} file(s) for batch execution ({})",
            request.files.len(),
            request.language
        );

        let response: BatchResponse = self.post_json("execute batch", "execute", request).await?;
        if !response.success {
            return Err(ExecError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| "Execution failed".to_string()),
            ));
        }

        response
            .result
            .ok_or_else(|| ExecError::Api("Execute response is missing result".to_string()))
    }
}
