//! Orchestrator double with scripted responses.

use super::lock;
use crate::api::{OrchestratorApi, StartedSession};
use crate::error::Result;
use async_trait::async_trait;
use classrun_proto::{AnalyzeRequest, AnalyzeResponse, BatchRequest, BatchResult, StartSessionRequest};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// A recorded call, in the order it was made.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Start(StartSessionRequest),
    Stop(String),
    Analyze {
        terminal_log: String,
        language_hint: String,
    },
    Batch(BatchRequest),
}

#[derive(Default)]
struct Script {
    starts: VecDeque<Result<StartedSession>>,
    stops: VecDeque<Result<()>>,
    analyses: VecDeque<Result<AnalyzeResponse>>,
    batches: VecDeque<Result<BatchResult>>,
    start_delay: Duration,
    stop_delay: Duration,
    analyze_delay: Duration,
    calls: Vec<ApiCall>,
}

/// Returns queued responses in order, falling back to a successful default
/// when a queue is empty:
/// - start: container `container-1` running python
/// - stop: success
/// - analysis: one `main.py` entry with status Success
/// - batch: an empty result with exit code 0
///
/// Delays are applied after the call is recorded.
#[derive(Default)]
pub struct ScriptedOrchestrator {
    script: Mutex<Script>,
}

impl ScriptedOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_start(&self, response: Result<StartedSession>) {
        lock(&self.script).starts.push_back(response);
    }

    pub fn push_stop(&self, response: Result<()>) {
        lock(&self.script).stops.push_back(response);
    }

    pub fn push_analysis(&self, response: Result<AnalyzeResponse>) {
        lock(&self.script).analyses.push_back(response);
    }

    pub fn push_batch(&self, response: Result<BatchResult>) {
        lock(&self.script).batches.push_back(response);
    }

    pub fn set_start_delay(&self, delay: Duration) {
        lock(&self.script).start_delay = delay;
    }

    pub fn set_stop_delay(&self, delay: Duration) {
        lock(&self.script).stop_delay = delay;
    }

    pub fn set_analyze_delay(&self, delay: Duration) {
        lock(&self.script).analyze_delay = delay;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        lock(&self.script).calls.clone()
    }

    /// Container ids passed to `stop_session`, in order.
    pub fn stopped(&self) -> Vec<String> {
        lock(&self.script)
            .calls
            .iter()
            .filter_map(|call| match call {
                ApiCall::Stop(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Transcripts passed to `analyze_output`, in order.
    pub fn analyzed(&self) -> Vec<String> {
        lock(&self.script)
            .calls
            .iter()
            .filter_map(|call| match call {
                ApiCall::Analyze { terminal_log, .. } => Some(terminal_log.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ApiCall) {
        lock(&self.script).calls.push(call);
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn default_analysis() -> AnalyzeResponse {
    AnalyzeResponse {
        success: true,
        analysis: Some(serde_json::json!([{ "fileName": "main.py", "status": "Success" }])),
        message: None,
    }
}

#[async_trait]
impl OrchestratorApi for ScriptedOrchestrator {
    async fn start_session(&self, request: &StartSessionRequest) -> Result<StartedSession> {
        self.record(ApiCall::Start(request.clone()));
        let (response, delay) = {
            let mut script = lock(&self.script);
            (script.starts.pop_front(), script.start_delay)
        };
        pause(delay).await;
        response.unwrap_or_else(|| {
            Ok(StartedSession {
                container_id: "container-1".to_string(),
                language: Some("python".to_string()),
            })
        })
    }

    async fn stop_session(&self, container_id: &str) -> Result<()> {
        self.record(ApiCall::Stop(container_id.to_string()));
        let (response, delay) = {
            let mut script = lock(&self.script);
            (script.stops.pop_front(), script.stop_delay)
        };
        pause(delay).await;
        response.unwrap_or(Ok(()))
    }

    async fn analyze_output(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse> {
        self.record(ApiCall::Analyze {
            terminal_log: request.terminal_log.clone(),
            language_hint: request.language_hint.clone(),
        });
        let (response, delay) = {
            let mut script = lock(&self.script);
            (script.analyses.pop_front(), script.analyze_delay)
        };
        pause(delay).await;
        response.unwrap_or_else(|| Ok(default_analysis()))
    }

    async fn execute_batch(&self, request: &BatchRequest) -> Result<BatchResult> {
        self.record(ApiCall::Batch(request.clone()));
        let response = lock(&self.script).batches.pop_front();
        response.unwrap_or_else(|| {
            Ok(BatchResult {
                exit_code: Some(0),
                ..BatchResult::default()
            })
        })
    }
}
