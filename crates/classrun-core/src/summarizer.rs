//! Transcript summarization through the analysis endpoint.

use crate::api::OrchestratorApi;
use crate::error::with_deadline;
use classrun_proto::{AnalyzeRequest, ExecutionSummary, FileReport};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const UNKNOWN_LANGUAGE: &str = "unknown";

/// Turns a transcript into an [`ExecutionSummary`].
#[derive(Clone)]
pub struct TranscriptSummarizer {
    api: Arc<dyn OrchestratorApi>,
    timeout: Duration,
}

impl TranscriptSummarizer {
    pub fn new(api: Arc<dyn OrchestratorApi>, timeout: Duration) -> Self {
        Self { api, timeout }
    }

    /// Analyzes `transcript`.
    ///
    /// Never fails: transport errors, timeouts, rejections and unusable
    /// reports all come back as a one-entry synthetic summary.
    pub async fn summarize(
        &self,
        transcript: &str,
        language_hint: Option<&str>,
    ) -> ExecutionSummary {
        let request = AnalyzeRequest {
            terminal_log: transcript.to_string(),
            language_hint: language_hint
                .filter(|l| !l.is_empty())
                .unwrap_or(UNKNOWN_LANGUAGE)
                .to_string(),
        };

        let response = match with_deadline(
            "output analysis",
            self.timeout,
            self.api.analyze_output(&request),
        )
        .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!("Output analysis timed out: {}", e);
                return ExecutionSummary::failure("Timeout", e.user_message());
            }
            Err(e) => {
                warn!("Output analysis request failed: {}", e);
                return ExecutionSummary::failure("Fetch Error", e.user_message());
            }
        };

        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| "The analysis service could not analyze the output".to_string());
            warn!("Output analysis rejected: {}", message);
            return ExecutionSummary::failure("Analysis Error", message);
        }

        match response.analysis.and_then(parse_reports) {
            Some(summary) => {
                info!("Received analysis for {} file(s)", summary.len());
                summary
            }
            None => {
                warn!("Output analysis returned no usable report");
                ExecutionSummary::failure(
                    "Invalid Response",
                    "The analysis service returned an empty or malformed report",
                )
            }
        }
    }
}

/// Accepts a list of file reports, or a single report object.
fn parse_reports(analysis: Value) -> Option<ExecutionSummary> {
    let reports = match analysis {
        Value::Array(_) => serde_json::from_value::<Vec<FileReport>>(analysis).ok()?,
        Value::Object(_) => vec![serde_json::from_value::<FileReport>(analysis).ok()?],
        _ => return None,
    };
    ExecutionSummary::from_reports(reports)
}
