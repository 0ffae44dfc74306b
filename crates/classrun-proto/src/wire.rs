//! Request and response bodies for the execution orchestrator.
//!
//! Field names follow the orchestrator's camelCase JSON.

use serde::{Deserialize, Serialize};

/// `POST /execute-interactive`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub file_url: String,
    pub submission_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

/// `POST /stop/{containerId}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopSessionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

/// `POST /analyze-output`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub terminal_log: String,
    pub language_hint: String,
}

/// Analysis response.
///
/// `analysis` is kept as raw JSON so the summarizer can tell a malformed
/// report apart from a transport failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub analysis: Option<serde_json::Value>,
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

/// One source file submitted for batch execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
}

/// `POST /execute`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub files: Vec<SourceFile>,
    pub language: String,
    pub submission_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Option<BatchResult>,
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

/// Result of a batch run. Fields the orchestrator adds beyond these are kept
/// in `extra` so front-ends can still show them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    #[serde(default, alias = "stdout")]
    pub output: Option<String>,
    #[serde(default, alias = "stderr")]
    pub error: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
