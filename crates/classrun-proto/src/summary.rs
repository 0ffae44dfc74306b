//! Execution summary model.
//!
//! An `ExecutionSummary` is the per-file report derived from a terminal
//! transcript by the analysis service. It is immutable once built and always
//! holds at least one entry.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// File name used by synthetic entries describing a failed analysis.
pub const SUMMARY_ERROR_FILE: &str = "Summary Error";

/// Outcome of running one file.
///
/// The analysis service is not strict about spelling, so deserialization
/// accepts the display labels as well as the variant names. Anything else
/// maps to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileStatus {
    #[serde(alias = "success", alias = "SUCCESS")]
    Success,
    #[serde(
        rename = "Compilation Failed",
        alias = "CompilationFailed",
        alias = "compilation_failed",
        alias = "Compilation Error"
    )]
    CompilationFailed,
    #[serde(rename = "Runtime Error", alias = "RuntimeError", alias = "runtime_error")]
    RuntimeError,
    #[serde(
        rename = "Success with Warnings",
        alias = "SuccessWithWarnings",
        alias = "success_with_warnings"
    )]
    SuccessWithWarnings,
    #[default]
    #[serde(other)]
    Unknown,
}

impl FileStatus {
    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            FileStatus::Success => "Success",
            FileStatus::CompilationFailed => "Compilation Failed",
            FileStatus::RuntimeError => "Runtime Error",
            FileStatus::SuccessWithWarnings => "Success with Warnings",
            FileStatus::Unknown => "Unknown",
        }
    }

    /// Returns true for statuses that mean the file did not run cleanly.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            FileStatus::CompilationFailed | FileStatus::RuntimeError | FileStatus::Unknown
        )
    }
}

fn default_error_kind() -> String {
    "Error".to_string()
}

/// A single error reported for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type", default = "default_error_kind")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    /// Plain-language explanation added by the analysis service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl ErrorDetail {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            explanation: None,
        }
    }
}

/// Report for one file of the submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub file_name: String,
    #[serde(default)]
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}

/// Ordered per-file execution report.
///
/// Serialized as a plain array of file reports. Deserializing an empty array
/// fails with [`EmptySummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FileReport>", into = "Vec<FileReport>")]
pub struct ExecutionSummary {
    files: Vec<FileReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("an execution summary needs at least one file report")]
pub struct EmptySummary;

impl TryFrom<Vec<FileReport>> for ExecutionSummary {
    type Error = EmptySummary;

    fn try_from(files: Vec<FileReport>) -> Result<Self, Self::Error> {
        Self::from_reports(files).ok_or(EmptySummary)
    }
}

impl From<ExecutionSummary> for Vec<FileReport> {
    fn from(summary: ExecutionSummary) -> Self {
        summary.files
    }
}

impl ExecutionSummary {
    /// Builds a summary from analysis entries.
    ///
    /// Returns `None` for an empty list; an empty report is treated the same
    /// as a malformed one by callers.
    pub fn from_reports(files: Vec<FileReport>) -> Option<Self> {
        if files.is_empty() {
            None
        } else {
            Some(Self { files })
        }
    }

    /// Single-entry summary describing why no real report is available.
    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            files: vec![FileReport {
                file_name: SUMMARY_ERROR_FILE.to_string(),
                status: FileStatus::Unknown,
                description: Some("The execution output could not be analyzed.".to_string()),
                output: None,
                errors: vec![ErrorDetail::new(kind, message)],
            }],
        }
    }

    pub fn files(&self) -> &[FileReport] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Always false: every constructor rejects an empty list.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// True when this summary is the synthetic failure entry.
    pub fn is_failure_report(&self) -> bool {
        self.files.len() == 1 && self.files[0].file_name == SUMMARY_ERROR_FILE
    }

    /// Returns true if any file failed to compile or run.
    pub fn has_failures(&self) -> bool {
        self.files.iter().any(|f| f.status.is_failure())
    }

    /// Plain-text rendering used by terminal front-ends.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for (idx, file) in self.files.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "== {} [{}]", file.file_name, file.status.label());
            if let Some(description) = &file.description {
                let _ = writeln!(out, "   {}", description);
            }
            if let Some(output) = file.output.as_deref().filter(|o| !o.trim().is_empty()) {
                out.push_str("   Output:\n");
                for line in output.lines() {
                    let _ = writeln!(out, "     {}", line);
                }
            }
            if !file.errors.is_empty() {
                out.push_str("   Errors:\n");
                for error in &file.errors {
                    let _ = writeln!(out, "     - {}: {}", error.kind, error.message);
                    if let Some(explanation) = &error.explanation {
                        for line in explanation.lines() {
                            let _ = writeln!(out, "       {}", line);
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_accepts_display_labels() {
        let statuses: Vec<FileStatus> = serde_json::from_str(
            r#"["Success", "Compilation Failed", "Runtime Error", "Success with Warnings"]"#,
        )
        .unwrap();
        assert_eq!(
            statuses,
            vec![
                FileStatus::Success,
                FileStatus::CompilationFailed,
                FileStatus::RuntimeError,
                FileStatus::SuccessWithWarnings,
            ]
        );
    }

    #[test]
    fn test_unrecognized_status_is_unknown() {
        let status: FileStatus = serde_json::from_str(r#""Exploded""#).unwrap();
        assert_eq!(status, FileStatus::Unknown);
    }

    #[test]
    fn test_report_parses_service_shape() {
        let json = r#"[{
            "fileName": "main.py",
            "status": "Runtime Error",
            "description": "Crashes when the list is empty",
            "output": "Traceback...",
            "errors": [{
                "type": "ZeroDivisionError",
                "message": "division by zero",
                "explanation": "avg() divides by len(xs)"
            }]
        }]"#;

        let files: Vec<FileReport> = serde_json::from_str(json).unwrap();
        let summary = ExecutionSummary::from_reports(files).unwrap();

        assert_eq!(summary.len(), 1);
        let file = &summary.files()[0];
        assert_eq!(file.file_name, "main.py");
        assert_eq!(file.status, FileStatus::RuntimeError);
        assert_eq!(file.errors[0].kind, "ZeroDivisionError");
        assert!(summary.has_failures());
    }

    #[test]
    fn test_report_without_file_name_is_rejected() {
        let result: Result<Vec<FileReport>, _> =
            serde_json::from_str(r#"[{"status": "Success"}]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_reports_yield_none() {
        assert!(ExecutionSummary::from_reports(Vec::new()).is_none());
    }

    #[test]
    fn test_failure_summary_has_single_entry() {
        let summary = ExecutionSummary::failure("Fetch Error", "connection refused");

        assert_eq!(summary.len(), 1);
        assert!(summary.is_failure_report());
        let file = &summary.files()[0];
        assert_eq!(file.file_name, SUMMARY_ERROR_FILE);
        assert_eq!(file.status, FileStatus::Unknown);
        assert_eq!(file.errors, vec![ErrorDetail::new("Fetch Error", "connection refused")]);
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let summary = ExecutionSummary::failure("Fetch Error", "boom");
        let value = serde_json::to_value(&summary).unwrap();

        assert!(value.is_array());
        assert_eq!(value[0]["fileName"], "Summary Error");
        assert_eq!(value[0]["errors"][0]["type"], "Fetch Error");
    }

    #[test]
    fn test_empty_array_does_not_deserialize() {
        let err = serde_json::from_str::<ExecutionSummary>("[]").unwrap_err();
        assert!(err.to_string().contains("at least one file report"));
    }

    #[test]
    fn test_deserializes_from_plain_array() {
        let summary: ExecutionSummary = serde_json::from_str(
            r#"[{"fileName": "main.py", "status": "Success", "output": "Hello\n"}]"#,
        )
        .unwrap();

        assert_eq!(summary.len(), 1);
        assert_eq!(summary.files()[0].file_name, "main.py");
        assert_eq!(summary.files()[0].output.as_deref(), Some("Hello\n"));

        let json = serde_json::to_string(&summary).unwrap();
        assert_eq!(serde_json::from_str::<ExecutionSummary>(&json).unwrap(), summary);
    }

    #[test]
    fn test_render_text_includes_errors_and_explanations() {
        let summary = ExecutionSummary::from_reports(vec![FileReport {
            file_name: "Main.java".to_string(),
            status: FileStatus::CompilationFailed,
            description: None,
            output: None,
            errors: vec![ErrorDetail {
                kind: "SyntaxError".to_string(),
                message: "';' expected".to_string(),
                explanation: Some("Line 4 is missing a semicolon".to_string()),
            }],
        }])
        .unwrap();

        let text = summary.render_text();
        assert!(text.contains("== Main.java [Compilation Failed]"));
        assert!(text.contains("- SyntaxError: ';' expected"));
        assert!(text.contains("Line 4 is missing a semicolon"));
    }
}
