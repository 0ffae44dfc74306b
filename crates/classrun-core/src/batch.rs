//! Non-interactive batch execution.

use crate::api::OrchestratorApi;
use crate::error::{Result, with_deadline};
use crate::language::infer_language;
use classrun_proto::{BatchRequest, BatchResult, SourceFile};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// Files to run in one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub submission_id: String,
    pub files: Vec<SourceFile>,
    /// Runtime to use. Inferred from the first file with a known extension
    /// when unset.
    pub language: Option<String>,
}

impl BatchJob {
    pub fn new(submission_id: impl Into<String>, files: Vec<SourceFile>) -> Self {
        Self {
            submission_id: submission_id.into(),
            files,
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Reads each path into a [`SourceFile`] named after its file name.
    pub async fn from_paths(submission_id: impl Into<String>, paths: &[PathBuf]) -> Result<Self> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let content = tokio::fs::read_to_string(path).await?;
            let name = path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
            files.push(SourceFile { name, content });
        }
        Ok(Self::new(submission_id, files))
    }

    fn resolve_language(&self) -> Option<String> {
        if let Some(language) = self.language.as_deref().filter(|l| !l.is_empty()) {
            return Some(language.to_string());
        }
        self.files
            .iter()
            .find_map(|f| infer_language(&f.name))
            .map(str::to_string)
    }
}

/// A failed batch run, ready to show to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BatchFailure {
    pub message: String,
}

impl BatchFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum BatchState {
    #[default]
    Idle,
    Loading,
    Succeeded(BatchResult),
    Failed(BatchFailure),
}

/// Submits jobs to `POST /execute` and tracks the latest outcome.
pub struct BatchClient {
    api: Arc<dyn OrchestratorApi>,
    timeout: Duration,
    state: watch::Sender<BatchState>,
}

impl BatchClient {
    pub fn new(api: Arc<dyn OrchestratorApi>, timeout: Duration) -> Self {
        let (state, _) = watch::channel(BatchState::Idle);
        Self {
            api,
            timeout,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> BatchState {
        self.state.borrow().clone()
    }

    /// Runs `job` to completion. Every failure is returned as a
    /// [`BatchFailure`] and also recorded in the state.
    pub async fn execute(&self, job: BatchJob) -> std::result::Result<BatchResult, BatchFailure> {
        let outcome = self.run(job).await;
        self.state.send_replace(match &outcome {
            Ok(result) => BatchState::Succeeded(result.clone()),
            Err(failure) => BatchState::Failed(failure.clone()),
        });
        outcome
    }

    async fn run(&self, job: BatchJob) -> std::result::Result<BatchResult, BatchFailure> {
        if job.files.is_empty() {
            return Err(BatchFailure::new("No files to execute"));
        }
        let Some(language) = job.resolve_language() else {
            return Err(BatchFailure::new(format!(
                "Could not determine the language of {}; specify it explicitly",
                job.files[0].name
            )));
        };

        self.state.send_replace(BatchState::Loading);
        let request = BatchRequest {
            files: job.files,
            language,
            submission_id: job.submission_id,
        };

        match with_deadline("batch execution", self.timeout, self.api.execute_batch(&request)).await
        {
            Ok(result) => {
                info!(exit_code = ?result.exit_code, "Batch execution finished");
                Ok(result)
            }
            Err(e) => {
                warn!("Batch execution failed: {}", e);
                Err(BatchFailure::new(e.user_message()))
            }
        }
    }
}
