//! # classrun-proto
//!
//! Shared types for the classrun workspace.
//!
//! This crate provides:
//! - Request/response bodies for the execution orchestrator endpoints
//! - The `ExecutionSummary` model produced by transcript analysis
//! - Synthetic summaries used when analysis cannot produce a report

mod summary;
mod wire;

pub use summary::{EmptySummary, ErrorDetail, ExecutionSummary, FileReport, FileStatus, SUMMARY_ERROR_FILE};
pub use wire::{
    AnalyzeRequest, AnalyzeResponse, BatchRequest, BatchResponse, BatchResult, SourceFile,
    StartSessionRequest, StartSessionResponse, StopSessionResponse,
};
