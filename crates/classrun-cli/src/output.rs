//! Printing results for humans or as JSON.

use crate::interactive::SessionOutcome;
use anyhow::Result;
use classrun_proto::{BatchResult, ExecutionSummary};
use serde_json::json;

pub fn print_summary(summary: &ExecutionSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{}", summary.render_text());
    }
    Ok(())
}

pub fn print_batch_result(result: &BatchResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    print!("{}", render_batch_result(result));
    if let Some(error) = result.error.as_deref().filter(|e| !e.is_empty()) {
        eprint!("{}", error);
        if !error.ends_with('\n') {
            eprintln!();
        }
    }
    Ok(())
}

/// Program output plus the exit code line. Standard error is printed separately.
fn render_batch_result(result: &BatchResult) -> String {
    let mut out = result.output.clone().unwrap_or_default();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    if let Some(code) = result.exit_code {
        out.push_str(&format!("[exit code {}]\n", code));
    }
    out
}

pub fn print_error(message: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&json!({ "error": message }))?);
    } else {
        eprintln!("Error: {}", message);
    }
    Ok(())
}

pub fn print_session_outcome(outcome: &SessionOutcome, json: bool) -> Result<()> {
    if json {
        let value = json!({
            "summary": outcome.summary,
            "notice": outcome.notice,
            "error": outcome.error,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if let Some(error) = &outcome.error {
        eprintln!("Error: {}", error);
    }
    if let Some(notice) = &outcome.notice {
        println!("{}", notice);
    }
    if let Some(summary) = &outcome.summary {
        print!("{}", summary.render_text());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_output_gets_exit_code_line() {
        let result = BatchResult {
            output: Some("Hello".to_string()),
            exit_code: Some(0),
            ..BatchResult::default()
        };
        assert_eq!(render_batch_result(&result), "Hello\n[exit code 0]\n");
    }

    #[test]
    fn test_batch_without_output_or_code_is_empty() {
        assert_eq!(render_batch_result(&BatchResult::default()), "");
    }
}
