//! Configuration for classrun.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `CLASSRUN_*` environment variables (a `.env` file is honored).

use crate::error::{ExecError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Path of the execution stream relative to the orchestrator host.
const CHANNEL_PATH: &str = "/ws/code-execution";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassrunConfig {
    pub api: ApiConfig,
    pub terminal: TerminalConfig,
}

/// Orchestrator endpoints and per-call time limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL for the REST endpoints.
    pub base_url: String,
    /// Base URL for the execution stream. Derived from `base_url` when unset.
    pub ws_url: Option<String>,
    pub start_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub analyze_timeout_secs: u64,
    pub batch_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api/code".to_string(),
            ws_url: None,
            start_timeout_secs: 30,
            stop_timeout_secs: 15,
            connect_timeout_secs: 10,
            analyze_timeout_secs: 120,
            batch_timeout_secs: 120,
        }
    }
}

/// Initial geometry of the terminal surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub rows: u16,
    pub cols: u16,
    pub scrollback: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            scrollback: 5000,
        }
    }
}

impl ClassrunConfig {
    /// Loads configuration from `path` (skipped if missing) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Try to load .env file if it exists (ignore if it doesn't)
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                debug!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML configuration file. An empty file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_yaml(&contents)
            .map_err(|e| ExecError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }

    /// Applies `CLASSRUN_*` overrides using `lookup` to read variables.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("CLASSRUN_API_URL") {
            self.api.base_url = url;
        }
        if let Some(url) = lookup("CLASSRUN_WS_URL") {
            self.api.ws_url = Some(url);
        }

        let secs = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        if let Some(v) = secs("CLASSRUN_START_TIMEOUT_SECS") {
            self.api.start_timeout_secs = v;
        }
        if let Some(v) = secs("CLASSRUN_STOP_TIMEOUT_SECS") {
            self.api.stop_timeout_secs = v;
        }
        if let Some(v) = secs("CLASSRUN_CONNECT_TIMEOUT_SECS") {
            self.api.connect_timeout_secs = v;
        }
        if let Some(v) = secs("CLASSRUN_ANALYZE_TIMEOUT_SECS") {
            self.api.analyze_timeout_secs = v;
        }
        if let Some(v) = secs("CLASSRUN_BATCH_TIMEOUT_SECS") {
            self.api.batch_timeout_secs = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api.base_url)?;
        if let Some(ws) = &self.api.ws_url {
            Url::parse(ws)?;
        }

        let timeouts = [
            ("start_timeout_secs", self.api.start_timeout_secs),
            ("stop_timeout_secs", self.api.stop_timeout_secs),
            ("connect_timeout_secs", self.api.connect_timeout_secs),
            ("analyze_timeout_secs", self.api.analyze_timeout_secs),
            ("batch_timeout_secs", self.api.batch_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(ExecError::Config(format!("api.{} must be greater than 0", name)));
        }

        if self.terminal.rows == 0 || self.terminal.cols == 0 {
            return Err(ExecError::Config(
                "terminal.rows and terminal.cols must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl ApiConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn analyze_timeout(&self) -> Duration {
        Duration::from_secs(self.analyze_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    /// Full URL of a REST endpoint below `base_url`.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&joined)?)
    }

    /// Address of the execution stream for `container_id`.
    ///
    /// Without an explicit `ws_url` the stream lives on the orchestrator host
    /// under `/ws/code-execution/`, using `ws` for `http` and `wss` for `https`.
    pub fn channel_url(&self, container_id: &str) -> Result<Url> {
        let mut url = match &self.ws_url {
            Some(ws) => Url::parse(ws)?,
            None => {
                let mut url = Url::parse(&self.base_url)?;
                let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
                url.set_scheme(scheme).map_err(|()| {
                    ExecError::Config(format!("cannot derive stream URL from {}", self.base_url))
                })?;
                url.set_path(CHANNEL_PATH);
                url.set_query(None);
                url
            }
        };

        if url.cannot_be_a_base() {
            return Err(ExecError::Config(format!("{} cannot carry a path", url)));
        }
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(container_id);
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClassrunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.start_timeout(), Duration::from_secs(30));
        assert_eq!(config.terminal.rows, 24);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ClassrunConfig::parse_yaml(
            r"
api:
  base_url: https://grader.example.edu/api/code
  stop_timeout_secs: 5
terminal:
  cols: 120
",
        )
        .unwrap();

        assert_eq!(config.api.base_url, "https://grader.example.edu/api/code");
        assert_eq!(config.api.stop_timeout_secs, 5);
        assert_eq!(config.api.start_timeout_secs, 30);
        assert_eq!(config.terminal.cols, 120);
        assert_eq!(config.terminal.rows, 24);
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = ClassrunConfig::from_file(file.path()).unwrap();
        assert_eq!(config, ClassrunConfig::default());
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "api: [not, a, map]").unwrap();

        let err = ClassrunConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ExecError::Config(ref m) if m.contains(&file.path().display().to_string())));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CLASSRUN_API_URL", "http://10.0.0.5:8080/code"),
            ("CLASSRUN_ANALYZE_TIMEOUT_SECS", "45"),
            ("CLASSRUN_STOP_TIMEOUT_SECS", "not-a-number"),
        ]);

        let mut config = ClassrunConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.api.base_url, "http://10.0.0.5:8080/code");
        assert_eq!(config.api.analyze_timeout_secs, 45);
        assert_eq!(config.api.stop_timeout_secs, 15);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = ClassrunConfig::default();
        config.api.connect_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connect_timeout_secs"));
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let api = ApiConfig {
            base_url: "http://localhost:5000/api/code/".to_string(),
            ..ApiConfig::default()
        };
        assert_eq!(
            api.endpoint("/stop/abc123").unwrap().as_str(),
            "http://localhost:5000/api/code/stop/abc123"
        );
    }

    #[test]
    fn test_channel_url_derived_from_http_base() {
        let api = ApiConfig::default();
        assert_eq!(
            api.channel_url("abc123").unwrap().as_str(),
            "ws://localhost:5000/ws/code-execution/abc123"
        );
    }

    #[test]
    fn test_channel_url_uses_wss_for_https() {
        let api = ApiConfig {
            base_url: "https://grader.example.edu/api/code".to_string(),
            ..ApiConfig::default()
        };
        assert_eq!(
            api.channel_url("abc123").unwrap().as_str(),
            "wss://grader.example.edu/ws/code-execution/abc123"
        );
    }

    #[test]
    fn test_channel_url_with_explicit_base_encodes_id() {
        let api = ApiConfig {
            ws_url: Some("ws://sandbox.internal:9000/stream/".to_string()),
            ..ApiConfig::default()
        };
        assert_eq!(
            api.channel_url("a b/c").unwrap().as_str(),
            "ws://sandbox.internal:9000/stream/a%20b%2Fc"
        );
    }
}
