use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use dw_backend::{AnthropicClient, BackendError, OpenAiClient, Suggester};
use dw_protocol::DEFAULT_MARKER;

use crate::watcher::Watcher;

pub const DEFAULT_LOG_PATH: &str = "/var/log/audit/audit.log";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("watch.marker must not be empty")]
    EmptyMarker,
    #[error("{env_var} not set and no api_key_cmd configured")]
    MissingCredential { env_var: &'static str },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub backend: BackendConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    /// File to follow.
    pub path: PathBuf,
    /// Substring that marks a line as a denial. Matched case-sensitively.
    pub marker: String,
    /// How long to sleep at end of file before polling again.
    pub poll_interval_ms: u64,
    /// Reopen the path when the file behind it is replaced.
    pub follow_rotation: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_LOG_PATH),
            marker: DEFAULT_MARKER.to_string(),
            poll_interval_ms: 250,
            follow_rotation: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    #[value(name = "openai")]
    OpenAi,
    Anthropic,
}

/// What to do when the suggester fails for one denial.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SuggestErrorPolicy {
    /// Report the failure and keep watching.
    #[default]
    Skip,
    /// Stop the watch with the error.
    Abort,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Which backend to use.
    pub default: BackendKind,
    pub on_suggest_error: SuggestErrorPolicy,
    pub openai: OpenAiConfig,
    pub anthropic: AnthropicConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    /// Command that prints the API key, run via `sh -c`.
    pub api_key_cmd: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_cmd: None,
            model: dw_backend::openai::DEFAULT_MODEL.to_string(),
            base_url: dw_backend::openai::DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl OpenAiConfig {
    /// Resolve the API key from api_key_cmd or OPENAI_API_KEY.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        resolve_api_key(self.api_key_cmd.as_deref(), "OPENAI_API_KEY")
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnthropicConfig {
    /// Command that prints the API key, run via `sh -c`.
    pub api_key_cmd: Option<String>,
    pub model: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key_cmd: None,
            model: dw_backend::anthropic::DEFAULT_MODEL.to_string(),
        }
    }
}

impl AnthropicConfig {
    /// Resolve the API key from api_key_cmd or ANTHROPIC_API_KEY.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        resolve_api_key(self.api_key_cmd.as_deref(), "ANTHROPIC_API_KEY")
    }
}

fn resolve_api_key(cmd: Option<&str>, env_var: &'static str) -> Result<String, ConfigError> {
    // Try api_key_cmd first
    if let Some(cmd) = cmd {
        match Command::new("sh").arg("-c").arg(cmd).output() {
            Ok(output) if output.status.success() => {
                let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !key.is_empty() {
                    return Ok(key);
                }
            }
            Ok(output) => warn!(status = %output.status, "api_key_cmd failed"),
            Err(e) => warn!(error = %e, "api_key_cmd could not run"),
        }
    }

    // Fall back to env var
    std::env::var(env_var)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or(ConfigError::MissingCredential { env_var })
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Append every denial and its suggestion to a JSONL file.
    pub record_enabled: bool,
    /// Custom record path. Defaults to ~/.local/share/denialwatch/suggestions.jsonl.
    pub record_path: Option<String>,
}

impl OutputConfig {
    /// Resolve the record path, using the configured path or the XDG default.
    pub fn resolve_record_path(&self) -> PathBuf {
        if let Some(ref custom) = self.record_path {
            return PathBuf::from(custom);
        }

        let base = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".local").join("share")
            });
        base.join("denialwatch").join("suggestions.jsonl")
    }
}

impl Config {
    /// Load an explicitly named file. Any failure is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the default config file, falling back to defaults if it is
    /// missing or invalid.
    pub fn load_or_default() -> Self {
        let path = config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                Config::default()
            }),
            Err(_) => Config::default(),
        }
    }

    /// An empty marker would match every line, so it is rejected.
    pub fn watcher(&self) -> Result<Watcher, ConfigError> {
        if self.watch.marker.is_empty() {
            return Err(ConfigError::EmptyMarker);
        }
        Ok(Watcher::new(&self.watch.path, &self.watch.marker)
            .with_poll_interval(Duration::from_millis(self.watch.poll_interval_ms.max(1)))
            .with_follow_rotation(self.watch.follow_rotation))
    }

    /// Resolve credentials and build the configured suggester.
    pub fn build_suggester(&self) -> Result<Arc<dyn Suggester>, ConfigError> {
        match self.backend.default {
            BackendKind::OpenAi => {
                let cfg = &self.backend.openai;
                let key = cfg.resolve_api_key()?;
                let client =
                    OpenAiClient::with_model(key, &cfg.model)?.with_base_url(&cfg.base_url);
                Ok(Arc::new(client))
            }
            BackendKind::Anthropic => {
                let cfg = &self.backend.anthropic;
                let key = cfg.resolve_api_key()?;
                Ok(Arc::new(AnthropicClient::with_model(key, &cfg.model)?))
            }
        }
    }

    /// Model name of the selected backend.
    pub fn model(&self) -> &str {
        match self.backend.default {
            BackendKind::OpenAi => &self.backend.openai.model,
            BackendKind::Anthropic => &self.backend.anthropic.model,
        }
    }

    /// Override the model of the selected backend.
    pub fn set_model(&mut self, model: String) {
        match self.backend.default {
            BackendKind::OpenAi => self.backend.openai.model = model,
            BackendKind::Anthropic => self.backend.anthropic.model = model,
        }
    }
}

pub fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("denialwatch").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.watch.path, PathBuf::from("/var/log/audit/audit.log"));
        assert_eq!(cfg.watch.marker, "avc:  denied");
        assert_eq!(cfg.watch.poll_interval_ms, 250);
        assert!(cfg.watch.follow_rotation);
        assert_eq!(cfg.backend.default, BackendKind::OpenAi);
        assert_eq!(cfg.backend.on_suggest_error, SuggestErrorPolicy::Skip);
        assert_eq!(cfg.output.format, OutputFormat::Text);
        assert!(!cfg.output.record_enabled);
    }

    #[test]
    fn parse_empty_toml() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn parse_watch_config() {
        let toml_str = r#"
[watch]
path = "/tmp/audit.log"
marker = "apparmor=\"DENIED\""
poll_interval_ms = 50
follow_rotation = false
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.watch.path, PathBuf::from("/tmp/audit.log"));
        assert_eq!(cfg.watch.marker, "apparmor=\"DENIED\"");
        assert_eq!(cfg.watch.poll_interval_ms, 50);
        assert!(!cfg.watch.follow_rotation);
    }

    #[test]
    fn parse_backend_config() {
        let toml_str = r#"
[backend]
default = "anthropic"
on_suggest_error = "abort"

[backend.anthropic]
api_key_cmd = "pass show anthropic"
model = "claude-opus-4-20250514"

[backend.openai]
base_url = "http://localhost:11434/v1"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.backend.default, BackendKind::Anthropic);
        assert_eq!(cfg.backend.on_suggest_error, SuggestErrorPolicy::Abort);
        assert_eq!(
            cfg.backend.anthropic.api_key_cmd.as_deref(),
            Some("pass show anthropic")
        );
        assert_eq!(cfg.model(), "claude-opus-4-20250514");
        assert_eq!(cfg.backend.openai.base_url, "http://localhost:11434/v1");
        assert_eq!(cfg.backend.openai.model, "gpt-4o");
    }

    #[test]
    fn parse_output_config() {
        let toml_str = r#"
[output]
format = "json"
record_enabled = true
record_path = "/tmp/suggestions.jsonl"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.output.format, OutputFormat::Json);
        assert!(cfg.output.record_enabled);
        assert_eq!(
            cfg.output.resolve_record_path(),
            PathBuf::from("/tmp/suggestions.jsonl")
        );
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let toml_str = r#"
[backend]
default = "gemini"
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn resolve_record_path_default() {
        let cfg = OutputConfig::default();
        let path = cfg.resolve_record_path();
        assert!(path
            .to_string_lossy()
            .ends_with("denialwatch/suggestions.jsonl"));
    }

    #[test]
    fn set_model_targets_selected_backend() {
        let mut cfg = Config::default();
        cfg.set_model("gpt-4o-mini".to_string());
        assert_eq!(cfg.backend.openai.model, "gpt-4o-mini");
        assert_eq!(cfg.backend.anthropic.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn resolve_api_key_from_cmd() {
        let cfg = OpenAiConfig {
            api_key_cmd: Some("echo sk-test-123".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_api_key().unwrap(), "sk-test-123");
    }

    #[test]
    fn resolve_api_key_cmd_failure_falls_back_to_env() {
        let err = resolve_api_key(Some("exit 1"), "DENIALWATCH_TEST_UNSET_KEY").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCredential {
                env_var: "DENIALWATCH_TEST_UNSET_KEY"
            }
        ));
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watch\npath = 1").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn watcher_uses_config() {
        let mut cfg = Config::default();
        cfg.watch.path = PathBuf::from("/tmp/x.log");
        cfg.watch.marker = "denied".to_string();
        let w = cfg.watcher().unwrap();
        assert_eq!(w.path(), Path::new("/tmp/x.log"));
        assert_eq!(w.marker(), "denied");
    }

    #[test]
    fn empty_marker_is_rejected() {
        let mut cfg = Config::default();
        cfg.watch.marker = String::new();
        assert!(matches!(cfg.watcher(), Err(ConfigError::EmptyMarker)));

        let cfg: Config = toml::from_str("[watch]\nmarker = \"\"").unwrap();
        assert!(matches!(cfg.watcher(), Err(ConfigError::EmptyMarker)));
    }
}
