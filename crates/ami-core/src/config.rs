//! Configuration types for the AMI reduce driver.
//!
//! Loaded from YAML. Every field has a default, so an empty file (or no file at
//! all) gives a working Large Array setup that runs `tcsh -c reduce` in the
//! current directory.

use ami_adapters::{DEFAULT_PROMPT, PtyConfig, SessionConfig};
use ami_proto::ArrayMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmiConfig {
    /// Array to reduce for: "LA" or "SA".
    #[serde(default = "default_array")]
    pub array: String,

    /// Root of the AMI installation. Used as the working directory when
    /// `working_dir` is not set.
    #[serde(default)]
    pub ami_rootdir: Option<PathBuf>,

    /// Directory `reduce` runs in. Temporary output files are written here.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// How to spawn and talk to the tool.
    #[serde(default)]
    pub session: SessionSettings,

    /// Environment variables for the tool (e.g. the AMI setup variables).
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Per-dataset transcript logs.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Pointing grouping settings.
    #[serde(default)]
    pub grouping: GroupingConfig,

    /// Suppress all warnings (for batch runs).
    #[serde(default, rename = "_suppress_warnings")]
    pub suppress_warnings: bool,
}

fn default_array() -> String {
    "LA".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AmiConfig {
    fn default() -> Self {
        Self {
            array: default_array(),
            ami_rootdir: None,
            working_dir: None,
            session: SessionSettings::default(),
            env: HashMap::new(),
            logging: LoggingConfig::default(),
            grouping: GroupingConfig::default(),
            suppress_warnings: false,
        }
    }
}

impl AmiConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        let config: Self = serde_yaml::from_str(&content)?;
        debug!(array = %config.array, prompt = %config.session.prompt, "Configuration loaded");
        Ok(config)
    }

    /// Parses the array mode, rejecting anything but `LA` and `SA`.
    pub fn array_mode(&self) -> Result<ArrayMode, ConfigError> {
        self.array
            .parse()
            .map_err(|_| ConfigError::InvalidArray(self.array.clone()))
    }

    /// Directory the tool runs in: `working_dir`, else `ami_rootdir`, else the
    /// current directory.
    pub fn effective_working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .or_else(|| self.ami_rootdir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Validates the configuration.
    ///
    /// Hard errors (unusable values) are returned as `Err`; questionable but
    /// workable settings come back as warnings.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        self.array_mode()?;

        if self.session.prompt.trim().is_empty() {
            return Err(ConfigError::EmptyPrompt);
        }
        let tolerance = self.grouping.tolerance_deg;
        if tolerance.is_nan() || tolerance <= 0.0 {
            return Err(ConfigError::InvalidTolerance(self.grouping.tolerance_deg));
        }

        let mut warnings = Vec::new();
        if self.suppress_warnings {
            return Ok(warnings);
        }

        if self.session.idle_timeout_secs == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "session.idle_timeout_secs".to_string(),
                message: "0 disables stall detection; a hung reduce will block forever"
                    .to_string(),
            });
        }
        if self.session.startup_timeout_secs == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "session.startup_timeout_secs".to_string(),
                message: "0 gives reduce no time to print its first prompt".to_string(),
            });
        }
        if self.grouping.tolerance_deg > 10.0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "grouping.tolerance_deg".to_string(),
                message: format!(
                    "{} degrees will merge unrelated fields",
                    self.grouping.tolerance_deg
                ),
            });
        }
        if !self.session.inherit_env && self.env.is_empty() {
            warnings.push(ConfigWarning::InvalidValue {
                field: "env".to_string(),
                message: "environment is cleared and no variables are set".to_string(),
            });
        }

        Ok(warnings)
    }

    /// Builds the PTY spawn settings.
    pub fn pty_config(&self) -> PtyConfig {
        PtyConfig {
            program: self.session.command.clone(),
            args: self.session.args.clone(),
            cwd: Some(self.effective_working_dir()),
            env: self.env.clone(),
            inherit_env: self.session.inherit_env,
            cols: self.session.cols,
            rows: self.session.rows,
        }
    }

    /// Builds the prompt-session settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            prompt: self.session.prompt.clone(),
            startup_timeout: Duration::from_secs(self.session.startup_timeout_secs),
            idle_timeout: match self.session.idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// How the tool is spawned and synchronised with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Program to run.
    #[serde(default = "default_command")]
    pub command: String,

    /// Arguments to the program.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Prompt string that ends every response.
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Seconds to wait for the first prompt.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Seconds of silence before a command is considered stalled (0 = never).
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// PTY width.
    #[serde(default = "default_cols")]
    pub cols: u16,

    /// PTY height.
    #[serde(default = "default_rows")]
    pub rows: u16,

    /// Start from the current process environment.
    #[serde(default = "default_true")]
    pub inherit_env: bool,
}

fn default_command() -> String {
    "tcsh".to_string()
}

fn default_args() -> Vec<String> {
    vec!["-c".to_string(), "reduce".to_string()]
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600 // reweighting a long observation can be slow
}

fn default_cols() -> u16 {
    200
}

fn default_rows() -> u16 {
    50
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            prompt: default_prompt(),
            startup_timeout_secs: default_startup_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            cols: default_cols(),
            rows: default_rows(),
            inherit_env: true,
        }
    }
}

/// Per-dataset transcript logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Write `<name>.ami.log` and `<name>.ami.commands` for each active dataset.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Default directory for the transcripts (current directory if unset).
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
        }
    }
}

/// Pointing grouping settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Datasets closer than this (degrees) to a group's pointing join the group.
    #[serde(default = "default_tolerance")]
    pub tolerance_deg: f64,
}

fn default_tolerance() -> f64 {
    0.5
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            tolerance_deg: default_tolerance(),
        }
    }
}

/// Configuration warnings emitted during validation.
#[derive(Debug, Clone)]
pub enum ConfigWarning {
    /// Value is valid but probably not what was meant.
    InvalidValue { field: String, message: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::InvalidValue { field, message } => {
                write!(f, "Warning [{}]: {}", field, message)
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Initialisation error: array must be 'LA' or 'SA', got '{0}'")]
    InvalidArray(String),

    #[error("session.prompt must not be empty")]
    EmptyPrompt,

    #[error("grouping.tolerance_deg must be positive, got {0}")]
    InvalidTolerance(f64),
}

impl From<ConfigError> for ami_proto::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(e) => ami_proto::Error::Io(e),
            other => ami_proto::Error::Configuration(other.to_string()),
        }
    }
}
