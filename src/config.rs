//! Merge run configuration (`sbom-merge.toml`).
//!
//! Defines the typed configuration for a batch merge run: batch sizing and
//! concurrency, reduction policy, the external merge engine command line,
//! input discovery, and artifact naming. Every field has a default, so a
//! missing file is equivalent to an empty one. Command-line flags are
//! applied on top of the loaded file by the binary.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = "sbom-merge.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level merge configuration.
///
/// Parsed from `sbom-merge.toml`. Missing fields use defaults.
/// Missing file → all defaults (no error).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Chunking, concurrency and wait ceiling.
    #[serde(default)]
    pub batch: BatchConfig,

    /// What to do at the reduction stage.
    #[serde(default)]
    pub reduce: ReduceConfig,

    /// External merge engine command line.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Which files in the working directory are inputs.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Intermediate artifact naming.
    #[serde(default)]
    pub artifacts: ArtifactConfig,
}

// ---------------------------------------------------------------------------
// BatchConfig
// ---------------------------------------------------------------------------

/// Batch partitioning and worker pool settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Number of input files merged together per chunk (default: 5).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of merge processes allowed to run at once (default: 4).
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Maximum time to wait for the whole first stage, in seconds
    /// (default: 120). `0` waits forever.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            threads: default_threads(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

const fn default_chunk_size() -> usize {
    5
}

const fn default_threads() -> usize {
    4
}

const fn default_timeout_seconds() -> u64 {
    120
}

impl BatchConfig {
    /// The wait ceiling for a batch, or `None` when disabled.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        if self.timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_seconds))
        }
    }

    /// Chunk size as a non-zero value.
    ///
    /// # Errors
    /// Returns `ConfigError` if `chunk_size` is zero.
    pub fn chunk_size(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.chunk_size)
            .ok_or_else(|| ConfigError::invalid("batch.chunk_size must be at least 1 (got 0)"))
    }

    /// Worker count as a non-zero value.
    ///
    /// # Errors
    /// Returns `ConfigError` if `threads` is zero.
    pub fn threads(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.threads)
            .ok_or_else(|| ConfigError::invalid("batch.threads must be at least 1 (got 0)"))
    }
}

// ---------------------------------------------------------------------------
// ReduceConfig
// ---------------------------------------------------------------------------

/// Reduction stage settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReduceConfig {
    /// Whether to reduce after a partially failed first stage.
    #[serde(default)]
    pub policy: ReducePolicy,
}

/// Whether the final merge runs when some chunks failed or timed out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReducePolicy {
    /// Only reduce when every chunk succeeded (default).
    #[default]
    Strict,
    /// Reduce whatever intermediate artifacts exist, even after failures.
    /// The run is still reported as failed.
    Lenient,
}

impl fmt::Display for ReducePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Lenient => write!(f, "lenient"),
        }
    }
}

impl FromStr for ReducePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            _ => Err(format!("invalid reduce policy '{s}'. Use: strict or lenient")),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// External merge engine invocation.
///
/// The command line is `<program> <args...> --input-files <f1> ... --output-file <out>`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Executable to run (default: `"cyclonedx"`).
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the input/output flags (default: `["merge"]`).
    #[serde(default = "default_engine_args")]
    pub args: Vec<String>,

    /// Kill a still-running merge process once its batch has timed out
    /// (default: `false`, the scheduler only stops waiting).
    #[serde(default)]
    pub kill_on_cancel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_engine_args(),
            kill_on_cancel: false,
        }
    }
}

fn default_program() -> String {
    "cyclonedx".to_owned()
}

fn default_engine_args() -> Vec<String> {
    vec!["merge".to_owned()]
}

// ---------------------------------------------------------------------------
// DiscoveryConfig
// ---------------------------------------------------------------------------

/// Input file selection.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Glob matched against file names in the working directory
    /// (default: `"*.xml"`).
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
        }
    }
}

fn default_pattern() -> String {
    "*.xml".to_owned()
}

// ---------------------------------------------------------------------------
// ArtifactConfig
// ---------------------------------------------------------------------------

/// Intermediate artifact naming.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactConfig {
    /// Optional run identifier mixed into intermediate artifact names
    /// (`intermediate_<run_id>_<index>.xml`). Resuming requires reusing
    /// the same id.
    #[serde(default)]
    pub run_id: Option<String>,
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error loading or validating a merge configuration.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<std::path::PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            path: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl MergeConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }

    /// Check the values a run cannot start without.
    ///
    /// # Errors
    /// Returns `ConfigError` describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.batch.chunk_size()?;
        self.batch.threads()?;

        if self.engine.program.trim().is_empty() {
            return Err(ConfigError::invalid("engine.program must not be empty"));
        }

        if let Err(e) = glob::Pattern::new(&self.discovery.pattern) {
            return Err(ConfigError::invalid(format!(
                "discovery.pattern '{}' is not a valid glob: {e}",
                self.discovery.pattern
            )));
        }

        if let Some(run_id) = &self.artifacts.run_id {
            let valid = !run_id.is_empty()
                && run_id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(ConfigError::invalid(format!(
                    "artifacts.run_id '{run_id}' must be non-empty and use only letters, digits, '-' or '_'"
                )));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
