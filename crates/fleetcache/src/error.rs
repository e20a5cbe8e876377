//! CLI error types with miette diagnostics.
//!
//! Maps `CacheError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use fleetcache_config::ConfigError;
use fleetcache_core::CacheError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const INPUT: i32 = 65;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Input ────────────────────────────────────────────────────────
    #[error("Line {line} is not a valid change event")]
    #[diagnostic(
        code(fleetcache::bad_change),
        help("Each line must be one JSON object with a \"kind\" tag such as \"model\" or \"remove-unit\".")
    )]
    BadChange {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    // ── Cache ────────────────────────────────────────────────────────
    #[error("{kind} '{key}' not found")]
    #[diagnostic(code(fleetcache::not_found))]
    NotFound { kind: String, key: String },

    #[error("Cache controller failed")]
    #[diagnostic(
        code(fleetcache::cache),
        help("The cache must be rebuilt from a fresh change stream.")
    )]
    Cache(#[source] CacheError),

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration")]
    #[diagnostic(
        code(fleetcache::config),
        help("Check the config file ({path}) and FLEETCACHE_* environment variables.")
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(fleetcache::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── Metrics ──────────────────────────────────────────────────────
    #[error("Could not render metrics: {0}")]
    #[diagnostic(code(fleetcache::metrics))]
    Metrics(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {0}")]
    #[diagnostic(code(fleetcache::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BadChange { .. } => exit_code::INPUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Config { .. } | Self::ConfigExists { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CacheError → CliError mapping ────────────────────────────────────

impl From<CacheError> for CliError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound { kind, key } => Self::NotFound { kind, key },
            other => Self::Cache(other),
        }
    }
}

impl From<prometheus::Error> for CliError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}
