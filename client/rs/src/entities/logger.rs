use serde::{Deserialize, Serialize};
use strum::Display;

/// Log verbosity, convertible into a [tracing::Level].
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
  Trace,
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

impl From<LogLevel> for tracing::Level {
  fn from(value: LogLevel) -> Self {
    match value {
      LogLevel::Trace => tracing::Level::TRACE,
      LogLevel::Debug => tracing::Level::DEBUG,
      LogLevel::Info => tracing::Level::INFO,
      LogLevel::Warn => tracing::Level::WARN,
      LogLevel::Error => tracing::Level::ERROR,
    }
  }
}

/// How logs are written to stdio.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StdioLogMode {
  #[default]
  Standard,
  Json,
  None,
}

/// Logging configuration for the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
  /// The minimum log level to output.
  /// Default: `info`
  #[serde(default)]
  pub level: LogLevel,

  /// Whether to log to stdio in `standard` or `json` format, or
  /// not at all (`none`).
  /// Default: `standard`
  #[serde(default)]
  pub stdio: StdioLogMode,

  /// Use the pretty tracing formatter. Noisy, development only.
  #[serde(default)]
  pub pretty: bool,

  /// Include the log target location in the output.
  #[serde(default)]
  pub location: bool,

  /// Color the stdio output.
  /// Default: `true`
  #[serde(default = "default_ansi")]
  pub ansi: bool,

  /// Export traces over OTLP http when non-empty.
  #[serde(default)]
  pub otlp_endpoint: String,

  /// Service name attached to exported traces.
  /// Default: `Testenv`
  #[serde(default = "default_opentelemetry_service_name")]
  pub opentelemetry_service_name: String,

  /// Scope name attached to exported traces.
  /// Default: `testenv.core`
  #[serde(default = "default_opentelemetry_scope_name")]
  pub opentelemetry_scope_name: String,
}

fn default_ansi() -> bool {
  true
}

fn default_opentelemetry_service_name() -> String {
  String::from("Testenv")
}

fn default_opentelemetry_scope_name() -> String {
  String::from("testenv.core")
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: Default::default(),
      stdio: Default::default(),
      pretty: Default::default(),
      location: Default::default(),
      ansi: default_ansi(),
      otlp_endpoint: Default::default(),
      opentelemetry_service_name:
        default_opentelemetry_service_name(),
      opentelemetry_scope_name: default_opentelemetry_scope_name(),
    }
  }
}
