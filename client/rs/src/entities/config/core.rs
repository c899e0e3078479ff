//! # Configuring the testenv operator
//!
//! The operator is configured by parsing a base configuration file
//! ([CoreConfig]), and overriding any fields given in the file with
//! ones provided on the environment ([Env]). All environment
//! variables are prefixed with `TESTENV_`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::entities::{
  config::empty_or_redacted,
  logger::{LogConfig, LogLevel, StdioLogMode},
};

/// # Testenv Core Environment Variables
///
/// Any field of the [CoreConfig] can be overridden by passing the
/// associated environment variable in `UPPER_SNAKE_CASE` format.
#[derive(Debug, Clone, Deserialize)]
pub struct Env {
  /// Specify a custom config path for the core config toml.
  /// Default: `/config/config.toml`
  #[serde(default = "default_config_path")]
  pub testenv_config_path: PathBuf,

  /// Override `bind_ip`
  pub testenv_bind_ip: Option<String>,
  /// Override `port`
  pub testenv_port: Option<u16>,
  /// Override `debug_port`
  pub testenv_debug_port: Option<u16>,

  /// Override `namespace`
  pub testenv_namespace: Option<String>,
  /// Override `cluster_domain`
  pub testenv_cluster_domain: Option<String>,
  /// Override `database_namespace`
  pub testenv_database_namespace: Option<String>,
  /// Override `build_cluster_role`
  pub testenv_build_cluster_role: Option<String>,
  /// Override `status_service_name`
  pub testenv_status_service_name: Option<String>,
  /// Override `status_service_port`
  pub testenv_status_service_port: Option<i64>,
  /// Override `istio_namespace`
  pub testenv_istio_namespace: Option<String>,
  /// Override `istio_gateway`
  pub testenv_istio_gateway: Option<String>,

  /// Override `build_workers`
  pub testenv_build_workers: Option<usize>,
  /// Override `docker_host`
  pub testenv_docker_host: Option<String>,
  /// Override `docker_api_version`
  pub testenv_docker_api_version: Option<String>,
  /// Override `docker_registry`
  pub testenv_docker_registry: Option<String>,
  /// Override `docker_registry_username`
  pub testenv_docker_registry_username: Option<String>,
  /// Override `docker_registry_password`
  pub testenv_docker_registry_password: Option<String>,
  /// Override `docker_registry_password` with file
  pub testenv_docker_registry_password_file: Option<PathBuf>,

  /// Override `github_webhook_secret`
  pub testenv_github_webhook_secret: Option<String>,
  /// Override `github_webhook_secret` with file
  pub testenv_github_webhook_secret_file: Option<PathBuf>,
  /// Override `github_access_token`
  pub testenv_github_access_token: Option<String>,
  /// Override `github_access_token` with file
  pub testenv_github_access_token_file: Option<PathBuf>,
  /// Override `github_username`
  pub testenv_github_username: Option<String>,

  /// Override `database_storage_class_name`
  pub testenv_database_storage_class_name: Option<String>,
  /// Override `database_service_account_name`
  pub testenv_database_service_account_name: Option<String>,
  /// Override `database_wait_deadline`
  pub testenv_database_wait_deadline: Option<u64>,

  /// Override `environment_lifetime_hours`
  pub testenv_environment_lifetime_hours: Option<u64>,

  /// Override `logging.level`
  pub testenv_logging_level: Option<LogLevel>,
  /// Override `logging.stdio`
  pub testenv_logging_stdio: Option<StdioLogMode>,
  /// Override `logging.pretty`
  pub testenv_logging_pretty: Option<bool>,
  /// Override `logging.location`
  pub testenv_logging_location: Option<bool>,
  /// Override `logging.ansi`
  pub testenv_logging_ansi: Option<bool>,
  /// Override `logging.otlp_endpoint`
  pub testenv_logging_otlp_endpoint: Option<String>,
  /// Override `logging.opentelemetry_service_name`
  pub testenv_logging_opentelemetry_service_name: Option<String>,
  /// Override `logging.opentelemetry_scope_name`
  pub testenv_logging_opentelemetry_scope_name: Option<String>,

  /// Override `pretty_startup_config`
  pub testenv_pretty_startup_config: Option<bool>,
}

fn default_config_path() -> PathBuf {
  PathBuf::from("/config/config.toml")
}

/// Full configuration of the operator binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
  // ==========
  // = Server =
  // ==========
  /// IP address the webhook server binds to.
  /// Default: `[::]`
  #[serde(default = "default_bind_ip")]
  pub bind_ip: String,

  /// Port the webhook server runs on.
  /// Default: 9000
  #[serde(default = "default_port")]
  pub port: u16,

  /// Port the debug / metrics server runs on.
  /// Default: 9001
  #[serde(default = "default_debug_port")]
  pub debug_port: u16,

  // ===========
  // = Cluster =
  // ===========
  /// Namespace this operator runs in. Environments, Builds and the
  /// leader election lease live here.
  #[serde(default)]
  pub namespace: String,

  /// Wildcard domain pointed to the cluster. Environments are
  /// exposed as `<repository>-<pr>.<cluster_domain>`.
  #[serde(default)]
  pub cluster_domain: String,

  /// Namespace databases and database templates live in.
  #[serde(default)]
  pub database_namespace: String,

  /// Bind the build service account to this cluster role.
  /// No role binding is created when empty.
  #[serde(default)]
  pub build_cluster_role: String,

  /// Name of the service exposing the external status server.
  /// Routes fall back to this service while a container has no
  /// live endpoints, and `/term/` always points here.
  #[serde(default)]
  pub status_service_name: String,

  /// The service port exposing the status server.
  /// Default: 8000
  #[serde(default = "default_status_service_port")]
  pub status_service_port: i64,

  /// Namespace the routing virtualservices are written to.
  /// Default: `istio-system`
  #[serde(default = "default_istio_namespace")]
  pub istio_namespace: String,

  /// Istio gateway attached to the virtualservices.
  /// Default: `default`
  #[serde(default = "default_istio_gateway")]
  pub istio_gateway: String,

  // ===========
  // = Builder =
  // ===========
  /// Number of concurrent build workers.
  /// Default: 4
  #[serde(default = "default_build_workers")]
  pub build_workers: usize,

  /// Docker daemon address, eg `http://docker-builder:2375`.
  /// Connects with platform defaults when empty.
  #[serde(default)]
  pub docker_host: String,

  /// Docker API version to negotiate.
  /// Default: `1.39`
  #[serde(default = "default_docker_api_version")]
  pub docker_api_version: String,

  /// Registry prefix applied to built image names.
  #[serde(default)]
  pub docker_registry: String,

  /// Registry username used to push images.
  #[serde(default)]
  pub docker_registry_username: String,

  /// Registry password used to push images.
  #[serde(default)]
  pub docker_registry_password: String,

  // ==========
  // = GitHub =
  // ==========
  /// Secret used to verify GitHub webhook signatures.
  #[serde(default)]
  pub github_webhook_secret: String,

  /// Access token used to authenticate with the GitHub API.
  #[serde(default)]
  pub github_access_token: String,

  /// GitHub token owner username, used to filter comments created
  /// by the operator itself.
  #[serde(default)]
  pub github_username: String,

  // ============
  // = Database =
  // ============
  /// Storage class used to provision persistent storage for
  /// databases.
  #[serde(default)]
  pub database_storage_class_name: String,

  /// Service account applied to database pods.
  #[serde(default)]
  pub database_service_account_name: String,

  /// Seconds to wait for a provisioning database to answer on its
  /// port before the restore fails.
  /// Default: 300
  #[serde(default = "default_database_wait_deadline")]
  pub database_wait_deadline: u64,

  // ===========
  // = Cleanup =
  // ===========
  /// Hours a build lives without new pushes before the cleanup
  /// sweeper deletes its environment.
  /// Default: 48
  #[serde(default = "default_environment_lifetime_hours")]
  pub environment_lifetime_hours: u64,

  // ===========
  // = Logging =
  // ===========
  #[serde(default)]
  pub logging: LogConfig,

  /// Pretty print the (sanitized) config on startup.
  #[serde(default)]
  pub pretty_startup_config: bool,
}

fn default_bind_ip() -> String {
  String::from("[::]")
}

fn default_port() -> u16 {
  9000
}

fn default_debug_port() -> u16 {
  9001
}

fn default_status_service_port() -> i64 {
  8000
}

fn default_istio_namespace() -> String {
  String::from("istio-system")
}

fn default_istio_gateway() -> String {
  String::from("default")
}

fn default_build_workers() -> usize {
  4
}

fn default_docker_api_version() -> String {
  String::from("1.39")
}

fn default_database_wait_deadline() -> u64 {
  300
}

fn default_environment_lifetime_hours() -> u64 {
  48
}

impl Default for CoreConfig {
  fn default() -> Self {
    Self {
      bind_ip: default_bind_ip(),
      port: default_port(),
      debug_port: default_debug_port(),
      namespace: Default::default(),
      cluster_domain: Default::default(),
      database_namespace: Default::default(),
      build_cluster_role: Default::default(),
      status_service_name: Default::default(),
      status_service_port: default_status_service_port(),
      istio_namespace: default_istio_namespace(),
      istio_gateway: default_istio_gateway(),
      build_workers: default_build_workers(),
      docker_host: Default::default(),
      docker_api_version: default_docker_api_version(),
      docker_registry: Default::default(),
      docker_registry_username: Default::default(),
      docker_registry_password: Default::default(),
      github_webhook_secret: Default::default(),
      github_access_token: Default::default(),
      github_username: Default::default(),
      database_storage_class_name: Default::default(),
      database_service_account_name: Default::default(),
      database_wait_deadline: default_database_wait_deadline(),
      environment_lifetime_hours:
        default_environment_lifetime_hours(),
      logging: Default::default(),
      pretty_startup_config: Default::default(),
    }
  }
}

impl CoreConfig {
  /// Copy of the config with secret values redacted, for the
  /// startup printout.
  pub fn sanitized(&self) -> CoreConfig {
    let config = self.clone();
    CoreConfig {
      docker_registry_password: empty_or_redacted(
        &config.docker_registry_password,
      ),
      github_webhook_secret: empty_or_redacted(
        &config.github_webhook_secret,
      ),
      github_access_token: empty_or_redacted(
        &config.github_access_token,
      ),
      ..config
    }
  }
}
