use std::{path::PathBuf, sync::OnceLock};

use anyhow::Context;
use colored::Colorize;
use testenv_client::entities::{
  config::core::{CoreConfig, Env},
  logger::LogConfig,
};

/// Prefers the file contents over the direct value when both are
/// provided. Secrets are usually mounted as files in the cluster.
fn maybe_read_item_from_file(
  path: Option<PathBuf>,
  item: Option<String>,
) -> Option<String> {
  match path {
    Some(path) => {
      let contents = std::fs::read_to_string(&path)
        .with_context(|| {
          format!("Failed to read secret file at {path:?}")
        })
        .unwrap();
      Some(contents.trim().to_string())
    }
    None => item,
  }
}

pub fn core_config() -> &'static CoreConfig {
  static CORE_CONFIG: OnceLock<CoreConfig> = OnceLock::new();
  CORE_CONFIG.get_or_init(|| {
    let env: Env = match envy::from_env()
      .context("Failed to parse Testenv Core environment")
    {
      Ok(env) => env,
      Err(e) => {
        panic!("{e:?}");
      }
    };

    let config = if env.testenv_config_path.exists() {
      let contents =
        std::fs::read_to_string(&env.testenv_config_path)
          .expect("Failed to read config file");
      toml::from_str::<CoreConfig>(&contents)
        .expect("Failed at parsing config file")
    } else {
      println!(
        "{}: No config file found at {:?}, using default config",
        "INFO".green(),
        env.testenv_config_path,
      );
      CoreConfig::default()
    };

    // recreating CoreConfig here makes sure all env overrides
    // are applied.
    CoreConfig {
      // Secret things, overridable with file
      docker_registry_password: maybe_read_item_from_file(
        env.testenv_docker_registry_password_file,
        env.testenv_docker_registry_password,
      )
      .unwrap_or(config.docker_registry_password),
      github_webhook_secret: maybe_read_item_from_file(
        env.testenv_github_webhook_secret_file,
        env.testenv_github_webhook_secret,
      )
      .unwrap_or(config.github_webhook_secret),
      github_access_token: maybe_read_item_from_file(
        env.testenv_github_access_token_file,
        env.testenv_github_access_token,
      )
      .unwrap_or(config.github_access_token),

      // Non secrets
      bind_ip: env.testenv_bind_ip.unwrap_or(config.bind_ip),
      port: env.testenv_port.unwrap_or(config.port),
      debug_port: env
        .testenv_debug_port
        .unwrap_or(config.debug_port),
      namespace: env.testenv_namespace.unwrap_or(config.namespace),
      cluster_domain: env
        .testenv_cluster_domain
        .unwrap_or(config.cluster_domain),
      database_namespace: env
        .testenv_database_namespace
        .unwrap_or(config.database_namespace),
      build_cluster_role: env
        .testenv_build_cluster_role
        .unwrap_or(config.build_cluster_role),
      status_service_name: env
        .testenv_status_service_name
        .unwrap_or(config.status_service_name),
      status_service_port: env
        .testenv_status_service_port
        .unwrap_or(config.status_service_port),
      istio_namespace: env
        .testenv_istio_namespace
        .unwrap_or(config.istio_namespace),
      istio_gateway: env
        .testenv_istio_gateway
        .unwrap_or(config.istio_gateway),
      build_workers: env
        .testenv_build_workers
        .unwrap_or(config.build_workers),
      docker_host: env
        .testenv_docker_host
        .unwrap_or(config.docker_host),
      docker_api_version: env
        .testenv_docker_api_version
        .unwrap_or(config.docker_api_version),
      docker_registry: env
        .testenv_docker_registry
        .unwrap_or(config.docker_registry),
      docker_registry_username: env
        .testenv_docker_registry_username
        .unwrap_or(config.docker_registry_username),
      github_username: env
        .testenv_github_username
        .unwrap_or(config.github_username),
      database_storage_class_name: env
        .testenv_database_storage_class_name
        .unwrap_or(config.database_storage_class_name),
      database_service_account_name: env
        .testenv_database_service_account_name
        .unwrap_or(config.database_service_account_name),
      database_wait_deadline: env
        .testenv_database_wait_deadline
        .unwrap_or(config.database_wait_deadline),
      environment_lifetime_hours: env
        .testenv_environment_lifetime_hours
        .unwrap_or(config.environment_lifetime_hours),
      logging: LogConfig {
        level: env
          .testenv_logging_level
          .unwrap_or(config.logging.level),
        stdio: env
          .testenv_logging_stdio
          .unwrap_or(config.logging.stdio),
        pretty: env
          .testenv_logging_pretty
          .unwrap_or(config.logging.pretty),
        location: env
          .testenv_logging_location
          .unwrap_or(config.logging.location),
        ansi: env
          .testenv_logging_ansi
          .unwrap_or(config.logging.ansi),
        otlp_endpoint: env
          .testenv_logging_otlp_endpoint
          .unwrap_or(config.logging.otlp_endpoint),
        opentelemetry_service_name: env
          .testenv_logging_opentelemetry_service_name
          .unwrap_or(config.logging.opentelemetry_service_name),
        opentelemetry_scope_name: env
          .testenv_logging_opentelemetry_scope_name
          .unwrap_or(config.logging.opentelemetry_scope_name),
      },
      pretty_startup_config: env
        .testenv_pretty_startup_config
        .unwrap_or(config.pretty_startup_config),
    }
  })
}
