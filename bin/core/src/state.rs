use std::sync::OnceLock;

use anyhow::{Context, anyhow};
use kube::Client;
use tokio::sync::Mutex;

use crate::{
  builder::Builder, config::core_config, docker::Docker,
  github::Github, metrics::Metrics,
};

static KUBE_CLIENT: OnceLock<Client> = OnceLock::new();

pub fn kube_client() -> &'static Client {
  KUBE_CLIENT.get().unwrap_or_else(|| {
    error!(
      "FATAL: kube_client accessed before initialized | Ensure init_kube_client() is called during startup | Exiting..."
    );
    std::process::exit(1)
  })
}

/// Must be called in app startup sequence.
pub async fn init_kube_client() {
  let init = async {
    let client = Client::try_default()
      .await
      .context("failed to initialize cluster api client")?;
    KUBE_CLIENT.set(client).map_err(|_| {
      anyhow!(
        "kube client initialized more than once - this should not happen"
      )
    })?;
    anyhow::Ok(())
  }
  .await;
  if let Err(e) = init {
    error!(
      "FATAL: Failed to initialize cluster api client | {e:#} | Exiting..."
    );
    std::process::exit(1)
  }
}

pub fn github() -> &'static Github {
  static GITHUB: OnceLock<Github> = OnceLock::new();
  GITHUB.get_or_init(|| {
    match Github::new(&core_config().github_access_token) {
      Ok(client) => client,
      Err(e) => {
        error!(
          "FATAL: Failed to initialize Github client | {e:#} | Exiting..."
        );
        std::process::exit(1)
      }
    }
  })
}

pub fn docker() -> &'static Docker {
  static DOCKER: OnceLock<Docker> = OnceLock::new();
  DOCKER.get_or_init(|| match Docker::new(core_config()) {
    Ok(client) => client,
    Err(e) => {
      error!(
        "FATAL: Failed to initialize Docker client | {e:#} | Exiting..."
      );
      std::process::exit(1)
    }
  })
}

pub fn builder() -> &'static Builder {
  static BUILDER: OnceLock<Builder> = OnceLock::new();
  BUILDER.get_or_init(Builder::default)
}

/// Serializes database claims so two concurrent build reconciles
/// can never claim the same database.
pub fn claim_lock() -> &'static Mutex<()> {
  static CLAIM_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
  CLAIM_LOCK.get_or_init(Default::default)
}

pub fn metrics() -> &'static Metrics {
  static METRICS: OnceLock<Metrics> = OnceLock::new();
  METRICS.get_or_init(Default::default)
}
