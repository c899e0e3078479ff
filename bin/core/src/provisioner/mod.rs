//! The database provisioner: keeps one template processor alive
//! per DatabaseTemplate, each downloading dumps and restoring
//! them into pending databases.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context as _, anyhow};
use arc_swap::ArcSwap;
use cache::CloneCache;
use kube::{Api, ResourceExt, api::ListParams};
use testenv_client::entities::database_template::DatabaseTemplate;
use tokio_util::sync::CancellationToken;

use crate::{config::core_config, state};

mod fetcher;
mod processor;
mod restore;

pub(crate) const SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Options handed to a template processor, refreshed on every
/// sync so template edits are picked up without a restart.
#[derive(Debug, Clone)]
pub(crate) struct ProcessorOpts {
  pub template_name: String,
  pub dump_source: String,
  pub dump_credentials: String,
  pub dump_refresh_interval: Duration,
}

pub(crate) struct ProcessorHandle {
  pub opts: ArcSwap<ProcessorOpts>,
  pub cancel: CancellationToken,
}

/// Runs the processor sync loop until cancelled.
pub async fn run(cancel: CancellationToken) -> anyhow::Result<()> {
  info!("starting database provisioner worker");

  let processors: CloneCache<String, Arc<ProcessorHandle>> =
    CloneCache::default();
  let mut interval = tokio::time::interval(SYNC_INTERVAL);

  loop {
    tokio::select! {
      _ = interval.tick() => {
        if let Err(e) = sync_processors(&processors, &cancel).await
        {
          warn!("sync processors failure | {e:#}");
        }
      }
      _ = cancel.cancelled() => break,
    }
  }

  // Stop the remaining processors
  for (_, processor) in processors.get_entries().await {
    processor.cancel.cancel();
  }

  info!("stopped database provisioner worker");

  Ok(())
}

/// Makes sure one processor runs per template in the cluster:
/// processors for deleted templates are stopped, new templates
/// get processors, existing ones get their options refreshed.
async fn sync_processors(
  processors: &CloneCache<String, Arc<ProcessorHandle>>,
  cancel: &CancellationToken,
) -> anyhow::Result<()> {
  let config = core_config();

  let templates: Api<DatabaseTemplate> = Api::namespaced(
    state::kube_client().clone(),
    &config.database_namespace,
  );
  let list = templates
    .list(&ListParams::default())
    .await
    .context("could not list database templates")?;

  let mut desired: HashMap<String, ProcessorOpts> = HashMap::new();
  for template in list.items {
    let name = template.name_any();
    let refresh_interval = match parse_interval(
      &template.spec.refresh_interval,
    ) {
      Ok(refresh_interval) => refresh_interval,
      Err(e) => {
        error!(
          "could not start database provisioner for template {name}, could not parse refresh interval | {e:#}"
        );
        continue;
      }
    };

    desired.insert(
      name.clone(),
      ProcessorOpts {
        template_name: name,
        dump_source: template.spec.dump_file.clone(),
        dump_credentials: template.spec.credentials.clone(),
        dump_refresh_interval: refresh_interval,
      },
    );
  }

  // Step 1: refresh options on running processors, stop the ones
  // whose template is gone.
  for (name, processor) in processors.get_entries().await {
    match desired.remove(&name) {
      Some(opts) => processor.opts.store(Arc::new(opts)),
      None => {
        processor.cancel.cancel();
        processors.remove(&name).await;
      }
    }
  }

  // Step 2: start processors for new templates.
  for (name, opts) in desired {
    let handle = Arc::new(ProcessorHandle {
      opts: ArcSwap::from_pointee(opts),
      cancel: cancel.child_token(),
    });

    processors.insert(name.clone(), handle.clone()).await;

    tokio::spawn(async move {
      info!("database provisioner for {name} starting");
      processor::run(handle).await;
      info!("database provisioner for {name} finished");
    });
  }

  Ok(())
}

/// Parses intervals like `90s`, `30m` or `12h`.
pub(crate) fn parse_interval(
  value: &str,
) -> anyhow::Result<Duration> {
  let value = value.trim();
  if value.len() < 2 {
    return Err(anyhow!("invalid interval {value:?}"));
  }

  let (number, unit) = value.split_at(value.len() - 1);
  let number: u64 = number
    .parse()
    .with_context(|| format!("invalid interval {value:?}"))?;

  let seconds = match unit {
    "s" => number,
    "m" => number * 60,
    "h" => number * 60 * 60,
    "d" => number * 60 * 60 * 24,
    _ => return Err(anyhow!("invalid interval unit {unit:?}")),
  };

  Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_refresh_intervals() {
    assert_eq!(
      parse_interval("90s").unwrap(),
      Duration::from_secs(90)
    );
    assert_eq!(
      parse_interval("30m").unwrap(),
      Duration::from_secs(30 * 60)
    );
    assert_eq!(
      parse_interval("12h").unwrap(),
      Duration::from_secs(12 * 60 * 60)
    );
    assert_eq!(
      parse_interval("1d").unwrap(),
      Duration::from_secs(24 * 60 * 60)
    );
  }

  #[test]
  fn rejects_invalid_intervals() {
    assert!(parse_interval("").is_err());
    assert!(parse_interval("12").is_err());
    assert!(parse_interval("h").is_err());
    assert!(parse_interval("12w").is_err());
    assert!(parse_interval("abch").is_err());
  }
}
