//! Background sweeper retiring builds that exceeded the
//! environment lifetime.

use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::{
  Api, ResourceExt,
  api::{DeleteParams, ListParams},
};
use testenv_client::entities::build::Build;
use tokio_util::sync::CancellationToken;

use crate::{config::core_config, github::StatusState, state};

/// Delay between cleanup runs.
const ITERATION_DELAY: Duration = Duration::from_secs(10 * 60);

/// Runs the sweeper until cancelled.
pub async fn run(cancel: CancellationToken) -> anyhow::Result<()> {
  let mut interval = tokio::time::interval(ITERATION_DELAY);
  // The first tick fires immediately, wait a full delay instead
  interval.tick().await;

  loop {
    tokio::select! {
      _ = interval.tick() => {
        if let Err(e) = sweep().await {
          warn!("could not lookup builds | {e:#}");
        }
      }
      _ = cancel.cancelled() => return Ok(()),
    }
  }
}

/// Deletes builds older than the environment lifetime. The owner
/// reference cascade removes every derived resource. Errors on
/// individual builds are logged and skipped.
async fn sweep() -> anyhow::Result<()> {
  let config = core_config();

  let builds: Api<Build> = Api::namespaced(
    state::kube_client().clone(),
    &config.namespace,
  );
  let list = builds.list(&ListParams::default()).await?;

  info!(
    build_count = list.items.len(),
    "scanning for stale builds"
  );

  let lifetime =
    chrono::Duration::hours(config.environment_lifetime_hours as i64);
  let now = Utc::now();

  for build in list.items {
    if !is_stale(&build, now, lifetime) {
      continue;
    }

    let git = &build.spec.git;
    info!(
      build = %build.name_any(),
      environment = %build.spec.environment,
      owner = %git.owner,
      repository = %git.repository,
      "old build detected"
    );

    if let Err(e) = builds
      .delete(&build.name_any(), &DeleteParams::default())
      .await
    {
      warn!(
        build = %build.name_any(),
        "could not delete build | {e:#}"
      );
      continue;
    }

    if let Err(e) = state::github()
      .create_status(
        &git.owner,
        &git.repository,
        &git.r#ref,
        StatusState::Success,
        "Environment closed (no activity last 48h)",
        "",
      )
      .await
    {
      warn!(
        build = %build.name_any(),
        "could not update commit status | {e:#}"
      );
    }
  }

  Ok(())
}

/// Whether the build was created before the oldest allowed time.
fn is_stale(
  build: &Build,
  now: DateTime<Utc>,
  lifetime: chrono::Duration,
) -> bool {
  match &build.metadata.creation_timestamp {
    Some(created) => created.0 < now - lifetime,
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
  use testenv_client::entities::build::BuildSpec;

  use super::*;

  fn build_created_hours_ago(hours: i64) -> Build {
    let mut build =
      Build::new("acme-widgets-42", BuildSpec::default());
    build.metadata.creation_timestamp =
      Some(Time(Utc::now() - chrono::Duration::hours(hours)));
    build
  }

  #[test]
  fn builds_older_than_the_lifetime_are_stale() {
    let lifetime = chrono::Duration::hours(48);
    let now = Utc::now();

    assert!(is_stale(&build_created_hours_ago(49), now, lifetime));
    assert!(!is_stale(&build_created_hours_ago(47), now, lifetime));
  }

  #[test]
  fn builds_without_creation_timestamp_are_kept() {
    let build = Build::new("acme-widgets-42", BuildSpec::default());
    assert!(!is_stale(
      &build,
      Utc::now(),
      chrono::Duration::hours(48)
    ));
  }
}
