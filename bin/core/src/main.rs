use k8s_openapi::api::coordination::v1::Lease;
use kube::Api;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[macro_use]
extern crate tracing;

mod builder;
mod cleanup;
mod config;
mod controller;
mod debug;
mod docker;
mod github;
mod helpers;
mod lease;
mod listener;
mod metrics;
mod provisioner;
mod state;
mod template;

/// Name of the lease guarding the active replica.
const LEADER_LEASE: &str = "testenv-core-lock";

/// Seconds a replica may hold the lease without renewing it.
const LEASE_DURATION_SECS: i32 = 15;

async fn app() -> anyhow::Result<()> {
  let config = config::core_config();
  logger::init(&config.logging)?;

  info!("Testenv Core version: v{}", env!("CARGO_PKG_VERSION"));

  if config.pretty_startup_config {
    info!("{:#?}", config.sanitized());
  } else {
    info!("{:?}", config.sanitized());
  }

  // Initialize the clients, crashing early on misconfiguration
  state::init_kube_client().await;
  state::github();
  state::docker();

  let cancel = CancellationToken::new();

  // The debug / metrics server runs on every replica
  let debug_server = tokio::spawn(debug::run(cancel.clone()));

  // Everything else waits on the leader lease, making the
  // deployment safe to run with several replicas.
  let leases: Api<Lease> = Api::namespaced(
    state::kube_client().clone(),
    &config.namespace,
  );
  let identity = format!("testenv-core-{}", Uuid::new_v4());
  let elector = lease::Elector::new(
    leases,
    LEADER_LEASE,
    &identity,
    LEASE_DURATION_SECS,
  );

  let leader = elector.run(leader_tasks(cancel.clone()));

  let mut term_signal = tokio::signal::unix::signal(
    tokio::signal::unix::SignalKind::terminate(),
  )?;

  let result = tokio::select! {
    result = leader => match result {
      Ok(result) => result,
      Err(e) => Err(e.into()),
    },
    _ = tokio::signal::ctrl_c() => {
      info!("received interrupt signal");
      Ok(())
    }
    _ = term_signal.recv() => {
      info!("received terminate signal");
      Ok(())
    }
  };

  // Shut down whatever is still running
  cancel.cancel();
  let _ = debug_server.await;

  result
}

/// Runs the lease-gated components. The first component to stop
/// takes the rest down with it, and its error becomes the exit
/// status of the process.
async fn leader_tasks(
  cancel: CancellationToken,
) -> anyhow::Result<()> {
  info!("lease acquired, starting components");

  let mut components: JoinSet<anyhow::Result<()>> =
    JoinSet::new();
  components.spawn(listener::run(cancel.clone()));
  components.spawn(controller::run(cancel.clone()));
  components.spawn(state::builder().start(cancel.clone()));
  components.spawn(provisioner::run(cancel.clone()));
  components.spawn(cleanup::run(cancel.clone()));

  let mut result = Ok(());
  while let Some(next) = components.join_next().await {
    let outcome = match next {
      Ok(outcome) => outcome,
      Err(e) => Err(
        anyhow::Error::from(e).context("component panicked"),
      ),
    };
    if let Err(e) = outcome {
      error!("COMPONENT ERROR: {e:#}");
      if result.is_ok() {
        result = Err(e);
      }
    }
    // A finished component stops the whole group
    cancel.cancel();
  }

  result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  app().await
}
