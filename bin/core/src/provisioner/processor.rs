//! One processor per template: a database watcher queueing
//! restore tasks, a dump fetcher and a small restore worker pool.

use std::{
  collections::HashMap,
  path::Path,
  sync::Arc,
  time::{Duration, Instant},
};

use kube::{
  Api, ResourceExt,
  api::{DeleteParams, ListParams, PostParams},
};
use testenv_client::entities::{
  LABEL_DATABASE_TEMPLATE,
  database::{Database, DatabasePhase},
};
use tokio::{
  sync::{Mutex, RwLock},
  task::JoinSet,
};

use super::{
  ProcessorHandle, SYNC_INTERVAL, fetcher,
  restore::{self, PostgresRestoreOpts},
};
use crate::{
  config::core_config, helpers::random_string, state,
};

/// Max concurrent restores per database template.
const RESTORE_POOL_SIZE: usize = 2;

#[derive(Debug, Clone)]
struct RestoreTask {
  name: String,
  database_name: String,
  host: String,
  port: i32,
  username: String,
  password: String,

  running: bool,
}

type Tasks = Arc<Mutex<HashMap<String, RestoreTask>>>;

pub(crate) async fn run(handle: Arc<ProcessorHandle>) {
  // The dump file lives in a per-processor scratch directory
  let tempdir = std::env::temp_dir()
    .join(format!("testenv-provisioner-{}", random_string(8)));
  if let Err(e) = tokio::fs::create_dir_all(&tempdir).await {
    error!(
      "FATAL: could not create dump file directory | {e:#}"
    );
    handle.cancel.cancel();
    return;
  }
  let dumpfile = tempdir.join("dumpfile");

  let tasks: Tasks = Default::default();
  let dump_file_lock: Arc<RwLock<()>> = Default::default();

  let mut group = JoinSet::new();
  group.spawn(watch_databases(handle.clone(), tasks.clone()));
  group.spawn(fetch_dump_file(
    handle.clone(),
    dump_file_lock.clone(),
    dumpfile.clone(),
  ));
  for _ in 0..RESTORE_POOL_SIZE {
    group.spawn(restore_worker(
      handle.clone(),
      tasks.clone(),
      dump_file_lock.clone(),
      dumpfile.clone(),
    ));
  }

  while group.join_next().await.is_some() {}

  // Clean up the dump file scratch directory
  if let Err(e) = tokio::fs::remove_dir_all(&tempdir).await {
    warn!("could not remove dump file directory | {e:#}");
  }
}

/// Lists the template's databases every few seconds. Pending
/// databases become restore tasks; provisioning databases without
/// a local task belonged to a dead process and are deleted.
async fn watch_databases(
  handle: Arc<ProcessorHandle>,
  tasks: Tasks,
) {
  info!("starting database watcher");

  let mut interval = tokio::time::interval(SYNC_INTERVAL);

  loop {
    tokio::select! {
      _ = interval.tick() => {}
      _ = handle.cancel.cancelled() => break,
    }

    let opts = handle.opts.load_full();
    let databases: Api<Database> = Api::namespaced(
      state::kube_client().clone(),
      &core_config().database_namespace,
    );

    let list = match databases
      .list(&ListParams::default().labels(&format!(
        "{LABEL_DATABASE_TEMPLATE}={}",
        opts.template_name
      )))
      .await
    {
      Ok(list) => list,
      Err(e) => {
        warn!(
          "fetch databases {} failed | {e:#}",
          opts.template_name
        );
        tokio::time::sleep(Duration::from_secs(10)).await;
        continue;
      }
    };

    for database in list.items {
      let Some(status) = database.status.as_ref() else {
        continue;
      };

      match status.phase {
        DatabasePhase::Pending => {
          let mut tasks = tasks.lock().await;
          if !tasks.contains_key(&database.name_any()) {
            info!(
              "creating restore task for {}",
              database.name_any()
            );
            tasks.insert(
              database.name_any(),
              RestoreTask {
                name: database.name_any(),
                database_name: status.database_name.clone(),
                host: status.host.clone(),
                port: status.port,
                username: status.username.clone(),
                password: status.password.clone(),
                running: false,
              },
            );
          }
        }
        DatabasePhase::Provisioning => {
          // A provisioning database without a task here is owned
          // by a process that no longer exists.
          let owned =
            tasks.lock().await.contains_key(&database.name_any());
          if !owned {
            warn!(
              "restore process for {} not owned by us, deleting database",
              database.name_any()
            );
            match databases
              .delete(
                &database.name_any(),
                &DeleteParams::default(),
              )
              .await
            {
              Ok(_) => {}
              Err(kube::Error::Api(e)) if e.code == 404 => {}
              Err(e) => warn!(
                "could not delete orphaned database {} | {e:#}",
                database.name_any()
              ),
            }
          }
        }
        _ => {}
      }
    }
  }

  info!("stopped database watcher");
}

/// Downloads the dump, sleeps for the refresh interval, repeats.
/// The writer lock blocks the download while restores read the
/// previous dump.
async fn fetch_dump_file(
  handle: Arc<ProcessorHandle>,
  dump_file_lock: Arc<RwLock<()>>,
  dumpfile: std::path::PathBuf,
) {
  loop {
    let opts = handle.opts.load_full();

    info!("fetching dump file {}", opts.dump_source);
    let start = Instant::now();
    let result = {
      let _guard = dump_file_lock.write().await;
      tokio::select! {
        result = fetcher::fetch(&opts, &dumpfile) => result,
        _ = handle.cancel.cancelled() => return,
      }
    };

    match result {
      Ok(()) => {
        state::metrics()
          .dump_download_seconds
          .with_label_values(&[opts.template_name.as_str()])
          .observe(start.elapsed().as_secs_f64());
        info!("fetching dump file {} done", opts.dump_source);
      }
      Err(e) => {
        warn!(
          "fetching dump file {} stopped | {e:#}",
          opts.dump_source
        );
      }
    }

    tokio::select! {
      _ = tokio::time::sleep(opts.dump_refresh_interval) => {}
      _ = handle.cancel.cancelled() => return,
    }
  }
}

/// Picks non-running tasks off the queue and restores them.
async fn restore_worker(
  handle: Arc<ProcessorHandle>,
  tasks: Tasks,
  dump_file_lock: Arc<RwLock<()>>,
  dumpfile: std::path::PathBuf,
) {
  info!("starting restore worker");

  loop {
    if handle.cancel.is_cancelled() {
      break;
    }

    let current = {
      let mut tasks = tasks.lock().await;
      tasks.values_mut().find(|task| !task.running).map(|task| {
        task.running = true;
        task.clone()
      })
    };

    let Some(task) = current else {
      tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        _ = handle.cancel.cancelled() => break,
      }
      continue;
    };

    let (reschedule, result) =
      process_task(&handle, &task, &dump_file_lock, &dumpfile)
        .await;
    if let Err(e) = result {
      warn!(
        "database restore for database {} returned with error | {e:#}",
        task.name
      );
    }

    // Finish the task or put it back on the queue
    let mut tasks = tasks.lock().await;
    if reschedule {
      info!(
        "restore of {} database put back on queue",
        task.name
      );
      if let Some(task) = tasks.get_mut(&task.name) {
        task.running = false;
      }
    } else {
      info!(
        "restore of {} database removed from queue",
        task.name
      );
      tasks.remove(&task.name);
    }
  }

  info!("stopped restore worker");
}

/// Drives one database through provisioning -> ready. Failed
/// tasks are dropped, the watcher recreates them on its next
/// tick if the database still exists.
async fn process_task(
  handle: &ProcessorHandle,
  task: &RestoreTask,
  dump_file_lock: &RwLock<()>,
  dumpfile: &Path,
) -> (bool, anyhow::Result<()>) {
  // The read lock keeps the dump stable for the whole restore
  let _guard = dump_file_lock.read().await;

  // The dump must be on disk, otherwise wait for the fetcher
  match tokio::fs::try_exists(dumpfile).await {
    Ok(true) => {}
    Ok(false) => return (true, Ok(())),
    Err(e) => return (true, Err(e.into())),
  }

  let config = core_config();
  let template = handle.opts.load().template_name.clone();
  let databases: Api<Database> = Api::namespaced(
    state::kube_client().clone(),
    &config.database_namespace,
  );

  info!(database = %task.name, "retrieving database object");
  let mut database = match databases.get(&task.name).await {
    Ok(database) => database,
    Err(e) => return (false, Err(e.into())),
  };

  info!(database = %task.name, "setting database in provisioning mode");
  if let Err(e) = set_database_phase(
    &databases,
    &mut database,
    DatabasePhase::Provisioning,
  )
  .await
  {
    return (false, Err(e));
  }
  state::metrics()
    .database_phases
    .with_label_values(&[template.as_str(), "provisioning"])
    .inc();

  info!(database = %task.name, "restoring data");
  let start = Instant::now();
  let result = restore::restore(
    &PostgresRestoreOpts {
      name: task.name.clone(),
      host: task.host.clone(),
      port: task.port,
      database: task.database_name.clone(),
      username: task.username.clone(),
      password: task.password.clone(),
      dump_file: dumpfile.to_path_buf(),
    },
    Duration::from_secs(config.database_wait_deadline),
    &handle.cancel,
  )
  .await;
  state::metrics()
    .dump_restore_seconds
    .with_label_values(&[task.database_name.as_str()])
    .observe(start.elapsed().as_secs_f64());
  if let Err(e) = result {
    return (false, Err(e));
  }

  info!(database = %task.name, "setting database in ready mode");
  if let Err(e) = set_database_phase(
    &databases,
    &mut database,
    DatabasePhase::Ready,
  )
  .await
  {
    return (false, Err(e));
  }
  state::metrics()
    .database_phases
    .with_label_values(&[template.as_str(), "ready"])
    .inc();

  info!(database = %task.name, "restore done");

  (false, Ok(()))
}

async fn set_database_phase(
  databases: &Api<Database>,
  database: &mut Database,
  phase: DatabasePhase,
) -> anyhow::Result<()> {
  use anyhow::Context as _;

  database.status.get_or_insert_default().phase = phase;

  let name = database.name_any();
  *database = databases
    .replace(&name, &PostParams::default(), database)
    .await
    .context("could not update database phase")?;

  Ok(())
}
