//! Restores a dump into a freshly started database with
//! `pg_restore`.

use std::{path::PathBuf, time::Duration};

use anyhow::anyhow;
use command::run_standard_command;
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;

/// Path to the pg_restore executable baked into the operator
/// image.
const PG_RESTORE_BINARY: &str = "/usr/bin/pg_restore";

/// Parallel jobs used while restoring data.
const PG_RESTORE_JOBS: &str = "3";

pub(crate) struct PostgresRestoreOpts {
  pub name: String,
  pub host: String,
  pub port: i32,
  pub database: String,
  pub username: String,
  pub password: String,
  pub dump_file: PathBuf,
}

/// Waits for the database to answer, then restores the dump into
/// it. Cancellation aborts both the wait and the subprocess.
pub(crate) async fn restore(
  opts: &PostgresRestoreOpts,
  wait_deadline: Duration,
  cancel: &CancellationToken,
) -> anyhow::Result<()> {
  wait_for_database(opts, wait_deadline, cancel).await?;
  pg_restore(opts, cancel).await
}

/// Polls the database with a trivial query until it answers or
/// the deadline passes.
async fn wait_for_database(
  opts: &PostgresRestoreOpts,
  deadline: Duration,
  cancel: &CancellationToken,
) -> anyhow::Result<()> {
  let connection = format!(
    "host={} port={} user={} password={} dbname={} connect_timeout=5",
    opts.host,
    opts.port,
    opts.username,
    opts.password,
    opts.database,
  );

  let probe = async {
    loop {
      if let Ok((client, driver)) =
        tokio_postgres::connect(&connection, NoTls).await
      {
        let driver = tokio::spawn(driver);
        let answered =
          client.simple_query("select 1").await.is_ok();
        driver.abort();
        if answered {
          return;
        }
      }
      tokio::time::sleep(Duration::from_secs(1)).await;
    }
  };

  tokio::select! {
    _ = probe => Ok(()),
    _ = cancel.cancelled() => Ok(()),
    _ = tokio::time::sleep(deadline) => {
      Err(anyhow!("database unavailable, deadline reached"))
    }
  }
}

async fn pg_restore(
  opts: &PostgresRestoreOpts,
  cancel: &CancellationToken,
) -> anyhow::Result<()> {
  info!("running pg_restore on {}", opts.name);

  let command = format!(
    "{PG_RESTORE_BINARY} -h {} -p {} -U {} --dbname {} \
    --jobs {PG_RESTORE_JOBS} --no-owner --role {} --no-acl \
    --if-exists --clean --exit-on-error -Fc {}",
    opts.host,
    opts.port,
    opts.username,
    opts.database,
    opts.username,
    opts.dump_file.display(),
  );

  // Dropping the command future kills the subprocess
  let envs = [("PGPASSWORD", opts.password.as_str())];
  let output = tokio::select! {
    output = run_standard_command(
      &command,
      &envs,
    ) => output,
    _ = cancel.cancelled() => return Ok(()),
  };

  if !output.success() {
    error!("database restore for {} failed", opts.name);
    return Err(anyhow!(
      "pg_restore exited with {}: {}",
      output.status,
      output.stderr.trim(),
    ));
  }

  info!("pg_restore done on {}", opts.name);

  Ok(())
}
