use prometheus::{
  HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
};

/// Metrics observed by the builder and the database provisioner,
/// exposed on the debug server.
#[derive(Clone)]
pub struct Metrics {
  pub registry: Registry,
  /// Per stage build job runtime.
  pub job_duration_seconds: HistogramVec,
  /// Database dump download time.
  pub dump_download_seconds: HistogramVec,
  /// Dump restore time.
  pub dump_restore_seconds: HistogramVec,
  /// Database count per phase transition.
  pub database_phases: IntCounterVec,
}

impl Default for Metrics {
  fn default() -> Self {
    let job_duration_seconds = HistogramVec::new(
      HistogramOpts::new(
        "job_duration_seconds",
        "Job stage duration in seconds.",
      )
      .namespace("test_environment")
      .subsystem("builder"),
      &["owner", "repository", "pull_request", "job", "operation"],
    )
    .expect("invalid job_duration_seconds metric");

    let dump_download_seconds = HistogramVec::new(
      HistogramOpts::new(
        "dump_download_seconds",
        "Database dump download time in seconds",
      )
      .namespace("test_environment")
      .subsystem("databaseprovisioner"),
      &["database"],
    )
    .expect("invalid dump_download_seconds metric");

    let dump_restore_seconds = HistogramVec::new(
      HistogramOpts::new(
        "dump_restore_seconds",
        "Dump restore time in seconds",
      )
      .namespace("test_environment")
      .subsystem("databaseprovisioner"),
      &["database"],
    )
    .expect("invalid dump_restore_seconds metric");

    let database_phases = IntCounterVec::new(
      Opts::new("database_phases", "Database count per phases")
        .namespace("test_environment")
        .subsystem("databaseprovisioner"),
      &["database", "phase"],
    )
    .expect("invalid database_phases metric");

    let registry = Registry::new();
    registry
      .register(Box::new(job_duration_seconds.clone()))
      .expect("could not register job_duration_seconds");
    registry
      .register(Box::new(dump_download_seconds.clone()))
      .expect("could not register dump_download_seconds");
    registry
      .register(Box::new(dump_restore_seconds.clone()))
      .expect("could not register dump_restore_seconds");
    registry
      .register(Box::new(database_phases.clone()))
      .expect("could not register database_phases");

    Metrics {
      registry,
      job_duration_seconds,
      dump_download_seconds,
      dump_restore_seconds,
      database_phases,
    }
  }
}
