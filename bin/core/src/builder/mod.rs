use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Instant,
};

use anyhow::Context;
use thiserror::Error;
use tokio::{
  sync::{Mutex, mpsc},
  task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use crate::{config::core_config, state};

pub mod archive;

mod comment;
mod scheduler;
mod worker;

pub use scheduler::Scheduler;

#[derive(Debug, Error)]
pub enum BuilderError {
  #[error("worker closed, cannot accept new jobs")]
  WorkerClosed,
  #[error("job ID outdated")]
  JobOutdated,
}

/// A build request, translated from a forge webhook.
pub struct NewBuild {
  pub owner: String,
  pub repository: String,
  pub number: i64,
  pub r#ref: String,
  pub user: String,
  pub first_run: bool,
  pub clean: bool,
  pub force: bool,
}

pub(crate) struct Job {
  pub id: u64,
  pub owner: String,
  pub repository: String,
  pub delete_environment: bool,

  pub pull_request_number: i64,
  pub r#ref: String,
  pub user: String,
  pub first_run: bool,
  pub clean: bool,
  pub force: bool,

  pub create_time: Instant,
}

impl Job {
  /// The per pull request ordering key.
  pub fn key(&self) -> String {
    format!(
      "{}/{}-{}",
      self.owner, self.repository, self.pull_request_number
    )
  }
}

struct JobResult {
  job: Job,
  error: Option<anyhow::Error>,
}

/// The builder accepts build / delete requests, serializes them per
/// pull request and executes them on a fixed worker pool.
pub struct Builder {
  scheduler: Scheduler,

  jobs_tx: mpsc::Sender<Job>,
  jobs_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
  results_tx: mpsc::Sender<JobResult>,
  results_rx: Mutex<Option<mpsc::Receiver<JobResult>>>,

  stopped: AtomicBool,
}

impl Default for Builder {
  fn default() -> Self {
    let (jobs_tx, jobs_rx) = mpsc::channel(100);
    let (results_tx, results_rx) = mpsc::channel(100);

    Builder {
      scheduler: Scheduler::default(),
      jobs_tx,
      jobs_rx: Arc::new(Mutex::new(jobs_rx)),
      results_tx,
      results_rx: Mutex::new(Some(results_rx)),
      stopped: AtomicBool::new(false),
    }
  }
}

impl Builder {
  pub(crate) fn scheduler(&self) -> &Scheduler {
    &self.scheduler
  }

  /// Admits and enqueues a new build job.
  pub async fn new_build(
    &self,
    build: NewBuild,
  ) -> Result<(), BuilderError> {
    if self.stopped.load(Ordering::SeqCst) {
      return Err(BuilderError::WorkerClosed);
    }

    let job = Job {
      id: self.scheduler.next_job_id(),
      owner: build.owner,
      repository: build.repository,
      delete_environment: false,

      pull_request_number: build.number,
      r#ref: build.r#ref,
      user: build.user,
      first_run: build.first_run,
      clean: build.clean,
      force: build.force,

      create_time: Instant::now(),
    };

    // Make sure the job ID is higher than the previous job for
    // this pull request.
    self.scheduler.schedule_job(&job.key(), job.id)?;

    self
      .jobs_tx
      .send(job)
      .await
      .map_err(|_| BuilderError::WorkerClosed)
  }

  /// Admits and enqueues an environment deletion job.
  pub async fn delete_build(
    &self,
    owner: String,
    repository: String,
    number: i64,
  ) -> Result<(), BuilderError> {
    if self.stopped.load(Ordering::SeqCst) {
      return Err(BuilderError::WorkerClosed);
    }

    let job = Job {
      id: self.scheduler.next_job_id(),
      owner,
      repository,
      delete_environment: true,

      pull_request_number: number,
      r#ref: String::new(),
      user: String::new(),
      first_run: false,
      clean: false,
      force: false,

      create_time: Instant::now(),
    };

    self.scheduler.schedule_job(&job.key(), job.id)?;

    self
      .jobs_tx
      .send(job)
      .await
      .map_err(|_| BuilderError::WorkerClosed)
  }

  /// Runs the worker pool until cancelled. In flight jobs finish
  /// before the workers stop.
  pub async fn start(
    &'static self,
    cancel: CancellationToken,
  ) -> anyhow::Result<()> {
    let mut workers = JoinSet::new();

    for id in 1..=core_config().build_workers {
      let jobs_rx = self.jobs_rx.clone();
      let results_tx = self.results_tx.clone();
      let cancel = cancel.clone();
      workers.spawn(worker::run(id, jobs_rx, results_tx, cancel));
    }

    // Collect job results in the background
    let mut results_rx = self
      .results_rx
      .lock()
      .await
      .take()
      .context("builder started more than once")?;
    tokio::spawn(async move {
      while let Some(result) = results_rx.recv().await {
        collect_result(result);
      }
    });

    // Stop accepting jobs once cancellation is requested
    let stop = cancel.clone();
    tokio::spawn(async move {
      stop.cancelled().await;
      self.stopped.store(true, Ordering::SeqCst);
    });

    while let Some(res) = workers.join_next().await {
      res.context("build worker panicked")?;
    }

    Ok(())
  }
}

fn collect_result(result: JobResult) {
  let JobResult { job, error } = result;
  let runtime = job.create_time.elapsed();

  // Track total job execution time
  let pull_request = job.pull_request_number.to_string();
  let id = job.id.to_string();
  state::metrics()
    .job_duration_seconds
    .with_label_values(&[
      job.owner.as_str(),
      job.repository.as_str(),
      pull_request.as_str(),
      id.as_str(),
      "total",
    ])
    .observe(runtime.as_secs_f64());

  match error {
    Some(e) => {
      error!(job_id = job.id, ?runtime, "job failed | {e:#}")
    }
    None => info!(job_id = job.id, ?runtime, "job succeeded"),
  }
}
