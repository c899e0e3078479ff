//! Coordination lease based leader election. The operator is safe
//! to run with several replicas: the reconcilers, builder, webhook
//! listener, provisioner and sweeper only run on the replica
//! holding the lease.

use std::convert::Infallible;

use futures_util::{
  StreamExt,
  future::{self, Either},
  pin_mut,
};
use k8s_openapi::{
  api::coordination::v1::{Lease, LeaseSpec},
  apimachinery::pkg::apis::meta::v1::MicroTime,
};
use chrono::{DateTime, Duration, Utc};
use kube::{Api, runtime::watcher::{self, watch_object}};
use thiserror::Error;

pub struct Elector {
  api: Api<Lease>,
  name: String,
  identity: String,
  lease_duration_secs: i32,
}

impl Elector {
  #[must_use]
  pub fn new(
    api: Api<Lease>,
    lease: &str,
    instance: &str,
    lease_duration_secs: i32,
  ) -> Self {
    Self {
      api,
      name: lease.to_string(),
      identity: instance.to_string(),
      lease_duration_secs,
    }
  }

  /// Acquires the lease, runs the future while keeping the lease
  /// renewed, and releases it afterwards. Losing the lease aborts
  /// the future.
  pub async fn run<F: Future>(
    &self,
    fut: F,
  ) -> Result<F::Output, RunError> {
    self.acquire().await.map_err(RunError::Acquire)?;
    let renewer = self.keep_renewed();
    pin_mut!(renewer, fut);
    let output = match future::select(renewer, fut).await {
      Either::Left((err, _)) => return Err(RunError::Renew(err)),
      Either::Right((output, _)) => output,
    };
    self.release().await.map_err(RunError::Release)?;
    Ok(output)
  }

  async fn keep_renewed(&self) -> RenewError {
    let lease_watcher = watch_object(self.api.clone(), &self.name);
    let active_renewal = Either::Left(future::pending::<
      Result<Infallible, TryAcquireError>,
    >());
    let expiration_watchdog =
      Either::Left(future::pending::<RenewError>());
    pin_mut!(lease_watcher, active_renewal, expiration_watchdog);
    loop {
      match future::select(
        lease_watcher.next(),
        future::select(
          active_renewal.as_mut(),
          expiration_watchdog.as_mut(),
        ),
      )
      .await
      {
        // Lease watcher
        Either::Left((None, _)) => {
          return RenewError::WatcherClosed;
        }
        Either::Left((Some(Err(err)), _)) => {
          return RenewError::Watch(err);
        }
        Either::Left((Some(Ok(lease)), _)) => {
          let now = Utc::now();
          let lease_state = self.state(
            &lease.and_then(|l| l.spec).unwrap_or_default(),
          );
          if let LeaseState::HeldBySelf {
            renew_at,
            expires_at,
          } = lease_state
          {
            expiration_watchdog.set(Either::Right(async move {
              if let Ok(duration) = (expires_at - now).to_std() {
                tokio::time::sleep(duration).await;
              }
              RenewError::Timeout
            }));
            active_renewal.set(Either::Right(async move {
              debug!(%renew_at, "scheduling next lease renewal");
              if let Ok(duration) = (renew_at - now).to_std() {
                tokio::time::sleep(duration).await;
              }
              self.try_acquire(now).await?;
              // The watcher emits the renewed lease, which
              // schedules the next renewal.
              future::pending().await
            }))
          } else {
            return RenewError::Lost;
          }
        }

        // Renewer
        Either::Right((Either::Left((Err(err), _)), _)) => {
          return RenewError::Acquire(err);
        }
        Either::Right((Either::Left((Ok(x), _)), _)) => match x {},

        // Watchdog
        Either::Right((Either::Right((err, _)), _)) => return err,
      }
    }
  }

  /// Blocks until the lease is held by this instance.
  async fn acquire(&self) -> Result<(), AcquireError> {
    info!(
      lease = %self.name,
      identity = %self.identity,
      "waiting on lease acquisition"
    );

    let lease_watcher = watch_object(self.api.clone(), &self.name);
    let active_acquisition = Either::Left(future::pending());
    pin_mut!(lease_watcher, active_acquisition);
    loop {
      match future::select(
        lease_watcher.next(),
        active_acquisition.as_mut(),
      )
      .await
      {
        Either::Left((None, _)) => {
          return Err(AcquireError::WatcherClosed);
        }
        Either::Left((Some(Err(err)), _)) => {
          return Err(AcquireError::Watch(err));
        }
        Either::Left((Some(Ok(lease)), _)) => {
          let lease_state = self.state(
            &lease.and_then(|l| l.spec).unwrap_or_default(),
          );

          if let LeaseState::HeldBySelf { .. } = lease_state {
            info!(lease = %self.name, "lease acquired");
            return Ok(());
          }

          active_acquisition.set(Either::Right(async move {
            let now = Utc::now();
            if let LeaseState::HeldByOther {
              holder,
              expires_at,
            } = lease_state
            {
              info!(
                %holder,
                %expires_at,
                "lease held elsewhere, scheduling next acquisition attempt"
              );
              if let Ok(duration) = (expires_at - now).to_std() {
                tokio::time::sleep(duration).await;
              }
            }
            self.try_acquire(now).await?;
            Ok(())
          }))
        }
        Either::Right((
          Err(TryAcquireError::Acquire(err)),
          _,
        )) => return Err(err),
        Either::Right((
          Ok(()) | Err(TryAcquireError::Conflict { .. }),
          _,
        )) => {
          // The watcher emits the new lease, triggering a
          // successful return or a re-check.
          active_acquisition.set(Either::Left(future::pending()));
        }
      }
    }
  }

  async fn try_acquire(
    &self,
    now: DateTime<Utc>,
  ) -> Result<(), TryAcquireError> {
    let mut entry = self
      .api
      .entry(&self.name)
      .await
      .map_err(AcquireError::Get)
      .map_err(TryAcquireError::Acquire)?
      .or_insert(Lease::default);
    let lease =
      entry.get_mut().spec.get_or_insert_with(LeaseSpec::default);
    let lease_state = self.state(lease);

    if let LeaseState::HeldByOther {
      ref holder,
      expires_at,
    } = lease_state
      && expires_at > now
    {
      return Err(TryAcquireError::Conflict {
        holder: holder.clone(),
        expires_at,
      });
    }

    if !matches!(lease_state, LeaseState::HeldBySelf { .. }) {
      lease.holder_identity = Some(self.identity.clone());
      lease.acquire_time = Some(MicroTime(now));
      *lease.lease_transitions.get_or_insert(0) += 1;
    }
    lease.renew_time = Some(MicroTime(now));
    lease.lease_duration_seconds = Some(self.lease_duration_secs);

    entry
      .commit(&Default::default())
      .await
      .map_err(AcquireError::Commit)
      .map_err(TryAcquireError::Acquire)?;
    Ok(())
  }

  async fn release(&self) -> Result<(), ReleaseError> {
    let mut entry = self
      .api
      .entry(&self.name)
      .await
      .map_err(ReleaseError::Get)?
      .or_insert(Lease::default);
    let lease =
      entry.get_mut().spec.get_or_insert_with(LeaseSpec::default);
    match self.state(lease) {
      LeaseState::Unheld => Ok(()),
      LeaseState::HeldByOther { holder, .. } => {
        Err(ReleaseError::AlreadyStolen { holder })
      }
      LeaseState::HeldBySelf { .. } => {
        lease.holder_identity = None;
        lease.acquire_time = None;
        lease.renew_time = None;
        lease.lease_duration_seconds = None;
        *lease.lease_transitions.get_or_insert(0) += 1;
        entry
          .commit(&Default::default())
          .await
          .map_err(ReleaseError::Commit)?;
        Ok(())
      }
    }
  }

  fn state(&self, lease: &LeaseSpec) -> LeaseState {
    let lease_duration = Duration::seconds(
      lease.lease_duration_seconds.unwrap_or(0).into(),
    );
    let last_renewal = lease
      .renew_time
      .as_ref()
      .map_or(DateTime::<Utc>::MIN_UTC, |dt| dt.0);

    match &lease.holder_identity {
      None => LeaseState::Unheld,
      Some(holder) if holder == &self.identity => {
        LeaseState::HeldBySelf {
          expires_at: last_renewal + lease_duration,
          renew_at: last_renewal + lease_duration / 2,
        }
      }
      Some(holder) => LeaseState::HeldByOther {
        holder: holder.clone(),
        expires_at: last_renewal + lease_duration,
      },
    }
  }
}

#[derive(Debug, PartialEq, Eq)]
enum LeaseState {
  Unheld,
  HeldByOther {
    holder: String,
    expires_at: DateTime<Utc>,
  },
  HeldBySelf {
    renew_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
  },
}

#[derive(Debug, Error)]
pub enum AcquireError {
  #[error("lease watcher closed")]
  WatcherClosed,
  #[error("failed to watch lease: {0}")]
  Watch(#[source] watcher::Error),
  #[error("failed to get lease: {0}")]
  Get(#[source] kube::Error),
  #[error("failed to commit lease: {0}")]
  Commit(#[source] kube::api::entry::CommitError),
}

#[derive(Debug, Error)]
pub enum TryAcquireError {
  #[error(transparent)]
  Acquire(AcquireError),
  #[error("lease is held by {holder} until {expires_at}")]
  Conflict {
    holder: String,
    expires_at: DateTime<Utc>,
  },
}

#[derive(Debug, Error)]
pub enum ReleaseError {
  #[error("failed to get lease: {0}")]
  Get(#[source] kube::Error),
  #[error("failed to commit lease: {0}")]
  Commit(#[source] kube::api::entry::CommitError),
  #[error("lease was already stolen by {holder}")]
  AlreadyStolen { holder: String },
}

#[derive(Debug, Error)]
pub enum RenewError {
  #[error("lease watcher closed")]
  WatcherClosed,
  #[error("failed to watch lease: {0}")]
  Watch(#[source] watcher::Error),
  #[error("failed to renew lease: {0}")]
  Acquire(#[source] TryAcquireError),
  #[error("lease renewal timed out")]
  Timeout,
  #[error("lease lost to another holder")]
  Lost,
}

#[derive(Debug, Error)]
pub enum RunError {
  #[error("failed to acquire lease: {0}")]
  Acquire(#[source] AcquireError),
  #[error("failed to renew lease: {0}")]
  Renew(#[source] RenewError),
  #[error("failed to release lease: {0}")]
  Release(#[source] ReleaseError),
}
