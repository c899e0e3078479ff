use std::{collections::HashMap, sync::Mutex};

use super::BuilderError;

/// Hands out monotonically increasing job ids and blocks jobs when
/// a newer job for the same pull request was already admitted.
#[derive(Default)]
pub struct Scheduler {
  inner: Mutex<SchedulerInner>,
}

struct SchedulerInner {
  next_job_id: u64,
  jobs: HashMap<String, u64>,
}

impl Default for SchedulerInner {
  fn default() -> Self {
    SchedulerInner {
      next_job_id: 1,
      jobs: HashMap::new(),
    }
  }
}

impl Scheduler {
  /// Returns the next job id and increases the counter.
  pub fn next_job_id(&self) -> u64 {
    let mut inner = self.inner.lock().unwrap();

    let next_job_id = inner.next_job_id;
    inner.next_job_id = next_job_id + 1;

    next_job_id
  }

  /// Admits the job unless a job with a higher id exists for the
  /// same key. Replays of the same id are admitted.
  pub fn schedule_job(
    &self,
    name: &str,
    id: u64,
  ) -> Result<(), BuilderError> {
    let mut inner = self.inner.lock().unwrap();

    match inner.jobs.get(name) {
      Some(last_id) if *last_id > id => {
        Err(BuilderError::JobOutdated)
      }
      _ => {
        inner.jobs.insert(name.to_string(), id);
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn next_job_id_increases() {
    let scheduler = Scheduler::default();

    assert_eq!(scheduler.next_job_id(), 1);
    assert_eq!(scheduler.next_job_id(), 2);
    assert_eq!(scheduler.next_job_id(), 3);

    assert_eq!(scheduler.inner.lock().unwrap().next_job_id, 4);
  }

  #[test]
  fn schedule_job_rejects_lower_ids() {
    let scheduler = Scheduler::default();

    assert!(scheduler.schedule_job("test", 1).is_ok());
    assert!(scheduler.schedule_job("test", 5).is_ok());
    assert!(matches!(
      scheduler.schedule_job("test", 2),
      Err(BuilderError::JobOutdated)
    ));
    assert!(scheduler.schedule_job("test", 6).is_ok());
    // Replay of the last admitted id is harmless
    assert!(scheduler.schedule_job("test", 6).is_ok());
  }

  #[test]
  fn schedule_job_tracks_keys_independently() {
    let scheduler = Scheduler::default();

    assert!(scheduler.schedule_job("acme/widgets-1", 7).is_ok());
    assert!(scheduler.schedule_job("acme/widgets-2", 2).is_ok());
    assert!(matches!(
      scheduler.schedule_job("acme/widgets-1", 3),
      Err(BuilderError::JobOutdated)
    ));
  }
}
