use std::collections::HashMap;

use valley_contracts::jobs::{Generation, JobStatus};

use crate::error::{Result, WorkflowError};
use crate::photo::Photo;
use crate::pool::{JobCompletion, JobOrigin, JobSink, JobTicket};
use crate::results::ResultStore;

/// Re-runs one job of the current result, in place.
///
/// At most one retry per key is in flight. The in-flight marker is keyed by
/// generation so a late completion from a reset session cannot release the
/// marker of a newer retry of the same key.
#[derive(Debug, Clone, Default)]
pub struct RetryCoordinator {
    in_flight: HashMap<String, Generation>,
}

impl RetryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Marks `key` running and queues its transform again.
    ///
    /// `UnknownKey` when the store has no such job, `DuplicateRetry` when a
    /// retry of that key has not finished yet. Neither touches the store.
    pub fn begin(
        &mut self,
        key: &str,
        photo: &Photo,
        store: &mut ResultStore,
        generation: Generation,
        sink: &dyn JobSink,
    ) -> Result<()> {
        let style_id = store
            .job(key)
            .map(|job| job.style.id.clone())
            .ok_or_else(|| WorkflowError::UnknownKey(key.to_string()))?;
        if self.in_flight.contains_key(key) {
            return Err(WorkflowError::DuplicateRetry(key.to_string()));
        }
        self.in_flight.insert(key.to_string(), generation);
        store.mark_running(key)?;

        let queued = sink.submit(JobTicket {
            key: key.to_string(),
            style_id,
            photo: photo.clone(),
            generation,
            origin: JobOrigin::Retry,
        });
        if !queued {
            self.in_flight.remove(key);
            store.settle(key, Err("transform queue is closed".to_string()))?;
        }
        Ok(())
    }

    /// Installs a retry outcome under its key. The in-flight marker it owns
    /// is released whether or not the outcome is still current.
    pub fn finish(
        &mut self,
        store: &mut ResultStore,
        completion: JobCompletion,
        current: Generation,
    ) -> Result<JobStatus> {
        if self.in_flight.get(&completion.key) == Some(&completion.generation) {
            self.in_flight.remove(&completion.key);
        }
        if completion.generation != current {
            return Err(WorkflowError::StaleGeneration {
                key: completion.key,
                result: completion.generation,
                current,
            });
        }
        Ok(store.settle(&completion.key, completion.outcome)?.status)
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}
