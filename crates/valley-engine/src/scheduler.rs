use indexmap::IndexMap;
use valley_contracts::catalog::{FullTransformStyle, SingleStyle};
use valley_contracts::jobs::{Generation, Job, JobStatus, ResultAggregate};

use crate::error::{Result, WorkflowError};
use crate::photo::Photo;
use crate::pool::{JobCompletion, JobOrigin, JobSink, JobTicket};
use crate::results::ResultStore;

/// What applying one completion did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub key: String,
    pub status: JobStatus,
    /// Every job in the aggregate has now settled.
    pub all_settled: bool,
}

/// Fans a photo out into one job per member style and folds the results back
/// into a keyed aggregate.
///
/// Merging is keyed and idempotent per key, so the final aggregate does not
/// depend on the order in which completions arrive.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchJobScheduler;

impl BatchJobScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Queues one job per member of `style`. Fails before queueing anything
    /// when the full transform has no members.
    pub fn start_batch(
        &self,
        photo: &Photo,
        style: &FullTransformStyle,
        generation: Generation,
        sink: &dyn JobSink,
    ) -> Result<ResultAggregate> {
        if style.members.is_empty() {
            return Err(WorkflowError::EmptyFullTransform(style.id.clone()));
        }
        let mut jobs: IndexMap<String, Job> = IndexMap::with_capacity(style.members.len());
        for member in &style.members {
            if jobs.contains_key(&member.id) {
                tracing::warn!(key = %member.id, "duplicate member style skipped");
                continue;
            }
            jobs.insert(member.id.clone(), Job::pending(member.clone(), generation));
        }
        for job in jobs.values_mut() {
            dispatch(sink, photo, JobOrigin::Batch, job);
        }
        Ok(ResultAggregate::Batch(jobs))
    }

    pub fn start_single(
        &self,
        photo: &Photo,
        style: &SingleStyle,
        generation: Generation,
        sink: &dyn JobSink,
    ) -> ResultAggregate {
        let mut job = Job::pending(style.clone(), generation);
        dispatch(sink, photo, JobOrigin::Single, &mut job);
        ResultAggregate::Single(job)
    }

    /// Installs a completion under its key.
    ///
    /// A completion from another generation is refused with
    /// `StaleGeneration` and leaves the store untouched.
    pub fn merge(
        &self,
        store: &mut ResultStore,
        completion: JobCompletion,
        current: Generation,
    ) -> Result<MergeOutcome> {
        if completion.generation != current {
            return Err(WorkflowError::StaleGeneration {
                key: completion.key,
                result: completion.generation,
                current,
            });
        }
        let status = store.settle(&completion.key, completion.outcome)?.status;
        Ok(MergeOutcome {
            key: completion.key,
            status,
            all_settled: store.is_settled(),
        })
    }
}

/// A job whose ticket cannot be queued fails on the spot rather than
/// staying pending forever.
fn dispatch(sink: &dyn JobSink, photo: &Photo, origin: JobOrigin, job: &mut Job) {
    let queued = sink.submit(JobTicket {
        key: job.key.clone(),
        style_id: job.style.id.clone(),
        photo: photo.clone(),
        generation: job.generation,
        origin,
    });
    if !queued {
        job.settle(Err("transform queue is closed".to_string()));
    }
}
