use valley_contracts::chat::{ChatAnnotations, ChatNote};
use valley_contracts::jobs::{Job, JobOutcome, ResultAggregate};

use crate::error::{Result, WorkflowError};

/// Single source of truth for the current results: the aggregate, the chat
/// notes attached to its keys and the browse cursor.
///
/// Writes are keyed. Installing an outcome for one key never reads or
/// writes any other entry.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    aggregate: Option<ResultAggregate>,
    annotations: ChatAnnotations,
    cursor: usize,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, aggregate: ResultAggregate) {
        self.aggregate = Some(aggregate);
        self.annotations.clear();
        self.cursor = 0;
    }

    pub fn clear(&mut self) {
        self.aggregate = None;
        self.annotations.clear();
        self.cursor = 0;
    }

    pub fn aggregate(&self) -> Option<&ResultAggregate> {
        self.aggregate.as_ref()
    }

    pub fn annotations(&self) -> &ChatAnnotations {
        &self.annotations
    }

    pub fn job(&self, key: &str) -> Option<&Job> {
        self.aggregate.as_ref()?.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.job(key).is_some()
    }

    pub fn is_settled(&self) -> bool {
        self.aggregate
            .as_ref()
            .is_some_and(ResultAggregate::is_settled)
    }

    pub(crate) fn mark_running(&mut self, key: &str) -> Result<()> {
        self.job_mut(key)?.mark_running();
        Ok(())
    }

    /// Replaces the outcome of `key` and nothing else.
    pub(crate) fn settle(&mut self, key: &str, outcome: JobOutcome) -> Result<&Job> {
        let job = self.job_mut(key)?;
        job.settle(outcome);
        Ok(job)
    }

    pub fn annotate(&mut self, key: &str, note: ChatNote) -> Result<()> {
        if !self.contains_key(key) {
            return Err(WorkflowError::UnknownKey(key.to_string()));
        }
        self.annotations.append(key, note);
        Ok(())
    }

    pub fn focused_key(&self) -> Option<String> {
        let keys = self.aggregate.as_ref()?.keys();
        keys.get(self.cursor.min(keys.len().saturating_sub(1))).cloned()
    }

    pub fn focus_next(&mut self) -> Option<String> {
        let len = self.aggregate.as_ref()?.len();
        if len > 0 {
            self.cursor = (self.cursor + 1) % len;
        }
        self.focused_key()
    }

    pub fn focus_prev(&mut self) -> Option<String> {
        let len = self.aggregate.as_ref()?.len();
        if len > 0 {
            self.cursor = (self.cursor + len - 1) % len;
        }
        self.focused_key()
    }

    pub fn focus_key(&mut self, key: &str) -> Result<()> {
        let position = self
            .aggregate
            .as_ref()
            .and_then(|aggregate| aggregate.keys().iter().position(|existing| existing == key))
            .ok_or_else(|| WorkflowError::UnknownKey(key.to_string()))?;
        self.cursor = position;
        Ok(())
    }

    fn job_mut(&mut self, key: &str) -> Result<&mut Job> {
        self.aggregate
            .as_mut()
            .and_then(|aggregate| aggregate.get_mut(key))
            .ok_or_else(|| WorkflowError::UnknownKey(key.to_string()))
    }
}
