use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use valley_contracts::catalog::{Category, Style, StyleCatalog};
use valley_contracts::chat::{ChatAnnotations, ChatNote};
use valley_contracts::events::{EventPayload, SessionEventLog};
use valley_contracts::gallery::GallerySnapshot;
use valley_contracts::jobs::{Generation, Job, JobStatus, ResultAggregate};

use crate::auth::SessionAuthority;
use crate::config::WorkflowConfig;
use crate::error::{Result, WorkflowError};
use crate::gallery::GallerySink;
use crate::gate::{GuideHint, PairReady, SelectionGate};
use crate::photo::Photo;
use crate::pool::{JobCompletion, JobOrigin, WorkerEvent, WorkerPool};
use crate::results::ResultStore;
use crate::retry::RetryCoordinator;
use crate::scheduler::BatchJobScheduler;
use crate::session::{Screen, SessionStateMachine};
use crate::transform::StyleTransformer;

/// Completions applied versus thrown away since the workflow started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkflowStats {
    pub applied: usize,
    pub discarded: usize,
}

/// One user's transformation session.
///
/// All state lives here and is only changed through `&mut self`. Transforms
/// run on the worker pool; their results reach the session when the owner
/// calls `pump`, `pump_next` or `wait_settled`, and are checked against the
/// current generation before anything is written.
pub struct Workflow {
    catalog: StyleCatalog,
    authority: Arc<dyn SessionAuthority>,
    transformer_name: String,
    session: SessionStateMachine,
    gate: SelectionGate,
    scheduler: BatchJobScheduler,
    retries: RetryCoordinator,
    results: ResultStore,
    active: Option<PairReady>,
    pool: WorkerPool,
    events: Option<SessionEventLog>,
    session_id: String,
    stats: WorkflowStats,
}

impl Workflow {
    pub fn new(
        catalog: StyleCatalog,
        transformer: Arc<dyn StyleTransformer>,
        authority: Arc<dyn SessionAuthority>,
        config: WorkflowConfig,
    ) -> anyhow::Result<Self> {
        let transformer_name = transformer.name().to_string();
        let pool = WorkerPool::start(transformer, config.max_concurrency)?;
        Ok(Self {
            catalog,
            authority,
            transformer_name,
            session: SessionStateMachine::new(),
            gate: SelectionGate::new(),
            scheduler: BatchJobScheduler::new(),
            retries: RetryCoordinator::new(),
            results: ResultStore::new(),
            active: None,
            pool,
            events: None,
            session_id: uuid::Uuid::new_v4().to_string(),
            stats: WorkflowStats::default(),
        })
    }

    /// Records session events to `events`; the session id follows the log.
    pub fn with_event_log(mut self, events: SessionEventLog) -> Self {
        self.session_id = events.session_id().to_string();
        self.events = Some(events);
        self.emit(
            "session_started",
            json!({
                "transformer": self.transformer_name,
                "workers": self.pool.workers(),
            }),
        );
        self
    }

    pub fn catalog(&self) -> &StyleCatalog {
        &self.catalog
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transformer_name(&self) -> &str {
        &self.transformer_name
    }

    pub fn screen(&self) -> Screen {
        self.session.screen()
    }

    pub fn generation(&self) -> Generation {
        self.session.generation()
    }

    pub fn category(&self) -> Option<&Category> {
        self.catalog.category(self.session.category()?)
    }

    pub fn results(&self) -> Option<&ResultAggregate> {
        self.results.aggregate()
    }

    pub fn job(&self, key: &str) -> Option<&Job> {
        self.results.job(key)
    }

    pub fn annotations(&self) -> &ChatAnnotations {
        self.results.annotations()
    }

    /// The style being processed or shown, else the one picked so far.
    pub fn style(&self) -> Option<&Style> {
        match &self.active {
            Some(pair) => Some(&pair.style),
            None => self.gate.style(),
        }
    }

    pub fn photo(&self) -> Option<&Photo> {
        match &self.active {
            Some(pair) => Some(&pair.photo),
            None => self.gate.photo(),
        }
    }

    pub fn guide(&self) -> GuideHint {
        match self.category() {
            Some(category) => self.gate.guide(&category.style_noun),
            None => GuideHint::Idle,
        }
    }

    pub fn estimated_cost(&self) -> Option<f64> {
        self.catalog.estimate_cost(self.style()?)
    }

    pub fn stats(&self) -> WorkflowStats {
        self.stats
    }

    /// Results are in and no retry is outstanding.
    pub fn is_settled(&self) -> bool {
        self.results.is_settled() && self.retries.in_flight() == 0
    }

    pub fn is_retrying(&self, key: &str) -> bool {
        self.retries.is_in_flight(key)
    }

    pub fn select_category(&mut self, category_id: &str) -> Result<()> {
        if !self.authority.is_authorized() {
            return Err(WorkflowError::NotAuthorized);
        }
        if self.catalog.category(category_id).is_none() {
            return Err(WorkflowError::UnknownCategory(category_id.to_string()));
        }
        self.session.select_category(category_id)?;
        self.gate = SelectionGate::new();
        tracing::info!(category = category_id, "category selected");
        self.emit("category_selected", json!({ "category": category_id }));
        Ok(())
    }

    pub fn set_photo(&mut self, photo: Photo) -> Result<()> {
        self.expect_selecting("set_photo")?;
        match self.gate.set_photo(photo) {
            Some(pair) => self.start(pair),
            None => Ok(()),
        }
    }

    /// Picks one member style of the current category.
    pub fn select_style(&mut self, style_id: &str) -> Result<()> {
        self.expect_selecting("select_style")?;
        let category_id = self.session.category().unwrap_or_default().to_string();
        let style = self
            .catalog
            .style(style_id)
            .filter(|style| style.category_id() == category_id)
            .ok_or_else(|| WorkflowError::UnknownStyle {
                style: style_id.to_string(),
                category: category_id.clone(),
            })?;
        self.offer_style(style)
    }

    /// Picks the current category's full transform.
    pub fn select_full_transform(&mut self) -> Result<()> {
        self.expect_selecting("select_full_transform")?;
        let category_id = self.session.category().unwrap_or_default().to_string();
        let style = self
            .catalog
            .full_transform(&category_id)
            .ok_or_else(|| WorkflowError::UnknownCategory(category_id.clone()))?;
        self.offer_style(style)
    }

    pub fn back(&mut self) -> Result<()> {
        self.session.back()?;
        self.gate = SelectionGate::new();
        self.active = None;
        self.emit("navigated_back", json!({}));
        Ok(())
    }

    /// Starts over from category selection. Every result still in flight
    /// belongs to the old generation and will be discarded on arrival.
    pub fn reset(&mut self) -> Generation {
        let generation = self.session.reset();
        self.pool.retire_before(generation);
        self.gate = SelectionGate::new();
        self.results.clear();
        self.retries.clear();
        self.active = None;
        tracing::info!(generation, "session reset");
        self.emit("session_reset", json!({}));
        generation
    }

    pub fn retry_job(&mut self, key: &str) -> Result<()> {
        let outcome = self.begin_retry(key);
        match &outcome {
            Ok(()) => {
                tracing::info!(key, "retry started");
                self.emit("retry_started", json!({ "key": key }));
            }
            Err(err) => {
                tracing::debug!(key, error = %err, "retry rejected");
                self.emit(
                    "retry_rejected",
                    json!({ "key": key, "reason": err.to_string() }),
                );
            }
        }
        outcome
    }

    pub fn annotate(&mut self, key: &str, note: ChatNote) -> Result<()> {
        self.results.annotate(key, note)
    }

    pub fn focused_key(&self) -> Option<String> {
        self.results.focused_key()
    }

    pub fn focus_next(&mut self) -> Option<String> {
        self.results.focus_next()
    }

    pub fn focus_prev(&mut self) -> Option<String> {
        self.results.focus_prev()
    }

    pub fn focus_key(&mut self, key: &str) -> Result<()> {
        self.results.focus_key(key)
    }

    /// Applies every worker event that has already arrived.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.pool.try_next() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Waits up to `timeout` for one worker event and applies it.
    pub fn pump_next(&mut self, timeout: Duration) -> bool {
        match self.pool.next_timeout(timeout) {
            Some(event) => {
                self.apply(event);
                true
            }
            None => false,
        }
    }

    /// Applies worker events until every job and retry has settled. `false`
    /// on timeout or when there is nothing to wait for.
    pub fn wait_settled(&mut self, timeout: Duration) -> bool {
        if self.results.aggregate().is_none() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if self.is_settled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump_next(deadline - now);
        }
    }

    pub fn save_to_gallery(&self, sink: &dyn GallerySink) -> anyhow::Result<GallerySnapshot> {
        let not_ready = WorkflowError::NotReady {
            action: "save_to_gallery",
            state: self.session.screen(),
        };
        if self.session.screen() != Screen::Result {
            return Err(not_ready.into());
        }
        let (Some(aggregate), Some(pair)) = (self.results.aggregate(), self.active.as_ref()) else {
            return Err(not_ready.into());
        };
        let snapshot = GallerySnapshot::from_aggregate(
            &self.session_id,
            self.session.generation(),
            self.session.category(),
            pair.style.id(),
            aggregate,
            self.results.annotations(),
        );
        let stored = sink.store(snapshot, aggregate)?;
        self.emit(
            "gallery_saved",
            json!({ "style": stored.style_id, "entries": stored.entries.len() }),
        );
        Ok(stored)
    }

    /// Ends the user's session with the authority, then resets.
    pub fn sign_out(&mut self) -> anyhow::Result<()> {
        self.authority.sign_out()?;
        self.reset();
        tracing::info!("signed out");
        self.emit("signed_out", json!({}));
        Ok(())
    }

    fn expect_selecting(&self, event: &'static str) -> Result<()> {
        if self.session.screen() != Screen::StyleAndPhoto {
            return Err(WorkflowError::selection(event, self.session.screen()));
        }
        Ok(())
    }

    fn offer_style(&mut self, style: Style) -> Result<()> {
        match self.gate.set_style(style) {
            Some(pair) => self.start(pair),
            None => Ok(()),
        }
    }

    fn start(&mut self, pair: PairReady) -> Result<()> {
        let generation = self.session.generation();
        let aggregate = match &pair.style {
            Style::Single(style) => {
                self.scheduler
                    .start_single(&pair.photo, style, generation, &self.pool)
            }
            Style::FullTransform(style) => {
                match self
                    .scheduler
                    .start_batch(&pair.photo, style, generation, &self.pool)
                {
                    Ok(aggregate) => aggregate,
                    Err(err) => {
                        self.gate = SelectionGate::new();
                        return Err(err);
                    }
                }
            }
        };
        self.session.pair_ready()?;

        tracing::info!(
            style = pair.style.id(),
            jobs = aggregate.len(),
            generation,
            "processing started"
        );
        self.emit(
            "pair_ready",
            json!({
                "style": pair.style.id(),
                "photo_digest": pair.photo.digest(),
                "jobs": aggregate.len(),
            }),
        );
        for key in aggregate.keys() {
            self.emit("job_queued", json!({ "key": key }));
        }
        self.results.install(aggregate);
        self.active = Some(pair);
        self.complete_if_settled();
        Ok(())
    }

    fn begin_retry(&mut self, key: &str) -> Result<()> {
        if !self.results.contains_key(key) {
            return Err(WorkflowError::UnknownKey(key.to_string()));
        }
        if self.session.screen() != Screen::Result {
            return Err(WorkflowError::NotReady {
                action: "retry",
                state: self.session.screen(),
            });
        }
        let Some(pair) = self.active.as_ref() else {
            return Err(WorkflowError::UnknownKey(key.to_string()));
        };
        self.retries.begin(
            key,
            &pair.photo,
            &mut self.results,
            self.session.generation(),
            &self.pool,
        )
    }

    fn apply(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Started {
                key,
                generation,
                origin,
            } => {
                if origin == JobOrigin::Retry || !self.session.is_current(generation) {
                    return;
                }
                let pending = self
                    .results
                    .job(&key)
                    .is_some_and(|job| job.status == JobStatus::Pending);
                if pending {
                    let _ = self.results.mark_running(&key);
                }
            }
            WorkerEvent::Finished(completion) => self.apply_completion(completion),
        }
    }

    fn apply_completion(&mut self, completion: JobCompletion) {
        let key = completion.key.clone();
        let origin = completion.origin;
        let generation = completion.generation;
        let current = self.session.generation();
        let merged = match origin {
            JobOrigin::Retry => self.retries.finish(&mut self.results, completion, current),
            JobOrigin::Single | JobOrigin::Batch => self
                .scheduler
                .merge(&mut self.results, completion, current)
                .map(|merged| merged.status),
        };

        match merged {
            Ok(status) => {
                self.stats.applied += 1;
                let error = self.results.job(&key).and_then(|job| job.error.clone());
                let event_type = match status {
                    JobStatus::Failed => "job_failed",
                    _ => "job_succeeded",
                };
                self.emit(
                    event_type,
                    json!({ "key": key, "origin": origin.as_str(), "error": error }),
                );
                self.complete_if_settled();
            }
            Err(err) => {
                self.stats.discarded += 1;
                if err.is_stale() {
                    tracing::debug!(key = %key, generation, current, "stale result discarded");
                } else {
                    tracing::warn!(key = %key, error = %err, "result discarded");
                }
                self.emit(
                    "result_discarded",
                    json!({
                        "key": key,
                        "result_generation": generation,
                        "reason": err.to_string(),
                    }),
                );
            }
        }
    }

    fn complete_if_settled(&mut self) {
        if self.session.screen() != Screen::Processing || !self.results.is_settled() {
            return;
        }
        if self.session.complete().is_err() {
            return;
        }
        let counts = self
            .results
            .aggregate()
            .map(ResultAggregate::counts)
            .unwrap_or_default();
        tracing::info!(
            succeeded = counts.succeeded,
            failed = counts.failed,
            "processing complete"
        );
        self.emit(
            "processing_complete",
            json!({ "succeeded": counts.succeeded, "failed": counts.failed }),
        );
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let payload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        if let Err(err) = events.emit(event_type, self.session.generation(), payload) {
            tracing::warn!(event = event_type, error = %err, "event log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Condvar, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::bail;
    use serde_json::Value;
    use valley_contracts::catalog::StyleCatalog;
    use valley_contracts::chat::ChatNote;
    use valley_contracts::events::SessionEventLog;
    use valley_contracts::jobs::{AggregateMode, JobStatus, TransformOutput};

    use super::Workflow;
    use crate::auth::StaticAuthority;
    use crate::config::WorkflowConfig;
    use crate::gallery::DirectoryGallery;
    use crate::gate::GuideHint;
    use crate::photo::tests::sample_photo;
    use crate::session::Screen;
    use crate::transform::{DryrunTransformer, StyleTransformer, TransformRequest};

    const SETTLE: Duration = Duration::from_secs(20);

    /// Blocks every call while closed.
    #[derive(Default)]
    struct Gate {
        closed: Mutex<bool>,
        changed: Condvar,
    }

    impl Gate {
        fn set_closed(&self, closed: bool) {
            if let Ok(mut guard) = self.closed.lock() {
                *guard = closed;
            }
            self.changed.notify_all();
        }

        fn pass(&self) {
            let Ok(mut guard) = self.closed.lock() else {
                return;
            };
            while *guard {
                guard = match self.changed.wait(guard) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
        }
    }

    /// Dryrun renders, except styles listed in `fail_once` fail on their
    /// first call.
    #[derive(Default)]
    struct ScriptedTransformer {
        fail_once: Mutex<HashSet<String>>,
        gate: Gate,
        entered: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransformer {
        fn failing_once(style_ids: &[&str]) -> Self {
            Self {
                fail_once: Mutex::new(style_ids.iter().map(|id| id.to_string()).collect()),
                ..Self::default()
            }
        }

        fn fail_next(&self, style_id: &str) {
            if let Ok(mut pending) = self.fail_once.lock() {
                pending.insert(style_id.to_string());
            }
        }

        fn calls_for(&self, style_id: &str) -> usize {
            self.calls
                .lock()
                .map(|calls| calls.iter().filter(|id| *id == style_id).count())
                .unwrap_or_default()
        }
    }

    impl StyleTransformer for ScriptedTransformer {
        fn name(&self) -> &str {
            "scripted"
        }

        fn transform(&self, request: &TransformRequest) -> anyhow::Result<TransformOutput> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(request.style_id.clone());
            }
            self.entered.fetch_add(1, Ordering::SeqCst);
            self.gate.pass();
            let fail = self
                .fail_once
                .lock()
                .map(|mut pending| pending.remove(&request.style_id))
                .unwrap_or_default();
            if fail {
                bail!("remote rejected {}", request.style_id);
            }
            DryrunTransformer::new().transform(request)
        }
    }

    fn workflow(transformer: Arc<dyn StyleTransformer>) -> anyhow::Result<Workflow> {
        Workflow::new(
            StyleCatalog::builtin()?,
            transformer,
            Arc::new(StaticAuthority::authorized()),
            WorkflowConfig::with_max_concurrency(4),
        )
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + SETTLE;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn movements_batch_with_one_failure_then_retry() -> anyhow::Result<()> {
        let transformer = Arc::new(ScriptedTransformer::failing_once(&["modernism"]));
        let mut flow = workflow(transformer.clone())?;

        flow.select_category("movements")?;
        flow.set_photo(sample_photo())?;
        assert_eq!(flow.guide(), GuideHint::ChooseStyle("art movement".to_string()));
        flow.select_full_transform()?;
        assert_eq!(flow.screen(), Screen::Processing);
        assert_eq!(flow.results().map(|results| results.len()), Some(11));

        assert!(flow.wait_settled(SETTLE));
        assert_eq!(flow.screen(), Screen::Result);
        let counts = flow.results().map(|results| results.counts()).unwrap_or_default();
        assert_eq!((counts.succeeded, counts.failed), (10, 1));

        flow.annotate("baroque", ChatNote::new("user", "love the light"))?;
        let before = flow.results().cloned().expect("no results");

        flow.retry_job("modernism")?;
        assert_eq!(flow.job("modernism").map(|job| job.status), Some(JobStatus::Running));
        assert!(flow.wait_settled(SETTLE));

        let after = flow.results().cloned().expect("no results");
        assert_eq!(after.counts().succeeded, 11);
        for key in before.keys().iter().filter(|key| key.as_str() != "modernism") {
            assert_eq!(before.get(key), after.get(key), "{key} changed");
        }
        assert_eq!(flow.annotations().notes("baroque").len(), 1);
        assert_eq!(transformer.calls_for("modernism"), 2);
        Ok(())
    }

    #[test]
    fn late_results_after_reset_are_discarded() -> anyhow::Result<()> {
        let transformer = Arc::new(ScriptedTransformer::default());
        transformer.gate.set_closed(true);
        let mut flow = workflow(transformer.clone())?;

        flow.select_category("oriental")?;
        flow.select_full_transform()?;
        flow.set_photo(sample_photo())?;
        assert!(wait_until(|| transformer.entered.load(Ordering::SeqCst) == 3));

        assert_eq!(flow.reset(), 1);
        transformer.gate.set_closed(false);
        let deadline = Instant::now() + SETTLE;
        while flow.stats().discarded < 3 && Instant::now() < deadline {
            flow.pump_next(Duration::from_millis(50));
        }

        assert_eq!(flow.stats().discarded, 3);
        assert_eq!(flow.stats().applied, 0);
        assert!(flow.results().is_none());
        assert_eq!(flow.screen(), Screen::CategorySelect);
        assert_eq!(flow.generation(), 1);
        Ok(())
    }

    #[test]
    fn second_retry_of_same_key_is_rejected() -> anyhow::Result<()> {
        let transformer = Arc::new(ScriptedTransformer::failing_once(&["chinese"]));
        let mut flow = workflow(transformer.clone())?;
        flow.select_category("oriental")?;
        flow.set_photo(sample_photo())?;
        flow.select_full_transform()?;
        assert!(flow.wait_settled(SETTLE));

        transformer.gate.set_closed(true);
        flow.retry_job("chinese")?;
        let err = flow.retry_job("chinese").err();
        assert!(err.is_some_and(|err| err.is_duplicate_retry()));
        transformer.gate.set_closed(false);

        assert!(flow.wait_settled(SETTLE));
        assert_eq!(transformer.calls_for("chinese"), 2);
        assert_eq!(flow.job("chinese").map(|job| job.status), Some(JobStatus::Succeeded));
        Ok(())
    }

    #[test]
    fn single_style_retry_replaces_the_whole_job() -> anyhow::Result<()> {
        let transformer = Arc::new(ScriptedTransformer::failing_once(&["klimt-master"]));
        let mut flow = workflow(transformer.clone())?;
        flow.select_category("masters")?;
        flow.select_style("klimt-master")?;
        flow.set_photo(sample_photo())?;
        assert!(flow.wait_settled(SETTLE));

        let failed = flow.job("klimt-master").cloned().expect("missing klimt-master");
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("remote rejected klimt-master"));
        assert_eq!(failed.image, None);

        transformer.gate.set_closed(true);
        flow.retry_job("klimt-master")?;
        assert!(flow.retry_job("klimt-master").err().is_some_and(|err| err.is_duplicate_retry()));
        transformer.gate.set_closed(false);
        assert!(flow.wait_settled(SETTLE));

        let results = flow.results().cloned().expect("no results");
        assert_eq!(results.mode(), AggregateMode::Single);
        assert_eq!(results.len(), 1);
        let job = results.get("klimt-master").expect("missing klimt-master");
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.error, None);
        assert!(job.image.is_some());
        assert_eq!(
            job.attribution.as_ref().and_then(|value| value.artist.as_deref()),
            Some("Gustav Klimt")
        );

        transformer.fail_next("klimt-master");
        flow.retry_job("klimt-master")?;
        assert!(flow.wait_settled(SETTLE));
        let job = flow.job("klimt-master").cloned().expect("missing klimt-master");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.image, None);
        assert_eq!(job.attribution, None);
        assert_eq!(flow.results().map(|results| results.mode()), Some(AggregateMode::Single));
        assert_eq!(transformer.calls_for("klimt-master"), 3);
        Ok(())
    }

    #[test]
    fn retries_of_different_keys_run_side_by_side() -> anyhow::Result<()> {
        let transformer = Arc::new(ScriptedTransformer::failing_once(&["korean", "chinese"]));
        let mut flow = workflow(transformer.clone())?;
        flow.select_category("oriental")?;
        flow.set_photo(sample_photo())?;
        flow.select_full_transform()?;
        assert!(flow.wait_settled(SETTLE));
        let japanese = flow.job("japanese").cloned();

        transformer.gate.set_closed(true);
        flow.retry_job("korean")?;
        flow.retry_job("chinese")?;
        assert!(flow.is_retrying("korean") && flow.is_retrying("chinese"));
        assert!(wait_until(|| transformer.entered.load(Ordering::SeqCst) == 5));
        assert!(!flow.is_settled());
        transformer.gate.set_closed(false);

        assert!(flow.wait_settled(SETTLE));
        assert!(!flow.is_retrying("korean") && !flow.is_retrying("chinese"));
        for key in ["korean", "chinese"] {
            assert_eq!(flow.job(key).map(|job| job.status), Some(JobStatus::Succeeded));
        }
        assert_eq!(flow.job("japanese").cloned(), japanese);
        assert_eq!(flow.screen(), Screen::Result);
        Ok(())
    }

    #[test]
    fn reset_during_retry_discards_it_and_frees_the_key() -> anyhow::Result<()> {
        let transformer = Arc::new(ScriptedTransformer::failing_once(&["chinese"]));
        let mut flow = workflow(transformer.clone())?;
        flow.select_category("oriental")?;
        flow.set_photo(sample_photo())?;
        flow.select_full_transform()?;
        assert!(flow.wait_settled(SETTLE));
        assert_eq!(flow.stats().applied, 3);

        transformer.gate.set_closed(true);
        flow.retry_job("chinese")?;
        assert!(wait_until(|| transformer.entered.load(Ordering::SeqCst) == 4));
        assert_eq!(flow.reset(), 1);
        assert!(!flow.is_retrying("chinese"));
        assert!(flow.results().is_none());
        transformer.gate.set_closed(false);

        let deadline = Instant::now() + SETTLE;
        while flow.stats().discarded < 1 && Instant::now() < deadline {
            flow.pump_next(Duration::from_millis(50));
        }
        assert_eq!(flow.stats().discarded, 1);
        assert_eq!(flow.stats().applied, 3);
        assert!(flow.results().is_none());

        transformer.fail_next("chinese");
        flow.select_category("oriental")?;
        flow.set_photo(sample_photo())?;
        flow.select_full_transform()?;
        assert!(flow.wait_settled(SETTLE));
        assert_eq!(flow.job("chinese").map(|job| job.generation), Some(1));
        flow.retry_job("chinese")?;
        assert!(flow.wait_settled(SETTLE));
        assert_eq!(flow.job("chinese").map(|job| job.status), Some(JobStatus::Succeeded));
        Ok(())
    }

    #[test]
    fn retry_of_unknown_key_changes_nothing() -> anyhow::Result<()> {
        let mut flow = workflow(Arc::new(DryrunTransformer::new()))?;
        assert!(flow.retry_job("korean").err().is_some_and(|err| err.is_unknown_key()));

        flow.select_category("oriental")?;
        flow.set_photo(sample_photo())?;
        flow.select_full_transform()?;
        assert!(flow.wait_settled(SETTLE));
        let before = flow.results().cloned();
        let err = flow.retry_job("baroque").err();
        assert!(err.is_some_and(|err| err.is_unknown_key()));
        assert_eq!(flow.results().cloned(), before);
        Ok(())
    }

    #[test]
    fn single_style_runs_one_job_with_attribution() -> anyhow::Result<()> {
        let mut flow = workflow(Arc::new(DryrunTransformer::new()))?;
        flow.select_category("masters")?;
        flow.select_style("klimt-master")?;
        assert_eq!(flow.guide(), GuideHint::UploadPhoto);
        flow.set_photo(sample_photo())?;
        assert!(flow.wait_settled(SETTLE));

        let results = flow.results().cloned().expect("no results");
        assert_eq!(results.mode(), AggregateMode::Single);
        let job = results.get("klimt-master").expect("missing job");
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(
            job.attribution.as_ref().and_then(|value| value.artist.as_deref()),
            Some("Gustav Klimt")
        );
        assert_eq!(flow.estimated_cost(), Some(0.25));
        Ok(())
    }

    #[test]
    fn selection_is_checked_against_screen_and_category() -> anyhow::Result<()> {
        let mut flow = workflow(Arc::new(DryrunTransformer::new()))?;
        assert!(flow.set_photo(sample_photo()).err().is_some_and(|err| err.is_selection()));
        assert!(flow.select_category("sculpture").is_err());

        flow.select_category("oriental")?;
        let err = flow.select_style("baroque").err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("style 'baroque' is not offered in category 'oriental'")
        );

        flow.set_photo(sample_photo())?;
        flow.back()?;
        assert_eq!(flow.screen(), Screen::CategorySelect);
        assert!(flow.photo().is_none());
        assert!(flow.category().is_none());
        Ok(())
    }

    #[test]
    fn closed_authority_blocks_and_sign_out_resets() -> anyhow::Result<()> {
        let authority = Arc::new(StaticAuthority::denied());
        let mut flow = Workflow::new(
            StyleCatalog::builtin()?,
            Arc::new(DryrunTransformer::new()),
            authority.clone(),
            WorkflowConfig::default(),
        )?;
        let err = flow.select_category("masters").err();
        assert_eq!(err, Some(crate::error::WorkflowError::NotAuthorized));

        authority.set_authorized(true);
        flow.select_category("masters")?;
        flow.sign_out()?;
        assert_eq!(flow.screen(), Screen::CategorySelect);
        assert_eq!(flow.generation(), 1);
        assert!(flow.select_category("masters").is_err());
        Ok(())
    }

    #[test]
    fn save_to_gallery_needs_a_result_and_logs_events() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut flow = workflow(Arc::new(DryrunTransformer::new()))?
            .with_event_log(SessionEventLog::new(&events_path, "sess-1"));
        let gallery = DirectoryGallery::new(temp.path().join("gallery"));

        assert!(flow.save_to_gallery(&gallery).is_err());
        flow.select_category("oriental")?;
        flow.set_photo(sample_photo())?;
        flow.select_full_transform()?;
        assert!(flow.wait_settled(SETTLE));
        let stored = flow.save_to_gallery(&gallery)?;
        assert_eq!(stored.entries.len(), 3);
        assert_eq!(stored.category_id.as_deref(), Some("oriental"));
        assert!(temp.path().join("gallery/sess-1-g0/korean.png").exists());

        let raw = std::fs::read_to_string(&events_path)?;
        let types: Vec<String> = raw
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|event| event.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(types.first().map(String::as_str), Some("session_started"));
        assert_eq!(types.iter().filter(|kind| *kind == "job_queued").count(), 3);
        assert_eq!(types.iter().filter(|kind| *kind == "job_succeeded").count(), 3);
        assert!(types.iter().any(|kind| kind == "processing_complete"));
        assert_eq!(types.last().map(String::as_str), Some("gallery_saved"));
        Ok(())
    }
}
