use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use valley_contracts::jobs::{Generation, JobOutcome};

use crate::error::error_chain_text;
use crate::photo::Photo;
use crate::transform::{StyleTransformer, TransformRequest};

const ERROR_TEXT_MAX_CHARS: usize = 600;
const QUEUE_POLL: Duration = Duration::from_millis(200);

/// Which path created a ticket. Retries settle through the retry coordinator,
/// everything else through the batch scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOrigin {
    Single,
    Batch,
    Retry,
}

impl JobOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Batch => "batch",
            Self::Retry => "retry",
        }
    }
}

/// One transform to run. Carries everything a worker needs so the worker
/// never touches session state.
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub key: String,
    pub style_id: String,
    pub photo: Photo,
    pub generation: Generation,
    pub origin: JobOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub key: String,
    pub generation: Generation,
    pub origin: JobOrigin,
    pub outcome: JobOutcome,
}

/// Messages flowing from workers back to the owner of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Started {
        key: String,
        generation: Generation,
        origin: JobOrigin,
    },
    Finished(JobCompletion),
}

/// Anything that accepts tickets for execution.
pub trait JobSink {
    /// `false` when the ticket could not be queued.
    fn submit(&self, ticket: JobTicket) -> bool;
}

/// Fixed set of named worker threads sharing one ticket queue.
///
/// Workers only run the transformer and report back over a channel; applying
/// results is left to whoever drains `try_next` / `next_timeout`. Tickets
/// whose generation is older than `retire_before` are dropped unrun.
pub struct WorkerPool {
    queue: Option<mpsc::Sender<JobTicket>>,
    events: mpsc::Receiver<WorkerEvent>,
    handles: Vec<thread::JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    floor: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn start(transformer: Arc<dyn StyleTransformer>, workers: usize) -> Result<Self> {
        let (queue_tx, queue_rx) = mpsc::channel::<JobTicket>();
        let (events_tx, events_rx) = mpsc::channel::<WorkerEvent>();
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let floor = Arc::new(AtomicU64::new(0));

        let mut pool = Self {
            queue: Some(queue_tx),
            events: events_rx,
            handles: Vec::new(),
            stop_flag: Arc::clone(&stop_flag),
            floor: Arc::clone(&floor),
        };
        for index in 0..workers.max(1) {
            let worker = Worker {
                transformer: Arc::clone(&transformer),
                queue: Arc::clone(&queue_rx),
                events: events_tx.clone(),
                stop_flag: Arc::clone(&stop_flag),
                floor: Arc::clone(&floor),
            };
            let handle = thread::Builder::new()
                .name(format!("valley-transform-{index}"))
                .spawn(move || worker.run())
                .context("transform worker spawn failed")?;
            pool.handles.push(handle);
        }
        tracing::debug!(
            workers = pool.handles.len(),
            transformer = transformer.name(),
            "worker pool started"
        );
        Ok(pool)
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Queued tickets from generations before `generation` are skipped.
    pub fn retire_before(&self, generation: Generation) {
        self.floor.fetch_max(generation, Ordering::SeqCst);
    }

    pub fn try_next(&self) -> Option<WorkerEvent> {
        self.events.try_recv().ok()
    }

    pub fn next_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Closes the queue and waits for every worker, including any still
    /// inside `transform`.
    pub fn stop(&mut self) {
        self.close();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Closes the queue without waiting. A worker blocked in `transform`
    /// exits on its own once the call returns and its result has nowhere to go.
    pub fn detach(&mut self) {
        self.close();
        let detached = self.handles.drain(..).filter(|handle| !handle.is_finished()).count();
        if detached > 0 {
            tracing::debug!(workers = detached, "detached busy transform workers");
        }
    }

    fn close(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.queue.take();
    }
}

impl JobSink for WorkerPool {
    fn submit(&self, ticket: JobTicket) -> bool {
        match self.queue.as_ref() {
            Some(queue) => queue.send(ticket).is_ok(),
            None => false,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.detach();
    }
}

struct Worker {
    transformer: Arc<dyn StyleTransformer>,
    queue: Arc<Mutex<mpsc::Receiver<JobTicket>>>,
    events: mpsc::Sender<WorkerEvent>,
    stop_flag: Arc<AtomicBool>,
    floor: Arc<AtomicU64>,
}

impl Worker {
    fn run(self) {
        while !self.stop_flag.load(Ordering::SeqCst) {
            let next = match self.queue.lock() {
                Ok(queue) => queue.recv_timeout(QUEUE_POLL),
                Err(_) => break,
            };
            let ticket = match next {
                Ok(ticket) => ticket,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            };
            if ticket.generation < self.floor.load(Ordering::SeqCst) {
                tracing::debug!(key = %ticket.key, generation = ticket.generation, "skipping retired ticket");
                continue;
            }
            if !self.execute(ticket) {
                break;
            }
        }
    }

    /// `false` once nobody is listening for results any more.
    fn execute(&self, ticket: JobTicket) -> bool {
        let started = WorkerEvent::Started {
            key: ticket.key.clone(),
            generation: ticket.generation,
            origin: ticket.origin,
        };
        if self.events.send(started).is_err() {
            return false;
        }

        let request = TransformRequest {
            photo: ticket.photo,
            style_id: ticket.style_id,
        };
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.transformer.transform(&request)
        })) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(error_chain_text(&err, ERROR_TEXT_MAX_CHARS)),
            Err(_) => Err(format!("{} transformer panicked", self.transformer.name())),
        };
        if let Err(message) = &outcome {
            tracing::warn!(key = %ticket.key, error = %message, "transform failed");
        }

        self.events
            .send(WorkerEvent::Finished(JobCompletion {
                key: ticket.key,
                generation: ticket.generation,
                origin: ticket.origin,
                outcome,
            }))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::{Duration, Instant};

    use anyhow::bail;
    use valley_contracts::jobs::TransformOutput;

    use super::{JobOrigin, JobSink, JobTicket, WorkerEvent, WorkerPool};
    use crate::photo::tests::sample_photo;
    use crate::transform::{DryrunTransformer, StyleTransformer, TransformRequest};

    struct Refusing;

    impl StyleTransformer for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        fn transform(&self, request: &TransformRequest) -> anyhow::Result<TransformOutput> {
            bail!("style {} refused", request.style_id)
        }
    }

    /// Blocks every transform until a value arrives on `release`.
    struct Stuck {
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl StyleTransformer for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        fn transform(&self, request: &TransformRequest) -> anyhow::Result<TransformOutput> {
            let release = match self.release.lock() {
                Ok(release) => release.recv_timeout(Duration::from_secs(30)),
                Err(_) => bail!("release lock poisoned"),
            };
            match release {
                Ok(()) => bail!("style {} released", request.style_id),
                Err(_) => bail!("style {} never released", request.style_id),
            }
        }
    }

    fn ticket(key: &str, generation: u64) -> JobTicket {
        JobTicket {
            key: key.to_string(),
            style_id: key.to_string(),
            photo: sample_photo(),
            generation,
            origin: JobOrigin::Batch,
        }
    }

    fn finished(pool: &WorkerPool, count: usize) -> Vec<super::JobCompletion> {
        let mut out = Vec::new();
        while out.len() < count {
            match pool.next_timeout(Duration::from_secs(10)) {
                Some(WorkerEvent::Finished(completion)) => out.push(completion),
                Some(WorkerEvent::Started { .. }) => {}
                None => break,
            }
        }
        out
    }

    #[test]
    fn runs_every_ticket_once() -> anyhow::Result<()> {
        let pool = WorkerPool::start(Arc::new(DryrunTransformer::new()), 3)?;
        assert_eq!(pool.workers(), 3);
        for key in ["baroque", "rococo", "cubism", "fauvism"] {
            assert!(pool.submit(ticket(key, 0)));
        }
        let mut keys: Vec<String> = finished(&pool, 4)
            .into_iter()
            .map(|completion| {
                assert!(completion.outcome.is_ok());
                completion.key
            })
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["baroque", "cubism", "fauvism", "rococo"]);
        Ok(())
    }

    #[test]
    fn failures_come_back_as_messages() -> anyhow::Result<()> {
        let pool = WorkerPool::start(Arc::new(Refusing), 1)?;
        pool.submit(ticket("korean", 4));
        let completion = finished(&pool, 1).pop();
        let completion = completion.expect("no completion");
        assert_eq!(completion.generation, 4);
        assert_eq!(completion.outcome, Err("style korean refused".to_string()));
        Ok(())
    }

    #[test]
    fn retired_tickets_are_skipped() -> anyhow::Result<()> {
        let pool = WorkerPool::start(Arc::new(DryrunTransformer::new()), 1)?;
        pool.retire_before(2);
        pool.submit(ticket("stale", 1));
        pool.submit(ticket("fresh", 2));
        let keys: Vec<String> = finished(&pool, 1)
            .into_iter()
            .map(|completion| completion.key)
            .collect();
        assert_eq!(keys, vec!["fresh"]);
        Ok(())
    }

    #[test]
    fn stopped_pool_refuses_tickets() -> anyhow::Result<()> {
        let mut pool = WorkerPool::start(Arc::new(DryrunTransformer::new()), 2)?;
        pool.stop();
        assert!(!pool.submit(ticket("baroque", 0)));
        assert_eq!(pool.workers(), 0);
        Ok(())
    }

    #[test]
    fn dropping_does_not_wait_for_a_busy_transform() -> anyhow::Result<()> {
        let (release_tx, release_rx) = mpsc::channel();
        let pool = WorkerPool::start(
            Arc::new(Stuck {
                release: Mutex::new(release_rx),
            }),
            1,
        )?;
        assert!(pool.submit(ticket("baroque", 0)));
        match pool.next_timeout(Duration::from_secs(10)) {
            Some(WorkerEvent::Started { key, .. }) => assert_eq!(key, "baroque"),
            other => panic!("expected the transform to start, got {other:?}"),
        }

        let dropped_at = Instant::now();
        drop(pool);
        assert!(dropped_at.elapsed() < Duration::from_secs(5));
        let _ = release_tx.send(());
        Ok(())
    }
}
