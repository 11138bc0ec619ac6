use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::catalog::SingleStyle;

/// Session epoch a job or retry was created in. Bumped once per reset.
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendered image handed back by a transformer.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageRef {
    Url(String),
    Inline { mime: String, data: Arc<[u8]> },
}

impl ImageRef {
    pub fn inline(mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self::Inline {
            mime: mime.into(),
            data: Arc::from(data),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Url(_) => "url",
            Self::Inline { mime, .. } => match mime.as_str() {
                "image/jpeg" => "jpg",
                "image/webp" => "webp",
                _ => "png",
            },
        }
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Inline { mime, data } => f
                .debug_struct("Inline")
                .field("mime", mime)
                .field("bytes", &data.len())
                .finish(),
        }
    }
}

/// Reference artist/work the remote side chose for a rendering. Optional.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attribution {
    pub artist: Option<String>,
    pub work: Option<String>,
}

impl Attribution {
    pub fn is_empty(&self) -> bool {
        self.artist.is_none() && self.work.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub image: ImageRef,
    pub attribution: Option<Attribution>,
}

/// What a finished transform leaves behind: the rendering, or a
/// human-readable failure message.
pub type JobOutcome = Result<TransformOutput, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub key: String,
    pub style: SingleStyle,
    pub status: JobStatus,
    pub image: Option<ImageRef>,
    pub attribution: Option<Attribution>,
    pub error: Option<String>,
    pub generation: Generation,
}

impl Job {
    pub fn pending(style: SingleStyle, generation: Generation) -> Self {
        Self {
            key: style.id.clone(),
            style,
            status: JobStatus::Pending,
            image: None,
            attribution: None,
            error: None,
            generation,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
    }

    /// Installs a finished outcome, replacing image, attribution and error together.
    pub fn settle(&mut self, outcome: JobOutcome) {
        match outcome {
            Ok(output) => {
                self.status = JobStatus::Succeeded;
                self.image = Some(output.image);
                self.attribution = output.attribution.filter(|value| !value.is_empty());
                self.error = None;
            }
            Err(message) => {
                self.status = JobStatus::Failed;
                self.image = None;
                self.attribution = None;
                self.error = Some(message);
            }
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_settled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMode {
    Single,
    Batch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Either one lone job or an ordered, keyed batch of jobs; never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultAggregate {
    Single(Job),
    Batch(IndexMap<String, Job>),
}

impl ResultAggregate {
    pub fn mode(&self) -> AggregateMode {
        match self {
            Self::Single(_) => AggregateMode::Single,
            Self::Batch(_) => AggregateMode::Batch,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Job> {
        match self {
            Self::Single(job) => (job.key == key).then_some(job),
            Self::Batch(jobs) => jobs.get(key),
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Job> {
        match self {
            Self::Single(job) => (job.key == key).then_some(job),
            Self::Batch(jobs) => jobs.get_mut(key),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn jobs(&self) -> Box<dyn Iterator<Item = &Job> + '_> {
        match self {
            Self::Single(job) => Box::new(std::iter::once(job)),
            Self::Batch(jobs) => Box::new(jobs.values()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.jobs().map(|job| job.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(jobs) => jobs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every job has reached `Succeeded` or `Failed`.
    pub fn is_settled(&self) -> bool {
        self.jobs().all(Job::is_settled)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for job in self.jobs() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
