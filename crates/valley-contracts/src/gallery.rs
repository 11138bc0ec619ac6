use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chat::{ChatAnnotations, ChatNote};
use crate::events::now_utc_iso;
use crate::jobs::{AggregateMode, Attribution, Generation, ImageRef, JobStatus, ResultAggregate};

pub const SNAPSHOT_SCHEMA_VERSION: u64 = 1;

/// A finished result handed to gallery storage. Inline image bytes never
/// appear here; a sink that stores them records the file name instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GallerySnapshot {
    pub schema_version: u64,
    pub session_id: String,
    pub generation: Generation,
    pub category_id: Option<String>,
    pub style_id: String,
    pub mode: AggregateMode,
    pub created_at: String,
    pub entries: Vec<GalleryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub key: String,
    pub display_name: String,
    pub status: JobStatus,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_file: Option<String>,
    #[serde(default)]
    pub attribution: Option<Attribution>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub notes: Vec<ChatNote>,
}

impl GallerySnapshot {
    pub fn from_aggregate(
        session_id: &str,
        generation: Generation,
        category_id: Option<&str>,
        style_id: &str,
        aggregate: &ResultAggregate,
        annotations: &ChatAnnotations,
    ) -> Self {
        let entries = aggregate
            .jobs()
            .map(|job| GalleryEntry {
                key: job.key.clone(),
                display_name: job.style.metadata.display_name.clone(),
                status: job.status,
                image_url: match &job.image {
                    Some(ImageRef::Url(url)) => Some(url.clone()),
                    _ => None,
                },
                image_file: None,
                attribution: job.attribution.clone(),
                error: job.error.clone(),
                notes: annotations.notes(&job.key).to_vec(),
            })
            .collect();
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            session_id: session_id.to_string(),
            generation,
            category_id: category_id.map(str::to_string),
            style_id: style_id.to_string(),
            mode: aggregate.mode(),
            created_at: now_utc_iso(),
            entries,
        }
    }

    pub fn entry_mut(&mut self, key: &str) -> Option<&mut GalleryEntry> {
        self.entries.iter_mut().find(|entry| entry.key == key)
    }
}

pub fn write_snapshot(path: &Path, snapshot: &GallerySnapshot) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(snapshot)?)?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> anyhow::Result<GallerySnapshot> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
