use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use valley_contracts::gallery::{write_snapshot, GallerySnapshot};
use valley_contracts::jobs::{ImageRef, ResultAggregate};

/// Where finished results go when the user keeps them.
pub trait GallerySink {
    /// Stores `snapshot` and the images it refers to. Returns the snapshot as
    /// stored, with any file names the sink assigned.
    fn store(&self, snapshot: GallerySnapshot, aggregate: &ResultAggregate) -> Result<GallerySnapshot>;
}

/// Writes each saved result into `<root>/<session>-g<generation>/`:
/// `snapshot.json` plus one file per inline image.
#[derive(Debug, Clone)]
pub struct DirectoryGallery {
    root: PathBuf,
}

impl DirectoryGallery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, snapshot: &GallerySnapshot) -> PathBuf {
        self.root
            .join(format!("{}-g{}", snapshot.session_id, snapshot.generation))
    }
}

impl GallerySink for DirectoryGallery {
    fn store(&self, mut snapshot: GallerySnapshot, aggregate: &ResultAggregate) -> Result<GallerySnapshot> {
        let dir = self.entry_dir(&snapshot);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed creating gallery dir {}", dir.display()))?;

        for job in aggregate.jobs() {
            let Some(image) = &job.image else {
                continue;
            };
            let ImageRef::Inline { data, .. } = image else {
                continue;
            };
            let file_name = format!("{}.{}", job.key, image.extension());
            let path = dir.join(&file_name);
            std::fs::write(&path, data)
                .with_context(|| format!("failed writing {}", path.display()))?;
            if let Some(entry) = snapshot.entry_mut(&job.key) {
                entry.image_file = Some(file_name);
            }
        }

        write_snapshot(&dir.join("snapshot.json"), &snapshot)?;
        tracing::info!(dir = %dir.display(), entries = snapshot.entries.len(), "saved to gallery");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use valley_contracts::catalog::StyleCatalog;
    use valley_contracts::chat::{ChatAnnotations, ChatNote};
    use valley_contracts::gallery::{read_snapshot, GallerySnapshot};
    use valley_contracts::jobs::{ImageRef, Job, ResultAggregate, TransformOutput};

    use super::{DirectoryGallery, GallerySink};

    #[test]
    fn writes_inline_images_next_to_snapshot() -> anyhow::Result<()> {
        let catalog = StyleCatalog::builtin()?;
        let category = catalog
            .category("oriental")
            .ok_or_else(|| anyhow::anyhow!("missing oriental"))?;
        let mut jobs = IndexMap::new();
        for style in &category.member_styles {
            jobs.insert(style.id.clone(), Job::pending(style.clone(), 1));
        }
        let mut aggregate = ResultAggregate::Batch(jobs);
        if let Some(job) = aggregate.get_mut("korean") {
            job.settle(Ok(TransformOutput {
                image: ImageRef::inline("image/jpeg", vec![0xff, 0xd8, 0xff]),
                attribution: None,
            }));
        }
        if let Some(job) = aggregate.get_mut("chinese") {
            job.settle(Ok(TransformOutput {
                image: ImageRef::Url("https://img.example/chinese.png".to_string()),
                attribution: None,
            }));
        }
        if let Some(job) = aggregate.get_mut("japanese") {
            job.settle(Err("timeout".to_string()));
        }
        let mut notes = ChatAnnotations::new();
        notes.append("korean", ChatNote::new("user", "keep this one"));

        let temp = tempfile::tempdir()?;
        let gallery = DirectoryGallery::new(temp.path());
        let snapshot =
            GallerySnapshot::from_aggregate("sess", 1, Some("oriental"), "oriental-all", &aggregate, &notes);
        let stored = gallery.store(snapshot, &aggregate)?;

        let dir = gallery.entry_dir(&stored);
        assert_eq!(dir, temp.path().join("sess-g1"));
        assert_eq!(std::fs::read(dir.join("korean.jpg"))?, vec![0xff, 0xd8, 0xff]);
        assert!(!dir.join("chinese.png").exists());

        let reread = read_snapshot(&dir.join("snapshot.json"))?;
        assert_eq!(reread, stored);
        let korean = reread
            .entries
            .iter()
            .find(|entry| entry.key == "korean")
            .ok_or_else(|| anyhow::anyhow!("missing korean"))?;
        assert_eq!(korean.image_file.as_deref(), Some("korean.jpg"));
        assert_eq!(korean.notes.len(), 1);
        Ok(())
    }
}
