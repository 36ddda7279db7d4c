use crate::listing::rules::ListingRules;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::Serialize;
use std::{fmt, sync::Arc};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

/// A file as the client selected it, before any filtering.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// An accepted image together with its preview slot.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
    pub preview: Option<String>,
}

impl ImageEntry {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Accepted images in selection order. Previews live inside their entry, so
/// removing or decoding out of order can never misalign a preview and its file.
#[derive(Debug, Clone, Default)]
pub struct ImageSet {
    entries: Vec<ImageEntry>,
}

impl ImageSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ImageEntry] {
        &self.entries
    }

    #[cfg(test)]
    pub fn previews(&self) -> Vec<Option<&str>> {
        self.entries.iter().map(|e| e.preview.as_deref()).collect()
    }

    pub fn pending_previews(&self) -> usize {
        self.entries.iter().filter(|e| e.preview.is_none()).count()
    }

    /// Writes a decoded preview into the slot of the file it came from.
    /// Returns false when that file is no longer held.
    pub fn attach_preview(&mut self, id: Uuid, preview: String) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.preview = Some(preview);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<ImageEntry> {
        if index < self.entries.len() {
            Some(self.entries.remove(index))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum UploadWarning {
    InvalidFileType { rejected: usize },
    FileTooLarge { name: String, limit_bytes: u64 },
    ImageLimitReached { max: usize, dropped: usize },
}

impl fmt::Display for UploadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadWarning::InvalidFileType { .. } => write!(f, "please select image files only"),
            UploadWarning::FileTooLarge { name, limit_bytes } => write!(
                f,
                "{name} is larger than {} MB",
                limit_bytes / (1024 * 1024)
            ),
            UploadWarning::ImageLimitReached { max, .. } => {
                write!(f, "you can upload at most {max} images")
            }
        }
    }
}

/// Work item for one preview decode.
#[derive(Debug, Clone)]
pub struct DecodeJob {
    pub id: Uuid,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub accepted: Vec<Uuid>,
    pub warnings: Vec<UploadWarning>,
    pub jobs: Vec<DecodeJob>,
}

#[derive(Debug, Clone)]
pub struct ImageIngestionPipeline {
    max_images: usize,
    max_file_size: u64,
}

impl ImageIngestionPipeline {
    pub fn new(rules: &ListingRules) -> Self {
        Self {
            max_images: rules.max_images,
            max_file_size: rules.max_file_size,
        }
    }

    pub fn ingest(&self, set: &mut ImageSet, selection: Vec<SelectedFile>) -> IngestReport {
        let mut report = IngestReport::default();
        let selected = selection.len();

        let images: Vec<SelectedFile> = selection
            .into_iter()
            .filter(|file| file.mime_type.trim().to_ascii_lowercase().starts_with("image/"))
            .collect();
        if images.is_empty() {
            warn!(
                target = "barter.images",
                selected, "selection contained no image files"
            );
            report.warnings.push(UploadWarning::InvalidFileType { rejected: selected });
            return report;
        }

        let mut sized = Vec::with_capacity(images.len());
        for file in images {
            if file.bytes.len() as u64 > self.max_file_size {
                report.warnings.push(UploadWarning::FileTooLarge {
                    name: file.name,
                    limit_bytes: self.max_file_size,
                });
            } else {
                sized.push(file);
            }
        }

        let remaining_slots = self.max_images.saturating_sub(set.len());
        if sized.len() > remaining_slots {
            let dropped = sized.len() - remaining_slots;
            sized.truncate(remaining_slots);
            report.warnings.push(UploadWarning::ImageLimitReached {
                max: self.max_images,
                dropped,
            });
        }

        for file in sized {
            let entry = ImageEntry {
                id: Uuid::new_v4(),
                name: file.name,
                mime_type: file.mime_type.trim().to_ascii_lowercase(),
                bytes: Arc::from(file.bytes),
                preview: None,
            };
            report.accepted.push(entry.id);
            report.jobs.push(DecodeJob {
                id: entry.id,
                mime_type: entry.mime_type.clone(),
                bytes: entry.bytes.clone(),
            });
            set.entries.push(entry);
        }

        debug!(
            target = "barter.images",
            selected,
            accepted = report.accepted.len(),
            held = set.len(),
            "ingested selection"
        );
        report
    }
}

/// Decodes every job on the blocking pool. Results come back in completion
/// order, tagged with the id of the file they belong to.
pub fn spawn_decodes(jobs: Vec<DecodeJob>) -> JoinSet<(Uuid, String)> {
    let mut set = JoinSet::new();
    for job in jobs {
        set.spawn_blocking(move || (job.id, to_data_url(&job.mime_type, &job.bytes)));
    }
    set
}

pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}
