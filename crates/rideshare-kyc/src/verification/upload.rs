use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use super::domain::{DocumentFiles, DocumentKind, FileKind};
use super::error::{FieldError, VerificationError};

/// Outbound blob storage (object store, bucket, local disk).
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, returning the key the object is reachable by.
    fn put(&self, bytes: &[u8], key: &str) -> Result<String, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("blob backend failed: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Raw evidence as received from the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub front: Vec<u8>,
    pub back: Option<Vec<u8>>,
    pub file_kind: FileKind,
}

impl Evidence {
    pub fn images(front: impl Into<Vec<u8>>, back: impl Into<Vec<u8>>) -> Self {
        Self {
            front: front.into(),
            back: Some(back.into()),
            file_kind: FileKind::Image,
        }
    }

    pub fn pdf(document: impl Into<Vec<u8>>) -> Self {
        Self {
            front: document.into(),
            back: None,
            file_kind: FileKind::Pdf,
        }
    }
}

/// Which evidence shapes a document kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceRequirement {
    /// Front and back photos.
    TwoSidedImage,
    /// A single PDF or at least a front photo.
    PdfOrImage,
}

impl EvidenceRequirement {
    pub const fn for_kind(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Insurance => EvidenceRequirement::PdfOrImage,
            DocumentKind::IdentityCard | DocumentKind::DriverLicense | DocumentKind::VehicleCard => {
                EvidenceRequirement::TwoSidedImage
            }
        }
    }
}

/// Inputs to the deterministic object name.
#[derive(Debug, Clone)]
pub struct NamingContext {
    pub category: DocumentKind,
    pub owner: String,
    pub timestamp: DateTime<Utc>,
}

impl NamingContext {
    pub fn object_key(&self, side: &str, file_kind: FileKind) -> String {
        format!(
            "{}/{}/{}-{}.{}",
            self.category.label(),
            self.owner,
            self.timestamp.timestamp_millis(),
            side,
            file_kind.extension()
        )
    }
}

/// Writes evidence to blob storage ahead of the database transaction.
pub struct UploadOrchestrator<B> {
    blobs: Arc<B>,
    max_upload_bytes: usize,
}

impl<B> UploadOrchestrator<B>
where
    B: BlobStore,
{
    pub fn new(blobs: Arc<B>, max_upload_bytes: usize) -> Self {
        Self {
            blobs,
            max_upload_bytes,
        }
    }

    pub fn validate(&self, evidence: &Evidence, requirement: EvidenceRequirement) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if evidence.front.is_empty() {
            errors.push(FieldError::new("evidence.front", "front side is required"));
        }

        match (requirement, evidence.file_kind, &evidence.back) {
            (EvidenceRequirement::TwoSidedImage, FileKind::Pdf, _) => {
                errors.push(FieldError::new(
                    "evidence.file_kind",
                    "this document must be uploaded as photos",
                ));
            }
            (EvidenceRequirement::TwoSidedImage, FileKind::Image, None) => {
                errors.push(FieldError::new("evidence.back", "back side is required"));
            }
            (_, FileKind::Image, Some(back)) if back.is_empty() => {
                errors.push(FieldError::new("evidence.back", "back side is empty"));
            }
            (_, FileKind::Pdf, Some(_)) => {
                errors.push(FieldError::new(
                    "evidence.back",
                    "a PDF upload carries a single file",
                ));
            }
            _ => {}
        }

        let oversized = std::iter::once(("evidence.front", evidence.front.len()))
            .chain(evidence.back.as_ref().map(|back| ("evidence.back", back.len())))
            .filter(|(_, len)| *len > self.max_upload_bytes);
        for (field, len) in oversized {
            errors.push(FieldError::new(
                field,
                format!("{len} bytes exceeds the {} byte limit", self.max_upload_bytes),
            ));
        }

        errors
    }

    /// Upload both sides; nothing is written to the database here.
    pub fn persist(
        &self,
        evidence: &Evidence,
        context: &NamingContext,
    ) -> Result<DocumentFiles, VerificationError> {
        let front_key = context.object_key("front", evidence.file_kind);
        let front_file_key = self.put(&evidence.front, &front_key)?;

        let back_file_key = match &evidence.back {
            Some(bytes) => {
                let back_key = context.object_key("back", evidence.file_kind);
                Some(self.put(bytes, &back_key)?)
            }
            None => None,
        };

        debug!(
            category = %context.category,
            owner = %context.owner,
            front = %front_file_key,
            "evidence uploaded"
        );

        Ok(DocumentFiles {
            front_file_key,
            back_file_key,
            file_kind: evidence.file_kind,
        })
    }

    fn put(&self, bytes: &[u8], key: &str) -> Result<String, VerificationError> {
        self.blobs.put(bytes, key).map_err(|source| {
            error!(%key, error = %source, "evidence upload failed");
            VerificationError::UploadFailed(source)
        })
    }
}
