//! Document intake
//!
//! A document lives in two stores: its bytes in the object store and its metadata in
//! PostgreSQL. [DocumentIntake] keeps them consistent with a write-ahead row:
//!
//! 1. a [DocumentStatus::Pending] row is inserted with the object key,
//! 2. the object is written,
//! 3. the row is marked [DocumentStatus::Committed].
//!
//! Failures roll back what can be rolled back. Whatever a crash or a failed rollback
//! leaves behind (pending or failed rows, objects without a row) is collected by
//! [DocumentIntake::reconcile].

use std::collections::HashSet;

use bytes::Bytes;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use orefox_models::AccessAction;
use orefox_models::Confidentiality;
use orefox_models::Document;
use orefox_models::DocumentAccess;
use orefox_models::DocumentStatus;
use orefox_models::InvalidField;
use orefox_models::document::CHECKSUM_CONSTRAINT;
use orefox_models::document::DocumentPatch;
use orefox_models::document::NewDocument;
use orefox_models::document::PROJECT_CONSTRAINT;
use orefox_models::document::check_doc_type;
use orefox_models::document::check_title;
use orefox_models::document::check_year;
use orefox_models::document_access::NewDocumentAccess;
use serde::Serialize;
use sha2::Digest as _;
use sha2::Sha256;
use thiserror::Error;
use tracing::Level;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::models;
use crate::models::MetadataDriver;
use crate::models::Page;

/// Every document object is stored under this prefix
pub const OBJECT_PREFIX: &str = "documents/";
pub const FILENAME_MAX_LENGTH: usize = 120;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error, orefox_derive::ServiceError)]
#[service_error(base_id = "intake")]
pub enum IntakeError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },
    #[error("the same content was already uploaded as document '{existing_id}'")]
    #[service_error(status = 409)]
    Duplicate { existing_id: i64 },
    #[error("the same content is being uploaded concurrently")]
    #[service_error(status = 409)]
    ConcurrentDuplicate,
    #[error("project '{project_id}' could not be found")]
    #[service_error(status = 404)]
    ProjectNotFound { project_id: i64 },
    #[error("document '{document_id}' could not be found")]
    #[service_error(status = 404)]
    DocumentNotFound { document_id: i64 },
    #[error("document '{document_id}' requires a higher clearance")]
    #[service_error(status = 403)]
    InsufficientClearance { document_id: i64 },
    #[error("the object store could not complete the request")]
    #[service_error(status = 502)]
    Storage(#[source] storage::Error),
    #[error("the metadata store could not complete the request")]
    #[service_error(status = 500)]
    Metadata(#[source] models::Error),
}

impl From<InvalidField> for IntakeError {
    fn from(InvalidField { field, reason }: InvalidField) -> Self {
        Self::Validation {
            field: field.to_owned(),
            reason,
        }
    }
}

fn storage_error(error: storage::Error) -> IntakeError {
    error!(%error, "object store request failed");
    IntakeError::Storage(error)
}

pub(crate) fn metadata_error(error: models::Error) -> IntakeError {
    error!(%error, "metadata store request failed");
    IntakeError::Metadata(error)
}

pub type Result<T, E = IntakeError> = std::result::Result<T, E>;

/// A file sent by a user and its metadata
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub data: Bytes,
    pub filename: String,
    /// Defaults to `application/octet-stream` when absent or malformed
    pub content_type: Option<String>,
    pub title: String,
    pub year: i32,
    pub doc_type: String,
    pub confidentiality: Confidentiality,
    pub project_id: Option<i64>,
    pub created_by: Option<String>,
}

/// Someone reading documents, their accesses are recorded
#[derive(Debug, Clone, PartialEq)]
pub struct Reader {
    pub identity: Option<String>,
    pub name: Option<String>,
    /// The most sensitive level they may read
    pub clearance: Confidentiality,
}

impl Reader {
    fn check(&self, document: &Document) -> Result<()> {
        if self.clearance.permits(document.confidentiality) {
            Ok(())
        } else {
            warn!(document_id = document.id, identity = ?self.identity, clearance = %self.clearance, "access denied");
            Err(IntakeError::InsufficientClearance {
                document_id: document.id,
            })
        }
    }

    fn access(&self, document_id: i64, action: AccessAction) -> NewDocumentAccess {
        NewDocumentAccess {
            document_id,
            action,
            identity: self.identity.clone(),
            name: self.name.clone(),
        }
    }
}

/// Outcome of [DocumentIntake::reconcile]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub dry_run: bool,
    pub cutoff: DateTime<Utc>,
    /// Pending or failed rows removed (or that would be removed) with their object
    pub stale_documents: u64,
    /// Objects without a row removed (or that would be removed)
    pub orphan_objects: u64,
    /// Removals that failed and will be retried by the next sweep
    pub failures: u64,
}

/// Keeps a readable file name usable as the last segment of an object key
///
/// Path separators and control characters are dropped, whitespace runs become a
/// single `_` and the result is truncated to [FILENAME_MAX_LENGTH] characters.
pub fn sanitize_filename(filename: &str) -> String {
    let mut sanitized = String::with_capacity(filename.len());
    let mut pending_space = false;
    for c in filename.trim().chars() {
        if c == '/' || c == '\\' {
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space {
            sanitized.push('_');
            pending_space = false;
        }
        sanitized.push(c);
    }
    sanitized.chars().take(FILENAME_MAX_LENGTH).collect()
}

/// `documents/{project_id|unassigned}/{YYYY}/{MM}/{DD}/{uuid}-{filename}`
pub fn object_key(
    project_id: Option<i64>,
    date: DateTime<Utc>,
    id: Uuid,
    sanitized_filename: &str,
) -> String {
    let owner = project_id.map_or_else(|| String::from("unassigned"), |id| id.to_string());
    format!(
        "{OBJECT_PREFIX}{owner}/{}/{id}-{sanitized_filename}",
        date.format("%Y/%m/%d")
    )
}

/// Hex encoded SHA-256 digest
pub fn checksum(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn content_type(content_type: Option<&str>) -> String {
    content_type
        .and_then(|content_type| content_type.parse::<mime::Mime>().ok())
        .map_or_else(|| DEFAULT_CONTENT_TYPE.to_owned(), |mime| mime.to_string())
}

/// An upload whose fields passed every check that needs no store
#[derive(Debug)]
struct CheckedUpload {
    data: Bytes,
    filename: String,
    content_type: String,
    title: String,
    year: i32,
    doc_type: String,
}

impl TryFrom<&Upload> for CheckedUpload {
    type Error = InvalidField;

    fn try_from(upload: &Upload) -> Result<Self, Self::Error> {
        if upload.data.is_empty() {
            return Err(InvalidField::new("file", "must not be empty"));
        }
        let filename = sanitize_filename(&upload.filename);
        if filename.is_empty() {
            return Err(InvalidField::new("filename", "must not be empty"));
        }
        Ok(Self {
            data: upload.data.clone(),
            filename,
            content_type: content_type(upload.content_type.as_deref()),
            title: check_title(&upload.title)?,
            doc_type: check_doc_type(&upload.doc_type)?,
            year: check_year(upload.year)?,
        })
    }
}

#[derive(Clone)]
pub struct DocumentIntake<M: MetadataDriver> {
    metadata: M,
    storage: storage::Client,
}

impl<M: MetadataDriver> DocumentIntake<M> {
    pub fn new(metadata: M, storage: storage::Client) -> Self {
        Self { metadata, storage }
    }

    async fn check_project(&self, project_id: i64) -> Result<()> {
        let exists = self
            .metadata
            .project_exists(project_id)
            .await
            .map_err(metadata_error)?;
        if exists {
            Ok(())
        } else {
            Err(IntakeError::ProjectNotFound { project_id })
        }
    }

    /// Stores a new document, returned committed
    #[tracing::instrument(
        skip_all,
        fields(filename = %upload.filename, size = upload.data.len(), project_id = ?upload.project_id),
        err(level = Level::WARN)
    )]
    pub async fn submit(&self, upload: Upload) -> Result<Document> {
        let checked = CheckedUpload::try_from(&upload)?;
        if let Some(project_id) = upload.project_id {
            self.check_project(project_id).await?;
        }

        let checksum_sha256 = checksum(&checked.data);
        let existing = self
            .metadata
            .find_document_by_checksum(&checksum_sha256)
            .await
            .map_err(metadata_error)?;
        match existing {
            Some(existing) if existing.status == DocumentStatus::Failed => {
                self.purge(&existing).await?;
            }
            Some(existing) => {
                return Err(IntakeError::Duplicate {
                    existing_id: existing.id,
                });
            }
            None => (),
        }

        let object_key = object_key(
            upload.project_id,
            Utc::now(),
            Uuid::new_v4(),
            &checked.filename,
        );
        let new_document = NewDocument {
            title: checked.title,
            year: checked.year,
            doc_type: checked.doc_type,
            confidentiality: upload.confidentiality,
            object_key,
            filename: checked.filename,
            content_type: checked.content_type,
            size_bytes: i64::try_from(checked.data.len()).unwrap_or(i64::MAX),
            checksum_sha256,
            project_id: upload.project_id,
            created_by: upload.created_by,
            status: DocumentStatus::Pending,
        };
        let pending = match self.metadata.insert_pending_document(new_document).await {
            Ok(pending) => pending,
            Err(error) if error.is_constraint(CHECKSUM_CONSTRAINT) => {
                return Err(IntakeError::ConcurrentDuplicate);
            }
            Err(error) if error.is_constraint(PROJECT_CONSTRAINT) => {
                return Err(IntakeError::ProjectNotFound {
                    // the constraint only fails on a project id
                    project_id: upload.project_id.unwrap_or_default(),
                });
            }
            Err(error) => return Err(metadata_error(error)),
        };

        let put = self
            .storage
            .put(storage::PutRequest {
                key: &pending.object_key,
                data: checked.data,
                content_type: &pending.content_type,
                checksum_sha256: &pending.checksum_sha256,
            })
            .await;
        if let Err(error) = put {
            self.abandon(&pending).await;
            return Err(storage_error(error));
        }

        match self.metadata.commit_document(pending.id).await {
            Ok(Some(document)) => {
                info!(document_id = document.id, object_key = %document.object_key, "document stored");
                Ok(document)
            }
            Ok(None) => {
                self.discard_object(&pending.object_key).await;
                Err(metadata_error(models::Error::Vanished {
                    document_id: pending.id,
                }))
            }
            Err(error) => {
                self.discard_object(&pending.object_key).await;
                if let Err(error) = self.metadata.delete_document(pending.id).await {
                    warn!(document_id = pending.id, %error, "could not remove an uncommitted document, it will be reconciled");
                }
                Err(metadata_error(error))
            }
        }
    }

    /// Rolls back a pending row whose object could not be written
    async fn abandon(&self, pending: &Document) {
        let Err(error) = self.metadata.delete_document(pending.id).await else {
            return;
        };
        warn!(document_id = pending.id, %error, "could not remove a pending document, marking it failed");
        if let Err(error) = self.metadata.mark_document_failed(pending.id).await {
            error!(document_id = pending.id, %error, "could not mark a pending document failed, it will be reconciled");
        }
    }

    async fn discard_object(&self, object_key: &str) {
        if let Err(error) = self.storage.delete(object_key).await {
            warn!(object_key, %error, "could not remove an object, it will be reconciled");
        }
    }

    /// Removes a failed document so that its content can be uploaded again
    async fn purge(&self, failed: &Document) -> Result<()> {
        info!(document_id = failed.id, "replacing a failed upload of the same content");
        self.metadata
            .delete_document(failed.id)
            .await
            .map_err(metadata_error)?;
        self.discard_object(&failed.object_key).await;
        Ok(())
    }

    /// A committed document
    #[tracing::instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn fetch(&self, document_id: i64) -> Result<Document> {
        self.metadata
            .get_document(document_id)
            .await
            .map_err(metadata_error)?
            .filter(|document| document.status == DocumentStatus::Committed)
            .ok_or(IntakeError::DocumentNotFound { document_id })
    }

    /// A committed document the reader is cleared for
    async fn readable(&self, document_id: i64, reader: &Reader) -> Result<Document> {
        let document = self.fetch(document_id).await?;
        reader.check(&document)?;
        Ok(document)
    }

    /// The access is part of the answer, a read that cannot be recorded fails
    async fn record(&self, reader: &Reader, document_id: i64, action: AccessAction) -> Result<()> {
        self.metadata
            .record_access(reader.access(document_id, action))
            .await
            .map_err(metadata_error)?;
        Ok(())
    }

    /// The metadata of a document, recorded as viewed by `reader`
    #[tracing::instrument(skip(self, reader), fields(identity = ?reader.identity), err(level = Level::DEBUG))]
    pub async fn view(&self, document_id: i64, reader: &Reader) -> Result<Document> {
        let document = self.readable(document_id, reader).await?;
        self.record(reader, document_id, AccessAction::View).await?;
        Ok(document)
    }

    /// A committed document and its content, recorded as downloaded by `reader`
    #[tracing::instrument(skip(self, reader), fields(identity = ?reader.identity), err)]
    pub async fn download(&self, document_id: i64, reader: &Reader) -> Result<(Document, Bytes)> {
        let document = self.readable(document_id, reader).await?;
        let object = self
            .storage
            .get(&document.object_key)
            .await
            .map_err(storage_error)?;
        self.record(reader, document_id, AccessAction::Download)
            .await?;
        Ok((document, object.data))
    }

    /// Who viewed or downloaded a document, the most recent first
    ///
    /// The trail of a deleted document is only shown to readers cleared for every level.
    #[tracing::instrument(skip(self, reader), err(level = Level::DEBUG))]
    pub async fn accesses(
        &self,
        document_id: i64,
        reader: &Reader,
        limit: u64,
        offset: u64,
    ) -> Result<Page<DocumentAccess>> {
        let document = self
            .metadata
            .get_document(document_id)
            .await
            .map_err(metadata_error)?;
        match document {
            Some(document) => reader.check(&document)?,
            None if reader.clearance == Confidentiality::Confidential => (),
            None => return Err(IntakeError::DocumentNotFound { document_id }),
        }
        self.metadata
            .list_accesses(document_id, limit, offset)
            .await
            .map_err(metadata_error)
    }

    #[tracing::instrument(skip(self, patch, reader), err(level = Level::WARN))]
    pub async fn update(
        &self,
        document_id: i64,
        patch: DocumentPatch,
        reader: &Reader,
    ) -> Result<Document> {
        let patch = patch.validated()?;
        self.readable(document_id, reader).await?;
        if let Some(confidentiality) = patch.confidentiality
            && !reader.clearance.permits(confidentiality)
        {
            return Err(IntakeError::InsufficientClearance { document_id });
        }
        if let Some(Some(project_id)) = patch.project_id {
            self.check_project(project_id).await?;
        }
        match self.metadata.update_document(document_id, patch.clone()).await {
            Ok(document) => document.ok_or(IntakeError::DocumentNotFound { document_id }),
            Err(error) if error.is_constraint(PROJECT_CONSTRAINT) => {
                Err(IntakeError::ProjectNotFound {
                    project_id: patch.project_id.flatten().unwrap_or_default(),
                })
            }
            Err(error) => Err(metadata_error(error)),
        }
    }

    /// Removes the row of a committed document, then its object
    #[tracing::instrument(skip(self, reader), err(level = Level::WARN))]
    pub async fn delete(&self, document_id: i64, reader: &Reader) -> Result<()> {
        self.readable(document_id, reader).await?;
        let Some(document) = self
            .metadata
            .delete_document(document_id)
            .await
            .map_err(metadata_error)?
        else {
            return Err(IntakeError::DocumentNotFound { document_id });
        };
        self.discard_object(&document.object_key).await;
        info!(document_id, "document deleted");
        Ok(())
    }

    /// Collects what interrupted or failed uploads left behind
    ///
    /// Rows still pending or failed and objects referenced by no row are removed once
    /// they are older than `grace`. With `dry_run` nothing is removed and the report
    /// tells what would be.
    #[tracing::instrument(skip(self), err)]
    pub async fn reconcile(&self, grace: TimeDelta, dry_run: bool) -> Result<ReconcileReport> {
        let cutoff = Utc::now() - grace;
        let mut report = ReconcileReport {
            dry_run,
            cutoff,
            ..Default::default()
        };

        let stale = self
            .metadata
            .stale_documents(cutoff)
            .await
            .map_err(metadata_error)?;
        for document in stale {
            report.stale_documents += 1;
            if dry_run {
                continue;
            }
            // a row is only removed once its object is gone, so a failure is retried
            if let Err(error) = self.storage.delete(&document.object_key).await {
                warn!(document_id = document.id, %error, "could not remove the object of a stale document");
                report.failures += 1;
                continue;
            }
            if let Err(error) = self.metadata.delete_document(document.id).await {
                warn!(document_id = document.id, %error, "could not remove a stale document");
                report.failures += 1;
            }
        }

        let candidates: Vec<String> = self
            .storage
            .list(OBJECT_PREFIX)
            .await
            .map_err(storage_error)?
            .into_iter()
            .filter(|object| object.last_modified.is_some_and(|date| date <= cutoff))
            .map(|object| object.key)
            .collect();
        let referenced: HashSet<String> = self
            .metadata
            .referenced_object_keys(&candidates)
            .await
            .map_err(metadata_error)?;
        for key in candidates.iter().filter(|key| !referenced.contains(*key)) {
            report.orphan_objects += 1;
            if dry_run {
                continue;
            }
            if let Err(error) = self.storage.delete(key).await {
                warn!(object_key = key, %error, "could not remove an orphan object");
                report.failures += 1;
            }
        }

        info!(
            dry_run,
            stale_documents = report.stale_documents,
            orphan_objects = report.orphan_objects,
            failures = report.failures,
            "reconciliation done"
        );
        Ok(report)
    }
}
