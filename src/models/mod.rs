//! Access to the metadata of projects and documents
//!
//! Every query goes through [MetadataDriver]. The service uses [PgMetadataDriver]
//! while the tests run against an in-memory driver, both wrapped in a [MetadataStore].

#[cfg(test)]
pub mod memory_driver;
mod pg_driver;

use std::collections::HashMap;
use std::collections::HashSet;

use chrono::DateTime;
use chrono::Utc;
use database::db_connection_pool::DatabasePoolError;
use database::db_connection_pool::PingError;
use orefox_models::BoundaryError;
use orefox_models::Confidentiality;
use orefox_models::Document;
use orefox_models::DocumentAccess;
use orefox_models::Project;
use orefox_models::document::DocumentPatch;
use orefox_models::document::NewDocument;
use orefox_models::document_access::NewDocumentAccess;
use orefox_models::project::NewProject;
use orefox_models::project::ProjectPatch;

pub use pg_driver::PgMetadataDriver;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Database(#[from] orefox_models::Error),
    #[error(transparent)]
    DatabaseUnavailable(#[from] DatabasePoolError),
    #[error(transparent)]
    Ping(#[from] PingError),
    #[error("project {project_id} has an invalid boundary: {source}")]
    CorruptedBoundary {
        project_id: i64,
        source: BoundaryError,
    },
    #[error("document {document_id} was removed before being committed")]
    Vanished { document_id: i64 },
    #[cfg(test)]
    #[error("the metadata store was set to fail {0:?} requests")]
    InjectedFault(memory_driver::Operation),
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        Self::Database(e.into())
    }
}

impl From<database::DatabaseError> for Error {
    fn from(database::DatabaseError(e): database::DatabaseError) -> Self {
        e.into()
    }
}

impl Error {
    /// Whether the database rejected the query because of the named constraint
    pub fn is_constraint(&self, name: &str) -> bool {
        matches!(self, Error::Database(error) if error.is_constraint(name))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Filters of the document listing, all optional
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    /// Case-insensitive search in the title, the type and the project name
    pub q: Option<String>,
    pub project_id: Option<i64>,
    pub doc_type: Option<String>,
    /// Most sensitive level the reader may see, `None` lists every level
    pub clearance: Option<Confidentiality>,
}

/// A page of results and the total number of matching items
pub type Page<T> = (Vec<T>, u64);

pub trait MetadataDriver: Clone + Send + Sync {
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    fn create_project(&self, project: NewProject) -> impl Future<Output = Result<Project>> + Send;

    /// Creates every project or none of them
    fn create_projects(
        &self,
        projects: Vec<NewProject>,
    ) -> impl Future<Output = Result<Vec<Project>>> + Send;

    fn get_project(&self, project_id: i64) -> impl Future<Output = Result<Option<Project>>> + Send;

    fn project_exists(&self, project_id: i64) -> impl Future<Output = Result<bool>> + Send;

    /// Projects from the most recent, `limit` 0 only counts them
    fn list_projects(
        &self,
        limit: u64,
        offset: u64,
    ) -> impl Future<Output = Result<Page<Project>>> + Send;

    fn update_project(
        &self,
        project_id: i64,
        patch: ProjectPatch,
    ) -> impl Future<Output = Result<Option<Project>>> + Send;

    /// Returns `false` if the project did not exist
    ///
    /// The documents of the project are kept and detached from it.
    fn delete_project(&self, project_id: i64) -> impl Future<Output = Result<bool>> + Send;

    /// Number of committed documents of each project, absent projects have none
    fn count_committed_documents(
        &self,
        project_ids: &[i64],
    ) -> impl Future<Output = Result<HashMap<i64, u64>>> + Send;

    fn insert_pending_document(
        &self,
        document: NewDocument,
    ) -> impl Future<Output = Result<Document>> + Send;

    /// Marks a pending document as committed, `None` if the row vanished
    fn commit_document(&self, document_id: i64)
    -> impl Future<Output = Result<Option<Document>>> + Send;

    fn mark_document_failed(&self, document_id: i64) -> impl Future<Output = Result<()>> + Send;

    /// Fetches a document whatever its status
    fn get_document(&self, document_id: i64)
    -> impl Future<Output = Result<Option<Document>>> + Send;

    fn find_document_by_checksum(
        &self,
        checksum_sha256: &str,
    ) -> impl Future<Output = Result<Option<Document>>> + Send;

    /// Committed documents from the most recent, `limit` 0 only counts them
    fn list_documents(
        &self,
        filter: &DocumentFilter,
        limit: u64,
        offset: u64,
    ) -> impl Future<Output = Result<Page<Document>>> + Send;

    /// Edits a committed document
    fn update_document(
        &self,
        document_id: i64,
        patch: DocumentPatch,
    ) -> impl Future<Output = Result<Option<Document>>> + Send;

    /// Deletes a document whatever its status and returns it
    fn delete_document(
        &self,
        document_id: i64,
    ) -> impl Future<Output = Result<Option<Document>>> + Send;

    /// Pending and failed documents created at or before `cutoff`
    fn stale_documents(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Document>>> + Send;

    /// The subset of `object_keys` referenced by a document
    fn referenced_object_keys(
        &self,
        object_keys: &[String],
    ) -> impl Future<Output = Result<HashSet<String>>> + Send;

    fn record_access(
        &self,
        access: NewDocumentAccess,
    ) -> impl Future<Output = Result<DocumentAccess>> + Send;

    /// Accesses to a document from the most recent, `limit` 0 only counts them
    fn list_accesses(
        &self,
        document_id: i64,
        limit: u64,
        offset: u64,
    ) -> impl Future<Output = Result<Page<DocumentAccess>>> + Send;
}

/// The metadata driver selected at startup
#[derive(Clone)]
pub enum MetadataStore {
    Postgres(PgMetadataDriver),
    #[cfg(test)]
    Memory(memory_driver::MemoryMetadataDriver),
}

macro_rules! dispatch {
    ($self:ident, $driver:ident => $call:expr) => {
        match $self {
            MetadataStore::Postgres($driver) => $call.await,
            #[cfg(test)]
            MetadataStore::Memory($driver) => $call.await,
        }
    };
}

impl MetadataDriver for MetadataStore {
    async fn ping(&self) -> Result<()> {
        dispatch!(self, driver => driver.ping())
    }

    async fn create_project(&self, project: NewProject) -> Result<Project> {
        dispatch!(self, driver => driver.create_project(project))
    }

    async fn create_projects(&self, projects: Vec<NewProject>) -> Result<Vec<Project>> {
        dispatch!(self, driver => driver.create_projects(projects))
    }

    async fn get_project(&self, project_id: i64) -> Result<Option<Project>> {
        dispatch!(self, driver => driver.get_project(project_id))
    }

    async fn project_exists(&self, project_id: i64) -> Result<bool> {
        dispatch!(self, driver => driver.project_exists(project_id))
    }

    async fn list_projects(&self, limit: u64, offset: u64) -> Result<Page<Project>> {
        dispatch!(self, driver => driver.list_projects(limit, offset))
    }

    async fn update_project(&self, project_id: i64, patch: ProjectPatch) -> Result<Option<Project>> {
        dispatch!(self, driver => driver.update_project(project_id, patch))
    }

    async fn delete_project(&self, project_id: i64) -> Result<bool> {
        dispatch!(self, driver => driver.delete_project(project_id))
    }

    async fn count_committed_documents(&self, project_ids: &[i64]) -> Result<HashMap<i64, u64>> {
        dispatch!(self, driver => driver.count_committed_documents(project_ids))
    }

    async fn insert_pending_document(&self, document: NewDocument) -> Result<Document> {
        dispatch!(self, driver => driver.insert_pending_document(document))
    }

    async fn commit_document(&self, document_id: i64) -> Result<Option<Document>> {
        dispatch!(self, driver => driver.commit_document(document_id))
    }

    async fn mark_document_failed(&self, document_id: i64) -> Result<()> {
        dispatch!(self, driver => driver.mark_document_failed(document_id))
    }

    async fn get_document(&self, document_id: i64) -> Result<Option<Document>> {
        dispatch!(self, driver => driver.get_document(document_id))
    }

    async fn find_document_by_checksum(&self, checksum_sha256: &str) -> Result<Option<Document>> {
        dispatch!(self, driver => driver.find_document_by_checksum(checksum_sha256))
    }

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Page<Document>> {
        dispatch!(self, driver => driver.list_documents(filter, limit, offset))
    }

    async fn update_document(
        &self,
        document_id: i64,
        patch: DocumentPatch,
    ) -> Result<Option<Document>> {
        dispatch!(self, driver => driver.update_document(document_id, patch))
    }

    async fn delete_document(&self, document_id: i64) -> Result<Option<Document>> {
        dispatch!(self, driver => driver.delete_document(document_id))
    }

    async fn stale_documents(&self, cutoff: DateTime<Utc>) -> Result<Vec<Document>> {
        dispatch!(self, driver => driver.stale_documents(cutoff))
    }

    async fn referenced_object_keys(&self, object_keys: &[String]) -> Result<HashSet<String>> {
        dispatch!(self, driver => driver.referenced_object_keys(object_keys))
    }

    async fn record_access(&self, access: NewDocumentAccess) -> Result<DocumentAccess> {
        dispatch!(self, driver => driver.record_access(access))
    }

    async fn list_accesses(
        &self,
        document_id: i64,
        limit: u64,
        offset: u64,
    ) -> Result<Page<DocumentAccess>> {
        dispatch!(self, driver => driver.list_accesses(document_id, limit, offset))
    }
}
