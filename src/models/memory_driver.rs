use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use chrono::DateTime;
use chrono::Utc;
use orefox_models::Document;
use orefox_models::DocumentAccess;
use orefox_models::DocumentStatus;
use orefox_models::Project;
use orefox_models::document::CHECKSUM_CONSTRAINT;
use orefox_models::document::DocumentPatch;
use orefox_models::document::PROJECT_CONSTRAINT;
use orefox_models::document::NewDocument;
use orefox_models::document_access::NewDocumentAccess;
use orefox_models::project::NewProject;
use orefox_models::project::ProjectPatch;

use super::DocumentFilter;
use super::Error;
use super::MetadataDriver;
use super::Page;
use super::Result;

/// The requests of [MemoryMetadataDriver] that can be set to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Ping,
    ReadProjects,
    WriteProjects,
    InsertDocument,
    CommitDocument,
    MarkDocumentFailed,
    ReadDocuments,
    UpdateDocument,
    DeleteDocument,
    RecordAccess,
}

#[derive(Default)]
struct State {
    projects: BTreeMap<i64, Project>,
    documents: BTreeMap<i64, Document>,
    accesses: Vec<DocumentAccess>,
    last_id: i64,
    faults: HashSet<Operation>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn insert_project(&mut self, project: NewProject) -> Project {
        let now = Utc::now();
        let project = Project {
            id: self.next_id(),
            name: project.name,
            description: project.description,
            mode: project.mode,
            commodity: project.commodity,
            boundary: project.boundary,
            creation_date: now,
            last_modification: now,
        };
        self.projects.insert(project.id, project.clone());
        project
    }

    fn check(&self, operation: Operation) -> Result<()> {
        if self.faults.contains(&operation) {
            Err(Error::InjectedFault(operation))
        } else {
            Ok(())
        }
    }
}

/// A metadata store mimicking the constraints of the PostgreSQL schema
#[derive(Clone, Default)]
pub struct MemoryMetadataDriver {
    state: Arc<Mutex<State>>,
}

fn unique_violation(constraint: &str, column: &str, value: &str) -> Error {
    Error::Database(orefox_models::Error::UniqueViolation {
        constraint: constraint.to_owned(),
        column: column.to_owned(),
        value: value.to_owned(),
    })
}

fn matches_search(document: &Document, project_name: Option<&str>, search: &str) -> bool {
    let search = search.to_lowercase();
    document.title.to_lowercase().contains(&search)
        || document.doc_type.to_lowercase().contains(&search)
        || project_name.is_some_and(|name| name.to_lowercase().contains(&search))
}

fn paginate<T: Clone>(mut items: Vec<T>, limit: u64, offset: u64) -> Page<T> {
    let count = items.len() as u64;
    let items = items
        .drain(..)
        .skip(offset as usize)
        .take(limit as usize)
        .collect();
    (items, count)
}

impl MemoryMetadataDriver {
    fn lock(&self) -> MutexGuard<'_, State> {
        // a test panicking while holding the lock does not make the data inconsistent
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn inject_fault(&self, operation: Operation) {
        self.lock().faults.insert(operation);
    }

    pub fn clear_fault(&self, operation: Operation) {
        self.lock().faults.remove(&operation);
    }

    /// Every document whatever its status, ordered by id
    pub fn all_documents(&self) -> Vec<Document> {
        self.lock().documents.values().cloned().collect()
    }

    /// Moves the creation date of a document, used to age rows in tests
    pub fn set_document_created_at(&self, document_id: i64, created_at: DateTime<Utc>) {
        if let Some(document) = self.lock().documents.get_mut(&document_id) {
            document.created_at = created_at;
        }
    }
}

impl MetadataDriver for MemoryMetadataDriver {
    async fn ping(&self) -> Result<()> {
        self.lock().check(Operation::Ping)
    }

    async fn create_project(&self, project: NewProject) -> Result<Project> {
        let mut state = self.lock();
        state.check(Operation::WriteProjects)?;
        Ok(state.insert_project(project))
    }

    async fn create_projects(&self, projects: Vec<NewProject>) -> Result<Vec<Project>> {
        let mut state = self.lock();
        state.check(Operation::WriteProjects)?;
        Ok(projects
            .into_iter()
            .map(|project| state.insert_project(project))
            .collect())
    }

    async fn get_project(&self, project_id: i64) -> Result<Option<Project>> {
        let state = self.lock();
        state.check(Operation::ReadProjects)?;
        Ok(state.projects.get(&project_id).cloned())
    }

    async fn project_exists(&self, project_id: i64) -> Result<bool> {
        let state = self.lock();
        state.check(Operation::ReadProjects)?;
        Ok(state.projects.contains_key(&project_id))
    }

    async fn list_projects(&self, limit: u64, offset: u64) -> Result<Page<Project>> {
        let state = self.lock();
        state.check(Operation::ReadProjects)?;
        let mut projects: Vec<_> = state.projects.values().cloned().collect();
        projects.sort_by(|a, b| {
            (b.creation_date, b.id).cmp(&(a.creation_date, a.id))
        });
        Ok(paginate(projects, limit, offset))
    }

    async fn update_project(&self, project_id: i64, patch: ProjectPatch) -> Result<Option<Project>> {
        let mut state = self.lock();
        state.check(Operation::WriteProjects)?;
        let Some(project) = state.projects.get_mut(&project_id) else {
            return Ok(None);
        };
        patch.apply(project);
        project.last_modification = Utc::now();
        Ok(Some(project.clone()))
    }

    async fn delete_project(&self, project_id: i64) -> Result<bool> {
        let mut state = self.lock();
        state.check(Operation::WriteProjects)?;
        if state.projects.remove(&project_id).is_none() {
            return Ok(false);
        }
        state
            .documents
            .values_mut()
            .filter(|document| document.project_id == Some(project_id))
            .for_each(|document| document.project_id = None);
        Ok(true)
    }

    async fn count_committed_documents(&self, project_ids: &[i64]) -> Result<HashMap<i64, u64>> {
        let state = self.lock();
        state.check(Operation::ReadDocuments)?;
        let mut counts = HashMap::new();
        for document in state.documents.values() {
            if document.status != DocumentStatus::Committed {
                continue;
            }
            if let Some(project_id) = document.project_id
                && project_ids.contains(&project_id)
            {
                *counts.entry(project_id).or_default() += 1;
            }
        }
        Ok(counts)
    }

    async fn insert_pending_document(&self, document: NewDocument) -> Result<Document> {
        let mut state = self.lock();
        state.check(Operation::InsertDocument)?;
        if state
            .documents
            .values()
            .any(|existing| existing.checksum_sha256 == document.checksum_sha256)
        {
            return Err(unique_violation(
                CHECKSUM_CONSTRAINT,
                "checksum_sha256",
                &document.checksum_sha256,
            ));
        }
        if state
            .documents
            .values()
            .any(|existing| existing.object_key == document.object_key)
        {
            return Err(unique_violation(
                "document_object_key_key",
                "object_key",
                &document.object_key,
            ));
        }
        if let Some(project_id) = document.project_id
            && !state.projects.contains_key(&project_id)
        {
            return Err(Error::Database(
                orefox_models::Error::ForeignKeyViolation {
                    constraint: PROJECT_CONSTRAINT.to_owned(),
                },
            ));
        }
        let now = Utc::now();
        let document = Document {
            id: state.next_id(),
            title: document.title,
            year: document.year,
            doc_type: document.doc_type,
            confidentiality: document.confidentiality,
            object_key: document.object_key,
            filename: document.filename,
            content_type: document.content_type,
            size_bytes: document.size_bytes,
            checksum_sha256: document.checksum_sha256,
            project_id: document.project_id,
            created_by: document.created_by,
            status: DocumentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn commit_document(&self, document_id: i64) -> Result<Option<Document>> {
        let mut state = self.lock();
        state.check(Operation::CommitDocument)?;
        Ok(state.documents.get_mut(&document_id).map(|document| {
            document.status = DocumentStatus::Committed;
            document.updated_at = Utc::now();
            document.clone()
        }))
    }

    async fn mark_document_failed(&self, document_id: i64) -> Result<()> {
        let mut state = self.lock();
        state.check(Operation::MarkDocumentFailed)?;
        if let Some(document) = state.documents.get_mut(&document_id) {
            document.status = DocumentStatus::Failed;
            document.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_document(&self, document_id: i64) -> Result<Option<Document>> {
        let state = self.lock();
        state.check(Operation::ReadDocuments)?;
        Ok(state.documents.get(&document_id).cloned())
    }

    async fn find_document_by_checksum(&self, checksum_sha256: &str) -> Result<Option<Document>> {
        let state = self.lock();
        state.check(Operation::ReadDocuments)?;
        Ok(state
            .documents
            .values()
            .find(|document| document.checksum_sha256 == checksum_sha256)
            .cloned())
    }

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Page<Document>> {
        let state = self.lock();
        state.check(Operation::ReadDocuments)?;
        let search = filter
            .q
            .as_deref()
            .map(str::trim)
            .filter(|search| !search.is_empty());
        let mut documents: Vec<_> = state
            .documents
            .values()
            .filter(|document| document.status == DocumentStatus::Committed)
            .filter(|document| {
                filter
                    .project_id
                    .is_none_or(|project_id| document.project_id == Some(project_id))
            })
            .filter(|document| {
                filter
                    .clearance
                    .is_none_or(|clearance| clearance.permits(document.confidentiality))
            })
            .filter(|document| {
                filter
                    .doc_type
                    .as_ref()
                    .is_none_or(|doc_type| &document.doc_type == doc_type)
            })
            .filter(|document| {
                search.is_none_or(|search| {
                    let project_name = document
                        .project_id
                        .and_then(|project_id| state.projects.get(&project_id))
                        .map(|project| project.name.as_str());
                    matches_search(document, project_name, search)
                })
            })
            .cloned()
            .collect();
        documents.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(paginate(documents, limit, offset))
    }

    async fn update_document(
        &self,
        document_id: i64,
        patch: DocumentPatch,
    ) -> Result<Option<Document>> {
        let mut state = self.lock();
        state.check(Operation::UpdateDocument)?;
        if let Some(Some(project_id)) = patch.project_id
            && !state.projects.contains_key(&project_id)
        {
            return Err(Error::Database(
                orefox_models::Error::ForeignKeyViolation {
                    constraint: PROJECT_CONSTRAINT.to_owned(),
                },
            ));
        }
        let Some(document) = state
            .documents
            .get_mut(&document_id)
            .filter(|document| document.status == DocumentStatus::Committed)
        else {
            return Ok(None);
        };
        patch.apply(document);
        document.updated_at = Utc::now();
        Ok(Some(document.clone()))
    }

    async fn delete_document(&self, document_id: i64) -> Result<Option<Document>> {
        let mut state = self.lock();
        state.check(Operation::DeleteDocument)?;
        Ok(state.documents.remove(&document_id))
    }

    async fn stale_documents(&self, cutoff: DateTime<Utc>) -> Result<Vec<Document>> {
        let state = self.lock();
        state.check(Operation::ReadDocuments)?;
        Ok(state
            .documents
            .values()
            .filter(|document| document.status != DocumentStatus::Committed)
            .filter(|document| document.created_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn referenced_object_keys(&self, object_keys: &[String]) -> Result<HashSet<String>> {
        let state = self.lock();
        state.check(Operation::ReadDocuments)?;
        Ok(state
            .documents
            .values()
            .filter(|document| object_keys.contains(&document.object_key))
            .map(|document| document.object_key.clone())
            .collect())
    }

    async fn record_access(&self, access: NewDocumentAccess) -> Result<DocumentAccess> {
        let mut state = self.lock();
        state.check(Operation::RecordAccess)?;
        let access = DocumentAccess {
            id: state.next_id(),
            document_id: access.document_id,
            action: access.action,
            identity: access.identity,
            name: access.name,
            accessed_at: Utc::now(),
        };
        state.accesses.push(access.clone());
        Ok(access)
    }

    async fn list_accesses(
        &self,
        document_id: i64,
        limit: u64,
        offset: u64,
    ) -> Result<Page<DocumentAccess>> {
        let state = self.lock();
        state.check(Operation::ReadDocuments)?;
        let accesses = state
            .accesses
            .iter()
            .rev()
            .filter(|access| access.document_id == document_id)
            .cloned()
            .collect();
        Ok(paginate(accesses, limit, offset))
    }
}
