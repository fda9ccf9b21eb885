use std::collections::HashMap;
use std::collections::HashSet;
use std::ops::DerefMut;

use chrono::DateTime;
use chrono::Utc;
use database::DbConnectionPool;
use database::ping_database;
use database::tables::document;
use database::tables::document_access;
use database::tables::project;
use diesel::dsl;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use diesel_async::scoped_futures::ScopedFutureExt as _;
use orefox_models::Document;
use orefox_models::DocumentAccess;
use orefox_models::DocumentStatus;
use orefox_models::Project;
use orefox_models::document::DocumentPatch;
use orefox_models::document::NewDocument;
use orefox_models::document_access::NewDocumentAccess;
use orefox_models::project::NewProject;
use orefox_models::project::ProjectPatch;
use orefox_models::project::ProjectRow;
use tracing::Level;

use super::DocumentFilter;
use super::Error;
use super::MetadataDriver;
use super::Page;
use super::Result;

#[derive(Clone)]
pub struct PgMetadataDriver {
    pool: DbConnectionPool,
}

impl PgMetadataDriver {
    pub fn new(pool: DbConnectionPool) -> Self {
        Self { pool }
    }
}

fn into_project(row: ProjectRow) -> Result<Project> {
    let project_id = row.id;
    Project::try_from(row).map_err(|source| Error::CorruptedBoundary { project_id, source })
}

/// Escapes the `LIKE` wildcards of a user search
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn committed_documents(filter: &DocumentFilter) -> document::BoxedQuery<'static, Pg> {
    let mut query = document::table
        .filter(document::status.eq(DocumentStatus::Committed))
        .into_boxed();
    if let Some(project_id) = filter.project_id {
        query = query.filter(document::project_id.eq(project_id));
    }
    if let Some(doc_type) = &filter.doc_type {
        query = query.filter(document::doc_type.eq(doc_type.clone()));
    }
    if let Some(clearance) = filter.clearance {
        query = query.filter(document::confidentiality.eq_any(clearance.up_to()));
    }
    if let Some(search) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = like_pattern(search);
        let matching_projects = project::table
            .filter(project::name.ilike(pattern.clone()))
            .select(project::id.nullable());
        query = query.filter(
            document::title
                .ilike(pattern.clone())
                .or(document::doc_type.ilike(pattern))
                .or(document::project_id.eq_any(matching_projects)),
        );
    }
    query
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl MetadataDriver for PgMetadataDriver {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        ping_database(&mut conn).await?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(name = %new_project.name), err)]
    async fn create_project(&self, new_project: NewProject) -> Result<Project> {
        let conn = self.pool.get().await?;
        let row = dsl::insert_into(project::table)
            .values(new_project.to_row())
            .returning(ProjectRow::as_returning())
            .get_result(conn.write().await.deref_mut())
            .await?;
        into_project(row)
    }

    #[tracing::instrument(skip_all, fields(count = new_projects.len()), err)]
    async fn create_projects(&self, new_projects: Vec<NewProject>) -> Result<Vec<Project>> {
        let conn = self.pool.get().await?;
        conn.transaction(move |conn| {
            async move {
                let mut projects = Vec::with_capacity(new_projects.len());
                for new_project in new_projects {
                    let row = dsl::insert_into(project::table)
                        .values(new_project.to_row())
                        .returning(ProjectRow::as_returning())
                        .get_result(conn.write().await.deref_mut())
                        .await?;
                    projects.push(into_project(row)?);
                }
                Ok::<_, Error>(projects)
            }
            .scope_boxed()
        })
        .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn get_project(&self, project_id: i64) -> Result<Option<Project>> {
        let conn = self.pool.get().await?;
        project::table
            .find(project_id)
            .select(ProjectRow::as_select())
            .first(conn.write().await.deref_mut())
            .await
            .optional()?
            .map(into_project)
            .transpose()
    }

    #[tracing::instrument(skip(self), ret(level = Level::DEBUG), err)]
    async fn project_exists(&self, project_id: i64) -> Result<bool> {
        let conn = self.pool.get().await?;
        let exists: bool = dsl::select(dsl::exists(project::table.find(project_id)))
            .get_result(conn.write().await.deref_mut())
            .await?;
        Ok(exists)
    }

    #[tracing::instrument(skip(self), err)]
    async fn list_projects(&self, limit: u64, offset: u64) -> Result<Page<Project>> {
        let conn = self.pool.get().await?;
        let count: i64 = project::table
            .count()
            .get_result(conn.write().await.deref_mut())
            .await?;
        let projects = if limit == 0 {
            Vec::new()
        } else {
            project::table
                .select(ProjectRow::as_select())
                .order((project::creation_date.desc(), project::id.desc()))
                .limit(to_i64(limit))
                .offset(to_i64(offset))
                .load(conn.write().await.deref_mut())
                .await?
                .into_iter()
                .map(into_project)
                .collect::<Result<_>>()?
        };
        Ok((projects, count as u64))
    }

    #[tracing::instrument(skip(self, patch), err)]
    async fn update_project(&self, project_id: i64, patch: ProjectPatch) -> Result<Option<Project>> {
        let conn = self.pool.get().await?;
        dsl::update(project::table.find(project_id))
            .set((
                patch.to_changeset(),
                project::last_modification.eq(Utc::now()),
            ))
            .returning(ProjectRow::as_returning())
            .get_result(conn.write().await.deref_mut())
            .await
            .optional()?
            .map(into_project)
            .transpose()
    }

    #[tracing::instrument(skip(self), ret(level = Level::DEBUG), err)]
    async fn delete_project(&self, project_id: i64) -> Result<bool> {
        let conn = self.pool.get().await?;
        let deleted = dsl::delete(project::table.find(project_id))
            .execute(conn.write().await.deref_mut())
            .await?;
        Ok(deleted > 0)
    }

    #[tracing::instrument(skip(self), err)]
    async fn count_committed_documents(&self, project_ids: &[i64]) -> Result<HashMap<i64, u64>> {
        if project_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.pool.get().await?;
        let counts = document::table
            .filter(document::status.eq(DocumentStatus::Committed))
            .filter(document::project_id.eq_any(project_ids.to_vec()))
            .group_by(document::project_id)
            .select((document::project_id, dsl::count_star()))
            .load::<(Option<i64>, i64)>(conn.write().await.deref_mut())
            .await?;
        Ok(counts
            .into_iter()
            .filter_map(|(project_id, count)| Some((project_id?, count as u64)))
            .collect())
    }

    #[tracing::instrument(skip_all, fields(object_key = %new_document.object_key), err)]
    async fn insert_pending_document(&self, new_document: NewDocument) -> Result<Document> {
        let conn = self.pool.get().await?;
        let document = dsl::insert_into(document::table)
            .values(NewDocument {
                status: DocumentStatus::Pending,
                ..new_document
            })
            .returning(Document::as_returning())
            .get_result(conn.write().await.deref_mut())
            .await?;
        Ok(document)
    }

    #[tracing::instrument(skip(self), err)]
    async fn commit_document(&self, document_id: i64) -> Result<Option<Document>> {
        let conn = self.pool.get().await?;
        let document = dsl::update(document::table.find(document_id))
            .set((
                document::status.eq(DocumentStatus::Committed),
                document::updated_at.eq(Utc::now()),
            ))
            .returning(Document::as_returning())
            .get_result(conn.write().await.deref_mut())
            .await
            .optional()?;
        Ok(document)
    }

    #[tracing::instrument(skip(self), err)]
    async fn mark_document_failed(&self, document_id: i64) -> Result<()> {
        let conn = self.pool.get().await?;
        dsl::update(document::table.find(document_id))
            .set((
                document::status.eq(DocumentStatus::Failed),
                document::updated_at.eq(Utc::now()),
            ))
            .execute(conn.write().await.deref_mut())
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), err)]
    async fn get_document(&self, document_id: i64) -> Result<Option<Document>> {
        let conn = self.pool.get().await?;
        let document = document::table
            .find(document_id)
            .select(Document::as_select())
            .first(conn.write().await.deref_mut())
            .await
            .optional()?;
        Ok(document)
    }

    #[tracing::instrument(skip(self), err)]
    async fn find_document_by_checksum(&self, checksum_sha256: &str) -> Result<Option<Document>> {
        let conn = self.pool.get().await?;
        let document = document::table
            .filter(document::checksum_sha256.eq(checksum_sha256))
            .select(Document::as_select())
            .first(conn.write().await.deref_mut())
            .await
            .optional()?;
        Ok(document)
    }

    #[tracing::instrument(skip(self), err)]
    async fn list_documents(
        &self,
        filter: &DocumentFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Page<Document>> {
        let conn = self.pool.get().await?;
        let count: i64 = committed_documents(filter)
            .count()
            .get_result(conn.write().await.deref_mut())
            .await?;
        if limit == 0 {
            return Ok((Vec::new(), count as u64));
        }
        let documents = committed_documents(filter)
            .select(Document::as_select())
            .order((document::created_at.desc(), document::id.desc()))
            .limit(to_i64(limit))
            .offset(to_i64(offset))
            .load(conn.write().await.deref_mut())
            .await?;
        Ok((documents, count as u64))
    }

    #[tracing::instrument(skip(self, patch), err)]
    async fn update_document(
        &self,
        document_id: i64,
        patch: DocumentPatch,
    ) -> Result<Option<Document>> {
        let conn = self.pool.get().await?;
        let document = dsl::update(
            document::table
                .find(document_id)
                .filter(document::status.eq(DocumentStatus::Committed)),
        )
        .set((patch, document::updated_at.eq(Utc::now())))
        .returning(Document::as_returning())
        .get_result(conn.write().await.deref_mut())
        .await
        .optional()?;
        Ok(document)
    }

    #[tracing::instrument(skip(self), err)]
    async fn delete_document(&self, document_id: i64) -> Result<Option<Document>> {
        let conn = self.pool.get().await?;
        let document = dsl::delete(document::table.find(document_id))
            .returning(Document::as_returning())
            .get_result(conn.write().await.deref_mut())
            .await
            .optional()?;
        Ok(document)
    }

    #[tracing::instrument(skip(self), err)]
    async fn stale_documents(&self, cutoff: DateTime<Utc>) -> Result<Vec<Document>> {
        let conn = self.pool.get().await?;
        let documents = document::table
            .filter(document::status.ne(DocumentStatus::Committed))
            .filter(document::created_at.le(cutoff))
            .select(Document::as_select())
            .order(document::id)
            .load(conn.write().await.deref_mut())
            .await?;
        Ok(documents)
    }

    #[tracing::instrument(skip_all, fields(candidates = object_keys.len()), err)]
    async fn referenced_object_keys(&self, object_keys: &[String]) -> Result<HashSet<String>> {
        if object_keys.is_empty() {
            return Ok(HashSet::new());
        }
        let conn = self.pool.get().await?;
        let keys = document::table
            .filter(document::object_key.eq_any(object_keys.to_vec()))
            .select(document::object_key)
            .load::<String>(conn.write().await.deref_mut())
            .await?;
        Ok(keys.into_iter().collect())
    }

    #[tracing::instrument(skip_all, fields(document_id = access.document_id, action = %access.action), err)]
    async fn record_access(&self, access: NewDocumentAccess) -> Result<DocumentAccess> {
        let conn = self.pool.get().await?;
        let access = dsl::insert_into(document_access::table)
            .values(access)
            .returning(DocumentAccess::as_returning())
            .get_result(conn.write().await.deref_mut())
            .await?;
        Ok(access)
    }

    #[tracing::instrument(skip(self), err)]
    async fn list_accesses(
        &self,
        document_id: i64,
        limit: u64,
        offset: u64,
    ) -> Result<Page<DocumentAccess>> {
        let conn = self.pool.get().await?;
        let accesses =
            || document_access::table.filter(document_access::document_id.eq(document_id));
        let count: i64 = accesses()
            .count()
            .get_result(conn.write().await.deref_mut())
            .await?;
        if limit == 0 {
            return Ok((Vec::new(), count as u64));
        }
        let page = accesses()
            .select(DocumentAccess::as_select())
            .order((document_access::accessed_at.desc(), document_access::id.desc()))
            .limit(to_i64(limit))
            .offset(to_i64(offset))
            .load(conn.write().await.deref_mut())
            .await?;
        Ok((page, count as u64))
    }
}
