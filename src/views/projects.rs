use std::collections::HashMap;

use axum::Extension;
use axum::extract::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use orefox_models::Boundary;
use orefox_models::InvalidField;
use orefox_models::Project;
use orefox_models::ProjectMode;
use orefox_models::project::BOUNDARY_CONSTRAINT;
use orefox_models::project::NewProject;
use orefox_models::project::ProjectPatch;
use serde::Deserialize;
use serde::Serialize;
use serde_with::rust::double_option;
use thiserror::Error;
use tracing::error;
use utoipa::IntoParams;
use utoipa::ToSchema;

use crate::error::Result;
use crate::models;
use crate::models::MetadataDriver;
use crate::models::MetadataStore;
use crate::views::AuthenticationExt;
use crate::views::pagination::PaginationQueryParams;
use crate::views::pagination::PaginationStats;

type ProjectPagination = PaginationQueryParams<1000, 25>;

#[derive(Debug, Error, orefox_derive::ServiceError)]
#[service_error(base_id = "project")]
pub enum ProjectError {
    #[error("project '{project_id}' could not be found")]
    #[service_error(status = 404)]
    NotFound { project_id: i64 },
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },
    #[error("the metadata store could not complete the request")]
    #[service_error(status = 500)]
    Metadata(#[source] models::Error),
}

impl From<InvalidField> for ProjectError {
    fn from(InvalidField { field, reason }: InvalidField) -> Self {
        Self::Validation {
            field: field.to_owned(),
            reason,
        }
    }
}

impl From<models::Error> for ProjectError {
    fn from(error: models::Error) -> Self {
        // PostGIS may reject an area the boundary checks accepted
        if error.is_constraint(BOUNDARY_CONSTRAINT) {
            return Self::Validation {
                field: "boundary".to_owned(),
                reason: "is not a valid area".to_owned(),
            };
        }
        error!(%error, "metadata store request failed");
        Self::Metadata(error)
    }
}

fn boundary(geometry: geojson::Geometry) -> Result<Boundary, InvalidField> {
    Boundary::try_from(geometry).map_err(|error| InvalidField::new("boundary", error.to_string()))
}

/// Creation form for a project
#[derive(Debug, Deserialize, ToSchema)]
pub(in crate::views) struct ProjectCreateForm {
    #[schema(max_length = 128)]
    pub name: String,
    #[schema(max_length = 1024)]
    pub description: Option<String>,
    #[serde(default)]
    pub mode: ProjectMode,
    #[schema(max_length = 64)]
    pub commodity: Option<String>,
    #[schema(value_type = Option<common::geometry::GeoJsonArea>)]
    pub boundary: Option<geojson::Geometry>,
}

impl TryFrom<ProjectCreateForm> for NewProject {
    type Error = InvalidField;

    fn try_from(form: ProjectCreateForm) -> Result<Self, Self::Error> {
        NewProject::new(
            &form.name,
            form.description,
            form.mode,
            form.commodity,
            form.boundary.map(boundary).transpose()?,
        )
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProjectWithDocumentsCount {
    #[serde(flatten)]
    project: Project,
    /// Committed documents linked to the project
    documents_count: u64,
}

async fn with_documents_count(
    metadata: &MetadataStore,
    projects: Vec<Project>,
) -> Result<Vec<ProjectWithDocumentsCount>, ProjectError> {
    let ids: Vec<_> = projects.iter().map(|project| project.id).collect();
    let counts: HashMap<i64, u64> = metadata.count_committed_documents(&ids).await?;
    Ok(projects
        .into_iter()
        .map(|project| ProjectWithDocumentsCount {
            documents_count: counts.get(&project.id).copied().unwrap_or_default(),
            project,
        })
        .collect())
}

async fn single_with_documents_count(
    metadata: &MetadataStore,
    project: Project,
) -> Result<ProjectWithDocumentsCount, ProjectError> {
    let project_id = project.id;
    with_documents_count(metadata, vec![project])
        .await?
        .pop()
        .ok_or(ProjectError::NotFound { project_id })
}

/// Create a new project
#[orefox_derive::route]
#[utoipa::path(
    post, path = "",
    tag = "projects",
    request_body = ProjectCreateForm,
    responses(
        (status = 201, body = ProjectWithDocumentsCount, description = "The created project"),
    )
)]
pub(in crate::views) async fn create(
    State(metadata): State<MetadataStore>,
    Extension(auth): AuthenticationExt,
    Json(form): Json<ProjectCreateForm>,
) -> Result<impl IntoResponse> {
    auth.author()?;
    let new_project = NewProject::try_from(form).map_err(ProjectError::from)?;
    let project = metadata
        .create_project(new_project)
        .await
        .map_err(ProjectError::from)?;
    tracing::info!(project_id = project.id, "project created");
    Ok((
        StatusCode::CREATED,
        Json(ProjectWithDocumentsCount {
            project,
            documents_count: 0,
        }),
    ))
}

#[derive(Serialize, ToSchema)]
pub(in crate::views) struct ProjectWithDocumentsCountList {
    results: Vec<ProjectWithDocumentsCount>,
    #[serde(flatten)]
    stats: PaginationStats,
}

/// Returns a paginated list of projects, the most recent first
#[orefox_derive::route]
#[utoipa::path(
    get, path = "",
    tag = "projects",
    params(ProjectPagination),
    responses(
        (status = 200, body = inline(ProjectWithDocumentsCountList), description = "The list of projects"),
    )
)]
pub(in crate::views) async fn list(
    State(metadata): State<MetadataStore>,
    Query(pagination_params): Query<ProjectPagination>,
) -> Result<Json<ProjectWithDocumentsCountList>> {
    let (projects, total) = metadata
        .list_projects(pagination_params.page_size, pagination_params.offset())
        .await
        .map_err(ProjectError::from)?;
    let stats = pagination_params.stats(projects.len(), total);
    let results = with_documents_count(&metadata, projects).await?;
    Ok(Json(ProjectWithDocumentsCountList { results, stats }))
}

// Documentation struct
#[derive(IntoParams)]
#[allow(unused)]
pub struct ProjectIdParam {
    /// The id of a project
    project_id: i64,
}

/// Retrieve a project
#[orefox_derive::route]
#[utoipa::path(
    get, path = "",
    tag = "projects",
    params(ProjectIdParam),
    responses(
        (status = 200, body = ProjectWithDocumentsCount, description = "The requested project"),
    )
)]
pub(in crate::views) async fn get(
    State(metadata): State<MetadataStore>,
    Path(project_id): Path<i64>,
) -> Result<Json<ProjectWithDocumentsCount>> {
    let project = metadata
        .get_project(project_id)
        .await
        .map_err(ProjectError::from)?
        .ok_or(ProjectError::NotFound { project_id })?;
    Ok(Json(single_with_documents_count(&metadata, project).await?))
}

/// Patch form for a project
///
/// Absent fields are kept, `null` clears the nullable ones.
#[derive(Debug, Deserialize, ToSchema)]
pub(in crate::views) struct ProjectPatchForm {
    #[schema(max_length = 128)]
    pub name: Option<String>,
    #[schema(max_length = 1024)]
    #[serde(default, with = "double_option")]
    pub description: Option<Option<String>>,
    pub mode: Option<ProjectMode>,
    #[schema(max_length = 64)]
    #[serde(default, with = "double_option")]
    pub commodity: Option<Option<String>>,
    #[schema(value_type = Option<common::geometry::GeoJsonArea>)]
    #[serde(default, with = "double_option")]
    pub boundary: Option<Option<geojson::Geometry>>,
}

impl TryFrom<ProjectPatchForm> for ProjectPatch {
    type Error = InvalidField;

    fn try_from(form: ProjectPatchForm) -> Result<Self, Self::Error> {
        let boundary = match form.boundary {
            Some(Some(geometry)) => Some(Some(boundary(geometry)?)),
            Some(None) => Some(None),
            None => None,
        };
        ProjectPatch {
            name: form.name,
            description: form.description,
            mode: form.mode,
            commodity: form.commodity,
            boundary,
        }
        .validated()
    }
}

/// Update a project
#[orefox_derive::route]
#[utoipa::path(
    patch, path = "",
    tag = "projects",
    params(ProjectIdParam),
    request_body(
        content = ProjectPatchForm,
        description = "The fields to update"
    ),
    responses(
        (status = 200, body = ProjectWithDocumentsCount, description = "The updated project"),
    )
)]
pub(in crate::views) async fn patch(
    State(metadata): State<MetadataStore>,
    Extension(auth): AuthenticationExt,
    Path(project_id): Path<i64>,
    Json(form): Json<ProjectPatchForm>,
) -> Result<Json<ProjectWithDocumentsCount>> {
    auth.author()?;
    let patch = ProjectPatch::try_from(form).map_err(ProjectError::from)?;
    let project = metadata
        .update_project(project_id, patch)
        .await
        .map_err(ProjectError::from)?
        .ok_or(ProjectError::NotFound { project_id })?;
    Ok(Json(single_with_documents_count(&metadata, project).await?))
}

/// Delete a project, its documents are kept and detached from it
#[orefox_derive::route]
#[utoipa::path(
    delete, path = "",
    tag = "projects",
    params(ProjectIdParam),
    responses(
        (status = 204, description = "The project was deleted successfully"),
    )
)]
pub(in crate::views) async fn delete(
    Path(project_id): Path<i64>,
    Extension(auth): AuthenticationExt,
    State(metadata): State<MetadataStore>,
) -> Result<impl IntoResponse> {
    auth.author()?;
    let deleted = metadata
        .delete_project(project_id)
        .await
        .map_err(ProjectError::from)?;
    if !deleted {
        return Err(ProjectError::NotFound { project_id }.into());
    }
    tracing::info!(project_id, "project deleted");
    Ok(StatusCode::NO_CONTENT)
}
