use axum::Extension;
use axum::extract::Json;
use axum::extract::State;
use orefox_models::Document;
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::Result;
use crate::intake::metadata_error;
use crate::models::DocumentFilter;
use crate::models::MetadataDriver;
use crate::models::MetadataStore;
use crate::views::AuthenticationExt;

const RECENT_DOCUMENTS: u64 = 5;

#[derive(Debug, Serialize, ToSchema)]
pub(in crate::views) struct Dashboard {
    projects_count: u64,
    /// Only counts the documents the user is cleared for
    documents_count: u64,
    /// The last committed documents, the most recent first
    recent_documents: Vec<Document>,
}

/// Overview of the knowledge base
#[orefox_derive::route]
#[utoipa::path(
    get, path = "",
    tag = "dashboard",
    responses(
        (status = 200, body = Dashboard, description = "Counts and the latest uploads"),
    )
)]
pub(in crate::views) async fn dashboard(
    State(metadata): State<MetadataStore>,
    Extension(auth): AuthenticationExt,
) -> Result<Json<Dashboard>> {
    let readable = DocumentFilter {
        clearance: Some(auth.reader().clearance),
        ..Default::default()
    };
    let ((_, projects_count), (recent_documents, documents_count)) = tokio::try_join!(
        metadata.list_projects(0, 0),
        metadata.list_documents(&readable, RECENT_DOCUMENTS, 0),
    )
    .map_err(metadata_error)?;
    Ok(Json(Dashboard {
        projects_count,
        documents_count,
        recent_documents,
    }))
}
