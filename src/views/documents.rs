use std::str::FromStr;

use axum::Extension;
use axum::extract::Json;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::extract::multipart::Field;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use orefox_models::Confidentiality;
use orefox_models::Document;
use orefox_models::DocumentAccess;
use orefox_models::document::DocumentPatch;
use serde::Deserialize;
use serde::Serialize;
use serde_with::rust::double_option;
use thiserror::Error;
use utoipa::IntoParams;
use utoipa::ToSchema;

use crate::error::Result;
use crate::intake::DocumentIntake;
use crate::intake::IntakeError;
use crate::intake::Upload;
use crate::intake::metadata_error;
use crate::models::DocumentFilter;
use crate::models::MetadataDriver;
use crate::models::MetadataStore;
use crate::views::AuthenticationExt;
use crate::views::pagination::PaginationQueryParams;
use crate::views::pagination::PaginationStats;

type DocumentPagination = PaginationQueryParams<100, 24>;
type AccessPagination = PaginationQueryParams<1000, 100>;

#[derive(Debug, Error, orefox_derive::ServiceError)]
#[service_error(base_id = "upload_form")]
pub enum UploadFormError {
    #[error("invalid multipart content: {0}")]
    Multipart(MultipartError),
    #[error("the request body exceeds the size limit")]
    #[service_error(status = 413)]
    TooLarge,
    #[error("missing multipart field name, cannot process request")]
    MissingFieldName,
    #[error("unrecognized multipart field '{field_name}'")]
    UnrecognizedField { field_name: String },
}

impl From<MultipartError> for UploadFormError {
    fn from(error: MultipartError) -> Self {
        if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::TooLarge
        } else {
            Self::Multipart(error)
        }
    }
}

// Documentation struct
#[derive(IntoParams)]
#[allow(unused)]
pub struct DocumentIdParam {
    /// The id of a document
    document_id: i64,
}

/// Multipart form of an upload
#[derive(ToSchema)]
#[allow(unused)] // Schema only
struct DocumentUploadForm {
    /// The content, its part file name and content type are kept
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    #[schema(max_length = 300)]
    title: String,
    #[schema(minimum = 1800, maximum = 2200)]
    year: i32,
    #[schema(max_length = 64)]
    doc_type: Option<String>,
    confidentiality: Option<Confidentiality>,
    project_id: Option<i64>,
}

fn invalid(field: &str, reason: impl ToString) -> IntakeError {
    IntakeError::Validation {
        field: field.to_owned(),
        reason: reason.to_string(),
    }
}

fn parse_field<T>(field: &str, value: &str) -> Result<T, IntakeError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|error| invalid(field, error))
}

async fn text(field: Field<'_>) -> Result<String, UploadFormError> {
    Ok(field.text().await?)
}

async fn parse_upload_form(mut form: Multipart) -> Result<Upload> {
    let mut upload = Upload::default();
    let mut year = None;
    while let Some(field) = form.next_field().await.map_err(UploadFormError::from)? {
        let Some(field_name) = field.name().map(str::to_owned) else {
            return Err(UploadFormError::MissingFieldName.into());
        };
        match field_name.as_str() {
            "file" => {
                upload.filename = field.file_name().unwrap_or_default().to_owned();
                upload.content_type = field.content_type().map(str::to_owned);
                upload.data = field.bytes().await.map_err(UploadFormError::from)?;
            }
            "title" => upload.title = text(field).await?,
            "year" => year = Some(parse_field("year", &text(field).await?)?),
            "doc_type" => upload.doc_type = text(field).await?,
            "confidentiality" => {
                upload.confidentiality = parse_field("confidentiality", &text(field).await?)?;
            }
            "project_id" => {
                let value = text(field).await?;
                // browsers send an empty value for an unselected project
                if !value.trim().is_empty() {
                    upload.project_id = Some(parse_field("project_id", &value)?);
                }
            }
            _ => return Err(UploadFormError::UnrecognizedField { field_name }.into()),
        }
    }
    upload.year = year.ok_or_else(|| invalid("year", "is required"))?;
    Ok(upload)
}

/// Upload a document
#[orefox_derive::route]
#[utoipa::path(
    post, path = "",
    tag = "documents",
    request_body(content = DocumentUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, body = Document, description = "The stored document"),
        (status = 409, description = "The same content was already uploaded"),
    )
)]
pub(in crate::views) async fn upload(
    State(intake): State<DocumentIntake<MetadataStore>>,
    Extension(auth): AuthenticationExt,
    form: Multipart,
) -> Result<impl IntoResponse> {
    let created_by = auth.author()?;
    let upload = parse_upload_form(form).await?;
    let document = intake.submit(Upload { created_by, ..upload }).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(in crate::views) struct DocumentFilterParams {
    /// Case-insensitive search in the title, the type and the project name
    q: Option<String>,
    project_id: Option<i64>,
    doc_type: Option<String>,
}

impl From<DocumentFilterParams> for DocumentFilter {
    fn from(params: DocumentFilterParams) -> Self {
        let non_blank = |value: Option<String>| {
            value
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        Self {
            q: non_blank(params.q),
            project_id: params.project_id,
            doc_type: non_blank(params.doc_type),
            clearance: None,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(in crate::views) struct DocumentList {
    results: Vec<Document>,
    #[serde(flatten)]
    stats: PaginationStats,
}

/// Returns a paginated list of the documents the user is cleared for, the most recent first
#[orefox_derive::route]
#[utoipa::path(
    get, path = "",
    tag = "documents",
    params(DocumentPagination, DocumentFilterParams),
    responses(
        (status = 200, body = inline(DocumentList), description = "The matching documents"),
    )
)]
pub(in crate::views) async fn list(
    State(metadata): State<MetadataStore>,
    Extension(auth): AuthenticationExt,
    Query(pagination_params): Query<DocumentPagination>,
    Query(filter_params): Query<DocumentFilterParams>,
) -> Result<Json<DocumentList>> {
    let filter = DocumentFilter {
        clearance: Some(auth.reader().clearance),
        ..filter_params.into()
    };
    let (results, total) = metadata
        .list_documents(&filter, pagination_params.page_size, pagination_params.offset())
        .await
        .map_err(metadata_error)?;
    let stats = pagination_params.stats(results.len(), total);
    Ok(Json(DocumentList { results, stats }))
}

/// Retrieve the metadata of a document
#[orefox_derive::route]
#[utoipa::path(
    get, path = "",
    tag = "documents",
    params(DocumentIdParam),
    responses(
        (status = 200, body = Document, description = "The requested document"),
        (status = 403, description = "The document requires a higher clearance"),
    )
)]
pub(in crate::views) async fn get(
    State(intake): State<DocumentIntake<MetadataStore>>,
    Extension(auth): AuthenticationExt,
    Path(document_id): Path<i64>,
) -> Result<Json<Document>> {
    Ok(Json(intake.view(document_id, &auth.reader()).await?))
}

/// Patch form for a document, the content cannot be replaced
#[derive(Debug, Deserialize, ToSchema)]
pub(in crate::views) struct DocumentPatchForm {
    #[schema(max_length = 300)]
    pub title: Option<String>,
    #[schema(minimum = 1800, maximum = 2200)]
    pub year: Option<i32>,
    #[schema(max_length = 64)]
    pub doc_type: Option<String>,
    pub confidentiality: Option<Confidentiality>,
    /// `null` detaches the document from its project
    #[serde(default, with = "double_option")]
    pub project_id: Option<Option<i64>>,
}

impl From<DocumentPatchForm> for DocumentPatch {
    fn from(form: DocumentPatchForm) -> Self {
        Self {
            title: form.title,
            year: form.year,
            doc_type: form.doc_type,
            confidentiality: form.confidentiality,
            project_id: form.project_id,
        }
    }
}

/// Update the metadata of a document
#[orefox_derive::route]
#[utoipa::path(
    patch, path = "",
    tag = "documents",
    params(DocumentIdParam),
    request_body(
        content = DocumentPatchForm,
        description = "The fields to update"
    ),
    responses(
        (status = 200, body = Document, description = "The updated document"),
    )
)]
pub(in crate::views) async fn patch(
    State(intake): State<DocumentIntake<MetadataStore>>,
    Extension(auth): AuthenticationExt,
    Path(document_id): Path<i64>,
    Json(form): Json<DocumentPatchForm>,
) -> Result<Json<Document>> {
    auth.author()?;
    let document = intake
        .update(document_id, form.into(), &auth.reader())
        .await?;
    Ok(Json(document))
}

/// Delete a document and its content
#[orefox_derive::route]
#[utoipa::path(
    delete, path = "",
    tag = "documents",
    params(DocumentIdParam),
    responses(
        (status = 204, description = "The document was deleted successfully"),
    )
)]
pub(in crate::views) async fn delete(
    State(intake): State<DocumentIntake<MetadataStore>>,
    Extension(auth): AuthenticationExt,
    Path(document_id): Path<i64>,
) -> Result<impl IntoResponse> {
    auth.author()?;
    intake.delete(document_id, &auth.reader()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `Content-Disposition` of a download, non printable ASCII is replaced
fn attachment(filename: &str) -> String {
    let filename: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{filename}\"")
}

/// Download the content of a document
#[orefox_derive::route]
#[utoipa::path(
    get, path = "",
    tag = "documents",
    params(DocumentIdParam),
    responses(
        (status = 200, description = "The content with the content type it was uploaded with"),
        (status = 403, description = "The document requires a higher clearance"),
        (status = 502, description = "The object store could not provide the content"),
    )
)]
pub(in crate::views) async fn download(
    State(intake): State<DocumentIntake<MetadataStore>>,
    Extension(auth): AuthenticationExt,
    Path(document_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let (document, data) = intake.download(document_id, &auth.reader()).await?;
    let headers = [
        (header::CONTENT_TYPE, document.content_type),
        (header::CONTENT_DISPOSITION, attachment(&document.filename)),
    ];
    Ok((headers, data))
}

#[derive(Serialize, ToSchema)]
pub(in crate::views) struct DocumentAccessList {
    results: Vec<DocumentAccess>,
    #[serde(flatten)]
    stats: PaginationStats,
}

/// Who viewed or downloaded a document, the most recent first
#[orefox_derive::route]
#[utoipa::path(
    get, path = "",
    tag = "documents",
    params(DocumentIdParam, AccessPagination),
    responses(
        (status = 200, body = inline(DocumentAccessList), description = "The recorded accesses"),
        (status = 401, description = "Only authenticated users may read the trail"),
    )
)]
pub(in crate::views) async fn accesses(
    State(intake): State<DocumentIntake<MetadataStore>>,
    Extension(auth): AuthenticationExt,
    Path(document_id): Path<i64>,
    Query(pagination_params): Query<AccessPagination>,
) -> Result<Json<DocumentAccessList>> {
    auth.author()?;
    let (results, total) = intake
        .accesses(
            document_id,
            &auth.reader(),
            pagination_params.page_size,
            pagination_params.offset(),
        )
        .await?;
    let stats = pagination_params.stats(results.len(), total);
    Ok(Json(DocumentAccessList { results, stats }))
}

#[cfg(test)]
mod tests {
    use axum_test::multipart::MultipartForm;
    use axum_test::multipart::Part;
    use orefox_models::ProjectMode;
    use orefox_models::project::NewProject;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::Value;
    use serde_json::json;

    use super::*;
    use crate::error::InternalError;
    use crate::intake::OBJECT_PREFIX;
    use crate::models::memory_driver::Operation;
    use crate::views::test_app::TestApp;
    use crate::views::test_app::TestAppBuilder;
    use crate::views::test_app::TestRequestExt;
    use crate::views::test_app::test_app;

    const PDF: &[u8] = b"%PDF-1.4 drilling summary";

    #[derive(Debug, Deserialize)]
    struct DocumentResponse {
        id: i64,
        title: String,
        year: i32,
        doc_type: String,
        confidentiality: String,
        object_key: String,
        filename: String,
        content_type: String,
        size_bytes: i64,
        project_id: Option<i64>,
        created_by: Option<String>,
        status: String,
    }

    #[derive(Debug, Deserialize)]
    struct DocumentListResponse {
        results: Vec<DocumentResponse>,
        #[serde(flatten)]
        stats: PaginationStats,
    }

    fn report_form(data: &'static [u8], title: &str) -> MultipartForm {
        MultipartForm::new()
            .add_part(
                "file",
                Part::bytes(data)
                    .file_name("report.pdf")
                    .mime_type("application/pdf"),
            )
            .add_text("title", title)
            .add_text("year", "2024")
            .add_text("doc_type", "Exploration Report")
    }

    async fn create_project(app: &TestApp, name: &str) -> i64 {
        let project = NewProject::new(name, None, ProjectMode::Exploration, None, None).unwrap();
        app.metadata().create_project(project).await.unwrap().id
    }

    async fn upload(app: &TestApp, form: MultipartForm) -> DocumentResponse {
        let request = app.post("/documents").multipart(form);
        app.fetch(request)
            .await
            .assert_status(StatusCode::CREATED)
            .json_into()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn upload_stores_a_committed_document() {
        let app = test_app!().build();
        let project_id = create_project(&app, &app.name("bald_hill")).await;

        let form = report_form(PDF, "Drilling Summary 2024")
            .add_text("confidentiality", "confidential")
            .add_text("project_id", project_id);
        let request = app
            .post("/documents")
            .multipart(form)
            .by_user("jdoe", "Jane Doe");
        let document: DocumentResponse = app
            .fetch(request)
            .await
            .assert_status(StatusCode::CREATED)
            .json_into();

        assert_eq!(document.title, "Drilling Summary 2024");
        assert_eq!(document.year, 2024);
        assert_eq!(document.doc_type, "Exploration Report");
        assert_eq!(document.confidentiality, "confidential");
        assert_eq!(document.filename, "report.pdf");
        assert_eq!(document.content_type, "application/pdf");
        assert_eq!(document.size_bytes, PDF.len() as i64);
        assert_eq!(document.project_id, Some(project_id));
        assert_eq!(document.created_by.as_deref(), Some("jdoe"));
        assert_eq!(document.status, "committed");
        assert!(
            document
                .object_key
                .starts_with(&format!("{OBJECT_PREFIX}{project_id}/"))
        );
        let stored = app.storage().get(&document.object_key).await.unwrap();
        assert_eq!(stored.data.as_ref(), PDF);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn upload_requires_an_identity_when_authorization_is_enabled() {
        let app = test_app!().enable_authorization(true).build();

        let request = app
            .post("/documents")
            .multipart(report_form(PDF, "Drilling Summary 2024"));
        let error: InternalError = app
            .fetch(request)
            .await
            .assert_status(StatusCode::UNAUTHORIZED)
            .json_into();

        assert_eq!(error.get_type(), "orefox:authz:Unauthorized");
        assert!(app.metadata().all_documents().is_empty());
    }

    #[rstest]
    #[case::missing_year(MultipartForm::new().add_text("title", "Site plan"), "year")]
    #[case::unparsable_year(report_form(PDF, "Site plan").add_text("year", "last year"), "year")]
    #[case::blank_title(report_form(PDF, "   "), "title")]
    #[case::empty_file(report_form(b"", "Site plan"), "file")]
    #[case::unknown_confidentiality(
        report_form(PDF, "Site plan").add_text("confidentiality", "secret"),
        "confidentiality"
    )]
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn invalid_uploads_are_rejected(#[case] form: MultipartForm, #[case] field: &str) {
        let app = TestAppBuilder::default_app();

        let request = app.post("/documents").multipart(form);
        let error: InternalError = app
            .fetch(request)
            .await
            .assert_status(StatusCode::BAD_REQUEST)
            .json_into();

        assert_eq!(error.get_type(), "orefox:intake:Validation");
        assert_eq!(error.context["field"], json!(field));
        assert!(app.storage().list(OBJECT_PREFIX).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn unknown_form_fields_are_rejected() {
        let app = TestAppBuilder::default_app();

        let form = report_form(PDF, "Site plan").add_text("author", "jdoe");
        let request = app.post("/documents").multipart(form);
        let error: InternalError = app
            .fetch(request)
            .await
            .assert_status(StatusCode::BAD_REQUEST)
            .json_into();

        assert_eq!(error.get_type(), "orefox:upload_form:UnrecognizedField");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn unknown_project_is_not_found() {
        let app = TestAppBuilder::default_app();

        let form = report_form(PDF, "Site plan").add_text("project_id", "404");
        let request = app.post("/documents").multipart(form);
        let error: InternalError = app
            .fetch(request)
            .await
            .assert_status(StatusCode::NOT_FOUND)
            .json_into();

        assert_eq!(error.get_type(), "orefox:intake:ProjectNotFound");
        assert!(app.storage().list(OBJECT_PREFIX).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn duplicate_content_is_a_conflict() {
        let app = TestAppBuilder::default_app();
        let first = upload(&app, report_form(PDF, "Drilling Summary 2024")).await;

        let request = app
            .post("/documents")
            .multipart(report_form(PDF, "Same bytes, other title"));
        let error: InternalError = app
            .fetch(request)
            .await
            .assert_status(StatusCode::CONFLICT)
            .json_into();

        assert_eq!(error.get_type(), "orefox:intake:Duplicate");
        assert_eq!(error.context["existing_id"], json!(first.id));
        assert_eq!(app.storage().list(OBJECT_PREFIX).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn storage_failure_is_a_bad_gateway() {
        let app = TestAppBuilder::default_app();
        app.storage().inject_fault(storage::Operation::Put).await;

        let request = app
            .post("/documents")
            .multipart(report_form(PDF, "Drilling Summary 2024"));
        let error: InternalError = app
            .fetch(request)
            .await
            .assert_status(StatusCode::BAD_GATEWAY)
            .json_into();

        assert_eq!(error.get_type(), "orefox:intake:Storage");
        assert!(app.metadata().all_documents().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn get_hides_failed_uploads() {
        let app = TestAppBuilder::default_app();
        app.storage().inject_fault(storage::Operation::Put).await;
        app.metadata().inject_fault(Operation::DeleteDocument);
        let request = app
            .post("/documents")
            .multipart(report_form(PDF, "Drilling Summary 2024"));
        app.fetch(request)
            .await
            .assert_status(StatusCode::BAD_GATEWAY);
        let failed = app.metadata().all_documents();
        assert_eq!(failed.len(), 1);

        let request = app.get(&format!("/documents/{}", failed[0].id));
        app.fetch(request)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn get_returns_the_document() {
        let app = TestAppBuilder::default_app();
        let document = upload(&app, report_form(PDF, "Site plan")).await;

        let request = app.get(&format!("/documents/{}", document.id));
        let fetched: DocumentResponse = app
            .fetch(request)
            .await
            .assert_status(StatusCode::OK)
            .json_into();
        assert_eq!(fetched.title, "Site plan");
        assert_eq!(fetched.object_key, document.object_key);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn list_filters_and_paginates() {
        let app = test_app!().build();
        let project_id = create_project(&app, "Lithium Ridge").await;
        upload(&app, report_form(b"%PDF-1.4 one", "Drilling Summary 2023")).await;
        upload(
            &app,
            report_form(b"%PDF-1.4 two", "Geophysics survey")
                .add_text("project_id", project_id),
        )
        .await;
        let latest = upload(&app, report_form(b"%PDF-1.4 three", "Drilling Summary 2024")).await;

        let request = app.get("/documents?page_size=2");
        let page: DocumentListResponse = app.fetch(request).await.json_into();
        assert_eq!(page.stats.count, 3);
        assert_eq!(page.stats.next, Some(2));
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].id, latest.id);

        let request = app.get("/documents?q=drilling");
        let page: DocumentListResponse = app.fetch(request).await.json_into();
        assert_eq!(page.stats.count, 2);

        let request = app.get("/documents?q=RIDGE");
        let page: DocumentListResponse = app.fetch(request).await.json_into();
        assert_eq!(page.stats.count, 1);
        assert_eq!(page.results[0].title, "Geophysics survey");

        let request = app.get(&format!("/documents?project_id={project_id}&q="));
        let page: DocumentListResponse = app.fetch(request).await.json_into();
        assert_eq!(page.stats.count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn list_rejects_oversized_pages() {
        let app = TestAppBuilder::default_app();
        let request = app.get("/documents?page_size=101");
        app.fetch(request)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn list_rejects_pages_past_the_largest_offset() {
        let app = TestAppBuilder::default_app();
        let request = app.get("/documents?page=18446744073709551615&page_size=100");
        app.fetch(request)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn patch_edits_metadata() {
        let app = TestAppBuilder::default_app();
        let project_id = create_project(&app, "Bald Hill").await;
        let document = upload(
            &app,
            report_form(PDF, "Drilling Summary 2024").add_text("project_id", project_id),
        )
        .await;

        let request = app
            .patch(&format!("/documents/{}", document.id))
            .json(&json!({ "title": "Drilling Summary", "year": 2023, "project_id": null }));
        let patched: DocumentResponse = app
            .fetch(request)
            .await
            .assert_status(StatusCode::OK)
            .json_into();

        assert_eq!(patched.title, "Drilling Summary");
        assert_eq!(patched.year, 2023);
        assert_eq!(patched.project_id, None);
        assert_eq!(patched.object_key, document.object_key);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn patch_keeps_the_project_when_absent() {
        let app = TestAppBuilder::default_app();
        let project_id = create_project(&app, "Bald Hill").await;
        let document = upload(
            &app,
            report_form(PDF, "Drilling Summary 2024").add_text("project_id", project_id),
        )
        .await;

        let request = app
            .patch(&format!("/documents/{}", document.id))
            .json(&json!({ "doc_type": "Map" }));
        let patched: DocumentResponse = app.fetch(request).await.json_into();

        assert_eq!(patched.doc_type, "Map");
        assert_eq!(patched.project_id, Some(project_id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn patch_rejects_an_unknown_project() {
        let app = TestAppBuilder::default_app();
        let document = upload(&app, report_form(PDF, "Drilling Summary 2024")).await;

        let request = app
            .patch(&format!("/documents/{}", document.id))
            .json(&json!({ "project_id": 404 }));
        let error: InternalError = app
            .fetch(request)
            .await
            .assert_status(StatusCode::NOT_FOUND)
            .json_into();
        assert_eq!(error.get_type(), "orefox:intake:ProjectNotFound");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn delete_removes_the_document() {
        let app = TestAppBuilder::default_app();
        let document = upload(&app, report_form(PDF, "Drilling Summary 2024")).await;

        let request = app.delete(&format!("/documents/{}", document.id));
        app.fetch(request)
            .await
            .assert_status(StatusCode::NO_CONTENT);

        assert!(app.metadata().all_documents().is_empty());
        assert!(!app.storage().exists(&document.object_key).await.unwrap());
        let request = app.delete(&format!("/documents/{}", document.id));
        app.fetch(request)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn download_returns_the_content() {
        let app = TestAppBuilder::default_app();
        let form = MultipartForm::new()
            .add_part(
                "file",
                Part::bytes(PDF)
                    .file_name("Rapport \"final\" été.pdf")
                    .mime_type("application/pdf"),
            )
            .add_text("title", "Rapport final")
            .add_text("year", "2021");
        let document = upload(&app, form).await;

        let request = app.get(&format!("/documents/{}/file", document.id));
        let response = app.fetch(request).await.assert_status(StatusCode::OK);

        assert_eq!(response.header("content-type"), "application/pdf");
        assert_eq!(
            response.header("content-disposition"),
            "attachment; filename=\"Rapport__final___t_.pdf\""
        );
        assert_eq!(response.bytes(), PDF);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn download_of_a_lost_object_is_a_bad_gateway() {
        let app = TestAppBuilder::default_app();
        let document = upload(&app, report_form(PDF, "Drilling Summary 2024")).await;
        app.storage().delete(&document.object_key).await.unwrap();

        let request = app.get(&format!("/documents/{}/file", document.id));
        let error: Value = app
            .fetch(request)
            .await
            .assert_status(StatusCode::BAD_GATEWAY)
            .json_into();
        assert_eq!(error["type"], json!("orefox:intake:Storage"));
    }

    #[rstest]
    #[case("report.pdf", "attachment; filename=\"report.pdf\"")]
    #[case("a\"b\\c.txt", "attachment; filename=\"a_b_c.txt\"")]
    #[case("carte_géologique.tif", "attachment; filename=\"carte_g_ologique.tif\"")]
    fn attachments_are_ascii(#[case] filename: &str, #[case] expected: &str) {
        assert_eq!(attachment(filename), expected);
    }

    #[derive(Debug, Deserialize)]
    struct AccessResponse {
        document_id: i64,
        action: String,
        identity: Option<String>,
        name: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    struct AccessListResponse {
        results: Vec<AccessResponse>,
        #[serde(flatten)]
        stats: PaginationStats,
    }

    async fn upload_with_level(app: &TestApp, data: &'static [u8], level: &str) -> DocumentResponse {
        let form = report_form(data, &format!("{level} report")).add_text("confidentiality", level);
        let request = app
            .post("/documents")
            .multipart(form)
            .by_user("admin", "Site Admin")
            .with_clearance("confidential");
        app.fetch(request)
            .await
            .assert_status(StatusCode::CREATED)
            .json_into()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn list_only_shows_the_levels_the_user_is_cleared_for() {
        let app = test_app!().enable_authorization(true).build();
        upload_with_level(&app, b"%PDF-1.4 public", "public").await;
        upload_with_level(&app, b"%PDF-1.4 internal", "internal").await;
        upload_with_level(&app, b"%PDF-1.4 confidential", "confidential").await;

        let request = app.get("/documents");
        let page: DocumentListResponse = app.fetch(request).await.json_into();
        assert_eq!(page.stats.count, 1);
        assert_eq!(page.results[0].confidentiality, "public");

        let request = app.get("/documents").by_user("jdoe", "Jane Doe");
        let page: DocumentListResponse = app.fetch(request).await.json_into();
        assert_eq!(page.stats.count, 2);
        assert!(page.results.iter().all(|document| document.confidentiality != "confidential"));

        let request = app
            .get("/documents")
            .by_user("jdoe", "Jane Doe")
            .with_clearance("confidential");
        let page: DocumentListResponse = app.fetch(request).await.json_into();
        assert_eq!(page.stats.count, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn reading_above_the_clearance_is_forbidden() {
        let app = test_app!().enable_authorization(true).build();
        let document = upload_with_level(&app, PDF, "confidential").await;

        for path in [
            format!("/documents/{}", document.id),
            format!("/documents/{}/file", document.id),
        ] {
            let request = app.get(&path).by_user("jdoe", "Jane Doe");
            let error: InternalError = app
                .fetch(request)
                .await
                .assert_status(StatusCode::FORBIDDEN)
                .json_into();
            assert_eq!(error.get_type(), "orefox:intake:InsufficientClearance");
        }

        let request = app
            .delete(&format!("/documents/{}", document.id))
            .by_user("jdoe", "Jane Doe")
            .with_clearance("internal");
        app.fetch(request)
            .await
            .assert_status(StatusCode::FORBIDDEN);
        assert_eq!(app.metadata().all_documents().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn an_invalid_clearance_is_a_bad_request() {
        let app = test_app!().enable_authorization(true).build();
        let request = app
            .get("/documents")
            .by_user("jdoe", "Jane Doe")
            .with_clearance("jorc_approved");
        let error: InternalError = app
            .fetch(request)
            .await
            .assert_status(StatusCode::BAD_REQUEST)
            .json_into();
        assert_eq!(error.get_type(), "orefox:authz:InvalidHeader");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn views_and_downloads_are_recorded() {
        let app = test_app!().enable_authorization(true).build();
        let document = upload_with_level(&app, PDF, "internal").await;

        let request = app
            .get(&format!("/documents/{}", document.id))
            .by_user("jdoe", "Jane Doe");
        app.fetch(request).await.assert_status(StatusCode::OK);
        let request = app
            .get(&format!("/documents/{}/file", document.id))
            .by_user("asmith", "Alex Smith");
        app.fetch(request).await.assert_status(StatusCode::OK);

        let request = app
            .get(&format!("/documents/{}/accesses", document.id))
            .by_user("admin", "Site Admin");
        let trail: AccessListResponse = app
            .fetch(request)
            .await
            .assert_status(StatusCode::OK)
            .json_into();

        assert_eq!(trail.stats.count, 2);
        let entries: Vec<_> = trail
            .results
            .iter()
            .map(|access| {
                (
                    access.document_id,
                    access.action.as_str(),
                    access.identity.as_deref(),
                    access.name.as_deref(),
                )
            })
            .collect();
        assert_eq!(
            entries,
            [
                (document.id, "download", Some("asmith"), Some("Alex Smith")),
                (document.id, "view", Some("jdoe"), Some("Jane Doe")),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn the_access_trail_requires_an_identity() {
        let app = test_app!().enable_authorization(true).build();
        let document = upload_with_level(&app, PDF, "public").await;

        let request = app.get(&format!("/documents/{}/accesses", document.id));
        app.fetch(request)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn a_read_that_cannot_be_recorded_fails() {
        let app = TestAppBuilder::default_app();
        let document = upload(&app, report_form(PDF, "Drilling Summary 2024")).await;
        app.metadata().inject_fault(Operation::RecordAccess);

        let request = app.get(&format!("/documents/{}/file", document.id));
        app.fetch(request)
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    }
}
