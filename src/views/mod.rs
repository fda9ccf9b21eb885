mod dashboard;
mod documents;
mod openapi;
pub mod pagination;
mod projects;
mod router;

#[cfg(test)]
mod test_app;

use std::sync::Arc;

use axum::Router;
use axum::ServiceExt;
use axum::extract::DefaultBodyLimit;
use axum::extract::FromRef;
use axum::extract::Json;
use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use axum_tracing_opentelemetry::middleware::OtelAxumLayer;
use chrono::Duration;
use common::Version;
use orefox_models::Confidentiality;
use database::DbConnectionPool;
use futures::TryFutureExt;
use thiserror::Error;
use tokio::time::timeout;
use tower::Layer as _;
use tower_http::cors::AllowOrigin;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::normalize_path::NormalizePath;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use tracing::info;
use tracing::warn;
use url::Url;

pub use openapi::OpenApiRoot;

use crate::error::Result;
use crate::intake::DocumentIntake;
use crate::intake::Reader;
use crate::models;
use crate::models::MetadataDriver;
use crate::models::MetadataStore;
use crate::models::PgMetadataDriver;

fn service_router() -> router::DocumentedRouter {
    use router::delete;
    use router::get;
    use router::patch;
    use router::post;

    // Routes first then nests, paths ordered by number of segments then alphabetically
    router::DocumentedRouter::root(|path| {
        path.route("/dashboard", get!(dashboard::dashboard))
            .route("/health", get!(health))
            .route("/version", get!(version))
            .nests("/documents", |path| {
                path.route("/", get!(documents::list))
                    .route("/", post!(documents::upload))
                    .nests("/{document_id}", |path| {
                        path.route("/", get!(documents::get))
                            .route("/", patch!(documents::patch))
                            .route("/", delete!(documents::delete))
                            .route("/accesses", get!(documents::accesses))
                            .route("/file", get!(documents::download))
                    })
            })
            .nests("/projects", |path| {
                path.route("/", get!(projects::list))
                    .route("/", post!(projects::create))
                    .nests("/{project_id}", |path| {
                        path.route("/", get!(projects::get))
                            .route("/", patch!(projects::patch))
                            .route("/", delete!(projects::delete))
                    })
            })
    })
}

/// The issuer of a request, as told by the authenticating reverse proxy
#[derive(Debug, Clone, PartialEq)]
pub enum Authentication {
    /// No `x-remote-user-identity` header was provided
    Unauthenticated,
    Authenticated {
        identity: String,
        name: Option<String>,
        clearance: Confidentiality,
    },
    /// Authorization is disabled, every request is accepted
    SkipAuthorization {
        identity: Option<String>,
        name: Option<String>,
        clearance: Confidentiality,
    },
}

impl Authentication {
    /// The identity recorded as the author of a change
    ///
    /// Fails for unauthenticated requests, write operations must call it.
    fn author(&self) -> Result<Option<String>, AuthorizationError> {
        match self {
            Authentication::Unauthenticated => Err(AuthorizationError::Unauthorized),
            Authentication::Authenticated { identity, .. } => Ok(Some(identity.clone())),
            Authentication::SkipAuthorization { identity, .. } => Ok(identity.clone()),
        }
    }

    /// The issuer as a reader of documents, anonymous readers only see public ones
    fn reader(&self) -> Reader {
        match self {
            Authentication::Unauthenticated => Reader {
                identity: None,
                name: None,
                clearance: Confidentiality::Public,
            },
            Authentication::Authenticated {
                identity,
                name,
                clearance,
            } => Reader {
                identity: Some(identity.clone()),
                name: name.clone(),
                clearance: *clearance,
            },
            Authentication::SkipAuthorization {
                identity,
                name,
                clearance,
            } => Reader {
                identity: identity.clone(),
                name: name.clone(),
                clearance: *clearance,
            },
        }
    }
}

pub type AuthenticationExt = axum::extract::Extension<Authentication>;

const IDENTITY_HEADER: &str = "x-remote-user-identity";
const NAME_HEADER: &str = "x-remote-user-name";
const CLEARANCE_HEADER: &str = "x-remote-user-clearance";

fn header_value(headers: &HeaderMap, header: &'static str) -> Result<Option<String>, AuthorizationError> {
    headers
        .get(header)
        .map(|value| {
            value
                .to_str()
                .map(|value| value.trim().to_owned())
                .map_err(|_| AuthorizationError::InvalidHeader {
                    header: header.to_owned(),
                })
        })
        .transpose()
        .map(|value| value.filter(|value| !value.is_empty()))
}

/// Falls back to `default` when the proxy sent no clearance
fn clearance(
    headers: &HeaderMap,
    default: Confidentiality,
) -> Result<Confidentiality, AuthorizationError> {
    let Some(value) = header_value(headers, CLEARANCE_HEADER)? else {
        return Ok(default);
    };
    value
        .to_lowercase()
        .parse()
        .map_err(|_| AuthorizationError::InvalidHeader {
            header: CLEARANCE_HEADER.to_owned(),
        })
}

fn authenticate(
    enable_authorization: bool,
    headers: &HeaderMap,
) -> Result<Authentication, AuthorizationError> {
    let identity = header_value(headers, IDENTITY_HEADER)?;
    let name = header_value(headers, NAME_HEADER)?;
    Ok(match (identity, name) {
        (identity, name) if !enable_authorization => {
            let clearance = clearance(headers, Confidentiality::Confidential)?;
            tracing::debug!(?identity, ?name, %clearance, "authorization disabled, request accepted");
            Authentication::SkipAuthorization {
                identity,
                name,
                clearance,
            }
        }
        (None, _) => Authentication::Unauthenticated,
        (Some(identity), name) => Authentication::Authenticated {
            identity,
            name,
            clearance: clearance(headers, Confidentiality::Internal)?,
        },
    })
}

async fn authentication_middleware(
    State(AppState { config, .. }): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let authentication = authenticate(config.enable_authorization, req.headers())?;
    req.extensions_mut().insert(authentication);
    Ok(next.run(req).await)
}

#[derive(Debug, Error, orefox_derive::ServiceError)]
#[service_error(base_id = "authz")]
pub enum AuthorizationError {
    #[error("Unauthorized, user must be authenticated")]
    #[service_error(status = 401)]
    Unauthorized,
    #[error("header '{header}' has an invalid value")]
    InvalidHeader { header: String },
}

#[derive(Debug, Error, orefox_derive::ServiceError)]
#[service_error(base_id = "app_health")]
pub enum AppHealthError {
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    #[service_error(status = 500)]
    Metadata(#[from] models::Error),
    #[error(transparent)]
    #[service_error(status = 502)]
    Storage(#[from] storage::Error),
}

#[orefox_derive::route]
#[utoipa::path(
    get, path = "",
    tag = "health",
    responses(
        (status = 200, description = "Check that the database and the object store respond", body = String)
    )
)]
async fn health(
    State(AppState {
        metadata,
        storage,
        config,
        ..
    }): State<AppState>,
) -> Result<&'static str> {
    let limit = config
        .health_check_timeout
        .to_std()
        .unwrap_or(std::time::Duration::ZERO);
    timeout(limit, check_health(&metadata, &storage))
        .await
        .map_err(|_| AppHealthError::Timeout)??;
    Ok("ok")
}

pub async fn check_health(
    metadata: &impl MetadataDriver,
    storage: &storage::Client,
) -> Result<(), AppHealthError> {
    tokio::try_join!(
        metadata.ping().map_err(AppHealthError::from),
        storage.ping().map_err(AppHealthError::from),
    )?;
    Ok(())
}

#[orefox_derive::route]
#[utoipa::path(
    get, path = "",
    tag = "health",
    responses(
        (status = 200, description = "Return the service version", body = Version),
    ),
)]
pub(in crate::views) async fn version(
    State(AppState { config, .. }): State<AppState>,
) -> Json<Version> {
    Json(Version {
        git_describe: config.app_version.clone(),
    })
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: Url,
    pub pool_size: usize,
}

pub struct ServerConfig {
    pub port: u16,
    pub address: String,
    pub health_check_timeout: Duration,
    pub enable_authorization: bool,
    /// Maximum size of a request body, uploads included
    pub request_body_limit: usize,
    /// Origins allowed by CORS, any origin when empty
    pub allowed_origins: Vec<HeaderValue>,
    pub postgres_config: PostgresConfig,
    pub storage_config: storage::Config,
    pub app_version: Option<String>,
}

pub struct Server {
    app_state: AppState,
    router: NormalizePath<Router>,
}

/// The state of the whole service, available to all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub metadata: MetadataStore,
    pub storage: storage::Client,
    pub intake: DocumentIntake<MetadataStore>,
}

impl FromRef<AppState> for MetadataStore {
    fn from_ref(input: &AppState) -> Self {
        input.metadata.clone()
    }
}

impl FromRef<AppState> for DocumentIntake<MetadataStore> {
    fn from_ref(input: &AppState) -> Self {
        input.intake.clone()
    }
}

impl AppState {
    fn new(config: ServerConfig, metadata: MetadataStore, storage: storage::Client) -> Self {
        Self {
            intake: DocumentIntake::new(metadata.clone(), storage.clone()),
            metadata,
            storage,
            config: Arc::new(config),
        }
    }

    #[tracing::instrument(skip_all, level = "info", err, name = "AppState initialization")]
    async fn init(config: ServerConfig) -> anyhow::Result<Self> {
        let PostgresConfig {
            database_url,
            pool_size,
        } = config.postgres_config.clone();
        let db_pool = DbConnectionPool::try_initialize(database_url, pool_size)?;

        #[tracing::instrument(skip_all, level = "info", err, name = "object store connection")]
        async fn connect_storage(config: storage::Config) -> anyhow::Result<storage::Client> {
            let client = storage::Client::new(config).await;
            if client.ensure_bucket().await? {
                info!(bucket = client.backend_name(), "bucket created");
            }
            Ok(client)
        }
        let storage = tokio::spawn(connect_storage(config.storage_config.clone()).in_current_span())
            .await??;

        Ok(Self::new(
            config,
            MetadataStore::Postgres(PgMetadataDriver::new(db_pool)),
            storage,
        ))
    }
}

impl Server {
    #[tracing::instrument(skip_all, err, level = "info", name = "server initialization")]
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        info!("Building server...");
        let app_state_fut = tokio::spawn(AppState::init(config).in_current_span());
        let router =
            tracing::debug_span!("router initialization").in_scope(|| service_router().router);
        let app_state = app_state_fut.await??;

        let request_payload_limit = RequestBodyLimitLayer::new(app_state.config.request_body_limit);

        let cors = {
            let origins = &app_state.config.allowed_origins;
            let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
            if origins.is_empty() {
                cors.allow_origin(Any)
            } else {
                cors.allow_origin(AllowOrigin::list(origins.iter().cloned()))
            }
        };

        let router: Router<()> = axum::Router::<AppState>::new()
            .merge(router)
            .route_layer(axum::middleware::from_fn_with_state(
                app_state.clone(),
                authentication_middleware,
            ))
            .layer(OtelAxumLayer::default())
            .layer(DefaultBodyLimit::disable())
            .layer(request_payload_limit)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(app_state.clone());
        let normalizing_router = NormalizePathLayer::trim_trailing_slash().layer(router);

        Ok(Self {
            app_state,
            router: normalizing_router,
        })
    }

    pub async fn start(self) -> std::io::Result<()> {
        let Self { app_state, router } = self;
        let ServerConfig {
            address,
            port,
            enable_authorization,
            ..
        } = app_state.config.as_ref();

        if !*enable_authorization {
            warn!("authorization disabled, write operations are accepted from anyone");
        }

        info!(%address, port, storage = app_state.storage.backend_name(), "Running server...");
        let service = ServiceExt::<axum::extract::Request>::into_make_service(router);
        let listener = tokio::net::TcpListener::bind((address.as_str(), *port)).await?;
        axum::serve(listener, service).await
    }
}
