//! An axum router that keeps the OpenAPI documentation of every mounted handler
//!
//! Handlers register their documentation with `#[orefox_derive::route]`. Mounting a
//! handler through [DocumentedRouter::route] looks it up, so the served routes and the
//! documented ones cannot drift apart.

use axum::routing::MethodRouter;
use utoipa::openapi::HttpMethod;
use utoipa::openapi::PathItem;
use utoipa::openapi::RefOr;
use utoipa::openapi::path::Operation;
use utoipa::openapi::schema::Schema;

use super::AppState;

pub(super) struct RouteDocumentation {
    pub(super) http_methods: Vec<HttpMethod>,
    pub(super) operation: Operation,
    pub(super) tags: Vec<&'static str>,
    pub(super) schemas: Vec<(String, RefOr<Schema>)>,
}

/// Returns the documentation of the handler whose type name is given, if it is this one
///
/// `std::any::type_name_of_val` is not const, so the registrations cannot be keyed by
/// type name and are scanned when the router is built.
pub(in crate::views) type OpenApiRouteSliceItem = fn(&str) -> Option<fn() -> RouteDocumentation>;

#[linkme::distributed_slice]
pub(in crate::views) static OPENAPI_ROUTES: [OpenApiRouteSliceItem];

/// A handler ready to be mounted, built by the `get!`, `post!`, `patch!` and `delete!` macros
pub(super) struct Handler {
    pub(super) type_name: &'static str,
    pub(super) method_router: MethodRouter<AppState>,
    pub(super) method: HttpMethod,
}

pub(super) struct DocumentedRoute {
    /// Absolute path, spelled as in the OpenAPI document
    pub(super) path: String,
    documentation: fn() -> RouteDocumentation,
}

impl DocumentedRoute {
    /// The OpenAPI path item of the route and the schemas it references
    pub(super) fn path_item(&self) -> (PathItem, Vec<(String, RefOr<Schema>)>) {
        let RouteDocumentation {
            http_methods,
            mut operation,
            tags,
            schemas,
        } = (self.documentation)();
        // utoipa only fills the tags when collecting paths with `#[openapi(paths(...))]`
        if !tags.is_empty() {
            operation.tags = Some(tags.into_iter().map(str::to_owned).collect());
        }
        (PathItem::from_http_methods(http_methods, operation), schemas)
    }
}

/// Joins two route paths, the result never ends with a `/` unless it is the root
fn join(prefix: &str, path: &str) -> String {
    let joined = format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    match joined.trim_end_matches('/') {
        "" => String::from("/"),
        trimmed => trimmed.to_owned(),
    }
}

fn documentation_of(type_name: &str) -> Option<fn() -> RouteDocumentation> {
    OPENAPI_ROUTES.iter().find_map(|matcher| matcher(type_name))
}

#[derive(Default)]
pub(super) struct DocumentedRouter {
    pub(super) router: axum::Router<AppState>,
    pub(super) routes: Vec<DocumentedRoute>,
}

impl DocumentedRouter {
    pub(super) fn root(build: impl FnOnce(Self) -> Self) -> Self {
        build(Self::default())
    }

    /// Mounts a handler at `path`
    ///
    /// Panics at the caller's line when the handler was not annotated with
    /// `#[orefox_derive::route]` or is documented for another HTTP method.
    #[track_caller]
    pub(super) fn route(self, path: &'static str, handler: Handler) -> Self {
        let Handler {
            type_name,
            method_router,
            method,
        } = handler;
        let Some(documentation) = documentation_of(type_name) else {
            panic!("handler {type_name} mounted at {path} has no registered documentation");
        };
        let documented_methods = documentation().http_methods;
        if !documented_methods.contains(&method) {
            panic!(
                "handler {type_name} mounted at {path} for {} is documented for {}",
                serde_json::to_string(&method).unwrap_or_default(),
                serde_json::to_string(&documented_methods).unwrap_or_default()
            );
        }
        let Self { router, mut routes } = self;
        routes.push(DocumentedRoute {
            path: join("", path),
            documentation,
        });
        Self {
            router: router.route(path, method_router),
            routes,
        }
    }

    /// Mounts the routes built by `build` under `prefix`
    pub(super) fn nests(self, prefix: &'static str, build: impl FnOnce(Self) -> Self) -> Self {
        let nested = build(Self::default());
        let Self { router, mut routes } = self;
        routes.extend(nested.routes.into_iter().map(|route| DocumentedRoute {
            path: join(prefix, &route.path),
            ..route
        }));
        Self {
            router: router.nest(prefix, nested.router),
            routes,
        }
    }
}

macro_rules! handler {
    ($routing:ident, $method:ident, $f:path) => {
        $crate::views::router::Handler {
            type_name: std::any::type_name_of_val(&$f),
            method_router: axum::routing::$routing($f),
            method: utoipa::openapi::HttpMethod::$method,
        }
    };
}

macro_rules! get {
    ($f:path) => {
        $crate::views::router::handler!(get, Get, $f)
    };
}

macro_rules! post {
    ($f:path) => {
        $crate::views::router::handler!(post, Post, $f)
    };
}

macro_rules! patch {
    ($f:path) => {
        $crate::views::router::handler!(patch, Patch, $f)
    };
}

macro_rules! delete {
    ($f:path) => {
        $crate::views::router::handler!(delete, Delete, $f)
    };
}

pub(super) use delete;
pub(super) use get;
pub(super) use handler;
pub(super) use patch;
pub(super) use post;
