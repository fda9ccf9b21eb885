mod error;
mod route;

use proc_macro::TokenStream;
use syn::DeriveInput;
use syn::ItemFn;
use syn::parse_macro_input;

/// Implements `crate::error::ServiceError` for an error enum
///
/// ```ignore
/// #[derive(Debug, thiserror::Error, ServiceError)]
/// #[service_error(base_id = "project")]
/// enum ProjectError {
///     #[error("Project '{project_id}' could not be found")]
///     #[service_error(status = 404)]
///     NotFound { project_id: i64 },
///     #[error(transparent)]
///     #[service_error(status = 500)]
///     Database(#[from] orefox_models::Error),
/// }
/// ```
///
/// - The error type id is `orefox:<base_id>:<VariantName>`.
/// - Variants default to status 400 unless `default_status` is set on the enum.
/// - Named fields are serialized into the error context, opt out with `no_context`.
/// - Each variant is registered in `crate::error::ERROR_DEFINITIONS` for the OpenAPI.
#[proc_macro_derive(ServiceError, attributes(service_error))]
pub fn service_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    error::expand(&input)
        .unwrap_or_else(darling::Error::write_errors)
        .into()
}

/// Registers the OpenAPI documentation of an axum handler annotated with `#[utoipa::path]`
///
/// The router looks the documentation up by the handler's type name when the
/// route is mounted, so every mounted handler must carry this attribute.
#[proc_macro_attribute]
pub fn route(_attr: TokenStream, input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as ItemFn);
    route::route(&input)
        .unwrap_or_else(darling::Error::write_errors)
        .into()
}
