use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use colored::Colorize;
use database::DatabaseError;
use database::db_connection_pool::DatabasePoolError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::result::Result as StdResult;
use tracing::error;
use utoipa::ToSchema;

pub type Result<T, E = InternalError> = StdResult<T, E>;

/// Trait for all errors that can be returned by the service
///
/// Usually implemented with `#[derive(ServiceError)]`, which also registers the
/// error in [ERROR_DEFINITIONS] for the OpenAPI.
pub trait ServiceError: Error + Send + Sync {
    fn get_status(&self) -> StatusCode;

    fn get_type(&self) -> &str;

    fn context(&self) -> HashMap<String, Value> {
        Default::default()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(remote = "StatusCode")]
pub(crate) struct StatusCodeRemoteDef(#[serde(getter = "StatusCode::as_u16")] u16);

impl From<StatusCodeRemoteDef> for StatusCode {
    fn from(def: StatusCodeRemoteDef) -> Self {
        StatusCode::from_u16(def.0).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

pub(crate) fn default_status_code() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct InternalError {
    #[serde(with = "StatusCodeRemoteDef", default = "default_status_code")]
    #[schema(value_type = u16, minimum = 100, maximum = 599)]
    pub status: StatusCode,
    #[serde(rename = "type")]
    pub error_type: String,
    pub context: HashMap<String, Value>,
    pub message: String,
}

impl InternalError {
    pub fn get_type(&self) -> &str {
        &self.error_type
    }

    pub fn get_status(&self) -> StatusCode {
        self.status
    }

    pub fn with_context<S: AsRef<str>, V: Into<Value>>(mut self, key: S, value: V) -> Self {
        self.context.insert(key.as_ref().into(), value.into());
        self
    }
}

impl Error for InternalError {}

impl Display for InternalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl<T: ServiceError> From<T> for InternalError {
    fn from(err: T) -> Self {
        InternalError {
            status: err.get_status(),
            error_type: err.get_type().to_owned(),
            context: err.context(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for InternalError {
    fn into_response(self) -> Response {
        error!(
            "[{}] {}: {}",
            self.error_type.bold(),
            self.message,
            Backtrace::capture() // won't log unless RUST_BACKTRACE=1
        );
        (self.status, Json(self)).into_response()
    }
}

#[linkme::distributed_slice(ERROR_DEFINITIONS)]
static DATABASE_ACCESS_ERROR: ErrorDefinition = ErrorDefinition::new(
    "orefox:DatabaseAccessError",
    "DatabaseAccessError",
    "DatabaseAccessError",
    500u16,
    r#"{}"#,
);

impl ServiceError for DatabasePoolError {
    fn get_status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn get_type(&self) -> &str {
        "orefox:DatabaseAccessError"
    }
}

impl ServiceError for DatabaseError {
    fn get_status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn get_type(&self) -> &str {
        "orefox:DatabaseAccessError"
    }
}

#[linkme::distributed_slice(ERROR_DEFINITIONS)]
static MODEL_ERROR: ErrorDefinition =
    ErrorDefinition::new("orefox:ModelError", "ModelError", "ModelError", 500u16, r#"{}"#);

impl ServiceError for orefox_models::Error {
    fn get_status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn get_type(&self) -> &str {
        "orefox:ModelError"
    }
}

#[linkme::distributed_slice(ERROR_DEFINITIONS)]
static OBJECT_STORE_ERROR: ErrorDefinition = ErrorDefinition::new(
    "orefox:ObjectStoreError",
    "ObjectStoreError",
    "ObjectStoreError",
    502u16,
    r#"{}"#,
);

impl ServiceError for storage::Error {
    fn get_status(&self) -> StatusCode {
        StatusCode::BAD_GATEWAY
    }

    fn get_type(&self) -> &str {
        "orefox:ObjectStoreError"
    }
}

// error definition: generated by the ServiceError derive macro
// and shared with the OpenAPI generator
#[derive(Debug)]
pub struct ErrorDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub namespace: &'static str,
    pub status: u16,
    context_serialized: &'static str,
}

impl ErrorDefinition {
    pub const fn new(
        id: &'static str,
        name: &'static str,
        namespace: &'static str,
        status: u16,
        context_serialized: &'static str,
    ) -> Self {
        ErrorDefinition {
            id,
            name,
            namespace,
            status,
            context_serialized,
        }
    }

    /// Field names of the context mapped to the name of their type
    ///
    /// The context is generated at compile time, a malformed one yields an empty map.
    pub fn get_context(&self) -> HashMap<String, String> {
        serde_json::from_str(self.context_serialized).unwrap_or_default()
    }

    pub fn get_schema_name(&self) -> String {
        format!("Orefox{}{}", self.namespace, self.name)
    }
}

#[linkme::distributed_slice]
pub static ERROR_DEFINITIONS: [ErrorDefinition];

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[derive(Debug, thiserror::Error, orefox_derive::ServiceError)]
    #[service_error(base_id = "test")]
    enum TestError {
        #[error("missing {name}")]
        #[service_error(status = 404)]
        Missing { name: String },
        #[error("broken")]
        Broken,
    }

    #[test]
    fn derived_errors_convert_to_internal_errors() {
        let error = InternalError::from(TestError::Missing {
            name: "report".to_owned(),
        });
        assert_eq!(error.get_status(), StatusCode::NOT_FOUND);
        assert_eq!(error.get_type(), "orefox:test:Missing");
        assert_eq!(error.context.get("name"), Some(&json!("report")));
        assert_eq!(error.message, "missing report");

        let error = InternalError::from(TestError::Broken);
        assert_eq!(error.get_status(), StatusCode::BAD_REQUEST);
        assert!(error.context.is_empty());
    }

    #[test]
    fn derived_errors_are_registered() {
        let definition = ERROR_DEFINITIONS
            .iter()
            .find(|definition| definition.id == "orefox:test:Missing")
            .unwrap();
        assert_eq!(definition.status, 404);
        assert_eq!(definition.get_schema_name(), "OrefoxTestErrorMissing");
        assert_eq!(
            definition.get_context(),
            HashMap::from([("name".to_owned(), "String".to_owned())])
        );
    }

    #[test]
    fn internal_error_body_uses_the_common_shape() {
        let error = InternalError::from(storage::Error::NotFound {
            key: "documents/a".to_owned(),
        });
        let body = serde_json::to_value(&error).unwrap();
        assert_eq!(body["status"], json!(502));
        assert_eq!(body["type"], json!("orefox:ObjectStoreError"));
        assert_eq!(body["message"], json!("object 'documents/a' not found"));
    }
}
