pub mod geometry;
pub mod tracing;

use serde::Deserialize;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, ToSchema, Serialize, Deserialize)]
pub struct Version {
    #[schema(required)] // Options are by default not required, but this one is
    pub git_describe: Option<String>,
}
