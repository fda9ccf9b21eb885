//! Trail of the reads of document contents and metadata

use chrono::DateTime;
use chrono::Utc;
use database::tables::document_access;
use diesel::deserialize::FromSqlRow;
use diesel::expression::AsExpression;
use diesel::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    FromSqlRow,
    AsExpression,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[diesel(sql_type = diesel::sql_types::Text)]
pub enum AccessAction {
    /// The metadata of the document was fetched
    View,
    Download,
}

crate::text_enum_sql!(AccessAction);

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema, Queryable, Selectable)]
#[diesel(table_name = document_access)]
pub struct DocumentAccess {
    pub id: i64,
    /// Kept after the document is deleted
    pub document_id: i64,
    pub action: AccessAction,
    pub identity: Option<String>,
    /// Display name of the reader when the proxy provided one
    pub name: Option<String>,
    pub accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = document_access)]
pub struct NewDocumentAccess {
    pub document_id: i64,
    pub action: AccessAction,
    pub identity: Option<String>,
    pub name: Option<String>,
}
