//! Metadata of the uploaded documents
//!
//! The binary content lives in the object store under [Document::object_key]. A row is
//! inserted as [DocumentStatus::Pending] before the object is written and becomes
//! [DocumentStatus::Committed] once the object store acknowledged the write. Only
//! committed documents are visible to users.

use chrono::DateTime;
use chrono::Utc;
use database::tables::document;
use diesel::deserialize::FromSqlRow;
use diesel::expression::AsExpression;
use diesel::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use utoipa::ToSchema;

use crate::InvalidField;
use crate::check_text;

pub const TITLE_MAX_LENGTH: usize = 300;
pub const DOC_TYPE_MAX_LENGTH: usize = 64;
pub const YEARS: std::ops::RangeInclusive<i32> = 1800..=2200;

/// Name of the unique constraint on the content checksum
pub const CHECKSUM_CONSTRAINT: &str = "document_checksum_sha256_key";
/// Name of the foreign key to the project of a document
pub const PROJECT_CONSTRAINT: &str = "document_project_id_fkey";

/// Sensitivity of a document, also used as the clearance of a reader
///
/// Levels are ordered: a reader cleared for a level may see every level below it.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    FromSqlRow,
    AsExpression,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[diesel(sql_type = diesel::sql_types::Text)]
pub enum Confidentiality {
    Public,
    #[default]
    Internal,
    Confidential,
}

crate::text_enum_sql!(Confidentiality);

impl Confidentiality {
    /// The levels visible with this clearance, from the least sensitive
    pub fn up_to(self) -> Vec<Confidentiality> {
        use strum::IntoEnumIterator as _;
        Confidentiality::iter().filter(|level| *level <= self).collect()
    }

    pub fn permits(self, level: Confidentiality) -> bool {
        level <= self
    }
}

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
pub enum DocumentStatus {
    /// The row exists but the object may not be written yet
    Pending,
    Committed,
    /// The object write failed and the row could not be removed
    Failed,
}

crate::text_enum_sql!(DocumentStatus);

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema, Queryable, Selectable)]
#[diesel(table_name = document)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub year: i32,
    pub doc_type: String,
    pub confidentiality: Confidentiality,
    pub object_key: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    /// Hex encoded SHA-256 of the content
    pub checksum_sha256: String,
    pub project_id: Option<i64>,
    pub created_by: Option<String>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = document)]
pub struct NewDocument {
    pub title: String,
    pub year: i32,
    pub doc_type: String,
    pub confidentiality: Confidentiality,
    pub object_key: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub checksum_sha256: String,
    pub project_id: Option<i64>,
    pub created_by: Option<String>,
    pub status: DocumentStatus,
}

pub fn check_title(title: &str) -> Result<String, InvalidField> {
    check_text("title", title, true, TITLE_MAX_LENGTH)
}

pub fn check_doc_type(doc_type: &str) -> Result<String, InvalidField> {
    check_text("doc_type", doc_type, false, DOC_TYPE_MAX_LENGTH)
}

pub fn check_year(year: i32) -> Result<i32, InvalidField> {
    if YEARS.contains(&year) {
        Ok(year)
    } else {
        Err(InvalidField::new(
            "year",
            format!(
                "must be between {} and {}, got {year}",
                YEARS.start(),
                YEARS.end()
            ),
        ))
    }
}

/// Metadata changes of a document, the content itself is immutable
///
/// `project_id: Some(None)` detaches the document from its project.
#[derive(Debug, Clone, Default, PartialEq, AsChangeset)]
#[diesel(table_name = document)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub doc_type: Option<String>,
    pub confidentiality: Option<Confidentiality>,
    pub project_id: Option<Option<i64>>,
}

impl DocumentPatch {
    pub fn validated(self) -> Result<Self, InvalidField> {
        Ok(Self {
            title: self.title.as_deref().map(check_title).transpose()?,
            year: self.year.map(check_year).transpose()?,
            doc_type: self.doc_type.as_deref().map(check_doc_type).transpose()?,
            ..self
        })
    }

    pub fn apply(self, document: &mut Document) {
        if let Some(title) = self.title {
            document.title = title;
        }
        if let Some(year) = self.year {
            document.year = year;
        }
        if let Some(doc_type) = self.doc_type {
            document.doc_type = doc_type;
        }
        if let Some(confidentiality) = self.confidentiality {
            document.confidentiality = confidentiality;
        }
        if let Some(project_id) = self.project_id {
            document.project_id = project_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1800, true)]
    #[case(2024, true)]
    #[case(2200, true)]
    #[case(1799, false)]
    #[case(2201, false)]
    fn year_bounds(#[case] year: i32, #[case] valid: bool) {
        assert_eq!(check_year(year).is_ok(), valid);
    }

    #[test]
    fn title_is_bounded() {
        assert_eq!(check_title(" Drilling Summary ").unwrap(), "Drilling Summary");
        assert!(check_title(&"a".repeat(TITLE_MAX_LENGTH)).is_ok());
        assert_eq!(
            check_title(&"a".repeat(TITLE_MAX_LENGTH + 1))
                .unwrap_err()
                .field,
            "title"
        );
    }

    #[test]
    fn doc_type_may_be_empty() {
        assert_eq!(check_doc_type("").unwrap(), "");
        assert!(check_doc_type(&"x".repeat(DOC_TYPE_MAX_LENGTH + 1)).is_err());
    }

    #[test]
    fn statuses_are_snake_case() {
        assert_eq!(DocumentStatus::Committed.to_string(), "committed");
        assert_eq!(Confidentiality::default(), Confidentiality::Internal);
        assert_eq!(
            serde_json::to_value(Confidentiality::Confidential).unwrap(),
            serde_json::json!("confidential")
        );
    }

    #[test]
    fn clearance_covers_the_lower_levels() {
        assert_eq!(Confidentiality::Public.up_to(), vec![Confidentiality::Public]);
        assert_eq!(
            Confidentiality::Confidential.up_to(),
            vec![
                Confidentiality::Public,
                Confidentiality::Internal,
                Confidentiality::Confidential
            ]
        );
        assert!(Confidentiality::Internal.permits(Confidentiality::Public));
        assert!(!Confidentiality::Internal.permits(Confidentiality::Confidential));
    }

    #[test]
    fn patch_validation_reports_the_field() {
        let patch = DocumentPatch {
            year: Some(1500),
            ..Default::default()
        };
        assert_eq!(patch.validated().unwrap_err().field, "year");
    }
}
