use chrono::DateTime;
use chrono::Utc;
use database::tables::project;
use diesel::prelude::*;
use diesel::deserialize::FromSqlRow;
use diesel::expression::AsExpression;
use postgis_diesel::types::GeometryContainer;
use postgis_diesel::types::Point;
use serde::Deserialize;
use serde::Serialize;
use utoipa::ToSchema;

use crate::Boundary;
use crate::BoundaryError;
use crate::InvalidField;
use crate::check_text;

pub const NAME_MAX_LENGTH: usize = 128;
pub const DESCRIPTION_MAX_LENGTH: usize = 1024;
pub const COMMODITY_MAX_LENGTH: usize = 64;

/// Name of the CHECK constraint rejecting geometries PostGIS deems invalid
pub const BOUNDARY_CONSTRAINT: &str = "project_boundary_is_area";

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
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
pub enum ProjectMode {
    #[default]
    Exploration,
    Mining,
}

crate::text_enum_sql!(ProjectMode);

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub mode: ProjectMode,
    /// Main commodity targeted by the project (gold, copper, lithium...)
    pub commodity: Option<String>,
    #[schema(value_type = Option<common::geometry::GeoJsonArea>)]
    pub boundary: Option<Boundary>,
    pub creation_date: DateTime<Utc>,
    pub last_modification: DateTime<Utc>,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = project)]
pub struct ProjectRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub mode: ProjectMode,
    pub commodity: Option<String>,
    pub boundary: Option<GeometryContainer<Point>>,
    pub creation_date: DateTime<Utc>,
    pub last_modification: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = BoundaryError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            id: row.id,
            name: row.name,
            description: row.description,
            mode: row.mode,
            commodity: row.commodity,
            boundary: row.boundary.map(Boundary::try_from).transpose()?,
            creation_date: row.creation_date,
            last_modification: row.last_modification,
        })
    }
}

/// A project to create, already validated
#[derive(Debug, Clone, PartialEq)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub mode: ProjectMode,
    pub commodity: Option<String>,
    pub boundary: Option<Boundary>,
}

/// Normalizes optional free text: blank values are stored as `NULL`
fn check_optional_text(
    field: &'static str,
    value: Option<String>,
    max_chars: usize,
) -> Result<Option<String>, InvalidField> {
    value
        .map(|value| check_text(field, &value, false, max_chars))
        .transpose()
        .map(|value| value.filter(|value| !value.is_empty()))
}

impl NewProject {
    pub fn new(
        name: &str,
        description: Option<String>,
        mode: ProjectMode,
        commodity: Option<String>,
        boundary: Option<Boundary>,
    ) -> Result<Self, InvalidField> {
        Ok(Self {
            name: check_text("name", name, true, NAME_MAX_LENGTH)?,
            description: check_optional_text("description", description, DESCRIPTION_MAX_LENGTH)?,
            mode,
            commodity: check_optional_text("commodity", commodity, COMMODITY_MAX_LENGTH)?,
            boundary,
        })
    }

    pub fn to_row(&self) -> NewProjectRow {
        NewProjectRow {
            name: self.name.clone(),
            description: self.description.clone(),
            mode: self.mode,
            commodity: self.commodity.clone(),
            boundary: self.boundary.as_ref().map(GeometryContainer::from),
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = project)]
pub struct NewProjectRow {
    pub name: String,
    pub description: Option<String>,
    pub mode: ProjectMode,
    pub commodity: Option<String>,
    pub boundary: Option<GeometryContainer<Point>>,
}

/// Changes to apply to a project
///
/// `None` keeps the current value, `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub mode: Option<ProjectMode>,
    pub commodity: Option<Option<String>>,
    pub boundary: Option<Option<Boundary>>,
}

impl ProjectPatch {
    /// Validates and normalizes the provided fields
    pub fn validated(self) -> Result<Self, InvalidField> {
        Ok(Self {
            name: self
                .name
                .map(|name| check_text("name", &name, true, NAME_MAX_LENGTH))
                .transpose()?,
            description: self
                .description
                .map(|description| {
                    check_optional_text("description", description, DESCRIPTION_MAX_LENGTH)
                })
                .transpose()?,
            mode: self.mode,
            commodity: self
                .commodity
                .map(|commodity| check_optional_text("commodity", commodity, COMMODITY_MAX_LENGTH))
                .transpose()?,
            boundary: self.boundary,
        })
    }

    pub fn apply(self, project: &mut Project) {
        if let Some(name) = self.name {
            project.name = name;
        }
        if let Some(description) = self.description {
            project.description = description;
        }
        if let Some(mode) = self.mode {
            project.mode = mode;
        }
        if let Some(commodity) = self.commodity {
            project.commodity = commodity;
        }
        if let Some(boundary) = self.boundary {
            project.boundary = boundary;
        }
    }

    pub fn to_changeset(&self) -> ProjectChangeset {
        ProjectChangeset {
            name: self.name.clone(),
            description: self.description.clone(),
            mode: self.mode,
            commodity: self.commodity.clone(),
            boundary: self
                .boundary
                .as_ref()
                .map(|boundary| boundary.as_ref().map(GeometryContainer::from)),
        }
    }
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = project)]
pub struct ProjectChangeset {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub mode: Option<ProjectMode>,
    pub commodity: Option<Option<String>>,
    pub boundary: Option<Option<GeometryContainer<Point>>>,
}
