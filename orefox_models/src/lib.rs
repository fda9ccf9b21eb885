pub mod boundary;
pub mod document;
pub mod document_access;
pub mod project;

pub use boundary::Boundary;
pub use boundary::BoundaryError;
pub use document::Confidentiality;
pub use document::Document;
pub use document::DocumentStatus;
pub use document_access::AccessAction;
pub use document_access::DocumentAccess;
pub use project::Project;
pub use project::ProjectMode;

use std::sync::LazyLock;

use database::DatabaseError;

use diesel::result::DatabaseErrorInformation;
use diesel::result::DatabaseErrorKind;
use regex::Regex;

/// Maps a `strum` enum to a textual column, using its snake_case name
macro_rules! text_enum_sql {
    ($name:ident) => {
        impl diesel::deserialize::FromSql<diesel::sql_types::Text, diesel::pg::Pg> for $name {
            fn from_sql(value: diesel::pg::PgValue<'_>) -> diesel::deserialize::Result<Self> {
                let s = std::str::from_utf8(value.as_bytes()).map_err(|_| "Invalid UTF-8 data")?;
                <$name as std::str::FromStr>::from_str(s).map_err(|_| {
                    format!("Unrecognized variant '{s}' for {}", stringify!($name)).into()
                })
            }
        }

        impl diesel::serialize::ToSql<diesel::sql_types::Text, diesel::pg::Pg> for $name {
            fn to_sql<'b>(
                &'b self,
                out: &mut diesel::serialize::Output<'b, '_, diesel::pg::Pg>,
            ) -> diesel::serialize::Result {
                use std::io::Write as _;
                out.write_all(self.to_string().as_bytes())?;
                Ok(diesel::serialize::IsNull::No)
            }
        }
    };
}
pub(crate) use text_enum_sql;

/// A user-provided value breaking a field constraint
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct InvalidField {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidField {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Trims `value` and checks its length in characters
pub fn check_text(
    field: &'static str,
    value: &str,
    required: bool,
    max_chars: usize,
) -> Result<String, InvalidField> {
    let value = value.trim();
    if required && value.is_empty() {
        return Err(InvalidField::new(field, "must not be blank"));
    }
    let length = value.chars().count();
    if length > max_chars {
        return Err(InvalidField::new(
            field,
            format!("must be at most {max_chars} characters long, got {length}"),
        ));
    }
    Ok(value.to_owned())
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error(
        "unique constraint violation \"{constraint}\" on column \"{column}\" with value \"{value}\""
    )]
    UniqueViolation {
        constraint: String,
        column: String,
        value: String,
    },
    #[error("check constraint violation of \"{constraint}\"")]
    CheckViolation { constraint: String },
    #[error("foreign key constraint violation of \"{constraint}\"")]
    ForeignKeyViolation { constraint: String },
    #[error(transparent)]
    DatabaseError(#[from] DatabaseError),
}

impl Error {
    /// Whether this error was raised by the given constraint
    pub fn is_constraint(&self, name: &str) -> bool {
        match self {
            Error::UniqueViolation { constraint, .. }
            | Error::CheckViolation { constraint }
            | Error::ForeignKeyViolation { constraint } => constraint == name,
            Error::DatabaseError(_) => false,
        }
    }
}

static UNIQUE_DETAILS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"Key \(([^)]+)\)=\((.*)\) already exists\."#).unwrap());

fn try_parse_unique_violation(e: &(dyn DatabaseErrorInformation + Send + Sync)) -> Option<Error> {
    let constraint = e.constraint_name()?;
    let captures = UNIQUE_DETAILS.captures(e.details()?)?;
    Some(Error::UniqueViolation {
        constraint: constraint.to_owned(),
        column: captures.get(1)?.as_str().to_owned(),
        value: captures.get(2)?.as_str().to_owned(),
    })
}

fn try_parse_check_violation(e: &(dyn DatabaseErrorInformation + Send + Sync)) -> Option<Error> {
    Some(Error::CheckViolation {
        constraint: e.constraint_name()?.to_owned(),
    })
}

fn try_parse_foreign_key_violation(
    e: &(dyn DatabaseErrorInformation + Send + Sync),
) -> Option<Error> {
    Some(Error::ForeignKeyViolation {
        constraint: e.constraint_name()?.to_owned(),
    })
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        let parsed = match &e {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, inner) => {
                try_parse_unique_violation(inner.as_ref())
            }
            diesel::result::Error::DatabaseError(DatabaseErrorKind::CheckViolation, inner) => {
                try_parse_check_violation(inner.as_ref())
            }
            diesel::result::Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, inner) => {
                try_parse_foreign_key_violation(inner.as_ref())
            }
            _ => return Self::DatabaseError(e.into()),
        };
        parsed.unwrap_or_else(|| {
            // the generic error is still correct, the structured details are only lost
            tracing::error!(error = %e, "failed to parse PostgreSQL error details");
            Self::DatabaseError(e.into())
        })
    }
}
