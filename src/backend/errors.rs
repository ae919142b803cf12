use thiserror::Error;
use uuid::Uuid;

use crate::contract::SlugParseError;
use crate::schema::CompileError;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid slug: {0}")]
    SlugInvalid(String),

    #[error("invalid version: {0}")]
    VersionInvalid(String),

    #[error("element already exists: {slug}")]
    ElementAlreadyExists { slug: String },

    #[error("id already exists: {id}")]
    IdAlreadyExists { id: Uuid },

    #[error("no such element: {0}")]
    NoElement(String),

    #[error("link target does not exist: {0}")]
    NoLinkTarget(Uuid),

    #[error("malformed link contract: {0}")]
    InvalidLink(String),

    #[error("no relationship {verb:?} between {from} and {to}")]
    UnknownRelationship {
        verb: String,
        from: String,
        to: String,
    },

    #[error("statement timed out")]
    Timeout,

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<SlugParseError> for BackendError {
    fn from(error: SlugParseError) -> Self {
        match error {
            SlugParseError::SlugInvalid(slug) => BackendError::SlugInvalid(slug),
            SlugParseError::VersionInvalid(version) => BackendError::VersionInvalid(version),
        }
    }
}

/// PostgreSQL error code for a cancelled statement (statement_timeout).
const QUERY_CANCELED: &str = "57014";
/// PostgreSQL error code for unique violations.
const UNIQUE_VIOLATION: &str = "23505";

/// Translate an engine error, disambiguating duplicate keys by the violated
/// constraint: the primary key means a duplicate id, the versioned-slug
/// constraint a duplicate slug+version.
pub(crate) fn map_db_error(error: sqlx::Error, id: Uuid, slug: &str) -> BackendError {
    if let sqlx::Error::Database(database) = &error {
        match database.code().as_deref() {
            Some(QUERY_CANCELED) => return BackendError::Timeout,
            Some(UNIQUE_VIOLATION) => {
                if database.message().contains("pkey") {
                    return BackendError::IdAlreadyExists { id };
                }
                return BackendError::ElementAlreadyExists {
                    slug: slug.to_string(),
                };
            }
            _ => {}
        }
    }
    map_query_error(error)
}

/// Translate an engine error for reads, where no uniqueness is involved.
pub(crate) fn map_query_error(error: sqlx::Error) -> BackendError {
    if let sqlx::Error::Database(database) = &error {
        if database.code().as_deref() == Some(QUERY_CANCELED) {
            return BackendError::Timeout;
        }
    }
    BackendError::Database(error)
}
