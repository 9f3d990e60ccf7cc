//! Error types for the persistence layer.
//!
//! Query-compilation errors are fatal and non-retryable: the compiler never
//! emits partial SQL. Write-path errors wrap the database driver and the
//! transactional helpers.

use thiserror::Error;

use crate::graph::EntityKind;

/// Errors raised while compiling a criteria tree into a SQL statement.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The comparator is not on the allow-list. Comparator keywords are
    /// interpolated as SQL text, so this check runs before anything else
    /// touches the node.
    #[error("comparator not allowed: {comparator:?}")]
    InvalidComparator { comparator: String },

    /// A node is missing fields required by its declared kind, or carries a
    /// value of the wrong shape for its comparator.
    #[error("malformed criteria: {message}")]
    MalformedCriteria { message: String },

    /// No junction table is registered for the requested (child, parent) pair.
    #[error("no join table registered for child {child} under parent {parent}")]
    UnknownJoinPath {
        child: EntityKind,
        parent: EntityKind,
    },
}

/// Errors raised by the transactional write path.
#[derive(Error, Debug)]
pub enum CrudError {
    /// Query-compilation error surfaced through the write path (shared join
    /// registry lookups).
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The surrounding transaction could not be committed and was rolled back.
    #[error("transaction rolled back: {message}")]
    Transaction { message: String },

    /// Zero or multiple EAV attribute definitions matched a metadata key.
    #[error("ambiguous attribute resolution for {name:?}: {found} definitions found")]
    AmbiguousAttributeResolution { name: String, found: usize },

    /// An EAV attribute definition could not be interpreted.
    #[error("invalid attribute definition: {message}")]
    InvalidAttribute { message: String },

    /// Sequential code allocation failed.
    #[error("code allocation failed: {message}")]
    CodeAllocation { message: String },

    /// The targeted entity row does not exist (or its type does not match).
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Connection pool configuration error.
    #[error("invalid database configuration: {message}")]
    Configuration { message: String },

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Database driver error.
    #[error(transparent)]
    Backend(#[from] tokio_postgres::Error),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for query compilation.
pub type QueryResult<T> = Result<T, QueryError>;

/// Result type alias for write-path operations.
pub type CrudResult<T> = Result<T, CrudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_comparator_display() {
        let err = QueryError::InvalidComparator {
            comparator: "; DROP TABLE data;".to_string(),
        };
        assert!(err.to_string().contains("comparator not allowed"));
    }

    #[test]
    fn unknown_join_path_display() {
        let err = QueryError::UnknownJoinPath {
            child: EntityKind::Subject,
            parent: EntityKind::Data,
        };
        assert_eq!(
            err.to_string(),
            "no join table registered for child Subject under parent Data"
        );
    }

    #[test]
    fn crud_error_from_query_error() {
        let err: CrudError = QueryError::MalformedCriteria {
            message: "missing field".to_string(),
        }
        .into();
        assert!(matches!(err, CrudError::Query(_)));
    }
}
