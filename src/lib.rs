//! PostgreSQL query compilation and persistence for a biomedical data
//! repository.
//!
//! The repository stores three entity kinds (subjects, samples, generic data
//! records) connected many-to-many through junction tables, each carrying a
//! semi-structured JSONB `metadata` document. This crate provides:
//!
//! - [`query::QueryBuilder`]: compiles a nested criteria tree into one
//!   parameterized SQL statement (recursive criteria become `WITH` common
//!   table expressions), with a choice of two JSONB predicate strategies.
//! - [`crud::CrudManager`]: transactional create/update/delete over the
//!   entity tables, their junction rows, and the EAV metadata catalogue.
//! - [`tree`]: recursive-CTE statements over the data-type graph and one
//!   subject's descendant records.
//!
//! Both sides share one [`graph::EntityGraph`] junction registry, so reads
//! and writes can never disagree on association table or column names.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use biorepo_persistence::graph::EntityGraph;
//! use biorepo_persistence::query::QueryBuilder;
//! use biorepo_persistence::types::criteria::QueryRequest;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let request: QueryRequest = serde_json::from_str(
//!     r#"{
//!         "dataType": 1,
//!         "model": "Data",
//!         "content": [{
//!             "fieldName": "mass",
//!             "fieldType": "float",
//!             "comparator": ">=",
//!             "fieldValue": "1.5",
//!             "fieldUnit": "kg"
//!         }]
//!     }"#,
//! )?;
//! let builder = QueryBuilder::path(Arc::new(EntityGraph::new()));
//! let compiled = builder.compose(&request)?;
//! assert!(compiled.statement.ends_with(";"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crud;
pub mod error;
pub mod graph;
pub mod query;
pub mod tree;
pub mod types;

pub use config::PgConfig;
pub use crud::CrudManager;
pub use error::{CrudError, CrudResult, QueryError, QueryResult};
pub use graph::{EntityGraph, EntityKind};
pub use query::{CompileStrategy, QueryBuilder};
pub use types::criteria::QueryRequest;
pub use types::metadata::{Metadata, MetadataValue};
pub use types::params::{ParameterizedQuery, SqlValue};
