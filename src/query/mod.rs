//! Criteria-to-SQL compilation.
//!
//! [`QueryBuilder`] turns one [`QueryRequest`] into one
//! [`ParameterizedQuery`]: a single statement (recursive criteria become
//! `WITH` common table expressions) plus its flat parameter list.
//! Compilation is pure; nothing touches the database.

pub mod allocator;
mod assembler;
pub mod strategy;

use std::sync::Arc;

use crate::error::QueryResult;
use crate::graph::EntityGraph;
use crate::types::criteria::QueryRequest;
use crate::types::params::ParameterizedQuery;
use strategy::{ContainmentStrategy, PathStrategy, PredicateCompiler};

pub use strategy::ALLOWED_COMPARATORS;

/// Which predicate compilation strategy a builder uses for metadata leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStrategy {
    /// Extract attribute values with `->`/`->>` and cast them.
    Path,
    /// Prefer JSONB `@>` containment probes where the comparator allows.
    Containment,
}

/// Compiles criteria trees into parameterized SQL statements.
///
/// The strategy is fixed at construction; a request never switches it per
/// node. Builders are cheap to share: compilation state lives in a
/// per-request allocator.
pub struct QueryBuilder {
    graph: Arc<EntityGraph>,
    strategy: Box<dyn PredicateCompiler>,
}

impl QueryBuilder {
    pub fn new(graph: Arc<EntityGraph>, strategy: CompileStrategy) -> Self {
        let strategy: Box<dyn PredicateCompiler> = match strategy {
            CompileStrategy::Path => Box::new(PathStrategy),
            CompileStrategy::Containment => Box::new(ContainmentStrategy),
        };
        QueryBuilder { graph, strategy }
    }

    /// Builder using path extraction for every metadata predicate.
    pub fn path(graph: Arc<EntityGraph>) -> Self {
        Self::new(graph, CompileStrategy::Path)
    }

    /// Builder preferring containment probes for metadata predicates.
    pub fn containment(graph: Arc<EntityGraph>) -> Self {
        Self::new(graph, CompileStrategy::Containment)
    }

    /// Compiles one request into one statement with bound parameters.
    ///
    /// The input tree is never mutated; compiling the same request twice
    /// yields identical output.
    pub fn compose(&self, request: &QueryRequest) -> QueryResult<ParameterizedQuery> {
        assembler::compose(&self.graph, self.strategy.as_ref(), request)
    }
}
