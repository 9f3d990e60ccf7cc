//! Entity graph model: the three persisted entity kinds and the junction
//! tables that connect them.
//!
//! The registry is built once and shared between the query compiler and the
//! write path, so association reads and writes can never disagree on table or
//! column names. Junction column names are inverted with respect to their
//! contents (a historical schema artifact): the column whose name says
//! "parent" stores the structural child's row id and vice versa. The registry
//! hides the inversion behind `child_column`/`parent_column`, which are named
//! for what the column *stores*.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// The three entity kinds of the repository graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A donor or study participant.
    Subject,
    /// A biological sample, optionally held by a biobank.
    Sample,
    /// A generic data record (measurement, file-backed result, ...).
    Data,
}

impl EntityKind {
    /// SQL table backing this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Subject => "subject",
            EntityKind::Sample => "sample",
            EntityKind::Data => "data",
        }
    }

    /// Fragment used to build the `"{child}_{parent}"` registry key.
    fn key_fragment(&self) -> &'static str {
        self.table()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Subject => "Subject",
            EntityKind::Sample => "Sample",
            EntityKind::Data => "Data",
        };
        f.write_str(name)
    }
}

/// One registered junction table between a child kind and a parent kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTable {
    /// Junction table name.
    pub table: &'static str,
    /// Column storing the child row id (despite its "parent"-ish name).
    pub child_column: &'static str,
    /// Column storing the parent row id.
    pub parent_column: &'static str,
    /// Short alias used when the table appears in a join.
    pub alias: &'static str,
}

/// Per-kind SQL projection metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Backing table.
    pub table: &'static str,
    /// Kind-specific columns added to the root select, besides `id` and
    /// `metadata`.
    pub default_columns: &'static [&'static str],
    /// Column list projected when the kind appears as a nested CTE.
    pub subquery_columns: &'static str,
}

/// Immutable registry of junction tables and per-kind descriptors.
///
/// Lookup is keyed by the `(child, parent)` pair; only six pairs exist in the
/// schema, so e.g. a Data node nested under itself resolves while a Subject
/// node nested under a Data node does not.
#[derive(Debug)]
pub struct EntityGraph {
    joins: HashMap<(EntityKind, EntityKind), JoinTable>,
}

impl EntityGraph {
    /// Builds the registry with the six junction tables of the schema.
    pub fn new() -> Self {
        use EntityKind::{Data, Sample, Subject};

        let mut joins = HashMap::new();
        joins.insert(
            (Data, Data),
            JoinTable {
                table: "data_childrendata__data_parentdata",
                child_column: "data_parentData",
                parent_column: "data_childrenData",
                alias: "dtdt",
            },
        );
        joins.insert(
            (Data, Sample),
            JoinTable {
                table: "data_parentsample__sample_childrendata",
                child_column: "data_parentSample",
                parent_column: "sample_childrenData",
                alias: "dtsm",
            },
        );
        joins.insert(
            (Data, Subject),
            JoinTable {
                table: "data_parentsubject__subject_childrendata",
                child_column: "data_parentSubject",
                parent_column: "subject_childrenData",
                alias: "dtsb",
            },
        );
        joins.insert(
            (Sample, Sample),
            JoinTable {
                table: "sample_parentsample__sample_childrensample",
                child_column: "sample_parentSample",
                parent_column: "sample_childrenSample",
                alias: "smsm",
            },
        );
        joins.insert(
            (Sample, Subject),
            JoinTable {
                table: "sample_donor__subject_childrensample",
                child_column: "sample_donor",
                parent_column: "subject_childrenSample",
                alias: "smsb",
            },
        );
        joins.insert(
            (Subject, Subject),
            JoinTable {
                table: "subject_parentsubject__subject_childrensubject",
                child_column: "subject_parentSubject",
                parent_column: "subject_childrenSubject",
                alias: "sbsb",
            },
        );
        EntityGraph { joins }
    }

    /// Resolves the junction table connecting `child` rows to `parent` rows.
    pub fn lookup_join(&self, child: EntityKind, parent: EntityKind) -> QueryResult<&JoinTable> {
        self.joins
            .get(&(child, parent))
            .ok_or(QueryError::UnknownJoinPath { child, parent })
    }

    /// Projection metadata for a kind.
    pub fn describe(&self, kind: EntityKind) -> EntityDescriptor {
        match kind {
            EntityKind::Subject => EntityDescriptor {
                table: "subject",
                default_columns: &["code", "sex"],
                subquery_columns: "id, code, sex, personal_info",
            },
            EntityKind::Sample => EntityDescriptor {
                table: "sample",
                default_columns: &["biobank", "biobank_code"],
                subquery_columns: "id, biobank_code",
            },
            EntityKind::Data => EntityDescriptor {
                table: "data",
                default_columns: &[],
                subquery_columns: "id",
            },
        }
    }

    /// Registry key for a `(child, parent)` pair, as used in diagnostics.
    pub fn join_key(child: EntityKind, parent: EntityKind) -> String {
        format!("{}_{}", child.key_fragment(), parent.key_fragment())
    }
}

impl Default for EntityGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EntityKind::{Data, Sample, Subject};

    #[test]
    fn resolves_all_six_registered_pairs() {
        let graph = EntityGraph::new();
        for (child, parent) in [
            (Data, Data),
            (Data, Sample),
            (Data, Subject),
            (Sample, Sample),
            (Sample, Subject),
            (Subject, Subject),
        ] {
            assert!(graph.lookup_join(child, parent).is_ok(), "{child}/{parent}");
        }
    }

    #[test]
    fn sample_under_subject_uses_donor_junction() {
        let graph = EntityGraph::new();
        let join = graph.lookup_join(Sample, Subject).unwrap();
        assert_eq!(join.table, "sample_donor__subject_childrensample");
        assert_eq!(join.child_column, "sample_donor");
        assert_eq!(join.parent_column, "subject_childrenSample");
        assert_eq!(join.alias, "smsb");
    }

    #[test]
    fn unregistered_pair_is_an_unknown_join_path() {
        let graph = EntityGraph::new();
        let err = graph.lookup_join(Subject, Data).unwrap_err();
        assert!(matches!(
            err,
            QueryError::UnknownJoinPath {
                child: Subject,
                parent: Data
            }
        ));
    }

    #[test]
    fn descriptors_expose_projection_columns() {
        let graph = EntityGraph::new();
        assert_eq!(graph.describe(Subject).default_columns, &["code", "sex"]);
        assert_eq!(graph.describe(Sample).subquery_columns, "id, biobank_code");
        assert_eq!(graph.describe(Data).subquery_columns, "id");
    }

    #[test]
    fn join_keys_are_child_then_parent() {
        assert_eq!(EntityGraph::join_key(Data, Subject), "data_subject");
        assert_eq!(EntityGraph::join_key(Sample, Sample), "sample_sample");
    }
}
