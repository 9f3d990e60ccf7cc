//! Recursive tree statements over the entity graph.
//!
//! These builders produce the `WITH RECURSIVE` statements the read layer
//! shares: the data-type parent graph from a root type, and the descendant
//! tree (samples and data) of one subject. They resolve junction tables
//! through the same [`EntityGraph`] registry as everything else.

use crate::error::QueryResult;
use crate::graph::{EntityGraph, EntityKind};
use crate::types::params::{ParameterizedQuery, SqlValue};

/// Statement walking the data-type graph downward from `root_type`, guarding
/// against cycles by tracking the visited path.
pub fn data_type_children(root_type: i64) -> ParameterizedQuery {
    let statement = "WITH RECURSIVE nodes (parent, child, depth, path, cycle) AS (\
 SELECT r.datatype_parents, r.datatype_children, 1, ARRAY[r.datatype_parents], false \
 FROM datatype_children__datatype_parents AS r WHERE r.datatype_parents = $1 \
 UNION ALL \
 SELECT r.datatype_parents, r.datatype_children, nd.depth + 1, path || r.datatype_parents, \
 r.datatype_parents = ANY(path) \
 FROM datatype_children__datatype_parents AS r, nodes AS nd \
 WHERE r.datatype_parents = nd.child AND NOT cycle) \
 SELECT DISTINCT dt.id, dt.name, nd.parent, nd.child, nd.depth, nd.path, nd.cycle \
 FROM nodes nd INNER JOIN data_type dt ON dt.id = nd.child ORDER BY nd.depth;"
        .to_string();
    ParameterizedQuery {
        statement,
        parameters: vec![SqlValue::Integer(root_type)],
    }
}

/// Recursive `nodes` body shared by the subject-descendant statements: the
/// subject's direct samples and data seed the walk, nested samples and data
/// extend it.
fn descendant_nodes_body(graph: &EntityGraph) -> QueryResult<String> {
    let sample_of_subject = graph.lookup_join(EntityKind::Sample, EntityKind::Subject)?;
    let data_of_subject = graph.lookup_join(EntityKind::Data, EntityKind::Subject)?;
    let sample_of_sample = graph.lookup_join(EntityKind::Sample, EntityKind::Sample)?;
    let data_of_sample = graph.lookup_join(EntityKind::Data, EntityKind::Sample)?;
    let data_of_data = graph.lookup_join(EntityKind::Data, EntityKind::Data)?;

    Ok(format!(
        "nodes (parent_sample, parent_data, id, type, kind) AS (\
 SELECT NULL::bigint, NULL::bigint, sm.id, sm.type, 'sample'::text \
 FROM sample sm INNER JOIN {sj_table} AS {sj_alias} ON {sj_alias}.\"{sj_child}\" = sm.id \
 WHERE {sj_alias}.\"{sj_parent}\" = $1 \
 UNION ALL \
 SELECT NULL::bigint, NULL::bigint, dt.id, dt.type, 'data'::text \
 FROM data dt INNER JOIN {dj_table} AS {dj_alias} ON {dj_alias}.\"{dj_child}\" = dt.id \
 WHERE {dj_alias}.\"{dj_parent}\" = $1 \
 UNION ALL \
 SELECT nd.id, NULL::bigint, sm.id, sm.type, 'sample'::text \
 FROM sample sm INNER JOIN {ss_table} AS {ss_alias} ON {ss_alias}.\"{ss_child}\" = sm.id \
 INNER JOIN nodes nd ON {ss_alias}.\"{ss_parent}\" = nd.id AND nd.kind = 'sample' \
 UNION ALL \
 SELECT nd.id, NULL::bigint, dt.id, dt.type, 'data'::text \
 FROM data dt INNER JOIN {ds_table} AS {ds_alias} ON {ds_alias}.\"{ds_child}\" = dt.id \
 INNER JOIN nodes nd ON {ds_alias}.\"{ds_parent}\" = nd.id AND nd.kind = 'sample' \
 UNION ALL \
 SELECT NULL::bigint, nd.id, dt.id, dt.type, 'data'::text \
 FROM data dt INNER JOIN {dd_table} AS {dd_alias} ON {dd_alias}.\"{dd_child}\" = dt.id \
 INNER JOIN nodes nd ON {dd_alias}.\"{dd_parent}\" = nd.id AND nd.kind = 'data')",
        sj_table = sample_of_subject.table,
        sj_alias = sample_of_subject.alias,
        sj_child = sample_of_subject.child_column,
        sj_parent = sample_of_subject.parent_column,
        dj_table = data_of_subject.table,
        dj_alias = data_of_subject.alias,
        dj_child = data_of_subject.child_column,
        dj_parent = data_of_subject.parent_column,
        ss_table = sample_of_sample.table,
        ss_alias = sample_of_sample.alias,
        ss_child = sample_of_sample.child_column,
        ss_parent = sample_of_sample.parent_column,
        ds_table = data_of_sample.table,
        ds_alias = data_of_sample.alias,
        ds_child = data_of_sample.child_column,
        ds_parent = data_of_sample.parent_column,
        dd_table = data_of_data.table,
        dd_alias = data_of_data.alias,
        dd_child = data_of_data.child_column,
        dd_parent = data_of_data.parent_column,
    ))
}

/// Statement fetching the full descendant tree of one subject: its samples
/// and data records, then their nested samples and data, as
/// (parent, child, type) edges.
pub fn subject_descendants(graph: &EntityGraph, subject_id: i64) -> QueryResult<ParameterizedQuery> {
    let body = descendant_nodes_body(graph)?;
    Ok(ParameterizedQuery {
        statement: format!("WITH RECURSIVE {body} SELECT DISTINCT * FROM nodes;"),
        parameters: vec![SqlValue::Integer(subject_id)],
    })
}

/// Statement listing just the distinct data types reachable from one
/// subject's descendant tree.
pub fn subject_descendant_types(
    graph: &EntityGraph,
    subject_id: i64,
) -> QueryResult<ParameterizedQuery> {
    let body = descendant_nodes_body(graph)?;
    Ok(ParameterizedQuery {
        statement: format!(
            "WITH RECURSIVE {body} SELECT DISTINCT dt.id, dt.name, dt.model FROM nodes nd \
 INNER JOIN data_type dt ON dt.id = nd.type;"
        ),
        parameters: vec![SqlValue::Integer(subject_id)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_tree_binds_one_root_parameter() {
        let query = data_type_children(4);
        assert!(query.statement.starts_with("WITH RECURSIVE nodes"));
        assert!(query.statement.contains("$1"));
        assert!(!query.statement.contains("$2"));
        assert_eq!(query.parameters, vec![SqlValue::Integer(4)]);
        assert!(query.statement.ends_with(';'));
    }

    #[test]
    fn subject_descendants_joins_through_the_registry() {
        let graph = EntityGraph::new();
        let query = subject_descendants(&graph, 77).unwrap();
        assert!(query.statement.contains("sample_donor__subject_childrensample"));
        assert!(query.statement.contains("data_parentsubject__subject_childrendata"));
        assert!(query.statement.contains("data_childrendata__data_parentdata"));
        assert!(query.statement.contains("\"subject_childrenSample\" = $1"));
        assert_eq!(query.parameters, vec![SqlValue::Integer(77)]);
    }

    #[test]
    fn subject_descendant_types_projects_data_types() {
        let graph = EntityGraph::new();
        let query = subject_descendant_types(&graph, 5).unwrap();
        assert!(query.statement.starts_with("WITH RECURSIVE nodes"));
        assert!(query.statement.ends_with("INNER JOIN data_type dt ON dt.id = nd.type;"));
        assert_eq!(query.parameters, vec![SqlValue::Integer(5)]);
    }
}
