//! CTE assembly and final statement building.
//!
//! Compilation runs in two passes over the criteria tree. The first pass
//! ([`compose_node`]) walks the tree once, binding parameters and CTE aliases
//! in encounter order and producing one [`ComposedNode`] per nested node. The
//! second pass ([`compose`]) assigns each composed node its role: the root
//! becomes the outer statement, every other nested node becomes an ordinary
//! CTE joined through the junction registry, and auxiliary one-hop CTEs
//! (owning subject, personal details, biobank) are emitted in that fixed
//! order ahead of the criteria-derived ones.

use tracing::{debug, trace};

use crate::error::{QueryError, QueryResult};
use crate::graph::{EntityGraph, EntityKind};
use crate::query::allocator::ParamAllocator;
use crate::query::strategy::{PersonalDetailsQuery, PredicateCompiler, compile_personal_details};
use crate::types::criteria::{Criterion, DataTypeFilter, NestedCriteria, QueryRequest};
use crate::types::params::{ParameterizedQuery, SqlValue};

/// Output of the first pass for one nested node.
#[derive(Debug)]
pub(crate) struct ComposedNode {
    kind: EntityKind,
    /// CTE alias; `"d"` for the root, which never becomes a CTE.
    alias: String,
    select: String,
    where_clause: String,
    label: Option<String>,
    get_metadata: bool,
    children: Vec<ComposedChild>,
}

#[derive(Debug)]
enum ComposedChild {
    Nested(ComposedNode),
    PersonalDetails(PersonalDetailsQuery),
}

/// First pass: compiles one nested node and, recursively, its children.
///
/// `alias` is `None` only at the root, which predicates with the `d.` table
/// qualifier; CTE bodies predicate unqualified columns.
pub(crate) fn compose_node(
    criteria: &NestedCriteria,
    graph: &EntityGraph,
    strategy: &dyn PredicateCompiler,
    alloc: &mut ParamAllocator,
    alias: Option<String>,
) -> QueryResult<ComposedNode> {
    let is_root = alias.is_none();
    let alias = alias.unwrap_or_else(|| "d".to_string());
    let prefix = if is_root { "d." } else { "" };
    let descriptor = graph.describe(criteria.model);
    trace!(model = %criteria.model, alias = %alias, "composing criteria node");

    let mut select = format!("SELECT {}", descriptor.subquery_columns);
    if criteria.get_metadata {
        select.push_str(", metadata");
    }
    select.push_str(&format!(" FROM {}", descriptor.table));

    let mut where_clause = match &criteria.data_type {
        DataTypeFilter::One(id) => {
            let placeholder = alloc.bind(SqlValue::Integer(*id));
            format!("WHERE {prefix}type = {placeholder}")
        }
        DataTypeFilter::Many(ids) => {
            if ids.is_empty() {
                return Err(QueryError::MalformedCriteria {
                    message: "empty dataType list".to_string(),
                });
            }
            let placeholders: Vec<String> = ids
                .iter()
                .map(|id| alloc.bind(SqlValue::Integer(*id)))
                .collect();
            format!("WHERE {prefix}type IN ({})", placeholders.join(","))
        }
    };

    let mut predicates: Vec<String> = Vec::new();
    let mut children: Vec<ComposedChild> = Vec::new();
    for child in &criteria.content {
        match child {
            Criterion::Nested(nested) => {
                let child_alias = alloc.next_cte_alias();
                children.push(ComposedChild::Nested(compose_node(
                    nested,
                    graph,
                    strategy,
                    alloc,
                    Some(child_alias),
                )?));
            }
            Criterion::PersonalDetails(node) => {
                if criteria.model != EntityKind::Subject {
                    return Err(QueryError::MalformedCriteria {
                        message: format!(
                            "personal-details criteria require a subject node, found {}",
                            criteria.model
                        ),
                    });
                }
                let compiled = compile_personal_details(node, !is_root, alloc)?;
                if let Some(predicate) = &compiled.predicate {
                    predicates.push(predicate.clone());
                }
                // Nested nodes predicate through a correlated sub-select and
                // need no CTE; only the root's pd node is joined outside.
                if is_root {
                    children.push(ComposedChild::PersonalDetails(compiled));
                }
            }
            Criterion::Specialized(node) => {
                if let Some(clause) = strategy.compile_specialized(node, prefix, alloc)? {
                    predicates.push(clause);
                }
            }
            Criterion::Leaf(leaf) => {
                if let Some(clause) = strategy.compile_leaf(leaf, prefix, alloc)? {
                    predicates.push(clause);
                }
            }
            Criterion::Empty => {}
        }
    }

    if !predicates.is_empty() {
        let combined = if predicates.len() == 1 {
            predicates.swap_remove(0)
        } else {
            let junction = format!(" {} ", criteria.junction.keyword());
            predicates
                .iter()
                .map(|clause| format!("({clause})"))
                .collect::<Vec<_>>()
                .join(&junction)
        };
        where_clause.push_str(&format!(" AND ({combined})"));
    }

    Ok(ComposedNode {
        kind: criteria.model,
        alias,
        select,
        where_clause,
        label: criteria.label.clone(),
        get_metadata: criteria.get_metadata,
        children,
    })
}

/// One emitted CTE: its `WITH` entry, the join pulling it into the outer
/// statement, and the projection metadata leaf-search needs.
struct Cte {
    alias: String,
    expression: String,
    join: String,
    kind: EntityKind,
    label: Option<String>,
    get_metadata: bool,
}

/// One column of the outer select. `key` names it inside the leaf-search
/// aggregate; `output` renames it in row mode.
struct SelectField {
    expr: String,
    output: Option<&'static str>,
    key: String,
}

impl SelectField {
    fn plain(expr: impl Into<String>, key: impl Into<String>) -> Self {
        SelectField {
            expr: expr.into(),
            output: None,
            key: key.into(),
        }
    }
}

/// Second pass, criteria-derived CTEs: pre-order walk assigning junction
/// joins. `ordinal` counts nested CTEs in pre-order, which matches their
/// `nested_N` aliases; suffixing junction aliases with it keeps them unique
/// even when the same junction table appears several times.
fn collect_ctes(
    node: &ComposedNode,
    graph: &EntityGraph,
    leaf_search: bool,
    ctes: &mut Vec<Cte>,
    ordinal: &mut usize,
) -> QueryResult<()> {
    for child in &node.children {
        match child {
            ComposedChild::PersonalDetails(pd) => {
                ctes.push(Cte {
                    alias: pd.alias.clone(),
                    expression: format!("{} AS ({})", pd.alias, pd.select),
                    join: format!(
                        "LEFT JOIN {alias} ON {alias}.id = {parent}.personal_info",
                        alias = pd.alias,
                        parent = node.alias
                    ),
                    kind: EntityKind::Subject,
                    label: None,
                    get_metadata: false,
                });
            }
            ComposedChild::Nested(nested) => {
                let join = graph.lookup_join(nested.kind, node.kind)?;
                *ordinal += 1;
                let junction_alias = format!("{}_{}", join.alias, ordinal);
                // Labeled siblings force the aggregate projection, which
                // cannot carry per-CTE ordering.
                let aggregated = leaf_search
                    && nested.children.iter().any(|c| {
                        matches!(c, ComposedChild::Nested(n) if n.label.is_some())
                    });
                let ordering = if leaf_search && !aggregated {
                    " ORDER BY id"
                } else {
                    ""
                };
                ctes.push(Cte {
                    alias: nested.alias.clone(),
                    expression: format!(
                        "{} AS ({} {}{ordering})",
                        nested.alias, nested.select, nested.where_clause
                    ),
                    join: format!(
                        "INNER JOIN {table} AS {ja} ON {ja}.\"{parent_col}\" = {parent}.id INNER JOIN {cte} ON {ja}.\"{child_col}\" = {cte}.id",
                        table = join.table,
                        ja = junction_alias,
                        parent_col = join.parent_column,
                        parent = node.alias,
                        cte = nested.alias,
                        child_col = join.child_column,
                    ),
                    kind: nested.kind,
                    label: nested.label.clone(),
                    get_metadata: nested.get_metadata,
                });
                collect_ctes(nested, graph, leaf_search, ctes, ordinal)?;
            }
        }
    }
    Ok(())
}

/// Compiles a full request into one parameterized statement.
pub(crate) fn compose(
    graph: &EntityGraph,
    strategy: &dyn PredicateCompiler,
    request: &QueryRequest,
) -> QueryResult<ParameterizedQuery> {
    let mut alloc = ParamAllocator::new();
    let root = compose_node(&request.criteria, graph, strategy, &mut alloc, None)?;
    let kind = root.kind;
    let descriptor = graph.describe(kind);
    debug!(
        model = %kind,
        leaf_search = request.leaf_search,
        "compiling search statement"
    );

    let mut ctes: Vec<Cte> = Vec::new();
    let mut fields: Vec<SelectField> = Vec::new();

    fields.push(SelectField::plain("d.id", "id"));
    for column in descriptor.default_columns {
        fields.push(SelectField::plain(format!("d.{column}"), *column));
    }

    // Auxiliary one-hop CTEs, fixed order: subject, personal details, biobank.
    let root_has_pd_child = root
        .children
        .iter()
        .any(|child| matches!(child, ComposedChild::PersonalDetails(_)));
    if request.wants_subject && kind != EntityKind::Subject {
        let join = graph.lookup_join(kind, EntityKind::Subject)?;
        ctes.push(Cte {
            alias: "s".to_string(),
            expression: "s AS (SELECT id, code, sex, personal_info FROM subject)".to_string(),
            join: format!(
                "LEFT JOIN {table} AS {alias} ON {alias}.\"{child_col}\" = d.id LEFT JOIN s ON s.id = {alias}.\"{parent_col}\"",
                table = join.table,
                alias = join.alias,
                child_col = join.child_column,
                parent_col = join.parent_column,
            ),
            kind: EntityKind::Subject,
            label: None,
            get_metadata: false,
        });
        fields.push(SelectField::plain("s.code", "code"));
        fields.push(SelectField::plain("s.sex", "sex"));
        if request.wants_personal_info {
            ctes.push(personal_details_cte("s.personal_info"));
            push_personal_details_fields(&mut fields);
        }
    }
    if kind == EntityKind::Subject && request.wants_personal_info {
        if !root_has_pd_child {
            ctes.push(personal_details_cte("d.personal_info"));
        }
        push_personal_details_fields(&mut fields);
    }
    if kind == EntityKind::Sample {
        ctes.push(Cte {
            alias: "bb".to_string(),
            expression: "bb AS (SELECT id, biobank_id, acronym, name FROM biobank)".to_string(),
            join: "LEFT JOIN bb ON bb.id = d.biobank".to_string(),
            kind: EntityKind::Sample,
            label: None,
            get_metadata: false,
        });
        fields.push(SelectField {
            expr: "bb.acronym".to_string(),
            output: Some("biobank_acronym"),
            key: "biobank_acronym".to_string(),
        });
    }

    let mut ordinal = 0;
    collect_ctes(&root, graph, request.leaf_search, &mut ctes, &mut ordinal)?;

    if request.leaf_search {
        for cte in &ctes {
            let Some(label) = &cte.label else { continue };
            fields.push(SelectField::plain(
                format!("{}.id", cte.alias),
                format!("{label}_id"),
            ));
            if cte.get_metadata {
                fields.push(SelectField::plain(
                    format!("{}.metadata", cte.alias),
                    label.clone(),
                ));
                match cte.kind {
                    EntityKind::Sample => {
                        fields.push(SelectField::plain(
                            format!("{}.biobank_code", cte.alias),
                            format!("{label}_biobank_code"),
                        ));
                    }
                    EntityKind::Subject => {
                        fields.push(SelectField::plain(
                            format!("{}.code", cte.alias),
                            format!("{label}_code"),
                        ));
                        fields.push(SelectField::plain(
                            format!("{}.sex", cte.alias),
                            format!("{label}_sex"),
                        ));
                    }
                    EntityKind::Data => {}
                }
            }
        }
    }
    fields.push(SelectField::plain("d.metadata", "metadata"));

    let select = if request.leaf_search {
        let pairs: Vec<String> = fields
            .iter()
            .map(|field| format!("'{}', {}", field.key, field.expr))
            .collect();
        format!(
            "SELECT array_agg(json_build_object({})) AS parents FROM {} d",
            pairs.join(", "),
            descriptor.table
        )
    } else {
        let columns: Vec<String> = fields
            .iter()
            .map(|field| match field.output {
                Some(name) => format!("{} AS {name}", field.expr),
                None => field.expr.clone(),
            })
            .collect();
        format!(
            "SELECT DISTINCT {} FROM {} d",
            columns.join(", "),
            descriptor.table
        )
    };

    // Row mode needs an explicit GROUP BY once a labeled CTE is in play.
    let group_by = if !request.leaf_search && ctes.iter().any(|cte| cte.label.is_some()) {
        let columns: Vec<&str> = fields.iter().map(|field| field.expr.as_str()).collect();
        Some(format!("GROUP BY {}", columns.join(", ")))
    } else {
        None
    };

    let mut statement = String::new();
    if !ctes.is_empty() {
        statement.push_str("WITH ");
        let expressions: Vec<&str> = ctes.iter().map(|cte| cte.expression.as_str()).collect();
        statement.push_str(&expressions.join(", "));
        statement.push(' ');
    }
    statement.push_str(&select);
    for cte in &ctes {
        statement.push(' ');
        statement.push_str(&cte.join);
    }
    statement.push(' ');
    statement.push_str(&root.where_clause);
    if let Some(group_by) = group_by {
        statement.push(' ');
        statement.push_str(&group_by);
    }
    statement.push(';');

    Ok(ParameterizedQuery {
        statement,
        parameters: alloc.into_parameters(),
    })
}

fn personal_details_cte(owner_column: &str) -> Cte {
    Cte {
        alias: "pd".to_string(),
        expression: "pd AS (SELECT id, given_name, surname, birth_date FROM personal_details)"
            .to_string(),
        join: format!("LEFT JOIN pd ON pd.id = {owner_column}"),
        kind: EntityKind::Subject,
        label: None,
        get_metadata: false,
    }
}

fn push_personal_details_fields(fields: &mut Vec<SelectField>) {
    fields.push(SelectField::plain("pd.given_name", "given_name"));
    fields.push(SelectField::plain("pd.surname", "surname"));
    fields.push(SelectField::plain("pd.birth_date", "birth_date"));
}
