//! Predicate compilation strategies.
//!
//! A strategy turns one leaf or specialized criterion into a SQL fragment
//! plus bound parameters. [`PathStrategy`] extracts attribute values with
//! `->`/`->>` and casts them; [`ContainmentStrategy`] prefers JSONB `@>`
//! probes where the comparator allows, falling back to path extraction for
//! ranges, pattern matches, and membership lists. The strategy is chosen once
//! per builder, never per node.
//!
//! Comparator keywords are the only node-supplied text interpolated into the
//! statement, so both strategies check the allow-list before emitting
//! anything.

use serde_json::{Value as JsonValue, json};

use crate::error::{QueryError, QueryResult};
use crate::query::allocator::ParamAllocator;
use crate::types::criteria::{
    FieldType, FieldValue, LeafCriterion, PersonalDetailsCriterion, SpecializedCriterion,
};
use crate::types::metadata::MetadataValue;
use crate::types::params::SqlValue;

/// Comparators the compiler will interpolate. Everything else is rejected
/// before any SQL text is produced.
pub const ALLOWED_COMPARATORS: &[&str] = &[
    "=", "<>", "<", ">", "<=", ">=", "LIKE", "NOT LIKE", "ILIKE", "NOT ILIKE", "IN", "NOT IN",
    "?&", "?|",
];

fn ensure_allowed(comparator: &str) -> QueryResult<()> {
    if ALLOWED_COMPARATORS.contains(&comparator) {
        Ok(())
    } else {
        Err(QueryError::InvalidComparator {
            comparator: comparator.to_string(),
        })
    }
}

/// Resolves an optional comparator, defaulting when absent and rejecting
/// anything off the allow-list when present.
fn resolve_comparator<'a>(given: Option<&'a str>, default: &'static str) -> QueryResult<&'a str> {
    match given {
        Some(comparator) => {
            ensure_allowed(comparator)?;
            Ok(comparator)
        }
        None => Ok(default),
    }
}

fn malformed(message: impl Into<String>) -> QueryError {
    QueryError::MalformedCriteria {
        message: message.into(),
    }
}

fn scalar_operand(leaf: &LeafCriterion) -> QueryResult<&JsonValue> {
    match &leaf.field_value {
        FieldValue::One(value) => Ok(value),
        FieldValue::Many(_) => Err(malformed(format!(
            "attribute {:?}: comparator {:?} takes a single value",
            leaf.field_name, leaf.comparator
        ))),
    }
}

fn list_operand(leaf: &LeafCriterion) -> QueryResult<&[JsonValue]> {
    match &leaf.field_value {
        FieldValue::Many(values) if !values.is_empty() => Ok(values),
        FieldValue::Many(_) => Err(malformed(format!(
            "attribute {:?}: empty value list",
            leaf.field_name
        ))),
        FieldValue::One(_) => Err(malformed(format!(
            "attribute {:?}: comparator {:?} takes a list of values",
            leaf.field_name, leaf.comparator
        ))),
    }
}

/// Coerces a leaf operand to its declared field type, for containment probe
/// documents whose JSON scalar type must match the stored one.
fn coerce(value: &JsonValue, field_type: FieldType, fold_case: bool) -> QueryResult<JsonValue> {
    match field_type {
        FieldType::Integer => match value {
            JsonValue::Number(n) if n.as_i64().is_some() => Ok(value.clone()),
            JsonValue::String(s) => s
                .parse::<i64>()
                .map(JsonValue::from)
                .map_err(|_| malformed(format!("{s:?} is not an integer"))),
            other => Err(malformed(format!("{other} is not an integer"))),
        },
        FieldType::Float => match value {
            JsonValue::Number(_) => Ok(value.clone()),
            JsonValue::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .ok_or_else(|| malformed(format!("{s:?} is not a number"))),
            other => Err(malformed(format!("{other} is not a number"))),
        },
        FieldType::Boolean => match value {
            JsonValue::Bool(_) => Ok(value.clone()),
            JsonValue::String(s) => Ok(JsonValue::Bool(s.eq_ignore_ascii_case("true"))),
            other => Err(malformed(format!("{other} is not a boolean"))),
        },
        FieldType::Text | FieldType::Date => match value {
            JsonValue::String(s) if fold_case => Ok(JsonValue::String(s.to_uppercase())),
            JsonValue::String(_) => Ok(value.clone()),
            other => Err(malformed(format!("{other} is not a string"))),
        },
    }
}

/// Bound literal for path-extracted comparisons: values pass through as
/// given, except that case-insensitive text is upper-cased at compile time.
fn extracted_literal(value: &JsonValue, fold_case: bool) -> SqlValue {
    match value {
        JsonValue::String(s) if fold_case => SqlValue::Text(s.to_uppercase()),
        other => SqlValue::from_json_scalar(other),
    }
}

/// Items of a `?|` right-hand `text[]` operand.
fn text_items(leaf: &LeafCriterion) -> QueryResult<Vec<String>> {
    list_operand(leaf)?
        .iter()
        .map(|value| match value {
            JsonValue::String(s) if leaf.case_insensitive => Ok(s.to_uppercase()),
            JsonValue::String(s) => Ok(s.clone()),
            JsonValue::Number(n) => Ok(n.to_string()),
            other => Err(malformed(format!("{other} is not usable in a text array"))),
        })
        .collect()
}

fn containment_probe(field: &str, value: &MetadataValue) -> JsonValue {
    json!({ field: value })
}

fn fold_case(leaf: &LeafCriterion) -> bool {
    leaf.case_insensitive && leaf.field_type == FieldType::Text
}

/// `(prefix metadata->$name->>'value')::cast cmp rhs`
fn extraction(prefix: &str, name_placeholder: &str, cast: &str, comparator: &str, rhs: &str) -> String {
    format!("({prefix}metadata->{name_placeholder}->>'value')::{cast} {comparator} {rhs}")
}

/// Existential sub-select over the elements of a loop attribute.
fn loop_exists(
    prefix: &str,
    name_placeholder: &str,
    element: &str,
    comparator: &str,
    rhs: &str,
) -> String {
    format!(
        "EXISTS (SELECT 1 FROM jsonb_array_elements_text({prefix}metadata->{name_placeholder}->'values') WHERE {element} {comparator} {rhs})"
    )
}

/// Compiles one leaf or specialized node into a WHERE-clause fragment.
///
/// `prefix` is the owning table's qualifier (`"d."` at the root, empty inside
/// a CTE body). A `None` fragment means the node contributes no predicate.
pub trait PredicateCompiler: Send + Sync {
    fn compile_leaf(
        &self,
        leaf: &LeafCriterion,
        prefix: &str,
        alloc: &mut ParamAllocator,
    ) -> QueryResult<Option<String>>;

    fn compile_specialized(
        &self,
        node: &SpecializedCriterion,
        prefix: &str,
        alloc: &mut ParamAllocator,
    ) -> QueryResult<Option<String>> {
        compile_specialized_columns(node, prefix, alloc)
    }
}

/// Strategy that always extracts attribute values with `->>` and casts them.
#[derive(Debug, Default)]
pub struct PathStrategy;

/// Strategy that compiles equality-shaped predicates to JSONB `@>` probes.
#[derive(Debug, Default)]
pub struct ContainmentStrategy;

impl PredicateCompiler for PathStrategy {
    fn compile_leaf(
        &self,
        leaf: &LeafCriterion,
        prefix: &str,
        alloc: &mut ParamAllocator,
    ) -> QueryResult<Option<String>> {
        ensure_allowed(&leaf.comparator)?;
        let fold = fold_case(leaf);
        let cast = leaf.field_type.cast();
        let name = alloc.bind(SqlValue::Text(leaf.field_name.clone()));

        let mut clause = if leaf.is_in_loop {
            compile_loop_extraction(leaf, prefix, &name, alloc)?
        } else if leaf.is_list {
            let placeholders: Vec<String> = list_operand(leaf)?
                .iter()
                .map(|value| alloc.bind(extracted_literal(value, fold)))
                .collect();
            extraction(
                prefix,
                &name,
                cast,
                &leaf.comparator,
                &format!("({})", placeholders.join(",")),
            )
        } else {
            let placeholder = alloc.bind(extracted_literal(scalar_operand(leaf)?, fold));
            extraction(prefix, &name, cast, &leaf.comparator, &placeholder)
        };

        if let Some(unit) = &leaf.field_unit {
            let unit_placeholder = alloc.bind(SqlValue::Text(unit.clone()));
            clause.push_str(&format!(
                " AND ({prefix}metadata->{name}->>'unit')::text LIKE {unit_placeholder}"
            ));
        }
        Ok(Some(clause))
    }
}

impl PredicateCompiler for ContainmentStrategy {
    fn compile_leaf(
        &self,
        leaf: &LeafCriterion,
        prefix: &str,
        alloc: &mut ParamAllocator,
    ) -> QueryResult<Option<String>> {
        ensure_allowed(&leaf.comparator)?;
        if leaf.is_in_loop {
            return compile_loop_containment(leaf, prefix, alloc).map(Some);
        }

        let fold = fold_case(leaf);
        let cast = leaf.field_type.cast();
        let clause = match leaf.comparator.as_str() {
            "=" | "<>" => {
                let coerced = coerce(scalar_operand(leaf)?, leaf.field_type, fold)?;
                let probe = alloc.bind(SqlValue::Json(containment_probe(
                    &leaf.field_name,
                    &MetadataValue::value(coerced),
                )));
                let negation = if leaf.comparator == "<>" { "NOT " } else { "" };
                let mut clause = format!("{negation}{prefix}metadata @> {probe}");
                append_unit_probe(leaf, prefix, alloc, &mut clause);
                clause
            }
            "IN" | "NOT IN" => {
                let name = alloc.bind(SqlValue::Text(leaf.field_name.clone()));
                let placeholders: Vec<String> = list_operand(leaf)?
                    .iter()
                    .map(|value| alloc.bind(extracted_literal(value, fold)))
                    .collect();
                let mut clause = extraction(
                    prefix,
                    &name,
                    cast,
                    &leaf.comparator,
                    &format!("({})", placeholders.join(",")),
                );
                append_unit_probe(leaf, prefix, alloc, &mut clause);
                clause
            }
            "<" | ">" | "<=" | ">=" | "LIKE" | "NOT LIKE" | "ILIKE" | "NOT ILIKE" => {
                let name = alloc.bind(SqlValue::Text(leaf.field_name.clone()));
                let placeholder = alloc.bind(extracted_literal(scalar_operand(leaf)?, fold));
                let mut clause = extraction(prefix, &name, cast, &leaf.comparator, &placeholder);
                append_unit_probe(leaf, prefix, alloc, &mut clause);
                clause
            }
            other => {
                return Err(malformed(format!(
                    "attribute {:?}: comparator {other:?} only applies to loop attributes",
                    leaf.field_name
                )));
            }
        };
        Ok(Some(clause))
    }
}

/// Appends the unit-constraint conjunct as a containment probe.
fn append_unit_probe(
    leaf: &LeafCriterion,
    prefix: &str,
    alloc: &mut ParamAllocator,
    clause: &mut String,
) {
    if let Some(unit) = &leaf.field_unit {
        let probe = alloc.bind(SqlValue::Json(containment_probe(
            &leaf.field_name,
            &MetadataValue::unit(unit.clone()),
        )));
        clause.push_str(&format!(" AND {prefix}metadata @> {probe}"));
    }
}

/// Loop attribute handling shared shape for the path strategy: `?&`/`?|`
/// keep their native JSONB operators, everything else becomes an existential
/// scan of the `values` array. The attribute name placeholder is already
/// bound by the caller.
fn compile_loop_extraction(
    leaf: &LeafCriterion,
    prefix: &str,
    name: &str,
    alloc: &mut ParamAllocator,
) -> QueryResult<String> {
    match leaf.comparator.as_str() {
        "?&" | "?|" => {
            let placeholder = alloc.bind(SqlValue::TextArray(text_items(leaf)?));
            Ok(format!(
                "({prefix}metadata->{name}->'values' {} {placeholder})",
                leaf.comparator
            ))
        }
        "=" | "<>" | "<" | ">" | "<=" | ">=" | "LIKE" | "NOT LIKE" | "ILIKE" | "NOT ILIKE" => {
            let fold = fold_case(leaf);
            let placeholder = alloc.bind(extracted_literal(scalar_operand(leaf)?, fold));
            let element = format!("(value)::{}", leaf.field_type.cast());
            Ok(loop_exists(
                prefix,
                name,
                &element,
                &leaf.comparator,
                &placeholder,
            ))
        }
        other => Err(malformed(format!(
            "attribute {:?}: comparator {other:?} is not applicable to loop attributes",
            leaf.field_name
        ))),
    }
}

/// Loop attribute handling for the containment strategy.
fn compile_loop_containment(
    leaf: &LeafCriterion,
    prefix: &str,
    alloc: &mut ParamAllocator,
) -> QueryResult<String> {
    let fold = fold_case(leaf);
    match leaf.comparator.as_str() {
        // one required value: probe with a single-element values array
        "=" | "<>" => {
            let coerced = coerce(scalar_operand(leaf)?, leaf.field_type, fold)?;
            let probe = alloc.bind(SqlValue::Json(containment_probe(
                &leaf.field_name,
                &MetadataValue::values(vec![coerced]),
            )));
            let negation = if leaf.comparator == "<>" { "NOT " } else { "" };
            Ok(format!("{negation}{prefix}metadata @> {probe}"))
        }
        // all of the listed values must be present
        "?&" => {
            let coerced: Vec<JsonValue> = list_operand(leaf)?
                .iter()
                .map(|value| coerce(value, leaf.field_type, fold))
                .collect::<QueryResult<_>>()?;
            let probe = alloc.bind(SqlValue::Json(containment_probe(
                &leaf.field_name,
                &MetadataValue::values(coerced),
            )));
            Ok(format!("{prefix}metadata @> {probe}"))
        }
        // any of the listed values: native jsonb existence operator
        "?|" => {
            let name = alloc.bind(SqlValue::Text(leaf.field_name.clone()));
            let placeholder = alloc.bind(SqlValue::TextArray(text_items(leaf)?));
            Ok(format!("({prefix}metadata->{name}->'values' ?| {placeholder})"))
        }
        "<" | ">" | "<=" | ">=" | "LIKE" | "NOT LIKE" | "ILIKE" | "NOT ILIKE" => {
            let name = alloc.bind(SqlValue::Text(leaf.field_name.clone()));
            let placeholder = alloc.bind(extracted_literal(scalar_operand(leaf)?, fold));
            let element = if leaf.field_type == FieldType::Text {
                "value".to_string()
            } else {
                format!("(value)::{}", leaf.field_type.cast())
            };
            Ok(loop_exists(
                prefix,
                &name,
                &element,
                &leaf.comparator,
                &placeholder,
            ))
        }
        other => Err(malformed(format!(
            "attribute {:?}: comparator {other:?} is not applicable to loop attributes",
            leaf.field_name
        ))),
    }
}

/// Shared specialized-column compilation: both strategies predicate on real
/// table columns identically.
fn compile_specialized_columns(
    node: &SpecializedCriterion,
    prefix: &str,
    alloc: &mut ParamAllocator,
) -> QueryResult<Option<String>> {
    let mut clauses = Vec::new();
    for (value, comparator, column) in node.bindings() {
        match value {
            FieldValue::Many(items) => {
                let comparator = resolve_comparator(comparator, "IN")?;
                let placeholders: Vec<String> = items
                    .iter()
                    .map(|item| alloc.bind(SqlValue::from_json_scalar(item)))
                    .collect();
                clauses.push(format!(
                    "{prefix}{column} {comparator} ({})",
                    placeholders.join(",")
                ));
            }
            FieldValue::One(item) => {
                let comparator = resolve_comparator(comparator, "=")?;
                let placeholder = alloc.bind(SqlValue::from_json_scalar(item));
                clauses.push(format!("{prefix}{column} {comparator} {placeholder}"));
            }
        }
    }
    if clauses.is_empty() {
        Ok(None)
    } else {
        Ok(Some(clauses.join(" AND ")))
    }
}

/// The personal-details sub-select attached to a node, plus the predicate its
/// parent folds into its own WHERE clause.
#[derive(Debug, Clone)]
pub(crate) struct PersonalDetailsQuery {
    pub alias: String,
    pub select: &'static str,
    pub predicate: Option<String>,
}

/// Compiles a personal-details node. The alias is derived before the node's
/// parameters are bound, so nested aliases stay stable for a given tree.
///
/// At the root the predicate references the `pd` CTE, which the outer
/// statement joins. Inside a CTE body no such join is in scope, so the nested
/// form is a correlated sub-select over `personal_details` keyed on the
/// enclosing subject row's `personal_info` column.
pub(crate) fn compile_personal_details(
    node: &PersonalDetailsCriterion,
    nested: bool,
    alloc: &mut ParamAllocator,
) -> QueryResult<PersonalDetailsQuery> {
    let alias = if nested {
        format!("pd_{}", alloc.position().saturating_sub(1))
    } else {
        "pd".to_string()
    };
    let mut clauses = Vec::new();
    for (value, comparator, column, fold) in node.bindings() {
        let comparator = resolve_comparator(comparator, "=")?;
        let literal = if fold {
            value.to_uppercase()
        } else {
            value.to_string()
        };
        let placeholder = alloc.bind(SqlValue::Text(literal));
        clauses.push(format!("{alias}.{column} {comparator} {placeholder}"));
    }
    let predicate = if clauses.is_empty() {
        None
    } else if nested {
        Some(format!(
            "EXISTS (SELECT 1 FROM personal_details {alias} WHERE {alias}.id = personal_info AND {})",
            clauses.join(" AND ")
        ))
    } else {
        Some(clauses.join(" AND "))
    };
    Ok(PersonalDetailsQuery {
        alias,
        select: "SELECT id, given_name, surname, birth_date FROM personal_details",
        predicate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(comparator: &str, value: JsonValue) -> LeafCriterion {
        LeafCriterion {
            field_name: "mass".to_string(),
            field_type: FieldType::Float,
            comparator: comparator.to_string(),
            field_value: match value {
                JsonValue::Array(items) => FieldValue::Many(items),
                other => FieldValue::One(other),
            },
            field_unit: None,
            is_list: false,
            is_in_loop: false,
            case_insensitive: false,
        }
    }

    #[test]
    fn path_leaf_extracts_value_and_unit() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf(">=", json!("1.5"));
        criterion.field_unit = Some("M☉".to_string());
        let clause = PathStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap()
            .unwrap();
        assert_eq!(
            clause,
            "(d.metadata->$1->>'value')::float >= $2 AND (d.metadata->$1->>'unit')::text LIKE $3"
        );
        assert_eq!(
            alloc.into_parameters(),
            vec![
                SqlValue::Text("mass".to_string()),
                SqlValue::Text("1.5".to_string()),
                SqlValue::Text("M☉".to_string()),
            ]
        );
    }

    #[test]
    fn path_list_expands_into_positional_placeholders() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf("IN", json!(["a", "b", "c"]));
        criterion.field_type = FieldType::Text;
        criterion.is_list = true;
        let clause = PathStrategy
            .compile_leaf(&criterion, "", &mut alloc)
            .unwrap()
            .unwrap();
        assert_eq!(clause, "(metadata->$1->>'value')::text IN ($2,$3,$4)");
        assert_eq!(alloc.position(), 4);
    }

    #[test]
    fn rejected_comparator_produces_no_sql_and_binds_nothing() {
        let mut alloc = ParamAllocator::new();
        let criterion = leaf("= 1 OR 1=1 --", json!(1));
        let err = PathStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidComparator { .. }));
        assert_eq!(alloc.position(), 0);
    }

    #[test]
    fn containment_equality_builds_a_typed_probe() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf("=", json!("1.5"));
        criterion.field_unit = Some("kg".to_string());
        let clause = ContainmentStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap()
            .unwrap();
        assert_eq!(clause, "d.metadata @> $1 AND d.metadata @> $2");
        assert_eq!(
            alloc.into_parameters(),
            vec![
                SqlValue::Json(json!({"mass": {"value": 1.5}})),
                SqlValue::Json(json!({"mass": {"unit": "kg"}})),
            ]
        );
    }

    #[test]
    fn containment_inequality_negates_the_probe() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf("<>", json!("true"));
        criterion.field_name = "flag".to_string();
        criterion.field_type = FieldType::Boolean;
        let clause = ContainmentStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap()
            .unwrap();
        assert_eq!(clause, "NOT d.metadata @> $1");
        assert_eq!(
            alloc.into_parameters(),
            vec![SqlValue::Json(json!({"flag": {"value": true}}))]
        );
    }

    #[test]
    fn containment_case_insensitive_text_is_uppercased_in_the_probe() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf("=", json!("positive"));
        criterion.field_name = "status".to_string();
        criterion.field_type = FieldType::Text;
        criterion.case_insensitive = true;
        ContainmentStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap();
        assert_eq!(
            alloc.into_parameters(),
            vec![SqlValue::Json(json!({"status": {"value": "POSITIVE"}}))]
        );
    }

    #[test]
    fn containment_range_falls_back_to_extraction_with_unit_probe() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf(">=", json!("1.5"));
        criterion.field_unit = Some("M☉".to_string());
        let clause = ContainmentStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap()
            .unwrap();
        assert_eq!(
            clause,
            "(d.metadata->$1->>'value')::float >= $2 AND d.metadata @> $3"
        );
        assert_eq!(
            alloc.into_parameters(),
            vec![
                SqlValue::Text("mass".to_string()),
                SqlValue::Text("1.5".to_string()),
                SqlValue::Json(json!({"mass": {"unit": "M☉"}})),
            ]
        );
    }

    #[test]
    fn containment_membership_extracts_instead_of_oring_probes() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf("IN", json!(["a", "b"]));
        criterion.field_type = FieldType::Text;
        criterion.is_list = true;
        let clause = ContainmentStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap()
            .unwrap();
        assert_eq!(clause, "(d.metadata->$1->>'value')::text IN ($2,$3)");
    }

    #[test]
    fn loop_all_of_probes_with_a_values_array() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf("?&", json!(["X", "Y"]));
        criterion.field_name = "markers".to_string();
        criterion.field_type = FieldType::Text;
        criterion.is_in_loop = true;
        let clause = ContainmentStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap()
            .unwrap();
        assert_eq!(clause, "d.metadata @> $1");
        assert_eq!(
            alloc.into_parameters(),
            vec![SqlValue::Json(json!({"markers": {"values": ["X", "Y"]}}))]
        );
    }

    #[test]
    fn loop_any_of_binds_one_text_array_operand() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf("?|", json!(["X", "Y"]));
        criterion.field_name = "markers".to_string();
        criterion.field_type = FieldType::Text;
        criterion.is_in_loop = true;
        let clause = ContainmentStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap()
            .unwrap();
        assert_eq!(clause, "(d.metadata->$1->'values' ?| $2)");
        assert_eq!(
            alloc.into_parameters(),
            vec![
                SqlValue::Text("markers".to_string()),
                SqlValue::TextArray(vec!["X".to_string(), "Y".to_string()]),
            ]
        );
    }

    #[test]
    fn loop_pattern_match_scans_array_elements() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf("LIKE", json!("BRCA%"));
        criterion.field_name = "markers".to_string();
        criterion.field_type = FieldType::Text;
        criterion.is_in_loop = true;
        let clause = ContainmentStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap()
            .unwrap();
        assert_eq!(
            clause,
            "EXISTS (SELECT 1 FROM jsonb_array_elements_text(d.metadata->$1->'values') WHERE value LIKE $2)"
        );
    }

    #[test]
    fn path_loop_range_scans_array_elements_with_cast_and_unit() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf(">=", json!("1.5"));
        criterion.is_in_loop = true;
        criterion.field_unit = Some("M☉".to_string());
        let clause = PathStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap()
            .unwrap();
        assert_eq!(
            clause,
            "EXISTS (SELECT 1 FROM jsonb_array_elements_text(d.metadata->$1->'values') WHERE (value)::float >= $2) \
             AND (d.metadata->$1->>'unit')::text LIKE $3"
        );
        assert_eq!(
            alloc.into_parameters(),
            vec![
                SqlValue::Text("mass".to_string()),
                SqlValue::Text("1.5".to_string()),
                SqlValue::Text("M☉".to_string()),
            ]
        );
    }

    #[test]
    fn path_loop_any_of_binds_one_text_array_operand() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf("?|", json!(["X", "Y"]));
        criterion.field_name = "markers".to_string();
        criterion.field_type = FieldType::Text;
        criterion.is_in_loop = true;
        let clause = PathStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap()
            .unwrap();
        assert_eq!(clause, "(d.metadata->$1->'values' ?| $2)");
        assert_eq!(
            alloc.into_parameters(),
            vec![
                SqlValue::Text("markers".to_string()),
                SqlValue::TextArray(vec!["X".to_string(), "Y".to_string()]),
            ]
        );
    }

    #[test]
    fn path_loop_membership_comparator_is_rejected() {
        let mut alloc = ParamAllocator::new();
        let mut criterion = leaf("IN", json!(["X", "Y"]));
        criterion.is_in_loop = true;
        let err = PathStrategy
            .compile_leaf(&criterion, "d.", &mut alloc)
            .unwrap_err();
        assert!(matches!(err, QueryError::MalformedCriteria { .. }));
    }

    #[test]
    fn specialized_columns_default_comparators() {
        let node: SpecializedCriterion = serde_json::from_value(json!({
            "specializedQuery": "Subject",
            "code": "PAT002",
            "sex": ["M", "F"]
        }))
        .unwrap();
        let mut alloc = ParamAllocator::new();
        let clause = PathStrategy
            .compile_specialized(&node, "d.", &mut alloc)
            .unwrap()
            .unwrap();
        assert_eq!(clause, "d.code = $1 AND d.sex IN ($2,$3)");
    }

    #[test]
    fn specialized_disallowed_comparator_is_rejected() {
        let node: SpecializedCriterion = serde_json::from_value(json!({
            "specializedQuery": "Subject",
            "code": "PAT002",
            "codeComparator": "MATCHES"
        }))
        .unwrap();
        let mut alloc = ParamAllocator::new();
        let err = PathStrategy
            .compile_specialized(&node, "d.", &mut alloc)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidComparator { .. }));
    }

    #[test]
    fn personal_details_folds_names_but_not_dates() {
        let node: PersonalDetailsCriterion = serde_json::from_value(json!({
            "surname": "rossi",
            "surnameComparator": "LIKE",
            "givenName": "mario",
            "givenNameComparator": "NOT LIKE",
            "birthDate": "1980-01-01"
        }))
        .unwrap();
        let mut alloc = ParamAllocator::new();
        let compiled = compile_personal_details(&node, false, &mut alloc).unwrap();
        assert_eq!(compiled.alias, "pd");
        assert_eq!(
            compiled.predicate.as_deref(),
            Some("pd.surname LIKE $1 AND pd.given_name NOT LIKE $2 AND pd.birth_date = $3")
        );
        assert_eq!(
            alloc.into_parameters(),
            vec![
                SqlValue::Text("ROSSI".to_string()),
                SqlValue::Text("MARIO".to_string()),
                SqlValue::Text("1980-01-01".to_string()),
            ]
        );
    }

    #[test]
    fn nested_personal_details_correlates_instead_of_referencing_a_cte() {
        let node: PersonalDetailsCriterion = serde_json::from_value(json!({
            "surname": "rossi",
            "surnameComparator": "LIKE"
        }))
        .unwrap();
        let mut alloc = ParamAllocator::new();
        alloc.bind(SqlValue::Integer(1));
        alloc.bind(SqlValue::Integer(2));
        let compiled = compile_personal_details(&node, true, &mut alloc).unwrap();
        assert_eq!(compiled.alias, "pd_1");
        assert_eq!(
            compiled.predicate.as_deref(),
            Some(
                "EXISTS (SELECT 1 FROM personal_details pd_1 \
                 WHERE pd_1.id = personal_info AND pd_1.surname LIKE $3)"
            )
        );
        assert_eq!(
            alloc.into_parameters(),
            vec![
                SqlValue::Integer(1),
                SqlValue::Integer(2),
                SqlValue::Text("ROSSI".to_string()),
            ]
        );
    }
}
