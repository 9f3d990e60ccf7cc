//! Criteria tree: the caller-facing search AST.
//!
//! A search request is a nested tree rooted at a [`NestedCriteria`] node.
//! Inner nodes pivot to another entity kind through the junction registry;
//! leaves predicate on JSONB metadata attributes; specialized nodes predicate
//! on real columns of a kind's table; personal-details nodes predicate on the
//! one-hop `personal_details` table. The compiler never mutates the tree.
//!
//! Node kinds are not tagged in the wire format; they are recognized by which
//! keys are present, so criteria deserialize straight from the caller's JSON.

use serde::de::{self, Deserialize, Deserializer};
use serde_json::Value as JsonValue;

use crate::graph::EntityKind;

/// Declared type of a metadata attribute, which doubles as the SQL cast
/// applied to extracted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
}

impl FieldType {
    /// SQL cast name for extracted text values.
    pub fn cast(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
        }
    }
}

/// Boolean connective applied between a node's direct children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
pub enum Junction {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl Junction {
    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            Junction::And => "AND",
            Junction::Or => "OR",
        }
    }
}

/// Entity type filter of a nested node: one data-type id or any of a list.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(untagged)]
pub enum DataTypeFilter {
    Many(Vec<i64>),
    One(i64),
}

/// A leaf operand: one scalar or a list, depending on the comparator.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Many(Vec<JsonValue>),
    One(JsonValue),
}

/// A metadata attribute predicate.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafCriterion {
    /// Metadata attribute name, always bound as a parameter.
    pub field_name: String,
    /// Declared attribute type, used for casts and value coercion.
    pub field_type: FieldType,
    /// Comparator keyword; must be on the allow-list.
    pub comparator: String,
    /// Right-hand operand(s).
    pub field_value: FieldValue,
    /// Unit constraint, compiled as an extra conjunct.
    #[serde(default)]
    pub field_unit: Option<String>,
    /// The operand is a list to expand into positional placeholders.
    #[serde(default)]
    pub is_list: bool,
    /// The attribute is a loop (repeated values under a `values` array).
    #[serde(default)]
    pub is_in_loop: bool,
    /// Upper-case bound string literals at compile time.
    #[serde(default)]
    pub case_insensitive: bool,
}

/// A predicate over real columns of an entity table (not metadata).
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecializedCriterion {
    /// Which entity kind's specialized columns this node addresses.
    #[serde(rename = "specializedQuery")]
    pub kind: EntityKind,
    #[serde(default)]
    pub code: Option<FieldValue>,
    #[serde(default)]
    pub code_comparator: Option<String>,
    #[serde(default)]
    pub sex: Option<FieldValue>,
    #[serde(default)]
    pub sex_comparator: Option<String>,
    #[serde(default)]
    pub biobank: Option<FieldValue>,
    #[serde(default)]
    pub biobank_comparator: Option<String>,
    #[serde(default)]
    pub biobank_code: Option<FieldValue>,
    #[serde(default)]
    pub biobank_code_comparator: Option<String>,
}

impl SpecializedCriterion {
    /// Populated (value, comparator, column) triples, restricted to the
    /// columns the node's kind actually owns and in fixed column order.
    pub(crate) fn bindings(&self) -> Vec<(&FieldValue, Option<&str>, &'static str)> {
        let columns: &[(&Option<FieldValue>, &Option<String>, &'static str)] = match self.kind {
            EntityKind::Subject => &[
                (&self.code, &self.code_comparator, "code"),
                (&self.sex, &self.sex_comparator, "sex"),
            ],
            EntityKind::Sample => &[
                (&self.biobank, &self.biobank_comparator, "biobank"),
                (&self.biobank_code, &self.biobank_code_comparator, "biobank_code"),
            ],
            EntityKind::Data => &[],
        };
        columns
            .iter()
            .filter_map(|(value, comparator, column)| {
                value
                    .as_ref()
                    .map(|v| (v, comparator.as_deref(), *column))
            })
            .collect()
    }
}

/// A predicate over the one-hop `personal_details` table.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalDetailsCriterion {
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub surname_comparator: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub given_name_comparator: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub birth_date_comparator: Option<String>,
}

impl PersonalDetailsCriterion {
    /// Populated (value, comparator, column, fold-case) tuples in fixed
    /// column order. Birth dates are never case-folded.
    pub(crate) fn bindings(&self) -> Vec<(&str, Option<&str>, &'static str, bool)> {
        let columns: [(&Option<String>, &Option<String>, &'static str, bool); 3] = [
            (&self.surname, &self.surname_comparator, "surname", true),
            (&self.given_name, &self.given_name_comparator, "given_name", true),
            (&self.birth_date, &self.birth_date_comparator, "birth_date", false),
        ];
        columns
            .into_iter()
            .filter_map(|(value, comparator, column, fold)| {
                value
                    .as_deref()
                    .map(|v| (v, comparator.as_deref(), column, fold))
            })
            .collect()
    }
}

/// An inner node pivoting to (possibly another) entity kind.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedCriteria {
    /// Entity type id(s) the node matches.
    pub data_type: DataTypeFilter,
    /// Entity kind of the matched rows.
    pub model: EntityKind,
    /// Connective between the node's direct children.
    #[serde(default)]
    pub junction: Junction,
    /// Projection label; labeled CTEs surface their columns in leaf-search
    /// results.
    #[serde(default)]
    pub label: Option<String>,
    /// Project the node's metadata column alongside its id.
    #[serde(default)]
    pub get_metadata: bool,
    /// Child criteria.
    #[serde(default)]
    pub content: Vec<Criterion>,
}

/// One node of the criteria tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    /// Pivot to another entity kind through a junction table.
    Nested(Box<NestedCriteria>),
    /// Predicate on the one-hop personal-details table.
    PersonalDetails(PersonalDetailsCriterion),
    /// Predicate on real columns of an entity table.
    Specialized(SpecializedCriterion),
    /// Predicate on a metadata attribute.
    Leaf(LeafCriterion),
    /// A node with no recognizable predicate; compiles to nothing.
    Empty,
}

impl<'de> Deserialize<'de> for Criterion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        let object = value
            .as_object()
            .ok_or_else(|| de::Error::custom("criterion must be a JSON object"))?;
        if object.is_empty() {
            return Ok(Criterion::Empty);
        }
        if object.contains_key("dataType") {
            return serde_json::from_value(value)
                .map(|n| Criterion::Nested(Box::new(n)))
                .map_err(de::Error::custom);
        }
        if object.get("personalDetails").and_then(JsonValue::as_bool) == Some(true) {
            return serde_json::from_value(value)
                .map(Criterion::PersonalDetails)
                .map_err(de::Error::custom);
        }
        if object.contains_key("specializedQuery") {
            return serde_json::from_value(value)
                .map(Criterion::Specialized)
                .map_err(de::Error::custom);
        }
        if object.contains_key("fieldName") {
            return serde_json::from_value(value)
                .map(Criterion::Leaf)
                .map_err(de::Error::custom);
        }
        // No recognizable keys at all: treat like an empty node rather than
        // failing the whole request.
        Ok(Criterion::Empty)
    }
}

/// A complete search request: the root criteria node plus projection options.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Root of the criteria tree.
    #[serde(flatten)]
    pub criteria: NestedCriteria,
    /// Join the owning subject and project its code and sex (non-Subject
    /// roots only).
    #[serde(default)]
    pub wants_subject: bool,
    /// Also project personal-details columns.
    #[serde(default)]
    pub wants_personal_info: bool,
    /// Aggregate matches into one `parents` JSON array instead of distinct
    /// rows.
    #[serde(default)]
    pub leaf_search: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leaf_is_recognized_by_field_name() {
        let parsed: Criterion = serde_json::from_value(json!({
            "fieldName": "diagnosis",
            "fieldType": "text",
            "comparator": "=",
            "fieldValue": "M26.3"
        }))
        .unwrap();
        let Criterion::Leaf(leaf) = parsed else {
            panic!("expected a leaf");
        };
        assert_eq!(leaf.field_name, "diagnosis");
        assert_eq!(leaf.field_type, FieldType::Text);
        assert!(!leaf.is_list);
        assert_eq!(leaf.field_value, FieldValue::One(json!("M26.3")));
    }

    #[test]
    fn nested_is_recognized_by_data_type() {
        let parsed: Criterion = serde_json::from_value(json!({
            "dataType": 3,
            "model": "Sample",
            "junction": "OR",
            "content": [{}]
        }))
        .unwrap();
        let Criterion::Nested(node) = parsed else {
            panic!("expected a nested node");
        };
        assert_eq!(node.data_type, DataTypeFilter::One(3));
        assert_eq!(node.model, EntityKind::Sample);
        assert_eq!(node.junction, Junction::Or);
        assert_eq!(node.content, vec![Criterion::Empty]);
    }

    #[test]
    fn personal_details_flag_wins_over_leaf_keys() {
        let parsed: Criterion = serde_json::from_value(json!({
            "personalDetails": true,
            "surname": "Rossi",
            "surnameComparator": "LIKE"
        }))
        .unwrap();
        assert!(matches!(parsed, Criterion::PersonalDetails(_)));
    }

    #[test]
    fn specialized_without_properties_is_still_specialized() {
        let parsed: Criterion =
            serde_json::from_value(json!({"specializedQuery": "Sample"})).unwrap();
        let Criterion::Specialized(node) = parsed else {
            panic!("expected a specialized node");
        };
        assert_eq!(node.kind, EntityKind::Sample);
        assert!(node.bindings().is_empty());
    }

    #[test]
    fn empty_object_is_an_empty_criterion() {
        let parsed: Criterion = serde_json::from_value(json!({})).unwrap();
        assert_eq!(parsed, Criterion::Empty);
    }

    #[test]
    fn specialized_bindings_ignore_columns_of_other_kinds() {
        let node = SpecializedCriterion {
            kind: EntityKind::Subject,
            code: Some(FieldValue::One(json!("PAT002"))),
            code_comparator: Some("LIKE".to_string()),
            sex: None,
            sex_comparator: None,
            biobank: Some(FieldValue::One(json!(1))),
            biobank_comparator: None,
            biobank_code: None,
            biobank_code_comparator: None,
        };
        let bindings = node.bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].2, "code");
    }

    #[test]
    fn request_deserializes_with_flattened_root() {
        let request: QueryRequest = serde_json::from_value(json!({
            "dataType": 1,
            "model": "Data",
            "wantsSubject": true,
            "leafSearch": true,
            "content": []
        }))
        .unwrap();
        assert!(request.wants_subject);
        assert!(request.leaf_search);
        assert!(!request.wants_personal_info);
        assert_eq!(request.criteria.model, EntityKind::Data);
    }

    #[test]
    fn data_type_list_deserializes_as_many() {
        let filter: DataTypeFilter = serde_json::from_value(json!([1, 2, 3])).unwrap();
        assert_eq!(filter, DataTypeFilter::Many(vec![1, 2, 3]));
    }
}
