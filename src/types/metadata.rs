//! Metadata attribute value descriptors.
//!
//! Every attribute stored under an entity's JSONB `metadata` column is either
//! a scalar (`{"value": v, "unit"?: u}`) or a loop of repeated values
//! (`{"values": [...], "units"?: [...]}`). The containment compilation
//! strategy serializes its `@>` probe documents through these types and the
//! EAV projector deserializes stored metadata through them, so the two sides
//! cannot drift apart.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One attribute value inside an entity's metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Repeated values of a loop attribute, with optional per-value units.
    Loop {
        /// The repeated values, in loop order.
        values: Vec<JsonValue>,
        /// Units aligned with `values`, when the attribute carries one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        units: Option<Vec<String>>,
    },
    /// A single scalar value with an optional unit.
    Scalar {
        /// The stored value; absent in unit-only probe documents.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<JsonValue>,
        /// Unit of measure, when the attribute carries one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
}

impl MetadataValue {
    /// Scalar descriptor carrying only a value.
    pub fn value(value: JsonValue) -> Self {
        MetadataValue::Scalar {
            value: Some(value),
            unit: None,
        }
    }

    /// Scalar descriptor carrying only a unit, used as a containment probe.
    pub fn unit(unit: impl Into<String>) -> Self {
        MetadataValue::Scalar {
            value: None,
            unit: Some(unit.into()),
        }
    }

    /// Loop descriptor carrying only values.
    pub fn values(values: Vec<JsonValue>) -> Self {
        MetadataValue::Loop {
            values,
            units: None,
        }
    }
}

/// A full metadata document, keyed by attribute name.
///
/// Ordered map so EAV projection and serialized output are deterministic.
pub type Metadata = BTreeMap<String, MetadataValue>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_with_unit_round_trips() {
        let parsed: MetadataValue =
            serde_json::from_value(json!({"value": 1.5, "unit": "mg"})).unwrap();
        assert_eq!(
            parsed,
            MetadataValue::Scalar {
                value: Some(json!(1.5)),
                unit: Some("mg".to_string()),
            }
        );
    }

    #[test]
    fn loop_shape_wins_over_scalar() {
        let parsed: MetadataValue =
            serde_json::from_value(json!({"values": ["a", "b"]})).unwrap();
        assert!(matches!(parsed, MetadataValue::Loop { .. }));
    }

    #[test]
    fn value_probe_serializes_without_unit_key() {
        let probe = serde_json::to_value(MetadataValue::value(json!(42))).unwrap();
        assert_eq!(probe, json!({"value": 42}));
    }

    #[test]
    fn unit_probe_serializes_without_value_key() {
        let probe = serde_json::to_value(MetadataValue::unit("mm")).unwrap();
        assert_eq!(probe, json!({"unit": "mm"}));
    }
}
