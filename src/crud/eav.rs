//! EAV projection of metadata documents.
//!
//! Besides the JSONB `metadata` column, every metadata attribute can be
//! mirrored into an entity-attribute-value catalogue: one `eav_attribute`
//! definition per (data type, attribute) and one row per stored value in the
//! type-specific table `eav_value_{field_type}_{entity_table}`. Projection is
//! by attribute name, so a metadata key must resolve to exactly one attribute
//! definition of the record's data type.

use deadpool_postgres::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{instrument, warn};

use crate::crud::CrudManager;
use crate::error::{CrudError, CrudResult};
use crate::graph::EntityKind;
use crate::types::metadata::{Metadata, MetadataValue};
use crate::types::params::SqlValue;

/// Declared type of an EAV attribute; selects the value table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EavFieldType {
    Text,
    Integer,
    Float,
    Date,
    Boolean,
}

impl EavFieldType {
    fn table_fragment(&self) -> &'static str {
        match self {
            EavFieldType::Text => "text",
            EavFieldType::Integer => "integer",
            EavFieldType::Float => "float",
            EavFieldType::Date => "date",
            EavFieldType::Boolean => "boolean",
        }
    }

    /// Only numeric attributes may carry a unit column.
    fn is_numeric(&self) -> bool {
        matches!(self, EavFieldType::Integer | EavFieldType::Float)
    }

    fn parse(name: &str) -> CrudResult<Self> {
        match name {
            "Text" => Ok(EavFieldType::Text),
            "Integer" => Ok(EavFieldType::Integer),
            "Float" => Ok(EavFieldType::Float),
            "Date" => Ok(EavFieldType::Date),
            "Boolean" => Ok(EavFieldType::Boolean),
            other => Err(CrudError::InvalidAttribute {
                message: format!("unknown field type {other:?}"),
            }),
        }
    }
}

/// One attribute definition of a data type's metadata schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeField {
    pub name: String,
    pub field_type: EavFieldType,
    #[serde(default)]
    pub has_unit: bool,
}

impl CrudManager {
    /// Registers the attribute definitions of a data type, inserting the
    /// missing ones. Returns the ids of all listed attributes.
    #[instrument(skip(self, fields))]
    pub async fn put_metadata_fields(
        &self,
        data_type: i64,
        fields: &[AttributeField],
    ) -> CrudResult<Vec<i64>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let mut ids = Vec::with_capacity(fields.len());
        for field in fields {
            let field_type = format!("{:?}", field.field_type);
            let existing = tx
                .query_opt(
                    "SELECT id FROM eav_attribute WHERE data_type = $1 AND name = $2",
                    &[&data_type, &field.name],
                )
                .await?;
            let id = match existing {
                Some(row) => row.get(0),
                None => tx
                    .query_one(
                        "INSERT INTO eav_attribute (data_type, name, field_type, has_unit, \
                         created_at, updated_at) VALUES ($1, $2, $3, $4, now(), now()) \
                         RETURNING id",
                        &[&data_type, &field.name, &field_type, &field.has_unit],
                    )
                    .await?
                    .get(0),
            };
            ids.push(id);
        }
        super::commit(tx).await?;
        Ok(ids)
    }

    /// Projects one record's metadata document into the EAV value tables.
    ///
    /// Each metadata key must match exactly one attribute definition of the
    /// record's data type; zero or multiple matches abort the transaction
    /// with [`CrudError::AmbiguousAttributeResolution`].
    #[instrument(skip(self, metadata), fields(kind = %kind))]
    pub async fn put_metadata_values(
        &self,
        kind: EntityKind,
        record_id: i64,
        data_type: i64,
        metadata: &Metadata,
    ) -> CrudResult<Vec<i64>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let mut ids = Vec::new();
        for (name, value) in metadata {
            let rows = tx
                .query(
                    "SELECT id, field_type, has_unit FROM eav_attribute \
                     WHERE data_type = $1 AND name = $2",
                    &[&data_type, &name.as_str()],
                )
                .await?;
            if rows.len() != 1 {
                return Err(CrudError::AmbiguousAttributeResolution {
                    name: name.clone(),
                    found: rows.len(),
                });
            }
            let attribute_id: i64 = rows[0].get(0);
            let field_type = EavFieldType::parse(rows[0].get(1))?;
            let has_unit: bool = rows[0].get(2);
            ids.extend(
                project_value(&tx, kind, record_id, attribute_id, field_type, has_unit, name, value)
                    .await?,
            );
        }
        super::commit(tx).await?;
        Ok(ids)
    }
}

#[allow(clippy::too_many_arguments)]
async fn project_value(
    tx: &Transaction<'_>,
    kind: EntityKind,
    record_id: i64,
    attribute_id: i64,
    field_type: EavFieldType,
    has_unit: bool,
    name: &str,
    value: &MetadataValue,
) -> CrudResult<Vec<i64>> {
    let table = format!("eav_value_{}_{}", field_type.table_fragment(), kind.table());
    let plain = format!(
        "INSERT INTO {table} (entity, attribute, value, created_at, updated_at) \
         VALUES ($1, $2, $3, now(), now()) RETURNING id"
    );
    let with_unit = format!(
        "INSERT INTO {table} (entity, attribute, value, unit, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, now(), now()) RETURNING id"
    );
    let mut ids = Vec::new();
    match value {
        MetadataValue::Scalar { value: None, .. } => {
            warn!(name, "metadata attribute has no value, skipping projection");
        }
        MetadataValue::Scalar {
            value: Some(value),
            unit,
        } => {
            let stored = eav_param(value, field_type)?;
            let row = match unit.as_deref().filter(|_| field_type.is_numeric() && has_unit) {
                Some(unit) => {
                    tx.query_one(&with_unit, &[&record_id, &attribute_id, stored.as_param(), &unit])
                        .await?
                }
                None => {
                    tx.query_one(&plain, &[&record_id, &attribute_id, stored.as_param()])
                        .await?
                }
            };
            ids.push(row.get(0));
        }
        MetadataValue::Loop { values, units } => {
            for (index, value) in values.iter().enumerate() {
                let stored = eav_param(value, field_type)?;
                let unit = units
                    .as_ref()
                    .and_then(|units| units.get(index))
                    .filter(|_| field_type.is_numeric() && has_unit);
                let row = match unit {
                    Some(unit) => {
                        tx.query_one(
                            &with_unit,
                            &[&record_id, &attribute_id, stored.as_param(), unit],
                        )
                        .await?
                    }
                    None => {
                        tx.query_one(&plain, &[&record_id, &attribute_id, stored.as_param()])
                            .await?
                    }
                };
                ids.push(row.get(0));
            }
        }
    }
    Ok(ids)
}

/// Converts a stored JSON value to the parameter type of its value table.
fn eav_param(value: &JsonValue, field_type: EavFieldType) -> CrudResult<SqlValue> {
    let mismatch = || CrudError::InvalidAttribute {
        message: format!("value {value} does not fit field type {field_type:?}"),
    };
    match field_type {
        EavFieldType::Integer => value
            .as_i64()
            .map(SqlValue::Integer)
            .ok_or_else(mismatch),
        EavFieldType::Float => value.as_f64().map(SqlValue::Float).ok_or_else(mismatch),
        EavFieldType::Boolean => value.as_bool().map(SqlValue::Bool).ok_or_else(mismatch),
        EavFieldType::Text | EavFieldType::Date => value
            .as_str()
            .map(|s| SqlValue::Text(s.to_string()))
            .ok_or_else(mismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_types_round_trip_their_catalogue_names() {
        for (name, field_type) in [
            ("Text", EavFieldType::Text),
            ("Integer", EavFieldType::Integer),
            ("Float", EavFieldType::Float),
            ("Date", EavFieldType::Date),
            ("Boolean", EavFieldType::Boolean),
        ] {
            assert_eq!(EavFieldType::parse(name).unwrap(), field_type);
            assert_eq!(format!("{field_type:?}"), name);
        }
        assert!(EavFieldType::parse("Blob").is_err());
    }

    #[test]
    fn only_numeric_types_carry_units() {
        assert!(EavFieldType::Integer.is_numeric());
        assert!(EavFieldType::Float.is_numeric());
        assert!(!EavFieldType::Text.is_numeric());
        assert!(!EavFieldType::Date.is_numeric());
    }

    #[test]
    fn eav_params_match_their_column_types() {
        assert_eq!(
            eav_param(&json!(3), EavFieldType::Integer).unwrap(),
            SqlValue::Integer(3)
        );
        assert_eq!(
            eav_param(&json!("2020-01-01"), EavFieldType::Date).unwrap(),
            SqlValue::Text("2020-01-01".to_string())
        );
        assert!(eav_param(&json!("three"), EavFieldType::Integer).is_err());
    }
}
