//! Bound SQL parameter values and the compiled statement pair.

use postgres_types::ToSql;
use serde_json::Value as JsonValue;

static NULL_TEXT: Option<String> = None;

/// One bound positional parameter.
///
/// The compiler binds everything it interpolates except comparator keywords,
/// which are allow-listed instead; no caller-controlled text ever reaches the
/// statement string.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// A JSONB operand, e.g. a containment probe document.
    Json(JsonValue),
    /// A `text[]` operand, e.g. the right-hand side of `?|`.
    TextArray(Vec<String>),
    Null,
}

impl SqlValue {
    /// Maps a scalar JSON value onto the closest SQL parameter type.
    pub fn from_json_scalar(value: &JsonValue) -> SqlValue {
        match value {
            JsonValue::String(s) => SqlValue::Text(s.clone()),
            JsonValue::Bool(b) => SqlValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Integer(i)
                } else {
                    SqlValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            JsonValue::Null => SqlValue::Null,
            other => SqlValue::Json(other.clone()),
        }
    }

    /// Borrows the value as a driver parameter.
    pub fn as_param(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlValue::Text(v) => v,
            SqlValue::Integer(v) => v,
            SqlValue::Float(v) => v,
            SqlValue::Bool(v) => v,
            SqlValue::Json(v) => v,
            SqlValue::TextArray(v) => v,
            SqlValue::Null => &NULL_TEXT,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<JsonValue> for SqlValue {
    fn from(value: JsonValue) -> Self {
        SqlValue::Json(value)
    }
}

/// One compiled statement with its flat, ordered parameter list.
///
/// The parameter list length always equals the highest placeholder number in
/// the statement; `parameters[i]` binds `$(i + 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterizedQuery {
    /// The full SQL text, terminated by `;`.
    pub statement: String,
    /// Bound values in placeholder order.
    pub parameters: Vec<SqlValue>,
}

impl ParameterizedQuery {
    /// Parameter slice in the form the driver's `query`/`execute` take.
    pub fn sql_params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.parameters.iter().map(SqlValue::as_param).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_scalars_map_to_native_parameter_types() {
        assert_eq!(
            SqlValue::from_json_scalar(&json!("CPN-1")),
            SqlValue::Text("CPN-1".to_string())
        );
        assert_eq!(SqlValue::from_json_scalar(&json!(12)), SqlValue::Integer(12));
        assert_eq!(SqlValue::from_json_scalar(&json!(1.5)), SqlValue::Float(1.5));
        assert_eq!(SqlValue::from_json_scalar(&json!(true)), SqlValue::Bool(true));
        assert_eq!(SqlValue::from_json_scalar(&json!(null)), SqlValue::Null);
    }

    #[test]
    fn sql_params_preserves_order_and_length() {
        let query = ParameterizedQuery {
            statement: "SELECT 1 WHERE a = $1 AND b = $2;".to_string(),
            parameters: vec![SqlValue::Integer(1), SqlValue::Text("x".to_string())],
        };
        assert_eq!(query.sql_params().len(), query.parameters.len());
    }
}
