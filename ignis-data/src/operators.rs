use serde_json::Value;

use ignis_core::IgnisError;

/// The closed set of filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Like,
    Ilike,
    Between,
    Contains,
    IsNull,
    Exists,
    And,
    Or,
}

impl QueryOperator {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "eq" => Self::Eq,
            "neq" => Self::Neq,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "in" => Self::In,
            "nin" => Self::Nin,
            "like" => Self::Like,
            "ilike" => Self::Ilike,
            "between" => Self::Between,
            "contains" => Self::Contains,
            "isNull" => Self::IsNull,
            "exists" => Self::Exists,
            "and" => Self::And,
            "or" => Self::Or,
            _ => return None,
        })
    }

    /// `and`/`or` group predicates and are recursed, not dispatched.
    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    /// Whether the operator compares numerically, which triggers the
    /// numeric-safe cast on JSON-path expressions.
    pub fn is_numeric_comparison(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }

    /// Compile `column <op> value` into a predicate fragment, pushing bind
    /// values onto `params`. Placeholders are numbered from the current
    /// length of `params`.
    pub fn compile(
        self,
        column: &str,
        value: &Value,
        params: &mut Vec<Value>,
    ) -> Result<String, IgnisError> {
        match self {
            Self::Eq => Ok(match value {
                Value::Null => format!("{column} IS NULL"),
                _ => format!("{column} = {}", push(params, value)),
            }),
            Self::Neq => Ok(match value {
                Value::Null => format!("{column} IS NOT NULL"),
                _ => format!("{column} != {}", push(params, value)),
            }),
            Self::Gt => Ok(format!("{column} > {}", push(params, value))),
            Self::Gte => Ok(format!("{column} >= {}", push(params, value))),
            Self::Lt => Ok(format!("{column} < {}", push(params, value))),
            Self::Lte => Ok(format!("{column} <= {}", push(params, value))),
            Self::In => match value.as_array() {
                Some(items) if items.is_empty() => Ok("FALSE".to_string()),
                Some(items) => Ok(format!("{column} IN ({})", push_list(params, items))),
                None => Err(IgnisError::query_invalid(format!(
                    "Operator 'in' on column '{column}' expects an array"
                ))),
            },
            Self::Nin => match value.as_array() {
                Some(items) if items.is_empty() => Ok("TRUE".to_string()),
                Some(items) => Ok(format!("{column} NOT IN ({})", push_list(params, items))),
                None => Err(IgnisError::query_invalid(format!(
                    "Operator 'nin' on column '{column}' expects an array"
                ))),
            },
            Self::Like => Ok(format!("{column} LIKE {}", push(params, value))),
            Self::Ilike => Ok(format!("{column} ILIKE {}", push(params, value))),
            Self::Between => match value.as_array() {
                Some(bounds) if bounds.len() == 2 => Ok(format!(
                    "{column} BETWEEN {} AND {}",
                    push(params, &bounds[0]),
                    push(params, &bounds[1])
                )),
                _ => Err(IgnisError::query_invalid(format!(
                    "Operator 'between' on column '{column}' expects [low, high]"
                ))),
            },
            Self::Contains => Ok(format!("{column} @> {}", push(params, value))),
            Self::IsNull => Ok(if truthy(value) {
                format!("{column} IS NULL")
            } else {
                format!("{column} IS NOT NULL")
            }),
            Self::Exists => Ok(if truthy(value) {
                format!("{column} IS NOT NULL")
            } else {
                format!("{column} IS NULL")
            }),
            Self::And | Self::Or => Err(IgnisError::query_invalid(format!(
                "Logical operator inside a column predicate on '{column}'"
            ))),
        }
    }
}

fn push(params: &mut Vec<Value>, value: &Value) -> String {
    params.push(value.clone());
    format!("${}", params.len())
}

fn push_list(params: &mut Vec<Value>, items: &[Value]) -> String {
    items
        .iter()
        .map(|item| push(params, item))
        .collect::<Vec<_>>()
        .join(", ")
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
