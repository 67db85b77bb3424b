use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use ignis_core::IgnisError;

/// The declarative filter shape accepted by the query builder.
///
/// `where` is a recursive tree of column predicates, `and`/`or` groups and
/// operator objects. Absence of a field (`None`) and an explicit `null`
/// inside `where` are distinct: absence preserves a default during merge,
/// `null` overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Filter {
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_: Option<Map<String, Value>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_seq"
    )]
    pub order: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Fields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<Include>>,
}

impl Filter {
    /// Parse a filter from its JSON representation.
    pub fn parse(value: &Value) -> Result<Self, IgnisError> {
        serde_json::from_value(value.clone())
            .map_err(|e| IgnisError::query_invalid(format!("Invalid filter: {e}")))
    }

    /// Convenience constructor for a where-only filter.
    pub fn where_only(where_: Map<String, Value>) -> Self {
        Self {
            where_: Some(where_),
            ..Self::default()
        }
    }

    /// The effective row offset: `offset` wins over its `skip` alias.
    pub fn effective_offset(&self) -> Option<u64> {
        self.offset.or(self.skip)
    }
}

/// Field selection: an ordered sequence of names, or a map `field → bool`
/// where truthy means "include".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fields {
    List(Vec<String>),
    Map(Map<String, Value>),
}

impl Fields {
    /// Normalize to the ordered list of selected fields.
    pub fn selected(&self) -> Vec<String> {
        match self {
            Fields::List(names) => names.clone(),
            Fields::Map(map) => map
                .iter()
                .filter(|(_, v)| is_truthy(v))
                .map(|(k, _)| k.clone())
                .collect(),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// A relation include request: a bare relation name or a scoped form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Include {
    Relation(String),
    Scoped(IncludeScope),
}

impl Include {
    pub fn relation(&self) -> &str {
        match self {
            Include::Relation(name) => name,
            Include::Scoped(scope) => &scope.relation,
        }
    }

    pub fn scope(&self) -> Option<&Filter> {
        match self {
            Include::Relation(_) => None,
            Include::Scoped(scoped) => scoped.scope.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeScope {
    pub relation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Box<Filter>>,
}

/// Accept either `"field ASC"` or `["a ASC", "b DESC"]` for `order`.
fn string_or_seq<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => None,
        Some(OneOrMany::One(s)) => Some(vec![s]),
        Some(OneOrMany::Many(v)) => Some(v),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_filter_shape() {
        let filter = Filter::parse(&json!({
            "where": {"status": "active", "age": {"gte": 18}},
            "order": ["createdAt DESC"],
            "limit": 10,
            "skip": 5,
            "fields": ["id", "name"],
            "include": ["posts", {"relation": "profile", "scope": {"limit": 1}}]
        }))
        .unwrap();

        assert_eq!(filter.limit, Some(10));
        assert_eq!(filter.effective_offset(), Some(5));
        assert_eq!(filter.order.as_deref(), Some(&["createdAt DESC".to_string()][..]));
        let include = filter.include.unwrap();
        assert_eq!(include[0].relation(), "posts");
        assert_eq!(include[1].relation(), "profile");
        assert_eq!(include[1].scope().unwrap().limit, Some(1));
    }

    #[test]
    fn order_accepts_single_string() {
        let filter = Filter::parse(&json!({"order": "id ASC"})).unwrap();
        assert_eq!(filter.order.as_deref(), Some(&["id ASC".to_string()][..]));
    }

    #[test]
    fn fields_map_keeps_only_truthy() {
        let filter = Filter::parse(&json!({
            "fields": {"id": true, "name": 1, "password": false, "notes": null}
        }))
        .unwrap();
        assert_eq!(
            filter.fields.unwrap().selected(),
            vec!["id".to_string(), "name".to_string()]
        );
    }

    #[test]
    fn fields_list_preserves_order() {
        let filter = Filter::parse(&json!({"fields": ["b", "a", "c"]})).unwrap();
        assert_eq!(
            filter.fields.unwrap().selected(),
            vec!["b".to_string(), "a".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn offset_wins_over_skip() {
        let filter = Filter::parse(&json!({"offset": 3, "skip": 9})).unwrap();
        assert_eq!(filter.effective_offset(), Some(3));
    }

    #[test]
    fn invalid_shape_is_query_invalid() {
        let err = Filter::parse(&json!({"limit": "ten"})).unwrap_err();
        assert_eq!(err.kind, ignis_core::ErrorKind::QueryInvalid);
    }
}
