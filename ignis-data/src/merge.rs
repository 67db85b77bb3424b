use serde_json::{Map, Value};

use crate::filter::Filter;

/// Merge a model's default filter with a user-supplied filter.
///
/// `where` trees deep-merge with the user's leaves overriding. Every other
/// field takes the user's value whenever the user provided one — including
/// `0`, an empty sequence, or `null` inside `where` — and falls back to
/// the default otherwise.
pub fn merge(default: Option<&Filter>, user: Option<&Filter>) -> Filter {
    match (default, user) {
        (None, None) => Filter::default(),
        (Some(d), None) => d.clone(),
        (None, Some(u)) => u.clone(),
        (Some(d), Some(u)) => Filter {
            where_: merge_where(d.where_.as_ref(), u.where_.as_ref()),
            order: u.order.clone().or_else(|| d.order.clone()),
            limit: u.limit.or(d.limit),
            offset: u.offset.or(d.offset),
            skip: u.skip.or(d.skip),
            fields: u.fields.clone().or_else(|| d.fields.clone()),
            include: u.include.clone().or_else(|| d.include.clone()),
        },
    }
}

fn merge_where(
    default: Option<&Map<String, Value>>,
    user: Option<&Map<String, Value>>,
) -> Option<Map<String, Value>> {
    match (default, user) {
        (None, None) => None,
        (Some(d), None) => Some(d.clone()),
        (None, Some(u)) => Some(u.clone()),
        (Some(d), Some(u)) => Some(deep_merge_maps(d, u)),
    }
}

/// Deep-merge two JSON maps, user side winning at the leaves.
///
/// Objects merge recursively; arrays merge index-wise (the user element at
/// index `i` wins, the longer side's tail is preserved); everything else —
/// including an explicit `null` — is replaced by the user value. The maps
/// are plain string-keyed maps, so keys named `__proto__`, `constructor`
/// or `prototype` are ordinary entries with no shared state to pollute.
pub fn deep_merge_maps(default: &Map<String, Value>, user: &Map<String, Value>) -> Map<String, Value> {
    let mut out = default.clone();
    for (key, user_value) in user {
        match out.get_mut(key) {
            Some(existing) => {
                let merged = deep_merge_values(existing, user_value);
                *existing = merged;
            }
            None => {
                out.insert(key.clone(), user_value.clone());
            }
        }
    }
    out
}

fn deep_merge_values(default: &Value, user: &Value) -> Value {
    match (default, user) {
        (Value::Object(d), Value::Object(u)) => Value::Object(deep_merge_maps(d, u)),
        (Value::Array(d), Value::Array(u)) => {
            let len = d.len().max(u.len());
            let mut merged = Vec::with_capacity(len);
            for i in 0..len {
                match (d.get(i), u.get(i)) {
                    (Some(dv), Some(uv)) => merged.push(deep_merge_values(dv, uv)),
                    (None, Some(uv)) => merged.push(uv.clone()),
                    (Some(dv), None) => merged.push(dv.clone()),
                    (None, None) => unreachable!(),
                }
            }
            Value::Array(merged)
        }
        (_, user) => user.clone(),
    }
}
