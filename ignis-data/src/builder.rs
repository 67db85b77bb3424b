use serde_json::{Map, Value};

use ignis_core::IgnisError;

use crate::filter::{Filter, Include};
use crate::operators::QueryOperator;
use crate::schema::{ModelSchema, SchemaSource};

/// Opaque query spec consumed by the data-source adapter.
///
/// `where_sql` holds a predicate with `$n` placeholders bound to `params`
/// in order; `with` carries compiled relation includes, each with its own
/// placeholder numbering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub columns: Option<Vec<String>>,
    pub where_sql: Option<String>,
    pub params: Vec<Value>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub with: Vec<(String, QuerySpec)>,
}

/// Render a query spec as a SELECT statement.
pub fn render_select(table: &str, spec: &QuerySpec) -> String {
    let columns = spec
        .columns
        .as_ref()
        .map(|c| c.join(", "))
        .unwrap_or_else(|| "*".to_string());
    let mut sql = format!("SELECT {columns} FROM {table}");
    append_where_order_bounds(&mut sql, spec);
    sql
}

/// Render a query spec as a COUNT statement. Ordering and bounds do not
/// apply to counts.
pub fn render_count(table: &str, spec: &QuerySpec) -> String {
    let mut sql = format!("SELECT COUNT(*) AS count FROM {table}");
    if let Some(where_sql) = &spec.where_sql {
        sql.push_str(" WHERE ");
        sql.push_str(where_sql);
    }
    sql
}

fn append_where_order_bounds(sql: &mut String, spec: &QuerySpec) {
    if let Some(where_sql) = &spec.where_sql {
        sql.push_str(" WHERE ");
        sql.push_str(where_sql);
    }
    if !spec.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&spec.order_by.join(", "));
    }
    if let Some(limit) = spec.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = spec.offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }
}

/// Deterministic mapping `(schema, filter) → query spec`.
pub struct FilterBuilder<'s> {
    schemas: &'s dyn SchemaSource,
}

impl<'s> FilterBuilder<'s> {
    pub fn new(schemas: &'s dyn SchemaSource) -> Self {
        Self { schemas }
    }

    /// Compile a filter against a schema.
    pub fn build(&self, schema: &ModelSchema, filter: &Filter) -> Result<QuerySpec, IgnisError> {
        let mut params = Vec::new();
        let where_sql = match &filter.where_ {
            Some(map) => self.compile_where(schema, map, &mut params)?,
            None => None,
        };

        let columns = match filter.fields.as_ref().map(|f| f.selected()) {
            Some(fields) => Some(
                fields
                    .into_iter()
                    .filter(|f| !schema.hidden.contains(f))
                    .collect(),
            ),
            None if schema.hidden.is_empty() => None,
            None => Some(schema.visible_columns()),
        };

        let order_by = match &filter.order {
            Some(entries) => self.compile_order(schema, entries)?,
            None => Vec::new(),
        };

        let with = match &filter.include {
            Some(includes) => self.compile_include(schema, includes)?,
            None => Vec::new(),
        };

        Ok(QuerySpec {
            columns,
            where_sql,
            params,
            order_by,
            limit: filter.limit,
            offset: filter.effective_offset(),
            with,
        })
    }

    /// Compile a where tree into a predicate fragment, appending bind
    /// values to `params`. Returns `None` for an empty tree.
    pub fn compile_where(
        &self,
        schema: &ModelSchema,
        where_: &Map<String, Value>,
        params: &mut Vec<Value>,
    ) -> Result<Option<String>, IgnisError> {
        let mut fragments = Vec::new();
        for (key, value) in where_ {
            if let Some(fragment) = self.compile_entry(schema, key, value, params)? {
                fragments.push(fragment);
            }
        }
        Ok(match fragments.len() {
            0 => None,
            1 => Some(fragments.remove(0)),
            _ => Some(fragments.join(" AND ")),
        })
    }

    fn compile_entry(
        &self,
        schema: &ModelSchema,
        key: &str,
        value: &Value,
        params: &mut Vec<Value>,
    ) -> Result<Option<String>, IgnisError> {
        if let Some(op) = QueryOperator::parse(key) {
            if op.is_logical() {
                return self.compile_group(schema, key, value, params);
            }
        }
        if key.contains('.') || key.contains('[') {
            return self.compile_json_path(schema, key, value, params).map(Some);
        }
        self.compile_column(schema, key, value, params).map(Some)
    }

    /// `and`/`or`: normalize to a sequence, recurse, drop empty children,
    /// combine. A single surviving child collapses to itself.
    fn compile_group(
        &self,
        schema: &ModelSchema,
        group: &str,
        value: &Value,
        params: &mut Vec<Value>,
    ) -> Result<Option<String>, IgnisError> {
        let children: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![value],
            _ => {
                return Err(IgnisError::query_invalid(format!(
                    "Logical group '{group}' expects an object or an array of objects"
                )))
            }
        };

        let joiner = if group == "and" { " AND " } else { " OR " };
        let mut fragments = Vec::new();
        for child in children {
            let map = child.as_object().ok_or_else(|| {
                IgnisError::query_invalid(format!(
                    "Logical group '{group}' contains a non-object clause"
                ))
            })?;
            if let Some(fragment) = self.compile_where(schema, map, params)? {
                fragments.push(fragment);
            }
        }

        Ok(match fragments.len() {
            0 => None,
            1 => Some(fragments.remove(0)),
            _ => Some(format!(
                "({})",
                fragments
                    .into_iter()
                    .map(|f| format!("({f})"))
                    .collect::<Vec<_>>()
                    .join(joiner)
            )),
        })
    }

    fn compile_column(
        &self,
        schema: &ModelSchema,
        key: &str,
        value: &Value,
        params: &mut Vec<Value>,
    ) -> Result<String, IgnisError> {
        let column = schema
            .column(key)
            .ok_or_else(|| IgnisError::query_invalid(format!("Unknown column '{key}'")))?;
        self.compile_condition(&column.name, value, params)
    }

    /// JSON-path key: `metadata.createdAt`, `payload[items][0].id`, ...
    fn compile_json_path(
        &self,
        schema: &ModelSchema,
        key: &str,
        value: &Value,
        params: &mut Vec<Value>,
    ) -> Result<String, IgnisError> {
        let (column_name, segments) = parse_json_path(key)?;
        let column = schema
            .column(&column_name)
            .ok_or_else(|| IgnisError::query_invalid(format!("Unknown column '{column_name}'")))?;
        if !column.data_type.is_json() {
            return Err(IgnisError::query_invalid(format!(
                "JSON path on non-JSON column '{column_name}'"
            )));
        }

        let extract = format!("({} #>> '{{{}}}')", column.name, segments.join(","));
        let expr = if wants_numeric_cast(value) {
            numeric_cast(&extract)
        } else {
            extract
        };
        self.compile_condition(&expr, value, params)
    }

    /// Shared tail of column and JSON-path compilation: value-condition
    /// rule for primitives, operator dispatch for operator objects.
    fn compile_condition(
        &self,
        expr: &str,
        value: &Value,
        params: &mut Vec<Value>,
    ) -> Result<String, IgnisError> {
        if is_value_condition(value) {
            return compile_value_condition(expr, value, params);
        }

        let object = value.as_object().expect("operator object checked above");
        let mut parts = Vec::new();
        for (name, op_value) in object {
            let op = QueryOperator::parse(name).ok_or_else(|| {
                IgnisError::query_invalid(format!("Unknown operator '{name}'"))
            })?;
            if op.is_logical() {
                return Err(IgnisError::query_invalid(format!(
                    "Logical operator '{name}' is not valid inside a column predicate"
                )));
            }
            parts.push(op.compile(expr, op_value, params)?);
        }
        Ok(parts.join(" AND "))
    }

    /// `"<field> [ASC|DESC]"` entries. Direction defaults to ASC; any other
    /// token is invalid. JSON-path fields reuse the extraction expression.
    pub fn compile_order(
        &self,
        schema: &ModelSchema,
        entries: &[String],
    ) -> Result<Vec<String>, IgnisError> {
        let mut clauses = Vec::with_capacity(entries.len());
        for entry in entries {
            let tokens: Vec<&str> = entry.split_whitespace().collect();
            let (field, direction) = match tokens.as_slice() {
                [field] => (*field, "ASC"),
                [field, direction] => {
                    if direction.eq_ignore_ascii_case("ASC") {
                        (*field, "ASC")
                    } else if direction.eq_ignore_ascii_case("DESC") {
                        (*field, "DESC")
                    } else {
                        return Err(IgnisError::query_invalid(format!(
                            "Invalid sort direction '{direction}' in '{entry}'"
                        )));
                    }
                }
                _ => {
                    return Err(IgnisError::query_invalid(format!(
                        "Invalid order entry '{entry}'"
                    )))
                }
            };

            let expr = if field.contains('.') || field.contains('[') {
                let (column_name, segments) = parse_json_path(field)?;
                let column = schema.column(&column_name).ok_or_else(|| {
                    IgnisError::query_invalid(format!("Unknown column '{column_name}'"))
                })?;
                if !column.data_type.is_json() {
                    return Err(IgnisError::query_invalid(format!(
                        "JSON path on non-JSON column '{column_name}'"
                    )));
                }
                format!("({} #>> '{{{}}}')", column.name, segments.join(","))
            } else {
                schema
                    .column(field)
                    .ok_or_else(|| IgnisError::query_invalid(format!("Unknown column '{field}'")))?
                    .name
                    .clone()
            };
            clauses.push(format!("{expr} {direction}"));
        }
        Ok(clauses)
    }

    fn compile_include(
        &self,
        schema: &ModelSchema,
        includes: &[Include],
    ) -> Result<Vec<(String, QuerySpec)>, IgnisError> {
        let mut with = Vec::with_capacity(includes.len());
        for include in includes {
            let name = include.relation();
            let relation = schema.relations.get(name).ok_or_else(|| {
                IgnisError::query_invalid(format!("Unknown relation '{name}'"))
            })?;
            let target = self.schemas.schema(&relation.target_table).ok_or_else(|| {
                IgnisError::query_invalid(format!(
                    "Relation '{name}' targets unknown table '{}'",
                    relation.target_table
                ))
            })?;

            let spec = match include.scope() {
                // No scope and nothing hidden on the target: plain select-all.
                None if target.hidden.is_empty() => QuerySpec::default(),
                scope => {
                    let scope = scope.cloned().unwrap_or_default();
                    self.build(&target, &scope)?
                }
            };
            with.push((name.to_string(), spec));
        }
        Ok(with)
    }
}

fn is_value_condition(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        _ => true,
    }
}

fn compile_value_condition(
    expr: &str,
    value: &Value,
    params: &mut Vec<Value>,
) -> Result<String, IgnisError> {
    match value {
        Value::Null => Ok(format!("{expr} IS NULL")),
        Value::Array(items) if items.is_empty() => Ok("FALSE".to_string()),
        Value::Array(items) => {
            let placeholders: Vec<String> = items
                .iter()
                .map(|item| {
                    params.push(item.clone());
                    format!("${}", params.len())
                })
                .collect();
            Ok(format!("{expr} IN ({})", placeholders.join(", ")))
        }
        other => {
            params.push(other.clone());
            Ok(format!("{expr} = ${}", params.len()))
        }
    }
}

/// Split a JSON-path key into `(column, segments)`, validating each
/// segment against the strict identifier pattern.
fn parse_json_path(key: &str) -> Result<(String, Vec<String>), IgnisError> {
    let segments: Vec<&str> = key
        .split(['.', '[', ']'])
        .filter(|s| !s.is_empty())
        .collect();
    if segments.len() < 2 {
        return Err(IgnisError::query_invalid(format!(
            "Invalid JSON path '{key}'"
        )));
    }
    for segment in &segments {
        if !is_valid_segment(segment) {
            return Err(IgnisError::query_invalid(format!(
                "Invalid JSON path segment '{segment}' in '{key}'"
            )));
        }
    }
    let column = segments[0].to_string();
    let path = segments[1..].iter().map(|s| s.to_string()).collect();
    Ok((column, path))
}

/// Letters, digits, `_`, `-` (pure integers are a subset of this class).
fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Cast a text extraction to numeric, preserving NULL for non-numeric text.
fn numeric_cast(expr: &str) -> String {
    format!(r"(CASE WHEN {expr} ~ '^-?[0-9]+(\.[0-9]+)?$' THEN ({expr})::numeric ELSE NULL END)")
}
