use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use serde_json::{Map, Value};
use tracing::debug;

use ignis_core::{IgnisError, MetadataRegistry};

use crate::builder::{render_count, render_select, FilterBuilder, QuerySpec};
use crate::datasource::{Connector, DataSource, IsolationLevel, Row, Transaction};
use crate::filter::Filter;
use crate::merge::merge;
use crate::schema::{Model, SchemaRegistry};

/// The `{data, count}` result envelope shared by every repository call.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DataEnvelope<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// Per-call options recognized by every repository operation.
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Route statements through this transaction's connector.
    pub transaction: Option<Transaction>,
    /// Run the user filter alone, without the model's default filter.
    /// Honored on read paths.
    pub skip_default_filter: bool,
    /// Whether mutations fetch the affected rows back. Defaults to true.
    pub should_return: Option<bool>,
}

impl CallOptions {
    pub fn in_transaction(transaction: Transaction) -> Self {
        Self {
            transaction: Some(transaction),
            ..Self::default()
        }
    }

    fn returning(&self) -> bool {
        self.should_return.unwrap_or(true)
    }
}

/// Default CRUD repository over a [`DataSource`] and an entity model.
///
/// Stateless beyond the cached default-filter reference; safe to share
/// across requests. The default filter is looked up through the model
/// registry on first use and cached for the repository's lifetime.
pub struct Repository<M: Model> {
    data_source: Arc<dyn DataSource>,
    schemas: Arc<SchemaRegistry>,
    registry: Arc<MetadataRegistry>,
    default_filter: OnceLock<Option<Filter>>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Model> Repository<M> {
    pub fn new(
        data_source: Arc<dyn DataSource>,
        schemas: Arc<SchemaRegistry>,
        registry: Arc<MetadataRegistry>,
    ) -> Self {
        Self {
            data_source,
            schemas,
            registry,
            default_filter: OnceLock::new(),
            _marker: PhantomData,
        }
    }

    /// Compose the effective query spec for a find-style call. Exposed so
    /// richer data-source adapters can consume relation includes.
    pub fn compose_query(
        &self,
        filter: Option<&Filter>,
        options: &CallOptions,
    ) -> Result<QuerySpec, IgnisError> {
        let effective = self.effective_filter(filter, options);
        let schema = M::schema();
        FilterBuilder::new(self.schemas.as_ref()).build(&schema, &effective)
    }

    pub async fn find(
        &self,
        filter: Option<&Filter>,
        options: &CallOptions,
    ) -> Result<DataEnvelope<Vec<Row>>, IgnisError> {
        let spec = self.compose_query(filter, options)?;
        let sql = render_select(&M::schema().table, &spec);
        debug!(model = M::model_name(), sql = %sql, "find");
        let rows = self.connector(options).execute(&sql, &spec.params).await?;
        let count = rows.len() as u64;
        Ok(DataEnvelope {
            data: rows,
            count: Some(count),
        })
    }

    pub async fn find_one(
        &self,
        filter: Option<&Filter>,
        options: &CallOptions,
    ) -> Result<DataEnvelope<Option<Row>>, IgnisError> {
        let mut spec = self.compose_query(filter, options)?;
        // Limit is forced in the compiled spec, after merge.
        spec.limit = Some(1);
        let sql = render_select(&M::schema().table, &spec);
        let rows = self.connector(options).execute(&sql, &spec.params).await?;
        Ok(DataEnvelope {
            data: rows.into_iter().next(),
            count: None,
        })
    }

    pub async fn find_by_id(
        &self,
        id: &Value,
        filter: Option<&Filter>,
        options: &CallOptions,
    ) -> Result<DataEnvelope<Option<Row>>, IgnisError> {
        let schema = M::schema();
        let mut effective = self.effective_filter(filter, options);
        let mut where_ = effective.where_.take().unwrap_or_default();
        where_.insert(schema.id_column.clone(), id.clone());
        effective.where_ = Some(where_);

        let mut spec = FilterBuilder::new(self.schemas.as_ref()).build(&schema, &effective)?;
        spec.limit = Some(1);
        let sql = render_select(&schema.table, &spec);
        let rows = self.connector(options).execute(&sql, &spec.params).await?;
        Ok(DataEnvelope {
            data: rows.into_iter().next(),
            count: None,
        })
    }

    pub async fn create(
        &self,
        data: &Row,
        options: &CallOptions,
    ) -> Result<DataEnvelope<Value>, IgnisError> {
        let schema = M::schema();
        let mut params = Vec::new();
        let (columns, placeholders) = insert_clauses(&schema, data, &mut params)?;
        let mut sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            schema.table
        );

        if options.returning() {
            sql.push_str(" RETURNING *");
            let rows = self.connector(options).execute(&sql, &params).await?;
            let created = rows
                .into_iter()
                .next()
                .map(Value::Object)
                .unwrap_or_else(|| Value::Object(data.clone()));
            Ok(DataEnvelope {
                data: created,
                count: Some(1),
            })
        } else {
            let count = self.connector(options).execute_update(&sql, &params).await?;
            Ok(DataEnvelope {
                data: Value::Object(data.clone()),
                count: Some(count),
            })
        }
    }

    pub async fn create_all(
        &self,
        items: &[Row],
        options: &CallOptions,
    ) -> Result<DataEnvelope<Vec<Row>>, IgnisError> {
        if items.is_empty() {
            return Ok(DataEnvelope {
                data: Vec::new(),
                count: Some(0),
            });
        }
        let schema = M::schema();
        let column_names: Vec<&String> = items[0].keys().collect();
        for item in items {
            if item.keys().ne(column_names.iter().copied()) {
                return Err(IgnisError::query_invalid(
                    "createAll requires a uniform column set across records",
                ));
            }
        }

        let mut params = Vec::new();
        let (columns, _) = insert_clauses(&schema, &items[0], &mut Vec::new())?;
        let mut tuples = Vec::with_capacity(items.len());
        for item in items {
            let placeholders: Vec<String> = item
                .values()
                .map(|value| {
                    params.push(value.clone());
                    format!("${}", params.len())
                })
                .collect();
            tuples.push(format!("({})", placeholders.join(", ")));
        }
        let mut sql = format!(
            "INSERT INTO {} ({columns}) VALUES {}",
            schema.table,
            tuples.join(", ")
        );

        if options.returning() {
            sql.push_str(" RETURNING *");
            let rows = self.connector(options).execute(&sql, &params).await?;
            let count = rows.len() as u64;
            Ok(DataEnvelope {
                data: rows,
                count: Some(count),
            })
        } else {
            let count = self.connector(options).execute_update(&sql, &params).await?;
            Ok(DataEnvelope {
                data: Vec::new(),
                count: Some(count),
            })
        }
    }

    pub async fn update_by_id(
        &self,
        id: &Value,
        data: &Row,
        options: &CallOptions,
    ) -> Result<DataEnvelope<Option<Row>>, IgnisError> {
        let schema = M::schema();
        let mut params = Vec::new();
        let set = set_clauses(&schema, data, &mut params)?;
        params.push(id.clone());
        let mut sql = format!(
            "UPDATE {} SET {set} WHERE {} = ${}",
            schema.table,
            schema.id_column,
            params.len()
        );

        if options.returning() {
            sql.push_str(" RETURNING *");
            let rows = self.connector(options).execute(&sql, &params).await?;
            let count = rows.len() as u64;
            Ok(DataEnvelope {
                data: rows.into_iter().next(),
                count: Some(count),
            })
        } else {
            let count = self.connector(options).execute_update(&sql, &params).await?;
            Ok(DataEnvelope {
                data: None,
                count: Some(count),
            })
        }
    }

    pub async fn update_where(
        &self,
        where_: &Map<String, Value>,
        data: &Row,
        options: &CallOptions,
    ) -> Result<DataEnvelope<u64>, IgnisError> {
        let schema = M::schema();
        let mut params = Vec::new();
        let set = set_clauses(&schema, data, &mut params)?;
        // Placeholder numbering continues across SET and WHERE.
        let predicate =
            FilterBuilder::new(self.schemas.as_ref()).compile_where(&schema, where_, &mut params)?;
        let mut sql = format!("UPDATE {} SET {set}", schema.table);
        if let Some(predicate) = predicate {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }
        let count = self.connector(options).execute_update(&sql, &params).await?;
        Ok(DataEnvelope {
            data: count,
            count: Some(count),
        })
    }

    pub async fn delete_by_id(
        &self,
        id: &Value,
        options: &CallOptions,
    ) -> Result<DataEnvelope<u64>, IgnisError> {
        let schema = M::schema();
        let params = vec![id.clone()];
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            schema.table, schema.id_column
        );
        let count = self.connector(options).execute_update(&sql, &params).await?;
        Ok(DataEnvelope {
            data: count,
            count: Some(count),
        })
    }

    pub async fn delete_where(
        &self,
        where_: &Map<String, Value>,
        options: &CallOptions,
    ) -> Result<DataEnvelope<u64>, IgnisError> {
        let schema = M::schema();
        let mut params = Vec::new();
        let predicate =
            FilterBuilder::new(self.schemas.as_ref()).compile_where(&schema, where_, &mut params)?;
        let mut sql = format!("DELETE FROM {}", schema.table);
        if let Some(predicate) = predicate {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }
        let count = self.connector(options).execute_update(&sql, &params).await?;
        Ok(DataEnvelope {
            data: count,
            count: Some(count),
        })
    }

    pub async fn count(
        &self,
        where_: Option<&Map<String, Value>>,
        options: &CallOptions,
    ) -> Result<DataEnvelope<u64>, IgnisError> {
        let user = where_.map(|w| Filter::where_only(w.clone()));
        let effective = self.effective_filter(user.as_ref(), options);
        let schema = M::schema();
        let spec = FilterBuilder::new(self.schemas.as_ref()).build(&schema, &effective)?;
        let sql = render_count(&schema.table, &spec);
        let rows = self.connector(options).execute(&sql, &spec.params).await?;
        let count = rows
            .first()
            .and_then(|row| row.values().next())
            .and_then(parse_count)
            .unwrap_or(0);
        Ok(DataEnvelope {
            data: count,
            count: Some(count),
        })
    }

    pub async fn begin_transaction(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> Result<Transaction, IgnisError> {
        self.data_source.begin_transaction(isolation).await
    }

    fn connector(&self, options: &CallOptions) -> Arc<dyn Connector> {
        match &options.transaction {
            Some(transaction) => transaction.connector(),
            None => self.data_source.connector(),
        }
    }

    fn effective_filter(&self, user: Option<&Filter>, options: &CallOptions) -> Filter {
        if options.skip_default_filter {
            return user.cloned().unwrap_or_default();
        }
        merge(self.default_filter(), user)
    }

    fn default_filter(&self) -> Option<&Filter> {
        self.default_filter
            .get_or_init(|| {
                self.registry
                    .model_by_table(&M::schema().table)
                    .and_then(|entry| entry.settings.default_filter.clone())
                    .and_then(|value| Filter::parse(&value).ok())
            })
            .as_ref()
    }
}

fn insert_clauses(
    schema: &crate::schema::ModelSchema,
    data: &Row,
    params: &mut Vec<Value>,
) -> Result<(String, String), IgnisError> {
    if data.is_empty() {
        return Err(IgnisError::query_invalid("Insert data must not be empty"));
    }
    let mut columns = Vec::with_capacity(data.len());
    let mut placeholders = Vec::with_capacity(data.len());
    for (key, value) in data {
        let column = schema
            .column(key)
            .ok_or_else(|| IgnisError::query_invalid(format!("Unknown column '{key}'")))?;
        columns.push(column.name.clone());
        params.push(value.clone());
        placeholders.push(format!("${}", params.len()));
    }
    Ok((columns.join(", "), placeholders.join(", ")))
}

fn set_clauses(
    schema: &crate::schema::ModelSchema,
    data: &Row,
    params: &mut Vec<Value>,
) -> Result<String, IgnisError> {
    if data.is_empty() {
        return Err(IgnisError::query_invalid("Update data must not be empty"));
    }
    let mut clauses = Vec::with_capacity(data.len());
    for (key, value) in data {
        let column = schema
            .column(key)
            .ok_or_else(|| IgnisError::query_invalid(format!("Unknown column '{key}'")))?;
        params.push(value.clone());
        clauses.push(format!("{} = ${}", column.name, params.len()));
    }
    Ok(clauses.join(", "))
}

fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
