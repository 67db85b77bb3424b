use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use ignis_core::{MetadataRegistry, ModelMetadata, ModelSettings};

/// Column data types the query compiler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Number,
    String,
    Uuid,
    Json,
    Jsonb,
    Date,
    Bool,
}

impl DataType {
    /// Whether JSON-path extraction is allowed on this column.
    pub fn is_json(self) -> bool {
        matches!(self, DataType::Json | DataType::Jsonb)
    }
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A named association to another model's table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub target_table: String,
}

/// Schema of one model: table, columns, hidden properties, and relations.
///
/// The column index is built lazily once per schema, so repeated where
/// compilation does not re-scan the column list.
#[derive(Debug)]
pub struct ModelSchema {
    pub table: String,
    pub id_column: String,
    pub columns: Vec<Column>,
    pub hidden: HashSet<String>,
    pub relations: HashMap<String, Relation>,
    index: OnceLock<HashMap<String, usize>>,
}

impl ModelSchema {
    pub fn new(table: impl Into<String>, id_column: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            table: table.into(),
            id_column: id_column.into(),
            columns,
            hidden: HashSet::new(),
            relations: HashMap::new(),
            index: OnceLock::new(),
        }
    }

    pub fn with_hidden(mut self, hidden: impl IntoIterator<Item = &'static str>) -> Self {
        self.hidden = hidden.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_relation(mut self, name: &str, target_table: &str) -> Self {
        self.relations.insert(
            name.to_string(),
            Relation {
                name: name.to_string(),
                target_table: target_table.to_string(),
            },
        );
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        let index = self.index.get_or_init(|| {
            self.columns
                .iter()
                .enumerate()
                .map(|(i, c)| (c.name.clone(), i))
                .collect()
        });
        index.get(name).map(|&i| &self.columns[i])
    }

    /// All column names in declaration order, minus hidden properties.
    pub fn visible_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !self.hidden.contains(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }
}

/// A persisted entity class: schema plus model-level settings.
pub trait Model: Send + Sync + 'static {
    fn model_name() -> &'static str;
    fn schema() -> Arc<ModelSchema>;

    /// Filter transparently merged into every query unless bypassed.
    fn default_filter() -> Option<Filter> {
        None
    }

    fn skip_migrate() -> bool {
        false
    }
}

/// Lookup of schemas by table name, used to resolve relation targets.
pub trait SchemaSource: Send + Sync {
    fn schema(&self, table: &str) -> Option<Arc<ModelSchema>>;
}

/// Registry of model schemas keyed by table name.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, Arc<ModelSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model: record its schema here and its metadata (settings,
    /// default filter, hidden properties) in the process metadata registry.
    pub fn register<M: Model>(&self, registry: &MetadataRegistry) {
        let schema = M::schema();
        registry.set_model_metadata(ModelMetadata {
            name: M::model_name().to_string(),
            table: schema.table.clone(),
            settings: ModelSettings {
                default_filter: M::default_filter()
                    .as_ref()
                    .and_then(|f| serde_json::to_value(f).ok()),
                hidden_properties: schema.hidden.iter().cloned().collect(),
                skip_migrate: M::skip_migrate(),
            },
        });
        self.schemas.insert(schema.table.clone(), schema);
    }

    /// Register a bare schema without model metadata (tests, adapters).
    pub fn insert(&self, schema: Arc<ModelSchema>) {
        self.schemas.insert(schema.table.clone(), schema);
    }
}

impl SchemaSource for SchemaRegistry {
    fn schema(&self, table: &str) -> Option<Arc<ModelSchema>> {
        self.schemas.get(table).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_schema() -> ModelSchema {
        ModelSchema::new(
            "users",
            "id",
            vec![
                Column::new("id", DataType::Uuid),
                Column::new("name", DataType::String),
                Column::new("password", DataType::String),
            ],
        )
        .with_hidden(["password"])
    }

    #[test]
    fn column_lookup_is_indexed() {
        let schema = users_schema();
        assert_eq!(schema.column("name").map(|c| c.data_type), Some(DataType::String));
        assert!(schema.column("missing").is_none());
    }

    #[test]
    fn visible_columns_exclude_hidden() {
        let schema = users_schema();
        assert_eq!(schema.visible_columns(), vec!["id", "name"]);
    }

    struct User;

    impl Model for User {
        fn model_name() -> &'static str {
            "User"
        }
        fn schema() -> Arc<ModelSchema> {
            static SCHEMA: OnceLock<Arc<ModelSchema>> = OnceLock::new();
            SCHEMA.get_or_init(|| Arc::new(users_schema())).clone()
        }
        fn default_filter() -> Option<Filter> {
            Filter::parse(&serde_json::json!({"where": {"isDeleted": false}})).ok()
        }
    }

    #[test]
    fn register_writes_schema_and_metadata() {
        let schemas = SchemaRegistry::new();
        let registry = MetadataRegistry::new();
        schemas.register::<User>(&registry);

        assert!(schemas.schema("users").is_some());
        let entry = registry.model_by_table("users").unwrap();
        assert_eq!(entry.name, "User");
        assert!(entry.settings.hidden_properties.contains("password"));
        assert!(entry.settings.default_filter.is_some());
    }
}
