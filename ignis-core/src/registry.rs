use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde_json::Value;

use crate::controller::RouteConfig;

/// Controller annotation data: mount path plus opaque mount options.
#[derive(Debug, Clone)]
pub struct ControllerMetadata {
    pub name: String,
    pub path: String,
    pub mount_options: Option<Value>,
}

/// Model settings recorded at registration time.
#[derive(Debug, Clone, Default)]
pub struct ModelSettings {
    /// Filter transparently merged into every query against the model.
    pub default_filter: Option<Value>,
    /// Properties stripped from projections unless explicitly selected.
    pub hidden_properties: HashSet<String>,
    pub skip_migrate: bool,
}

/// Model annotation data: name, backing table, and settings.
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    pub name: String,
    pub table: String,
    pub settings: ModelSettings,
}

/// Process-wide store of controller/model/route annotations.
///
/// Populated while artifacts register themselves, read during wiring.
/// Lookup misses return `None`; the registry never errors. Re-registering
/// the same target overwrites the previous entry (last write wins).
#[derive(Default)]
pub struct MetadataRegistry {
    controllers: DashMap<String, Arc<ControllerMetadata>>,
    models_by_name: DashMap<String, Arc<ModelMetadata>>,
    models_by_table: DashMap<String, Arc<ModelMetadata>>,
    /// Insertion-ordered `method_name -> config` per controller.
    routes: DashMap<String, Vec<(String, RouteConfig)>>,
}

static GLOBAL: OnceLock<MetadataRegistry> = OnceLock::new();

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry instance.
    pub fn global() -> &'static MetadataRegistry {
        GLOBAL.get_or_init(MetadataRegistry::new)
    }

    pub fn set_controller_metadata(&self, target: &str, metadata: ControllerMetadata) {
        self.controllers.insert(target.to_string(), Arc::new(metadata));
    }

    pub fn controller_metadata(&self, target: &str) -> Option<Arc<ControllerMetadata>> {
        self.controllers.get(target).map(|e| e.value().clone())
    }

    pub fn set_model_metadata(&self, metadata: ModelMetadata) {
        let entry = Arc::new(metadata);
        self.models_by_name.insert(entry.name.clone(), entry.clone());
        self.models_by_table.insert(entry.table.clone(), entry);
    }

    /// Model entry by model name.
    pub fn model_by_name(&self, name: &str) -> Option<Arc<ModelMetadata>> {
        self.models_by_name.get(name).map(|e| e.value().clone())
    }

    /// Model entry by backing table name. O(1).
    pub fn model_by_table(&self, table: &str) -> Option<Arc<ModelMetadata>> {
        self.models_by_table.get(table).map(|e| e.value().clone())
    }

    /// Record a route annotation for `target`. A re-registration of the same
    /// method name replaces the config in place, keeping its position.
    pub fn set_route_metadata(&self, target: &str, method_name: &str, config: RouteConfig) {
        let mut entry = self.routes.entry(target.to_string()).or_default();
        if let Some(existing) = entry.iter_mut().find(|(name, _)| name == method_name) {
            existing.1 = config;
        } else {
            entry.push((method_name.to_string(), config));
        }
    }

    /// Route annotations for `target`, in registration order.
    pub fn routes(&self, target: &str) -> Vec<(String, RouteConfig)> {
        self.routes
            .get(target)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Drop every entry. Intended for shutdown and test isolation.
    pub fn clear(&self) {
        self.controllers.clear();
        self.models_by_name.clear();
        self.models_by_table.clear();
        self.routes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn controller_metadata_last_write_wins() {
        let registry = MetadataRegistry::new();
        registry.set_controller_metadata(
            "UserController",
            ControllerMetadata {
                name: "UserController".into(),
                path: "/users".into(),
                mount_options: None,
            },
        );
        registry.set_controller_metadata(
            "UserController",
            ControllerMetadata {
                name: "UserController".into(),
                path: "/v2/users".into(),
                mount_options: Some(json!({"deprecated": false})),
            },
        );
        let entry = registry.controller_metadata("UserController").unwrap();
        assert_eq!(entry.path, "/v2/users");
    }

    #[test]
    fn lookup_miss_is_none_not_error() {
        let registry = MetadataRegistry::new();
        assert!(registry.controller_metadata("Nope").is_none());
        assert!(registry.model_by_name("Nope").is_none());
        assert!(registry.model_by_table("nope").is_none());
        assert!(registry.routes("Nope").is_empty());
    }

    #[test]
    fn model_entry_indexed_by_name_and_table() {
        let registry = MetadataRegistry::new();
        registry.set_model_metadata(ModelMetadata {
            name: "User".into(),
            table: "users".into(),
            settings: ModelSettings {
                default_filter: Some(json!({"where": {"isDeleted": false}})),
                hidden_properties: ["password"].iter().map(|s| s.to_string()).collect(),
                skip_migrate: false,
            },
        });
        let by_name = registry.model_by_name("User").unwrap();
        let by_table = registry.model_by_table("users").unwrap();
        assert_eq!(by_name.table, "users");
        assert!(by_table.settings.hidden_properties.contains("password"));
    }

    #[test]
    fn routes_preserve_insertion_order() {
        let registry = MetadataRegistry::new();
        for name in ["find", "create", "deleteById"] {
            registry.set_route_metadata(
                "UserController",
                name,
                RouteConfig::new("get", format!("/{name}")),
            );
        }
        let names: Vec<_> = registry
            .routes("UserController")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["find", "create", "deleteById"]);
    }

    #[test]
    fn route_re_registration_replaces_in_place() {
        let registry = MetadataRegistry::new();
        registry.set_route_metadata("C", "a", RouteConfig::new("get", "/a"));
        registry.set_route_metadata("C", "b", RouteConfig::new("get", "/b"));
        registry.set_route_metadata("C", "a", RouteConfig::new("post", "/a2"));
        let routes = registry.routes("C");
        assert_eq!(routes[0].0, "a");
        assert_eq!(routes[0].1.method, "post");
        assert_eq!(routes[1].0, "b");
    }
}
