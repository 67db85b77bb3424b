use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use ignis_core::{Container, CurrentUser, IgnisError, RequestContext, Scope};

/// Container tag carried by every registered strategy binding.
pub const TAG_AUTH_STRATEGY: &str = "auth-strategy";

/// A named credential-extractor + verifier pair.
#[async_trait]
pub trait AuthStrategy: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Read credentials from the request. `None` means this strategy does
    /// not recognize the request at all.
    async fn extract_credentials(&self, ctx: &RequestContext) -> Option<Value>;

    /// Validate the request and return the user payload, or `None` when
    /// the credentials do not check out.
    async fn authenticate(&self, ctx: &RequestContext) -> Result<Option<CurrentUser>, IgnisError>;
}

/// Process-wide registry `name → strategy`.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: DashMap<String, Arc<dyn AuthStrategy>>,
}

static GLOBAL: OnceLock<StrategyRegistry> = OnceLock::new();

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static StrategyRegistry {
        GLOBAL.get_or_init(StrategyRegistry::new)
    }

    pub fn register(&self, strategy: Arc<dyn AuthStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    /// Register a strategy and bind it into the container under
    /// `auth.strategies.<name>`, tagged `auth-strategy`.
    pub fn register_with_container(&self, strategy: Arc<dyn AuthStrategy>, container: &Container) {
        let key = format!("auth.strategies.{}", strategy.name());
        container
            .bind(key)
            .to_value(strategy.clone())
            .in_scope(Scope::Singleton)
            .tagged(TAG_AUTH_STRATEGY);
        self.register(strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AuthStrategy>> {
        self.strategies.get(name).map(|e| e.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.strategies.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullStrategy;

    #[async_trait]
    impl AuthStrategy for NullStrategy {
        fn name(&self) -> &str {
            "null"
        }
        async fn extract_credentials(&self, _ctx: &RequestContext) -> Option<Value> {
            None
        }
        async fn authenticate(
            &self,
            _ctx: &RequestContext,
        ) -> Result<Option<CurrentUser>, IgnisError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn registration_adds_tagged_binding() {
        let registry = StrategyRegistry::new();
        let container = Container::new();
        registry.register_with_container(Arc::new(NullStrategy), &container);

        assert!(registry.get("null").is_some());
        let tagged = container.find_by_tag(TAG_AUTH_STRATEGY);
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].key, "auth.strategies.null");
    }

    #[test]
    fn lookup_miss_is_none() {
        let registry = StrategyRegistry::new();
        assert!(registry.get("nope").is_none());
    }
}
