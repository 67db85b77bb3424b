use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::IgnisError;

/// Boxed future used at the container's dynamic seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased value held by the container.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Build a `namespace.name` binding key.
pub fn binding_key(namespace: &str, name: &str) -> String {
    format!("{namespace}.{name}")
}

/// Resolution scope of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// A new instance on every resolution.
    #[default]
    Transient,
    /// The first resolved instance is cached until container teardown.
    Singleton,
}

/// A constructor-injected artifact.
///
/// Declares its dependencies as binding keys and builds itself from the
/// resolved set. Async so that artifacts such as data sources can open
/// connections during construction.
#[async_trait]
pub trait Injectable: Send + Sync + Sized + 'static {
    /// Binding keys this type needs before it can be constructed.
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    async fn build(deps: &ResolvedDeps) -> Result<Self, IgnisError>;
}

/// A single injection request: a binding key plus an optional flag.
///
/// Optional dependencies resolve to "absent" on a lookup miss instead of
/// failing; they are also the sanctioned way to break dependency cycles.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub key: String,
    pub optional: bool,
}

impl Dependency {
    pub fn required(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            optional: false,
        }
    }

    pub fn optional(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            optional: true,
        }
    }
}

/// The dependencies resolved for one [`Injectable::build`] call, keyed by
/// binding key.
pub struct ResolvedDeps {
    values: HashMap<String, AnyValue>,
}

impl ResolvedDeps {
    /// Retrieve a required dependency, downcast to its concrete type.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>, IgnisError> {
        self.try_get(key)
            .ok_or_else(|| IgnisError::not_bound(key))
    }

    /// Retrieve an optional dependency.
    pub fn try_get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.values
            .get(key)
            .and_then(|v| v.clone().downcast::<T>().ok())
    }
}

/// A value-producing strategy resolvable through the container.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    async fn value(&self, ctx: &ResolutionContext<'_>) -> Result<AnyValue, IgnisError>;
}

/// Re-entrant view of the container used while a resolution is in flight.
///
/// Carries the in-progress key trail so that nested `get` calls issued by
/// providers and class factories participate in cycle detection.
pub struct ResolutionContext<'c> {
    container: &'c Container,
    trail: Mutex<Vec<String>>,
}

impl<'c> ResolutionContext<'c> {
    fn new(container: &'c Container) -> Self {
        Self {
            container,
            trail: Mutex::new(Vec::new()),
        }
    }

    pub fn container(&self) -> &Container {
        self.container
    }

    /// Resolve a required dependency from within a provider or factory.
    pub async fn get<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>, IgnisError> {
        let value = self.resolve_any(key).await?;
        value
            .downcast::<T>()
            .map_err(|_| IgnisError::internal(format!("Binding '{key}' has an unexpected type")))
    }

    /// Resolve an optional dependency; `None` on lookup miss.
    pub async fn get_optional<T: Send + Sync + 'static>(
        &self,
        key: &str,
    ) -> Result<Option<Arc<T>>, IgnisError> {
        if !self.container.contains(key) {
            return Ok(None);
        }
        self.get::<T>(key).await.map(Some)
    }

    /// Resolve a binding to its type-erased value.
    pub fn resolve_any<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<AnyValue, IgnisError>> {
        Box::pin(async move {
            let binding = self
                .container
                .binding(key)
                .ok_or_else(|| IgnisError::not_bound(key))?;

            {
                let mut trail = self.trail.lock().expect("trail lock poisoned");
                if trail.iter().any(|k| k == key) {
                    let mut cycle = trail.clone();
                    cycle.push(key.to_string());
                    return Err(IgnisError::cyclic_binding(&cycle));
                }
                trail.push(key.to_string());
            }

            let result = self.construct(&binding).await;

            self.trail.lock().expect("trail lock poisoned").pop();
            result
        })
    }

    async fn construct(&self, binding: &Arc<BindingInner>) -> Result<AnyValue, IgnisError> {
        match binding.scope() {
            Scope::Singleton => binding
                .cache
                .get_or_try_init(|| self.produce(binding))
                .await
                .cloned(),
            Scope::Transient => self.produce(binding).await,
        }
    }

    async fn produce(&self, binding: &Arc<BindingInner>) -> Result<AnyValue, IgnisError> {
        match &binding.source {
            Source::Value(value) => Ok(value.clone()),
            Source::Provider(provider) => provider.value(self).await,
            Source::Class(factory) => factory(self).await,
        }
    }
}

enum Source {
    Value(AnyValue),
    Provider(Arc<dyn Provider>),
    Class(ClassFactory),
}

type ClassFactory =
    Arc<dyn for<'a> Fn(&'a ResolutionContext<'a>) -> BoxFuture<'a, Result<AnyValue, IgnisError>> + Send + Sync>;

struct BindingInner {
    key: String,
    source: Source,
    scope: RwLock<Scope>,
    tags: RwLock<HashSet<String>>,
    cache: OnceCell<AnyValue>,
}

impl BindingInner {
    fn scope(&self) -> Scope {
        *self.scope.read().expect("scope lock poisoned")
    }
}

/// Summary of a registered binding, as returned by tag queries.
#[derive(Debug, Clone)]
pub struct BindingInfo {
    pub key: String,
    pub scope: Scope,
    pub tags: Vec<String>,
}

/// Key → binding registry with scoped resolution and constructor injection.
///
/// Writes happen during application configuration; reads dominate after
/// boot, so the binding map sits behind a readers/writer lock. Resolution
/// keeps a per-call trail of in-progress keys: re-entry on the same key
/// fails with `kind=cyclic-binding` instead of recursing forever.
#[derive(Default)]
pub struct Container {
    bindings: RwLock<HashMap<String, Arc<BindingInner>>>,
    tag_index: RwLock<HashMap<String, Vec<String>>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new binding for `key`. The binding becomes resolvable once a
    /// terminal (`to_value` / `to_provider` / `to_class`) is called.
    pub fn bind(&self, key: impl Into<String>) -> BindingBuilder<'_> {
        BindingBuilder {
            container: self,
            key: key.into(),
        }
    }

    /// Whether a binding exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.bindings
            .read()
            .expect("bindings lock poisoned")
            .contains_key(key)
    }

    /// Resolve a required binding. Missing keys fail with `kind=not-bound`.
    pub async fn get<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>, IgnisError> {
        ResolutionContext::new(self).get::<T>(key).await
    }

    /// Resolve an optional binding; a lookup miss yields `None`.
    pub async fn get_optional<T: Send + Sync + 'static>(
        &self,
        key: &str,
    ) -> Result<Option<Arc<T>>, IgnisError> {
        ResolutionContext::new(self).get_optional::<T>(key).await
    }

    /// Resolve a binding to its type-erased value.
    pub async fn resolve_any(&self, key: &str) -> Result<AnyValue, IgnisError> {
        ResolutionContext::new(self).resolve_any(key).await
    }

    /// Construct `T` directly, resolving its declared dependencies.
    pub async fn instantiate<T: Injectable>(&self) -> Result<T, IgnisError> {
        let ctx = ResolutionContext::new(self);
        instantiate_with::<T>(&ctx).await
    }

    /// All bindings carrying `tag`, in registration order.
    pub fn find_by_tag(&self, tag: &str) -> Vec<BindingInfo> {
        let keys = {
            let index = self.tag_index.read().expect("tag index lock poisoned");
            index.get(tag).cloned().unwrap_or_default()
        };
        let bindings = self.bindings.read().expect("bindings lock poisoned");
        keys.iter()
            .filter_map(|key| bindings.get(key))
            .map(|b| BindingInfo {
                key: b.key.clone(),
                scope: b.scope(),
                tags: b.tags.read().expect("tags lock poisoned").iter().cloned().collect(),
            })
            .collect()
    }

    /// Registered keys, unordered.
    pub fn keys(&self) -> Vec<String> {
        self.bindings
            .read()
            .expect("bindings lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Drop every binding and cached singleton.
    pub fn teardown(&self) {
        self.bindings.write().expect("bindings lock poisoned").clear();
        self.tag_index.write().expect("tag index lock poisoned").clear();
    }

    fn binding(&self, key: &str) -> Option<Arc<BindingInner>> {
        self.bindings
            .read()
            .expect("bindings lock poisoned")
            .get(key)
            .cloned()
    }

    fn insert(&self, key: String, source: Source) {
        debug!(key = %key, "binding registered");
        let binding = Arc::new(BindingInner {
            key: key.clone(),
            source,
            scope: RwLock::new(Scope::default()),
            tags: RwLock::new(HashSet::new()),
            cache: OnceCell::new(),
        });
        self.bindings
            .write()
            .expect("bindings lock poisoned")
            .insert(key, binding);
    }

    fn add_tag(&self, key: &str, tag: &str) {
        if let Some(binding) = self.binding(key) {
            binding
                .tags
                .write()
                .expect("tags lock poisoned")
                .insert(tag.to_string());
        }
        let mut index = self.tag_index.write().expect("tag index lock poisoned");
        let keys = index.entry(tag.to_string()).or_default();
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }

    fn set_scope(&self, key: &str, scope: Scope) {
        if let Some(binding) = self.binding(key) {
            *binding.scope.write().expect("scope lock poisoned") = scope;
        }
    }
}

/// Factory used by class bindings. A named fn item (rather than a
/// closure) so it satisfies the higher-ranked `ClassFactory` signature.
fn class_factory<'a, T: Injectable>(
    ctx: &'a ResolutionContext<'a>,
) -> BoxFuture<'a, Result<AnyValue, IgnisError>> {
    Box::pin(async move {
        let value = instantiate_with::<T>(ctx).await?;
        Ok(Arc::new(value) as AnyValue)
    })
}

async fn instantiate_with<T: Injectable>(ctx: &ResolutionContext<'_>) -> Result<T, IgnisError> {
    let mut values = HashMap::new();
    for dep in T::dependencies() {
        if dep.optional && !ctx.container.contains(&dep.key) {
            continue;
        }
        let value = ctx.resolve_any(&dep.key).await?;
        values.insert(dep.key, value);
    }
    T::build(&ResolvedDeps { values }).await
}

/// First half of the fluent binding API: pick the value-producing strategy.
pub struct BindingBuilder<'c> {
    container: &'c Container,
    key: String,
}

impl<'c> BindingBuilder<'c> {
    /// Bind to a pre-built value.
    pub fn to_value<T: Send + Sync + 'static>(self, value: T) -> BindingRef<'c> {
        self.container
            .insert(self.key.clone(), Source::Value(Arc::new(value)));
        BindingRef {
            container: self.container,
            key: self.key,
        }
    }

    /// Bind to a provider resolved on demand.
    pub fn to_provider<P: Provider>(self, provider: P) -> BindingRef<'c> {
        self.container
            .insert(self.key.clone(), Source::Provider(Arc::new(provider)));
        BindingRef {
            container: self.container,
            key: self.key,
        }
    }

    /// Bind to a class constructed via its [`Injectable`] metadata.
    pub fn to_class<T: Injectable>(self) -> BindingRef<'c> {
        self.container
            .insert(self.key.clone(), Source::Class(Arc::new(class_factory::<T>)));
        BindingRef {
            container: self.container,
            key: self.key,
        }
    }
}

/// Second half of the fluent binding API: scope and tag setters.
///
/// Setters are meant to run before the binding's first resolution; a
/// singleton that has already cached its instance keeps it until teardown.
pub struct BindingRef<'c> {
    container: &'c Container,
    key: String,
}

impl BindingRef<'_> {
    pub fn in_scope(self, scope: Scope) -> Self {
        self.container.set_scope(&self.key, scope);
        self
    }

    pub fn tagged(self, tag: &str) -> Self {
        self.container.add_tag(&self.key, tag);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Config {
        url: String,
    }

    struct Service {
        config: Arc<Config>,
    }

    #[async_trait]
    impl Injectable for Service {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::required("config.app")]
        }

        async fn build(deps: &ResolvedDeps) -> Result<Self, IgnisError> {
            Ok(Self {
                config: deps.get::<Config>("config.app")?,
            })
        }
    }

    #[tokio::test]
    async fn value_binding_resolves() {
        let container = Container::new();
        container.bind("config.app").to_value(Config {
            url: "db://local".into(),
        });
        let config: Arc<Config> = container.get("config.app").await.unwrap();
        assert_eq!(config.url, "db://local");
    }

    #[tokio::test]
    async fn class_binding_resolves_dependencies() {
        let container = Container::new();
        container.bind("config.app").to_value(Config {
            url: "db://local".into(),
        });
        container.bind("services.Service").to_class::<Service>();
        let service: Arc<Service> = container.get("services.Service").await.unwrap();
        assert_eq!(service.config.url, "db://local");
    }

    #[tokio::test]
    async fn required_miss_is_not_bound() {
        let container = Container::new();
        let err = container.get::<Config>("config.missing").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotBound);
    }

    #[tokio::test]
    async fn optional_miss_is_none() {
        let container = Container::new();
        let resolved = container
            .get_optional::<Config>("config.missing")
            .await
            .unwrap();
        assert!(resolved.is_none());
    }

    struct Counting;

    static CONSTRUCTIONS: AtomicUsize = AtomicUsize::new(0);

    #[async_trait]
    impl Injectable for Counting {
        async fn build(_deps: &ResolvedDeps) -> Result<Self, IgnisError> {
            CONSTRUCTIONS.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(Self)
        }
    }

    #[tokio::test]
    async fn transient_scope_constructs_per_get() {
        let container = Container::new();
        container.bind("services.Transient").to_class::<Counting>();
        let before = CONSTRUCTIONS.load(Ordering::SeqCst);
        let _a: Arc<Counting> = container.get("services.Transient").await.unwrap();
        let _b: Arc<Counting> = container.get("services.Transient").await.unwrap();
        assert_eq!(CONSTRUCTIONS.load(Ordering::SeqCst) - before, 2);
    }

    #[tokio::test]
    async fn singleton_scope_caches_instance() {
        let container = Container::new();
        container
            .bind("services.Singleton")
            .to_class::<Counting>()
            .in_scope(Scope::Singleton);
        let before = CONSTRUCTIONS.load(Ordering::SeqCst);
        let a: Arc<Counting> = container.get("services.Singleton").await.unwrap();
        let b: Arc<Counting> = container.get("services.Singleton").await.unwrap();
        assert_eq!(CONSTRUCTIONS.load(Ordering::SeqCst) - before, 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn concurrent_singleton_constructs_once() {
        struct Slow;

        static SLOW_CONSTRUCTIONS: AtomicUsize = AtomicUsize::new(0);

        #[async_trait]
        impl Injectable for Slow {
            async fn build(_deps: &ResolvedDeps) -> Result<Self, IgnisError> {
                SLOW_CONSTRUCTIONS.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(Self)
            }
        }

        let container = Arc::new(Container::new());
        container
            .bind("services.Slow")
            .to_class::<Slow>()
            .in_scope(Scope::Singleton);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let container = container.clone();
            handles.push(tokio::spawn(async move {
                container.get::<Slow>("services.Slow").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(SLOW_CONSTRUCTIONS.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct CycleA;
    struct CycleB;

    #[async_trait]
    impl Injectable for CycleA {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::required("services.CycleB")]
        }
        async fn build(_deps: &ResolvedDeps) -> Result<Self, IgnisError> {
            Ok(Self)
        }
    }

    #[async_trait]
    impl Injectable for CycleB {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::required("services.CycleA")]
        }
        async fn build(_deps: &ResolvedDeps) -> Result<Self, IgnisError> {
            Ok(Self)
        }
    }

    #[tokio::test]
    async fn cycle_is_detected() {
        let container = Container::new();
        container.bind("services.CycleA").to_class::<CycleA>();
        container.bind("services.CycleB").to_class::<CycleB>();
        let err = container.get::<CycleA>("services.CycleA").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::CyclicBinding);
        assert!(err.message.contains("services.CycleA"));
    }

    #[tokio::test]
    async fn optional_dependency_breaks_cycle() {
        struct Lazy;

        #[async_trait]
        impl Injectable for Lazy {
            fn dependencies() -> Vec<Dependency> {
                vec![Dependency::optional("services.NotThere")]
            }
            async fn build(deps: &ResolvedDeps) -> Result<Self, IgnisError> {
                assert!(deps.try_get::<Config>("services.NotThere").is_none());
                Ok(Self)
            }
        }

        let container = Container::new();
        container.bind("services.Lazy").to_class::<Lazy>();
        container.get::<Lazy>("services.Lazy").await.unwrap();
    }

    struct UrlProvider;

    #[async_trait]
    impl Provider for UrlProvider {
        async fn value(&self, ctx: &ResolutionContext<'_>) -> Result<AnyValue, IgnisError> {
            let config: Arc<Config> = ctx.get("config.app").await?;
            Ok(Arc::new(format!("{}/v2", config.url)) as AnyValue)
        }
    }

    #[tokio::test]
    async fn provider_binding_resolves_through_context() {
        let container = Container::new();
        container.bind("config.app").to_value(Config {
            url: "db://local".into(),
        });
        container.bind("values.url").to_provider(UrlProvider);
        let url: Arc<String> = container.get("values.url").await.unwrap();
        assert_eq!(&**url, "db://local/v2");
    }

    #[tokio::test]
    async fn tags_index_bindings() {
        let container = Container::new();
        container
            .bind("controllers.A")
            .to_value(1u32)
            .tagged("controllers");
        container
            .bind("controllers.B")
            .to_value(2u32)
            .tagged("controllers");
        container.bind("components.C").to_value(3u32).tagged("components");

        let found = container.find_by_tag("controllers");
        let keys: Vec<_> = found.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["controllers.A", "controllers.B"]);
        assert!(container.find_by_tag("missing").is_empty());
    }

    #[tokio::test]
    async fn teardown_clears_bindings() {
        let container = Container::new();
        container.bind("config.app").to_value(Config { url: "x".into() });
        container.teardown();
        assert!(!container.contains("config.app"));
    }
}
