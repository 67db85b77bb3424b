use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::container::{BoxFuture, Container, Injectable, Scope};
use crate::context::Middleware;
use crate::controller::{
    join_paths, AuthenticateSpec, Controller, ControllerRoutes, MountedRoute, RouteTable,
};
use crate::error::IgnisError;
use crate::registry::MetadataRegistry;

/// Binding tag resolved first during boot.
pub const TAG_DATASOURCES: &str = "datasources";
/// Binding tag resolved second during boot.
pub const TAG_COMPONENTS: &str = "components";
/// Binding tag resolved last during boot.
pub const TAG_CONTROLLERS: &str = "controllers";

/// Lifecycle phase of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppPhase {
    New,
    Configured,
    Booted,
    Serving,
    Stopped,
}

/// A component participating in boot: its constructor may add default
/// bindings; `bindings` registers dependent artifacts after construction.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    async fn bindings(&self, _app: &Application) -> Result<(), IgnisError> {
        Ok(())
    }
}

/// A long-running task started when the application begins serving and
/// cancelled on shutdown (heartbeat sweeps, log flushers, servers).
pub trait LifecycleTask: Send + 'static {
    fn name(&self) -> &str;
    fn run(self: Box<Self>, shutdown: CancellationToken) -> BoxFuture<'static, ()>;
}

type Hook = Box<dyn FnOnce(Arc<Application>) -> BoxFuture<'static, Result<(), IgnisError>> + Send>;
type ShutdownHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type AuthMiddlewareFactory = Arc<dyn Fn(&AuthenticateSpec) -> Arc<dyn Middleware> + Send + Sync>;

/// Lifecycle orchestrator over the container.
///
/// Drives `new → configured → booted → serving → stopped`. Boot resolves
/// bindings tag by tag in the fixed order datasources → components →
/// controllers so that later artifacts can depend on earlier ones; any
/// error during boot aborts it with no partial service.
pub struct Application {
    self_ref: Weak<Application>,
    container: Arc<Container>,
    registry: Arc<MetadataRegistry>,
    phase: Mutex<AppPhase>,
    route_table: Mutex<RouteTable>,
    pre_configure_hooks: Mutex<Vec<Hook>>,
    post_configure_hooks: Mutex<Vec<Hook>>,
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
    datasource_activators: Mutex<Vec<Hook>>,
    component_activators: Mutex<Vec<Hook>>,
    controller_activators: Mutex<Vec<Hook>>,
    tasks: Mutex<Vec<Box<dyn LifecycleTask>>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    auth_factory: Mutex<Option<AuthMiddlewareFactory>>,
}

impl Application {
    pub fn new() -> Arc<Self> {
        Self::with_registry(Arc::new(MetadataRegistry::new()))
    }

    pub fn with_registry(registry: Arc<MetadataRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            container: Arc::new(Container::new()),
            registry,
            phase: Mutex::new(AppPhase::New),
            route_table: Mutex::new(RouteTable::new()),
            pre_configure_hooks: Mutex::new(Vec::new()),
            post_configure_hooks: Mutex::new(Vec::new()),
            shutdown_hooks: Mutex::new(Vec::new()),
            datasource_activators: Mutex::new(Vec::new()),
            component_activators: Mutex::new(Vec::new()),
            controller_activators: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            task_handles: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            auth_factory: Mutex::new(None),
        })
    }

    /// Owning handle to this application. Valid whenever a method runs,
    /// since callers hold at least one `Arc`.
    fn handle(&self) -> Arc<Application> {
        self.self_ref.upgrade().expect("application dropped")
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    pub fn phase(&self) -> AppPhase {
        *self.phase.lock().expect("phase lock poisoned")
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register a user hook run during `configure()`, before boot.
    pub fn pre_configure<F, Fut>(&self, hook: F)
    where
        F: FnOnce(Arc<Application>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), IgnisError>> + Send + 'static,
    {
        self.pre_configure_hooks
            .lock()
            .expect("hooks lock poisoned")
            .push(Box::new(move |app| Box::pin(hook(app))));
    }

    /// Register a user hook run during `start()`, before serving begins.
    pub fn post_configure<F, Fut>(&self, hook: F)
    where
        F: FnOnce(Arc<Application>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), IgnisError>> + Send + 'static,
    {
        self.post_configure_hooks
            .lock()
            .expect("hooks lock poisoned")
            .push(Box::new(move |app| Box::pin(hook(app))));
    }

    /// Register cleanup run during `stop()`. Hooks run in reverse
    /// registration order, so artifacts registered early shut down last.
    pub fn on_shutdown<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shutdown_hooks
            .lock()
            .expect("hooks lock poisoned")
            .push(Box::new(move || Box::pin(hook())));
    }

    /// Install the factory that turns a route's `authenticate` spec into a
    /// middleware instance. Installed by the auth module at configure time.
    pub fn set_auth_middleware_factory(&self, factory: AuthMiddlewareFactory) {
        *self.auth_factory.lock().expect("auth factory lock poisoned") = Some(factory);
    }

    /// Add a long-running task started on `start()`.
    pub fn add_task(&self, task: Box<dyn LifecycleTask>) {
        self.tasks.lock().expect("tasks lock poisoned").push(task);
    }

    /// Bind a data source class; its `build` opens the connection at boot.
    pub fn register_data_source<D: Injectable>(&self, name: &str) {
        let key = format!("{TAG_DATASOURCES}.{name}");
        self.container
            .bind(key.clone())
            .to_class::<D>()
            .in_scope(Scope::Singleton)
            .tagged(TAG_DATASOURCES);
        self.datasource_activators
            .lock()
            .expect("activators lock poisoned")
            .push(Box::new(move |app: Arc<Application>| {
                Box::pin(async move {
                    app.container.resolve_any(&key).await?;
                    Ok(())
                })
            }));
    }

    /// Bind a component class; `Component::bindings` runs after construction.
    pub fn register_component<C: Component + Injectable>(&self, name: &str) {
        let key = format!("{TAG_COMPONENTS}.{name}");
        self.container
            .bind(key.clone())
            .to_class::<C>()
            .in_scope(Scope::Singleton)
            .tagged(TAG_COMPONENTS);
        self.component_activators
            .lock()
            .expect("activators lock poisoned")
            .push(Box::new(move |app: Arc<Application>| {
                Box::pin(async move {
                    let component: Arc<C> = app.container.get(&key).await?;
                    component.bindings(&app).await
                })
            }));
    }

    /// Bind a controller class; `configure()` runs during the controllers
    /// boot phase and its routes are mounted under the controller's path.
    pub fn register_controller<C: Controller + Injectable>(&self, name: &str) {
        let key = format!("{TAG_CONTROLLERS}.{name}");
        self.container
            .bind(key.clone())
            .to_class::<C>()
            .in_scope(Scope::Singleton)
            .tagged(TAG_CONTROLLERS);
        self.controller_activators
            .lock()
            .expect("activators lock poisoned")
            .push(Box::new(move |app: Arc<Application>| {
                Box::pin(async move {
                    let controller: Arc<C> = app.container.get(&key).await?;
                    app.mount_controller(controller.as_ref())
                })
            }));
    }

    /// `new → configured`: run pre-configure hooks. Bindings are added; no
    /// instantiation happens here.
    pub async fn configure(&self) -> Result<(), IgnisError> {
        self.transition(AppPhase::New, AppPhase::Configured)?;
        let hooks: Vec<Hook> = std::mem::take(
            &mut *self.pre_configure_hooks.lock().expect("hooks lock poisoned"),
        );
        for hook in hooks {
            hook(self.handle()).await?;
        }
        Ok(())
    }

    /// `configured → booted`: instantiate data sources, then components
    /// (running their `bindings()`), then controllers (mounting routes).
    pub async fn boot(&self) -> Result<(), IgnisError> {
        self.transition(AppPhase::Configured, AppPhase::Booted)?;

        for phase in [
            &self.datasource_activators,
            &self.component_activators,
            &self.controller_activators,
        ] {
            let activators: Vec<Hook> =
                std::mem::take(&mut *phase.lock().expect("activators lock poisoned"));
            for activator in activators {
                activator(self.handle()).await?;
            }
        }

        info!(
            routes = self.route_table.lock().expect("route table lock poisoned").routes().len(),
            "boot complete"
        );
        Ok(())
    }

    /// `booted → serving`: run post-configure hooks and start tasks.
    pub async fn start(&self) -> Result<(), IgnisError> {
        self.transition(AppPhase::Booted, AppPhase::Serving)?;
        let hooks: Vec<Hook> = std::mem::take(
            &mut *self.post_configure_hooks.lock().expect("hooks lock poisoned"),
        );
        for hook in hooks {
            hook(self.handle()).await?;
        }

        let tasks: Vec<Box<dyn LifecycleTask>> =
            std::mem::take(&mut *self.tasks.lock().expect("tasks lock poisoned"));
        let mut handles = self.task_handles.lock().expect("task handles lock poisoned");
        for task in tasks {
            info!(task = task.name(), "starting lifecycle task");
            handles.push(tokio::spawn(task.run(self.shutdown.clone())));
        }
        Ok(())
    }

    /// `serving → stopped`: cancel tasks, then run shutdown hooks in
    /// reverse registration order (controllers and realtime helpers before
    /// data sources), then tear down the container.
    pub async fn stop(&self) -> Result<(), IgnisError> {
        self.transition(AppPhase::Serving, AppPhase::Stopped)?;
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.task_handles.lock().expect("task handles lock poisoned"));
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "lifecycle task aborted");
            }
        }

        let mut hooks: Vec<ShutdownHook> =
            std::mem::take(&mut *self.shutdown_hooks.lock().expect("hooks lock poisoned"));
        while let Some(hook) = hooks.pop() {
            hook().await;
        }

        self.container.teardown();
        Ok(())
    }

    /// The mounted route table.
    pub fn routes(&self) -> Vec<MountedRoute> {
        self.route_table
            .lock()
            .expect("route table lock poisoned")
            .routes()
            .to_vec()
    }

    /// Dispatch a request through the mounted route table (middleware chain
    /// then handler). Exact-match routing; pattern matching belongs to the
    /// external HTTP adapter.
    pub async fn dispatch(
        &self,
        ctx: crate::context::RequestContext,
    ) -> Result<crate::context::HandlerResponse, IgnisError> {
        // Clone the matched route out so the lock is not held across await.
        let route = {
            let table = self.route_table.lock().expect("route table lock poisoned");
            table.find(&ctx.method, &ctx.path).cloned()
        };
        let route = route.ok_or_else(|| {
            IgnisError::not_found(format!("No route for {} {}", ctx.method, ctx.path))
        })?;
        let mut ctx = ctx;
        for middleware in &route.middleware {
            middleware.handle(&mut ctx).await?;
        }
        (route.handler)(ctx).await
    }

    fn mount_controller(&self, controller: &dyn Controller) -> Result<(), IgnisError> {
        if controller.base_path().trim().is_empty() {
            return Err(IgnisError::config_invalid(format!(
                "Controller '{}' has no resolved mount path",
                controller.name()
            )));
        }

        let mut routes = ControllerRoutes::new();
        controller.configure(&mut routes)?;

        // Merge registry-recorded (annotation-style) routes in insertion order.
        for (method_name, config) in self.registry.routes(controller.name()) {
            match controller.method_handler(&method_name) {
                Some(handler) => routes.define_route(config, handler),
                None => warn!(
                    controller = controller.name(),
                    method = %method_name,
                    "route metadata has no matching handler"
                ),
            }
        }

        let auth_factory = self.auth_factory.lock().expect("auth factory lock poisoned").clone();
        let mut table = self.route_table.lock().expect("route table lock poisoned");
        for registration in routes.into_registrations() {
            let config = registration.config;
            let mut middleware: Vec<Arc<dyn Middleware>> = Vec::new();
            if let Some(spec) = &config.authenticate {
                match &auth_factory {
                    Some(factory) => middleware.push(factory(spec)),
                    None => {
                        return Err(IgnisError::config_invalid(format!(
                            "Route {} {} requires authentication but no auth middleware factory is installed",
                            config.method, config.path
                        )))
                    }
                }
            }
            middleware.extend(config.middleware.iter().cloned());

            table.push(MountedRoute {
                controller: controller.name().to_string(),
                full_path: join_paths(controller.base_path(), &config.path),
                handler: registration.handler,
                middleware,
                tags: vec![controller.name().to_string()],
                config,
            });
        }
        Ok(())
    }

    fn transition(&self, from: AppPhase, to: AppPhase) -> Result<(), IgnisError> {
        let mut phase = self.phase.lock().expect("phase lock poisoned");
        if *phase != from {
            return Err(IgnisError::config_invalid(format!(
                "Invalid lifecycle transition: expected {from:?}, found {:?}",
                *phase
            )));
        }
        *phase = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Dependency, ResolvedDeps};
    use crate::context::{HandlerResponse, RequestContext};
    use crate::controller::{handler, RouteConfig};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static BOOT_ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    struct Db;

    #[async_trait]
    impl Injectable for Db {
        async fn build(_deps: &ResolvedDeps) -> Result<Self, IgnisError> {
            BOOT_ORDER.lock().unwrap().push("datasource");
            Ok(Self)
        }
    }

    struct Realtime;

    #[async_trait]
    impl Injectable for Realtime {
        async fn build(_deps: &ResolvedDeps) -> Result<Self, IgnisError> {
            BOOT_ORDER.lock().unwrap().push("component");
            Ok(Self)
        }
    }

    #[async_trait]
    impl Component for Realtime {}

    struct PingController;

    #[async_trait]
    impl Injectable for PingController {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::required("datasources.db")]
        }
        async fn build(deps: &ResolvedDeps) -> Result<Self, IgnisError> {
            deps.get::<Db>("datasources.db")?;
            BOOT_ORDER.lock().unwrap().push("controller");
            Ok(Self)
        }
    }

    impl Controller for PingController {
        fn name(&self) -> &str {
            "PingController"
        }
        fn base_path(&self) -> &str {
            "/ping"
        }
        fn configure(&self, routes: &mut ControllerRoutes) -> Result<(), IgnisError> {
            routes
                .bind_route(RouteConfig::new("get", "/"))
                .to(handler(|_ctx| async { Ok(HandlerResponse::ok(json!({"ok": true}))) }));
            Ok(())
        }
    }

    #[tokio::test]
    async fn boot_wires_tags_in_order_and_mounts_routes() {
        BOOT_ORDER.lock().unwrap().clear();

        let app = Application::new();
        app.register_data_source::<Db>("db");
        app.register_component::<Realtime>("realtime");
        app.register_controller::<PingController>("PingController");

        app.configure().await.unwrap();
        app.boot().await.unwrap();

        assert_eq!(
            *BOOT_ORDER.lock().unwrap(),
            vec!["datasource", "component", "controller"]
        );

        let res = app
            .dispatch(RequestContext::new("GET", "/ping"))
            .await
            .unwrap();
        assert_eq!(res.status, 200);
    }

    #[tokio::test]
    async fn invalid_transition_is_config_invalid() {
        let app = Application::new();
        let err = app.boot().await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ConfigInvalid);
    }

    #[tokio::test]
    async fn pre_configure_hooks_add_bindings_before_boot() {
        let app = Application::new();
        app.pre_configure(|app| async move {
            app.container().bind("config.flag").to_value(true);
            Ok(())
        });
        app.configure().await.unwrap();
        assert!(app.container().contains("config.flag"));
    }

    struct NoPathController;

    #[async_trait]
    impl Injectable for NoPathController {
        async fn build(_deps: &ResolvedDeps) -> Result<Self, IgnisError> {
            Ok(Self)
        }
    }

    impl Controller for NoPathController {
        fn name(&self) -> &str {
            "NoPathController"
        }
        fn base_path(&self) -> &str {
            ""
        }
        fn configure(&self, _routes: &mut ControllerRoutes) -> Result<(), IgnisError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn controller_without_path_aborts_boot() {
        let app = Application::new();
        app.register_controller::<NoPathController>("NoPathController");
        app.configure().await.unwrap();
        let err = app.boot().await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ConfigInvalid);
    }

    #[tokio::test]
    async fn annotated_routes_merge_through_method_handler() {
        struct AnnotatedController;

        #[async_trait]
        impl Injectable for AnnotatedController {
            async fn build(_deps: &ResolvedDeps) -> Result<Self, IgnisError> {
                Ok(Self)
            }
        }

        impl Controller for AnnotatedController {
            fn name(&self) -> &str {
                "AnnotatedController"
            }
            fn base_path(&self) -> &str {
                "/items"
            }
            fn configure(&self, _routes: &mut ControllerRoutes) -> Result<(), IgnisError> {
                Ok(())
            }
            fn method_handler(&self, method_name: &str) -> Option<crate::controller::RouteHandler> {
                match method_name {
                    "count" => Some(handler(|_ctx| async {
                        Ok(HandlerResponse::ok(json!({"count": 0})))
                    })),
                    _ => None,
                }
            }
        }

        let registry = Arc::new(MetadataRegistry::new());
        registry.set_route_metadata(
            "AnnotatedController",
            "count",
            RouteConfig::new("get", "/count"),
        );

        let app = Application::with_registry(registry);
        app.register_controller::<AnnotatedController>("AnnotatedController");
        app.configure().await.unwrap();
        app.boot().await.unwrap();

        let res = app
            .dispatch(RequestContext::new("GET", "/items/count"))
            .await
            .unwrap();
        assert_eq!(res.body["count"], 0);
    }

    #[tokio::test]
    async fn lifecycle_tasks_start_and_cancel() {
        struct Ticker(Arc<AtomicUsize>);

        impl LifecycleTask for Ticker {
            fn name(&self) -> &str {
                "ticker"
            }
            fn run(self: Box<Self>, shutdown: CancellationToken) -> BoxFuture<'static, ()> {
                Box::pin(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {
                                self.0.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    }
                })
            }
        }

        let ticks = Arc::new(AtomicUsize::new(0));
        let app = Application::new();
        app.add_task(Box::new(Ticker(ticks.clone())));

        app.configure().await.unwrap();
        app.boot().await.unwrap();
        app.start().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        app.stop().await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 1);
        assert_eq!(app.phase(), AppPhase::Stopped);
    }

    #[tokio::test]
    async fn shutdown_hooks_run_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let app = Application::new();

        for label in ["datasource", "realtime"] {
            let order = order.clone();
            app.on_shutdown(move || async move {
                order.lock().unwrap().push(label);
            });
        }

        app.configure().await.unwrap();
        app.boot().await.unwrap();
        app.start().await.unwrap();
        app.stop().await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["realtime", "datasource"]);
    }

    #[tokio::test]
    async fn component_bindings_register_dependent_artifacts() {
        struct WithBindings;

        #[async_trait]
        impl Injectable for WithBindings {
            async fn build(_deps: &ResolvedDeps) -> Result<Self, IgnisError> {
                Ok(Self)
            }
        }

        #[async_trait]
        impl Component for WithBindings {
            async fn bindings(&self, app: &Application) -> Result<(), IgnisError> {
                app.container().bind("values.fromComponent").to_value(7u32);
                Ok(())
            }
        }

        let app = Application::new();
        app.register_component::<WithBindings>("withBindings");
        app.configure().await.unwrap();
        app.boot().await.unwrap();

        let value: Arc<u32> = app.container().get("values.fromComponent").await.unwrap();
        assert_eq!(*value, 7);
    }
}
