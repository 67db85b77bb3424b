use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::container::BoxFuture;
use crate::context::{HandlerResponse, Middleware, RequestContext};
use crate::error::IgnisError;

/// How multiple authentication strategies combine on one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// First strategy to produce a user wins.
    #[default]
    Any,
    /// Every listed strategy must succeed; the last user wins.
    All,
}

/// Authentication requirements declared on a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticateSpec {
    pub strategies: Vec<String>,
    #[serde(default)]
    pub mode: AuthMode,
}

/// Request schemas declared on a route (consumed verbatim by external
/// validation/OpenAPI adapters).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestSchema {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Declarative description of a single route.
#[derive(Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestSchema>,
    #[serde(default)]
    pub responses: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticate: Option<AuthenticateSpec>,
    #[serde(skip, default)]
    pub middleware: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for RouteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteConfig")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("authenticate", &self.authenticate)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

impl RouteConfig {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            request: None,
            responses: Value::Null,
            authenticate: None,
            middleware: Vec::new(),
        }
    }

    pub fn with_request(mut self, request: RequestSchema) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_responses(mut self, responses: Value) -> Self {
        self.responses = responses;
        self
    }

    pub fn authenticated(mut self, strategies: Vec<String>, mode: AuthMode) -> Self {
        self.authenticate = Some(AuthenticateSpec { strategies, mode });
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }
}

/// Boxed route handler over the framework request context.
pub type RouteHandler =
    Arc<dyn Fn(RequestContext) -> BoxFuture<'static, Result<HandlerResponse, IgnisError>> + Send + Sync>;

/// Wrap an async function as a [`RouteHandler`].
pub fn handler<F, Fut>(f: F) -> RouteHandler
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerResponse, IgnisError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// A route descriptor paired with its handler, before mounting.
#[derive(Clone)]
pub struct RouteRegistration {
    pub config: RouteConfig,
    pub handler: RouteHandler,
}

/// Collects routes during a controller's `configure()` call.
#[derive(Default)]
pub struct ControllerRoutes {
    registrations: Vec<RouteRegistration>,
}

impl ControllerRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a programmatic route registration.
    pub fn bind_route(&mut self, config: RouteConfig) -> RouteBinding<'_> {
        RouteBinding {
            routes: self,
            config,
        }
    }

    /// One-shot registration of a descriptor and its handler.
    pub fn define_route(&mut self, config: RouteConfig, handler: RouteHandler) {
        self.registrations.push(RouteRegistration { config, handler });
    }

    pub fn registrations(&self) -> &[RouteRegistration] {
        &self.registrations
    }

    pub(crate) fn into_registrations(self) -> Vec<RouteRegistration> {
        self.registrations
    }
}

/// Second half of `bind_route`: attach the handler.
pub struct RouteBinding<'r> {
    routes: &'r mut ControllerRoutes,
    config: RouteConfig,
}

impl RouteBinding<'_> {
    pub fn to(self, handler: RouteHandler) {
        self.routes.define_route(self.config, handler);
    }
}

/// A controller: a mount path plus a set of routes.
///
/// `configure` registers programmatic routes. Routes recorded in the
/// metadata registry under this controller's name are merged in by the
/// application at mount time, resolved through [`Controller::method_handler`].
pub trait Controller: Send + Sync {
    /// Identity used as the metadata registry key and the documentation tag.
    fn name(&self) -> &str;

    /// Mount path for every route of this controller.
    fn base_path(&self) -> &str;

    fn configure(&self, routes: &mut ControllerRoutes) -> Result<(), IgnisError>;

    /// Resolve a handler for a registry-recorded route by method name.
    fn method_handler(&self, _method_name: &str) -> Option<RouteHandler> {
        None
    }
}

/// A route as mounted into the application route table.
#[derive(Clone)]
pub struct MountedRoute {
    pub controller: String,
    pub full_path: String,
    pub config: RouteConfig,
    pub handler: RouteHandler,
    /// Middleware chain in execution order: auth first, then route middleware.
    pub middleware: Vec<Arc<dyn Middleware>>,
    /// Documentation tags; the controller's scope is always appended.
    pub tags: Vec<String>,
}

/// Join a mount path and a route path without duplicating separators.
pub fn join_paths(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

/// The application's mounted route table.
///
/// Dispatch here is exact-match on method and path; pattern matching with
/// path parameters belongs to the external HTTP adapter.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<MountedRoute>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, route: MountedRoute) {
        self.routes.push(route);
    }

    pub fn routes(&self) -> &[MountedRoute] {
        &self.routes
    }

    pub fn find(&self, method: &str, path: &str) -> Option<&MountedRoute> {
        self.routes
            .iter()
            .find(|r| r.config.method.eq_ignore_ascii_case(method) && r.full_path == path)
    }

    /// Run the route's middleware chain and handler against a context.
    pub async fn dispatch(
        &self,
        mut ctx: RequestContext,
    ) -> Result<HandlerResponse, IgnisError> {
        let route = self
            .find(&ctx.method, &ctx.path)
            .ok_or_else(|| IgnisError::not_found(format!("No route for {} {}", ctx.method, ctx.path)))?;
        for middleware in &route.middleware {
            middleware.handle(&mut ctx).await?;
        }
        (route.handler)(ctx).await
    }
}
