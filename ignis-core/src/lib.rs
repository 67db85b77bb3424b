//! Core runtime for the Ignis framework.
//!
//! Hosts the dependency-injection container, the metadata registry, the
//! application lifecycle state machine, the controller/route model, and
//! the shared error taxonomy. Data access, authentication, realtime, and
//! the high-frequency logger build on these pieces from sibling crates.

pub mod application;
pub mod booter;
pub mod config;
pub mod container;
pub mod context;
pub mod controller;
pub mod error;
pub mod helpers;
pub mod registry;
pub mod telemetry;

pub use application::{
    AppPhase, Application, Component, LifecycleTask, TAG_COMPONENTS, TAG_CONTROLLERS,
    TAG_DATASOURCES,
};
pub use booter::{ArtifactConventions, ArtifactReport, DiscoveryBooter, DiscoveryReport};
pub use config::{env_key, EnvKey, EnvSpec, Environment, ENV_PREFIX};
pub use container::{
    binding_key, AnyValue, BindingBuilder, BindingInfo, BindingRef, BoxFuture, Container,
    Dependency, Injectable, Provider, ResolutionContext, ResolvedDeps, Scope,
};
pub use context::{CurrentUser, HandlerResponse, Middleware, RequestContext};
pub use controller::{
    handler, join_paths, AuthMode, AuthenticateSpec, Controller, ControllerRoutes, MountedRoute,
    RequestSchema, RouteConfig, RouteHandler, RouteRegistration, RouteTable,
};
pub use error::{status, ErrorEnvelope, ErrorKind, IgnisError};
pub use registry::{ControllerMetadata, MetadataRegistry, ModelMetadata, ModelSettings};
pub use telemetry::init_tracing;
