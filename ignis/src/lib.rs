//! Ignis — an opinionated application framework core.
//!
//! This facade crate re-exports the Ignis sub-crates behind feature
//! flags. Most applications depend on `ignis` alone:
//!
//! ```ignore
//! use ignis::prelude::*;
//! ```
//!
//! | Feature    | Default | Crate            |
//! |------------|---------|------------------|
//! | `data`     | **yes** | `ignis-data`     |
//! | `auth`     | **yes** | `ignis-auth`     |
//! | `events`   | **yes** | `ignis-events`   |
//! | `realtime` | **yes** | `ignis-realtime` |
//! | `hflog`    | no      | `ignis-hflog`    |
//! | `full`     | no      | all of the above |

pub use ignis_core::*;

#[cfg(feature = "data")]
pub use ignis_data;

#[cfg(feature = "auth")]
pub use ignis_auth;

#[cfg(feature = "events")]
pub use ignis_events;

#[cfg(feature = "realtime")]
pub use ignis_realtime;

#[cfg(feature = "hflog")]
pub use ignis_hflog;

pub mod prelude {
    //! Re-exports of the most commonly used types.
    pub use ignis_core::{
        handler, Application, Container, Controller, ControllerRoutes, CurrentUser, Dependency,
        EnvSpec, Environment, ErrorKind, HandlerResponse, IgnisError, Injectable,
        MetadataRegistry, Middleware, RequestContext, ResolvedDeps, RouteConfig, Scope,
    };

    #[cfg(feature = "data")]
    pub use ignis_data::{
        CallOptions, DataSource, Filter, FilterBuilder, Model, ModelSchema, Repository,
    };

    #[cfg(feature = "auth")]
    pub use ignis_auth::{authenticate, AuthStrategy, JwtConfig, JwtStrategy, StrategyRegistry};

    #[cfg(feature = "events")]
    pub use ignis_events::{LocalPubSub, PubSubStore};

    #[cfg(feature = "realtime")]
    pub use ignis_realtime::{WsServerBuilder, WsServerHelper, WsServerOptions};
}
