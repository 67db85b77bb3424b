//! Data access layer for Ignis.
//!
//! Declarative filters compile deterministically into query specs; the
//! default CRUD repository composes a model's default filter with the
//! user's filter and executes through the `DataSource` capability.

pub mod builder;
pub mod datasource;
pub mod filter;
pub mod merge;
pub mod operators;
pub mod repository;
pub mod schema;

pub use builder::{render_count, render_select, FilterBuilder, QuerySpec};
pub use datasource::{Connector, DataSource, IsolationLevel, Row, Transaction, TransactionControl};
pub use filter::{Fields, Filter, Include, IncludeScope};
pub use merge::{deep_merge_maps, merge};
pub use operators::QueryOperator;
pub use repository::{CallOptions, DataEnvelope, Repository};
pub use schema::{Column, DataType, Model, ModelSchema, Relation, SchemaRegistry, SchemaSource};
