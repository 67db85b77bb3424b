use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use ignis_core::IgnisError;

/// A result row: column name → JSON value.
pub type Row = Map<String, Value>;

/// Transaction isolation levels a data source may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Statement execution surface. The default connector belongs to the data
/// source; a transaction carries its own isolated connector.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Run a row-returning statement.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, IgnisError>;

    /// Run a mutation without RETURNING; yields the affected-row count.
    async fn execute_update(&self, sql: &str, params: &[Value]) -> Result<u64, IgnisError>;
}

/// Commit/rollback surface of an open transaction.
#[async_trait]
pub trait TransactionControl: Send + Sync {
    async fn commit(&self) -> Result<(), IgnisError>;
    async fn rollback(&self) -> Result<(), IgnisError>;
}

/// A transaction handle: an isolated connector plus commit/rollback.
#[derive(Clone)]
pub struct Transaction {
    connector: Arc<dyn Connector>,
    control: Arc<dyn TransactionControl>,
}

impl Transaction {
    pub fn new(connector: Arc<dyn Connector>, control: Arc<dyn TransactionControl>) -> Self {
        Self { connector, control }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    pub async fn commit(&self) -> Result<(), IgnisError> {
        self.control.commit().await
    }

    pub async fn rollback(&self) -> Result<(), IgnisError> {
        self.control.rollback().await
    }
}

/// The relational storage capability the repository depends on.
///
/// Concrete drivers (and their pooling) live outside the core; a data
/// source opens its connection when it is instantiated during boot.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    fn connector(&self) -> Arc<dyn Connector>;

    async fn begin_transaction(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> Result<Transaction, IgnisError>;

    async fn close(&self) -> Result<(), IgnisError> {
        Ok(())
    }
}
