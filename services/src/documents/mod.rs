//! Content documents and the store they live in.
//!
//! Every content collection (verses, songs, posters, ...) shares one shape: a
//! UUID, a JSON body and creation/update timestamps. [`DocumentStore`] is the
//! seam between the HTTP layer and persistence, with a PostgreSQL JSONB
//! implementation for production and an in-memory one for tests.

pub mod lookup;
pub mod mock;
pub mod populate;
pub mod postgres;
pub mod query;
pub mod schema;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::future::Future;
use uuid::Uuid;

pub use mock::MockDocumentStore;
pub use postgres::PgDocumentStore;
pub use query::{Condition, Filter, FindQuery, Sort, SortDirection};
pub use schema::Collection;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: Uuid,
    #[serde(skip)]
    pub collection: Collection,
    #[serde(flatten)]
    pub body: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Reads a field, treating the reserved names as the document columns.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            query::ID_FIELD => Some(Value::String(self.id.to_string())),
            query::CREATED_AT => Some(Value::String(self.created_at.to_rfc3339())),
            query::UPDATED_AT => Some(Value::String(self.updated_at.to_rfc3339())),
            other => self.body.get(other).cloned(),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(self.body.len() + 3);
        object.insert(query::ID_FIELD.to_owned(), Value::String(self.id.to_string()));
        for (key, value) in &self.body {
            object.insert(key.clone(), value.clone());
        }
        object.insert(
            query::CREATED_AT.to_owned(),
            Value::String(self.created_at.to_rfc3339()),
        );
        object.insert(
            query::UPDATED_AT.to_owned(),
            Value::String(self.updated_at.to_rfc3339()),
        );
        Value::Object(object)
    }
}

/// SQLSTATE PostgreSQL raises for a regular expression it cannot compile.
const INVALID_REGULAR_EXPRESSION: &str = "2201B";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The store rejected a search pattern.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    fn from_sqlstate(sqlstate: Option<&str>, message: String) -> Self {
        match sqlstate {
            Some(INVALID_REGULAR_EXPRESSION) => Self::InvalidPattern(message),
            _ => Self::Backend(message),
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        let sqlstate = err.as_database_error().and_then(|db| db.code());
        Self::from_sqlstate(sqlstate.as_deref(), err.to_string())
    }
}

pub trait DocumentStore: Clone + Send + Sync + 'static {
    /// Whether the backing store answers; used by the health check.
    fn is_connected(&self) -> impl Future<Output = bool> + Send;

    fn find(
        &self,
        collection: Collection,
        query: &FindQuery,
    ) -> impl Future<Output = Result<Vec<Document>, StorageError>> + Send;

    fn count(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// Loads the documents with the given ids. Missing ids are skipped and the
    /// result order is unspecified.
    fn find_by_ids(
        &self,
        collection: Collection,
        ids: &[Uuid],
    ) -> impl Future<Output = Result<Vec<Document>, StorageError>> + Send;

    fn get(
        &self,
        collection: Collection,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Document>, StorageError>> + Send;

    fn insert(
        &self,
        collection: Collection,
        body: Map<String, Value>,
    ) -> impl Future<Output = Result<Document, StorageError>> + Send;

    /// Merges `patch` into the stored body. `None` when the id is unknown.
    fn update(
        &self,
        collection: Collection,
        id: Uuid,
        patch: Map<String, Value>,
    ) -> impl Future<Output = Result<Option<Document>, StorageError>> + Send;

    fn delete(
        &self,
        collection: Collection,
        id: Uuid,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn delete_all(
        &self,
        collection: Collection,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;
}
