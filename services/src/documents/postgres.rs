//! PostgreSQL [`DocumentStore`] over the `documents` JSONB table.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json};
use uuid::Uuid;

use super::query::{CREATED_AT, Condition, Filter, FindQuery, ID_FIELD, SortDirection, UPDATED_AT};
use super::{Collection, Document, DocumentStore, StorageError};

#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    body: Json<Map<String, Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DocumentRow {
    fn into_document(self, collection: Collection) -> Document {
        Document {
            id: self.id,
            collection,
            body: self.body.0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const COLUMNS: &str = "id, body, created_at, updated_at";

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Appends `AND <condition>` for every condition in the filter.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    for condition in filter.conditions() {
        builder.push(" AND ");
        match condition {
            Condition::Equals { field, value } => match field.as_str() {
                ID_FIELD => {
                    // A value that is not a UUID can never match an id.
                    match value.as_str().and_then(|raw| Uuid::parse_str(raw).ok()) {
                        Some(id) => {
                            builder.push("id = ").push_bind(id);
                        }
                        None => {
                            builder.push("FALSE");
                        }
                    }
                }
                _ => {
                    builder
                        .push("body -> ")
                        .push_bind(field.clone())
                        .push(" = ")
                        .push_bind(Json(value.clone()));
                }
            },
            Condition::Matches { field, pattern } => {
                builder
                    .push("body ->> ")
                    .push_bind(field.clone())
                    .push(" ~* ")
                    .push_bind(pattern.clone());
            }
            Condition::OneOf { values, .. } if values.is_empty() => {
                builder.push("FALSE");
            }
            Condition::OneOf { field, values } if field == ID_FIELD => {
                let ids: Vec<Uuid> = values
                    .iter()
                    .filter_map(|value| value.as_str().and_then(|raw| Uuid::parse_str(raw).ok()))
                    .collect();
                builder.push("id = ANY(").push_bind(ids).push(")");
            }
            Condition::OneOf { field, values } => {
                builder
                    .push("body -> ")
                    .push_bind(field.clone())
                    .push(" IN (");
                let mut list = builder.separated(", ");
                for value in values {
                    list.push_bind(Json(value.clone()));
                }
                list.push_unseparated(")");
            }
        }
    }
}

fn push_order(builder: &mut QueryBuilder<'_, Postgres>, query: &FindQuery) {
    let direction = match query.sort.direction {
        SortDirection::Ascending => " ASC NULLS FIRST",
        SortDirection::Descending => " DESC NULLS LAST",
    };
    builder.push(" ORDER BY ");
    match query.sort.field.as_str() {
        CREATED_AT => {
            builder.push("created_at");
        }
        UPDATED_AT => {
            builder.push("updated_at");
        }
        ID_FIELD => {
            builder.push("id");
        }
        field => {
            builder.push("body -> ").push_bind(field.to_owned());
        }
    }
    builder.push(direction);
    builder.push(", created_at");
    builder.push(direction);
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl DocumentStore for PgDocumentStore {
    async fn is_connected(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn find(
        &self,
        collection: Collection,
        query: &FindQuery,
    ) -> Result<Vec<Document>, StorageError> {
        let mut builder = QueryBuilder::new(format!("SELECT {COLUMNS} FROM documents WHERE collection = "));
        builder.push_bind(collection.slug());
        push_filter(&mut builder, &query.filter);
        push_order(&mut builder, query);
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(to_i64(limit));
        }
        if query.skip > 0 {
            builder.push(" OFFSET ").push_bind(to_i64(query.skip));
        }

        let rows: Vec<DocumentRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_document(collection))
            .collect())
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64, StorageError> {
        let mut builder =
            QueryBuilder::new("SELECT COUNT(*) FROM documents WHERE collection = ");
        builder.push_bind(collection.slug());
        push_filter(&mut builder, filter);

        let total: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(u64::try_from(total).unwrap_or_default())
    }

    async fn find_by_ids(
        &self,
        collection: Collection,
        ids: &[Uuid],
    ) -> Result<Vec<Document>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<DocumentRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM documents WHERE collection = $1 AND id = ANY($2)"
        ))
        .bind(collection.slug())
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.into_document(collection))
            .collect())
    }

    async fn get(&self, collection: Collection, id: Uuid) -> Result<Option<Document>, StorageError> {
        let row: Option<DocumentRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM documents WHERE collection = $1 AND id = $2"
        ))
        .bind(collection.slug())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.into_document(collection)))
    }

    async fn insert(
        &self,
        collection: Collection,
        body: Map<String, Value>,
    ) -> Result<Document, StorageError> {
        let now = Utc::now();
        let row: DocumentRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO documents (id, collection, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(collection.slug())
        .bind(Json(body))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_document(collection))
    }

    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        patch: Map<String, Value>,
    ) -> Result<Option<Document>, StorageError> {
        let row: Option<DocumentRow> = sqlx::query_as(&format!(
            r#"
            UPDATE documents
            SET body = body || $3, updated_at = now()
            WHERE collection = $1 AND id = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(collection.slug())
        .bind(id)
        .bind(Json(patch))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.into_document(collection)))
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection.slug())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, collection: Collection) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1")
            .bind(collection.slug())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
