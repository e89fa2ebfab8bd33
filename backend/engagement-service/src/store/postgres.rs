use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::{
    apply_merge, AggregateStore, Direction, Document, DocumentData, Filter, MergeUpdate, Query,
    SortKind, StoreCapabilities, StoreError, StoreResult,
};

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    data: Json<Value>,
    version: i64,
    seq: i64,
}

impl TryFrom<DocumentRow> for Document {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let data = match row.data.0 {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "document {} is not an object: {}",
                    row.id, other
                )))
            }
        };
        Ok(Document {
            id: row.id,
            version: row.version as u64,
            seq: row.seq as u64,
            data,
        })
    }
}

/// Document store on PostgreSQL JSONB
///
/// Table: documents(collection, id, data, version, seq)
///
/// Merge updates lock the row (`SELECT ... FOR UPDATE`) and apply the merge in
/// the same transaction, so array union/remove is atomic and version checks
/// are exact. Both capabilities are therefore reported.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Build the SELECT for a predicate query.
///
/// Field names are inlined as literals rather than bound, so the expression
/// indexes on `data ->> '<field>'` apply to owner and username lookups.
fn select_query<'a>(collection: &'a str, query: &Query) -> StoreResult<QueryBuilder<'a, Postgres>> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT id, data, version, seq FROM documents WHERE collection = ");
    builder.push_bind(collection);

    match &query.filter {
        Some(Filter::FieldEquals { field, value }) => {
            let key = json_key(field)?;
            match value {
                Value::String(text) => {
                    builder.push(format!(
                        " AND jsonb_typeof(data -> {key}) = 'string' AND data ->> {key} = "
                    ));
                    builder.push_bind(text.clone());
                }
                other => {
                    builder.push(format!(" AND data -> {key} = "));
                    builder.push_bind(Json(other.clone()));
                }
            }
        }
        Some(Filter::FieldPrefix { field, prefix }) => {
            builder.push(format!(" AND data ->> {} LIKE ", json_key(field)?));
            builder.push_bind(like_prefix(prefix));
            builder.push(" ESCAPE '\\'");
        }
        None => {}
    }

    match &query.order_by {
        Some(order) => {
            let key = json_key(&order.field)?;
            let dir = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            match order.kind {
                SortKind::Timestamp => {
                    // Anything that is not a valid timestamp sorts last, matching the
                    // in-memory adapter; `try_timestamptz` never raises.
                    builder.push(format!(
                        " ORDER BY CASE WHEN data ->> {key} ~ '^\\d{{4}}-\\d{{2}}-\\d{{2}}T' \
                         THEN try_timestamptz(data ->> {key}) END {dir} NULLS LAST"
                    ));
                }
                SortKind::Text => {
                    builder.push(format!(" ORDER BY data ->> {key} {dir} NULLS LAST"));
                }
            }
            builder.push(format!(", seq {}", dir));
        }
        None => {
            builder.push(" ORDER BY seq ASC");
        }
    }

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit as i64);
    }
    if query.offset > 0 {
        builder.push(" OFFSET ");
        builder.push_bind(query.offset as i64);
    }

    Ok(builder)
}

fn json_key(field: &str) -> StoreResult<String> {
    if !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(format!("'{}'", field))
    } else {
        Err(StoreError::Unsupported("query field names must be [A-Za-z0-9_]"))
    }
}

fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl AggregateStore for PgDocumentStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::FULL
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, data, version, seq
            FROM documents
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Document::try_from).transpose()
    }

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        let mut builder = select_query(collection, query)?;
        let rows = builder
            .build_query_as::<DocumentRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Document::try_from).collect()
    }

    async fn create(&self, collection: &str, data: DocumentData) -> StoreResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, data)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(collection)
        .bind(&id)
        .bind(Json(Value::Object(data)))
        .execute(&self.pool)
        .await?;

        debug!(collection, id = %id, "Created document");
        Ok(id)
    }

    async fn create_with_id(
        &self,
        collection: &str,
        id: &str,
        data: DocumentData,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, id) DO NOTHING
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(Value::Object(data)))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        debug!(collection, id, "Created document");
        Ok(())
    }

    async fn set(&self, collection: &str, id: &str, data: DocumentData) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, id) DO UPDATE
            SET data = EXCLUDED.data,
                version = documents.version + 1,
                updated_at = NOW()
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(Value::Object(data)))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn merge_update(
        &self,
        collection: &str,
        id: &str,
        update: &MergeUpdate,
    ) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, data, version, seq
            FROM documents
            WHERE collection = $1 AND id = $2
            FOR UPDATE
            "#,
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut doc = match row {
            Some(row) => Document::try_from(row)?,
            None => {
                return Err(StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })
            }
        };

        if let Some(expected) = update.expected_version {
            if doc.version != expected {
                return Err(StoreError::Conflict {
                    expected,
                    actual: doc.version,
                });
            }
        }

        apply_merge(&mut doc.data, update);

        let new_version: i64 = sqlx::query_scalar(
            r#"
            UPDATE documents
            SET data = $3, version = version + 1, updated_at = NOW()
            WHERE collection = $1 AND id = $2
            RETURNING version
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(Value::Object(doc.data)))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(new_version as u64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_filter_uses_indexed_expression() {
        let query = Query::new()
            .filter(Filter::equals("userId", "acme"))
            .order_by("createdAt", SortKind::Timestamp, Direction::Desc);
        let builder = select_query("posts", &query).unwrap();
        let sql = builder.sql();

        assert!(sql.contains("data ->> 'userId' = $2"), "{}", sql);
        assert!(sql.contains("try_timestamptz(data ->> 'createdAt')"), "{}", sql);
        assert!(!sql.contains("::timestamptz"), "{}", sql);
    }

    #[test]
    fn test_non_string_equality_compares_jsonb() {
        let query = Query::new().filter(Filter::equals("applicable", true));
        let builder = select_query("posts", &query).unwrap();
        assert!(builder.sql().contains("data -> 'applicable' = $2"));
    }

    #[test]
    fn test_unsafe_field_names_are_rejected() {
        let query = Query::new().filter(Filter::equals("userId' OR '1'='1", "x"));
        assert!(matches!(
            select_query("posts", &query),
            Err(StoreError::Unsupported(_))
        ));
    }

    #[test]
    fn test_like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("al"), "al%");
        assert_eq!(like_prefix("a_b%"), "a\\_b\\%%");
    }
}
