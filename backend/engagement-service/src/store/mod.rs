/// Aggregate store contract
///
/// The engine talks to a remote document store through this trait only. The
/// contract is deliberately small: get by key, query by predicate, create,
/// and a shallow field-level merge. Array fields are replaced wholesale by
/// `FieldUpdate::Set`; adapters that can apply `ArrayUnion` / `ArrayRemove`
/// atomically advertise it through `StoreCapabilities::array_ops`, and
/// adapters that honour `expected_version` advertise `conditional_writes`.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod postgres;
pub mod timed;

pub use memory::InMemoryStore;
pub use postgres::PgDocumentStore;
pub use timed::TimedStore;

pub type DocumentData = Map<String, Value>;

/// A stored document together with its store metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    /// Incremented on every successful write
    pub version: u64,
    /// Insertion sequence, used as the stable tie-breaker for ordering
    pub seq: u64,
    pub data: DocumentData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Replace the field wholesale
    Set(Value),
    /// Append each element not already present, preserving order
    ArrayUnion(Vec<Value>),
    /// Remove every element equal to one of the given values
    ArrayRemove(Vec<Value>),
}

/// Shallow merge applied to a single document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeUpdate {
    pub fields: Vec<(String, FieldUpdate)>,
    /// When set, the write only succeeds if the stored version still matches
    pub expected_version: Option<u64>,
}

impl MergeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.push((field.into(), FieldUpdate::Set(value)));
        self
    }

    pub fn array_union(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.fields.push((field.into(), FieldUpdate::ArrayUnion(values)));
        self
    }

    pub fn array_remove(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.fields.push((field.into(), FieldUpdate::ArrayRemove(values)));
        self
    }

    pub fn if_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn uses_array_ops(&self) -> bool {
        self.fields
            .iter()
            .any(|(_, op)| !matches!(op, FieldUpdate::Set(_)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    FieldEquals { field: String, value: Value },
    FieldPrefix { field: String, prefix: String },
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Filter::FieldPrefix {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    pub fn matches(&self, data: &DocumentData) -> bool {
        match self {
            Filter::FieldEquals { field, value } => data.get(field) == Some(value),
            Filter::FieldPrefix { field, prefix } => data
                .get(field)
                .and_then(Value::as_str)
                .map(|s| s.starts_with(prefix.as_str()))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKind {
    /// RFC 3339 timestamps, compared chronologically
    Timestamp,
    /// Plain string comparison
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub kind: SortKind,
    pub direction: Direction,
}

/// Predicate query. Results are ordered by `order_by` (missing or
/// unparseable keys last), ties broken by insertion sequence in the same
/// direction; without `order_by` the insertion order is used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Option<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, kind: SortKind, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            kind,
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Compare two documents according to this query's ordering.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let Some(order) = &self.order_by else {
            return a.seq.cmp(&b.seq);
        };

        let primary = match order.kind {
            SortKind::Timestamp => compare_keys(
                timestamp_key(&a.data, &order.field),
                timestamp_key(&b.data, &order.field),
                order.direction,
            ),
            SortKind::Text => compare_keys(
                a.data.get(&order.field).and_then(Value::as_str),
                b.data.get(&order.field).and_then(Value::as_str),
                order.direction,
            ),
        };

        primary.then_with(|| match order.direction {
            Direction::Asc => a.seq.cmp(&b.seq),
            Direction::Desc => b.seq.cmp(&a.seq),
        })
    }
}

fn timestamp_key(data: &DocumentData, field: &str) -> Option<DateTime<Utc>> {
    data.get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

// Missing keys sort last regardless of direction.
fn compare_keys<K: Ord>(a: Option<K>, b: Option<K>, direction: Direction) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match direction {
            Direction::Asc => a.cmp(&b),
            Direction::Desc => b.cmp(&a),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// What an adapter can do beyond plain get / query / set-merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// `ArrayUnion` / `ArrayRemove` are applied atomically by the store
    pub array_ops: bool,
    /// `expected_version` is honoured (compare-and-swap on the document)
    pub conditional_writes: bool,
}

impl StoreCapabilities {
    pub const FULL: StoreCapabilities = StoreCapabilities {
        array_ops: true,
        conditional_writes: true,
    };

    pub const MERGE_ONLY: StoreCapabilities = StoreCapabilities {
        array_ops: false,
        conditional_writes: false,
    };
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    #[error("Version conflict: expected {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("Unsupported store operation: {0}")]
    Unsupported(&'static str),

    #[error("Corrupt document: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Only version conflicts are worth re-reading and trying again.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(err.to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Remote document store consumed by the engagement engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AggregateStore: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities;

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>>;

    /// Create a document under a store-generated key and return the key
    async fn create(&self, collection: &str, data: DocumentData) -> StoreResult<String>;

    /// Create a document under a caller-chosen key. Never overwrites: an
    /// existing key fails with `AlreadyExists`.
    async fn create_with_id(&self, collection: &str, id: &str, data: DocumentData)
        -> StoreResult<()>;

    /// Create or fully overwrite the document stored under `id`
    async fn set(&self, collection: &str, id: &str, data: DocumentData) -> StoreResult<()>;

    /// Apply a shallow merge and return the new document version
    async fn merge_update(&self, collection: &str, id: &str, update: &MergeUpdate)
        -> StoreResult<u64>;

    /// Health check (optional)
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Apply `update` to `data` in place. Shared by every adapter so that merge
/// semantics cannot drift between backends.
pub fn apply_merge(data: &mut DocumentData, update: &MergeUpdate) {
    for (field, op) in &update.fields {
        match op {
            FieldUpdate::Set(value) => {
                data.insert(field.clone(), value.clone());
            }
            FieldUpdate::ArrayUnion(values) => {
                let mut current = take_array(data, field);
                for value in values {
                    if !current.contains(value) {
                        current.push(value.clone());
                    }
                }
                data.insert(field.clone(), Value::Array(current));
            }
            FieldUpdate::ArrayRemove(values) => {
                let mut current = take_array(data, field);
                current.retain(|v| !values.contains(v));
                data.insert(field.clone(), Value::Array(current));
            }
        }
    }
}

// A non-array value under an array op is treated as an empty array.
fn take_array(data: &mut DocumentData, field: &str) -> Vec<Value> {
    match data.remove(field) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(seq: u64, data: Value) -> Document {
        Document {
            id: format!("d{}", seq),
            version: 1,
            seq,
            data: data.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_array_union_appends_missing_only() {
        let mut data = json!({"likes": ["a", "b"]}).as_object().cloned().unwrap();
        apply_merge(
            &mut data,
            &MergeUpdate::new().array_union("likes", vec![json!("b"), json!("c"), json!("c")]),
        );
        assert_eq!(data["likes"], json!(["a", "b", "c"]));
    }

    #[test]
    fn test_array_remove_on_missing_field_yields_empty_array() {
        let mut data = DocumentData::new();
        apply_merge(&mut data, &MergeUpdate::new().array_remove("likes", vec![json!("a")]));
        assert_eq!(data["likes"], json!([]));
    }

    #[test]
    fn test_set_replaces_wholesale() {
        let mut data = json!({"likes": ["a"], "caption": "x"}).as_object().cloned().unwrap();
        apply_merge(&mut data, &MergeUpdate::new().set("likes", json!(["z"])));
        assert_eq!(data["likes"], json!(["z"]));
        assert_eq!(data["caption"], json!("x"));
    }

    #[test]
    fn test_timestamp_ordering_is_chronological_not_lexical() {
        // "…00Z" sorts after "…00.500Z" lexically but is earlier in time
        let early = doc(1, json!({"createdAt": "2024-01-01T00:00:00Z"}));
        let late = doc(2, json!({"createdAt": "2024-01-01T00:00:00.500Z"}));
        let query = Query::new().order_by("createdAt", SortKind::Timestamp, Direction::Desc);
        assert_eq!(query.compare(&late, &early), Ordering::Less);
    }

    #[test]
    fn test_ties_break_on_insertion_sequence() {
        let first = doc(1, json!({"createdAt": "2024-01-01T00:00:00Z"}));
        let second = doc(2, json!({"createdAt": "2024-01-01T00:00:00Z"}));
        let desc = Query::new().order_by("createdAt", SortKind::Timestamp, Direction::Desc);
        let asc = Query::new().order_by("createdAt", SortKind::Timestamp, Direction::Asc);
        assert_eq!(desc.compare(&second, &first), Ordering::Less);
        assert_eq!(asc.compare(&first, &second), Ordering::Less);
    }

    #[test]
    fn test_missing_sort_key_sorts_last() {
        let dated = doc(2, json!({"createdAt": "2024-01-01T00:00:00Z"}));
        let undated = doc(1, json!({}));
        let out_of_range = doc(3, json!({"createdAt": "2024-13-45T00:00:00Z"}));
        let query = Query::new().order_by("createdAt", SortKind::Timestamp, Direction::Desc);
        assert_eq!(query.compare(&dated, &undated), Ordering::Less);
        assert_eq!(query.compare(&dated, &out_of_range), Ordering::Less);
        assert_eq!(query.compare(&out_of_range, &undated), Ordering::Less);
    }

    #[test]
    fn test_prefix_filter() {
        let data = json!({"username": "alice"}).as_object().cloned().unwrap();
        assert!(Filter::prefix("username", "ali").matches(&data));
        assert!(!Filter::prefix("username", "bob").matches(&data));
        assert!(Filter::equals("username", "alice").matches(&data));
    }
}
