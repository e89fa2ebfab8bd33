use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::debug;
use uuid::Uuid;

use super::{
    apply_merge, AggregateStore, Document, DocumentData, MergeUpdate, Query, StoreCapabilities,
    StoreError, StoreResult,
};

#[derive(Debug, Clone)]
struct StoredDocument {
    version: u64,
    seq: u64,
    data: DocumentData,
}

#[derive(Debug, Default)]
struct Collections {
    next_seq: u64,
    by_name: HashMap<String, HashMap<String, StoredDocument>>,
}

/// Process-local document store
///
/// Used for local development and tests. Capabilities can be narrowed to
/// exercise the engine's fallback paths, and two fault hooks simulate the
/// remote store misbehaving:
/// - `set_unavailable(true)` fails every call with `StoreError::Unavailable`
/// - `inject_concurrent_writes(n)` makes the next `n` conditional writes
///   observe a foreign write first, so they fail with `StoreError::Conflict`
pub struct InMemoryStore {
    inner: RwLock<Collections>,
    capabilities: StoreCapabilities,
    unavailable: AtomicBool,
    pending_foreign_writes: AtomicU32,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_capabilities(StoreCapabilities::FULL)
    }

    pub fn with_capabilities(capabilities: StoreCapabilities) -> Self {
        Self {
            inner: RwLock::new(Collections::default()),
            capabilities,
            unavailable: AtomicBool::new(false),
            pending_foreign_writes: AtomicU32::new(0),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn inject_concurrent_writes(&self, count: u32) {
        self.pending_foreign_writes.store(count, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store switched offline".to_string(),
            ));
        }
        Ok(())
    }

    fn take_foreign_write(&self) -> bool {
        self.pending_foreign_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AggregateStore for InMemoryStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.ensure_available()?;
        let inner = self.inner.read();
        Ok(inner
            .by_name
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|stored| Document {
                id: id.to_string(),
                version: stored.version,
                seq: stored.seq,
                data: stored.data.clone(),
            }))
    }

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        self.ensure_available()?;
        let inner = self.inner.read();
        let Some(docs) = inner.by_name.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<Document> = docs
            .iter()
            .filter(|(_, stored)| {
                query
                    .filter
                    .as_ref()
                    .map(|f| f.matches(&stored.data))
                    .unwrap_or(true)
            })
            .map(|(id, stored)| Document {
                id: id.clone(),
                version: stored.version,
                seq: stored.seq,
                data: stored.data.clone(),
            })
            .collect();

        matched.sort_by(|a, b| query.compare(a, b));

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(query.offset).take(limit).collect())
    }

    async fn create(&self, collection: &str, data: DocumentData) -> StoreResult<String> {
        self.ensure_available()?;
        let id = Uuid::new_v4().simple().to_string();
        let mut inner = self.inner.write();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner
            .by_name
            .entry(collection.to_string())
            .or_default()
            .insert(
                id.clone(),
                StoredDocument {
                    version: 1,
                    seq,
                    data,
                },
            );
        debug!(collection, id = %id, "Created document");
        Ok(id)
    }

    async fn create_with_id(
        &self,
        collection: &str,
        id: &str,
        data: DocumentData,
    ) -> StoreResult<()> {
        self.ensure_available()?;
        let mut inner = self.inner.write();
        let next_seq = inner.next_seq + 1;
        let docs = inner.by_name.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        docs.insert(
            id.to_string(),
            StoredDocument {
                version: 1,
                seq: next_seq,
                data,
            },
        );
        inner.next_seq = next_seq;
        debug!(collection, id, "Created document");
        Ok(())
    }

    async fn set(&self, collection: &str, id: &str, data: DocumentData) -> StoreResult<()> {
        self.ensure_available()?;
        let mut inner = self.inner.write();
        inner.next_seq += 1;
        let next_seq = inner.next_seq;
        let docs = inner.by_name.entry(collection.to_string()).or_default();
        match docs.get_mut(id) {
            Some(stored) => {
                stored.version += 1;
                stored.data = data;
            }
            None => {
                docs.insert(
                    id.to_string(),
                    StoredDocument {
                        version: 1,
                        seq: next_seq,
                        data,
                    },
                );
            }
        }
        Ok(())
    }

    async fn merge_update(
        &self,
        collection: &str,
        id: &str,
        update: &MergeUpdate,
    ) -> StoreResult<u64> {
        self.ensure_available()?;
        if update.uses_array_ops() && !self.capabilities.array_ops {
            return Err(StoreError::Unsupported("array union/remove"));
        }
        if update.expected_version.is_some() && !self.capabilities.conditional_writes {
            return Err(StoreError::Unsupported("conditional writes"));
        }

        let mut inner = self.inner.write();
        let stored = inner
            .by_name
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        if let Some(expected) = update.expected_version {
            if self.take_foreign_write() {
                stored.version += 1;
            }
            if stored.version != expected {
                return Err(StoreError::Conflict {
                    expected,
                    actual: stored.version,
                });
            }
        }

        apply_merge(&mut stored.data, update);
        stored.version += 1;
        Ok(stored.version)
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.ensure_available()
    }
}
