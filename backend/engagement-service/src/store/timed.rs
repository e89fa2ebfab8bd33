use async_trait::async_trait;
use resilience::{with_timeout_result, TimeoutError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{
    AggregateStore, Document, DocumentData, MergeUpdate, Query, StoreCapabilities, StoreError,
    StoreResult,
};

/// Bounds every call of the wrapped store by a fixed deadline.
///
/// An elapsed deadline surfaces as `StoreError::Timeout`; nothing is retried.
pub struct TimedStore {
    inner: Arc<dyn AggregateStore>,
    timeout: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn AggregateStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, future: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        with_timeout_result(self.timeout, future)
            .await
            .map_err(|e| match e {
                TimeoutError::Elapsed(after) => StoreError::Timeout(after),
                TimeoutError::Inner(inner) => inner,
            })
    }
}

#[async_trait]
impl AggregateStore for TimedStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.inner.capabilities()
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.bounded(self.inner.get(collection, id)).await
    }

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        self.bounded(self.inner.query(collection, query)).await
    }

    async fn create(&self, collection: &str, data: DocumentData) -> StoreResult<String> {
        self.bounded(self.inner.create(collection, data)).await
    }

    async fn create_with_id(
        &self,
        collection: &str,
        id: &str,
        data: DocumentData,
    ) -> StoreResult<()> {
        self.bounded(self.inner.create_with_id(collection, id, data))
            .await
    }

    async fn set(&self, collection: &str, id: &str, data: DocumentData) -> StoreResult<()> {
        self.bounded(self.inner.set(collection, id, data)).await
    }

    async fn merge_update(
        &self,
        collection: &str,
        id: &str,
        update: &MergeUpdate,
    ) -> StoreResult<u64> {
        self.bounded(self.inner.merge_update(collection, id, update))
            .await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.bounded(self.inner.health_check()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockAggregateStore;

    struct SlowStore;

    #[async_trait]
    impl AggregateStore for SlowStore {
        fn capabilities(&self) -> StoreCapabilities {
            StoreCapabilities::FULL
        }

        async fn get(&self, _: &str, _: &str) -> StoreResult<Option<Document>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }

        async fn query(&self, _: &str, _: &Query) -> StoreResult<Vec<Document>> {
            Ok(Vec::new())
        }

        async fn create(&self, _: &str, _: DocumentData) -> StoreResult<String> {
            Ok("id".to_string())
        }

        async fn create_with_id(&self, _: &str, _: &str, _: DocumentData) -> StoreResult<()> {
            Ok(())
        }

        async fn set(&self, _: &str, _: &str, _: DocumentData) -> StoreResult<()> {
            Ok(())
        }

        async fn merge_update(&self, _: &str, _: &str, _: &MergeUpdate) -> StoreResult<u64> {
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = TimedStore::new(Arc::new(SlowStore), Duration::from_millis(20));
        assert!(matches!(
            store.get("posts", "p1").await,
            Err(StoreError::Timeout(_))
        ));
        assert!(store.query("posts", &Query::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inner_errors_pass_through_unchanged() {
        let mut mock = MockAggregateStore::new();
        mock.expect_get()
            .times(1)
            .returning(|_, _| Err(StoreError::Unavailable("down".into())));

        let store = TimedStore::new(Arc::new(mock), Duration::from_secs(1));
        assert_eq!(
            store.get("posts", "p1").await.unwrap_err(),
            StoreError::Unavailable("down".into())
        );
    }
}
