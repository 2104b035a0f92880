use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::StateStoreError;
use crate::model::TopicPartition;

/// One record replayed from a compacted change-log topic while a
/// partition's state store is bootstrapping. `value: None` is a
/// tombstone.
#[derive(Clone, Debug)]
pub struct ChangeLogRecord {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// External collaborator contract: a per-partition mutable key/value
/// state store backed by a change-log topic. The worker core is
/// generic over `StateStore::Partition`, the cheap, cloneable handle a
/// user's `EventProcessor` reads and mutates through.
#[async_trait]
pub trait StateStore: Send + Sync {
    type Partition: Clone + Send + Sync + 'static;

    /// Returns the (possibly not-yet-bootstrapped) partition handle.
    async fn partition(&self, tp: &TopicPartition) -> Self::Partition;
}

/// A closure supplied at `PartitionWorker` construction that blocks
/// until this partition's change-log has been replayed up to its
/// log-end offset at construction time. Modelled as a boxed future
/// rather than a plain blocking function because the replay itself is
/// inherently asynchronous (it is driven by Kafka consumption).
pub type Waiter = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), StateStoreError>> + Send>;

/// A minimal in-memory `StateStore` good enough for tests and for
/// exercising the bootstrap/pause/resume lifecycle without a real
/// compacted topic.
#[derive(Default, Clone)]
pub struct InMemoryStateStore {
    partitions: Arc<Mutex<HashMap<TopicPartition, InMemoryPartition>>>,
}

/// Cloneable handle into one partition's in-memory map. Clones share the
/// same underlying storage.
#[derive(Clone, Default)]
pub struct InMemoryPartition {
    inner: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryPartition {
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.lock().unwrap().insert(key, value);
    }

    pub fn delete(&self, key: &[u8]) {
        self.inner.lock().unwrap().remove(key);
    }

    fn apply(&self, record: ChangeLogRecord) {
        match record.value {
            Some(value) => self.put(record.key, value),
            None => self.delete(&record.key),
        }
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition_sync(&self, tp: &TopicPartition) -> InMemoryPartition {
        self.partitions
            .lock()
            .unwrap()
            .entry(tp.clone())
            .or_default()
            .clone()
    }

    /// Builds the `Waiter` closure a `PartitionWorker` will call during
    /// bootstrap, replaying `records` into this partition's map before
    /// resolving — standing in for "replay the change-log topic up to
    /// its current log-end offset".
    pub fn waiter_for(&self, tp: &TopicPartition, records: Vec<ChangeLogRecord>) -> Waiter {
        let partition = self.partition_sync(tp);
        Box::new(move || {
            Box::pin(async move {
                for record in records {
                    partition.apply(record);
                }
                Ok(())
            })
        })
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    type Partition = InMemoryPartition;

    async fn partition(&self, tp: &TopicPartition) -> Self::Partition {
        self.partition_sync(tp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiter_replays_change_log_before_resolving() {
        let store = InMemoryStateStore::new();
        let tp = TopicPartition::new("orders", 0);

        let records = vec![
            ChangeLogRecord {
                key: b"a".to_vec(),
                value: Some(b"1".to_vec()),
            },
            ChangeLogRecord {
                key: b"b".to_vec(),
                value: Some(b"2".to_vec()),
            },
            ChangeLogRecord {
                key: b"a".to_vec(),
                value: None,
            },
        ];

        let waiter = store.waiter_for(&tp, records);
        waiter().await.unwrap();

        let partition = store.partition(&tp).await;
        assert_eq!(partition.get(b"a"), None);
        assert_eq!(partition.get(b"b"), Some(b"2".to_vec()));
    }
}
