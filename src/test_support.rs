//! In-process fakes for driving a [`crate::partition_worker`] in tests
//! without a live broker. Gated behind the `test-support` feature so it
//! never ships in an ordinary build.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::event_context::{ProducerHandle, ProducerSlot};
use crate::model::TopicPartition;
use crate::producer_pool::ProducerPool;

/// How a [`FakeProducerPool`] resolves registered contexts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignMode {
    /// Every registration is immediately fulfilled with a fresh slot.
    AutoAssign,
    /// Registrations accumulate until a test calls `assign_all` or
    /// `abandon_all`.
    Manual,
}

struct FakeProducerPoolState {
    pending: VecDeque<ProducerHandle>,
    next_transaction_id: u64,
}

/// A `ProducerPool` whose assignment behaviour a test controls directly,
/// grounded in the same "register now, resolve later" contract the real
/// pool implements.
pub struct FakeProducerPool {
    mode: AssignMode,
    max_pending_items: usize,
    state: Mutex<FakeProducerPoolState>,
}

impl FakeProducerPool {
    pub fn new(mode: AssignMode, max_pending_items: usize) -> Arc<Self> {
        Arc::new(Self {
            mode,
            max_pending_items,
            state: Mutex::new(FakeProducerPoolState {
                pending: VecDeque::new(),
                next_transaction_id: 0,
            }),
        })
    }

    /// Fulfils every currently pending registration with a slot, in
    /// first-registered-first-assigned order.
    pub fn assign_all(&self) {
        let mut state = self.state.lock().unwrap();
        let batch: Vec<ProducerHandle> = state.pending.drain(..).collect();
        let transaction_id = state.next_transaction_id;
        state.next_transaction_id += 1;
        drop(state);

        for handle in batch {
            let _ = handle.producer_tx.send(Some(ProducerSlot { transaction_id }));
        }
    }

    /// Drops every currently pending registration's sender, delivering
    /// `None` — the abandonment path exercised by mid-flight revocation.
    pub fn abandon_all(&self) {
        let mut state = self.state.lock().unwrap();
        for handle in state.pending.drain(..) {
            drop(handle.producer_tx);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}

#[async_trait]
impl ProducerPool for FakeProducerPool {
    fn max_pending_items(&self) -> usize {
        self.max_pending_items
    }

    async fn add_event_context(&self, handle: ProducerHandle) {
        match self.mode {
            AssignMode::AutoAssign => {
                let _ = handle.producer_tx.send(Some(ProducerSlot { transaction_id: 0 }));
            }
            AssignMode::Manual => {
                self.state.lock().unwrap().pending.push_back(handle);
            }
        }
    }
}

/// Records every `pause`/`resume` call a test cares to assert against.
#[derive(Default)]
pub struct FakeConsumerHandle {
    calls: Mutex<Vec<(TopicPartition, bool)>>,
}

impl FakeConsumerHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(TopicPartition, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

impl crate::consumer::ConsumerHandle for FakeConsumerHandle {
    fn pause(&self, tp: &TopicPartition) -> Result<(), rdkafka::error::KafkaError> {
        self.calls.lock().unwrap().push((tp.clone(), true));
        Ok(())
    }

    fn resume(&self, tp: &TopicPartition) -> Result<(), rdkafka::error::KafkaError> {
        self.calls.lock().unwrap().push((tp.clone(), false));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_assign_resolves_immediately() {
        let pool = FakeProducerPool::new(AssignMode::AutoAssign, 4);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let (_completion_tx, completion_rx) = tokio::sync::oneshot::channel();
        pool.add_event_context(ProducerHandle {
            partition: TopicPartition::new("orders", 0),
            offset: Some(1),
            producer_tx: tx,
            completion_rx,
        })
        .await;

        assert!(rx.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn manual_mode_holds_until_assign_all() {
        let pool = FakeProducerPool::new(AssignMode::Manual, 4);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let (_completion_tx, completion_rx) = tokio::sync::oneshot::channel();
        pool.add_event_context(ProducerHandle {
            partition: TopicPartition::new("orders", 0),
            offset: Some(1),
            producer_tx: tx,
            completion_rx,
        })
        .await;

        assert_eq!(pool.pending_count(), 1);
        pool.assign_all();
        assert_eq!(pool.pending_count(), 0);
        assert!(rx.await.unwrap().is_some());
    }
}
