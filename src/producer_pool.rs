use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::ClientConfig;
use tokio::sync::oneshot;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::TxnError;
use crate::event_context::{ProducerHandle, ProducerSlot};
use crate::model::TopicPartition;

/// External collaborator contract: batches registered
/// `EventContext`s into Kafka transactions and, for each one, delivers
/// exactly one value to its `producer_tx` — a slot on success, or
/// nothing (the sender is simply dropped) when the pool is shutting
/// down or the owning partition has been revoked.
#[async_trait]
pub trait ProducerPool: Send + Sync {
    /// Published as the worker's `maxPending` semaphore size.
    fn max_pending_items(&self) -> usize;

    /// Registers a context for a future transactional commit. Contexts
    /// for the same partition must be admitted in the order they are
    /// passed to this method.
    async fn add_event_context(&self, handle: ProducerHandle);
}

/// A reference `ProducerPool` good for tests and small single-broker
/// deployments: one `FutureProducer` per pool instance, transactions
/// batched up to `max_pending_items` contexts or a linger timeout,
/// whichever comes first. A production deployment sharing one
/// transactional producer across many partition workers is expected to
/// implement the same trait with its own batching strategy — this type
/// is not meant to be the only implementation.
pub struct InProcessProducerPool {
    max_pending_items: usize,
    linger: Duration,
    state: Mutex<PoolState>,
}

/// A context whose producer slot has already been delivered; the pool
/// now only needs to wait for `EventContext::complete()` before folding
/// it into a transaction commit.
struct PendingCommit {
    partition: TopicPartition,
    completion_rx: oneshot::Receiver<()>,
}

struct PoolState {
    producer: Option<FutureProducer>,
    pending: VecDeque<PendingCommit>,
    next_transaction_id: u64,
    shutting_down: bool,
}

impl InProcessProducerPool {
    /// The configured linger: how long a background flush task (not
    /// implemented by this reference pool, which flushes synchronously
    /// once `max_pending_items` is reached) would wait for more
    /// contexts before committing a partial batch.
    pub fn linger(&self) -> Duration {
        self.linger
    }

    pub fn new(
        config: &KafkaConfig,
        transactional_id: &str,
        max_pending_items: usize,
    ) -> Result<Self, TxnError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("transactional.id", transactional_id);

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        debug!("rdkafka producer configuration: {:?}", client_config);
        let producer: FutureProducer = client_config.create()?;
        producer.init_transactions(Duration::from_secs(30))?;

        Ok(Self {
            max_pending_items,
            linger: Duration::from_millis(config.kafka_producer_linger_ms as u64),
            state: Mutex::new(PoolState {
                producer: Some(producer),
                pending: VecDeque::new(),
                next_transaction_id: 0,
                shutting_down: false,
            }),
        })
    }

    /// Marks the pool as shutting down so any further
    /// `add_event_context` calls are immediately abandoned (their
    /// `producer_tx` dropped, delivering `None`). Contexts already
    /// admitted keep the producer slot they were already given; they
    /// still need to be drained through `flush` or they will simply
    /// never commit, the same as a pool process dying mid-batch.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shutting_down = true;
    }

    /// Drives one commit cycle: waits for `EventContext::complete()` on
    /// every currently registered context (each already holds its
    /// producer slot, delivered at admission time in `add_event_context`),
    /// then opens and commits one Kafka transaction for the whole batch.
    /// A real pool would instead run this on a background task armed by
    /// `linger`/`max_pending_items`; it is exposed as an explicit method
    /// here so tests can drive it deterministically.
    pub async fn flush(&self) -> Result<(), TxnError> {
        let mut state = self.state.lock().await;
        if state.pending.is_empty() {
            return Ok(());
        }

        let mut batch: Vec<PendingCommit> = state.pending.drain(..).collect();
        let transaction_id = state.next_transaction_id;
        state.next_transaction_id += 1;

        let producer = state
            .producer
            .as_ref()
            .ok_or(TxnError::PoolShuttingDown)?
            .clone();

        drop(state);

        for pending in &mut batch {
            // The worker guarantees `complete()` is eventually called
            // for every admitted context, but we must not block forever
            // if that guarantee is ever violated by a caller.
            match tokio::time::timeout(Duration::from_secs(60), &mut pending.completion_rx).await {
                Ok(_) => {}
                Err(_) => {
                    error!(partition = %pending.partition, "timed out waiting for context completion, aborting batch");
                    return Err(TxnError::PoolShuttingDown);
                }
            }
        }

        producer.begin_transaction()?;
        producer.commit_transaction(Duration::from_secs(30))?;

        info!(count = batch.len(), transaction_id, "committed transaction");

        Ok(())
    }
}

#[async_trait]
impl ProducerPool for InProcessProducerPool {
    fn max_pending_items(&self) -> usize {
        self.max_pending_items
    }

    /// Delivers the producer slot immediately: the dispatch loop is
    /// waiting on it before it can even hand the context to the user
    /// handler, and the handler is what eventually calls `complete()`
    /// that `flush` needs to wait on. Deferring slot delivery until
    /// completion would deadlock the worker against itself.
    async fn add_event_context(&self, handle: ProducerHandle) {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            warn!(partition = %handle.partition, "abandoning context: producer pool shutting down");
            drop(handle.producer_tx);
            return;
        }

        let transaction_id = state.next_transaction_id;
        let _ = handle
            .producer_tx
            .send(Some(ProducerSlot { transaction_id }));
        state.pending.push_back(PendingCommit {
            partition: handle.partition,
            completion_rx: handle.completion_rx,
        });
        let ready = state.pending.len() >= self.max_pending_items;
        drop(state);

        if ready {
            if let Err(err) = self.flush().await {
                error!("producer pool flush failed: {err}");
            }
        }
    }
}

/// Convenience alias used by the worker when it needs to share one pool
/// across the API boundary without committing to a concrete type.
pub type SharedProducerPool = Arc<dyn ProducerPool>;
