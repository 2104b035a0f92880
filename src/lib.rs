//! A generic, per-partition Kafka event-sourcing worker core.
//!
//! A [`partition_worker`] is a single Kafka partition's cooperative
//! state machine: it bootstraps a state store, consumes and
//! deduplicates records, runs user-supplied processing and interjection
//! handlers, batches their output into exactly-once Kafka transactions
//! through a [`producer_pool`], and shuts down cleanly on revocation.
//! Everything else in this crate exists to support that one component.

pub mod async_completer;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event_context;
pub mod handlers;
pub mod interjection;
pub mod model;
pub mod partition_worker;
pub mod producer_pool;
pub mod run_status;
pub mod state_store;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use config::{KafkaConfig, KafkaTopics, WorkerConfig};
pub use error::{ConfigError, SourceFailure, StateStoreError, TxnError, WorkerError};
pub use event_context::{EventContext, OwnedRecord};
pub use handlers::{EventProcessor, Handlers, Interjector};
pub use interjection::Interjection;
pub use model::{EventSourceState, ExecutionState, TopicPartition};
pub use partition_worker::PartitionWorkerHandle;
pub use producer_pool::{ProducerPool, SharedProducerPool};
pub use run_status::RunStatus;
pub use state_store::{StateStore, Waiter};
