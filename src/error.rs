use thiserror::Error;

use crate::model::TopicPartition;

/// Errors surfaced while constructing or tearing down a partition worker.
/// Per-record errors never reach this type — they are routed through the
/// configured `DeserializationErrorHandler` / `TxnErrorHandler` instead
/// (see [`crate::handlers`]).
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("state store bootstrap failed for {partition}: {source}")]
    Bootstrap {
        partition: TopicPartition,
        #[source]
        source: StateStoreError,
    },
    #[error("producer pool rejected registration for {partition}: {reason}")]
    ProducerPoolUnavailable {
        partition: TopicPartition,
        reason: String,
    },
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("change-log replay failed: {0}")]
    Replay(String),
    #[error("partition {0} was never assigned")]
    NotAssigned(TopicPartition),
}

#[derive(Error, Debug)]
pub enum TxnError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("producer pool is shutting down")]
    PoolShuttingDown,
}

/// A single terminal error for an event source, delivered exactly once.
/// A second delivery is a programming error in the caller, not a
/// recoverable condition.
#[derive(Error, Debug, Clone)]
#[error("source failure on {partition}: {reason}")]
pub struct SourceFailure {
    pub partition: TopicPartition,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment configuration error: {0}")]
    Env(#[from] envconfig::Error),
}
