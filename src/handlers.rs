use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::TxnError;
use crate::event_context::{EventContext, OwnedRecord};
use crate::model::{ExecutionState, TopicPartition};

/// User-supplied per-record handler. Takes the record alongside the
/// context so the handler doesn't have to re-derive it from `ec.input()`
/// (which is only `Some` for record-bound contexts in the first place).
/// May read/mutate state through `ec.state()`, schedule asynchronous
/// work via `ec.async_complete`, and must return one of `Complete`,
/// `Incomplete`, or `Fatal`.
#[async_trait]
pub trait EventProcessor<S>: Send + Sync {
    async fn process(&self, ec: &Arc<EventContext<S>>, record: &OwnedRecord) -> ExecutionState;
}

/// User-supplied interjection handler, same return contract as
/// `EventProcessor`.
#[async_trait]
pub trait Interjector<S>: Send + Sync {
    async fn interject(&self, ec: &Arc<EventContext<S>>) -> ExecutionState;
}

/// Invoked when a record's payload cannot be handed to the user
/// processor (e.g. it failed a deserialization step upstream of this
/// crate). The default handler logs and drops the record.
pub trait DeserializationErrorHandler: Send + Sync {
    fn handle(&self, partition: &TopicPartition, offset: i64, error: &str);
}

pub struct DefaultDeserializationErrorHandler;

impl DeserializationErrorHandler for DefaultDeserializationErrorHandler {
    fn handle(&self, partition: &TopicPartition, offset: i64, error: &str) {
        warn!(%partition, offset, error, "dropping record: deserialization failed");
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnErrorAction {
    /// The caller may retry the same transaction.
    Retry,
    /// Unrecoverable: escalate to source failure.
    Escalate,
}

/// Invoked when the producer pool reports a transaction error. The
/// default handler always escalates.
pub trait TxnErrorHandler: Send + Sync {
    fn handle(&self, partition: &TopicPartition, error: &TxnError) -> TxnErrorAction;
}

pub struct DefaultTxnErrorHandler;

impl TxnErrorHandler for DefaultTxnErrorHandler {
    fn handle(&self, partition: &TopicPartition, error: &TxnError) -> TxnErrorAction {
        error!(%partition, %error, "transaction error, escalating to source failure");
        TxnErrorAction::Escalate
    }
}

/// Invoked on partition activation (bootstrap complete) and on
/// revocation. The default handler just logs.
pub trait SourcePartitionEventHandler: Send + Sync {
    fn on_partition_activated(&self, partition: &TopicPartition);
    fn on_partition_revoked(&self, partition: &TopicPartition);
}

pub struct DefaultSourcePartitionEventHandler;

impl SourcePartitionEventHandler for DefaultSourcePartitionEventHandler {
    fn on_partition_activated(&self, partition: &TopicPartition) {
        info!(%partition, "partition activated");
    }

    fn on_partition_revoked(&self, partition: &TopicPartition) {
        info!(%partition, "partition revoked");
    }
}

/// Bundles the optional handlers a worker is constructed with, each
/// falling back to its default when unset, independently of whether any
/// other handler was set (see DESIGN.md for the rationale).
pub struct Handlers<S> {
    pub deserialization: Arc<dyn DeserializationErrorHandler>,
    pub txn: Arc<dyn TxnErrorHandler>,
    pub source_partition_events: Arc<dyn SourcePartitionEventHandler>,
    pub processor: Arc<dyn EventProcessor<S>>,
}

impl<S> Handlers<S> {
    pub fn new(processor: Arc<dyn EventProcessor<S>>) -> Self {
        Self {
            deserialization: Arc::new(DefaultDeserializationErrorHandler),
            txn: Arc::new(DefaultTxnErrorHandler),
            source_partition_events: Arc::new(DefaultSourcePartitionEventHandler),
            processor,
        }
    }

    pub fn with_deserialization(mut self, handler: Arc<dyn DeserializationErrorHandler>) -> Self {
        self.deserialization = handler;
        self
    }

    pub fn with_txn(mut self, handler: Arc<dyn TxnErrorHandler>) -> Self {
        self.txn = handler;
        self
    }

    pub fn with_source_partition_events(
        mut self,
        handler: Arc<dyn SourcePartitionEventHandler>,
    ) -> Self {
        self.source_partition_events = handler;
        self
    }
}
