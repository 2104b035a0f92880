use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit};
use tracing::warn;

use crate::model::{ExecutionState, TopicPartition};

/// An owned, deserialization-agnostic view of one Kafka record. The
/// worker core does not know how to deserialize payloads — that is the
/// user handler's job — so records are carried as raw bytes.
#[derive(Clone, Debug)]
pub struct OwnedRecord {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub timestamp: Option<i64>,
}

impl OwnedRecord {
    pub fn offset(&self) -> i64 {
        self.offset
    }
}

/// What one `EventContext` was created for.
pub enum EventInput {
    Record(OwnedRecord),
    Interjection(Arc<crate::interjection::Interjection>),
}

impl EventInput {
    pub fn offset(&self) -> Option<i64> {
        match self {
            EventInput::Record(r) => Some(r.offset),
            EventInput::Interjection(_) => None,
        }
    }
}

/// An opaque handle to a producer-pool transaction slot. The worker
/// never inspects its contents; it only checks for presence (assigned)
/// versus absence (pool shutting down / partition revoked).
#[derive(Clone, Debug)]
pub struct ProducerSlot {
    pub transaction_id: u64,
}

/// The half of an `EventContext` that is registered with the producer
/// pool. The pool holds this, stages the context's output records into
/// its next transaction, and eventually fulfils `producer_tx` with a
/// slot (success) or drops it (abandoned).
pub struct ProducerHandle {
    pub partition: TopicPartition,
    pub offset: Option<i64>,
    pub producer_tx: oneshot::Sender<Option<ProducerSlot>>,
    /// Resolves once the owning `EventContext::complete()` has been
    /// called, telling the pool this context's work is done and it may
    /// be folded into the next transaction commit.
    pub completion_rx: oneshot::Receiver<()>,
}

/// A finalizer for asynchronous user-handler work, queued via
/// `EventContext::async_complete` and run by the dispatch loop's
/// `AsyncCompleter`.
pub struct AsyncJob<S> {
    pub(crate) context: Arc<EventContext<S>>,
    pub(crate) finalizer: Box<dyn FnOnce() -> BoxFuture<'static, ExecutionState> + Send>,
}

impl<S> AsyncJob<S> {
    pub fn new<F>(context: Arc<EventContext<S>>, finalizer: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, ExecutionState> + Send + 'static,
    {
        Self {
            context,
            finalizer: Box::new(finalizer),
        }
    }

    pub async fn run(self) -> (Arc<EventContext<S>>, ExecutionState) {
        let state = (self.finalizer)().await;
        (self.context, state)
    }
}

/// Per-record or per-interjection processing handle. Owns the state
/// partition handle the user processor operates on, the single-slot
/// producer reservation, and the completion/permit bookkeeping that
/// keeps `maxPending` balanced.
pub struct EventContext<S> {
    input: EventInput,
    partition: TopicPartition,
    state: S,
    producer_rx: Mutex<Option<oneshot::Receiver<Option<ProducerSlot>>>>,
    completion_tx: Mutex<Option<oneshot::Sender<()>>>,
    completed: AtomicBool,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    async_jobs: mpsc::Sender<AsyncJob<S>>,
}

impl<S> fmt::Debug for EventContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("partition", &self.partition)
            .field("offset", &self.offset())
            .field("completed", &self.completed.load(Ordering::SeqCst))
            .finish()
    }
}

impl<S> EventContext<S> {
    /// Constructs a context along with the `ProducerHandle` that must be
    /// registered with the producer pool. `permit` is the already-acquired
    /// `maxPending` token; it is held until `release_token` is called.
    #[allow(clippy::type_complexity)]
    pub(crate) fn new(
        input: EventInput,
        partition: TopicPartition,
        state: S,
        permit: OwnedSemaphorePermit,
        async_jobs: mpsc::Sender<AsyncJob<S>>,
    ) -> (Arc<Self>, ProducerHandle) {
        let (producer_tx, producer_rx) = oneshot::channel();
        let (completion_tx, completion_rx) = oneshot::channel();
        let offset = input.offset();

        let ctx = Arc::new(Self {
            input,
            partition: partition.clone(),
            state,
            producer_rx: Mutex::new(Some(producer_rx)),
            completion_tx: Mutex::new(Some(completion_tx)),
            completed: AtomicBool::new(false),
            permit: Mutex::new(Some(permit)),
            async_jobs,
        });

        let handle = ProducerHandle {
            partition,
            offset,
            producer_tx,
            completion_rx,
        };

        (ctx, handle)
    }

    pub fn offset(&self) -> Option<i64> {
        self.input.offset()
    }

    pub fn input(&self) -> Option<&OwnedRecord> {
        match &self.input {
            EventInput::Record(r) => Some(r),
            EventInput::Interjection(_) => None,
        }
    }

    pub fn interjection(&self) -> Option<&Arc<crate::interjection::Interjection>> {
        match &self.input {
            EventInput::Interjection(ij) => Some(ij),
            EventInput::Record(_) => None,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn partition(&self) -> &TopicPartition {
        &self.partition
    }

    /// Signals the producer pool that user processing of this context is
    /// done and it may be included in the next transaction commit.
    /// Idempotent: a second call is a no-op (the receiver end may
    /// already have been consumed or dropped by the pool).
    pub fn complete(&self) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.completion_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Enqueues an `AsyncJob` on the worker's async-completer channel.
    /// Called by user code that returned `ExecutionState::Incomplete`.
    pub async fn async_complete<F>(self: &Arc<Self>, finalizer: F)
    where
        F: FnOnce() -> BoxFuture<'static, ExecutionState> + Send + 'static,
    {
        let job = AsyncJob::new(self.clone(), finalizer);
        if self.async_jobs.send(job).await.is_err() {
            warn!(partition = %self.partition, "async completer channel closed, dropping async job");
        }
    }

    pub(crate) fn take_producer_rx(&self) -> Option<oneshot::Receiver<Option<ProducerSlot>>> {
        self.producer_rx.lock().unwrap().take()
    }

    /// Releases the held `maxPending` permit, if any. Safe to call more
    /// than once; only the first call has an effect. This is the
    /// counterpart to the semaphore `acquire()` in
    /// `scheduleTxnAndExecution` / `scheduleInterjection` and keeps the
    /// acquire/release pairing explicit rather than relying on drop
    /// order.
    pub(crate) fn release_token(&self) {
        self.permit.lock().unwrap().take();
    }
}
