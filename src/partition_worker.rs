use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Notify, Semaphore};
use tracing::{debug, info, warn};

use crate::async_completer::AsyncCompleter;
use crate::config::{event_input_capacity, WorkerConfig};
use crate::consumer::ConsumerHandle;
use crate::error::SourceFailure;
use crate::event_context::{AsyncJob, EventContext, EventInput, OwnedRecord, ProducerSlot};
use crate::handlers::Handlers;
use crate::interjection::Interjection;
use crate::model::{EventSourceState, ExecutionState, TopicPartition};
use crate::producer_pool::ProducerPool;
use crate::run_status::RunStatus;
use crate::state_store::Waiter;

/// Tracks the number of `EventContext`s created but not yet accepted
/// (or abandoned) by the producer pool. The drain watcher blocks on
/// this reaching zero before the worker signals `revokedSignal`.
struct RevocationWaiter {
    count: AtomicI64,
    notify: Notify,
}

impl RevocationWaiter {
    fn new() -> Self {
        Self {
            count: AtomicI64::new(0),
            notify: Notify::new(),
        }
    }

    fn increment(&self, by: i64) {
        self.count.fetch_add(by, Ordering::SeqCst);
    }

    fn decrement(&self) {
        let previous = self.count.fetch_sub(1, Ordering::SeqCst);
        if previous - 1 <= 0 {
            self.notify.notify_waiters();
        }
    }

    async fn wait_for_zero(&self) {
        loop {
            let notified = self.notify.notified();
            if self.count.load(Ordering::SeqCst) <= 0 {
                return;
            }
            notified.await;
        }
    }
}

/// The handle the surrounding runtime holds for one partition assignment.
/// Construction, via [`spawn`], already begins the `Bootstrapping` state.
pub struct PartitionWorkerHandle {
    partition: TopicPartition,
    run_status: RunStatus,
    partition_input_tx: mpsc::Sender<Vec<OwnedRecord>>,
    ready: Arc<AtomicBool>,
    terminated_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl PartitionWorkerHandle {
    pub fn partition(&self) -> &TopicPartition {
        &self.partition
    }

    /// Offers a batch of records for this partition. A no-op once the
    /// worker has been revoked. Backpressure comes entirely from
    /// `partitionInput`'s bounded capacity (4).
    pub async fn add(&self, records: Vec<OwnedRecord>) {
        if !self.run_status.running() {
            return;
        }
        if self.partition_input_tx.send(records).await.is_err() {
            debug!(partition = %self.partition, "partition input closed, dropping batch");
        }
    }

    /// Begins graceful shutdown. Returns immediately; use
    /// `wait_for_termination` to observe completion.
    pub fn revoke(&self) {
        self.run_status.halt();
    }

    pub fn can_interject(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Resolves once the worker has fully drained and exited. Safe to
    /// call at most meaningfully once; subsequent calls resolve
    /// immediately.
    pub async fn wait_for_termination(&self) {
        let rx = self.terminated_rx.lock().unwrap().take();
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }
}

struct WorkerInner<S> {
    partition: TopicPartition,
    run_status: RunStatus,
    state: S,
    handlers: Handlers<S>,
    producer_pool: Arc<dyn ProducerPool>,
    consumer: Arc<dyn ConsumerHandle>,
    max_pending: Arc<Semaphore>,
    highest_offset: AtomicI64,
    revocation_waiter: RevocationWaiter,
    ready: Arc<AtomicBool>,
    interjections: Vec<(Arc<Interjection>, Arc<dyn crate::handlers::Interjector<S>>)>,
    fail_tx: Mutex<Option<oneshot::Sender<SourceFailure>>>,
    event_source_state: Arc<EventSourceState>,
    event_input_tx: mpsc::Sender<Arc<EventContext<S>>>,
    interjection_event_input_tx: mpsc::Sender<Arc<EventContext<S>>>,
    async_jobs_tx: mpsc::Sender<AsyncJob<S>>,
}

/// Spawns a new partition worker in the `Bootstrapping` state and
/// returns a handle to it. `fail_tx` is the owning event source's
/// single-shot failure signal; a second worker sharing the same event
/// source gets its own `fail_tx` clone-or-equivalent from the caller,
/// since this crate does not own the event source itself.
#[allow(clippy::too_many_arguments)]
pub fn spawn<S>(
    partition: TopicPartition,
    state: S,
    waiter: Waiter,
    consumer: Arc<dyn ConsumerHandle>,
    producer_pool: Arc<dyn ProducerPool>,
    handlers: Handlers<S>,
    interjections: Vec<(Arc<Interjection>, Arc<dyn crate::handlers::Interjector<S>>)>,
    config: &WorkerConfig,
    parent_status: &RunStatus,
    fail_tx: oneshot::Sender<SourceFailure>,
    event_source_state: Arc<EventSourceState>,
) -> PartitionWorkerHandle
where
    S: Clone + Send + Sync + 'static,
{
    let run_status = parent_status.fork();
    let capacity = event_input_capacity(config.max_batch_size);

    let (partition_input_tx, partition_input_rx) = mpsc::channel(4);
    let (event_input_tx, event_input_rx) = mpsc::channel(capacity);
    let (interjection_input_tx, interjection_input_rx) = mpsc::channel(1);
    let (interjection_event_input_tx, interjection_event_input_rx) = mpsc::channel(1);
    let async_completer: AsyncCompleter<S> = AsyncCompleter::new(capacity);
    let (async_jobs_tx, async_jobs_rx) = async_completer.into_parts();

    let max_pending_items = producer_pool.max_pending_items().max(1);
    let max_pending = Arc::new(Semaphore::new(max_pending_items));
    let ready = Arc::new(AtomicBool::new(false));

    let (stop_tx, stop_rx) = oneshot::channel();
    let (revoked_tx, revoked_rx) = oneshot::channel();
    let (stopped_tx, stopped_rx) = oneshot::channel();
    let (terminated_tx, terminated_rx) = oneshot::channel();

    for (ij, _) in &interjections {
        ij.init(interjection_input_tx.clone());
    }

    let inner = Arc::new(WorkerInner {
        partition: partition.clone(),
        run_status: run_status.clone(),
        state,
        handlers,
        producer_pool,
        consumer,
        max_pending,
        highest_offset: AtomicI64::new(0),
        revocation_waiter: RevocationWaiter::new(),
        ready: ready.clone(),
        interjections,
        fail_tx: Mutex::new(Some(fail_tx)),
        event_source_state,
        event_input_tx,
        interjection_event_input_tx,
        async_jobs_tx,
    });

    tokio::spawn({
        let inner = inner.clone();
        async move {
            inner.bootstrap(waiter).await;

            let ingress = tokio::spawn({
                let inner = inner.clone();
                inner.run_ingress(
                    partition_input_rx,
                    interjection_input_rx,
                    stop_tx,
                    stopped_rx,
                )
            });
            let dispatch = tokio::spawn({
                let inner = inner.clone();
                inner.run_dispatch(
                    event_input_rx,
                    interjection_event_input_rx,
                    async_jobs_rx,
                    stop_rx,
                    revoked_rx,
                    stopped_tx,
                    revoked_tx,
                )
            });

            let _ = tokio::join!(ingress, dispatch);
            let _ = terminated_tx.send(());
        }
    });

    PartitionWorkerHandle {
        partition,
        run_status,
        partition_input_tx,
        ready,
        terminated_rx: Mutex::new(Some(terminated_rx)),
    }
}

impl<S> WorkerInner<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Bootstrapping state: pause fetches, block on the change-log
    /// replay, resume fetches, arm interjections, notify activation, and
    /// mark ready.
    async fn bootstrap(self: &Arc<Self>, waiter: Waiter) {
        if let Err(err) = self.consumer.pause(&self.partition) {
            warn!(partition = %self.partition, %err, "failed to pause partition before bootstrap");
        }

        if let Err(err) = waiter().await {
            self.fail(format!("state store bootstrap failed: {err}"));
            return;
        }

        if let Err(err) = self.consumer.resume(&self.partition) {
            warn!(partition = %self.partition, %err, "failed to resume partition after bootstrap");
        }

        self.ready.store(true, Ordering::SeqCst);

        for (ij, _) in &self.interjections {
            ij.tick();
        }

        self.handlers
            .source_partition_events
            .on_partition_activated(&self.partition);

        info!(partition = %self.partition, "partition worker active");
    }

    async fn run_ingress(
        self: Arc<Self>,
        mut partition_input_rx: mpsc::Receiver<Vec<OwnedRecord>>,
        mut interjection_input_rx: mpsc::Receiver<Arc<Interjection>>,
        stop_tx: oneshot::Sender<()>,
        stopped_rx: oneshot::Receiver<()>,
    ) {
        let done = self.run_status.done();
        tokio::pin!(done);

        loop {
            tokio::select! {
                biased;
                _ = &mut done => {
                    let _ = stop_tx.send(());
                    let _ = stopped_rx.await;
                    info!(partition = %self.partition, "ingress loop exiting after drain");
                    break;
                }
                maybe_records = partition_input_rx.recv() => {
                    let Some(records) = maybe_records else { continue };
                    if self.run_status.running() {
                        self.schedule_txn_and_execution(records, &mut interjection_input_rx).await;
                    }
                }
                maybe_ij = interjection_input_rx.recv() => {
                    if let Some(ij) = maybe_ij {
                        self.schedule_interjection(ij).await;
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_dispatch(
        self: Arc<Self>,
        mut event_input_rx: mpsc::Receiver<Arc<EventContext<S>>>,
        mut interjection_event_input_rx: mpsc::Receiver<Arc<EventContext<S>>>,
        mut async_jobs_rx: mpsc::Receiver<AsyncJob<S>>,
        mut stop_rx: oneshot::Receiver<()>,
        mut revoked_rx: oneshot::Receiver<()>,
        stopped_tx: oneshot::Sender<()>,
        revoked_tx: oneshot::Sender<()>,
    ) {
        let mut stop_received = false;
        let mut revoked_tx = Some(revoked_tx);

        loop {
            tokio::select! {
                maybe_ctx = event_input_rx.recv() => {
                    if let Some(ctx) = maybe_ctx {
                        self.handle_event(ctx, &mut async_jobs_rx).await;
                    }
                }
                maybe_ctx = interjection_event_input_rx.recv() => {
                    if let Some(ctx) = maybe_ctx {
                        self.handle_interjection(ctx, &mut async_jobs_rx).await;
                    }
                }
                maybe_job = async_jobs_rx.recv() => {
                    if let Some(job) = maybe_job {
                        self.process_async_job(job).await;
                    }
                }
                result = &mut stop_rx, if !stop_received => {
                    if result.is_ok() {
                        stop_received = true;
                        for (ij, _) in &self.interjections {
                            ij.cancel();
                        }
                        let revoked_tx = revoked_tx.take().expect("stop signal fires at most once");
                        let inner = self.clone();
                        tokio::spawn(async move {
                            inner.revocation_waiter.wait_for_zero().await;
                            let _ = revoked_tx.send(());
                        });
                    }
                }
                result = &mut revoked_rx => {
                    if result.is_ok() {
                        let _ = stopped_tx.send(());
                        self.handlers
                            .source_partition_events
                            .on_partition_revoked(&self.partition);
                        info!(partition = %self.partition, "dispatch loop exiting, fully revoked");
                        break;
                    }
                }
            }
        }
    }

    /// Admits a freshly-received batch: drops stale duplicates by
    /// offset, acquires a `maxPending` token and registers a producer
    /// slot for each surviving record, and interleaves at most one
    /// pending interjection between records so a sustained burst never
    /// starves interjection liveness.
    async fn schedule_txn_and_execution(
        self: &Arc<Self>,
        records: Vec<OwnedRecord>,
        interjection_input_rx: &mut mpsc::Receiver<Arc<Interjection>>,
    ) {
        if !self.run_status.running() {
            return;
        }

        self.revocation_waiter.increment(records.len() as i64);

        // `highest_offset` itself only advances once the dispatch loop
        // assigns a producer to a record (handle_event). The whole
        // batch can be admitted here in one uninterrupted poll before
        // the dispatch task ever gets scheduled, so a batch-local
        // high-water mark is needed to suppress duplicates *within* one
        // batch — relying on the shared atomic alone would let repeated
        // offsets in the same `add()` call all through.
        let mut batch_high = self.highest_offset.load(Ordering::SeqCst);

        for record in records {
            let offset = record.offset();
            if offset >= batch_high {
                batch_high = offset + 1;

                let permit = self
                    .max_pending
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("maxPending semaphore is never closed while the worker is alive");

                let (ctx, handle) = EventContext::new(
                    EventInput::Record(record),
                    self.partition.clone(),
                    self.state.clone(),
                    permit,
                    self.async_jobs_tx.clone(),
                );

                self.producer_pool.add_event_context(handle).await;

                if self.event_input_tx.send(ctx).await.is_err() {
                    debug!(partition = %self.partition, "event input closed while scheduling");
                }
            } else {
                debug!(partition = %self.partition, offset, "dropping duplicate record");
                self.revocation_waiter.decrement();
            }

            // Interleave at most one pending interjection between records
            // so a sustained burst never starves interjection liveness.
            if let Ok(ij) = interjection_input_rx.try_recv() {
                self.schedule_interjection(ij).await;
            }
        }
    }

    /// Admits one interjection firing the same way a record is admitted:
    /// acquires a `maxPending` token and registers a producer slot.
    async fn schedule_interjection(self: &Arc<Self>, ij: Arc<Interjection>) {
        if !self.run_status.running() {
            ij.fire_callback();
            return;
        }

        self.revocation_waiter.increment(1);

        let permit = self
            .max_pending
            .clone()
            .acquire_owned()
            .await
            .expect("maxPending semaphore is never closed while the worker is alive");

        let (ctx, handle) = EventContext::new(
            EventInput::Interjection(ij),
            self.partition.clone(),
            self.state.clone(),
            permit,
            self.async_jobs_tx.clone(),
        );

        self.producer_pool.add_event_context(handle).await;

        if self
            .interjection_event_input_tx
            .send(ctx)
            .await
            .is_err()
        {
            debug!(partition = %self.partition, "interjection event input closed while scheduling");
        }
    }

    /// Waits for this context's producer slot while opportunistically
    /// draining async completions, so the dispatch loop never deadlocks
    /// on a pool that only reclaims slots once committed contexts
    /// finalize.
    async fn assign_producer(
        self: &Arc<Self>,
        ctx: &Arc<EventContext<S>>,
        async_jobs_rx: &mut mpsc::Receiver<AsyncJob<S>>,
    ) -> Option<ProducerSlot> {
        let mut producer_rx = ctx
            .take_producer_rx()
            .expect("producer_rx is taken exactly once per context");

        loop {
            tokio::select! {
                result = &mut producer_rx => {
                    return result.unwrap_or(None);
                }
                maybe_job = async_jobs_rx.recv() => {
                    match maybe_job {
                        Some(job) => self.process_async_job(job).await,
                        None => return None,
                    }
                }
            }
        }
    }

    /// Resolves a record's producer slot, runs the user processor, and
    /// finalizes the context according to its returned state.
    async fn handle_event(
        self: &Arc<Self>,
        ctx: Arc<EventContext<S>>,
        async_jobs_rx: &mut mpsc::Receiver<AsyncJob<S>>,
    ) {
        let slot = self.assign_producer(&ctx, async_jobs_rx).await;
        self.revocation_waiter.decrement();

        let Some(_slot) = slot else {
            ctx.release_token();
            return;
        };

        let record = ctx
            .input()
            .expect("handle_event is only ever called for record-bound contexts");

        self.highest_offset.store(record.offset + 1, Ordering::SeqCst);

        if record.payload.is_none() {
            self.handlers.deserialization.handle(
                &self.partition,
                record.offset,
                "record has no payload to deserialize",
            );
            ctx.complete();
            ctx.release_token();
            return;
        }

        match self.handlers.processor.process(&ctx, record).await {
            ExecutionState::Complete => {
                ctx.complete();
                ctx.release_token();
            }
            ExecutionState::Fatal => {
                self.fail("event processor returned Fatal");
                ctx.complete();
                ctx.release_token();
            }
            ExecutionState::Incomplete => {
                // The user is expected to call `async_complete` later;
                // the token stays held until then.
            }
            ExecutionState::Unknown => {
                warn!(partition = %self.partition, "event processor returned Unknown, treating as Incomplete");
            }
        }
    }

    /// Resolves an interjection's producer slot, runs the interjector,
    /// and re-arms periodic interjections on completion.
    async fn handle_interjection(
        self: &Arc<Self>,
        ctx: Arc<EventContext<S>>,
        async_jobs_rx: &mut mpsc::Receiver<AsyncJob<S>>,
    ) {
        let ij = ctx
            .interjection()
            .cloned()
            .expect("interjection event contexts always carry an Interjection");

        let slot = self.assign_producer(&ctx, async_jobs_rx).await;
        self.revocation_waiter.decrement();

        let Some(_slot) = slot else {
            ctx.release_token();
            ij.fire_callback();
            return;
        };

        let interjector = self.find_interjector(&ij);

        match interjector.interject(&ctx).await {
            ExecutionState::Complete => {
                ctx.complete();
                ctx.release_token();
                if !ij.is_one_shot() {
                    ij.tick();
                }
            }
            ExecutionState::Fatal => {
                self.fail("interjector returned Fatal");
                ctx.complete();
                ctx.release_token();
            }
            ExecutionState::Incomplete => {}
            ExecutionState::Unknown => {
                warn!(partition = %self.partition, "interjector returned Unknown, treating as Incomplete");
            }
        }
    }

    /// Runs an async completion finalizer and settles its owning context.
    async fn process_async_job(self: &Arc<Self>, job: AsyncJob<S>) {
        let (ctx, outcome) = job.run().await;
        match outcome {
            ExecutionState::Complete => {
                ctx.complete();
                ctx.release_token();
            }
            ExecutionState::Fatal => {
                self.fail("async job finalizer returned Fatal");
                ctx.complete();
                ctx.release_token();
            }
            ExecutionState::Incomplete | ExecutionState::Unknown => {
                // Leaves the context pending; a later async job for the
                // same context (or none at all, which leaks the permit
                // by design until revocation drains it) must resolve it.
            }
        }
    }

    fn find_interjector(&self, ij: &Arc<Interjection>) -> Arc<dyn crate::handlers::Interjector<S>> {
        self.interjections
            .iter()
            .find(|(candidate, _)| Arc::ptr_eq(candidate, ij))
            .map(|(_, interjector)| interjector.clone())
            .expect("every interjection event context was created from a registered interjection")
    }

    fn fail(self: &Arc<Self>, reason: impl Into<String>) {
        self.event_source_state.mark_unhealthy();
        let mut guard = self.fail_tx.lock().unwrap();
        match guard.take() {
            Some(tx) => {
                let _ = tx.send(SourceFailure {
                    partition: self.partition.clone(),
                    reason: reason.into(),
                });
            }
            None => {
                debug_assert!(false, "fail() called more than once for {}", self.partition);
            }
        }
    }
}
