use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gkes_worker::config::WorkerConfig;
use gkes_worker::event_context::EventContext;
use gkes_worker::handlers::{DeserializationErrorHandler, EventProcessor, Handlers, Interjector};
use gkes_worker::interjection::Interjection;
use gkes_worker::model::{EventSourceState, ExecutionState, TopicPartition};
use gkes_worker::partition_worker;
use gkes_worker::producer_pool::ProducerPool;
use gkes_worker::run_status::RunStatus;
use gkes_worker::state_store::InMemoryStateStore;
use gkes_worker::test_support::{AssignMode, FakeConsumerHandle, FakeProducerPool};
use gkes_worker::OwnedRecord;

fn test_config(max_pending_items: usize) -> WorkerConfig {
    WorkerConfig {
        kafka_consumer_group: "scenario-group".to_string(),
        kafka_consumer_topic: "orders".to_string(),
        change_log_topic: String::new(),
        max_batch_size: 500,
        max_pending_items,
        replication_factor: 1,
        commit_offsets: false,
    }
}

fn record(offset: i64) -> OwnedRecord {
    OwnedRecord {
        partition: 0,
        offset,
        key: Some(offset.to_be_bytes().to_vec()),
        payload: Some(b"payload".to_vec()),
        timestamp: None,
    }
}

fn record_without_payload(offset: i64) -> OwnedRecord {
    OwnedRecord {
        partition: 0,
        offset,
        key: Some(offset.to_be_bytes().to_vec()),
        payload: None,
        timestamp: None,
    }
}

async fn poll_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

struct RecordingProcessor {
    seen: Mutex<Vec<i64>>,
    outcome: ExecutionState,
}

impl RecordingProcessor {
    fn new(outcome: ExecutionState) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            outcome,
        })
    }

    fn seen(&self) -> Vec<i64> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventProcessor<()> for RecordingProcessor {
    async fn process(&self, _ec: &Arc<EventContext<()>>, record: &OwnedRecord) -> ExecutionState {
        self.seen.lock().unwrap().push(record.offset);
        self.outcome
    }
}

fn spawn_worker(
    processor: Arc<dyn EventProcessor<()>>,
    producer_pool: Arc<dyn ProducerPool>,
    max_pending_items: usize,
) -> (
    gkes_worker::PartitionWorkerHandle,
    Arc<FakeConsumerHandle>,
    tokio::sync::oneshot::Receiver<gkes_worker::SourceFailure>,
) {
    let config = test_config(max_pending_items);
    let tp = TopicPartition::new(config.kafka_consumer_topic.clone(), 0);
    let store = InMemoryStateStore::new();
    let waiter = store.waiter_for(&tp, vec![]);
    let consumer = FakeConsumerHandle::new();
    let run_status = RunStatus::new();
    let (fail_tx, fail_rx) = tokio::sync::oneshot::channel();

    let handle = partition_worker::spawn(
        tp,
        (),
        waiter,
        consumer.clone(),
        producer_pool,
        Handlers::new(processor),
        Vec::new(),
        &config,
        &run_status,
        fail_tx,
        Arc::new(EventSourceState::default()),
    );

    (handle, consumer, fail_rx)
}

#[tokio::test]
async fn happy_path_admits_and_completes_every_record_in_order() {
    let processor = RecordingProcessor::new(ExecutionState::Complete);
    let pool = FakeProducerPool::new(AssignMode::AutoAssign, 8);
    let (handle, _consumer, _fail_rx) = spawn_worker(processor.clone(), pool, 8);

    poll_until(|| handle.can_interject(), Duration::from_secs(1)).await;

    let records: Vec<OwnedRecord> = (0..100).map(record).collect();
    handle.add(records).await;

    let settled = poll_until(|| processor.seen().len() == 100, Duration::from_secs(2)).await;
    assert!(settled, "expected all 100 records to be processed");
    assert_eq!(processor.seen(), (0..100).collect::<Vec<_>>());

    handle.revoke();
    handle.wait_for_termination().await;
}

#[tokio::test]
async fn duplicate_offsets_are_suppressed() {
    let processor = RecordingProcessor::new(ExecutionState::Complete);
    let pool = FakeProducerPool::new(AssignMode::AutoAssign, 8);
    let (handle, _consumer, _fail_rx) = spawn_worker(processor.clone(), pool, 8);

    poll_until(|| handle.can_interject(), Duration::from_secs(1)).await;

    let records: Vec<OwnedRecord> = [5, 6, 7, 5, 6, 7].into_iter().map(record).collect();
    handle.add(records).await;

    let settled = poll_until(|| processor.seen().len() == 3, Duration::from_secs(2)).await;
    assert!(settled, "expected exactly 3 admissions after dedup");
    assert_eq!(processor.seen(), vec![5, 6, 7]);

    handle.revoke();
    handle.wait_for_termination().await;
}

#[tokio::test]
async fn backpressure_bounds_admission_to_max_pending_items() {
    // Every record returns Incomplete and is never asynchronously
    // completed, so exactly `max_pending_items` contexts can be admitted
    // before the semaphore blocks further admission.
    let processor = RecordingProcessor::new(ExecutionState::Incomplete);
    let pool = FakeProducerPool::new(AssignMode::AutoAssign, 2);
    let (handle, _consumer, _fail_rx) = spawn_worker(processor.clone(), pool, 2);

    poll_until(|| handle.can_interject(), Duration::from_secs(1)).await;

    let records: Vec<OwnedRecord> = (0..10).map(record).collect();
    handle.add(records).await;

    // Give the worker time to admit everything it is going to admit.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        processor.seen().len(),
        2,
        "only max_pending_items contexts should be admitted while all are held Incomplete"
    );
}

struct AsyncCompletingProcessor {
    held: Mutex<Vec<Arc<EventContext<()>>>>,
}

impl AsyncCompletingProcessor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            held: Mutex::new(Vec::new()),
        })
    }

    fn release_one(&self) -> Option<Arc<EventContext<()>>> {
        self.held.lock().unwrap().pop()
    }
}

#[async_trait]
impl EventProcessor<()> for AsyncCompletingProcessor {
    async fn process(&self, ec: &Arc<EventContext<()>>, _record: &OwnedRecord) -> ExecutionState {
        self.held.lock().unwrap().push(ec.clone());
        ExecutionState::Incomplete
    }
}

#[tokio::test]
async fn async_completion_releases_a_slot_for_the_next_record() {
    let processor = AsyncCompletingProcessor::new();
    let pool = FakeProducerPool::new(AssignMode::AutoAssign, 2);
    let config = test_config(2);
    let tp = TopicPartition::new(config.kafka_consumer_topic.clone(), 0);
    let store = InMemoryStateStore::new();
    let waiter = store.waiter_for(&tp, vec![]);
    let consumer = FakeConsumerHandle::new();
    let run_status = RunStatus::new();
    let (fail_tx, _fail_rx) = tokio::sync::oneshot::channel();

    let handle = partition_worker::spawn(
        tp,
        (),
        waiter,
        consumer,
        pool,
        Handlers::new(processor.clone()),
        Vec::new(),
        &config,
        &run_status,
        fail_tx,
        Arc::new(EventSourceState::default()),
    );

    poll_until(|| handle.can_interject(), Duration::from_secs(1)).await;

    handle.add(vec![record(0), record(1), record(2)]).await;

    let two_held = poll_until(
        || processor.held.lock().unwrap().len() == 2,
        Duration::from_secs(1),
    )
    .await;
    assert!(two_held, "two contexts should be admitted and held Incomplete");

    let ctx = processor.release_one().expect("one held context");
    ctx.async_complete(move || Box::pin(async move { ExecutionState::Complete }))
        .await;

    let third_admitted = poll_until(
        || processor.held.lock().unwrap().len() == 2,
        Duration::from_secs(1),
    )
    .await;
    assert!(
        third_admitted,
        "releasing one token should admit the third record"
    );

    handle.revoke();
    handle.wait_for_termination().await;
}

#[tokio::test]
async fn revoke_mid_flight_drains_pending_contexts() {
    let processor = RecordingProcessor::new(ExecutionState::Incomplete);
    let pool = FakeProducerPool::new(AssignMode::Manual, 8);
    let (handle, _consumer, _fail_rx) = spawn_worker(processor.clone(), pool.clone(), 8);

    poll_until(|| handle.can_interject(), Duration::from_secs(1)).await;

    let records: Vec<OwnedRecord> = (0..5).map(record).collect();
    handle.add(records).await;

    let all_pending = poll_until(|| pool.pending_count() == 5, Duration::from_secs(1)).await;
    assert!(all_pending, "all 5 contexts should be registered with the pool");

    handle.revoke();

    // The pool abandons every pending context, which should unblock the
    // revocation waiter and let the worker finish tearing down even
    // though none of the 5 contexts ever reached Complete.
    pool.abandon_all();

    let terminated = tokio::time::timeout(Duration::from_secs(2), async {
        handle.wait_for_termination().await;
    })
    .await;
    assert!(terminated.is_ok(), "worker should terminate after abandonment drains in-flight contexts");

    handle.add(vec![record(100)]).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        processor.seen().len(),
        0,
        "add() after revocation must be a no-op"
    );
}

struct CountingInterjector {
    fired: AtomicUsize,
}

impl CountingInterjector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Interjector<()> for CountingInterjector {
    async fn interject(&self, _ec: &Arc<EventContext<()>>) -> ExecutionState {
        self.fired.fetch_add(1, Ordering::SeqCst);
        ExecutionState::Complete
    }
}

#[tokio::test]
async fn interjections_stay_live_under_a_sustained_record_burst() {
    // A 5ms periodic interjection competing against a continuous stream
    // of records. The interleaving in `schedule_txn_and_execution` (at
    // most one pending interjection drained between records) must keep
    // it firing instead of being starved by the burst.
    let processor = RecordingProcessor::new(ExecutionState::Complete);
    let pool = FakeProducerPool::new(AssignMode::AutoAssign, 16);
    let config = test_config(16);
    let tp = TopicPartition::new(config.kafka_consumer_topic.clone(), 0);
    let store = InMemoryStateStore::new();
    let waiter = store.waiter_for(&tp, vec![]);
    let consumer = FakeConsumerHandle::new();
    let run_status = RunStatus::new();
    let (fail_tx, _fail_rx) = tokio::sync::oneshot::channel();

    let interjector = CountingInterjector::new();
    let interjection = Interjection::periodic(Duration::from_millis(5));

    let handle = partition_worker::spawn(
        tp,
        (),
        waiter,
        consumer,
        pool,
        Handlers::new(processor.clone()),
        vec![(interjection, interjector.clone() as Arc<dyn Interjector<()>>)],
        &config,
        &run_status,
        fail_tx,
        Arc::new(EventSourceState::default()),
    );

    poll_until(|| handle.can_interject(), Duration::from_secs(1)).await;

    let mut next_offset = 0i64;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    while tokio::time::Instant::now() < deadline {
        let batch: Vec<OwnedRecord> = (next_offset..next_offset + 50).map(record).collect();
        next_offset += 50;
        handle.add(batch).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let fired_enough = poll_until(|| interjector.count() >= 3, Duration::from_secs(2)).await;
    assert!(
        fired_enough,
        "interjection should have fired repeatedly despite the sustained burst, fired {} times",
        interjector.count()
    );
    assert!(
        !processor.seen().is_empty(),
        "records should still be processed alongside interjections"
    );

    handle.revoke();
    handle.wait_for_termination().await;
}

#[derive(Default)]
struct RecordingDeserializationErrorHandler {
    offsets: Mutex<Vec<i64>>,
}

impl RecordingDeserializationErrorHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }
}

impl DeserializationErrorHandler for RecordingDeserializationErrorHandler {
    fn handle(&self, _partition: &TopicPartition, offset: i64, _error: &str) {
        self.offsets.lock().unwrap().push(offset);
    }
}

#[tokio::test]
async fn records_without_a_payload_are_routed_through_the_deserialization_handler_and_skipped() {
    let processor = RecordingProcessor::new(ExecutionState::Complete);
    let pool = FakeProducerPool::new(AssignMode::AutoAssign, 8);
    let config = test_config(8);
    let tp = TopicPartition::new(config.kafka_consumer_topic.clone(), 0);
    let store = InMemoryStateStore::new();
    let waiter = store.waiter_for(&tp, vec![]);
    let consumer = FakeConsumerHandle::new();
    let run_status = RunStatus::new();
    let (fail_tx, _fail_rx) = tokio::sync::oneshot::channel();

    let deserialization_handler = RecordingDeserializationErrorHandler::new();
    let handlers =
        Handlers::new(processor.clone()).with_deserialization(deserialization_handler.clone());

    let handle = partition_worker::spawn(
        tp,
        (),
        waiter,
        consumer,
        pool,
        handlers,
        Vec::new(),
        &config,
        &run_status,
        fail_tx,
        Arc::new(EventSourceState::default()),
    );

    poll_until(|| handle.can_interject(), Duration::from_secs(1)).await;

    handle
        .add(vec![record(0), record_without_payload(1), record(2)])
        .await;

    let settled = poll_until(|| processor.seen().len() == 2, Duration::from_secs(2)).await;
    assert!(settled, "expected the two payload-bearing records to reach the processor");
    assert_eq!(
        processor.seen(),
        vec![0, 2],
        "the payload-less record must be skipped rather than handed to the processor"
    );
    assert_eq!(
        deserialization_handler.offsets(),
        vec![1],
        "the deserialization handler should see exactly the skipped offset"
    );

    handle.revoke();
    handle.wait_for_termination().await;
}
