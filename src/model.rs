use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// An immutable `(topic, partition)` pair. Cheap to clone and compare.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: Arc<str>,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<Arc<str>>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Health of the event source as a whole. Mutated atomically on an
/// unrecoverable failure; read by anything that wants to short-circuit
/// work once the source is known to be broken.
#[derive(Debug)]
pub struct EventSourceState {
    inner: AtomicU8,
}

const HEALTHY: u8 = 0;
const UNHEALTHY: u8 = 1;

impl Default for EventSourceState {
    fn default() -> Self {
        Self {
            inner: AtomicU8::new(HEALTHY),
        }
    }
}

impl EventSourceState {
    pub fn is_healthy(&self) -> bool {
        self.inner.load(Ordering::SeqCst) == HEALTHY
    }

    /// Idempotent: marking an already-unhealthy source unhealthy again is
    /// harmless, but callers should treat this transition as one-shot in
    /// spirit (see [`crate::error::SourceFailure`]).
    pub fn mark_unhealthy(&self) {
        self.inner.store(UNHEALTHY, Ordering::SeqCst);
    }
}

/// The result of running a user handler (`EventProcessor` or
/// `Interjector`) against one event context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionState {
    /// Processing finished; the context may be handed to the producer
    /// pool for commit and its `maxPending` token released.
    Complete,
    /// Processing is ongoing asynchronously; the user is expected to
    /// call `EventContext::async_complete` later with a finalizer. The
    /// token stays held until that finalizer runs and itself returns
    /// `Complete`.
    Incomplete,
    /// Unrecoverable: escalates to source failure.
    Fatal,
    /// Reserved for handler implementations that have not yet decided;
    /// a correct handler never returns this, but it exists so that
    /// default trait methods and stubs have a safe value that is not
    /// silently treated as `Complete`.
    Unknown,
}
