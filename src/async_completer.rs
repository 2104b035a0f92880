use tokio::sync::mpsc;

use crate::event_context::AsyncJob;

/// The bounded queue of [`AsyncJob`]s that user handlers feed via
/// `EventContext::async_complete`. Capacity is `eventInput` capacity x4
/// so a burst of asynchronous completions does not immediately back up
/// into the dispatch loop's other work.
pub struct AsyncCompleter<S> {
    tx: mpsc::Sender<AsyncJob<S>>,
    rx: mpsc::Receiver<AsyncJob<S>>,
}

impl<S> AsyncCompleter<S> {
    pub fn new(event_input_capacity: usize) -> Self {
        let capacity = event_input_capacity * 4;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self { tx, rx }
    }

    pub fn sender(&self) -> mpsc::Sender<AsyncJob<S>> {
        self.tx.clone()
    }

    pub fn into_parts(self) -> (mpsc::Sender<AsyncJob<S>>, mpsc::Receiver<AsyncJob<S>>) {
        (self.tx, self.rx)
    }
}
