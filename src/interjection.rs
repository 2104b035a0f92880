use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A recurring (or one-shot) timer scoped to a single partition. On
/// firing, it enqueues a clone of its own `Arc` onto the worker's
/// `interjectionInput` channel; the worker is the one that constructs
/// an `EventContext` for it and, on `Complete`, re-arms periodic
/// interjections via `tick`.
pub struct Interjection {
    interval: Duration,
    one_shot: bool,
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    callback_fired: AtomicBool,
    cancel: CancellationToken,
    sender: Mutex<Option<mpsc::Sender<Arc<Interjection>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Interjection {
    pub fn periodic(interval: Duration) -> Arc<Self> {
        Self::new(interval, false, None)
    }

    pub fn one_shot<F>(interval: Duration, callback: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(interval, true, Some(Box::new(callback)))
    }

    fn new(
        interval: Duration,
        one_shot: bool,
        callback: Option<Box<dyn FnOnce() + Send>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            interval,
            one_shot,
            callback: Mutex::new(callback),
            callback_fired: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            sender: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    /// Binds this interjection to the worker's `interjectionInput`
    /// channel. Must be called before the first `tick`.
    pub fn init(&self, sender: mpsc::Sender<Arc<Interjection>>) {
        *self.sender.lock().unwrap() = Some(sender);
    }

    /// Arms the next firing. A no-op if the interjection has been
    /// cancelled.
    pub fn tick(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(sender) = self.sender.lock().unwrap().clone() else {
            debug!("interjection ticked before init, ignoring");
            return;
        };

        let this = self.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(this.interval) => {
                    // Capacity-1 channel: this deliberately blocks the
                    // timer task (not the ingress loop) if the worker
                    // hasn't drained the previous firing yet.
                    let _ = sender.send(this.clone()).await;
                }
                _ = cancel.cancelled() => {}
            }
        });

        if let Some(previous) = self.task.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    /// Stops any further firing. Does not itself invoke the one-shot
    /// callback — that is the scheduling code's responsibility on the
    /// revoked path.
    pub fn cancel(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Invokes the one-shot callback exactly once, regardless of how
    /// many code paths (revoked scheduling, revoked dispatch, normal
    /// completion) call it.
    pub fn fire_callback(&self) {
        if self.callback_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(cb) = self.callback.lock().unwrap().take() {
            cb();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn periodic_fires_and_rearms() {
        let (tx, mut rx) = mpsc::channel(1);
        let ij = Interjection::periodic(Duration::from_millis(5));
        ij.init(tx);
        ij.tick();

        let first = rx.recv().await.unwrap();
        assert!(Arc::ptr_eq(&first, &ij));

        ij.tick();
        let second = rx.recv().await.unwrap();
        assert!(Arc::ptr_eq(&second, &ij));
    }

    #[tokio::test]
    async fn cancel_stops_future_firings() {
        let (tx, mut rx) = mpsc::channel(1);
        let ij = Interjection::periodic(Duration::from_millis(5));
        ij.init(tx);
        ij.cancel();
        ij.tick();

        let res = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(res.is_err(), "cancelled interjection must not fire");
    }

    #[tokio::test]
    async fn one_shot_callback_fires_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let ij = Interjection::one_shot(Duration::from_secs(60), move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        ij.fire_callback();
        ij.fire_callback();
        ij.fire_callback();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
