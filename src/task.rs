//! Periodic background tasks.
//!
//! Both refresh loops are instances of [`LoopSlot`]: a start-once slot that
//! runs an async step every `interval` until the step breaks or the slot's
//! cancellation token fires. The token is a child of the session epoch, so a
//! session reset stops every loop bound to it.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub struct LoopSlot {
    name: &'static str,
    current: Mutex<Option<CancellationToken>>,
    active: Arc<AtomicUsize>,
    starts: AtomicUsize,
}

impl LoopSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            current: Mutex::new(None),
            active: Arc::new(AtomicUsize::new(0)),
            starts: AtomicUsize::new(0),
        }
    }

    /// True while a loop started from this slot has not been stopped.
    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Number of loop tasks currently executing.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of loops ever started from this slot.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Spawn the loop unless one is already running.
    ///
    /// Each cycle sleeps `interval`, then runs `step`. The loop exits when
    /// `step` returns `Break` or when `parent` (or [`LoopSlot::stop`])
    /// cancels it; a step in flight is dropped on cancellation. Returns
    /// whether a new loop was spawned.
    pub fn start<F, Fut>(&self, parent: &CancellationToken, interval: Duration, step: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let token = {
            let mut current = self.current.lock();
            if current.as_ref().is_some_and(|t| !t.is_cancelled()) {
                return false;
            }
            if parent.is_cancelled() {
                return false;
            }
            let token = parent.child_token();
            *current = Some(token.clone());
            token
        };
        self.starts.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(run_periodic(
            self.name,
            interval,
            token,
            self.active.clone(),
            step,
        ));
        true
    }

    /// Stop the running loop, if any.
    pub fn stop(&self) {
        if let Some(token) = self.current.lock().take() {
            token.cancel();
        }
    }
}

/// Marks the loop finished however it exits, including by panic.
struct ExitGuard {
    name: &'static str,
    token: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.token.cancel();
        self.active.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(task = self.name, "background loop stopped");
    }
}

async fn run_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    token: CancellationToken,
    active: Arc<AtomicUsize>,
    mut step: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ControlFlow<()>>,
{
    active.fetch_add(1, Ordering::SeqCst);
    let _guard = ExitGuard {
        name,
        token: token.clone(),
        active,
    };
    tracing::debug!(task = name, ?interval, "background loop started");

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        tokio::select! {
            _ = token.cancelled() => return,
            flow = step() => {
                if flow.is_break() {
                    return;
                }
            }
        }
    }
}
