//! Wait/notify bridge: wait results, cancellation, and multi-fence waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, Wake, Waker};
use std::thread::Thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};
use crate::export::{ExportedFence, Readiness};
use crate::fence::{Fence, FenceStatus, WeakFence};

/// Outcome of a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitStatus {
    /// The fence signaled successfully.
    Signaled,
    /// The fence was force-signaled because its timeline was destroyed.
    Errored,
    /// The timeout elapsed first.
    TimedOut,
    /// The wait's cancel token fired first.
    Cancelled,
}

impl WaitStatus {
    pub fn is_signaled(self) -> bool {
        self == Self::Signaled
    }

    /// Convert into a `Result` for callers that treat anything but success
    /// as an error.
    pub fn into_result(self) -> SyncResult<()> {
        match self {
            Self::Signaled => Ok(()),
            Self::Errored => Err(SyncError::Gone),
            Self::TimedOut => Err(SyncError::TimedOut),
            Self::Cancelled => Err(SyncError::Cancelled),
        }
    }
}

/// A handle that aborts blocking waits.
///
/// Clones share the same flag. A token only keeps weak references to the
/// fences its waiters are parked on, so cancelling (or forgetting to cancel)
/// never extends a fence's lifetime.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    parked: Mutex<Vec<WeakFence>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every current and future wait using this token.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let parked: Vec<Fence> = self
            .inner
            .parked
            .lock()
            .iter()
            .filter_map(WeakFence::upgrade)
            .collect();
        log::trace!("cancel token fired, waking {} parked waiters", parked.len());
        for fence in parked {
            fence.kick();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn park(&self, fence: &Fence) {
        let mut parked = self.inner.parked.lock();
        parked.retain(|weak| weak.upgrade().is_some());
        parked.push(fence.downgrade());
    }

    pub(crate) fn unpark(&self, fence: &Fence) {
        let mut parked = self.inner.parked.lock();
        if let Some(pos) = parked.iter().position(|weak| weak.refers_to(fence)) {
            parked.swap_remove(pos);
        }
    }

    #[cfg(test)]
    fn parked_len(&self) -> usize {
        self.inner.parked.lock().len()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Something that can be waited on like a fence.
pub trait Waitable: Send + Sync {
    /// Current status (non-blocking).
    fn status(&self) -> FenceStatus;

    /// Block until settled or `timeout` elapses.
    fn wait(&self, timeout: Option<Duration>) -> WaitStatus;

    /// A pollable handle that shares the underlying fence.
    fn export(&self) -> ExportedFence;
}

impl Waitable for Fence {
    fn status(&self) -> FenceStatus {
        Fence::status(self)
    }

    fn wait(&self, timeout: Option<Duration>) -> WaitStatus {
        Fence::wait(self, timeout)
    }

    fn export(&self) -> ExportedFence {
        Fence::export(self)
    }
}

impl Waitable for ExportedFence {
    fn status(&self) -> FenceStatus {
        self.fence().status()
    }

    fn wait(&self, timeout: Option<Duration>) -> WaitStatus {
        ExportedFence::wait(self, timeout)
    }

    fn export(&self) -> ExportedFence {
        self.clone()
    }
}

/// Wait until every fence settles.
///
/// Returns [`WaitStatus::Signaled`] if all signaled, otherwise the first
/// non-success status in slice order. The timeout covers the whole call.
pub fn wait_all(fences: &[&dyn Waitable], timeout: Option<Duration>) -> WaitStatus {
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    for fence in fences {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let status = fence.wait(remaining);
        if status != WaitStatus::Signaled {
            return status;
        }
    }
    WaitStatus::Signaled
}

struct ThreadWaker(Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

/// Wait until any fence settles.
///
/// Returns the index of the first settled fence (lowest index wins when
/// several are ready) with its status, or `None` if nothing settled before
/// the timeout or the slice is empty. Fences that are still pending when
/// the call returns keep no trace of the wait.
pub fn wait_any(fences: &[&dyn Waitable], timeout: Option<Duration>) -> Option<(usize, WaitStatus)> {
    if fences.is_empty() {
        return None;
    }

    let exported: Vec<ExportedFence> = fences.iter().map(|fence| fence.export()).collect();
    let waker = Waker::from(Arc::new(ThreadWaker(std::thread::current())));
    let mut cx = TaskContext::from_waker(&waker);
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

    let settled = 'wait: loop {
        for (index, fence) in exported.iter().enumerate() {
            if let Poll::Ready(readiness) = fence.poll_readiness(&mut cx) {
                let status = match readiness {
                    Readiness::ReadyWithError => WaitStatus::Errored,
                    _ => WaitStatus::Signaled,
                };
                break 'wait Some((index, status));
            }
        }

        match deadline {
            None => std::thread::park(),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    break None;
                }
                std::thread::park_timeout(deadline - now);
            }
        }
    };

    for fence in &exported {
        fence.forget_waker(&waker);
    }
    settled
}
