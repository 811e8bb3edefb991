//! Externally observable fence handles.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll, Waker};
use std::time::Duration;

use crate::fence::{Fence, FenceStatus};
use crate::wait::WaitStatus;

/// Readiness of an exported fence, as seen by a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Readiness {
    Pending,
    Ready,
    /// Ready, but the timeline was destroyed before the target was reached.
    ReadyWithError,
}

impl From<FenceStatus> for Readiness {
    fn from(status: FenceStatus) -> Self {
        match status {
            FenceStatus::Unsignaled => Self::Pending,
            FenceStatus::Signaled => Self::Ready,
            FenceStatus::Errored => Self::ReadyWithError,
        }
    }
}

/// A pollable, awaitable reference to a fence.
///
/// Each `ExportedFence` (and each clone) holds one fence reference; dropping
/// it or calling [`release`](Self::release) gives the reference back. When
/// awaited, the handle remembers the waker it registered and withdraws it if
/// the future is dropped while still pending.
///
/// # Example
///
/// ```
/// use tsync::{Readiness, Timeline};
///
/// let timeline = Timeline::new("display");
/// let exported = timeline.create_fence(1).unwrap().export();
/// assert_eq!(exported.readiness(), Readiness::Pending);
///
/// timeline.advance(1);
/// assert_eq!(exported.readiness(), Readiness::Ready);
/// ```
#[derive(Debug)]
pub struct ExportedFence {
    fence: Fence,
    /// Waker stored on the fence by the last pending `Future::poll`.
    registered: Option<Waker>,
}

impl ExportedFence {
    pub(crate) fn new(fence: Fence) -> Self {
        log::trace!(
            "fence {}:{} exported from '{}'",
            fence.context(),
            fence.seqno(),
            fence.timeline_name()
        );
        Self {
            fence,
            registered: None,
        }
    }

    /// The underlying fence.
    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    pub fn readiness(&self) -> Readiness {
        self.fence.status().into()
    }

    /// Poll for readiness, registering `cx`'s waker while pending.
    ///
    /// The waker fires only after the fence state has changed, so a re-poll
    /// from the wake always observes the new state. The registration stays on
    /// the fence until it settles or [`forget_waker`](Self::forget_waker) is
    /// called.
    pub fn poll_readiness(&self, cx: &mut TaskContext<'_>) -> Poll<Readiness> {
        match self.fence.register_waker(cx.waker()) {
            FenceStatus::Unsignaled => Poll::Pending,
            status => Poll::Ready(status.into()),
        }
    }

    /// Withdraw a waker registered through [`poll_readiness`](Self::poll_readiness).
    pub fn forget_waker(&self, waker: &Waker) {
        self.fence.unregister_waker(waker);
    }

    /// Block until ready or `timeout` elapses.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitStatus {
        self.fence.wait(timeout)
    }

    /// Drop this handle's reference.
    pub fn release(self) {
        log::trace!("exported fence {}:{} released", self.fence.context(), self.fence.seqno());
    }

    pub fn into_fence(self) -> Fence {
        self.fence.clone()
    }
}

impl Clone for ExportedFence {
    fn clone(&self) -> Self {
        Self {
            fence: self.fence.clone(),
            registered: None,
        }
    }
}

impl Future for ExportedFence {
    type Output = Readiness;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(stale) = this.registered.take_if(|w| !w.will_wake(cx.waker())) {
            this.fence.unregister_waker(&stale);
        }
        let poll = this.poll_readiness(cx);
        this.registered = poll.is_pending().then(|| cx.waker().clone());
        poll
    }
}

impl Drop for ExportedFence {
    fn drop(&mut self) {
        if let Some(waker) = self.registered.take() {
            self.fence.unregister_waker(&waker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Timeline;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Wake, Waker};

    struct CountingWaker {
        wakes: AtomicUsize,
    }

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poll_now<F: Future + Unpin>(future: &mut F) -> Poll<F::Output> {
        let mut cx = TaskContext::from_waker(Waker::noop());
        Pin::new(future).poll(&mut cx)
    }

    #[test]
    fn test_readiness_from_status() {
        assert_eq!(Readiness::from(FenceStatus::Unsignaled), Readiness::Pending);
        assert_eq!(Readiness::from(FenceStatus::Signaled), Readiness::Ready);
        assert_eq!(Readiness::from(FenceStatus::Errored), Readiness::ReadyWithError);
    }

    #[test]
    fn test_future_resolves_after_advance() {
        let timeline = Timeline::new("t");
        let mut exported = timeline.create_fence(2).unwrap().export();

        assert!(poll_now(&mut exported).is_pending());
        timeline.advance(2);
        assert_eq!(poll_now(&mut exported), Poll::Ready(Readiness::Ready));
    }

    #[test]
    fn test_future_resolves_with_error_on_destroy() {
        let timeline = Timeline::new("t");
        let mut exported = timeline.create_fence(2).unwrap().export();
        timeline.destroy();
        assert_eq!(poll_now(&mut exported), Poll::Ready(Readiness::ReadyWithError));
    }

    #[test]
    fn test_waker_fires_once_on_signal() {
        let timeline = Timeline::new("t");
        let exported = timeline.create_fence(1).unwrap().export();
        let counter = Arc::new(CountingWaker { wakes: AtomicUsize::new(0) });
        let waker = Waker::from(counter.clone());
        let mut cx = TaskContext::from_waker(&waker);

        assert!(exported.poll_readiness(&mut cx).is_pending());
        assert!(exported.poll_readiness(&mut cx).is_pending());
        timeline.advance(1);
        timeline.advance(2);

        assert_eq!(counter.wakes.load(Ordering::SeqCst), 1);
        assert_eq!(exported.poll_readiness(&mut cx), Poll::Ready(Readiness::Ready));
    }

    #[test]
    fn test_dropped_future_withdraws_waker() {
        let timeline = Timeline::new("t");
        let fence = timeline.create_fence(1).unwrap();
        let waker = Waker::from(Arc::new(CountingWaker { wakes: AtomicUsize::new(0) }));
        let mut cx = TaskContext::from_waker(&waker);

        for _ in 0..100 {
            let mut exported = fence.export();
            assert!(Pin::new(&mut exported).poll(&mut cx).is_pending());
            assert_eq!(fence.waker_count(), 1);
        }
        assert_eq!(fence.waker_count(), 0);
    }

    #[test]
    fn test_repoll_with_new_waker_replaces_registration() {
        let timeline = Timeline::new("t");
        let mut exported = timeline.create_fence(1).unwrap().export();
        let first = Arc::new(CountingWaker { wakes: AtomicUsize::new(0) });
        let second = Arc::new(CountingWaker { wakes: AtomicUsize::new(0) });

        let waker = Waker::from(first.clone());
        assert!(Pin::new(&mut exported).poll(&mut TaskContext::from_waker(&waker)).is_pending());
        let waker = Waker::from(second.clone());
        assert!(Pin::new(&mut exported).poll(&mut TaskContext::from_waker(&waker)).is_pending());
        assert_eq!(exported.fence().waker_count(), 1);

        timeline.advance(1);
        assert_eq!(first.wakes.load(Ordering::SeqCst), 0);
        assert_eq!(second.wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_drops_reference() {
        let timeline = Timeline::new("t");
        let fence = timeline.create_fence(1).unwrap();
        let exported = fence.export();
        assert_eq!(fence.reference_count(), 3);

        exported.release();
        assert_eq!(fence.reference_count(), 2);
        assert!(!fence.is_signaled());
        timeline.destroy();
    }
}
