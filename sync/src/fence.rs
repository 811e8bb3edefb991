//! One-shot fences bound to a timeline timestamp.
//!
//! A [`Fence`] is a cheap-to-clone handle: every clone is one reference, and
//! the fence is freed when the last clone drops. The owning timeline keeps
//! its own clone in its pending list until the fence is signaled, so a waiter
//! dropping its handle never races with list manipulation. The fence only
//! points back at its timeline weakly.
//!
//! # State machine
//!
//! ```text
//!                 advance(ts >= target)
//!   Unsignaled ─────────────────────────▶ Signaled
//!       │
//!       │ timeline destroyed or dropped
//!       └───────────────────────────────▶ Errored
//! ```
//!
//! The transition happens at most once; a fence is never reset.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::Waker;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tsync_core::Timestamp;

use crate::export::ExportedFence;
use crate::timeline::{Timeline, WeakTimeline};
use crate::wait::{CancelToken, WaitStatus};

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FenceStatus {
    /// The target timestamp has not been reached.
    Unsignaled = 0,
    /// The target timestamp was reached.
    Signaled = 1,
    /// The timeline was destroyed before the target was reached.
    Errored = 2,
}

impl FenceStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Unsignaled,
            1 => Self::Signaled,
            _ => Self::Errored,
        }
    }

    /// Whether the fence has left the unsignaled state (with or without error).
    pub fn is_settled(self) -> bool {
        self != Self::Unsignaled
    }
}

/// A reference to a fence on a [`Timeline`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tsync::{FenceStatus, Timeline, WaitStatus};
///
/// let timeline = Timeline::new("render");
/// let fence = timeline.create_fence(3).unwrap();
/// assert_eq!(fence.status(), FenceStatus::Unsignaled);
///
/// timeline.advance(3);
/// assert_eq!(fence.wait(Some(Duration::ZERO)), WaitStatus::Signaled);
/// ```
#[derive(Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

struct FenceInner {
    context: u64,
    timeline_name: Arc<str>,
    timeline: WeakTimeline,
    target: Timestamp,
    seqno: u64,
    state: AtomicU8,
    /// Async waiters. The mutex also pairs with `cond` for blocking waiters.
    wakers: Mutex<Vec<Waker>>,
    cond: Condvar,
}

impl Fence {
    pub(crate) fn new(
        timeline: &Timeline,
        target: Timestamp,
        seqno: u64,
        status: FenceStatus,
    ) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                context: timeline.context(),
                timeline_name: timeline.shared_name(),
                timeline: timeline.downgrade(),
                target,
                seqno,
                state: AtomicU8::new(status as u8),
                wakers: Mutex::new(Vec::new()),
                cond: Condvar::new(),
            }),
        }
    }

    /// Fence context id of the owning timeline.
    pub fn context(&self) -> u64 {
        self.inner.context
    }

    /// The owning timeline, or `None` once its last handle has dropped.
    pub fn timeline(&self) -> Option<Timeline> {
        self.inner.timeline.upgrade()
    }

    /// Name of the owning timeline.
    pub fn timeline_name(&self) -> &str {
        &self.inner.timeline_name
    }

    /// Target timestamp.
    pub fn target(&self) -> Timestamp {
        self.inner.target
    }

    /// Creation sequence number on the owning timeline.
    pub fn seqno(&self) -> u64 {
        self.inner.seqno
    }

    /// Current status (non-blocking).
    pub fn status(&self) -> FenceStatus {
        FenceStatus::from_raw(self.inner.state.load(Ordering::Acquire))
    }

    /// Check if the fence has signaled successfully.
    pub fn is_signaled(&self) -> bool {
        self.status() == FenceStatus::Signaled
    }

    /// Whether `self` and `other` refer to the same fence.
    pub fn ptr_eq(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live references to this fence, including the timeline's
    /// pending-list reference while unsignaled.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Wrap the fence in an externally observable handle.
    pub fn export(&self) -> ExportedFence {
        ExportedFence::new(self.clone())
    }

    /// Block until the fence settles or `timeout` elapses.
    ///
    /// `None` waits indefinitely. A zero timeout polls.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitStatus {
        self.wait_inner(timeout, None)
    }

    /// Like [`wait`](Self::wait), but returns [`WaitStatus::Cancelled`] as soon
    /// as `token` is cancelled.
    ///
    /// The token only holds a weak reference to the fence while parked, so an
    /// abandoned wait never keeps the fence alive.
    pub fn wait_cancellable(&self, timeout: Option<Duration>, token: &CancelToken) -> WaitStatus {
        self.wait_inner(timeout, Some(token))
    }

    fn wait_inner(&self, timeout: Option<Duration>, cancel: Option<&CancelToken>) -> WaitStatus {
        if let Some(status) = settled_wait_status(self.status()) {
            return status;
        }
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return WaitStatus::Cancelled;
            }
            token.park(self);
        }

        // A deadline that overflows `Instant` is treated as no deadline.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        let status = {
            let mut guard = self.inner.wakers.lock();
            loop {
                if let Some(status) = settled_wait_status(self.status()) {
                    break status;
                }
                if cancel.is_some_and(CancelToken::is_cancelled) {
                    break WaitStatus::Cancelled;
                }
                match deadline {
                    None => self.inner.cond.wait(&mut guard),
                    Some(deadline) => {
                        if Instant::now() >= deadline {
                            break WaitStatus::TimedOut;
                        }
                        self.inner.cond.wait_until(&mut guard, deadline);
                    }
                }
            }
        };

        if let Some(token) = cancel {
            token.unpark(self);
        }
        status
    }

    /// Register `waker` to be woken when the fence settles.
    ///
    /// Returns the status observed under the notification lock; the waker is
    /// only stored while that status is unsignaled.
    pub(crate) fn register_waker(&self, waker: &Waker) -> FenceStatus {
        let mut wakers = self.inner.wakers.lock();
        let status = self.status();
        if status == FenceStatus::Unsignaled && !wakers.iter().any(|w| w.will_wake(waker)) {
            wakers.push(waker.clone());
        }
        status
    }

    /// Drop every stored registration that would wake the same task as
    /// `waker`.
    pub(crate) fn unregister_waker(&self, waker: &Waker) {
        self.inner.wakers.lock().retain(|w| !w.will_wake(waker));
    }

    #[cfg(test)]
    pub(crate) fn waker_count(&self) -> usize {
        self.inner.wakers.lock().len()
    }

    /// Transition out of the unsignaled state and wake every waiter.
    ///
    /// Returns `false` if the fence had already settled. Must not be called
    /// with a timeline lock held; use [`settle_into`](Self::settle_into) there.
    pub(crate) fn signal(&self, status: FenceStatus) -> bool {
        let mut wakers = Vec::new();
        let changed = self.settle_into(status, &mut wakers);
        wake_all(wakers);
        changed
    }

    /// Transition out of the unsignaled state, release blocked waiters, and
    /// move the async wakers into `wakers` for the caller to wake later.
    ///
    /// Waiters are notified strictly after the state change is visible. The
    /// notification lock is a leaf: it may be taken while a timeline lock is
    /// held, never the reverse. No foreign code runs in here.
    pub(crate) fn settle_into(&self, status: FenceStatus, wakers: &mut Vec<Waker>) -> bool {
        debug_assert!(status.is_settled());
        if self
            .inner
            .state
            .compare_exchange(
                FenceStatus::Unsignaled as u8,
                status as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        {
            let mut stored = self.inner.wakers.lock();
            self.inner.cond.notify_all();
            wakers.append(&mut stored);
        }

        log::trace!(
            "fence {}:{} (ts {}) on '{}' -> {:?}",
            self.context(),
            self.seqno(),
            self.target(),
            self.timeline_name(),
            status
        );
        true
    }

    /// Wake blocked waiters without changing state, so they re-check their
    /// cancel token.
    pub(crate) fn kick(&self) {
        let _wakers = self.inner.wakers.lock();
        self.inner.cond.notify_all();
    }

    pub(crate) fn downgrade(&self) -> WeakFence {
        WeakFence(Arc::downgrade(&self.inner))
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("context", &self.context())
            .field("seqno", &self.seqno())
            .field("target", &self.target())
            .field("status", &self.status())
            .finish()
    }
}

/// A weak fence reference used by cancel tokens.
#[derive(Clone)]
pub(crate) struct WeakFence(Weak<FenceInner>);

impl WeakFence {
    pub(crate) fn upgrade(&self) -> Option<Fence> {
        self.0.upgrade().map(|inner| Fence { inner })
    }

    pub(crate) fn refers_to(&self, fence: &Fence) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&fence.inner))
    }
}

/// Wake a batch collected by [`Fence::settle_into`]. Call with no locks held.
pub(crate) fn wake_all(wakers: Vec<Waker>) {
    for waker in wakers {
        waker.wake();
    }
}

fn settled_wait_status(status: FenceStatus) -> Option<WaitStatus> {
    match status {
        FenceStatus::Unsignaled => None,
        FenceStatus::Signaled => Some(WaitStatus::Signaled),
        FenceStatus::Errored => Some(WaitStatus::Errored),
    }
}
