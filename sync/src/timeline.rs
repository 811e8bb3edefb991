//! Monotonic timestamp timelines and their pending fences.
//!
//! A [`Timeline`] owns a 32-bit completion counter (`last_ts`) and the list
//! of fences whose target has not been reached yet. Producers move the counter
//! forward with [`advance`](Timeline::advance); every pending fence whose
//! target is reached is detached and signaled under the timeline lock. Async
//! wakers of those fences run after the lock is released.
//!
//! ```text
//!   create_fence(30) ──▶ pending: [10, 20, 30]      last_ts = 0
//!   advance(15)      ──▶ pending: [20, 30]          signals 10
//!   advance(12)      ──▶ (stale, ignored)
//!   advance(30)      ──▶ pending: []                signals 20, 30
//!   destroy()        ──▶ no new fences; leftovers signaled with an error
//! ```
//!
//! Fences only hold a weak reference back to their timeline. When the last
//! [`Timeline`] handle drops, whatever is still pending is signaled with an
//! error, exactly as [`destroy`](Timeline::destroy) would.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::Waker;

use parking_lot::Mutex;
use tsync_core::Timestamp;
use tsync_core::free_list::FreeList;
use tsync_core::profiling::{profile_plot, profile_scope};

use crate::error::{SyncError, SyncResult};
use crate::fence::{Fence, FenceStatus, wake_all};

/// Source of process-unique fence context ids.
static NEXT_FENCE_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// A shared handle to a timeline.
///
/// `Clone` is cheap and adds a reference; the timeline is freed when the
/// last handle is dropped. Fences do not count as handles.
#[derive(Clone)]
pub struct Timeline {
    inner: Arc<TimelineInner>,
}

struct TimelineInner {
    context: u64,
    name: Arc<str>,
    state: Mutex<TimelineState>,
}

struct TimelineState {
    last_ts: Timestamp,
    pending: Vec<Fence>,
    next_seqno: u64,
    destroying: bool,
}

impl Timeline {
    /// Create a timeline starting at timestamp 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_baseline(name, 0)
    }

    /// Create a timeline whose counter starts at `baseline`.
    pub fn with_baseline(name: impl Into<String>, baseline: u32) -> Self {
        let context = NEXT_FENCE_CONTEXT.fetch_add(1, Ordering::Relaxed);
        let name: String = name.into();
        let name: Arc<str> = name.into();
        log::debug!("timeline '{}' created (context {}, baseline {})", name, context, baseline);
        Self {
            inner: Arc::new(TimelineInner {
                context,
                name,
                state: Mutex::new(TimelineState {
                    last_ts: Timestamp::new(baseline),
                    pending: Vec::new(),
                    next_seqno: 0,
                    destroying: false,
                }),
            }),
        }
    }

    /// Fence context id, unique per timeline in the process.
    pub fn context(&self) -> u64 {
        self.inner.context
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        self.inner.name.clone()
    }

    /// The last timestamp the timeline advanced to.
    pub fn last_ts(&self) -> Timestamp {
        self.inner.state.lock().last_ts
    }

    /// Number of fences waiting for their target.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Whether [`destroy`](Self::destroy) has started.
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroying
    }

    /// Whether `self` and `other` are handles to the same timeline.
    pub fn ptr_eq(&self, other: &Timeline) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakTimeline {
        WeakTimeline(Arc::downgrade(&self.inner))
    }

    /// Create a fence that signals once the timeline reaches `target`.
    ///
    /// If `target` is already reached the fence is returned signaled and is
    /// not queued.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Gone`] once the timeline is being destroyed.
    pub fn create_fence(&self, target: u32) -> SyncResult<Fence> {
        let mut state = self.inner.state.lock();
        if state.destroying {
            return Err(SyncError::Gone);
        }
        Ok(self.create_fence_locked(&mut state, Timestamp::new(target)))
    }

    /// Create a fence for the next timestamp after the current position.
    ///
    /// The target is `last_ts + 1` (wrapping), computed under the timeline
    /// lock so a concurrent advance cannot make it stale.
    pub fn create_next_fence(&self) -> SyncResult<Fence> {
        let mut state = self.inner.state.lock();
        if state.destroying {
            return Err(SyncError::Gone);
        }
        let target = state.last_ts.next();
        Ok(self.create_fence_locked(&mut state, target))
    }

    fn create_fence_locked(&self, state: &mut TimelineState, target: Timestamp) -> Fence {
        let seqno = state.next_seqno;
        state.next_seqno += 1;

        if state.last_ts.is_at_or_after(target) {
            log::trace!(
                "'{}': fence {} for ts {} already reached (last {})",
                self.name(),
                seqno,
                target,
                state.last_ts
            );
            return Fence::new(self, target, seqno, FenceStatus::Signaled);
        }

        let fence = Fence::new(self, target, seqno, FenceStatus::Unsignaled);
        state.pending.push(fence.clone());
        log::trace!("'{}': fence {} queued for ts {}", self.name(), seqno, target);
        fence
    }

    /// Move the counter to `ts` and signal every fence it reaches.
    ///
    /// Stale reports (`ts` before `last_ts` in wraparound order) are ignored,
    /// as is any advance after destroy. Returns the number of fences
    /// signaled.
    pub fn advance(&self, ts: u32) -> usize {
        let mut wakers = Vec::new();
        let signaled = {
            let mut state = self.inner.state.lock();
            if state.destroying {
                return 0;
            }
            self.advance_locked(&mut state, Timestamp::new(ts), &mut wakers)
        };
        wake_all(wakers);
        signaled
    }

    fn advance_locked(
        &self,
        state: &mut TimelineState,
        ts: Timestamp,
        wakers: &mut Vec<Waker>,
    ) -> usize {
        profile_scope!("timeline_advance");

        let previous = state.last_ts;
        if !ts.is_at_or_after(previous) {
            log::trace!("'{}': stale advance to {} ignored (last {})", self.name(), ts, previous);
            return 0;
        }
        state.last_ts = ts;

        let (mut reached, pending): (Vec<Fence>, Vec<Fence>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(|fence| ts.is_at_or_after(fence.target()));
        state.pending = pending;

        // Earlier targets first; ties keep creation order.
        reached.sort_by_key(|fence| fence.target().raw().wrapping_sub(previous.raw()));
        for fence in &reached {
            fence.settle_into(FenceStatus::Signaled, wakers);
        }

        profile_plot!("pending_fences", state.pending.len());
        if !reached.is_empty() {
            log::trace!(
                "'{}': advanced {} -> {}, signaled {}, {} pending",
                self.name(),
                previous,
                ts,
                reached.len(),
                state.pending.len()
            );
        }
        reached.len()
    }

    /// Signal one specific pending fence by advancing the timeline to its
    /// target.
    ///
    /// Every fence with an earlier target is signaled too; fences with later
    /// targets are not. Returns the number of fences signaled.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidArgument`] if the fence belongs to another
    ///   timeline or is no longer pending.
    /// - [`SyncError::Gone`] if the timeline is being destroyed.
    pub fn signal_fence(&self, fence: &Fence) -> SyncResult<usize> {
        if fence.context() != self.context() {
            log::warn!(
                "'{}': refusing to signal fence {} from context {}",
                self.name(),
                fence.seqno(),
                fence.context()
            );
            return Err(SyncError::InvalidArgument(format!(
                "fence belongs to context {}, not '{}' ({})",
                fence.context(),
                self.name(),
                self.context()
            )));
        }

        let mut wakers = Vec::new();
        let signaled = {
            let mut state = self.inner.state.lock();
            if state.destroying {
                return Err(SyncError::Gone);
            }
            if !state.pending.iter().any(|pending| pending.ptr_eq(fence)) {
                return Err(SyncError::InvalidArgument(format!(
                    "fence {} on '{}' is not pending",
                    fence.seqno(),
                    self.name()
                )));
            }
            self.advance_locked(&mut state, fence.target(), &mut wakers)
        };
        wake_all(wakers);
        Ok(signaled)
    }

    /// Refuse new fences and signal every pending fence with an error.
    ///
    /// Idempotent. Returns the number of fences errored by this call.
    pub fn destroy(&self) -> usize {
        let mut batch = FreeList::new();
        self.destroy_into(&mut batch);
        batch.release_all(|fence| {
            fence.signal(FenceStatus::Errored);
        })
    }

    /// Refuse new fences and move every pending fence into `batch`.
    ///
    /// The caller signals the batch with [`FenceStatus::Errored`] after it has
    /// released its own locks. Returns the number of fences detached.
    pub(crate) fn destroy_into(&self, batch: &mut FreeList<Fence>) -> usize {
        profile_scope!("timeline_destroy");

        let mut state = self.inner.state.lock();
        if state.destroying {
            return 0;
        }
        state.destroying = true;
        let count = state.pending.len();
        batch.extend(state.pending.drain(..));

        log::debug!(
            "timeline '{}' destroyed at ts {} ({} pending fences released)",
            self.name(),
            state.last_ts,
            count
        );
        count
    }
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("context", &self.inner.context)
            .field("name", &self.inner.name)
            .finish()
    }
}

impl Drop for TimelineInner {
    fn drop(&mut self) {
        let orphaned = std::mem::take(&mut self.state.get_mut().pending);
        if !orphaned.is_empty() {
            log::debug!(
                "timeline '{}' dropped with {} pending fences, signaling errors",
                self.name,
                orphaned.len()
            );
        }
        for fence in orphaned {
            fence.signal(FenceStatus::Errored);
        }
        log::trace!("timeline '{}' (context {}) freed", self.name, self.context);
    }
}

/// A weak timeline reference, used to delay id reuse until the old timeline
/// is gone.
#[derive(Clone)]
pub(crate) struct WeakTimeline(Weak<TimelineInner>);

impl WeakTimeline {
    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub(crate) fn upgrade(&self) -> Option<Timeline> {
        self.0.upgrade().map(|inner| Timeline { inner })
    }
}
