//! Hardware submission contexts and their implicit ("hsync") timelines.
//!
//! A [`Context`] observes a hardware-written [shadow timestamp
//! block](ShadowTimestamps) and mirrors its retired timestamp onto a lazily
//! created [`Timeline`]. Progress is pulled: whoever learns that the hardware
//! moved (an interrupt handler, a poller, a waiter) calls
//! [`Context::check_progress`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tsync_core::free_list::FreeList;
use tsync_core::profiling::profile_function;
use tsync_core::{Timestamp, is_at_or_after};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::export::ExportedFence;
use crate::fence::{Fence, FenceStatus};
use crate::timeline::Timeline;
use crate::wait::WaitStatus;

/// Read-only view of a hardware progress block.
pub trait ShadowTimestamps: Send + Sync {
    /// End-of-pipe timestamp: the last retired submission.
    fn retired(&self) -> u32;

    /// Start-of-pipe timestamp: the last submission the hardware picked up.
    fn started(&self) -> u32;
}

/// Values read from a [`ShadowTimestampBlock`] at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShadowSnapshot {
    pub sop: u32,
    pub eop: u32,
    pub preempted: u32,
    pub ref_wait_ts: u32,
    pub current_context: u32,
}

/// In-memory shadow timestamp block.
///
/// The `record_*`/`set_*` methods play the hardware's role; the sync layer
/// only reads through [`ShadowTimestamps`].
#[derive(Debug, Default)]
pub struct ShadowTimestampBlock {
    sop: AtomicU32,
    eop: AtomicU32,
    preempted: AtomicU32,
    ref_wait_ts: AtomicU32,
    current_context: AtomicU32,
}

impl ShadowTimestampBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A block whose start and retire words both read `ts`.
    pub fn with_retired(ts: u32) -> Self {
        let block = Self::default();
        block.sop.store(ts, Ordering::Relaxed);
        block.eop.store(ts, Ordering::Relaxed);
        block
    }

    pub fn record_start(&self, ts: u32) {
        self.sop.store(ts, Ordering::Release);
    }

    pub fn record_retire(&self, ts: u32) {
        self.eop.store(ts, Ordering::Release);
    }

    pub fn set_preempted(&self, preempted: bool) {
        self.preempted.store(preempted as u32, Ordering::Release);
    }

    pub fn set_ref_wait_ts(&self, ts: u32) {
        self.ref_wait_ts.store(ts, Ordering::Release);
    }

    pub fn set_current_context(&self, id: u32) {
        self.current_context.store(id, Ordering::Release);
    }

    pub fn snapshot(&self) -> ShadowSnapshot {
        ShadowSnapshot {
            sop: self.sop.load(Ordering::Acquire),
            eop: self.eop.load(Ordering::Acquire),
            preempted: self.preempted.load(Ordering::Acquire),
            ref_wait_ts: self.ref_wait_ts.load(Ordering::Acquire),
            current_context: self.current_context.load(Ordering::Acquire),
        }
    }
}

impl ShadowTimestamps for ShadowTimestampBlock {
    fn retired(&self) -> u32 {
        self.eop.load(Ordering::Acquire)
    }

    fn started(&self) -> u32 {
        self.sop.load(Ordering::Acquire)
    }
}

/// Identifier of a hardware context within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

enum TimelineSlot {
    Empty,
    Live(Timeline),
    Destroyed,
}

struct Progress {
    /// Last retired timestamp mirrored onto the timeline.
    retired: Timestamp,
    /// Last submitted timestamp.
    queued: Timestamp,
    destroyed: bool,
}

/// A hardware submission context.
pub struct Context {
    id: ContextId,
    pid: u32,
    shadow: Arc<dyn ShadowTimestamps>,
    config: SyncConfig,
    timeline: Mutex<TimelineSlot>,
    progress: Mutex<Progress>,
    progress_cond: Condvar,
}

impl Context {
    pub fn new(id: ContextId, pid: u32, shadow: Arc<dyn ShadowTimestamps>, config: SyncConfig) -> Self {
        let retired = Timestamp::new(shadow.retired());
        log::debug!("context {} created for pid {} (retired ts {})", id, pid, retired);
        Self {
            id,
            pid,
            shadow,
            config,
            timeline: Mutex::new(TimelineSlot::Empty),
            progress: Mutex::new(Progress {
                retired,
                queued: retired,
                destroyed: false,
            }),
            progress_cond: Condvar::new(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Last retired timestamp observed by [`check_progress`](Self::check_progress).
    pub fn retired(&self) -> Timestamp {
        self.progress.lock().retired
    }

    /// Last submitted timestamp.
    pub fn queued(&self) -> Timestamp {
        self.progress.lock().queued
    }

    pub fn is_destroyed(&self) -> bool {
        self.progress.lock().destroyed
    }

    /// The context's implicit timeline, created on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Gone`] after [`destroy`](Self::destroy).
    pub fn timeline(&self) -> SyncResult<Timeline> {
        let mut slot = self.timeline.lock();
        match &*slot {
            TimelineSlot::Live(timeline) => Ok(timeline.clone()),
            TimelineSlot::Destroyed => Err(SyncError::Gone),
            TimelineSlot::Empty => {
                let name = self
                    .config
                    .timeline_name(&format!("hsync-{}-{}", self.pid, self.id.0));
                let timeline = Timeline::with_baseline(name, self.shadow.retired());
                *slot = TimelineSlot::Live(timeline.clone());
                Ok(timeline)
            }
        }
    }

    /// Record that `ts` was submitted to the hardware.
    pub fn queue(&self, ts: u32) {
        let mut progress = self.progress.lock();
        progress.queued = progress.queued.max(Timestamp::new(ts));
    }

    /// Create a fence that signals when the hardware retires `ts`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidArgument`] if `ts` was never queued.
    /// - [`SyncError::Gone`] if the context was destroyed.
    pub fn create_fence(&self, ts: u32) -> SyncResult<Fence> {
        {
            let progress = self.progress.lock();
            if progress.destroyed {
                return Err(SyncError::Gone);
            }
            if !is_at_or_after(progress.queued.raw(), ts) {
                return Err(SyncError::InvalidArgument(format!(
                    "ts {} not queued on {} (queued {})",
                    ts, self.id, progress.queued
                )));
            }
        }

        let fence = self.timeline()?.create_fence(ts)?;
        // The hardware may have retired `ts` before the timeline caught up.
        if fence.status() == FenceStatus::Unsignaled {
            self.check_progress();
        }
        Ok(fence)
    }

    /// [`create_fence`](Self::create_fence), exported.
    pub fn create_fence_export(&self, ts: u32) -> SyncResult<ExportedFence> {
        self.create_fence(ts).map(|fence| fence.export())
    }

    /// Mirror the shadow block's retired timestamp onto the timeline and wake
    /// timestamp waiters. Returns the retired timestamp as recorded, which
    /// never moves backwards even if the shadow block reports a stale value.
    pub fn check_progress(&self) -> Timestamp {
        profile_function!();

        let eop = Timestamp::new(self.shadow.retired());
        let retired = {
            let mut progress = self.progress.lock();
            if progress.destroyed {
                return progress.retired;
            }
            if eop.is_at_or_after(progress.retired) {
                progress.retired = eop;
            }
            progress.retired
        };

        let timeline = match &*self.timeline.lock() {
            TimelineSlot::Live(timeline) => Some(timeline.clone()),
            _ => None,
        };
        if let Some(timeline) = timeline {
            timeline.advance(retired.raw());
        }

        let _progress = self.progress.lock();
        self.progress_cond.notify_all();
        retired
    }

    /// Block until the hardware retires `ts`.
    ///
    /// Returns [`WaitStatus::Errored`] if the context is destroyed first. The
    /// shadow block is re-read every `progress_poll_interval` in case a
    /// completion notification is missed.
    pub fn wait_timestamp(&self, ts: u32, timeout: Option<Duration>) -> WaitStatus {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let poll = self.config.progress_poll_interval.max(Duration::from_micros(1));

        let status = {
            let mut progress = self.progress.lock();
            loop {
                if progress.destroyed {
                    break WaitStatus::Errored;
                }
                if is_at_or_after(self.shadow.retired(), ts) {
                    break WaitStatus::Signaled;
                }
                let slice = match deadline {
                    None => poll,
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            break WaitStatus::TimedOut;
                        }
                        remaining.min(poll)
                    }
                };
                self.progress_cond.wait_for(&mut progress, slice);
            }
        };

        if status == WaitStatus::Signaled {
            self.check_progress();
        }
        status
    }

    /// Destroy the timeline, error its pending fences, and release every
    /// timestamp waiter. Idempotent.
    pub fn destroy(&self) -> usize {
        let mut batch = FreeList::new();
        self.destroy_into(&mut batch);
        batch.release_all(|fence| {
            fence.signal(FenceStatus::Errored);
        })
    }

    /// Like [`destroy`](Self::destroy), but pending fences are moved into
    /// `batch` for the caller to error.
    pub(crate) fn destroy_into(&self, batch: &mut FreeList<Fence>) -> usize {
        {
            let mut progress = self.progress.lock();
            if progress.destroyed {
                return 0;
            }
            progress.destroyed = true;
            self.progress_cond.notify_all();
        }

        let previous = std::mem::replace(&mut *self.timeline.lock(), TimelineSlot::Destroyed);
        let detached = match previous {
            TimelineSlot::Live(timeline) => timeline.destroy_into(batch),
            _ => 0,
        };
        log::debug!("context {} destroyed ({} pending fences)", self.id, detached);
        detached
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with_block(retired: u32) -> (Context, Arc<ShadowTimestampBlock>) {
        let block = Arc::new(ShadowTimestampBlock::with_retired(retired));
        let config = SyncConfig::default().with_progress_poll_interval(Duration::from_millis(1));
        (Context::new(ContextId(3), 77, block.clone(), config), block)
    }

    #[test]
    fn test_snapshot_reflects_hardware_writes() {
        let block = ShadowTimestampBlock::new();
        block.record_start(9);
        block.record_retire(8);
        block.set_preempted(true);
        block.set_current_context(2);
        let snapshot = block.snapshot();
        assert_eq!(snapshot.sop, 9);
        assert_eq!(snapshot.eop, 8);
        assert_eq!(snapshot.preempted, 1);
        assert_eq!(snapshot.current_context, 2);
        assert_eq!(block.started(), 9);
        assert_eq!(block.retired(), 8);
    }

    #[test]
    fn test_timeline_is_lazy_and_named() {
        let (ctx, _block) = context_with_block(5);
        let timeline = ctx.timeline().unwrap();
        assert_eq!(timeline.name(), "hsync-77-3");
        assert_eq!(timeline.last_ts(), Timestamp::new(5));
        assert!(ctx.timeline().unwrap().ptr_eq(&timeline));
    }

    #[test]
    fn test_fence_requires_queued_ts() {
        let (ctx, _block) = context_with_block(0);
        assert!(matches!(ctx.create_fence(4), Err(SyncError::InvalidArgument(_))));

        ctx.queue(4);
        ctx.queue(2);
        assert_eq!(ctx.queued(), Timestamp::new(4));
        assert!(!ctx.create_fence(4).unwrap().is_signaled());
    }

    #[test]
    fn test_progress_never_passes_shadow() {
        let (ctx, block) = context_with_block(0);
        ctx.queue(10);
        let f5 = ctx.create_fence(5).unwrap();
        let f10 = ctx.create_fence(10).unwrap();

        block.record_retire(6);
        assert_eq!(ctx.check_progress(), Timestamp::new(6));
        assert!(f5.is_signaled());
        assert!(!f10.is_signaled());
        assert_eq!(ctx.timeline().unwrap().last_ts(), Timestamp::new(6));
    }

    #[test]
    fn test_stale_shadow_read_reports_recorded_progress() {
        let (ctx, block) = context_with_block(0);
        ctx.queue(10);
        block.record_retire(6);
        assert_eq!(ctx.check_progress(), Timestamp::new(6));

        block.record_retire(4);
        assert_eq!(ctx.check_progress(), Timestamp::new(6));
        assert_eq!(ctx.retired(), Timestamp::new(6));
        assert_eq!(ctx.timeline().unwrap().last_ts(), Timestamp::new(6));
    }

    #[test]
    fn test_fence_for_retired_ts_signals_on_create() {
        let (ctx, block) = context_with_block(0);
        ctx.queue(3);
        ctx.timeline().unwrap();
        block.record_retire(3);
        assert!(ctx.create_fence(3).unwrap().is_signaled());
    }

    #[test]
    fn test_wait_timestamp_sees_shadow_without_notification() {
        let (ctx, block) = context_with_block(0);
        let hardware = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            block.record_retire(2);
        });
        assert_eq!(
            ctx.wait_timestamp(2, Some(Duration::from_secs(5))),
            WaitStatus::Signaled
        );
        hardware.join().unwrap();
        assert_eq!(ctx.retired(), Timestamp::new(2));
    }

    #[test]
    fn test_wait_timestamp_times_out() {
        let (ctx, _block) = context_with_block(0);
        assert_eq!(
            ctx.wait_timestamp(1, Some(Duration::from_millis(5))),
            WaitStatus::TimedOut
        );
    }

    #[test]
    fn test_destroy_releases_everything() {
        let (ctx, _block) = context_with_block(0);
        let ctx = Arc::new(ctx);
        ctx.queue(1);
        let fence = ctx.create_fence(1).unwrap();

        let waiter = {
            let ctx = ctx.clone();
            std::thread::spawn(move || ctx.wait_timestamp(1, None))
        };
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(ctx.destroy(), 1);
        assert_eq!(waiter.join().unwrap(), WaitStatus::Errored);
        assert_eq!(fence.status(), FenceStatus::Errored);
        assert_eq!(ctx.timeline().unwrap_err(), SyncError::Gone);
        assert_eq!(ctx.create_fence(1).unwrap_err(), SyncError::Gone);
        assert_eq!(ctx.destroy(), 0);
    }
}
