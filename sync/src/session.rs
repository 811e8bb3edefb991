//! Per-process session: the request-dispatch surface.
//!
//! A [`Session`] owns everything one client process created: its hardware
//! [contexts](Context), its explicit timelines, and its table of exported
//! fence handles. Closing (or dropping) the session tears all of it down and
//! releases every blocked waiter with an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard};
use tsync_core::free_list::FreeList;
use tsync_core::profiling::{profile_message, profile_scope};

use crate::config::SyncConfig;
use crate::context::{Context, ContextId, ShadowTimestamps};
use crate::error::{SyncError, SyncResult};
use crate::export::ExportedFence;
use crate::fence::{Fence, FenceStatus};
use crate::handles::{FenceFd, FenceHandleTable};
use crate::registry::{TimelineId, TimelineRegistry};
use crate::timeline::Timeline;
use crate::wait::WaitStatus;

/// Per-process owner of contexts, explicit timelines, and fence handles.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tsync::{Session, SyncConfig, WaitStatus};
///
/// let session = Session::new(1000, SyncConfig::default());
/// let timeline = session.isync_timeline_create(None).unwrap();
/// let fd = session.isync_fence_create(timeline, Some(5)).unwrap();
///
/// session.isync_forward(timeline, 5).unwrap();
/// assert_eq!(session.fence_wait(fd, Some(Duration::ZERO)).unwrap(), WaitStatus::Signaled);
/// ```
pub struct Session {
    pid: u32,
    config: SyncConfig,
    contexts: RwLock<HashMap<ContextId, Arc<Context>>>,
    registry: TimelineRegistry,
    handles: FenceHandleTable,
    /// Held shared by creation requests for their whole duration and
    /// exclusively by `close` to flip the flag.
    closed: RwLock<bool>,
}

impl Session {
    pub fn new(pid: u32, config: SyncConfig) -> Self {
        log::debug!("session opened for pid {}", pid);
        Self {
            pid,
            registry: TimelineRegistry::new(pid, config.clone()),
            config,
            contexts: RwLock::new(HashMap::new()),
            handles: FenceHandleTable::new(),
            closed: RwLock::new(false),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Keeps the session open until the returned guard drops, so whatever a
    /// creation request installs is seen by `close`.
    fn open_guard(&self) -> SyncResult<RwLockReadGuard<'_, bool>> {
        let closed = self.closed.read();
        if *closed {
            return Err(SyncError::Gone);
        }
        Ok(closed)
    }

    // ------------------------------------------------------------------
    // Hardware contexts
    // ------------------------------------------------------------------

    /// Create a hardware context reading progress from `shadow`.
    ///
    /// Context ids are the lowest free numbers below `max_contexts`.
    pub fn context_create(&self, shadow: Arc<dyn ShadowTimestamps>) -> SyncResult<ContextId> {
        let _open = self.open_guard()?;
        let mut contexts = self.contexts.write();
        let id = (0..self.config.max_contexts as u32)
            .map(ContextId)
            .find(|id| !contexts.contains_key(id))
            .ok_or_else(|| {
                SyncError::InvalidArgument(format!(
                    "context table full ({} contexts)",
                    self.config.max_contexts
                ))
            })?;
        let context = Context::new(id, self.pid, shadow, self.config.clone());
        contexts.insert(id, Arc::new(context));
        Ok(id)
    }

    /// Remove and destroy a context. Returns the number of fences errored.
    pub fn context_destroy(&self, id: ContextId) -> SyncResult<usize> {
        let context = self
            .contexts
            .write()
            .remove(&id)
            .ok_or_else(|| SyncError::NotFound(format!("context {}", id)))?;
        Ok(context.destroy())
    }

    pub fn context(&self, id: ContextId) -> SyncResult<Arc<Context>> {
        self.contexts
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("context {}", id)))
    }

    /// Number of live contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.read().len()
    }

    /// Export a fence for timestamp `ts` of context `ctx`.
    pub fn hsync_fence_create(&self, ctx: ContextId, ts: u32) -> SyncResult<FenceFd> {
        let _open = self.open_guard()?;
        let exported = self.context(ctx)?.create_fence_export(ts)?;
        Ok(self.handles.install(exported))
    }

    // ------------------------------------------------------------------
    // Explicit timelines
    // ------------------------------------------------------------------

    pub fn isync_timeline_create(&self, name: Option<&str>) -> SyncResult<TimelineId> {
        let _open = self.open_guard()?;
        self.registry.create(name)
    }

    /// Destroy an explicit timeline. Returns the number of fences errored.
    pub fn isync_timeline_destroy(&self, id: TimelineId) -> SyncResult<usize> {
        self.registry.destroy(id)
    }

    /// Export a fence on timeline `id`. Without `ts` the fence targets the
    /// timestamp after the timeline's current position.
    pub fn isync_fence_create(&self, id: TimelineId, ts: Option<u32>) -> SyncResult<FenceFd> {
        let _open = self.open_guard()?;
        let fence = self.registry.create_fence(id, ts)?;
        Ok(self.handles.install(fence.export()))
    }

    /// Signal the pending fence behind `fd` on timeline `id`.
    pub fn isync_fence_signal(&self, id: TimelineId, fd: FenceFd) -> SyncResult<usize> {
        let exported = self.handles.get(fd)?;
        self.registry.signal(id, exported.fence())
    }

    /// Advance timeline `id` to `ts`.
    pub fn isync_forward(&self, id: TimelineId, ts: u32) -> SyncResult<usize> {
        self.registry.forward(id, ts)
    }

    pub fn isync_timeline(&self, id: TimelineId) -> SyncResult<Timeline> {
        self.registry.lookup(id)
    }

    /// Number of live explicit timelines.
    pub fn isync_timeline_count(&self) -> usize {
        self.registry.len()
    }

    // ------------------------------------------------------------------
    // Fence handles
    // ------------------------------------------------------------------

    /// A new reference to the fence behind `fd`.
    pub fn fence_get(&self, fd: FenceFd) -> SyncResult<ExportedFence> {
        self.handles.get(fd)
    }

    pub fn fence_wait(&self, fd: FenceFd, timeout: Option<Duration>) -> SyncResult<WaitStatus> {
        Ok(self.handles.get(fd)?.wait(timeout))
    }

    pub fn fence_close(&self, fd: FenceFd) -> SyncResult<()> {
        self.handles.close(fd)
    }

    /// Number of open fence handles.
    pub fn fence_count(&self) -> usize {
        self.handles.len()
    }

    /// Tear down every context, timeline, and handle.
    ///
    /// Pending fences are collected into one batch and errored after all
    /// table and timeline locks are released. Later calls are no-ops;
    /// creation requests on a closed session fail with [`SyncError::Gone`].
    /// A creation request that started before `close` finishes before the
    /// teardown begins. Returns the number of fences errored.
    pub fn close(&self) -> usize {
        {
            let mut closed = self.closed.write();
            if *closed {
                return 0;
            }
            *closed = true;
        }
        profile_scope!("session_close");

        let mut batch: FreeList<Fence> = FreeList::new();
        let contexts: Vec<Arc<Context>> = self.contexts.write().drain().map(|(_, ctx)| ctx).collect();
        for context in &contexts {
            context.destroy_into(&mut batch);
        }
        let timelines = self.registry.teardown_into(&mut batch);

        let errored = batch.release_all(|fence| {
            fence.signal(FenceStatus::Errored);
        });
        let handles = self.handles.clear();

        profile_message!("session closed");
        log::debug!(
            "session for pid {} closed: {} contexts, {} timelines, {} handles, {} fences errored",
            self.pid,
            contexts.len(),
            timelines,
            handles,
            errored
        );
        errored
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pid", &self.pid)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ShadowTimestampBlock;

    fn session() -> Session {
        Session::new(7, SyncConfig::default())
    }

    #[test]
    fn test_context_ids_lowest_free() {
        let session = session();
        let shadow = Arc::new(ShadowTimestampBlock::new());
        let a = session.context_create(shadow.clone()).unwrap();
        let b = session.context_create(shadow.clone()).unwrap();
        assert_eq!((a, b), (ContextId(0), ContextId(1)));

        session.context_destroy(a).unwrap();
        assert_eq!(session.context_create(shadow).unwrap(), ContextId(0));
        assert!(matches!(session.context_destroy(ContextId(50)), Err(SyncError::NotFound(_))));
    }

    #[test]
    fn test_context_table_full() {
        let session = Session::new(7, SyncConfig::default().with_max_contexts(1));
        let shadow = Arc::new(ShadowTimestampBlock::new());
        session.context_create(shadow.clone()).unwrap();
        assert!(matches!(
            session.context_create(shadow),
            Err(SyncError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_hsync_fence_through_handle() {
        let session = session();
        let shadow = Arc::new(ShadowTimestampBlock::new());
        let ctx = session.context_create(shadow.clone()).unwrap();
        session.context(ctx).unwrap().queue(3);

        let fd = session.hsync_fence_create(ctx, 3).unwrap();
        assert_eq!(session.fence_wait(fd, Some(Duration::ZERO)).unwrap(), WaitStatus::TimedOut);

        shadow.record_retire(3);
        session.context(ctx).unwrap().check_progress();
        assert_eq!(session.fence_wait(fd, None).unwrap(), WaitStatus::Signaled);
        session.fence_close(fd).unwrap();
        assert!(session.fence_wait(fd, None).is_err());
    }

    #[test]
    fn test_isync_signal_by_handle() {
        let session = session();
        let a = session.isync_timeline_create(None).unwrap();
        let b = session.isync_timeline_create(None).unwrap();
        let fd1 = session.isync_fence_create(a, None).unwrap();
        let fd2 = session.isync_fence_create(a, Some(2)).unwrap();

        assert!(matches!(
            session.isync_fence_signal(b, fd1),
            Err(SyncError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.isync_fence_signal(a, FenceFd(40)),
            Err(SyncError::NotFound(_))
        ));

        assert_eq!(session.isync_fence_signal(a, fd1).unwrap(), 1);
        assert!(session.fence_get(fd1).unwrap().fence().is_signaled());
        assert!(!session.fence_get(fd2).unwrap().fence().is_signaled());
        assert!(matches!(
            session.isync_fence_signal(a, fd1),
            Err(SyncError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_close_tears_down_everything() {
        let session = session();
        let ctx = session.context_create(Arc::new(ShadowTimestampBlock::new())).unwrap();
        session.context(ctx).unwrap().queue(1);
        let hsync = session.fence_get(session.hsync_fence_create(ctx, 1).unwrap()).unwrap();
        let id = session.isync_timeline_create(None).unwrap();
        let isync = session.fence_get(session.isync_fence_create(id, Some(1)).unwrap()).unwrap();

        assert_eq!(session.close(), 2);
        assert_eq!(hsync.fence().status(), FenceStatus::Errored);
        assert_eq!(isync.fence().status(), FenceStatus::Errored);
        assert_eq!(session.context_count(), 0);
        assert_eq!(session.isync_timeline_count(), 0);
        assert_eq!(session.fence_count(), 0);

        assert_eq!(session.isync_timeline_create(None).unwrap_err(), SyncError::Gone);
        assert_eq!(session.close(), 0);
    }
}
