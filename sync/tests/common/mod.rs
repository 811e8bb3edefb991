//! Common utilities for timeline integration tests.
//!
//! [`TestTimeline`] drives one timeline through a [`Session`] with either the
//! hardware-context driver or the explicit driver, so the same scenario can
//! be run against both.

use std::sync::Arc;

use tsync::{
    ContextId, ExportedFence, FenceFd, Session, ShadowTimestampBlock, SyncConfig, Timeline,
    TimelineId,
};

// ============================================================================
// Driver Enumeration
// ============================================================================

/// Which side advances the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Driver {
    /// Hardware context: progress comes from the shadow timestamp block.
    Hsync,
    /// Explicit registry timeline: progress comes from `isync_forward`.
    Isync,
}

enum Handle {
    Hsync {
        ctx: ContextId,
        shadow: Arc<ShadowTimestampBlock>,
    },
    Isync(TimelineId),
}

// ============================================================================
// Test Timeline
// ============================================================================

/// A session with exactly one timeline under test.
pub struct TestTimeline {
    #[allow(dead_code)]
    pub driver: Driver,
    pub session: Session,
    handle: Handle,
}

impl TestTimeline {
    pub fn new(driver: Driver) -> Self {
        init_logging();

        let session = Session::new(4242, SyncConfig::default());
        let handle = match driver {
            Driver::Hsync => {
                let shadow = Arc::new(ShadowTimestampBlock::new());
                let ctx = session
                    .context_create(shadow.clone())
                    .expect("Failed to create context");
                // Create the implicit timeline up front so its baseline is 0.
                session
                    .context(ctx)
                    .and_then(|context| context.timeline())
                    .expect("Failed to create context timeline");
                Handle::Hsync { ctx, shadow }
            }
            Driver::Isync => Handle::Isync(
                session
                    .isync_timeline_create(None)
                    .expect("Failed to create timeline"),
            ),
        };

        Self {
            driver,
            session,
            handle,
        }
    }

    /// Submit (if needed) and export a fence for `ts`.
    pub fn fence(&self, ts: u32) -> FenceFd {
        match &self.handle {
            Handle::Hsync { ctx, .. } => {
                self.session
                    .context(*ctx)
                    .expect("Context missing")
                    .queue(ts);
                self.session
                    .hsync_fence_create(*ctx, ts)
                    .expect("Failed to create hsync fence")
            }
            Handle::Isync(id) => self
                .session
                .isync_fence_create(*id, Some(ts))
                .expect("Failed to create isync fence"),
        }
    }

    /// A new reference to the fence behind `fd`.
    pub fn exported(&self, fd: FenceFd) -> ExportedFence {
        self.session.fence_get(fd).expect("Unknown fence handle")
    }

    /// Report progress up to `ts`.
    pub fn advance(&self, ts: u32) {
        match &self.handle {
            Handle::Hsync { ctx, shadow } => {
                shadow.record_retire(ts);
                self.session
                    .context(*ctx)
                    .expect("Context missing")
                    .check_progress();
            }
            Handle::Isync(id) => {
                self.session
                    .isync_forward(*id, ts)
                    .expect("Failed to forward timeline");
            }
        }
    }

    /// Advance to `ts` in steps small enough to never look stale.
    #[allow(dead_code)]
    pub fn jump_to(&self, ts: u32) {
        let mut current = self.timeline().last_ts().raw();
        while current != ts {
            let step = ts.wrapping_sub(current).min(0x4000_0000);
            current = current.wrapping_add(step);
            self.advance(current);
        }
    }

    /// The timeline under test.
    pub fn timeline(&self) -> Timeline {
        match &self.handle {
            Handle::Hsync { ctx, .. } => self
                .session
                .context(*ctx)
                .expect("Context missing")
                .timeline()
                .expect("Context timeline gone"),
            Handle::Isync(id) => self
                .session
                .isync_timeline(*id)
                .expect("Timeline missing"),
        }
    }

    /// Destroy the timeline through its owner.
    pub fn destroy(&self) -> usize {
        match &self.handle {
            Handle::Hsync { ctx, .. } => self
                .session
                .context_destroy(*ctx)
                .expect("Failed to destroy context"),
            Handle::Isync(id) => self
                .session
                .isync_timeline_destroy(*id)
                .expect("Failed to destroy timeline"),
        }
    }
}

/// Install a test logger once per process.
pub fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
