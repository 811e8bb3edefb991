//! # tsync
//!
//! Timestamp-ordered fence and timeline synchronization.
//!
//! Producers advance a wrapping 32-bit completion counter on a [`Timeline`];
//! consumers hold [`Fence`]s bound to a target timestamp that signal once the
//! counter reaches it. Two drivers share the same core:
//!
//! - **hsync**: a [`Context`]'s implicit timeline, advanced from a hardware
//!   [shadow timestamp block](ShadowTimestamps).
//! - **isync**: explicit timelines in a [`TimelineRegistry`], advanced by
//!   client requests.
//!
//! A [`Session`] ties both together for one client process and hands out
//! exported fences as small [`FenceFd`] numbers.
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use tsync::{Timeline, WaitStatus};
//!
//! let timeline = Timeline::new("compute");
//! let fence = timeline.create_fence(2).unwrap();
//!
//! let producer = {
//!     let timeline = timeline.clone();
//!     std::thread::spawn(move || timeline.advance(2))
//! };
//!
//! assert_eq!(fence.wait(Some(Duration::from_secs(5))), WaitStatus::Signaled);
//! producer.join().unwrap();
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod fence;
pub mod handles;
pub mod registry;
pub mod session;
pub mod timeline;
pub mod wait;

pub use config::SyncConfig;
pub use context::{Context, ContextId, ShadowSnapshot, ShadowTimestampBlock, ShadowTimestamps};
pub use error::{SyncError, SyncResult};
pub use export::{ExportedFence, Readiness};
pub use fence::{Fence, FenceStatus};
pub use handles::{FenceFd, FenceHandleTable};
pub use registry::{TimelineId, TimelineRegistry};
pub use session::Session;
pub use timeline::Timeline;
pub use tsync_core::Timestamp;
pub use wait::{CancelToken, WaitStatus, Waitable, wait_all, wait_any};

static_assertions::assert_impl_all!(Timeline: Send, Sync, Clone);
static_assertions::assert_impl_all!(Fence: Send, Sync, Clone);
static_assertions::assert_impl_all!(ExportedFence: Send, Sync, Clone, Unpin);
static_assertions::assert_impl_all!(CancelToken: Send, Sync, Clone);
static_assertions::assert_impl_all!(Context: Send, Sync);
static_assertions::assert_impl_all!(Session: Send, Sync);

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library versions.
pub fn init() {
    tsync_core::init();
    log::info!("tsync v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
