//! # tsync core
//!
//! Building blocks shared by the tsync crates: wraparound-safe timestamp
//! arithmetic, batch release lists, and optional profiling instrumentation.

pub mod free_list;
pub mod profiling;
pub mod timestamp;

pub use timestamp::{Timestamp, is_at_or_after, later_of};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the core library version.
pub fn init() {
    log::info!("tsync core v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
