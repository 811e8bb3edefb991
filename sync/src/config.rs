//! Session configuration.

use std::time::Duration;

/// Maximum number of hardware contexts per session.
pub const DEFAULT_MAX_CONTEXTS: usize = 128;

/// Maximum number of explicit timelines per session.
pub const DEFAULT_MAX_ISYNC_TIMELINES: usize = 4096;

/// Timeline name buffer length, including the terminator byte.
pub const DEFAULT_TIMELINE_NAME_LEN: usize = 64;

/// Configuration for a [`Session`](crate::Session) and its contexts.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tsync::SyncConfig;
///
/// let config = SyncConfig::default()
///     .with_max_contexts(16)
///     .with_progress_poll_interval(Duration::from_micros(250));
/// assert_eq!(config.max_contexts, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Maximum number of live hardware contexts.
    pub max_contexts: usize,
    /// Maximum number of live explicit (isync) timelines.
    pub max_isync_timelines: usize,
    /// Timeline name buffer length. Names keep at most `len - 1` bytes.
    pub timeline_name_len: usize,
    /// How often a timestamp waiter re-reads the shadow block when no
    /// completion notification arrives.
    pub progress_poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_contexts: DEFAULT_MAX_CONTEXTS,
            max_isync_timelines: DEFAULT_MAX_ISYNC_TIMELINES,
            timeline_name_len: DEFAULT_TIMELINE_NAME_LEN,
            progress_poll_interval: Duration::from_millis(1),
        }
    }
}

impl SyncConfig {
    /// Set the maximum number of live hardware contexts.
    pub fn with_max_contexts(mut self, max: usize) -> Self {
        self.max_contexts = max;
        self
    }

    /// Set the maximum number of live explicit timelines.
    pub fn with_max_isync_timelines(mut self, max: usize) -> Self {
        self.max_isync_timelines = max;
        self
    }

    /// Set the timeline name buffer length.
    pub fn with_timeline_name_len(mut self, len: usize) -> Self {
        self.timeline_name_len = len;
        self
    }

    /// Set the shadow re-read interval for timestamp waits.
    pub fn with_progress_poll_interval(mut self, interval: Duration) -> Self {
        self.progress_poll_interval = interval;
        self
    }

    /// Clamp `name` to the configured buffer length on a char boundary.
    pub(crate) fn timeline_name(&self, name: &str) -> String {
        let max = self.timeline_name_len.saturating_sub(1);
        if name.len() <= max {
            return name.to_owned();
        }
        let mut end = max;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name[..end].to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.max_contexts, 128);
        assert_eq!(config.timeline_name_len, 64);
    }

    #[test]
    fn test_short_name_unchanged() {
        let config = SyncConfig::default();
        assert_eq!(config.timeline_name("hsync-42-7"), "hsync-42-7");
    }

    #[test]
    fn test_long_name_truncated() {
        let config = SyncConfig::default().with_timeline_name_len(8);
        assert_eq!(config.timeline_name("isync-timeline-1234"), "isync-t");
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let config = SyncConfig::default().with_timeline_name_len(4);
        // "aé" is 3 bytes; "aéé" is 5. Max 3 bytes keeps "aé".
        assert_eq!(config.timeline_name("aéé"), "aé");
        let config = SyncConfig::default().with_timeline_name_len(3);
        // Max 2 bytes would split 'é', so only "a" survives.
        assert_eq!(config.timeline_name("aé"), "a");
    }
}
