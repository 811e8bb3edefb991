//! Wraparound-safe 32-bit timestamps.
//!
//! Hardware reports progress as a 32-bit counter that wraps after about four
//! billion completions. Ordering is therefore circular: `a` is at or after `b`
//! when the forward distance from `b` to `a` is less than half the counter
//! space.
//!
//! ```
//! use tsync_core::timestamp::{is_at_or_after, Timestamp};
//!
//! assert!(is_at_or_after(5, 0xFFFF_FFFE));
//! assert!(!is_at_or_after(0, 1));
//!
//! let last = Timestamp::new(u32::MAX);
//! assert_eq!(last.next(), Timestamp::new(0));
//! assert!(last.next().is_at_or_after(last));
//! ```
//!
//! [`Timestamp`] intentionally has no `PartialOrd`/`Ord` implementation: plain
//! numeric comparison is wrong near the wrap boundary.

use std::fmt;

/// Half of the 32-bit counter space. Forward distances below this are "ahead".
pub const TIMESTAMP_WINDOW: u32 = 0x8000_0000;

/// Returns `true` if `a` is at or after `b` in circular order.
#[inline]
pub const fn is_at_or_after(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) < TIMESTAMP_WINDOW
}

/// The later of two timestamps in circular order.
#[inline]
pub const fn later_of(a: u32, b: u32) -> u32 {
    if is_at_or_after(a, b) { a } else { b }
}

/// A 32-bit completion timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Timestamp(u32);

impl Timestamp {
    /// The initial timestamp of a fresh timeline.
    pub const ZERO: Self = Self(0);

    /// Wrap a raw counter value.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw counter value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The next timestamp, wrapping at `u32::MAX`.
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Returns `true` if `self` is at or after `other` in circular order.
    #[inline]
    pub const fn is_at_or_after(self, other: Self) -> bool {
        is_at_or_after(self.0, other.0)
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[inline]
    pub const fn is_before(self, other: Self) -> bool {
        !is_at_or_after(self.0, other.0)
    }

    /// The later of `self` and `other`.
    #[inline]
    pub const fn max(self, other: Self) -> Self {
        Self(later_of(self.0, other.0))
    }
}

impl From<u32> for Timestamp {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Timestamp> for u32 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_is_at_or_after() {
        for v in [0, 1, 0x7FFF_FFFF, 0x8000_0000, u32::MAX] {
            assert!(is_at_or_after(v, v));
        }
    }

    #[test]
    fn test_near_zero() {
        assert!(is_at_or_after(1, 0));
        assert!(!is_at_or_after(0, 1));
        assert!(is_at_or_after(0, u32::MAX));
        assert!(!is_at_or_after(u32::MAX, 0));
        assert!(is_at_or_after(5, 0xFFFF_FFFE));
        assert!(!is_at_or_after(0xFFFF_FFFE, 5));
    }

    #[test]
    fn test_half_window_boundary() {
        // Forward distance 2^31 - 1 is still ahead, 2^31 is not.
        assert!(is_at_or_after(0x7FFF_FFFF, 0));
        assert!(!is_at_or_after(0x8000_0000, 0));
        // Exactly half a window apart: neither side is ahead.
        assert!(!is_at_or_after(0, 0x8000_0000));
        assert!(is_at_or_after(0x8000_0000, 1));
        assert!(!is_at_or_after(0x8000_0001, 1 + 0x8000_0000 + 1));
    }

    #[test]
    fn test_matches_circular_distance() {
        let samples = [
            0u32,
            1,
            2,
            100,
            0x7FFF_FFFE,
            0x7FFF_FFFF,
            0x8000_0000,
            0x8000_0001,
            0xFFFF_FFFE,
            u32::MAX,
        ];
        for &a in &samples {
            for &b in &samples {
                let forward = (a as u64 + (1u64 << 32) - b as u64) % (1u64 << 32);
                assert_eq!(is_at_or_after(a, b), forward < (1u64 << 31), "a={a:#x} b={b:#x}");
            }
        }
    }

    #[test]
    fn test_later_of() {
        assert_eq!(later_of(10, 20), 20);
        assert_eq!(later_of(20, 10), 20);
        assert_eq!(later_of(3, u32::MAX), 3);
        assert_eq!(later_of(u32::MAX, 3), 3);
    }

    #[test]
    fn test_timestamp_next_wraps() {
        assert_eq!(Timestamp::new(u32::MAX).next(), Timestamp::ZERO);
        assert_eq!(Timestamp::new(7).next().raw(), 8);
    }

    #[test]
    fn test_timestamp_ordering_helpers() {
        let a = Timestamp::new(0xFFFF_FFF0);
        let b = Timestamp::new(0x10);
        assert!(b.is_at_or_after(a));
        assert!(a.is_before(b));
        assert_eq!(a.max(b), b);
        assert_eq!(b.max(a), b);
    }
}
