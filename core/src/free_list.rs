//! Batch release of detached objects.
//!
//! Tearing down many timelines at once would otherwise release each pending
//! fence individually while still holding that timeline's lock. A
//! [`FreeList`] lets the teardown path *detach* objects while a lock is held
//! and *release* them afterwards in a single pass, with no lock held.
//!
//! Releasing drains the list but keeps its allocation, so a long-lived list
//! (for example one owned by a session) does not reallocate on every
//! teardown.
//!
//! # Example
//!
//! ```
//! use tsync_core::free_list::FreeList;
//!
//! let mut batch = FreeList::new();
//! batch.push(String::from("a"));
//! batch.extend([String::from("b"), String::from("c")]);
//! assert_eq!(batch.len(), 3);
//!
//! let mut released = Vec::new();
//! let count = batch.release_all(|item| released.push(item));
//! assert_eq!(count, 3);
//! assert!(batch.is_empty());
//! assert!(batch.capacity() >= 3);
//! ```

/// A list of detached objects awaiting release.
#[derive(Debug)]
pub struct FreeList<T> {
    items: Vec<T>,
}

impl<T> FreeList<T> {
    /// Create an empty free-list.
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Create an empty free-list with room for `capacity` objects.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Add a detached object.
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Number of objects waiting for release.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is waiting for release.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Allocated capacity, preserved across [`release_all`](Self::release_all).
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Release every object through `release`, in insertion order.
    ///
    /// Returns the number of objects released. The list is empty afterwards
    /// but keeps its allocation.
    pub fn release_all(&mut self, mut release: impl FnMut(T)) -> usize {
        let count = self.items.len();
        for item in self.items.drain(..) {
            release(item);
        }
        count
    }
}

impl<T> Default for FreeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Extend<T> for FreeList<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}
