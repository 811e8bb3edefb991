//! Session-scoped table of exported fence handles.
//!
//! Stands in for a file-descriptor table: each installed [`ExportedFence`]
//! gets the lowest free [`FenceFd`] number.

use std::fmt;

use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};
use crate::export::ExportedFence;

/// Number of an installed exported fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceFd(pub u32);

impl fmt::Display for FenceFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

#[derive(Default)]
pub struct FenceHandleTable {
    slots: Mutex<Vec<Option<ExportedFence>>>,
}

impl FenceHandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `fence` under the lowest free number.
    pub fn install(&self, fence: ExportedFence) -> FenceFd {
        let mut slots = self.slots.lock();
        let index = match slots.iter().position(Option::is_none) {
            Some(index) => {
                slots[index] = Some(fence);
                index
            }
            None => {
                slots.push(Some(fence));
                slots.len() - 1
            }
        };
        FenceFd(index as u32)
    }

    /// A new reference to the fence installed under `fd`.
    pub fn get(&self, fd: FenceFd) -> SyncResult<ExportedFence> {
        self.slots
            .lock()
            .get(fd.0 as usize)
            .and_then(Option::clone)
            .ok_or_else(|| SyncError::NotFound(format!("fence handle {}", fd)))
    }

    /// Remove `fd`, releasing the table's reference.
    pub fn close(&self, fd: FenceFd) -> SyncResult<()> {
        let fence = {
            let mut slots = self.slots.lock();
            let fence = slots.get_mut(fd.0 as usize).and_then(Option::take);
            while matches!(slots.last(), Some(None)) {
                slots.pop();
            }
            fence
        };
        match fence {
            Some(fence) => {
                fence.release();
                Ok(())
            }
            None => Err(SyncError::NotFound(format!("fence handle {}", fd))),
        }
    }

    /// Number of installed handles.
    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every handle. Returns how many were installed.
    pub fn clear(&self) -> usize {
        let drained: Vec<ExportedFence> = std::mem::take(&mut *self.slots.lock())
            .into_iter()
            .flatten()
            .collect();
        drained.len()
    }
}
