//! Per-session registry of explicitly driven ("isync") timelines.
//!
//! Timelines are addressed by a generational [`TimelineId`]. A slot index is
//! only handed out again once the previous timeline has been removed *and*
//! fully dropped (no caller still holds a handle to it), and each reuse bumps
//! the generation, so a stale id can never resolve to a newer timeline.

use std::fmt;

use parking_lot::RwLock;
use tsync_core::free_list::FreeList;
use tsync_core::profiling::{profile_message, profile_scope};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::fence::{Fence, FenceStatus};
use crate::timeline::{Timeline, WeakTimeline};

/// Identifier of a registry timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimelineId {
    index: u32,
    generation: u32,
}

impl TimelineId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a single integer, generation in the high half.
    pub fn to_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl fmt::Display for TimelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

enum Slot {
    Occupied {
        generation: u32,
        timeline: Timeline,
    },
    Vacant {
        generation: u32,
        retired: Option<WeakTimeline>,
    },
}

impl Slot {
    fn reusable(&self) -> Option<u32> {
        match self {
            Slot::Vacant { generation, retired } => {
                let alive = retired.as_ref().is_some_and(WeakTimeline::is_alive);
                (!alive).then_some(*generation)
            }
            Slot::Occupied { .. } => None,
        }
    }
}

struct RegistryState {
    slots: Vec<Slot>,
    live: usize,
}

/// Map from [`TimelineId`] to [`Timeline`], scoped to one session.
pub struct TimelineRegistry {
    pid: u32,
    config: SyncConfig,
    state: RwLock<RegistryState>,
}

impl TimelineRegistry {
    pub fn new(pid: u32, config: SyncConfig) -> Self {
        Self {
            pid,
            config,
            state: RwLock::new(RegistryState {
                slots: Vec::new(),
                live: 0,
            }),
        }
    }

    /// Number of live timelines.
    pub fn len(&self) -> usize {
        self.state.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a timeline and return its id.
    ///
    /// Without a `name` the timeline is called `isync-<pid>-<index>`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidArgument`] when the registry already holds
    /// `max_isync_timelines` timelines.
    pub fn create(&self, name: Option<&str>) -> SyncResult<TimelineId> {
        let mut state = self.state.write();
        if state.live >= self.config.max_isync_timelines {
            return Err(SyncError::InvalidArgument(format!(
                "registry full ({} timelines)",
                state.live
            )));
        }

        let reuse = state
            .slots
            .iter()
            .enumerate()
            .find_map(|(index, slot)| slot.reusable().map(|generation| (index, generation)));
        let (index, generation) = match reuse {
            Some((index, generation)) => (index, generation.wrapping_add(1)),
            None => (state.slots.len(), 0),
        };
        let id = TimelineId {
            index: index as u32,
            generation,
        };

        let name = match name {
            Some(name) => self.config.timeline_name(name),
            None => self.config.timeline_name(&format!("isync-{}-{}", self.pid, index)),
        };
        let slot = Slot::Occupied {
            generation,
            timeline: Timeline::new(name),
        };
        if index == state.slots.len() {
            state.slots.push(slot);
        } else {
            state.slots[index] = slot;
        }
        state.live += 1;

        log::debug!("registry: timeline {} created ({} live)", id, state.live);
        Ok(id)
    }

    /// Resolve `id` to its timeline.
    pub fn lookup(&self, id: TimelineId) -> SyncResult<Timeline> {
        match self.state.read().slots.get(id.index as usize) {
            Some(Slot::Occupied { generation, timeline }) if *generation == id.generation => {
                Ok(timeline.clone())
            }
            _ => Err(SyncError::NotFound(format!("timeline {}", id))),
        }
    }

    /// Remove `id` and destroy its timeline. Returns the number of fences
    /// errored.
    pub fn destroy(&self, id: TimelineId) -> SyncResult<usize> {
        let timeline = {
            let mut state = self.state.write();
            let timeline = match state.slots.get(id.index as usize) {
                Some(Slot::Occupied { generation, timeline }) if *generation == id.generation => {
                    timeline.clone()
                }
                _ => return Err(SyncError::NotFound(format!("timeline {}", id))),
            };
            state.slots[id.index as usize] = Slot::Vacant {
                generation: id.generation,
                retired: Some(timeline.downgrade()),
            };
            state.live -= 1;
            timeline
        };

        let errored = timeline.destroy();
        log::debug!("registry: timeline {} destroyed ({} fences errored)", id, errored);
        Ok(errored)
    }

    /// Advance timeline `id` to `ts`. Returns the number of fences signaled.
    pub fn forward(&self, id: TimelineId, ts: u32) -> SyncResult<usize> {
        Ok(self.lookup(id)?.advance(ts))
    }

    /// Create a fence on timeline `id`; without `ts` it targets the next
    /// timestamp.
    pub fn create_fence(&self, id: TimelineId, ts: Option<u32>) -> SyncResult<Fence> {
        let timeline = self.lookup(id)?;
        match ts {
            Some(ts) => timeline.create_fence(ts),
            None => timeline.create_next_fence(),
        }
    }

    /// Signal a pending `fence` of timeline `id`.
    pub fn signal(&self, id: TimelineId, fence: &Fence) -> SyncResult<usize> {
        self.lookup(id)?.signal_fence(fence)
    }

    /// Remove every timeline and move their pending fences into `batch`.
    pub(crate) fn teardown_into(&self, batch: &mut FreeList<Fence>) -> usize {
        profile_scope!("registry_teardown");

        let timelines: Vec<Timeline> = {
            let mut state = self.state.write();
            state.live = 0;
            state
                .slots
                .iter_mut()
                .filter_map(|slot| {
                    let Slot::Occupied { generation, timeline } = slot else {
                        return None;
                    };
                    let (generation, timeline) = (*generation, timeline.clone());
                    *slot = Slot::Vacant {
                        generation,
                        retired: Some(timeline.downgrade()),
                    };
                    Some(timeline)
                })
                .collect()
        };

        let count = timelines.len();
        for timeline in &timelines {
            timeline.destroy_into(batch);
        }
        if count > 0 {
            profile_message!("registry torn down");
            log::debug!("registry: {} timelines torn down", count);
        }
        count
    }

    /// Destroy every remaining timeline. Returns the number of fences
    /// errored.
    pub fn teardown_all(&self) -> usize {
        let mut batch = FreeList::new();
        self.teardown_into(&mut batch);
        batch.release_all(|fence| {
            fence.signal(FenceStatus::Errored);
        })
    }
}

impl Drop for TimelineRegistry {
    fn drop(&mut self) {
        self.teardown_all();
    }
}
