//! Time-ordered keyframe store.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use thiserror::Error;

use crate::geometry::SE3;
use crate::map::{Keyframe, Timestamp};

/// Ordered keyframe window, keyed by timestamp.
pub type Frames = BTreeMap<Timestamp, Keyframe>;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("no keyframe at time {0}")]
    MissingKeyframe(Timestamp),
}

/// The shared keyframe trajectory.
///
/// Wrapped in a `RwLock` by the owning system; all accessors here assume the
/// caller already holds the appropriate guard.
#[derive(Debug, Default)]
pub struct Map {
    keyframes: Frames,
    next_id: u64,
    ended: bool,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a keyframe at `time` with the given pose. Ids are dense and
    /// monotonically increasing in commit order; re-inserting an existing
    /// timestamp returns the existing keyframe without consuming an id.
    pub fn insert_keyframe(&mut self, time: Timestamp, pose: SE3) -> &Keyframe {
        match self.keyframes.entry(time) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let id = self.next_id;
                self.next_id += 1;
                entry.insert(Keyframe::new(id, time, pose))
            }
        }
    }

    pub fn get(&self, time: Timestamp) -> Option<&Keyframe> {
        self.keyframes.get(&time)
    }

    pub fn get_mut(&mut self, time: Timestamp) -> Option<&mut Keyframe> {
        self.keyframes.get_mut(&time)
    }

    /// Like [`Map::get`], but a missing keyframe is an error. Anchor and
    /// section boundary times are required to resolve.
    pub fn expect(&self, time: Timestamp) -> Result<&Keyframe, MapError> {
        self.keyframes
            .get(&time)
            .ok_or(MapError::MissingKeyframe(time))
    }

    pub fn expect_mut(&mut self, time: Timestamp) -> Result<&mut Keyframe, MapError> {
        self.keyframes
            .get_mut(&time)
            .ok_or(MapError::MissingKeyframe(time))
    }

    pub fn contains(&self, time: Timestamp) -> bool {
        self.keyframes.contains_key(&time)
    }

    /// Keyframes in `[start, end]` (inclusive on both sides).
    pub fn range(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> impl Iterator<Item = (&Timestamp, &Keyframe)> {
        self.keyframes.range(start..=end)
    }

    /// Keyframes strictly after `start`.
    pub fn range_after(
        &self,
        start: Timestamp,
    ) -> impl Iterator<Item = (&Timestamp, &Keyframe)> {
        self.keyframes.range((Excluded(start), Unbounded))
    }

    /// Left-multiply `transform` onto every keyframe strictly inside
    /// `(start, end)`. Degenerate intervals are a no-op.
    pub fn transform_between(&mut self, transform: &SE3, start: Timestamp, end: Timestamp) {
        if end <= start {
            return;
        }
        for (_, kf) in self.keyframes.range_mut((Excluded(start), Excluded(end))) {
            kf.pose = *transform * kf.pose;
        }
    }

    /// Left-multiply `transform` onto every keyframe at or after `start`.
    pub fn transform_from(&mut self, transform: &SE3, start: Timestamp) {
        for (_, kf) in self.keyframes.range_mut(start..) {
            kf.pose = *transform * kf.pose;
        }
    }

    /// Clone the window `[start, end]` into an owned `Frames` map.
    pub fn keyframes_between(&self, start: Timestamp, end: Timestamp) -> Frames {
        if end < start {
            return Frames::new();
        }
        self.keyframes
            .range(start..=end)
            .map(|(t, kf)| (*t, kf.clone()))
            .collect()
    }

    pub fn first_time(&self) -> Option<Timestamp> {
        self.keyframes.keys().next().copied()
    }

    pub fn last_time(&self) -> Option<Timestamp> {
        self.keyframes.keys().next_back().copied()
    }

    pub fn last_keyframe(&self) -> Option<&Keyframe> {
        self.keyframes.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Mark the trajectory as ended. Segmentation commits its trailing
    /// section on the next update after this is set.
    pub fn set_ended(&mut self) {
        self.ended = true;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}
