//! Trajectory sections and loop-closure submaps.

use std::collections::BTreeMap;

use crate::geometry::SE3;
use crate::map::Timestamp;

/// Ordered section index, keyed by the section's start time `A`.
pub type Atlas = BTreeMap<Timestamp, Section>;

/// One segment of the trajectory.
///
/// `A` opens the section, `B` marks where the opening turn settled into
/// straight motion, and `C` closes it (equal to the next section's `A`).
/// `pose` caches the pose of the keyframe at `A` as it was before the last
/// pose-graph solve, so interior keyframes can be realigned rigidly afterward.
#[derive(Debug, Clone, Copy)]
pub struct Section {
    pub a: Timestamp,
    pub b: Timestamp,
    pub c: Timestamp,
    pub pose: SE3,
}

impl Default for Section {
    fn default() -> Self {
        Self {
            a: Timestamp::ZERO,
            b: Timestamp::ZERO,
            c: Timestamp::ZERO,
            pose: SE3::identity(),
        }
    }
}

/// Span of the trajectory covered by one loop closure, keyed in the pose
/// graph by its end time. `a` is the old-side anchor, `b` the settle point
/// after it; both stay fixed during the solve.
#[derive(Debug, Clone, Copy)]
pub struct Submap {
    pub a: Timestamp,
    pub b: Timestamp,
    pub c: Timestamp,
}
