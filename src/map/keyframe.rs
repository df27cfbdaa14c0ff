//! Keyframe: a pose snapshot committed to the map by the tracking thread.

use crate::geometry::SE3;
use crate::map::Timestamp;

/// Per-keyframe residual weights.
#[derive(Debug, Clone, Copy)]
pub struct Weights {
    /// Weight applied to the relative-pose residual in the pose-graph solve.
    pub pose_graph: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self { pose_graph: 1.0 }
    }
}

/// A single keyframe in the trajectory.
///
/// Ids are assigned densely in commit order by the map store; a gap in the id
/// sequence of a keyframe window means keyframes were trimmed out between two
/// neighbors.
#[derive(Debug, Clone)]
pub struct Keyframe {
    pub id: u64,
    pub time: Timestamp,
    /// Body-to-world pose (T_wb).
    pub pose: SE3,
    pub weights: Weights,
}

impl Keyframe {
    pub fn new(id: u64, time: Timestamp, pose: SE3) -> Self {
        Self {
            id,
            time,
            pose,
            weights: Weights::default(),
        }
    }
}
