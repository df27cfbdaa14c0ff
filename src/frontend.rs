//! Live tracker state and the capability interface the backend uses to
//! correct it.
//!
//! The real tracker lives outside this crate; [`Frontend`] carries only the
//! state the pose-graph backend must agree with it on: the last tracked frame,
//! the latest relative motion, and a world-position cache for downstream
//! consumers. The backend addresses it exclusively through [`LivePoseSink`].

use std::collections::HashMap;

use nalgebra::Vector3;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::geometry::SE3;
use crate::map::{Keyframe, Map, Timestamp};

/// Backend-facing handle onto the live tracking state.
///
/// `with_live_frame` runs the closure with the frontend's pose mutex held so
/// the whole read-modify-write of the live pose is atomic with respect to
/// tracking.
pub trait LivePoseSink: Send + Sync {
    fn with_live_frame(&self, f: &mut dyn FnMut(Option<&mut Keyframe>));

    /// Invalidate cached world-position lookups after poses changed.
    fn refresh_cache(&self);
}

#[derive(Debug, Default)]
struct FrontendState {
    last_frame: Option<Keyframe>,
    relative_motion: SE3,
    position_cache: HashMap<u64, Vector3<f64>>,
}

#[derive(Debug, Default)]
pub struct Frontend {
    state: Mutex<FrontendState>,
}

impl Frontend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose `relative` onto the last pose and commit the result to the map
    /// as a keyframe. Lock order is the frontend mutex first, then the map.
    pub fn track(&self, map: &RwLock<Map>, time: Timestamp, relative: SE3) -> SE3 {
        let mut state = self.state.lock();
        let pose = match &state.last_frame {
            Some(last) => last.pose * relative,
            None => relative,
        };
        let committed = {
            let mut guard = map.write();
            guard.insert_keyframe(time, pose).clone()
        };
        state.relative_motion = relative;
        state
            .position_cache
            .insert(committed.id, committed.pose.translation);
        state.last_frame = Some(committed);
        pose
    }

    /// Advance the live frame without committing a keyframe. The frame keeps
    /// its identity until [`Frontend::track`] next commits.
    pub fn advance(&self, time: Timestamp, relative: SE3) -> SE3 {
        let mut state = self.state.lock();
        let pose = match &state.last_frame {
            Some(last) => last.pose * relative,
            None => relative,
        };
        state.relative_motion = relative;
        match state.last_frame.as_mut() {
            Some(last) => {
                last.time = time;
                last.pose = pose;
            }
            None => state.last_frame = Some(Keyframe::new(0, time, pose)),
        }
        pose
    }

    pub fn last_pose(&self) -> Option<SE3> {
        self.state.lock().last_frame.as_ref().map(|kf| kf.pose)
    }

    /// Latest relative motion, usable as a constant-velocity prior.
    pub fn relative_motion(&self) -> SE3 {
        self.state.lock().relative_motion
    }

    pub fn cached_position(&self, id: u64) -> Option<Vector3<f64>> {
        self.state.lock().position_cache.get(&id).copied()
    }

    /// Replace the live frame wholesale. Test seam for states that `track`
    /// cannot reach directly.
    #[cfg(test)]
    pub fn adopt(&self, frame: Keyframe) {
        self.state.lock().last_frame = Some(frame);
    }
}

impl LivePoseSink for Frontend {
    fn with_live_frame(&self, f: &mut dyn FnMut(Option<&mut Keyframe>)) {
        let mut state = self.state.lock();
        f(state.last_frame.as_mut());
    }

    fn refresh_cache(&self) {
        let mut state = self.state.lock();
        let dropped = state.position_cache.len();
        let live = state
            .last_frame
            .as_ref()
            .map(|kf| (kf.id, kf.pose.translation));
        state.position_cache.clear();
        if let Some((id, position)) = live {
            state.position_cache.insert(id, position);
        }
        debug!(dropped, "position cache refreshed");
    }
}
