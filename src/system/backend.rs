//! Pose-graph backend thread: serialized loop-closure handling.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

use crate::frontend::LivePoseSink;
use crate::map::Timestamp;
use crate::pose_graph::{optimizer, PoseGraph, PoseGraphConfig};
use crate::system::shared_state::SharedState;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// A detected loop closure: the trajectory around `start_time..end_time`
/// revisits the place seen at `old_time`.
#[derive(Debug, Clone, Copy)]
pub struct LoopClosureEvent {
    pub old_time: Timestamp,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
}

#[derive(Debug, Default, Clone)]
pub struct BackendStats {
    pub events: u64,
    pub closures: u64,
    pub maintenance_ticks: u64,
}

/// Consumes loop-closure events one at a time and corrects the map.
///
/// Segmentation and submap state are sequential; running a single consumer
/// thread is what serializes concurrent closure triggers.
pub struct Backend {
    shared: Arc<SharedState>,
    frontend: Arc<dyn LivePoseSink>,
    pose_graph: PoseGraph,
    config: PoseGraphConfig,
    stats: BackendStats,
}

impl Backend {
    pub fn new(shared: Arc<SharedState>, frontend: Arc<dyn LivePoseSink>) -> Self {
        Self {
            shared,
            frontend,
            pose_graph: PoseGraph::new(),
            config: PoseGraphConfig::default(),
            stats: BackendStats::default(),
        }
    }

    pub fn with_config(mut self, config: PoseGraphConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    pub fn run(mut self, events: Receiver<LoopClosureEvent>) {
        info!("pose graph backend started");
        loop {
            if self.shared.is_shutdown_requested() {
                break;
            }
            match events.recv_timeout(RECV_TIMEOUT) {
                Ok(event) => {
                    self.stats.events += 1;
                    if let Err(err) = self.close_loop(&event) {
                        // the atlas and the map have desynchronized; poses can
                        // no longer be trusted
                        panic!(
                            "loop closure ending at {} is unrecoverable: {err:#}",
                            event.end_time
                        );
                    }
                }
                Err(RecvTimeoutError::Timeout) => self.maintain(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!(
            events = self.stats.events,
            closures = self.stats.closures,
            "pose graph backend stopped"
        );
    }

    /// Idle-tick upkeep: advance segmentation over newly committed keyframes
    /// and let mapping consume up to the latest one.
    pub fn maintain(&mut self) {
        self.stats.maintenance_ticks += 1;
        let last = {
            let map = self.shared.map.read();
            match map.last_time() {
                Some(last) => {
                    self.pose_graph.update_sections(&map, last);
                    last
                }
                None => return,
            }
        };
        self.shared.publish_active_time(last);
    }

    /// Handle one loop-closure event end to end: resolve the active sections,
    /// solve the pose graph off-lock, apply and propagate the corrections.
    pub fn close_loop(&mut self, event: &LoopClosureEvent) -> anyhow::Result<()> {
        if event.start_time <= event.old_time || event.end_time < event.start_time {
            debug!(
                old_time = %event.old_time,
                start_time = %event.start_time,
                "degenerate loop closure ignored"
            );
            return Ok(());
        }

        let mut old_time = event.old_time;
        let submap = self
            .pose_graph
            .add_submap(event.old_time, event.start_time, event.end_time);

        // collect under the read lock
        let (sections, problem) = {
            let map = self.shared.map.read();
            let mut window = map.keyframes_between(old_time, event.start_time);
            let sections = self.pose_graph.get_active_sections(
                &map,
                &mut window,
                &mut old_time,
                event.start_time,
            );
            if sections.is_empty() {
                debug!(end_time = %event.end_time, "loop closure spans no sections");
                self.shared.publish_active_time(event.end_time);
                return Ok(());
            }
            let mut sections = sections;
            let problem = optimizer::build_problem(&map, &mut sections, &submap)
                .context("building pose graph problem")?;
            (sections, problem)
        };

        // solve without holding any lock
        let solution = optimizer::solve(&problem, &self.config);

        // apply under the write lock
        let forward = {
            let mut map = self.shared.map.write();
            optimizer::apply(&mut map, &sections, &problem, &solution)
                .context("applying pose graph corrections")?
        };
        if let Some(transform) = forward {
            optimizer::forward_propagate(
                self.frontend.as_ref(),
                &self.shared.map,
                &transform,
                event.start_time,
            );
        }

        self.shared.publish_active_time(event.end_time);
        self.stats.closures += 1;
        info!(
            old_time = %old_time,
            start_time = %event.start_time,
            end_time = %event.end_time,
            sections = sections.len(),
            iterations = solution.iterations,
            final_cost = solution.final_cost,
            "loop closure applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::Frontend;
    use crate::geometry::SE3;
    use crate::map::Keyframe;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    fn yaw_pose(deg: f64, t: f64) -> SE3 {
        SE3::new(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), deg.to_radians()),
            Vector3::new(t, 0.0, 0.0),
        )
    }

    /// Shared state seeded with the three-leg trajectory (t = 0..=50):
    /// straight, 90-degree turn, straight, 90-degree turn, straight.
    fn seeded_state() -> Arc<SharedState> {
        let mut degrees = vec![0.0; 15];
        degrees.extend([30.0, 60.0, 90.0]);
        degrees.extend(std::iter::repeat(90.0).take(15));
        degrees.extend([120.0, 150.0, 180.0]);
        degrees.extend(std::iter::repeat(180.0).take(15));

        let shared = Arc::new(SharedState::new());
        {
            let mut map = shared.map.write();
            for (i, &deg) in degrees.iter().enumerate() {
                map.insert_keyframe(Timestamp(i as f64), yaw_pose(deg, i as f64));
            }
        }
        shared
    }

    #[test]
    fn test_degenerate_event_is_noop() {
        let shared = seeded_state();
        let frontend = Arc::new(Frontend::new());
        let before = shared.map.read().get(Timestamp(10.0)).unwrap().pose;

        let mut backend = Backend::new(shared.clone(), frontend);
        let event = LoopClosureEvent {
            old_time: Timestamp(10.0),
            start_time: Timestamp(10.0),
            end_time: Timestamp(10.0),
        };
        backend.close_loop(&event).unwrap();

        assert_eq!(shared.map.read().get(Timestamp(10.0)).unwrap().pose, before);
        assert_eq!(backend.stats().closures, 0);
    }

    #[test]
    fn test_close_loop_consistent_trajectory() {
        let shared = seeded_state();
        let frontend = Arc::new(Frontend::new());
        // uncommitted live frame past the trajectory end
        frontend.adopt(Keyframe::new(99, Timestamp(50.5), yaw_pose(180.0, 50.5)));

        let anchor_a_before = shared.map.read().get(Timestamp(0.0)).unwrap().pose;
        let f40_before = shared.map.read().get(Timestamp(40.0)).unwrap().pose;

        let mut backend = Backend::new(shared.clone(), frontend.clone());
        // the third leg revisits the start: anchor at t=0, loop spans 33..50
        let event = LoopClosureEvent {
            old_time: Timestamp(0.0),
            start_time: Timestamp(33.0),
            end_time: Timestamp(50.0),
        };
        backend.close_loop(&event).unwrap();

        // the old-side anchor is never written, bit for bit
        assert_eq!(
            shared.map.read().get(Timestamp(0.0)).unwrap().pose,
            anchor_a_before
        );

        // a self-consistent trajectory yields (numerically) no correction
        let f40 = shared.map.read().get(Timestamp(40.0)).unwrap().pose;
        assert_relative_eq!(f40.translation, f40_before.translation, epsilon = 1e-9);
        assert_relative_eq!(
            f40.rotation.angle_to(&f40_before.rotation),
            0.0,
            epsilon = 1e-9
        );
        let live = frontend.last_pose().unwrap();
        assert_relative_eq!(live.translation.x, 50.5, epsilon = 1e-9);

        assert_eq!(shared.active_time(), Timestamp(50.0));
        assert_eq!(backend.stats().closures, 1);
    }

    #[test]
    fn test_closure_without_sections_still_publishes_watermark() {
        let shared = seeded_state();
        let frontend = Arc::new(Frontend::new());
        let mut backend = Backend::new(shared.clone(), frontend);

        // the span [40, 45] contains no committed section boundary
        let event = LoopClosureEvent {
            old_time: Timestamp(40.0),
            start_time: Timestamp(45.0),
            end_time: Timestamp(45.0),
        };
        backend.close_loop(&event).unwrap();

        assert_eq!(shared.active_time(), Timestamp(45.0));
        assert_eq!(backend.stats().closures, 0);
    }

    #[test]
    fn test_maintain_publishes_latest_keyframe() {
        let shared = seeded_state();
        let frontend = Arc::new(Frontend::new());
        let mut backend = Backend::new(shared.clone(), frontend);

        backend.maintain();
        assert_eq!(shared.active_time(), Timestamp(50.0));
        assert_eq!(backend.stats().maintenance_ticks, 1);
    }
}
