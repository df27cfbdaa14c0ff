//! Mapping consumer: materializes the committed trajectory behind the
//! backend's watermark.
//!
//! Dense cloud construction happens downstream; this thread's contract is the
//! consumption discipline: it only ever reads keyframes strictly before the
//! published active time, so it never observes a pose the backend is still
//! correcting. Poses it has consumed are eventually-correct, not final.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::geometry::SE3;
use crate::map::Timestamp;
use crate::system::shared_state::SharedState;

const POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Granularity at which the poll sleep rechecks the shutdown flag.
const SLEEP_STEP: Duration = Duration::from_millis(100);

pub struct Mapping {
    shared: Arc<SharedState>,
    /// Last consumed timestamp; consumption resumes strictly after it.
    head: Timestamp,
    trajectory: Vec<(Timestamp, SE3)>,
}

impl Mapping {
    pub fn new(shared: Arc<SharedState>) -> Self {
        Self {
            shared,
            head: Timestamp(f64::NEG_INFINITY),
            trajectory: Vec::new(),
        }
    }

    pub fn run(&mut self) {
        info!("mapping consumer started");
        while !self.shared.is_shutdown_requested() {
            self.poll_once();
            let mut slept = Duration::ZERO;
            while slept < POLL_INTERVAL && !self.shared.is_shutdown_requested() {
                std::thread::sleep(SLEEP_STEP);
                slept += SLEEP_STEP;
            }
        }
        info!(consumed = self.trajectory.len(), "mapping consumer stopped");
    }

    /// Consume committed keyframes in `(head, active_time)`; returns how many
    /// were taken this round.
    pub fn poll_once(&mut self) -> usize {
        let active = self.shared.active_time();
        let map = self.shared.map.read();
        let mut consumed = 0;
        for (&time, kf) in map.range_after(self.head) {
            if time >= active {
                break;
            }
            self.trajectory.push((time, kf.pose));
            self.head = time;
            consumed += 1;
        }
        if consumed > 0 {
            debug!(consumed, head = %self.head, "mapping consumed keyframes");
        }
        consumed
    }

    /// Trajectory consumed so far, in time order.
    pub fn trajectory(&self) -> &[(Timestamp, SE3)] {
        &self.trajectory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{UnitQuaternion, Vector3};

    fn seeded_state(n: u64) -> Arc<SharedState> {
        let shared = Arc::new(SharedState::new());
        {
            let mut map = shared.map.write();
            for i in 0..n {
                let pose = SE3::new(
                    UnitQuaternion::identity(),
                    Vector3::new(i as f64, 0.0, 0.0),
                );
                map.insert_keyframe(Timestamp(i as f64), pose);
            }
        }
        shared
    }

    #[test]
    fn test_consumes_strictly_below_watermark() {
        let shared = seeded_state(6);
        let mut mapping = Mapping::new(shared.clone());

        assert_eq!(mapping.poll_once(), 0);

        shared.publish_active_time(Timestamp(3.0));
        assert_eq!(mapping.poll_once(), 3);
        let times: Vec<f64> = mapping.trajectory().iter().map(|(t, _)| t.seconds()).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_resumes_from_head_without_duplicates() {
        let shared = seeded_state(6);
        let mut mapping = Mapping::new(shared.clone());

        shared.publish_active_time(Timestamp(3.0));
        mapping.poll_once();
        assert_eq!(mapping.poll_once(), 0);

        shared.publish_active_time(Timestamp(6.0));
        assert_eq!(mapping.poll_once(), 3);
        assert_eq!(mapping.trajectory().len(), 6);
    }
}
