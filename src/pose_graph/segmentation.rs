//! Adaptive trajectory segmentation.
//!
//! Walks committed keyframes in time order and splits the trajectory into
//! sections at sustained heading changes. A section is committed when a new
//! turn starts after enough straight travel and the accumulated heading change
//! since the section opened lands in a useful band; very shallow drifts and
//! near-U-turns are absorbed into the current section instead.

use nalgebra::Vector3;

use crate::geometry::degree_angle;
use crate::map::{Map, Timestamp, EPSILON};
use crate::pose_graph::section::{Atlas, Section};

/// Frame-to-frame heading change that opens a turn, in degrees.
const TURN_START_DEG: f64 = 5.0;
/// Accumulated drift from the last settle heading that also opens a turn.
const HEADING_DRIFT_DEG: f64 = 20.0;
/// Minimum frames a section must span before it can be committed.
const MIN_SECTION_FRAMES: u32 = 10;
/// Committed sections must accumulate a total heading change in this band.
const MIN_TOTAL_DEG: f64 = 20.0;
const MAX_TOTAL_DEG: f64 = 160.0;
/// Frame-to-frame heading change below which a turn has settled.
const TURN_END_DEG: f64 = 1.0;
/// A turn longer than this is forced to settle.
const MAX_TURN_FRAMES: u32 = 20;

/// Incremental segmentation state.
///
/// Sequential by construction: `update` must see keyframes in time order and
/// each keyframe exactly once, which the watermark `finished` enforces.
#[derive(Debug)]
pub struct Segmentation {
    /// Keyframes at or before this time have been consumed.
    finished: Timestamp,
    last_time: Option<Timestamp>,
    last_heading: Vector3<f64>,
    /// Heading when the current section opened.
    a_heading: Vector3<f64>,
    /// Heading at the last turn settle point.
    b_heading: Vector3<f64>,
    turning: bool,
    frames: u32,
    current: Section,
}

impl Default for Segmentation {
    fn default() -> Self {
        Self {
            finished: Timestamp::ZERO,
            last_time: None,
            last_heading: Vector3::x(),
            a_heading: Vector3::x(),
            b_heading: Vector3::x(),
            turning: false,
            frames: 0,
            current: Section::default(),
        }
    }
}

impl Segmentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume keyframes up to and including `time`, committing finished
    /// sections into `sections`. Re-querying an already-consumed range is a
    /// no-op.
    pub fn update(&mut self, map: &Map, sections: &mut Atlas, time: Timestamp) {
        if map.is_ended() {
            // an ended trajectory is consumed exactly once: force-finalize
            // the tail, then stay permanently quiescent
            if !self.turning {
                if let Some(last) = map.last_time() {
                    self.current.c = last;
                    sections.insert(self.current.a, self.current);
                    self.turning = true;
                }
            }
            return;
        }

        if time < self.finished {
            return;
        }
        let window = map.keyframes_between(self.finished, time);
        self.finished = time.offset(EPSILON);

        for (&frame_time, frame) in &window {
            let heading = frame.pose.heading();
            if self.last_time.is_some() {
                let degree = degree_angle(&self.last_heading, &heading);
                if !self.turning
                    && (degree >= TURN_START_DEG
                        || degree_angle(&self.b_heading, &heading) > HEADING_DRIFT_DEG)
                {
                    if self.frames >= MIN_SECTION_FRAMES {
                        let total = degree_angle(&self.a_heading, &heading);
                        if total > MIN_TOTAL_DEG && total < MAX_TOTAL_DEG {
                            self.current.c = frame_time;
                            sections.insert(self.current.a, self.current);
                            self.current.a = frame_time;
                            self.a_heading = heading;
                            self.frames = 0;
                        }
                    }
                    self.turning = true;
                } else if self.turning && (degree < TURN_END_DEG || self.frames > MAX_TURN_FRAMES)
                {
                    self.current.b = frame_time;
                    self.b_heading = heading;
                    self.turning = false;
                }
                self.frames += 1;
            } else {
                self.current.a = frame_time;
                self.current.b = frame_time;
                self.a_heading = heading;
                self.b_heading = heading;
            }
            self.last_time = Some(frame_time);
            self.last_heading = heading;
        }
    }

    /// Start of the section currently being built.
    pub fn current_start(&self) -> Timestamp {
        self.current.a
    }
}
