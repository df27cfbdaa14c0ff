//! Pose-graph backend for a visual/LiDAR/inertial SLAM pipeline.
//!
//! The crate owns the trajectory-sectioning and loop-closure
//! correction-propagation engine: it partitions the keyframe trajectory into
//! straight/turn sections, groups them into submaps bounded by loop-closure
//! anchors, solves a sparse pose-graph problem per closure, and rigidly
//! propagates the resulting corrections through all affected keyframes —
//! including the live tracked frame.
//!
//! # Threading model
//!
//! Three logical threads cooperate around the shared [`map::Map`]:
//!
//! - **Tracking** commits keyframes through [`frontend::Frontend::track`] and
//!   reads/writes its own live frame under the frontend mutex.
//! - **Backend** ([`system::Backend`]) consumes loop-closure events from a
//!   channel, one at a time; segmentation state is sequential and not
//!   reentrant, so triggers queue rather than interleave.
//! - **Mapping** ([`system::Mapping`]) polls committed keyframes up to the
//!   backend-published active-time watermark and never mutates poses.
//!
//! Lock order is frontend mutex first, then the map `RwLock`. The frontend
//! mutex is held for the whole read-modify-write of the live frame during
//! forward propagation; no lock is held while the solver runs.

pub mod frontend;
pub mod geometry;
pub mod map;
pub mod pose_graph;
pub mod system;
