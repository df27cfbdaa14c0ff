//! State shared between the tracking, backend, and mapping threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::map::{Map, Timestamp};

/// Shared ownership hub for the keyframe map, the backend's active-time
/// watermark, and the shutdown flag.
///
/// The watermark is a monotonically advancing timestamp: the mapping thread
/// may consume keyframes strictly before it, trusting that the backend will
/// not leave them mid-correction. Stored as `f64` bits in an atomic so readers
/// never block.
#[derive(Debug)]
pub struct SharedState {
    pub map: RwLock<Map>,
    active_time: AtomicU64,
    shutdown: AtomicBool,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            map: RwLock::new(Map::new()),
            active_time: AtomicU64::new(0.0_f64.to_bits()),
            shutdown: AtomicBool::new(false),
        }
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the watermark. Attempts to move it backward are ignored.
    pub fn publish_active_time(&self, time: Timestamp) {
        let _ = self
            .active_time
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                (time.seconds() > f64::from_bits(bits)).then(|| time.seconds().to_bits())
            });
    }

    pub fn active_time(&self) -> Timestamp {
        Timestamp(f64::from_bits(self.active_time.load(Ordering::SeqCst)))
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
