//! Map store: the time-indexed keyframe container shared by all threads.

pub mod keyframe;
pub mod store;

pub use keyframe::{Keyframe, Weights};
pub use store::{Frames, Map, MapError};

use std::cmp::Ordering;
use std::fmt;

/// Smallest time step used to build half-open ranges out of inclusive ones.
pub const EPSILON: f64 = 1e-6;

/// Keyframe timestamp in seconds.
///
/// Wraps `f64` with a total order (`f64::total_cmp`) so it can key the ordered
/// keyframe and section containers. Timestamps are unique and strictly
/// increasing along the trajectory.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamp(pub f64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0.0);

    pub fn seconds(self) -> f64 {
        self.0
    }

    /// Shift by `dt` seconds.
    pub fn offset(self, dt: f64) -> Timestamp {
        Timestamp(self.0 + dt)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0.0
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp(1.0) < Timestamp(2.0));
        assert!(Timestamp(2.0) <= Timestamp(2.0));
        assert_eq!(Timestamp(3.5), Timestamp(3.5));
    }

    #[test]
    fn test_timestamp_offset() {
        let t = Timestamp(10.0).offset(EPSILON);
        assert!(t > Timestamp(10.0));
        assert!(t < Timestamp(10.0 + 2.0 * EPSILON));
    }
}
