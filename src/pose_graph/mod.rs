//! Pose-graph backend: trajectory sectioning, loop-closure submaps, and the
//! per-closure optimization problem.
//!
//! The [`PoseGraph`] owns the committed section atlas, the submap record of
//! past loop closures, and the sequential segmentation state. It is driven by
//! a single backend thread; none of its methods are reentrant.

pub mod optimizer;
pub mod section;
pub mod segmentation;

pub use optimizer::{PoseGraphConfig, PoseGraphProblem, PoseGraphSolution};
pub use section::{Atlas, Section, Submap};
pub use segmentation::Segmentation;

use std::collections::BTreeMap;

use crate::map::{Frames, Map, Timestamp, EPSILON};

#[derive(Debug, Default)]
pub struct PoseGraph {
    /// Committed sections, keyed by each section's start time.
    sections: Atlas,
    /// Past loop-closure spans, keyed by each span's end time. Kept across
    /// closures so later events can resolve nesting against them.
    submaps: BTreeMap<Timestamp, Submap>,
    segmentation: Segmentation,
}

impl PoseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the span of a new loop closure and return it.
    pub fn add_submap(
        &mut self,
        old_time: Timestamp,
        start_time: Timestamp,
        end_time: Timestamp,
    ) -> Submap {
        let submap = Submap {
            a: old_time,
            b: start_time,
            c: end_time,
        };
        self.submaps.insert(end_time, submap);
        submap
    }

    /// Advance segmentation over keyframes up to `time`.
    pub fn update_sections(&mut self, map: &Map, time: Timestamp) {
        self.segmentation.update(map, &mut self.sections, time);
    }

    /// Committed sections keyed in `[start, end]`, running segmentation up to
    /// `end` first. A zero `end` means "up to the latest keyframe", with an
    /// unbounded upper key.
    pub fn get_sections(&mut self, map: &Map, start: Timestamp, end: Timestamp) -> Atlas {
        let cutoff = if end.is_zero() {
            map.last_time().unwrap_or(Timestamp::ZERO)
        } else {
            end
        };
        self.segmentation.update(map, &mut self.sections, cutoff);

        if end.is_zero() {
            self.sections
                .range(start..)
                .map(|(k, s)| (*k, *s))
                .collect()
        } else if start <= end {
            self.sections
                .range(start..=end)
                .map(|(k, s)| (*k, *s))
                .collect()
        } else {
            Atlas::new()
        }
    }

    /// Resolve which sections a new closure over `[old_time, start_time]`
    /// should optimize, trimming spans already fixed by earlier submaps.
    ///
    /// Outer submaps (enclosing `old_time`) advance `old_time` past their end
    /// and drop the window prefix; inner submaps hollow out the keyframes
    /// strictly inside their span. The surviving window is then walked in id
    /// order, and each contiguous run contributes the committed sections it
    /// fully contains.
    pub fn get_active_sections(
        &mut self,
        map: &Map,
        active_kfs: &mut Frames,
        old_time: &mut Timestamp,
        start_time: Timestamp,
    ) -> Atlas {
        if start_time < *old_time {
            return Atlas::new();
        }

        let overlapping: Vec<Submap> = self
            .submaps
            .range(*old_time..=start_time)
            .map(|(_, s)| *s)
            .collect();
        for submap in overlapping {
            if submap.a <= *old_time {
                *old_time = submap.c.offset(EPSILON);
                active_kfs.retain(|&t, _| t > submap.c);
            } else {
                active_kfs.retain(|&t, _| !(t > submap.a && t < submap.c));
            }
        }

        let mut active_sections = Atlas::new();
        let mut run_start: Option<Timestamp> = None;
        let mut last: Option<(Timestamp, u64)> = None;
        for (&time, frame) in active_kfs.iter() {
            if let Some((last_time, last_id)) = last {
                if last_id + 1 != frame.id {
                    if let Some(start) = run_start {
                        for (key, section) in self.get_sections(map, start, last_time) {
                            if section.c > last_time {
                                break;
                            }
                            active_sections.insert(key, section);
                        }
                    }
                    run_start = Some(time);
                }
            } else {
                run_start = Some(time);
            }
            last = Some((time, frame.id));
        }
        if let Some(start) = run_start {
            active_sections.extend(self.get_sections(map, start, start_time));
        }
        active_sections
    }

    pub fn sections(&self) -> &Atlas {
        &self.sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use nalgebra::{UnitQuaternion, Vector3};

    fn yaw_pose(deg: f64, t: f64) -> SE3 {
        SE3::new(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), deg.to_radians()),
            Vector3::new(t, 0.0, 0.0),
        )
    }

    /// 51 keyframes at t = 0..=50: straight, 90-degree turn, straight,
    /// 90-degree turn, straight. Commits sections keyed at t=0 and t=15.
    fn three_leg_map() -> Map {
        let mut degrees = vec![0.0; 15];
        degrees.extend([30.0, 60.0, 90.0]);
        degrees.extend(std::iter::repeat(90.0).take(15));
        degrees.extend([120.0, 150.0, 180.0]);
        degrees.extend(std::iter::repeat(180.0).take(15));

        let mut map = Map::new();
        for (i, &deg) in degrees.iter().enumerate() {
            map.insert_keyframe(Timestamp(i as f64), yaw_pose(deg, i as f64));
        }
        map
    }

    #[test]
    fn test_get_sections_is_idempotent() {
        let map = three_leg_map();
        let mut pg = PoseGraph::new();

        let first = pg.get_sections(&map, Timestamp::ZERO, Timestamp(50.0));
        let second = pg.get_sections(&map, Timestamp::ZERO, Timestamp(50.0));

        assert_eq!(first.len(), 2);
        assert_eq!(first.len(), second.len());
        for (key, section) in &first {
            let other = &second[key];
            assert_eq!(section.b, other.b);
            assert_eq!(section.c, other.c);
        }
    }

    #[test]
    fn test_get_sections_zero_end_is_unbounded() {
        let map = three_leg_map();
        let mut pg = PoseGraph::new();
        let all = pg.get_sections(&map, Timestamp::ZERO, Timestamp::ZERO);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_section_keys_strictly_increase_and_chain() {
        let map = three_leg_map();
        let mut pg = PoseGraph::new();
        let sections = pg.get_sections(&map, Timestamp::ZERO, Timestamp(50.0));

        let mut prev: Option<Section> = None;
        for (&key, section) in &sections {
            assert_eq!(key, section.a);
            assert!(section.a <= section.b && section.b <= section.c);
            if let Some(p) = prev {
                assert!(p.a < section.a);
                assert_eq!(p.c, section.a);
            }
            prev = Some(*section);
        }
    }

    #[test]
    fn test_inner_submap_hollows_window() {
        let map = three_leg_map();
        let mut pg = PoseGraph::new();
        pg.add_submap(Timestamp(20.0), Timestamp(25.0), Timestamp(30.0));

        let mut window = map.keyframes_between(Timestamp::ZERO, Timestamp(50.0));
        let mut old_time = Timestamp::ZERO;
        let sections = pg.get_active_sections(&map, &mut window, &mut old_time, Timestamp(50.0));

        // interior of the inner span is gone, its boundaries stay
        assert!(window.contains_key(&Timestamp(20.0)));
        assert!(!window.contains_key(&Timestamp(21.0)));
        assert!(!window.contains_key(&Timestamp(29.0)));
        assert!(window.contains_key(&Timestamp(30.0)));
        assert_eq!(old_time, Timestamp::ZERO);

        // only the section fully inside the first run survives; the section
        // spanning the gap is excluded
        assert_eq!(sections.len(), 1);
        assert!(sections.contains_key(&Timestamp::ZERO));
        assert_eq!(sections[&Timestamp::ZERO].c, Timestamp(15.0));
    }

    #[test]
    fn test_outer_submap_advances_old_time() {
        let map = three_leg_map();
        let mut pg = PoseGraph::new();
        pg.add_submap(Timestamp(0.0), Timestamp(25.0), Timestamp(30.0));

        let mut window = map.keyframes_between(Timestamp::ZERO, Timestamp(50.0));
        let mut old_time = Timestamp::ZERO;
        let sections = pg.get_active_sections(&map, &mut window, &mut old_time, Timestamp(50.0));

        assert!(old_time > Timestamp(30.0));
        assert_eq!(window.keys().next().copied(), Some(Timestamp(31.0)));
        // no committed section starts inside the surviving window
        assert!(sections.is_empty());
    }

    #[test]
    fn test_degenerate_window_is_noop() {
        let map = three_leg_map();
        let mut pg = PoseGraph::new();

        let mut window = Frames::new();
        let mut old_time = Timestamp(10.0);
        let sections = pg.get_active_sections(&map, &mut window, &mut old_time, Timestamp(5.0));
        assert!(sections.is_empty());
        assert_eq!(old_time, Timestamp(10.0));

        let sections = pg.get_active_sections(&map, &mut window, &mut old_time, Timestamp(20.0));
        assert!(sections.is_empty());
    }
}
