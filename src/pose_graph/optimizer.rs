//! Pose-graph problem construction, solve, and correction propagation.
//!
//! One problem is built per loop closure: the submap's boundary keyframes are
//! pinned as anchors, each active section contributes its boundary keyframe as
//! a free node, and consecutive chain elements are tied by relative-pose
//! residuals measured from the current poses. The solve runs lock-free on a
//! snapshot; corrections are applied under the map write lock afterward.

use nalgebra::{DMatrix, DVector, Vector6};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::frontend::LivePoseSink;
use crate::geometry::SE3;
use crate::map::{Map, MapError, Timestamp};
use crate::pose_graph::section::{Atlas, Submap};

/// Central-difference step for numeric Jacobians.
const JACOBIAN_STEP: f64 = 1e-6;
const MIN_LAMBDA: f64 = 1e-12;
const MAX_LAMBDA: f64 = 1e10;

#[derive(Debug, Clone)]
pub struct PoseGraphConfig {
    pub max_iterations: usize,
    pub gradient_tolerance: f64,
    pub param_tolerance: f64,
    pub initial_lambda: f64,
}

impl Default for PoseGraphConfig {
    fn default() -> Self {
        Self {
            max_iterations: 40,
            gradient_tolerance: 1e-10,
            param_tolerance: 1e-10,
            initial_lambda: 1e-4,
        }
    }
}

/// Relative-pose constraint between two chain elements. `None` endpoints are
/// the fixed anchors: `from: None` is the submap's `a`, `to: None` its `b`.
#[derive(Debug, Clone)]
pub struct PoseGraphEdge {
    pub from: Option<usize>,
    pub to: Option<usize>,
    pub measurement: SE3,
    pub weight: f64,
}

/// One loop closure's optimization problem over section boundary poses.
#[derive(Debug, Clone)]
pub struct PoseGraphProblem {
    pub submap: Submap,
    pub anchor_a: SE3,
    pub anchor_b: SE3,
    /// Free nodes, one section boundary each, in time order.
    pub node_times: Vec<Timestamp>,
    /// Split-tangent parameters, six per node.
    pub initial: DVector<f64>,
    pub edges: Vec<PoseGraphEdge>,
}

#[derive(Debug, Clone)]
pub struct PoseGraphSolution {
    pub params: DVector<f64>,
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub converged: bool,
}

/// Build the chain problem for `submap` over the resolved `sections`.
///
/// Caches each section's pre-solve boundary pose into `section.pose`; the
/// propagation step needs it to compute the correction delta. Anchor keyframes
/// must exist in the map.
pub fn build_problem(
    map: &Map,
    sections: &mut Atlas,
    submap: &Submap,
) -> Result<PoseGraphProblem, MapError> {
    let anchor_a = map.expect(submap.a)?.pose;
    let anchor_b_frame = map.expect(submap.b)?;
    let anchor_b = anchor_b_frame.pose;
    let anchor_b_weight = anchor_b_frame.weights.pose_graph;

    let mut node_times = Vec::new();
    let mut initial = Vec::new();
    let mut edges = Vec::new();
    let mut last_pose = anchor_a;
    let mut last_node: Option<usize> = None;

    for (_, section) in sections.iter_mut() {
        let frame = map.expect(section.a)?;
        section.pose = frame.pose;
        if section.a == submap.a {
            // the anchor itself heads this section; it is not a variable
            last_pose = frame.pose;
            last_node = None;
            continue;
        }
        let index = node_times.len();
        node_times.push(section.a);
        initial.extend_from_slice(frame.pose.to_tangent().as_slice());
        edges.push(PoseGraphEdge {
            from: last_node,
            to: Some(index),
            measurement: last_pose.inverse() * frame.pose,
            weight: frame.weights.pose_graph,
        });
        last_pose = frame.pose;
        last_node = Some(index);
    }

    // close the chain against the fixed anchor at `b`
    edges.push(PoseGraphEdge {
        from: last_node,
        to: None,
        measurement: last_pose.inverse() * anchor_b,
        weight: anchor_b_weight,
    });

    Ok(PoseGraphProblem {
        submap: *submap,
        anchor_a,
        anchor_b,
        node_times,
        initial: DVector::from_vec(initial),
        edges,
    })
}

fn node_pose(params: &DVector<f64>, node: Option<usize>, anchor: SE3) -> SE3 {
    match node {
        Some(i) => SE3::from_tangent(&params.fixed_rows::<6>(6 * i).into_owned()),
        None => anchor,
    }
}

fn residuals(problem: &PoseGraphProblem, params: &DVector<f64>) -> DVector<f64> {
    let mut r = DVector::zeros(6 * problem.edges.len());
    for (i, edge) in problem.edges.iter().enumerate() {
        let from = node_pose(params, edge.from, problem.anchor_a);
        let to = node_pose(params, edge.to, problem.anchor_b);
        let relative = from.inverse() * to;
        let error: Vector6<f64> =
            (edge.measurement.inverse() * relative).to_tangent() * edge.weight;
        r.fixed_rows_mut::<6>(6 * i).copy_from(&error);
    }
    r
}

fn numeric_jacobian(problem: &PoseGraphProblem, params: &DVector<f64>) -> DMatrix<f64> {
    let rows = 6 * problem.edges.len();
    let cols = params.len();
    let mut jacobian = DMatrix::zeros(rows, cols);
    let mut probe = params.clone();
    for j in 0..cols {
        let original = probe[j];
        probe[j] = original + JACOBIAN_STEP;
        let plus = residuals(problem, &probe);
        probe[j] = original - JACOBIAN_STEP;
        let minus = residuals(problem, &probe);
        probe[j] = original;
        jacobian.set_column(j, &((plus - minus) / (2.0 * JACOBIAN_STEP)));
    }
    jacobian
}

/// Levenberg-Marquardt over the split-tangent parameters.
///
/// Single-threaded and deterministic. Non-convergence is not an error: the
/// best parameters found are returned and a diagnostic is logged.
pub fn solve(problem: &PoseGraphProblem, config: &PoseGraphConfig) -> PoseGraphSolution {
    let mut params = problem.initial.clone();
    let mut residual = residuals(problem, &params);
    let initial_cost = residual.norm_squared();
    let mut cost = initial_cost;
    let mut lambda = config.initial_lambda;
    let mut converged = params.is_empty();
    let mut iterations = 0;

    while !converged && iterations < config.max_iterations {
        iterations += 1;
        let jacobian = numeric_jacobian(problem, &params);
        let gradient = jacobian.transpose() * &residual;
        if gradient.amax() < config.gradient_tolerance {
            converged = true;
            break;
        }
        let hessian = jacobian.transpose() * &jacobian;

        let mut improved = false;
        while lambda < MAX_LAMBDA {
            let mut damped = hessian.clone();
            for i in 0..params.len() {
                damped[(i, i)] += lambda;
            }
            if let Some(cholesky) = damped.cholesky() {
                let step = cholesky.solve(&(-&gradient));
                let candidate = &params + &step;
                let candidate_residual = residuals(problem, &candidate);
                let candidate_cost = candidate_residual.norm_squared();
                if candidate_cost < cost {
                    if step.amax() < config.param_tolerance {
                        converged = true;
                    }
                    params = candidate;
                    residual = candidate_residual;
                    cost = candidate_cost;
                    lambda = (lambda * 0.5).max(MIN_LAMBDA);
                    improved = true;
                    break;
                }
            }
            lambda *= 10.0;
        }
        if !improved {
            break;
        }
    }

    if !converged {
        warn!(
            nodes = problem.node_times.len(),
            iterations,
            initial_cost,
            final_cost = cost,
            "pose graph solve did not converge, using best estimate"
        );
    } else {
        debug!(
            nodes = problem.node_times.len(),
            edges = problem.edges.len(),
            iterations,
            initial_cost,
            final_cost = cost,
            "pose graph solved"
        );
    }

    PoseGraphSolution {
        params,
        iterations,
        initial_cost,
        final_cost: cost,
        converged,
    }
}

/// Write the solved node poses into the map and rigidly realign each
/// section's interior keyframes behind its moved boundary.
///
/// Returns the correction of the last chain element, which the caller then
/// forward-propagates past the submap's `b` boundary. Anchor keyframes are
/// never written.
pub fn apply(
    map: &mut Map,
    sections: &Atlas,
    problem: &PoseGraphProblem,
    solution: &PoseGraphSolution,
) -> Result<Option<SE3>, MapError> {
    for (i, &time) in problem.node_times.iter().enumerate() {
        let tangent: Vector6<f64> = solution.params.fixed_rows::<6>(6 * i).into_owned();
        map.expect_mut(time)?.pose = SE3::from_tangent(&tangent);
    }

    let mut last: Option<(Timestamp, SE3)> = None;
    for (&key, section) in sections {
        if let Some((last_time, cached)) = last {
            let transform = map.expect(last_time)?.pose * cached.inverse();
            map.transform_between(&transform, last_time, key);
        }
        last = Some((key, section.pose));
    }

    let Some((last_time, cached)) = last else {
        return Ok(None);
    };
    let transform = map.expect(last_time)?.pose * cached.inverse();
    if last_time < problem.submap.b {
        map.transform_between(&transform, last_time, problem.submap.b);
    }
    Ok(Some(transform))
}

/// Extend the final correction to every keyframe from `start_time` onward and
/// to the live tracked frame.
///
/// The frontend mutex is held for the whole read-modify-write so the tracker
/// never composes a new relative motion against a half-corrected anchor. The
/// map write lock is taken inside it, per the crate's lock order.
pub fn forward_propagate(
    frontend: &dyn LivePoseSink,
    map: &RwLock<Map>,
    transform: &SE3,
    start_time: Timestamp,
) {
    frontend.with_live_frame(&mut |live| {
        let mut guard = map.write();
        guard.transform_from(transform, start_time);
        if let Some(live) = live {
            match guard.get(live.time) {
                // committed: the map copy is authoritative
                Some(kf) => live.pose = kf.pose,
                None => live.pose = *transform * live.pose,
            }
        }
    });
    frontend.refresh_cache();
}
