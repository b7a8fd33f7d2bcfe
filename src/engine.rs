//! Outer loop / dual-update controller (§4.6).
//!
//! Owns everything mutable for a run: the `Optimizer`, the dual variable
//! `lambda`, the best-feasible snapshot, and the oscillation history. All
//! state that the original kept as module-level globals (viewer hooks, the
//! cancel flags, `energyParams`) lives on this one value instead, per
//! Design Note "Global mutable state in source" — the control channel is an
//! explicit handle (`ControlHandle`) rather than ambient statics.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;

use ordered_float::OrderedFloat;

use crate::error::UvgamiError;
use crate::geom::core::Point2;
use crate::geom::energy::{EnergyTerm, SymmetricDirichlet, WeightedEnergy};
use crate::geom::mesh::TriMesh;
use crate::geom::metrics::{EngineMetrics, TimingBucket};
use crate::geom::optimizer::{Optimizer, OptimizerConfig, SolveOutcome};

const KAPPA: f64 = 1.0;

/// Outcome of a full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    /// Converged within the upper bound, best-feasible result is current.
    Converged,
    /// Oscillation detected; rolled back to the best feasible snapshot.
    OscillationRollback,
    /// No feasible merge/split candidate remained; rolled back.
    NoFeasibleOperation,
    /// Cancelled via the control channel; result reflects `forceQuitSave`.
    Cancelled,
}

/// Three atomic flags polled between optimizer iterations, fed by a
/// stdin-reading producer thread accepting `stop` / `cancel` / `snapshot`.
#[derive(Clone)]
pub struct ControlHandle {
    pub force_quit: Arc<AtomicBool>,
    pub force_quit_save: Arc<AtomicBool>,
    pub snapshot: Arc<AtomicBool>,
}

impl ControlHandle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            force_quit: Arc::new(AtomicBool::new(false)),
            force_quit_save: Arc::new(AtomicBool::new(false)),
            snapshot: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns a thread reading whitespace-trimmed commands from `rx`,
    /// setting the matching flags. The reader side (stdin in the binary)
    /// is supplied by the caller so tests can drive it with a channel
    /// instead.
    pub fn drive_from(handle: Self, rx: Receiver<String>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            for line in rx {
                match line.trim() {
                    "stop" => handle.force_quit_save.store(true, Ordering::SeqCst),
                    "cancel" => handle.force_quit.store(true, Ordering::SeqCst),
                    "snapshot" => handle.snapshot.store(true, Ordering::SeqCst),
                    _ => {}
                }
            }
        })
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.force_quit.load(Ordering::SeqCst) || self.force_quit_save.load(Ordering::SeqCst)
    }
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Stdin-backed convenience constructor for the native binary: spawns a
/// line-reading thread over `std::io::stdin` and wires it to a fresh
/// `ControlHandle`.
#[must_use]
pub fn spawn_stdin_control() -> ControlHandle {
    let handle = ControlHandle::new();
    let (tx, rx): (Sender<String>, Receiver<String>) = channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(line.clone()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    ControlHandle::drive_from(handle.clone(), rx);
    handle
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    BoundarySplit,
    InteriorSplit,
    Merge,
}

struct Candidate {
    kind: OpKind,
    d_e_sd: f64,
    d_e_se: f64,
    boundary_edge: Option<(usize, usize)>,
    interior_path: Option<(usize, usize, usize)>,
    merge_edges: Option<((usize, usize), (usize, usize))>,
    new_pos: Point2,
}

impl Candidate {
    fn weighted(&self, lambda: f64) -> f64 {
        (1.0 - lambda) * self.d_e_sd + lambda * self.d_e_se
    }
}

/// Enumerate candidate boundary-split/interior-split/merge operations at
/// boundary vertices whose incident distortion exceeds `stress_thres`,
/// estimating `(dE_SD, dE_se)` by actually trialling the operation on a
/// scratch clone and measuring the energy/seam-length delta directly
/// (a simplified, but real, stand-in for the "local linear/quadratic
/// model" — deriving a closed-form predictor without the ability to
/// numerically verify it here would be unreliable).
fn candidate_operations(mesh: &TriMesh, energy: &dyn EnergyTerm, stress_thres: f64) -> Vec<Candidate> {
    let per_tri = energy.energy_val_per_elem(mesh, true);
    let virtual_radius = mesh.virtual_radius.max(1e-12);
    let base_e_sd = energy.energy_val(mesh, true);
    let base_e_se = mesh.seam_length() / virtual_radius;

    let mut out = Vec::new();
    for v in mesh.boundary_vertices() {
        if mesh.vertex_stress(v, &per_tri) < stress_thres {
            continue;
        }
        let Some((prev, next)) = mesh.boundary_neighbors(v) else { continue };

        for &(u, w) in &[(prev, v), (v, next)] {
            let mut trial = mesh.clone();
            if trial.split_edge_on_boundary((u, w), mesh.v[w]).is_ok() {
                let d_e_sd = energy.energy_val(&trial, true) - base_e_sd;
                let d_e_se = trial.seam_length() / virtual_radius - base_e_se;
                out.push(Candidate {
                    kind: OpKind::BoundarySplit,
                    d_e_sd,
                    d_e_se,
                    boundary_edge: Some((u, w)),
                    interior_path: None,
                    merge_edges: None,
                    new_pos: mesh.v[w],
                });
            }
        }

        if let Some(mid) = mesh.v_neighbor[v]
            .iter()
            .find(|&&m| m != prev && m != next)
            .copied()
        {
            if let Some(far) = mesh.v_neighbor[mid].iter().find(|&&w| w != v).copied() {
                let mut trial = mesh.clone();
                if trial.cut_path(v, mid, far, mesh.v[mid]).is_ok() {
                    let d_e_sd = energy.energy_val(&trial, true) - base_e_sd;
                    let d_e_se = trial.seam_length() / virtual_radius - base_e_se;
                    out.push(Candidate {
                        kind: OpKind::InteriorSplit,
                        d_e_sd,
                        d_e_se,
                        boundary_edge: None,
                        interior_path: Some((v, mid, far)),
                        merge_edges: None,
                        new_pos: mesh.v[mid],
                    });
                }
            }
        }

        if let (Some(a_idx), Some(c_idx)) =
            (mesh.v_neighbor[v].iter().find(|&&a| a == prev), mesh.v_neighbor[v].iter().find(|&&c| c == next))
        {
            let (a, c) = (*a_idx, *c_idx);
            let mut trial = mesh.clone();
            let mid_pos = Point2::new((mesh.v[a].x + mesh.v[c].x) * 0.5, (mesh.v[a].y + mesh.v[c].y) * 0.5);
            if trial.merge_boundary_edges((a, v), (v, c), mid_pos).is_ok() {
                let d_e_sd = energy.energy_val(&trial, true) - base_e_sd;
                let d_e_se = trial.seam_length() / virtual_radius - base_e_se;
                out.push(Candidate {
                    kind: OpKind::Merge,
                    d_e_sd,
                    d_e_se,
                    boundary_edge: None,
                    interior_path: None,
                    merge_edges: Some(((a, v), (v, c))),
                    new_pos: mid_pos,
                });
            }
        }
    }
    out
}

fn best_of_kind(candidates: &[Candidate], kind_pred: impl Fn(&OpKind) -> bool, lambda: f64) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| kind_pred(&c.kind))
        .min_by(|(_, a), (_, b)| a.weighted(lambda).total_cmp(&b.weighted(lambda)))
        .map(|(i, _)| i)
}

fn dual_update(e_sd: f64, lambda: f64, upper_bound: f64, conv_tol: f64) -> f64 {
    let lambda_prime = (KAPPA * (e_sd - (upper_bound - conv_tol / 2.0)) + KAPPA * lambda / (1.0 - lambda)).max(0.0);
    lambda_prime / (1.0 + lambda_prime)
}

pub struct EngineConfig {
    pub upper_bound: f64,
    pub conv_tol_upper_bound: f64,
    pub stress_thres: f64,
    pub max_outer_iters: u32,
    pub max_inner_iters: u32,
    pub use_scaffold: bool,
    pub use_dense: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            upper_bound: 4.1,
            conv_tol_upper_bound: 1e-3,
            stress_thres: 4.5,
            max_outer_iters: 256,
            max_inner_iters: 200,
            use_scaffold: true,
            use_dense: false,
        }
    }
}

pub struct Engine {
    pub optimizer: Optimizer,
    pub lambda: f64,
    pub config: EngineConfig,
    pub e_se_best_feasible: f64,
    pub best_feasible: Option<TriMesh>,
    pub iter_num_best_feasible: u64,
    configs_stationary_v: BTreeMap<OrderedFloat<f64>, (f64, f64)>,
    pub metrics: EngineMetrics,
}

impl Engine {
    pub fn new(mesh: TriMesh, lambda: f64, config: EngineConfig) -> Result<Self, UvgamiError> {
        let lambda = lambda.clamp(1e-3, 1.0 - 1e-3);
        let energy = WeightedEnergy::new(vec![(Box::new(SymmetricDirichlet), lambda)]);
        let opt_config = OptimizerConfig {
            use_dense: config.use_dense,
            use_scaffold: config.use_scaffold,
            lambda,
            stress_thres: config.stress_thres,
            ..OptimizerConfig::default()
        };
        let optimizer = Optimizer::new(mesh, energy, opt_config, true)?;
        Ok(Self {
            optimizer,
            lambda,
            config,
            e_se_best_feasible: f64::INFINITY,
            best_feasible: None,
            iter_num_best_feasible: 0,
            configs_stationary_v: BTreeMap::new(),
            metrics: EngineMetrics::default(),
        })
    }

    fn rebuild_optimizer_with_lambda(&mut self) -> Result<(), UvgamiError> {
        let mesh = self.optimizer.result.clone();
        let energy = WeightedEnergy::new(vec![(Box::new(SymmetricDirichlet), self.lambda)]);
        let opt_config = OptimizerConfig {
            use_dense: self.config.use_dense,
            use_scaffold: self.config.use_scaffold,
            lambda: self.lambda,
            stress_thres: self.config.stress_thres,
            ..OptimizerConfig::default()
        };
        self.optimizer = Optimizer::new(mesh, energy, opt_config, true)?;
        Ok(())
    }

    fn eps_e_se(&self) -> f64 {
        let min_edge = self
            .optimizer
            .result
            .v_neighbor
            .iter()
            .enumerate()
            .flat_map(|(i, nb)| nb.iter().map(move |&j| (i, j)))
            .map(|(i, j)| (self.optimizer.result.v[i] - self.optimizer.result.v[j]).length())
            .fold(f64::INFINITY, f64::min);
        1e-3 * min_edge / self.optimizer.result.virtual_radius.max(1e-12)
    }

    fn detect_oscillation(&self, e_se: f64, e_sd: f64) -> bool {
        const EPS_LAMBDA: f64 = 1e-3;
        let eps = self.eps_e_se();
        self.configs_stationary_v
            .range(OrderedFloat(e_se - eps)..=OrderedFloat(e_se + eps))
            .any(|(_, &(prior_lambda, prior_e_sd))| {
                (prior_lambda - self.lambda).abs() < EPS_LAMBDA && (prior_e_sd - e_sd).abs() < eps
            })
    }

    /// One outer step: run the optimizer to convergence, then evaluate the
    /// dual update and (if not yet feasible/converged) apply one topology
    /// operation. Returns `Some(outcome)` when the run should stop.
    fn outer_step(&mut self, control: &ControlHandle) -> Result<Option<EngineOutcome>, UvgamiError> {
        let max_inner = self.config.max_inner_iters;
        let solve_outcome = self.metrics.time(TimingBucket::LineSearch, || self.optimizer.solve(max_inner));
        if control.should_stop() {
            return Ok(Some(EngineOutcome::Cancelled));
        }
        match solve_outcome {
            SolveOutcome::MaxIterReached => log::debug!("inner loop hit max_inner_iters without converging"),
            SolveOutcome::FractureSignal => log::info!("fracture propagation settled; good snapshot point"),
            SolveOutcome::Converged => {}
        }

        let e_sd = self.optimizer.energy_val_chart_only() / self.lambda;
        let e_se = self.optimizer.result.seam_length() / self.optimizer.result.virtual_radius.max(1e-12);

        if self.detect_oscillation(e_se, e_sd) {
            if let Some(best) = self.best_feasible.take() {
                self.optimizer.result = best;
                return Ok(Some(EngineOutcome::OscillationRollback));
            }
        }
        self.configs_stationary_v.insert(OrderedFloat(e_se), (self.lambda, e_sd));

        if e_sd <= self.config.upper_bound && e_se < self.e_se_best_feasible {
            self.e_se_best_feasible = e_se;
            self.best_feasible = Some(self.optimizer.result.clone());
            self.iter_num_best_feasible = self.optimizer.global_iter_num;
        }

        if e_sd >= self.config.upper_bound - self.config.conv_tol_upper_bound && e_sd <= self.config.upper_bound {
            if let Some(best) = self.best_feasible.clone() {
                self.optimizer.result = best;
            }
            return Ok(Some(EngineOutcome::Converged));
        }

        let lambda_new = dual_update(e_sd, self.lambda, self.config.upper_bound, self.config.conv_tol_upper_bound);
        let eps_lambda = (1e-3_f64).min((lambda_new - self.lambda).abs().max(1e-9));

        let candidates = candidate_operations(&self.optimizer.result, &SymmetricDirichlet, self.config.stress_thres);
        if candidates.is_empty() {
            if let Some(best) = self.best_feasible.clone() {
                self.optimizer.result = best;
            }
            return Ok(Some(EngineOutcome::NoFeasibleOperation));
        }

        let mut lambda_try = lambda_new.clamp(eps_lambda, 1.0 - eps_lambda);
        let kind_at = |lambda: f64| -> Option<OpKind> {
            candidates
                .iter()
                .min_by(|a, b| a.weighted(lambda).total_cmp(&b.weighted(lambda)))
                .map(|c| c.kind)
        };
        let start_kind = kind_at(self.lambda);
        let mut lo = self.lambda;
        let mut hi = lambda_try;
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        }
        if let (Some(start), Some(end)) = (start_kind, kind_at(hi)) {
            if start != end {
                for _ in 0..20 {
                    let mid = 0.5 * (lo + hi);
                    if kind_at(mid) == Some(start) {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
                lambda_try = hi;
            }
        }
        self.lambda = lambda_try.clamp(eps_lambda, 1.0 - eps_lambda);

        let chosen_kind = kind_at(self.lambda).unwrap_or(OpKind::BoundarySplit);
        let idx = best_of_kind(&candidates, |k| *k == chosen_kind, self.lambda).unwrap_or(0);
        let is_merge = matches!(candidates[idx].kind, OpKind::Merge);
        self.apply_candidate(&candidates[idx])?;
        self.rebuild_optimizer_with_lambda()?;
        // Arm propagation on the freshly rebuilt optimizer so next outer
        // step's solve() keeps extending this op's fracture tail instead of
        // treating it as settled topology from the first inner iteration.
        self.optimizer.begin_fracture_propagation(is_merge);
        Ok(None)
    }

    fn apply_candidate(&mut self, c: &Candidate) -> Result<(), UvgamiError> {
        match c.kind {
            OpKind::BoundarySplit => {
                let (u, w) = c.boundary_edge.expect("boundary split candidate carries its edge");
                self.optimizer.result.split_edge_on_boundary((u, w), c.new_pos)?;
            }
            OpKind::InteriorSplit => {
                let (v0, v1, v2) = c.interior_path.expect("interior split candidate carries its path");
                self.optimizer.result.cut_path(v0, v1, v2, c.new_pos)?;
            }
            OpKind::Merge => {
                let (ab, bc) = c.merge_edges.expect("merge candidate carries its edges");
                self.optimizer.result.merge_boundary_edges(ab, bc, c.new_pos)?;
            }
        }
        Ok(())
    }

    /// Run the full coupled optimization/topology loop.
    pub fn run(&mut self, control: &ControlHandle) -> Result<EngineOutcome, UvgamiError> {
        self.metrics.begin();
        for _ in 0..self.config.max_outer_iters {
            if control.should_stop() {
                if control.force_quit_save.load(Ordering::SeqCst) {
                    return Ok(EngineOutcome::Cancelled);
                }
                if let Some(best) = self.best_feasible.clone() {
                    self.optimizer.result = best;
                }
                return Ok(EngineOutcome::Cancelled);
            }
            if let Some(outcome) = self.outer_step(control)? {
                return Ok(outcome);
            }
        }
        Ok(EngineOutcome::Converged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::core::Point3;
    use std::collections::BTreeSet;

    fn unit_square() -> TriMesh {
        let v_rest = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let v = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let mut fixed = BTreeSet::new();
        fixed.insert(0);
        let f = vec![[0, 1, 2], [0, 2, 3]];
        TriMesh::new(v_rest, v, f, fixed, Vec::new()).unwrap()
    }

    #[test]
    fn dual_update_is_fixed_point_at_half_tolerance() {
        let u = 4.1;
        let tau = 1e-3;
        let lambda = 0.5;
        let e_sd = u - tau / 2.0;
        let lambda_new = dual_update(e_sd, lambda, u, tau);
        assert!((lambda_new - lambda).abs() < 1e-9, "{lambda_new}");
    }

    #[test]
    fn engine_converges_on_disk_square() {
        let mesh = unit_square();
        let config = EngineConfig { use_scaffold: false, max_outer_iters: 4, ..EngineConfig::default() };
        let mut engine = Engine::new(mesh, 0.999, config).unwrap();
        let control = ControlHandle::new();
        let outcome = engine.run(&control).unwrap();
        assert!(matches!(
            outcome,
            EngineOutcome::Converged | EngineOutcome::NoFeasibleOperation | EngineOutcome::OscillationRollback
        ));
    }
}
