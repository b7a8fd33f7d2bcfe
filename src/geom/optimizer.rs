//! Projected-Newton inner loop (§4.5): fixed topology, vertex positions only.
//!
//! Construction copies the initial mesh into `result`, optionally builds a
//! scaffold, and (for energy terms that don't demand refactorization every
//! step) factorizes once. `solve` then iterates gradient → Newton step →
//! line search until the residual target is hit, the step collapses to
//! zero, or `maxIter` is exhausted.

use std::collections::BTreeSet;

use crate::geom::core::Point2;
use crate::geom::energy::WeightedEnergy;
use crate::geom::linsolve::{DenseSolver, LinSysSolver, SparseSolver};
use crate::geom::mesh::TriMesh;
use crate::geom::scaffold::Scaffold;

const REL_GL2_TOL: f64 = 1e-12;

/// Outcome of `Optimizer::solve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveOutcome {
    /// `maxIter` exhausted without convergence.
    MaxIterReached,
    /// Gradient residual below target, or the line search collapsed.
    Converged,
    /// A fracture was proposed; caller should consider a snapshot.
    FractureSignal,
}

enum Backend {
    Sparse(SparseSolver),
    Dense(DenseSolver),
}

impl Backend {
    fn as_solver(&mut self) -> &mut dyn LinSysSolver {
        match self {
            Self::Sparse(s) => s,
            Self::Dense(s) => s,
        }
    }
}

pub struct OptimizerConfig {
    pub use_dense: bool,
    pub use_scaffold: bool,
    pub lambda: f64,
    pub mute: bool,
    pub allow_e_dec_rel_tol: bool,
    /// Per-vertex distortion threshold (`TriMesh::vertex_stress`) a fracture
    /// tail must still clear for `Optimizer::create_fracture` to keep
    /// extending it.
    pub stress_thres: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            use_dense: false,
            use_scaffold: true,
            lambda: 0.999,
            mute: true,
            allow_e_dec_rel_tol: true,
            stress_thres: 4.5,
        }
    }
}

pub struct Optimizer {
    pub result: TriMesh,
    pub energy: WeightedEnergy,
    pub scaffold: Option<Scaffold>,
    pub config: OptimizerConfig,
    backend: Backend,
    last_energy_val: f64,
    pub last_e_dec: f64,
    pub global_iter_num: u64,
    uniform_weight: bool,
    /// `propagateFracture`: 0 = none, 1 = continuing a split, 2 = continuing
    /// a merge. Armed by `begin_fracture_propagation` after the outer loop
    /// applies a candidate op; consumed by `create_fracture` inside `solve`.
    propagate_fracture: u8,
    /// `lastPropagate`: whether the previous inner iteration's continuation
    /// attempt succeeded. `solve` signals `FractureSignal` the first time a
    /// continuation fails right after one that succeeded.
    last_propagate: bool,
}

impl Optimizer {
    pub fn new(
        initial: TriMesh,
        energy: WeightedEnergy,
        config: OptimizerConfig,
        uniform_weight: bool,
    ) -> Result<Self, crate::error::UvgamiError> {
        let scaffold = if config.use_scaffold {
            Some(Scaffold::build(&initial, config.lambda)?)
        } else {
            None
        };
        let backend = if config.use_dense {
            Backend::Dense(DenseSolver::new())
        } else {
            Backend::Sparse(SparseSolver::new())
        };
        let mut opt = Self {
            result: initial,
            energy,
            scaffold,
            config,
            backend,
            last_energy_val: 0.0,
            last_e_dec: 0.0,
            global_iter_num: 0,
            uniform_weight,
            propagate_fracture: 0,
            last_propagate: false,
        };
        opt.precompute();
        Ok(opt)
    }

    /// `createFracture(opType, path, newVertPos, allowPropagate)`'s
    /// `allowPropagate` half: marks the op the caller just applied to
    /// `self.result` as one `solve`'s inner loop should keep extending.
    /// `is_merge` selects which continuation `create_fracture` attempts.
    pub fn begin_fracture_propagation(&mut self, is_merge: bool) {
        self.propagate_fracture = if is_merge { 2 } else { 1 };
        self.last_propagate = false;
    }

    fn combined_dim(&self) -> usize {
        self.result.v.len() + self.scaffold.as_ref().map_or(0, Scaffold::extra_count)
    }

    fn combined_v_neighbor(&self) -> Vec<BTreeSet<usize>> {
        match &self.scaffold {
            Some(s) => s.merge_v_neighbor(self.result.v.len(), &self.result.v_neighbor),
            None => self.result.v_neighbor.clone(),
        }
    }

    fn combined_fixed(&self) -> BTreeSet<usize> {
        match &self.scaffold {
            Some(s) => s.merge_fixed_v(self.result.v.len(), &self.result.fixed_vert),
            None => self.result.fixed_vert.clone(),
        }
    }

    /// Precompute: seed `result`, build scaffold (done in `new`), assemble
    /// the Hessian once if no term demands per-iteration refactorization.
    fn precompute(&mut self) {
        let v_neighbor = self.combined_v_neighbor();
        let fixed = self.combined_fixed();
        self.backend.as_solver().set_pattern(&v_neighbor, &fixed);
        self.last_energy_val = self.energy_val();
        if !self.energy.needs_refactorize() {
            self.assemble_and_factorize();
        }
    }

    /// Re-derives everything `precompute` seeds once `create_fracture` has
    /// changed `result`'s vertex/triangle count: the solver pattern and
    /// factorization are keyed on the old topology and must be rebuilt
    /// unconditionally, regardless of `needs_refactorize`.
    fn resync_after_topology_change(&mut self) {
        let v_neighbor = self.combined_v_neighbor();
        let fixed = self.combined_fixed();
        self.backend.as_solver().set_pattern(&v_neighbor, &fixed);
        self.last_energy_val = self.energy_val();
        self.assemble_and_factorize();
    }

    fn rebuild_scaffold(&mut self) {
        if self.config.use_scaffold {
            if let Ok(s) = Scaffold::build(&self.result, self.config.lambda) {
                self.scaffold = Some(s);
            }
        }
    }

    /// Chart-only energy (excludes the scaffold's weighted contribution),
    /// used by the outer loop to recover `E_SD = lastEnergyVal / lambda`.
    #[must_use]
    pub fn energy_val_chart_only(&self) -> f64 {
        self.energy.energy_val(&self.result, self.uniform_weight)
    }

    fn energy_val(&self) -> f64 {
        let chart = self.energy.energy_val(&self.result, self.uniform_weight);
        match &self.scaffold {
            Some(s) => {
                chart + s.w_scaf * self.energy.energy_val(&s.air_mesh, true)
            }
            None => chart,
        }
    }

    fn target_g_res(&self) -> f64 {
        let alpha_sum: f64 = self.energy.terms.iter().map(|(_, a)| a).sum();
        let n = self.result.v.len() as f64;
        let n_fixed = self.result.fixed_vert.len() as f64;
        alpha_sum * (n - n_fixed) / n * REL_GL2_TOL
    }

    fn combined_gradient(&self) -> Vec<f64> {
        let mut g = vec![0.0; 2 * self.combined_dim()];
        let chart_g = self.energy.gradient(&self.result, self.uniform_weight);
        for (i, gi) in chart_g.into_iter().enumerate() {
            g[i] += gi;
        }
        if let Some(s) = &self.scaffold {
            let air_g = self.energy.gradient(&s.air_mesh, true);
            s.augment_gradient(self.result.v.len(), &mut g, &air_g);
        }
        g
    }

    fn assemble_and_factorize(&mut self) {
        let mut triplets = self.energy.hessian_triplets(&self.result, self.uniform_weight);
        if let Some(s) = &self.scaffold {
            let air_triplets = self.energy.hessian_triplets(&s.air_mesh, true);
            triplets.extend(s.augment_hessian(self.result.v.len(), &air_triplets));
        }
        let solver = self.backend.as_solver();
        solver.update_a(&triplets);
        let _ = solver.analyze_pattern();
        let _ = solver.factorize();
    }

    /// `solve(maxIter)`: gradient → Newton step → line search, plus (when
    /// `begin_fracture_propagation` armed it) an attempt to extend the
    /// fracture every inner iteration. Returns `FractureSignal` the moment a
    /// propagating fracture stops, so the caller can treat that point as a
    /// good snapshot (the fracture settled rather than the residual
    /// converging or the budget running out).
    pub fn solve(&mut self, max_iter: u32) -> SolveOutcome {
        let target = self.target_g_res();
        for _ in 0..max_iter {
            let g = self.combined_gradient();
            let g_norm_sq: f64 = g.iter().map(|x| x * x).sum();
            if g_norm_sq < target {
                return SolveOutcome::Converged;
            }
            if !self.solve_one_step(&g) {
                return SolveOutcome::Converged;
            }
            self.global_iter_num += 1;

            if self.propagate_fracture != 0 {
                if self.create_fracture() {
                    self.last_propagate = true;
                } else if self.last_propagate {
                    self.last_propagate = false;
                    return SolveOutcome::FractureSignal;
                }
            }
        }
        SolveOutcome::MaxIterReached
    }

    /// `createFracture(lastEDec, propagateFracture)`'s continuation half:
    /// extends whichever fracture `begin_fracture_propagation` armed by one
    /// more vertex, provided the tail is still distorted enough
    /// (`OptimizerConfig::stress_thres`) to justify it. Disarms propagation
    /// on failure so `solve` stops retrying a fracture that's run its course.
    fn create_fracture(&mut self) -> bool {
        let succeeded = match self.propagate_fracture {
            1 => self.continue_split(),
            2 => self.continue_merge(),
            _ => false,
        };
        if succeeded {
            self.rebuild_scaffold();
            self.resync_after_topology_change();
        } else {
            self.propagate_fracture = 0;
        }
        succeeded
    }

    /// Extends an interior split from whichever of its two fracture tails
    /// (`TriMesh::cur_interior_frac_tails`) is still interior and stressed,
    /// picking the next edge outward the way `engine`'s candidate generator
    /// picks a fresh interior-split candidate (a `mid`/`far` neighbor pair).
    fn continue_split(&mut self) -> bool {
        let Some((v0, v2)) = self.result.cur_interior_frac_tails else {
            return false;
        };
        let per_tri = self.energy.energy_val_per_elem(&self.result, self.uniform_weight);
        for (tail, other) in [(v0, v2), (v2, v0)] {
            if self.result.fan_order(tail).is_none() {
                continue;
            }
            if self.result.vertex_stress(tail, &per_tri) < self.config.stress_thres {
                continue;
            }
            let Some(&mid) = self.result.v_neighbor[tail].iter().find(|&&m| m != other) else {
                continue;
            };
            let Some(&far) = self.result.v_neighbor[mid].iter().find(|&w| w != tail) else {
                continue;
            };
            let new_pos = self.result.v[mid];
            if self.result.cut_path(tail, mid, far, new_pos).is_ok() {
                return true;
            }
        }
        false
    }

    /// Extends a merge by trying the best currently-legal boundary merge at
    /// any vertex still over `stress_thres`, the same trial
    /// `engine`'s candidate generator runs for a fresh merge candidate.
    fn continue_merge(&mut self) -> bool {
        let per_tri = self.energy.energy_val_per_elem(&self.result, self.uniform_weight);
        for v in self.result.boundary_vertices() {
            if self.result.vertex_stress(v, &per_tri) < self.config.stress_thres {
                continue;
            }
            let Some((prev, next)) = self.result.boundary_neighbors(v) else {
                continue;
            };
            let mid_pos = Point2::new(
                (self.result.v[prev].x + self.result.v[next].x) * 0.5,
                (self.result.v[prev].y + self.result.v[next].y) * 0.5,
            );
            if self.result.merge_boundary_edges((prev, v), (v, next), mid_pos).is_ok() {
                return true;
            }
        }
        false
    }

    /// `solve_oneStep`: refactorize if required, solve `H d = -g`, line search.
    /// Returns `false` when the line search reports "stopped".
    fn solve_one_step(&mut self, g: &[f64]) -> bool {
        if self.energy.needs_refactorize() {
            self.assemble_and_factorize();
        }
        let neg_g: Vec<f64> = g.iter().map(|x| -x).collect();
        let dir = match self.backend.as_solver().solve(&neg_g) {
            Ok(d) => d,
            Err(_) => return false,
        };
        self.line_search(&dir)
    }

    fn line_search(&mut self, dir: &[f64]) -> bool {
        let mut step = 1.0_f64;
        self.energy.init_step_size(&self.result, dir, &mut step);
        if let Some(s) = &self.scaffold {
            let air_dir = s.whole_search_dir_to_air_mesh(self.result.v.len(), dir);
            self.energy.init_step_size(&s.air_mesh, &air_dir, &mut step);
        }
        step *= 0.99;

        let v0 = self.result.v.clone();
        let air_v0 = self.scaffold.as_ref().map(|s| s.air_mesh.v.clone());
        let last_energy = self.last_energy_val;

        loop {
            if step <= 0.0 {
                return false;
            }
            self.apply_step(&v0, air_v0.as_deref(), dir, step);
            let new_e = self.energy_val();
            let inversion_ok = self.result.check_inversion()
                && self.scaffold.as_ref().is_none_or(Scaffold::check_inversion);
            if new_e <= last_energy && inversion_ok {
                self.last_e_dec = last_energy - new_e;
                self.last_energy_val = new_e;
                return !(self.config.allow_e_dec_rel_tol
                    && self.last_e_dec / last_energy < 1e-6 * step
                    && step > 1e-3);
            }
            step *= 0.5;
        }
    }

    fn apply_step(&mut self, v0: &[Point2], air_v0: Option<&[Point2]>, dir: &[f64], step: f64) {
        for (i, p0) in v0.iter().enumerate() {
            self.result.v[i] = Point2::new(p0.x + step * dir[2 * i], p0.y + step * dir[2 * i + 1]);
        }
        self.result.rebuild_topology();
        if let (Some(s), Some(av0)) = (self.scaffold.as_mut(), air_v0) {
            s.step_forward(av0, dir, step);
            s.sync_from_chart(&self.result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::core::{Point2, Point3};
    use crate::geom::energy::SymmetricDirichlet;

    fn sheared_square() -> TriMesh {
        let v_rest = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let v = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.3, 1.0),
            Point2::new(0.3, 1.0),
        ];
        let mut fixed = BTreeSet::new();
        fixed.insert(0);
        fixed.insert(1);
        let f = vec![[0, 1, 2], [0, 2, 3]];
        TriMesh::new(v_rest, v, f, fixed, Vec::new()).unwrap()
    }

    #[test]
    fn solve_reduces_energy_on_sheared_square() {
        let mesh = sheared_square();
        let energy = WeightedEnergy::new(vec![(Box::new(SymmetricDirichlet), 1.0)]);
        let config = OptimizerConfig { use_scaffold: false, ..OptimizerConfig::default() };
        let mut opt = Optimizer::new(mesh, energy, config, true).unwrap();
        let e0 = opt.last_energy_val;
        let outcome = opt.solve(50);
        assert!(matches!(outcome, SolveOutcome::Converged | SolveOutcome::MaxIterReached));
        assert!(opt.last_energy_val <= e0 + 1e-9);
    }

    #[test]
    fn solve_with_scaffold_keeps_chart_boundary_injective() {
        let mesh = sheared_square();
        let energy = WeightedEnergy::new(vec![(Box::new(SymmetricDirichlet), 1.0)]);
        let config = OptimizerConfig::default();
        let mut opt = Optimizer::new(mesh, energy, config, true).unwrap();
        opt.solve(10);
        assert!(opt.result.check_inversion());
    }

    #[test]
    fn create_fracture_disarms_without_a_recorded_tail() {
        let mesh = sheared_square();
        let energy = WeightedEnergy::new(vec![(Box::new(SymmetricDirichlet), 1.0)]);
        let config = OptimizerConfig { use_scaffold: false, ..OptimizerConfig::default() };
        let mut opt = Optimizer::new(mesh, energy, config, true).unwrap();
        // Nothing has ever cut this mesh, so cur_interior_frac_tails is
        // None: create_fracture has nothing to extend and disarms itself.
        opt.begin_fracture_propagation(false);
        assert!(!opt.create_fracture());
        assert_eq!(opt.propagate_fracture, 0);
    }

    #[test]
    fn create_fracture_extends_a_stressed_interior_split() {
        let mut mesh = crate::geom::mesh::TriMesh::new(
            (0..9)
                .map(|i| Point3::new((i % 3) as f64, (i / 3) as f64, 0.0))
                .collect(),
            (0..9)
                .map(|i| {
                    // Squash the grid hard along x so the interior vertex's
                    // incident triangles are badly distorted, clearing any
                    // reasonable stress threshold.
                    Point2::new(0.05 * (i % 3) as f64, (i / 3) as f64)
                })
                .collect(),
            {
                let idx = |i: usize, j: usize| j * 3 + i;
                let mut f = Vec::new();
                for j in 0..2 {
                    for i in 0..2 {
                        f.push([idx(i, j), idx(i + 1, j), idx(i + 1, j + 1)]);
                        f.push([idx(i, j), idx(i + 1, j + 1), idx(i, j + 1)]);
                    }
                }
                f
            },
            BTreeSet::new(),
            Vec::new(),
        )
        .unwrap();
        let center = 4;
        let neighbors: Vec<usize> = mesh.v_neighbor[center].iter().copied().collect();
        let (v0, v2) = (neighbors[0], neighbors[2]);
        mesh.cut_path(v0, center, v2, mesh.v[center]).unwrap();

        let energy = WeightedEnergy::new(vec![(Box::new(SymmetricDirichlet), 1.0)]);
        let config = OptimizerConfig { use_scaffold: false, stress_thres: 4.01, ..OptimizerConfig::default() };
        let mut opt = Optimizer::new(mesh, energy, config, true).unwrap();
        opt.begin_fracture_propagation(false);
        // Either it finds a further stressed neighbor to extend onto, or
        // every candidate is already exhausted on this small grid — both
        // are valid outcomes, but the call must never panic and must leave
        // the mesh in a consistent, non-inverted state either way.
        let _ = opt.create_fracture();
        assert!(opt.result.check_inversion());
    }
}
