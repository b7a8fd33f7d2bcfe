//! End-to-end scenarios exercising the full load/initialize/optimize loop
//! through the public library API.

use std::collections::BTreeSet;

use uvgami::engine::{ControlHandle, spawn_stdin_control};
use uvgami::geom::core::{Point2, Point3};
use uvgami::geom::energy::{EnergyTerm, SymmetricDirichlet, WeightedEnergy};
use uvgami::{Engine, EngineConfig, EngineOutcome, TriMesh};

fn raw_e_sd(mesh: &TriMesh) -> f64 {
    WeightedEnergy::new(vec![(Box::new(SymmetricDirichlet) as Box<dyn EnergyTerm>, 1.0)])
        .energy_val(mesh, true)
}

/// Unit square cut into two triangles, UV already identical to the rest
/// positions projected to the xy-plane: a perfectly isometric chart.
fn unit_square_disk() -> TriMesh {
    let v_rest =
        vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0), Point3::new(1.0, 1.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
    let v = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(1.0, 1.0), Point2::new(0.0, 1.0)];
    let f = vec![[0, 1, 2], [0, 2, 3]];
    let mut fixed = BTreeSet::new();
    fixed.insert(0);
    fixed.insert(1);
    TriMesh::new(v_rest, v, f, fixed, Vec::new()).unwrap()
}

#[test]
fn disk_square_converges_isometrically_with_no_cuts() {
    let mesh = unit_square_disk();
    assert!((raw_e_sd(&mesh) - 4.0).abs() < 1e-9, "identity UV of a square must already be isometric");

    let mut engine = Engine::new(mesh, 0.999, EngineConfig { max_inner_iters: 5, ..EngineConfig::default() }).unwrap();
    let control = ControlHandle::new();
    let outcome = engine.run(&control).unwrap();

    assert!(matches!(outcome, EngineOutcome::Converged | EngineOutcome::NoFeasibleOperation));
    let result = &engine.optimizer.result;
    assert!((raw_e_sd(result) - 4.0).abs() < 1e-6);
    assert!(result.coh_e.iter().all(|e| !e.is_cut()));
}

/// 10x2 vertex grid folded 30 degrees along its middle row, Tutte-mapped to
/// the plane before optimization.
fn bent_strip() -> TriMesh {
    let cols = 10;
    let rows = 2;
    let fold = 30f64.to_radians();
    let mut v_rest = Vec::with_capacity(cols * rows);
    for r in 0..rows {
        for c in 0..cols {
            let x = c as f64;
            let (y, z) = if r == 0 { (0.0, 0.0) } else { (fold.cos(), fold.sin()) };
            v_rest.push(Point3::new(x, y, z));
        }
    }
    let idx = |r: usize, c: usize| r * cols + c;
    let mut f = Vec::new();
    for r in 0..rows - 1 {
        for c in 0..cols - 1 {
            f.push([idx(r, c), idx(r, c + 1), idx(r + 1, c)]);
            f.push([idx(r, c + 1), idx(r + 1, c + 1), idx(r + 1, c)]);
        }
    }
    let loops = uvgami::io::boundary_loops(&f);
    let boundary = loops.into_iter().next().expect("strip has a boundary");
    let uv = uvgami::io::tutte::tutte_embedding(&v_rest, &f, &boundary).unwrap();

    let mut fixed = BTreeSet::new();
    fixed.insert(boundary[0]);
    TriMesh::new(v_rest, uv, f, fixed, Vec::new()).unwrap()
}

#[test]
fn bent_strip_stays_under_upper_bound_with_no_seams() {
    let mesh = bent_strip();
    let mut engine = Engine::new(mesh, 0.999, EngineConfig::default()).unwrap();
    let control = ControlHandle::new();
    let outcome = engine.run(&control).unwrap();

    assert!(matches!(outcome, EngineOutcome::Converged | EngineOutcome::NoFeasibleOperation));
    let result = &engine.optimizer.result;
    assert!(raw_e_sd(result) < engine.config.upper_bound);
    assert!((result.seam_length()).abs() < 1e-9);
}

/// Octahedron: a closed, genus-0, edge- and vertex-manifold mesh.
fn octahedron() -> (Vec<Point3>, Vec<[usize; 3]>) {
    let v_rest = vec![
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(-1.0, 0.0, 0.0),
        Point3::new(0.0, 1.0, 0.0),
        Point3::new(0.0, -1.0, 0.0),
        Point3::new(0.0, 0.0, 1.0),
        Point3::new(0.0, 0.0, -1.0),
    ];
    let f = vec![
        [0, 2, 4],
        [2, 1, 4],
        [1, 3, 4],
        [3, 0, 4],
        [2, 0, 5],
        [1, 2, 5],
        [3, 1, 5],
        [0, 3, 5],
    ];
    (v_rest, f)
}

#[test]
fn closed_sphere_is_cut_to_a_disk_and_converges() {
    let (v_rest, f) = octahedron();
    assert!(uvgami::io::is_edge_manifold(&f));
    assert!(uvgami::io::is_vertex_manifold(&f, v_rest.len()));
    assert!(uvgami::io::boundary_loops(&f).is_empty(), "octahedron is closed");

    let cut = uvgami::io::cut::cut_to_disk(&v_rest, &f).unwrap();
    assert!(!cut.coh_e.is_empty());

    let loops = uvgami::io::boundary_loops(&cut.f);
    let boundary = loops.into_iter().next().expect("cut mesh has a boundary");
    let uv = uvgami::io::tutte::tutte_embedding(&cut.v_rest, &cut.f, &boundary).unwrap();

    let mut fixed = BTreeSet::new();
    fixed.insert(boundary[0]);
    let mesh = TriMesh::new(cut.v_rest, uv, cut.f, fixed, cut.coh_e).unwrap();
    assert!(mesh.coh_e.iter().any(|e| e.is_cut()));

    let mut engine = Engine::new(mesh, 0.999, EngineConfig::default()).unwrap();
    let control = ControlHandle::new();
    let outcome = engine.run(&control).unwrap();
    assert!(matches!(outcome, EngineOutcome::Converged | EngineOutcome::NoFeasibleOperation));
    assert!(raw_e_sd(&engine.optimizer.result) <= engine.config.upper_bound + 1e-6);
}

/// A 4x4 torus grid (doubly periodic in both directions): genus 1, closed.
fn torus(n: usize) -> (Vec<Point3>, Vec<[usize; 3]>) {
    let (big_r, small_r) = (2.0, 0.6);
    let mut v_rest = Vec::with_capacity(n * n);
    for i in 0..n {
        let u = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
        for j in 0..n {
            let w = 2.0 * std::f64::consts::PI * j as f64 / n as f64;
            let x = (big_r + small_r * w.cos()) * u.cos();
            let y = (big_r + small_r * w.cos()) * u.sin();
            let z = small_r * w.sin();
            v_rest.push(Point3::new(x, y, z));
        }
    }
    let idx = |i: usize, j: usize| i * n + j;
    let mut f = Vec::new();
    for i in 0..n {
        for j in 0..n {
            let (i1, j1) = ((i + 1) % n, (j + 1) % n);
            f.push([idx(i, j), idx(i1, j), idx(i, j1)]);
            f.push([idx(i1, j), idx(i1, j1), idx(i, j1)]);
        }
    }
    (v_rest, f)
}

#[test]
fn genus_one_torus_is_cut_to_a_disk_with_positive_seam_length() {
    let (v_rest, f) = torus(6);
    assert!(uvgami::io::boundary_loops(&f).is_empty(), "torus grid is closed");

    let cut = uvgami::io::cut::cut_to_disk(&v_rest, &f).unwrap();
    assert!(!cut.coh_e.is_empty());

    // Euler characteristic of the cut (disk) mesh must be 1.
    let mut edges: std::collections::HashSet<(usize, usize)> = std::collections::HashSet::new();
    for tri in &cut.f {
        for k in 0..3 {
            let (a, b) = (tri[k], tri[(k + 1) % 3]);
            let key = if a < b { (a, b) } else { (b, a) };
            edges.insert(key);
        }
    }
    let euler = cut.v_rest.len() as i64 - edges.len() as i64 + cut.f.len() as i64;
    assert_eq!(euler, 1);

    let loops = uvgami::io::boundary_loops(&cut.f);
    let boundary = loops.into_iter().next().unwrap();
    let uv = uvgami::io::tutte::tutte_embedding(&cut.v_rest, &cut.f, &boundary).unwrap();
    let mut fixed = BTreeSet::new();
    fixed.insert(boundary[0]);
    let mesh = TriMesh::new(cut.v_rest, uv, cut.f, fixed, cut.coh_e).unwrap();
    assert!(mesh.seam_length() > 0.0);

    let mut engine = Engine::new(mesh, 0.999, EngineConfig::default()).unwrap();
    let control = ControlHandle::new();
    let outcome = engine.run(&control).unwrap();
    assert!(matches!(outcome, EngineOutcome::Converged | EngineOutcome::NoFeasibleOperation));
    assert!(raw_e_sd(&engine.optimizer.result) <= engine.config.upper_bound + 1e-6);
}

#[test]
fn run_terminates_within_outer_step_budget_and_stays_feasible() {
    let mesh = bent_strip();
    let mut engine =
        Engine::new(mesh, 0.999, EngineConfig { max_outer_iters: 16, ..EngineConfig::default() }).unwrap();
    let control = ControlHandle::new();
    let outcome = engine.run(&control).unwrap();

    // Whether it converges outright or terminates via oscillation rollback,
    // it must stop within the budget and never hand back an infeasible chart.
    assert!(matches!(
        outcome,
        EngineOutcome::Converged | EngineOutcome::OscillationRollback | EngineOutcome::NoFeasibleOperation
    ));
    assert!(raw_e_sd(&engine.optimizer.result) <= engine.config.upper_bound + 1e-3);
}

#[test]
fn cancel_without_save_discards_in_progress_work_and_keeps_best_feasible() {
    let mesh = unit_square_disk();
    let mut engine =
        Engine::new(mesh, 0.999, EngineConfig { max_inner_iters: 200, ..EngineConfig::default() }).unwrap();

    let control = spawn_stdin_control();
    // Simulate an immediate "cancel" (forceQuit without save) instead of
    // waiting on real stdin, so the test doesn't depend on process plumbing.
    control.force_quit.store(true, std::sync::atomic::Ordering::SeqCst);

    let outcome = engine.run(&control).unwrap();
    assert!(matches!(outcome, EngineOutcome::Cancelled));
    assert!(!control.force_quit_save.load(std::sync::atomic::Ordering::SeqCst));
}
