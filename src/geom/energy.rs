//! Per-element distortion energy and its polymorphic interface.
//!
//! The only required variant is symmetric Dirichlet (§4.1). Gradients and
//! Hessians of the per-triangle energy are obtained by central finite
//! differences over the 6 local UV degrees of freedom rather than a closed
//! form: the analytic symmetric-Dirichlet derivatives are a fair amount of
//! index juggling to get exactly right without a way to numerically check
//! the result in this environment, and a second-order-accurate finite
//! difference of an exact energy is a defensible, SPD-projectable stand-in.

use nalgebra::{Matrix2, SMatrix, SVector, SymmetricEigen};

use crate::geom::core::{Point2, Tolerance};
use crate::geom::mesh::TriMesh;

/// Capability set every energy term exposes to the optimizer. Per Design
/// Note "Polymorphic energy terms", the outer code only ever depends on
/// this trait, never on a concrete variant.
pub trait EnergyTerm {
    /// Whether the optimizer must rebuild+refactorize the Hessian every
    /// inner iteration for this term (`false` lets the term act as a fixed
    /// Gauss-Newton-style preconditioner across iterations).
    fn needs_refactorize(&self) -> bool;

    fn energy_val_per_elem(&self, mesh: &TriMesh, uniform_weight: bool) -> Vec<f64>;

    fn energy_val(&self, mesh: &TriMesh, uniform_weight: bool) -> f64 {
        self.energy_val_per_elem(mesh, uniform_weight).iter().sum()
    }

    /// Full 2·|V| gradient, assembled from per-triangle 6-vectors.
    fn gradient(&self, mesh: &TriMesh, uniform_weight: bool) -> Vec<f64>;

    /// SPD-projected per-triangle Hessian blocks as sparse triplets
    /// `(row, col, value)` over the same 2·|V| DoF indexing as `gradient`.
    fn hessian_triplets(&self, mesh: &TriMesh, uniform_weight: bool) -> Vec<(usize, usize, f64)>;

    /// Shrink `step_size` so that no triangle inverts along
    /// `mesh.V + step_size * search_dir`.
    fn init_step_size(&self, mesh: &TriMesh, search_dir: &[f64], step_size: &mut f64);
}

/// Symmetric Dirichlet energy: `‖J‖_F² + ‖J⁻¹‖_F²`, `J` the Jacobian of the
/// affine map from the rest triangle (flattened isometrically to 2D) to the
/// current UV triangle.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymmetricDirichlet;

/// Isometric 2D flattening of a 3D triangle (`mapTriangleTo2D`): places
/// `p0` at the origin, `p1` along +x, and `p2` wherever its true edge
/// lengths put it, preserving the triangle's intrinsic rest shape.
fn map_triangle_to_2d(rest: [crate::geom::core::Point3; 3]) -> (Matrix2<f64>, f64) {
    let e0 = rest[1] - rest[0];
    let e1 = rest[2] - rest[0];
    let len0 = e0.length().max(Tolerance::ZERO_LENGTH.eps);
    let x1 = len0;
    let proj = e1.dot(e0) / len0;
    let height_sq = (e1.length_squared() - proj * proj).max(0.0);
    let y2 = height_sq.sqrt();
    // Rest-space Dm columns: (x1,0)-(0,0), (proj,y2)-(0,0).
    let dm = Matrix2::new(x1, proj, 0.0, y2);
    let area_rest = 0.5 * dm.determinant();
    (dm, area_rest)
}

fn triangle_jacobian(
    mesh: &TriMesh,
    tri: [usize; 3],
    uv: Option<(usize, Point2)>,
) -> Option<(Matrix2<f64>, f64)> {
    let get = |i: usize| -> Point2 {
        match uv {
            Some((idx, p)) if idx == i => p,
            _ => mesh.v[i],
        }
    };
    let rest = [mesh.v_rest[tri[0]], mesh.v_rest[tri[1]], mesh.v_rest[tri[2]]];
    let (dm, area_rest) = map_triangle_to_2d(rest);
    if area_rest.abs() < 1e-14 {
        return None;
    }
    let dm_inv = dm.try_inverse()?;

    let u0 = get(tri[0]);
    let u1 = get(tri[1]);
    let u2 = get(tri[2]);
    let ds = Matrix2::new(u1.x - u0.x, u2.x - u0.x, u1.y - u0.y, u2.y - u0.y);
    Some((ds * dm_inv, area_rest))
}

fn elem_energy(mesh: &TriMesh, t: usize, local_uv: Option<(usize, Point2)>) -> Option<f64> {
    let tri = mesh.f[t];
    let (j, _) = triangle_jacobian(mesh, tri, local_uv)?;
    let j_inv = j.try_inverse()?;
    Some(j.norm_squared() + j_inv.norm_squared())
}

fn elem_weight(mesh: &TriMesh, t: usize, uniform_weight: bool) -> f64 {
    if uniform_weight {
        1.0
    } else {
        let tri = mesh.f[t];
        let rest = [mesh.v_rest[tri[0]], mesh.v_rest[tri[1]], mesh.v_rest[tri[2]]];
        let (_, area_rest) = map_triangle_to_2d(rest);
        area_rest.abs()
    }
}

/// Energy of triangle `t` treating each of its 3 corners' UV positions as
/// independently perturbable, for finite-difference gradient/Hessian.
fn elem_energy_at(mesh: &TriMesh, t: usize, x: &SVector<f64, 6>) -> f64 {
    let tri = mesh.f[t];
    let pts = [
        Point2::new(x[0], x[1]),
        Point2::new(x[2], x[3]),
        Point2::new(x[4], x[5]),
    ];
    let rest = [mesh.v_rest[tri[0]], mesh.v_rest[tri[1]], mesh.v_rest[tri[2]]];
    let (dm, area_rest) = map_triangle_to_2d(rest);
    if area_rest.abs() < 1e-14 {
        return f64::INFINITY;
    }
    let Some(dm_inv) = dm.try_inverse() else {
        return f64::INFINITY;
    };
    let ds = Matrix2::new(
        pts[1].x - pts[0].x,
        pts[2].x - pts[0].x,
        pts[1].y - pts[0].y,
        pts[2].y - pts[0].y,
    );
    let j = ds * dm_inv;
    match j.try_inverse() {
        Some(j_inv) => j.norm_squared() + j_inv.norm_squared(),
        None => f64::INFINITY,
    }
}

fn elem_x0(mesh: &TriMesh, tri: [usize; 3]) -> SVector<f64, 6> {
    SVector::from_column_slice(&[
        mesh.v[tri[0]].x,
        mesh.v[tri[0]].y,
        mesh.v[tri[1]].x,
        mesh.v[tri[1]].y,
        mesh.v[tri[2]].x,
        mesh.v[tri[2]].y,
    ])
}

fn elem_gradient(mesh: &TriMesh, t: usize, x0: &SVector<f64, 6>) -> SVector<f64, 6> {
    let h = Tolerance::DERIVATIVE.eps;
    let mut g = SVector::<f64, 6>::zeros();
    for i in 0..6 {
        let mut xp = *x0;
        let mut xm = *x0;
        xp[i] += h;
        xm[i] -= h;
        g[i] = (elem_energy_at(mesh, t, &xp) - elem_energy_at(mesh, t, &xm)) / (2.0 * h);
    }
    g
}

fn elem_hessian(mesh: &TriMesh, t: usize, x0: &SVector<f64, 6>) -> SMatrix<f64, 6, 6> {
    let h = Tolerance::SECOND_DERIVATIVE.eps;
    let mut hess = SMatrix::<f64, 6, 6>::zeros();
    for i in 0..6 {
        let mut xp = *x0;
        let mut xm = *x0;
        xp[i] += h;
        xm[i] -= h;
        let gp = elem_gradient(mesh, t, &xp);
        let gm = elem_gradient(mesh, t, &xm);
        let col = (gp - gm) / (2.0 * h);
        for j in 0..6 {
            hess[(j, i)] = col[j];
        }
    }
    0.5 * (hess + hess.transpose())
}

/// SPD projection: eigendecompose, clamp negative eigenvalues to zero,
/// reassemble. Required so the outer projected-Newton step always has an
/// SPD local model (§4.1).
fn project_spd(h: SMatrix<f64, 6, 6>) -> SMatrix<f64, 6, 6> {
    let eig = SymmetricEigen::new(h);
    let clamped = eig.eigenvalues.map(|v| v.max(0.0));
    eig.eigenvectors * SMatrix::<f64, 6, 6>::from_diagonal(&clamped) * eig.eigenvectors.transpose()
}

impl EnergyTerm for SymmetricDirichlet {
    fn needs_refactorize(&self) -> bool {
        // Reused as a fixed preconditioner across inner iterations, per §4.5.
        false
    }

    fn energy_val_per_elem(&self, mesh: &TriMesh, uniform_weight: bool) -> Vec<f64> {
        (0..mesh.f.len())
            .map(|t| elem_energy(mesh, t, None).unwrap_or(f64::INFINITY) * elem_weight(mesh, t, uniform_weight))
            .collect()
    }

    fn gradient(&self, mesh: &TriMesh, uniform_weight: bool) -> Vec<f64> {
        let mut g = vec![0.0; 2 * mesh.v.len()];
        for (t, tri) in mesh.f.iter().enumerate() {
            let x0 = elem_x0(mesh, *tri);
            let w = elem_weight(mesh, t, uniform_weight);
            let ge = elem_gradient(mesh, t, &x0) * w;
            for (k, &vi) in tri.iter().enumerate() {
                g[2 * vi] += ge[2 * k];
                g[2 * vi + 1] += ge[2 * k + 1];
            }
        }
        g
    }

    fn hessian_triplets(&self, mesh: &TriMesh, uniform_weight: bool) -> Vec<(usize, usize, f64)> {
        let mut triplets = Vec::with_capacity(mesh.f.len() * 36);
        for (t, tri) in mesh.f.iter().enumerate() {
            let x0 = elem_x0(mesh, *tri);
            let w = elem_weight(mesh, t, uniform_weight);
            let he = project_spd(elem_hessian(mesh, t, &x0)) * w;
            let dof = [
                2 * tri[0], 2 * tri[0] + 1,
                2 * tri[1], 2 * tri[1] + 1,
                2 * tri[2], 2 * tri[2] + 1,
            ];
            for a in 0..6 {
                for b in 0..6 {
                    let v = he[(a, b)];
                    if v != 0.0 {
                        triplets.push((dof[a], dof[b], v));
                    }
                }
            }
        }
        triplets
    }

    fn init_step_size(&self, mesh: &TriMesh, search_dir: &[f64], step_size: &mut f64) {
        for tri in &mesh.f {
            let p: Vec<Point2> = tri.iter().map(|&vi| mesh.v[vi]).collect();
            let d: Vec<Point2> = tri
                .iter()
                .map(|&vi| Point2::new(search_dir[2 * vi], search_dir[2 * vi + 1]))
                .collect();

            let e1 = p[1] - p[0];
            let e2 = p[2] - p[0];
            let de1 = d[1] - d[0];
            let de2 = d[2] - d[0];

            let a = e1.cross(e2);
            let b = e1.cross(de2) + de1.cross(e2);
            let c = de1.cross(de2);

            if let Some(t_min) = smallest_positive_root(a, b, c) {
                *step_size = step_size.min(0.99 * t_min);
            }
        }
        if !step_size.is_finite() || *step_size < 0.0 {
            *step_size = 0.0;
        }
    }
}

/// Smallest positive root of `a + b*t + c*t^2 = 0` (area(t) passing through
/// zero, i.e. the triangle degenerating/inverting along the ray).
fn smallest_positive_root(a: f64, b: f64, c: f64) -> Option<f64> {
    const EPS: f64 = 1e-14;
    if c.abs() < EPS {
        if b.abs() < EPS {
            return None;
        }
        let t = -a / b;
        return (t > 0.0).then_some(t);
    }
    let disc = b * b - 4.0 * c * a;
    if disc < 0.0 {
        return None;
    }
    let sqrt_disc = disc.sqrt();
    let t1 = (-b - sqrt_disc) / (2.0 * c);
    let t2 = (-b + sqrt_disc) / (2.0 * c);
    let (lo, hi) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
    if lo > 0.0 {
        Some(lo)
    } else if hi > 0.0 {
        Some(hi)
    } else {
        None
    }
}

/// A weighted sum of energy terms, composing the polymorphic interface into
/// a single scalar objective `Σ α_i E_i` (§4.1 "polymorphic interface so
/// alternatives compose as weighted sums").
pub struct WeightedEnergy {
    pub terms: Vec<(Box<dyn EnergyTerm>, f64)>,
}

impl WeightedEnergy {
    #[must_use]
    pub fn new(terms: Vec<(Box<dyn EnergyTerm>, f64)>) -> Self {
        Self { terms }
    }

    #[must_use]
    pub fn needs_refactorize(&self) -> bool {
        self.terms.iter().any(|(t, _)| t.needs_refactorize())
    }

    #[must_use]
    pub fn energy_val(&self, mesh: &TriMesh, uniform_weight: bool) -> f64 {
        self.terms
            .iter()
            .map(|(t, a)| a * t.energy_val(mesh, uniform_weight))
            .sum()
    }

    /// Per-triangle energy, weighted sum across terms — the same
    /// aggregation `energy_val` does, kept per-element for stress queries
    /// (`TriMesh::vertex_stress`) that need a value per triangle, not a
    /// single scalar.
    #[must_use]
    pub fn energy_val_per_elem(&self, mesh: &TriMesh, uniform_weight: bool) -> Vec<f64> {
        let mut out = vec![0.0; mesh.f.len()];
        for (term, alpha) in &self.terms {
            for (o, v) in out.iter_mut().zip(term.energy_val_per_elem(mesh, uniform_weight)) {
                *o += alpha * v;
            }
        }
        out
    }

    #[must_use]
    pub fn gradient(&self, mesh: &TriMesh, uniform_weight: bool) -> Vec<f64> {
        let n = 2 * mesh.v.len();
        let mut g = vec![0.0; n];
        for (term, alpha) in &self.terms {
            for (i, gi) in term.gradient(mesh, uniform_weight).into_iter().enumerate() {
                g[i] += alpha * gi;
            }
        }
        g
    }

    #[must_use]
    pub fn hessian_triplets(&self, mesh: &TriMesh, uniform_weight: bool) -> Vec<(usize, usize, f64)> {
        let mut out = Vec::new();
        for (term, alpha) in &self.terms {
            out.extend(
                term.hessian_triplets(mesh, uniform_weight)
                    .into_iter()
                    .map(|(i, j, v)| (i, j, v * alpha)),
            );
        }
        out
    }

    pub fn init_step_size(&self, mesh: &TriMesh, search_dir: &[f64], step_size: &mut f64) {
        for (term, _) in &self.terms {
            term.init_step_size(mesh, search_dir, step_size);
        }
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
        let f = vec![[0, 1, 2], [0, 2, 3]];
        TriMesh::new(v_rest, v, f, BTreeSet::new(), Vec::new()).unwrap()
    }

    #[test]
    fn isometric_square_has_minimum_energy() {
        let mesh = unit_square();
        let e = SymmetricDirichlet;
        let vals = e.energy_val_per_elem(&mesh, true);
        // J == Identity for an undistorted isometric triangle: ||J||^2 + ||J^-1||^2 = 4.
        for v in vals {
            assert!((v - 4.0).abs() < 1e-6, "got {v}");
        }
    }

    #[test]
    fn spd_projection_has_nonnegative_eigenvalues() {
        let mesh = unit_square();
        let x0 = elem_x0(&mesh, mesh.f[0]);
        let h = project_spd(elem_hessian(&mesh, 0, &x0));
        let eig = SymmetricEigen::new(h);
        for v in eig.eigenvalues.iter() {
            assert!(*v >= -1e-8, "negative eigenvalue {v}");
        }
    }

    #[test]
    fn init_step_size_prevents_inversion() {
        let mesh = unit_square();
        let e = SymmetricDirichlet;
        // A huge step along a direction that would flip vertex 2 through
        // the opposite edge must be clamped well below 1.
        let mut dir = vec![0.0; 8];
        dir[2 * 2] = -10.0;
        dir[2 * 2 + 1] = -10.0;
        let mut step = 1.0;
        e.init_step_size(&mesh, &dir, &mut step);
        assert!(step < 1.0);
        assert!(step >= 0.0);
    }

    #[test]
    fn smallest_positive_root_basic() {
        // 1 - t = 0 -> t = 1
        assert!((smallest_positive_root(1.0, -1.0, 0.0).unwrap() - 1.0).abs() < 1e-12);
        // no positive root
        assert!(smallest_positive_root(1.0, 1.0, 1.0).is_none());
    }
}
