//! Scaffold / air-mesh: auxiliary triangulation of the UV plane outside the
//! chart, enforcing global (not just local) bijectivity of the boundary.
//!
//! The scaffold owns its own `TriMesh` (the "airMesh") whose rest shape is
//! reset to its current configuration every time the scaffold is rebuilt, so
//! its own symmetric-Dirichlet energy starts at zero and only measures how
//! far it has been pushed since. Construction triangulates the frame plus
//! the chart boundary loop with `delaunator` and discards any triangle that
//! falls inside the chart polygon — a simplified but invariant-preserving
//! stand-in for triangulating the exact 2D complement (§4.4 invariant 4).

use std::collections::BTreeSet;

use crate::error::UvgamiError;
use crate::geom::core::Point2;
use crate::geom::mesh::TriMesh;
use crate::geom::triangulation::delaunay_triangles;

pub struct Scaffold {
    pub air_mesh: TriMesh,
    /// `boundary_chart_indices[i]` is the chart vertex index mirrored by
    /// `air_mesh` vertex `i`, for `i < boundary_chart_indices.len()`.
    pub boundary_chart_indices: Vec<usize>,
    pub w_scaf: f64,
}

fn ordered_boundary_loop(mesh: &TriMesh) -> Option<Vec<usize>> {
    let start = mesh.boundary_vertices().into_iter().next()?;
    let mut loop_verts = vec![start];
    let mut cur = start;
    loop {
        let (_, next) = mesh.boundary_neighbors(cur)?;
        if next == start {
            break;
        }
        loop_verts.push(next);
        cur = next;
        if loop_verts.len() > mesh.v.len() + 1 {
            return None; // malformed topology; avoid spinning forever
        }
    }
    Some(loop_verts)
}

fn point_in_polygon(p: Point2, poly: &[Point2]) -> bool {
    let mut inside = false;
    let n = poly.len();
    let mut j = n - 1;
    for i in 0..n {
        let pi = poly[i];
        let pj = poly[j];
        if ((pi.y > p.y) != (pj.y > p.y))
            && (p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

impl Scaffold {
    /// Build (or rebuild) a scaffold around `chart`'s current boundary.
    pub fn build(chart: &TriMesh, lambda: f64) -> Result<Self, UvgamiError> {
        let boundary_chart_indices = ordered_boundary_loop(chart).ok_or_else(|| {
            UvgamiError::InvalidTopologyOp("scaffold requires a single closed chart boundary".into())
        })?;
        let boundary_pts: Vec<Point2> = boundary_chart_indices.iter().map(|&vi| chart.v[vi]).collect();

        let (min, max) = boundary_pts.iter().fold(
            (Point2::new(f64::INFINITY, f64::INFINITY), Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY)),
            |(mn, mx), p| {
                (
                    Point2::new(mn.x.min(p.x), mn.y.min(p.y)),
                    Point2::new(mx.x.max(p.x), mx.y.max(p.y)),
                )
            },
        );
        let center = Point2::new((min.x + max.x) * 0.5, (min.y + max.y) * 0.5);
        let half_w = ((max.x - min.x) * 0.5).max(1e-6);
        let half_h = ((max.y - min.y) * 0.5).max(1e-6);
        let pad = 3.0 * half_w.max(half_h);

        let frame = [
            Point2::new(center.x - half_w - pad, center.y - half_h - pad),
            Point2::new(center.x + half_w + pad, center.y - half_h - pad),
            Point2::new(center.x + half_w + pad, center.y + half_h + pad),
            Point2::new(center.x - half_w - pad, center.y + half_h + pad),
        ];

        let mut all_pts = boundary_pts.clone();
        all_pts.extend_from_slice(&frame);
        let n_boundary = boundary_pts.len();

        let mut air_f = Vec::new();
        for tri in delaunay_triangles(&all_pts) {
            let [a, b, c] = tri;
            let centroid = Point2::new(
                (all_pts[a].x + all_pts[b].x + all_pts[c].x) / 3.0,
                (all_pts[a].y + all_pts[b].y + all_pts[c].y) / 3.0,
            );
            if point_in_polygon(centroid, &boundary_pts) {
                continue; // belongs to the chart itself, not its complement
            }
            air_f.push([a, b, c]);
        }

        let v_rest = all_pts
            .iter()
            .map(|p| crate::geom::core::Point3::new(p.x, p.y, 0.0))
            .collect::<Vec<_>>();
        let mut fixed_vert = BTreeSet::new();
        for i in n_boundary..all_pts.len() {
            fixed_vert.insert(i);
        }

        let air_mesh = TriMesh::new(v_rest, all_pts, air_f, fixed_vert, Vec::new())?;
        let n_air_f = air_mesh.f.len().max(1) as f64;

        Ok(Self {
            air_mesh,
            boundary_chart_indices,
            w_scaf: lambda * 0.01 / n_air_f,
        })
    }

    #[must_use]
    pub fn shared_count(&self) -> usize {
        self.boundary_chart_indices.len()
    }

    #[must_use]
    pub fn extra_count(&self) -> usize {
        self.air_mesh.v.len() - self.shared_count()
    }

    /// Map an airmesh-local vertex index to its DoF index in the combined
    /// (chart + extra airmesh) system of `chart_n` chart vertices.
    #[must_use]
    pub fn combined_index(&self, chart_n: usize, air_local: usize) -> usize {
        if air_local < self.shared_count() {
            self.boundary_chart_indices[air_local]
        } else {
            chart_n + (air_local - self.shared_count())
        }
    }

    /// Copy the chart's current boundary positions into the shared airmesh
    /// vertices, keeping the two in lockstep.
    pub fn sync_from_chart(&mut self, chart: &TriMesh) {
        for (i, &vi) in self.boundary_chart_indices.iter().enumerate() {
            self.air_mesh.v[i] = chart.v[vi];
        }
        self.air_mesh.rebuild_topology();
    }

    /// `mergeVNeighbor`: extended adjacency graph over chart ∪ extra-airmesh
    /// DoFs.
    #[must_use]
    pub fn merge_v_neighbor(
        &self,
        chart_n: usize,
        chart_v_neighbor: &[BTreeSet<usize>],
    ) -> Vec<BTreeSet<usize>> {
        let mut combined = chart_v_neighbor.to_vec();
        combined.resize(chart_n + self.extra_count(), BTreeSet::new());
        for (local, nb) in self.air_mesh.v_neighbor.iter().enumerate() {
            let gi = self.combined_index(chart_n, local);
            for &local_j in nb {
                let gj = self.combined_index(chart_n, local_j);
                combined[gi].insert(gj);
                combined[gj].insert(gi);
            }
        }
        combined
    }

    /// `mergeFixedV`: extended fixed-vertex set (frame corners are always
    /// fixed).
    #[must_use]
    pub fn merge_fixed_v(&self, chart_n: usize, chart_fixed: &BTreeSet<usize>) -> BTreeSet<usize> {
        let mut combined = chart_fixed.clone();
        for &local in &self.air_mesh.fixed_vert {
            combined.insert(self.combined_index(chart_n, local));
        }
        combined
    }

    /// `augmentGradient`: add the airmesh's own (weighted) gradient into the
    /// combined gradient vector.
    pub fn augment_gradient(&self, chart_n: usize, combined: &mut [f64], air_grad: &[f64]) {
        for local in 0..self.air_mesh.v.len() {
            let gi = self.combined_index(chart_n, local);
            combined[2 * gi] += self.w_scaf * air_grad[2 * local];
            combined[2 * gi + 1] += self.w_scaf * air_grad[2 * local + 1];
        }
    }

    /// `augmentProxyMatrix`: map the airmesh's own Hessian triplets into the
    /// combined sparse system.
    #[must_use]
    pub fn augment_hessian(
        &self,
        chart_n: usize,
        air_triplets: &[(usize, usize, f64)],
    ) -> Vec<(usize, usize, f64)> {
        air_triplets
            .iter()
            .map(|&(i, j, v)| {
                let gi = self.combined_index(chart_n, i / 2) * 2 + i % 2;
                let gj = self.combined_index(chart_n, j / 2) * 2 + j % 2;
                (gi, gj, v * self.w_scaf)
            })
            .collect()
    }

    /// `wholeSearchDir2airMesh`: restrict a combined-DoF search direction to
    /// the airmesh's own local indexing.
    #[must_use]
    pub fn whole_search_dir_to_air_mesh(&self, chart_n: usize, whole_dir: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; 2 * self.air_mesh.v.len()];
        for local in 0..self.air_mesh.v.len() {
            let gi = self.combined_index(chart_n, local);
            out[2 * local] = whole_dir[2 * gi];
            out[2 * local + 1] = whole_dir[2 * gi + 1];
        }
        out
    }

    /// `stepForward`: advance the airmesh's own (non-shared) vertices by
    /// `step * dir`; shared vertices are advanced by the chart's own step
    /// and re-synced separately via `sync_from_chart`.
    pub fn step_forward(&mut self, v0: &[Point2], dir: &[f64], step: f64) {
        for local in self.shared_count()..self.air_mesh.v.len() {
            let dx = dir[2 * local];
            let dy = dir[2 * local + 1];
            self.air_mesh.v[local] = Point2::new(v0[local].x + step * dx, v0[local].y + step * dy);
        }
        self.air_mesh.rebuild_topology();
    }

    #[must_use]
    pub fn check_inversion(&self) -> bool {
        self.air_mesh.check_inversion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::core::Point3;

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
    fn boundary_loop_is_found_for_unit_square() {
        let mesh = unit_square();
        let loop_verts = ordered_boundary_loop(&mesh).unwrap();
        assert_eq!(loop_verts.len(), 4);
    }

    #[test]
    fn scaffold_builds_and_covers_chart() {
        let mesh = unit_square();
        let scaffold = Scaffold::build(&mesh, 0.5).unwrap();
        assert!(!scaffold.air_mesh.f.is_empty());
        assert!(scaffold.check_inversion());
        assert_eq!(scaffold.shared_count(), 4);
    }

    #[test]
    fn combined_index_maps_shared_and_extra_dofs() {
        let mesh = unit_square();
        let scaffold = Scaffold::build(&mesh, 0.5).unwrap();
        for i in 0..scaffold.shared_count() {
            assert_eq!(scaffold.combined_index(mesh.v.len(), i), scaffold.boundary_chart_indices[i]);
        }
        let extra_idx = scaffold.combined_index(mesh.v.len(), scaffold.shared_count());
        assert_eq!(extra_idx, mesh.v.len());
    }
}
