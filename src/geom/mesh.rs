//! `TriMesh`: topological and geometric state of a UV chart.
//!
//! Mirrors the `TriMesh` class of the original engine: a 3D rest shape, a 2D
//! current configuration, and the cohesive-edge bookkeeping that records cuts
//! as pairs of boundary edges sharing a rest position. Topology primitives
//! rebuild the derived maps (`vNeighbor`, `edge2Tri`) from `F` after every
//! structural edit rather than patching them incrementally — Design Note
//! "Mesh topology maps" sanctions this explicitly.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::UvgamiError;
use crate::geom::core::{BBox, Point2, Point3, Vec3, signed_area_2d};

/// A cohesive edge: two sides `(a,b)` and `(c,d)` of one original surface
/// edge. A side of `-1` (represented here as `None`) denotes a true mesh
/// boundary edge rather than a cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CohesiveEdge {
    pub a: usize,
    pub b: usize,
    pub c: Option<usize>,
    pub d: Option<usize>,
}

impl CohesiveEdge {
    #[must_use]
    pub const fn boundary(a: usize, b: usize) -> Self {
        Self { a, b, c: None, d: None }
    }

    #[must_use]
    pub const fn cut(a: usize, b: usize, c: usize, d: usize) -> Self {
        Self { a, b, c: Some(c), d: Some(d) }
    }

    #[must_use]
    pub const fn is_cut(&self) -> bool {
        self.c.is_some() && self.d.is_some()
    }
}

/// Triangle mesh carrying both the immutable 3D rest shape and the mutable
/// 2D UV chart derived from it.
#[derive(Debug, Clone)]
pub struct TriMesh {
    pub v_rest: Vec<Point3>,
    pub v: Vec<Point2>,
    pub f: Vec<[usize; 3]>,
    pub v_neighbor: Vec<BTreeSet<usize>>,
    pub fixed_vert: BTreeSet<usize>,
    pub coh_e: Vec<CohesiveEdge>,
    pub edge2tri: BTreeMap<(usize, usize), usize>,
    pub frac_tail: BTreeSet<usize>,
    pub cur_interior_frac_tails: Option<(usize, usize)>,
    pub cur_frac_tail: Option<usize>,
    pub tri_normal: Vec<Vec3>,
    pub virtual_radius: f64,
    pub vert_weight: Vec<f64>,
    pub bbox: BBox,
    pub init_seam_len: f64,
}

impl TriMesh {
    /// Build a `TriMesh` from rest geometry, initial UV, the face table and
    /// the set of vertices that must not move. `coh_e` carries any cuts
    /// already present at construction time (e.g. from an external disk
    /// cutter); its total length seeds `init_seam_len`.
    pub fn new(
        v_rest: Vec<Point3>,
        v: Vec<Point2>,
        f: Vec<[usize; 3]>,
        fixed_vert: BTreeSet<usize>,
        coh_e: Vec<CohesiveEdge>,
    ) -> Result<Self, UvgamiError> {
        if v_rest.len() != v.len() {
            return Err(UvgamiError::InvalidTopologyOp(
                "V_rest and V must have the same length".into(),
            ));
        }
        let bbox = BBox::from_points(&v_rest).ok_or_else(|| {
            UvgamiError::InvalidTopologyOp("mesh has no vertices".into())
        })?;
        let vert_weight = vec![1.0; v.len()];

        let mut mesh = Self {
            v_rest,
            v,
            f,
            v_neighbor: Vec::new(),
            fixed_vert,
            coh_e,
            edge2tri: BTreeMap::new(),
            frac_tail: BTreeSet::new(),
            cur_interior_frac_tails: None,
            cur_frac_tail: None,
            tri_normal: Vec::new(),
            virtual_radius: 0.0,
            vert_weight,
            bbox,
            init_seam_len: 0.0,
        };
        mesh.rebuild_topology();
        mesh.virtual_radius = (mesh.total_rest_area() / std::f64::consts::PI).sqrt();
        mesh.init_seam_len = mesh.seam_length();

        if !mesh.check_inversion() {
            return Err(UvgamiError::InvalidUv);
        }
        Ok(mesh)
    }

    /// Recompute `v_neighbor`, `edge2tri`, and `tri_normal` from `F`. Called
    /// after every structural edit, per Design Note "Mesh topology maps".
    pub fn rebuild_topology(&mut self) {
        self.v_neighbor = vec![BTreeSet::new(); self.v.len()];
        self.edge2tri = BTreeMap::new();
        self.tri_normal = Vec::with_capacity(self.f.len());

        for (t, tri) in self.f.iter().enumerate() {
            for k in 0..3 {
                let i = tri[k];
                let j = tri[(k + 1) % 3];
                self.v_neighbor[i].insert(j);
                self.v_neighbor[j].insert(i);
                self.edge2tri.insert((i, j), t);
            }
            let (p0, p1, p2) = (
                self.v_rest[tri[0]],
                self.v_rest[tri[1]],
                self.v_rest[tri[2]],
            );
            let n = (p1 - p0).cross(p2 - p0);
            self.tri_normal.push(n.normalized().unwrap_or(Vec3::ZERO));
        }
    }

    #[must_use]
    pub fn signed_area(&self, t: usize) -> f64 {
        let tri = self.f[t];
        signed_area_2d(self.v[tri[0]], self.v[tri[1]], self.v[tri[2]])
    }

    /// Invariant 1: every triangle has strictly positive signed area.
    #[must_use]
    pub fn check_inversion(&self) -> bool {
        (0..self.f.len()).all(|t| self.signed_area(t) > 0.0)
    }

    #[must_use]
    pub fn total_rest_area(&self) -> f64 {
        self.f
            .iter()
            .map(|tri| {
                let (p0, p1, p2) = (self.v_rest[tri[0]], self.v_rest[tri[1]], self.v_rest[tri[2]]);
                0.5 * (p1 - p0).cross(p2 - p0).length()
            })
            .sum()
    }

    /// Total weighted length of cohesive (cut) edges, normalized by
    /// `virtualRadius`, per §3/§4.6.
    #[must_use]
    pub fn seam_length(&self) -> f64 {
        if self.virtual_radius <= 0.0 {
            return 0.0;
        }
        let sum: f64 = self
            .coh_e
            .iter()
            .filter(|e| e.is_cut())
            .map(|e| {
                let len = (self.v_rest[e.a] - self.v_rest[e.b]).length();
                let w = 0.5 * (self.vert_weight[e.a] + self.vert_weight[e.b]);
                len * w
            })
            .sum();
        sum / self.virtual_radius
    }

    #[must_use]
    pub fn is_boundary_vertex(&self, vi: usize) -> bool {
        self.v_neighbor[vi]
            .iter()
            .any(|&vj| self.boundary_edge_of(vi, vj).is_some() || self.boundary_edge_of(vj, vi).is_some())
    }

    /// Returns the unique incident triangle if `(i,j)` is a boundary half
    /// edge (its reverse has no triangle).
    fn boundary_edge_of(&self, i: usize, j: usize) -> Option<usize> {
        match (self.edge2tri.get(&(i, j)), self.edge2tri.get(&(j, i))) {
            (Some(&t), None) => Some(t),
            _ => None,
        }
    }

    /// `splitEdgeOnBoundary`'s second valid precondition: `(i,j)` isn't a
    /// true mesh boundary edge, but it IS a cohesive (cut) side whose other
    /// side `(c,d)` has since become non-boundary (e.g. a prior merge
    /// elsewhere welded it back into an interior fan). Splitting such an
    /// edge is still well-formed: it only touches the triangle on `(i,j)`'s
    /// own side, independent of whatever `(c,d)` is doing now.
    fn splittable_triangle_of(&self, i: usize, j: usize) -> Option<usize> {
        if let Some(t) = self.boundary_edge_of(i, j) {
            return Some(t);
        }
        let t = *self.edge2tri.get(&(i, j))?;
        let coh = self.coh_e.iter().find(|e| e.a == i && e.b == j)?;
        let (c, d) = (coh.c?, coh.d?);
        let other_is_boundary = self.boundary_edge_of(c, d).is_some() || self.boundary_edge_of(d, c).is_some();
        (!other_is_boundary).then_some(t)
    }

    /// Two boundary half-edges incident to `vi`, returned as `(prev, next)`
    /// neighbor vertices, i.e. the fan's two open ends. `None` if `vi` is
    /// interior (full closed fan) or non-manifold at this vertex.
    #[must_use]
    pub fn boundary_neighbors(&self, vi: usize) -> Option<(usize, usize)> {
        let mut outgoing = None; // (vi, n) is boundary
        let mut incoming = None; // (n, vi) is boundary
        for &n in &self.v_neighbor[vi] {
            if self.boundary_edge_of(vi, n).is_some() {
                if outgoing.is_some() {
                    return None;
                }
                outgoing = Some(n);
            }
            if self.boundary_edge_of(n, vi).is_some() {
                if incoming.is_some() {
                    return None;
                }
                incoming = Some(n);
            }
        }
        match (incoming, outgoing) {
            (Some(p), Some(nx)) => Some((p, nx)),
            _ => None,
        }
    }

    /// Cyclic order of neighbors around an interior vertex, built by walking
    /// `(center, p, q)` triangle corners. Returns `None` if `center` is not
    /// interior (fan doesn't close) or is non-manifold.
    #[must_use]
    pub fn fan_order(&self, center: usize) -> Option<Vec<usize>> {
        let mut next_of: BTreeMap<usize, usize> = BTreeMap::new();
        for &t in self.v_neighbor[center].iter().filter_map(|&p| self.edge2tri.get(&(center, p))) {
            let tri = self.f[t];
            let k = tri.iter().position(|&x| x == center)?;
            let p = tri[(k + 1) % 3];
            let q = tri[(k + 2) % 3];
            if next_of.insert(p, q).is_some() {
                return None; // non-manifold fan
            }
        }
        if next_of.len() != self.v_neighbor[center].len() {
            return None; // center is a boundary vertex; fan doesn't close
        }
        let start = *next_of.keys().next()?;
        let mut order = vec![start];
        let mut cur = start;
        for _ in 1..next_of.len() {
            cur = *next_of.get(&cur)?;
            if cur == start {
                return None;
            }
            order.push(cur);
        }
        if next_of.get(&cur) != Some(&start) {
            return None;
        }
        Some(order)
    }

    /// `splitEdgeOnBoundary((u,v), newVertPos)`: duplicate the far endpoint
    /// `v` of a boundary edge `(u,v)`, peeling the triangle incident to that
    /// edge away from the rest of `v`'s fan. Returns the new vertex index.
    pub fn split_edge_on_boundary(
        &mut self,
        edge: (usize, usize),
        new_pos: Point2,
    ) -> Result<usize, UvgamiError> {
        let (u, v) = edge;
        let t = self.splittable_triangle_of(u, v).ok_or_else(|| {
            UvgamiError::InvalidTopologyOp(format!(
                "edge ({u},{v}) is neither a boundary edge nor a cohesive edge with a non-boundary other side"
            ))
        })?;

        let new_idx = self.v.len();
        self.v_rest.push(self.v_rest[v]);
        self.v.push(new_pos);
        self.vert_weight.push(self.vert_weight[v]);
        if self.fixed_vert.contains(&v) {
            self.fixed_vert.insert(new_idx);
        }

        for slot in &mut self.f[t] {
            if *slot == v {
                *slot = new_idx;
            }
        }

        self.coh_e.push(CohesiveEdge::cut(u, v, u, new_idx));
        self.rebuild_topology();

        if !self.check_inversion() {
            return Err(UvgamiError::ElementInversion);
        }
        Ok(new_idx)
    }

    /// `cutPath([v0,v1,v2], true, 1, newVertPos)`: duplicate the interior
    /// vertex `v1` into two copies, splitting its closed fan into the arc
    /// `v0 -> ... -> v2` (kept on `v1`) and `v2 -> ... -> v0` (moved to the
    /// new copy). `v0` and `v2` become interior fracture tails: candidates
    /// for a further split on a future call.
    pub fn cut_path(
        &mut self,
        v0: usize,
        v1: usize,
        v2: usize,
        new_pos: Point2,
    ) -> Result<usize, UvgamiError> {
        if !self.v_neighbor[v1].contains(&v0) || !self.v_neighbor[v1].contains(&v2) {
            return Err(UvgamiError::InvalidTopologyOp(
                "cutPath: v0/v2 must be neighbors of v1".into(),
            ));
        }
        if self.boundary_edge_of(v0, v1).is_some()
            || self.boundary_edge_of(v1, v0).is_some()
            || self.boundary_edge_of(v1, v2).is_some()
            || self.boundary_edge_of(v2, v1).is_some()
        {
            return Err(UvgamiError::InvalidTopologyOp(
                "cutPath: (v0,v1) and (v1,v2) must be interior edges".into(),
            ));
        }
        let order = self.fan_order(v1).ok_or_else(|| {
            UvgamiError::InvalidTopologyOp("cutPath: v1 is not a manifold interior vertex".into())
        })?;
        let i0 = order.iter().position(|&x| x == v0).ok_or_else(|| {
            UvgamiError::InvalidTopologyOp("cutPath: v0 not adjacent to v1".into())
        })?;
        let i2 = order.iter().position(|&x| x == v2).ok_or_else(|| {
            UvgamiError::InvalidTopologyOp("cutPath: v2 not adjacent to v1".into())
        })?;

        // Arc B runs from v2 forward to v0 (exclusive of v0); its triangles
        // get the duplicate vertex.
        let n = order.len();
        let mut arc_b = BTreeSet::new();
        let mut i = i2;
        while i != i0 {
            arc_b.insert(order[i]);
            i = (i + 1) % n;
        }

        let new_idx = self.v.len();
        self.v_rest.push(self.v_rest[v1]);
        self.v.push(new_pos);
        self.vert_weight.push(self.vert_weight[v1]);

        for tri in &mut self.f {
            if tri.contains(&v1) && tri.iter().any(|x| arc_b.contains(x)) {
                for slot in tri.iter_mut() {
                    if *slot == v1 {
                        *slot = new_idx;
                    }
                }
            }
        }

        self.coh_e.push(CohesiveEdge::cut(v0, v1, v0, new_idx));
        self.coh_e.push(CohesiveEdge::cut(v1, v2, new_idx, v2));
        self.frac_tail.insert(v0);
        self.frac_tail.insert(v2);
        self.cur_interior_frac_tails = Some((v0, v2));

        self.rebuild_topology();
        if !self.check_inversion() {
            return Err(UvgamiError::ElementInversion);
        }
        Ok(new_idx)
    }

    /// `mergeBoundaryEdges((a,b),(b,c), newPos)`: weld the two sides of the
    /// cohesive pair(s) covering `(a,b)` and `(b,c)` back together at `b`'s
    /// partner vertex, collapsing the cut.
    pub fn merge_boundary_edges(
        &mut self,
        ab: (usize, usize),
        bc: (usize, usize),
        new_pos: Point2,
    ) -> Result<(), UvgamiError> {
        let (a, b) = ab;
        let (b2, c) = bc;
        if b != b2 {
            return Err(UvgamiError::InvalidTopologyOp(
                "mergeBoundaryEdges: edges must share their middle vertex".into(),
            ));
        }

        let idx_ab = self.find_cohesive_side(a, b).ok_or_else(|| {
            UvgamiError::InvalidTopologyOp(format!("({a},{b}) is not a cohesive side"))
        })?;
        let idx_bc = self.find_cohesive_side(b, c).ok_or_else(|| {
            UvgamiError::InvalidTopologyOp(format!("({b},{c}) is not a cohesive side"))
        })?;

        let partner_ab = self.other_side_vertex(idx_ab, b)?;
        let partner_bc = self.other_side_vertex(idx_bc, b)?;
        if partner_ab != partner_bc {
            return Err(UvgamiError::NoFeasibleMergeAvailable);
        }
        let b_partner = partner_ab;

        let saved_v = self.v.clone();
        let saved_f = self.f.clone();
        self.v[b] = new_pos;
        for tri in &mut self.f {
            for slot in tri.iter_mut() {
                if *slot == b_partner {
                    *slot = b;
                }
            }
        }
        self.rebuild_topology();

        if !self.check_inversion() {
            self.v = saved_v;
            self.f = saved_f;
            self.rebuild_topology();
            return Err(UvgamiError::NoFeasibleMergeAvailable);
        }

        let mut remove = vec![idx_ab, idx_bc];
        remove.sort_unstable();
        remove.dedup();
        for idx in remove.into_iter().rev() {
            self.coh_e.remove(idx);
        }
        Ok(())
    }

    fn find_cohesive_side(&self, x: usize, y: usize) -> Option<usize> {
        self.coh_e
            .iter()
            .position(|e| (e.a == x && e.b == y) || (e.c == Some(x) && e.d == Some(y)))
    }

    fn other_side_vertex(&self, idx: usize, known: usize) -> Result<usize, UvgamiError> {
        let e = &self.coh_e[idx];
        if e.a == known {
            Ok(e.c.unwrap_or(e.a))
        } else if e.c == Some(known) {
            Ok(e.a)
        } else if e.b == known {
            Ok(e.d.unwrap_or(e.b))
        } else if e.d == Some(known) {
            Ok(e.b)
        } else {
            Err(UvgamiError::InvalidTopologyOp("vertex not part of cohesive edge".into()))
        }
    }

    /// Per-vertex distortion proxy used by the stress-threshold filter: the
    /// max per-incident-triangle energy (1.0 for an undistorted triangle;
    /// grows with stretch).
    #[must_use]
    pub fn vertex_stress(&self, vi: usize, per_tri_energy: &[f64]) -> f64 {
        self.v_neighbor[vi]
            .iter()
            .filter_map(|&vj| {
                self.edge2tri
                    .get(&(vi, vj))
                    .or_else(|| self.edge2tri.get(&(vj, vi)))
            })
            .map(|&t| per_tri_energy[t])
            .fold(0.0, f64::max)
    }

    #[must_use]
    pub fn boundary_vertices(&self) -> Vec<usize> {
        (0..self.v.len()).filter(|&vi| self.is_boundary_vertex(vi)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
        TriMesh::new(v_rest, v, f, BTreeSet::from([0, 1]), Vec::new()).unwrap()
    }

    #[test]
    fn constructs_with_positive_areas() {
        let mesh = unit_square();
        assert!(mesh.check_inversion());
        assert_eq!(mesh.f.len(), 2);
        assert!((mesh.total_rest_area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn edge2tri_is_consistent_with_f() {
        let mesh = unit_square();
        for (t, tri) in mesh.f.iter().enumerate() {
            for k in 0..3 {
                let key = (tri[k], tri[(k + 1) % 3]);
                assert_eq!(mesh.edge2tri.get(&key), Some(&t));
            }
        }
    }

    #[test]
    fn rejects_inverted_initial_uv() {
        let v_rest = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        // Reversed winding in UV: negative area.
        let v = vec![
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 1.0),
            Point2::new(1.0, 0.0),
        ];
        let f = vec![[0, 1, 2]];
        let res = TriMesh::new(v_rest, v, f, BTreeSet::new(), Vec::new());
        assert!(matches!(res, Err(UvgamiError::InvalidUv)));
    }

    #[test]
    fn split_edge_on_boundary_preserves_invariants() {
        let mut mesh = unit_square();
        let new_idx = mesh
            .split_edge_on_boundary((1, 2), Point2::new(1.2, 0.0))
            .unwrap();
        assert_eq!(new_idx, 4);
        assert!(mesh.check_inversion());
        for e in &mesh.coh_e {
            if e.is_cut() {
                assert_eq!(mesh.v_rest[e.a], mesh.v_rest[e.c.unwrap()]);
                assert_eq!(mesh.v_rest[e.b], mesh.v_rest[e.d.unwrap()]);
            }
        }
    }

    #[test]
    fn split_edge_rejects_non_boundary_edge() {
        let mut mesh = unit_square();
        // (0,2) is the shared interior diagonal, not a boundary edge.
        let res = mesh.split_edge_on_boundary((0, 2), Point2::new(0.5, 0.5));
        assert!(res.is_err());
    }

    #[test]
    fn split_edge_accepts_cohesive_side_with_non_boundary_other_side() {
        let mut mesh = unit_square();
        // (0,2) is the shared interior diagonal (two incident triangles),
        // so boundary_edge_of alone rejects it. Recording it as a cohesive
        // side whose other side is itself non-boundary exercises the
        // second valid precondition.
        mesh.coh_e.push(CohesiveEdge::cut(0, 2, 0, 2));
        let new_idx = mesh.split_edge_on_boundary((0, 2), mesh.v[2]).unwrap();
        assert_eq!(new_idx, 4);
        assert!(mesh.check_inversion());
    }

    fn grid_mesh(nx: usize, ny: usize) -> TriMesh {
        let mut v_rest = Vec::new();
        let mut v = Vec::new();
        for j in 0..ny {
            for i in 0..nx {
                let x = i as f64;
                let y = j as f64;
                v_rest.push(Point3::new(x, y, 0.0));
                v.push(Point2::new(x, y));
            }
        }
        let mut f = Vec::new();
        for j in 0..ny - 1 {
            for i in 0..nx - 1 {
                let a = j * nx + i;
                let b = a + 1;
                let c = a + nx;
                let d = c + 1;
                f.push([a, b, d]);
                f.push([a, d, c]);
            }
        }
        TriMesh::new(v_rest, v, f, BTreeSet::new(), Vec::new()).unwrap()
    }

    #[test]
    fn cut_path_splits_interior_vertex() {
        let mut mesh = grid_mesh(3, 3);
        let center = 4; // middle of a 3x3 grid is fully interior
        assert!(mesh.fan_order(center).is_some());
        let neighbors: Vec<usize> = mesh.v_neighbor[center].iter().copied().collect();
        let v0 = neighbors[0];
        let v2 = neighbors[2];
        let before_verts = mesh.v.len();
        if let Ok(new_idx) = mesh.cut_path(v0, center, v2, mesh.v[center]) {
            assert_eq!(new_idx, before_verts);
            assert!(mesh.check_inversion());
            assert_eq!(mesh.cur_interior_frac_tails, Some((v0, v2)));
        }
    }
}
