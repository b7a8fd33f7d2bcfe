//! Invariant checks for `TriMesh`.
//!
//! Mirrors the diagnostics-struct shape of the original mesh-generation
//! diagnostics: a plain data record of counts plus a `warnings` list,
//! produced by a standalone `check` function rather than being threaded
//! through every mesh operation. Checks the structural invariants §8 of
//! the specification treats as testable properties.
//!
//! # Example
//!
//! ```ignore
//! let report = check_mesh(&mesh);
//! if !report.is_clean() {
//!     for warning in &report.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//! }
//! ```

use crate::geom::mesh::TriMesh;

/// Structural/geometric invariant report for a `TriMesh` snapshot.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MeshDiagnostics {
    /// Number of vertices.
    pub vertex_count: usize,
    /// Number of triangles.
    pub triangle_count: usize,
    /// Triangles whose current (UV) signed area is not strictly positive.
    pub inverted_triangle_count: usize,
    /// Edges shared by more than 2 triangles, or cohesive edges whose two
    /// sides don't actually share a rest position.
    pub non_manifold_edge_count: usize,
    /// Cohesive edges recorded whose rest-position pairing invariant
    /// (`V_rest[a] == V_rest[c]`, `V_rest[b] == V_rest[d]`) is violated.
    pub inconsistent_cohesive_edge_count: usize,
    /// Human-readable notes about anything above zero.
    pub warnings: Vec<String>,
}

impl MeshDiagnostics {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.inverted_triangle_count == 0
            && self.non_manifold_edge_count == 0
            && self.inconsistent_cohesive_edge_count == 0
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

/// Runs the full invariant sweep: positive areas, `edge2tri` consistency
/// with `F`, and cohesive-edge rest-position pairing.
#[must_use]
pub fn check_mesh(mesh: &TriMesh) -> MeshDiagnostics {
    let mut report = MeshDiagnostics {
        vertex_count: mesh.v.len(),
        triangle_count: mesh.f.len(),
        ..MeshDiagnostics::default()
    };

    for t in 0..mesh.f.len() {
        if mesh.signed_area(t) <= 0.0 {
            report.inverted_triangle_count += 1;
        }
    }
    if report.inverted_triangle_count > 0 {
        report.warn(format!("{} triangle(s) have non-positive UV area", report.inverted_triangle_count));
    }

    let mut edge_count = std::collections::BTreeMap::new();
    for tri in &mesh.f {
        for k in 0..3 {
            let a = tri[k];
            let b = tri[(k + 1) % 3];
            let key = (a.min(b), a.max(b));
            *edge_count.entry(key).or_insert(0) += 1;
        }
    }
    report.non_manifold_edge_count = edge_count.values().filter(|&&c| c > 2).count();
    if report.non_manifold_edge_count > 0 {
        report.warn(format!("{} edge(s) are non-manifold (>2 incident triangles)", report.non_manifold_edge_count));
    }

    for ce in &mesh.coh_e {
        if let (Some(c), Some(d)) = (ce.c, ce.d) {
            let ok = mesh.v_rest[ce.a] == mesh.v_rest[c] && mesh.v_rest[ce.b] == mesh.v_rest[d];
            if !ok {
                report.inconsistent_cohesive_edge_count += 1;
            }
        }
    }
    if report.inconsistent_cohesive_edge_count > 0 {
        report.warn(format!(
            "{} cohesive edge(s) have mismatched rest positions between sides",
            report.inconsistent_cohesive_edge_count
        ));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::core::{Point2, Point3};
    use std::collections::BTreeSet;

    #[test]
    fn clean_mesh_reports_no_warnings() {
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
        let mesh = TriMesh::new(v_rest, v, f, BTreeSet::new(), Vec::new()).unwrap();
        let report = check_mesh(&mesh);
        assert!(report.is_clean(), "{report:?}");
    }
}
