//! Boundary-fixed harmonic (uniform-weight Tutte) parameterization, used as
//! the fallback initial UV whenever an input has no usable UV map.
//!
//! Grounded on `IglUtils::fixedBoundaryParam_MVC` / `map_vertices_to_circle`
//! / `computeUniformLaplacian`, simplified from mean-value to uniform
//! weights: the mean-value-coordinate matrix needs per-corner cotangent-like
//! weights that add real complexity for a fallback path that only needs *a*
//! valid embedding, not a conformal one. A uniform-weight Tutte embedding is
//! still guaranteed locally injective for a disk-topology mesh with a convex
//! boundary image, which `map_vertices_to_circle` always produces.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::error::UvgamiError;
use crate::geom::core::{Point2, Point3};

/// `computeUniformLaplacian`: `L[i][i] = deg(i)`, `L[i][j] = -1` for each
/// neighbor `j`. Shared by Tutte initialization and by seam-weight
/// smoothing (`io::weights`).
#[must_use]
pub fn uniform_laplacian_neighbors(f: &[[usize; 3]], n: usize) -> Vec<BTreeSet<usize>> {
    let mut nb = vec![BTreeSet::new(); n];
    for tri in f {
        for k in 0..3 {
            let i = tri[k];
            let j = tri[(k + 1) % 3];
            nb[i].insert(j);
            nb[j].insert(i);
        }
    }
    nb
}

/// `map_vertices_to_circle`: places `loop_verts` on the unit circle,
/// spaced proportionally to their 3D rest arc length around the loop.
#[must_use]
pub fn map_vertices_to_circle(v_rest: &[Point3], loop_verts: &[usize]) -> Vec<Point2> {
    let n = loop_verts.len();
    if n == 0 {
        return Vec::new();
    }
    let mut arc_len = vec![0.0; n];
    let mut total = 0.0;
    for i in 0..n {
        arc_len[i] = total;
        let next = loop_verts[(i + 1) % n];
        total += v_rest[loop_verts[i]].distance_to(v_rest[next]);
    }
    if total <= 0.0 {
        // Degenerate (coincident) boundary: fall back to uniform spacing.
        return (0..n)
            .map(|i| {
                let theta = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
                Point2::new(theta.cos(), theta.sin())
            })
            .collect();
    }
    arc_len
        .iter()
        .map(|&s| {
            let theta = 2.0 * std::f64::consts::PI * s / total;
            Point2::new(theta.cos(), theta.sin())
        })
        .collect()
}

/// Solves the uniform-weight harmonic map: free vertices get the
/// Laplacian-smoothed average of their neighbors, `boundary_loop` is pinned
/// to `map_vertices_to_circle`'s image. One reduced Cholesky-backed sparse
/// solve per coordinate (x, y share the same system matrix).
pub fn tutte_embedding(
    v_rest: &[Point3],
    f: &[[usize; 3]],
    boundary_loop: &[usize],
) -> Result<Vec<Point2>, UvgamiError> {
    let n = v_rest.len();
    let neighbors = uniform_laplacian_neighbors(f, n);
    let bnd_uv = map_vertices_to_circle(v_rest, boundary_loop);
    let boundary_set: BTreeSet<usize> = boundary_loop.iter().copied().collect();
    let bnd_pos: HashMap<usize, Point2> = boundary_loop.iter().copied().zip(bnd_uv).collect();

    let free: Vec<usize> = (0..n).filter(|v| !boundary_set.contains(v)).collect();
    let mut free_index = BTreeMap::new();
    for (compact, &vi) in free.iter().enumerate() {
        free_index.insert(vi, compact);
    }

    if free.is_empty() {
        let mut uv = vec![Point2::new(0.0, 0.0); n];
        for (&vi, &p) in &bnd_pos {
            uv[vi] = p;
        }
        return Ok(uv);
    }

    let mut coo = CooMatrix::new(free.len(), free.len());
    let mut rhs_x = vec![0.0; free.len()];
    let mut rhs_y = vec![0.0; free.len()];
    for (compact, &vi) in free.iter().enumerate() {
        let degree = neighbors[vi].len() as f64;
        coo.push(compact, compact, degree);
        for &nb in &neighbors[vi] {
            if let Some(&nb_compact) = free_index.get(&nb) {
                coo.push(compact, nb_compact, -1.0);
            } else if let Some(p) = bnd_pos.get(&nb) {
                rhs_x[compact] += p.x;
                rhs_y[compact] += p.y;
            }
        }
    }

    let csc = CscMatrix::from(&coo);
    let chol = CscCholesky::factor(&csc)
        .map_err(|e| UvgamiError::FactorizationFailure(format!("Tutte Laplacian not SPD: {e:?}")))?;

    let x = chol.solve(&nalgebra::DMatrix::from_column_slice(free.len(), 1, &rhs_x));
    let y = chol.solve(&nalgebra::DMatrix::from_column_slice(free.len(), 1, &rhs_y));
    let x: Vec<f64> = x.column(0).iter().copied().collect();
    let y: Vec<f64> = y.column(0).iter().copied().collect();

    let mut uv = vec![Point2::new(0.0, 0.0); n];
    for (&vi, &p) in &bnd_pos {
        uv[vi] = p;
    }
    for (compact, &vi) in free.iter().enumerate() {
        uv[vi] = Point2::new(x[compact], y[compact]);
    }
    Ok(uv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::core::signed_area_2d;

    fn unit_square_fan() -> (Vec<Point3>, Vec<[usize; 3]>) {
        // A 3x3 grid, 8 boundary verts + 1 interior, triangulated regularly.
        let mut v_rest = Vec::new();
        for j in 0..3 {
            for i in 0..3 {
                v_rest.push(Point3::new(i as f64, j as f64, 0.0));
            }
        }
        let idx = |i: usize, j: usize| j * 3 + i;
        let mut f = Vec::new();
        for j in 0..2 {
            for i in 0..2 {
                f.push([idx(i, j), idx(i + 1, j), idx(i + 1, j + 1)]);
                f.push([idx(i, j), idx(i + 1, j + 1), idx(i, j + 1)]);
            }
        }
        (v_rest, f)
    }

    #[test]
    fn map_vertices_to_circle_places_square_corners_on_unit_circle() {
        let v_rest = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let loop_verts = vec![0, 1, 2, 3];
        let uv = map_vertices_to_circle(&v_rest, &loop_verts);
        for p in uv {
            assert!((p.distance_to(Point2::new(0.0, 0.0)) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn tutte_embedding_places_interior_vertex_at_centroid_and_is_injective() {
        let (v_rest, f) = unit_square_fan();
        let boundary_loop = vec![0, 1, 2, 5, 8, 7, 6, 3];
        let uv = tutte_embedding(&v_rest, &f, &boundary_loop).unwrap();
        let center = uv[4];
        assert!(center.distance_to(Point2::new(0.0, 0.0)) < 0.5);
        for tri in &f {
            let a = signed_area_2d(uv[tri[0]], uv[tri[1]], uv[tri[2]]);
            assert!(a > 0.0, "triangle {tri:?} inverted: area {a}");
        }
    }
}
