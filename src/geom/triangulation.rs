//! 2D Delaunay triangulation helper, shared by `Scaffold` (air-mesh
//! construction) and the disk cutter's dual-graph (`io::cut`).

use delaunator::{Point as DPoint, triangulate};

use crate::geom::core::Point2;

/// Delaunay-triangulates `points`, returning one `[usize; 3]` per triangle
/// indexing back into `points`. Degenerate (duplicate/collinear) point sets
/// triangulate to an empty result rather than panicking.
#[must_use]
pub fn delaunay_triangles(points: &[Point2]) -> Vec<[usize; 3]> {
    let d_points: Vec<DPoint> = points.iter().map(|p| DPoint { x: p.x, y: p.y }).collect();
    let result = triangulate(&d_points);
    result
        .triangles
        .chunks_exact(3)
        .map(|t| [t[0], t[1], t[2]])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangulates_unit_square_into_two_triangles() {
        let pts = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let tris = delaunay_triangles(&pts);
        assert_eq!(tris.len(), 2);
    }

    #[test]
    fn degenerate_colinear_points_triangulate_to_nothing() {
        let pts = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(2.0, 0.0)];
        let tris = delaunay_triangles(&pts);
        assert!(tris.is_empty());
    }
}
