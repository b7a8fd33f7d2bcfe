//! Disk-topology cutter for closed or higher-genus inputs (§1 Non-goals:
//! the core never sees a mesh without a boundary).
//!
//! Standard "cut graph via dual spanning tree" construction: build the dual
//! graph (one node per face, an edge between faces sharing a mesh edge),
//! take a spanning tree of it, and cut along every mesh edge whose two
//! incident faces are *not* joined by a tree edge. Cutting along the
//! complement of a spanning dual tree always yields a single disk, since
//! the tree already connects every face without encircling any handle or
//! hole. This is the textbook construction (not grounded in a specific
//! example file); it makes no attempt to minimize seam length, since
//! quality seam placement is explicitly out of scope.

use std::collections::{HashMap, VecDeque};

use crate::error::UvgamiError;
use crate::geom::core::Point3;
use crate::geom::mesh::CohesiveEdge;

/// Output of cutting a closed mesh into a disk: a new, larger vertex set
/// (vertices duplicated along every cut) and cohesive-edge records pairing
/// the two new copies of each cut edge.
pub struct CutResult {
    pub v_rest: Vec<Point3>,
    pub f: Vec<[usize; 3]>,
    pub coh_e: Vec<CohesiveEdge>,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

fn corner_index(face: usize, local: usize) -> usize {
    face * 3 + local
}

fn local_index_of(tri: [usize; 3], vi: usize) -> usize {
    tri.iter().position(|&x| x == vi).expect("vi must be a corner of tri")
}

/// Cuts a closed, edge-manifold mesh into a disk. Fails (as an
/// `InvalidTopologyOp`) if any edge is shared by other than exactly two
/// faces, since the dual graph is only well-defined for edge-manifold
/// input — the caller is expected to have already checked `io::uvgami.cpp`'s
/// manifold-edge precondition before reaching here.
pub fn cut_to_disk(v_rest: &[Point3], f: &[[usize; 3]]) -> Result<CutResult, UvgamiError> {
    let mut edge_faces: HashMap<(usize, usize), Vec<(usize, usize)>> = HashMap::new();
    for (t, tri) in f.iter().enumerate() {
        for k in 0..3 {
            let i = tri[k];
            let j = tri[(k + 1) % 3];
            let key = if i < j { (i, j) } else { (j, i) };
            edge_faces.entry(key).or_default().push((t, k));
        }
    }
    for faces in edge_faces.values() {
        if faces.len() != 2 {
            return Err(UvgamiError::InvalidTopologyOp(
                "disk cutter requires an edge-manifold, closed mesh".into(),
            ));
        }
    }

    // Dual adjacency: face -> [(neighbor face, shared mesh edge)].
    let mut dual_adj: Vec<Vec<(usize, (usize, usize))>> = vec![Vec::new(); f.len()];
    for (&key, faces) in &edge_faces {
        let (fa, _) = faces[0];
        let (fb, _) = faces[1];
        dual_adj[fa].push((fb, key));
        dual_adj[fb].push((fa, key));
    }

    // BFS spanning tree of the dual graph; record which mesh edges it uses.
    let mut tree_edges: std::collections::HashSet<(usize, usize)> = std::collections::HashSet::new();
    let mut visited = vec![false; f.len()];
    let mut queue = VecDeque::new();
    if !f.is_empty() {
        visited[0] = true;
        queue.push_back(0);
    }
    while let Some(face) = queue.pop_front() {
        for &(neighbor, edge) in &dual_adj[face] {
            if !visited[neighbor] {
                visited[neighbor] = true;
                tree_edges.insert(edge);
                queue.push_back(neighbor);
            }
        }
    }

    // Union corners across every non-cut edge: the two faces sharing it are
    // glued there, so their copies of each endpoint are the same new vertex.
    let mut uf = UnionFind::new(3 * f.len());
    let mut cut_edges = Vec::new();
    for (&(u, v), faces) in &edge_faces {
        let (fa, _) = faces[0];
        let (fb, _) = faces[1];
        if tree_edges.contains(&(u, v)) {
            uf.union(corner_index(fa, local_index_of(f[fa], u)), corner_index(fb, local_index_of(f[fb], u)));
            uf.union(corner_index(fa, local_index_of(f[fa], v)), corner_index(fb, local_index_of(f[fb], v)));
        } else {
            cut_edges.push((u, v, fa, fb));
        }
    }

    // Assign compact new-vertex ids to union-find roots, in corner order so
    // output is deterministic regardless of HashMap iteration order.
    let mut new_id_of_root: HashMap<usize, usize> = HashMap::new();
    let mut new_v_rest = Vec::new();
    let mut new_id_of_corner = vec![0usize; 3 * f.len()];
    for face in 0..f.len() {
        for local in 0..3 {
            let corner = corner_index(face, local);
            let root = uf.find(corner);
            let new_id = *new_id_of_root.entry(root).or_insert_with(|| {
                new_v_rest.push(v_rest[f[face][local]]);
                new_v_rest.len() - 1
            });
            new_id_of_corner[corner] = new_id;
        }
    }

    let new_f: Vec<[usize; 3]> = (0..f.len())
        .map(|face| std::array::from_fn(|local| new_id_of_corner[corner_index(face, local)]))
        .collect();

    let mut coh_e = Vec::with_capacity(cut_edges.len());
    for (u, v, fa, fb) in cut_edges {
        let la = local_index_of(f[fa], u);
        let lb_u = local_index_of(f[fb], u);
        let lv_a = local_index_of(f[fa], v);
        let lv_b = local_index_of(f[fb], v);
        coh_e.push(CohesiveEdge::cut(
            new_id_of_corner[corner_index(fa, la)],
            new_id_of_corner[corner_index(fa, lv_a)],
            new_id_of_corner[corner_index(fb, lb_u)],
            new_id_of_corner[corner_index(fb, lv_b)],
        ));
    }

    Ok(CutResult { v_rest: new_v_rest, f: new_f, coh_e })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> (Vec<Point3>, Vec<[usize; 3]>) {
        let v_rest = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let f = vec![[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]];
        (v_rest, f)
    }

    #[test]
    fn cutting_a_closed_mesh_produces_a_boundary() {
        let (v_rest, f) = tetrahedron();
        let result = cut_to_disk(&v_rest, &f).unwrap();
        assert!(!result.coh_e.is_empty());

        // Every cut mesh edge should now appear as a boundary half-edge on
        // at least one side (its reverse direction must be missing).
        let mut edge2tri = HashMap::new();
        for (t, tri) in result.f.iter().enumerate() {
            for k in 0..3 {
                edge2tri.insert((tri[k], tri[(k + 1) % 3]), t);
            }
        }
        let mut boundary_edges = 0;
        for tri in &result.f {
            for k in 0..3 {
                let (i, j) = (tri[k], tri[(k + 1) % 3]);
                if !edge2tri.contains_key(&(j, i)) {
                    boundary_edges += 1;
                }
            }
        }
        assert!(boundary_edges > 0);
    }

    #[test]
    fn cohesive_records_pair_matching_rest_positions() {
        let (v_rest, f) = tetrahedron();
        let result = cut_to_disk(&v_rest, &f).unwrap();
        for e in &result.coh_e {
            let (c, d) = (e.c.unwrap(), e.d.unwrap());
            assert_eq!(result.v_rest[e.a].to_array(), result.v_rest[c].to_array());
            assert_eq!(result.v_rest[e.b].to_array(), result.v_rest[d].to_array());
        }
    }

    #[test]
    fn non_manifold_edge_is_rejected() {
        let v_rest = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(-1.0, 1.0, 0.0),
        ];
        // Three faces share edge (0,1): non-manifold.
        let f = vec![[0, 1, 2], [0, 1, 3], [1, 0, 4]];
        assert!(cut_to_disk(&v_rest, &f).is_err());
    }
}
