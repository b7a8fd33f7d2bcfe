//! Wavefront OBJ reader/writer.
//!
//! The reader is a small manual line tokenizer (no external OBJ crate, to
//! keep the dependency stack aligned with the teacher's zero-format-parsing
//! stack) that keeps `v`/`vt`/`f` tokens and fan-triangulates faces with more
//! than 3 corners. The writer mirrors `mesh_cli.rs`'s `write_obj_file`: plain
//! `v`/`vt`/`f` lines, 1-based indices, `vt` lines only when a UV is present.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::UvgamiError;
use crate::geom::core::{Point2, Point3};
use crate::geom::mesh::TriMesh;
use crate::io::LoadedMesh;

/// Parses an OBJ file's vertex positions, faces, and (if present) `vt` UVs.
/// Only the geometry-relevant tokens are honored; `vn`, `g`, `o`, `mtllib`
/// and friends are silently skipped.
pub fn read_obj(path: &Path) -> Result<LoadedMesh, UvgamiError> {
    let text = fs::read_to_string(path)
        .map_err(|e| UvgamiError::FailedToLoadMesh(format!("{}: {e}", path.display())))?;

    let mut v_rest = Vec::new();
    let mut uv_raw = Vec::new();
    let mut f = Vec::new();
    let mut face_uses_uv = true;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tok = line.split_whitespace();
        match tok.next() {
            Some("v") => {
                let xyz = parse_floats::<3>(tok)
                    .ok_or_else(|| UvgamiError::FailedToLoadMesh("malformed v line".into()))?;
                v_rest.push(Point3::new(xyz[0], xyz[1], xyz[2]));
            }
            Some("vt") => {
                let uv = parse_floats::<2>(tok)
                    .ok_or_else(|| UvgamiError::FailedToLoadMesh("malformed vt line".into()))?;
                uv_raw.push(Point2::new(uv[0], uv[1]));
            }
            Some("f") => {
                let mut v_idx = Vec::new();
                let mut uv_idx = Vec::new();
                for corner in tok {
                    let mut parts = corner.split('/');
                    let vi: isize = parts
                        .next()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| UvgamiError::FailedToLoadMesh("malformed f line".into()))?;
                    v_idx.push(resolve_index(vi, v_rest.len()));
                    match parts.next().filter(|s| !s.is_empty()) {
                        Some(s) => {
                            let ti: isize = s
                                .parse()
                                .map_err(|_| UvgamiError::FailedToLoadMesh("malformed f line".into()))?;
                            uv_idx.push(resolve_index(ti, uv_raw.len()));
                        }
                        None => face_uses_uv = false,
                    }
                }
                if v_idx.len() < 3 {
                    return Err(UvgamiError::FailedToLoadMesh("face with fewer than 3 corners".into()));
                }
                for k in 1..v_idx.len() - 1 {
                    f.push([v_idx[0], v_idx[k], v_idx[k + 1]]);
                }
            }
            _ => {}
        }
    }

    let uv = if face_uses_uv && !uv_raw.is_empty() && uv_raw.len() == v_rest.len() {
        Some(uv_raw)
    } else {
        None
    };

    Ok(LoadedMesh { v_rest, f, uv })
}

fn parse_floats<const N: usize>(tok: std::str::SplitWhitespace<'_>) -> Option<[f64; N]> {
    let vals: Vec<f64> = tok.take(N).filter_map(|s| s.parse().ok()).collect();
    vals.try_into().ok()
}

fn resolve_index(raw: isize, count: usize) -> usize {
    if raw > 0 { (raw - 1) as usize } else { (count as isize + raw) as usize }
}

/// Writes `mesh`'s current 3D rest shape as positions and its 2D chart as
/// `vt` UVs, per §6's "Output mesh" contract.
pub fn write_obj(path: &Path, mesh: &TriMesh, name: &str) -> Result<(), UvgamiError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    let mut w = BufWriter::new(file);

    writeln!(w, "# uvgami output")?;
    writeln!(w, "o {name}")?;
    for p in &mesh.v_rest {
        writeln!(w, "v {} {} {}", p.x, p.y, p.z)?;
    }
    for uv in &mesh.v {
        writeln!(w, "vt {} {}", uv.x, uv.y)?;
    }
    for tri in &mesh.f {
        let [a, b, c] = tri.map(|i| i + 1);
        writeln!(w, "f {a}/{a} {b}/{b} {c}/{c}")?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn reads_triangle_and_quad_faces() {
        let mut file = tempfile_with(
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3\nf 1 3 4\n",
        );
        let loaded = read_obj(file.path()).unwrap();
        assert_eq!(loaded.v_rest.len(), 4);
        assert_eq!(loaded.f.len(), 2);
        drop(file.take());
    }

    #[test]
    fn reads_uv_when_present_and_consistent() {
        let mut file = tempfile_with(
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nvt 0 0\nvt 1 0\nvt 1 1\nf 1/1 2/2 3/3\n",
        );
        let loaded = read_obj(file.path()).unwrap();
        assert!(loaded.uv.is_some());
        drop(file.take());
    }

    struct TempFile(Option<std::path::PathBuf>);
    impl TempFile {
        fn path(&self) -> &std::path::Path {
            self.0.as_deref().unwrap()
        }
        fn take(&mut self) -> Option<std::path::PathBuf> {
            self.0.take()
        }
    }
    impl Drop for TempFile {
        fn drop(&mut self) {
            if let Some(p) = &self.0 {
                let _ = fs::remove_file(p);
            }
        }
    }

    fn tempfile_with(contents: &str) -> TempFile {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("uvgami_test_{}_{n}.obj", std::process::id()));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        TempFile(Some(path))
    }
}
