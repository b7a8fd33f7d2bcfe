//! Object File Format (OFF) reader/writer. OFF carries no UV channel, so a
//! loaded `LoadedMesh::uv` is always `None` here; writing emits geometry
//! only (OFF has no `vt`-equivalent), so `write_off` is used for debugging
//! intermediate disk-cut output rather than the final chart (`write_obj`
//! carries the UV).

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::UvgamiError;
use crate::geom::core::Point3;
use crate::io::LoadedMesh;

pub fn read_off(path: &Path) -> Result<LoadedMesh, UvgamiError> {
    let text = fs::read_to_string(path)
        .map_err(|e| UvgamiError::FailedToLoadMesh(format!("{}: {e}", path.display())))?;
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#'));

    let header = lines.next().ok_or_else(|| UvgamiError::FailedToLoadMesh("empty OFF file".into()))?;
    if header != "OFF" && !header.starts_with("OFF ") {
        return Err(UvgamiError::FailedToLoadMesh("missing OFF header".into()));
    }
    let counts_line = header.strip_prefix("OFF").unwrap().trim();
    let counts_line = if counts_line.is_empty() {
        lines.next().ok_or_else(|| UvgamiError::FailedToLoadMesh("missing OFF counts line".into()))?
    } else {
        counts_line
    };
    let mut counts = counts_line.split_whitespace();
    let n_v: usize = counts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| UvgamiError::FailedToLoadMesh("malformed OFF counts line".into()))?;
    let n_f: usize = counts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| UvgamiError::FailedToLoadMesh("malformed OFF counts line".into()))?;

    let mut v_rest = Vec::with_capacity(n_v);
    for _ in 0..n_v {
        let line = lines.next().ok_or_else(|| UvgamiError::FailedToLoadMesh("truncated OFF vertex list".into()))?;
        let xyz: Vec<f64> = line.split_whitespace().filter_map(|s| s.parse().ok()).collect();
        if xyz.len() < 3 {
            return Err(UvgamiError::FailedToLoadMesh("malformed OFF vertex line".into()));
        }
        v_rest.push(Point3::new(xyz[0], xyz[1], xyz[2]));
    }

    let mut f = Vec::with_capacity(n_f);
    for _ in 0..n_f {
        let line = lines.next().ok_or_else(|| UvgamiError::FailedToLoadMesh("truncated OFF face list".into()))?;
        let idx: Vec<usize> = line.split_whitespace().filter_map(|s| s.parse().ok()).collect();
        if idx.is_empty() {
            return Err(UvgamiError::FailedToLoadMesh("malformed OFF face line".into()));
        }
        let (n, corners) = (idx[0], &idx[1..]);
        if corners.len() != n || n < 3 {
            return Err(UvgamiError::FailedToLoadMesh("malformed OFF face line".into()));
        }
        for k in 1..corners.len() - 1 {
            f.push([corners[0], corners[k], corners[k + 1]]);
        }
    }

    Ok(LoadedMesh { v_rest, f, uv: None })
}

pub fn write_off(path: &Path, v_rest: &[Point3], f: &[[usize; 3]]) -> Result<(), UvgamiError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    let mut w = BufWriter::new(file);
    writeln!(w, "OFF")?;
    writeln!(w, "{} {} 0", v_rest.len(), f.len())?;
    for p in v_rest {
        writeln!(w, "{} {} {}", p.x, p.y, p.z)?;
    }
    for tri in f {
        writeln!(w, "3 {} {} {}", tri[0], tri[1], tri[2])?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn tempfile_with(contents: &str) -> std::path::PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("uvgami_off_test_{}_{n}.off", std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_unit_square_off() {
        let path = tempfile_with("OFF\n4 2 0\n0 0 0\n1 0 0\n1 1 0\n0 1 0\n3 0 1 2\n3 0 2 3\n");
        let loaded = read_off(&path).unwrap();
        assert_eq!(loaded.v_rest.len(), 4);
        assert_eq!(loaded.f.len(), 2);
        assert!(loaded.uv.is_none());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn round_trips_through_write_off() {
        let v_rest = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
        let f = vec![[0, 1, 2]];
        let path = std::env::temp_dir().join(format!("uvgami_off_roundtrip_{}.off", std::process::id()));
        write_off(&path, &v_rest, &f).unwrap();
        let loaded = read_off(&path).unwrap();
        assert_eq!(loaded.v_rest.len(), 3);
        assert_eq!(loaded.f, f);
        let _ = fs::remove_file(&path);
    }
}
