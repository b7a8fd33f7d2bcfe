//! Binary entry point: CLI parsing → mesh loading → chart initialization
//! (input UV or Tutte fallback, cutting closed inputs to a disk first) →
//! regional seam weights → the coupled optimization/topology engine →
//! OBJ output. Maps `UvgamiError` to the exit codes in §6.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use uvgami::engine::{self, Engine, EngineConfig, EngineOutcome};
use uvgami::error::{ExitCode, UvgamiError};
use uvgami::io;
use uvgami::{TriMesh, cli};

fn mesh_name(input: &Path) -> String {
    input.file_stem().and_then(|s| s.to_str()).unwrap_or("mesh").to_string()
}

fn default_output_dir(input: &Path) -> PathBuf {
    // Mirrors the original's `<input-parent-parent>/output/` convention.
    input
        .parent()
        .and_then(Path::parent)
        .or_else(|| input.parent())
        .unwrap_or_else(|| Path::new("."))
        .join("output")
}

fn load_mesh(input: &Path) -> Result<io::LoadedMesh, UvgamiError> {
    match input.extension().and_then(|s| s.to_str()) {
        Some("off") | Some("OFF") => io::off::read_off(input),
        Some("obj") | Some("OBJ") => io::obj::read_obj(input),
        other => Err(UvgamiError::UnknownMeshFormat(format!("{other:?}"))),
    }
}

/// Builds the initial `TriMesh` chart: the input UV if it's present,
/// unignored, and locally injective; otherwise a manifold check followed by
/// a Tutte fallback (cutting first if the input has no boundary at all).
fn build_initial_chart(loaded: io::LoadedMesh, ignore_uv: bool) -> Result<TriMesh, UvgamiError> {
    if !ignore_uv {
        if let Some(uv) = loaded.uv.clone() {
            let mut fixed = BTreeSet::new();
            fixed.insert(0);
            match TriMesh::new(loaded.v_rest.clone(), uv, loaded.f.clone(), fixed, Vec::new()) {
                Ok(mesh) => return Ok(mesh),
                Err(_) => log::info!("input UV is not locally injective; falling back to Tutte"),
            }
        }
    }

    if !io::is_vertex_manifold(&loaded.f, loaded.v_rest.len()) {
        return Err(UvgamiError::NonManifoldVertices);
    }
    if !io::is_edge_manifold(&loaded.f) {
        return Err(UvgamiError::NonManifoldEdges);
    }

    let mut v_rest = loaded.v_rest;
    let mut f = loaded.f;
    let mut coh_e = Vec::new();
    let mut loops = io::boundary_loops(&f);
    if loops.is_empty() {
        // Closed surface (genus ≥ 0): cut to a disk first.
        let cut = io::cut::cut_to_disk(&v_rest, &f)?;
        v_rest = cut.v_rest;
        f = cut.f;
        coh_e = cut.coh_e;
        loops = io::boundary_loops(&f);
    }
    // ASSUME: no disconnected closed surface present (matches the original's
    // own assumption) — take the first boundary loop.
    let boundary_loop = loops.into_iter().next().ok_or(UvgamiError::InvalidUv)?;
    let uv = io::tutte::tutte_embedding(&v_rest, &f, &boundary_loop)?;

    let mut fixed = BTreeSet::new();
    fixed.insert(boundary_loop[0]);
    TriMesh::new(v_rest, uv, f, fixed, coh_e)
}

fn run() -> Result<(), UvgamiError> {
    uvgami::init_logger();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let opts = cli::parse(argv).map_err(|msg| UvgamiError::FailedToLoadMesh(msg))?;

    let loaded = load_mesh(&opts.input)?;
    let mut mesh = build_initial_chart(loaded, opts.ignore_uv)?;

    let name = mesh_name(&opts.input);
    let weights_path = opts
        .input
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{name}_weights"));
    io::weights::apply_weights_file(&weights_path, &mut mesh.vert_weight, &mesh.f, opts.max_seam_weight);

    let config = EngineConfig { upper_bound: opts.upper_bound, ..EngineConfig::default() };
    let mut engine = Engine::new(mesh, opts.lambda_init, config)?;
    let control = engine::spawn_stdin_control();
    let outcome = engine.run(&control)?;

    let cancelled_without_save =
        matches!(outcome, EngineOutcome::Cancelled) && !control.force_quit_save.load(Ordering::SeqCst);
    if cancelled_without_save {
        log::info!("run cancelled without save; no output written");
        return Ok(());
    }

    let out_dir = opts.output.unwrap_or_else(|| default_output_dir(&opts.input));
    let out_path = out_dir.join(format!("{name}.obj"));
    io::obj::write_obj(&out_path, &engine.optimizer.result, &name)?;
    log::info!("wrote {}", out_path.display());
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("uvgami: {e}");
        std::process::exit(ExitCode::from(&e) as i32);
    }
}
