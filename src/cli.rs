//! Command-line argument parsing for the flags in §6. Hand-rolled in the
//! same style as `mesh_cli.rs`'s `Args` struct: no `clap` dependency, since
//! the teacher's own CLI binary doesn't carry one either.

use std::path::PathBuf;

pub struct Args {
    args: Vec<String>,
    pos: usize,
}

impl Args {
    #[must_use]
    pub fn new(args: Vec<String>) -> Self {
        Self { args, pos: 0 }
    }

    fn next(&mut self) -> Option<String> {
        let arg = self.args.get(self.pos)?.clone();
        self.pos += 1;
        Some(arg)
    }

    fn value(&mut self, flag: &str) -> Result<String, String> {
        self.next().ok_or_else(|| format!("missing value for {flag}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramMode {
    Interactive,
    Headless,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub mode: ProgramMode,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub lambda_init: f64,
    pub upper_bound: f64,
    pub max_seam_weight: f64,
    pub ignore_uv: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: ProgramMode::Headless,
            input: PathBuf::new(),
            output: None,
            lambda_init: 0.999,
            upper_bound: 4.1,
            max_seam_weight: 100.0,
            ignore_uv: false,
        }
    }
}

/// Parses `argv` (excluding the program name) into `Options`. `-i` is the
/// only required flag; out-of-range `-L` silently resets to the default
/// per §6 ("ignored if ∉ [0,1)").
pub fn parse(argv: Vec<String>) -> Result<Options, String> {
    let mut opts = Options::default();
    let mut input_seen = false;
    let mut args = Args::new(argv);

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-p" => {
                opts.mode = match args.value("-p")?.as_str() {
                    "10" => ProgramMode::Interactive,
                    "100" => ProgramMode::Headless,
                    other => return Err(format!("invalid program mode: {other}")),
                };
            }
            "-i" => {
                opts.input = PathBuf::from(args.value("-i")?);
                input_seen = true;
            }
            "-o" => opts.output = Some(PathBuf::from(args.value("-o")?)),
            "-L" => {
                let lambda: f64 = args.value("-L")?.parse().map_err(|_| "malformed -L value".to_string())?;
                if lambda >= 0.0 && lambda < 1.0 {
                    opts.lambda_init = lambda;
                }
            }
            "-u" => {
                opts.upper_bound = args.value("-u")?.parse().map_err(|_| "malformed -u value".to_string())?;
            }
            "-s" => {
                opts.max_seam_weight =
                    args.value("-s")?.parse().map_err(|_| "malformed -s value".to_string())?;
            }
            "-g" => opts.ignore_uv = true,
            other => return Err(format!("unrecognized flag: {other}")),
        }
    }

    if !input_seen {
        return Err("missing required flag -i".to_string());
    }
    Ok(opts)
}
