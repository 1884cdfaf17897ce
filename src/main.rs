//! tl - prepares jscut G-code for a Grbl controlled laser cutter.
//!
//! Pipe a job through it:
//!
//!     cat job.nc | tl --power 60 > laser.gcode

mod config;
mod diagnostics;
mod post;

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{debug, info, LevelFilter};

use crate::post::laser::GrblLaserPost;
use crate::post::PostProcessor;

/// Rewrites CAM G-code for a Grbl laser: plunge/retract comments become
/// laser on/off commands and Z moves are dropped.
#[derive(Parser, Debug)]
#[command(name = "tl", version, about, long_about = None)]
struct Args {
    /// Laser power, in % of maximum output [0-100]
    #[arg(short, long, env = "TL_POWER", allow_negative_numbers = true)]
    power: Option<i64>,

    /// TOML file with a `power` key, used when --power is not given
    #[arg(short, long, env = "TL_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write to PATH instead of standard output
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// More logging on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// G-code to read; standard input when omitted or `-`
    input: Option<PathBuf>,
}

#[derive(Debug)]
enum Error {
    Config(config::ConfigError),
    Post(post::PostError),
    Open { path: PathBuf, source: io::Error },
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<post::PostError> for Error {
    fn from(e: post::PostError) -> Self {
        Error::Post(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "{}", e),
            Error::Post(e) => write!(f, "{}", e),
            Error::Open { path, source } => write!(f, "cannot open {}: {}", path.display(), source),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(summary) => {
            info!("{}", summary);
            ExitCode::SUCCESS
        }
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(args: &Args) -> Result<post::Summary, Error> {
    // Nothing is opened for output until the power is known to be good.
    let file = match args.config.as_deref() {
        Some(path) => {
            let cfg = config::FileConfig::load(path)?;
            debug!("loaded {}: power = {:?}", cfg.path().display(), cfg.power());
            Some(cfg)
        }
        None => None,
    };
    let resolved = config::resolve(args.power, file)?;
    info!("laser power {} from {}", resolved.power, resolved.source);

    let input = open_input(args.input.as_deref())?;
    let output = open_output(args.output.as_deref())?;

    let mut post = GrblLaserPost::new(resolved.power);
    info!("post-processor: {}", post.name());

    Ok(post::run(&mut post, input, output)?)
}

fn is_stdio(path: &Path) -> bool {
    path == Path::new("-")
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>, Error> {
    match path {
        Some(path) if !is_stdio(path) => {
            let file = File::open(path).map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(io::stdin().lock())),
    }
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>, Error> {
    match path {
        Some(path) if !is_stdio(path) => {
            let file = File::create(path).map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        _ => Ok(Box::new(BufWriter::new(io::stdout().lock()))),
    }
}

/// The one place fatal errors are reported.
fn report(err: &Error) {
    let stderr = io::stderr();
    if let Error::Config(e) = err {
        if let Some(rendered) = diagnostics::annotate(e, stderr.is_terminal()) {
            eprint!("{}", rendered);
            return;
        }
    }
    eprintln!("tl: {}", err);
}
