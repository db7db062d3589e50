use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use lbmgen::solver::GeneratorConfig;
use lbmgen_codegen::compiler::ensure_empty_dir;
use log::warn;

#[derive(Parser)]
#[command(
    name = "lbmgen-codegen",
    about = "Generate a native lattice Boltzmann torch extension"
)]
struct Args {
    /// JSON generator config; the D2Q9 BGK bounce-back setup if omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory, overrides `output_dir` from the config
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Print every generated buffer
    #[arg(short, long)]
    verbose: bool,

    /// Build and install the extension after writing it
    #[arg(long)]
    install: bool,
}

fn is_non_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn run(args: Args) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => GeneratorConfig::load(path)?,
        None => GeneratorConfig::default(),
    };
    let generator = config.build()?;
    let dir = args.out.unwrap_or_else(|| config.output_dir.clone());

    let buffers = generator.generate()?;
    if args.verbose {
        for (name, text) in &buffers {
            println!("==== {name} ====\n{text}");
        }
    }

    if is_non_empty_dir(&dir) {
        warn!("clearing non-empty output directory {}", dir.display());
    }
    ensure_empty_dir(&dir)?;
    let written = generator.format(&buffers, &dir)?;

    if args.install {
        generator.install_with(&dir, &config.build_command())?;
    }
    Ok(written)
}

fn main() {
    env_logger::init();
    match run(Args::parse()) {
        Ok(paths) => {
            for path in paths {
                println!("Wrote {}", path.display());
            }
        }
        Err(err) => {
            eprintln!("Codegen failed: {}", err);
            std::process::exit(1);
        }
    }
}
