use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use strom::engine::{Engine, EngineConfig, DEFAULT_SAMPLE_RATE};
use strom::repl::Repl;

/// An interactive engine for a concatenative signal language.
#[derive(Parser, Debug)]
#[command(name = "strom", version, about)]
struct Args {
    /// Engine sample rate in Hz.
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: f64,

    /// Source file loaded before anything else runs.
    #[arg(long)]
    prelude: Option<PathBuf>,

    /// Append log output to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Suppress banner and non-error output.
    #[arg(short, long)]
    quiet: bool,

    /// Drop into the REPL even after running a file.
    #[arg(short, long)]
    interactive: bool,

    /// Program file to run.
    file: Option<PathBuf>,
}

fn init_logging(args: &Args) {
    let level = if args.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    match &args.log_file {
        Some(path) => {
            let Ok(file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            else {
                eprintln!("cannot open log file {}", path.display());
                return;
            };
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    let engine = Engine::new(EngineConfig {
        sample_rate: args.sample_rate,
        prelude_file: args.prelude.clone(),
        log_file: args.log_file.clone(),
        quiet: args.quiet,
    });

    let mut th = engine.new_thread();
    if let Err(e) = engine.load_prelude(&mut th) {
        eprintln!("prelude failed: {e}");
        return ExitCode::FAILURE;
    }

    if let Some(file) = &args.file {
        let src = match std::fs::read_to_string(file) {
            Ok(src) => src,
            Err(e) => {
                eprintln!("cannot read {}: {e}", file.display());
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = th.run(&src) {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
        if !args.interactive {
            engine.audio().stop_all();
            return ExitCode::SUCCESS;
        }
    }

    let mut repl = Repl::new(engine);
    match repl.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("readline error: {e}");
            ExitCode::FAILURE
        }
    }
}
