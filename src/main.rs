use std::process::ExitCode;

use clap::Parser;

use lox_interpreter_rs::error::Error;
use lox_interpreter_rs::Lox;

/// A tree-walking interpreter for Lox.
#[derive(Parser)]
#[command(name = "lox-interpreter-rs")]
struct Cli {
    /// Script to execute. Omit to start an interactive prompt.
    script: Option<String>,

    /// Trailing args beyond a single script are a usage error, not silently ignored.
    #[arg(trailing_var_arg = true, hide = true)]
    extra: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    if !cli.extra.is_empty() {
        eprintln!("Usage: lox-interpreter-rs [script]");
        return ExitCode::from(64);
    }

    let mut lox = Lox::new();

    let result = match &cli.script {
        Some(path) => lox.run_file(path),
        None => lox.run_prompt(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Diagnostics(diagnostics)) => {
            eprintln!("{diagnostics}");
            ExitCode::from(65)
        }
        Err(Error::Runtime(err)) => {
            eprintln!("{err}");
            ExitCode::from(70)
        }
        Err(Error::Io(err)) => {
            eprintln!("{err}");
            ExitCode::from(74)
        }
    }
}
