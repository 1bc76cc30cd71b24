// JBasic CLI - Command Line Interface
// Usage: jbasic FILE [ARGS]... [OPTIONS]

use clap::Parser;
use colored::*;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use jbasic_core::bytecode::{load_file, ProgramFile};
use jbasic_core::config::VmConfig;
use jbasic_core::vm::{Services, Session, Value};

/// JBasic - run bytecode listings and program bundles
#[derive(Parser)]
#[command(name = "jbasic")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stack-based bytecode VM for a BASIC-family language", long_about = None)]
struct Cli {
    /// Program file to run (.jbc listing or .json bundle)
    file: PathBuf,

    /// Arguments passed to the program as $ARGS
    args: Vec<String>,

    /// Program to start instead of the file's main program
    #[arg(short = 'p', long = "program")]
    program: Option<String>,

    /// VM configuration file (JSON)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Coerce stores by variable-name suffix in every program
    #[arg(long = "static")]
    static_types: bool,

    /// Deny every privileged opcode
    #[arg(long = "sandbox")]
    sandbox: bool,

    /// Log every executed instruction
    #[arg(long = "trace")]
    trace: bool,

    /// Print the linked listing instead of running
    #[arg(short = 'd', long = "disassemble")]
    disassemble: bool,

    /// Write the programs as a JSON bundle instead of running
    #[arg(short = 'o', long = "emit-json")]
    emit_json: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{} {}", "error:".red().bold(), message);
            std::process::exit(2);
        }
    };
    init_tracing(&cli, &config);

    match handle_run(&cli, config) {
        Ok(status) => std::process::exit(status),
        Err(message) => {
            eprintln!("{} {}", "error:".red().bold(), message);
            std::process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> Result<VmConfig, String> {
    let mut config = match &cli.config {
        Some(path) => VmConfig::load(path).map_err(|e| e.to_string())?,
        None => VmConfig::default(),
    };
    if cli.static_types {
        config.static_types = true;
    }
    if cli.sandbox {
        config.permissions.clear();
    }
    Ok(config)
}

/// JBASIC_LOG wins over the configured filter; --trace wins over both
fn init_tracing(cli: &Cli, config: &VmConfig) {
    let filter = if cli.trace {
        EnvFilter::new("jbasic_core=trace")
    } else {
        EnvFilter::try_from_env("JBASIC_LOG").unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_run(cli: &Cli, config: VmConfig) -> Result<i32, String> {
    let (programs, main) = load_file(&cli.file).map_err(|e| e.to_string())?;

    if cli.disassemble {
        for program in &programs {
            print!("{}", program.code.disassemble(&program.name));
        }
        return Ok(0);
    }

    if let Some(output) = &cli.emit_json {
        let mut bundle = ProgramFile::from_programs(&programs);
        bundle.main = main;
        let json = bundle.to_json().map_err(|e| e.to_string())?;
        fs::write(output, json).map_err(|e| format!("Error writing file: {}", e))?;
        println!("{} Wrote {}", "✓".green(), output.display());
        return Ok(0);
    }

    let entry = cli
        .program
        .clone()
        .or(main)
        .ok_or_else(|| format!("{} contains no programs", cli.file.display()))?;

    let services = Arc::new(Services::new(config));
    let mut session = Session::new(services);
    for program in programs {
        session.register(program);
    }

    let args = cli.args.iter().map(|arg| Value::string(arg)).collect();
    let outcome = session.run(&entry, args);

    let mut failed = false;
    for (id, result) in session.join_threads() {
        if let Err(err) = result {
            eprintln!("{} {}", format!("thread {}:", id).yellow(), err.format());
            failed = true;
        }
    }

    match outcome {
        Ok(outcome) => {
            if let Some(result) = outcome.result {
                println!("{}", result);
            }
            Ok(if outcome.status == 0 && failed { 1 } else { outcome.status as i32 })
        }
        Err(err) => {
            eprint!("{}", err.format());
            Ok(1)
        }
    }
}
