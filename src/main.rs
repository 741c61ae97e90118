//! Zapmenu command line.
//!
//! Hosts the auto-responder without the desktop shell, and offers offline
//! tools to validate a script and preview what an action sends.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use zapmenu::atoms::constants::{ROOT_ACTION, SCRIPT_FILE_NAME, SETTINGS_FILE_NAME};
use zapmenu::engine::interpreter::{Interpreter, OutboundStep};
use zapmenu::{AppConfig, EngineResult, MenuScript};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Zapmenu — WhatsApp menu auto-responder.
#[derive(Parser)]
#[command(name = "zapmenu", version, about)]
struct Cli {
    /// Debug-level logging (RUST_LOG still wins when set).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the configured bot instances and answer messages until Ctrl-C.
    Run {
        /// Settings file.
        #[arg(long, env = "ZAPMENU_CONFIG", default_value = SETTINGS_FILE_NAME)]
        config: PathBuf,
    },
    /// Validate a menu script and list dangling references.
    Check {
        #[arg(long, default_value = SCRIPT_FILE_NAME)]
        script: PathBuf,
    },
    /// Print the messages an action would send, without sending anything.
    Render {
        action: String,
        /// Contact name used for the {NOME_CLIENTE} placeholder.
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = SCRIPT_FILE_NAME)]
        script: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let result = match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::Check { script } => check(&script),
        Commands::Render { action, name, script } => render(&script, &action, name.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: PathBuf) -> EngineResult<()> {
    let config = AppConfig::load(&config_path)?;
    zapmenu::run(config).await
}

fn check(path: &Path) -> EngineResult<()> {
    let script = MenuScript::parse(&std::fs::read_to_string(path)?)?;
    println!("{}: {} actions", path.display(), script.len());
    if !script.has_root() {
        println!("warning: root action \"{}\" is missing", ROOT_ACTION);
    }
    let dangling = script.dangling_references();
    for d in &dangling {
        println!("warning: {} option {} points to missing action \"{}\"", d.from, d.token, d.target);
    }
    if dangling.is_empty() && script.has_root() {
        println!("ok");
    }
    Ok(())
}

fn render(path: &Path, action: &str, name: Option<&str>) -> EngineResult<()> {
    let script = MenuScript::parse(&std::fs::read_to_string(path)?)?;
    let plan = Interpreter::default().plan(&script, action, name, ROOT_ACTION)?;
    for step in &plan.steps {
        match step {
            OutboundStep::Wait(d) => println!("[wait {} ms]", d.as_millis()),
            OutboundStep::Typing => println!("[typing]"),
            OutboundStep::Send(text) => println!("{}\n", text),
        }
    }
    println!("[next state: {}]", plan.next_state);
    Ok(())
}
