//! Console entry point: `pbxscript info|eval|reload|load|allocations`,
//! the module's CLI surface.

use clap::{Parser, Subcommand};
use pbxscript::Engine;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "pbxscript", about = "Embedded scripting runtime console")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lists every loaded script and its instance/in-use state.
    Info,
    /// Evaluates an expression in a context (requires a script backend;
    /// not wired into this console build).
    Eval {
        #[arg(long)]
        ctx: Option<String>,
        expr: Vec<String>,
    },
    /// Reloads a named script from its current file.
    Reload { script: String },
    /// Loads a script, optionally under an explicit catalog name.
    Load { target: String },
    /// Reports allocation counts for a script's instances or their total.
    Allocations {
        #[command(subcommand)]
        scope: AllocationsScope,
    },
}

#[derive(Subcommand)]
enum AllocationsScope {
    Instance { script: String, top: usize },
    Total { script: String, top: usize },
}

fn run(cli: Cli, engine: &Engine) -> Result<(), String> {
    match cli.command {
        Command::Info => {
            for (name, file, script_type, instances, in_use) in engine.scripts.catalog_summary() {
                println!("{name}\t{file}\t{script_type:?}\tinstances={instances}\tin_use={in_use}");
            }
            Ok(())
        }
        Command::Eval { ctx, expr } => {
            let ctx = ctx.unwrap_or_else(|| "default".to_string());
            Err(format!(
                "eval[={ctx}] {} requires a host-supplied script backend; none is wired into this console build",
                expr.join(" ")
            ))
        }
        Command::Reload { script } => {
            Err(format!("reload {script} requires a host-supplied script loader; none is wired into this console build"))
        }
        Command::Load { target } => {
            Err(format!("load {target} requires a host-supplied script loader; none is wired into this console build"))
        }
        Command::Allocations { scope } => {
            let (script, top) = match scope {
                AllocationsScope::Instance { script, top } => (script, top),
                AllocationsScope::Total { script, top } => (script, top),
            };
            let mut counts = engine.scripts.allocation_counts(&script);
            counts.truncate(top.max(1));
            for (instance_index, live, total) in counts {
                println!("instance {instance_index}\tlive={live}\ttotal={total}");
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let engine = Engine::new();

    match run(cli, &engine) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}
