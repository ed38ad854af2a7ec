//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Validates command-specific arguments
//! 2. Calls the engine (or the read-only modules) to do the work
//! 3. Formats and displays output
//!
//! Handlers do NOT mutate plan documents or run state directly; all
//! writes flow through the plan store and state store.

mod audit;
mod curate;
mod run;

pub use audit::audit;
pub use curate::curate;
pub use run::run;

use anyhow::Result;
use clap::CommandFactory;

use super::args::{Cli, Command};
use super::Globals;

/// Dispatch a parsed command. Returns the process exit code.
pub fn dispatch(cli: Cli) -> Result<i32> {
    let globals = Globals {
        cwd: cli.cwd.clone(),
        json: cli.json,
        quiet: cli.quiet,
    };

    match cli.command {
        Command::Run(args) => run(&args, &globals, false),
        Command::Resume(args) => run(&args, &globals, true),
        Command::Audit { scope } => audit(scope, &globals),
        Command::CurateEvidence {
            scope,
            plan_id,
            dry_run,
        } => curate(scope, plan_id.as_deref(), dry_run.unwrap_or(false), &globals),
        Command::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "conveyor",
                &mut std::io::stdout(),
            );
            Ok(0)
        }
    }
}
