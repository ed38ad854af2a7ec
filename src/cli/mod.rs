//! cli
//!
//! Command-line interface layer.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Delegate to command handlers
//! - Does NOT mutate plans or run state directly
//!
//! # Architecture
//!
//! The CLI layer is thin. It parses arguments via clap and dispatches
//! to the [`crate::engine`] for execution. Plan and state mutations
//! flow through the stores the engine owns.

pub mod args;
pub mod commands;

pub use args::{Cli, Shell};

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Global flags shared by all handlers.
#[derive(Debug, Clone)]
pub struct Globals {
    pub cwd: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

impl Globals {
    /// The repository root this invocation operates on.
    pub fn root(&self) -> Result<PathBuf> {
        match &self.cwd {
            Some(cwd) => Ok(cwd.clone()),
            None => std::env::current_dir().context("cannot resolve working directory"),
        }
    }
}

/// Run the CLI application. Returns the process exit code.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<i32> {
    let cli = Cli::parse_args();
    commands::dispatch(cli)
}
