//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! - `--cwd <path>`: run as if started in that directory
//! - `--json`: machine-readable reporting
//! - `--quiet` / `-q`: minimal output
//!
//! Boolean knobs take explicit values (`--commit false`) so a flag's
//! absence always means "use the configured default".

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub use clap_complete::Shell;

/// Conveyor - risk-adaptive execution conveyor for plan documents
#[derive(Parser, Debug)]
#[command(name = "conveyor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run as if conveyor was started in this directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Machine-readable JSON reporting
    #[arg(long, global = true)]
    pub json: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Catalog scope for read-only commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scope {
    Active,
    Completed,
    All,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new run over the active plan catalog
    Run(RunArgs),

    /// Resume the persisted run state and continue
    Resume(RunArgs),

    /// Check catalog, state, and event-log invariants (read-only)
    Audit {
        /// Which plans to audit
        #[arg(long, value_enum, default_value_t = Scope::All)]
        scope: Scope,
    },

    /// Curate evidence directories and indexes without running plans
    #[command(name = "curate-evidence")]
    CurateEvidence {
        /// Which plans to curate
        #[arg(long, value_enum, default_value_t = Scope::Active)]
        scope: Scope,

        /// Curate a single plan
        #[arg(long)]
        plan_id: Option<String>,

        /// Compute and report without writing
        #[arg(long)]
        dry_run: Option<bool>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Flags shared by `run` and `resume`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Autonomy mode (guarded|full)
    #[arg(long, default_value = "guarded")]
    pub mode: String,

    /// Stop after this many plans (0 = unbounded)
    #[arg(long, default_value_t = 0)]
    pub max_plans: usize,

    /// Handoff when contextRemaining is at or below this value
    #[arg(long)]
    pub context_threshold: Option<u64>,

    /// Require the executor result payload on exit 0
    #[arg(long)]
    pub require_result_payload: Option<bool>,

    /// Token budget advertised to sessions for handoff notes
    #[arg(long)]
    pub handoff_token_budget: Option<u64>,

    /// Handoffs tolerated per plan before it fails
    #[arg(long)]
    pub max_rollovers: Option<u32>,

    /// Session budget per plan
    #[arg(long)]
    pub max_sessions_per_plan: Option<u32>,

    /// Replace the always validation lane ("cmd1;;cmd2")
    #[arg(long)]
    pub validation: Option<String>,

    /// Write the atomic completion commit
    #[arg(long)]
    pub commit: Option<bool>,

    /// Skip the post-loop promotion pass
    #[arg(long)]
    pub skip_promotion: Option<bool>,

    /// Tolerate a dirty worktree (refused when commits are enabled)
    #[arg(long)]
    pub allow_dirty: Option<bool>,

    /// Reuse a specific run id
    #[arg(long)]
    pub run_id: Option<String>,

    /// Restrict execution to one plan
    #[arg(long)]
    pub plan_id: Option<String>,

    /// Decide everything, write nothing
    #[arg(long)]
    pub dry_run: Option<bool>,

    /// Output mode (minimal|ticker|pretty|verbose)
    #[arg(long)]
    pub output: Option<String>,

    /// Captured-output lines shown on failure
    #[arg(long)]
    pub failure_tail_lines: Option<usize>,

    /// Heartbeat cadence while sessions run
    #[arg(long)]
    pub heartbeat_seconds: Option<u64>,

    /// Idle seconds before the one-shot stall warning
    #[arg(long)]
    pub stall_warn_seconds: Option<u64>,

    /// Run up to N dependency-independent plans concurrently
    #[arg(long, default_value_t = 1)]
    pub parallel_plans: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("args parse")
    }

    #[test]
    fn run_defaults() {
        let cli = parse(&["conveyor", "run"]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.mode, "guarded");
                assert_eq!(args.max_plans, 0);
                assert_eq!(args.parallel_plans, 1);
                assert!(args.commit.is_none());
                assert!(args.dry_run.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn boolean_flags_take_explicit_values() {
        let cli = parse(&[
            "conveyor", "run", "--commit", "false", "--dry-run", "true", "--allow-dirty", "true",
        ]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.commit, Some(false));
                assert_eq!(args.dry_run, Some(true));
                assert_eq!(args.allow_dirty, Some(true));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn validation_override_is_captured_verbatim() {
        let cli = parse(&["conveyor", "run", "--validation", "cargo check;;cargo test"]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.validation.as_deref(), Some("cargo check;;cargo test"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn audit_scope_parses() {
        let cli = parse(&["conveyor", "audit", "--scope", "completed"]);
        match cli.command {
            Command::Audit { scope } => assert_eq!(scope, Scope::Completed),
            _ => panic!("expected audit"),
        }
    }

    #[test]
    fn curate_evidence_accepts_plan_id() {
        let cli = parse(&["conveyor", "curate-evidence", "--plan-id", "fix-footer"]);
        match cli.command {
            Command::CurateEvidence { plan_id, scope, .. } => {
                assert_eq!(plan_id.as_deref(), Some("fix-footer"));
                assert_eq!(scope, Scope::Active);
            }
            _ => panic!("expected curate-evidence"),
        }
    }

    #[test]
    fn global_flags_apply_anywhere() {
        let cli = parse(&["conveyor", "audit", "--json", "--quiet"]);
        assert!(cli.json);
        assert!(cli.quiet);
    }
}
