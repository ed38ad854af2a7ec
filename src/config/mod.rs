//! config
//!
//! Orchestrator configuration: loading, CLI overrides, and the
//! fail-closed startup assertions.
//!
//! # Architecture
//!
//! The config document lives at
//! `docs/ops/automation/orchestrator.config.json`. Loading layers the
//! document over built-in defaults (every field has one), CLI flags are
//! applied on top via [`CliOverrides`], and [`assert_runnable`] refuses
//! to start a run with an unusable configuration. Misconfiguration is a
//! startup error, never a mid-run surprise.
//!
//! # Invariants
//!
//! - A selected provider template must contain `{prompt}`
//! - Worker sessions are `full-access`; all other roles `read-only`
//! - A required validation lane cannot have an empty command list
//! - `--allow-dirty` with commits enabled is refused outright

pub mod model;

pub use model::{
    ApprovalGatesConfig, EvidenceCompaction, EvidenceConfig, EvidenceLifecycle, ExecutorConfig,
    HostLaneConfig, HostMode, HostValidationConfig, LoggingConfig, OrchestratorConfig,
    ParallelConfig, PipelinesConfig, ProviderTemplate, ReasoningEffort, RiskModelConfig,
    RiskThresholds, RiskWeights, RoleOrchestrationConfig, RoleProfile, SandboxMode,
    ValidationConfig,
};

use std::fs;

use thiserror::Error;

use crate::core::env::Env;
use crate::core::paths::ConveyorPaths;
use crate::core::types::Role;
use crate::ui::output::OutputMode;

/// Errors from config loading and startup assertions.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for the schema.
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The executor command is unusable.
    #[error("executor unconfigured: {0}")]
    ExecutorUnconfigured(String),

    /// `ORCH_EXECUTOR_PROVIDER` names a template that does not exist.
    #[error("unknown executor provider: {0}")]
    UnknownProvider(String),

    /// A required validation lane has no commands.
    #[error("validation misconfigured: {0}")]
    ValidationMisconfigured(String),

    /// `--allow-dirty` combined with atomic commits enabled.
    #[error("refusing to commit from a dirty worktree (--allow-dirty with commits enabled)")]
    DirtyCommitRefused,

    /// Role orchestration policy violated.
    #[error("policy violation: {0}")]
    PolicyViolation(String),
}

/// Load the config document, layered over defaults.
///
/// A missing file yields the built-in defaults; the startup assertions
/// decide whether those are sufficient for the requested command.
pub fn load(paths: &ConveyorPaths) -> Result<OrchestratorConfig, ConfigError> {
    let path = paths.config_path();
    if !path.exists() {
        return Ok(OrchestratorConfig::default());
    }
    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// CLI flag overrides, applied on top of the loaded document.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub context_threshold: Option<u64>,
    pub require_result_payload: Option<bool>,
    pub handoff_token_budget: Option<u64>,
    pub max_rollovers: Option<u32>,
    pub max_sessions_per_plan: Option<u32>,
    /// `cmd1;;cmd2` replacement for the always lane.
    pub validation: Option<String>,
    pub failure_tail_lines: Option<usize>,
    pub heartbeat_seconds: Option<u64>,
    pub stall_warn_seconds: Option<u64>,
    pub output: Option<OutputMode>,
}

impl CliOverrides {
    /// Apply the overrides in place.
    pub fn apply(&self, config: &mut OrchestratorConfig) {
        if let Some(threshold) = self.context_threshold {
            config.executor.context_threshold = threshold;
        }
        if let Some(require) = self.require_result_payload {
            config.executor.require_result_payload = require;
        }
        if let Some(budget) = self.handoff_token_budget {
            config.executor.handoff_token_budget = budget;
        }
        if let Some(rollovers) = self.max_rollovers {
            config.executor.max_rollovers = rollovers;
        }
        if let Some(sessions) = self.max_sessions_per_plan {
            config.executor.max_sessions_per_plan = sessions;
        }
        if let Some(validation) = &self.validation {
            config.validation.always = validation
                .split(";;")
                .map(str::trim)
                .filter(|cmd| !cmd.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(lines) = self.failure_tail_lines {
            config.logging.failure_tail_lines = lines;
        }
        if let Some(seconds) = self.heartbeat_seconds {
            config.logging.heartbeat_seconds = seconds;
        }
        if let Some(seconds) = self.stall_warn_seconds {
            config.logging.stall_warn_seconds = seconds;
        }
        if let Some(output) = self.output {
            config.logging.output = output;
        }
    }
}

/// Resolve the executor command template, honoring a provider override.
///
/// # Errors
///
/// - [`ConfigError::UnknownProvider`] when `ORCH_EXECUTOR_PROVIDER` names
///   a template the config does not define
/// - [`ConfigError::ExecutorUnconfigured`] when a selected provider
///   template lacks the `{prompt}` placeholder
pub fn resolve_executor_command(
    config: &OrchestratorConfig,
    env: &Env,
) -> Result<String, ConfigError> {
    if let Some(name) = env.executor_provider() {
        let template = config
            .executor
            .providers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_string()))?;
        if !template.command.contains("{prompt}") {
            return Err(ConfigError::ExecutorUnconfigured(format!(
                "provider '{name}' template must contain {{prompt}}"
            )));
        }
        return Ok(template.command.clone());
    }
    Ok(config.executor.command.clone())
}

/// Fail-closed startup assertions for `run` / `resume`.
pub fn assert_runnable(
    config: &OrchestratorConfig,
    env: &Env,
    allow_dirty: bool,
    commit: bool,
) -> Result<(), ConfigError> {
    let command = resolve_executor_command(config, env)?;
    if command.trim().is_empty() {
        return Err(ConfigError::ExecutorUnconfigured(
            "executor.command is empty".to_string(),
        ));
    }

    if !config.executor.enforce_role_model_selection {
        return Err(ConfigError::PolicyViolation(
            "executor.enforceRoleModelSelection must remain enabled".to_string(),
        ));
    }

    for (role, profile) in &config.role_orchestration.role_profiles {
        let expected = if *role == Role::Worker {
            SandboxMode::FullAccess
        } else {
            SandboxMode::ReadOnly
        };
        if profile.sandbox_mode != expected {
            return Err(ConfigError::PolicyViolation(format!(
                "role '{role}' must run {}",
                expected.as_str()
            )));
        }
    }

    if config.validation.require_always_commands && config.validation.always.is_empty() {
        return Err(ConfigError::ValidationMisconfigured(
            "always lane requires at least one command".to_string(),
        ));
    }
    if config.validation.require_host_required_commands
        && config.validation.host_required.is_empty()
    {
        return Err(ConfigError::ValidationMisconfigured(
            "hostRequired lane requires at least one command".to_string(),
        ));
    }

    if allow_dirty && commit {
        return Err(ConfigError::DirtyCommitRefused);
    }

    Ok(())
}
