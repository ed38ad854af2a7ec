//! config::model
//!
//! Serde model for the orchestrator config document.
//!
//! # Layering
//!
//! The config file is JSON. Every field carries a serde default, so a
//! partial document layers over the built-in defaults and an absent file
//! yields the defaults outright. Fail-closed checks live in
//! [`crate::config`], not here; this module only describes the shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{Role, RiskTier};
use crate::ui::output::OutputMode;

/// Reasoning effort requested from a role's model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// Sandbox policy for a role's sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    FullAccess,
}

impl SandboxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxMode::ReadOnly => "read-only",
            SandboxMode::FullAccess => "full-access",
        }
    }
}

/// Host-validation provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostMode {
    Ci,
    Local,
    Hybrid,
}

impl HostMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostMode::Ci => "ci",
            HostMode::Local => "local",
            HostMode::Hybrid => "hybrid",
        }
    }
}

/// The merged orchestrator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    pub executor: ExecutorConfig,
    pub validation: ValidationConfig,
    pub role_orchestration: RoleOrchestrationConfig,
    pub evidence: EvidenceConfig,
    pub logging: LoggingConfig,
    pub parallel: ParallelConfig,
}

/// Executor session knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    /// Shell template rendered per session. Placeholders: `{plan_id}`,
    /// `{plan_file}`, `{run_id}`, `{mode}`, `{session}`, `{role}`,
    /// `{effective_risk_tier}`, `{declared_risk_tier}`, `{stage_index}`,
    /// `{stage_total}`, `{result_path}`.
    pub command: String,
    /// Named provider templates selectable via `ORCH_EXECUTOR_PROVIDER`.
    pub providers: BTreeMap<String, ProviderTemplate>,
    pub handoff_exit_code: i32,
    pub timeout_seconds: u64,
    pub context_threshold: u64,
    pub handoff_token_budget: u64,
    pub require_result_payload: bool,
    pub enforce_role_model_selection: bool,
    pub max_sessions_per_plan: u32,
    pub max_rollovers: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            providers: BTreeMap::new(),
            handoff_exit_code: 75,
            timeout_seconds: 1800,
            context_threshold: 10_000,
            handoff_token_budget: 10_000,
            require_result_payload: true,
            enforce_role_model_selection: true,
            max_sessions_per_plan: 20,
            max_rollovers: 20,
        }
    }
}

/// A named executor provider template.
///
/// Provider templates additionally recognize `{prompt}`, which renders
/// the active role profile's instructions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderTemplate {
    pub command: String,
}

/// Validation lane configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationConfig {
    /// Sandbox-safe commands, run in-process for every completing plan.
    pub always: Vec<String>,
    /// Commands that need host capabilities, run through a provider.
    pub host_required: Vec<String>,
    pub require_always_commands: bool,
    pub require_host_required_commands: bool,
    pub timeout_seconds: u64,
    pub host: HostValidationConfig,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            always: Vec::new(),
            host_required: Vec::new(),
            require_always_commands: true,
            require_host_required_commands: true,
            timeout_seconds: 600,
            host: HostValidationConfig::default(),
        }
    }
}

/// Host-validation provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostValidationConfig {
    pub mode: HostMode,
    pub ci: HostLaneConfig,
    pub local: HostLaneConfig,
}

impl Default for HostValidationConfig {
    fn default() -> Self {
        Self {
            mode: HostMode::Hybrid,
            ci: HostLaneConfig::default(),
            local: HostLaneConfig::default(),
        }
    }
}

/// One host-validation lane (driver command plus timeout override).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostLaneConfig {
    pub command: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Role orchestration: profiles, pipelines, risk model, approval gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleOrchestrationConfig {
    pub enabled: bool,
    pub role_profiles: BTreeMap<Role, RoleProfile>,
    pub pipelines: PipelinesConfig,
    pub risk_model: RiskModelConfig,
    pub approval_gates: ApprovalGatesConfig,
}

impl Default for RoleOrchestrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            role_profiles: default_role_profiles(),
            pipelines: PipelinesConfig::default(),
            risk_model: RiskModelConfig::default(),
            approval_gates: ApprovalGatesConfig::default(),
        }
    }
}

fn default_role_profiles() -> BTreeMap<Role, RoleProfile> {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        Role::Planner,
        RoleProfile {
            model: "default".to_string(),
            reasoning_effort: ReasoningEffort::High,
            sandbox_mode: SandboxMode::ReadOnly,
            instructions: "Break the plan into concrete, verifiable steps.".to_string(),
        },
    );
    profiles.insert(
        Role::Explorer,
        RoleProfile {
            model: "default".to_string(),
            reasoning_effort: ReasoningEffort::Medium,
            sandbox_mode: SandboxMode::ReadOnly,
            instructions: "Survey the affected code and record findings.".to_string(),
        },
    );
    profiles.insert(
        Role::Worker,
        RoleProfile {
            model: "default".to_string(),
            reasoning_effort: ReasoningEffort::Medium,
            sandbox_mode: SandboxMode::FullAccess,
            instructions: "Implement the plan and keep the document current.".to_string(),
        },
    );
    profiles.insert(
        Role::Reviewer,
        RoleProfile {
            model: "default".to_string(),
            reasoning_effort: ReasoningEffort::High,
            sandbox_mode: SandboxMode::ReadOnly,
            instructions: "Review the changes against the acceptance criteria.".to_string(),
        },
    );
    profiles
}

/// Per-role execution profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleProfile {
    pub model: String,
    pub reasoning_effort: ReasoningEffort,
    pub sandbox_mode: SandboxMode,
    pub instructions: String,
}

/// Ordered role sequences per risk tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelinesConfig {
    pub low: Vec<Role>,
    pub medium: Vec<Role>,
    pub high: Vec<Role>,
}

impl Default for PipelinesConfig {
    fn default() -> Self {
        Self {
            low: vec![Role::Worker],
            medium: vec![Role::Planner, Role::Worker, Role::Reviewer],
            high: vec![Role::Planner, Role::Explorer, Role::Worker, Role::Reviewer],
        }
    }
}

impl PipelinesConfig {
    /// The role sequence for a risk tier.
    pub fn for_tier(&self, tier: RiskTier) -> &[Role] {
        match tier {
            RiskTier::Low => &self.low,
            RiskTier::Medium => &self.medium,
            RiskTier::High => &self.high,
        }
    }
}

/// Risk scoring thresholds and weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskModelConfig {
    pub thresholds: RiskThresholds,
    pub weights: RiskWeights,
    pub sensitive_tags: Vec<String>,
    pub sensitive_paths: Vec<String>,
}

impl Default for RiskModelConfig {
    fn default() -> Self {
        Self {
            thresholds: RiskThresholds::default(),
            weights: RiskWeights::default(),
            sensitive_tags: Vec::new(),
            sensitive_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskThresholds {
    pub medium: u32,
    pub high: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self { medium: 3, high: 6 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskWeights {
    pub declared_medium: u32,
    pub declared_high: u32,
    pub dependency: u32,
    pub sensitive_tag: u32,
    pub sensitive_path: u32,
    pub autonomy_full: u32,
    pub validation_failure: u32,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            declared_medium: 2,
            declared_high: 4,
            dependency: 1,
            sensitive_tag: 2,
            sensitive_path: 2,
            autonomy_full: 1,
            validation_failure: 2,
        }
    }
}

/// Security-ops approval gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApprovalGatesConfig {
    pub require_security_ops_for_high: bool,
    pub require_security_ops_for_medium_if_sensitive: bool,
    pub security_approval_metadata_field: String,
}

impl Default for ApprovalGatesConfig {
    fn default() -> Self {
        Self {
            require_security_ops_for_high: true,
            require_security_ops_for_medium_if_sensitive: true,
            security_approval_metadata_field: "Security-Approval".to_string(),
        }
    }
}

/// Evidence compaction and lifecycle knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvidenceConfig {
    pub compaction: EvidenceCompaction,
    pub lifecycle: EvidenceLifecycle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvidenceCompaction {
    pub mode: String,
    pub max_references: usize,
}

impl Default for EvidenceCompaction {
    fn default() -> Self {
        Self {
            mode: "compact-index".to_string(),
            max_references: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvidenceLifecycle {
    pub track_mode: String,
    pub dedup_mode: String,
    pub prune_on_complete: bool,
    pub keep_max_per_blocker: usize,
}

impl Default for EvidenceLifecycle {
    fn default() -> Self {
        Self {
            track_mode: "curated".to_string(),
            dedup_mode: "strict-upsert".to_string(),
            prune_on_complete: true,
            keep_max_per_blocker: 1,
        }
    }
}

/// Operator-facing logging knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub output: OutputMode,
    pub failure_tail_lines: usize,
    pub heartbeat_seconds: u64,
    pub stall_warn_seconds: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            output: OutputMode::Pretty,
            failure_tail_lines: 20,
            heartbeat_seconds: 10,
            stall_warn_seconds: 120,
        }
    }
}

/// Parallel-mode worktree knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParallelConfig {
    pub worktree_root: String,
    pub branch_prefix: String,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            worktree_root: ".conveyor/worktrees".to_string(),
            branch_prefix: "exec/".to_string(),
        }
    }
}
