//! state::run_state
//!
//! Persistent run state: one JSON object, rewritten in full after every
//! state transition.
//!
//! # Invariants
//!
//! - The cumulative sets stay disjoint (`completed ∩ failed = ∅`, and
//!   likewise for `blocked`)
//! - `last_updated` is refreshed on every save
//! - Writes are atomic (temp file + rename) so a crash never leaves a
//!   truncated state file

use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::paths::ConveyorPaths;
use crate::core::types::{AutonomyMode, PlanId, RiskTier, Role};

/// Errors from state persistence.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse run state {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One validation lane's recorded status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneStatus {
    Pending,
    Passed,
    Failed,
}

/// Per-plan validation lane state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationState {
    pub always: LaneStatus,
    pub host: LaneStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub updated_at: String,
}

impl ValidationState {
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            always: LaneStatus::Pending,
            host: LaneStatus::Pending,
            provider: None,
            reason: None,
            updated_at: now.to_rfc3339(),
        }
    }
}

/// Per-plan evidence curation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceState {
    pub index_path: String,
    pub reference_count: usize,
    /// Digest of the curated reference set, stable across reruns.
    pub signature: String,
    pub updated_at: String,
}

/// Snapshot of the risk assessment attached to a plan's role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentSnapshot {
    pub declared: RiskTier,
    pub computed: RiskTier,
    pub effective: RiskTier,
    pub score: u32,
    pub sensitive: bool,
    pub sensitive_tag_hits: u32,
    pub sensitive_path_hits: u32,
    pub reasons: Vec<String>,
}

/// Per-plan role pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleState {
    pub stages: Vec<Role>,
    /// Joined stage names; a change here resets the pipeline.
    pub stage_key: String,
    pub current_index: usize,
    pub completed_stages: Vec<Role>,
    pub assessment: AssessmentSnapshot,
    /// Scope fingerprint (dependencies, spec-targets, tags) captured at
    /// the last stage completion; stage reuse requires it unchanged.
    pub scope_key: String,
    pub updated_at: String,
}

/// Host capability probe results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySnapshot {
    pub docker_socket: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_socket_path: Option<String>,
    pub localhost_bind: bool,
    pub browser_runtime: bool,
    pub probed_at: String,
}

/// The plan + stage currently executing, when any.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InProgress {
    pub plan_id: PlanId,
    pub role: Role,
    pub session: u32,
}

/// Run counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub promotions: u32,
    pub handoffs: u32,
    pub validation_failures: u32,
    pub commits: u32,
}

/// The whole run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: String,
    pub requested_mode: AutonomyMode,
    pub effective_mode: AutonomyMode,
    pub started_at: String,
    pub last_updated: String,
    pub queue: Vec<PlanId>,
    pub completed_plan_ids: BTreeSet<PlanId>,
    pub blocked_plan_ids: BTreeSet<PlanId>,
    pub failed_plan_ids: BTreeSet<PlanId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilitySnapshot>,
    #[serde(default)]
    pub validation_state: BTreeMap<PlanId, ValidationState>,
    #[serde(default)]
    pub evidence_state: BTreeMap<PlanId, EvidenceState>,
    #[serde(default)]
    pub role_state: BTreeMap<PlanId, RoleState>,
    #[serde(default)]
    pub in_progress: Option<InProgress>,
    #[serde(default)]
    pub stats: Stats,
}

impl RunState {
    /// Fresh state for a new run.
    pub fn new(
        run_id: impl Into<String>,
        requested_mode: AutonomyMode,
        effective_mode: AutonomyMode,
        now: DateTime<Utc>,
    ) -> Self {
        let timestamp = now.to_rfc3339();
        Self {
            run_id: run_id.into(),
            requested_mode,
            effective_mode,
            started_at: timestamp.clone(),
            last_updated: timestamp,
            queue: Vec::new(),
            completed_plan_ids: BTreeSet::new(),
            blocked_plan_ids: BTreeSet::new(),
            failed_plan_ids: BTreeSet::new(),
            capabilities: None,
            validation_state: BTreeMap::new(),
            evidence_state: BTreeMap::new(),
            role_state: BTreeMap::new(),
            in_progress: None,
            stats: Stats::default(),
        }
    }

    /// Record a plan as completed, clearing it from the other sets.
    pub fn mark_completed(&mut self, id: &PlanId) {
        self.blocked_plan_ids.remove(id);
        self.failed_plan_ids.remove(id);
        self.completed_plan_ids.insert(id.clone());
    }

    /// Record a plan as blocked.
    pub fn mark_blocked(&mut self, id: &PlanId) {
        if !self.completed_plan_ids.contains(id) {
            self.failed_plan_ids.remove(id);
            self.blocked_plan_ids.insert(id.clone());
        }
    }

    /// Record a plan as failed.
    pub fn mark_failed(&mut self, id: &PlanId) {
        if !self.completed_plan_ids.contains(id) {
            self.blocked_plan_ids.remove(id);
            self.failed_plan_ids.insert(id.clone());
        }
    }

    /// Whether the cumulative sets exclude this plan from execution.
    pub fn is_settled(&self, id: &PlanId) -> bool {
        self.completed_plan_ids.contains(id)
            || self.blocked_plan_ids.contains(id)
            || self.failed_plan_ids.contains(id)
    }

    /// Refresh `last_updated`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now.to_rfc3339();
    }
}

/// Run-state persistence.
pub struct StateStore<'a> {
    paths: &'a ConveyorPaths,
    dry_run: bool,
}

impl<'a> StateStore<'a> {
    pub fn new(paths: &'a ConveyorPaths, dry_run: bool) -> Self {
        Self { paths, dry_run }
    }

    /// Load the state on disk, if any.
    pub fn load(&self) -> Result<Option<RunState>, StateError> {
        let path = self.paths.run_state_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|source| StateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StateError::Parse {
                path: path.display().to_string(),
                source,
            })
    }

    /// Rewrite the state file in full (temp file + rename).
    pub fn save(&self, state: &RunState) -> Result<(), StateError> {
        if self.dry_run {
            return Ok(());
        }
        let path = self.paths.run_state_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StateError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(state).expect("run state serializes");
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StateError::Io {
            path: tmp.display().to_string(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StateError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}
