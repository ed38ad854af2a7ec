//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`PlanId`] - Validated plan identifier (lowercase kebab-case)
//! - [`PlanStatus`] - Top-level document status
//! - [`PlanPhase`] - Which directory a plan lives in
//! - [`Priority`] - Scheduling priority (`p0` highest)
//! - [`RiskTier`] - Declared or computed risk tier
//! - [`AutonomyMode`] / [`AutonomyAllowed`] - Run mode and per-plan policy
//! - [`SecurityApproval`] - Security-ops sign-off state
//! - [`Role`] - Pipeline role (planner, explorer, worker, reviewer)
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, preventing entire classes of bugs.
//!
//! # Examples
//!
//! ```
//! use conveyor::core::types::{PlanId, Priority, RiskTier};
//!
//! let id = PlanId::new("fix-footer").unwrap();
//! assert_eq!(id.as_str(), "fix-footer");
//!
//! // Invalid constructions fail at creation time
//! assert!(PlanId::new("Fix Footer").is_err());
//! assert!(PlanId::new("-leading").is_err());
//!
//! assert!(Priority::P0 < Priority::P3);
//! assert!(RiskTier::Low < RiskTier::High);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid plan id: {0}")]
    InvalidPlanId(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("invalid risk tier: {0}")]
    InvalidRiskTier(String),

    #[error("invalid autonomy value: {0}")]
    InvalidAutonomy(String),

    #[error("invalid security approval: {0}")]
    InvalidSecurityApproval(String),

    #[error("invalid role: {0}")]
    InvalidRole(String),
}

/// A validated plan identifier.
///
/// Plan IDs are lowercase kebab-case and globally unique across all
/// phases:
/// - Cannot be empty
/// - Segments of `[a-z0-9]+` joined by single `-`
/// - Cannot start or end with `-`, cannot contain `--`
///
/// # Example
///
/// ```
/// use conveyor::core::types::PlanId;
///
/// let id = PlanId::new("refactor-auth-2").unwrap();
/// assert_eq!(id.as_str(), "refactor-auth-2");
///
/// assert!(PlanId::new("").is_err());
/// assert!(PlanId::new("UPPER").is_err());
/// assert!(PlanId::new("double--dash").is_err());
/// assert!(PlanId::new("trailing-").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlanId(String);

impl PlanId {
    /// Create a new validated plan id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidPlanId` if the id is not lowercase
    /// kebab-case.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    fn validate(id: &str) -> Result<(), TypeError> {
        if id.is_empty() {
            return Err(TypeError::InvalidPlanId("plan id cannot be empty".into()));
        }
        if id.starts_with('-') || id.ends_with('-') {
            return Err(TypeError::InvalidPlanId(format!(
                "plan id cannot start or end with '-': {id}"
            )));
        }
        if id.contains("--") {
            return Err(TypeError::InvalidPlanId(format!(
                "plan id cannot contain '--': {id}"
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(TypeError::InvalidPlanId(format!(
                "plan id must be lowercase kebab-case: {id}"
            )));
        }
        Ok(())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PlanId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PlanId> for String {
    fn from(id: PlanId) -> Self {
        id.0
    }
}

/// Top-level document status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanStatus {
    Draft,
    ReadyForPromotion,
    Queued,
    InProgress,
    Blocked,
    Validation,
    Failed,
    Completed,
}

impl PlanStatus {
    /// Parse from the document spelling (`ready-for-promotion` etc.).
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        match s {
            "draft" => Ok(PlanStatus::Draft),
            "ready-for-promotion" => Ok(PlanStatus::ReadyForPromotion),
            "queued" => Ok(PlanStatus::Queued),
            "in-progress" => Ok(PlanStatus::InProgress),
            "blocked" => Ok(PlanStatus::Blocked),
            "validation" => Ok(PlanStatus::Validation),
            "failed" => Ok(PlanStatus::Failed),
            "completed" => Ok(PlanStatus::Completed),
            other => Err(TypeError::InvalidStatus(other.to_string())),
        }
    }

    /// The document spelling of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "draft",
            PlanStatus::ReadyForPromotion => "ready-for-promotion",
            PlanStatus::Queued => "queued",
            PlanStatus::InProgress => "in-progress",
            PlanStatus::Blocked => "blocked",
            PlanStatus::Validation => "validation",
            PlanStatus::Failed => "failed",
            PlanStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which directory a plan document lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanPhase {
    Future,
    Active,
    Completed,
}

impl PlanPhase {
    /// Check whether a status is valid for this phase.
    ///
    /// Future plans are drafts or promotion candidates; active plans are
    /// anywhere in the execution lifecycle; completed plans are terminal.
    pub fn permits(&self, status: PlanStatus) -> bool {
        match self {
            PlanPhase::Future => {
                matches!(status, PlanStatus::Draft | PlanStatus::ReadyForPromotion)
            }
            PlanPhase::Active => {
                !matches!(status, PlanStatus::Draft | PlanStatus::ReadyForPromotion)
            }
            PlanPhase::Completed => matches!(status, PlanStatus::Completed),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanPhase::Future => "future",
            PlanPhase::Active => "active",
            PlanPhase::Completed => "completed",
        }
    }
}

impl fmt::Display for PlanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. `P0` sorts before `P3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl Priority {
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        match s {
            "p0" => Ok(Priority::P0),
            "p1" => Ok(Priority::P1),
            "p2" => Ok(Priority::P2),
            "p3" => Ok(Priority::P3),
            other => Err(TypeError::InvalidPriority(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P0 => "p0",
            Priority::P1 => "p1",
            Priority::P2 => "p2",
            Priority::P3 => "p3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk tier. Ordered so `max(declared, computed)` is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        match s {
            "low" => Ok(RiskTier::Low),
            "medium" => Ok(RiskTier::Medium),
            "high" => Ok(RiskTier::High),
            other => Err(TypeError::InvalidRiskTier(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run autonomy mode requested via `--mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyMode {
    Guarded,
    Full,
}

impl AutonomyMode {
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        match s {
            "guarded" => Ok(AutonomyMode::Guarded),
            "full" => Ok(AutonomyMode::Full),
            other => Err(TypeError::InvalidAutonomy(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyMode::Guarded => "guarded",
            AutonomyMode::Full => "full",
        }
    }
}

impl fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-plan autonomy policy (`Autonomy-Allowed` metadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyAllowed {
    Guarded,
    Full,
    Both,
}

impl AutonomyAllowed {
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        match s {
            "guarded" => Ok(AutonomyAllowed::Guarded),
            "full" => Ok(AutonomyAllowed::Full),
            "both" => Ok(AutonomyAllowed::Both),
            other => Err(TypeError::InvalidAutonomy(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyAllowed::Guarded => "guarded",
            AutonomyAllowed::Full => "full",
            AutonomyAllowed::Both => "both",
        }
    }

    /// Check whether this policy permits running under `mode`.
    ///
    /// A plan restricted to `guarded` refuses full-autonomy runs, and a
    /// plan that requires `full` refuses guarded runs. `both` permits
    /// either mode.
    pub fn permits(&self, mode: AutonomyMode) -> bool {
        match self {
            AutonomyAllowed::Both => true,
            AutonomyAllowed::Guarded => mode == AutonomyMode::Guarded,
            AutonomyAllowed::Full => mode == AutonomyMode::Full,
        }
    }
}

impl fmt::Display for AutonomyAllowed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Security-ops sign-off state (`Security-Approval` metadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityApproval {
    NotRequired,
    Pending,
    Approved,
}

impl SecurityApproval {
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        match s {
            "not-required" => Ok(SecurityApproval::NotRequired),
            "pending" => Ok(SecurityApproval::Pending),
            "approved" => Ok(SecurityApproval::Approved),
            other => Err(TypeError::InvalidSecurityApproval(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityApproval::NotRequired => "not-required",
            SecurityApproval::Pending => "pending",
            SecurityApproval::Approved => "approved",
        }
    }
}

impl fmt::Display for SecurityApproval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline role. Each stage of a plan's pipeline is one role invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Planner,
    Explorer,
    Worker,
    Reviewer,
}

impl Role {
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        match s {
            "planner" => Ok(Role::Planner),
            "explorer" => Ok(Role::Explorer),
            "worker" => Ok(Role::Worker),
            "reviewer" => Ok(Role::Reviewer),
            other => Err(TypeError::InvalidRole(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::Explorer => "explorer",
            Role::Worker => "worker",
            Role::Reviewer => "reviewer",
        }
    }

    /// Whether completions of this role may be reused across sessions
    /// when the pipeline and plan scope are unchanged.
    pub fn reusable(&self) -> bool {
        matches!(self, Role::Planner | Role::Explorer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod plan_id {
        use super::*;

        #[test]
        fn accepts_kebab_case() {
            for valid in ["fix-footer", "a", "plan-2", "x1-y2-z3"] {
                assert!(PlanId::new(valid).is_ok(), "{valid} should be valid");
            }
        }

        #[test]
        fn rejects_invalid() {
            for invalid in [
                "",
                "Upper-Case",
                "under_score",
                "-leading",
                "trailing-",
                "double--dash",
                "has space",
                "dot.sep",
            ] {
                assert!(PlanId::new(invalid).is_err(), "{invalid} should be rejected");
            }
        }

        #[test]
        fn serde_roundtrip() {
            let id = PlanId::new("fix-footer").unwrap();
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, "\"fix-footer\"");
            let parsed: PlanId = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, id);
        }

        #[test]
        fn serde_rejects_invalid() {
            let result: Result<PlanId, _> = serde_json::from_str("\"Not Valid\"");
            assert!(result.is_err());
        }
    }

    mod status {
        use super::*;

        #[test]
        fn parse_roundtrip() {
            for s in [
                "draft",
                "ready-for-promotion",
                "queued",
                "in-progress",
                "blocked",
                "validation",
                "failed",
                "completed",
            ] {
                let status = PlanStatus::parse(s).unwrap();
                assert_eq!(status.as_str(), s);
            }
        }

        #[test]
        fn parse_rejects_unknown() {
            assert!(PlanStatus::parse("done").is_err());
        }
    }

    mod phase {
        use super::*;

        #[test]
        fn future_permits_draft_states_only() {
            assert!(PlanPhase::Future.permits(PlanStatus::Draft));
            assert!(PlanPhase::Future.permits(PlanStatus::ReadyForPromotion));
            assert!(!PlanPhase::Future.permits(PlanStatus::Queued));
        }

        #[test]
        fn active_rejects_draft_states() {
            assert!(PlanPhase::Active.permits(PlanStatus::Queued));
            assert!(PlanPhase::Active.permits(PlanStatus::Validation));
            assert!(!PlanPhase::Active.permits(PlanStatus::Draft));
        }

        #[test]
        fn completed_is_terminal() {
            assert!(PlanPhase::Completed.permits(PlanStatus::Completed));
            assert!(!PlanPhase::Completed.permits(PlanStatus::InProgress));
        }
    }

    mod priority {
        use super::*;

        #[test]
        fn ordering() {
            assert!(Priority::P0 < Priority::P1);
            assert!(Priority::P1 < Priority::P2);
            assert!(Priority::P2 < Priority::P3);
        }

        #[test]
        fn parse_roundtrip() {
            for s in ["p0", "p1", "p2", "p3"] {
                assert_eq!(Priority::parse(s).unwrap().as_str(), s);
            }
            assert!(Priority::parse("p4").is_err());
        }
    }

    mod risk_tier {
        use super::*;

        #[test]
        fn ordering_supports_max() {
            assert_eq!(RiskTier::Low.max(RiskTier::High), RiskTier::High);
            assert_eq!(RiskTier::Medium.max(RiskTier::Medium), RiskTier::Medium);
        }
    }

    mod autonomy {
        use super::*;

        #[test]
        fn both_permits_either_mode() {
            assert!(AutonomyAllowed::Both.permits(AutonomyMode::Guarded));
            assert!(AutonomyAllowed::Both.permits(AutonomyMode::Full));
        }

        #[test]
        fn guarded_refuses_full() {
            assert!(!AutonomyAllowed::Guarded.permits(AutonomyMode::Full));
            assert!(AutonomyAllowed::Guarded.permits(AutonomyMode::Guarded));
        }

        #[test]
        fn full_refuses_guarded() {
            assert!(!AutonomyAllowed::Full.permits(AutonomyMode::Guarded));
            assert!(AutonomyAllowed::Full.permits(AutonomyMode::Full));
        }
    }

    mod role {
        use super::*;

        #[test]
        fn only_planner_and_explorer_are_reusable() {
            assert!(Role::Planner.reusable());
            assert!(Role::Explorer.reusable());
            assert!(!Role::Worker.reusable());
            assert!(!Role::Reviewer.reusable());
        }
    }
}
