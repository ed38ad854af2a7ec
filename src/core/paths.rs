//! core::paths
//!
//! Centralized path routing for conveyor storage locations.
//!
//! # Architecture
//!
//! Every repo-relative location the orchestrator reads or writes is
//! computed here. No code outside this module may join storage paths by
//! hand; this keeps the repository-root boundary enforceable in one
//! place.
//!
//! # Storage Layout
//!
//! Relative to the repository root:
//! - `docs/future/` - future plan documents
//! - `docs/exec-plans/active/` - active plan documents
//! - `docs/exec-plans/completed/` - completed plan documents
//! - `docs/exec-plans/evidence-index/` - canonical evidence indexes
//! - `docs/ops/automation/orchestrator.config.json` - config input
//! - `docs/ops/automation/run-state.json` - run state (rewritten)
//! - `docs/ops/automation/run-events.jsonl` - event log (appended)
//! - `docs/ops/automation/handoffs/<plan>/` - handoff notes
//! - `docs/ops/automation/runtime/<run>/` - per-run session artifacts
//! - `docs/ops/automation/runtime/orchestrator.lock.json` - run lock
//!
//! # Example
//!
//! ```
//! use conveyor::core::paths::ConveyorPaths;
//! use std::path::PathBuf;
//!
//! let paths = ConveyorPaths::new(PathBuf::from("/repo"));
//! assert_eq!(
//!     paths.run_state_path(),
//!     PathBuf::from("/repo/docs/ops/automation/run-state.json")
//! );
//! ```

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::core::types::{PlanId, Role};

/// Errors from path routing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// A path escapes the repository root.
    #[error("unsafe path: {0}")]
    UnsafePath(String),
}

/// Centralized path routing for conveyor storage.
///
/// # Invariants
///
/// - All storage paths are computed from the repository root
/// - [`ConveyorPaths::safe_join`] is the only way to resolve
///   caller-supplied relative paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConveyorPaths {
    repo_root: PathBuf,
}

impl ConveyorPaths {
    /// Create path routing rooted at a repository root.
    pub fn new(repo_root: PathBuf) -> Self {
        Self { repo_root }
    }

    /// The repository root.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Resolve a repo-relative path, refusing absolute paths and any
    /// `..` component.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::UnsafePath`] for absolute paths or paths
    /// containing parent-directory traversal.
    ///
    /// # Example
    ///
    /// ```
    /// use conveyor::core::paths::ConveyorPaths;
    /// use std::path::PathBuf;
    ///
    /// let paths = ConveyorPaths::new(PathBuf::from("/repo"));
    /// assert!(paths.safe_join("docs/specs/a.md").is_ok());
    /// assert!(paths.safe_join("/etc/passwd").is_err());
    /// assert!(paths.safe_join("../outside").is_err());
    /// ```
    pub fn safe_join(&self, relative: &str) -> Result<PathBuf, PathError> {
        let candidate = Path::new(relative);
        if candidate.is_absolute() {
            return Err(PathError::UnsafePath(format!(
                "absolute path not allowed: {relative}"
            )));
        }
        for component in candidate.components() {
            match component {
                Component::ParentDir => {
                    return Err(PathError::UnsafePath(format!(
                        "parent traversal not allowed: {relative}"
                    )));
                }
                Component::Prefix(_) | Component::RootDir => {
                    return Err(PathError::UnsafePath(format!(
                        "absolute path not allowed: {relative}"
                    )));
                }
                Component::CurDir | Component::Normal(_) => {}
            }
        }
        Ok(self.repo_root.join(candidate))
    }

    /// Express an absolute path under the repo root as repo-relative.
    ///
    /// Returns `None` when the path is outside the repository.
    pub fn relative_to_root(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(&self.repo_root).ok().map(PathBuf::from)
    }

    // =========================================================================
    // Plan directories
    // =========================================================================

    /// Directory of future plan documents.
    pub fn future_dir(&self) -> PathBuf {
        self.repo_root.join("docs").join("future")
    }

    /// Directory of active plan documents.
    pub fn active_dir(&self) -> PathBuf {
        self.exec_plans_dir().join("active")
    }

    /// Directory of completed plan documents.
    pub fn completed_dir(&self) -> PathBuf {
        self.exec_plans_dir().join("completed")
    }

    /// Root of the exec-plans tree.
    pub fn exec_plans_dir(&self) -> PathBuf {
        self.repo_root.join("docs").join("exec-plans")
    }

    /// Directory of product-spec documents (delivery-log targets).
    pub fn product_specs_dir(&self) -> PathBuf {
        self.repo_root.join("docs").join("product-specs")
    }

    // =========================================================================
    // Automation storage
    // =========================================================================

    /// Root of the automation storage tree.
    pub fn automation_dir(&self) -> PathBuf {
        self.repo_root.join("docs").join("ops").join("automation")
    }

    /// The orchestrator config document.
    pub fn config_path(&self) -> PathBuf {
        self.automation_dir().join("orchestrator.config.json")
    }

    /// The run-state file (rewritten in full per transition).
    pub fn run_state_path(&self) -> PathBuf {
        self.automation_dir().join("run-state.json")
    }

    /// The append-only event log.
    pub fn events_path(&self) -> PathBuf {
        self.automation_dir().join("run-events.jsonl")
    }

    /// Root of runtime storage (per-run artifacts and the lock).
    pub fn runtime_dir(&self) -> PathBuf {
        self.automation_dir().join("runtime")
    }

    /// Per-run artifact directory.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runtime_dir().join(run_id)
    }

    /// The exclusive run lock record.
    pub fn lock_path(&self) -> PathBuf {
        self.runtime_dir().join("orchestrator.lock.json")
    }

    /// Handoff notes directory for a plan.
    pub fn handoff_dir(&self, plan_id: &PlanId) -> PathBuf {
        self.automation_dir().join("handoffs").join(plan_id.as_str())
    }

    /// Result payload path for one session attempt.
    ///
    /// Distinct per attempt so reruns cannot read a stale payload.
    pub fn session_result_path(
        &self,
        run_id: &str,
        plan_id: &PlanId,
        role: Role,
        session: u32,
    ) -> PathBuf {
        self.run_dir(run_id).join(format!(
            "{}-{}-session-{}.result.json",
            plan_id.as_str(),
            role.as_str(),
            session
        ))
    }

    /// Captured-output log path for one session attempt.
    pub fn session_log_path(
        &self,
        run_id: &str,
        plan_id: &PlanId,
        role: Role,
        session: u32,
    ) -> PathBuf {
        self.run_dir(run_id).join(format!(
            "{}-{}-session-{}.executor.log",
            plan_id.as_str(),
            role.as_str(),
            session
        ))
    }

    /// Host-validation payload path for one attempt.
    pub fn host_validation_result_path(&self, run_id: &str, plan_id: &PlanId) -> PathBuf {
        self.run_dir(run_id)
            .join(format!("{}-host-validation.result.json", plan_id.as_str()))
    }

    // =========================================================================
    // Evidence
    // =========================================================================

    /// Directory of canonical evidence indexes.
    pub fn evidence_index_dir(&self) -> PathBuf {
        self.exec_plans_dir().join("evidence-index")
    }

    /// Canonical evidence index for a plan.
    pub fn evidence_index_path(&self, plan_id: &PlanId) -> PathBuf {
        self.evidence_index_dir()
            .join(format!("{}.md", plan_id.as_str()))
    }

    /// The evidence index directory README.
    pub fn evidence_index_readme(&self) -> PathBuf {
        self.evidence_index_dir().join("README.md")
    }

    /// The repo-relative form of a plan's canonical evidence index.
    ///
    /// This exact string is written into `Done-Evidence` on completion.
    pub fn evidence_index_reference(&self, plan_id: &PlanId) -> String {
        format!("docs/exec-plans/evidence-index/{}.md", plan_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> ConveyorPaths {
        ConveyorPaths::new(PathBuf::from("/repo"))
    }

    mod layout {
        use super::*;

        #[test]
        fn plan_directories() {
            let p = paths();
            assert_eq!(p.future_dir(), PathBuf::from("/repo/docs/future"));
            assert_eq!(p.active_dir(), PathBuf::from("/repo/docs/exec-plans/active"));
            assert_eq!(
                p.completed_dir(),
                PathBuf::from("/repo/docs/exec-plans/completed")
            );
        }

        #[test]
        fn automation_files() {
            let p = paths();
            assert_eq!(
                p.config_path(),
                PathBuf::from("/repo/docs/ops/automation/orchestrator.config.json")
            );
            assert_eq!(
                p.events_path(),
                PathBuf::from("/repo/docs/ops/automation/run-events.jsonl")
            );
            assert_eq!(
                p.lock_path(),
                PathBuf::from("/repo/docs/ops/automation/runtime/orchestrator.lock.json")
            );
        }

        #[test]
        fn session_paths_are_distinct_per_attempt() {
            let p = paths();
            let id = PlanId::new("fix-footer").unwrap();
            let first = p.session_result_path("run-1", &id, Role::Worker, 1);
            let second = p.session_result_path("run-1", &id, Role::Worker, 2);
            assert_ne!(first, second);
            assert!(first
                .to_string_lossy()
                .ends_with("fix-footer-worker-session-1.result.json"));
        }

        #[test]
        fn evidence_index_reference_is_repo_relative() {
            let p = paths();
            let id = PlanId::new("fix-footer").unwrap();
            assert_eq!(
                p.evidence_index_reference(&id),
                "docs/exec-plans/evidence-index/fix-footer.md"
            );
        }
    }

    mod safe_join {
        use super::*;

        #[test]
        fn accepts_repo_relative() {
            let p = paths();
            assert_eq!(
                p.safe_join("docs/specs/a.md").unwrap(),
                PathBuf::from("/repo/docs/specs/a.md")
            );
        }

        #[test]
        fn accepts_curdir_prefix() {
            let p = paths();
            assert_eq!(
                p.safe_join("./docs/a.md").unwrap(),
                PathBuf::from("/repo/docs/a.md")
            );
        }

        #[test]
        fn rejects_absolute() {
            assert!(matches!(
                paths().safe_join("/etc/passwd"),
                Err(PathError::UnsafePath(_))
            ));
        }

        #[test]
        fn rejects_parent_traversal() {
            assert!(matches!(
                paths().safe_join("../outside"),
                Err(PathError::UnsafePath(_))
            ));
            assert!(matches!(
                paths().safe_join("docs/../../outside"),
                Err(PathError::UnsafePath(_))
            ));
        }
    }

    mod relative_to_root {
        use super::*;

        #[test]
        fn strips_root_prefix() {
            let p = paths();
            assert_eq!(
                p.relative_to_root(Path::new("/repo/docs/a.md")),
                Some(PathBuf::from("docs/a.md"))
            );
        }

        #[test]
        fn outside_root_is_none() {
            assert_eq!(paths().relative_to_root(Path::new("/other/a.md")), None);
        }
    }
}
