//! plan::catalog
//!
//! Catalog loading: walk the three plan directories, parse metadata,
//! and enforce catalog-wide invariants.
//!
//! # Invariants
//!
//! - Every plan id is globally unique across `future ∪ active ∪ completed`
//! - Every dependency resolves to a plan in that union
//! - Every `Spec-Targets` entry resolves inside the repository root
//!
//! Violations are fatal at load: the orchestrator refuses to start on a
//! catalog it cannot trust.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::paths::{ConveyorPaths, PathError};
use crate::core::types::{PlanId, PlanPhase, PlanStatus, TypeError};

use super::metadata::{MetadataError, PlanMetadata};

/// Errors from catalog loading.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Directory walk or file read failed.
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A plan id (explicit or derived from the filename) is invalid.
    #[error("invalid plan id in {path}: {source}")]
    InvalidPlanId {
        path: String,
        #[source]
        source: TypeError,
    },

    /// Metadata block failed to parse.
    #[error("invalid metadata in {path}: {source}")]
    Metadata {
        path: String,
        #[source]
        source: MetadataError,
    },

    /// The same plan id appears twice across the catalog.
    #[error("duplicate plan id '{plan_id}' ({first} and {second})")]
    DuplicatePlanId {
        plan_id: PlanId,
        first: String,
        second: String,
    },

    /// A `Spec-Targets` entry escapes the repository root.
    #[error("unsafe spec target '{target}' in plan '{plan_id}': {source}")]
    UnsafePath {
        plan_id: PlanId,
        target: String,
        #[source]
        source: PathError,
    },

    /// A dependency names a plan that does not exist anywhere.
    #[error("plan '{plan_id}' depends on unknown plan '{dependency}'")]
    MissingDependency { plan_id: PlanId, dependency: PlanId },
}

/// One plan document, located and parsed.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: PlanId,
    pub phase: PlanPhase,
    pub path: PathBuf,
    pub metadata: PlanMetadata,
}

impl Plan {
    /// The document's top-level status.
    pub fn status(&self) -> PlanStatus {
        self.metadata.status
    }

    /// Whether the document status violates its phase constraint.
    pub fn status_violation(&self) -> bool {
        !self.phase.permits(self.metadata.status)
    }
}

/// The loaded catalog, split by phase.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub future: Vec<Plan>,
    pub active: Vec<Plan>,
    pub completed: Vec<Plan>,
}

impl Catalog {
    /// Load and validate the catalog.
    pub fn load(paths: &ConveyorPaths) -> Result<Self, CatalogError> {
        let mut catalog = Catalog {
            future: load_phase(&paths.future_dir(), PlanPhase::Future)?,
            active: load_phase(&paths.active_dir(), PlanPhase::Active)?,
            completed: load_phase(&paths.completed_dir(), PlanPhase::Completed)?,
        };
        catalog.validate(paths)?;
        // Deterministic ordering within each phase.
        catalog.future.sort_by(|a, b| a.path.cmp(&b.path));
        catalog.active.sort_by(|a, b| a.path.cmp(&b.path));
        catalog.completed.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(catalog)
    }

    /// All plans across the three phases.
    pub fn all(&self) -> impl Iterator<Item = &Plan> {
        self.future
            .iter()
            .chain(self.active.iter())
            .chain(self.completed.iter())
    }

    /// Look up a plan anywhere in the catalog.
    pub fn get(&self, id: &PlanId) -> Option<&Plan> {
        self.all().find(|plan| &plan.id == id)
    }

    /// Whether any phase contains this id.
    pub fn contains(&self, id: &PlanId) -> bool {
        self.get(id).is_some()
    }

    fn validate(&self, paths: &ConveyorPaths) -> Result<(), CatalogError> {
        // Global id uniqueness.
        let mut seen: Vec<&Plan> = Vec::new();
        for plan in self.all() {
            if let Some(first) = seen.iter().find(|existing| existing.id == plan.id) {
                return Err(CatalogError::DuplicatePlanId {
                    plan_id: plan.id.clone(),
                    first: first.path.display().to_string(),
                    second: plan.path.display().to_string(),
                });
            }
            seen.push(plan);
        }

        for plan in self.all() {
            // Spec targets stay inside the repository root.
            for target in &plan.metadata.spec_targets {
                if let Err(source) = paths.safe_join(target) {
                    return Err(CatalogError::UnsafePath {
                        plan_id: plan.id.clone(),
                        target: target.clone(),
                        source,
                    });
                }
            }

            // Dependencies resolve somewhere in the union.
            for dependency in &plan.metadata.dependencies {
                if !self.contains(dependency) {
                    return Err(CatalogError::MissingDependency {
                        plan_id: plan.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn load_phase(dir: &Path, phase: PlanPhase) -> Result<Vec<Plan>, CatalogError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| CatalogError::Io {
            path: dir.display().to_string(),
            source,
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name != "README.md")
        })
        .collect();
    entries.sort();

    let mut plans = Vec::with_capacity(entries.len());
    for path in entries {
        let content = fs::read_to_string(&path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let metadata = PlanMetadata::parse(&content).map_err(|source| CatalogError::Metadata {
            path: path.display().to_string(),
            source,
        })?;
        let id = derive_plan_id(&path, &metadata).map_err(|source| CatalogError::InvalidPlanId {
            path: path.display().to_string(),
            source,
        })?;
        plans.push(Plan {
            id,
            phase,
            path,
            metadata,
        });
    }
    Ok(plans)
}

/// Derive a plan's id: the explicit `Plan-ID` field wins, else the file
/// basename with any `YYYY-MM-DD-` prefix stripped.
pub fn derive_plan_id(path: &Path, metadata: &PlanMetadata) -> Result<PlanId, TypeError> {
    if let Some(id) = &metadata.plan_id {
        return Ok(id.clone());
    }
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    PlanId::new(strip_date_prefix(stem))
}

/// Strip a leading `YYYY-MM-DD-` prefix, if present.
pub fn strip_date_prefix(stem: &str) -> &str {
    let bytes = stem.as_bytes();
    if bytes.len() > 11
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
        && bytes[10] == b'-'
    {
        &stem[11..]
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_plan(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fixture() -> (TempDir, ConveyorPaths) {
        let dir = TempDir::new().unwrap();
        let paths = ConveyorPaths::new(dir.path().to_path_buf());
        (dir, paths)
    }

    mod date_prefix {
        use super::*;

        #[test]
        fn strips_valid_prefix() {
            assert_eq!(strip_date_prefix("2026-08-01-fix-footer"), "fix-footer");
        }

        #[test]
        fn leaves_other_stems_alone() {
            assert_eq!(strip_date_prefix("fix-footer"), "fix-footer");
            assert_eq!(strip_date_prefix("20-08-01-x"), "20-08-01-x");
        }
    }

    mod loading {
        use super::*;

        #[test]
        fn loads_three_phases() {
            let (dir, paths) = fixture();
            write_plan(
                dir.path(),
                "docs/future/new-idea.md",
                "Plan-ID: new-idea\nStatus: draft\n",
            );
            write_plan(
                dir.path(),
                "docs/exec-plans/active/2026-08-01-fix-footer.md",
                "Status: queued\n",
            );
            write_plan(
                dir.path(),
                "docs/exec-plans/completed/2026-07-01-old-work.md",
                "Status: completed\n",
            );

            let catalog = Catalog::load(&paths).unwrap();
            assert_eq!(catalog.future.len(), 1);
            assert_eq!(catalog.active.len(), 1);
            assert_eq!(catalog.completed.len(), 1);
            assert_eq!(catalog.active[0].id.as_str(), "fix-footer");
            assert_eq!(catalog.completed[0].id.as_str(), "old-work");
        }

        #[test]
        fn explicit_plan_id_wins_over_filename() {
            let (dir, paths) = fixture();
            write_plan(
                dir.path(),
                "docs/exec-plans/active/2026-08-01-anything.md",
                "Plan-ID: real-name\nStatus: queued\n",
            );
            let catalog = Catalog::load(&paths).unwrap();
            assert_eq!(catalog.active[0].id.as_str(), "real-name");
        }

        #[test]
        fn missing_directories_yield_empty_catalog() {
            let (_dir, paths) = fixture();
            let catalog = Catalog::load(&paths).unwrap();
            assert_eq!(catalog.all().count(), 0);
        }

        #[test]
        fn readme_and_non_markdown_are_skipped() {
            let (dir, paths) = fixture();
            write_plan(dir.path(), "docs/exec-plans/active/README.md", "# Index\n");
            write_plan(dir.path(), "docs/exec-plans/active/notes.txt", "notes\n");
            write_plan(
                dir.path(),
                "docs/exec-plans/active/real-plan.md",
                "Status: queued\n",
            );
            let catalog = Catalog::load(&paths).unwrap();
            assert_eq!(catalog.active.len(), 1);
            assert_eq!(catalog.active[0].id.as_str(), "real-plan");
        }

        #[test]
        fn invalid_filename_id_is_rejected() {
            let (dir, paths) = fixture();
            write_plan(
                dir.path(),
                "docs/exec-plans/active/Bad_Name.md",
                "Status: queued\n",
            );
            assert!(matches!(
                Catalog::load(&paths),
                Err(CatalogError::InvalidPlanId { .. })
            ));
        }
    }

    mod invariants {
        use super::*;

        #[test]
        fn duplicate_ids_across_phases_are_rejected() {
            let (dir, paths) = fixture();
            write_plan(
                dir.path(),
                "docs/future/fix-footer.md",
                "Status: draft\n",
            );
            write_plan(
                dir.path(),
                "docs/exec-plans/active/2026-08-01-fix-footer.md",
                "Status: queued\n",
            );
            assert!(matches!(
                Catalog::load(&paths),
                Err(CatalogError::DuplicatePlanId { .. })
            ));
        }

        #[test]
        fn unresolved_dependency_is_rejected() {
            let (dir, paths) = fixture();
            write_plan(
                dir.path(),
                "docs/exec-plans/active/needs-dep.md",
                "Status: queued\nDependencies: missing-plan\n",
            );
            assert!(matches!(
                Catalog::load(&paths),
                Err(CatalogError::MissingDependency { .. })
            ));
        }

        #[test]
        fn dependency_on_completed_plan_resolves() {
            let (dir, paths) = fixture();
            write_plan(
                dir.path(),
                "docs/exec-plans/active/needs-dep.md",
                "Status: queued\nDependencies: done-work\n",
            );
            write_plan(
                dir.path(),
                "docs/exec-plans/completed/2026-07-01-done-work.md",
                "Status: completed\n",
            );
            assert!(Catalog::load(&paths).is_ok());
        }

        #[test]
        fn absolute_spec_target_is_rejected() {
            let (dir, paths) = fixture();
            write_plan(
                dir.path(),
                "docs/exec-plans/active/escape.md",
                "Status: queued\nSpec-Targets: /etc/passwd\n",
            );
            assert!(matches!(
                Catalog::load(&paths),
                Err(CatalogError::UnsafePath { .. })
            ));
        }

        #[test]
        fn traversal_spec_target_is_rejected() {
            let (dir, paths) = fixture();
            write_plan(
                dir.path(),
                "docs/exec-plans/active/escape.md",
                "Status: queued\nSpec-Targets: ../outside.md\n",
            );
            assert!(matches!(
                Catalog::load(&paths),
                Err(CatalogError::UnsafePath { .. })
            ));
        }

        #[test]
        fn status_violation_is_flagged_not_fatal() {
            let (dir, paths) = fixture();
            write_plan(
                dir.path(),
                "docs/exec-plans/completed/2026-07-01-not-done.md",
                "Status: in-progress\n",
            );
            let catalog = Catalog::load(&paths).unwrap();
            assert!(catalog.completed[0].status_violation());
        }
    }
}
