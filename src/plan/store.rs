//! plan::store
//!
//! All mutations of plan documents flow through the plan store: status
//! rewrites, promotion from `future/` to `active/`, completion
//! finalization, section upserts, and delivery-log appends.
//!
//! # Invariants
//!
//! - Every write stays inside the repository root
//! - `SetStatus` touches exactly the top-level `Status:` line
//! - Promotion and finalization use `YYYY-MM-DD-<plan-id>.md` naming in
//!   UTC, appending `-<epoch-ms>` on collision
//! - In dry-run mode every operation computes its result but writes
//!   nothing

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::paths::{ConveyorPaths, PathError};
use crate::core::types::{PlanId, PlanStatus};

use super::catalog::{Catalog, Plan};
use super::metadata::{self, MetadataError};

/// Errors from plan store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Read or write failed.
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Document metadata problem (e.g. no `Status:` line).
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// A write would land outside the repository root.
    #[error(transparent)]
    UnsafePath(#[from] PathError),

    /// Promotion requires `Status: ready-for-promotion`.
    #[error("plan '{plan_id}' is not ready for promotion (status: {status})")]
    NotPromotable { plan_id: PlanId, status: PlanStatus },

    /// Promotion target id already exists in active or completed.
    #[error("plan '{plan_id}' already exists in active or completed")]
    AlreadyActive { plan_id: PlanId },
}

/// Sections upserted into a plan document at finalization.
#[derive(Debug, Clone, Default)]
pub struct FinalizeSections {
    pub validation_evidence: String,
    pub completion_snapshot: String,
    pub evidence_index: Option<String>,
    pub closure: String,
}

/// The plan store.
pub struct PlanStore<'a> {
    paths: &'a ConveyorPaths,
    dry_run: bool,
}

impl<'a> PlanStore<'a> {
    pub fn new(paths: &'a ConveyorPaths, dry_run: bool) -> Self {
        Self { paths, dry_run }
    }

    fn read(&self, path: &PathBuf) -> Result<String, StoreError> {
        fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn write(&self, path: &PathBuf, content: &str) -> Result<(), StoreError> {
        if self.dry_run {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        fs::write(path, content).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn remove(&self, path: &PathBuf) -> Result<(), StoreError> {
        if self.dry_run {
            return Ok(());
        }
        fs::remove_file(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Rewrite the top-level `Status:` line of a plan document.
    ///
    /// A rewrite to the current status is a no-op on disk.
    pub fn set_status(&self, plan: &Plan, status: PlanStatus) -> Result<(), StoreError> {
        let content = self.read(&plan.path)?;
        let rewritten = metadata::rewrite_status(&content, status)?;
        if rewritten != content {
            self.write(&plan.path, &rewritten)?;
        }
        Ok(())
    }

    /// Promote a `ready-for-promotion` future plan into `active/`.
    ///
    /// Returns the path of the promoted document.
    pub fn promote(
        &self,
        plan: &Plan,
        catalog: &Catalog,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, StoreError> {
        if plan.metadata.status != PlanStatus::ReadyForPromotion {
            return Err(StoreError::NotPromotable {
                plan_id: plan.id.clone(),
                status: plan.metadata.status,
            });
        }
        let taken = catalog
            .active
            .iter()
            .chain(catalog.completed.iter())
            .any(|existing| existing.id == plan.id);
        if taken {
            return Err(StoreError::AlreadyActive {
                plan_id: plan.id.clone(),
            });
        }

        let content = self.read(&plan.path)?;
        let mut promoted = metadata::upsert_field(&content, "Plan-ID", plan.id.as_str());
        promoted = metadata::upsert_field(&promoted, "Status", PlanStatus::Queued.as_str());
        promoted = metadata::upsert_field(&promoted, "Done-Evidence", "pending");

        let target = self.dated_target(&self.paths.active_dir(), &plan.id, now);
        self.write(&target, &promoted)?;
        self.remove(&plan.path)?;
        Ok(target)
    }

    /// Finalize a completed plan: status, `Done-Evidence`, canonical
    /// sections, and the move into `completed/`.
    ///
    /// Returns the path of the completed document.
    pub fn finalize(
        &self,
        plan: &Plan,
        sections: &FinalizeSections,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, StoreError> {
        let content = self.read(&plan.path)?;
        let mut finalized =
            metadata::upsert_field(&content, "Status", PlanStatus::Completed.as_str());
        finalized = metadata::upsert_field(
            &finalized,
            "Done-Evidence",
            &self.paths.evidence_index_reference(&plan.id),
        );
        finalized = upsert_section(&finalized, "Validation Evidence", &sections.validation_evidence);
        finalized = upsert_section(&finalized, "Completion Snapshot", &sections.completion_snapshot);
        if let Some(index) = &sections.evidence_index {
            finalized = upsert_section(&finalized, "Evidence Index", index);
        }
        finalized = upsert_section(&finalized, "Closure", &sections.closure);

        // Already in completed/: rewrite in place.
        if plan.path.starts_with(self.paths.completed_dir()) {
            self.write(&plan.path, &finalized)?;
            return Ok(plan.path.clone());
        }

        let target = self.dated_target(&self.paths.completed_dir(), &plan.id, now);
        self.write(&target, &finalized)?;
        self.remove(&plan.path)?;
        Ok(target)
    }

    /// Upsert a level-2 section in a plan document.
    pub fn upsert_plan_section(
        &self,
        plan: &Plan,
        title: &str,
        body: &str,
    ) -> Result<(), StoreError> {
        let content = self.read(&plan.path)?;
        let updated = upsert_section(&content, title, body);
        if updated != content {
            self.write(&plan.path, &updated)?;
        }
        Ok(())
    }

    /// Rewrite a metadata field in a plan document.
    pub fn upsert_plan_field(&self, plan: &Plan, key: &str, value: &str) -> Result<(), StoreError> {
        let content = self.read(&plan.path)?;
        let updated = metadata::upsert_field(&content, key, value);
        if updated != content {
            self.write(&plan.path, &updated)?;
        }
        Ok(())
    }

    /// Append a delivery-log entry to a product-spec document.
    pub fn append_to_delivery_log(&self, path: &PathBuf, entry: &str) -> Result<(), StoreError> {
        let content = self.read(path)?;
        let updated = append_to_delivery_log(&content, entry);
        if updated != content {
            self.write(path, &updated)?;
        }
        Ok(())
    }

    /// `<dir>/YYYY-MM-DD-<plan-id>.md`, with `-<epoch-ms>` on collision.
    fn dated_target(&self, dir: &PathBuf, plan_id: &PlanId, now: DateTime<Utc>) -> PathBuf {
        let date = now.format("%Y-%m-%d");
        let plain = dir.join(format!("{date}-{plan_id}.md"));
        if !plain.exists() {
            return plain;
        }
        dir.join(format!("{date}-{plan_id}-{}.md", now.timestamp_millis()))
    }
}

/// Replace the level-2 section `## <title>` (from its heading to the
/// next `## ` heading or end of document), or append it.
///
/// Idempotent: upserting the same body twice yields identical content.
pub fn upsert_section(content: &str, title: &str, body: &str) -> String {
    let heading = format!("## {title}");
    let mut section = format!("{heading}\n\n{}", body.trim_end());
    section.push('\n');

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.iter().position(|line| line.trim_end() == heading);

    match start {
        Some(start) => {
            let end = lines[start + 1..]
                .iter()
                .position(|line| line.starts_with("## "))
                .map(|offset| start + 1 + offset)
                .unwrap_or(lines.len());

            let mut out: Vec<String> = lines[..start].iter().map(|l| l.to_string()).collect();
            out.push(section.trim_end().to_string());
            if end < lines.len() {
                out.push(String::new());
                out.extend(lines[end..].iter().map(|l| l.to_string()));
            }
            let mut result = out.join("\n");
            result.push('\n');
            result
        }
        None => {
            let mut result = content.trim_end().to_string();
            if !result.is_empty() {
                result.push_str("\n\n");
            }
            result.push_str(&section);
            result
        }
    }
}

/// Insert `- <entry>` into the `## Automated Delivery Log` section,
/// creating the section when absent. Re-inserting an existing entry is
/// a no-op.
pub fn append_to_delivery_log(content: &str, entry: &str) -> String {
    const TITLE: &str = "Automated Delivery Log";
    let heading = format!("## {TITLE}");
    let line = format!("- {entry}");

    let lines: Vec<&str> = content.lines().collect();
    let Some(start) = lines.iter().position(|l| l.trim_end() == heading) else {
        return upsert_section(content, TITLE, &line);
    };

    let end = lines[start + 1..]
        .iter()
        .position(|l| l.starts_with("## "))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());

    if lines[start..end].iter().any(|l| l.trim_end() == line) {
        return content.to_string();
    }

    // Insert after the last non-blank line of the section.
    let insert_at = lines[..end]
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map(|idx| idx + 1)
        .unwrap_or(end);

    let mut out: Vec<String> = lines[..insert_at].iter().map(|l| l.to_string()).collect();
    out.push(line);
    out.extend(lines[insert_at..].iter().map(|l| l.to_string()));
    let mut result = out.join("\n");
    if content.ends_with('\n') || insert_at == lines.len() {
        result.push('\n');
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PlanPhase;
    use crate::plan::metadata::PlanMetadata;
    use std::path::Path;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, ConveyorPaths) {
        let dir = TempDir::new().unwrap();
        let paths = ConveyorPaths::new(dir.path().to_path_buf());
        (dir, paths)
    }

    fn write_plan(root: &Path, relative: &str, content: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn plan_at(path: PathBuf, phase: PlanPhase) -> Plan {
        let content = fs::read_to_string(&path).unwrap();
        let metadata = PlanMetadata::parse(&content).unwrap();
        let id = super::super::catalog::derive_plan_id(&path, &metadata).unwrap();
        Plan {
            id,
            phase,
            path,
            metadata,
        }
    }

    fn now() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    mod set_status {
        use super::*;

        #[test]
        fn rewrites_on_disk() {
            let (dir, paths) = fixture();
            let path = write_plan(
                dir.path(),
                "docs/exec-plans/active/fix-footer.md",
                "Status: queued\n\nbody\n",
            );
            let plan = plan_at(path.clone(), PlanPhase::Active);
            let store = PlanStore::new(&paths, false);
            store.set_status(&plan, PlanStatus::InProgress).unwrap();
            let content = fs::read_to_string(&path).unwrap();
            assert_eq!(content, "Status: in-progress\n\nbody\n");
        }

        #[test]
        fn same_status_twice_is_a_no_op() {
            let (dir, paths) = fixture();
            let path = write_plan(
                dir.path(),
                "docs/exec-plans/active/fix-footer.md",
                "Status: queued\n",
            );
            let plan = plan_at(path.clone(), PlanPhase::Active);
            let store = PlanStore::new(&paths, false);
            store.set_status(&plan, PlanStatus::Failed).unwrap();
            let after_first = fs::read_to_string(&path).unwrap();
            let plan = plan_at(path.clone(), PlanPhase::Active);
            store.set_status(&plan, PlanStatus::Failed).unwrap();
            assert_eq!(fs::read_to_string(&path).unwrap(), after_first);
        }

        #[test]
        fn dry_run_writes_nothing() {
            let (dir, paths) = fixture();
            let path = write_plan(
                dir.path(),
                "docs/exec-plans/active/fix-footer.md",
                "Status: queued\n",
            );
            let plan = plan_at(path.clone(), PlanPhase::Active);
            let store = PlanStore::new(&paths, true);
            store.set_status(&plan, PlanStatus::Failed).unwrap();
            assert_eq!(fs::read_to_string(&path).unwrap(), "Status: queued\n");
        }
    }

    mod promote {
        use super::*;

        #[test]
        fn moves_into_active_with_date_prefix() {
            let (dir, paths) = fixture();
            let path = write_plan(
                dir.path(),
                "docs/future/new-idea.md",
                "Plan-ID: new-idea\nStatus: ready-for-promotion\nPriority: p1\n",
            );
            let plan = plan_at(path.clone(), PlanPhase::Future);
            let store = PlanStore::new(&paths, false);
            let target = store.promote(&plan, &Catalog::default(), now()).unwrap();

            assert_eq!(
                target,
                paths.active_dir().join("2026-08-01-new-idea.md")
            );
            assert!(!path.exists(), "source should be deleted");

            let content = fs::read_to_string(&target).unwrap();
            let metadata = PlanMetadata::parse(&content).unwrap();
            assert_eq!(metadata.status, PlanStatus::Queued);
            assert_eq!(metadata.priority, crate::core::types::Priority::P1);
            assert_eq!(
                metadata.done_evidence,
                crate::plan::metadata::DoneEvidence::Pending
            );
        }

        #[test]
        fn refuses_non_ready_plans() {
            let (dir, paths) = fixture();
            let path = write_plan(dir.path(), "docs/future/idea.md", "Status: draft\n");
            let plan = plan_at(path, PlanPhase::Future);
            let store = PlanStore::new(&paths, false);
            assert!(matches!(
                store.promote(&plan, &Catalog::default(), now()),
                Err(StoreError::NotPromotable { .. })
            ));
        }

        #[test]
        fn refuses_id_already_active() {
            let (dir, paths) = fixture();
            write_plan(
                dir.path(),
                "docs/exec-plans/active/2026-07-01-idea.md",
                "Plan-ID: idea\nStatus: queued\n",
            );
            let path = write_plan(
                dir.path(),
                "docs/future/idea.md",
                "Status: ready-for-promotion\n",
            );
            let catalog = Catalog::load(&paths).unwrap();
            let plan = plan_at(path, PlanPhase::Future);
            let store = PlanStore::new(&paths, false);
            assert!(matches!(
                store.promote(&plan, &catalog, now()),
                Err(StoreError::AlreadyActive { .. })
            ));
        }

        #[test]
        fn collision_appends_epoch_suffix() {
            let (dir, paths) = fixture();
            write_plan(
                dir.path(),
                "docs/exec-plans/active/2026-08-01-idea.md",
                "Plan-ID: other-plan\nStatus: queued\n",
            );
            let path = write_plan(
                dir.path(),
                "docs/future/idea.md",
                "Status: ready-for-promotion\n",
            );
            let plan = plan_at(path, PlanPhase::Future);
            let store = PlanStore::new(&paths, false);
            let target = store.promote(&plan, &Catalog::default(), now()).unwrap();
            let name = target.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("2026-08-01-idea-"));
            assert!(name.ends_with(".md"));
            assert_ne!(name, "2026-08-01-idea.md");
        }
    }

    mod finalize {
        use super::*;

        #[test]
        fn writes_sections_and_moves() {
            let (dir, paths) = fixture();
            let path = write_plan(
                dir.path(),
                "docs/exec-plans/active/2026-07-30-fix-footer.md",
                "Plan-ID: fix-footer\nStatus: validation\n\n## Context\n\nwords\n",
            );
            let plan = plan_at(path.clone(), PlanPhase::Active);
            let store = PlanStore::new(&paths, false);
            let sections = FinalizeSections {
                validation_evidence: "- always lane: passed".to_string(),
                completion_snapshot: "Completed at 2026-08-01.".to_string(),
                evidence_index: None,
                closure: "All acceptance criteria met.".to_string(),
            };
            let target = store.finalize(&plan, &sections, now()).unwrap();

            assert_eq!(
                target,
                paths.completed_dir().join("2026-08-01-fix-footer.md")
            );
            assert!(!path.exists());

            let content = fs::read_to_string(&target).unwrap();
            let metadata = PlanMetadata::parse(&content).unwrap();
            assert_eq!(metadata.status, PlanStatus::Completed);
            assert!(content.contains("Done-Evidence: docs/exec-plans/evidence-index/fix-footer.md"));
            assert!(content.contains("## Validation Evidence"));
            assert!(content.contains("## Completion Snapshot"));
            assert!(content.contains("## Closure"));
            assert!(content.contains("## Context"), "existing sections preserved");
        }
    }

    mod sections {
        use super::*;

        #[test]
        fn upsert_appends_missing_section() {
            let updated = upsert_section("# Doc\n\nbody\n", "Closure", "done");
            assert!(updated.ends_with("## Closure\n\ndone\n"));
        }

        #[test]
        fn upsert_replaces_existing_section() {
            let doc = "# Doc\n\n## Closure\n\nold\n\n## After\n\nkeep\n";
            let updated = upsert_section(doc, "Closure", "new");
            assert!(updated.contains("new"));
            assert!(!updated.contains("old"));
            assert!(updated.contains("## After"));
            assert!(updated.contains("keep"));
        }

        #[test]
        fn upsert_is_idempotent() {
            let doc = "# Doc\n\n## Closure\n\nold\n";
            let once = upsert_section(doc, "Closure", "new body");
            let twice = upsert_section(&once, "Closure", "new body");
            assert_eq!(once, twice);
        }

        #[test]
        fn delivery_log_creates_section() {
            let updated = append_to_delivery_log("# Spec\n", "2026-08-01: fix-footer completed");
            assert!(updated.contains("## Automated Delivery Log"));
            assert!(updated.contains("- 2026-08-01: fix-footer completed"));
        }

        #[test]
        fn delivery_log_appends_within_section() {
            let doc = "# Spec\n\n## Automated Delivery Log\n\n- first entry\n\n## Later\n\nx\n";
            let updated = append_to_delivery_log(doc, "second entry");
            let log_idx = updated.find("- second entry").unwrap();
            let later_idx = updated.find("## Later").unwrap();
            assert!(log_idx < later_idx, "entry belongs to the log section");
            assert!(updated.contains("- first entry"));
        }

        #[test]
        fn delivery_log_duplicate_entry_is_no_op() {
            let doc = "# Spec\n\n## Automated Delivery Log\n\n- same entry\n";
            assert_eq!(append_to_delivery_log(doc, "same entry"), doc);
        }
    }
}
