//! evidence
//!
//! Evidence lifecycle: reference extraction, rerun deduplication,
//! reference rewriting, and the canonical compact index.
//!
//! # Modules
//!
//! - [`refs`] - Reference extraction and rewriting in plan documents
//! - [`dedup`] - Signature-keyed rerun deduplication
//! - [`index`] - Canonical index and README generation
//!
//! # Lifecycle
//!
//! Curation runs per plan (at completion when `pruneOnComplete` is set,
//! or via `curate-evidence`): scan the plan document for evidence
//! references, deduplicate each referenced evidence directory, rewrite
//! stale references across every active and completed plan document,
//! regenerate directory READMEs, and write the canonical index. Every
//! write is byte-compared first, so curation is idempotent.

pub mod dedup;
pub mod index;
pub mod refs;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::model::EvidenceConfig;
use crate::core::paths::ConveyorPaths;
use crate::core::types::PlanId;
use crate::plan::catalog::{Catalog, Plan};
use crate::state::run_state::EvidenceState;

use dedup::PrunedFile;
use index::IndexedArtifact;

/// Errors from evidence curation.
#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> EvidenceError + '_ {
    move |source| EvidenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// The outcome of curating one plan.
#[derive(Debug, Clone)]
pub struct CurationReport {
    pub plan_id: PlanId,
    pub index_path: PathBuf,
    pub reference_count: usize,
    pub total_found: usize,
    pub signature: String,
    pub pruned: usize,
    pub rewritten_docs: usize,
}

impl CurationReport {
    /// The run-state entry for this curation.
    pub fn state_entry(&self, paths: &ConveyorPaths, now: DateTime<Utc>) -> EvidenceState {
        EvidenceState {
            index_path: refs::relative_from(paths.repo_root(), &self.index_path)
                .display()
                .to_string(),
            reference_count: self.reference_count,
            signature: self.signature.clone(),
            updated_at: now.to_rfc3339(),
        }
    }
}

/// The evidence curator.
pub struct Curator<'a> {
    paths: &'a ConveyorPaths,
    config: &'a EvidenceConfig,
    dry_run: bool,
}

impl<'a> Curator<'a> {
    pub fn new(paths: &'a ConveyorPaths, config: &'a EvidenceConfig, dry_run: bool) -> Self {
        Self {
            paths,
            config,
            dry_run,
        }
    }

    /// Curate one plan's evidence.
    pub fn curate_plan(&self, plan: &Plan, catalog: &Catalog) -> Result<CurationReport, EvidenceError> {
        let repo_root = self.paths.repo_root();
        let plan_dir = plan.path.parent().unwrap_or(repo_root).to_path_buf();

        let content = fs::read_to_string(&plan.path).map_err(io_err(&plan.path))?;
        let references = refs::extract_references(&content, &plan_dir, repo_root);

        // Deduplicate every referenced evidence directory.
        let directories: BTreeSet<PathBuf> = references
            .iter()
            .filter_map(|reference| reference.parent().map(Path::to_path_buf))
            .filter(|dir| dir.is_dir())
            .collect();

        let mut pruned: Vec<PrunedFile> = Vec::new();
        for dir in &directories {
            pruned.extend(
                dedup::plan_dedup(dir, self.config.lifecycle.keep_max_per_blocker)
                    .map_err(io_err(dir))?,
            );
        }

        if !self.dry_run {
            for entry in &pruned {
                fs::remove_file(&entry.path).map_err(io_err(&entry.path))?;
            }
        }

        // Rewrite stale references across every plan document. Pruned
        // artifacts point at their folder's README.
        let mut rewritten_docs = 0;
        if !pruned.is_empty() {
            for doc in catalog.active.iter().chain(catalog.completed.iter()) {
                let doc_dir = doc.path.parent().unwrap_or(repo_root);
                let original = fs::read_to_string(&doc.path).map_err(io_err(&doc.path))?;
                let mut updated = original.clone();
                for entry in &pruned {
                    let readme = entry
                        .path
                        .parent()
                        .map(|dir| dir.join("README.md"))
                        .unwrap_or_else(|| entry.survivor.clone());
                    updated =
                        refs::rewrite_references(&updated, doc_dir, repo_root, &entry.path, &readme);
                }
                if updated != original {
                    rewritten_docs += 1;
                    if !self.dry_run {
                        fs::write(&doc.path, updated).map_err(io_err(&doc.path))?;
                    }
                }
            }
        }

        for dir in &directories {
            index::write_evidence_readme(dir, self.config.lifecycle.keep_max_per_blocker, self.dry_run)
                .map_err(io_err(dir))?;
        }

        // Re-extract from the (possibly rewritten) document and index
        // the surviving artifacts. Folder READMEs are navigation, not
        // evidence; they stay out of the index.
        let final_content = fs::read_to_string(&plan.path).map_err(io_err(&plan.path))?;
        let survivors: Vec<PathBuf> = refs::extract_references(&final_content, &plan_dir, repo_root)
            .into_iter()
            .filter(|reference| {
                reference
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name != "README.md")
            })
            .collect();

        let total_found = survivors.len();
        let mut artifacts = Vec::new();
        for survivor in &survivors {
            let Ok(metadata) = fs::metadata(survivor) else {
                continue;
            };
            let modified = metadata.modified().map_err(io_err(survivor))?;
            artifacts.push(IndexedArtifact {
                path: survivor.clone(),
                modified,
            });
        }

        let outcome = index::write_plan_index(
            self.paths,
            &plan.id,
            &plan.path,
            &artifacts,
            total_found,
            self.config.compaction.max_references,
            self.dry_run,
        )
        .map_err(io_err(&plan.path))?;
        index::write_index_readme(self.paths, self.dry_run)
            .map_err(io_err(&self.paths.evidence_index_readme()))?;

        Ok(CurationReport {
            plan_id: plan.id.clone(),
            index_path: outcome.path,
            reference_count: outcome.listed,
            total_found: outcome.total_found,
            signature: outcome.signature,
            pruned: pruned.len(),
            rewritten_docs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::catalog::Catalog;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn set_mtime(path: &Path, offset_secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + offset_secs);
        file.set_modified(when).unwrap();
    }

    struct Fixture {
        _dir: TempDir,
        paths: ConveyorPaths,
        config: EvidenceConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let paths = ConveyorPaths::new(dir.path().to_path_buf());
            Self {
                _dir: dir,
                paths,
                config: EvidenceConfig::default(),
            }
        }

        fn write(&self, rel: &str, content: &str) -> PathBuf {
            let path = self.paths.repo_root().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            path
        }

        fn curate(&self, plan_id: &str) -> CurationReport {
            let catalog = Catalog::load(&self.paths).unwrap();
            let plan = catalog
                .all()
                .find(|p| p.id.as_str() == plan_id)
                .unwrap()
                .clone();
            let curator = Curator::new(&self.paths, &self.config, false);
            curator.curate_plan(&plan, &catalog).unwrap()
        }
    }

    #[test]
    fn rerun_family_is_pruned_and_references_rewritten() {
        let fixture = Fixture::new();
        let a = fixture.write("docs/exec-plans/active/evidence/foo/01-foo-retry.md", "a");
        let b = fixture.write("docs/exec-plans/active/evidence/foo/02-foo-retry.md", "b");
        let c = fixture.write("docs/exec-plans/active/evidence/foo/03-foo.md", "c");
        set_mtime(&a, 10);
        set_mtime(&b, 20);
        set_mtime(&c, 30);

        fixture.write(
            "docs/exec-plans/active/fix-footer.md",
            "Plan-ID: fix-footer\nStatus: in-progress\n\n\
             - [first](evidence/foo/01-foo-retry.md)\n\
             - [second](evidence/foo/02-foo-retry.md)\n\
             - [third](evidence/foo/03-foo.md)\n",
        );

        let report = fixture.curate("fix-footer");
        assert_eq!(report.pruned, 2);
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(c.exists());

        // The two pruned references now point at the folder README.
        let doc = fs::read_to_string(
            fixture
                .paths
                .active_dir()
                .join("fix-footer.md"),
        )
        .unwrap();
        assert!(!doc.contains("01-foo-retry.md"));
        assert!(!doc.contains("02-foo-retry.md"));
        assert!(doc.contains("evidence/foo/README.md"));
        assert!(doc.contains("evidence/foo/03-foo.md"));

        // The canonical index lists only the survivor.
        assert_eq!(report.reference_count, 1);
        let index = fs::read_to_string(&report.index_path).unwrap();
        assert!(index.contains("03-foo.md"));
        assert!(!index.contains("01-foo-retry.md"));

        // The folder README exists and lists the survivor.
        let readme = fs::read_to_string(
            fixture
                .paths
                .active_dir()
                .join("evidence/foo/README.md"),
        )
        .unwrap();
        assert!(readme.contains("03-foo.md"));
    }

    #[test]
    fn curation_is_idempotent() {
        let fixture = Fixture::new();
        let a = fixture.write("docs/exec-plans/active/evidence/foo/01-x-retry.md", "a");
        let b = fixture.write("docs/exec-plans/active/evidence/foo/02-x.md", "b");
        set_mtime(&a, 10);
        set_mtime(&b, 20);
        fixture.write(
            "docs/exec-plans/active/my-plan.md",
            "Plan-ID: my-plan\nStatus: in-progress\n\n[a](evidence/foo/01-x-retry.md) [b](evidence/foo/02-x.md)\n",
        );

        let first = fixture.curate("my-plan");
        let doc_after_first = fs::read_to_string(fixture.paths.active_dir().join("my-plan.md")).unwrap();
        let index_after_first = fs::read_to_string(&first.index_path).unwrap();

        let second = fixture.curate("my-plan");
        assert_eq!(second.pruned, 0);
        assert_eq!(first.signature, second.signature);
        assert_eq!(
            doc_after_first,
            fs::read_to_string(fixture.paths.active_dir().join("my-plan.md")).unwrap()
        );
        assert_eq!(index_after_first, fs::read_to_string(&second.index_path).unwrap());
    }

    #[test]
    fn references_in_other_documents_are_rewritten_too() {
        let fixture = Fixture::new();
        let a = fixture.write("docs/exec-plans/active/evidence/shared/01-db-retry.md", "a");
        let b = fixture.write("docs/exec-plans/active/evidence/shared/02-db.md", "b");
        set_mtime(&a, 10);
        set_mtime(&b, 20);
        fixture.write(
            "docs/exec-plans/active/owner-plan.md",
            "Plan-ID: owner-plan\nStatus: in-progress\n\n[x](evidence/shared/01-db-retry.md)\n",
        );
        fixture.write(
            "docs/exec-plans/completed/2026-07-01-old-plan.md",
            "Plan-ID: old-plan\nStatus: completed\n\n\
             [x](docs/exec-plans/active/evidence/shared/01-db-retry.md)\n",
        );

        fixture.curate("owner-plan");

        let other = fs::read_to_string(
            fixture
                .paths
                .completed_dir()
                .join("2026-07-01-old-plan.md"),
        )
        .unwrap();
        assert!(!other.contains("01-db-retry.md"));
        assert!(other.contains("docs/exec-plans/active/evidence/shared/README.md"));
    }

    #[test]
    fn plan_without_evidence_gets_empty_index() {
        let fixture = Fixture::new();
        fixture.write(
            "docs/exec-plans/active/bare-plan.md",
            "Plan-ID: bare-plan\nStatus: in-progress\n\nNo links here.\n",
        );
        let report = fixture.curate("bare-plan");
        assert_eq!(report.reference_count, 0);
        let index = fs::read_to_string(&report.index_path).unwrap();
        assert!(index.contains("no evidence artifacts"));
    }

    #[test]
    fn dry_run_prunes_nothing() {
        let fixture = Fixture::new();
        let a = fixture.write("docs/exec-plans/active/evidence/foo/01-y-retry.md", "a");
        let b = fixture.write("docs/exec-plans/active/evidence/foo/02-y.md", "b");
        set_mtime(&a, 10);
        set_mtime(&b, 20);
        fixture.write(
            "docs/exec-plans/active/dry-plan.md",
            "Plan-ID: dry-plan\nStatus: in-progress\n\n[a](evidence/foo/01-y-retry.md)\n",
        );

        let catalog = Catalog::load(&fixture.paths).unwrap();
        let plan = catalog.all().find(|p| p.id.as_str() == "dry-plan").unwrap().clone();
        let curator = Curator::new(&fixture.paths, &fixture.config, true);
        let report = curator.curate_plan(&plan, &catalog).unwrap();

        assert_eq!(report.pruned, 1);
        assert!(a.exists(), "dry run must not delete artifacts");
        assert!(!report.index_path.exists(), "dry run must not write the index");
    }
}
