//! evidence::index
//!
//! Canonical evidence index and README generation.
//!
//! # Idempotence
//!
//! Every writer here compares bytes before writing, and generated
//! content derives only from stable inputs (artifact paths and their
//! modification times), so curating twice produces identical files and
//! no spurious mtime churn.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::core::paths::ConveyorPaths;
use crate::core::types::PlanId;

use super::refs::relative_from;

/// Write `content` to `path` only when the bytes differ.
///
/// Returns whether a write happened.
pub fn write_if_changed(path: &Path, content: &str, dry_run: bool) -> std::io::Result<bool> {
    if let Ok(existing) = fs::read_to_string(path) {
        if existing == content {
            return Ok(false);
        }
    }
    if dry_run {
        return Ok(true);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(true)
}

/// One artifact selected for the index.
#[derive(Debug, Clone)]
pub struct IndexedArtifact {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// The outcome of writing a plan's canonical index.
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    pub path: PathBuf,
    pub listed: usize,
    pub total_found: usize,
    /// Digest over the listed reference set.
    pub signature: String,
}

/// Write the canonical compact index for a plan.
///
/// Artifacts are listed most recently modified first, bounded by
/// `max_references`, as links relative to the index location.
pub fn write_plan_index(
    paths: &ConveyorPaths,
    plan_id: &PlanId,
    source_plan: &Path,
    artifacts: &[IndexedArtifact],
    total_found: usize,
    max_references: usize,
    dry_run: bool,
) -> std::io::Result<IndexOutcome> {
    let index_path = paths.evidence_index_path(plan_id);
    let index_dir = paths.evidence_index_dir();

    let mut selected: Vec<&IndexedArtifact> = artifacts.iter().collect();
    selected.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    selected.truncate(max_references);

    let source_rel = relative_from(paths.repo_root(), source_plan);

    let mut content = format!(
        "# Evidence Index: {plan_id}\n\nPlan-ID: {plan_id}\nSource: {}\nTotal-Found: {total_found}\nListed: {}\n\n## Artifacts\n\n",
        source_rel.display(),
        selected.len()
    );
    for artifact in &selected {
        let link = relative_from(&index_dir, &artifact.path);
        let modified: DateTime<Utc> = artifact.modified.into();
        let name = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        content.push_str(&format!(
            "- [{name}]({}) — modified {}\n",
            link.display(),
            modified.format("%Y-%m-%d")
        ));
    }
    if selected.is_empty() {
        content.push_str("(no evidence artifacts found)\n");
    }

    let mut hasher = Sha256::new();
    for artifact in &selected {
        hasher.update(artifact.path.to_string_lossy().as_bytes());
        hasher.update(b"\n");
    }
    let signature = hex::encode(hasher.finalize());

    write_if_changed(&index_path, &content, dry_run)?;

    Ok(IndexOutcome {
        path: index_path,
        listed: selected.len(),
        total_found,
        signature,
    })
}

/// Regenerate the evidence-index directory README from the indexes
/// present on disk.
pub fn write_index_readme(paths: &ConveyorPaths, dry_run: bool) -> std::io::Result<()> {
    let dir = paths.evidence_index_dir();
    let mut entries: Vec<String> = Vec::new();
    if dir.exists() {
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name != "README.md")
            })
            .collect();
        files.sort();
        for file in files {
            if let Some(stem) = file.file_stem().and_then(|s| s.to_str()) {
                entries.push(format!("- [{stem}]({stem}.md)"));
            }
        }
    }

    let mut content =
        "# Evidence Indexes\n\nCanonical compact evidence indexes, one per plan.\n\n".to_string();
    if entries.is_empty() {
        content.push_str("(none yet)\n");
    } else {
        content.push_str(&entries.join("\n"));
        content.push('\n');
    }
    write_if_changed(&paths.evidence_index_readme(), &content, dry_run)?;
    Ok(())
}

/// Regenerate one evidence directory's README.
///
/// The title derives from the folder name; a prior `## Result Summary`
/// section is preserved verbatim.
pub fn write_evidence_readme(dir: &Path, keep_max: usize, dry_run: bool) -> std::io::Result<()> {
    let readme_path = dir.join("README.md");
    let preserved = fs::read_to_string(&readme_path)
        .ok()
        .and_then(|existing| extract_section(&existing, "Result Summary"));

    let title = dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("evidence")
        .replace('-', " ");

    let mut files: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter_map(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(String::from)
        })
        .filter(|name| name != "README.md")
        .collect();
    files.sort();

    let mut content = format!("# Evidence: {title}\n\n## Artifacts\n\n");
    if files.is_empty() {
        content.push_str("(none)\n");
    } else {
        for file in &files {
            content.push_str(&format!("- [{file}]({file})\n"));
        }
    }
    content.push_str(&format!(
        "\n## Curation\n\nDeduplicated rerun artifacts; at most {keep_max} file(s) kept per blocker signature.\n"
    ));
    if let Some(summary) = preserved {
        content.push_str(&format!("\n## Result Summary\n\n{}\n", summary.trim_end()));
    }

    write_if_changed(&readme_path, &content, dry_run)?;
    Ok(())
}

/// Extract the body of a `## <title>` section, if present.
fn extract_section(content: &str, title: &str) -> Option<String> {
    let heading = format!("## {title}");
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.iter().position(|line| line.trim_end() == heading)?;
    let end = lines[start + 1..]
        .iter()
        .position(|line| line.starts_with("## "))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());
    let body = lines[start + 1..end].join("\n").trim().to_string();
    (!body.is_empty()).then_some(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, ConveyorPaths) {
        let dir = TempDir::new().unwrap();
        let paths = ConveyorPaths::new(dir.path().to_path_buf());
        (dir, paths)
    }

    fn artifact(paths: &ConveyorPaths, rel: &str, offset_secs: u64) -> IndexedArtifact {
        IndexedArtifact {
            path: paths.repo_root().join(rel),
            modified: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000 + offset_secs),
        }
    }

    mod change_detection {
        use super::*;

        #[test]
        fn identical_content_is_not_rewritten() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("file.md");
            assert!(write_if_changed(&path, "content", false).unwrap());
            assert!(!write_if_changed(&path, "content", false).unwrap());
            assert!(write_if_changed(&path, "different", false).unwrap());
        }

        #[test]
        fn dry_run_reports_without_writing() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("file.md");
            assert!(write_if_changed(&path, "content", true).unwrap());
            assert!(!path.exists());
        }
    }

    mod plan_index {
        use super::*;
        use crate::core::types::PlanId;

        #[test]
        fn newest_first_and_bounded() {
            let (_dir, paths) = fixture();
            let plan_id = PlanId::new("fix-footer").unwrap();
            let source = paths.active_dir().join("2026-08-01-fix-footer.md");
            let artifacts = vec![
                artifact(&paths, "docs/exec-plans/active/evidence/foo/old.md", 10),
                artifact(&paths, "docs/exec-plans/active/evidence/foo/newest.md", 30),
                artifact(&paths, "docs/exec-plans/active/evidence/foo/mid.md", 20),
            ];

            let outcome =
                write_plan_index(&paths, &plan_id, &source, &artifacts, 3, 2, false).unwrap();
            assert_eq!(outcome.listed, 2);
            assert_eq!(outcome.total_found, 3);

            let content = fs::read_to_string(&outcome.path).unwrap();
            let newest = content.find("newest.md").unwrap();
            let mid = content.find("mid.md").unwrap();
            assert!(newest < mid);
            assert!(!content.contains("old.md"));
            // Links are relative to the index directory.
            assert!(content.contains("(../active/evidence/foo/newest.md)"));
        }

        #[test]
        fn rewriting_same_inputs_is_idempotent() {
            let (_dir, paths) = fixture();
            let plan_id = PlanId::new("fix-footer").unwrap();
            let source = paths.active_dir().join("fix-footer.md");
            let artifacts = vec![artifact(&paths, "docs/exec-plans/active/evidence/foo/a.md", 10)];

            let first =
                write_plan_index(&paths, &plan_id, &source, &artifacts, 1, 25, false).unwrap();
            let bytes = fs::read(&first.path).unwrap();
            let second =
                write_plan_index(&paths, &plan_id, &source, &artifacts, 1, 25, false).unwrap();
            assert_eq!(first.signature, second.signature);
            assert_eq!(bytes, fs::read(&second.path).unwrap());
        }

        #[test]
        fn signature_tracks_listed_set() {
            let (_dir, paths) = fixture();
            let plan_id = PlanId::new("fix-footer").unwrap();
            let source = paths.active_dir().join("fix-footer.md");
            let one = vec![artifact(&paths, "docs/exec-plans/active/evidence/foo/a.md", 10)];
            let two = vec![artifact(&paths, "docs/exec-plans/active/evidence/foo/b.md", 10)];

            let first = write_plan_index(&paths, &plan_id, &source, &one, 1, 25, false).unwrap();
            let second = write_plan_index(&paths, &plan_id, &source, &two, 1, 25, false).unwrap();
            assert_ne!(first.signature, second.signature);
        }
    }

    mod readmes {
        use super::*;

        #[test]
        fn evidence_readme_lists_artifacts() {
            let dir = TempDir::new().unwrap();
            let evidence = dir.path().join("db-timeout");
            fs::create_dir_all(&evidence).unwrap();
            fs::write(evidence.join("01-trace.md"), "x").unwrap();
            fs::write(evidence.join("02-trace.md"), "y").unwrap();

            write_evidence_readme(&evidence, 1, false).unwrap();
            let readme = fs::read_to_string(evidence.join("README.md")).unwrap();
            assert!(readme.contains("# Evidence: db timeout"));
            assert!(readme.contains("[01-trace.md](01-trace.md)"));
            assert!(readme.contains("[02-trace.md](02-trace.md)"));
        }

        #[test]
        fn result_summary_is_preserved() {
            let dir = TempDir::new().unwrap();
            let evidence = dir.path().join("foo");
            fs::create_dir_all(&evidence).unwrap();
            fs::write(
                evidence.join("README.md"),
                "# Old\n\n## Result Summary\n\nRoot cause was the cache.\n",
            )
            .unwrap();
            fs::write(evidence.join("artifact.md"), "x").unwrap();

            write_evidence_readme(&evidence, 1, false).unwrap();
            let readme = fs::read_to_string(evidence.join("README.md")).unwrap();
            assert!(readme.contains("## Result Summary"));
            assert!(readme.contains("Root cause was the cache."));
            assert!(readme.contains("artifact.md"));
        }

        #[test]
        fn index_readme_lists_plan_indexes() {
            let (_dir, paths) = fixture();
            fs::create_dir_all(paths.evidence_index_dir()).unwrap();
            fs::write(paths.evidence_index_dir().join("fix-footer.md"), "x").unwrap();
            fs::write(paths.evidence_index_dir().join("refactor-auth.md"), "y").unwrap();

            write_index_readme(&paths, false).unwrap();
            let readme = fs::read_to_string(paths.evidence_index_readme()).unwrap();
            assert!(readme.contains("[fix-footer](fix-footer.md)"));
            assert!(readme.contains("[refactor-auth](refactor-auth.md)"));
        }
    }
}
