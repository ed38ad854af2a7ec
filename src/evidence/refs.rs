//! evidence::refs
//!
//! Evidence reference extraction and rewriting in plan documents.
//!
//! # Extraction
//!
//! A reference is a Markdown link target `[...](path)` or an
//! inline-code span `` `path` `` whose normalized target contains
//! `/evidence/`. Targets are normalized against the plan's directory;
//! `docs/…` targets resolve from the repository root; external URLs are
//! ignored.
//!
//! # Rewriting
//!
//! When an artifact is pruned, every plan document that referenced it
//! is rewritten to the replacement target. Replacement covers the three
//! textual forms a reference can take: absolute-from-repo-root,
//! file-relative, and `./`-prefixed relative.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)\)").expect("link pattern compiles"))
}

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"`([^`\n]+)`").expect("code pattern compiles"))
}

/// Extract normalized evidence references from a plan document.
///
/// Returns absolute paths, deduplicated, in first-seen order.
pub fn extract_references(content: &str, plan_dir: &Path, repo_root: &Path) -> Vec<PathBuf> {
    let mut seen = Vec::new();
    let candidates = link_pattern()
        .captures_iter(content)
        .chain(code_pattern().captures_iter(content))
        .filter_map(|captures| captures.get(1))
        .map(|m| m.as_str());

    for candidate in candidates {
        let Some(normalized) = normalize(candidate, plan_dir, repo_root) else {
            continue;
        };
        if !normalized.to_string_lossy().contains("/evidence/") {
            continue;
        }
        if !seen.contains(&normalized) {
            seen.push(normalized);
        }
    }
    seen
}

/// Normalize one reference target to an absolute path, or `None` for
/// external URLs and targets escaping the repository.
fn normalize(target: &str, plan_dir: &Path, repo_root: &Path) -> Option<PathBuf> {
    if target.contains("://") {
        return None;
    }
    let target = target.split('#').next().unwrap_or(target);
    if target.is_empty() {
        return None;
    }

    let raw = if let Some(stripped) = target.strip_prefix("./") {
        plan_dir.join(stripped)
    } else if target.starts_with('/') {
        return None;
    } else if target.starts_with("docs/") {
        repo_root.join(target)
    } else {
        plan_dir.join(target)
    };

    let cleaned = clean_components(&raw)?;
    cleaned.starts_with(repo_root).then_some(cleaned)
}

/// Resolve `.` and `..` components lexically.
fn clean_components(path: &Path) -> Option<PathBuf> {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    return None;
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    Some(cleaned)
}

/// Express `target` relative to `base` (both absolute), inserting `..`
/// components as needed.
pub fn relative_from(base: &Path, target: &Path) -> PathBuf {
    let base_components: Vec<_> = base.components().collect();
    let target_components: Vec<_> = target.components().collect();

    let common = base_components
        .iter()
        .zip(target_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_components.len() {
        relative.push("..");
    }
    for component in &target_components[common..] {
        relative.push(component.as_os_str());
    }
    relative
}

/// Rewrite every reference to `old` in a plan document at `plan_dir`,
/// pointing it at `new` instead. All three textual forms are covered.
pub fn rewrite_references(
    content: &str,
    plan_dir: &Path,
    repo_root: &Path,
    old: &Path,
    new: &Path,
) -> String {
    let mut rewritten = content.to_string();

    let old_rel_root = relative_from(repo_root, old).display().to_string();
    let new_rel_root = relative_from(repo_root, new).display().to_string();
    let old_rel_file = relative_from(plan_dir, old).display().to_string();
    let new_rel_file = relative_from(plan_dir, new).display().to_string();

    // Longest forms first so the dot-prefixed form does not get a
    // partial replacement from the bare relative form.
    rewritten = rewritten.replace(
        &format!("./{old_rel_file}"),
        &format!("./{new_rel_file}"),
    );
    rewritten = rewritten.replace(&old_rel_root, &new_rel_root);
    rewritten = rewritten.replace(&old_rel_file, &new_rel_file);
    rewritten
}
