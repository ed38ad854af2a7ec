//! evidence::dedup
//!
//! Signature-keyed deduplication of rerun artifacts.
//!
//! # Signatures
//!
//! An artifact's signature is its stem with the numeric ordering prefix
//! stripped and a trailing tail of noise tokens dropped. Rerun families
//! like `01-foo-retry`, `02-foo-retry`, `03-foo` all collapse to the
//! signature `foo`, which keeps grouping stable across reruns.
//!
//! # Eligibility
//!
//! A group is deduplicated only when it holds more than
//! `keepMaxPerBlocker` files and either exhibits noise tokens or
//! consists entirely of numeric-prefixed files. The newest files (by
//! modification time) survive.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Trailing tokens that mark a rerun artifact rather than a distinct
/// blocker.
const NOISE_TOKENS: &[&str] = &[
    "rerun",
    "retry",
    "follow",
    "followup",
    "latest",
    "after",
    "post",
    "progress",
    "refresh",
    "next",
    "attempt",
    "continuation",
    "final",
    "step",
    "up",
    "current",
    "additional",
    "further",
    "more",
    "cont",
    "update",
    "updated",
];

/// Compute the signature key for an artifact stem.
pub fn signature(stem: &str) -> String {
    let stripped = strip_numeric_prefix(stem);
    let tokens: Vec<&str> = stripped.split('-').filter(|t| !t.is_empty()).collect();

    let mut end = tokens.len();
    while end > 1 && is_noise_token(tokens[end - 1]) {
        end -= 1;
    }
    tokens[..end].join("-")
}

/// Whether the stem carries a numeric ordering prefix (`01-`, `002-`).
pub fn has_numeric_prefix(stem: &str) -> bool {
    match stem.split_once('-') {
        Some((prefix, rest)) => {
            !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty()
        }
        None => false,
    }
}

/// Whether the stem ends in at least one noise token.
pub fn has_noise_tail(stem: &str) -> bool {
    strip_numeric_prefix(stem)
        .rsplit('-')
        .next()
        .is_some_and(is_noise_token)
}

fn strip_numeric_prefix(stem: &str) -> &str {
    match stem.split_once('-') {
        Some((prefix, rest))
            if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() =>
        {
            rest
        }
        _ => stem,
    }
}

fn is_noise_token(token: &str) -> bool {
    NOISE_TOKENS.contains(&token) || token.chars().all(|c| c.is_ascii_digit())
}

/// One file scheduled for removal, with the survivor kept in its place.
#[derive(Debug, Clone)]
pub struct PrunedFile {
    pub path: PathBuf,
    pub survivor: PathBuf,
    pub signature: String,
}

/// Plan the deduplication of one evidence directory.
///
/// Pure with respect to the decision: the directory is only read.
/// Returns the files to prune, oldest first.
pub fn plan_dedup(dir: &Path, keep_max: usize) -> std::io::Result<Vec<PrunedFile>> {
    let mut groups: Vec<(String, Vec<(PathBuf, SystemTime)>)> = Vec::new();

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name != "README.md")
        })
        .collect();
    entries.sort();

    for path in entries {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let key = signature(&stem);
        let modified = fs::metadata(&path)?.modified()?;
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, members)) => members.push((path, modified)),
            None => groups.push((key, vec![(path, modified)])),
        }
    }

    let mut pruned = Vec::new();
    for (key, mut members) in groups {
        if members.len() <= keep_max || keep_max == 0 {
            continue;
        }

        let stems: Vec<String> = members
            .iter()
            .map(|(path, _)| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();
        let noisy = stems.iter().any(|stem| has_noise_tail(stem));
        let all_numeric = stems.iter().all(|stem| has_numeric_prefix(stem));
        if !noisy && !all_numeric {
            continue;
        }

        // Newest first; ties broken by path for determinism.
        members.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let survivor = members[0].0.clone();
        for (path, _) in members.into_iter().skip(keep_max) {
            pruned.push(PrunedFile {
                path,
                survivor: survivor.clone(),
                signature: key.clone(),
            });
        }
    }

    pruned.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(pruned)
}
