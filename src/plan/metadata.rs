//! plan::metadata
//!
//! In-band plan metadata: parsing and byte-preserving edits.
//!
//! # Document shape
//!
//! A plan document is Markdown whose metadata block is the first
//! contiguous run of `Key: value` lines (an optional `# Title` line and
//! blank lines may precede it). Set-valued fields are comma-separated.
//! `Dependencies: none` and `Done-Evidence: pending` are recognized
//! sentinels.
//!
//! The *top-level* `Status:` line is the first line matching `^Status:`
//! at column zero. [`rewrite_status`] rewrites exactly that line and
//! preserves every other byte, so repeated rewrites with the same status
//! are no-ops.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::types::{
    AutonomyAllowed, PlanId, PlanStatus, Priority, RiskTier, SecurityApproval, TypeError,
};

/// Errors from metadata parsing.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// A metadata field failed validation.
    #[error("invalid metadata field {field}: {source}")]
    InvalidField {
        field: &'static str,
        #[source]
        source: TypeError,
    },

    /// The document has no top-level `Status:` line.
    #[error("document has no top-level Status: line")]
    MissingStatus,
}

/// `Done-Evidence` is either the pending sentinel or a set of paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoneEvidence {
    Pending,
    Paths(BTreeSet<String>),
}

impl DoneEvidence {
    /// The document spelling of this value.
    pub fn render(&self) -> String {
        match self {
            DoneEvidence::Pending => "pending".to_string(),
            DoneEvidence::Paths(paths) => format_set(paths),
        }
    }
}

impl Default for DoneEvidence {
    fn default() -> Self {
        DoneEvidence::Pending
    }
}

/// Parsed plan metadata.
///
/// Fields absent from the document take their defaults; invalid values
/// are rejected at parse time.
#[derive(Debug, Clone)]
pub struct PlanMetadata {
    /// Explicit `Plan-ID` field, when present.
    pub plan_id: Option<PlanId>,
    pub status: PlanStatus,
    pub priority: Priority,
    pub owner: String,
    pub acceptance_criteria: String,
    pub dependencies: BTreeSet<PlanId>,
    pub spec_targets: BTreeSet<String>,
    pub done_evidence: DoneEvidence,
    pub autonomy_allowed: AutonomyAllowed,
    pub risk_tier: RiskTier,
    pub tags: BTreeSet<String>,
    pub security_approval: SecurityApproval,
    /// Named locks serializing this plan against others in parallel mode.
    pub concurrency_locks: BTreeSet<String>,
}

impl Default for PlanMetadata {
    fn default() -> Self {
        Self {
            plan_id: None,
            status: PlanStatus::Draft,
            priority: Priority::P2,
            owner: String::new(),
            acceptance_criteria: String::new(),
            dependencies: BTreeSet::new(),
            spec_targets: BTreeSet::new(),
            done_evidence: DoneEvidence::Pending,
            autonomy_allowed: AutonomyAllowed::Both,
            risk_tier: RiskTier::Low,
            tags: BTreeSet::new(),
            security_approval: SecurityApproval::NotRequired,
            concurrency_locks: BTreeSet::new(),
        }
    }
}

impl PlanMetadata {
    /// Parse the metadata block of a plan document.
    pub fn parse(content: &str) -> Result<Self, MetadataError> {
        let mut metadata = Self::default();

        for (key, value) in metadata_fields(content) {
            match key {
                "Plan-ID" => {
                    metadata.plan_id = Some(PlanId::new(value).map_err(|source| {
                        MetadataError::InvalidField {
                            field: "Plan-ID",
                            source,
                        }
                    })?);
                }
                "Status" => {
                    metadata.status = PlanStatus::parse(value).map_err(|source| {
                        MetadataError::InvalidField {
                            field: "Status",
                            source,
                        }
                    })?;
                }
                "Priority" => {
                    metadata.priority = Priority::parse(value).map_err(|source| {
                        MetadataError::InvalidField {
                            field: "Priority",
                            source,
                        }
                    })?;
                }
                "Owner" => metadata.owner = value.to_string(),
                "Acceptance-Criteria" => metadata.acceptance_criteria = value.to_string(),
                "Dependencies" => {
                    if value != "none" {
                        for entry in split_set(value) {
                            let id = PlanId::new(entry).map_err(|source| {
                                MetadataError::InvalidField {
                                    field: "Dependencies",
                                    source,
                                }
                            })?;
                            metadata.dependencies.insert(id);
                        }
                    }
                }
                "Spec-Targets" => {
                    metadata.spec_targets = split_set(value).map(String::from).collect();
                }
                "Done-Evidence" => {
                    metadata.done_evidence = if value == "pending" || value.is_empty() {
                        DoneEvidence::Pending
                    } else {
                        DoneEvidence::Paths(split_set(value).map(String::from).collect())
                    };
                }
                "Autonomy-Allowed" => {
                    metadata.autonomy_allowed =
                        AutonomyAllowed::parse(value).map_err(|source| {
                            MetadataError::InvalidField {
                                field: "Autonomy-Allowed",
                                source,
                            }
                        })?;
                }
                "Risk-Tier" => {
                    metadata.risk_tier = RiskTier::parse(value).map_err(|source| {
                        MetadataError::InvalidField {
                            field: "Risk-Tier",
                            source,
                        }
                    })?;
                }
                "Tags" => {
                    metadata.tags = split_set(value).map(str::to_lowercase).collect();
                }
                "Security-Approval" => {
                    metadata.security_approval =
                        SecurityApproval::parse(value).map_err(|source| {
                            MetadataError::InvalidField {
                                field: "Security-Approval",
                                source,
                            }
                        })?;
                }
                "Concurrency-Locks" => {
                    metadata.concurrency_locks = split_set(value).map(str::to_lowercase).collect();
                }
                // Unknown keys are preserved in the document but carry no
                // orchestrator semantics.
                _ => {}
            }
        }

        Ok(metadata)
    }

    /// The scope used for stage-reuse decisions: dependencies,
    /// spec-targets, and tags, rendered stably.
    pub fn scope_key(&self) -> String {
        let deps: Vec<&str> = self.dependencies.iter().map(PlanId::as_str).collect();
        let targets: Vec<&str> = self.spec_targets.iter().map(String::as_str).collect();
        let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        format!(
            "deps={};targets={};tags={}",
            deps.join(","),
            targets.join(","),
            tags.join(",")
        )
    }
}

fn split_set(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
}

/// Render a set field as the document spelling.
pub fn format_set(values: &BTreeSet<String>) -> String {
    values.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Locate the metadata block: the first contiguous run of `Key: value`
/// lines. Returns `(start, end)` line indexes (end exclusive), or `None`
/// when the document has no metadata block.
fn metadata_block(lines: &[&str]) -> Option<(usize, usize)> {
    let mut start = None;
    for (idx, line) in lines.iter().enumerate() {
        if is_field_line(line) {
            start = Some(idx);
            break;
        }
        // Titles and blank lines may precede the block.
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        return None;
    }
    let start = start?;
    let mut end = start;
    while end < lines.len() && is_field_line(lines[end]) {
        end += 1;
    }
    Some((start, end))
}

fn is_field_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((key, _)) => {
            !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
                && key.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        }
        None => false,
    }
}

fn metadata_fields(content: &str) -> Vec<(&str, &str)> {
    let lines: Vec<&str> = content.lines().collect();
    let Some((start, end)) = metadata_block(&lines) else {
        return Vec::new();
    };
    lines[start..end]
        .iter()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

/// The value of the top-level `Status:` line, if any.
pub fn top_level_status(content: &str) -> Option<&str> {
    content
        .lines()
        .find(|line| line.starts_with("Status:"))
        .map(|line| line["Status:".len()..].trim())
}

/// Rewrite exactly the top-level `Status:` line, preserving every other
/// byte of the document.
///
/// # Errors
///
/// Returns [`MetadataError::MissingStatus`] when the document has no
/// top-level `Status:` line.
pub fn rewrite_status(content: &str, status: PlanStatus) -> Result<String, MetadataError> {
    let start = if content.starts_with("Status:") {
        0
    } else {
        content
            .find("\nStatus:")
            .map(|idx| idx + 1)
            .ok_or(MetadataError::MissingStatus)?
    };
    let end = content[start..]
        .find('\n')
        .map(|idx| start + idx)
        .unwrap_or(content.len());

    let mut out = String::with_capacity(content.len() + 16);
    out.push_str(&content[..start]);
    out.push_str("Status: ");
    out.push_str(status.as_str());
    out.push_str(&content[end..]);
    Ok(out)
}

/// Upsert a metadata field: replace the field's line inside the metadata
/// block, or insert it at the end of the block when absent.
pub fn upsert_field(content: &str, key: &str, value: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let replacement = format!("{key}: {value}");
    let trailing_newline = content.ends_with('\n');

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 1);
    match metadata_block(&lines) {
        Some((start, end)) => {
            let mut replaced = false;
            for (idx, line) in lines.iter().enumerate() {
                if idx >= start && idx < end && !replaced {
                    if let Some((candidate, _)) = line.split_once(':') {
                        if candidate.trim() == key {
                            out.push(replacement.clone());
                            replaced = true;
                            continue;
                        }
                    }
                }
                if idx == end && !replaced {
                    out.push(replacement.clone());
                    replaced = true;
                }
                out.push((*line).to_string());
            }
            if !replaced {
                out.push(replacement);
            }
        }
        None => {
            // No metadata block: start one at the top of the document.
            out.push(replacement);
            out.extend(lines.iter().map(|line| (*line).to_string()));
        }
    }

    let mut result = out.join("\n");
    if trailing_newline {
        result.push('\n');
    }
    result
}
