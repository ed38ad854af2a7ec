//! cli::commands::audit
//!
//! Read-only invariant sweep over the catalog, run state, and event
//! log. Exit 0 when clean, 1 when any check fails.

use anyhow::Result;
use serde_json::json;

use crate::cli::args::Scope;
use crate::cli::Globals;
use crate::core::paths::ConveyorPaths;
use crate::plan::catalog::{Catalog, Plan};
use crate::plan::metadata::DoneEvidence;
use crate::core::types::{PlanPhase, PlanStatus};
use crate::state::events::{self, EventLog};
use crate::state::run_state::StateStore;
use crate::ui::output::{self, OutputMode};

/// One audit finding.
#[derive(Debug)]
struct Finding {
    check: &'static str,
    subject: String,
    message: String,
}

pub fn audit(scope: Scope, globals: &Globals) -> Result<i32> {
    let root = globals.root()?;
    let paths = ConveyorPaths::new(root);
    let output_mode = if globals.quiet {
        OutputMode::Minimal
    } else {
        OutputMode::Pretty
    };

    let mut findings: Vec<Finding> = Vec::new();

    // Catalog invariants (uniqueness, dependencies, safe targets) are
    // enforced by the loader itself.
    let catalog = match Catalog::load(&paths) {
        Ok(catalog) => Some(catalog),
        Err(err) => {
            findings.push(Finding {
                check: "catalog",
                subject: "catalog".to_string(),
                message: err.to_string(),
            });
            None
        }
    };

    if let Some(catalog) = &catalog {
        for plan in catalog.all() {
            if !in_scope(plan, scope) {
                continue;
            }
            if plan.status_violation() {
                findings.push(Finding {
                    check: "phase-status",
                    subject: plan.id.to_string(),
                    message: format!(
                        "status '{}' is not valid in the {} phase",
                        plan.metadata.status, plan.phase
                    ),
                });
            }
            if plan.phase == PlanPhase::Completed {
                audit_completed_plan(&paths, plan, &mut findings);
            }
        }
    }

    // Run-state set disjointness.
    let state_store = StateStore::new(&paths, true);
    match state_store.load() {
        Ok(Some(state)) => {
            for (name, left, right) in [
                ("completed∩failed", &state.completed_plan_ids, &state.failed_plan_ids),
                ("completed∩blocked", &state.completed_plan_ids, &state.blocked_plan_ids),
                ("blocked∩failed", &state.blocked_plan_ids, &state.failed_plan_ids),
            ] {
                for id in left.intersection(right) {
                    findings.push(Finding {
                        check: "state-sets",
                        subject: id.to_string(),
                        message: format!("plan appears in both cumulative sets ({name})"),
                    });
                }
            }
        }
        Ok(None) => {}
        Err(err) => findings.push(Finding {
            check: "state",
            subject: "run-state".to_string(),
            message: err.to_string(),
        }),
    }

    audit_events(&paths, &mut findings);

    if globals.json {
        let report = json!({
            "findings": findings
                .iter()
                .map(|f| json!({"check": f.check, "subject": f.subject, "message": f.message}))
                .collect::<Vec<_>>(),
            "clean": findings.is_empty(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if findings.is_empty() {
        output::print(output_mode, "audit clean");
    } else {
        for finding in &findings {
            output::error(format!(
                "[{}] {}: {}",
                finding.check, finding.subject, finding.message
            ));
        }
        output::error(format!("audit found {} issue(s)", findings.len()));
    }

    Ok(if findings.is_empty() { 0 } else { 1 })
}

fn in_scope(plan: &Plan, scope: Scope) -> bool {
    match scope {
        Scope::All => true,
        Scope::Active => plan.phase != PlanPhase::Completed,
        Scope::Completed => plan.phase == PlanPhase::Completed,
    }
}

/// Completed documents must carry `Status: completed` and point their
/// `Done-Evidence` at an existing canonical index.
fn audit_completed_plan(paths: &ConveyorPaths, plan: &Plan, findings: &mut Vec<Finding>) {
    if plan.metadata.status != PlanStatus::Completed {
        // Already reported as a phase-status violation.
        return;
    }
    let expected = paths.evidence_index_reference(&plan.id);
    match &plan.metadata.done_evidence {
        DoneEvidence::Pending => findings.push(Finding {
            check: "done-evidence",
            subject: plan.id.to_string(),
            message: "completed plan still has Done-Evidence: pending".to_string(),
        }),
        DoneEvidence::Paths(entries) => {
            if !entries.contains(&expected) {
                findings.push(Finding {
                    check: "done-evidence",
                    subject: plan.id.to_string(),
                    message: format!("Done-Evidence does not reference {expected}"),
                });
            } else if !paths.evidence_index_path(&plan.id).exists() {
                findings.push(Finding {
                    check: "done-evidence",
                    subject: plan.id.to_string(),
                    message: format!("canonical index {expected} is missing"),
                });
            }
        }
    }
}

/// Event-log invariants: parseable, redacted, per-plan timestamps
/// non-decreasing.
fn audit_events(paths: &ConveyorPaths, findings: &mut Vec<Finding>) {
    let log = EventLog::new(paths, true);
    let events = match log.read_all() {
        Ok(events) => events,
        Err(err) => {
            findings.push(Finding {
                check: "events",
                subject: "run-events".to_string(),
                message: err.to_string(),
            });
            return;
        }
    };

    let mut last_per_plan: std::collections::BTreeMap<String, String> = Default::default();
    for event in &events {
        if let Some(plan_id) = &event.task_id {
            let key = plan_id.to_string();
            if let Some(previous) = last_per_plan.get(&key) {
                if &event.timestamp < previous {
                    findings.push(Finding {
                        check: "event-order",
                        subject: key.clone(),
                        message: format!(
                            "timestamp {} precedes earlier event at {previous}",
                            event.timestamp
                        ),
                    });
                }
            }
            last_per_plan.insert(key, event.timestamp.clone());
        }

        check_redaction(&event.details, &mut |key| {
            findings.push(Finding {
                check: "redaction",
                subject: key.to_string(),
                message: "sensitive field persisted without redaction".to_string(),
            });
        });
    }
}

fn check_redaction(value: &serde_json::Value, report: &mut impl FnMut(&str)) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map {
                if events::is_sensitive_key(key) && entry != "[REDACTED]" {
                    report(key);
                } else {
                    check_redaction(entry, report);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                check_redaction(item, report);
            }
        }
        _ => {}
    }
}
