//! cli::commands::curate
//!
//! The `curate-evidence` handler: run the evidence lifecycle without
//! executing any plans.

use anyhow::{anyhow, Result};
use serde_json::json;

use crate::cli::args::Scope;
use crate::cli::Globals;
use crate::config;
use crate::core::paths::ConveyorPaths;
use crate::core::types::{PlanId, PlanPhase};
use crate::evidence::Curator;
use crate::plan::catalog::Catalog;
use crate::ui::output::{self, OutputMode};

pub fn curate(
    scope: Scope,
    plan_id: Option<&str>,
    dry_run: bool,
    globals: &Globals,
) -> Result<i32> {
    let root = globals.root()?;
    let paths = ConveyorPaths::new(root);
    let config = config::load(&paths)?;
    let output_mode = if globals.quiet {
        OutputMode::Minimal
    } else {
        OutputMode::Pretty
    };

    let catalog = Catalog::load(&paths)?;
    let filter = plan_id.map(PlanId::new).transpose()
        .map_err(|err| anyhow!("invalid --plan-id: {err}"))?;

    let selected: Vec<_> = catalog
        .all()
        .filter(|plan| match scope {
            Scope::All => plan.phase != PlanPhase::Future,
            Scope::Active => plan.phase == PlanPhase::Active,
            Scope::Completed => plan.phase == PlanPhase::Completed,
        })
        .filter(|plan| filter.as_ref().is_none_or(|id| &plan.id == id))
        .cloned()
        .collect();

    if let Some(id) = &filter {
        if selected.is_empty() {
            return Err(anyhow!("plan '{id}' not found in the selected scope"));
        }
    }

    let curator = Curator::new(&paths, &config.evidence, dry_run);
    let mut reports = Vec::new();
    for plan in &selected {
        let report = curator.curate_plan(plan, &catalog)?;
        output::print(
            output_mode,
            format!(
                "curated {}: {} indexed, {} pruned, {} doc(s) rewritten",
                report.plan_id, report.reference_count, report.pruned, report.rewritten_docs
            ),
        );
        reports.push(report);
    }

    if globals.json {
        let summary = json!({
            "dryRun": dry_run,
            "curated": reports
                .iter()
                .map(|r| json!({
                    "planId": r.plan_id.as_str(),
                    "indexPath": r.index_path.display().to_string(),
                    "references": r.reference_count,
                    "pruned": r.pruned,
                    "rewrittenDocs": r.rewritten_docs,
                    "signature": r.signature,
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        output::print(output_mode, format!("curated {} plan(s)", reports.len()));
    }

    Ok(0)
}
