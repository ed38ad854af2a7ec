//! engine::fsm
//!
//! The per-plan state machine.
//!
//! # Lifecycle
//!
//! ```text
//! Admitted -> InProgress -> (RoleLoop) -> CompletionGate ->
//! ValidationAlways -> ValidationHost -> SecurityApproval? -> Finalized
//! ```
//!
//! with branches to Blocked, Failed, and Pending. Each session iterates:
//! policy gate, session dispatch, outcome classification, handoff
//! bookkeeping, stage advancement. After the final stage the completion
//! gate checks the document's own `Status:` line; an incomplete
//! document rewinds the pipeline to the worker stage and loops, bounded
//! by the session budget.
//!
//! # Invariants
//!
//! - Handoffs beyond `maxRollovers` convert the plan to `Failed`
//! - A plan leaves this function with exactly one terminal event
//! - State is persisted before every session dispatch, so an
//!   interrupted run resumes at the same stage

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use crate::config::model::RoleProfile;
use crate::core::types::{PlanId, PlanStatus, Role, SecurityApproval};
use crate::evidence::Curator;
use crate::git::Repo;
use crate::plan::catalog::{derive_plan_id, Catalog, Plan};
use crate::plan::metadata::PlanMetadata;
use crate::plan::store::{FinalizeSections, PlanStore};
use crate::state::events::{Event, EventKind, EventLog};
use crate::state::run_state::{InProgress, LaneStatus, RunState, StateStore, ValidationState};
use crate::ui::output;
use crate::validation::host::{HostContext, HostStatus};
use crate::validation::{self, LaneOutcome};

use super::session::{self, ClassifyKnobs, SessionOutcome, SessionSpec};
use super::{gate, pipeline, risk, EngineContext, EngineError};

/// Terminal outcome of one plan for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    Completed,
    Blocked { reason: String },
    Failed { reason: String },
    Pending { reason: String },
}

impl PlanOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PlanOutcome::Completed => "completed",
            PlanOutcome::Blocked { .. } => "blocked",
            PlanOutcome::Failed { .. } => "failed",
            PlanOutcome::Pending { .. } => "pending",
        }
    }
}

/// Everything the FSM writes through.
pub struct PlanResources<'a> {
    pub store: &'a PlanStore<'a>,
    pub state_store: &'a StateStore<'a>,
    pub events: &'a EventLog,
}

/// Drive one plan through the state machine.
#[allow(clippy::too_many_lines)]
pub fn execute_plan(
    ctx: &EngineContext<'_>,
    plan: &Plan,
    catalog: &Catalog,
    state: &mut RunState,
    resources: &PlanResources<'_>,
) -> Result<PlanOutcome, EngineError> {
    let mut plan = plan.clone();
    let executor = &ctx.config.executor;

    emit(ctx, resources, &plan.id, EventKind::PlanStarted, None, json!({
        "priority": plan.metadata.priority.as_str(),
        "declaredTier": plan.metadata.risk_tier.as_str(),
    }))?;

    let mut session_index: u32 = 0;
    let mut rollovers: u32 = 0;

    loop {
        session_index += 1;
        if session_index > executor.max_sessions_per_plan {
            return pending(
                ctx,
                resources,
                state,
                &plan.id,
                format!(
                    "session budget exhausted ({} sessions)",
                    executor.max_sessions_per_plan
                ),
                "scheduler",
            );
        }

        // Assess risk with the run history folded in.
        let prior_failures = prior_validation_failures(state, &plan.id);
        let assessment = risk::assess(
            &plan,
            &ctx.config.role_orchestration.risk_model,
            &ctx.config.role_orchestration.approval_gates,
            ctx.mode,
            prior_failures,
        );

        // Reconcile pipeline state with the assessment.
        let now = Utc::now();
        let stages = pipeline::resolve_stages(
            &ctx.config.role_orchestration.pipelines,
            ctx.config.role_orchestration.enabled,
            assessment.effective,
        );
        let scope = plan.metadata.scope_key();
        let (reused_stages, stage_key) = {
            let entry = state
                .role_state
                .entry(plan.id.clone())
                .and_modify(|entry| pipeline::sync(entry, &assessment, stages.clone(), now))
                .or_insert_with(|| {
                    pipeline::new_role_state(&assessment, stages.clone(), scope.clone(), now)
                });
            (pipeline::apply_stage_reuse(entry, &scope), entry.stage_key.clone())
        };
        for reused in reused_stages {
            let details = json!({"role": reused.as_str(), "stageKey": stage_key});
            emit(ctx, resources, &plan.id, EventKind::RoleStageReused, None, details)?;
        }

        // 1. Policy gate.
        match gate::evaluate(&plan, &assessment, ctx.mode, ctx.env) {
            gate::GateDecision::Allowed => {}
            gate::GateDecision::Blocked { reason } => {
                resources.store.set_status(&plan, PlanStatus::Blocked)?;
                state.mark_blocked(&plan.id);
                return blocked(ctx, resources, state, &plan.id, reason);
            }
        }

        let entry = state.role_state.get(&plan.id).cloned().expect("role state present");
        let Some(role) = pipeline::current_role(&entry) else {
            // Resume landed past the last stage: fall to the completion
            // gate directly.
            match completion_gate(ctx, &mut plan, state, resources, session_index)? {
                GateStep::Loop => continue,
                GateStep::Budget(outcome) => return Ok(outcome),
                GateStep::Finish => {
                    return finish_plan(
                        ctx, &mut plan, catalog, state, resources, &assessment,
                    );
                }
            }
        };

        // 2. Session dispatch.
        if plan.metadata.status == PlanStatus::Queued || plan.metadata.status == PlanStatus::Validation {
            resources.store.set_status(&plan, PlanStatus::InProgress)?;
            plan = reload(&plan)?;
        }

        let profile = ctx
            .config
            .role_orchestration
            .role_profiles
            .get(&role)
            .cloned()
            .unwrap_or_else(|| RoleProfile {
                model: "default".to_string(),
                reasoning_effort: crate::config::model::ReasoningEffort::Medium,
                sandbox_mode: if role == Role::Worker {
                    crate::config::model::SandboxMode::FullAccess
                } else {
                    crate::config::model::SandboxMode::ReadOnly
                },
                instructions: String::new(),
            });

        let result_path =
            ctx.paths
                .session_result_path(&ctx.run_id, &plan.id, role, session_index);
        if !ctx.dry_run {
            let run_dir = ctx.paths.run_dir(&ctx.run_id);
            std::fs::create_dir_all(&run_dir).map_err(|source| {
                EngineError::Store(crate::plan::store::StoreError::Io {
                    path: run_dir.display().to_string(),
                    source,
                })
            })?;
        }
        let spec = build_session_spec(ctx, &plan, &assessment, &entry, role, &profile, session_index, &result_path);

        state.in_progress = Some(InProgress {
            plan_id: plan.id.clone(),
            role,
            session: session_index,
        });
        persist(state, resources)?;

        emit(
            ctx, resources, &plan.id, EventKind::SessionStarted,
            Some(profile.model.clone()),
            json!({
                "session": session_index,
                "role": role.as_str(),
                "stageIndex": entry.current_index,
                "stageTotal": entry.stages.len(),
            }),
        )?;
        output::print(
            ctx.output,
            format!(
                "session {session_index}: {} ({role}, tier {})",
                plan.id, assessment.effective
            ),
        );

        let raw = if ctx.dry_run {
            // Decisions proceed, subprocesses do not.
            session::RawSessionResult {
                exit: session::ExitDisposition::Code(0),
                captured: String::new(),
                duration: Duration::ZERO,
            }
        } else {
            session::run(&spec)?
        };

        let payload = if ctx.dry_run {
            None
        } else {
            session::load_payload(&result_path)
        };
        let knobs = ClassifyKnobs {
            handoff_exit_code: executor.handoff_exit_code,
            require_result_payload: executor.require_result_payload && !ctx.dry_run,
            context_threshold: executor.context_threshold,
        };
        let outcome = session::classify(raw.exit, payload.as_ref(), &knobs);

        state.in_progress = None;
        emit(
            ctx, resources, &plan.id, EventKind::SessionFinished,
            Some(profile.model.clone()),
            json!({
                "session": session_index,
                "role": role.as_str(),
                "outcome": outcome_label(&outcome),
                "durationSeconds": raw.duration.as_secs(),
            }),
        )?;

        // 3-6. Act on the classified outcome.
        match outcome {
            SessionOutcome::HandoffRequired { reason } => {
                rollovers += 1;
                state.stats.handoffs += 1;
                write_handoff_note(ctx, &plan, role, session_index, &reason)?;
                emit(ctx, resources, &plan.id, EventKind::HandoffRecorded, None, json!({
                    "session": session_index,
                    "reason": reason,
                    "rollovers": rollovers,
                }))?;

                if rollovers > executor.max_rollovers {
                    let reason = format!("Maximum rollovers exceeded ({})", executor.max_rollovers);
                    resources.store.set_status(&plan, PlanStatus::Failed)?;
                    state.mark_failed(&plan.id);
                    return failed(ctx, resources, state, &plan.id, reason, Vec::new());
                }
                persist(state, resources)?;
                continue; // same stage, next session
            }
            SessionOutcome::Blocked { reason } => {
                // The executor is waiting on something outside this run;
                // the plan stays in-progress and the scheduler moves on.
                return pending(ctx, resources, state, &plan.id, reason, "scheduler");
            }
            SessionOutcome::Failed { reason } => {
                resources.store.set_status(&plan, PlanStatus::Failed)?;
                state.mark_failed(&plan.id);
                let tail = output::tail_lines(&raw.captured, ctx.config.logging.failure_tail_lines);
                return failed(ctx, resources, state, &plan.id, reason, tail);
            }
            SessionOutcome::Pending { reason } => {
                return pending(ctx, resources, state, &plan.id, reason, "session");
            }
            SessionOutcome::Completed { .. } => {}
        }

        // 7. Refresh from disk; the executor may have completed the
        // document itself (including moving it to completed/).
        match reload_or_relocate(ctx, &plan)? {
            Relocation::InPlace(updated) => plan = updated,
            Relocation::MovedCompleted(completed_plan) => {
                // The executor finished and moved the document itself:
                // canonicalize and commit without re-running the lanes.
                plan = completed_plan;
                return canonicalize_and_complete(
                    ctx, &mut plan, catalog, state, resources, &assessment,
                );
            }
        }

        // 8. Advance the stage.
        let now = Utc::now();
        let entry = state.role_state.get_mut(&plan.id).expect("role state present");
        pipeline::advance(entry, &plan.metadata.scope_key(), now);
        let stage_done = pipeline::is_complete(entry);
        let stage_key = entry.stage_key.clone();
        if !stage_done {
            emit(ctx, resources, &plan.id, EventKind::RoleStageAdvanced, None, json!({
                "completedRole": role.as_str(),
                "stageKey": stage_key,
            }))?;
            persist(state, resources)?;
            continue;
        }

        // 9. Completion gate.
        match completion_gate(ctx, &mut plan, state, resources, session_index)? {
            GateStep::Loop => continue,
            GateStep::Budget(outcome) => return Ok(outcome),
            GateStep::Finish => {
                return finish_plan(ctx, &mut plan, catalog, state, resources, &assessment);
            }
        }
    }
}

enum GateStep {
    /// Document incomplete: pipeline rewound, loop again.
    Loop,
    /// Session budget exhausted while looping.
    Budget(PlanOutcome),
    /// Document says completed: proceed to validation and finalize.
    Finish,
}

fn completion_gate(
    ctx: &EngineContext<'_>,
    plan: &mut Plan,
    state: &mut RunState,
    resources: &PlanResources<'_>,
    session_index: u32,
) -> Result<GateStep, EngineError> {
    *plan = reload(plan)?;
    if plan.metadata.status == PlanStatus::Completed {
        return Ok(GateStep::Finish);
    }

    if session_index >= ctx.config.executor.max_sessions_per_plan {
        let outcome = pending(
            ctx,
            resources,
            state,
            &plan.id,
            "pipeline finished without completed status and session budget exhausted".to_string(),
            "scheduler",
        )?;
        return Ok(GateStep::Budget(outcome));
    }

    let now = Utc::now();
    if let Some(entry) = state.role_state.get_mut(&plan.id) {
        pipeline::rewind_to_worker(entry, now);
    }
    state
        .validation_state
        .insert(plan.id.clone(), ValidationState::pending(now));
    persist(state, resources)?;
    Ok(GateStep::Loop)
}

/// Validation, security approval, evidence, finalize, commit.
fn finish_plan(
    ctx: &EngineContext<'_>,
    plan: &mut Plan,
    catalog: &Catalog,
    state: &mut RunState,
    resources: &PlanResources<'_>,
    assessment: &risk::RiskAssessment,
) -> Result<PlanOutcome, EngineError> {
    let validation = &ctx.config.validation;

    // 10. Security approval.
    if assessment.requires_security_approval
        && plan.metadata.security_approval != SecurityApproval::Approved
    {
        if plan.metadata.security_approval == SecurityApproval::NotRequired {
            resources.store.upsert_plan_field(
                plan,
                &ctx.config
                    .role_orchestration
                    .approval_gates
                    .security_approval_metadata_field,
                SecurityApproval::Pending.as_str(),
            )?;
        }
        resources.store.set_status(plan, PlanStatus::Blocked)?;
        state.mark_blocked(&plan.id);
        emit(ctx, resources, &plan.id, EventKind::SecurityApprovalPending, None, json!({
            "effectiveTier": assessment.effective.as_str(),
        }))?;
        return blocked(
            ctx,
            resources,
            state,
            &plan.id,
            format!(
                "security approval pending for {} tier",
                assessment.effective
            ),
        );
    }

    // 11. Always lane.
    if plan.phase == crate::core::types::PlanPhase::Active {
        resources.store.set_status(plan, PlanStatus::Validation)?;
    }
    let now = Utc::now();
    let lane_timeout = Duration::from_secs(validation.timeout_seconds);
    let always = if ctx.dry_run {
        LaneOutcome::Passed
    } else {
        validation::run_always_lane(
            &validation.always,
            ctx.paths.repo_root(),
            lane_timeout,
            ctx.config.logging.failure_tail_lines,
        )
    };

    let mut lanes = state
        .validation_state
        .get(&plan.id)
        .cloned()
        .unwrap_or_else(|| ValidationState::pending(now));

    match always {
        LaneOutcome::Failed {
            command,
            reason,
            tail,
        } => {
            state.stats.validation_failures += 1;
            lanes.always = LaneStatus::Failed;
            lanes.reason = Some(format!("{command}: {reason}"));
            lanes.updated_at = Utc::now().to_rfc3339();
            state.validation_state.insert(plan.id.clone(), lanes);
            resources.store.set_status(plan, PlanStatus::Failed)?;
            state.mark_failed(&plan.id);
            emit(ctx, resources, &plan.id, EventKind::ValidationFailed, None, json!({
                "lane": "always",
                "command": command,
                "reason": reason,
            }))?;
            return failed(
                ctx,
                resources,
                state,
                &plan.id,
                format!("validation failed: {command} ({reason})"),
                tail,
            );
        }
        LaneOutcome::Passed => {
            lanes.always = LaneStatus::Passed;
            lanes.updated_at = Utc::now().to_rfc3339();
            state.validation_state.insert(plan.id.clone(), lanes);
            emit(ctx, resources, &plan.id, EventKind::ValidationPassed, None, json!({
                "lane": "always",
                "commands": validation.always.len(),
            }))?;
        }
    }

    // 12. Host lane.
    let capabilities = state
        .capabilities
        .clone()
        .unwrap_or_else(|| super::capabilities::probe(ctx.env, Utc::now()));
    let host_result_path = ctx.paths.host_validation_result_path(&ctx.run_id, &plan.id);
    let host_env = vec![
        (
            "ORCH_HOST_PROVIDER".to_string(),
            validation.host.mode.as_str().to_string(),
        ),
        (
            "ORCH_HOST_VALIDATION_COMMANDS".to_string(),
            validation.host_required.join(";;"),
        ),
        (
            "ORCH_HOST_VALIDATION_RESULT_PATH".to_string(),
            host_result_path.display().to_string(),
        ),
    ];
    let host = if ctx.dry_run {
        crate::validation::host::HostResult {
            status: HostStatus::Passed,
            provider: "dry-run".to_string(),
            reason: "dry run".to_string(),
        }
    } else {
        crate::validation::host::run_host_lane(&HostContext {
            config: &validation.host,
            host_required: &validation.host_required,
            capabilities: &capabilities,
            cwd: ctx.paths.repo_root(),
            result_path: host_result_path,
            default_timeout: lane_timeout,
            env: host_env,
        })
    };

    let mut lanes = state
        .validation_state
        .get(&plan.id)
        .cloned()
        .unwrap_or_else(|| ValidationState::pending(Utc::now()));
    lanes.provider = Some(host.provider.clone());
    lanes.reason = Some(host.reason.clone());
    lanes.updated_at = Utc::now().to_rfc3339();

    match host.status {
        HostStatus::Failed => {
            lanes.host = LaneStatus::Failed;
            state.validation_state.insert(plan.id.clone(), lanes);
            state.stats.validation_failures += 1;
            resources.store.set_status(plan, PlanStatus::Failed)?;
            state.mark_failed(&plan.id);
            emit(ctx, resources, &plan.id, EventKind::HostValidationFailed, None, json!({
                "provider": host.provider,
                "reason": host.reason,
            }))?;
            return failed(
                ctx,
                resources,
                state,
                &plan.id,
                format!("host validation failed via {}: {}", host.provider, host.reason),
                Vec::new(),
            );
        }
        HostStatus::Pending | HostStatus::Unavailable => {
            state.validation_state.insert(plan.id.clone(), lanes);
            resources.store.set_status(plan, PlanStatus::InProgress)?;
            resources.store.upsert_plan_section(
                plan,
                "Host Validation",
                &format!(
                    "Status: pending\nProvider: {}\nReason: {}",
                    host.provider, host.reason
                ),
            )?;
            emit(ctx, resources, &plan.id, EventKind::HostValidationBlocked, None, json!({
                "provider": host.provider,
                "reason": host.reason,
            }))?;
            return pending(
                ctx,
                resources,
                state,
                &plan.id,
                format!("host validation pending via {}: {}", host.provider, host.reason),
                "scheduler",
            );
        }
        HostStatus::Passed => {
            lanes.host = LaneStatus::Passed;
            state.validation_state.insert(plan.id.clone(), lanes);
            resources.store.upsert_plan_section(
                plan,
                "Host Validation",
                &format!(
                    "Status: passed\nProvider: {}\nReason: {}",
                    host.provider, host.reason
                ),
            )?;
            emit(ctx, resources, &plan.id, EventKind::HostValidationPassed, None, json!({
                "provider": host.provider,
            }))?;
        }
    }

    canonicalize_and_complete(ctx, plan, catalog, state, resources, assessment)
}

/// Steps 13-14: evidence curation, finalize, delivery log, commit.
///
/// Also the whole tail for documents the executor completed and moved
/// itself, which skip the validation lanes.
fn canonicalize_and_complete(
    ctx: &EngineContext<'_>,
    plan: &mut Plan,
    catalog: &Catalog,
    state: &mut RunState,
    resources: &PlanResources<'_>,
    assessment: &risk::RiskAssessment,
) -> Result<PlanOutcome, EngineError> {
    let validation = &ctx.config.validation;
    let mut evidence_line = "Evidence curation disabled for this run.".to_string();
    if ctx.config.evidence.lifecycle.prune_on_complete {
        let curator = Curator::new(ctx.paths, &ctx.config.evidence, ctx.dry_run);
        let report = curator.curate_plan(plan, catalog)?;
        evidence_line = format!(
            "{} artifacts indexed, {} pruned",
            report.reference_count, report.pruned
        );
        state
            .evidence_state
            .insert(plan.id.clone(), report.state_entry(ctx.paths, Utc::now()));
        emit(ctx, resources, &plan.id, EventKind::EvidenceCurated, None, json!({
            "indexed": report.reference_count,
            "pruned": report.pruned,
            "rewrittenDocs": report.rewritten_docs,
        }))?;
    }

    // 14. Finalize and commit.
    let now = Utc::now();
    let lanes = state.validation_state.get(&plan.id);
    let always_line = match lanes.map(|lane| lane.always) {
        Some(LaneStatus::Passed) => format!("passed ({} commands)", validation.always.len()),
        Some(LaneStatus::Failed) => "failed".to_string(),
        _ => "not run (document completed by executor)".to_string(),
    };
    let host_line = match lanes.map(|lane| lane.host) {
        Some(LaneStatus::Passed) => format!(
            "passed via {}",
            lanes
                .and_then(|lane| lane.provider.clone())
                .unwrap_or_else(|| "local".to_string())
        ),
        Some(LaneStatus::Failed) => "failed".to_string(),
        _ => "not run (document completed by executor)".to_string(),
    };
    let sections = FinalizeSections {
        validation_evidence: format!("- always lane: {always_line}\n- host lane: {host_line}"),
        completion_snapshot: format!(
            "Completed {} in mode {} at effective risk tier {}.",
            now.format("%Y-%m-%d"),
            ctx.mode,
            assessment.effective
        ),
        evidence_index: Some(format!(
            "[{}]({})",
            ctx.paths.evidence_index_reference(&plan.id),
            evidence_index_link(plan, ctx, &plan.id)
        )),
        closure: evidence_line,
    };
    let final_path = resources.store.finalize(plan, &sections, now)?;

    // Delivery log for product-spec targets.
    for target in &plan.metadata.spec_targets {
        let Ok(path) = ctx.paths.safe_join(target) else {
            continue;
        };
        if path.starts_with(ctx.paths.product_specs_dir()) && path.exists() {
            resources.store.append_to_delivery_log(
                &path,
                &format!("{}: exec-plan {} completed", now.format("%Y-%m-%d"), plan.id),
            )?;
        }
    }

    if ctx.commit && !ctx.dry_run {
        match commit_completion(ctx, &plan.id) {
            Ok(Some(commit_id)) => {
                state.stats.commits += 1;
                emit(ctx, resources, &plan.id, EventKind::CommitCreated, None, json!({
                    "commit": commit_id,
                }))?;
            }
            Ok(None) => {} // no repo or clean tree
            Err(err) => {
                state.mark_failed(&plan.id);
                return failed(
                    ctx,
                    resources,
                    state,
                    &plan.id,
                    format!("atomic commit failed: {err}"),
                    Vec::new(),
                );
            }
        }
    }

    state.mark_completed(&plan.id);
    emit(ctx, resources, &plan.id, EventKind::PlanCompleted, None, json!({
        "path": final_path.display().to_string(),
    }))?;
    persist(state, resources)?;
    output::print(ctx.output, format!("completed: {}", plan.id));
    Ok(PlanOutcome::Completed)
}

/// Run the atomic completion commit.
///
/// Skips quietly without a repository or with a clean tree; refuses in
/// allow-dirty mode (the startup assertion already rejects the
/// combination, this is the runtime backstop).
fn commit_completion(
    ctx: &EngineContext<'_>,
    plan_id: &PlanId,
) -> Result<Option<String>, crate::git::GitError> {
    if ctx.allow_dirty {
        return Ok(None);
    }
    let Some(repo) = Repo::try_open(ctx.paths.repo_root()) else {
        return Ok(None);
    };
    if !repo.is_dirty()? {
        return Ok(None);
    }
    repo.stage_all()?;
    let commit_id = repo.commit(&format!("exec-plan({plan_id}): complete"))?;
    Ok(Some(commit_id))
}

enum Relocation {
    InPlace(Plan),
    MovedCompleted(Plan),
}

/// Reload the plan from disk, following it into `completed/` when the
/// executor moved the file itself.
fn reload_or_relocate(ctx: &EngineContext<'_>, plan: &Plan) -> Result<Relocation, EngineError> {
    if plan.path.exists() {
        return Ok(Relocation::InPlace(reload(plan)?));
    }

    // Look for the plan id among completed documents.
    let completed_dir = ctx.paths.completed_dir();
    if completed_dir.exists() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&completed_dir)
            .map_err(|source| EngineError::Store(crate::plan::store::StoreError::Io {
                path: completed_dir.display().to_string(),
                source,
            }))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .collect();
        entries.sort();
        for path in entries {
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(metadata) = PlanMetadata::parse(&content) else {
                continue;
            };
            let Ok(id) = derive_plan_id(&path, &metadata) else {
                continue;
            };
            if id == plan.id && metadata.status == PlanStatus::Completed {
                return Ok(Relocation::MovedCompleted(Plan {
                    id,
                    phase: crate::core::types::PlanPhase::Completed,
                    path,
                    metadata,
                }));
            }
        }
    }

    // Gone without a completed counterpart: surface as an IO problem.
    Err(EngineError::Store(crate::plan::store::StoreError::Io {
        path: plan.path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "plan document disappeared"),
    }))
}

fn reload(plan: &Plan) -> Result<Plan, EngineError> {
    let content = std::fs::read_to_string(&plan.path).map_err(|source| {
        EngineError::Store(crate::plan::store::StoreError::Io {
            path: plan.path.display().to_string(),
            source,
        })
    })?;
    let metadata = PlanMetadata::parse(&content)
        .map_err(|source| EngineError::Store(crate::plan::store::StoreError::Metadata(source)))?;
    Ok(Plan {
        id: plan.id.clone(),
        phase: plan.phase,
        path: plan.path.clone(),
        metadata,
    })
}

fn prior_validation_failures(state: &RunState, plan_id: &PlanId) -> u32 {
    state
        .validation_state
        .get(plan_id)
        .map(|lanes| {
            let mut count = 0;
            if lanes.always == LaneStatus::Failed {
                count += 1;
            }
            if lanes.host == LaneStatus::Failed {
                count += 1;
            }
            count
        })
        .unwrap_or(0)
}

#[allow(clippy::too_many_arguments)]
fn build_session_spec(
    ctx: &EngineContext<'_>,
    plan: &Plan,
    assessment: &risk::RiskAssessment,
    entry: &crate::state::run_state::RoleState,
    role: Role,
    profile: &RoleProfile,
    session_index: u32,
    result_path: &PathBuf,
) -> SessionSpec {
    let executor = &ctx.config.executor;
    let stage_index = entry.current_index.to_string();
    let stage_total = entry.stages.len().to_string();

    let shell_command = session::render_command(
        &ctx.command_template,
        &[
            ("plan_id", plan.id.to_string()),
            ("plan_file", plan.path.display().to_string()),
            ("run_id", ctx.run_id.clone()),
            ("mode", ctx.mode.to_string()),
            ("session", session_index.to_string()),
            ("role", role.to_string()),
            ("effective_risk_tier", assessment.effective.to_string()),
            ("declared_risk_tier", assessment.declared.to_string()),
            ("stage_index", stage_index.clone()),
            ("stage_total", stage_total.clone()),
            ("result_path", result_path.display().to_string()),
            ("prompt", profile.instructions.clone()),
        ],
    );

    let env = vec![
        ("ORCH_RUN_ID".to_string(), ctx.run_id.clone()),
        ("ORCH_PLAN_ID".to_string(), plan.id.to_string()),
        ("ORCH_PLAN_FILE".to_string(), plan.path.display().to_string()),
        ("ORCH_SESSION".to_string(), session_index.to_string()),
        ("ORCH_ROLE".to_string(), role.to_string()),
        ("ORCH_MODE".to_string(), ctx.mode.to_string()),
        ("ORCH_RESULT_PATH".to_string(), result_path.display().to_string()),
        (
            "ORCH_CONTEXT_THRESHOLD".to_string(),
            executor.context_threshold.to_string(),
        ),
        (
            "ORCH_HANDOFF_TOKEN_BUDGET".to_string(),
            executor.handoff_token_budget.to_string(),
        ),
        (
            "ORCH_EFFECTIVE_RISK_TIER".to_string(),
            assessment.effective.to_string(),
        ),
        (
            "ORCH_DECLARED_RISK_TIER".to_string(),
            assessment.declared.to_string(),
        ),
        ("ORCH_STAGE_INDEX".to_string(), stage_index),
        ("ORCH_STAGE_TOTAL".to_string(), stage_total),
        ("ORCH_ROLE_MODEL".to_string(), profile.model.clone()),
        (
            "ORCH_ROLE_REASONING_EFFORT".to_string(),
            profile.reasoning_effort.as_str().to_string(),
        ),
        (
            "ORCH_ROLE_SANDBOX_MODE".to_string(),
            profile.sandbox_mode.as_str().to_string(),
        ),
        (
            "ORCH_ROLE_INSTRUCTIONS".to_string(),
            profile.instructions.clone(),
        ),
    ];

    SessionSpec {
        shell_command,
        env,
        cwd: ctx.paths.repo_root().to_path_buf(),
        log_path: ctx
            .paths
            .session_log_path(&ctx.run_id, &plan.id, role, session_index),
        plan_id: plan.id.to_string(),
        role: role.to_string(),
        session: session_index,
        timeout: Duration::from_secs(executor.timeout_seconds),
        heartbeat: Duration::from_secs(ctx.config.logging.heartbeat_seconds.max(1)),
        stall_warn: Duration::from_secs(ctx.config.logging.stall_warn_seconds.max(1)),
        output_mode: ctx.output,
    }
}

fn write_handoff_note(
    ctx: &EngineContext<'_>,
    plan: &Plan,
    role: Role,
    session_index: u32,
    reason: &str,
) -> Result<(), EngineError> {
    if ctx.dry_run {
        return Ok(());
    }
    let dir = ctx.paths.handoff_dir(&plan.id);
    std::fs::create_dir_all(&dir).map_err(|source| {
        EngineError::Store(crate::plan::store::StoreError::Io {
            path: dir.display().to_string(),
            source,
        })
    })?;
    let now = Utc::now();
    let path = dir.join(format!(
        "{}-session-{}.md",
        now.format("%Y%m%dT%H%M%S%3f"),
        session_index
    ));
    let note = format!(
        "# Handoff: {}\n\nPlan-ID: {}\nRole: {}\nSession: {}\nRecorded: {}\n\n\
         ## Reason\n\n{}\n\n\
         ## Next Session Checklist\n\n\
         - Re-read the plan document and this note before resuming\n\
         - Resume at the `{}` stage; earlier stages are recorded in run state\n\
         - Keep the plan's `Status:` line current as work lands\n",
        plan.id,
        plan.id,
        role,
        session_index,
        now.to_rfc3339(),
        reason,
        role
    );
    std::fs::write(&path, note).map_err(|source| {
        EngineError::Store(crate::plan::store::StoreError::Io {
            path: path.display().to_string(),
            source,
        })
    })?;
    Ok(())
}

fn evidence_index_link(plan: &Plan, ctx: &EngineContext<'_>, plan_id: &PlanId) -> String {
    let index = ctx.paths.evidence_index_path(plan_id);
    let plan_dir = plan
        .path
        .parent()
        .unwrap_or_else(|| ctx.paths.repo_root());
    crate::evidence::refs::relative_from(plan_dir, &index)
        .display()
        .to_string()
}

fn outcome_label(outcome: &SessionOutcome) -> &'static str {
    match outcome {
        SessionOutcome::Completed { .. } => "completed",
        SessionOutcome::HandoffRequired { .. } => "handoff_required",
        SessionOutcome::Blocked { .. } => "blocked",
        SessionOutcome::Failed { .. } => "failed",
        SessionOutcome::Pending { .. } => "pending",
    }
}

// =========================================================================
// Terminal outcome helpers: event + persist + return
// =========================================================================

fn emit(
    ctx: &EngineContext<'_>,
    resources: &PlanResources<'_>,
    plan_id: &PlanId,
    kind: EventKind,
    model: Option<String>,
    details: serde_json::Value,
) -> Result<(), EngineError> {
    let mut event = Event::new(kind, ctx.run_id.clone(), ctx.mode, Utc::now())
        .task(plan_id)
        .details(details);
    if let Some(model) = model {
        event = event.model(model);
    }
    resources.events.append(event)?;
    Ok(())
}

fn persist(state: &mut RunState, resources: &PlanResources<'_>) -> Result<(), EngineError> {
    state.touch(Utc::now());
    resources.state_store.save(state)?;
    Ok(())
}

fn blocked(
    ctx: &EngineContext<'_>,
    resources: &PlanResources<'_>,
    state: &mut RunState,
    plan_id: &PlanId,
    reason: String,
) -> Result<PlanOutcome, EngineError> {
    emit(ctx, resources, plan_id, EventKind::PlanBlocked, None, json!({
        "reason": reason,
    }))?;
    persist(state, resources)?;
    output::warn(ctx.output, format!("blocked: {plan_id} ({reason})"));
    Ok(PlanOutcome::Blocked { reason })
}

fn failed(
    ctx: &EngineContext<'_>,
    resources: &PlanResources<'_>,
    state: &mut RunState,
    plan_id: &PlanId,
    reason: String,
    tail: Vec<String>,
) -> Result<PlanOutcome, EngineError> {
    emit(ctx, resources, plan_id, EventKind::PlanFailed, None, json!({
        "reason": reason,
        "tail": tail,
    }))?;
    persist(state, resources)?;
    output::error(format!("failed: {plan_id} ({reason})"));
    for line in &tail {
        output::print(ctx.output, format!("  | {line}"));
    }
    Ok(PlanOutcome::Failed { reason })
}

fn pending(
    ctx: &EngineContext<'_>,
    resources: &PlanResources<'_>,
    state: &mut RunState,
    plan_id: &PlanId,
    reason: String,
    source: &str,
) -> Result<PlanOutcome, EngineError> {
    emit(ctx, resources, plan_id, EventKind::PlanPending, None, json!({
        "reason": reason,
        "source": source,
    }))?;
    persist(state, resources)?;
    output::print(ctx.output, format!("pending: {plan_id} ({reason})"));
    Ok(PlanOutcome::Pending { reason })
}
