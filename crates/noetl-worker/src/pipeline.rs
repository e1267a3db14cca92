// Pipeline execution: runs a leased queue item's `rendered_pipeline`
// tasks in order on a single worker lease (spec.md §5 -- single-
// threaded cooperative within one step-run). After each task, the
// outcome is policy-evaluated; `continue` moves to the next task,
// `retry` re-runs the same task (bounded by `attempts`, delayed by
// `backoff`), `jump` moves to a named task, `break` ends the pipeline
// successfully, `fail` ends it as a step failure.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use noetl_contracts::event::{EventEnvelope, EventStatus, EventType};
use noetl_contracts::outcome::{ErrorKind, Outcome, OutcomeError, OutcomeMeta};
use noetl_contracts::playbook::{ActionKind, Backoff, TaskSpec, ToolKind, ToolTask};
use noetl_contracts::queue::QueuePayload;
use noetl_core::policy::evaluate_task_policy;
use noetl_core::scope::Scope;
use noetl_core::traits::{ResolvedCredential, ToolAdapter, ToolRegistry};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::ApiClient;

#[derive(Debug, Deserialize)]
struct RenderedTask {
    name: String,
    kind: ToolKind,
    #[serde(default)]
    config: serde_json::Map<String, Value>,
    #[serde(default)]
    spec: Option<TaskSpec>,
}

pub enum PipelineOutcome {
    StepDone { result: Value, ctx: Value },
    StepFailed { error: OutcomeError, ctx: Value },
}

/// Runs every task in `payload.rendered_pipeline` to completion (or
/// failure), resolving credentials per task from the keychain endpoint
/// and applying each task's policy before moving on.
pub async fn run_pipeline(
    client: &ApiClient,
    registry: &dyn ToolRegistry,
    execution_id: i64,
    catalog_id: i64,
    payload: &QueuePayload,
) -> anyhow::Result<PipelineOutcome> {
    let tasks: Vec<RenderedTask> = serde_json::from_value(payload.rendered_pipeline.clone())?;
    let by_name: HashMap<&str, usize> = tasks.iter().enumerate().map(|(i, t)| (t.name.as_str(), i)).collect();

    let mut ctx = payload.ctx.clone();
    let mut prev_result = Value::Null;
    let mut index = 0usize;
    let mut attempt_counts: HashMap<usize, u32> = HashMap::new();

    loop {
        if index >= tasks.len() {
            return Ok(PipelineOutcome::StepDone { result: prev_result, ctx });
        }
        let task = &tasks[index];
        let is_last = index == tasks.len() - 1;
        let attempt = *attempt_counts.entry(index).or_insert(1);

        let credential = resolve_credential(client, &task.config, catalog_id, execution_id).await;

        let scope = Scope::new()
            .with("ctx", ctx.clone())
            .with("iter", payload.iter_value.clone().map(|v| json!({"value": v})).unwrap_or(json!({})))
            .with("args", payload.args.clone())
            .with("_task", json!({"name": task.name}))
            .with("_attempt", json!(attempt));

        let tool_task = ToolTask { kind: task.kind, spec: task.spec.clone(), config: task.config.clone() };

        emit_task_attempt_started(client, execution_id, catalog_id, &payload.step, payload.current_index, attempt).await;

        let outcome = match registry.resolve(&task.kind) {
            Some(adapter) => adapter.execute(&tool_task, &scope, credential).await,
            None => unregistered_kind_outcome(&task.kind),
        };

        let decision_scope = scope.clone().with("outcome", serde_json::to_value(&outcome).unwrap_or(json!({})));
        let decision = task
            .spec
            .as_ref()
            .and_then(|s| s.policy.as_ref())
            .map(|policy| evaluate_task_policy(policy, &decision_scope))
            .transpose()?
            .unwrap_or_default();

        if let Some(patch) = &decision.set_ctx {
            for (k, v) in patch {
                ctx[k] = v.clone();
            }
            emit_ctx_patched(client, execution_id, catalog_id, &ctx).await;
        }

        let meta = json!({ "is_last": is_last, "task": task.name });
        emit_task_attempt_terminal(client, execution_id, catalog_id, &payload.step, payload.current_index, attempt, &outcome, meta).await;

        match decision.action {
            ActionKind::Continue => {
                if outcome.is_ok() {
                    prev_result = outcome.result.clone().unwrap_or(Value::Null);
                    index += 1;
                } else if is_last {
                    return Ok(PipelineOutcome::StepFailed { error: outcome.error.clone().unwrap_or_default(), ctx });
                } else {
                    index += 1;
                }
            }
            ActionKind::Retry => {
                let max = decision.attempts.unwrap_or(1);
                if attempt >= max {
                    return Ok(PipelineOutcome::StepFailed {
                        error: outcome.error.clone().unwrap_or_else(|| max_attempts_error()),
                        ctx,
                    });
                }
                attempt_counts.insert(index, attempt + 1);
                sleep_for_backoff(decision.backoff.unwrap_or_default(), decision.delay.unwrap_or(0.0), attempt).await;
            }
            ActionKind::Jump => {
                let Some(target) = &decision.to else {
                    return Ok(PipelineOutcome::StepFailed { error: jump_without_target_error(), ctx });
                };
                let Some(&target_index) = by_name.get(target.as_str()) else {
                    return Ok(PipelineOutcome::StepFailed { error: unknown_jump_target_error(target), ctx });
                };
                index = target_index;
            }
            ActionKind::Break => {
                return Ok(PipelineOutcome::StepDone { result: outcome.result.unwrap_or(Value::Null), ctx });
            }
            ActionKind::Fail => {
                return Ok(PipelineOutcome::StepFailed {
                    error: outcome.error.unwrap_or_else(|| forced_fail_error()),
                    ctx,
                });
            }
        }
    }
}

async fn resolve_credential(
    client: &ApiClient,
    config: &serde_json::Map<String, Value>,
    catalog_id: i64,
    execution_id: i64,
) -> Option<ResolvedCredential> {
    let name = config.get("credential").and_then(|v| v.as_str())?;
    let value = client.resolve_keychain(catalog_id, name, execution_id).await.ok().flatten()?;
    Some(ResolvedCredential {
        name: name.to_string(),
        token_type: value.get("token_type").and_then(|v| v.as_str()).map(str::to_string),
        secret: value.get("secret").cloned().unwrap_or(value),
    })
}

async fn emit_task_attempt_started(client: &ApiClient, execution_id: i64, catalog_id: i64, step: &str, current_index: Option<i64>, attempt: u32) {
    let result = client
        .emit_event(EventEnvelope {
            execution_id,
            catalog_id,
            parent_event_id: None,
            node_id: None,
            node_name: Some(step.to_string()),
            event_type: EventType::TaskAttemptStarted,
            status: EventStatus::Running,
            timestamp: None,
            current_index,
            attempt: Some(attempt as i32),
            context: None,
            result: None,
            meta: None,
        })
        .await;
    if let Err(err) = result {
        tracing::warn!(%err, step, "failed to emit task.attempt.started");
    }
}

async fn emit_task_attempt_terminal(
    client: &ApiClient,
    execution_id: i64,
    catalog_id: i64,
    step: &str,
    current_index: Option<i64>,
    attempt: u32,
    outcome: &Outcome,
    meta: Value,
) {
    let event_type = if outcome.is_ok() { EventType::TaskAttemptDone } else { EventType::TaskAttemptFailed };
    let result = client
        .emit_event(EventEnvelope {
            execution_id,
            catalog_id,
            parent_event_id: None,
            node_id: None,
            node_name: Some(step.to_string()),
            event_type,
            status: if outcome.is_ok() { EventStatus::Completed } else { EventStatus::Failed },
            timestamp: None,
            current_index,
            attempt: Some(attempt as i32),
            context: None,
            result: outcome.result.clone(),
            meta: Some(meta),
        })
        .await;
    if let Err(err) = result {
        tracing::warn!(%err, step, "failed to emit task attempt terminal event");
    }
}

async fn emit_ctx_patched(client: &ApiClient, execution_id: i64, catalog_id: i64, ctx: &Value) {
    let result = client
        .emit_event(EventEnvelope {
            execution_id,
            catalog_id,
            parent_event_id: None,
            node_id: None,
            node_name: None,
            event_type: EventType::CtxPatched,
            status: EventStatus::Completed,
            timestamp: None,
            current_index: None,
            attempt: None,
            context: Some(ctx.clone()),
            result: None,
            meta: None,
        })
        .await;
    if let Err(err) = result {
        tracing::warn!(%err, "failed to emit ctx.patched");
    }
}

async fn sleep_for_backoff(backoff: Backoff, base_delay: f64, attempt: u32) {
    let seconds = match backoff {
        Backoff::None => base_delay,
        Backoff::Linear => base_delay * attempt as f64,
        Backoff::Exponential => base_delay * 2f64.powi(attempt as i32 - 1),
    };
    if seconds > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    }
}

fn unregistered_kind_outcome(kind: &ToolKind) -> Outcome {
    let started_at = Utc::now();
    Outcome::error(
        OutcomeError {
            kind: ErrorKind::Validation,
            retryable: false,
            message: format!("no tool adapter registered for kind '{kind}'"),
            code: None,
            extras: Default::default(),
        },
        OutcomeMeta { attempt: 1, duration_ms: 0, started_at, ended_at: started_at },
    )
}

fn max_attempts_error() -> OutcomeError {
    OutcomeError { kind: ErrorKind::Internal, retryable: false, message: "retry attempts exhausted".into(), code: None, extras: Default::default() }
}

fn jump_without_target_error() -> OutcomeError {
    OutcomeError { kind: ErrorKind::Validation, retryable: false, message: "policy action 'jump' requires 'to'".into(), code: None, extras: Default::default() }
}

fn unknown_jump_target(target: &str) -> String {
    format!("jump target '{target}' is not a task in this pipeline")
}

fn unknown_jump_target_error(target: &str) -> OutcomeError {
    OutcomeError { kind: ErrorKind::Validation, retryable: false, message: unknown_jump_target(target), code: None, extras: Default::default() }
}

fn forced_fail_error() -> OutcomeError {
    OutcomeError { kind: ErrorKind::Internal, retryable: false, message: "policy action 'fail'".into(), code: None, extras: Default::default() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_tools::registry::BuiltinToolRegistry;

    #[tokio::test]
    async fn noop_pipeline_completes_with_last_task_result() {
        let registry = BuiltinToolRegistry::with_builtins();
        let client = ApiClient::new("http://localhost:1");
        let payload = QueuePayload {
            execution_id: 1,
            catalog_id: 1,
            step: "A".to_string(),
            rendered_pipeline: json!([{"name": "t1", "kind": "noop", "config": {"x": 1}, "spec": null}]),
            args: json!({}),
            iterator_name: None,
            current_index: None,
            iter_value: None,
            ctx: json!({}),
            attempt: 0,
        };
        let outcome = run_pipeline(&client, &registry, 1, 1, &payload).await.unwrap();
        match outcome {
            PipelineOutcome::StepDone { result, .. } => assert_eq!(result, json!({"x": 1})),
            PipelineOutcome::StepFailed { .. } => panic!("expected step done"),
        }
    }
}
