// The control loop (spec.md §4.3). Driven by events: `react` is called
// after every event append and decides what, if anything, the
// orchestrator must do next for that execution. Playbook lookup is an
// in-memory `execution_id -> Playbook` map held by the engine itself --
// catalog storage/packaging is out of scope (spec.md §1), so this
// stands in for it for the lifetime of the process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use noetl_contracts::event::{Event, EventEnvelope, EventStatus, EventType};
use noetl_contracts::playbook::{Playbook, Step, END_STEP};
use noetl_contracts::queue::QueuePayload;
use noetl_core::error::{CoreError, Result};
use noetl_core::scope::Scope;
use noetl_core::snowflake::SnowflakeGenerator;
use noetl_core::state::WorkflowState;
use noetl_core::traits::{EventStore, KeychainStore, QueueStore};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::admission::is_admitted;
use crate::loop_expand::{admit_count, resolve_sequence};
use crate::render::render_pipeline;
use crate::routing::resolve_arcs;

/// Denied-but-not-discarded admission attempts, per execution: steps
/// waiting on a `ctx.patched` event to become admissible (spec.md
/// §4.3.1).
type PendingAdmissions = HashMap<i64, HashSet<String>>;

/// `workload` and the resolved keychain snapshot, frozen at
/// `start_execution` and reused for every step admitted afterwards --
/// both are immutable for the life of an execution (spec.md §4.3.1).
#[derive(Clone)]
struct ExecutionContext {
    workload: Value,
    keychain: Value,
}

pub struct Engine {
    events: Arc<dyn EventStore>,
    queue: Arc<dyn QueueStore>,
    keychain: Arc<dyn KeychainStore>,
    ids: Arc<SnowflakeGenerator>,
    playbooks: RwLock<HashMap<i64, Arc<Playbook>>>,
    pending: RwLock<PendingAdmissions>,
    contexts: RwLock<HashMap<i64, ExecutionContext>>,
}

impl Engine {
    pub fn new(
        events: Arc<dyn EventStore>,
        queue: Arc<dyn QueueStore>,
        keychain: Arc<dyn KeychainStore>,
        ids: Arc<SnowflakeGenerator>,
    ) -> Self {
        Self {
            events,
            queue,
            keychain,
            ids,
            playbooks: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuilds the scope `when`/`step.tool` templates are bound against
    /// for `execution_id`: `workload` and `keychain` from the frozen
    /// snapshot taken at `start_execution`, plus whatever `ctx` the
    /// caller has accumulated to this point (spec.md §4.3.1, §4.3.2).
    async fn bound_scope(&self, execution_id: i64, ctx: Value) -> Scope {
        let (workload, keychain) = self
            .contexts
            .read()
            .await
            .get(&execution_id)
            .map(|c| (c.workload.clone(), c.keychain.clone()))
            .unwrap_or((json!({}), json!({})));
        Scope::new()
            .with("workload", workload)
            .with("keychain", keychain)
            .with("ctx", ctx)
            .with("args", json!({}))
    }

    /// The `ctx` this execution has accumulated so far, folded from its
    /// event history (`ctx.patched` events merge into the seed context
    /// set by `execution.started`).
    async fn accumulated_ctx(&self, execution_id: i64) -> Result<Value> {
        let events = self.events.get_by_execution(execution_id).await?;
        Ok(WorkflowState::from_events(&events).map(|s| s.ctx).unwrap_or_else(|| json!({})))
    }

    pub async fn playbook_for(&self, execution_id: i64) -> Option<Arc<Playbook>> {
        self.playbooks.read().await.get(&execution_id).cloned()
    }

    /// Every execution this process has started, most recent first.
    /// Backed by the same in-memory map `playbook_for` reads -- it does
    /// not survive a restart, which is the same catalog-less limitation
    /// documented on `start_execution`.
    pub async fn known_execution_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.playbooks.read().await.keys().copied().collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids
    }

    /// Freezes `workload`, resolves the keychain snapshot, emits
    /// `execution.started`, and admits the entry step.
    #[tracing::instrument(skip(self, playbook, workload), target = "noetl::orchestrator")]
    pub async fn start_execution(
        &self,
        catalog_id: i64,
        playbook: Arc<Playbook>,
        workload: Value,
    ) -> Result<i64> {
        let execution_id = self.ids.next_id();
        self.playbooks.write().await.insert(execution_id, playbook.clone());

        let started = self
            .events
            .append(EventEnvelope {
                execution_id,
                catalog_id,
                parent_event_id: None,
                node_id: None,
                node_name: None,
                event_type: EventType::ExecutionStarted,
                status: EventStatus::Running,
                timestamp: None,
                current_index: None,
                attempt: None,
                context: Some(workload.clone()),
                result: None,
                meta: None,
            })
            .await?;

        let entry = playbook
            .entry_step()
            .or_else(|| playbook.step_names().into_iter().next())
            .ok_or_else(|| CoreError::CatalogUnresolved("playbook has no steps".to_string()))?
            .to_string();

        let keychain_snapshot = self.resolve_keychain_snapshot(catalog_id, &playbook).await?;
        self.contexts.write().await.insert(
            execution_id,
            ExecutionContext { workload: workload.clone(), keychain: keychain_snapshot.clone() },
        );
        let scope = Scope::new()
            .with("workload", workload)
            .with("keychain", keychain_snapshot)
            .with("ctx", json!({}))
            .with("args", json!({}));

        self.try_admit(execution_id, catalog_id, &playbook, &entry, scope, Some(started.event_id))
            .await?;

        info!(execution_id, catalog_id, entry = %entry, "execution started");
        Ok(execution_id)
    }

    async fn resolve_keychain_snapshot(&self, catalog_id: i64, playbook: &Playbook) -> Result<Value> {
        let mut snapshot = serde_json::Map::new();
        for def in &playbook.keychain {
            if let Some(cred) = self.keychain.get(catalog_id, &def.name).await? {
                snapshot.insert(def.name.clone(), cred.secret);
            }
        }
        Ok(Value::Object(snapshot))
    }

    /// Attempts admission for `step_name`. On allow: renders and
    /// enqueues (single step-run, or one per loop iteration wave). On
    /// deny: records the step as pending, to be retried on the next
    /// `ctx.patched` event.
    async fn try_admit(
        &self,
        execution_id: i64,
        catalog_id: i64,
        playbook: &Playbook,
        step_name: &str,
        scope: Scope,
        parent_event_id: Option<i64>,
    ) -> Result<()> {
        let Some(step) = playbook.get_step(step_name) else {
            return Err(CoreError::condition(format!(
                "routing error: arc targets nonexistent step '{step_name}'"
            )));
        };

        if !is_admitted(step, &scope)? {
            self.pending
                .write()
                .await
                .entry(execution_id)
                .or_default()
                .insert(step_name.to_string());
            return Ok(());
        }

        self.pending
            .write()
            .await
            .get_mut(&execution_id)
            .map(|set| set.remove(step_name));

        if let Some(loop_spec) = &step.r#loop {
            let sequence = resolve_sequence(loop_spec, &scope)?;
            let wave = admit_count(loop_spec, sequence.len(), 0, 0);
            for idx in 0..wave {
                self.admit_iteration(execution_id, catalog_id, step, loop_spec, &sequence, idx, &scope, parent_event_id)
                    .await?;
            }
            if sequence.is_empty() {
                self.emit_loop_done(execution_id, catalog_id, step_name, parent_event_id).await?;
            }
        } else {
            self.enqueue_single(execution_id, catalog_id, step, &scope, parent_event_id).await?;
        }
        Ok(())
    }

    async fn enqueue_single(
        &self,
        execution_id: i64,
        catalog_id: i64,
        step: &Step,
        scope: &Scope,
        parent_event_id: Option<i64>,
    ) -> Result<()> {
        let rendered = render_pipeline(step, scope)?;
        let args = scope.get_path("args").cloned().unwrap_or(json!({}));
        let ctx = scope.get_path("ctx").cloned().unwrap_or(json!({}));

        self.events
            .append(EventEnvelope {
                execution_id,
                catalog_id,
                parent_event_id,
                node_id: None,
                node_name: Some(step.step.clone()),
                event_type: EventType::StepStarted,
                status: EventStatus::Running,
                timestamp: None,
                current_index: None,
                attempt: None,
                context: Some(ctx.clone()),
                result: None,
                meta: None,
            })
            .await?;

        self.queue
            .enqueue(
                execution_id,
                catalog_id,
                &step.step,
                &step.step,
                QueuePayload {
                    execution_id,
                    catalog_id,
                    step: step.step.clone(),
                    rendered_pipeline: rendered,
                    args,
                    iterator_name: None,
                    current_index: None,
                    iter_value: None,
                    ctx,
                    attempt: 0,
                },
                0,
            )
            .await?;
        Ok(())
    }

    async fn admit_iteration(
        &self,
        execution_id: i64,
        catalog_id: i64,
        step: &Step,
        loop_spec: &noetl_contracts::playbook::LoopSpec,
        sequence: &[Value],
        index: usize,
        base_scope: &Scope,
        parent_event_id: Option<i64>,
    ) -> Result<()> {
        let iter_value = sequence[index].clone();
        let iter_scope = base_scope
            .clone()
            .with("iter", json!({ loop_spec.iterator.clone(): iter_value.clone() }));

        self.events
            .append(EventEnvelope {
                execution_id,
                catalog_id,
                parent_event_id,
                node_id: None,
                node_name: Some(step.step.clone()),
                event_type: EventType::LoopIteration,
                status: EventStatus::Running,
                timestamp: None,
                current_index: Some(index as i64),
                attempt: None,
                context: Some(json!({ loop_spec.iterator.clone(): iter_value })),
                result: None,
                meta: None,
            })
            .await?;

        let rendered = render_pipeline(step, &iter_scope)?;
        let args = iter_scope.get_path("args").cloned().unwrap_or(json!({}));
        let ctx = iter_scope.get_path("ctx").cloned().unwrap_or(json!({}));

        let node_id = format!("{}[{}]", step.step, index);
        self.queue
            .enqueue(
                execution_id,
                catalog_id,
                &node_id,
                &step.step,
                QueuePayload {
                    execution_id,
                    catalog_id,
                    step: step.step.clone(),
                    rendered_pipeline: rendered,
                    args,
                    iterator_name: Some(loop_spec.iterator.clone()),
                    current_index: Some(index as i64),
                    iter_value: Some(sequence[index].clone()),
                    ctx,
                    attempt: 0,
                },
                0,
            )
            .await?;
        Ok(())
    }

    /// Appends `envelope` and reacts to it. This is the entry point
    /// `POST /api/events` and `POST /api/queue/{complete,fail}` funnel
    /// through -- callers never append directly and react separately.
    pub async fn submit_event(&self, envelope: EventEnvelope) -> Result<Event> {
        let event = self.events.append(envelope).await?;
        self.react(&event).await?;
        Ok(event)
    }

    /// Call after persisting any event for `execution_id` to let the
    /// orchestrator react: route boundary events, top up loops, recheck
    /// pending admissions.
    #[tracing::instrument(skip(self, event), target = "noetl::orchestrator")]
    pub async fn react(&self, event: &Event) -> Result<()> {
        let Some(playbook) = self.playbook_for(event.execution_id).await else {
            warn!(execution_id = event.execution_id, "no known playbook for execution, skipping reaction");
            return Ok(());
        };

        match event.event_type {
            EventType::StepDone | EventType::StepFailed | EventType::LoopDone => {
                self.route_boundary(event, &playbook).await?;
            }
            EventType::TaskAttemptDone | EventType::TaskAttemptFailed => {
                if event.current_index.is_some() {
                    self.progress_loop(event, &playbook).await?;
                }
            }
            EventType::CtxPatched => {
                self.recheck_pending(event.execution_id, catalog_id_of(event), &playbook).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn route_boundary(&self, event: &Event, playbook: &Playbook) -> Result<()> {
        let Some(node_name) = &event.node_name else { return Ok(()) };
        let Some(step) = playbook.get_step(node_name) else { return Ok(()) };

        let ctx = event.context.clone().unwrap_or(json!({}));
        let scope = self
            .bound_scope(event.execution_id, ctx)
            .await
            .with("event", serde_json::to_value(event).unwrap_or(json!({})));

        if matches!(event.event_type, EventType::StepFailed) {
            if node_name != END_STEP {
                self.try_admit(event.execution_id, event.catalog_id, playbook, END_STEP, scope, Some(event.event_id))
                    .await?;
            }
            return Ok(());
        }

        if node_name == END_STEP {
            self.finalize_execution(event.execution_id, playbook).await?;
            return Ok(());
        }

        let arcs = match resolve_arcs(step, &scope) {
            Ok(arcs) => arcs,
            Err(err) => {
                // spec.md §7: a template/condition error inside a router
                // arc's `when` is a routing error, escalated to `end`
                // rather than propagated to the caller.
                warn!(
                    execution_id = event.execution_id,
                    node_name = %node_name,
                    error = %err,
                    "routing error resolving arcs, escalating to end"
                );
                if node_name != END_STEP {
                    self.try_admit(event.execution_id, event.catalog_id, playbook, END_STEP, scope, Some(event.event_id))
                        .await?;
                }
                return Ok(());
            }
        };
        if arcs.is_empty() {
            self.maybe_finalize_if_quiescent(event.execution_id, playbook).await?;
            return Ok(());
        }

        for arc in arcs {
            let args = arc
                .args
                .cloned()
                .map(Value::Object)
                .unwrap_or(json!({}));
            let arc_scope = scope.clone().with("args", args);
            self.try_admit(event.execution_id, event.catalog_id, playbook, arc.target, arc_scope, Some(event.event_id))
                .await?;
        }
        Ok(())
    }

    async fn recheck_pending(&self, execution_id: i64, catalog_id: i64, playbook: &Playbook) -> Result<()> {
        let names: Vec<String> = self
            .pending
            .read()
            .await
            .get(&execution_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        if names.is_empty() {
            return Ok(());
        }

        let ctx = self.accumulated_ctx(execution_id).await?;
        let scope = self.bound_scope(execution_id, ctx).await;
        for name in names {
            self.try_admit(execution_id, catalog_id, playbook, &name, scope.clone(), None).await?;
        }
        Ok(())
    }

    /// Inspects `task.attempt.{done,failed}` events carrying
    /// `current_index` (i.e. emitted inside a loop iteration) to decide
    /// whether to top up a parallel loop or emit `loop.done`.
    async fn progress_loop(&self, event: &Event, playbook: &Playbook) -> Result<()> {
        let is_last_task = event
            .meta
            .as_ref()
            .and_then(|m| m.get("is_last"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !is_last_task {
            return Ok(());
        }

        let Some(node_name) = &event.node_name else { return Ok(()) };
        let Some(step) = playbook.get_step(node_name) else { return Ok(()) };
        let Some(loop_spec) = &step.r#loop else { return Ok(()) };

        let all_events = self.events.get_by_execution(event.execution_id).await?;
        let scheduled: HashSet<i64> = all_events
            .iter()
            .filter(|e| e.event_type == EventType::LoopIteration && e.node_name.as_deref() == Some(node_name.as_str()))
            .filter_map(|e| e.current_index)
            .collect();
        let terminal: HashSet<i64> = all_events
            .iter()
            .filter(|e| {
                matches!(e.event_type, EventType::TaskAttemptDone | EventType::TaskAttemptFailed)
                    && e.node_name.as_deref() == Some(node_name.as_str())
                    && e.meta.as_ref().and_then(|m| m.get("is_last")).and_then(|v| v.as_bool()).unwrap_or(false)
            })
            .filter_map(|e| e.current_index)
            .collect();

        let ctx = WorkflowState::from_events(&all_events).map(|s| s.ctx).unwrap_or_else(|| json!({}));
        let base_scope = self.bound_scope(event.execution_id, ctx).await;

        let total = resolve_sequence(loop_spec, &base_scope)
            .ok()
            .map(|s| s.len())
            .unwrap_or(scheduled.len());
        let in_flight = scheduled.difference(&terminal).count();

        if terminal.len() >= total && total > 0 {
            self.emit_loop_done(event.execution_id, event.catalog_id, node_name, Some(event.event_id)).await?;
            return Ok(());
        }

        let to_admit = admit_count(loop_spec, total, scheduled.len(), in_flight);
        if to_admit == 0 {
            return Ok(());
        }

        let sequence = resolve_sequence(loop_spec, &base_scope)?;
        let mut next_index = 0usize;
        for offset in 0..to_admit {
            while scheduled.contains(&(next_index as i64)) {
                next_index += 1;
            }
            if next_index >= sequence.len() {
                break;
            }
            self.admit_iteration(event.execution_id, event.catalog_id, step, loop_spec, &sequence, next_index, &base_scope, Some(event.event_id))
                .await?;
            next_index += 1;
            let _ = offset;
        }
        Ok(())
    }

    async fn emit_loop_done(&self, execution_id: i64, catalog_id: i64, node_name: &str, parent_event_id: Option<i64>) -> Result<()> {
        self.events
            .append(EventEnvelope {
                execution_id,
                catalog_id,
                parent_event_id,
                node_id: None,
                node_name: Some(node_name.to_string()),
                event_type: EventType::LoopDone,
                status: EventStatus::Completed,
                timestamp: None,
                current_index: None,
                attempt: None,
                context: None,
                result: None,
                meta: None,
            })
            .await?;
        Ok(())
    }

    async fn maybe_finalize_if_quiescent(&self, execution_id: i64, playbook: &Playbook) -> Result<()> {
        let events = self.events.get_by_execution(execution_id).await?;
        let pending_empty = self
            .pending
            .read()
            .await
            .get(&execution_id)
            .map(|set| set.is_empty())
            .unwrap_or(true);

        if pending_empty && !has_outstanding_work(&events) {
            let ctx = WorkflowState::from_events(&events).map(|s| s.ctx).unwrap_or_else(|| json!({}));
            let scope = self.bound_scope(execution_id, ctx).await;
            self.try_admit(execution_id, events.first().map(|e| e.catalog_id).unwrap_or(0), playbook, END_STEP, scope, None)
                .await?;
        }
        Ok(())
    }

    /// Cancels a running execution: marks in-flight steps
    /// `step.cancelled`, emits `execution.cancelled`, drops any pending
    /// admissions. Returns the number of steps cancelled.
    pub async fn cancel_execution(&self, execution_id: i64, reason: &str) -> Result<u64> {
        self.pending.write().await.remove(&execution_id);
        crate::cancellation::cancel_execution(&self.events, &self.queue, execution_id, reason).await
    }

    async fn finalize_execution(&self, execution_id: i64, _playbook: &Playbook) -> Result<()> {
        let events = self.events.get_by_execution(execution_id).await?;
        let already_final = events.iter().any(|e| {
            matches!(e.event_type, EventType::ExecutionCompleted | EventType::ExecutionFailed)
        });
        if already_final {
            return Ok(());
        }

        let failed_steps: Vec<&str> = events
            .iter()
            .filter(|e| e.event_type == EventType::StepFailed)
            .filter_map(|e| e.node_name.as_deref())
            .collect();

        let (event_type, meta) = if failed_steps.is_empty() {
            (EventType::ExecutionCompleted, None)
        } else {
            (
                EventType::ExecutionFailed,
                Some(json!({
                    "total_steps": events.iter().filter(|e| e.event_type == EventType::StepDone || e.event_type == EventType::StepFailed).count(),
                    "failed_steps": failed_steps.len(),
                    "failed_step_names": failed_steps,
                })),
            )
        };

        let catalog_id = events.first().map(|e| e.catalog_id).unwrap_or(0);

        self.events
            .append(EventEnvelope {
                execution_id,
                catalog_id,
                parent_event_id: None,
                node_id: None,
                node_name: None,
                event_type,
                status: if matches!(event_type, EventType::ExecutionCompleted) {
                    EventStatus::Completed
                } else {
                    EventStatus::Failed
                },
                timestamp: None,
                current_index: None,
                attempt: None,
                context: None,
                result: None,
                meta,
            })
            .await?;
        Ok(())
    }
}

fn catalog_id_of(event: &Event) -> i64 {
    event.catalog_id
}

/// True while any step has started without finishing, or any loop has
/// scheduled iterations without a terminating `loop.done` -- the
/// complement of spec.md §4.3.6's quiescence condition.
fn has_outstanding_work(events: &[Event]) -> bool {
    let mut started: HashSet<&str> = HashSet::new();
    let mut finished: HashSet<&str> = HashSet::new();
    let mut loop_nodes: HashSet<&str> = HashSet::new();
    let mut loop_done: HashSet<&str> = HashSet::new();

    for e in events {
        match e.event_type {
            EventType::StepStarted => {
                if let Some(n) = &e.node_name {
                    started.insert(n.as_str());
                }
            }
            EventType::StepDone | EventType::StepFailed => {
                if let Some(n) = &e.node_name {
                    finished.insert(n.as_str());
                }
            }
            EventType::LoopIteration => {
                if let Some(n) = &e.node_name {
                    loop_nodes.insert(n.as_str());
                }
            }
            EventType::LoopDone => {
                if let Some(n) = &e.node_name {
                    loop_done.insert(n.as_str());
                }
            }
            _ => {}
        }
    }

    started.difference(&finished).count() > 0 || loop_nodes.iter().any(|n| !loop_done.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: EventType, node_name: Option<&str>) -> Event {
        Event {
            event_id: 1,
            execution_id: 1,
            catalog_id: 1,
            parent_event_id: None,
            node_id: None,
            node_name: node_name.map(|s| s.to_string()),
            event_type,
            status: EventStatus::Running,
            timestamp: chrono::Utc::now(),
            current_index: None,
            attempt: None,
            context: None,
            result: None,
            meta: None,
        }
    }

    #[test]
    fn outstanding_when_step_started_without_done() {
        let events = vec![event(EventType::StepStarted, Some("A"))];
        assert!(has_outstanding_work(&events));
    }

    #[test]
    fn quiescent_when_all_started_steps_finished() {
        let events = vec![event(EventType::StepStarted, Some("A")), event(EventType::StepDone, Some("A"))];
        assert!(!has_outstanding_work(&events));
    }

    #[test]
    fn outstanding_when_loop_has_no_loop_done() {
        let events = vec![Event {
            current_index: Some(0),
            ..event(EventType::LoopIteration, Some("A"))
        }];
        assert!(has_outstanding_work(&events));
    }

    #[test]
    fn quiescent_once_loop_done_emitted() {
        let events = vec![
            Event {
                current_index: Some(0),
                ..event(EventType::LoopIteration, Some("A"))
            },
            event(EventType::LoopDone, Some("A")),
        ];
        assert!(!has_outstanding_work(&events));
    }
}
