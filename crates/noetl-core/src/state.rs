// Event-sourced workflow state reconstruction (spec.md §3, §9 crash
// recovery). The append-only event log is the system's source of
// truth; everything here is a derived, disposable fold over it. The
// orchestrator (noetl-orchestrator::Engine) uses this fold as its
// primary read path -- rebuilding routing/ctx state from events rather
// than querying the SQL projection tables -- and also runs it to
// rehydrate after a restart; noetl-storage keeps the workflow/step_state
// tables in sync transactionally as an independently queryable cache
// for external readers (spec.md §4.1), not as this fold's backing store.
//
// Grounded on the legacy WorkflowState::apply_event fold, generalized
// from its single flat `steps` map + ad hoc string event types to this
// grammar's `EventType` enum and multi-task-per-step pipeline shape.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use noetl_contracts::event::{Event, EventStatus, EventType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Admitted,
    Started,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct StepInfo {
    pub name: String,
    pub state: StepState,
    pub current_index: Option<i64>,
    pub attempt: i32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepInfo {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: StepState::Pending,
            current_index: None,
            attempt: 0,
            result: None,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub execution_id: i64,
    pub catalog_id: i64,
    pub status: EventStatus,
    pub steps: HashMap<String, StepInfo>,
    pub ctx: serde_json::Value,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Reconstruction runs above this event count or wall-clock time emit a
/// warning, as a slow-path signal for operators -- the same thresholds
/// the legacy fold used.
const SLOW_EVENT_COUNT: usize = 50;
const SLOW_MILLIS: u128 = 100;

impl WorkflowState {
    pub fn new(execution_id: i64, catalog_id: i64) -> Self {
        Self {
            execution_id,
            catalog_id,
            status: EventStatus::Running,
            steps: HashMap::new(),
            ctx: serde_json::Value::Object(Default::default()),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first = events.first()?;
        let start = Instant::now();
        let mut state = Self::new(first.execution_id, first.catalog_id);

        for event in events {
            state.apply_event(event);
        }

        let duration = start.elapsed();
        let event_count = events.len();
        tracing::info!(
            target: "noetl::orchestrator",
            execution_id = %first.execution_id,
            phase = "state_reconstruction",
            event_count,
            step_count = state.steps.len(),
            duration_ms = duration.as_millis() as u64,
            "workflow state reconstructed from events"
        );
        if duration.as_millis() > SLOW_MILLIS || event_count > SLOW_EVENT_COUNT {
            tracing::warn!(
                target: "noetl::orchestrator",
                execution_id = %first.execution_id,
                event_count,
                duration_ms = duration.as_millis() as u64,
                "slow state reconstruction; consider snapshotting or trimming event history"
            );
        }

        Some(state)
    }

    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::ExecutionStarted => {
                self.status = EventStatus::Running;
                self.started_at = Some(event.timestamp);
                if let Some(ctx) = &event.context {
                    self.ctx = ctx.clone();
                }
            }
            EventType::ExecutionCompleted => {
                self.status = EventStatus::Completed;
                self.ended_at = Some(event.timestamp);
            }
            EventType::ExecutionFailed => {
                self.status = EventStatus::Failed;
                self.ended_at = Some(event.timestamp);
            }
            EventType::ExecutionCancelled => {
                self.status = EventStatus::Cancelled;
                self.ended_at = Some(event.timestamp);
            }
            EventType::StepAdmitted => {
                if let Some(step) = self.step_mut(event) {
                    step.state = StepState::Admitted;
                }
            }
            EventType::StepStarted => {
                if let Some(step) = self.step_mut(event) {
                    step.state = StepState::Started;
                    step.started_at = Some(event.timestamp);
                    step.current_index = event.current_index;
                    if let Some(attempt) = event.attempt {
                        step.attempt = attempt;
                    }
                }
            }
            EventType::StepDone => {
                if let Some(step) = self.step_mut(event) {
                    step.state = StepState::Completed;
                    step.ended_at = Some(event.timestamp);
                    step.result = event.result.clone();
                }
            }
            EventType::StepFailed => {
                if let Some(step) = self.step_mut(event) {
                    step.state = StepState::Failed;
                    step.ended_at = Some(event.timestamp);
                    step.error = event
                        .result
                        .as_ref()
                        .and_then(|r| r.get("message"))
                        .and_then(|m| m.as_str())
                        .map(str::to_string);
                }
            }
            EventType::StepCancelled => {
                if let Some(step) = self.step_mut(event) {
                    step.state = StepState::Cancelled;
                    step.ended_at = Some(event.timestamp);
                }
            }
            EventType::CtxPatched => {
                if let (Some(ctx_obj), Some(patch)) =
                    (self.ctx.as_object_mut(), event.context.as_ref().and_then(|c| c.as_object()))
                {
                    for (k, v) in patch {
                        ctx_obj.insert(k.clone(), v.clone());
                    }
                }
            }
            _ => {}
        }
    }

    fn step_mut(&mut self, event: &Event) -> Option<&mut StepInfo> {
        let name = event.node_name.as_ref()?;
        Some(
            self.steps
                .entry(name.clone())
                .or_insert_with(|| StepInfo::new(name)),
        )
    }

    pub fn is_step_done(&self, step: &str) -> bool {
        self.steps
            .get(step)
            .map(|s| matches!(s.state, StepState::Completed | StepState::Failed | StepState::Cancelled))
            .unwrap_or(false)
    }

    pub fn get_step_result(&self, step: &str) -> Option<&serde_json::Value> {
        self.steps.get(step).and_then(|s| s.result.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_contracts::event::EventEnvelope;

    fn make_event(id: i64, event_type: EventType, node_name: Option<&str>) -> Event {
        Event {
            event_id: id,
            execution_id: 1,
            catalog_id: 9,
            parent_event_id: None,
            node_id: None,
            node_name: node_name.map(str::to_string),
            event_type,
            status: EventStatus::Running,
            timestamp: Utc::now(),
            current_index: None,
            attempt: None,
            context: None,
            result: None,
            meta: None,
        }
    }

    #[test]
    fn reconstructs_step_lifecycle() {
        let events = vec![
            make_event(1, EventType::ExecutionStarted, None),
            make_event(2, EventType::StepAdmitted, Some("fetch")),
            make_event(3, EventType::StepStarted, Some("fetch")),
            {
                let mut e = make_event(4, EventType::StepDone, Some("fetch"));
                e.result = Some(serde_json::json!({"ok": true}));
                e
            },
        ];
        let state = WorkflowState::from_events(&events).unwrap();
        assert_eq!(state.execution_id, 1);
        assert!(state.is_step_done("fetch"));
        assert_eq!(
            state.get_step_result("fetch"),
            Some(&serde_json::json!({"ok": true}))
        );
    }

    #[test]
    fn ctx_patch_merges_into_existing_context() {
        let mut state = WorkflowState::new(1, 1);
        state.ctx = serde_json::json!({"a": 1});
        let mut patch_event = make_event(2, EventType::CtxPatched, None);
        patch_event.context = Some(serde_json::json!({"b": 2}));
        state.apply_event(&patch_event);
        assert_eq!(state.ctx, serde_json::json!({"a": 1, "b": 2}));
    }

    #[test]
    fn empty_event_list_yields_no_state() {
        assert!(WorkflowState::from_events(&[]).is_none());
    }

    #[test]
    fn envelope_round_trips_into_event_shape_fields() {
        // sanity check that EventEnvelope and Event share field names
        // the orchestrator relies on when converting one to the other.
        let env = EventEnvelope {
            execution_id: 1,
            catalog_id: 9,
            parent_event_id: None,
            node_id: None,
            node_name: Some("fetch".to_string()),
            event_type: EventType::StepStarted,
            status: EventStatus::Running,
            timestamp: None,
            current_index: None,
            attempt: None,
            context: None,
            result: None,
            meta: None,
        };
        assert_eq!(env.node_name.as_deref(), Some("fetch"));
    }
}
