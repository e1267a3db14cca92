// Event log wire/DB types.
//
// Events are append-only; see spec.md §3 for the full invariant list.
// `EventType` partitions into lifecycle / step / task-attempt / loop /
// context-patch / marker groups, kept here as a single enum so routing
// code can match exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Lifecycle
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,
    // Step
    StepAdmitted,
    StepStarted,
    StepDone,
    StepFailed,
    StepCancelled,
    // Task attempt
    TaskAttemptStarted,
    TaskAttemptDone,
    TaskAttemptFailed,
    TaskPolicyEvaluated,
    // Loop
    LoopIteration,
    LoopDone,
    // Context patch
    CtxPatched,
    // Marker
    RouterEvaluated,
}

impl EventType {
    /// Boundary events are the ones that trigger `next.arcs[]` routing.
    pub fn is_boundary(self) -> bool {
        matches!(self, Self::StepDone | Self::StepFailed | Self::LoopDone)
    }

    /// Events that carry an idempotency marker (unique per some key).
    pub fn is_marker(self) -> bool {
        matches!(self, Self::StepStarted | Self::LoopIteration)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ExecutionStarted => "execution.started",
            Self::ExecutionCompleted => "execution.completed",
            Self::ExecutionFailed => "execution.failed",
            Self::ExecutionCancelled => "execution.cancelled",
            Self::StepAdmitted => "step.admitted",
            Self::StepStarted => "step.started",
            Self::StepDone => "step.done",
            Self::StepFailed => "step.failed",
            Self::StepCancelled => "step.cancelled",
            Self::TaskAttemptStarted => "task.attempt.started",
            Self::TaskAttemptDone => "task.attempt.done",
            Self::TaskAttemptFailed => "task.attempt.failed",
            Self::TaskPolicyEvaluated => "task.policy.evaluated",
            Self::LoopIteration => "loop.iteration",
            Self::LoopDone => "loop.done",
            Self::CtxPatched => "ctx.patched",
            Self::RouterEvaluated => "router.evaluated",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl std::str::FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "execution.started" => Self::ExecutionStarted,
            "execution.completed" => Self::ExecutionCompleted,
            "execution.failed" => Self::ExecutionFailed,
            "execution.cancelled" => Self::ExecutionCancelled,
            "step.admitted" => Self::StepAdmitted,
            "step.started" => Self::StepStarted,
            "step.done" => Self::StepDone,
            "step.failed" => Self::StepFailed,
            "step.cancelled" => Self::StepCancelled,
            "task.attempt.started" => Self::TaskAttemptStarted,
            "task.attempt.done" => Self::TaskAttemptDone,
            "task.attempt.failed" => Self::TaskAttemptFailed,
            "task.policy.evaluated" => Self::TaskPolicyEvaluated,
            "loop.iteration" => Self::LoopIteration,
            "loop.done" => Self::LoopDone,
            "ctx.patched" => Self::CtxPatched,
            "router.evaluated" => Self::RouterEvaluated,
            other => return Err(UnknownEventType(other.to_string())),
        })
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Append-only event record. Field shape matches spec.md §3's Event entity.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: i64,
    pub execution_id: i64,
    pub catalog_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub event_type: EventType,
    pub status: EventStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Wire envelope for `POST /api/events` (spec.md §6). Everything except
/// the identifying fields is optional so a worker can emit a minimal
/// record; the server fills in `event_id`/`catalog_id`/`timestamp`.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub execution_id: i64,
    /// Known at every call site that emits an event (the engine and the
    /// worker both carry it as a parameter throughout); there is no
    /// catalog table to resolve it from after the fact, so it rides on
    /// the envelope itself rather than being "filled in by the server".
    /// A wire caller that doesn't know it yet (e.g. an external
    /// `ctx.patched` submission) may omit it; the ingest handler
    /// resolves `0` from the execution's existing event history.
    #[serde(default)]
    pub catalog_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub event_type: EventType,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Filter used by `get_events` (spec.md §4.1).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub execution_id: Option<i64>,
    pub event_type: Option<EventType>,
    pub node_name: Option<String>,
    pub attempt: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_through_display_and_from_str() {
        for ty in [
            EventType::ExecutionStarted,
            EventType::StepStarted,
            EventType::LoopIteration,
            EventType::CtxPatched,
            EventType::RouterEvaluated,
        ] {
            let s = ty.to_string();
            let parsed: EventType = s.parse().unwrap();
            assert_eq!(ty, parsed);
        }
    }

    #[test]
    fn boundary_events_are_step_done_step_failed_loop_done() {
        assert!(EventType::StepDone.is_boundary());
        assert!(EventType::StepFailed.is_boundary());
        assert!(EventType::LoopDone.is_boundary());
        assert!(!EventType::StepAdmitted.is_boundary());
        assert!(!EventType::TaskAttemptDone.is_boundary());
    }

    #[test]
    fn marker_events_are_step_started_and_loop_iteration() {
        assert!(EventType::StepStarted.is_marker());
        assert!(EventType::LoopIteration.is_marker());
        assert!(!EventType::StepDone.is_marker());
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert!("bogus.event".parse::<EventType>().is_err());
    }
}
