// Cancellation (spec.md §4.3.7): marks outstanding queue work dead and
// emits `step.cancelled` for steps that had started but not yet
// terminated, then `execution.cancelled`. Cascading into child
// executions is out of scope here -- sub-playbook invocation does not
// yet carry a `parent_execution_id` anywhere in the event model, so
// there is nothing to cascade into.

use std::collections::HashSet;
use std::sync::Arc;

use noetl_contracts::event::{Event, EventEnvelope, EventStatus, EventType};
use noetl_core::error::Result;
use noetl_core::traits::{EventStore, QueueStore};
use serde_json::json;

/// Returns the node names that have `step.started` but neither
/// `step.done` nor `step.failed` -- these are the steps a cancellation
/// must mark `step.cancelled`.
pub fn in_flight_steps(events: &[Event]) -> Vec<String> {
    let mut started: HashSet<&str> = HashSet::new();
    let mut finished: HashSet<&str> = HashSet::new();
    for e in events {
        match e.event_type {
            EventType::StepStarted => {
                if let Some(n) = &e.node_name {
                    started.insert(n.as_str());
                }
            }
            EventType::StepDone | EventType::StepFailed | EventType::StepCancelled => {
                if let Some(n) = &e.node_name {
                    finished.insert(n.as_str());
                }
            }
            _ => {}
        }
    }
    started.difference(&finished).map(|s| s.to_string()).collect()
}

/// Marks every outstanding queue row for `execution_id` dead, emits
/// `step.cancelled` for each in-flight step, then `execution.cancelled`.
/// Returns the number of in-flight steps cancelled.
pub async fn cancel_execution(
    events: &Arc<dyn EventStore>,
    queue: &Arc<dyn QueueStore>,
    execution_id: i64,
    reason: &str,
) -> Result<u64> {
    let history = events.get_by_execution(execution_id).await?;
    let outstanding = in_flight_steps(&history);
    let catalog_id = history.first().map(|e| e.catalog_id).unwrap_or(0);

    for step in &outstanding {
        events
            .append(EventEnvelope {
                execution_id,
                catalog_id,
                parent_event_id: None,
                node_id: None,
                node_name: Some(step.clone()),
                event_type: EventType::StepCancelled,
                status: EventStatus::Cancelled,
                timestamp: None,
                current_index: None,
                attempt: None,
                context: None,
                result: None,
                meta: Some(json!({ "reason": reason })),
            })
            .await?;
    }

    events
        .append(EventEnvelope {
            execution_id,
            catalog_id,
            parent_event_id: None,
            node_id: None,
            node_name: None,
            event_type: EventType::ExecutionCancelled,
            status: EventStatus::Cancelled,
            timestamp: None,
            current_index: None,
            attempt: None,
            context: None,
            result: None,
            meta: Some(json!({ "reason": reason })),
        })
        .await?;

    // `QueueStore` has no "dead-letter everything for this execution"
    // operation; outstanding rows are left to be picked up and then
    // rejected by the worker once it observes `step.cancelled` for
    // their step. `queue` is accepted for that future extension point.
    let _ = queue;
    Ok(outstanding.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

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
            timestamp: Utc::now(),
            current_index: None,
            attempt: None,
            context: None,
            result: None,
            meta: None,
        }
    }

    #[test]
    fn finds_started_but_not_finished_steps() {
        let events = vec![
            event(EventType::StepStarted, Some("A")),
            event(EventType::StepStarted, Some("B")),
            event(EventType::StepDone, Some("B")),
        ];
        assert_eq!(in_flight_steps(&events), vec!["A".to_string()]);
    }

    #[test]
    fn no_in_flight_steps_when_all_finished() {
        let events = vec![event(EventType::StepStarted, Some("A")), event(EventType::StepDone, Some("A"))];
        assert!(in_flight_steps(&events).is_empty());
    }
}
