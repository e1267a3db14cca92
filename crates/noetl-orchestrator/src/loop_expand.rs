// Loop expansion (spec.md §4.3.3): `loop.in` evaluates to a finite
// ordered sequence; each element becomes one `loop.iteration` event
// plus one queue row running the step's pipeline, bound with
// `iter.<iterator>`. Sequential mode gates on the previous iteration
// finishing; parallel mode admits up to `max_in_flight` at a time.

use noetl_contracts::playbook::{LoopMode, LoopSpec};
use noetl_core::error::{CoreError, Result};
use noetl_core::scope::Scope;
use serde_json::Value;

/// Resolves `loop.in` to its ordered element sequence.
pub fn resolve_sequence(loop_spec: &LoopSpec, scope: &Scope) -> Result<Vec<Value>> {
    let resolved = scope.render_template(&loop_spec.in_expr)?;
    match resolved {
        Value::Array(items) => Ok(items),
        other => Err(CoreError::condition(format!(
            "loop.in must resolve to an array, got: {other}"
        ))),
    }
}

/// How many new iterations should be admitted right now, given how many
/// have already been scheduled and how many are still in flight
/// (scheduled but not yet terminal).
pub fn admit_count(loop_spec: &LoopSpec, total: usize, scheduled: usize, in_flight: usize) -> usize {
    let remaining = total.saturating_sub(scheduled);
    match loop_spec.mode {
        LoopMode::Sequential => {
            if in_flight == 0 {
                remaining.min(1)
            } else {
                0
            }
        }
        LoopMode::Parallel => {
            let cap = loop_spec.max_in_flight.map(|c| c as usize).unwrap_or(usize::MAX);
            let room = cap.saturating_sub(in_flight);
            remaining.min(room)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(mode: LoopMode, max_in_flight: Option<u32>) -> LoopSpec {
        LoopSpec {
            in_expr: "{{ workload.items }}".to_string(),
            iterator: "item".to_string(),
            mode,
            max_in_flight,
        }
    }

    #[test]
    fn resolves_array_expression() {
        let scope = Scope::new().with("workload", json!({"items": ["a", "b"]}));
        let s = spec(LoopMode::Sequential, None);
        let items = resolve_sequence(&s, &scope).unwrap();
        assert_eq!(items, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn sequential_admits_one_at_a_time() {
        let s = spec(LoopMode::Sequential, None);
        assert_eq!(admit_count(&s, 5, 0, 0), 1);
        assert_eq!(admit_count(&s, 5, 1, 1), 0);
        assert_eq!(admit_count(&s, 5, 1, 0), 1);
        assert_eq!(admit_count(&s, 5, 5, 0), 0);
    }

    #[test]
    fn parallel_respects_max_in_flight_cap() {
        let s = spec(LoopMode::Parallel, Some(2));
        assert_eq!(admit_count(&s, 5, 0, 0), 2);
        assert_eq!(admit_count(&s, 5, 2, 2), 0);
        assert_eq!(admit_count(&s, 5, 2, 1), 1);
        assert_eq!(admit_count(&s, 5, 4, 1), 1);
        assert_eq!(admit_count(&s, 5, 5, 0), 0);
    }

    #[test]
    fn parallel_without_cap_admits_everything_remaining() {
        let s = spec(LoopMode::Parallel, None);
        assert_eq!(admit_count(&s, 5, 0, 0), 5);
    }
}
