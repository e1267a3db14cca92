// `next.arcs[]` routing (spec.md §4.3.4). Exclusive mode fires the
// first matching arc; inclusive fans out to every match. Arcs without
// `when` always match. A step lacking `next` entirely routes straight
// to `end` (spec.md §8's boundary-behavior law), except `end` itself.

use noetl_contracts::playbook::{RoutingMode, Step, END_STEP};
use noetl_core::error::Result;
use noetl_core::scope::Scope;

pub struct MatchedArc<'a> {
    pub target: &'a str,
    pub args: Option<&'a serde_json::Map<String, serde_json::Value>>,
}

/// Resolves the set of arcs that fire for `step` given its boundary
/// scope. A step with no `next` block (other than `end`) implicitly
/// routes to `end`.
pub fn resolve_arcs<'a>(step: &'a Step, scope: &Scope) -> Result<Vec<MatchedArc<'a>>> {
    let Some(next) = &step.next else {
        if step.step == END_STEP {
            return Ok(Vec::new());
        }
        return Ok(vec![MatchedArc {
            target: END_STEP,
            args: None,
        }]);
    };

    let mut matched = Vec::new();
    for arc in &next.arcs {
        let fires = match &arc.when {
            Some(cond) => scope.eval_condition(cond)?,
            None => true,
        };
        if !fires {
            continue;
        }
        matched.push(MatchedArc {
            target: arc.step.as_str(),
            args: arc.args.as_ref(),
        });
        if next.spec.mode == RoutingMode::Exclusive {
            break;
        }
    }
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_contracts::playbook::Playbook;

    #[test]
    fn step_without_next_routes_to_end() {
        let yaml = r#"
metadata:
  name: t
workflow:
  - step: A
    tool:
      t:
        kind: noop
"#;
        let pb = Playbook::parse_yaml(yaml).unwrap();
        let step = pb.get_step("A").unwrap();
        let arcs = resolve_arcs(step, &Scope::new()).unwrap();
        assert_eq!(arcs.len(), 1);
        assert_eq!(arcs[0].target, "end");
    }

    #[test]
    fn exclusive_mode_fires_first_match_only() {
        let yaml = r#"
metadata:
  name: t
workflow:
  - step: A
    tool:
      t:
        kind: noop
    next:
      spec:
        mode: exclusive
      arcs:
        - step: B
          when: "workload.x > 0"
        - step: C
"#;
        let pb = Playbook::parse_yaml(yaml).unwrap();
        let step = pb.get_step("A").unwrap();
        let scope = Scope::new().with("workload", serde_json::json!({"x": 1}));
        let arcs = resolve_arcs(step, &scope).unwrap();
        assert_eq!(arcs.len(), 1);
        assert_eq!(arcs[0].target, "B");
    }

    #[test]
    fn inclusive_mode_fans_out_to_all_matches() {
        let yaml = r#"
metadata:
  name: t
workflow:
  - step: A
    tool:
      t:
        kind: noop
    next:
      spec:
        mode: inclusive
      arcs:
        - step: B
        - step: C
"#;
        let pb = Playbook::parse_yaml(yaml).unwrap();
        let step = pb.get_step("A").unwrap();
        let arcs = resolve_arcs(step, &Scope::new()).unwrap();
        assert_eq!(arcs.len(), 2);
    }
}
