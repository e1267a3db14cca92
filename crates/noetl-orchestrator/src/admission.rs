// Step admission (spec.md §4.3.1): evaluate `step.spec.policy.admit.rules`
// top-to-bottom against the bound scope; default admit is allow.

use noetl_contracts::playbook::Step;
use noetl_core::error::Result;
use noetl_core::policy::evaluate_admit_policy;
use noetl_core::scope::Scope;

pub fn is_admitted(step: &Step, scope: &Scope) -> Result<bool> {
    let admit = step
        .spec
        .as_ref()
        .and_then(|s| s.policy.as_ref())
        .and_then(|p| p.admit.as_ref());

    match admit {
        Some(policy) => evaluate_admit_policy(policy, scope),
        None => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_contracts::playbook::Playbook;

    fn step_with_admit(yaml_admit: &str) -> Step {
        let yaml = format!(
            r#"
metadata:
  name: t
workflow:
  - step: A
    spec:
      policy:
        admit:
{yaml_admit}
    tool:
      t:
        kind: noop
"#
        );
        Playbook::parse_yaml(&yaml).unwrap().get_step("A").unwrap().clone()
    }

    #[test]
    fn no_admit_policy_defaults_to_allow() {
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
        assert!(is_admitted(step, &Scope::new()).unwrap());
    }

    #[test]
    fn admit_rule_denies_when_condition_matches() {
        let step = step_with_admit(
            "          rules:\n            - when: \"workload.flag == false\"\n              then: { allow: false }\n",
        );
        let scope = Scope::new().with("workload", serde_json::json!({"flag": false}));
        assert!(!is_admitted(&step, &scope).unwrap());
    }
}
