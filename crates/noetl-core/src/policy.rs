// Task-outcome and step-admission policy evaluation (spec.md §4.4, §4.5).
//
// A `TaskPolicy`'s rules are tried in declaration order against a scope
// that includes the tool's `outcome`; the first rule whose `when` is
// absent or evaluates truthy wins. No match defaults to `continue`,
// matching spec.md's "absence of a matching rule is not an error".

use noetl_contracts::playbook::{AdmitPolicy, Backoff, PolicyThen, TaskPolicy};

use crate::error::Result;
use crate::scope::Scope;

#[derive(Debug, Clone, Default)]
pub struct PolicyDecision {
    pub action: noetl_contracts::playbook::ActionKind,
    pub attempts: Option<u32>,
    pub backoff: Option<Backoff>,
    pub delay: Option<f64>,
    pub to: Option<String>,
    pub set_iter: Option<serde_json::Map<String, serde_json::Value>>,
    pub set_ctx: Option<serde_json::Map<String, serde_json::Value>>,
}

impl From<&PolicyThen> for PolicyDecision {
    fn from(then: &PolicyThen) -> Self {
        Self {
            action: then.r#do,
            attempts: then.attempts,
            backoff: then.backoff,
            delay: then.delay,
            to: then.to.clone(),
            set_iter: then.set_iter.clone(),
            set_ctx: then.set_ctx.clone(),
        }
    }
}

/// Evaluates a task's outcome-handling policy. `scope` must already
/// carry the `outcome`/`_attempt`/`_task` namespaces the rules
/// reference.
pub fn evaluate_task_policy(policy: &TaskPolicy, scope: &Scope) -> Result<PolicyDecision> {
    for rule in &policy.rules {
        let matched = match &rule.when {
            Some(expr) => scope.eval_condition(expr)?,
            None => true,
        };
        if matched {
            return Ok(PolicyDecision::from(&rule.then));
        }
    }
    Ok(PolicyDecision::default())
}

/// Evaluates a step's admission policy. Returns `true` (admit) when no
/// rule matches and no `else` branch is configured, per spec.md's
/// default-allow admission semantics.
pub fn evaluate_admit_policy(policy: &AdmitPolicy, scope: &Scope) -> Result<bool> {
    for rule in &policy.rules {
        if scope.eval_condition(&rule.when)? {
            return Ok(rule.then.allow);
        }
    }
    Ok(policy.r#else.as_ref().map(|t| t.allow).unwrap_or(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_contracts::playbook::{ActionKind, AdmitRule, AdmitThen, PolicyRule};

    fn scope_with_status(status: i64) -> Scope {
        Scope::new().with("outcome", serde_json::json!({"http": {"status": status}}))
    }

    #[test]
    fn first_matching_rule_wins() {
        let policy = TaskPolicy {
            rules: vec![
                PolicyRule {
                    when: Some("outcome.http.status in [500, 503]".to_string()),
                    then: PolicyThen {
                        r#do: ActionKind::Retry,
                        attempts: Some(3),
                        backoff: Some(Backoff::Exponential),
                        delay: Some(1.0),
                        to: None,
                        set_iter: None,
                        set_ctx: None,
                    },
                },
                PolicyRule {
                    when: None,
                    then: PolicyThen {
                        r#do: ActionKind::Continue,
                        ..Default::default()
                    },
                },
            ],
        };
        let decision = evaluate_task_policy(&policy, &scope_with_status(503)).unwrap();
        assert_eq!(decision.action, ActionKind::Retry);
        assert_eq!(decision.attempts, Some(3));

        let decision = evaluate_task_policy(&policy, &scope_with_status(200)).unwrap();
        assert_eq!(decision.action, ActionKind::Continue);
    }

    #[test]
    fn no_rules_defaults_to_continue() {
        let policy = TaskPolicy { rules: vec![] };
        let decision = evaluate_task_policy(&policy, &scope_with_status(200)).unwrap();
        assert_eq!(decision.action, ActionKind::Continue);
    }

    #[test]
    fn admit_policy_defaults_to_allow_with_no_else() {
        let policy = AdmitPolicy {
            rules: vec![AdmitRule {
                when: "workload.enabled".to_string(),
                then: AdmitThen { allow: false },
            }],
            r#else: None,
        };
        let scope = Scope::new().with("workload", serde_json::json!({"enabled": false}));
        assert!(evaluate_admit_policy(&policy, &scope).unwrap());
    }

    #[test]
    fn admit_policy_rule_match_short_circuits_else() {
        let policy = AdmitPolicy {
            rules: vec![AdmitRule {
                when: "workload.enabled".to_string(),
                then: AdmitThen { allow: false },
            }],
            r#else: Some(AdmitThen { allow: true }),
        };
        let scope = Scope::new().with("workload", serde_json::json!({"enabled": true}));
        assert!(!evaluate_admit_policy(&policy, &scope).unwrap());
    }
}
