// The simplest adapter: echoes its rendered config back as the result.
// Used for scaffolding playbooks and in tests that only exercise
// routing/loop/admission logic without a real backend.

use async_trait::async_trait;
use chrono::Utc;
use noetl_contracts::outcome::{Outcome, OutcomeMeta};
use noetl_contracts::playbook::ToolTask;
use noetl_core::scope::Scope;
use noetl_core::traits::{ResolvedCredential, ToolAdapter};

pub struct NoopAdapter;

#[async_trait]
impl ToolAdapter for NoopAdapter {
    async fn execute(&self, task: &ToolTask, _scope: &Scope, _credential: Option<ResolvedCredential>) -> Outcome {
        let started_at = Utc::now();
        Outcome::ok(
            serde_json::Value::Object(task.config.clone()),
            OutcomeMeta {
                attempt: 1,
                duration_ms: 0,
                started_at,
                ended_at: started_at,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_contracts::playbook::ToolKind;

    #[tokio::test]
    async fn echoes_config_as_result() {
        let task = ToolTask {
            kind: ToolKind::Noop,
            spec: None,
            config: serde_json::json!({"x": 1}).as_object().unwrap().clone(),
        };
        let outcome = NoopAdapter.execute(&task, &Scope::new(), None).await;
        assert!(outcome.is_ok());
        assert_eq!(outcome.result.unwrap(), serde_json::json!({"x": 1}));
    }
}
