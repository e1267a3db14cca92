// Secrets probe adapter (`kind: secrets`). Confirms a keychain entry
// resolved for this task and reports its metadata -- name, token type,
// whether it was present -- without ever putting the decrypted secret
// value into the outcome. Playbooks use this to branch on credential
// availability (`next.arcs[].when: "outcome.result.present"`) rather
// than to read secret contents; reading contents is what the
// credential-consuming adapters (http, postgres) do internally.

use async_trait::async_trait;
use chrono::Utc;
use noetl_contracts::outcome::{Outcome, OutcomeMeta};
use noetl_contracts::playbook::ToolTask;
use noetl_core::scope::Scope;
use noetl_core::traits::{ResolvedCredential, ToolAdapter};
use serde_json::json;

pub struct SecretsAdapter;

#[async_trait]
impl ToolAdapter for SecretsAdapter {
    async fn execute(&self, _task: &ToolTask, _scope: &Scope, credential: Option<ResolvedCredential>) -> Outcome {
        let started_at = Utc::now();
        let meta = OutcomeMeta {
            attempt: 1,
            duration_ms: 0,
            started_at,
            ended_at: Utc::now(),
        };

        match credential {
            Some(cred) => Outcome::ok(
                json!({
                    "present": true,
                    "name": cred.name,
                    "token_type": cred.token_type,
                }),
                meta,
            ),
            None => Outcome::ok(json!({ "present": false }), meta),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_contracts::playbook::ToolKind;

    fn task() -> ToolTask {
        ToolTask { kind: ToolKind::Secrets, spec: None, config: Default::default() }
    }

    #[tokio::test]
    async fn present_credential_reports_metadata_without_secret() {
        let cred = ResolvedCredential {
            name: "db".to_string(),
            secret: json!({"dsn": "postgres://user:pw@host/db"}),
            token_type: Some("basic".to_string()),
        };
        let outcome = SecretsAdapter.execute(&task(), &Scope::new(), Some(cred)).await;
        let result = outcome.result.unwrap();
        assert_eq!(result["present"], json!(true));
        assert_eq!(result["name"], json!("db"));
        assert!(result.get("dsn").is_none());
    }

    #[tokio::test]
    async fn missing_credential_reports_absent() {
        let outcome = SecretsAdapter.execute(&task(), &Scope::new(), None).await;
        assert_eq!(outcome.result.unwrap()["present"], json!(false));
    }
}
