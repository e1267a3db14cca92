// Pipeline rendering: the orchestrator is the authoritative template
// renderer (spec.md §4.3.2) -- workers consume the rendered snapshot
// and never re-render. Walks a step's ordered task map and resolves
// every `{{ }}` placeholder against the bound Scope.

use noetl_contracts::playbook::Step;
use noetl_core::error::Result;
use noetl_core::scope::Scope;
use serde_json::Value;

/// Renders every task in `step`'s pipeline, in declaration order, into
/// a JSON array of `{name, kind, config}` objects -- the
/// `rendered_pipeline` carried by `QueuePayload`.
pub fn render_pipeline(step: &Step, scope: &Scope) -> Result<Value> {
    let mut tasks = Vec::new();
    for (name, task) in step.tasks() {
        let config = render_value(scope, &Value::Object(task.config.clone()))?;
        tasks.push(serde_json::json!({
            "name": name,
            "kind": task.kind.to_string(),
            "config": config,
            // Policy rules are evaluated worker-side against the tool's
            // outcome, which doesn't exist yet at render time -- carried
            // through unrendered rather than interpolated here.
            "spec": task.spec,
        }));
    }
    Ok(Value::Array(tasks))
}

/// Recursively resolves `{{ path }}` placeholders in every string leaf
/// of `value`, preserving structure. Non-string leaves pass through
/// unchanged.
pub fn render_value(scope: &Scope, value: &Value) -> Result<Value> {
    match value {
        Value::String(s) => scope.render_template(s),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_value(scope, v)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(render_value(scope, item)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_nested_string_placeholders() {
        let scope = Scope::new().with("workload", json!({"name": "alice"}));
        let value = json!({"greeting": "hello {{ workload.name }}", "count": 3});
        let rendered = render_value(&scope, &value).unwrap();
        assert_eq!(rendered["greeting"], json!("hello alice"));
        assert_eq!(rendered["count"], json!(3));
    }

    #[test]
    fn whole_string_placeholder_preserves_type() {
        let scope = Scope::new().with("workload", json!({"items": [1, 2, 3]}));
        let value = json!({"items": "{{ workload.items }}"});
        let rendered = render_value(&scope, &value).unwrap();
        assert_eq!(rendered["items"], json!([1, 2, 3]));
    }
}
