// Playbook YAML grammar (spec.md §6 "Playbook YAML grammar (core subset)").
//
// Shape is grounded on NoETL's own prior attempt at this grammar
// (examples/other_examples/*noetl-noetl__crates-control-plane-src-playbook-types.rs.rs),
// generalized to the tool-pipeline-per-step / admit-policy / next.arcs
// shape this spec actually describes (the legacy source had a single
// tool per step and case/when/then; this spec has an ordered pipeline
// of named tasks per step and a Petri-net style `next.arcs[]`).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Http,
    Postgres,
    Duckdb,
    Ducklake,
    Python,
    Workbook,
    Playbook,
    Playbooks,
    Secrets,
    Iterator,
    Container,
    Script,
    Snowflake,
    Transfer,
    SnowflakeTransfer,
    Gcs,
    Noop,
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        write!(f, "{s}")
    }
}

/// Playbook metadata (`metadata{name,path,version?}`).
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Keychain entry definition (`keychain[]`).
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeychainDef {
    pub name: String,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub auto_renew: bool,
    #[serde(default)]
    pub renew_config: Option<serde_json::Value>,
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// `executor{spec?}` — process-level scheduling hints for the orchestrator.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Executor {
    #[serde(default)]
    pub spec: Option<ExecutorSpec>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSpec {
    /// Overrides the default entry step (first in `workflow`).
    #[serde(default)]
    pub entry_step: Option<String>,
    /// When true, a boundary event with no matching/default arc escalates
    /// to step failure instead of silently terminating the branch.
    #[serde(default)]
    pub no_next_is_error: bool,
}

/// Admission rule: `step.spec.policy.admit.rules[]`.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmitRule {
    pub when: String,
    pub then: AdmitThen,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmitThen {
    pub allow: bool,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmitPolicy {
    #[serde(default)]
    pub rules: Vec<AdmitRule>,
    /// Branch taken when no rule matches. Default admit policy is allow.
    #[serde(default)]
    pub r#else: Option<AdmitThen>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepPolicyBlock {
    #[serde(default)]
    pub admit: Option<AdmitPolicy>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(default)]
    pub policy: Option<StepPolicyBlock>,
}

/// Loop execution mode (`loop.mode`). Only the two modes spec.md names.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    #[default]
    Sequential,
    Parallel,
}

/// Step-level loop configuration (`loop{in, iterator, mode, max_in_flight?}`).
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSpec {
    #[serde(rename = "in")]
    pub in_expr: String,
    pub iterator: String,
    #[serde(default)]
    pub mode: LoopMode,
    #[serde(default)]
    pub max_in_flight: Option<u32>,
}

/// Backoff strategy for a `retry` policy action.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    None,
    Linear,
    Exponential,
}

/// Task-outcome policy action (spec.md §4.5's `Action` enum).
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    #[default]
    Continue,
    Retry,
    Jump,
    Break,
    Fail,
}

/// `then.do` block of a task policy rule.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyThen {
    pub r#do: ActionKind,
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub backoff: Option<Backoff>,
    #[serde(default)]
    pub delay: Option<f64>,
    /// Target task label for `jump`.
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub set_iter: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub set_ctx: Option<serde_json::Map<String, serde_json::Value>>,
}

/// `task.spec.policy.rules[]` entry. `when` absent means an `else`/default
/// rule matching unconditionally.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default)]
    pub when: Option<String>,
    pub then: PolicyThen,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPolicy {
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultStore {
    NatsKv,
    NatsObject,
    Gcs,
    Postgres,
    #[default]
    Memory,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultScope {
    #[default]
    Step,
    Execution,
    Workflow,
    Permanent,
}

/// One JSONPath-like extraction rule producing a `result_ref.extracted.*` field.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectRule {
    pub name: String,
    pub path: String,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSpec {
    #[serde(default)]
    pub inline_max_bytes: Option<u64>,
    #[serde(default)]
    pub store: Option<ResultStore>,
    #[serde(default)]
    pub scope: Option<ResultScope>,
    #[serde(default)]
    pub select: Vec<SelectRule>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub policy: Option<TaskPolicy>,
    #[serde(default)]
    pub result: Option<ResultSpec>,
    #[serde(default)]
    pub timeout: Option<f64>,
}

/// A single task in a step's ordered pipeline: `tool[<task_label>: {kind, ...}]`.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTask {
    pub kind: ToolKind,
    #[serde(default)]
    pub spec: Option<TaskSpec>,
    /// Every other tool-kind-specific field (`url`, `method`, `query`,
    /// `connection`, `code`, `auth`, `libs`, `args`, ...).
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl ToolTask {
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// `next.spec.mode`: exclusive fires the first matching arc, inclusive
/// fans out to every matching arc.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    #[default]
    Exclusive,
    Inclusive,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NextModeSpec {
    #[serde(default)]
    pub mode: RoutingMode,
}

/// One outgoing arc: `next.arcs[{step, when?, args?}]`.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextArc {
    pub step: String,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub args: Option<serde_json::Map<String, serde_json::Value>>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NextSpec {
    #[serde(default)]
    pub spec: NextModeSpec,
    #[serde(default)]
    pub arcs: Vec<NextArc>,
}

/// A workflow step: admission policy, optional loop, an ordered task
/// pipeline, and outgoing routing arcs.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step: String,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub spec: Option<StepSpec>,
    #[serde(default)]
    pub r#loop: Option<LoopSpec>,
    #[serde(default)]
    pub tool: IndexMap<String, ToolTask>,
    #[serde(default)]
    pub next: Option<NextSpec>,
}

impl Step {
    /// Ordered `(label, task)` pairs, in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = (&str, &ToolTask)> {
        self.tool.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn task_index(&self, label: &str) -> Option<usize> {
        self.tool.get_index_of(label)
    }

    pub fn task_at(&self, index: usize) -> Option<(&str, &ToolTask)> {
        self.tool.get_index(index).map(|(k, v)| (k.as_str(), v))
    }
}

/// Reusable task definition in `workbook?`.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookTask {
    pub name: String,
    pub tool: ToolTask,
    #[serde(default)]
    pub sink: Option<serde_json::Value>,
}

pub const END_STEP: &str = "end";

/// Full playbook definition.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub metadata: Metadata,
    #[serde(default)]
    pub keychain: Vec<KeychainDef>,
    #[serde(default)]
    pub executor: Executor,
    #[serde(default)]
    pub workload: Option<serde_json::Value>,
    pub workflow: Vec<Step>,
    #[serde(default)]
    pub workbook: Vec<WorkbookTask>,
}

impl Playbook {
    pub fn parse_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let mut pb: Playbook = serde_yaml::from_str(yaml)?;
        pb.inject_default_end();
        Ok(pb)
    }

    pub fn get_step(&self, name: &str) -> Option<&Step> {
        self.workflow.iter().find(|s| s.step == name)
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.workflow.iter().map(|s| s.step.as_str()).collect()
    }

    pub fn has_end_step(&self) -> bool {
        self.workflow.iter().any(|s| s.step == END_STEP)
    }

    /// spec.md §8: "A playbook missing an `end` step gets one injected
    /// with a trivial aggregator." The injected step has an empty
    /// pipeline; the orchestrator's terminal-step handling (not this
    /// task pipeline) is what inspects `step_state` and emits
    /// `execution.completed`/`execution.failed`.
    pub fn inject_default_end(&mut self) {
        if !self.has_end_step() {
            self.workflow.push(Step {
                step: END_STEP.to_string(),
                desc: Some("implicitly injected terminal aggregator".to_string()),
                spec: None,
                r#loop: None,
                tool: IndexMap::new(),
                next: None,
            });
        }
    }

    /// The step targeted by the execution's initial token: `executor.
    /// entry_step` if set, otherwise the first step in `workflow`.
    pub fn entry_step(&self) -> Option<&str> {
        if let Some(spec) = &self.executor.spec {
            if let Some(entry) = &spec.entry_step {
                return Some(entry.as_str());
            }
        }
        self.workflow.first().map(|s| s.step.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"
metadata:
  name: test_playbook
  path: test/simple
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
  - step: B
    tool:
      t:
        kind: noop
"#;

    #[test]
    fn parses_simple_playbook_and_injects_end() {
        let pb = Playbook::parse_yaml(SIMPLE).unwrap();
        assert_eq!(pb.metadata.name, "test_playbook");
        assert_eq!(pb.step_names(), vec!["A", "B", "end"]);
        assert!(pb.has_end_step());
        assert_eq!(pb.entry_step(), Some("A"));
    }

    #[test]
    fn explicit_end_step_is_not_duplicated() {
        let yaml = format!(
            "{}\n  - step: end\n    tool: {{}}\n",
            SIMPLE.trim_end()
        );
        let pb = Playbook::parse_yaml(&yaml).unwrap();
        assert_eq!(pb.step_names().iter().filter(|s| **s == "end").count(), 1);
    }

    #[test]
    fn entry_step_override_via_executor_spec() {
        let yaml = r#"
metadata:
  name: test
executor:
  spec:
    entry_step: B
workflow:
  - step: A
    tool:
      t: {kind: noop}
  - step: B
    tool:
      t: {kind: noop}
"#;
        let pb = Playbook::parse_yaml(yaml).unwrap();
        assert_eq!(pb.entry_step(), Some("B"));
    }

    #[test]
    fn tasks_preserve_declaration_order() {
        let yaml = r#"
metadata:
  name: pipeline
workflow:
  - step: A
    tool:
      first: {kind: noop}
      second: {kind: http, url: "http://example.com"}
      third: {kind: noop}
"#;
        let pb = Playbook::parse_yaml(yaml).unwrap();
        let step = pb.get_step("A").unwrap();
        let labels: Vec<&str> = step.tasks().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["first", "second", "third"]);
        assert_eq!(
            step.task_at(1).unwrap().1.config_str("url"),
            Some("http://example.com")
        );
    }

    #[test]
    fn loop_spec_parses_mode_and_cap() {
        let yaml = r#"
metadata:
  name: loopy
workflow:
  - step: A
    loop:
      in: "{{ workload.items }}"
      iterator: item
      mode: parallel
      max_in_flight: 2
    tool:
      t: {kind: noop}
"#;
        let pb = Playbook::parse_yaml(yaml).unwrap();
        let step = pb.get_step("A").unwrap();
        let l = step.r#loop.as_ref().unwrap();
        assert_eq!(l.mode, LoopMode::Parallel);
        assert_eq!(l.max_in_flight, Some(2));
    }

    #[test]
    fn admit_rules_and_policy_rules_parse() {
        let yaml = r#"
metadata:
  name: gated
workflow:
  - step: A
    spec:
      policy:
        admit:
          rules:
            - when: "workload.enabled"
              then: {allow: true}
          else: {allow: false}
    tool:
      fetch:
        kind: http
        url: "http://x"
        spec:
          policy:
            rules:
              - when: "outcome.http.status in [500, 503]"
                then: {do: retry, attempts: 3, backoff: exponential, delay: 1.0}
              - then: {do: continue}
"#;
        let pb = Playbook::parse_yaml(yaml).unwrap();
        let step = pb.get_step("A").unwrap();
        let admit = step
            .spec
            .as_ref()
            .unwrap()
            .policy
            .as_ref()
            .unwrap()
            .admit
            .as_ref()
            .unwrap();
        assert_eq!(admit.rules.len(), 1);
        assert!(!admit.r#else.as_ref().unwrap().allow);

        let (_, fetch) = step.task_at(0).unwrap();
        let rules = &fetch.spec.as_ref().unwrap().policy.as_ref().unwrap().rules;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].then.r#do, ActionKind::Retry);
        assert_eq!(rules[0].then.attempts, Some(3));
        assert!(rules[1].when.is_none());
    }
}
