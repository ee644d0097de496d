//! Workflow definition types.
//!
//! A workflow is a named graph of steps, each bound to one agent action:
//!
//! ```yaml
//! name: "resource-purchase"
//! description: "Check funds, find offers, then pay"
//! steps:
//!   - id: balance
//!     agent: balance-agent
//!     action: check_balance
//!     input: "Balance for wallet ${context.wallet}"
//!     reads: [wallet]
//!
//!   - id: offers
//!     agent: negotiation-agent
//!     action: discover_offers
//!     input: "Find offers for ${context.resource}"
//!     reads: [resource]
//!
//!   - id: payment
//!     agent: payment-agent
//!     action: pay
//!     input: "Pay for ${steps.offers.output} using ${context.wallet}"
//!     reads: [wallet]
//!     depends_on: [balance, offers]
//! ```
//!
//! Definitions are validated when they are built or loaded: duplicate ids,
//! dangling or cyclic dependencies, and undeclared template references are
//! all rejected before anything runs.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::render::{references, TemplateRef};
use crate::error::ServerError;

/// Top-level workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name (catalog key)
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Steps in declaration order; this order breaks ties between ready steps
    pub steps: Vec<StepTemplate>,
}

/// One step of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTemplate {
    /// Step id, unique within the workflow
    pub id: String,

    /// Agent that executes this step
    #[serde(rename = "agent", alias = "agent_id")]
    pub agent_id: String,

    /// Opaque instruction passed to the agent
    pub action: String,

    /// Request text, see [`super::render`] for the placeholder syntax
    #[serde(default, rename = "input", alias = "input_template")]
    pub input_template: String,

    /// Steps that must complete before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Context keys this step reads; checked before the workflow runs
    #[serde(default)]
    pub reads: Vec<String>,

    /// Context key that receives this step's result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
}

impl StepTemplate {
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            action: action.into(),
            input_template: String::new(),
            depends_on: Vec::new(),
            reads: Vec::new(),
            output_key: None,
        }
    }

    pub fn input(mut self, template: impl Into<String>) -> Self {
        self.input_template = template.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn reads<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: StepTemplate) -> Self {
        self.steps.push(step);
        self
    }

    /// Parse and validate a workflow definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ServerError> {
        let definition: Self = serde_yaml::from_str(yaml).map_err(|e| {
            ServerError::InvalidDefinition(format!("Failed to parse workflow YAML: {}", e))
        })?;
        definition.validate()?;
        Ok(definition)
    }

    /// Load and validate a workflow definition from a file path.
    pub fn from_file(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::InvalidDefinition(format!("Failed to read workflow file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    /// Check the definition's structure. Cycles are reported as
    /// `CyclicDependency`; everything else as `InvalidDefinition`.
    pub fn validate(&self) -> Result<(), ServerError> {
        let invalid = |msg: String| {
            Err(ServerError::InvalidDefinition(format!("workflow '{}': {}", self.name, msg)))
        };

        if self.name.trim().is_empty() {
            return Err(ServerError::InvalidDefinition("workflow name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return invalid("has no steps".to_string());
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !is_valid_step_id(&step.id) {
                return invalid(format!(
                    "step id '{}' must be non-empty and use only letters, digits, '-' or '_'",
                    step.id
                ));
            }
            if !seen.insert(step.id.as_str()) {
                return invalid(format!("duplicate step id '{}'", step.id));
            }
            if step.agent_id.trim().is_empty() {
                return invalid(format!("step '{}' has no agent", step.id));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.id {
                    return invalid(format!("step '{}' depends on itself", step.id));
                }
                if !seen.contains(dep.as_str()) {
                    return invalid(format!("step '{}' depends on unknown step '{}'", step.id, dep));
                }
            }

            for reference in references(&step.input_template) {
                match &reference {
                    TemplateRef::Context(key) => {
                        if !step.reads.iter().any(|k| k == key) {
                            return invalid(format!(
                                "step '{}' reads context key '{}' without declaring it in `reads`",
                                step.id, key
                            ));
                        }
                    }
                    TemplateRef::StepOutput(id) | TemplateRef::StepData(id, _) => {
                        if !step.depends_on.iter().any(|d| d == id) {
                            return invalid(format!(
                                "step '{}' uses the result of '{}' without depending on it",
                                step.id, id
                            ));
                        }
                    }
                }
            }
        }

        let mut producers: HashMap<&str, &str> = HashMap::new();
        for step in &self.steps {
            if let Some(key) = step.output_key.as_deref() {
                if let Some(other) = producers.insert(key, step.id.as_str()) {
                    return invalid(format!(
                        "context key '{}' is written by both '{}' and '{}'",
                        key, other, step.id
                    ));
                }
            }
        }
        for step in &self.steps {
            for key in &step.reads {
                let Some(producer) = producers.get(key.as_str()) else { continue };
                if !self.ancestors(&step.id).contains(producer) {
                    return invalid(format!(
                        "step '{}' reads context key '{}' written by '{}' without depending on it",
                        step.id, key, producer
                    ));
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Every step reachable through `depends_on`, direct or transitive.
    fn ancestors<'a>(&'a self, id: &'a str) -> HashSet<&'a str> {
        let by_id: HashMap<&str, &StepTemplate> =
            self.steps.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![id];
        while let Some(current) = stack.pop() {
            let Some(step) = by_id.get(current) else { continue };
            for dep in &step.depends_on {
                if seen.insert(dep.as_str()) {
                    stack.push(dep.as_str());
                }
            }
        }
        seen
    }

    /// Step ids in an order that respects dependencies, breaking ties by
    /// declaration order (Kahn's algorithm).
    pub fn topological_order(&self) -> Result<Vec<String>, ServerError> {
        let mut remaining: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.len()))
            .collect();
        let mut order: Vec<String> = Vec::with_capacity(self.steps.len());

        loop {
            let next = self
                .steps
                .iter()
                .find(|s| remaining.get(s.id.as_str()) == Some(&0));
            let Some(step) = next else { break };
            remaining.remove(step.id.as_str());
            order.push(step.id.clone());
            for dependent in &self.steps {
                if let Some(count) = remaining.get_mut(dependent.id.as_str()) {
                    *count -= dependent.depends_on.iter().filter(|d| **d == step.id).count();
                }
            }
        }

        if order.len() == self.steps.len() {
            Ok(order)
        } else {
            let stuck: HashSet<&str> = remaining.keys().copied().collect();
            Err(ServerError::CyclicDependency(self.find_cycle(&stuck)))
        }
    }

    /// Walk dependencies among `stuck` steps until one repeats.
    fn find_cycle(&self, stuck: &HashSet<&str>) -> Vec<String> {
        let by_id: HashMap<&str, &StepTemplate> =
            self.steps.iter().map(|s| (s.id.as_str(), s)).collect();
        let Some(start) = self.steps.iter().find(|s| stuck.contains(s.id.as_str())) else {
            return Vec::new();
        };

        let mut path: Vec<&str> = vec![start.id.as_str()];
        let mut current = start;
        loop {
            let Some(next) = current
                .depends_on
                .iter()
                .find(|d| stuck.contains(d.as_str()))
                .and_then(|d| by_id.get(d.as_str()))
            else {
                return path.iter().map(|s| s.to_string()).collect();
            };
            if let Some(pos) = path.iter().position(|id| *id == next.id) {
                let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(next.id.clone());
                return cycle;
            }
            path.push(next.id.as_str());
            current = next;
        }
    }

    /// Context keys the caller must supply: everything declared in `reads`
    /// except keys an upstream step publishes through `output_key`.
    pub fn required_context_keys(&self) -> BTreeSet<String> {
        let produced: HashSet<&str> = self
            .steps
            .iter()
            .filter_map(|s| s.output_key.as_deref())
            .collect();
        self.steps
            .iter()
            .flat_map(|s| s.reads.iter())
            .filter(|k| !produced.contains(k.as_str()))
            .cloned()
            .collect()
    }

    /// Declared keys that `context` does not provide.
    pub fn missing_context_keys(
        &self,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> Vec<String> {
        self.required_context_keys()
            .into_iter()
            .filter(|k| !context.contains_key(k))
            .collect()
    }

    /// Agents referenced by this workflow, in first-use order.
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for step in &self.steps {
            if !ids.contains(&step.agent_id) {
                ids.push(step.agent_id.clone());
            }
        }
        ids
    }
}

fn is_valid_step_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> WorkflowDefinition {
        WorkflowDefinition::new("abc", "two roots and a join")
            .step(StepTemplate::new("A", "agent-a", "run"))
            .step(StepTemplate::new("B", "agent-b", "run"))
            .step(StepTemplate::new("C", "agent-c", "run").depends_on(["A", "B"]))
    }

    #[test]
    fn test_parse_yaml_workflow() {
        let yaml = r#"
name: "resource-purchase"
description: "Check funds, find offers, then pay"
steps:
  - id: balance
    agent: balance-agent
    action: check_balance
    input: "Balance for ${context.wallet}"
    reads: [wallet]
  - id: payment
    agent: payment-agent
    action: pay
    input: "Pay after ${steps.balance.output}"
    depends_on: [balance]
    output_key: receipt
"#;
        let wf = WorkflowDefinition::from_yaml(yaml).unwrap();
        assert_eq!(wf.name, "resource-purchase");
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wf.steps[0].agent_id, "balance-agent");
        assert_eq!(wf.steps[1].depends_on, vec!["balance"]);
        assert_eq!(wf.steps[1].output_key.as_deref(), Some("receipt"));
        assert_eq!(wf.agent_ids(), vec!["balance-agent", "payment-agent"]);
    }

    #[test]
    fn test_topological_order_uses_declaration_order() {
        assert_eq!(abc().topological_order().unwrap(), vec!["A", "B", "C"]);

        let reversed = WorkflowDefinition::new("rev", "")
            .step(StepTemplate::new("late", "x", "run").depends_on(["early"]))
            .step(StepTemplate::new("early", "x", "run"));
        assert_eq!(reversed.topological_order().unwrap(), vec!["early", "late"]);
    }

    #[test]
    fn test_two_step_cycle_is_rejected() {
        let wf = WorkflowDefinition::new("loop", "")
            .step(StepTemplate::new("X", "x", "run").depends_on(["Y"]))
            .step(StepTemplate::new("Y", "y", "run").depends_on(["X"]));
        match wf.validate().unwrap_err() {
            ServerError::CyclicDependency(cycle) => assert_eq!(cycle, vec!["X", "Y", "X"]),
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_behind_a_valid_prefix() {
        let wf = WorkflowDefinition::new("tail-loop", "")
            .step(StepTemplate::new("root", "x", "run"))
            .step(StepTemplate::new("p", "x", "run").depends_on(["root", "r"]))
            .step(StepTemplate::new("q", "x", "run").depends_on(["p"]))
            .step(StepTemplate::new("r", "x", "run").depends_on(["q"]));
        match wf.validate().unwrap_err() {
            ServerError::CyclicDependency(cycle) => assert_eq!(cycle, vec!["p", "r", "q", "p"]),
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_structural_errors() {
        let cases = vec![
            WorkflowDefinition::new("empty", ""),
            WorkflowDefinition::new("dup", "")
                .step(StepTemplate::new("a", "x", "run"))
                .step(StepTemplate::new("a", "x", "run")),
            WorkflowDefinition::new("dangling", "")
                .step(StepTemplate::new("a", "x", "run").depends_on(["ghost"])),
            WorkflowDefinition::new("self", "")
                .step(StepTemplate::new("a", "x", "run").depends_on(["a"])),
            WorkflowDefinition::new("dotted", "").step(StepTemplate::new("a.b", "x", "run")),
            WorkflowDefinition::new("undeclared-read", "")
                .step(StepTemplate::new("a", "x", "run").input("${context.wallet}")),
            WorkflowDefinition::new("undeclared-dep", "")
                .step(StepTemplate::new("a", "x", "run"))
                .step(StepTemplate::new("b", "x", "run").input("${steps.a.output}")),
        ];
        for wf in cases {
            let err = wf.validate().unwrap_err();
            assert!(
                matches!(err, ServerError::InvalidDefinition(_)),
                "{} should be invalid, got {:?}",
                wf.name,
                err
            );
        }
    }

    #[test]
    fn test_missing_context_keys() {
        let wf = WorkflowDefinition::new("ctx", "")
            .step(StepTemplate::new("a", "x", "run").reads(["wallet", "amount"]))
            .step(StepTemplate::new("b", "x", "run").reads(["wallet"]));
        let mut ctx = serde_json::Map::new();
        ctx.insert("wallet".into(), serde_json::json!("0xabc"));
        assert_eq!(wf.missing_context_keys(&ctx), vec!["amount"]);
    }

    #[test]
    fn test_output_key_satisfies_downstream_reads() {
        let wf = WorkflowDefinition::new("quoted", "")
            .step(StepTemplate::new("quote", "x", "quote").output_key("price"))
            .step(StepTemplate::new("review", "x", "review").depends_on(["quote"]))
            .step(
                StepTemplate::new("pay", "x", "pay")
                    .input("Pay ${context.price} from ${context.wallet}")
                    .reads(["price", "wallet"])
                    .depends_on(["review"]),
            );
        wf.validate().unwrap();
        assert_eq!(
            wf.required_context_keys().into_iter().collect::<Vec<_>>(),
            vec!["wallet"]
        );
        assert_eq!(wf.missing_context_keys(&serde_json::Map::new()), vec!["wallet"]);
    }

    #[test]
    fn test_output_key_read_requires_dependency() {
        let unordered = WorkflowDefinition::new("unordered", "")
            .step(StepTemplate::new("quote", "x", "quote").output_key("price"))
            .step(
                StepTemplate::new("pay", "x", "pay")
                    .input("Pay ${context.price}")
                    .reads(["price"]),
            );
        let err = unordered.validate().unwrap_err().to_string();
        assert!(err.contains("written by 'quote' without depending on it"), "{}", err);

        let twice = WorkflowDefinition::new("twice", "")
            .step(StepTemplate::new("a", "x", "run").output_key("price"))
            .step(StepTemplate::new("b", "x", "run").output_key("price"));
        let err = twice.validate().unwrap_err().to_string();
        assert!(err.contains("written by both 'a' and 'b'"), "{}", err);
    }
}
