//! Step input templating.
//!
//! Supported patterns:
//! - `${context.<key>}` (or bare `${<key>}`) — a value from the instance context
//! - `${steps.<id>.output}` — text returned by a completed step
//! - `${steps.<id>.data}` / `${steps.<id>.data.<field>...}` — structured data
//!   returned by a completed step
//!
//! Unresolvable references are left in place verbatim.

use serde_json::{Map, Value};

use crate::models::workflow::StepInstance;

/// A reference found in an input template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateRef {
    Context(String),
    StepOutput(String),
    StepData(String, Vec<String>),
}

impl TemplateRef {
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::StepOutput(id) | Self::StepData(id, _) => Some(id),
            Self::Context(_) => None,
        }
    }
}

fn placeholder_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid placeholder regex"))
}

fn parse_ref(expr: &str) -> Option<TemplateRef> {
    let expr = expr.trim();
    if let Some(key) = expr.strip_prefix("context.") {
        return Some(TemplateRef::Context(key.to_string()));
    }
    if let Some(rest) = expr.strip_prefix("steps.") {
        let mut segments = rest.split('.');
        let id = segments.next()?.to_string();
        return match segments.next()? {
            "output" => Some(TemplateRef::StepOutput(id)),
            "data" => Some(TemplateRef::StepData(id, segments.map(|s| s.to_string()).collect())),
            _ => None,
        };
    }
    if expr.is_empty() {
        None
    } else {
        Some(TemplateRef::Context(expr.to_string()))
    }
}

/// Every reference in `template`, in order of appearance.
pub fn references(template: &str) -> Vec<TemplateRef> {
    placeholder_regex()
        .captures_iter(template)
        .filter_map(|caps| parse_ref(&caps[1]))
        .collect()
}

/// Render `template` against the instance context and finished steps.
pub fn render(template: &str, context: &Map<String, Value>, steps: &[StepInstance]) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures| {
            let resolved = parse_ref(&caps[1]).and_then(|r| match r {
                TemplateRef::Context(key) => context.get(&key).map(value_to_text),
                TemplateRef::StepOutput(id) => steps
                    .iter()
                    .find(|s| s.id == id)
                    .and_then(|s| s.output.clone()),
                TemplateRef::StepData(id, path) => steps
                    .iter()
                    .find(|s| s.id == id)
                    .and_then(|s| s.data.as_ref())
                    .and_then(|d| lookup(d, &path))
                    .map(value_to_text),
            });
            resolved.unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

fn lookup<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::StepStatus;
    use serde_json::json;

    fn finished(id: &str, output: &str, data: Value) -> StepInstance {
        StepInstance {
            id: id.to_string(),
            agent_id: "agent".to_string(),
            action: "act".to_string(),
            status: StepStatus::Completed,
            output: Some(output.to_string()),
            data: Some(data),
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_references() {
        let refs = references("Pay ${context.amount} to ${steps.offers.data.best.seller} (${steps.balance.output}) ${wallet}");
        assert_eq!(
            refs,
            vec![
                TemplateRef::Context("amount".into()),
                TemplateRef::StepData("offers".into(), vec!["best".into(), "seller".into()]),
                TemplateRef::StepOutput("balance".into()),
                TemplateRef::Context("wallet".into()),
            ]
        );
    }

    #[test]
    fn test_render_resolves_context_and_steps() {
        let mut context = Map::new();
        context.insert("amount".into(), json!(25));
        context.insert("resource".into(), json!("gpu-hours"));
        let steps = vec![finished(
            "offers",
            "2 offers",
            json!({ "offers": [{ "seller": "acme" }, { "seller": "globex" }] }),
        )];

        assert_eq!(
            render(
                "Buy ${context.amount} ${resource} from ${steps.offers.data.offers.1.seller} after ${steps.offers.output}",
                &context,
                &steps
            ),
            "Buy 25 gpu-hours from globex after 2 offers"
        );
    }

    #[test]
    fn test_render_leaves_unknown_references() {
        let rendered = render("${context.missing} / ${steps.nope.output}", &Map::new(), &[]);
        assert_eq!(rendered, "${context.missing} / ${steps.nope.output}");
    }
}
