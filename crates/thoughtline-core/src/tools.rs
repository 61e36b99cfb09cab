//! External tool boundary: the catalog the critic validates against and the
//! invoker the executor calls.
//!
//! The catalog is a snapshot of registered tool names. Validation of plan
//! actions against it is deterministic and never flags a registered name.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use thiserror::Error;
use thoughtline_types::output::{Issue, IssueCategory, Plan, Severity};

/// Errors raised by tool invocations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ToolError {
    /// The requested tool is not registered.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The arguments do not fit the tool.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The tool ran and failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The tool did not answer in time.
    #[error("timeout after {0}s")]
    Timeout(u64),
}

// ── Catalog ─────────────────────────────────────────────────────────────

/// Source of registered tool names.
pub trait ToolCatalog: Send + Sync {
    /// Current snapshot of registered names.
    fn list(&self) -> Vec<String>;

    fn contains(&self, name: &str) -> bool {
        self.list().iter().any(|t| t == name)
    }
}

/// A fixed list of tool names.
#[derive(Debug, Clone, Default)]
pub struct StaticToolCatalog {
    names: BTreeSet<String>,
}

impl StaticToolCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ToolCatalog for StaticToolCatalog {
    fn list(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }

    fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

// ── Invoker ─────────────────────────────────────────────────────────────

/// Calls a tool by name with JSON parameters.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn call(&self, name: &str, parameters: &Map<String, Value>) -> Result<Value, ToolError>;
}

/// Invoker that records the call instead of performing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunInvoker;

#[async_trait]
impl ToolInvoker for DryRunInvoker {
    async fn call(&self, name: &str, parameters: &Map<String, Value>) -> Result<Value, ToolError> {
        Ok(json!({
            "dry_run": true,
            "tool": name,
            "parameters": parameters,
        }))
    }
}

// ── Plan validation ─────────────────────────────────────────────────────

/// Names models invent when they try to batch or namespace tool calls.
const HALLUCINATION_PATTERNS: &[&str] = &["*_parallel", "multi_tool_use*", "*.parallel", "functions.*"];

/// Match a tool name against a glob pattern (`*` and `?`).
fn glob_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (plen, tlen) = (pattern.len(), text.len());

    let mut pi = 0;
    let mut ti = 0;
    let mut star_pi = None;
    let mut star_ti = 0;

    while ti < tlen {
        if pi < plen && (pattern[pi] == '?' || pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < plen && pattern[pi] == '*' {
            star_pi = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(spi) = star_pi {
            pi = spi + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < plen && pattern[pi] == '*' {
        pi += 1;
    }

    pi == plen
}

fn looks_hallucinated(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HALLUCINATION_PATTERNS
        .iter()
        .any(|p| glob_matches(p, &lower))
}

/// A well-formed tool name is non-empty and made of identifier characters.
fn well_formed(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/'))
}

/// Registered names that contain, or are contained in, `name`
/// (case-insensitive).
fn near_misses<'a>(name: &str, registry: &'a [String]) -> Vec<&'a str> {
    let lower = name.to_ascii_lowercase();
    registry
        .iter()
        .filter(|t| {
            let t = t.to_ascii_lowercase();
            t.contains(&lower) || lower.contains(&t)
        })
        .map(String::as_str)
        .collect()
}

/// Check every plan action against `registry`.
///
/// Registered names produce no issue. Unregistered names become
/// feasibility issues: high for hallucination patterns and malformed
/// names, low when registered names partially match (all candidates are
/// listed), medium otherwise.
pub fn validate_actions(plan: &Plan, registry: &[String]) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (step, action) in plan.actions() {
        if registry.iter().any(|t| t == action) {
            continue;
        }

        let (severity, detail, suggestion) = if looks_hallucinated(action) {
            (
                Severity::High,
                "matches a known hallucinated tool pattern".to_string(),
                Some("call registered tools one step at a time".to_string()),
            )
        } else if !well_formed(action) {
            (
                Severity::High,
                "is not a valid tool name".to_string(),
                None,
            )
        } else {
            let candidates = near_misses(action, registry);
            if candidates.is_empty() {
                (Severity::Medium, "is not registered".to_string(), None)
            } else {
                (
                    Severity::Low,
                    "is not registered but partially matches registered tools".to_string(),
                    Some(format!("did you mean one of: {}", candidates.join(", "))),
                )
            }
        };

        issues.push(Issue {
            category: IssueCategory::Feasibility,
            severity,
            description: format!("step {}: tool '{action}' {detail}", step.order),
            suggestion,
            step_order: Some(step.order),
        });
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use thoughtline_types::context::RequestContext;
    use thoughtline_types::output::{OutputMeta, Step};

    fn registry() -> Vec<String> {
        ["list_facilities", "get_facility", "analyze_shipment_risk"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn plan(actions: &[Option<&str>]) -> Plan {
        Plan {
            meta: OutputMeta::new(&RequestContext::with_id("r", None)),
            steps: actions
                .iter()
                .enumerate()
                .map(|(i, a)| Step {
                    order: i as u32 + 1,
                    description: format!("step {i}"),
                    action: a.map(String::from),
                    parameters: Map::new(),
                })
                .collect(),
            rationale: String::new(),
            thought_version: 1,
            revised_from_critique: None,
        }
    }

    #[test]
    fn glob_basics() {
        assert!(glob_matches("*_parallel", "run_parallel"));
        assert!(glob_matches("multi_tool_use*", "multi_tool_use.parallel"));
        assert!(!glob_matches("functions.*", "list_facilities"));
        assert!(glob_matches("read_?", "read_a"));
        assert!(!glob_matches("read_?", "read_file"));
    }

    #[test]
    fn registered_actions_are_never_flagged() {
        let p = plan(&[
            Some("list_facilities"),
            None,
            Some("get_facility"),
            Some("analyze_shipment_risk"),
        ]);
        assert!(validate_actions(&p, &registry()).is_empty());
    }

    #[test]
    fn hallucinated_batch_call_is_high() {
        let issues = validate_actions(&plan(&[Some("multi_tool_use.parallel")]), &registry());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, IssueCategory::Feasibility);
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].step_order, Some(1));
    }

    #[test]
    fn malformed_name_is_high() {
        let issues = validate_actions(&plan(&[Some("list facilities!")]), &registry());
        assert_eq!(issues[0].severity, Severity::High);
    }

    #[test]
    fn partial_matches_are_all_reported() {
        let mut tools = registry();
        tools.push("get_facility_status".into());
        let issues = validate_actions(&plan(&[Some("facility")]), &tools);
        assert_eq!(issues[0].severity, Severity::Low);
        let suggestion = issues[0].suggestion.as_deref().unwrap();
        assert!(suggestion.contains("get_facility,"));
        assert!(suggestion.contains("get_facility_status"));
        assert!(!suggestion.contains("list_facilities"));
    }

    #[test]
    fn unknown_plausible_name_is_medium() {
        let issues = validate_actions(&plan(&[Some("send_email")]), &registry());
        assert_eq!(issues[0].severity, Severity::Medium);
    }

    #[test]
    fn static_catalog_lookup() {
        let catalog = StaticToolCatalog::new(registry());
        assert!(catalog.contains("get_facility"));
        assert!(!catalog.contains("get_facilities"));
        assert_eq!(catalog.list().len(), 3);
    }

    #[tokio::test]
    async fn dry_run_echoes_call() {
        let mut params = Map::new();
        params.insert("id".into(), json!(7));
        let out = DryRunInvoker.call("get_facility", &params).await.unwrap();
        assert_eq!(out["tool"], "get_facility");
        assert_eq!(out["parameters"]["id"], 7);
    }
}
