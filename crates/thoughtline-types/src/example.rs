//! Labeled examples used for semantic guidance.
//!
//! Examples are authored explicitly (never harvested from production
//! traffic) and stored with an embedding of their query text. There is one
//! payload type per stage that consults examples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::output::Step;

/// Which example memory a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleKind {
    Complexity,
    Thought,
    Plan,
}

impl ExampleKind {
    /// The snake_case kind name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ExampleKind::Complexity => "complexity",
            ExampleKind::Thought => "thought",
            ExampleKind::Plan => "plan",
        }
    }
}

/// A stored example with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example<P> {
    pub id: String,
    /// Source query text.
    pub query: String,
    /// Embedding of `query`; length equals the index dimensionality.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Stage-specific payload.
    pub payload: P,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of successful matches.
    #[serde(default)]
    pub usage_count: u64,
}

/// An example as authored, before embedding and id assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExample<P> {
    pub query: String,
    pub payload: P,
}

/// A ranked match from a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarExample<P> {
    pub example: Example<P>,
    /// Cosine similarity, nominally `-1.0..=1.0`.
    pub similarity: f32,
}

/// Complexity directive for a known query shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityExample {
    #[serde(alias = "complexityScore")]
    pub complexity_score: f32,
    #[serde(alias = "reasoningPasses")]
    pub reasoning_passes: u8,
    pub confidence: f32,
    /// Optional free-form label ("simple lookup", "multi-hop", ...).
    #[serde(default)]
    pub category: Option<String>,
}

/// Reference reasoning for a known query shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtExample {
    pub reasoning: String,
    #[serde(default, alias = "keyInsights")]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub approach: String,
}

/// Reference plan for a known query shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExample {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub rationale: String,
}

/// A seed file of examples, one list per kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExampleSeed {
    #[serde(default)]
    pub complexity: Vec<NewExample<ComplexityExample>>,
    #[serde(default)]
    pub thought: Vec<NewExample<ThoughtExample>>,
    #[serde(default)]
    pub plan: Vec<NewExample<PlanExample>>,
}

impl ExampleSeed {
    /// Total number of examples across kinds.
    pub fn len(&self) -> usize {
        self.complexity.len() + self.thought.len() + self.plan.len()
    }

    /// True when no kind has any example.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_parses_partial_file() {
        let seed: ExampleSeed = serde_json::from_str(
            r#"{"complexity":[{"query":"Show me all facilities",
                "payload":{"complexityScore":0.1,"reasoningPasses":1,"confidence":0.9}}]}"#,
        )
        .unwrap();
        assert_eq!(seed.len(), 1);
        assert_eq!(seed.complexity[0].payload.reasoning_passes, 1);
        assert!(seed.plan.is_empty());
    }

    #[test]
    fn kind_names() {
        assert_eq!(ExampleKind::Complexity.as_str(), "complexity");
        assert_eq!(
            serde_json::to_string(&ExampleKind::Plan).unwrap(),
            "\"plan\""
        );
    }
}
