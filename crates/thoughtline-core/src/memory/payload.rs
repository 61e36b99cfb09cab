//! Flat metadata encoding for example payloads.
//!
//! Vector index metadata is a string map, so list-valued fields are stored
//! as JSON text. Decoding never fails: a field that does not parse falls
//! back to its empty value and the rest of the payload is kept.

use serde::de::DeserializeOwned;
use thoughtline_types::context::{clamp_reasoning_passes, clamp_unit};
use thoughtline_types::example::{ComplexityExample, ExampleKind, PlanExample, ThoughtExample};
use thoughtline_types::output::Step;
use tracing::warn;

use crate::vector_index::Metadata;

/// A payload that can live in vector index metadata.
pub trait ExamplePayload: Clone + Send + Sync + 'static {
    /// Which memory this payload belongs to.
    const KIND: ExampleKind;

    /// Encode into flat string fields.
    fn to_fields(&self) -> Metadata;

    /// Decode from flat string fields, defaulting anything malformed.
    fn from_fields(fields: &Metadata) -> Self;
}

fn text(fields: &Metadata, key: &str) -> String {
    fields.get(key).cloned().unwrap_or_default()
}

fn number(fields: &Metadata, key: &str) -> f64 {
    fields
        .get(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Decode a JSON array field element by element; unparsable elements and
/// non-array values are dropped.
fn json_list<T: DeserializeOwned>(fields: &Metadata, key: &str) -> Vec<T> {
    let Some(raw) = fields.get(key) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        Ok(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        Err(e) => {
            warn!(field = key, error = %e, "malformed list field in example metadata");
            Vec::new()
        }
    }
}

fn encode_list<T: serde::Serialize>(items: &[T]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".into())
}

impl ExamplePayload for ComplexityExample {
    const KIND: ExampleKind = ExampleKind::Complexity;

    fn to_fields(&self) -> Metadata {
        let mut fields = Metadata::from([
            ("complexity_score".into(), self.complexity_score.to_string()),
            ("reasoning_passes".into(), self.reasoning_passes.to_string()),
            ("confidence".into(), self.confidence.to_string()),
        ]);
        if let Some(ref category) = self.category {
            fields.insert("category".into(), category.clone());
        }
        fields
    }

    fn from_fields(fields: &Metadata) -> Self {
        Self {
            complexity_score: clamp_unit(number(fields, "complexity_score")),
            reasoning_passes: clamp_reasoning_passes(number(fields, "reasoning_passes")),
            confidence: clamp_unit(number(fields, "confidence")),
            category: fields.get("category").cloned(),
        }
    }
}

impl ExamplePayload for ThoughtExample {
    const KIND: ExampleKind = ExampleKind::Thought;

    fn to_fields(&self) -> Metadata {
        Metadata::from([
            ("reasoning".into(), self.reasoning.clone()),
            ("key_insights".into(), encode_list(&self.key_insights)),
            ("approach".into(), self.approach.clone()),
        ])
    }

    fn from_fields(fields: &Metadata) -> Self {
        Self {
            reasoning: text(fields, "reasoning"),
            key_insights: json_list(fields, "key_insights"),
            approach: text(fields, "approach"),
        }
    }
}

impl ExamplePayload for PlanExample {
    const KIND: ExampleKind = ExampleKind::Plan;

    fn to_fields(&self) -> Metadata {
        Metadata::from([
            ("steps".into(), encode_list(&self.steps)),
            ("rationale".into(), self.rationale.clone()),
        ])
    }

    fn from_fields(fields: &Metadata) -> Self {
        Self {
            steps: json_list::<Step>(fields, "steps"),
            rationale: text(fields, "rationale"),
        }
    }
}
