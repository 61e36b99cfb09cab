//! Prompt assembly for the model-backed stages.
//!
//! Every prompt opens with a `### stage: <name>` header naming the stage
//! that issued it, followed by plain sections and a JSON response schema.
//! Few-shot examples are rendered inline when example memory returned any.

use std::fmt::Write as _;

use thoughtline_types::context::StageName;
use thoughtline_types::example::{PlanExample, SimilarExample, ThoughtExample};
use thoughtline_types::output::{Critique, Execution, Plan, Thought};

/// The header line every prompt for `stage` starts with.
pub fn header(stage: StageName) -> String {
    format!("### stage: {stage}")
}

fn section(out: &mut String, title: &str, body: &str) {
    let _ = write!(out, "\n\n## {title}\n{body}");
}

fn bullets(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".into();
    }
    items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_plan(plan: &Plan) -> String {
    plan.steps
        .iter()
        .map(|s| match s.action {
            Some(ref action) => format!(
                "{}. {} [action: {action}] {}",
                s.order,
                s.description,
                serde_json::Value::Object(s.parameters.clone())
            ),
            None => format!("{}. {}", s.order, s.description),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn complexity(query: &str) -> String {
    let mut p = header(StageName::ComplexityDetector);
    p.push_str("\nClassify how much reasoning the query needs.");
    section(&mut p, "Query", query);
    section(
        &mut p,
        "Respond with JSON",
        r#"{"complexity_score": 0.0-1.0, "reasoning_passes": 1|2|3, "confidence": 0.0-1.0, "explanation": "..."}"#,
    );
    p
}

pub fn thought(
    query: &str,
    pass: u8,
    total: u8,
    previous: Option<&str>,
    examples: &[SimilarExample<ThoughtExample>],
) -> String {
    let mut p = header(StageName::ThoughtAgent);
    let _ = write!(p, "\nReasoning pass {pass} of {total}.");
    section(&mut p, "Query", query);
    if !examples.is_empty() {
        let rendered = examples
            .iter()
            .map(|e| {
                format!(
                    "Query: {}\nReasoning: {}\nApproach: {}",
                    e.example.query, e.example.payload.reasoning, e.example.payload.approach
                )
            })
            .collect::<Vec<_>>()
            .join("\n---\n");
        section(&mut p, "Similar solved queries", &rendered);
    }
    if let Some(prev) = previous {
        section(&mut p, "Refine the previous pass", prev);
    }
    section(
        &mut p,
        "Respond with JSON",
        r#"{"reasoning": "...", "key_insights": ["..."], "approach": "...", "challenges": ["..."], "confidence": 0.0-1.0}"#,
    );
    p
}

pub fn plan(
    query: &str,
    thought: &Thought,
    tools: &[String],
    critique: Option<&Critique>,
    examples: &[SimilarExample<PlanExample>],
) -> String {
    let mut p = header(StageName::PlannerAgent);
    p.push_str("\nTurn the reasoning into ordered steps. Use only the listed tools as actions.");
    section(&mut p, "Query", query);
    section(&mut p, "Reasoning", &thought.reasoning);
    section(&mut p, "Key insights", &bullets(&thought.key_insights));
    section(&mut p, "Available tools", &bullets(tools));
    if !examples.is_empty() {
        let rendered = examples
            .iter()
            .map(|e| {
                let steps = e
                    .example
                    .payload
                    .steps
                    .iter()
                    .map(|s| {
                        format!(
                            "{}. {} ({})",
                            s.order,
                            s.description,
                            s.action.as_deref().unwrap_or("reasoning")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("Query: {}\n{steps}", e.example.query)
            })
            .collect::<Vec<_>>()
            .join("\n---\n");
        section(&mut p, "Plans for similar queries", &rendered);
    }
    if let Some(c) = critique {
        let issues: Vec<String> = c
            .issues
            .iter()
            .map(|i| {
                format!(
                    "[{:?}/{:?}] {}{}",
                    i.category,
                    i.severity,
                    i.description,
                    i.suggestion
                        .as_deref()
                        .map(|s| format!(" (suggestion: {s})"))
                        .unwrap_or_default()
                )
            })
            .collect();
        section(
            &mut p,
            &format!(
                "The previous plan was rejected (score {:.2}); address these issues",
                c.overall_score
            ),
            &bullets(&issues),
        );
    }
    section(
        &mut p,
        "Respond with JSON",
        r#"{"steps": [{"order": 1, "description": "...", "action": "tool_name or null", "parameters": {}}], "rationale": "..."}"#,
    );
    p
}

pub fn critique(query: &str, plan: &Plan, tools: &[String]) -> String {
    let mut p = header(StageName::CriticAgent);
    p.push_str("\nReview the plan for feasibility, completeness, and correctness.");
    section(&mut p, "Query", query);
    section(&mut p, "Plan", &render_plan(plan));
    section(&mut p, "Registered tools", &bullets(tools));
    section(
        &mut p,
        "Respond with JSON",
        r#"{"overall_score": 0.0-1.0, "recommendation": "approve|revise|reject", "issues": [{"category": "feasibility|completeness|correctness|efficiency|clarity", "severity": "low|medium|high|critical", "description": "...", "suggestion": "..."}], "follow_up_questions": ["..."]}"#,
    );
    p
}

pub fn summary(query: &str, thought: &Thought, execution: &Execution) -> String {
    let mut p = header(StageName::SummaryAgent);
    p.push_str("\nSummarize the answer for the user.");
    section(&mut p, "Query", query);
    section(&mut p, "Reasoning", &thought.reasoning);
    let results = execution
        .results
        .iter()
        .map(|r| {
            let detail = match (&r.output, &r.error) {
                (Some(out), _) => out.to_string(),
                (None, Some(err)) => format!("error: {err}"),
                (None, None) => String::new(),
            };
            format!(
                "{}. {} {:?} {detail}",
                r.order,
                r.action.as_deref().unwrap_or("reasoning"),
                r.status
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    section(&mut p, "Execution results", &results);
    section(
        &mut p,
        "Respond with JSON",
        r#"{"summary": "...", "key_findings": ["..."], "confidence": 0.0-1.0}"#,
    );
    p
}
