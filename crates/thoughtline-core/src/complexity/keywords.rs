//! Keyword heuristic for reasoning depth.
//!
//! Each lexicon term carries a weight. A query's raw score is the sum of
//! the weights of the distinct terms it contains; two ascending thresholds
//! split the raw score into 1, 2, or 3 reasoning passes. Matching is on
//! whole words (multi-word terms match as phrases) after lowercasing and
//! replacing punctuation with spaces.

/// Weighted lexicon: `(term, weight)`.
const LEXICON: &[(&str, f32)] = &[
    // Comparison
    ("compare", 2.0),
    ("comparison", 2.0),
    ("versus", 2.0),
    ("vs", 2.0),
    ("difference between", 2.0),
    ("relative to", 1.5),
    // Analysis
    ("analyze", 1.5),
    ("analyse", 1.5),
    ("analysis", 1.5),
    ("assess", 1.5),
    ("evaluate", 1.5),
    ("why", 1.5),
    ("trend", 1.5),
    ("trends", 1.5),
    ("forecast", 1.5),
    ("predict", 1.5),
    ("risk", 1.0),
    ("correlation", 1.5),
    ("optimize", 1.5),
    ("recommend", 1.5),
    // Multi-step
    ("then", 1.5),
    ("after that", 1.5),
    ("followed by", 1.5),
    ("first", 1.0),
    ("finally", 1.0),
    ("step by step", 1.5),
    // Filters
    ("where", 1.0),
    ("filter", 1.0),
    ("only", 1.0),
    ("excluding", 1.0),
    ("between", 1.0),
    ("greater than", 1.0),
    ("less than", 1.0),
    ("more than", 1.0),
    ("at least", 1.0),
    // Conditions
    ("if", 1.5),
    ("unless", 1.5),
    ("otherwise", 1.5),
    ("depending on", 1.5),
    // Aggregation
    ("total", 1.0),
    ("average", 1.0),
    ("sum", 1.0),
    ("group by", 1.0),
    ("per", 1.0),
];

/// Raw score that maps to a complexity of 1.0.
const SATURATION: f32 = 6.0;

/// Result of scoring one query.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordScore {
    /// Sum of matched term weights.
    pub raw: f32,
    /// `raw / SATURATION`, capped at 1.0.
    pub complexity: f32,
    /// 1, 2, or 3.
    pub reasoning_passes: u8,
    /// Matched terms in lexicon order.
    pub matched: Vec<String>,
    /// Heuristic confidence: higher when more terms agree.
    pub confidence: f32,
}

/// Scores queries against the fixed lexicon.
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    thresholds: [f32; 2],
}

impl KeywordScorer {
    /// `thresholds[0]` is the raw score needed for 2 passes,
    /// `thresholds[1]` for 3.
    pub fn new(thresholds: [f32; 2]) -> Self {
        Self { thresholds }
    }

    pub fn score(&self, query: &str) -> KeywordScore {
        let normalized: String = query
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        let padded = format!(" {} ", normalized.split_whitespace().collect::<Vec<_>>().join(" "));

        let mut raw = 0.0;
        let mut matched = Vec::new();
        for (term, weight) in LEXICON {
            if padded.contains(&format!(" {term} ")) {
                raw += weight;
                matched.push((*term).to_string());
            }
        }

        let reasoning_passes = if raw >= self.thresholds[1] {
            3
        } else if raw >= self.thresholds[0] {
            2
        } else {
            1
        };
        let confidence = if matched.is_empty() {
            0.6
        } else {
            (0.5 + 0.1 * matched.len() as f32).min(0.8)
        };

        KeywordScore {
            raw,
            complexity: (raw / SATURATION).min(1.0),
            reasoning_passes,
            matched,
            confidence,
        }
    }
}

impl Default for KeywordScorer {
    fn default() -> Self {
        Self::new([2.0, 4.0])
    }
}
