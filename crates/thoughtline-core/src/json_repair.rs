//! Lenient recovery of JSON from language-model output.
//!
//! Models wrap JSON in markdown fences, surround it with prose, leave
//! trailing commas, and get cut off mid-object by token limits. The repair
//! steps here undo each of those before handing the text to serde_json.
//! Nothing is invented: a response with no JSON block yields `None`.
//!
//! The second half of the module reads individual fields leniently (numbers
//! as strings, single strings where a list was expected) so stages can clamp
//! or default instead of failing.

use serde_json::{Map, Value};

/// Tracks whether the scanner is inside a string literal.
#[derive(Default)]
struct Scanner {
    in_string: bool,
    escaped: bool,
}

impl Scanner {
    /// Advance over `c`; returns `true` when `c` is outside any string
    /// literal and is not the opening quote of one.
    fn structural(&mut self, c: char) -> bool {
        if self.escaped {
            self.escaped = false;
            return false;
        }
        if self.in_string {
            match c {
                '\\' => self.escaped = true,
                '"' => self.in_string = false,
                _ => {}
            }
            return false;
        }
        if c == '"' {
            self.in_string = true;
            return false;
        }
        true
    }
}

/// Parse JSON out of free-form model output.
pub fn parse_llm_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }
    let unfenced = strip_fences(text);
    let block = extract_block(unfenced)?;
    let repaired = close_truncated(&drop_trailing_commas(block));
    serde_json::from_str(&repaired).ok()
}

/// Like [`parse_llm_json`] but only accepts a top-level object.
pub fn parse_llm_object(text: &str) -> Option<Map<String, Value>> {
    match parse_llm_json(text)? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let body = &trimmed[open + 3..];
    // Skip the language tag line.
    let body = match body.find('\n') {
        Some(nl) if body[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            &body[nl + 1..]
        }
        _ => body,
    };
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Slice from the first `{` or `[` to its matching closer, or to the end of
/// the text when the block was truncated.
fn extract_block(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut scanner = Scanner::default();
    let mut depth = 0usize;
    for (offset, c) in text[start..].char_indices() {
        if !scanner.structural(c) {
            continue;
        }
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

fn drop_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut scanner = Scanner::default();
    for (i, &c) in chars.iter().enumerate() {
        if scanner.structural(c) && c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn close_truncated(text: &str) -> String {
    let mut scanner = Scanner::default();
    let mut closers = Vec::new();
    for c in text.chars() {
        if !scanner.structural(c) {
            continue;
        }
        match c {
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' if closers.last() == Some(&c) => {
                closers.pop();
            }
            _ => {}
        }
    }
    if closers.is_empty() && !scanner.in_string {
        return text.to_string();
    }

    let mut out = text.to_string();
    if scanner.in_string {
        out.push('"');
    }
    let tail_len = out.trim_end().len();
    out.truncate(tail_len);
    if out.ends_with(',') {
        out.pop();
    } else if out.ends_with(':') {
        out.push_str("null");
    }
    out.extend(closers.into_iter().rev());
    out
}

// ── Lenient field access ────────────────────────────────────────────────

/// First present key among `keys` (e.g. snake_case and camelCase spellings).
pub fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

/// A number, or a string that parses as one.
pub fn field_f64(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    match field(obj, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

/// A string, or any scalar rendered as one.
pub fn field_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match field(obj, keys)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A list of strings; a lone string becomes a one-element list and anything
/// else becomes empty. Non-string elements are dropped.
pub fn field_str_list(obj: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    match field(obj, keys) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                Value::Object(o) => field_str(o, &["description", "text", "title"]),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}
