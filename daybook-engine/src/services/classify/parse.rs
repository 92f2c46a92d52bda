//! Tolerant parsing of model classification output
//!
//! Models wrap JSON in prose or code fences. Candidates are tried in order:
//! the trimmed text, each fenced block, then every balanced `{...}` span found
//! by a string-aware scan. The first candidate that parses as a JSON object is
//! validated; later candidates are not consulted.

use crate::error::{EngineError, EngineResult};
use crate::models::Category;
use serde_json::Value;

/// Validated classification
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLabel {
    pub category: Category,
    pub confidence: f64,
    /// The model used a near-miss label that was mapped onto the closed set
    pub aliased: bool,
}

pub fn parse_classification(raw: &str) -> EngineResult<ParsedLabel> {
    let object = candidates(raw)
        .into_iter()
        .find_map(|candidate| match serde_json::from_str::<Value>(&candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
        .ok_or_else(|| EngineError::bad_output("no JSON object found in model output", raw))?;

    let category_raw = object
        .get("category")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::bad_output("missing string field 'category'", raw))?;
    let (category, aliased) = Category::resolve(category_raw).ok_or_else(|| {
        EngineError::bad_output(
            format!("category '{}' is not in the allowed set", category_raw),
            raw,
        )
    })?;

    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| EngineError::bad_output("missing numeric field 'confidence'", raw))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(EngineError::bad_output(
            format!("confidence {} is outside [0, 1]", confidence),
            raw,
        ));
    }

    Ok(ParsedLabel {
        category,
        confidence,
        aliased,
    })
}

/// Ordered, de-duplicated JSON candidates
fn candidates(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if !candidate.is_empty() && !out.iter().any(|c| c == candidate) {
            out.push(candidate.to_string());
        }
    };

    push(raw);
    for block in fenced_blocks(raw) {
        push(block);
    }
    for span in brace_spans(raw) {
        push(span);
    }
    out
}

/// Bodies of ``` fenced blocks; the info string after the opening fence is skipped
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_open[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(&body[..close]);
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Every top-level balanced `{...}` span, skipping braces inside strings
fn brace_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        spans.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    spans
}
