//! JSON response repair
//!
//! Models in JSON mode still wrap output in code fences, prepend prose, leave
//! trailing commas, double-escape whitespace, or truncate closing brackets.
//! This pass normalizes those defects with a string-aware scanner, attempting
//! a parse after each stage. The pipeline is deterministic and idempotent:
//! repairing already-valid JSON returns it unchanged.

use serde_json::Value;

/// Attempt to parse a model response as JSON, repairing known defects.
pub fn repair_to_value(raw: &str) -> Option<Value> {
    // Stage 0: already valid
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return Some(value);
    }

    // Stage 1: strip markdown code fences
    let stripped = strip_code_fences(raw);
    if let Ok(value) = serde_json::from_str::<Value>(&stripped) {
        return Some(value);
    }

    // Stage 2: trim non-JSON prefix/suffix around the outermost braces
    let sliced = slice_to_json(&stripped)?;
    if let Ok(value) = serde_json::from_str::<Value>(&sliced) {
        return Some(value);
    }

    // Stage 3: drop trailing commas before closers
    let decommaed = remove_trailing_commas(&sliced);
    if let Ok(value) = serde_json::from_str::<Value>(&decommaed) {
        return Some(value);
    }

    // Stage 4: collapse doubly-escaped whitespace
    let unescaped = unescape_double_escapes(&decommaed);
    if let Ok(value) = serde_json::from_str::<Value>(&unescaped) {
        return Some(value);
    }

    // Stage 5: balance unclosed braces/brackets
    let balanced = balance_brackets(&unescaped);
    serde_json::from_str::<Value>(&balanced).ok()
}

/// Take the contents of the first fenced block, dropping a language tag.
fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after_fence = &trimmed[start + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.rfind("```") {
        Some(end) => body[..end].trim().to_string(),
        None => body.trim().to_string(),
    }
}

/// Slice from the first `{`/`[` to the last `}`/`]`.
fn slice_to_json(input: &str) -> Option<String> {
    let start = input.find(['{', '['])?;
    let end = input.rfind(['}', ']']).map(|i| i + 1).unwrap_or(input.len());
    if end <= start {
        return Some(input[start..].to_string());
    }
    Some(input[start..end].to_string())
}

/// Remove `,` directly preceding `}` or `]`, outside string literals.
fn remove_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for ch in input.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '}' | ']' => {
                // Pop whitespace then a dangling comma
                let trailing_ws: String = out
                    .chars()
                    .rev()
                    .take_while(|c| c.is_whitespace())
                    .collect();
                let kept = out.len() - trailing_ws.len();
                if out[..kept].ends_with(',') {
                    out.truncate(kept - 1);
                    out.extend(trailing_ws.chars().rev());
                }
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Collapse `\\n`, `\\t`, `\\r` inside string literals into single escapes.
fn unescape_double_escapes(input: &str) -> String {
    input
        .replace("\\\\n", "\\n")
        .replace("\\\\t", "\\t")
        .replace("\\\\r", "\\r")
}

/// Append missing closers for unbalanced `{`/`[`, outside string literals.
fn balance_brackets(input: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = input.to_string();
    // An unterminated string must close before its containers
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_json_passes_through() {
        let value = repair_to_value(r#"{"a": 1, "b": [2, 3]}"#).unwrap();
        assert_eq!(value, json!({"a": 1, "b": [2, 3]}));
    }

    #[test]
    fn test_strips_code_fences() {
        let raw = "```json\n{\"name\": \"Ada\"}\n```";
        assert_eq!(repair_to_value(raw).unwrap(), json!({"name": "Ada"}));

        let no_lang = "```\n{\"name\": \"Ada\"}\n```";
        assert_eq!(repair_to_value(no_lang).unwrap(), json!({"name": "Ada"}));
    }

    #[test]
    fn test_trims_leading_prose() {
        let raw = "Here is the parsed CV:\n{\"name\": \"Ada\"}\nHope that helps!";
        assert_eq!(repair_to_value(raw).unwrap(), json!({"name": "Ada"}));
    }

    #[test]
    fn test_removes_trailing_commas() {
        let raw = r#"{"skills": ["rust", "go",], "years": 5,}"#;
        assert_eq!(
            repair_to_value(raw).unwrap(),
            json!({"skills": ["rust", "go"], "years": 5})
        );
    }

    #[test]
    fn test_trailing_comma_inside_string_untouched() {
        let raw = r#"{"note": "a, b,", "n": 1}"#;
        assert_eq!(
            repair_to_value(raw).unwrap(),
            json!({"note": "a, b,", "n": 1})
        );
    }

    #[test]
    fn test_unescapes_double_escaped_newlines() {
        let raw = r#"{"summary": "line one\\nline two"}"#;
        assert_eq!(
            repair_to_value(raw).unwrap(),
            json!({"summary": "line one\nline two"})
        );
    }

    #[test]
    fn test_balances_truncated_output() {
        let raw = r#"{"personal": {"name": "Ada", "skills": ["rust""#;
        let value = repair_to_value(raw).unwrap();
        assert_eq!(value["personal"]["name"], "Ada");
        assert_eq!(value["personal"]["skills"][0], "rust");
    }

    #[test]
    fn test_unrepairable_returns_none() {
        assert!(repair_to_value("I could not produce any JSON, sorry.").is_none());
        assert!(repair_to_value("").is_none());
    }

    #[test]
    fn test_repair_is_idempotent() {
        let raw = "```json\n{\"a\": [1, 2,],}\n```";
        let once = repair_to_value(raw).unwrap();
        let again = repair_to_value(&once.to_string()).unwrap();
        assert_eq!(once, again);
    }
}
