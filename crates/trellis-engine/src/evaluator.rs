use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::ConditionEvaluator;

/// Minimal condition language over the navigation input:
/// `input == 'yes'`, `input != 'no'`, `input contains 'card'`.
///
/// Comparisons are case-insensitive and trim surrounding whitespace. An empty
/// expression always matches. Anything richer needs a host-supplied evaluator.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEvaluator;

impl DefaultEvaluator {
    pub fn new() -> Self {
        Self
    }
}

fn expression_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*input\s*(==|!=|\bcontains\b)\s*(.*?)\s*$").expect("valid condition regex")
    })
}

fn input_text(input: &Value) -> String {
    match input {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn unquote(raw: &str) -> &str {
    let raw = raw.trim();
    for q in ['\'', '"'] {
        if let Some(inner) = raw.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner;
        }
    }
    raw
}

impl ConditionEvaluator for DefaultEvaluator {
    fn evaluate(&self, expression: &str, input: &Value) -> Result<bool> {
        if expression.trim().is_empty() {
            return Ok(true);
        }

        let caps = expression_re().captures(expression).ok_or_else(|| {
            TrellisError::InvalidInput(format!("unsupported condition: {}", expression))
        })?;
        let expected = unquote(&caps[2]).to_lowercase();
        let actual = input_text(input).trim().to_lowercase();

        Ok(match &caps[1] {
            "==" => actual == expected,
            "!=" => actual != expected,
            _ => actual.contains(&expected),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equality_is_case_insensitive() {
        let eval = DefaultEvaluator;
        assert!(eval.evaluate("input == 'yes'", &json!(" YES ")).unwrap());
        assert!(eval.evaluate("input == \"no\"", &json!("no")).unwrap());
        assert!(!eval.evaluate("input == 'yes'", &json!("no")).unwrap());
    }

    #[test]
    fn test_non_string_inputs_are_stringified() {
        let eval = DefaultEvaluator;
        assert!(eval.evaluate("input == '42'", &json!(42)).unwrap());
        assert!(eval.evaluate("input == true", &json!(true)).unwrap());
    }

    #[test]
    fn test_inequality_and_contains() {
        let eval = DefaultEvaluator;
        assert!(eval.evaluate("input != 'cancel'", &json!("go")).unwrap());
        assert!(eval.evaluate("input contains 'card'", &json!("Credit Card")).unwrap());
        assert!(!eval.evaluate("input contains 'cash'", &json!("Credit Card")).unwrap());
    }

    #[test]
    fn test_empty_condition_matches() {
        assert!(DefaultEvaluator.evaluate("  ", &json!("anything")).unwrap());
    }

    #[test]
    fn test_unknown_syntax_is_an_error() {
        assert!(DefaultEvaluator.evaluate("len(input) > 3", &json!("abcd")).is_err());
    }
}
