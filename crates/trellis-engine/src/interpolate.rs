use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use trellis_core::error::Result;
use trellis_core::traits::Interpolator;

/// `{{ key }}` substitution over the template data.
///
/// Accepts `{{ key }}`, `{{ .key }}` and dotted paths such as `{{ sys.ans }}`.
/// Placeholders that do not resolve are left as written.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateInterpolator;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*\.?([A-Za-z_][\w-]*(?:\.[\w-]+)*)\s*\}\}").expect("valid placeholder regex")
    })
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl Interpolator for TemplateInterpolator {
    fn interpolate(&self, template: &str, data: &Value) -> Result<String> {
        if !template.contains("{{") {
            return Ok(template.to_string());
        }
        let out = placeholder_re().replace_all(template, |caps: &Captures| {
            match lookup(data, &caps[1]) {
                Some(value) => display(value),
                None => caps[0].to_string(),
            }
        });
        Ok(out.into_owned())
    }
}
