//! Typed assertions over session context values.
//!
//! Nodes declare a `context_schema` mapping keys to type names. Built-in names
//! are `string`, `int`, `float`, `bool` and `[T]` for a list of `T`; any other
//! name must be registered in a [`SchemaRegistry`] as a custom validator.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::SchemaViolation;

pub type ValidatorFn = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Clone)]
pub enum SchemaType {
    String,
    Int,
    Float,
    Bool,
    List(Box<SchemaType>),
    Custom { name: String, validate: ValidatorFn },
}

impl fmt::Debug for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl SchemaType {
    pub fn name(&self) -> String {
        match self {
            SchemaType::String => "string".into(),
            SchemaType::Int => "int".into(),
            SchemaType::Float => "float".into(),
            SchemaType::Bool => "bool".into(),
            SchemaType::List(inner) => format!("[{}]", inner.name()),
            SchemaType::Custom { name, .. } => name.clone(),
        }
    }

    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        match self {
            SchemaType::String => match value {
                Value::String(_) => Ok(()),
                other => Err(format!("expected string, got {}", kind_of(other))),
            },
            SchemaType::Int => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                Value::Number(n) => match n.as_f64() {
                    // JSON round-trips may turn integers into whole floats.
                    Some(f) if f.fract() == 0.0 => Ok(()),
                    _ => Err("expected int, got float (not a whole number)".into()),
                },
                other => Err(format!("expected int, got {}", kind_of(other))),
            },
            SchemaType::Float => match value {
                Value::Number(_) => Ok(()),
                other => Err(format!("expected float, got {}", kind_of(other))),
            },
            SchemaType::Bool => match value {
                Value::Bool(_) => Ok(()),
                other => Err(format!("expected bool, got {}", kind_of(other))),
            },
            SchemaType::List(inner) => match value {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        inner
                            .validate(item)
                            .map_err(|e| format!("element {}: {}", i, e))?;
                    }
                    Ok(())
                }
                other => Err(format!("expected list, got {}", kind_of(other))),
            },
            SchemaType::Custom { validate, .. } => validate(value),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Named custom validators, resolvable from schema type strings.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    custom: HashMap<String, ValidatorFn>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom type; it shadows nothing, built-in names always win.
    pub fn register<F>(&mut self, name: impl Into<String>, validate: F)
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), Arc::new(validate));
    }

    /// Resolve a type string such as `int` or `[string]`.
    pub fn resolve(&self, type_name: &str) -> std::result::Result<SchemaType, String> {
        let type_name = type_name.trim();
        if let Some(inner) = type_name
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            return Ok(SchemaType::List(Box::new(self.resolve(inner)?)));
        }
        match type_name {
            "string" => Ok(SchemaType::String),
            "int" => Ok(SchemaType::Int),
            "float" => Ok(SchemaType::Float),
            "bool" => Ok(SchemaType::Bool),
            other => self
                .custom
                .get(other)
                .map(|validate| SchemaType::Custom {
                    name: other.to_string(),
                    validate: validate.clone(),
                })
                .ok_or_else(|| format!("unsupported type: {}", other)),
        }
    }

    /// Check every schema entry, collecting all violations in key order.
    pub fn check<'a, L>(&self, schema: &BTreeMap<String, String>, lookup: L) -> Vec<SchemaViolation>
    where
        L: Fn(&str) -> Option<&'a Value>,
    {
        let mut violations = Vec::new();
        for (key, type_name) in schema {
            let reason = match (self.resolve(type_name), lookup(key)) {
                (Err(e), _) => Some(e),
                (Ok(_), None) => Some("required".to_string()),
                (Ok(ty), Some(value)) => ty.validate(value).err(),
            };
            if let Some(reason) = reason {
                violations.push(SchemaViolation {
                    key: key.clone(),
                    reason,
                });
            }
        }
        violations
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.custom.keys().collect();
        names.sort();
        f.debug_struct("SchemaRegistry").field("custom", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_types() {
        let reg = SchemaRegistry::new();
        assert!(reg.resolve("string").unwrap().validate(&json!("x")).is_ok());
        assert!(reg.resolve("int").unwrap().validate(&json!(3)).is_ok());
        assert!(reg.resolve("int").unwrap().validate(&json!(3.0)).is_ok());
        assert!(reg.resolve("int").unwrap().validate(&json!(3.5)).is_err());
        assert!(reg.resolve("float").unwrap().validate(&json!(7)).is_ok());
        assert!(reg.resolve("bool").unwrap().validate(&json!("true")).is_err());
    }

    #[test]
    fn test_list_type_reports_element() {
        let reg = SchemaRegistry::new();
        let ty = reg.resolve("[int]").unwrap();
        assert_eq!(ty.name(), "[int]");
        assert!(ty.validate(&json!([1, 2, 3])).is_ok());
        let err = ty.validate(&json!([1, "two"])).unwrap_err();
        assert_eq!(err, "element 1: expected int, got string");
    }

    #[test]
    fn test_custom_type() {
        let mut reg = SchemaRegistry::new();
        reg.register("email", |v| match v.as_str() {
            Some(s) if s.contains('@') => Ok(()),
            _ => Err("expected email address".to_string()),
        });
        let ty = reg.resolve("email").unwrap();
        assert!(ty.validate(&json!("a@b.c")).is_ok());
        assert!(ty.validate(&json!("nope")).is_err());
        assert!(reg.resolve("[email]").is_ok());
        assert!(reg.resolve("uuid").is_err());
    }

    #[test]
    fn test_check_collects_all_violations() {
        let reg = SchemaRegistry::new();
        let mut schema = BTreeMap::new();
        schema.insert("age".to_string(), "int".to_string());
        schema.insert("name".to_string(), "string".to_string());
        schema.insert("weird".to_string(), "complex".to_string());

        let data: HashMap<String, Value> = [("age".to_string(), json!("old"))].into_iter().collect();
        let violations = reg.check(&schema, |k| data.get(k));

        assert_eq!(violations.len(), 3);
        assert_eq!(violations[0].key, "age");
        assert_eq!(violations[1].reason, "required");
        assert_eq!(violations[2].reason, "unsupported type: complex");
    }
}
