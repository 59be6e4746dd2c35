use serde_json::{Map, Value};

use crate::logic::ExecutionContext;

/// A step argument after classification.
///
/// Arguments are the only expressions steps understand: a literal, a dereference of the
/// request input, or a lookup in the variable store. Each form may carry a dotted path.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    /// `request`, `input`, `request.a.b`, `input.a.b`
    Input(Vec<String>),
    /// `name`, `$name`, `name.a.b`
    Variable { name: String, path: Vec<String> },
}

impl Operand {
    /// Classify a positional step argument
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(literal) = parse_literal(raw) {
            return Operand::Literal(literal);
        }
        if let Some(reference) = parse_reference(raw) {
            return reference;
        }

        let mut segments = split_path(raw);
        let name = segments.remove(0);
        Operand::Variable {
            name,
            path: segments,
        }
    }

    /// Classify the right-hand side of a `field = value` condition, where bare words are literals
    pub fn parse_condition_value(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(reference) = parse_reference(raw) {
            return reference;
        }
        match parse_literal(raw) {
            Some(literal) => Operand::Literal(literal),
            None => Operand::Literal(Value::String(raw.to_string())),
        }
    }

    pub fn resolve(&self, ctx: &ExecutionContext) -> Option<Value> {
        match self {
            Operand::Literal(value) => Some(value.clone()),
            Operand::Input(path) => navigate(ctx.input(), path),
            Operand::Variable { name, path } => ctx.get(name).and_then(|v| navigate(v, path)),
        }
    }

    pub fn is_reference(&self) -> bool {
        !matches!(self, Operand::Literal(_))
    }
}

/// Resolve a name-like argument (resource, event, cache key).
///
/// Names are taken verbatim unless written as `$var` or `request.field`; `{ref}`
/// placeholders inside a name are interpolated.
pub fn resolve_name(raw: &str, ctx: &ExecutionContext) -> Option<String> {
    let raw = raw.trim();
    match parse_reference(raw) {
        Some(reference) => reference.resolve(ctx).map(|v| value_to_key(&v)),
        None if raw.contains('{') => Some(interpolate(raw, ctx)),
        None => Some(raw.to_string()),
    }
}

/// Replace `{ref}` placeholders with resolved operands; unresolved placeholders become empty
pub fn interpolate(template: &str, ctx: &ExecutionContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let inner = &rest[start + 1..start + len];
        if let Some(value) = Operand::parse(inner).resolve(ctx) {
            out.push_str(&value_to_key(&value));
        }
        rest = &rest[start + len + 1..];
    }

    out.push_str(rest);
    out
}

/// Render a JSON value as an identifier or key string
pub fn value_to_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parsed `field = value [and field = value ...]` filter
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub clauses: Vec<(String, Operand)>,
}

impl Condition {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut clauses = Vec::new();

        for clause in split_clauses(raw) {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }
            let (field, value) = clause
                .split_once("==")
                .or_else(|| clause.split_once('='))
                .ok_or_else(|| format!("expected `field = value`, got `{}`", clause))?;

            let field = field.trim();
            if field.is_empty() {
                return Err(format!("missing field name in `{}`", clause));
            }
            clauses.push((field.to_string(), Operand::parse_condition_value(value)));
        }

        Ok(Self { clauses })
    }

    /// Evaluate every clause into a key/value filter; unresolved references become `null`
    pub fn to_filter(&self, ctx: &ExecutionContext) -> Map<String, Value> {
        self.clauses
            .iter()
            .map(|(field, operand)| (field.clone(), operand.resolve(ctx).unwrap_or(Value::Null)))
            .collect()
    }
}

fn split_clauses(raw: &str) -> Vec<&str> {
    let mut clauses = vec![raw];
    for separator in [" and ", " AND ", "&&", ","] {
        clauses = clauses
            .into_iter()
            .flat_map(|c| c.split(separator))
            .collect();
    }
    clauses
}

fn parse_literal(raw: &str) -> Option<Value> {
    if raw.len() >= 2 {
        let quoted = (raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\''));
        if quoted {
            return Some(Value::String(raw[1..raw.len() - 1].to_string()));
        }
    }

    match raw {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }

    let first = raw.chars().next()?;
    if first.is_ascii_digit() || first == '-' {
        if let Ok(value @ Value::Number(_)) = serde_json::from_str::<Value>(raw) {
            return Some(value);
        }
    }
    if first == '{' || first == '[' {
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            return Some(value);
        }
    }
    None
}

fn parse_reference(raw: &str) -> Option<Operand> {
    if raw == "request" || raw == "input" {
        return Some(Operand::Input(Vec::new()));
    }
    if let Some(path) = raw
        .strip_prefix("request.")
        .or_else(|| raw.strip_prefix("input."))
    {
        return Some(Operand::Input(split_path(path)));
    }
    if let Some(name) = raw.strip_prefix('$') {
        if name.is_empty() {
            return None;
        }
        let mut segments = split_path(name);
        let name = segments.remove(0);
        return Some(Operand::Variable {
            name,
            path: segments,
        });
    }
    None
}

fn split_path(raw: &str) -> Vec<String> {
    raw.split('.').map(str::to_string).collect()
}

fn navigate(value: Value, path: &[String]) -> Option<Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(mut map) => map.remove(segment)?,
            Value::Array(mut items) => {
                let index = segment.parse::<usize>().ok()?;
                if index >= items.len() {
                    return None;
                }
                items.swap_remove(index)
            }
            _ => return None,
        };
    }
    Some(current)
}
