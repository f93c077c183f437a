//! Reference expression evaluator.
//!
//! Expressions are JSON documents (or bare strings) containing `${path}`
//! references. Paths are dot-separated; numeric segments index arrays.
//! The root scope is `{workflow, documents, events}` plus whatever the
//! caller passes in `opts`.
//!
//! A string that is exactly one reference takes the referenced value with
//! its JSON type. References embedded in longer strings are rendered as
//! text, with `null` and missing values rendered empty.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{EvalScope, Evaluator};
use crate::error::{Error, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateEvaluator;

#[async_trait]
impl Evaluator for TemplateEvaluator {
    async fn evaluate(&self, expr: &str, scope: &EvalScope<'_>, opts: &Value) -> Result<Value> {
        let mut root = scope.to_json()?;
        if let (Value::Object(bindings), Value::Object(extra)) = (&mut root, opts) {
            for (key, value) in extra {
                bindings.insert(key.clone(), value.clone());
            }
        }

        let template = serde_json::from_str::<Value>(expr)
            .unwrap_or_else(|_| Value::String(expr.to_string()));
        substitute(&template, &root)
    }
}

/// JavaScript-style truthiness, used for status-rule conditions.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn substitute(value: &Value, root: &Value) -> Result<Value> {
    match value {
        Value::String(s) => interpolate(s, root),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, root))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| Ok((key.clone(), substitute(item, root)?)))
            .collect::<Result<Map<_, _>>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn interpolate(s: &str, root: &Value) -> Result<Value> {
    if let Some(path) = whole_reference(s) {
        return Ok(lookup(root, path)?.cloned().unwrap_or(Value::Null));
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| Error::Evaluation(format!("unterminated reference in '{s}'")))?;
        match lookup(root, after[..end].trim())? {
            Some(Value::String(text)) => out.push_str(text),
            Some(Value::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn whole_reference(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains("${") || inner.contains('}') {
        return None;
    }
    Some(inner.trim())
}

/// Resolve `path` under `root`. Unknown top-level names are an error;
/// anything missing deeper resolves to `None`.
fn lookup<'a>(root: &'a Value, path: &str) -> Result<Option<&'a Value>> {
    let mut segments = path.split('.').filter(|seg| !seg.is_empty());
    let head = segments
        .next()
        .ok_or_else(|| Error::Evaluation("empty reference".to_string()))?;
    let start = root
        .get(head)
        .ok_or_else(|| Error::Evaluation(format!("unknown reference '{head}' in '{path}'")))?;

    Ok(segments.try_fold(start, |node, seg| match node {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }))
}
