//! Structural comparison of desired spec against an observed snapshot.

use std::fmt;

use serde_json::Value;

/// One field that differs between spec and snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Drift {
    /// Dotted path to the field, e.g. `scaling.maxSize`.
    pub path: String,
    pub desired: Value,
    /// `None` when the provider does not report the field at all.
    pub observed: Option<Value>,
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.observed {
            Some(observed) => write!(f, "{}: want {}, have {}", self.path, self.desired, observed),
            None => write!(f, "{}: want {}, have nothing", self.path, self.desired),
        }
    }
}

/// Compare `desired` against `observed`.
///
/// Only fields set in `desired` count: nulls and absent fields are "don't
/// care", and anything the provider reports beyond the spec is ignored.
/// Objects are compared key by key, everything else (arrays included) as a
/// whole.
pub fn diff(desired: &Value, observed: &Value) -> Vec<Drift> {
    let mut drift = Vec::new();
    walk("", desired, Some(observed), &mut drift);
    drift
}

fn walk(path: &str, desired: &Value, observed: Option<&Value>, out: &mut Vec<Drift>) {
    match (desired, observed) {
        (Value::Null, _) => {}
        (Value::Object(want), Some(Value::Object(have))) => {
            for (field, value) in want {
                walk(&join(path, field), value, have.get(field), out);
            }
        }
        (Value::Object(want), _) if path.is_empty() => {
            // Snapshot is not an object at all: every set field drifts.
            for (field, value) in want {
                walk(&join(path, field), value, None, out);
            }
        }
        (want, Some(have)) if same(want, have) => {}
        (want, have) => out.push(Drift {
            path: path.to_string(),
            desired: want.clone(),
            observed: have.filter(|v| !v.is_null()).cloned(),
        }),
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

// 3 and 3.0 are the same size, whatever the provider's JSON encoder thinks.
// Integers compare exactly; f64 only comes in when one side is a float.
fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return x == y;
            }
            if x.is_f64() || y.is_f64() {
                if let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) {
                    return x == y;
                }
            }
            x == y
        }
        _ => a == b,
    }
}
