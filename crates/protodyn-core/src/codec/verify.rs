//! Plain-object verification.
//!
//! Verification never fails: it reports the first problem as a string such
//! as `"count: integer expected"` and returns `None` for acceptable input.

use super::compile::{Compiled, FieldPlan, Shape};
use super::{compiled_for, RECURSION_LIMIT};
use crate::schema::{FieldKind, Root, Scalar};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value as JsonValue;

pub(crate) fn verify_message(
    root: &Root,
    plan: &Compiled,
    json: &JsonValue,
    depth: usize,
) -> Option<String> {
    if depth > RECURSION_LIMIT {
        return Some("max depth exceeded".to_string());
    }
    let Some(object) = json.as_object() else {
        return Some("object expected".to_string());
    };
    let mut oneof_seen = vec![false; plan.oneofs.len()];

    for field in &plan.fields {
        let property = object.get(&field.name).filter(|v| !v.is_null());
        let Some(property) = property else {
            if field.required {
                return Some(format!("missing required '{}'", field.name));
            }
            continue;
        };
        match field.shape {
            Shape::Map { key } => {
                let Some(entries) = property.as_object() else {
                    return Some(invalid(field, "object"));
                };
                for (text, item) in entries {
                    if let Some(expected) = check_key(key, text) {
                        return Some(invalid(field, expected));
                    }
                    if let Some(err) = verify_value(root, field, item, depth) {
                        return Some(err);
                    }
                }
            }
            Shape::Repeated { .. } => {
                let Some(items) = property.as_array() else {
                    return Some(invalid(field, "array"));
                };
                for item in items {
                    if let Some(err) = verify_value(root, field, item, depth) {
                        return Some(err);
                    }
                }
            }
            Shape::Singular => {
                if let Some(oneof) = field.oneof {
                    if oneof_seen[oneof] {
                        return Some(format!("{}: multiple values", plan.oneofs[oneof].name));
                    }
                    oneof_seen[oneof] = true;
                }
                if let Some(err) = verify_value(root, field, property, depth) {
                    return Some(err);
                }
            }
        }
    }
    None
}

fn verify_value(root: &Root, field: &FieldPlan, json: &JsonValue, depth: usize) -> Option<String> {
    let scalar = match field.kind {
        FieldKind::Message(target) => {
            let plan = match compiled_for(root, target) {
                Ok(plan) => plan,
                Err(err) => return Some(format!("{}.{err}", field.name)),
            };
            return verify_message(root, plan, json, depth + 1)
                .map(|err| format!("{}.{err}", field.name));
        }
        FieldKind::Enum(enum_id) => {
            let known = root.as_enum(enum_id).is_some_and(|e| match json {
                JsonValue::String(name) => e.value_of(name).is_some(),
                other => other
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .is_some_and(|v| e.contains_id(v)),
            });
            return (!known).then(|| invalid(field, "enum value"));
        }
        FieldKind::Scalar(scalar) => scalar,
    };
    let (ok, expected) = match scalar {
        Scalar::Int32 | Scalar::Uint32 | Scalar::Sint32 | Scalar::Fixed32 | Scalar::Sfixed32 => {
            (is_integer(json), "integer")
        }
        Scalar::Int64 | Scalar::Uint64 | Scalar::Sint64 | Scalar::Fixed64 | Scalar::Sfixed64 => {
            (is_long(json), "integer|Long")
        }
        Scalar::Double | Scalar::Float => (is_number(json), "number"),
        Scalar::Bool => (json.is_boolean(), "boolean"),
        Scalar::String => (json.is_string(), "string"),
        Scalar::Bytes => (is_buffer(json), "buffer"),
    };
    (!ok).then(|| invalid(field, expected))
}

/// Formats a violation, marking repeated and map fields the way their
/// elements are addressed
fn invalid(field: &FieldPlan, expected: &str) -> String {
    let suffix = match field.shape {
        Shape::Repeated { .. } if expected != "array" => "[]".to_string(),
        Shape::Map { key } if expected != "object" => format!("{{k:{}}}", key.name()),
        _ => String::new(),
    };
    format!("{}: {expected}{suffix} expected", field.name)
}

fn check_key(key: Scalar, text: &str) -> Option<&'static str> {
    match key {
        Scalar::String => None,
        Scalar::Bool => (!matches!(text, "true" | "false" | "0" | "1")).then_some("boolean key"),
        s if s.is_long() => (!is_decimal(text)).then_some("integer|Long key"),
        _ => (!is_decimal(text)).then_some("integer key"),
    }
}

fn is_decimal(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    match digits.as_bytes() {
        [] => false,
        [b'0'] => true,
        [b'0', ..] => false,
        bytes => bytes.iter().all(u8::is_ascii_digit),
    }
}

fn is_integer(json: &JsonValue) -> bool {
    match json {
        JsonValue::Number(n) => {
            n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => false,
    }
}

fn is_long(json: &JsonValue) -> bool {
    match json {
        JsonValue::String(text) => is_decimal(text),
        JsonValue::Object(parts) => {
            parts.get("low").is_some_and(is_integer) && parts.get("high").is_some_and(is_integer)
        }
        other => is_integer(other),
    }
}

fn is_number(json: &JsonValue) -> bool {
    match json {
        JsonValue::Number(_) => true,
        JsonValue::String(text) => matches!(text.as_str(), "NaN" | "Infinity" | "-Infinity"),
        _ => false,
    }
}

fn is_buffer(json: &JsonValue) -> bool {
    match json {
        JsonValue::String(text) => STANDARD.decode(text).is_ok(),
        JsonValue::Array(items) => items
            .iter()
            .all(|item| item.as_u64().is_some_and(|b| b <= 255)),
        _ => false,
    }
}
