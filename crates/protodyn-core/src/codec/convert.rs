//! Plain objects ⇄ messages.
//!
//! Plain objects are `serde_json` values shaped like the JSON mapping of a
//! message: one property per populated field, named as in the schema.

use super::compile::{Compiled, FieldPlan, Shape};
use super::{compiled_for, RECURSION_LIMIT};
use crate::error::{Error, Result};
use crate::long::Int64;
use crate::message::{MapKey, Message, Value};
use crate::schema::{FieldKind, Root, Scalar};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::{json, Map, Number, Value as JsonValue};
use std::collections::BTreeMap;

/// How 64-bit integers appear in plain objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LongFormat {
    /// A JSON integer, exact for the whole 64-bit range
    Number,
    /// A decimal string
    #[default]
    String,
    /// `{"low": .., "high": .., "unsigned": ..}` with signed 32-bit halves
    Object,
}

/// How enum values appear in plain objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumFormat {
    /// The numeric value
    #[default]
    Number,
    /// The value name, or the number when no name is known
    Name,
}

/// How `bytes` values appear in plain objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BytesFormat {
    /// A standard base64 string
    #[default]
    Base64,
    /// An array of byte values
    Array,
}

/// Options for [`TypeRef::to_object`](crate::TypeRef::to_object)
#[derive(Debug, Clone, Default)]
pub struct ConversionOptions {
    /// Representation of 64-bit integers
    pub longs: LongFormat,
    /// Representation of enum values
    pub enums: EnumFormat,
    /// Representation of `bytes` values
    pub bytes: BytesFormat,
    /// Include unset fields with their default values
    pub defaults: bool,
    /// Include unset repeated fields as empty arrays
    pub arrays: bool,
    /// Include unset map fields as empty objects
    pub objects: bool,
    /// Add a property per populated oneof naming the member that is set
    pub oneofs: bool,
}

impl ConversionOptions {
    /// Creates options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the 64-bit integer representation
    pub fn longs(mut self, format: LongFormat) -> Self {
        self.longs = format;
        self
    }

    /// Sets the enum representation
    pub fn enums(mut self, format: EnumFormat) -> Self {
        self.enums = format;
        self
    }

    /// Sets the bytes representation
    pub fn bytes(mut self, format: BytesFormat) -> Self {
        self.bytes = format;
        self
    }

    /// Sets whether unset fields are emitted with their defaults
    pub fn defaults(mut self, defaults: bool) -> Self {
        self.defaults = defaults;
        self
    }

    /// Sets whether unset repeated fields are emitted as `[]`
    pub fn arrays(mut self, arrays: bool) -> Self {
        self.arrays = arrays;
        self
    }

    /// Sets whether unset map fields are emitted as `{}`
    pub fn objects(mut self, objects: bool) -> Self {
        self.objects = objects;
        self
    }

    /// Sets whether oneof member names are emitted
    pub fn oneofs(mut self, oneofs: bool) -> Self {
        self.oneofs = oneofs;
        self
    }
}

// ---------------------------------------------------------------------------
// Value coercion
// ---------------------------------------------------------------------------

/// Brings a value into the representation the decoder produces for `field`
pub(crate) fn coerce(root: &Root, field: &FieldPlan, value: Value) -> Result<Value> {
    match (field.shape, value) {
        (Shape::Singular, value) => coerce_single(root, &field.name, field.kind, value),
        (Shape::Repeated { .. }, Value::List(items)) => items
            .into_iter()
            .map(|item| coerce_single(root, &field.name, field.kind, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        (Shape::Map { key }, Value::Map(entries)) => {
            let mut out = BTreeMap::new();
            for (map_key, item) in entries {
                let map_key = key_from_value(key, &key_to_value(&map_key)).ok_or_else(|| {
                    Error::invalid_value(&field.name, format!("{} key expected", key.name()))
                })?;
                out.insert(map_key, coerce_single(root, &field.name, field.kind, item)?);
            }
            Ok(Value::Map(out))
        }
        (Shape::Repeated { .. }, value) => Err(mismatch(&field.name, "list", &value)),
        (Shape::Map { .. }, value) => Err(mismatch(&field.name, "map", &value)),
    }
}

fn coerce_single(root: &Root, name: &str, kind: FieldKind, value: Value) -> Result<Value> {
    match kind {
        FieldKind::Message(target) => match value {
            Value::Message(message) if message.type_id() == target => Ok(Value::Message(message)),
            Value::Message(message) => Err(Error::invalid_value(
                name,
                format!(
                    "message of type {} expected, got {}",
                    root.full_name(target),
                    root.full_name(message.type_id())
                ),
            )),
            other => Err(mismatch(name, "message", &other)),
        },
        FieldKind::Enum(enum_id) => {
            let number = match &value {
                Value::String(text) => root.as_enum(enum_id).and_then(|e| e.value_of(text)),
                other => other.as_i32(),
            };
            number
                .map(Value::Enum)
                .ok_or_else(|| mismatch(name, "enum", &value))
        }
        FieldKind::Scalar(scalar) => {
            let coerced = match scalar {
                Scalar::Double => value.as_f64().map(Value::F64),
                Scalar::Float => value.as_f64().map(|v| Value::F32(v as f32)),
                Scalar::Int32 | Scalar::Sint32 | Scalar::Sfixed32 => value.as_i32().map(Value::I32),
                Scalar::Uint32 | Scalar::Fixed32 => value.as_u32().map(Value::U32),
                Scalar::Int64 | Scalar::Sint64 | Scalar::Sfixed64 => {
                    value.as_int64().map(|v| Value::I64(v.to_signed()))
                }
                Scalar::Uint64 | Scalar::Fixed64 => {
                    value.as_int64().map(|v| Value::I64(v.to_unsigned()))
                }
                Scalar::Bool => value.as_bool().map(Value::Bool),
                Scalar::String | Scalar::Bytes => None,
            };
            match (coerced, scalar, value) {
                (Some(coerced), _, _) => Ok(coerced),
                (None, Scalar::String, Value::String(text)) => Ok(Value::String(text)),
                (None, Scalar::Bytes, Value::Bytes(data)) => Ok(Value::Bytes(data)),
                (None, _, value) => Err(mismatch(name, scalar.name(), &value)),
            }
        }
    }
}

fn mismatch(name: &str, expected: &str, value: &Value) -> Error {
    Error::invalid_value(name, format!("{expected} expected, got {}", value.kind_name()))
}

// ---------------------------------------------------------------------------
// Map keys
// ---------------------------------------------------------------------------

/// Converts a decoded key value to the map key form of `key`
pub(crate) fn key_from_value(key: Scalar, value: &Value) -> Option<MapKey> {
    match key {
        Scalar::String => value.as_str().map(|s| MapKey::String(s.to_string())),
        Scalar::Bool => value.as_bool().map(MapKey::Bool),
        Scalar::Int32 | Scalar::Sint32 | Scalar::Sfixed32 => value.as_i32().map(MapKey::I32),
        Scalar::Uint32 | Scalar::Fixed32 => value.as_u32().map(MapKey::U32),
        Scalar::Int64 | Scalar::Sint64 | Scalar::Sfixed64 => {
            value.as_int64().map(|v| MapKey::I64(v.as_i64()))
        }
        Scalar::Uint64 | Scalar::Fixed64 => value.as_int64().map(|v| MapKey::U64(v.as_u64())),
        Scalar::Double | Scalar::Float | Scalar::Bytes => None,
    }
}

/// The wire value of a map key
pub(crate) fn key_to_value(map_key: &MapKey) -> Value {
    match map_key {
        MapKey::Bool(v) => Value::Bool(*v),
        MapKey::I32(v) => Value::I32(*v),
        MapKey::U32(v) => Value::U32(*v),
        MapKey::I64(v) => Value::I64(Int64::from_i64(*v)),
        MapKey::U64(v) => Value::I64(Int64::from_u64(*v)),
        MapKey::String(v) => Value::String(v.clone()),
    }
}

/// Parses an object property name as a key of type `key`
fn parse_key(key: Scalar, text: &str) -> Option<MapKey> {
    match key {
        Scalar::String => Some(MapKey::String(text.to_string())),
        Scalar::Bool => match text {
            "true" | "1" => Some(MapKey::Bool(true)),
            "false" | "0" => Some(MapKey::Bool(false)),
            _ => None,
        },
        Scalar::Int32 | Scalar::Sint32 | Scalar::Sfixed32 => text.parse().ok().map(MapKey::I32),
        Scalar::Uint32 | Scalar::Fixed32 => text.parse().ok().map(MapKey::U32),
        Scalar::Int64 | Scalar::Sint64 | Scalar::Sfixed64 => text.parse().ok().map(MapKey::I64),
        Scalar::Uint64 | Scalar::Fixed64 => text.parse().ok().map(MapKey::U64),
        Scalar::Double | Scalar::Float | Scalar::Bytes => None,
    }
}

// ---------------------------------------------------------------------------
// fromObject
// ---------------------------------------------------------------------------

pub(crate) fn from_object(
    root: &Root,
    plan: &Compiled,
    json: &JsonValue,
    depth: usize,
) -> Result<Message> {
    if depth > RECURSION_LIMIT {
        return Err(Error::RecursionLimit {
            limit: RECURSION_LIMIT,
            offset: 0,
        });
    }
    let object = json
        .as_object()
        .ok_or_else(|| Error::invalid_value(&plan.full_name, "object expected"))?;
    let mut message = Message::new(plan.type_id);
    for field in &plan.fields {
        let Some(property) = object.get(&field.name).filter(|v| !v.is_null()) else {
            continue;
        };
        let value = match field.shape {
            Shape::Singular => json_to_value(root, &field.name, field.kind, property, depth)?,
            Shape::Repeated { .. } => {
                let items = property
                    .as_array()
                    .ok_or_else(|| Error::invalid_value(&field.name, "array expected"))?;
                items
                    .iter()
                    .map(|item| json_to_value(root, &field.name, field.kind, item, depth))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List)?
            }
            Shape::Map { key } => {
                let entries = property
                    .as_object()
                    .ok_or_else(|| Error::invalid_value(&field.name, "object expected"))?;
                let mut out = BTreeMap::new();
                for (text, item) in entries {
                    let map_key = parse_key(key, text).ok_or_else(|| {
                        Error::invalid_value(
                            &field.name,
                            format!("invalid {} key '{text}'", key.name()),
                        )
                    })?;
                    out.insert(
                        map_key,
                        json_to_value(root, &field.name, field.kind, item, depth)?,
                    );
                }
                Value::Map(out)
            }
        };
        if let Some(oneof) = field.oneof {
            for member in &plan.oneofs[oneof].members {
                message.remove(plan.fields[*member].id);
            }
        }
        message.insert(field.id, value);
    }
    Ok(message)
}

/// Converts one plain value to a field value of `kind`
pub(crate) fn value_from_json(
    root: &Root,
    name: &str,
    kind: FieldKind,
    json: &JsonValue,
) -> Result<Value> {
    json_to_value(root, name, kind, json, 0)
}

fn json_to_value(
    root: &Root,
    name: &str,
    kind: FieldKind,
    json: &JsonValue,
    depth: usize,
) -> Result<Value> {
    let scalar = match kind {
        FieldKind::Message(target) => {
            let plan = compiled_for(root, target)?;
            return from_object(root, plan, json, depth + 1).map(Value::Message);
        }
        FieldKind::Enum(enum_id) => {
            let number = match json {
                JsonValue::String(text) => root
                    .as_enum(enum_id)
                    .and_then(|e| e.value_of(text))
                    .or_else(|| text.parse().ok()),
                other => json_i64(other).map(|v| v as i32),
            };
            return number
                .map(Value::Enum)
                .ok_or_else(|| Error::invalid_value(name, "enum value expected"));
        }
        FieldKind::Scalar(scalar) => scalar,
    };
    let value = match scalar {
        Scalar::Int32 | Scalar::Sint32 | Scalar::Sfixed32 => {
            json_i64(json).map(|v| Value::I32(v as i32))
        }
        Scalar::Uint32 | Scalar::Fixed32 => json_i64(json).map(|v| Value::U32(v as u32)),
        Scalar::Int64 | Scalar::Sint64 | Scalar::Sfixed64 => {
            json_long(json, false).map(Value::I64)
        }
        Scalar::Uint64 | Scalar::Fixed64 => json_long(json, true).map(Value::I64),
        Scalar::Double => json_f64(json).map(Value::F64),
        Scalar::Float => json_f64(json).map(|v| Value::F32(v as f32)),
        Scalar::Bool => match json {
            JsonValue::Bool(v) => Some(Value::Bool(*v)),
            JsonValue::String(text) if text == "true" => Some(Value::Bool(true)),
            JsonValue::String(text) if text == "false" => Some(Value::Bool(false)),
            _ => None,
        },
        Scalar::String => json.as_str().map(|s| Value::String(s.to_string())),
        Scalar::Bytes => json_bytes(json).map(Value::Bytes),
    };
    value.ok_or_else(|| {
        let expected = match scalar {
            Scalar::Double | Scalar::Float => "number",
            Scalar::Bool => "boolean",
            Scalar::String => "string",
            Scalar::Bytes => "buffer",
            s if s.is_long() => "integer|Long",
            _ => "integer",
        };
        Error::invalid_value(name, format!("{expected} expected"))
    })
}

fn json_i64(json: &JsonValue) -> Option<i64> {
    match json {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| u as i64))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        JsonValue::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn json_long(json: &JsonValue, unsigned: bool) -> Option<Int64> {
    let value = match json {
        JsonValue::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(v), _) => Some(Int64::from_i64(v)),
            (None, Some(v)) => Some(Int64::from_u64(v)),
            (None, None) => n.as_f64().map(|f| Int64::from_f64(f, unsigned)),
        },
        JsonValue::String(text) => Int64::from_str_radix(text.trim(), unsigned, 10).ok(),
        JsonValue::Object(parts) => {
            let low = parts.get("low")?.as_i64()?;
            let high = parts.get("high")?.as_i64()?;
            Some(Int64::from_parts(low as u32, high as u32, unsigned))
        }
        _ => None,
    }?;
    Some(if unsigned {
        value.to_unsigned()
    } else {
        value.to_signed()
    })
}

fn json_f64(json: &JsonValue) -> Option<f64> {
    match json {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(text) => match text.as_str() {
            "NaN" | "nan" => Some(f64::NAN),
            "Infinity" | "inf" => Some(f64::INFINITY),
            "-Infinity" | "-inf" => Some(f64::NEG_INFINITY),
            other => other.trim().parse().ok(),
        },
        _ => None,
    }
}

fn json_bytes(json: &JsonValue) -> Option<Bytes> {
    match json {
        JsonValue::String(text) => STANDARD.decode(text).ok().map(Bytes::from),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect::<Option<Vec<u8>>>()
            .map(Bytes::from),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// toObject
// ---------------------------------------------------------------------------

pub(crate) fn to_object(
    root: &Root,
    plan: &Compiled,
    message: &Message,
    options: &ConversionOptions,
    depth: usize,
) -> Result<JsonValue> {
    if depth > RECURSION_LIMIT {
        return Err(Error::RecursionLimit {
            limit: RECURSION_LIMIT,
            offset: 0,
        });
    }
    let mut object = Map::new();
    for field in &plan.fields {
        let property = match (message.get(field.id), field.shape) {
            (Some(value), Shape::Singular) => {
                single_to_json(root, field, value, options, depth)?
            }
            (Some(value), Shape::Repeated { .. }) => {
                let items = value
                    .as_list()
                    .ok_or_else(|| mismatch(&field.name, "list", value))?;
                JsonValue::Array(
                    items
                        .iter()
                        .map(|item| single_to_json(root, field, item, options, depth))
                        .collect::<Result<_>>()?,
                )
            }
            (Some(value), Shape::Map { .. }) => {
                let entries = value
                    .as_map()
                    .ok_or_else(|| mismatch(&field.name, "map", value))?;
                let mut out = Map::new();
                for (map_key, item) in entries {
                    out.insert(
                        map_key.to_string(),
                        single_to_json(root, field, item, options, depth)?,
                    );
                }
                JsonValue::Object(out)
            }
            (None, Shape::Repeated { .. }) if options.arrays || options.defaults => {
                JsonValue::Array(Vec::new())
            }
            (None, Shape::Map { .. }) if options.objects || options.defaults => {
                JsonValue::Object(Map::new())
            }
            (None, Shape::Singular) if options.defaults && field.oneof.is_none() => {
                match &field.default {
                    Some(value) => single_to_json(root, field, value, options, depth)?,
                    None => JsonValue::Null,
                }
            }
            (None, _) => continue,
        };
        object.insert(field.name.clone(), property);
    }

    if options.oneofs {
        for oneof in &plan.oneofs {
            let set = oneof
                .members
                .iter()
                .map(|member| &plan.fields[*member])
                .find(|field| message.contains(field.id));
            if let Some(field) = set {
                object.insert(oneof.name.clone(), JsonValue::from(field.name.as_str()));
            }
        }
    }
    Ok(JsonValue::Object(object))
}

fn single_to_json(
    root: &Root,
    field: &FieldPlan,
    value: &Value,
    options: &ConversionOptions,
    depth: usize,
) -> Result<JsonValue> {
    if let (FieldKind::Enum(enum_id), EnumFormat::Name) = (field.kind, options.enums) {
        let number = value
            .as_i32()
            .ok_or_else(|| mismatch(&field.name, "enum", value))?;
        return Ok(root
            .as_enum(enum_id)
            .and_then(|e| e.name_of(number))
            .map_or_else(|| JsonValue::from(number), JsonValue::from));
    }
    Ok(match value {
        Value::Bool(v) => JsonValue::Bool(*v),
        Value::I32(v) | Value::Enum(v) => JsonValue::from(*v),
        Value::U32(v) => JsonValue::from(*v),
        Value::I64(v) => long_to_json(*v, options.longs),
        Value::F32(v) => float_to_json(f64::from(*v)),
        Value::F64(v) => float_to_json(*v),
        Value::String(v) => JsonValue::String(v.clone()),
        Value::Bytes(v) => match options.bytes {
            BytesFormat::Base64 => JsonValue::String(STANDARD.encode(v)),
            BytesFormat::Array => JsonValue::from(v.to_vec()),
        },
        Value::Message(message) => {
            let plan = compiled_for(root, message.type_id())?;
            to_object(root, plan, message, options, depth + 1)?
        }
        Value::List(_) | Value::Map(_) => return Err(mismatch(&field.name, "single value", value)),
    })
}

fn long_to_json(value: Int64, format: LongFormat) -> JsonValue {
    match format {
        LongFormat::Number if value.is_unsigned() => JsonValue::from(value.as_u64()),
        LongFormat::Number => JsonValue::from(value.as_i64()),
        LongFormat::String => JsonValue::String(value.to_string()),
        LongFormat::Object => json!({
            "low": value.low() as i32,
            "high": value.high() as i32,
            "unsigned": value.is_unsigned(),
        }),
    }
}

fn float_to_json(value: f64) -> JsonValue {
    match Number::from_f64(value) {
        Some(number) => JsonValue::Number(number),
        None if value.is_nan() => JsonValue::from("NaN"),
        None if value > 0.0 => JsonValue::from("Infinity"),
        None => JsonValue::from("-Infinity"),
    }
}
