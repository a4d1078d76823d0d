//! Message → wire bytes.

use super::compile::{Compiled, FieldPlan, Shape};
use super::{compiled_for, convert};
use crate::error::{Error, Result};
use crate::message::{Message, Value};
use crate::schema::{FieldKind, Root, Scalar};
use crate::wire::{WireType, Writer};

pub(crate) fn encode_message(
    root: &Root,
    plan: &Compiled,
    message: &Message,
    writer: &mut Writer,
) -> Result<()> {
    if message.type_id() != plan.type_id {
        return Err(Error::invalid_value(
            &plan.full_name,
            format!(
                "message of type {} given",
                root.full_name(message.type_id())
            ),
        ));
    }
    for index in &plan.wire_order {
        let field = &plan.fields[*index];
        if let Some(value) = message.get(field.id) {
            encode_field(root, field, value, writer)?;
        }
    }
    Ok(())
}

fn encode_field(root: &Root, field: &FieldPlan, value: &Value, writer: &mut Writer) -> Result<()> {
    match field.shape {
        Shape::Singular => write_tagged(root, field, field.id, field.kind, field.group, value, writer),
        Shape::Repeated { packed } => {
            let items = value.as_list().ok_or_else(|| mismatch(field, "list", value))?;
            if items.is_empty() {
                return Ok(());
            }
            if packed {
                writer.tag(field.id, WireType::Len).fork();
                for item in items {
                    write_bare(field, field.kind, item, writer)?;
                }
                writer.ldelim();
            } else {
                for item in items {
                    write_tagged(root, field, field.id, field.kind, field.group, item, writer)?;
                }
            }
            Ok(())
        }
        Shape::Map { key } => {
            let entries = value.as_map().ok_or_else(|| mismatch(field, "map", value))?;
            for (map_key, item) in entries {
                writer.tag(field.id, WireType::Len).fork();
                let key_value = convert::key_to_value(map_key);
                write_tagged(root, field, 1, FieldKind::Scalar(key), false, &key_value, writer)?;
                write_tagged(root, field, 2, field.kind, false, item, writer)?;
                writer.ldelim();
            }
            Ok(())
        }
    }
}

fn write_tagged(
    root: &Root,
    field: &FieldPlan,
    id: u32,
    kind: FieldKind,
    group: bool,
    value: &Value,
    writer: &mut Writer,
) -> Result<()> {
    match kind {
        FieldKind::Message(target) => {
            let message = value
                .as_message()
                .ok_or_else(|| mismatch(field, "message", value))?;
            let plan = compiled_for(root, target)?;
            if group {
                writer.tag(id, WireType::StartGroup);
                encode_message(root, plan, message, writer)?;
                writer.tag(id, WireType::EndGroup);
            } else {
                writer.tag(id, WireType::Len).fork();
                encode_message(root, plan, message, writer)?;
                writer.ldelim();
            }
            Ok(())
        }
        FieldKind::Scalar(scalar) => {
            writer.tag(id, scalar.wire_type());
            write_bare(field, kind, value, writer)
        }
        FieldKind::Enum(_) => {
            writer.tag(id, WireType::Varint);
            write_bare(field, kind, value, writer)
        }
    }
}

/// Writes a scalar or enum value without a tag
fn write_bare(field: &FieldPlan, kind: FieldKind, value: &Value, writer: &mut Writer) -> Result<()> {
    let scalar = match kind {
        FieldKind::Scalar(scalar) => scalar,
        FieldKind::Enum(_) => {
            let number = value.as_i32().ok_or_else(|| mismatch(field, "enum", value))?;
            writer.int32(number);
            return Ok(());
        }
        FieldKind::Message(_) => return Err(mismatch(field, "scalar", value)),
    };
    let expected = || mismatch(field, scalar.name(), value);
    match scalar {
        Scalar::Double => writer.double(value.as_f64().ok_or_else(expected)?),
        Scalar::Float => writer.float(value.as_f64().ok_or_else(expected)? as f32),
        Scalar::Int32 => writer.int32(value.as_i32().ok_or_else(expected)?),
        Scalar::Uint32 => writer.uint32(value.as_u32().ok_or_else(expected)?),
        Scalar::Sint32 => writer.sint32(value.as_i32().ok_or_else(expected)?),
        Scalar::Fixed32 => writer.fixed32(value.as_u32().ok_or_else(expected)?),
        Scalar::Sfixed32 => writer.sfixed32(value.as_i32().ok_or_else(expected)?),
        Scalar::Int64 => writer.int64(value.as_int64().ok_or_else(expected)?),
        Scalar::Uint64 => writer.uint64(value.as_int64().ok_or_else(expected)?),
        Scalar::Sint64 => writer.sint64(value.as_int64().ok_or_else(expected)?),
        Scalar::Fixed64 => writer.fixed64(value.as_int64().ok_or_else(expected)?),
        Scalar::Sfixed64 => writer.sfixed64(value.as_int64().ok_or_else(expected)?),
        Scalar::Bool => writer.bool(value.as_bool().ok_or_else(expected)?),
        Scalar::String => writer.string(value.as_str().ok_or_else(expected)?),
        Scalar::Bytes => writer.bytes(value.as_bytes().ok_or_else(expected)?.clone()),
    };
    Ok(())
}

fn mismatch(field: &FieldPlan, expected: &str, value: &Value) -> Error {
    Error::invalid_value(
        &field.name,
        format!("{expected} expected, got {}", value.kind_name()),
    )
}
