//! Wire bytes → message.

use super::compile::{Compiled, FieldPlan, Shape};
use super::{compiled_for, convert, RECURSION_LIMIT};
use crate::error::{Error, Result};
use crate::message::{MapKey, Message, Value};
use crate::schema::{FieldKind, Root, Scalar};
use crate::wire::{Reader, WireType};
use std::collections::BTreeMap;
use tracing::trace;

/// Decodes fields until the reader is exhausted, or until the end-group
/// tag of `group` when decoding a group body.
pub(crate) fn decode_message(
    root: &Root,
    plan: &Compiled,
    reader: &mut Reader,
    group: Option<u32>,
    depth: usize,
) -> Result<Message> {
    if depth > RECURSION_LIMIT {
        return Err(Error::RecursionLimit {
            limit: RECURSION_LIMIT,
            offset: reader.pos(),
        });
    }
    let mut message = Message::new(plan.type_id);
    let mut closed = group.is_none();
    while !reader.is_at_end() {
        let offset = reader.pos();
        let (id, wire_type) = reader.tag()?;
        if wire_type == WireType::EndGroup {
            if group == Some(id) {
                closed = true;
                break;
            }
            return Err(Error::InvalidWireType {
                wire_type: WireType::EndGroup as u32,
                offset,
            });
        }
        match plan.by_id.get(&id) {
            Some(index) => {
                let field = &plan.fields[*index];
                decode_field(root, plan, field, &mut message, reader, wire_type, offset, depth)?;
            }
            None => {
                trace!(type_name = %plan.full_name, id, "skipping unknown field");
                reader.skip_field(id, wire_type, depth + 1)?;
            }
        }
    }
    if !closed {
        return Err(Error::buffer_overrun(reader.pos(), 1, 0));
    }

    if let Some(missing) = plan
        .fields
        .iter()
        .find(|field| field.required && !message.contains(field.id))
    {
        return Err(Error::MissingRequiredField {
            field: missing.name.clone(),
            type_name: plan.full_name.clone(),
            instance: Box::new(message),
        });
    }
    Ok(message)
}

#[allow(clippy::too_many_arguments)]
fn decode_field(
    root: &Root,
    plan: &Compiled,
    field: &FieldPlan,
    message: &mut Message,
    reader: &mut Reader,
    wire_type: WireType,
    offset: usize,
    depth: usize,
) -> Result<()> {
    match field.shape {
        Shape::Map { key } => {
            expect_wire(WireType::Len, wire_type, offset)?;
            let (map_key, value) = decode_entry(root, field, key, reader, depth)?;
            let slot = message
                .entry(field.id)
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            match slot {
                Value::Map(entries) => {
                    entries.insert(map_key, value);
                }
                other => *other = Value::Map(BTreeMap::from([(map_key, value)])),
            }
        }
        Shape::Repeated { .. } => {
            let mut items = Vec::new();
            if wire_type == WireType::Len && field.is_packable() {
                let mut run = Reader::new(reader.bytes()?);
                while !run.is_at_end() {
                    items.push(read_bare(&mut run, field.kind)?);
                }
            } else {
                items.push(read_value(
                    root, field.id, field.kind, field.group, reader, wire_type, offset, depth,
                )?);
            }
            message
                .entry(field.id)
                .or_insert_with(|| Value::List(Vec::new()))
                .merge(Value::List(items));
        }
        Shape::Singular => {
            let value = read_value(
                root, field.id, field.kind, field.group, reader, wire_type, offset, depth,
            )?;
            if let Some(oneof) = field.oneof {
                for member in &plan.oneofs[oneof].members {
                    let sibling = plan.fields[*member].id;
                    if sibling != field.id {
                        message.remove(sibling);
                    }
                }
            }
            match message.get_mut(field.id) {
                Some(existing) if matches!(field.kind, FieldKind::Message(_)) => {
                    existing.merge(value)
                }
                _ => {
                    message.insert(field.id, value);
                }
            }
        }
    }
    Ok(())
}

/// Decodes one map entry; a missing key or value takes its default
fn decode_entry(
    root: &Root,
    field: &FieldPlan,
    key: Scalar,
    reader: &mut Reader,
    depth: usize,
) -> Result<(MapKey, Value)> {
    let mut entry = Reader::new(reader.bytes()?);
    let mut key_value = None;
    let mut value = None;
    while !entry.is_at_end() {
        let offset = entry.pos();
        let (id, wire_type) = entry.tag()?;
        match id {
            1 => {
                expect_wire(key.wire_type(), wire_type, offset)?;
                key_value = Some(read_bare(&mut entry, FieldKind::Scalar(key))?);
            }
            2 => {
                value = Some(read_value(
                    root, 2, field.kind, false, &mut entry, wire_type, offset, depth,
                )?);
            }
            _ => entry.skip_field(id, wire_type, depth + 1)?,
        }
    }
    let key_value = key_value.unwrap_or_else(|| key.default_value());
    let map_key = convert::key_from_value(key, &key_value).ok_or_else(|| {
        Error::invalid_value(&field.name, format!("invalid {} map key", key.name()))
    })?;
    let value = match value {
        Some(value) => value,
        None => match field.kind {
            FieldKind::Scalar(scalar) => scalar.default_value(),
            FieldKind::Enum(enum_id) => {
                Value::Enum(root.as_enum(enum_id).map_or(0, |e| e.default_value()))
            }
            FieldKind::Message(target) => Value::Message(Message::new(target)),
        },
    };
    Ok((map_key, value))
}

#[allow(clippy::too_many_arguments)]
fn read_value(
    root: &Root,
    id: u32,
    kind: FieldKind,
    group: bool,
    reader: &mut Reader,
    wire_type: WireType,
    offset: usize,
    depth: usize,
) -> Result<Value> {
    match kind {
        FieldKind::Message(target) => {
            let plan = compiled_for(root, target)?;
            if group {
                expect_wire(WireType::StartGroup, wire_type, offset)?;
                decode_message(root, plan, reader, Some(id), depth + 1).map(Value::Message)
            } else {
                expect_wire(WireType::Len, wire_type, offset)?;
                let mut sub = Reader::new(reader.bytes()?);
                decode_message(root, plan, &mut sub, None, depth + 1).map(Value::Message)
            }
        }
        FieldKind::Scalar(scalar) => {
            expect_wire(scalar.wire_type(), wire_type, offset)?;
            read_bare(reader, kind)
        }
        FieldKind::Enum(_) => {
            expect_wire(WireType::Varint, wire_type, offset)?;
            read_bare(reader, kind)
        }
    }
}

/// Reads one untagged scalar or enum value
fn read_bare(reader: &mut Reader, kind: FieldKind) -> Result<Value> {
    let scalar = match kind {
        FieldKind::Scalar(scalar) => scalar,
        FieldKind::Enum(_) => return reader.int32().map(Value::Enum),
        FieldKind::Message(_) => {
            return Err(Error::InvalidWireType {
                wire_type: WireType::Len as u32,
                offset: reader.pos(),
            })
        }
    };
    Ok(match scalar {
        Scalar::Double => Value::F64(reader.double()?),
        Scalar::Float => Value::F32(reader.float()?),
        Scalar::Int32 => Value::I32(reader.int32()?),
        Scalar::Sint32 => Value::I32(reader.sint32()?),
        Scalar::Sfixed32 => Value::I32(reader.sfixed32()?),
        Scalar::Uint32 => Value::U32(reader.uint32()?),
        Scalar::Fixed32 => Value::U32(reader.fixed32()?),
        Scalar::Int64 => Value::I64(reader.int64()?),
        Scalar::Sint64 => Value::I64(reader.sint64()?),
        Scalar::Sfixed64 => Value::I64(reader.sfixed64()?),
        Scalar::Uint64 => Value::I64(reader.uint64()?),
        Scalar::Fixed64 => Value::I64(reader.fixed64()?),
        Scalar::Bool => Value::Bool(reader.bool()?),
        Scalar::String => Value::String(reader.string()?),
        Scalar::Bytes => Value::Bytes(reader.bytes()?),
    })
}

fn expect_wire(expected: WireType, actual: WireType, offset: usize) -> Result<()> {
    if expected == actual {
        return Ok(());
    }
    Err(Error::InvalidWireType {
        wire_type: actual as u32,
        offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::long::Int64;
    use crate::schema::{Field, NodeId, OneOf, ProtoSyntax};
    use pretty_assertions::assert_eq;

    fn root_with(fields: Vec<Field>) -> Root {
        let mut root = Root::new();
        let id = root.add_type(NodeId::ROOT, "M").unwrap();
        for field in fields {
            root.add_field(id, field).unwrap();
        }
        root
    }

    #[test]
    fn test_packed_and_unpacked_accepted() {
        let root = root_with(vec![Field::new("r", 1, "int32").repeated()]);
        let ty = root.get_type("M").unwrap();
        // unpacked 1, packed [2, 300], unpacked 4
        let bytes = vec![0x08, 0x01, 0x0A, 0x03, 0x02, 0xAC, 0x02, 0x08, 0x04];
        let msg = ty.decode(bytes).unwrap();
        assert_eq!(
            msg.get(1),
            Some(&Value::List(vec![
                Value::I32(1),
                Value::I32(2),
                Value::I32(300),
                Value::I32(4)
            ]))
        );
    }

    #[test]
    fn test_unknown_fields_skipped() {
        let root = root_with(vec![Field::new("a", 1, "int32")]);
        let ty = root.get_type("M").unwrap();
        // field 5 fixed64, field 6 bytes, field 7 group with a varint, then a=7
        let bytes = vec![
            0x29, 1, 2, 3, 4, 5, 6, 7, 8, 0x32, 0x01, 0xFF, 0x3B, 0x08, 0x01, 0x3C, 0x08, 0x07,
        ];
        let msg = ty.decode(bytes).unwrap();
        assert_eq!(msg.len(), 1);
        assert_eq!(msg.get(1), Some(&Value::I32(7)));
    }

    #[test]
    fn test_last_scalar_wins_and_messages_merge() {
        let mut root = Root::new();
        let id = root.add_type(NodeId::ROOT, "M").unwrap();
        let inner = root.add_type(NodeId::ROOT, "Inner").unwrap();
        root.add_field(id, Field::new("a", 1, "int32")).unwrap();
        root.add_field(id, Field::new("x", 2, "Inner")).unwrap();
        root.add_field(inner, Field::new("p", 1, "int32")).unwrap();
        root.add_field(inner, Field::new("q", 2, "int32")).unwrap();
        let ty = root.get_type("M").unwrap();

        let bytes = vec![
            0x08, 0x01, 0x12, 0x02, 0x08, 0x05, 0x08, 0x02, 0x12, 0x02, 0x10, 0x06,
        ];
        let msg = ty.decode(bytes).unwrap();
        assert_eq!(msg.get(1), Some(&Value::I32(2)));
        let x = msg.get(2).and_then(Value::as_message).unwrap();
        assert_eq!(x.get(1), Some(&Value::I32(5)));
        assert_eq!(x.get(2), Some(&Value::I32(6)));
    }

    #[test]
    fn test_oneof_last_member_wins() {
        let mut root = Root::new();
        let id = root.add_type(NodeId::ROOT, "M").unwrap();
        root.add_field(id, Field::new("a", 1, "int32")).unwrap();
        root.add_field(id, Field::new("b", 2, "string")).unwrap();
        root.add_oneof(id, OneOf::new("choice", ["a", "b"])).unwrap();
        let ty = root.get_type("M").unwrap();
        let msg = ty.decode(vec![0x08, 0x01, 0x12, 0x01, b'z']).unwrap();
        assert!(!msg.contains(1));
        assert_eq!(ty.which_oneof(&msg, "choice").unwrap(), Some("b"));
    }

    #[test]
    fn test_truncated_buffer() {
        let root = root_with(vec![Field::new("a", 1, "int64"), Field::new("s", 2, "string")]);
        let ty = root.get_type("M").unwrap();
        let err = ty.decode(vec![0x08, 0xFF, 0xFF]).unwrap_err();
        assert!(err.is_decode_error());
        let err = ty.decode(vec![0x12, 0x05, b'a']).unwrap_err();
        assert!(matches!(err, Error::BufferOverrun { .. }));
    }

    #[test]
    fn test_wire_type_mismatch() {
        let root = root_with(vec![Field::new("s", 1, "string")]);
        let ty = root.get_type("M").unwrap();
        let err = ty.decode(vec![0x08, 0x01]).unwrap_err();
        assert!(matches!(err, Error::InvalidWireType { wire_type: 0, offset: 0 }));
    }

    #[test]
    fn test_missing_required_field() {
        let mut root = Root::new();
        let id = root.add_type(NodeId::ROOT, "M").unwrap();
        root.set_syntax(id, ProtoSyntax::Proto2).unwrap();
        root.add_field(id, Field::new("a", 1, "int32").required()).unwrap();
        root.add_field(id, Field::new("b", 2, "int32")).unwrap();
        let ty = root.get_type("M").unwrap();
        match ty.decode(vec![0x10, 0x03]) {
            Err(Error::MissingRequiredField {
                field, instance, ..
            }) => {
                assert_eq!(field, "a");
                assert_eq!(instance.get(2), Some(&Value::I32(3)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(ty.decode(vec![0x08, 0x00]).is_ok());
    }

    #[test]
    fn test_map_entry_defaults() {
        let root = root_with(vec![Field::map("m", 1, "int64", "string")]);
        let ty = root.get_type("M").unwrap();
        // one entry with only a value, one with only a key
        let bytes = vec![0x0A, 0x03, 0x12, 0x01, b'v', 0x0A, 0x02, 0x08, 0x07];
        let msg = ty.decode(bytes).unwrap();
        let entries = msg.get(1).and_then(Value::as_map).unwrap();
        assert_eq!(entries.get(&MapKey::I64(0)), Some(&Value::from("v")));
        assert_eq!(entries.get(&MapKey::I64(7)), Some(&Value::from("")));
    }

    #[test]
    fn test_unterminated_group() {
        let mut root = Root::new();
        let id = root.add_type(NodeId::ROOT, "M").unwrap();
        let group = root.add_type(id, "G").unwrap();
        root.set_group(group, true).unwrap();
        root.add_field(group, Field::new("v", 1, "int32")).unwrap();
        root.add_field(id, Field::new("g", 1, "G")).unwrap();
        let ty = root.get_type("M").unwrap();
        assert!(ty.decode(vec![0x0B, 0x08, 0x01]).is_err());
        // end-group for the wrong field
        assert!(ty.decode(vec![0x0B, 0x08, 0x01, 0x14]).is_err());
        assert!(ty.decode(vec![0x0B, 0x08, 0x01, 0x0C]).is_ok());
    }

    #[test]
    fn test_unknown_groups_are_bounded_and_matched() {
        let root = root_with(vec![Field::new("v", 2, "int32")]);
        let ty = root.get_type("M").unwrap();

        assert!(matches!(
            ty.decode(vec![0x0B; 1_000_000]),
            Err(Error::RecursionLimit { .. })
        ));
        // unknown group 1 closed by an end-group for field 3
        assert!(matches!(
            ty.decode(vec![0x0B, 0x1C, 0x10, 0x05]),
            Err(Error::InvalidWireType { wire_type: 4, .. })
        ));

        let msg = ty.decode(vec![0x0B, 0x08, 0x01, 0x0C, 0x10, 0x05]).unwrap();
        assert_eq!(msg.get(2), Some(&Value::I32(5)));
    }

    #[test]
    fn test_recursion_limit() {
        let mut root = Root::new();
        let id = root.add_type(NodeId::ROOT, "Node").unwrap();
        root.add_field(id, Field::new("child", 1, "Node")).unwrap();
        let ty = root.get_type("Node").unwrap();

        let mut msg = ty.create();
        for _ in 0..RECURSION_LIMIT + 5 {
            let mut parent = ty.create();
            parent.insert(1, Value::Message(msg));
            msg = parent;
        }
        let bytes = ty.encode(&msg).unwrap();
        assert!(matches!(
            ty.decode(bytes),
            Err(Error::RecursionLimit { .. })
        ));
    }

    #[test]
    fn test_long_signedness() {
        let root = root_with(vec![
            Field::new("s", 1, "int64"),
            Field::new("u", 2, "uint64"),
            Field::new("z", 3, "sint64"),
        ]);
        let ty = root.get_type("M").unwrap();
        let bytes = vec![
            0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x10, 0xFF, 0xFF,
            0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x18, 0x03,
        ];
        let msg = ty.decode(bytes).unwrap();
        assert_eq!(msg.get(1), Some(&Value::I64(Int64::NEG_ONE)));
        assert_eq!(msg.get(2), Some(&Value::I64(Int64::MAX_UNSIGNED_VALUE)));
        assert_eq!(msg.get(3), Some(&Value::I64(Int64::from_i64(-2))));
    }
}
