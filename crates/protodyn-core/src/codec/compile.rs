//! Per-type codec plans.
//!
//! A [`Compiled`] plan is the interpreter's view of one message type: every
//! field's resolved kind, shape, wire ordering and default, computed once
//! and cached on the type until its field set changes.

use super::convert;
use crate::error::{Error, Result};
use crate::message::Value;
use crate::schema::{FieldKind, NodeId, ProtoSyntax, Root, Rule, Scalar};
use bytes::Bytes;
use std::collections::HashMap;
use tracing::debug;

/// How a field's values are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    /// At most one value
    Singular,
    /// A list of values, optionally written as one packed run
    Repeated { packed: bool },
    /// Key/value entries written as nested two-field messages
    Map { key: Scalar },
}

/// Everything the codec needs to know about one field
#[derive(Debug, Clone)]
pub(crate) struct FieldPlan {
    pub(crate) name: String,
    pub(crate) id: u32,
    pub(crate) kind: FieldKind,
    pub(crate) shape: Shape,
    pub(crate) required: bool,
    /// Index into [`Compiled::oneofs`]
    pub(crate) oneof: Option<usize>,
    /// Message value written as start/end group
    pub(crate) group: bool,
    /// Value reported for an unset singular field; `None` for messages
    pub(crate) default: Option<Value>,
}

impl FieldPlan {
    pub(crate) fn is_packable(&self) -> bool {
        match self.kind {
            FieldKind::Scalar(scalar) => scalar.is_packable(),
            FieldKind::Enum(_) => true,
            FieldKind::Message(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OneofPlan {
    pub(crate) name: String,
    /// Indices into [`Compiled::fields`]
    pub(crate) members: Vec<usize>,
}

/// The cached codec plan of a message type
#[derive(Debug, Clone)]
pub(crate) struct Compiled {
    pub(crate) type_id: NodeId,
    pub(crate) full_name: String,
    /// Fields in declaration order
    pub(crate) fields: Vec<FieldPlan>,
    /// Field indices in ascending id order
    pub(crate) wire_order: Vec<usize>,
    pub(crate) by_id: HashMap<u32, usize>,
    pub(crate) by_name: HashMap<String, usize>,
    pub(crate) oneofs: Vec<OneofPlan>,
}

impl Compiled {
    pub(crate) fn build(root: &Root, type_id: NodeId) -> Result<Self> {
        let data = root.type_data(type_id)?;
        let full_name = root.full_name(type_id);
        let syntax = root.effective_syntax(type_id);

        let mut fields = Vec::with_capacity(data.fields().len());
        for field in data.fields() {
            let kind = root.resolve_field_kind(type_id, field)?;
            let shape = match field.key_type() {
                Some(key) => Shape::Map {
                    key: Scalar::from_name(key).ok_or_else(|| Error::InvalidKeyType {
                        key_type: key.to_string(),
                        field: format!("{full_name}.{}", field.name()),
                    })?,
                },
                None if field.rule() == Rule::Repeated => Shape::Repeated { packed: false },
                None => Shape::Singular,
            };
            let group = match kind {
                FieldKind::Message(target) => root.as_type(target).is_some_and(|t| t.is_group()),
                _ => false,
            };
            let oneof = field
                .oneof()
                .and_then(|name| data.oneofs().iter().position(|o| o.name() == name));

            let mut plan = FieldPlan {
                name: field.name().to_string(),
                id: field.id(),
                kind,
                shape,
                required: field.is_required(),
                oneof,
                group,
                default: None,
            };
            if let Shape::Repeated { .. } = plan.shape {
                let packed = plan.is_packable()
                    && field
                        .packed_option()
                        .unwrap_or(syntax == ProtoSyntax::Proto3);
                plan.shape = Shape::Repeated { packed };
            }
            if plan.shape == Shape::Singular {
                plan.default = default_for(root, &plan, field.options().get("default"))?;
            }
            fields.push(plan);
        }

        let mut wire_order: Vec<usize> = (0..fields.len()).collect();
        wire_order.sort_by_key(|index| fields[*index].id);
        let by_id = fields.iter().enumerate().map(|(i, f)| (f.id, i)).collect();
        let by_name = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        let oneofs = data
            .oneofs()
            .iter()
            .map(|oneof| OneofPlan {
                name: oneof.name().to_string(),
                members: oneof
                    .fields()
                    .iter()
                    .filter_map(|member| fields.iter().position(|f| &f.name == member))
                    .collect(),
            })
            .collect();

        debug!(type_name = %full_name, fields = fields.len(), "compiled codec plan");
        Ok(Self {
            type_id,
            full_name,
            fields,
            wire_order,
            by_id,
            by_name,
            oneofs,
        })
    }

    pub(crate) fn field(&self, name: &str) -> Result<(usize, &FieldPlan)> {
        self.by_name
            .get(name)
            .map(|index| (*index, &self.fields[*index]))
            .ok_or_else(|| Error::not_found(format!("field {}.{name}", self.full_name)))
    }

    pub(crate) fn oneof(&self, name: &str) -> Result<&OneofPlan> {
        self.oneofs
            .iter()
            .find(|o| o.name == name)
            .ok_or_else(|| Error::not_found(format!("oneof {}.{name}", self.full_name)))
    }
}

/// The value an unset singular field reads as: the declared `default`
/// option when present, the type's zero value otherwise
fn default_for(
    root: &Root,
    plan: &FieldPlan,
    declared: Option<&serde_json::Value>,
) -> Result<Option<Value>> {
    match (plan.kind, declared) {
        (FieldKind::Message(_), _) => Ok(None),
        // escaped text as written in the schema, not base64
        (FieldKind::Scalar(Scalar::Bytes), Some(serde_json::Value::String(text))) => {
            Ok(Some(Value::Bytes(Bytes::from(text.clone().into_bytes()))))
        }
        (kind, Some(json)) => convert::value_from_json(root, &plan.name, kind, json)
            .map(Some)
            .map_err(|err| {
                Error::invalid_descriptor(&plan.name, format!("invalid default value: {err}"))
            }),
        (FieldKind::Scalar(scalar), None) => Ok(Some(scalar.default_value())),
        (FieldKind::Enum(enum_id), None) => Ok(Some(Value::Enum(
            root.as_enum(enum_id).map_or(0, |e| e.default_value()),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::long::Int64;
    use crate::schema::Field;

    #[test]
    fn test_plan_shapes_and_order() {
        let mut root = Root::new();
        let e = root.add_enum(NodeId::ROOT, "E").unwrap();
        root.add_enum_value(e, "FIRST", 3).unwrap();
        let ty = root.add_type(NodeId::ROOT, "M").unwrap();
        root.add_field(ty, Field::new("z", 9, "string")).unwrap();
        root.add_field(ty, Field::new("r", 2, "int32").repeated()).unwrap();
        root.add_field(ty, Field::new("s", 3, "string").repeated()).unwrap();
        root.add_field(ty, Field::new("u", 4, "uint32").repeated().packed(false))
            .unwrap();
        root.add_field(ty, Field::map("m", 5, "int64", "E")).unwrap();
        root.add_field(ty, Field::new("e", 6, "E")).unwrap();
        root.add_field(ty, Field::new("d", 7, "sint64").with_option("default", "-42"))
            .unwrap();

        let plan = Compiled::build(&root, ty).unwrap();
        let ids: Vec<u32> = plan.wire_order.iter().map(|i| plan.fields[*i].id).collect();
        assert_eq!(ids, vec![2, 3, 4, 5, 6, 7, 9]);
        assert_eq!(plan.field("r").unwrap().1.shape, Shape::Repeated { packed: true });
        assert_eq!(plan.field("s").unwrap().1.shape, Shape::Repeated { packed: false });
        assert_eq!(plan.field("u").unwrap().1.shape, Shape::Repeated { packed: false });
        assert_eq!(plan.field("m").unwrap().1.shape, Shape::Map { key: Scalar::Int64 });
        assert_eq!(plan.field("e").unwrap().1.default, Some(Value::Enum(3)));
        assert_eq!(
            plan.field("d").unwrap().1.default,
            Some(Value::I64(Int64::from_i64(-42)))
        );
        assert!(plan.field("missing").is_err());
    }

    #[test]
    fn test_proto2_is_unpacked_by_default() {
        let mut root = Root::new();
        let ty = root.add_type(NodeId::ROOT, "M").unwrap();
        root.set_syntax(ty, ProtoSyntax::Proto2).unwrap();
        root.add_field(ty, Field::new("r", 1, "int32").repeated()).unwrap();
        root.add_field(ty, Field::new("p", 2, "int32").repeated().packed(true))
            .unwrap();
        let plan = Compiled::build(&root, ty).unwrap();
        assert_eq!(plan.fields[0].shape, Shape::Repeated { packed: false });
        assert_eq!(plan.fields[1].shape, Shape::Repeated { packed: true });
    }

    #[test]
    fn test_bad_default_is_a_descriptor_error() {
        let mut root = Root::new();
        let ty = root.add_type(NodeId::ROOT, "M").unwrap();
        root.add_field(ty, Field::new("b", 1, "bool").with_option("default", "yes"))
            .unwrap();
        assert!(matches!(
            Compiled::build(&root, ty),
            Err(Error::InvalidDescriptor { .. })
        ));
    }
}
