//! Import of compiled `FileDescriptorSet`s.
//!
//! `protoc --descriptor_set_out` (or `buf build -o`) produces a binary
//! `google.protobuf.FileDescriptorSet`. Importing one gives the same tree
//! a JSON descriptor would: packages become namespaces, map entry types
//! collapse into map fields, and synthetic proto3 `optional` oneofs are
//! dropped in favor of explicit presence.

use super::{Field, Method, NodeId, OneOf, ProtoSyntax, Root, Rule};
use crate::error::{Error, Result};
use prost::Message as _;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    FileDescriptorSet, ServiceDescriptorProto,
};
use serde_json::Value as JsonValue;
use tracing::debug;

impl Root {
    /// Builds a root from the bytes of a serialized `FileDescriptorSet`
    pub fn from_descriptor_set_bytes(bytes: &[u8]) -> Result<Root> {
        let set = FileDescriptorSet::decode(bytes)?;
        let mut root = Root::new();
        root.add_file_descriptor_set(&set)?;
        Ok(root)
    }

    /// Adds every file of a descriptor set
    pub fn add_file_descriptor_set(&mut self, set: &FileDescriptorSet) -> Result<()> {
        for file in &set.file {
            self.add_file_descriptor(file)?;
        }
        Ok(())
    }

    /// Adds the declarations of one `.proto` file
    pub fn add_file_descriptor(&mut self, file: &FileDescriptorProto) -> Result<()> {
        let syntax = ProtoSyntax::try_from(file.syntax())?;
        let package = self.define_namespace(file.package())?;

        for message in &file.message_type {
            let id = self.add_message_descriptor(package, message, syntax)?;
            self.set_syntax(id, syntax)?;
        }
        for enum_type in &file.enum_type {
            self.add_enum_descriptor(package, enum_type)?;
        }
        for service in &file.service {
            self.add_service_descriptor(package, service)?;
        }
        for ext in &file.extension {
            let field = field_from_descriptor(ext, syntax, None)?;
            self.add_extension(package, field)?;
        }

        debug!(
            file = file.name(),
            package = file.package(),
            syntax = syntax.as_str(),
            messages = file.message_type.len(),
            "added file descriptor"
        );
        Ok(())
    }

    fn add_message_descriptor(
        &mut self,
        parent: NodeId,
        message: &DescriptorProto,
        syntax: ProtoSyntax,
    ) -> Result<NodeId> {
        let id = self.add_type(parent, message.name())?;

        let map_entries: Vec<&DescriptorProto> = message
            .nested_type
            .iter()
            .filter(|nested| nested.options.as_ref().and_then(|o| o.map_entry) == Some(true))
            .collect();
        for nested in &message.nested_type {
            if !map_entries.iter().any(|entry| entry.name() == nested.name()) {
                self.add_message_descriptor(id, nested, syntax)?;
            }
        }
        for enum_type in &message.enum_type {
            self.add_enum_descriptor(id, enum_type)?;
        }

        for range in &message.reserved_range {
            let hi = inclusive_end(message.name(), "reserved", range.end())?;
            self.add_reserved_range(id, range.start(), hi)?;
        }
        for name in &message.reserved_name {
            self.add_reserved_name(id, name)?;
        }
        for range in &message.extension_range {
            let hi = inclusive_end(message.name(), "extension", range.end())?;
            let bound = |value: i32| {
                u32::try_from(value).map_err(|_| {
                    Error::invalid_descriptor(
                        message.name(),
                        format!("extension range {} to {} is negative", range.start(), range.end()),
                    )
                })
            };
            self.add_extension_range(id, bound(range.start())?, bound(hi)?)?;
        }

        for field in &message.field {
            let map_entry = (field.r#type() == Type::Message)
                .then(|| {
                    let entry_name = field.type_name().rsplit('.').next().unwrap_or_default();
                    map_entries.iter().find(|entry| entry.name() == entry_name)
                })
                .flatten();
            let converted = field_from_descriptor(field, syntax, map_entry.copied())?;
            self.add_field(id, converted)?;

            if field.r#type() == Type::Group {
                let group_name = field.type_name().rsplit('.').next().unwrap_or_default();
                if let Some(group) = self.child(id, group_name) {
                    self.set_group(group, true)?;
                }
            }
        }

        for (index, oneof) in message.oneof_decl.iter().enumerate() {
            let members: Vec<&str> = message
                .field
                .iter()
                .filter(|f| f.oneof_index == Some(index as i32) && !f.proto3_optional())
                .map(|f| f.name())
                .collect();
            if !members.is_empty() {
                self.add_oneof(id, OneOf::new(oneof.name(), members))?;
            }
        }

        for ext in &message.extension {
            let field = field_from_descriptor(ext, syntax, None)?;
            self.add_extension(id, field)?;
        }
        Ok(id)
    }

    fn add_enum_descriptor(&mut self, parent: NodeId, enum_type: &EnumDescriptorProto) -> Result<()> {
        let id = self.add_enum(parent, enum_type.name())?;
        if enum_type.options.as_ref().and_then(|o| o.allow_alias) == Some(true) {
            self.set_option(id, "allow_alias", true)?;
        }
        for range in &enum_type.reserved_range {
            // enum reserved ranges are inclusive on both ends
            self.add_reserved_range(id, range.start(), range.end())?;
        }
        for name in &enum_type.reserved_name {
            self.add_reserved_name(id, name)?;
        }
        for value in &enum_type.value {
            self.add_enum_value(id, value.name(), value.number())?;
        }
        Ok(())
    }

    fn add_service_descriptor(
        &mut self,
        parent: NodeId,
        service: &ServiceDescriptorProto,
    ) -> Result<()> {
        let id = self.add_service(parent, service.name())?;
        for method in &service.method {
            self.add_method(
                id,
                Method::new(method.name(), method.input_type(), method.output_type())
                    .request_stream(method.client_streaming())
                    .response_stream(method.server_streaming()),
            )?;
        }
        Ok(())
    }
}

/// Turns an exclusive range end into an inclusive one
fn inclusive_end(owner: &str, what: &str, end: i32) -> Result<i32> {
    end.checked_sub(1).ok_or_else(|| {
        Error::invalid_descriptor(owner, format!("{what} range end {end} is out of bounds"))
    })
}

fn field_from_descriptor(
    field: &FieldDescriptorProto,
    syntax: ProtoSyntax,
    map_entry: Option<&DescriptorProto>,
) -> Result<Field> {
    let number = u32::try_from(field.number()).map_err(|_| {
        Error::invalid_descriptor(field.name(), format!("invalid field number {}", field.number()))
    })?;

    let mut converted = match map_entry {
        Some(entry) => {
            let key = entry.field.iter().find(|f| f.number() == 1);
            let value = entry.field.iter().find(|f| f.number() == 2);
            match (key, value) {
                (Some(key), Some(value)) => {
                    Field::map(field.name(), number, type_name_of(key), type_name_of(value))
                }
                _ => {
                    return Err(Error::invalid_descriptor(
                        entry.name(),
                        "map entry without key and value fields",
                    ))
                }
            }
        }
        None => {
            let rule = match field.label() {
                Label::Repeated => Rule::Repeated,
                Label::Required => Rule::Required,
                Label::Optional if syntax == ProtoSyntax::Proto2 || field.proto3_optional() => {
                    Rule::Optional
                }
                Label::Optional => Rule::Singular,
            };
            Field::new(field.name(), number, type_name_of(field)).with_rule(rule)
        }
    };

    if let Some(packed) = field.options.as_ref().and_then(|o| o.packed) {
        converted = converted.packed(packed);
    }
    if field.default_value.is_some() {
        converted = converted.with_option("default", default_option(field));
    }
    if field.extendee.is_some() {
        converted = converted.extending(field.extendee());
    }
    Ok(converted)
}

fn type_name_of(field: &FieldDescriptorProto) -> String {
    let scalar = match field.r#type() {
        Type::Double => "double",
        Type::Float => "float",
        Type::Int64 => "int64",
        Type::Uint64 => "uint64",
        Type::Int32 => "int32",
        Type::Fixed64 => "fixed64",
        Type::Fixed32 => "fixed32",
        Type::Bool => "bool",
        Type::String => "string",
        Type::Bytes => "bytes",
        Type::Uint32 => "uint32",
        Type::Sfixed32 => "sfixed32",
        Type::Sfixed64 => "sfixed64",
        Type::Sint32 => "sint32",
        Type::Sint64 => "sint64",
        Type::Group | Type::Message | Type::Enum => return field.type_name().to_string(),
    };
    scalar.to_string()
}

/// Converts a textual `default_value` into the JSON form used by options
fn default_option(field: &FieldDescriptorProto) -> JsonValue {
    let text = field.default_value();
    match field.r#type() {
        Type::Bool => JsonValue::Bool(text == "true"),
        Type::Double | Type::Float => match text {
            "inf" | "-inf" | "nan" => JsonValue::from(text),
            _ => text.parse::<f64>().map_or_else(|_| JsonValue::from(text), JsonValue::from),
        },
        Type::Int32 | Type::Sint32 | Type::Sfixed32 | Type::Int64 | Type::Sint64 | Type::Sfixed64 => {
            text.parse::<i64>().map_or_else(|_| JsonValue::from(text), JsonValue::from)
        }
        Type::Uint32 | Type::Fixed32 | Type::Uint64 | Type::Fixed64 => {
            text.parse::<u64>().map_or_else(|_| JsonValue::from(text), JsonValue::from)
        }
        _ => JsonValue::from(text),
    }
}
