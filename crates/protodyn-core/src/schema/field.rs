//! Fields, oneofs and the scalar type table.

use super::{NodeId, Options};
use crate::long::Int64;
use crate::message::Value;
use crate::wire::WireType;
use bytes::Bytes;
use serde_json::Value as JsonValue;

/// The protobuf scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    /// `double`
    Double,
    /// `float`
    Float,
    /// `int32`
    Int32,
    /// `int64`
    Int64,
    /// `uint32`
    Uint32,
    /// `uint64`
    Uint64,
    /// `sint32`
    Sint32,
    /// `sint64`
    Sint64,
    /// `fixed32`
    Fixed32,
    /// `fixed64`
    Fixed64,
    /// `sfixed32`
    Sfixed32,
    /// `sfixed64`
    Sfixed64,
    /// `bool`
    Bool,
    /// `string`
    String,
    /// `bytes`
    Bytes,
}

impl Scalar {
    /// Looks up a scalar by its schema keyword
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "double" => Scalar::Double,
            "float" => Scalar::Float,
            "int32" => Scalar::Int32,
            "int64" => Scalar::Int64,
            "uint32" => Scalar::Uint32,
            "uint64" => Scalar::Uint64,
            "sint32" => Scalar::Sint32,
            "sint64" => Scalar::Sint64,
            "fixed32" => Scalar::Fixed32,
            "fixed64" => Scalar::Fixed64,
            "sfixed32" => Scalar::Sfixed32,
            "sfixed64" => Scalar::Sfixed64,
            "bool" => Scalar::Bool,
            "string" => Scalar::String,
            "bytes" => Scalar::Bytes,
            _ => return None,
        })
    }

    /// The schema keyword
    pub fn name(&self) -> &'static str {
        match self {
            Scalar::Double => "double",
            Scalar::Float => "float",
            Scalar::Int32 => "int32",
            Scalar::Int64 => "int64",
            Scalar::Uint32 => "uint32",
            Scalar::Uint64 => "uint64",
            Scalar::Sint32 => "sint32",
            Scalar::Sint64 => "sint64",
            Scalar::Fixed32 => "fixed32",
            Scalar::Fixed64 => "fixed64",
            Scalar::Sfixed32 => "sfixed32",
            Scalar::Sfixed64 => "sfixed64",
            Scalar::Bool => "bool",
            Scalar::String => "string",
            Scalar::Bytes => "bytes",
        }
    }

    /// Wire type used for a single value
    pub fn wire_type(&self) -> WireType {
        match self {
            Scalar::Double | Scalar::Fixed64 | Scalar::Sfixed64 => WireType::I64,
            Scalar::Float | Scalar::Fixed32 | Scalar::Sfixed32 => WireType::I32,
            Scalar::String | Scalar::Bytes => WireType::Len,
            _ => WireType::Varint,
        }
    }

    /// Whether repeated values of this type can be packed
    pub fn is_packable(&self) -> bool {
        !matches!(self, Scalar::String | Scalar::Bytes)
    }

    /// Whether the value exceeds 32 bits on the wire
    pub fn is_long(&self) -> bool {
        matches!(
            self,
            Scalar::Int64 | Scalar::Uint64 | Scalar::Sint64 | Scalar::Fixed64 | Scalar::Sfixed64
        )
    }

    /// Whether 64-bit values of this type are unsigned
    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            Scalar::Uint32 | Scalar::Uint64 | Scalar::Fixed32 | Scalar::Fixed64
        )
    }

    /// Whether the type may be used as a map key
    pub fn is_valid_map_key(&self) -> bool {
        !matches!(self, Scalar::Double | Scalar::Float | Scalar::Bytes)
    }

    /// The zero value of the type
    pub fn default_value(&self) -> Value {
        match self {
            Scalar::Double => Value::F64(0.0),
            Scalar::Float => Value::F32(0.0),
            Scalar::Int32 | Scalar::Sint32 | Scalar::Sfixed32 => Value::I32(0),
            Scalar::Uint32 | Scalar::Fixed32 => Value::U32(0),
            Scalar::Int64 | Scalar::Sint64 | Scalar::Sfixed64 => Value::I64(Int64::ZERO),
            Scalar::Uint64 | Scalar::Fixed64 => Value::I64(Int64::UZERO),
            Scalar::Bool => Value::Bool(false),
            Scalar::String => Value::String(String::new()),
            Scalar::Bytes => Value::Bytes(Bytes::new()),
        }
    }
}

/// Field cardinality as declared in the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rule {
    /// No label: implicit presence
    #[default]
    Singular,
    /// `optional`: explicit presence
    Optional,
    /// `required`
    Required,
    /// `repeated`
    Repeated,
}

impl Rule {
    /// Parses the descriptor JSON spelling
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "optional" => Some(Rule::Optional),
            "required" => Some(Rule::Required),
            "repeated" => Some(Rule::Repeated),
            _ => None,
        }
    }

    /// The descriptor JSON spelling, `None` for singular fields
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            Rule::Singular => None,
            Rule::Optional => Some("optional"),
            Rule::Required => Some("required"),
            Rule::Repeated => Some("repeated"),
        }
    }
}

/// What a field's type name resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// A scalar keyword
    Scalar(Scalar),
    /// An enum in the same tree
    Enum(NodeId),
    /// A message type in the same tree
    Message(NodeId),
}

/// A field of a message type. A field with a key type is a map field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) id: u32,
    pub(crate) type_name: String,
    pub(crate) rule: Rule,
    pub(crate) key_type: Option<String>,
    pub(crate) options: Options,
    pub(crate) extend: Option<String>,
    pub(crate) oneof: Option<String>,
    pub(crate) resolved: Option<FieldKind>,
    /// Scope that declared this field when it was installed by an `extend`
    pub(crate) extension_scope: Option<NodeId>,
}

impl Field {
    /// Creates a singular field
    pub fn new(name: impl Into<String>, id: u32, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id,
            type_name: type_name.into(),
            rule: Rule::Singular,
            key_type: None,
            options: Options::new(),
            extend: None,
            oneof: None,
            resolved: None,
            extension_scope: None,
        }
    }

    /// Creates a map field
    pub fn map(
        name: impl Into<String>,
        id: u32,
        key_type: impl Into<String>,
        value_type: impl Into<String>,
    ) -> Self {
        let mut field = Self::new(name, id, value_type);
        field.key_type = Some(key_type.into());
        field
    }

    /// Sets the rule
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rule = rule;
        self
    }

    /// Marks the field repeated
    pub fn repeated(self) -> Self {
        self.with_rule(Rule::Repeated)
    }

    /// Marks the field required
    pub fn required(self) -> Self {
        self.with_rule(Rule::Required)
    }

    /// Marks the field optional with explicit presence
    pub fn optional(self) -> Self {
        self.with_rule(Rule::Optional)
    }

    /// Sets an option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Sets the `packed` option
    pub fn packed(self, packed: bool) -> Self {
        self.with_option("packed", packed)
    }

    /// Declares this field as an extension of another type
    pub fn extending(mut self, extendee: impl Into<String>) -> Self {
        self.extend = Some(extendee.into());
        self
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Type name as written in the schema
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Declared rule
    pub fn rule(&self) -> Rule {
        self.rule
    }

    /// Key type for map fields
    pub fn key_type(&self) -> Option<&str> {
        self.key_type.as_deref()
    }

    /// Field options
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Name of the extended type for extension fields
    pub fn extend(&self) -> Option<&str> {
        self.extend.as_deref()
    }

    /// Name of the oneof this field belongs to
    pub fn oneof(&self) -> Option<&str> {
        self.oneof.as_deref()
    }

    /// Resolved type, once resolution has run
    pub fn resolved(&self) -> Option<FieldKind> {
        self.resolved
    }

    /// Whether this is a map field
    pub fn is_map(&self) -> bool {
        self.key_type.is_some()
    }

    /// Whether this is an ordinary repeated field
    pub fn is_repeated(&self) -> bool {
        self.rule == Rule::Repeated
    }

    /// Whether this field is required
    pub fn is_required(&self) -> bool {
        self.rule == Rule::Required
    }

    /// The explicit `packed` option, if set
    pub fn packed_option(&self) -> Option<bool> {
        self.options.get("packed").and_then(JsonValue::as_bool)
    }

    /// Whether this field was installed into its type by an `extend`
    pub fn is_extension(&self) -> bool {
        self.extension_scope.is_some()
    }
}

/// A set of mutually exclusive fields
#[derive(Debug, Clone, PartialEq)]
pub struct OneOf {
    pub(crate) name: String,
    pub(crate) fields: Vec<String>,
    pub(crate) options: Options,
}

impl OneOf {
    /// Creates a oneof over the named member fields
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            options: Options::new(),
        }
    }

    /// Oneof name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member field names in declaration order
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Oneof options
    pub fn options(&self) -> &Options {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_table() {
        for name in ["double", "int32", "sfixed64", "bool", "string", "bytes"] {
            assert_eq!(Scalar::from_name(name).unwrap().name(), name);
        }
        assert_eq!(Scalar::from_name("Foo"), None);
        assert_eq!(Scalar::Double.wire_type(), WireType::I64);
        assert_eq!(Scalar::Sfixed32.wire_type(), WireType::I32);
        assert_eq!(Scalar::Sint64.wire_type(), WireType::Varint);
        assert!(!Scalar::Bytes.is_packable());
        assert!(Scalar::Bool.is_valid_map_key());
        assert!(!Scalar::Float.is_valid_map_key());
        assert_eq!(Scalar::Fixed64.default_value(), Value::I64(Int64::UZERO));
    }

    #[test]
    fn test_field_builders() {
        let field = Field::new("r", 1, "int32").repeated().packed(true);
        assert!(field.is_repeated());
        assert_eq!(field.packed_option(), Some(true));
        assert!(!field.is_map());

        let map = Field::map("m", 2, "string", "int64");
        assert!(map.is_map());
        assert_eq!(map.key_type(), Some("string"));
        assert_eq!(map.rule(), Rule::Singular);

        assert_eq!(Rule::from_name("required"), Some(Rule::Required));
        assert_eq!(Rule::Singular.as_str(), None);
    }
}
