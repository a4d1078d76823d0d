//! Dynamic message instances.
//!
//! A [`Message`] holds only the fields that are populated, keyed by field
//! id. Name-based access, defaults and oneof handling live on
//! [`TypeRef`](crate::TypeRef), which knows the schema.

use crate::long::Int64;
use crate::schema::NodeId;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;

/// A field value as it travels over the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `bool`
    Bool(bool),
    /// `int32`, `sint32`, `sfixed32`
    I32(i32),
    /// `uint32`, `fixed32`
    U32(u32),
    /// Any 64-bit integer type; signedness follows the field type
    I64(Int64),
    /// `float`
    F32(f32),
    /// `double`
    F64(f64),
    /// `string`
    String(String),
    /// `bytes`
    Bytes(Bytes),
    /// An enum number
    Enum(i32),
    /// A nested message
    Message(Message),
    /// The elements of a repeated field
    List(Vec<Value>),
    /// The entries of a map field
    Map(BTreeMap<MapKey, Value>),
}

impl Value {
    /// Short name of the variant, for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::I32(_) => "int32",
            Value::U32(_) => "uint32",
            Value::I64(_) => "int64",
            Value::F32(_) => "float",
            Value::F64(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Enum(_) => "enum",
            Value::Message(_) => "message",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Any integer value, truncated to 32 bits
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) | Value::Enum(v) => Some(*v),
            Value::U32(v) => Some(*v as i32),
            Value::I64(v) => Some(v.low() as i32),
            _ => None,
        }
    }

    /// Any integer value, truncated to 32 bits
    pub fn as_u32(&self) -> Option<u32> {
        self.as_i32().map(|v| v as u32)
    }

    /// Any integer value, widened to 64 bits
    pub fn as_int64(&self) -> Option<Int64> {
        match self {
            Value::I32(v) | Value::Enum(v) => Some(Int64::from(*v)),
            Value::U32(v) => Some(Int64::from(*v)),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Any numeric value as a double
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(f64::from(*v)),
            Value::F64(v) => Some(*v),
            Value::I32(v) | Value::Enum(v) => Some(f64::from(*v)),
            Value::U32(v) => Some(f64::from(*v)),
            Value::I64(v) => Some(v.to_f64()),
            _ => None,
        }
    }

    /// The boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The string payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The bytes payload
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The nested message
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }

    /// The repeated elements
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The map entries
    pub fn as_map(&self) -> Option<&BTreeMap<MapKey, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Merges `other` into this value: messages merge field by field,
    /// lists and maps are extended, anything else is replaced
    pub fn merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Message(existing), Value::Message(incoming)) => existing.merge_from(incoming),
            (Value::List(existing), Value::List(incoming)) => existing.extend(incoming),
            (Value::Map(existing), Value::Map(incoming)) => existing.extend(incoming),
            (slot, value) => *slot = value,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<Int64> for Value {
    fn from(v: Int64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Message> for Value {
    fn from(v: Message) -> Self {
        Value::Message(v)
    }
}

/// A map field key. Only integral, boolean and string keys exist.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    /// `bool` key
    Bool(bool),
    /// `int32`, `sint32`, `sfixed32` key
    I32(i32),
    /// `uint32`, `fixed32` key
    U32(u32),
    /// `int64`, `sint64`, `sfixed64` key
    I64(i64),
    /// `uint64`, `fixed64` key
    U64(u64),
    /// `string` key
    String(String),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Bool(v) => write!(f, "{v}"),
            MapKey::I32(v) => write!(f, "{v}"),
            MapKey::U32(v) => write!(f, "{v}"),
            MapKey::I64(v) => write!(f, "{v}"),
            MapKey::U64(v) => write!(f, "{v}"),
            MapKey::String(v) => f.write_str(v),
        }
    }
}

impl From<&str> for MapKey {
    fn from(v: &str) -> Self {
        MapKey::String(v.to_string())
    }
}

impl From<i32> for MapKey {
    fn from(v: i32) -> Self {
        MapKey::I32(v)
    }
}

/// A message instance: the populated fields of one message type.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    type_id: NodeId,
    fields: BTreeMap<u32, Value>,
}

impl Message {
    /// Creates an empty message of the given type
    pub fn new(type_id: NodeId) -> Self {
        Self {
            type_id,
            fields: BTreeMap::new(),
        }
    }

    /// The type this message was created for
    pub fn type_id(&self) -> NodeId {
        self.type_id
    }

    /// The value of field `id`, if populated
    pub fn get(&self, id: u32) -> Option<&Value> {
        self.fields.get(&id)
    }

    /// Mutable access to field `id`, if populated
    pub fn get_mut(&mut self, id: u32) -> Option<&mut Value> {
        self.fields.get_mut(&id)
    }

    /// Whether field `id` is populated
    pub fn contains(&self, id: u32) -> bool {
        self.fields.contains_key(&id)
    }

    /// Stores a raw value, bypassing schema checks and oneof handling
    pub fn insert(&mut self, id: u32, value: Value) -> Option<Value> {
        self.fields.insert(id, value)
    }

    /// Removes field `id`
    pub fn remove(&mut self, id: u32) -> Option<Value> {
        self.fields.remove(&id)
    }

    /// Populated fields in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.fields.iter().map(|(id, v)| (*id, v))
    }

    /// Number of populated fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field is populated
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Merges every field of `other` into this message
    pub fn merge_from(&mut self, other: Message) {
        for (id, incoming) in other.fields {
            match self.fields.get_mut(&id) {
                Some(existing) => existing.merge(incoming),
                None => {
                    self.fields.insert(id, incoming);
                }
            }
        }
    }

    pub(crate) fn entry(&mut self, id: u32) -> std::collections::btree_map::Entry<'_, u32, Value> {
        self.fields.entry(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::U32(u32::MAX).as_i32(), Some(-1));
        assert_eq!(Value::Enum(3).as_int64(), Some(Int64::from(3)));
        assert_eq!(Value::F32(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::Bool(true).as_i32(), None);
        assert_eq!(Value::List(vec![]).kind_name(), "list");
    }

    #[test]
    fn test_map_key_order_and_display() {
        let mut keys = vec![MapKey::I64(5), MapKey::I64(-3), MapKey::I64(0)];
        keys.sort();
        assert_eq!(keys, vec![MapKey::I64(-3), MapKey::I64(0), MapKey::I64(5)]);
        assert_eq!(MapKey::Bool(true).to_string(), "true");
        assert_eq!(MapKey::from("k").to_string(), "k");
    }

    #[test]
    fn test_message_fields() {
        let mut msg = Message::new(NodeId::ROOT);
        assert!(msg.is_empty());
        msg.insert(2, Value::I32(7));
        msg.insert(1, Value::from("a"));
        let ids: Vec<u32> = msg.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(msg.contains(2));
        assert_eq!(msg.remove(2), Some(Value::I32(7)));
        assert_eq!(msg.len(), 1);
    }

    #[test]
    fn test_merge_from() {
        let mut inner = Message::new(NodeId::ROOT);
        inner.insert(1, Value::I32(1));
        let mut base = Message::new(NodeId::ROOT);
        base.insert(1, Value::from("old"));
        base.insert(2, Value::List(vec![Value::I32(1)]));
        base.insert(3, Value::Message(inner));

        let mut patch_inner = Message::new(NodeId::ROOT);
        patch_inner.insert(2, Value::Bool(true));
        let mut patch = Message::new(NodeId::ROOT);
        patch.insert(1, Value::from("new"));
        patch.insert(2, Value::List(vec![Value::I32(2)]));
        patch.insert(3, Value::Message(patch_inner));
        base.merge_from(patch);

        assert_eq!(base.get(1), Some(&Value::from("new")));
        assert_eq!(base.get(2), Some(&Value::List(vec![Value::I32(1), Value::I32(2)])));
        let merged = base.get(3).and_then(Value::as_message).unwrap();
        assert_eq!(merged.len(), 2);
    }
}
