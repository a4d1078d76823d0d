//! Schema-driven message codec.
//!
//! [`TypeRef`] is the runtime face of a message type. The first call that
//! needs the wire layout compiles a plan for the type and caches it on the
//! type; every later call reuses the plan until the type's fields change.
//!
//! ## Example
//!
//! ```no_run
//! use protodyn_core::{Root, Value};
//!
//! let root = Root::from_json_str(r#"{"nested":{"M":{"fields":{
//!     "a":{"type":"int32","id":1},
//!     "b":{"type":"string","id":2}}}}}"#)?;
//! let ty = root.get_type("M")?;
//!
//! let mut msg = ty.create();
//! ty.set(&mut msg, "a", Value::I32(-1))?;
//! ty.set(&mut msg, "b", Value::from("hi"))?;
//! let bytes = ty.encode(&msg)?;
//! assert_eq!(ty.decode(bytes)?, msg);
//! # Ok::<(), protodyn_core::Error>(())
//! ```

pub(crate) mod compile;
mod convert;
mod decode;
mod encode;
mod verify;

pub use convert::{BytesFormat, ConversionOptions, EnumFormat, LongFormat};

use crate::error::{Error, Result};
use crate::message::{Message, Value};
use crate::schema::{NodeId, Root, TypeData};
use crate::wire::{Reader, Writer};
use bytes::Bytes;
use compile::{Compiled, Shape};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Maximum nesting of messages and groups accepted by the decoder
pub const RECURSION_LIMIT: usize = 100;

/// Returns the cached plan of `type_id`, compiling it on first use.
///
/// Compiling one type never compiles another, so this is safe to call
/// while another type's plan is borrowed.
pub(crate) fn compiled_for(root: &Root, type_id: NodeId) -> Result<&Compiled> {
    root.type_data(type_id)?
        .compiled
        .get_or_try_init(|| Compiled::build(root, type_id))
}

/// A message type bound to the tree that owns it.
#[derive(Debug, Clone, Copy)]
pub struct TypeRef<'r> {
    root: &'r Root,
    id: NodeId,
}

impl Root {
    /// Looks up a message type by dotted path
    pub fn get_type(&self, path: &str) -> Result<TypeRef<'_>> {
        let id = self.lookup_type(path)?;
        self.type_ref(id)
    }

    /// Wraps the message type `id`
    pub fn type_ref(&self, id: NodeId) -> Result<TypeRef<'_>> {
        self.type_data(id)?;
        Ok(TypeRef { root: self, id })
    }
}

impl<'r> TypeRef<'r> {
    /// Node id of the type
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The tree the type belongs to
    pub fn root(&self) -> &'r Root {
        self.root
    }

    /// Fully qualified name, e.g. `.pkg.Outer.Inner`
    pub fn full_name(&self) -> String {
        self.root.full_name(self.id)
    }

    /// The type's descriptor
    pub fn data(&self) -> Result<&'r TypeData> {
        self.root.type_data(self.id)
    }

    /// Compiles the codec plan now instead of on first use
    pub fn setup(&self) -> Result<()> {
        self.compiled().map(|_| ())
    }

    pub(crate) fn compiled(&self) -> Result<&'r Compiled> {
        compiled_for(self.root, self.id)
    }

    /// Creates an empty instance of this type
    pub fn create(&self) -> Message {
        Message::new(self.id)
    }

    fn check_instance(&self, message: &Message) -> Result<()> {
        if message.type_id() == self.id {
            return Ok(());
        }
        Err(Error::invalid_value(
            self.full_name(),
            format!(
                "message of type {} given",
                self.root.full_name(message.type_id())
            ),
        ))
    }

    /// Reads field `name`.
    ///
    /// Unset fields read as their default: the declared or zero value for
    /// scalars and enums, an empty list or map for repeated and map
    /// fields. An unset message field reads as `None`.
    pub fn get(&self, message: &Message, name: &str) -> Result<Option<Value>> {
        self.check_instance(message)?;
        let (_, field) = self.compiled()?.field(name)?;
        if let Some(value) = message.get(field.id) {
            return Ok(Some(value.clone()));
        }
        Ok(match field.shape {
            Shape::Repeated { .. } => Some(Value::List(Vec::new())),
            Shape::Map { .. } => Some(Value::Map(BTreeMap::new())),
            Shape::Singular => field.default.clone(),
        })
    }

    /// Whether field `name` is populated
    pub fn has(&self, message: &Message, name: &str) -> Result<bool> {
        self.check_instance(message)?;
        let (_, field) = self.compiled()?.field(name)?;
        Ok(message.contains(field.id))
    }

    /// Stores `value` in field `name`.
    ///
    /// The value is coerced to the field's canonical representation, so a
    /// `Value::I32` stored into an `int64` field reads back as
    /// `Value::I64`. Setting a oneof member clears its siblings.
    pub fn set(&self, message: &mut Message, name: &str, value: Value) -> Result<()> {
        self.check_instance(message)?;
        let plan = self.compiled()?;
        let (_, field) = plan.field(name)?;
        let value = convert::coerce(self.root, field, value)?;
        if let Some(oneof) = field.oneof {
            for member in &plan.oneofs[oneof].members {
                message.remove(plan.fields[*member].id);
            }
        }
        message.insert(field.id, value);
        Ok(())
    }

    /// Unsets field `name`, returning its previous value
    pub fn clear(&self, message: &mut Message, name: &str) -> Result<Option<Value>> {
        self.check_instance(message)?;
        let (_, field) = self.compiled()?.field(name)?;
        Ok(message.remove(field.id))
    }

    /// Name of the populated member of oneof `oneof`, if any
    pub fn which_oneof(&self, message: &Message, oneof: &str) -> Result<Option<&'r str>> {
        self.check_instance(message)?;
        let plan = self.compiled()?;
        Ok(plan
            .oneof(oneof)?
            .members
            .iter()
            .map(|member| &plan.fields[*member])
            .find(|field| message.contains(field.id))
            .map(|field| field.name.as_str()))
    }

    /// Encodes `message` to a fresh buffer
    pub fn encode(&self, message: &Message) -> Result<Bytes> {
        let mut writer = Writer::new();
        self.encode_to(message, &mut writer)?;
        Ok(writer.finish())
    }

    /// Appends the encoding of `message` to `writer`
    pub fn encode_to(&self, message: &Message, writer: &mut Writer) -> Result<()> {
        encode::encode_message(self.root, self.compiled()?, message, writer)
    }

    /// Encodes `message` preceded by its length as a varint
    pub fn encode_delimited(&self, message: &Message) -> Result<Bytes> {
        let mut writer = Writer::new();
        writer.fork();
        self.encode_to(message, &mut writer)?;
        writer.ldelim();
        Ok(writer.finish())
    }

    /// Decodes a whole buffer as one message
    pub fn decode(&self, buf: impl Into<Bytes>) -> Result<Message> {
        self.decode_from(&mut Reader::new(buf), None)
    }

    /// Decodes from `reader`, consuming `length` bytes or everything left
    pub fn decode_from(&self, reader: &mut Reader, length: Option<usize>) -> Result<Message> {
        let plan = self.compiled()?;
        match length {
            Some(length) => {
                let mut sub = Reader::new(reader.slice(length)?);
                decode::decode_message(self.root, plan, &mut sub, None, 0)
            }
            None => decode::decode_message(self.root, plan, reader, None, 0),
        }
    }

    /// Decodes one length-prefixed message from `reader`
    pub fn decode_delimited(&self, reader: &mut Reader) -> Result<Message> {
        let length = reader.uint32()? as usize;
        self.decode_from(reader, Some(length))
    }

    /// Checks a plain object against the type.
    ///
    /// Returns `None` when the object is acceptable, otherwise a short
    /// description of the first problem found.
    pub fn verify(&self, object: &JsonValue) -> Option<String> {
        match self.compiled() {
            Ok(plan) => verify::verify_message(self.root, plan, object, 0),
            Err(err) => Some(err.to_string()),
        }
    }

    /// Builds a message from a plain object
    pub fn from_object(&self, object: &JsonValue) -> Result<Message> {
        convert::from_object(self.root, self.compiled()?, object, 0)
    }

    /// Converts a message to a plain object
    pub fn to_object(&self, message: &Message, options: &ConversionOptions) -> Result<JsonValue> {
        self.check_instance(message)?;
        convert::to_object(self.root, self.compiled()?, message, options, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::long::Int64;
    use crate::schema::{Field, OneOf};
    use pretty_assertions::assert_eq;

    fn scalar_root() -> (Root, NodeId) {
        let mut root = Root::new();
        let ty = root.add_type(NodeId::ROOT, "M").unwrap();
        root.add_field(ty, Field::new("a", 1, "int32")).unwrap();
        root.add_field(ty, Field::new("b", 2, "string")).unwrap();
        (root, ty)
    }

    #[test]
    fn test_scalar_round_trip() {
        let (root, _) = scalar_root();
        let ty = root.get_type("M").unwrap();
        let mut msg = ty.create();
        ty.set(&mut msg, "a", Value::I32(-1)).unwrap();
        ty.set(&mut msg, "b", Value::from("hi")).unwrap();

        let bytes = ty.encode(&msg).unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[
                0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x12, 0x02,
                0x68, 0x69
            ]
        );
        assert_eq!(ty.decode(bytes).unwrap(), msg);
    }

    #[test]
    fn test_lazy_compile_and_invalidation() {
        let (mut root, id) = scalar_root();
        assert!(!root.as_type(id).unwrap().is_compiled());
        root.get_type("M").unwrap().setup().unwrap();
        assert!(root.as_type(id).unwrap().is_compiled());

        root.add_field(id, Field::new("c", 3, "bool")).unwrap();
        assert!(!root.as_type(id).unwrap().is_compiled());
        let ty = root.get_type("M").unwrap();
        let mut msg = ty.create();
        ty.set(&mut msg, "c", Value::Bool(true)).unwrap();
        assert_eq!(ty.encode(&msg).unwrap().as_ref(), &[0x18, 0x01]);
    }

    #[test]
    fn test_get_defaults() {
        let mut root = Root::new();
        let ty = root.add_type(NodeId::ROOT, "M").unwrap();
        root.add_type(NodeId::ROOT, "Inner").unwrap();
        root.add_field(ty, Field::new("n", 1, "uint64")).unwrap();
        root.add_field(ty, Field::new("r", 2, "string").repeated()).unwrap();
        root.add_field(ty, Field::map("m", 3, "string", "int32")).unwrap();
        root.add_field(ty, Field::new("x", 4, "Inner")).unwrap();
        root.add_field(ty, Field::new("s", 5, "string").with_option("default", "dflt"))
            .unwrap();

        let ty = root.get_type("M").unwrap();
        let msg = ty.create();
        assert_eq!(ty.get(&msg, "n").unwrap(), Some(Value::I64(Int64::UZERO)));
        assert_eq!(ty.get(&msg, "r").unwrap(), Some(Value::List(vec![])));
        assert_eq!(ty.get(&msg, "m").unwrap(), Some(Value::Map(BTreeMap::new())));
        assert_eq!(ty.get(&msg, "x").unwrap(), None);
        assert_eq!(ty.get(&msg, "s").unwrap(), Some(Value::from("dflt")));
        assert!(!ty.has(&msg, "s").unwrap());
        assert!(matches!(ty.get(&msg, "nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_set_coerces_and_clears() {
        let (root, _) = scalar_root();
        let ty = root.get_type("M").unwrap();
        let mut msg = ty.create();
        ty.set(&mut msg, "a", Value::U32(7)).unwrap();
        assert_eq!(msg.get(1), Some(&Value::I32(7)));
        assert!(ty.set(&mut msg, "b", Value::Bool(true)).is_err());
        assert_eq!(ty.clear(&mut msg, "a").unwrap(), Some(Value::I32(7)));
        assert!(!ty.has(&msg, "a").unwrap());
    }

    #[test]
    fn test_oneof_exclusivity() {
        let mut root = Root::new();
        let id = root.add_type(NodeId::ROOT, "M").unwrap();
        root.add_field(id, Field::new("a", 1, "int32")).unwrap();
        root.add_field(id, Field::new("b", 2, "string")).unwrap();
        root.add_oneof(id, OneOf::new("choice", ["a", "b"])).unwrap();

        let ty = root.get_type("M").unwrap();
        let mut msg = ty.create();
        ty.set(&mut msg, "a", Value::I32(1)).unwrap();
        assert_eq!(ty.which_oneof(&msg, "choice").unwrap(), Some("a"));
        ty.set(&mut msg, "b", Value::from("x")).unwrap();
        assert!(!ty.has(&msg, "a").unwrap());
        assert!(ty.has(&msg, "b").unwrap());
        assert_eq!(ty.which_oneof(&msg, "choice").unwrap(), Some("b"));
    }

    #[test]
    fn test_wrong_instance_type() {
        let mut root = Root::new();
        root.add_type(NodeId::ROOT, "A").unwrap();
        root.add_type(NodeId::ROOT, "B").unwrap();
        let a = root.get_type("A").unwrap();
        let b = root.get_type("B").unwrap();
        let msg = a.create();
        assert!(matches!(b.encode(&msg), Err(Error::InvalidValue { .. })));
    }

    #[test]
    fn test_delimited_framing() {
        let (root, _) = scalar_root();
        let ty = root.get_type("M").unwrap();
        let mut first = ty.create();
        ty.set(&mut first, "a", Value::I32(150)).unwrap();
        let mut second = ty.create();
        ty.set(&mut second, "b", Value::from("z")).unwrap();

        let mut stream = Vec::new();
        stream.extend_from_slice(&ty.encode_delimited(&first).unwrap());
        stream.extend_from_slice(&ty.encode_delimited(&second).unwrap());
        assert_eq!(&stream[..4], &[0x03, 0x08, 0x96, 0x01]);

        let mut reader = Reader::new(stream);
        assert_eq!(ty.decode_delimited(&mut reader).unwrap(), first);
        assert_eq!(ty.decode_delimited(&mut reader).unwrap(), second);
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_non_type_is_not_found() {
        let mut root = Root::new();
        root.add_enum(NodeId::ROOT, "E").unwrap();
        assert!(root.get_type("E").is_err());
        assert!(root.type_ref(NodeId::ROOT).is_err());
    }

    mod prost_compat {
        use super::*;
        use pretty_assertions::assert_eq;
        use crate::message::MapKey;
        use prost::Message as _;
        use serde_json::json;
        use std::collections::HashMap;

        #[derive(Clone, PartialEq, prost::Message)]
        struct Inner {
            #[prost(string, tag = "1")]
            label: String,
        }

        #[derive(Clone, PartialEq, prost::Message)]
        struct Sample {
            #[prost(int32, tag = "1")]
            small: i32,
            #[prost(sint64, tag = "2")]
            zig: i64,
            #[prost(int32, repeated, tag = "3")]
            packed: Vec<i32>,
            #[prost(map = "string, int64", tag = "4")]
            counts: HashMap<String, i64>,
            #[prost(message, optional, tag = "5")]
            inner: Option<Inner>,
            #[prost(uint64, tag = "6")]
            big: u64,
        }

        fn sample_root() -> Root {
            let mut root = Root::new();
            let inner = root.add_type(NodeId::ROOT, "Inner").unwrap();
            root.add_field(inner, Field::new("label", 1, "string")).unwrap();
            let ty = root.add_type(NodeId::ROOT, "Sample").unwrap();
            root.add_field(ty, Field::new("small", 1, "int32")).unwrap();
            root.add_field(ty, Field::new("zig", 2, "sint64")).unwrap();
            root.add_field(ty, Field::new("packed", 3, "int32").repeated())
                .unwrap();
            root.add_field(ty, Field::map("counts", 4, "string", "int64"))
                .unwrap();
            root.add_field(ty, Field::new("inner", 5, "Inner")).unwrap();
            root.add_field(ty, Field::new("big", 6, "uint64")).unwrap();
            root.resolve_all().unwrap();
            root
        }

        fn int64_of(value: Option<Value>) -> Option<Int64> {
            value.and_then(|v| v.as_int64())
        }

        #[test]
        fn test_decodes_prost_output() {
            let root = sample_root();
            let ty = root.get_type("Sample").unwrap();
            let sample = Sample {
                small: -1,
                zig: -300,
                packed: vec![1, 2, 300],
                counts: [("a".to_string(), -5)].into_iter().collect(),
                inner: Some(Inner {
                    label: "hi".into(),
                }),
                big: u64::MAX,
            };
            let bytes = sample.encode_to_vec();
            // negative int32 takes a full 10-byte varint
            let mut small = vec![0x08u8];
            small.extend([0xFF; 9]);
            small.push(0x01);
            assert_eq!(&bytes[..11], &small[..]);

            let msg = ty.decode(bytes.clone()).unwrap();
            assert_eq!(ty.get(&msg, "small").unwrap(), Some(Value::I32(-1)));
            assert_eq!(
                int64_of(ty.get(&msg, "zig").unwrap()).map(|v| v.as_i64()),
                Some(-300)
            );
            assert_eq!(
                ty.get(&msg, "packed").unwrap(),
                Some(Value::List(vec![
                    Value::I32(1),
                    Value::I32(2),
                    Value::I32(300)
                ]))
            );
            let counts = ty.get(&msg, "counts").unwrap().unwrap();
            let entry = counts.as_map().and_then(|m| m.get(&MapKey::from("a"))).cloned();
            assert_eq!(int64_of(entry).map(|v| v.as_i64()), Some(-5));
            let inner_ty = root.get_type("Inner").unwrap();
            let inner = ty.get(&msg, "inner").unwrap().unwrap();
            assert_eq!(
                inner_ty.get(inner.as_message().unwrap(), "label").unwrap(),
                Some(Value::from("hi"))
            );
            assert_eq!(
                int64_of(ty.get(&msg, "big").unwrap()).map(|v| v.as_u64()),
                Some(u64::MAX)
            );

            assert_eq!(ty.encode(&msg).unwrap().to_vec(), bytes);
        }

        #[test]
        fn test_prost_decodes_our_output() {
            let root = sample_root();
            let ty = root.get_type("Sample").unwrap();
            let msg = ty
                .from_object(&json!({
                    "small": -7,
                    "zig": "-9000000000",
                    "packed": [5, 0, 70000],
                    "counts": { "k": "42", "z": "-1" },
                    "inner": { "label": "x" },
                    "big": "18446744073709551615"
                }))
                .unwrap();
            let bytes = ty.encode(&msg).unwrap();

            let decoded = Sample::decode(bytes).unwrap();
            let expected = Sample {
                small: -7,
                zig: -9_000_000_000,
                packed: vec![5, 0, 70000],
                counts: [("k".to_string(), 42), ("z".to_string(), -1)]
                    .into_iter()
                    .collect(),
                inner: Some(Inner { label: "x".into() }),
                big: u64::MAX,
            };
            assert_eq!(decoded, expected);
        }
    }
}
