//! Error types for the protodyn-core library.
//!
//! This module provides comprehensive error handling using the `thiserror` crate.
//! Variants are grouped the same way failures surface to callers:
//!
//! - schema-build errors, raised while adding objects or resolving references
//! - wire-decode errors, raised while decoding a binary message
//! - arithmetic errors from [`Int64`](crate::Int64)
//! - conversion, lookup, loading, registry and RPC errors around the codec

use crate::message::Message;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for protodyn operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all protodyn operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A sibling with the same name already exists
    #[error("duplicate name '{name}' in {parent}")]
    DuplicateName {
        /// The conflicting name
        name: String,
        /// Full name of the namespace it was added to
        parent: String,
    },

    /// A field id is already used by another field of the same type
    #[error("duplicate field id {id} in {type_name}")]
    DuplicateFieldId {
        /// The conflicting field id
        id: u32,
        /// Full name of the type
        type_name: String,
    },

    /// A field id falls inside a reserved range
    #[error("field id {id} is reserved in {type_name}")]
    ReservedId {
        /// The reserved field id
        id: u32,
        /// Full name of the type
        type_name: String,
    },

    /// A field name is reserved
    #[error("field name '{name}' is reserved in {type_name}")]
    ReservedName {
        /// The reserved name
        name: String,
        /// Full name of the type
        type_name: String,
    },

    /// A type reference could not be resolved
    #[error("no such type: {reference} (referenced from {from})")]
    UnresolvedReference {
        /// The type name as written in the schema
        reference: String,
        /// Full name of the referencing field or method
        from: String,
    },

    /// A map field uses a key type that is not allowed
    #[error("invalid map key type '{key_type}' for {field}")]
    InvalidKeyType {
        /// The rejected key type
        key_type: String,
        /// Full name of the map field
        field: String,
    },

    /// An enum value id is declared twice without `allow_alias`
    #[error("duplicate enum value {id} ('{name}') in {enum_name}")]
    DuplicateEnumValue {
        /// The value name being added
        name: String,
        /// The repeated numeric id
        id: i32,
        /// Full name of the enum
        enum_name: String,
    },

    /// A schema descriptor has the wrong shape
    #[error("invalid descriptor at {path}: {details}")]
    InvalidDescriptor {
        /// Dotted path of the offending descriptor
        path: String,
        /// Detailed description of the issue
        details: String,
    },

    /// A read would run past the end of the buffer
    #[error("buffer overrun at offset {offset}: need {needed} bytes, {available} available")]
    BufferOverrun {
        /// Offset of the read
        offset: usize,
        /// Bytes requested
        needed: usize,
        /// Bytes remaining
        available: usize,
    },

    /// The input ended before a varint's terminating byte
    #[error("truncated varint at offset {offset}")]
    TruncatedVarint {
        /// Offset where the varint started
        offset: usize,
    },

    /// A varint did not terminate within 10 bytes
    #[error("malformed varint at offset {offset}: more than 10 bytes")]
    MalformedVarint {
        /// Offset where the varint started
        offset: usize,
    },

    /// A required field was absent from the decoded message
    #[error("missing required field '{field}' in {type_name}")]
    MissingRequiredField {
        /// Name of the missing field
        field: String,
        /// Full name of the message type
        type_name: String,
        /// Everything that was decoded before the check failed
        instance: Box<Message>,
    },

    /// An unknown or unexpected wire type was encountered
    #[error("invalid wire type {wire_type} at offset {offset}")]
    InvalidWireType {
        /// The raw wire type bits
        wire_type: u32,
        /// Offset of the tag
        offset: usize,
    },

    /// Nested messages or groups exceeded the decoder's depth limit
    #[error("recursion limit of {limit} exceeded at offset {offset}")]
    RecursionLimit {
        /// The configured limit
        limit: usize,
        /// Offset where the limit was hit
        offset: usize,
    },

    /// A string field did not hold valid UTF-8
    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the string payload
        offset: usize,
    },

    /// Integer division by zero
    #[error("division by zero")]
    DivisionByZero,

    /// A numeric string could not be parsed
    #[error("cannot parse '{input}' as a 64-bit integer: {reason}")]
    ParseError {
        /// The rejected input
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// A plain value could not be converted to a field value
    #[error("invalid value for {field}: {details}")]
    InvalidValue {
        /// Name of the field being converted
        field: String,
        /// Detailed description of the issue
        details: String,
    },

    /// A named object does not exist or has the wrong kind
    #[error("not found: {0}")]
    NotFound(String),

    /// Failed to fetch a schema source
    #[error("failed to fetch '{path}': {source}")]
    Fetch {
        /// Path that failed to load
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a FileDescriptorSet
    #[error("failed to decode descriptor set: {0}")]
    DescriptorDecode(#[from] prost::DecodeError),

    /// Failed to parse a JSON schema descriptor
    #[error("failed to parse JSON descriptor: {0}")]
    Json(#[from] serde_json::Error),

    /// The RPC transport or call contract failed
    #[error("rpc error: {0}")]
    Rpc(String),

    /// A shared registry lock was poisoned by a panicking writer
    #[error("registry lock poisoned")]
    LockPoisoned,
}

impl Error {
    /// Creates a new not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates a new descriptor shape error
    pub fn invalid_descriptor(path: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Creates a new value conversion error
    pub fn invalid_value(field: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            details: details.into(),
        }
    }

    /// Creates a new buffer overrun error
    pub fn buffer_overrun(offset: usize, needed: usize, available: usize) -> Self {
        Self::BufferOverrun {
            offset,
            needed,
            available,
        }
    }

    /// Creates a new fetch error
    pub fn fetch(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Fetch {
            path: path.into(),
            source,
        }
    }

    /// Creates a new RPC error
    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }

    /// Returns true if this error was raised while decoding wire data
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::BufferOverrun { .. }
                | Self::TruncatedVarint { .. }
                | Self::MalformedVarint { .. }
                | Self::MissingRequiredField { .. }
                | Self::InvalidWireType { .. }
                | Self::RecursionLimit { .. }
                | Self::InvalidUtf8 { .. }
        )
    }

    /// Returns true if this error was raised while building a schema
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName { .. }
                | Self::DuplicateFieldId { .. }
                | Self::ReservedId { .. }
                | Self::ReservedName { .. }
                | Self::UnresolvedReference { .. }
                | Self::InvalidKeyType { .. }
                | Self::DuplicateEnumValue { .. }
                | Self::InvalidDescriptor { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnresolvedReference {
            reference: "Foo".into(),
            from: ".pkg.Bar.foo".into(),
        };
        assert!(err.to_string().contains("no such type: Foo"));
        assert!(err.to_string().contains(".pkg.Bar.foo"));
    }

    #[test]
    fn test_classification() {
        assert!(Error::TruncatedVarint { offset: 3 }.is_decode_error());
        assert!(!Error::DivisionByZero.is_decode_error());
        assert!(Error::invalid_descriptor("a.b", "bad").is_schema_error());
        assert!(!Error::not_found("x").is_schema_error());
    }
}
