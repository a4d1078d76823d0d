//! # protodyn-core
//!
//! A reflective Protocol Buffers runtime: build or load a schema at run
//! time, then encode, decode, verify and convert messages against it
//! without generated code.
//!
//! This crate provides the core functionality for:
//! - Assembling schema trees from JSON descriptors, compiled
//!   `FileDescriptorSet`s or the builder API
//! - Bit-exact wire encoding and decoding of dynamic messages
//! - Verifying and converting plain JSON objects
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`long`]: 64-bit integers as two 32-bit halves
//! - [`wire`]: varints, [`Reader`] and [`Writer`]
//! - [`schema`]: the descriptor tree ([`Root`]) and its importers
//! - [`codec`]: per-type codec plans and [`TypeRef`]
//! - [`message`]: dynamic message values
//! - [`loader`], [`registry`], [`rpc`]: glue around the codec
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use protodyn_core::{ConversionOptions, Root};
//! use serde_json::json;
//!
//! let mut root = Root::from_json(&json!({
//!     "nested": { "Point": { "fields": {
//!         "x": { "type": "sint32", "id": 1 },
//!         "y": { "type": "sint32", "id": 2 }
//!     } } }
//! }))?;
//! root.resolve_all()?;
//!
//! let point = root.get_type("Point")?;
//! assert_eq!(point.verify(&json!({ "x": 1, "y": -1 })), None);
//!
//! let msg = point.from_object(&json!({ "x": 1, "y": -1 }))?;
//! let bytes = point.encode(&msg)?;
//! let back = point.to_object(&point.decode(bytes)?, &ConversionOptions::new())?;
//! assert_eq!(back, json!({ "x": 1, "y": -1 }));
//! # Ok::<(), protodyn_core::Error>(())
//! ```
//!
//! ## Extensibility
//!
//! The library provides several traits for customization:
//!
//! - [`Fetch`] and [`ProtoParser`]: Plug in file access and `.proto` parsing
//! - [`RpcImpl`]: Carry encoded RPC calls over any transport
//! - [`SchemaVisitor`]: Walk a schema tree
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod codec;
pub mod error;
pub mod loader;
pub mod long;
pub mod message;
pub mod registry;
pub mod rpc;
pub mod schema;
pub mod wire;

// Re-export primary types for convenience
pub use codec::{BytesFormat, ConversionOptions, EnumFormat, LongFormat, TypeRef};
pub use error::{Error, Result};
pub use loader::{Fetch, FsFetch, Loader, LoaderConfig, ParsedSchema, ProtoParser};
pub use long::Int64;
pub use message::{MapKey, Message, Value};
pub use registry::Registry;
pub use rpc::{RpcImpl, ServiceClient};
pub use schema::{
    Field, FieldKind, Method, NodeId, OneOf, ProtoSyntax, Root, Rule, Scalar, SchemaVisitor,
    StatsVisitor,
};
pub use wire::{Reader, WireType, Writer};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
