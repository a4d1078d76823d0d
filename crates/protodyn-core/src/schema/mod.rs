//! Reflective schema model.
//!
//! This module holds the in-memory descriptor graph that drives the codec:
//! namespaces, message types, fields, oneofs, enums and services.
//!
//! ## Architecture
//!
//! Every descriptor lives in a single arena owned by [`Root`] and is
//! addressed by a [`NodeId`]. A node's `parent` and a field's resolved
//! type are plain indices into that arena, so the tree has no reference
//! cycles and lookups stay O(1).
//!
//! Building a schema is a two-phase process:
//!
//! 1. **Add**: `add_*` calls (or [`Root::add_json`],
//!    [`Root::add_file_descriptor_set`]) populate the arena. Name and id
//!    clashes are rejected immediately.
//! 2. **Resolve**: [`Root::resolve_all`] installs extension fields and
//!    binds every field and method type name to a node. Resolution is
//!    all-or-nothing: on error no partial resolution is kept.
//!
//! Any structural change drops the cached codec plans, so the next encode
//! or decode compiles against the current field set.

mod descriptor;
mod enums;
mod field;
mod json;
mod service;
mod types;
mod visitor;

pub use enums::EnumData;
pub use field::{Field, FieldKind, OneOf, Rule, Scalar};
pub use service::{Method, ServiceData};
pub use types::TypeData;
pub use visitor::{SchemaVisitor, StatsVisitor};

use crate::error::{Error, Result};
use crate::wire::MAX_FIELD_ID;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace};

/// Descriptor options, keyed by option name
pub type Options = BTreeMap<String, JsonValue>;

/// Index of a node in a [`Root`]'s arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// The root namespace
    pub const ROOT: NodeId = NodeId(0);

    /// Position in the arena
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Proto syntax version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtoSyntax {
    /// Proto2 syntax
    Proto2,
    /// Proto3 syntax
    Proto3,
}

impl ProtoSyntax {
    /// Returns the syntax declaration string
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtoSyntax::Proto2 => "proto2",
            ProtoSyntax::Proto3 => "proto3",
        }
    }
}

impl TryFrom<&str> for ProtoSyntax {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "" | "proto2" => Ok(ProtoSyntax::Proto2),
            "proto3" => Ok(ProtoSyntax::Proto3),
            _ => Err(Error::invalid_descriptor(
                "syntax",
                format!("unsupported syntax '{value}'"),
            )),
        }
    }
}

/// What a node describes
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A plain grouping namespace, such as a package
    Namespace,
    /// A message type
    Type(TypeData),
    /// An enum
    Enum(EnumData),
    /// A service
    Service(ServiceData),
}

impl NodeKind {
    /// Short name of the kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Namespace => "namespace",
            NodeKind::Type(_) => "type",
            NodeKind::Enum(_) => "enum",
            NodeKind::Service(_) => "service",
        }
    }

    fn is_type(&self) -> bool {
        matches!(self, NodeKind::Type(_))
    }
}

/// A descriptor in the arena
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) options: Options,
    pub(crate) nested: Vec<NodeId>,
    pub(crate) syntax: Option<ProtoSyntax>,
    pub(crate) extension_fields: Vec<Field>,
    pub(crate) kind: NodeKind,
}

impl Node {
    fn new(name: impl Into<String>, parent: Option<NodeId>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            parent,
            options: Options::new(),
            nested: Vec::new(),
            syntax: None,
            extension_fields: Vec::new(),
            kind,
        }
    }

    /// Simple name; empty for the root
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enclosing node; `None` for the root
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Node options
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Nested nodes in insertion order
    pub fn nested(&self) -> &[NodeId] {
        &self.nested
    }

    /// Syntax declared on this node, if any
    pub fn syntax(&self) -> Option<ProtoSyntax> {
        self.syntax
    }

    /// Extension fields declared in this scope
    pub fn extension_fields(&self) -> &[Field] {
        &self.extension_fields
    }

    /// What this node describes
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }
}

/// The root namespace and owner of every descriptor.
#[derive(Debug, Clone)]
pub struct Root {
    nodes: Vec<Option<Node>>,
    resolved: bool,
}

impl Default for Root {
    fn default() -> Self {
        Self::new()
    }
}

impl Root {
    /// Creates an empty root
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node::new(String::new(), None, NodeKind::Namespace))],
            resolved: false,
        }
    }

    /// A node by id
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_node(&self, id: NodeId) -> Result<&Node> {
        self.node(id)
            .ok_or_else(|| Error::not_found(format!("node {id}")))
    }

    fn get_node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::not_found(format!("node {id}")))
    }

    /// Type data of a node, if it is a message type
    pub fn as_type(&self, id: NodeId) -> Option<&TypeData> {
        match &self.node(id)?.kind {
            NodeKind::Type(data) => Some(data),
            _ => None,
        }
    }

    /// Enum data of a node, if it is an enum
    pub fn as_enum(&self, id: NodeId) -> Option<&EnumData> {
        match &self.node(id)?.kind {
            NodeKind::Enum(data) => Some(data),
            _ => None,
        }
    }

    /// Service data of a node, if it is a service
    pub fn as_service(&self, id: NodeId) -> Option<&ServiceData> {
        match &self.node(id)?.kind {
            NodeKind::Service(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn type_data(&self, id: NodeId) -> Result<&TypeData> {
        self.as_type(id)
            .ok_or_else(|| Error::not_found(format!("type {}", self.describe(id))))
    }

    fn type_mut(&mut self, id: NodeId) -> Result<&mut TypeData> {
        let name = self.describe(id);
        match &mut self.get_node_mut(id)?.kind {
            NodeKind::Type(data) => Ok(data),
            _ => Err(Error::not_found(format!("type {name}"))),
        }
    }

    /// Ids of all live nodes, parents before children
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_some())
            .map(|(index, _)| NodeId(index as u32))
    }

    /// Number of live nodes, the root included
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Whether the root has no children
    pub fn is_empty(&self) -> bool {
        self.node(NodeId::ROOT).map_or(true, |n| n.nested.is_empty())
    }

    /// Whether every reference is currently resolved
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Dotted full name with a leading dot, e.g. `.pkg.Msg`; empty for the root
    pub fn full_name(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            match self.node(cur) {
                Some(node) if cur != NodeId::ROOT => {
                    parts.push(node.name.as_str());
                    current = node.parent;
                }
                _ => break,
            }
        }
        parts.iter().rev().fold(String::new(), |mut out, part| {
            out.push('.');
            out.push_str(part);
            out
        })
    }

    fn describe(&self, id: NodeId) -> String {
        if id == NodeId::ROOT {
            "root".to_string()
        } else {
            self.full_name(id)
        }
    }

    /// The nearest declared syntax, proto3 when none is declared
    pub fn effective_syntax(&self, id: NodeId) -> ProtoSyntax {
        let mut current = Some(id);
        while let Some(node) = current.and_then(|c| self.node(c)) {
            if let Some(syntax) = node.syntax {
                return syntax;
            }
            current = node.parent;
        }
        ProtoSyntax::Proto3
    }

    /// Sets an option on a node
    pub fn set_option(
        &mut self,
        id: NodeId,
        key: impl Into<String>,
        value: impl Into<JsonValue>,
    ) -> Result<()> {
        self.get_node_mut(id)?.options.insert(key.into(), value.into());
        self.touch();
        Ok(())
    }

    /// Declares the syntax of a node and everything below it
    pub fn set_syntax(&mut self, id: NodeId, syntax: ProtoSyntax) -> Result<()> {
        self.get_node_mut(id)?.syntax = Some(syntax);
        self.touch();
        Ok(())
    }

    /// Marks a type as a legacy group
    pub fn set_group(&mut self, type_id: NodeId, group: bool) -> Result<()> {
        self.type_mut(type_id)?.group = group;
        self.touch();
        Ok(())
    }

    /// A direct child by name
    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)?
            .nested
            .iter()
            .copied()
            .find(|c| self.node(*c).is_some_and(|n| n.name == name))
    }

    /// Adds a plain namespace. An existing namespace of the same name is
    /// reused so packages can be assembled from several fragments.
    pub fn add_namespace(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.add_node(parent, name, NodeKind::Namespace)
    }

    /// Creates every namespace along a dotted path and returns the last one
    pub fn define_namespace(&mut self, path: &str) -> Result<NodeId> {
        path.split('.')
            .filter(|seg| !seg.is_empty())
            .try_fold(NodeId::ROOT, |parent, seg| self.add_namespace(parent, seg))
    }

    /// Adds an empty message type
    pub fn add_type(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.add_node(parent, name, NodeKind::Type(TypeData::default()))
    }

    /// Adds an empty enum
    pub fn add_enum(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.add_node(parent, name, NodeKind::Enum(EnumData::default()))
    }

    /// Adds an empty service
    pub fn add_service(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.add_node(parent, name, NodeKind::Service(ServiceData::default()))
    }

    fn add_node(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> Result<NodeId> {
        let parent_node = self.get_node(parent)?;
        let parent_is_enum = matches!(parent_node.kind, NodeKind::Enum(_));
        let member_clash = match &parent_node.kind {
            NodeKind::Type(data) => data.field(name).is_some() || data.oneof(name).is_some(),
            _ => false,
        };
        if parent_is_enum {
            return Err(Error::invalid_descriptor(
                self.describe(parent),
                format!("an enum cannot contain '{name}'"),
            ));
        }
        if name.is_empty() || name.contains('.') {
            return Err(Error::invalid_descriptor(
                self.describe(parent),
                format!("invalid name '{name}'"),
            ));
        }

        if let Some(existing) = self.child(parent, name) {
            let mergeable = self
                .node(existing)
                .is_some_and(|n| matches!(n.kind, NodeKind::Namespace))
                && !matches!(kind, NodeKind::Enum(_));
            if !mergeable {
                return Err(Error::DuplicateName {
                    name: name.to_string(),
                    parent: self.describe(parent),
                });
            }
            if !matches!(kind, NodeKind::Namespace) {
                trace!(name, kind = kind.kind_name(), "upgrading namespace");
                self.get_node_mut(existing)?.kind = kind;
                self.touch();
            }
            return Ok(existing);
        }

        if member_clash {
            return Err(Error::DuplicateName {
                name: name.to_string(),
                parent: self.describe(parent),
            });
        }

        let id = NodeId(self.nodes.len() as u32);
        trace!(name, kind = kind.kind_name(), %id, "adding node");
        self.nodes.push(Some(Node::new(name, Some(parent), kind)));
        self.get_node_mut(parent)?.nested.push(id);
        self.touch();
        Ok(id)
    }

    /// Adds a field to a message type.
    ///
    /// A field carrying `extend` is recorded as an extension of this scope
    /// instead; see [`Root::add_extension`].
    pub fn add_field(&mut self, type_id: NodeId, mut field: Field) -> Result<()> {
        if field.extend.is_some() {
            return self.add_extension(type_id, field);
        }
        let type_name = self.describe(type_id);
        let path = format!("{type_name}.{}", field.name);
        check_field_id(&path, field.id)?;
        if field.is_map() && field.is_repeated() {
            return Err(Error::invalid_descriptor(
                path,
                "a map field cannot be repeated",
            ));
        }

        let data = self.type_data(type_id)?;
        if data.field(&field.name).is_some()
            || data.oneof(&field.name).is_some()
            || self.child(type_id, &field.name).is_some()
        {
            return Err(Error::DuplicateName {
                name: field.name,
                parent: type_name,
            });
        }
        if data.field_by_id(field.id).is_some() {
            return Err(Error::DuplicateFieldId {
                id: field.id,
                type_name,
            });
        }
        if data.is_reserved_id(field.id) {
            return Err(Error::ReservedId {
                id: field.id,
                type_name,
            });
        }
        if data.is_reserved_name(&field.name) {
            return Err(Error::ReservedName {
                name: field.name,
                type_name,
            });
        }
        if let Some(oneof) = &field.oneof {
            if data.oneof(oneof).is_none() {
                return Err(Error::invalid_descriptor(
                    path,
                    format!("unknown oneof '{oneof}'"),
                ));
            }
        }

        field.resolved = None;
        field.extension_scope = None;
        let data = self.type_mut(type_id)?;
        if let Some(name) = &field.oneof {
            if let Some(oneof) = data.oneofs.iter_mut().find(|o| &o.name == name) {
                if !oneof.fields.contains(&field.name) {
                    oneof.fields.push(field.name.clone());
                }
            }
        }
        data.fields.push(field);
        data.invalidate();
        self.resolved = false;
        Ok(())
    }

    /// Groups existing fields of a type into a oneof
    pub fn add_oneof(&mut self, type_id: NodeId, oneof: OneOf) -> Result<()> {
        let type_name = self.describe(type_id);
        let data = self.type_data(type_id)?;
        if data.field(&oneof.name).is_some()
            || data.oneof(&oneof.name).is_some()
            || self.child(type_id, &oneof.name).is_some()
        {
            return Err(Error::DuplicateName {
                name: oneof.name,
                parent: type_name,
            });
        }
        let path = format!("{type_name}.{}", oneof.name);
        for member in &oneof.fields {
            let field = data.field(member).ok_or_else(|| {
                Error::invalid_descriptor(&path, format!("unknown member field '{member}'"))
            })?;
            if let Some(other) = &field.oneof {
                return Err(Error::invalid_descriptor(
                    &path,
                    format!("field '{member}' already belongs to oneof '{other}'"),
                ));
            }
            if field.is_repeated() || field.is_map() {
                return Err(Error::invalid_descriptor(
                    &path,
                    format!("field '{member}' is repeated and cannot be a oneof member"),
                ));
            }
        }

        let data = self.type_mut(type_id)?;
        for field in data.fields.iter_mut() {
            if oneof.fields.contains(&field.name) {
                field.oneof = Some(oneof.name.clone());
            }
        }
        data.oneofs.push(oneof);
        data.invalidate();
        Ok(())
    }

    /// Removes a field, detaching it from its oneof
    pub fn remove_field(&mut self, type_id: NodeId, name: &str) -> Result<Field> {
        let type_name = self.describe(type_id);
        let data = self.type_mut(type_id)?;
        let index = data
            .fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| Error::not_found(format!("field {type_name}.{name}")))?;
        let field = data.fields.remove(index);
        for oneof in data.oneofs.iter_mut() {
            oneof.fields.retain(|member| member != name);
        }
        data.invalidate();
        Ok(field)
    }

    /// Removes a oneof; its members become ordinary fields
    pub fn remove_oneof(&mut self, type_id: NodeId, name: &str) -> Result<OneOf> {
        let type_name = self.describe(type_id);
        let data = self.type_mut(type_id)?;
        let index = data
            .oneofs
            .iter()
            .position(|o| o.name == name)
            .ok_or_else(|| Error::not_found(format!("oneof {type_name}.{name}")))?;
        let oneof = data.oneofs.remove(index);
        for field in data.fields.iter_mut() {
            if field.oneof.as_deref() == Some(name) {
                field.oneof = None;
            }
        }
        data.invalidate();
        Ok(oneof)
    }

    /// Records an extension field in `scope`. It is attached to the type
    /// named by its `extend` during [`Root::resolve_all`].
    pub fn add_extension(&mut self, scope: NodeId, mut field: Field) -> Result<()> {
        let scope_name = self.describe(scope);
        let path = format!("{scope_name}.{}", field.name);
        if field.extend.is_none() {
            return Err(Error::invalid_descriptor(path, "extension field without 'extend'"));
        }
        check_field_id(&path, field.id)?;
        let node = self.get_node(scope)?;
        if matches!(node.kind, NodeKind::Enum(_)) {
            return Err(Error::invalid_descriptor(path, "an enum cannot declare extensions"));
        }
        if node.extension_fields.iter().any(|f| f.name == field.name)
            || self.child(scope, &field.name).is_some()
        {
            return Err(Error::DuplicateName {
                name: field.name,
                parent: scope_name,
            });
        }
        field.resolved = None;
        field.extension_scope = None;
        field.oneof = None;
        self.get_node_mut(scope)?.extension_fields.push(field);
        self.resolved = false;
        Ok(())
    }

    /// Adds a named value to an enum. Reusing a number requires the
    /// `allow_alias` option on the enum.
    pub fn add_enum_value(&mut self, enum_id: NodeId, name: &str, value: i32) -> Result<()> {
        let enum_name = self.describe(enum_id);
        let node = self.get_node(enum_id)?;
        let allow_alias = node
            .options
            .get("allow_alias")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        let NodeKind::Enum(data) = &node.kind else {
            return Err(Error::not_found(format!("enum {enum_name}")));
        };
        if data.value_of(name).is_some() {
            return Err(Error::DuplicateName {
                name: name.to_string(),
                parent: enum_name,
            });
        }
        if data.contains_id(value) && !allow_alias {
            return Err(Error::DuplicateEnumValue {
                name: name.to_string(),
                id: value,
                enum_name,
            });
        }
        if data.reserved_names.iter().any(|n| n == name) {
            return Err(Error::ReservedName {
                name: name.to_string(),
                type_name: enum_name,
            });
        }
        if data.is_reserved_id(value) {
            return Err(Error::invalid_descriptor(
                format!("{enum_name}.{name}"),
                format!("value {value} is reserved"),
            ));
        }
        if let NodeKind::Enum(data) = &mut self.get_node_mut(enum_id)?.kind {
            data.values.push((name.to_string(), value));
        }
        self.touch();
        Ok(())
    }

    /// Adds a method to a service
    pub fn add_method(&mut self, service_id: NodeId, mut method: Method) -> Result<()> {
        let service_name = self.describe(service_id);
        let clash = self.child(service_id, &method.name).is_some();
        let NodeKind::Service(data) = &mut self.get_node_mut(service_id)?.kind else {
            return Err(Error::not_found(format!("service {service_name}")));
        };
        if clash || data.method(&method.name).is_some() {
            return Err(Error::DuplicateName {
                name: method.name,
                parent: service_name,
            });
        }
        method.resolved_request = None;
        method.resolved_response = None;
        data.methods.push(method);
        self.resolved = false;
        Ok(())
    }

    /// Reserves an inclusive range of field ids on a type, or of values on an enum
    pub fn add_reserved_range(&mut self, id: NodeId, lo: i32, hi: i32) -> Result<()> {
        let name = self.describe(id);
        if lo > hi {
            return Err(Error::invalid_descriptor(
                name,
                format!("reserved range {lo} to {hi} is empty"),
            ));
        }
        match &mut self.get_node_mut(id)?.kind {
            NodeKind::Type(data) => {
                let lo = u32::try_from(lo).map_err(|_| {
                    Error::invalid_descriptor(&name, format!("reserved id {lo} is negative"))
                })?;
                data.reserved_ranges.push((lo, hi as u32));
            }
            NodeKind::Enum(data) => data.reserved_ranges.push((lo, hi)),
            _ => return Err(Error::not_found(format!("type or enum {name}"))),
        }
        Ok(())
    }

    /// Reserves a field name on a type, or a value name on an enum
    pub fn add_reserved_name(&mut self, id: NodeId, reserved: &str) -> Result<()> {
        let name = self.describe(id);
        match &mut self.get_node_mut(id)?.kind {
            NodeKind::Type(data) => data.reserved_names.push(reserved.to_string()),
            NodeKind::Enum(data) => data.reserved_names.push(reserved.to_string()),
            _ => return Err(Error::not_found(format!("type or enum {name}"))),
        }
        Ok(())
    }

    /// Declares an inclusive range of ids available to extensions
    pub fn add_extension_range(&mut self, type_id: NodeId, lo: u32, hi: u32) -> Result<()> {
        if lo > hi {
            return Err(Error::invalid_descriptor(
                self.describe(type_id),
                format!("extension range {lo} to {hi} is empty"),
            ));
        }
        self.type_mut(type_id)?.extension_ranges.push((lo, hi));
        Ok(())
    }

    /// Removes a node and everything nested in it. Every resolution and
    /// cached plan is dropped since they may point into the removed subtree.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        if id == NodeId::ROOT {
            return Err(Error::invalid_descriptor("root", "the root cannot be removed"));
        }
        let name = self.full_name(id);
        if let Some(parent) = self.get_node(id)?.parent {
            self.get_node_mut(parent)?.nested.retain(|c| *c != id);
        }
        let mut stack = vec![id];
        let mut removed = 0usize;
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(next.index()).and_then(Option::take) {
                removed += 1;
                stack.extend(node.nested);
            }
        }
        self.clear_resolutions();
        debug!(name = %name, removed, "removed schema subtree");
        Ok(())
    }

    /// Finds a node by dotted path. A leading `.` makes the path absolute;
    /// otherwise it is tried in `scope`, then in each enclosing namespace.
    pub fn lookup(&self, scope: NodeId, path: &str) -> Option<NodeId> {
        self.lookup_filtered(scope, path, |_| true)
    }

    /// Finds a message type by path from the root
    pub fn lookup_type(&self, path: &str) -> Result<NodeId> {
        self.lookup_filtered(NodeId::ROOT, path, NodeKind::is_type)
            .ok_or_else(|| Error::not_found(format!("type {path}")))
    }

    /// Finds an enum by path from the root
    pub fn lookup_enum(&self, path: &str) -> Result<NodeId> {
        self.lookup_filtered(NodeId::ROOT, path, |k| matches!(k, NodeKind::Enum(_)))
            .ok_or_else(|| Error::not_found(format!("enum {path}")))
    }

    /// Finds a service by path from the root
    pub fn lookup_service(&self, path: &str) -> Result<NodeId> {
        self.lookup_filtered(NodeId::ROOT, path, |k| matches!(k, NodeKind::Service(_)))
            .ok_or_else(|| Error::not_found(format!("service {path}")))
    }

    pub(crate) fn lookup_filtered(
        &self,
        scope: NodeId,
        path: &str,
        accept: impl Fn(&NodeKind) -> bool,
    ) -> Option<NodeId> {
        let accepted = |id: NodeId| self.node(id).is_some_and(|n| accept(&n.kind));
        if let Some(absolute) = path.strip_prefix('.') {
            return self.find_path(NodeId::ROOT, absolute).filter(|id| accepted(*id));
        }
        let mut current = Some(scope);
        while let Some(cur) = current {
            if let Some(found) = self.find_path(cur, path).filter(|id| accepted(*id)) {
                return Some(found);
            }
            current = self.node(cur).and_then(|n| n.parent);
        }
        None
    }

    fn find_path(&self, start: NodeId, path: &str) -> Option<NodeId> {
        if path.is_empty() {
            return None;
        }
        path.split('.')
            .try_fold(start, |cur, segment| self.child(cur, segment))
    }

    /// Resolves a field's type name to a scalar, enum or message type
    pub(crate) fn resolve_field_kind(&self, type_id: NodeId, field: &Field) -> Result<FieldKind> {
        if let Some(kind) = field.resolved {
            return Ok(kind);
        }
        if let Some(key) = &field.key_type {
            if !Scalar::from_name(key).is_some_and(|s| s.is_valid_map_key()) {
                return Err(Error::InvalidKeyType {
                    key_type: key.clone(),
                    field: self.field_path(type_id, field),
                });
            }
        }
        if let Some(scalar) = Scalar::from_name(&field.type_name) {
            return Ok(FieldKind::Scalar(scalar));
        }
        let scope = field.extension_scope.unwrap_or(type_id);
        let found = self
            .lookup_filtered(scope, &field.type_name, |k| {
                matches!(k, NodeKind::Type(_) | NodeKind::Enum(_))
            })
            .ok_or_else(|| Error::UnresolvedReference {
                reference: field.type_name.clone(),
                from: self.field_path(type_id, field),
            })?;
        Ok(match self.node(found).map(|n| &n.kind) {
            Some(NodeKind::Enum(_)) => FieldKind::Enum(found),
            _ => FieldKind::Message(found),
        })
    }

    fn field_path(&self, type_id: NodeId, field: &Field) -> String {
        if field.name.starts_with('.') {
            field.name.clone()
        } else {
            format!("{}.{}", self.full_name(type_id), field.name)
        }
    }

    /// Binds every field and method type name in the tree.
    ///
    /// Extension fields are attached to the types they extend first.
    /// Calling this on an already resolved root is a no-op. On failure no
    /// partial resolution is kept.
    pub fn resolve_all(&mut self) -> Result<()> {
        if self.resolved {
            return Ok(());
        }
        match self.try_resolve() {
            Ok((fields, methods)) => {
                self.resolved = true;
                debug!(fields, methods, "resolved schema");
                Ok(())
            }
            Err(err) => {
                self.clear_resolutions();
                Err(err)
            }
        }
    }

    fn try_resolve(&mut self) -> Result<(usize, usize)> {
        self.strip_installed_extensions();
        self.install_extensions()?;

        let mut field_updates = Vec::new();
        let mut method_updates = Vec::new();
        for id in self.ids() {
            match self.node(id).map(|n| &n.kind) {
                Some(NodeKind::Type(data)) => {
                    for (index, field) in data.fields.iter().enumerate() {
                        if field.resolved.is_none() {
                            field_updates.push((id, index, self.resolve_field_kind(id, field)?));
                        }
                    }
                }
                Some(NodeKind::Service(data)) => {
                    for (index, method) in data.methods.iter().enumerate() {
                        let request = self.resolve_method_type(id, method, &method.request_type)?;
                        let response =
                            self.resolve_method_type(id, method, &method.response_type)?;
                        method_updates.push((id, index, request, response));
                    }
                }
                _ => {}
            }
        }

        let counts = (field_updates.len(), method_updates.len());
        for (id, index, kind) in field_updates {
            if let Some(field) = self.type_mut(id)?.fields.get_mut(index) {
                field.resolved = Some(kind);
            }
        }
        for (id, index, request, response) in method_updates {
            if let NodeKind::Service(data) = &mut self.get_node_mut(id)?.kind {
                if let Some(method) = data.methods.get_mut(index) {
                    method.resolved_request = Some(request);
                    method.resolved_response = Some(response);
                }
            }
        }
        self.invalidate_all();
        Ok(counts)
    }

    fn resolve_method_type(&self, service: NodeId, method: &Method, name: &str) -> Result<NodeId> {
        self.lookup_filtered(service, name, NodeKind::is_type)
            .ok_or_else(|| Error::UnresolvedReference {
                reference: name.to_string(),
                from: format!("{}.{}", self.full_name(service), method.name),
            })
    }

    fn install_extensions(&mut self) -> Result<()> {
        let mut installs = Vec::new();
        for scope in self.ids() {
            let Some(node) = self.node(scope) else { continue };
            for ext in &node.extension_fields {
                let extend = ext.extend.as_deref().unwrap_or_default();
                let from = format!("{}.{}", self.full_name(scope), ext.name);
                let target = self
                    .lookup_filtered(scope, extend, NodeKind::is_type)
                    .ok_or_else(|| Error::UnresolvedReference {
                        reference: extend.to_string(),
                        from: from.clone(),
                    })?;
                let mut installed = ext.clone();
                installed.name = from;
                installed.extension_scope = Some(scope);
                installed.resolved = None;
                installs.push((target, installed));
            }
        }
        for (target, field) in installs {
            let type_name = self.full_name(target);
            let data = self.type_mut(target)?;
            if data.field_by_id(field.id).is_some() {
                return Err(Error::DuplicateFieldId {
                    id: field.id,
                    type_name,
                });
            }
            trace!(field = %field.name, target = %type_name, "installing extension");
            data.fields.push(field);
        }
        Ok(())
    }

    fn strip_installed_extensions(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            if let NodeKind::Type(data) = &mut node.kind {
                data.fields.retain(|f| !f.is_extension());
            }
        }
    }

    fn clear_resolutions(&mut self) {
        self.strip_installed_extensions();
        for node in self.nodes.iter_mut().flatten() {
            match &mut node.kind {
                NodeKind::Type(data) => {
                    for field in data.fields.iter_mut() {
                        field.resolved = None;
                    }
                    data.invalidate();
                }
                NodeKind::Service(data) => {
                    for method in data.methods.iter_mut() {
                        method.resolved_request = None;
                        method.resolved_response = None;
                    }
                }
                _ => {}
            }
        }
        self.resolved = false;
    }

    fn invalidate_all(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            if let NodeKind::Type(data) = &mut node.kind {
                data.invalidate();
            }
        }
    }

    fn touch(&mut self) {
        self.resolved = false;
        self.invalidate_all();
    }
}

fn check_field_id(path: &str, id: u32) -> Result<()> {
    if id == 0 || id > MAX_FIELD_ID {
        return Err(Error::invalid_descriptor(
            path,
            format!("field id {id} is outside 1..={MAX_FIELD_ID}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> (Root, NodeId, NodeId) {
        let mut root = Root::new();
        let pkg = root.define_namespace("pkg.sub").unwrap();
        let outer = root.add_type(pkg, "Outer").unwrap();
        let inner = root.add_type(outer, "Inner").unwrap();
        root.add_field(inner, Field::new("v", 1, "int32")).unwrap();
        root.add_field(outer, Field::new("x", 1, "Inner")).unwrap();
        (root, outer, inner)
    }

    #[test]
    fn test_full_names_and_lookup() {
        let (root, outer, inner) = sample();
        assert_eq!(root.full_name(NodeId::ROOT), "");
        assert_eq!(root.full_name(inner), ".pkg.sub.Outer.Inner");
        assert_eq!(root.lookup_type("pkg.sub.Outer").unwrap(), outer);
        assert_eq!(root.lookup_type(".pkg.sub.Outer.Inner").unwrap(), inner);
        assert_eq!(root.lookup(inner, "Outer"), Some(outer));
        assert_eq!(root.lookup(inner, "Inner"), Some(inner));
        assert!(root.lookup_type("Outer").is_err());
    }

    #[test]
    fn test_namespace_merge() {
        let mut root = Root::new();
        let a = root.define_namespace("a.b").unwrap();
        let again = root.define_namespace("a.b").unwrap();
        assert_eq!(a, again);
        root.add_type(a, "T").unwrap();
        assert!(matches!(
            root.add_enum(a, "T"),
            Err(Error::DuplicateName { .. })
        ));
        assert!(matches!(
            root.add_namespace(a, "T"),
            Err(Error::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_namespace_upgrades_to_type() {
        let mut root = Root::new();
        let ns = root.define_namespace("a.M").unwrap();
        root.add_enum(ns, "E").unwrap();
        let parent = root.lookup(NodeId::ROOT, "a").unwrap();
        let ty = root.add_type(parent, "M").unwrap();
        assert_eq!(ty, ns);
        assert!(root.as_type(ty).is_some());
        assert!(root.lookup_enum("a.M.E").is_ok());
    }

    #[test]
    fn test_field_validation() {
        let (mut root, outer, _) = sample();
        assert!(matches!(
            root.add_field(outer, Field::new("y", 1, "int32")),
            Err(Error::DuplicateFieldId { id: 1, .. })
        ));
        assert!(matches!(
            root.add_field(outer, Field::new("x", 2, "int32")),
            Err(Error::DuplicateName { .. })
        ));
        assert!(matches!(
            root.add_field(outer, Field::new("Inner", 2, "int32")),
            Err(Error::DuplicateName { .. })
        ));
        assert!(matches!(
            root.add_field(outer, Field::new("z", 0, "int32")),
            Err(Error::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            root.add_field(outer, Field::new("z", MAX_FIELD_ID + 1, "int32")),
            Err(Error::InvalidDescriptor { .. })
        ));

        root.add_reserved_range(outer, 10, 20).unwrap();
        root.add_reserved_name(outer, "old").unwrap();
        assert!(matches!(
            root.add_field(outer, Field::new("z", 15, "int32")),
            Err(Error::ReservedId { id: 15, .. })
        ));
        assert!(matches!(
            root.add_field(outer, Field::new("old", 3, "int32")),
            Err(Error::ReservedName { .. })
        ));
    }

    #[test]
    fn test_resolve_all() {
        let (mut root, outer, inner) = sample();
        assert!(!root.is_resolved());
        root.resolve_all().unwrap();
        assert!(root.is_resolved());
        let field = root.as_type(outer).unwrap().field("x").unwrap();
        assert_eq!(field.resolved(), Some(FieldKind::Message(inner)));
    }

    #[test]
    fn test_unresolved_reference() {
        let mut root = Root::new();
        let ty = root.add_type(NodeId::ROOT, "M").unwrap();
        root.add_field(ty, Field::new("a", 1, "int32")).unwrap();
        root.add_field(ty, Field::new("f", 2, "Foo")).unwrap();
        let err = root.resolve_all().unwrap_err();
        assert!(matches!(
            &err,
            Error::UnresolvedReference { reference, from } if reference == "Foo" && from == ".M.f"
        ));
        // the failed pass leaves nothing half resolved
        assert!(!root.is_resolved());
        assert!(root.as_type(ty).unwrap().fields().iter().all(|f| f.resolved().is_none()));
    }

    #[test]
    fn test_invalid_map_key() {
        let mut root = Root::new();
        let ty = root.add_type(NodeId::ROOT, "M").unwrap();
        root.add_field(ty, Field::map("m", 1, "double", "string")).unwrap();
        assert!(matches!(
            root.resolve_all(),
            Err(Error::InvalidKeyType { .. })
        ));
        assert!(matches!(
            root.add_field(ty, Field::map("r", 2, "string", "string").repeated()),
            Err(Error::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_oneof_membership() {
        let mut root = Root::new();
        let ty = root.add_type(NodeId::ROOT, "M").unwrap();
        root.add_field(ty, Field::new("a", 1, "int32")).unwrap();
        root.add_field(ty, Field::new("b", 2, "string")).unwrap();
        root.add_field(ty, Field::new("r", 3, "int32").repeated()).unwrap();
        root.add_oneof(ty, OneOf::new("choice", ["a", "b"])).unwrap();
        assert_eq!(root.as_type(ty).unwrap().field("a").unwrap().oneof(), Some("choice"));

        assert!(root.add_oneof(ty, OneOf::new("other", ["a"])).is_err());
        assert!(root.add_oneof(ty, OneOf::new("bad", ["missing"])).is_err());
        assert!(root.add_oneof(ty, OneOf::new("rep", ["r"])).is_err());

        root.add_field(ty, Field::new("c", 4, "bool").with_option("x", 1))
            .unwrap();
        let mut late = Field::new("d", 5, "bool");
        late.oneof = Some("choice".into());
        root.add_field(ty, late).unwrap();
        assert_eq!(
            root.as_type(ty).unwrap().oneof("choice").unwrap().fields(),
            ["a", "b", "d"]
        );

        root.remove_field(ty, "a").unwrap();
        root.remove_oneof(ty, "choice").unwrap();
        assert_eq!(root.as_type(ty).unwrap().field("b").unwrap().oneof(), None);
    }

    #[test]
    fn test_enum_values() {
        let mut root = Root::new();
        let e = root.add_enum(NodeId::ROOT, "E").unwrap();
        root.add_enum_value(e, "A", 0).unwrap();
        assert!(matches!(
            root.add_enum_value(e, "B", 0),
            Err(Error::DuplicateEnumValue { id: 0, .. })
        ));
        assert!(matches!(
            root.add_enum_value(e, "A", 1),
            Err(Error::DuplicateName { .. })
        ));
        root.set_option(e, "allow_alias", true).unwrap();
        root.add_enum_value(e, "B", 0).unwrap();
        assert_eq!(root.as_enum(e).unwrap().len(), 2);
        assert!(root.add_type(e, "Nested").is_err());
    }

    #[test]
    fn test_extensions_install_on_resolve() {
        let mut root = Root::new();
        let pkg = root.define_namespace("pkg").unwrap();
        let base = root.add_type(pkg, "Base").unwrap();
        root.add_extension_range(base, 100, 199).unwrap();
        root.add_field(pkg, Field::new("extra", 100, "string").extending("Base"))
            .unwrap();
        assert!(root.as_type(base).unwrap().fields().is_empty());

        root.resolve_all().unwrap();
        let data = root.as_type(base).unwrap();
        let installed = data.field_by_id(100).unwrap();
        assert_eq!(installed.name(), ".pkg.extra");
        assert!(installed.is_extension());

        // re-resolving after a change must not install twice
        root.add_type(pkg, "Other").unwrap();
        root.resolve_all().unwrap();
        assert_eq!(root.as_type(base).unwrap().fields().len(), 1);
    }

    #[test]
    fn test_remove_clears_resolution() {
        let (mut root, outer, inner) = sample();
        root.resolve_all().unwrap();
        root.remove(inner).unwrap();
        assert!(root.node(inner).is_none());
        assert!(!root.is_resolved());
        assert_eq!(root.as_type(outer).unwrap().field("x").unwrap().resolved(), None);
        assert!(matches!(
            root.resolve_all(),
            Err(Error::UnresolvedReference { .. })
        ));
        assert!(root.remove(NodeId::ROOT).is_err());
    }

    #[test]
    fn test_methods_resolve() {
        let mut root = Root::new();
        let req = root.add_type(NodeId::ROOT, "Req").unwrap();
        let svc = root.add_service(NodeId::ROOT, "Svc").unwrap();
        root.add_method(svc, Method::new("Call", "Req", "Req")).unwrap();
        assert!(root.add_method(svc, Method::new("Call", "Req", "Req")).is_err());
        root.resolve_all().unwrap();
        let method = root.as_service(svc).unwrap().method("Call").unwrap();
        assert_eq!(method.resolved_request(), Some(req));

        root.add_method(svc, Method::new("Bad", "Missing", "Req")).unwrap();
        assert!(root.resolve_all().is_err());
    }

    #[test]
    fn test_effective_syntax() {
        let mut root = Root::new();
        let pkg = root.define_namespace("p").unwrap();
        let ty = root.add_type(pkg, "M").unwrap();
        assert_eq!(root.effective_syntax(ty), ProtoSyntax::Proto3);
        root.set_syntax(pkg, ProtoSyntax::Proto2).unwrap();
        assert_eq!(root.effective_syntax(ty), ProtoSyntax::Proto2);
        assert!(ProtoSyntax::try_from("proto4").is_err());
    }
}
