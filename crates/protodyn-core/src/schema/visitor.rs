//! Schema tree walking.
//!
//! This module provides the [`SchemaVisitor`] trait for inspecting a
//! [`Root`] without matching on node kinds by hand.

use super::{EnumData, Field, Method, Node, NodeId, NodeKind, OneOf, Root, ServiceData, TypeData};

/// Callbacks invoked by [`Root::visit`].
///
/// Every method has a no-op default, so an implementation only overrides
/// what it cares about. Nodes are visited depth-first, parents before
/// children; a type's fields and oneofs are visited right after the type.
///
/// # Example
///
/// ```no_run
/// use protodyn_core::schema::{NodeId, Root, SchemaVisitor, TypeData};
///
/// struct TypeNames(Vec<String>);
///
/// impl SchemaVisitor for TypeNames {
///     fn visit_type(&mut self, root: &Root, id: NodeId, _data: &TypeData) {
///         self.0.push(root.full_name(id));
///     }
/// }
///
/// let root = Root::new();
/// let mut names = TypeNames(Vec::new());
/// root.visit(&mut names);
/// ```
pub trait SchemaVisitor {
    /// Visit a plain namespace (the root included)
    fn visit_namespace(&mut self, root: &Root, id: NodeId, node: &Node) {
        let _ = (root, id, node);
    }

    /// Visit a message type
    fn visit_type(&mut self, root: &Root, id: NodeId, data: &TypeData) {
        let _ = (root, id, data);
    }

    /// Visit a field of the type `owner`
    fn visit_field(&mut self, root: &Root, owner: NodeId, field: &Field) {
        let _ = (root, owner, field);
    }

    /// Visit a oneof of the type `owner`
    fn visit_oneof(&mut self, root: &Root, owner: NodeId, oneof: &OneOf) {
        let _ = (root, owner, oneof);
    }

    /// Visit an enum
    fn visit_enum(&mut self, root: &Root, id: NodeId, data: &EnumData) {
        let _ = (root, id, data);
    }

    /// Visit a service
    fn visit_service(&mut self, root: &Root, id: NodeId, data: &ServiceData) {
        let _ = (root, id, data);
    }

    /// Visit a method of the service `owner`
    fn visit_method(&mut self, root: &Root, owner: NodeId, method: &Method) {
        let _ = (root, owner, method);
    }
}

/// A visitor that collects statistics about a schema
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsVisitor {
    /// Number of plain namespaces, the root excluded
    pub namespace_count: usize,
    /// Number of message types
    pub type_count: usize,
    /// Number of fields, installed extensions included
    pub field_count: usize,
    /// Number of enums
    pub enum_count: usize,
    /// Number of services
    pub service_count: usize,
    /// Number of methods
    pub method_count: usize,
}

impl SchemaVisitor for StatsVisitor {
    fn visit_namespace(&mut self, _root: &Root, id: NodeId, _node: &Node) {
        if id != NodeId::ROOT {
            self.namespace_count += 1;
        }
    }

    fn visit_type(&mut self, _root: &Root, _id: NodeId, _data: &TypeData) {
        self.type_count += 1;
    }

    fn visit_field(&mut self, _root: &Root, _owner: NodeId, _field: &Field) {
        self.field_count += 1;
    }

    fn visit_enum(&mut self, _root: &Root, _id: NodeId, _data: &EnumData) {
        self.enum_count += 1;
    }

    fn visit_service(&mut self, _root: &Root, _id: NodeId, _data: &ServiceData) {
        self.service_count += 1;
    }

    fn visit_method(&mut self, _root: &Root, _owner: NodeId, _method: &Method) {
        self.method_count += 1;
    }
}

impl Root {
    /// Walks the tree depth-first from the root
    pub fn visit<V: SchemaVisitor + ?Sized>(&self, visitor: &mut V) {
        self.visit_from(NodeId::ROOT, visitor);
    }

    /// Walks the subtree below `id`, `id` included
    pub fn visit_from<V: SchemaVisitor + ?Sized>(&self, id: NodeId, visitor: &mut V) {
        let Some(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Namespace => visitor.visit_namespace(self, id, node),
            NodeKind::Type(data) => {
                visitor.visit_type(self, id, data);
                for field in &data.fields {
                    visitor.visit_field(self, id, field);
                }
                for oneof in &data.oneofs {
                    visitor.visit_oneof(self, id, oneof);
                }
            }
            NodeKind::Enum(data) => visitor.visit_enum(self, id, data),
            NodeKind::Service(data) => {
                visitor.visit_service(self, id, data);
                for method in &data.methods {
                    visitor.visit_method(self, id, method);
                }
            }
        }
        for child in &node.nested {
            self.visit_from(*child, visitor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    struct TypeNames(Vec<String>);

    impl SchemaVisitor for TypeNames {
        fn visit_type(&mut self, root: &Root, id: NodeId, _data: &TypeData) {
            self.0.push(root.full_name(id));
        }
    }

    fn sample() -> Root {
        let mut root = Root::new();
        let pkg = root.define_namespace("a.b").unwrap();
        let outer = root.add_type(pkg, "Outer").unwrap();
        let inner = root.add_type(outer, "Inner").unwrap();
        root.add_field(outer, Field::new("x", 1, "Inner")).unwrap();
        root.add_field(inner, Field::new("v", 1, "int32")).unwrap();
        let e = root.add_enum(pkg, "E").unwrap();
        root.add_enum_value(e, "ZERO", 0).unwrap();
        let svc = root.add_service(pkg, "Svc").unwrap();
        root.add_method(svc, Method::new("Get", "Outer", "Outer")).unwrap();
        root
    }

    #[test]
    fn test_stats_visitor() {
        let root = sample();
        let mut stats = StatsVisitor::default();
        root.visit(&mut stats);
        assert_eq!(
            stats,
            StatsVisitor {
                namespace_count: 2,
                type_count: 2,
                field_count: 2,
                enum_count: 1,
                service_count: 1,
                method_count: 1,
            }
        );
    }

    #[test]
    fn test_depth_first_order() {
        let root = sample();
        let mut names = TypeNames(Vec::new());
        root.visit(&mut names);
        assert_eq!(names.0, vec![".a.b.Outer", ".a.b.Outer.Inner"]);
    }
}
