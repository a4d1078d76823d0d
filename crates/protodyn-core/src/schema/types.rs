//! Message type descriptors.

use super::field::{Field, OneOf};
use crate::codec::compile::Compiled;
use once_cell::sync::OnceCell;

/// Fields, oneofs and ranges of a message type.
///
/// The compiled codec plan is cached here on first use and dropped
/// whenever the field set changes.
#[derive(Debug, Clone, Default)]
pub struct TypeData {
    pub(crate) fields: Vec<Field>,
    pub(crate) oneofs: Vec<OneOf>,
    pub(crate) reserved_ranges: Vec<(u32, u32)>,
    pub(crate) reserved_names: Vec<String>,
    pub(crate) extension_ranges: Vec<(u32, u32)>,
    pub(crate) group: bool,
    pub(crate) compiled: OnceCell<Compiled>,
}

impl TypeData {
    /// Fields in declaration order, installed extensions last
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// A field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// A field by id
    pub fn field_by_id(&self, id: u32) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Oneofs in declaration order
    pub fn oneofs(&self) -> &[OneOf] {
        &self.oneofs
    }

    /// A oneof by name
    pub fn oneof(&self, name: &str) -> Option<&OneOf> {
        self.oneofs.iter().find(|o| o.name == name)
    }

    /// Inclusive reserved id ranges
    pub fn reserved_ranges(&self) -> &[(u32, u32)] {
        &self.reserved_ranges
    }

    /// Reserved field names
    pub fn reserved_names(&self) -> &[String] {
        &self.reserved_names
    }

    /// Inclusive extension id ranges
    pub fn extension_ranges(&self) -> &[(u32, u32)] {
        &self.extension_ranges
    }

    /// Whether the type is encoded as a group
    pub fn is_group(&self) -> bool {
        self.group
    }

    /// Whether the codec plan has been built
    pub fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    pub(crate) fn is_reserved_id(&self, id: u32) -> bool {
        self.reserved_ranges
            .iter()
            .any(|(lo, hi)| (*lo..=*hi).contains(&id))
    }

    pub(crate) fn is_reserved_name(&self, name: &str) -> bool {
        self.reserved_names.iter().any(|n| n == name)
    }

    pub(crate) fn invalidate(&mut self) {
        self.compiled.take();
    }
}
