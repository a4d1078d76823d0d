//! Named schema trees shared between independently loaded components.

use crate::error::{Error, Result};
use crate::schema::Root;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// A registry of resolved schema trees keyed by name.
///
/// Cloning a registry is cheap and every clone sees the same entries.
/// Trees are handed out as `Arc<Root>`, so a tree removed from the
/// registry stays alive for as long as someone still holds it.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    roots: Arc<RwLock<HashMap<String, Arc<Root>>>>,
}

impl Registry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `root` under `name`, returning the tree it replaced
    pub fn insert(&self, name: impl Into<String>, root: Root) -> Result<Option<Arc<Root>>> {
        let name = name.into();
        debug!(name = %name, nodes = root.len(), "registering schema");
        let mut roots = self.roots.write().map_err(|_| Error::LockPoisoned)?;
        Ok(roots.insert(name, Arc::new(root)))
    }

    /// The tree registered under `name`
    pub fn get(&self, name: &str) -> Result<Option<Arc<Root>>> {
        let roots = self.roots.read().map_err(|_| Error::LockPoisoned)?;
        Ok(roots.get(name).cloned())
    }

    /// Removes and returns the tree registered under `name`
    pub fn remove(&self, name: &str) -> Result<Option<Arc<Root>>> {
        let mut roots = self.roots.write().map_err(|_| Error::LockPoisoned)?;
        Ok(roots.remove(name))
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Result<Vec<String>> {
        let roots = self.roots.read().map_err(|_| Error::LockPoisoned)?;
        let mut names: Vec<String> = roots.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> Result<bool> {
        let roots = self.roots.read().map_err(|_| Error::LockPoisoned)?;
        Ok(roots.contains_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, NodeId};
    use std::thread;

    fn tree(type_name: &str) -> Root {
        let mut root = Root::new();
        let id = root.add_type(NodeId::ROOT, type_name).unwrap();
        root.add_field(id, Field::new("v", 1, "int32")).unwrap();
        root
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = Registry::new();
        assert!(registry.insert("b", tree("B")).unwrap().is_none());
        assert!(registry.insert("a", tree("A")).unwrap().is_none());
        assert!(registry.insert("a", tree("A2")).unwrap().is_some());
        assert_eq!(registry.names().unwrap(), vec!["a", "b"]);

        let a = registry.get("a").unwrap().unwrap();
        assert!(a.get_type("A2").is_ok());
        let removed = registry.remove("a").unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &removed));
        assert!(!registry.contains("a").unwrap());
        assert!(registry.get("a").unwrap().is_none());
    }

    #[test]
    fn test_shared_between_threads() {
        let registry = Registry::new();
        registry.insert("shared", tree("M")).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let root = registry.get("shared").unwrap().unwrap();
                    let ty = root.get_type("M").unwrap();
                    let mut msg = ty.create();
                    ty.set(&mut msg, "v", crate::Value::I32(i)).unwrap();
                    ty.encode(&msg).unwrap().len()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }
    }
}
