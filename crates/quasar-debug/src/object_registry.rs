//! Session-scoped identity cache.
//!
//! Clients hold object ids, never object handles. Every object-like value
//! that leaves the marshaler is recorded here first, so a later request
//! naming the id (`Value`, `ToString`, field navigation) can be resolved
//! without re-classifying the object against the target.

use std::collections::HashMap;

use quasar_jdwp::ObjectId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    Plain,
    Text,
    Array {
        element_type_name: String,
        length: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHandle {
    pub id: ObjectId,
    pub type_name: String,
    pub kind: ObjectKind,
}

#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: HashMap<ObjectId, ObjectHandle>,
}

impl ObjectRegistry {
    /// Idempotent: remembering an id twice keeps the first handle.
    pub fn remember(&mut self, handle: ObjectHandle) -> &ObjectHandle {
        self.objects.entry(handle.id).or_insert(handle)
    }

    pub fn lookup(&self, id: ObjectId) -> Option<&ObjectHandle> {
        self.objects.get(&id)
    }

    /// No eviction during a session; the whole cache dies with it.
    pub fn clear(&mut self) {
        self.objects.clear();
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_is_idempotent() {
        let mut registry = ObjectRegistry::default();
        registry.remember(ObjectHandle {
            id: 7,
            type_name: "com.example.Foo".to_string(),
            kind: ObjectKind::Plain,
        });
        registry.remember(ObjectHandle {
            id: 7,
            type_name: "com.example.Other".to_string(),
            kind: ObjectKind::Text,
        });

        assert_eq!(registry.len(), 1);
        let handle = registry.lookup(7).unwrap();
        assert_eq!(handle.type_name, "com.example.Foo");
        assert_eq!(handle.kind, ObjectKind::Plain);
    }

    #[test]
    fn clear_invalidates_every_id() {
        let mut registry = ObjectRegistry::default();
        registry.remember(ObjectHandle {
            id: 1,
            type_name: "T".to_string(),
            kind: ObjectKind::Plain,
        });
        registry.clear();
        assert!(registry.lookup(1).is_none());
        assert!(registry.is_empty());
    }
}
