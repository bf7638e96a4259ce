//! Explicit schema registry.
//!
//! One registry instance is constructed at startup and passed to every
//! consumer — no process-wide statics. Cached schemas are immutable and
//! handed out as `Arc`, so concurrent readers for different schemas never
//! contend beyond the map lock. Dropping or renaming a structure set is an
//! explicit [`remove`](SchemaRegistry::remove), which makes the lifecycle
//! testable in isolation and safe under parallel test execution.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::schema::{Structure, StructureSchema};

/// Process-lifetime cache of built schemas, keyed by type name.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<StructureSchema>>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached schema for `T`, building and caching it on first use.
    pub fn get_or_create<T: Structure>(&self) -> Result<Arc<StructureSchema>> {
        let schema = T::schema()?;
        {
            let map = self.schemas.read().expect("schema registry lock poisoned");
            if let Some(existing) = map.get(schema.name()) {
                return Ok(Arc::clone(existing));
            }
        }
        let mut map = self.schemas.write().expect("schema registry lock poisoned");
        let entry = map
            .entry(schema.name().to_string())
            .or_insert_with(|| Arc::new(schema));
        Ok(Arc::clone(entry))
    }

    /// Returns the cached schema by name, if present.
    pub fn get(&self, name: &str) -> Option<Arc<StructureSchema>> {
        self.schemas
            .read()
            .expect("schema registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Removes the cached schema for a name, e.g. after a structure set is
    /// dropped or migrated. Returns whether an entry existed.
    pub fn remove(&self, name: &str) -> bool {
        self.schemas
            .write()
            .expect("schema registry lock poisoned")
            .remove(name)
            .is_some()
    }

    /// Clears all cached schemas.
    pub fn clear(&self) {
        self.schemas
            .write()
            .expect("schema registry lock poisoned")
            .clear();
    }

    /// Number of cached schemas.
    pub fn len(&self) -> usize {
        self.schemas.read().expect("schema registry lock poisoned").len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::id::IdType;
    use crate::value::DataTypeCode;

    #[derive(Debug, Serialize, Deserialize)]
    struct Person {
        #[serde(rename = "Id")]
        id: Option<uuid::Uuid>,
        #[serde(rename = "Name")]
        name: String,
    }

    impl Structure for Person {
        fn schema() -> Result<StructureSchema> {
            StructureSchema::builder("Person")
                .id(IdType::Guid, "Id")
                .index("Name", DataTypeCode::String)
                .build()
        }
    }

    #[test]
    fn test_get_or_create_caches_by_name() {
        let registry = SchemaRegistry::new();
        let a = registry.get_or_create::<Person>().unwrap();
        let b = registry.get_or_create::<Person>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_invalidates_cache() {
        let registry = SchemaRegistry::new();
        registry.get_or_create::<Person>().unwrap();
        assert!(registry.remove("Person"));
        assert!(!registry.remove("Person"));
        assert!(registry.get("Person").is_none());

        let rebuilt = registry.get_or_create::<Person>().unwrap();
        assert_eq!(rebuilt.name(), "Person");
    }

    #[test]
    fn test_clear_empties_registry() {
        let registry = SchemaRegistry::new();
        registry.get_or_create::<Person>().unwrap();
        registry.clear();
        assert!(registry.is_empty());
    }
}
