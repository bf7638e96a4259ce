//! Structure schema: the declared shape of one persisted type.
//!
//! A [`StructureSchema`] names a type, carries a stable hash used as the
//! physical key for sequence bookkeeping, and holds exactly one
//! [`IdAccessor`] plus an ordered list of [`IndexAccessor`]s. Schemas are
//! built once through [`SchemaBuilder`], cached in the registry, and never
//! mutated afterwards — they are safe to share across threads.
//!
//! Accessors operate on the serialized document (`serde_json::Value`), not
//! on the live object: path extraction over the JSON tree replaces the
//! runtime reflection the design deliberately avoids.
//!
//! # Example
//!
//! ```
//! use strukt_core::{DataTypeCode, IdType, StructureSchema};
//!
//! let schema = StructureSchema::builder("Person")
//!     .id(IdType::Guid, "Id")
//!     .index("Name", DataTypeCode::String)
//!     .index("Age", DataTypeCode::IntegerNumber)
//!     .unique("Email", DataTypeCode::String)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(schema.name(), "Person");
//! assert_eq!(schema.index_accessors().len(), 3);
//! assert!(schema.accessor("Age").is_some());
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::error::{Result, StruktError};
use crate::id::{IdType, StructureId};
use crate::value::{DataTypeCode, Value};

/// A type that can be persisted as a structure.
///
/// Implementations register their schema at compile time — the Rust
/// counterpart of the reflection-built schemas the original design calls
/// for. The schema is built once per process and cached by the registry.
pub trait Structure: Serialize + DeserializeOwned {
    /// Declares the schema for this type.
    fn schema() -> Result<StructureSchema>;
}

/// Accessor for the identity member of a serialized document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAccessor {
    member_name: String,
    id_type: IdType,
}

impl IdAccessor {
    pub(crate) fn new(member_name: impl Into<String>, id_type: IdType) -> Self {
        Self { member_name: member_name.into(), id_type }
    }

    /// Name of the identity member.
    pub fn member_name(&self) -> &str {
        &self.member_name
    }

    /// Physical classification of the identity.
    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    /// Reads the identity value out of a document, `None` when unset.
    pub fn get(&self, doc: &serde_json::Value) -> Option<StructureId> {
        doc.get(&self.member_name)
            .and_then(|v| StructureId::from_json(v, self.id_type))
    }

    /// Writes an identity value into a document.
    ///
    /// # Errors
    ///
    /// Returns [`StruktError::NotAnObject`] when the document root is not a
    /// JSON object, or [`StruktError::WrongIdType`] when the id does not
    /// match the declared type.
    pub fn set(&self, schema_name: &str, doc: &mut serde_json::Value, id: &StructureId) -> Result<()> {
        if id.id_type() != self.id_type {
            return Err(StruktError::WrongIdType {
                schema: schema_name.to_string(),
                member: self.member_name.clone(),
            });
        }
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| StruktError::NotAnObject(schema_name.to_string()))?;
        obj.insert(self.member_name.clone(), id.to_json());
        Ok(())
    }
}

/// Accessor describing one indexable member path.
///
/// The path is dotted (`Child.Name`); enumerable segments fan out across
/// array elements. Parent/child relationships exist only through path
/// concatenation, so accessor graphs cannot form reference cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexAccessor {
    path: String,
    data_type: DataTypeCode,
    is_enumerable: bool,
    is_element: bool,
    is_unique: bool,
}

impl IndexAccessor {
    pub(crate) fn new(
        path: impl Into<String>,
        data_type: DataTypeCode,
        is_enumerable: bool,
        is_element: bool,
        is_unique: bool,
    ) -> Self {
        Self { path: path.into(), data_type, is_enumerable, is_element, is_unique }
    }

    /// Dotted member path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Datatype family of the member.
    pub fn data_type(&self) -> DataTypeCode {
        self.data_type
    }

    /// Whether the member's own value is an enumerable of scalars.
    pub fn is_enumerable(&self) -> bool {
        self.is_enumerable
    }

    /// Whether the member is an element inside an enumerable ancestor.
    pub fn is_element(&self) -> bool {
        self.is_element
    }

    /// Whether the member carries an application-level uniqueness constraint.
    pub fn is_unique(&self) -> bool {
        self.is_unique
    }

    /// Whether this accessor can yield more than one value per document.
    pub fn is_multi_valued(&self) -> bool {
        self.is_enumerable || self.is_element
    }

    /// Extracts the value(s) at this accessor's path from a document.
    ///
    /// A missing or null member yields a single null value. Arrays along the
    /// path fan out, one value per element.
    pub fn values(&self, doc: &serde_json::Value) -> Vec<Value> {
        let mut out = Vec::new();
        let segments: Vec<&str> = self.path.split('.').collect();
        collect_values(doc, &segments, self.data_type, &mut out);
        if out.is_empty() {
            out.push(Value::Null);
        }
        out
    }
}

fn collect_values(
    node: &serde_json::Value,
    segments: &[&str],
    code: DataTypeCode,
    out: &mut Vec<Value>,
) {
    match segments.split_first() {
        None => match node {
            serde_json::Value::Array(items) => {
                for item in items {
                    collect_values(item, segments, code, out);
                }
            }
            leaf => out.push(Value::from_json(leaf, code)),
        },
        Some((head, rest)) => match node {
            serde_json::Value::Object(map) => {
                if let Some(child) = map.get(*head) {
                    collect_values(child, rest, code, out);
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    collect_values(item, segments, code, out);
                }
            }
            _ => {}
        },
    }
}

/// The declared shape of one persisted type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureSchema {
    name: String,
    hash: String,
    id_accessor: IdAccessor,
    index_accessors: Vec<IndexAccessor>,
}

impl StructureSchema {
    /// Starts building a schema for the named type.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Type name; also the physical table-name stem.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable hash of the name, used as the sequence bookkeeping key.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The identity accessor.
    pub fn id_accessor(&self) -> &IdAccessor {
        &self.id_accessor
    }

    /// Index accessors in declaration order.
    pub fn index_accessors(&self) -> &[IndexAccessor] {
        &self.index_accessors
    }

    /// Looks up the accessor for a dotted path.
    pub fn accessor(&self, path: &str) -> Option<&IndexAccessor> {
        self.index_accessors.iter().find(|a| a.path() == path)
    }

    /// Accessors carrying a uniqueness constraint.
    pub fn unique_accessors(&self) -> impl Iterator<Item = &IndexAccessor> {
        self.index_accessors.iter().filter(|a| a.is_unique())
    }

    /// Whether a dotted path names the identity member.
    pub fn is_id_path(&self, path: &str) -> bool {
        path == self.id_accessor.member_name()
    }

    fn compute_hash(name: &str) -> String {
        let digest = Sha256::digest(name.as_bytes());
        digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Builder for [`StructureSchema`].
///
/// Declaration order of index accessors is preserved; it drives the order
/// index rows are produced in.
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    id: Option<IdAccessor>,
    accessors: Vec<IndexAccessor>,
}

impl SchemaBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), id: None, accessors: Vec::new() }
    }

    /// Declares the identity member.
    pub fn id(mut self, id_type: IdType, member_name: impl Into<String>) -> Self {
        self.id = Some(IdAccessor::new(member_name, id_type));
        self
    }

    /// Declares a scalar indexable member.
    pub fn index(mut self, path: impl Into<String>, data_type: DataTypeCode) -> Self {
        self.accessors.push(IndexAccessor::new(path, data_type, false, false, false));
        self
    }

    /// Declares a member whose own value is an enumerable of scalars.
    pub fn enumerable(mut self, path: impl Into<String>, data_type: DataTypeCode) -> Self {
        self.accessors.push(IndexAccessor::new(path, data_type, true, false, false));
        self
    }

    /// Declares a scalar member nested inside an enumerable ancestor.
    pub fn element(mut self, path: impl Into<String>, data_type: DataTypeCode) -> Self {
        self.accessors.push(IndexAccessor::new(path, data_type, false, true, false));
        self
    }

    /// Declares a unique scalar member.
    pub fn unique(mut self, path: impl Into<String>, data_type: DataTypeCode) -> Self {
        self.accessors.push(IndexAccessor::new(path, data_type, false, false, true));
        self
    }

    /// Finishes the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StruktError::MissingIdMember`] when no id was declared and
    /// [`StruktError::MissingIndexes`] when no index accessor was declared.
    pub fn build(self) -> Result<StructureSchema> {
        let id_accessor = self
            .id
            .ok_or_else(|| StruktError::MissingIdMember(self.name.clone()))?;
        if self.accessors.is_empty() {
            return Err(StruktError::MissingIndexes(self.name));
        }
        let hash = StructureSchema::compute_hash(&self.name);
        Ok(StructureSchema {
            name: self.name,
            hash,
            id_accessor,
            index_accessors: self.accessors,
        })
    }
}
