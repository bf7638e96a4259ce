//! Structure builder: flattening populated objects into persistable units.
//!
//! One [`BuiltStructure`] is produced per object instance: the assigned
//! identity, one index row per accessor, one unique row per unique
//! accessor, and the serialized document body. Batch construction assigns
//! identities up front and builds the per-item rows in parallel — items
//! are independent and the schema is read-only during this phase.

use rayon::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, StruktError};
use crate::id::{IdPool, IdType, StructureId};
use crate::schema::{IndexAccessor, StructureSchema};
use crate::value::{DataTypeCode, Value};

/// One row for the indexes table: member path, datatype family, value.
///
/// Multi-valued accessors store the denormalized element string; a null
/// non-unique member stores a null value, preserving presence without
/// matching any non-null predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureIndex {
    /// Dotted member path.
    pub path: String,
    /// Datatype family selecting the value column.
    pub data_type: DataTypeCode,
    /// The value, `Value::Null` for absent members.
    pub value: Value,
}

/// One row for the uniques table: the computed value key of a unique member.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureUniqueRow {
    /// Dotted member path.
    pub path: String,
    /// Rendered value key.
    pub value: String,
}

/// The flattened persisted unit corresponding to one object instance.
#[derive(Debug, Clone)]
pub struct BuiltStructure {
    /// Structure set name.
    pub name: String,
    /// Assigned identity.
    pub id: StructureId,
    /// Index rows, one per accessor.
    pub indexes: Vec<StructureIndex>,
    /// Unique rows, one per unique accessor.
    pub uniques: Vec<StructureUniqueRow>,
    /// Serialized document body.
    pub json: String,
}

/// Builds [`BuiltStructure`]s from live objects and their schema.
#[derive(Debug, Default)]
pub struct StructureBuilder;

impl StructureBuilder {
    /// Creates a builder.
    pub fn new() -> Self {
        Self
    }

    /// Builds a single structure.
    ///
    /// When the document carries no identity, `Guid` ids are generated and
    /// integer ids are taken from `pool`; the assigned id is written back
    /// into the document before serialization.
    pub fn build<T: Serialize>(
        &self,
        schema: &StructureSchema,
        item: &T,
        pool: Option<&mut IdPool>,
    ) -> Result<BuiltStructure> {
        let mut doc = serde_json::to_value(item)?;
        let id = self.assign_id(schema, &mut doc, pool, false)?;
        self.build_from_document(schema, doc, id)
    }

    /// Builds a batch of structures.
    ///
    /// Identities are assigned up front in document order, then index rows
    /// are computed in parallel across items.
    pub fn build_batch<T: Serialize + Sync>(
        &self,
        schema: &StructureSchema,
        items: &[T],
        mut pool: Option<IdPool>,
    ) -> Result<Vec<BuiltStructure>> {
        let mut docs = Vec::with_capacity(items.len());
        for item in items {
            let mut doc = serde_json::to_value(item)?;
            // Sequential guids keep batch inserts in id order.
            let id = self.assign_id(schema, &mut doc, pool.as_mut(), true)?;
            docs.push((doc, id));
        }
        docs.into_par_iter()
            .map(|(doc, id)| self.build_from_document(schema, doc, id))
            .collect()
    }

    /// Rebuilds index and unique rows from an already-serialized document,
    /// e.g. when regenerating indexes from stored JSON.
    pub fn build_from_json(
        &self,
        schema: &StructureSchema,
        json: &str,
    ) -> Result<BuiltStructure> {
        let doc: serde_json::Value = serde_json::from_str(json)?;
        let id = schema.id_accessor().get(&doc).ok_or_else(|| {
            StruktError::WrongIdType {
                schema: schema.name().to_string(),
                member: schema.id_accessor().member_name().to_string(),
            }
        })?;
        self.build_from_document(schema, doc, id)
    }

    fn assign_id(
        &self,
        schema: &StructureSchema,
        doc: &mut serde_json::Value,
        pool: Option<&mut IdPool>,
        sequential: bool,
    ) -> Result<StructureId> {
        let accessor = schema.id_accessor();
        if let Some(existing) = accessor.get(doc) {
            return Ok(existing);
        }
        let id = match accessor.id_type() {
            IdType::Guid => StructureId::Guid(if sequential {
                Uuid::now_v7()
            } else {
                Uuid::new_v4()
            }),
            IdType::Int | IdType::BigInt => pool
                .and_then(|p| p.take(accessor.id_type()))
                .ok_or_else(|| StruktError::IdPoolExhausted(schema.name().to_string()))?,
            // String ids are application-assigned; absence is a schema
            // violation, not something the builder can repair.
            IdType::String => {
                return Err(StruktError::WrongIdType {
                    schema: schema.name().to_string(),
                    member: accessor.member_name().to_string(),
                });
            }
        };
        accessor.set(schema.name(), doc, &id)?;
        Ok(id)
    }

    fn build_from_document(
        &self,
        schema: &StructureSchema,
        doc: serde_json::Value,
        id: StructureId,
    ) -> Result<BuiltStructure> {
        let mut indexes = Vec::with_capacity(schema.index_accessors().len());
        let mut uniques = Vec::new();
        for accessor in schema.index_accessors() {
            let index = build_index(schema, accessor, &doc)?;
            if accessor.is_unique() {
                uniques.push(StructureUniqueRow {
                    path: accessor.path().to_string(),
                    value: index.value.render(),
                });
            }
            indexes.push(index);
        }
        let json = serde_json::to_string(&doc)?;
        Ok(BuiltStructure {
            name: schema.name().to_string(),
            id,
            indexes,
            uniques,
            json,
        })
    }
}

fn build_index(
    schema: &StructureSchema,
    accessor: &IndexAccessor,
    doc: &serde_json::Value,
) -> Result<StructureIndex> {
    let values = accessor.values(doc);
    let all_null = values.iter().all(Value::is_null);

    if accessor.is_unique() && all_null {
        return Err(StruktError::UniqueValueIsNull {
            schema: schema.name().to_string(),
            path: accessor.path().to_string(),
        });
    }

    let (data_type, value) = if accessor.is_multi_valued() {
        if all_null {
            (DataTypeCode::String, Value::Null)
        } else {
            (DataTypeCode::String, Value::String(Value::flatten_many(&values)))
        }
    } else {
        (accessor.data_type(), values.into_iter().next().unwrap_or(Value::Null))
    };

    Ok(StructureIndex {
        path: accessor.path().to_string(),
        data_type,
        value,
    })
}

/// Computes the sequence seed of one batch so that concurrently processed
/// batches receive non-overlapping id ranges.
///
/// Batches are assumed to be processed in increasing batch order; the
/// arithmetic is `original_seed + batch_number * batch_size`.
pub fn batch_seed(original_seed: i64, batch_number: usize, batch_size: usize) -> i64 {
    original_seed + (batch_number as i64) * (batch_size as i64)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::schema::StructureSchema;

    #[derive(Debug, Serialize, Deserialize)]
    struct Person {
        #[serde(rename = "Id")]
        id: Option<Uuid>,
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Age")]
        age: i32,
        #[serde(rename = "Email")]
        email: Option<String>,
        #[serde(rename = "Tags")]
        tags: Vec<String>,
    }

    fn person_schema() -> StructureSchema {
        StructureSchema::builder("Person")
            .id(IdType::Guid, "Id")
            .index("Name", DataTypeCode::String)
            .index("Age", DataTypeCode::IntegerNumber)
            .unique("Email", DataTypeCode::String)
            .enumerable("Tags", DataTypeCode::String)
            .build()
            .unwrap()
    }

    fn bruce() -> Person {
        Person {
            id: None,
            name: "Bruce".into(),
            age: 42,
            email: Some("bruce@wayne.example".into()),
            tags: vec!["night".into(), "bat".into()],
        }
    }

    #[test]
    fn test_build_produces_one_index_per_accessor() {
        let schema = person_schema();
        let built = StructureBuilder::new().build(&schema, &bruce(), None).unwrap();
        assert_eq!(built.indexes.len(), 4);
        assert_eq!(built.indexes[0].value, Value::String("Bruce".into()));
        assert_eq!(built.indexes[1].value, Value::Int(42));
    }

    #[test]
    fn test_build_assigns_guid_and_writes_it_back() {
        let schema = person_schema();
        let built = StructureBuilder::new().build(&schema, &bruce(), None).unwrap();
        assert!(matches!(built.id, StructureId::Guid(_)));

        let doc: serde_json::Value = serde_json::from_str(&built.json).unwrap();
        assert_eq!(schema.id_accessor().get(&doc), Some(built.id));
    }

    #[test]
    fn test_existing_id_is_preserved() {
        let schema = person_schema();
        let mut item = bruce();
        let id = Uuid::new_v4();
        item.id = Some(id);
        let built = StructureBuilder::new().build(&schema, &item, None).unwrap();
        assert_eq!(built.id, StructureId::Guid(id));
    }

    #[test]
    fn test_enumerable_flattens_to_token_string() {
        let schema = person_schema();
        let built = StructureBuilder::new().build(&schema, &bruce(), None).unwrap();
        let tags = built.indexes.iter().find(|i| i.path == "Tags").unwrap();
        assert_eq!(tags.value, Value::String("<$night$><$bat$>".into()));
        assert_eq!(tags.data_type, DataTypeCode::String);
    }

    #[test]
    fn test_unique_null_is_a_hard_failure() {
        let schema = person_schema();
        let mut item = bruce();
        item.email = None;
        let err = StructureBuilder::new().build(&schema, &item, None).unwrap_err();
        assert!(matches!(err, StruktError::UniqueValueIsNull { .. }));
    }

    #[test]
    fn test_non_unique_null_stores_null_row() {
        let schema = StructureSchema::builder("Person")
            .id(IdType::Guid, "Id")
            .index("Name", DataTypeCode::String)
            .index("Nick", DataTypeCode::String)
            .build()
            .unwrap();
        let doc_item = serde_json::json!({ "Id": null, "Name": "Bruce" });
        let built = StructureBuilder::new().build(&schema, &doc_item, None).unwrap();
        let nick = built.indexes.iter().find(|i| i.path == "Nick").unwrap();
        assert!(nick.value.is_null());
    }

    #[test]
    fn test_unique_rows_carry_rendered_key() {
        let schema = person_schema();
        let built = StructureBuilder::new().build(&schema, &bruce(), None).unwrap();
        assert_eq!(built.uniques.len(), 1);
        assert_eq!(built.uniques[0].path, "Email");
        assert_eq!(built.uniques[0].value, "bruce@wayne.example");
    }

    #[test]
    fn test_batch_assigns_sequential_integer_ids() {
        let schema = StructureSchema::builder("Counter")
            .id(IdType::Int, "Id")
            .index("Name", DataTypeCode::String)
            .build()
            .unwrap();
        let items: Vec<_> = (0..3)
            .map(|i| serde_json::json!({ "Id": null, "Name": format!("c{i}") }))
            .collect();
        let built = StructureBuilder::new()
            .build_batch(&schema, &items, Some(IdPool::new(100, 3)))
            .unwrap();
        let ids: Vec<_> = built.iter().map(|b| b.id.clone()).collect();
        assert_eq!(
            ids,
            vec![StructureId::Int(100), StructureId::Int(101), StructureId::Int(102)]
        );
    }

    #[test]
    fn test_batch_pool_exhaustion_fails() {
        let schema = StructureSchema::builder("Counter")
            .id(IdType::Int, "Id")
            .index("Name", DataTypeCode::String)
            .build()
            .unwrap();
        let items: Vec<_> = (0..2)
            .map(|i| serde_json::json!({ "Id": null, "Name": format!("c{i}") }))
            .collect();
        let err = StructureBuilder::new()
            .build_batch(&schema, &items, Some(IdPool::new(1, 1)))
            .unwrap_err();
        assert!(matches!(err, StruktError::IdPoolExhausted(_)));
    }

    #[test]
    fn test_batch_seed_arithmetic() {
        assert_eq!(batch_seed(1, 0, 1000), 1);
        assert_eq!(batch_seed(1, 2, 1000), 2001);
    }
}
