//! Structure identity: the typed id value and its physical classification.
//!
//! [`StructureId`] wraps the identity value of one persisted structure and
//! must compare consistently across the storage and query layers — it is
//! the join key between a structure row, its index rows, and migration
//! trash/keep bookkeeping.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// The physical identity type of a structure set.
///
/// Determines the primary-key DDL of the structures table and how new ids
/// are produced: `Guid` ids are generated client-side, `Int`/`BigInt` ids
/// are checked out from a storage-side sequence, `String` ids must be
/// assigned by the application before insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    /// Uuid identity, generated on insert when absent.
    Guid,
    /// 32-bit integer identity, sequence-assigned.
    Int,
    /// 64-bit integer identity, sequence-assigned.
    BigInt,
    /// String identity, application-assigned.
    String,
}

impl IdType {
    /// Whether ids of this type are checked out from the storage sequence.
    pub fn is_sequence_assigned(self) -> bool {
        matches!(self, Self::Int | Self::BigInt)
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Guid => "Guid",
            Self::Int => "Int",
            Self::BigInt => "BigInt",
            Self::String => "String",
        };
        f.write_str(s)
    }
}

/// The identity value of one persisted structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StructureId {
    /// Uuid identity.
    Guid(Uuid),
    /// 32-bit integer identity.
    Int(i32),
    /// 64-bit integer identity.
    BigInt(i64),
    /// String identity.
    String(String),
}

impl StructureId {
    /// The physical classification of this id.
    pub fn id_type(&self) -> IdType {
        match self {
            Self::Guid(_) => IdType::Guid,
            Self::Int(_) => IdType::Int,
            Self::BigInt(_) => IdType::BigInt,
            Self::String(_) => IdType::String,
        }
    }

    /// Reads an id of the declared type out of a JSON identity member.
    ///
    /// Returns `None` when the member is null, absent, or does not match
    /// the declared type.
    pub fn from_json(json: &serde_json::Value, id_type: IdType) -> Option<StructureId> {
        match (id_type, json) {
            (IdType::Guid, serde_json::Value::String(s)) => {
                Uuid::parse_str(s).ok().map(StructureId::Guid)
            }
            (IdType::Int, serde_json::Value::Number(n)) => {
                n.as_i64().and_then(|v| i32::try_from(v).ok()).map(StructureId::Int)
            }
            (IdType::BigInt, serde_json::Value::Number(n)) => {
                n.as_i64().map(StructureId::BigInt)
            }
            (IdType::String, serde_json::Value::String(s)) => {
                Some(StructureId::String(s.clone()))
            }
            _ => None,
        }
    }

    /// The JSON rendering of this id, as written into documents.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Guid(g) => serde_json::Value::String(g.hyphenated().to_string()),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::BigInt(i) => serde_json::Value::from(*i),
            Self::String(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// The query-layer value of this id, used for parameter binding.
    pub fn value(&self) -> Value {
        match self {
            Self::Guid(g) => Value::Guid(*g),
            Self::Int(i) => Value::Int(i64::from(*i)),
            Self::BigInt(i) => Value::Int(*i),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guid(g) => write!(f, "{}", g.hyphenated()),
            Self::Int(i) => write!(f, "{i}"),
            Self::BigInt(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A contiguous range of checked-out integer ids.
///
/// The storage layer checks out `count` ids in one atomic round trip and
/// hands the range to the structure builder. Parallel batches receive
/// non-overlapping ranges because each checkout advances the stored seed.
#[derive(Debug, Clone)]
pub struct IdPool {
    next: i64,
    remaining: usize,
}

impl IdPool {
    /// Creates a pool starting at `first` holding `count` ids.
    pub fn new(first: i64, count: usize) -> Self {
        Self { next: first, remaining: count }
    }

    /// Takes the next id from the pool, typed per the schema's id type.
    pub fn take(&mut self, id_type: IdType) -> Option<StructureId> {
        if self.remaining == 0 {
            return None;
        }
        let v = self.next;
        self.next += 1;
        self.remaining -= 1;
        match id_type {
            IdType::Int => i32::try_from(v).ok().map(StructureId::Int),
            IdType::BigInt => Some(StructureId::BigInt(v)),
            _ => None,
        }
    }

    /// Ids still available in the pool.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}
