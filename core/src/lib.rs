//! Core model and expression pipeline for the strukt document mapper.
//!
//! strukt persists plain objects into a relational schema by flattening
//! each object graph into three tables per type: a structures table
//! (identity + serialized document), an indexes table (one row per
//! indexable member-value), and a uniques table (application-level
//! uniqueness constraints). This crate holds everything that is
//! storage-agnostic:
//!
//! - **`schema`** — the declared shape of a type: [`StructureSchema`],
//!   [`IdAccessor`], [`IndexAccessor`], and the [`Structure`] trait.
//! - **`registry`** — the explicit process-lifetime schema cache.
//! - **`expr`** / **`nodes`** / **`parser`** — typed predicate, sorting,
//!   and include expressions, lowered into flat [`Node`] sequences.
//! - **`builder`** — flattening a populated object into index rows,
//!   unique rows, and the serialized body.
//!
//! The physical backend (query generation, schema synchronization,
//! migration) lives in `strukt-sqlite`.
//!
//! # Example
//!
//! ```
//! use strukt_core::expr::member;
//! use strukt_core::{
//!     DataTypeCode, IdType, SelectorParser, StructureBuilder, StructureSchema,
//! };
//!
//! let schema = StructureSchema::builder("Person")
//!     .id(IdType::Guid, "Id")
//!     .index("Name", DataTypeCode::String)
//!     .index("Age", DataTypeCode::IntegerNumber)
//!     .build()
//!     .unwrap();
//!
//! // Parse a predicate into the flat node sequence.
//! let predicate = member("Age").gt(30).and(member("Name").eq("Bruce"));
//! let parsed = SelectorParser::parse(&schema, &predicate).unwrap();
//! assert!(!parsed.is_empty());
//!
//! // Flatten an object into index rows.
//! let item = serde_json::json!({ "Id": null, "Name": "Bruce", "Age": 42 });
//! let built = StructureBuilder::new().build(&schema, &item, None).unwrap();
//! assert_eq!(built.indexes.len(), 2);
//! ```

pub mod builder;
pub mod error;
pub mod expr;
pub mod id;
pub mod nodes;
pub mod parser;
pub mod registry;
pub mod schema;
pub mod value;

pub use builder::{
    BuiltStructure, StructureBuilder, StructureIndex, StructureUniqueRow, batch_seed,
};
pub use error::{Result, StruktError};
pub use expr::{BinaryOp, Expr, SortDirection, SortingExpr};
pub use id::{IdPool, IdType, StructureId};
pub use nodes::{IncludeNode, MemberNode, Node, Operator, ParsedLambda, SortingNode};
pub use parser::{IncludeParser, SelectorParser, SortingParser};
pub use registry::SchemaRegistry;
pub use schema::{IdAccessor, IndexAccessor, SchemaBuilder, Structure, StructureSchema};
pub use value::{DataTypeCode, ELEMENT_CLOSE, ELEMENT_OPEN, Value};
