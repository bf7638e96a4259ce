//! SQLite storage backend for the strukt document mapper.
//!
//! Persists each structure set into three physical tables — structures,
//! indexes, uniques — and answers typed queries by translating parsed
//! node sequences into parameterized SQL over the flattened index model.
//!
//! - **`client`** — the connection wrapper: introspection, batched DDL,
//!   and the atomic integer-id checkout.
//! - **`ddl`** — physical naming and CREATE/DROP generation.
//! - **`sync`** — create-if-absent, column-synchronize-if-present.
//! - **`query`** — node sequences to parameterized SQL.
//! - **`session`** — the [`Database`] facade and typed [`QueryBuilder`].
//! - **`migrate`** — streaming structure-set migration and reindexing.
//!
//! # Example
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use strukt_core::expr::member;
//! use strukt_core::{DataTypeCode, IdType, Structure, StructureSchema};
//! use strukt_sqlite::Database;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Person {
//!     #[serde(rename = "Id")]
//!     id: Option<uuid::Uuid>,
//!     #[serde(rename = "Name")]
//!     name: String,
//!     #[serde(rename = "Age")]
//!     age: i32,
//! }
//!
//! impl Structure for Person {
//!     fn schema() -> strukt_core::Result<StructureSchema> {
//!         StructureSchema::builder("Person")
//!             .id(IdType::Guid, "Id")
//!             .index("Name", DataTypeCode::String)
//!             .index("Age", DataTypeCode::IntegerNumber)
//!             .build()
//!     }
//! }
//!
//! # fn main() -> strukt_sqlite::Result<()> {
//! let db = Database::open_in_memory()?;
//! db.insert(&Person { id: None, name: "Bruce".into(), age: 42 })?;
//!
//! let adults: Vec<Person> = db.query::<Person>()?.filter(member("Age").gt(30))?.to_list()?;
//! assert_eq!(adults.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod ddl;
pub mod error;
pub mod migrate;
pub mod query;
pub mod session;
pub mod sync;

pub use client::{ColumnInfo, DbClient, SqlId, SqlValue};
pub use error::{Result, SqliteError};
pub use migrate::{MigrationAction, MigrationReport, Migrator};
pub use query::{Paging, SqlExpression, SqlParameter, SqlQuery, SqlQueryGenerator};
pub use session::{Database, QueryBuilder};
pub use sync::{SchemaChange, SchemaChangeKind, SchemaUpserter, UpsertReport};
