//! Schema synchronization: reconciling a declared schema against the
//! physical tables without destroying unrelated data.
//!
//! When all three tables of a structure set exist, only column-level sync
//! runs: the declared value-column set is diffed against the physical
//! columns by name, producing [`SchemaChange`]s that are replayed as
//! ADD/DROP DDL. When any table is missing, CREATE DDL for the missing
//! ones is combined with the column sync of the existing ones into a
//! single batched execution inside one transaction — partial table
//! creation is not an accepted end state.

use tracing::{debug, info};

use strukt_core::StructureSchema;

use crate::client::{ColumnInfo, DbClient};
use crate::ddl;
use crate::error::{Result, SqliteError};

/// Columns of the indexes table that are never part of the diff.
const PROTECTED_COLUMNS: [&str; 2] = ["StructureId", "MemberPath"];

/// Kind of a column-level schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChangeKind {
    /// Declared but physically absent; replayed as ADD COLUMN.
    MissingColumn,
    /// Physically present but no longer declared; replayed as DROP COLUMN.
    ObsoleteColumn,
}

/// One column-level difference between declared and physical shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    /// Change kind.
    pub kind: SchemaChangeKind,
    /// Column name.
    pub name: String,
    /// Declared SQL type (declared type for missing columns, physical type
    /// for obsolete ones).
    pub db_data_type: String,
}

/// Outcome of one upsert: which tables were created and which columns
/// changed. An unchanged schema upserts to an empty report.
#[derive(Debug, Clone, Default)]
pub struct UpsertReport {
    /// Tables created by this upsert.
    pub created_tables: Vec<String>,
    /// Column changes applied to the indexes table.
    pub changes: Vec<SchemaChange>,
}

impl UpsertReport {
    /// Whether the upsert emitted no DDL at all.
    pub fn is_noop(&self) -> bool {
        self.created_tables.is_empty() && self.changes.is_empty()
    }
}

/// Diffs an expected column set against the physical columns by name.
///
/// The identity and member-path columns are excluded from the diff — they
/// are never dropped and never re-added.
pub fn diff_columns(
    expected: &[(String, String)],
    physical: &[ColumnInfo],
) -> Vec<SchemaChange> {
    let mut changes = Vec::new();
    for (name, db_data_type) in expected {
        if !physical.iter().any(|c| &c.name == name) {
            changes.push(SchemaChange {
                kind: SchemaChangeKind::MissingColumn,
                name: name.clone(),
                db_data_type: db_data_type.clone(),
            });
        }
    }
    for column in physical {
        if PROTECTED_COLUMNS.contains(&column.name.as_str()) {
            continue;
        }
        if !expected.iter().any(|(name, _)| name == &column.name) {
            changes.push(SchemaChange {
                kind: SchemaChangeKind::ObsoleteColumn,
                name: column.name.clone(),
                db_data_type: column.db_data_type.clone(),
            });
        }
    }
    changes
}

fn sync_sql(table: &str, changes: &[SchemaChange]) -> String {
    let mut sql = String::new();
    for change in changes {
        match change.kind {
            SchemaChangeKind::MissingColumn => {
                sql.push_str(&format!(
                    "ALTER TABLE [{table}] ADD COLUMN [{}] {} NULL;\n",
                    change.name, change.db_data_type
                ));
            }
            SchemaChangeKind::ObsoleteColumn => {
                sql.push_str(&format!(
                    "ALTER TABLE [{table}] DROP COLUMN [{}];\n",
                    change.name
                ));
            }
        }
    }
    sql
}

/// Create-if-absent-and-synchronize-if-present over a structure set's
/// physical tables.
pub struct SchemaUpserter<'a> {
    client: &'a DbClient,
}

impl<'a> SchemaUpserter<'a> {
    /// Creates an upserter over a client.
    pub fn new(client: &'a DbClient) -> Self {
        Self { client }
    }

    /// Ensures the three physical tables exist and match the declared
    /// shape. All emitted DDL runs in one transaction; any failure aborts
    /// the whole upsert.
    pub fn upsert(&self, schema: &StructureSchema) -> Result<UpsertReport> {
        let structure = ddl::structure_table(schema);
        let indexes = ddl::indexes_table(schema);
        let uniques = ddl::uniques_table(schema);

        let mut report = UpsertReport::default();
        let mut batch = String::new();

        for (table, create) in [
            (&structure, ddl::create_structure_sql(schema)),
            (&indexes, ddl::create_indexes_sql(schema)),
            (&uniques, ddl::create_uniques_sql(schema)),
        ] {
            if !self.client.table_exists(table)? {
                batch.push_str(&create);
                report.created_tables.push(table.clone());
            }
        }

        // Column sync only applies to an indexes table that already existed.
        if !report.created_tables.iter().any(|t| t == &indexes) {
            let physical = self.client.get_columns(&indexes)?;
            let expected = ddl::expected_value_columns(schema);
            report.changes = diff_columns(&expected, &physical);
            batch.push_str(&sync_sql(&indexes, &report.changes));
        }

        if batch.is_empty() {
            debug!(schema = schema.name(), "schema upsert is a no-op");
            return Ok(report);
        }

        self.client.with_savepoint("strukt_schema_upsert", |conn| {
            conn.execute_batch(&batch).map_err(|e| {
                SqliteError::SchemaSync(format!(
                    "upsert of structure set '{}' failed: {e}",
                    schema.name()
                ))
            })
        })?;
        info!(
            schema = schema.name(),
            created = report.created_tables.len(),
            changes = report.changes.len(),
            "schema upsert applied"
        );
        Ok(report)
    }

    /// Drops the three physical tables and the sequence bookkeeping row of
    /// a structure set, all in one atomic unit. Idempotent: absent tables
    /// are not an error.
    pub fn drop_structure_set(&self, schema: &StructureSchema) -> Result<()> {
        self.client.with_savepoint("strukt_drop_set", |conn| {
            conn.execute_batch(&ddl::drop_structure_set_sql(schema))?;
            self.client.remove_identities_row(schema.hash())
        })?;
        info!(schema = schema.name(), "structure set dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use strukt_core::{DataTypeCode, IdType, StructureSchema};

    use super::*;

    fn person_schema() -> StructureSchema {
        StructureSchema::builder("Person")
            .id(IdType::Guid, "Id")
            .index("Name", DataTypeCode::String)
            .index("Age", DataTypeCode::IntegerNumber)
            .build()
            .unwrap()
    }

    #[test]
    fn test_upsert_creates_all_three_tables() {
        let client = DbClient::open_in_memory().unwrap();
        let report = SchemaUpserter::new(&client).upsert(&person_schema()).unwrap();
        assert_eq!(report.created_tables.len(), 3);
        assert!(client.table_exists("PersonStructure").unwrap());
        assert!(client.table_exists("PersonIndexes").unwrap());
        assert!(client.table_exists("PersonUniques").unwrap());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let client = DbClient::open_in_memory().unwrap();
        let upserter = SchemaUpserter::new(&client);
        upserter.upsert(&person_schema()).unwrap();
        let second = upserter.upsert(&person_schema()).unwrap();
        assert!(second.is_noop());
    }

    #[test]
    fn test_upsert_adds_and_drops_value_columns() {
        let client = DbClient::open_in_memory().unwrap();
        let upserter = SchemaUpserter::new(&client);
        upserter.upsert(&person_schema()).unwrap();

        // Same type, reshaped: integer member replaced by a datetime one.
        let reshaped = StructureSchema::builder("Person")
            .id(IdType::Guid, "Id")
            .index("Name", DataTypeCode::String)
            .index("BornOn", DataTypeCode::DateTime)
            .build()
            .unwrap();
        let report = upserter.upsert(&reshaped).unwrap();
        assert!(report.created_tables.is_empty());
        assert!(report.changes.iter().any(|c| {
            c.kind == SchemaChangeKind::MissingColumn && c.name == "DateTimeValue"
        }));
        assert!(report.changes.iter().any(|c| {
            c.kind == SchemaChangeKind::ObsoleteColumn && c.name == "IntegerValue"
        }));

        let names: Vec<_> = client
            .get_columns("PersonIndexes")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(names.contains(&"DateTimeValue".to_string()));
        assert!(!names.contains(&"IntegerValue".to_string()));
        assert!(names.contains(&"StringValue".to_string()));
    }

    #[test]
    fn test_column_sync_leaves_unrelated_rows_intact() {
        let client = DbClient::open_in_memory().unwrap();
        let upserter = SchemaUpserter::new(&client);
        upserter.upsert(&person_schema()).unwrap();
        client
            .connection()
            .execute(
                "INSERT INTO [PersonIndexes] ([StructureId], [MemberPath], [StringValue]) \
                 VALUES ('x', 'Name', 'Bruce')",
                [],
            )
            .unwrap();

        let reshaped = StructureSchema::builder("Person")
            .id(IdType::Guid, "Id")
            .index("Name", DataTypeCode::String)
            .index("BornOn", DataTypeCode::DateTime)
            .build()
            .unwrap();
        upserter.upsert(&reshaped).unwrap();

        let value: String = client
            .connection()
            .query_row(
                "SELECT [StringValue] FROM [PersonIndexes] WHERE [MemberPath] = 'Name'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(value, "Bruce");
    }

    #[test]
    fn test_diff_excludes_protected_columns() {
        let physical = vec![
            ColumnInfo { name: "StructureId".into(), db_data_type: "TEXT".into() },
            ColumnInfo { name: "MemberPath".into(), db_data_type: "TEXT".into() },
            ColumnInfo { name: "StringValue".into(), db_data_type: "TEXT".into() },
        ];
        let expected = vec![("StringValue".to_string(), "TEXT".to_string())];
        assert!(diff_columns(&expected, &physical).is_empty());
    }

    #[test]
    fn test_drop_structure_set_removes_sequence_bookkeeping() {
        let client = DbClient::open_in_memory().unwrap();
        let upserter = SchemaUpserter::new(&client);
        let schema = person_schema();
        upserter.upsert(&schema).unwrap();
        client.check_out_ids(schema.hash(), 5).unwrap();

        upserter.drop_structure_set(&schema).unwrap();

        // Same drop call also cleared the seed row, so the sequence restarts.
        assert_eq!(client.check_out_ids(schema.hash(), 1).unwrap(), 1);
    }

    #[test]
    fn test_drop_structure_set_is_idempotent() {
        let client = DbClient::open_in_memory().unwrap();
        let upserter = SchemaUpserter::new(&client);
        let schema = person_schema();
        upserter.upsert(&schema).unwrap();
        upserter.drop_structure_set(&schema).unwrap();
        assert!(!client.table_exists("PersonStructure").unwrap());
        // Dropping again is not an error.
        upserter.drop_structure_set(&schema).unwrap();
    }
}
