//! Low-level storage client over a `rusqlite` connection.
//!
//! Wraps the connection with the small contract the rest of the backend
//! consumes: table introspection, batched DDL execution, transactions, and
//! the atomic integer-id checkout. Everything above this module speaks in
//! schemas and node sequences, never in raw connections.

use rusqlite::types::{ToSqlOutput, Value as SqlLiteValue};
use rusqlite::{Connection, ToSql};

use strukt_core::{StructureId, Value};

use crate::error::Result;

/// Physical table holding the id sequence seed per structure set, keyed by
/// the schema's stable hash.
pub const IDENTITIES_TABLE: &str = "StruktIdentities";

/// One physical column of a table: name and declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared SQL type.
    pub db_data_type: String,
}

/// Binds a core [`Value`] as a SQL parameter.
///
/// Timestamps bind as RFC 3339 text and uuids as hyphenated text, matching
/// the stable rendering index rows are written with.
pub struct SqlValue<'a>(pub &'a Value);

impl ToSql for SqlValue<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let out = match self.0 {
            Value::Null => ToSqlOutput::Owned(SqlLiteValue::Null),
            Value::Int(i) => ToSqlOutput::Owned(SqlLiteValue::Integer(*i)),
            Value::Fractal(f) => ToSqlOutput::Owned(SqlLiteValue::Real(*f)),
            Value::Bool(b) => ToSqlOutput::Owned(SqlLiteValue::Integer(i64::from(*b))),
            Value::DateTime(_) | Value::Guid(_) => {
                ToSqlOutput::Owned(SqlLiteValue::Text(self.0.render()))
            }
            Value::String(s) => ToSqlOutput::Owned(SqlLiteValue::Text(s.clone())),
        };
        Ok(out)
    }
}

/// Binds a [`StructureId`] as a SQL parameter.
pub struct SqlId<'a>(pub &'a StructureId);

impl ToSql for SqlId<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let out = match self.0 {
            StructureId::Guid(g) => {
                ToSqlOutput::Owned(SqlLiteValue::Text(g.hyphenated().to_string()))
            }
            StructureId::Int(i) => ToSqlOutput::Owned(SqlLiteValue::Integer(i64::from(*i))),
            StructureId::BigInt(i) => ToSqlOutput::Owned(SqlLiteValue::Integer(*i)),
            StructureId::String(s) => ToSqlOutput::Owned(SqlLiteValue::Text(s.clone())),
        };
        Ok(out)
    }
}

/// Storage client owning one SQLite connection.
pub struct DbClient {
    conn: Connection,
}

impl DbClient {
    /// Opens a client over a database file.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Opens a client over an in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Whether a table exists.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1")?;
        let count: i64 = stmt.query_row([name], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Physical columns of a table, in declaration order.
    pub fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info([{table}])"))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    db_data_type: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// Executes a batch of statements.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Runs `f` as one atomic unit delimited by a savepoint.
    ///
    /// Savepoints nest inside a transaction the caller may already hold on
    /// this connection, where an explicit `BEGIN` would fail. On error the
    /// savepoint is rolled back and released before the error propagates.
    pub fn with_savepoint<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        self.conn.execute_batch(&format!("SAVEPOINT {name};"))?;
        match f(&self.conn) {
            Ok(value) => {
                self.conn.execute_batch(&format!("RELEASE {name};"))?;
                Ok(value)
            }
            Err(e) => {
                let _ = self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"));
                Err(e)
            }
        }
    }

    /// Atomically checks out `count` integer ids for a structure set and
    /// advances the stored seed.
    ///
    /// Implemented as a single locked update-and-return round trip, never a
    /// client-side read-then-write, so concurrent writers cannot observe
    /// the same range. Returns the first id of the checked-out range.
    pub fn check_out_ids(&self, schema_hash: &str, count: usize) -> Result<i64> {
        self.ensure_identities_table()?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            &format!(
                "INSERT OR IGNORE INTO [{IDENTITIES_TABLE}] ([SchemaHash], [Seed]) VALUES (?1, 0)"
            ),
            [schema_hash],
        )?;
        let new_seed: i64 = tx.query_row(
            &format!(
                "UPDATE [{IDENTITIES_TABLE}] SET [Seed] = [Seed] + ?1 \
                 WHERE [SchemaHash] = ?2 RETURNING [Seed]"
            ),
            rusqlite::params![count as i64, schema_hash],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(new_seed - count as i64 + 1)
    }

    /// Removes the sequence bookkeeping row of a structure set. Idempotent.
    pub fn remove_identities_row(&self, schema_hash: &str) -> Result<()> {
        if self.table_exists(IDENTITIES_TABLE)? {
            self.conn.execute(
                &format!("DELETE FROM [{IDENTITIES_TABLE}] WHERE [SchemaHash] = ?1"),
                [schema_hash],
            )?;
        }
        Ok(())
    }

    fn ensure_identities_table(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS [{IDENTITIES_TABLE}] (
                [SchemaHash] TEXT NOT NULL PRIMARY KEY,
                [Seed] INTEGER NOT NULL DEFAULT 0
            );"
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_exists() {
        let client = DbClient::open_in_memory().unwrap();
        assert!(!client.table_exists("Nope").unwrap());
        client
            .execute_batch("CREATE TABLE T ([A] INTEGER);")
            .unwrap();
        assert!(client.table_exists("T").unwrap());
    }

    #[test]
    fn test_get_columns_reports_names_and_types() {
        let client = DbClient::open_in_memory().unwrap();
        client
            .execute_batch("CREATE TABLE T ([A] INTEGER, [B] TEXT);")
            .unwrap();
        let cols = client.get_columns("T").unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].name, "A");
        assert_eq!(cols[0].db_data_type, "INTEGER");
        assert_eq!(cols[1].name, "B");
    }

    #[test]
    fn test_check_out_ids_advances_seed() {
        let client = DbClient::open_in_memory().unwrap();
        let first = client.check_out_ids("abc", 10).unwrap();
        assert_eq!(first, 1);
        let second = client.check_out_ids("abc", 5).unwrap();
        assert_eq!(second, 11);

        // Ranges per hash are independent.
        let other = client.check_out_ids("def", 3).unwrap();
        assert_eq!(other, 1);
    }

    #[test]
    fn test_savepoint_nests_in_caller_transaction_and_rolls_back_on_error() {
        let client = DbClient::open_in_memory().unwrap();
        client.execute_batch("CREATE TABLE T ([A] INTEGER);").unwrap();
        client.connection().execute_batch("BEGIN;").unwrap();

        client
            .with_savepoint("sp", |conn| {
                conn.execute("INSERT INTO T VALUES (1)", [])?;
                Ok(())
            })
            .unwrap();
        let failed: Result<()> = client.with_savepoint("sp", |conn| {
            conn.execute("INSERT INTO T VALUES (2)", [])?;
            Err(crate::error::SqliteError::SchemaSync("forced".into()))
        });
        assert!(failed.is_err());

        client.connection().execute_batch("COMMIT;").unwrap();
        let count: i64 = client
            .connection()
            .query_row("SELECT COUNT(*) FROM T", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_remove_identities_row_is_idempotent() {
        let client = DbClient::open_in_memory().unwrap();
        client.remove_identities_row("abc").unwrap();
        client.check_out_ids("abc", 1).unwrap();
        client.remove_identities_row("abc").unwrap();
        // Seed restarts after removal.
        assert_eq!(client.check_out_ids("abc", 1).unwrap(), 1);
    }
}
