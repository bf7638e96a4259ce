//! The database session: the top-level API tying schema management,
//! structure building, and query generation to one SQLite connection.
//!
//! A [`Database`] owns the connection, the schema registry, and the
//! set of structure sets already synchronized this session. Write
//! operations flatten objects through the core builder and persist all
//! three tables of a structure set in one transaction; reads go through
//! the typed [`QueryBuilder`].

use std::cell::RefCell;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use rusqlite::{Connection, ToSql};
use tracing::debug;

use strukt_core::expr::{Expr, SortingExpr};
use strukt_core::{
    BuiltStructure, IdPool, IncludeNode, IncludeParser, Node, ParsedLambda, SchemaRegistry,
    SelectorParser, SortingParser, Structure, StructureBuilder, StructureId, StructureSchema,
};

use crate::client::{DbClient, SqlId, SqlValue};
use crate::ddl;
use crate::error::{Result, SqliteError};
use crate::query::{Paging, SqlQuery, SqlQueryGenerator, SqlExpression};
use crate::sync::SchemaUpserter;

/// A session over one SQLite database.
pub struct Database {
    client: DbClient,
    registry: SchemaRegistry,
    builder: StructureBuilder,
    synced: RefCell<HashSet<String>>,
}

impl Database {
    /// Opens a session over a database file.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::with_client(DbClient::open(path)?))
    }

    /// Opens a session over an in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_client(DbClient::open_in_memory()?))
    }

    fn with_client(client: DbClient) -> Self {
        Self {
            client,
            registry: SchemaRegistry::new(),
            builder: StructureBuilder::new(),
            synced: RefCell::new(HashSet::new()),
        }
    }

    /// The underlying storage client.
    pub fn client(&self) -> &DbClient {
        &self.client
    }

    /// The schema registry of this session.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Returns the schema for `T`, upserting its physical tables the first
    /// time the type is seen in this session.
    pub fn ensure_schema<T: Structure>(&self) -> Result<Arc<StructureSchema>> {
        let schema = self.registry.get_or_create::<T>()?;
        if self.synced.borrow().contains(schema.name()) {
            return Ok(schema);
        }
        SchemaUpserter::new(&self.client).upsert(&schema)?;
        self.synced.borrow_mut().insert(schema.name().to_string());
        Ok(schema)
    }

    /// Inserts one object, returning its assigned identity.
    pub fn insert<T: Structure>(&self, item: &T) -> Result<StructureId> {
        let schema = self.ensure_schema::<T>()?;
        let mut pool = self.check_out_pool(&schema, 1)?;
        let built = self.builder.build(&schema, item, pool.as_mut())?;
        let tx = self.client.connection().unchecked_transaction()?;
        insert_built(&tx, &schema, &built)?;
        tx.commit()?;
        Ok(built.id)
    }

    /// Inserts a batch of objects in one transaction, returning assigned
    /// identities in input order.
    pub fn insert_many<T: Structure + Sync>(&self, items: &[T]) -> Result<Vec<StructureId>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let schema = self.ensure_schema::<T>()?;
        let pool = self.check_out_pool(&schema, items.len())?;
        let built = self.builder.build_batch(&schema, items, pool)?;
        let tx = self.client.connection().unchecked_transaction()?;
        for b in &built {
            insert_built(&tx, &schema, b)?;
        }
        tx.commit()?;
        debug!(schema = schema.name(), count = built.len(), "batch inserted");
        Ok(built.into_iter().map(|b| b.id).collect())
    }

    /// Replaces a stored structure with the current state of `item`.
    ///
    /// The item must carry its identity; index and unique rows are rebuilt
    /// from scratch, never patched.
    pub fn update<T: Structure>(&self, item: &T) -> Result<()> {
        let schema = self.ensure_schema::<T>()?;
        let built = self.builder.build(&schema, item, None)?;
        let tx = self.client.connection().unchecked_transaction()?;
        let affected = tx.execute(
            &format!(
                "UPDATE [{}] SET [Json] = ?1 WHERE [Id] = ?2",
                ddl::structure_table(&schema)
            ),
            rusqlite::params![built.json, SqlId(&built.id)],
        )?;
        if affected == 0 {
            return Err(SqliteError::StructureNotFound(
                schema.name().to_string(),
                built.id.to_string(),
            ));
        }
        delete_satellite_rows(&tx, &schema, &built.id)?;
        insert_satellite_rows(&tx, &schema, &built)?;
        tx.commit()?;
        Ok(())
    }

    /// Fetches a structure by identity.
    pub fn get_by_id<T: Structure>(&self, id: &StructureId) -> Result<Option<T>> {
        match self.get_by_id_as_json::<T>(id)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Fetches the raw serialized body of a structure by identity.
    pub fn get_by_id_as_json<T: Structure>(&self, id: &StructureId) -> Result<Option<String>> {
        let schema = self.ensure_schema::<T>()?;
        let mut stmt = self.client.connection().prepare(&format!(
            "SELECT [Json] FROM [{}] WHERE [Id] = ?1",
            ddl::structure_table(&schema)
        ))?;
        let mut rows = stmt.query([SqlId(id)])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Deletes a structure and its index and unique rows by identity.
    /// Returns whether a structure existed.
    pub fn delete_by_id<T: Structure>(&self, id: &StructureId) -> Result<bool> {
        let schema = self.ensure_schema::<T>()?;
        let tx = self.client.connection().unchecked_transaction()?;
        delete_satellite_rows(&tx, &schema, id)?;
        let affected = tx.execute(
            &format!(
                "DELETE FROM [{}] WHERE [Id] = ?1",
                ddl::structure_table(&schema)
            ),
            [SqlId(id)],
        )?;
        tx.commit()?;
        Ok(affected > 0)
    }

    /// Drops the whole structure set of `T`: physical tables, sequence
    /// bookkeeping, and the cached schema.
    pub fn drop_structure_set<T: Structure>(&self) -> Result<()> {
        let schema = self.registry.get_or_create::<T>()?;
        SchemaUpserter::new(&self.client).drop_structure_set(&schema)?;
        self.registry.remove(schema.name());
        self.synced.borrow_mut().remove(schema.name());
        Ok(())
    }

    /// Starts a typed query over the structure set of `T`.
    pub fn query<T: Structure>(&self) -> Result<QueryBuilder<'_, T>> {
        let schema = self.ensure_schema::<T>()?;
        Ok(QueryBuilder {
            db: self,
            schema,
            criteria: ParsedLambda::default(),
            sortings: ParsedLambda::default(),
            includes: Vec::new(),
            paging: None,
            take: None,
            _marker: PhantomData,
        })
    }

    fn check_out_pool(
        &self,
        schema: &StructureSchema,
        count: usize,
    ) -> Result<Option<IdPool>> {
        if !schema.id_accessor().id_type().is_sequence_assigned() {
            return Ok(None);
        }
        let first = self.client.check_out_ids(schema.hash(), count)?;
        Ok(Some(IdPool::new(first, count)))
    }

    fn run(&self, query: &SqlQuery, mut on_row: impl FnMut(&rusqlite::Row<'_>) -> Result<()>) -> Result<()> {
        let mut stmt = self.client.connection().prepare(&query.sql)?;
        let holders: Vec<SqlValue<'_>> =
            query.parameters.iter().map(|p| SqlValue(&p.value)).collect();
        let bindings: Vec<(&str, &dyn ToSql)> = query
            .parameters
            .iter()
            .zip(holders.iter())
            .map(|(p, h)| (p.name.as_str(), h as &dyn ToSql))
            .collect();
        let mut rows = stmt.query(&bindings[..])?;
        while let Some(row) = rows.next()? {
            on_row(row)?;
        }
        Ok(())
    }
}

pub(crate) fn insert_built(
    tx: &Connection,
    schema: &StructureSchema,
    built: &BuiltStructure,
) -> Result<()> {
    tx.execute(
        &format!(
            "INSERT INTO [{}] ([Id], [Json]) VALUES (?1, ?2)",
            ddl::structure_table(schema)
        ),
        rusqlite::params![SqlId(&built.id), built.json],
    )?;
    insert_satellite_rows(tx, schema, built)?;
    Ok(())
}

pub(crate) fn insert_satellite_rows(
    tx: &Connection,
    schema: &StructureSchema,
    built: &BuiltStructure,
) -> Result<()> {
    let indexes_table = ddl::indexes_table(schema);
    for index in &built.indexes {
        match index.data_type.value_column() {
            Some(column) => {
                tx.execute(
                    &format!(
                        "INSERT INTO [{indexes_table}] \
                         ([StructureId], [MemberPath], [{column}]) VALUES (?1, ?2, ?3)"
                    ),
                    rusqlite::params![SqlId(&built.id), index.path, SqlValue(&index.value)],
                )?;
            }
            // Byte members keep presence only.
            None => {
                tx.execute(
                    &format!(
                        "INSERT INTO [{indexes_table}] \
                         ([StructureId], [MemberPath]) VALUES (?1, ?2)"
                    ),
                    rusqlite::params![SqlId(&built.id), index.path],
                )?;
            }
        }
    }
    let uniques_table = ddl::uniques_table(schema);
    for unique in &built.uniques {
        tx.execute(
            &format!(
                "INSERT INTO [{uniques_table}] \
                 ([StructureId], [UqStructureId], [UqMemberPath], [UqValue]) \
                 VALUES (?1, NULL, ?2, ?3)"
            ),
            rusqlite::params![SqlId(&built.id), unique.path, unique.value],
        )?;
    }
    Ok(())
}

pub(crate) fn delete_satellite_rows(
    tx: &Connection,
    schema: &StructureSchema,
    id: &StructureId,
) -> Result<()> {
    tx.execute(
        &format!(
            "DELETE FROM [{}] WHERE [StructureId] = ?1",
            ddl::indexes_table(schema)
        ),
        [SqlId(id)],
    )?;
    tx.execute(
        &format!(
            "DELETE FROM [{}] WHERE [StructureId] = ?1",
            ddl::uniques_table(schema)
        ),
        [SqlId(id)],
    )?;
    Ok(())
}

/// A typed, composable query over one structure set.
///
/// Repeated [`filter`](Self::filter) calls merge into one conjunction.
/// Terminal methods generate SQL, bind parameters, and materialize rows.
pub struct QueryBuilder<'a, T> {
    db: &'a Database,
    schema: Arc<StructureSchema>,
    criteria: ParsedLambda,
    sortings: ParsedLambda,
    includes: Vec<IncludeNode>,
    paging: Option<Paging>,
    take: Option<usize>,
    _marker: PhantomData<T>,
}

impl<T: Structure> QueryBuilder<'_, T> {
    /// Adds a predicate; successive predicates are And-joined.
    pub fn filter(mut self, expr: Expr) -> Result<Self> {
        let parsed = SelectorParser::parse(&self.schema, &expr)?;
        self.criteria = std::mem::take(&mut self.criteria).merge(parsed);
        Ok(self)
    }

    /// Sets the sort order.
    pub fn sort(mut self, sortings: &[SortingExpr]) -> Result<Self> {
        self.sortings = SortingParser::parse(&self.schema, sortings)?;
        Ok(self)
    }

    /// Projects a referenced child document as an extra column named after
    /// the child structure set.
    pub fn include<C: Structure>(mut self, reference_path: &str) -> Result<Self> {
        let child = self.db.ensure_schema::<C>()?;
        self.includes
            .push(IncludeParser::parse(&self.schema, &child, reference_path)?);
        Ok(self)
    }

    /// Restricts results to one page.
    pub fn page(mut self, page_index: usize, page_size: usize) -> Self {
        self.paging = Some(Paging { page_index, page_size });
        self
    }

    /// Restricts results to the first `n` rows.
    pub fn take(mut self, n: usize) -> Self {
        self.take = Some(n);
        self
    }

    /// Runs the query and deserializes every row.
    pub fn to_list(self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        self.stream_json(|json| {
            items.push(serde_json::from_str(&json)?);
            Ok(())
        })?;
        Ok(items)
    }

    /// Runs the query and returns the first row, if any.
    pub fn first(mut self) -> Result<Option<T>> {
        if self.paging.is_none() {
            self.take = Some(1);
        }
        Ok(self.to_list()?.into_iter().next())
    }

    /// Runs the query returning parent bodies together with the included
    /// child bodies, in include declaration order.
    pub fn to_rows(self) -> Result<Vec<(String, Vec<Option<String>>)>> {
        let include_count = self.includes.len();
        let query = self.generate()?;
        let mut rows = Vec::new();
        self.db.run(&query, |row| {
            let json: String = row.get(0)?;
            let mut children = Vec::with_capacity(include_count);
            for i in 0..include_count {
                children.push(row.get(i + 1)?);
            }
            rows.push((json, children));
            Ok(())
        })?;
        Ok(rows)
    }

    /// Counts matching structures without materializing them.
    pub fn count(self) -> Result<i64> {
        let query = SqlQueryGenerator::new(&self.schema).generate_count(&self.criteria)?;
        let mut count = 0;
        self.db.run(&query, |row| {
            count = row.get(0)?;
            Ok(())
        })?;
        Ok(count)
    }

    /// Streams raw serialized bodies without deserializing, one callback
    /// per row in result order.
    pub fn for_each_json(self, mut f: impl FnMut(String) -> Result<()>) -> Result<()> {
        self.stream_json(&mut f)
    }

    fn stream_json(self, mut on_json: impl FnMut(String) -> Result<()>) -> Result<()> {
        let query = self.generate()?;
        self.db.run(&query, |row| on_json(row.get(0)?))
    }

    fn generate(&self) -> Result<SqlQuery> {
        SqlQueryGenerator::new(&self.schema).generate(&SqlExpression {
            criteria: self.criteria.clone(),
            sortings: self.sortings.clone(),
            includes: ParsedLambda::new(
                self.includes.iter().cloned().map(Node::Include).collect(),
            ),
            paging: self.paging,
            take: self.take,
        })
    }
}
