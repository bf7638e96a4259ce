//! Structure-set migration: reshaping stored documents when a model
//! changes, without loading the whole set into memory.
//!
//! The migrator streams the source set in id order with keyset
//! pagination, hands each document to a caller-supplied modifier, and
//! commits the outcome batch by batch. The modifier decides per item:
//! keep the transformed document, trash it, or abort the whole run.
//! An abort stops before the current batch commits; batches already
//! committed stay committed. Batch boundaries are savepoints, so a caller
//! that needs the whole run atomic can hold an outer transaction on the
//! session connection and roll the entire migration back.
//!
//! Identity is the invariant: the modifier may change any member except
//! the id. A changed or cleared id fails the run with
//! [`SqliteError::IdentityMismatch`] instead of silently forking the
//! document.

use tracing::{info, warn};

use strukt_core::{Structure, StructureBuilder, StructureId, StructureSchema};

use crate::client::SqlId;
use crate::ddl;
use crate::error::{Result, SqliteError};
use crate::session::{Database, delete_satellite_rows, insert_built};
use crate::sync::SchemaUpserter;

/// Default number of documents per migration batch.
const DEFAULT_BATCH_SIZE: usize = 512;

/// Per-item verdict of a migration modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationAction {
    /// Persist the transformed document.
    #[default]
    Keep,
    /// Remove the document from the set.
    Trash,
    /// Stop the migration before committing the current batch.
    Abort,
}

/// Summary of one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Documents read from the source set.
    pub processed: usize,
    /// Documents written to the target set.
    pub kept: usize,
    /// Documents removed.
    pub trashed: usize,
    /// Whether the run stopped on an abort verdict.
    pub aborted: bool,
}

/// Streaming migrator over one database session.
pub struct Migrator<'a> {
    db: &'a Database,
    batch_size: usize,
}

impl<'a> Migrator<'a> {
    /// Creates a migrator with the default batch size.
    pub fn new(db: &'a Database) -> Self {
        Self { db, batch_size: DEFAULT_BATCH_SIZE }
    }

    /// Overrides the number of documents processed per transaction.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Migrates every document of `TOld`'s set through `modifier` into
    /// `TNew`'s set.
    ///
    /// Each stored document is deserialized twice: as `TOld` for the
    /// modifier to read, and as `TNew` as the mutable starting point —
    /// members shared between the shapes carry over, new members start at
    /// their deserialized defaults. When both types name the same set the
    /// migration rewrites it in place (processed source rows are deleted
    /// before kept documents are reinserted); otherwise kept documents land
    /// in the target set and the source set is left for the caller to drop.
    pub fn migrate<TOld, TNew>(
        &self,
        mut modifier: impl FnMut(&TOld, &mut TNew) -> MigrationAction,
    ) -> Result<MigrationReport>
    where
        TOld: Structure,
        TNew: Structure,
    {
        let old_schema = self.db.ensure_schema::<TOld>()?;
        // The registry caches schemas per set name; when both shapes name
        // the same set the target shape must win for the rest of the run,
        // and its tables must be current even if the set was already synced.
        self.db.registry().remove(old_schema.name());
        let new_schema = self.db.registry().get_or_create::<TNew>()?;
        SchemaUpserter::new(self.db.client()).upsert(&new_schema)?;

        let old_id_type = old_schema.id_accessor().id_type();
        let new_id_type = new_schema.id_accessor().id_type();
        if old_id_type != new_id_type {
            return Err(SqliteError::IncompatibleIdTypes {
                from: old_id_type,
                to: new_id_type,
            });
        }
        let same_set = old_schema.name() == new_schema.name();

        let builder = StructureBuilder::new();
        let mut report = MigrationReport::default();
        let mut last_id: Option<StructureId> = None;

        loop {
            let batch = self.fetch_batch(&old_schema, last_id.as_ref())?;
            let Some((tail_id, _)) = batch.last() else {
                break;
            };
            last_id = Some(tail_id.clone());

            // Verdicts are collected before any write so an abort discards
            // the whole batch.
            let mut kept = Vec::new();
            let mut processed_ids = Vec::new();
            for (id, json) in &batch {
                report.processed += 1;
                let old_item: TOld = serde_json::from_str(json)?;
                let mut new_item: TNew = serde_json::from_str(json)?;
                match modifier(&old_item, &mut new_item) {
                    MigrationAction::Keep => {
                        let built = builder.build(&new_schema, &new_item, None)?;
                        if built.id != *id {
                            return Err(SqliteError::IdentityMismatch {
                                old: id.to_string(),
                                new: built.id.to_string(),
                            });
                        }
                        kept.push(built);
                    }
                    MigrationAction::Trash => report.trashed += 1,
                    MigrationAction::Abort => {
                        report.processed -= 1;
                        report.aborted = true;
                        warn!(
                            schema = old_schema.name(),
                            processed = report.processed,
                            "migration aborted by modifier"
                        );
                        return Ok(report);
                    }
                }
                processed_ids.push(id.clone());
            }

            // Savepoints, not BEGIN: a caller wanting the whole run atomic
            // wraps it in an outer transaction and batches nest inside it.
            self.db.client().with_savepoint("strukt_migrate_batch", |tx| {
                if same_set {
                    for id in &processed_ids {
                        delete_satellite_rows(tx, &old_schema, id)?;
                        tx.execute(
                            &format!(
                                "DELETE FROM [{}] WHERE [Id] = ?1",
                                ddl::structure_table(&old_schema)
                            ),
                            [SqlId(id)],
                        )?;
                    }
                }
                for built in &kept {
                    insert_built(tx, &new_schema, built)?;
                    report.kept += 1;
                }
                Ok(())
            })?;
        }

        // Cached schemas may describe the pre-migration shape.
        self.db.registry().remove(old_schema.name());
        self.db.registry().remove(new_schema.name());
        info!(
            from = old_schema.name(),
            to = new_schema.name(),
            processed = report.processed,
            kept = report.kept,
            trashed = report.trashed,
            "migration finished"
        );
        Ok(report)
    }

    /// Rebuilds every index and unique row of `T`'s set from the stored
    /// documents. Returns the number of documents reindexed.
    ///
    /// Used after an index declaration changes without the documents
    /// themselves changing shape.
    pub fn regenerate_indexes<T: Structure>(&self) -> Result<usize> {
        let schema = self.db.ensure_schema::<T>()?;
        let builder = StructureBuilder::new();
        let mut count = 0;
        let mut last_id: Option<StructureId> = None;

        loop {
            let batch = self.fetch_batch(&schema, last_id.as_ref())?;
            let Some((tail_id, _)) = batch.last() else {
                break;
            };
            last_id = Some(tail_id.clone());

            self.db.client().with_savepoint("strukt_reindex_batch", |tx| {
                for (id, json) in &batch {
                    let built = builder.build_from_json(&schema, json)?;
                    delete_satellite_rows(tx, &schema, id)?;
                    crate::session::insert_satellite_rows(tx, &schema, &built)?;
                    count += 1;
                }
                Ok(())
            })?;
        }
        info!(schema = schema.name(), count, "indexes regenerated");
        Ok(count)
    }

    /// Reads the next batch of (id, document) pairs after `after`, in id
    /// order.
    fn fetch_batch(
        &self,
        schema: &StructureSchema,
        after: Option<&StructureId>,
    ) -> Result<Vec<(StructureId, String)>> {
        let table = ddl::structure_table(schema);
        let id_type = schema.id_accessor().id_type();
        let sql = match after {
            Some(_) => format!(
                "SELECT [Id], [Json] FROM [{table}] WHERE [Id] > ?1 \
                 ORDER BY [Id] LIMIT {}",
                self.batch_size
            ),
            None => format!(
                "SELECT [Id], [Json] FROM [{table}] ORDER BY [Id] LIMIT {}",
                self.batch_size
            ),
        };
        let conn = self.db.client().connection();
        let mut stmt = conn.prepare(&sql)?;
        let mut out = Vec::new();
        let mut rows = match after {
            Some(id) => stmt.query([SqlId(id)])?,
            None => stmt.query([])?,
        };
        while let Some(row) = rows.next()? {
            let id = match id_type {
                strukt_core::IdType::Guid => {
                    let text: String = row.get(0)?;
                    StructureId::Guid(uuid_from_text(schema, &text)?)
                }
                strukt_core::IdType::Int => StructureId::Int(row.get(0)?),
                strukt_core::IdType::BigInt => StructureId::BigInt(row.get(0)?),
                strukt_core::IdType::String => StructureId::String(row.get(0)?),
            };
            out.push((id, row.get(1)?));
        }
        Ok(out)
    }
}

fn uuid_from_text(schema: &StructureSchema, text: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(text).map_err(|e| {
        SqliteError::Migration(format!(
            "structure set '{}' holds a non-uuid id '{text}': {e}",
            schema.name()
        ))
    })
}
