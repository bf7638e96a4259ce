//! Physical naming convention and DDL generation.
//!
//! A structure set named `Foo` owns three tables: `FooStructure (Id,
//! Json)`, `FooIndexes (StructureId, MemberPath, <value columns>)`, and
//! `FooUniques (StructureId, UqStructureId, UqMemberPath, UqValue)`.
//! Exactly one value column is populated per index row, selected by the
//! member's datatype family; only the families the schema actually uses
//! get a value column, which is what the column synchronizer diffs when a
//! schema changes shape.

use strukt_core::{DataTypeCode, IdType, StructureSchema};

/// Name of the structures table for a schema.
pub fn structure_table(schema: &StructureSchema) -> String {
    format!("{}Structure", schema.name())
}

/// Name of the indexes table for a schema.
pub fn indexes_table(schema: &StructureSchema) -> String {
    format!("{}Indexes", schema.name())
}

/// Name of the uniques table for a schema.
pub fn uniques_table(schema: &StructureSchema) -> String {
    format!("{}Uniques", schema.name())
}

/// Declared SQL type of an id column.
pub fn id_db_type(id_type: IdType) -> &'static str {
    match id_type {
        IdType::Guid | IdType::String => "TEXT",
        IdType::Int | IdType::BigInt => "INTEGER",
    }
}

/// Declared SQL type of a value column for a datatype family.
pub fn value_db_type(code: DataTypeCode) -> &'static str {
    match code {
        DataTypeCode::IntegerNumber | DataTypeCode::Bool => "INTEGER",
        DataTypeCode::FractalNumber => "REAL",
        // RFC 3339 UTC text sorts chronologically.
        DataTypeCode::DateTime => "TEXT",
        DataTypeCode::Guid
        | DataTypeCode::String
        | DataTypeCode::Text
        | DataTypeCode::Enum => "TEXT",
        DataTypeCode::Bytes => "BLOB",
    }
}

/// The value columns the indexes table needs for this schema, with their
/// declared types, in the fixed column order.
///
/// Multi-valued accessors store their flattened element string, so they
/// count toward the string family regardless of element type.
pub fn expected_value_columns(schema: &StructureSchema) -> Vec<(String, String)> {
    let mut families = [false; 6];
    for accessor in schema.index_accessors() {
        let code = if accessor.is_multi_valued() {
            DataTypeCode::String
        } else {
            accessor.data_type()
        };
        match code.value_column() {
            Some("StringValue") => families[0] = true,
            Some("IntegerValue") => families[1] = true,
            Some("FractalValue") => families[2] = true,
            Some("DateTimeValue") => families[3] = true,
            Some("BoolValue") => families[4] = true,
            Some("GuidValue") => families[5] = true,
            _ => {}
        }
    }
    let order = [
        ("StringValue", DataTypeCode::String),
        ("IntegerValue", DataTypeCode::IntegerNumber),
        ("FractalValue", DataTypeCode::FractalNumber),
        ("DateTimeValue", DataTypeCode::DateTime),
        ("BoolValue", DataTypeCode::Bool),
        ("GuidValue", DataTypeCode::Guid),
    ];
    order
        .iter()
        .enumerate()
        .filter(|(i, _)| families[*i])
        .map(|(_, (name, code))| (name.to_string(), value_db_type(*code).to_string()))
        .collect()
}

/// CREATE DDL for the structures table.
pub fn create_structure_sql(schema: &StructureSchema) -> String {
    let table = structure_table(schema);
    let id_type = id_db_type(schema.id_accessor().id_type());
    format!(
        "CREATE TABLE IF NOT EXISTS [{table}] (
    [Id] {id_type} NOT NULL PRIMARY KEY,
    [Json] TEXT NOT NULL
);\n"
    )
}

/// CREATE DDL for the indexes table, including its secondary indexes.
pub fn create_indexes_sql(schema: &StructureSchema) -> String {
    let table = indexes_table(schema);
    let id_type = id_db_type(schema.id_accessor().id_type());
    let mut columns = String::new();
    for (name, db_type) in expected_value_columns(schema) {
        columns.push_str(&format!(",\n    [{name}] {db_type} NULL"));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS [{table}] (
    [StructureId] {id_type} NOT NULL,
    [MemberPath] TEXT NOT NULL{columns}
);
CREATE INDEX IF NOT EXISTS [idx_{table}_sid] ON [{table}]([StructureId]);
CREATE INDEX IF NOT EXISTS [idx_{table}_path] ON [{table}]([MemberPath]);\n"
    )
}

/// CREATE DDL for the uniques table.
pub fn create_uniques_sql(schema: &StructureSchema) -> String {
    let table = uniques_table(schema);
    let id_type = id_db_type(schema.id_accessor().id_type());
    format!(
        "CREATE TABLE IF NOT EXISTS [{table}] (
    [StructureId] {id_type} NOT NULL,
    [UqStructureId] {id_type} NULL,
    [UqMemberPath] TEXT NOT NULL,
    [UqValue] TEXT NOT NULL,
    UNIQUE ([UqMemberPath], [UqValue])
);\n"
    )
}

/// DROP DDL for all three tables of a structure set.
pub fn drop_structure_set_sql(schema: &StructureSchema) -> String {
    format!(
        "DROP TABLE IF EXISTS [{}];\nDROP TABLE IF EXISTS [{}];\nDROP TABLE IF EXISTS [{}];\n",
        uniques_table(schema),
        indexes_table(schema),
        structure_table(schema),
    )
}
