//! Relational query generation from parsed node sequences.
//!
//! [`SqlQueryGenerator`] consumes the flat node sequences the core parsers
//! produced and emits parameterized SQL against the flattened index model.
//! The where processor is a small three-slot state machine — pending
//! member, pending operator, pending value — mirroring the linear node
//! sequence instead of rebuilding a tree: once all three slots are filled
//! the triple flushes as one predicate fragment and the slots reset.
//!
//! The identity member is special-cased to the structures table
//! (`s.[Id] op @pN`); every other member probes the indexes table with a
//! `(MemberPath = 'path' AND ValueColumn op @pN)` fragment wrapped in a
//! correlated EXISTS, which is what lets fragments over different members
//! compose under AND/OR against one-row-per-member storage.

use strukt_core::{
    DataTypeCode, MemberNode, Node, Operator, ParsedLambda, SortDirection, StructureSchema,
    Value,
};

use crate::ddl;
use crate::error::{Result, SqliteError};

/// A named, typed parameter binding of a generated query.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParameter {
    /// Parameter name, `@p0`, `@p1`, …
    pub name: String,
    /// Bound value.
    pub value: Value,
}

/// A generated query: SQL text plus its parameter list.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    /// SQL text.
    pub sql: String,
    /// Parameters, uniquely named, in binding order.
    pub parameters: Vec<SqlParameter>,
}

/// Paging bounds: zero-based page index and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    /// Zero-based page index.
    pub page_index: usize,
    /// Rows per page.
    pub page_size: usize,
}

/// The full configuration of one query: criteria, sortings, includes, and
/// row-limiting options.
#[derive(Debug, Clone, Default)]
pub struct SqlExpression {
    /// Parsed predicate; empty means no WHERE clause.
    pub criteria: ParsedLambda,
    /// Parsed sortings; empty means storage order (or the injected default
    /// sort when paging).
    pub sortings: ParsedLambda,
    /// Parsed include directives (include nodes), applied in declaration
    /// order.
    pub includes: ParsedLambda,
    /// Paging window; rewrites the query into a row-numbered CTE.
    pub paging: Option<Paging>,
    /// Plain row limit, used only without paging.
    pub take: Option<usize>,
}

/// Generates parameterized SQL for one structure schema.
pub struct SqlQueryGenerator<'a> {
    schema: &'a StructureSchema,
}

impl<'a> SqlQueryGenerator<'a> {
    /// Creates a generator for a schema.
    pub fn new(schema: &'a StructureSchema) -> Self {
        Self { schema }
    }

    /// Generates the row-returning query for an expression.
    pub fn generate(&self, expr: &SqlExpression) -> Result<SqlQuery> {
        let mut params = Vec::new();
        let where_sql = self.where_sql(&expr.criteria, &mut params)?;
        let include_sql = self.include_sql(&expr.includes)?;
        let order_sql = self.order_by_sql(&expr.sortings)?;

        if let Some(paging) = expr.paging {
            return self.paged_query(expr, &where_sql, &include_sql, &order_sql, paging, params);
        }

        let mut sql = format!(
            "SELECT s.[Json]{include_sql} FROM [{}] s",
            ddl::structure_table(self.schema)
        );
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        if !order_sql.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_sql);
        }
        if let Some(take) = expr.take {
            sql.push_str(&format!(" LIMIT {take}"));
        }
        Ok(SqlQuery { sql, parameters: params })
    }

    /// Generates the count query for a predicate.
    pub fn generate_count(&self, criteria: &ParsedLambda) -> Result<SqlQuery> {
        let mut params = Vec::new();
        let where_sql = self.where_sql(criteria, &mut params)?;
        let mut sql = format!(
            "SELECT COUNT(*) FROM [{}] s",
            ddl::structure_table(self.schema)
        );
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        Ok(SqlQuery { sql, parameters: params })
    }

    fn paged_query(
        &self,
        expr: &SqlExpression,
        where_sql: &str,
        include_sql: &str,
        order_sql: &str,
        paging: Paging,
        mut params: Vec<SqlParameter>,
    ) -> Result<SqlQuery> {
        // Paging must be stable across calls: without an explicit sort a
        // deterministic identity sort is injected.
        let order = if order_sql.is_empty() {
            "s.[Id] ASC".to_string()
        } else {
            order_sql.to_string()
        };
        let mut projection = "[Json]".to_string();
        for node in expr.includes.nodes() {
            if let Node::Include(include) = node {
                projection.push_str(&format!(", [{}]", include.alias));
            }
        }
        let where_clause = if where_sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {where_sql}")
        };

        let low = (paging.page_index * paging.page_size + 1) as i64;
        let high = (paging.page_index * paging.page_size + paging.page_size) as i64;
        let low_name = push_param(&mut params, Value::Int(low));
        let high_name = push_param(&mut params, Value::Int(high));

        let sql = format!(
            "WITH pagedRs AS (SELECT s.[Json]{include_sql}, \
             ROW_NUMBER() OVER (ORDER BY {order}) AS [RowNum] \
             FROM [{structure}] s{where_clause}) \
             SELECT {projection} FROM pagedRs \
             WHERE [RowNum] BETWEEN {low_name} AND {high_name} ORDER BY [RowNum]",
            structure = ddl::structure_table(self.schema),
        );
        Ok(SqlQuery { sql, parameters: params })
    }

    fn where_sql(
        &self,
        criteria: &ParsedLambda,
        params: &mut Vec<SqlParameter>,
    ) -> Result<String> {
        if criteria.is_empty() {
            return Ok(String::new());
        }
        let mut processor = WhereProcessor {
            indexes_table: ddl::indexes_table(self.schema),
            sql: String::new(),
            params,
            member: None,
            op: None,
            value: None,
        };
        processor.process(criteria.nodes())?;
        Ok(processor.sql)
    }

    fn order_by_sql(&self, sortings: &ParsedLambda) -> Result<String> {
        let mut items = Vec::new();
        for node in sortings.nodes() {
            let Node::Sorting(sorting) = node else {
                return Err(SqliteError::QueryGeneration(
                    "sorting sequence contains a non-sorting node".to_string(),
                ));
            };
            let dir = match sorting.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            if sorting.is_id {
                items.push(format!("s.[Id] {dir}"));
            } else {
                let column = value_column(sorting.data_type)?;
                items.push(format!(
                    "(SELECT si.[{column}] FROM [{indexes}] si \
                     WHERE si.[StructureId] = s.[Id] AND si.[MemberPath] = '{path}') {dir}",
                    indexes = ddl::indexes_table(self.schema),
                    path = sorting.path,
                ));
            }
        }
        Ok(items.join(", "))
    }

    fn include_sql(&self, includes: &ParsedLambda) -> Result<String> {
        let mut sql = String::new();
        for node in includes.nodes() {
            let Node::Include(include) = node else {
                return Err(SqliteError::QueryGeneration(
                    "include sequence contains a non-include node".to_string(),
                ));
            };
            let ref_column = value_column(include.reference_data_type)?;
            sql.push_str(&format!(
                ", (SELECT cs.[Json] FROM [{child}Structure] cs \
                 WHERE cs.[Id] = (SELECT ci.[{ref_column}] FROM [{indexes}] ci \
                 WHERE ci.[StructureId] = s.[Id] AND ci.[MemberPath] = '{path}')) \
                 AS [{alias}]",
                child = include.child_schema_name,
                indexes = ddl::indexes_table(self.schema),
                path = include.reference_path,
                alias = include.alias,
            ));
        }
        Ok(sql)
    }
}

fn value_column(code: DataTypeCode) -> Result<&'static str> {
    code.value_column().ok_or_else(|| {
        SqliteError::QueryGeneration("byte members carry no value column".to_string())
    })
}

fn push_param(params: &mut Vec<SqlParameter>, value: Value) -> String {
    // Names are unique by construction; the set dedups by name equality.
    let name = format!("@p{}", params.len());
    params.push(SqlParameter { name: name.clone(), value });
    name
}

/// Pending value slot of the where state machine.
enum PendingValue {
    One(Value),
    Many(Vec<Value>),
    Null,
}

/// Three-slot state machine translating a where node sequence to SQL.
struct WhereProcessor<'a> {
    indexes_table: String,
    sql: String,
    params: &'a mut Vec<SqlParameter>,
    member: Option<MemberNode>,
    op: Option<Operator>,
    value: Option<PendingValue>,
}

impl WhereProcessor<'_> {
    fn process(&mut self, nodes: &[Node]) -> Result<()> {
        for node in nodes {
            match node {
                Node::Member(member) => self.member = Some(member.clone()),
                Node::Operator(op) => match op {
                    Operator::And => self.sql.push_str(" AND "),
                    Operator::Or => self.sql.push_str(" OR "),
                    // NOT is prefix, not infix: no trailing operator padding,
                    // the parenthesized operand follows directly.
                    Operator::Not => self.sql.push_str("NOT "),
                    other => self.op = Some(*other),
                },
                Node::Value(value) => self.value = Some(PendingValue::One(value.clone())),
                Node::ArrayValue(values) => {
                    self.value = Some(PendingValue::Many(values.clone()));
                }
                Node::Null => self.value = Some(PendingValue::Null),
                Node::GroupStart => self.sql.push('('),
                Node::GroupEnd => self.sql.push(')'),
                Node::Sorting(_) | Node::Include(_) => {
                    return Err(SqliteError::QueryGeneration(
                        "where sequence contains a sorting or include node".to_string(),
                    ));
                }
            }
            self.try_flush()?;
        }
        if self.member.is_some() || self.op.is_some() || self.value.is_some() {
            return Err(SqliteError::QueryGeneration(
                "predicate ended with an incomplete member/operator/value triple".to_string(),
            ));
        }
        Ok(())
    }

    /// Flushes one fragment once the member, operator, and value slots are
    /// all filled, then resets the slots.
    fn try_flush(&mut self) -> Result<()> {
        if self.member.is_none() || self.op.is_none() || self.value.is_none() {
            return Ok(());
        }
        let (Some(member), Some(op), Some(value)) =
            (self.member.take(), self.op.take(), self.value.take())
        else {
            return Ok(());
        };

        let fragment = if member.is_id {
            self.id_fragment(op, value)?
        } else {
            self.member_fragment(&member, op, value)?
        };
        self.sql.push_str(&fragment);
        Ok(())
    }

    fn id_fragment(&mut self, op: Operator, value: PendingValue) -> Result<String> {
        match (op, value) {
            (Operator::Is, PendingValue::Null) => Ok("s.[Id] IS NULL".to_string()),
            (Operator::IsNot, PendingValue::Null) => Ok("s.[Id] IS NOT NULL".to_string()),
            (Operator::In, PendingValue::Many(values)) => {
                Ok(format!("s.[Id] IN ({})", self.param_list(values)))
            }
            (op, PendingValue::One(value)) => {
                let name = push_param(self.params, value);
                Ok(format!("s.[Id] {op} {name}"))
            }
            _ => Err(SqliteError::QueryGeneration(
                "operator and value kinds do not match".to_string(),
            )),
        }
    }

    fn member_fragment(
        &mut self,
        member: &MemberNode,
        op: Operator,
        value: PendingValue,
    ) -> Result<String> {
        let column = value_column(member.data_type)?;
        let inner = match (op, value) {
            (Operator::Is, PendingValue::Null) => format!("si.[{column}] IS NULL"),
            (Operator::IsNot, PendingValue::Null) => format!("si.[{column}] IS NOT NULL"),
            (Operator::In, PendingValue::Many(values)) => {
                if values.is_empty() {
                    "1 = 0".to_string()
                } else {
                    format!("si.[{column}] IN ({})", self.param_list(values))
                }
            }
            (op, PendingValue::One(value)) => {
                let name = push_param(self.params, value);
                format!("si.[{column}] {op} {name}")
            }
            _ => {
                return Err(SqliteError::QueryGeneration(
                    "operator and value kinds do not match".to_string(),
                ));
            }
        };
        Ok(format!(
            "EXISTS (SELECT 1 FROM [{indexes}] si WHERE si.[StructureId] = s.[Id] \
             AND (si.[MemberPath] = '{path}' AND {inner}))",
            indexes = self.indexes_table,
            path = member.path,
        ))
    }

    fn param_list(&mut self, values: Vec<Value>) -> String {
        values
            .into_iter()
            .map(|v| push_param(self.params, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use strukt_core::expr::{asc, desc, member};
    use strukt_core::{
        IdType, IncludeParser, SelectorParser, SortingParser, StructureSchema,
    };

    use super::*;

    fn schema() -> StructureSchema {
        StructureSchema::builder("Person")
            .id(IdType::Guid, "Id")
            .index("Name", DataTypeCode::String)
            .index("Age", DataTypeCode::IntegerNumber)
            .index("FriendId", DataTypeCode::Guid)
            .build()
            .unwrap()
    }

    fn where_query(expr: strukt_core::Expr) -> SqlQuery {
        let schema = schema();
        let criteria = SelectorParser::parse(&schema, &expr).unwrap();
        SqlQueryGenerator::new(&schema)
            .generate(&SqlExpression { criteria, ..Default::default() })
            .unwrap()
    }

    #[test]
    fn test_two_fragments_anded_with_two_parameters() {
        let q = where_query(member("Age").gt(30).and(member("Name").eq("Bruce")));
        assert!(q.sql.contains("si.[MemberPath] = 'Age' AND si.[IntegerValue] > @p0"));
        assert!(q.sql.contains(" AND EXISTS"));
        assert!(q.sql.contains("si.[MemberPath] = 'Name' AND si.[StringValue] = @p1"));
        assert_eq!(
            q.parameters,
            vec![
                SqlParameter { name: "@p0".into(), value: Value::Int(30) },
                SqlParameter { name: "@p1".into(), value: Value::String("Bruce".into()) },
            ]
        );
    }

    #[test]
    fn test_id_member_targets_structures_table() {
        let q = where_query(member("Id").eq(uuid::Uuid::nil()));
        assert!(q.sql.contains("s.[Id] = @p0"));
        assert!(!q.sql.contains("MemberPath"));
    }

    #[test]
    fn test_null_comparison_renders_is_null() {
        let q = where_query(member("Name").is_null());
        assert!(q.sql.contains("si.[StringValue] IS NULL"));
        assert!(q.parameters.is_empty());
    }

    #[test]
    fn test_not_has_no_operator_padding() {
        let q = where_query(member("Age").gt(30).not());
        assert!(q.sql.contains("NOT (EXISTS"));
    }

    #[test]
    fn test_in_renders_parameter_list() {
        let q = where_query(member("Age").is_in([28, 29]));
        assert!(q.sql.contains("si.[IntegerValue] IN (@p0, @p1)"));
        assert_eq!(q.parameters.len(), 2);
    }

    #[test]
    fn test_sorting_preserves_declaration_order() {
        let schema = schema();
        let sortings = SortingParser::parse(&schema, &[desc("Age"), asc("Name")]).unwrap();
        let q = SqlQueryGenerator::new(&schema)
            .generate(&SqlExpression { sortings, ..Default::default() })
            .unwrap();
        let age = q.sql.find("'Age'").unwrap();
        let name = q.sql.find("'Name'").unwrap();
        assert!(age < name);
        assert!(q.sql.contains("DESC"));
        assert!(q.sql.contains("ORDER BY"));
    }

    #[test]
    fn test_take_without_paging_limits_base_query() {
        let schema = schema();
        let q = SqlQueryGenerator::new(&schema)
            .generate(&SqlExpression { take: Some(10), ..Default::default() })
            .unwrap();
        assert!(q.sql.ends_with("LIMIT 10"));
    }

    #[test]
    fn test_paging_first_page_bounds_and_default_sort() {
        let schema = schema();
        let q = SqlQueryGenerator::new(&schema)
            .generate(&SqlExpression {
                paging: Some(Paging { page_index: 0, page_size: 10 }),
                ..Default::default()
            })
            .unwrap();
        assert!(q.sql.contains("ROW_NUMBER() OVER (ORDER BY s.[Id] ASC)"));
        assert_eq!(
            q.parameters,
            vec![
                SqlParameter { name: "@p0".into(), value: Value::Int(1) },
                SqlParameter { name: "@p1".into(), value: Value::Int(10) },
            ]
        );
    }

    #[test]
    fn test_paging_third_page_bounds() {
        let schema = schema();
        let q = SqlQueryGenerator::new(&schema)
            .generate(&SqlExpression {
                paging: Some(Paging { page_index: 2, page_size: 10 }),
                ..Default::default()
            })
            .unwrap();
        let values: Vec<_> = q.parameters.iter().map(|p| p.value.clone()).collect();
        assert_eq!(values, vec![Value::Int(21), Value::Int(30)]);
    }

    #[test]
    fn test_include_appends_projected_column() {
        let parent = schema();
        let child = StructureSchema::builder("Friend")
            .id(IdType::Guid, "Id")
            .index("Name", DataTypeCode::String)
            .build()
            .unwrap();
        let include = IncludeParser::parse(&parent, &child, "FriendId").unwrap();
        let includes = ParsedLambda::new(vec![Node::Include(include)]);
        let q = SqlQueryGenerator::new(&parent)
            .generate(&SqlExpression { includes, ..Default::default() })
            .unwrap();
        assert!(q.sql.contains("SELECT cs.[Json] FROM [FriendStructure] cs"));
        assert!(q.sql.contains("AS [Friend]"));
        assert!(q.sql.contains("ci.[GuidValue]"));
    }

    #[test]
    fn test_count_query() {
        let schema = schema();
        let criteria = SelectorParser::parse(&schema, &member("Age").gt(30)).unwrap();
        let q = SqlQueryGenerator::new(&schema).generate_count(&criteria).unwrap();
        assert!(q.sql.starts_with("SELECT COUNT(*) FROM [PersonStructure] s WHERE"));
        assert_eq!(q.parameters.len(), 1);
    }
}
