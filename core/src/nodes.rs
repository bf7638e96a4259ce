//! The parsed lambda: a flat, immutable sequence of typed nodes.
//!
//! Parsers lower predicate, sorting, and include expressions into one
//! ordered [`Node`] sequence. The node kinds form a closed sum, so the
//! query generator consumes them with a single exhaustive match — an
//! unhandled node kind is a compile error, never a silent pass-through.
//! Nodes carry no mutable state after construction.

use std::fmt;

use crate::expr::SortDirection;
use crate::id::IdType;
use crate::value::{DataTypeCode, Value};

/// Comparison, logical, and null-handling operators of a parsed predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `NOT`
    Not,
    /// `IS` (null comparison)
    Is,
    /// `IS NOT` (null comparison)
    IsNot,
    /// `LIKE`
    Like,
    /// `IN`
    In,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
            Self::Is => "IS",
            Self::IsNot => "IS NOT",
            Self::Like => "LIKE",
            Self::In => "IN",
        };
        f.write_str(s)
    }
}

/// A resolved member reference.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberNode {
    /// Full dotted path, virtual prefixes already applied.
    pub path: String,
    /// Datatype family of the member.
    pub data_type: DataTypeCode,
    /// Whether the path names the identity member (stored in the structures
    /// table, not the indexes table).
    pub is_id: bool,
    /// Whether the member is flattened from an enumerable, so comparisons
    /// probe the denormalized element string.
    pub is_flattened: bool,
}

/// A resolved sorting directive.
#[derive(Debug, Clone, PartialEq)]
pub struct SortingNode {
    /// Full dotted path.
    pub path: String,
    /// Datatype family of the member.
    pub data_type: DataTypeCode,
    /// Direction.
    pub direction: SortDirection,
    /// Whether the path names the identity member.
    pub is_id: bool,
}

/// A resolved include directive: project a referenced child document as an
/// extra column.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeNode {
    /// Name of the child structure set.
    pub child_schema_name: String,
    /// Id type of the child structure set.
    pub child_id_type: IdType,
    /// Parent member path holding the child id.
    pub reference_path: String,
    /// Datatype family of the reference member.
    pub reference_data_type: DataTypeCode,
    /// Projection alias.
    pub alias: String,
}

/// One node of a parsed lambda.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Member reference.
    Member(MemberNode),
    /// Operator.
    Operator(Operator),
    /// Literal value.
    Value(Value),
    /// Literal value list (IN operand).
    ArrayValue(Vec<Value>),
    /// Null marker (IS / IS NOT operand).
    Null,
    /// Sorting directive.
    Sorting(SortingNode),
    /// Include directive.
    Include(IncludeNode),
    /// Opening group marker.
    GroupStart,
    /// Closing group marker.
    GroupEnd,
}

/// The node-sequence representation of a parsed expression, decoupled from
/// its original form. Immutable after construction; two parsed lambdas can
/// be merged into one conjunction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedLambda {
    nodes: Vec<Node>,
}

impl ParsedLambda {
    /// Wraps a node sequence.
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// The node sequence.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Unions two parsed lambdas into one And-joined predicate, grouping
    /// each side so neither can leak operator precedence into the other.
    pub fn merge(self, other: ParsedLambda) -> ParsedLambda {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let mut nodes = Vec::with_capacity(self.nodes.len() + other.nodes.len() + 5);
        nodes.push(Node::GroupStart);
        nodes.extend(self.nodes);
        nodes.push(Node::GroupEnd);
        nodes.push(Node::Operator(Operator::And));
        nodes.push(Node::GroupStart);
        nodes.extend(other.nodes);
        nodes.push(Node::GroupEnd);
        ParsedLambda::new(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_eq(path: &str, v: Value) -> Vec<Node> {
        vec![
            Node::Member(MemberNode {
                path: path.to_string(),
                data_type: DataTypeCode::String,
                is_id: false,
                is_flattened: false,
            }),
            Node::Operator(Operator::Eq),
            Node::Value(v),
        ]
    }

    #[test]
    fn test_merge_joins_with_and() {
        let a = ParsedLambda::new(member_eq("Name", Value::String("a".into())));
        let b = ParsedLambda::new(member_eq("City", Value::String("b".into())));
        let merged = a.merge(b);

        assert_eq!(merged.nodes().first(), Some(&Node::GroupStart));
        assert!(merged
            .nodes()
            .iter()
            .any(|n| matches!(n, Node::Operator(Operator::And))));
        assert_eq!(merged.nodes().last(), Some(&Node::GroupEnd));
    }

    #[test]
    fn test_merge_with_empty_is_identity() {
        let a = ParsedLambda::new(member_eq("Name", Value::Null));
        let merged = a.clone().merge(ParsedLambda::default());
        assert_eq!(merged, a);

        let merged = ParsedLambda::default().merge(a.clone());
        assert_eq!(merged, a);
    }

    #[test]
    fn test_operator_rendering() {
        assert_eq!(Operator::NotEq.to_string(), "<>");
        assert_eq!(Operator::IsNot.to_string(), "IS NOT");
    }
}
