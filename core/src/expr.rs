//! Typed predicate, sorting, and include expressions.
//!
//! Applications build predicates through the combinators in this module;
//! the parsers in [`crate::parser`] lower them into flat node sequences.
//! The AST is storage-agnostic: member references carry dotted paths that
//! are resolved against a schema only at parse time.
//!
//! # Example
//!
//! ```
//! use strukt_core::expr::{member, qx_any};
//!
//! // Age > 30 && Name == "Bruce"
//! let predicate = member("Age").gt(30).and(member("Name").eq("Bruce"));
//!
//! // Any address with Zip == 12345
//! let containment = qx_any("Addresses", member("Zip").eq(12345));
//! # let _ = (predicate, containment);
//! ```

use crate::value::Value;

/// Binary operator of a predicate expression.
///
/// Comparison and logical operators survive into the parsed node sequence;
/// the arithmetic operators exist only as constant-folding fodder and must
/// be folded away before structural parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Equality.
    Eq,
    /// Inequality.
    NotEq,
    /// Greater-than.
    Gt,
    /// Greater-than-or-equal.
    Gte,
    /// Less-than.
    Lt,
    /// Less-than-or-equal.
    Lte,
    /// Logical conjunction.
    And,
    /// Logical disjunction.
    Or,
    /// Arithmetic addition (foldable only).
    Add,
    /// Arithmetic subtraction (foldable only).
    Sub,
}

impl BinaryOp {
    /// Whether this operator only exists as constant-folding fodder.
    pub fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub)
    }

    /// Whether this operator joins two sub-predicates.
    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    /// Mirrors a comparison so `value op member` reads as `member op value`.
    pub fn mirrored(self) -> Self {
        match self {
            Self::Gt => Self::Lt,
            Self::Gte => Self::Lte,
            Self::Lt => Self::Gt,
            Self::Lte => Self::Gte,
            other => other,
        }
    }
}

/// A predicate expression over one structure type.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Reference to a member by dotted path.
    Member {
        /// Dotted member path.
        path: String,
    },
    /// Literal value.
    Value(Value),
    /// Binary expression.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Logical negation.
    Not(Box<Expr>),
    /// Method call on a receiver; either folds to a constant or must match
    /// the recognized query vocabulary.
    Call {
        /// Receiver expression.
        target: Box<Expr>,
        /// Method name.
        method: String,
        /// Call arguments.
        args: Vec<Expr>,
    },
    /// Set membership of a member's value.
    In {
        /// Member operand.
        member: Box<Expr>,
        /// Candidate values.
        values: Vec<Value>,
    },
    /// Containment predicate over a nested enumerable member.
    Any {
        /// Path of the enumerable member.
        path: String,
        /// Inner predicate, with member paths relative to the enumerable.
        inner: Box<Expr>,
    },
}

/// References a member by dotted path.
pub fn member(path: impl Into<String>) -> Expr {
    Expr::Member { path: path.into() }
}

/// Lifts a literal into an expression.
pub fn value(v: impl Into<Value>) -> Expr {
    Expr::Value(v.into())
}

/// Builds a containment predicate over a nested enumerable member.
///
/// Member paths inside `inner` are relative to the enumerable; the parser
/// prefixes them with `path` when resolving against the schema.
pub fn qx_any(path: impl Into<String>, inner: Expr) -> Expr {
    Expr::Any { path: path.into(), inner: Box::new(inner) }
}

impl Expr {
    fn binary(self, op: BinaryOp, rhs: impl Into<Expr>) -> Expr {
        Expr::Binary { op, left: Box::new(self), right: Box::new(rhs.into()) }
    }

    /// Equality comparison.
    pub fn eq(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, rhs)
    }

    /// Inequality comparison.
    pub fn ne(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::NotEq, rhs)
    }

    /// Greater-than comparison.
    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, rhs)
    }

    /// Greater-than-or-equal comparison.
    pub fn gte(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gte, rhs)
    }

    /// Less-than comparison.
    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, rhs)
    }

    /// Less-than-or-equal comparison.
    pub fn lte(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lte, rhs)
    }

    /// Logical conjunction.
    pub fn and(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::And, rhs)
    }

    /// Logical disjunction.
    pub fn or(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Or, rhs)
    }

    /// Logical negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// Arithmetic addition; folded to a literal at parse time.
    pub fn add(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Add, rhs)
    }

    /// Arithmetic subtraction; folded to a literal at parse time.
    pub fn sub(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Sub, rhs)
    }

    /// Null check, lowered to an IS NULL marker.
    pub fn is_null(self) -> Expr {
        self.binary(BinaryOp::Eq, Expr::Value(Value::Null))
    }

    /// Non-null check, lowered to an IS NOT NULL marker.
    pub fn is_not_null(self) -> Expr {
        self.binary(BinaryOp::NotEq, Expr::Value(Value::Null))
    }

    /// Set-membership predicate.
    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::In {
            member: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn call(self, method: &str, args: Vec<Expr>) -> Expr {
        Expr::Call { target: Box::new(self), method: method.to_string(), args }
    }

    /// Raw LIKE pattern match (`%`/`_` wildcards as given).
    pub fn qx_like(self, pattern: impl Into<String>) -> Expr {
        self.call("QxLike", vec![Expr::Value(Value::String(pattern.into()))])
    }

    /// Prefix match.
    pub fn qx_starts_with(self, prefix: impl Into<String>) -> Expr {
        self.call("QxStartsWith", vec![Expr::Value(Value::String(prefix.into()))])
    }

    /// Suffix match.
    pub fn qx_ends_with(self, suffix: impl Into<String>) -> Expr {
        self.call("QxEndsWith", vec![Expr::Value(Value::String(suffix.into()))])
    }

    /// Substring match.
    pub fn qx_contains(self, fragment: impl Into<String>) -> Expr {
        self.call("QxContains", vec![Expr::Value(Value::String(fragment.into()))])
    }

    /// Lowercases a constant string; folded at parse time.
    pub fn to_lower(self) -> Expr {
        self.call("ToLower", Vec::new())
    }

    /// Uppercases a constant string; folded at parse time.
    pub fn to_upper(self) -> Expr {
        self.call("ToUpper", Vec::new())
    }

    /// Trims a constant string; folded at parse time.
    pub fn trim(self) -> Expr {
        self.call("Trim", Vec::new())
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Value(v)
    }
}

macro_rules! expr_from_value {
    ($($ty:ty),+ $(,)?) => {
        $(impl From<$ty> for Expr {
            fn from(v: $ty) -> Self {
                Expr::Value(Value::from(v))
            }
        })+
    };
}

expr_from_value!(
    i32,
    i64,
    f64,
    bool,
    &str,
    String,
    uuid::Uuid,
    chrono::DateTime<chrono::Utc>,
);

/// Sort direction of one sorting expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// One declared sorting: a member path and a direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortingExpr {
    /// Dotted member path.
    pub path: String,
    /// Sort direction.
    pub direction: SortDirection,
}

/// Ascending sort on a member path.
pub fn asc(path: impl Into<String>) -> SortingExpr {
    SortingExpr { path: path.into(), direction: SortDirection::Asc }
}

/// Descending sort on a member path.
pub fn desc(path: impl Into<String>) -> SortingExpr {
    SortingExpr { path: path.into(), direction: SortDirection::Desc }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combinators_build_expected_shape() {
        let e = member("Age").gt(30).and(member("Name").eq("Bruce"));
        match e {
            Expr::Binary { op: BinaryOp::And, left, right } => {
                assert!(matches!(*left, Expr::Binary { op: BinaryOp::Gt, .. }));
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::Eq, .. }));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn test_is_null_lowers_to_null_comparison() {
        let e = member("Name").is_null();
        match e {
            Expr::Binary { op: BinaryOp::Eq, right, .. } => {
                assert_eq!(*right, Expr::Value(Value::Null));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn test_mirrored_swaps_direction() {
        assert_eq!(BinaryOp::Gt.mirrored(), BinaryOp::Lt);
        assert_eq!(BinaryOp::Lte.mirrored(), BinaryOp::Gte);
        assert_eq!(BinaryOp::Eq.mirrored(), BinaryOp::Eq);
    }
}
