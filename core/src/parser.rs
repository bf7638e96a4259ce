//! Parsers lowering typed expressions into flat node sequences.
//!
//! [`SelectorParser`] walks a predicate expression and emits the ordered
//! node sequence the query generator consumes. Parsing is where every
//! member path is resolved against the schema, so unsupported predicates
//! fail here — synchronously, never at execution time.
//!
//! Constant sub-expressions are evaluated eagerly before structural
//! parsing: arithmetic over literals and string method calls on literals
//! fold into a single value node, recursively. Anything left over that is
//! neither a resolvable member nor part of the recognized query vocabulary
//! is a hard parse failure.

use crate::error::{Result, StruktError};
use crate::expr::{BinaryOp, Expr, SortDirection, SortingExpr};
use crate::id::IdType;
use crate::nodes::{
    IncludeNode, MemberNode, Node, Operator, ParsedLambda, SortingNode,
};
use crate::schema::StructureSchema;
use crate::value::{DataTypeCode, ELEMENT_CLOSE, ELEMENT_OPEN, Value};

/// The datatype family an identity member queries as.
fn id_data_type(id_type: IdType) -> DataTypeCode {
    match id_type {
        IdType::Guid => DataTypeCode::Guid,
        IdType::Int | IdType::BigInt => DataTypeCode::IntegerNumber,
        IdType::String => DataTypeCode::String,
    }
}

/// Parses predicate expressions into [`ParsedLambda`] node sequences.
pub struct SelectorParser;

impl SelectorParser {
    /// Parses a predicate over the given schema.
    ///
    /// # Errors
    ///
    /// All the parse-time failures of the taxonomy: unknown member paths,
    /// byte-array members, unsupported method calls, member-only
    /// predicates, and operators that cannot be expressed against the
    /// flattened index model.
    pub fn parse(schema: &StructureSchema, expr: &Expr) -> Result<ParsedLambda> {
        let folded = fold(expr.clone())?;
        let mut ctx = ParseContext { schema, nodes: Vec::new(), prefix: None };
        ctx.visit(&folded)?;
        if !ctx.nodes.iter().any(|n| matches!(n, Node::Member(_))) {
            return Err(StruktError::NoMemberReference);
        }
        Ok(ParsedLambda::new(ctx.nodes))
    }
}

/// Evaluates constant sub-expressions bottom-up, replacing each with a
/// literal value node. Sub-expressions touching a member fall through
/// untouched for structural parsing.
fn fold(expr: Expr) -> Result<Expr> {
    match expr {
        Expr::Binary { op, left, right } => {
            let left = fold(*left)?;
            let right = fold(*right)?;
            if op.is_arithmetic() {
                if let (Expr::Value(l), Expr::Value(r)) = (&left, &right) {
                    return Ok(Expr::Value(fold_arithmetic(op, l, r)?));
                }
            }
            Ok(Expr::Binary { op, left: Box::new(left), right: Box::new(right) })
        }
        Expr::Call { target, method, args } => {
            let target = fold(*target)?;
            let args = args.into_iter().map(fold).collect::<Result<Vec<_>>>()?;
            if let Expr::Value(Value::String(s)) = &target {
                if args.is_empty() {
                    match method.as_str() {
                        "ToLower" => return Ok(Expr::Value(Value::String(s.to_lowercase()))),
                        "ToUpper" => return Ok(Expr::Value(Value::String(s.to_uppercase()))),
                        "Trim" => return Ok(Expr::Value(Value::String(s.trim().to_string()))),
                        _ => {}
                    }
                }
            }
            Ok(Expr::Call { target: Box::new(target), method, args })
        }
        Expr::Not(inner) => Ok(Expr::Not(Box::new(fold(*inner)?))),
        Expr::In { member, values } => {
            Ok(Expr::In { member: Box::new(fold(*member)?), values })
        }
        Expr::Any { path, inner } => {
            Ok(Expr::Any { path, inner: Box::new(fold(*inner)?) })
        }
        leaf @ (Expr::Member { .. } | Expr::Value(_)) => Ok(leaf),
    }
}

fn fold_arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let sym = if op == BinaryOp::Add { "+" } else { "-" };
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => Ok(Value::Int(if op == BinaryOp::Add {
            l + r
        } else {
            l - r
        })),
        (Value::Fractal(l), Value::Fractal(r)) => Ok(Value::Fractal(
            if op == BinaryOp::Add { l + r } else { l - r },
        )),
        (Value::Int(l), Value::Fractal(r)) => Ok(Value::Fractal(
            if op == BinaryOp::Add { *l as f64 + r } else { *l as f64 - r },
        )),
        (Value::Fractal(l), Value::Int(r)) => Ok(Value::Fractal(
            if op == BinaryOp::Add { l + *r as f64 } else { l - *r as f64 },
        )),
        (Value::String(l), Value::String(r)) if op == BinaryOp::Add => {
            Ok(Value::String(format!("{l}{r}")))
        }
        _ => Err(StruktError::UnsupportedMethodCall(sym.to_string())),
    }
}

struct ParseContext<'a> {
    schema: &'a StructureSchema,
    nodes: Vec<Node>,
    /// Virtual path prefix pushed by an enumerable containment predicate.
    prefix: Option<String>,
}

impl ParseContext<'_> {
    fn visit(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Binary { op, left, right } if op.is_logical() => {
                let operator = if *op == BinaryOp::And { Operator::And } else { Operator::Or };
                self.visit_operand(left)?;
                self.nodes.push(Node::Operator(operator));
                self.visit_operand(right)
            }
            Expr::Binary { op, left, right } => self.visit_comparison(*op, left, right),
            Expr::Not(inner) => {
                self.nodes.push(Node::Operator(Operator::Not));
                self.nodes.push(Node::GroupStart);
                self.visit(inner)?;
                self.nodes.push(Node::GroupEnd);
                Ok(())
            }
            Expr::Call { target, method, args } => self.visit_call(target, method, args),
            Expr::In { member, values } => self.visit_in(member, values),
            Expr::Any { path, inner } => self.visit_any(path, inner),
            Expr::Member { path } => {
                Err(StruktError::MemberWithoutComparison(self.full_path(path)))
            }
            Expr::Value(_) => Err(StruktError::NoMemberReference),
        }
    }

    /// Visits one side of a logical operator, wrapping composite operands
    /// in explicit group markers so the generator parenthesizes correctly.
    fn visit_operand(&mut self, expr: &Expr) -> Result<()> {
        let composite = matches!(
            expr,
            Expr::Binary { op, .. } if op.is_logical()
        );
        if composite {
            self.nodes.push(Node::GroupStart);
            self.visit(expr)?;
            self.nodes.push(Node::GroupEnd);
            Ok(())
        } else {
            self.visit(expr)
        }
    }

    fn visit_comparison(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<()> {
        debug_assert!(!op.is_logical());
        if op.is_arithmetic() {
            // An arithmetic operator surviving the folding pass touched a
            // member reference, which the index model cannot evaluate.
            let sym = if op == BinaryOp::Add { "+" } else { "-" };
            return Err(StruktError::UnsupportedMethodCall(sym.to_string()));
        }
        let (member_path, value, op) = match (left, right) {
            (Expr::Member { path }, Expr::Value(v)) => (path, v, op),
            (Expr::Value(v), Expr::Member { path }) => (path, v, op.mirrored()),
            (Expr::Member { path: l }, Expr::Member { path: r }) => {
                return Err(StruktError::MemberToMemberComparison(
                    self.full_path(l),
                    self.full_path(r),
                ));
            }
            _ => return Err(StruktError::NoMemberReference),
        };
        let member = self.resolve_member(member_path)?;

        if value.is_null() {
            let operator = match op {
                BinaryOp::Eq => Operator::Is,
                BinaryOp::NotEq => Operator::IsNot,
                other => {
                    return Err(StruktError::InvalidNullComparison(
                        comparison_symbol(other).to_string(),
                    ));
                }
            };
            self.nodes.push(Node::Member(member));
            self.nodes.push(Node::Operator(operator));
            self.nodes.push(Node::Null);
            return Ok(());
        }

        if member.is_flattened {
            // Flattened storage keeps one denormalized element string per
            // row; equality becomes a containment probe for the wrapped
            // element token.
            if op != BinaryOp::Eq {
                return Err(StruktError::NotSupportedInEnumerable {
                    path: member.path,
                    op: comparison_symbol(op).to_string(),
                });
            }
            let pattern = format!("%{}%", value.wrap_element());
            self.nodes.push(Node::Member(member));
            self.nodes.push(Node::Operator(Operator::Like));
            self.nodes.push(Node::Value(Value::String(pattern)));
            return Ok(());
        }

        let operator = match op {
            BinaryOp::Eq => Operator::Eq,
            BinaryOp::NotEq => Operator::NotEq,
            BinaryOp::Gt => Operator::Gt,
            BinaryOp::Gte => Operator::Gte,
            BinaryOp::Lt => Operator::Lt,
            BinaryOp::Lte => Operator::Lte,
            BinaryOp::And | BinaryOp::Or | BinaryOp::Add | BinaryOp::Sub => unreachable!(),
        };
        self.nodes.push(Node::Member(member));
        self.nodes.push(Node::Operator(operator));
        self.nodes.push(Node::Value(value.clone()));
        Ok(())
    }

    fn visit_call(&mut self, target: &Expr, method: &str, args: &[Expr]) -> Result<()> {
        let Expr::Member { path } = target else {
            return Err(StruktError::UnsupportedMethodCall(method.to_string()));
        };
        let member = self.resolve_member(path)?;

        let raw = match args.first() {
            Some(Expr::Value(Value::String(s))) => s.as_str(),
            _ => return Err(StruktError::UnsupportedMethodCall(method.to_string())),
        };
        let flattened = member.is_flattened;
        let pattern = match method {
            "QxLike" => raw.to_string(),
            "QxStartsWith" => {
                if flattened {
                    format!("%{ELEMENT_OPEN}{raw}%")
                } else {
                    format!("{raw}%")
                }
            }
            "QxEndsWith" => {
                if flattened {
                    format!("%{raw}{ELEMENT_CLOSE}%")
                } else {
                    format!("%{raw}")
                }
            }
            "QxContains" => format!("%{raw}%"),
            other => return Err(StruktError::UnsupportedMethodCall(other.to_string())),
        };
        self.nodes.push(Node::Member(member));
        self.nodes.push(Node::Operator(Operator::Like));
        self.nodes.push(Node::Value(Value::String(pattern)));
        Ok(())
    }

    fn visit_in(&mut self, member: &Expr, values: &[Value]) -> Result<()> {
        let Expr::Member { path } = member else {
            return Err(StruktError::NoMemberReference);
        };
        let member = self.resolve_member(path)?;
        if member.is_flattened {
            return Err(StruktError::NotSupportedInEnumerable {
                path: member.path,
                op: Operator::In.to_string(),
            });
        }
        self.nodes.push(Node::Member(member));
        self.nodes.push(Node::Operator(Operator::In));
        self.nodes.push(Node::ArrayValue(values.to_vec()));
        Ok(())
    }

    fn visit_any(&mut self, path: &str, inner: &Expr) -> Result<()> {
        let full = self.full_path(path);
        let covers_prefix = self
            .schema
            .index_accessors()
            .iter()
            .any(|a| {
                (a.path() == full && a.is_enumerable())
                    || a.path().starts_with(&format!("{full}."))
            });
        if !covers_prefix {
            return Err(StruktError::NotEnumerable(full));
        }
        let saved = self.prefix.replace(full);
        let result = self.visit(inner);
        self.prefix = saved;
        result
    }

    fn full_path(&self, path: &str) -> String {
        match (&self.prefix, path.is_empty()) {
            (Some(prefix), true) => prefix.clone(),
            (Some(prefix), false) => format!("{prefix}.{path}"),
            (None, _) => path.to_string(),
        }
    }

    fn resolve_member(&self, path: &str) -> Result<MemberNode> {
        let full = self.full_path(path);
        if self.schema.is_id_path(&full) {
            return Ok(MemberNode {
                path: full,
                data_type: id_data_type(self.schema.id_accessor().id_type()),
                is_id: true,
                is_flattened: false,
            });
        }
        let accessor = self.schema.accessor(&full).ok_or_else(|| {
            StruktError::UnknownMember {
                schema: self.schema.name().to_string(),
                path: full.clone(),
            }
        })?;
        if accessor.data_type() == DataTypeCode::Bytes {
            return Err(StruktError::BytesMemberNotSupported(full));
        }
        Ok(MemberNode {
            path: full,
            data_type: if accessor.is_multi_valued() {
                // Flattened rows store the concatenated element string.
                DataTypeCode::String
            } else {
                accessor.data_type()
            },
            is_id: false,
            is_flattened: accessor.is_multi_valued(),
        })
    }
}

fn comparison_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "=",
        BinaryOp::NotEq => "<>",
        BinaryOp::Gt => ">",
        BinaryOp::Gte => ">=",
        BinaryOp::Lt => "<",
        BinaryOp::Lte => "<=",
        BinaryOp::And => "AND",
        BinaryOp::Or => "OR",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
    }
}

/// Parses sorting expressions into sorting nodes, in declaration order.
pub struct SortingParser;

impl SortingParser {
    /// Parses a sorting list over the given schema.
    pub fn parse(schema: &StructureSchema, sortings: &[SortingExpr]) -> Result<ParsedLambda> {
        let mut nodes = Vec::with_capacity(sortings.len());
        for sorting in sortings {
            nodes.push(Node::Sorting(Self::parse_one(schema, sorting)?));
        }
        Ok(ParsedLambda::new(nodes))
    }

    fn parse_one(schema: &StructureSchema, sorting: &SortingExpr) -> Result<SortingNode> {
        if schema.is_id_path(&sorting.path) {
            return Ok(SortingNode {
                path: sorting.path.clone(),
                data_type: id_data_type(schema.id_accessor().id_type()),
                direction: sorting.direction,
                is_id: true,
            });
        }
        let accessor = schema.accessor(&sorting.path).ok_or_else(|| {
            StruktError::UnknownMember {
                schema: schema.name().to_string(),
                path: sorting.path.clone(),
            }
        })?;
        if accessor.data_type() == DataTypeCode::Bytes {
            return Err(StruktError::BytesMemberNotSupported(sorting.path.clone()));
        }
        Ok(SortingNode {
            path: sorting.path.clone(),
            data_type: if accessor.is_multi_valued() {
                DataTypeCode::String
            } else {
                accessor.data_type()
            },
            direction: sorting.direction,
            is_id: false,
        })
    }
}

/// Parses include directives into include nodes.
pub struct IncludeParser;

impl IncludeParser {
    /// Resolves an include of `child` documents referenced by a member of
    /// `parent`. The projection alias is the child schema name.
    ///
    /// # Errors
    ///
    /// Returns [`StruktError::InvalidIncludeReference`] when the reference
    /// member's datatype family cannot hold the child's id type.
    pub fn parse(
        parent: &StructureSchema,
        child: &StructureSchema,
        reference_path: &str,
    ) -> Result<IncludeNode> {
        let accessor = parent.accessor(reference_path).ok_or_else(|| {
            StruktError::UnknownMember {
                schema: parent.name().to_string(),
                path: reference_path.to_string(),
            }
        })?;
        let child_id_type = child.id_accessor().id_type();
        if accessor.data_type() != id_data_type(child_id_type) {
            return Err(StruktError::InvalidIncludeReference {
                schema: parent.name().to_string(),
                path: reference_path.to_string(),
            });
        }
        Ok(IncludeNode {
            child_schema_name: child.name().to_string(),
            child_id_type,
            reference_path: reference_path.to_string(),
            reference_data_type: accessor.data_type(),
            alias: child.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{asc, member, qx_any, value};

    fn schema() -> StructureSchema {
        StructureSchema::builder("Person")
            .id(IdType::Guid, "Id")
            .index("Name", DataTypeCode::String)
            .index("Age", DataTypeCode::IntegerNumber)
            .index("Photo", DataTypeCode::Bytes)
            .index("FriendId", DataTypeCode::Guid)
            .enumerable("Tags", DataTypeCode::String)
            .element("Addresses.Zip", DataTypeCode::IntegerNumber)
            .build()
            .unwrap()
    }

    fn parse(expr: Expr) -> Result<ParsedLambda> {
        SelectorParser::parse(&schema(), &expr)
    }

    #[test]
    fn test_simple_comparison() {
        let parsed = parse(member("Age").gt(30)).unwrap();
        let nodes = parsed.nodes();
        assert_eq!(nodes.len(), 3);
        assert!(matches!(&nodes[0], Node::Member(m) if m.path == "Age" && !m.is_id));
        assert_eq!(nodes[1], Node::Operator(Operator::Gt));
        assert_eq!(nodes[2], Node::Value(Value::Int(30)));
    }

    #[test]
    fn test_conjunction_keeps_operand_order() {
        let parsed = parse(member("Age").gt(30).and(member("Name").eq("Bruce"))).unwrap();
        let ops: Vec<_> = parsed
            .nodes()
            .iter()
            .filter_map(|n| match n {
                Node::Operator(op) => Some(*op),
                _ => None,
            })
            .collect();
        assert_eq!(ops, vec![Operator::Gt, Operator::And, Operator::Eq]);
    }

    #[test]
    fn test_nested_logical_operand_gets_group_markers() {
        let expr = member("Age").gt(30).and(
            member("Name").eq("Bruce").or(member("Name").eq("Wayne")),
        );
        let parsed = parse(expr).unwrap();
        assert!(parsed.nodes().contains(&Node::GroupStart));
        assert!(parsed.nodes().contains(&Node::GroupEnd));
    }

    #[test]
    fn test_constant_folding_of_arithmetic() {
        let parsed = parse(member("Age").gt(value(30).add(12))).unwrap();
        assert!(parsed.nodes().contains(&Node::Value(Value::Int(42))));
    }

    #[test]
    fn test_constant_folding_of_string_methods() {
        let parsed = parse(member("Name").eq(value("  Bruce ").trim().to_lower())).unwrap();
        assert!(parsed.nodes().contains(&Node::Value(Value::String("bruce".into()))));
    }

    #[test]
    fn test_null_comparison_becomes_is() {
        let parsed = parse(member("Name").is_null()).unwrap();
        assert_eq!(parsed.nodes()[1], Node::Operator(Operator::Is));
        assert_eq!(parsed.nodes()[2], Node::Null);

        let parsed = parse(member("Name").is_not_null()).unwrap();
        assert_eq!(parsed.nodes()[1], Node::Operator(Operator::IsNot));
    }

    #[test]
    fn test_ordering_against_null_is_rejected() {
        let err = parse(member("Age").gt(Value::Null)).unwrap_err();
        assert!(matches!(err, StruktError::InvalidNullComparison(_)));
    }

    #[test]
    fn test_value_reversed_comparison_mirrors_operator() {
        let parsed = parse(value(30).lt(member("Age"))).unwrap();
        assert_eq!(parsed.nodes()[1], Node::Operator(Operator::Gt));
    }

    #[test]
    fn test_id_member_is_special_cased() {
        let parsed = parse(member("Id").eq(uuid::Uuid::nil())).unwrap();
        assert!(matches!(&parsed.nodes()[0], Node::Member(m) if m.is_id));
    }

    #[test]
    fn test_bytes_member_is_rejected() {
        let err = parse(member("Photo").eq("x")).unwrap_err();
        assert!(matches!(err, StruktError::BytesMemberNotSupported(_)));
    }

    #[test]
    fn test_unknown_member_is_rejected() {
        let err = parse(member("Nope").eq(1)).unwrap_err();
        assert!(matches!(err, StruktError::UnknownMember { .. }));
    }

    #[test]
    fn test_member_without_comparison_is_rejected() {
        let err = parse(member("Name")).unwrap_err();
        assert!(matches!(err, StruktError::MemberWithoutComparison(_)));
    }

    #[test]
    fn test_unrecognized_method_call_is_rejected() {
        let expr = Expr::Call {
            target: Box::new(member("Name")),
            method: "Reverse".into(),
            args: vec![],
        };
        let err = parse(expr).unwrap_err();
        assert!(matches!(err, StruktError::UnsupportedMethodCall(m) if m == "Reverse"));
    }

    #[test]
    fn test_qx_starts_with_builds_like_pattern() {
        let parsed = parse(member("Name").qx_starts_with("Bru")).unwrap();
        assert_eq!(parsed.nodes()[1], Node::Operator(Operator::Like));
        assert_eq!(parsed.nodes()[2], Node::Value(Value::String("Bru%".into())));
    }

    #[test]
    fn test_any_prefixes_inner_member_paths() {
        let parsed = parse(qx_any("Addresses", member("Zip").eq(12345))).unwrap();
        match &parsed.nodes()[0] {
            Node::Member(m) => {
                assert_eq!(m.path, "Addresses.Zip");
                assert!(m.is_flattened);
            }
            other => panic!("unexpected node: {other:?}"),
        }
        assert_eq!(parsed.nodes()[1], Node::Operator(Operator::Like));
        assert_eq!(
            parsed.nodes()[2],
            Node::Value(Value::String("%<$12345$>%".into()))
        );
    }

    #[test]
    fn test_any_over_non_enumerable_is_rejected() {
        let err = parse(qx_any("Name", member("Zip").eq(1))).unwrap_err();
        assert!(matches!(err, StruktError::NotEnumerable(_)));
    }

    #[test]
    fn test_enumerable_equality_lowers_to_containment() {
        let parsed = parse(member("Tags").eq("news")).unwrap();
        assert_eq!(parsed.nodes()[1], Node::Operator(Operator::Like));
        assert_eq!(
            parsed.nodes()[2],
            Node::Value(Value::String("%<$news$>%".into()))
        );
    }

    #[test]
    fn test_ordering_on_enumerable_is_rejected() {
        let err = parse(member("Tags").gt("a")).unwrap_err();
        assert!(matches!(err, StruktError::NotSupportedInEnumerable { .. }));
    }

    #[test]
    fn test_in_produces_array_value() {
        let parsed = parse(member("Age").is_in([28, 29, 30])).unwrap();
        assert_eq!(parsed.nodes()[1], Node::Operator(Operator::In));
        assert_eq!(
            parsed.nodes()[2],
            Node::ArrayValue(vec![Value::Int(28), Value::Int(29), Value::Int(30)])
        );
    }

    #[test]
    fn test_not_wraps_operand_in_group() {
        let parsed = parse(member("Age").gt(30).not()).unwrap();
        assert_eq!(parsed.nodes()[0], Node::Operator(Operator::Not));
        assert_eq!(parsed.nodes()[1], Node::GroupStart);
        assert_eq!(parsed.nodes().last(), Some(&Node::GroupEnd));
    }

    #[test]
    fn test_sorting_parser_resolves_members() {
        let parsed = SortingParser::parse(&schema(), &[asc("Age"), crate::expr::desc("Name")])
            .unwrap();
        let nodes = parsed.nodes();
        assert_eq!(nodes.len(), 2);
        assert!(matches!(&nodes[0], Node::Sorting(s) if s.path == "Age"
            && s.direction == SortDirection::Asc));
        assert!(matches!(&nodes[1], Node::Sorting(s) if s.direction == SortDirection::Desc));
    }

    #[test]
    fn test_sorting_on_unknown_member_is_rejected() {
        let err = SortingParser::parse(&schema(), &[asc("Nope")]).unwrap_err();
        assert!(matches!(err, StruktError::UnknownMember { .. }));
    }

    #[test]
    fn test_include_parser_validates_reference_type() {
        let child = StructureSchema::builder("Friend")
            .id(IdType::Guid, "Id")
            .index("Name", DataTypeCode::String)
            .build()
            .unwrap();
        let node = IncludeParser::parse(&schema(), &child, "FriendId").unwrap();
        assert_eq!(node.child_schema_name, "Friend");
        assert_eq!(node.alias, "Friend");

        let err = IncludeParser::parse(&schema(), &child, "Age").unwrap_err();
        assert!(matches!(err, StruktError::InvalidIncludeReference { .. }));
    }
}
