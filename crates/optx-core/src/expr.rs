//! # Operators and Scalar Expressions
//!
//! Plan nodes come in two flavours that share one [`Operator`] enum so the memo
//! can store them side by side:
//!
//! - [`LogicalOp`] says *what* to compute. Exploration rules rewrite logical
//!   operators into equivalent logical operators.
//! - [`PhysicalOp`] says *how* to compute it. Implementation rules map logical
//!   operators onto physical ones, and only physical operators are costed.
//!
//! Operators never hold their inputs. Inputs are memo groups, tracked by the
//! [`MemoExpr`](crate::memo::MemoExpr) that wraps the operator. Every type here
//! is `Eq + Hash` because the memo deduplicates expressions by structural
//! signature `(operator, child groups)`.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
    pub index: u32,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, name: impl Into<String>, index: u32) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
            index,
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(t) => write!(f, "{}.{}", t, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Constant value. Floats are wrapped in `OrderedFloat` so the whole enum can
/// take part in signature hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since 1970-01-01.
    Date(i32),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{}", v.0),
            ScalarValue::Utf8(v) => write!(f, "'{v}'"),
            ScalarValue::Date(v) => write!(f, "DATE({v})"),
        }
    }
}

/// Scalar expression tree used in predicates, projections and sort keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Column(ColumnRef),
    Literal(ScalarValue),
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    /// Flat conjunction; nested ANDs are flattened by [`Expr::conjuncts`].
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn column(table: &str, name: &str) -> Self {
        Expr::Column(ColumnRef::new(table, name, 0))
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op: BinaryOp::Eq,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// All column references, in tree order.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.visit_columns(&mut out);
        out
    }

    fn visit_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.visit_columns(out);
                right.visit_columns(out);
            }
            Expr::UnaryOp { operand, .. } => operand.visit_columns(out),
            Expr::Function { args, .. } | Expr::And(args) | Expr::Or(args) => {
                args.iter().for_each(|a| a.visit_columns(out))
            }
        }
    }

    pub fn references_table(&self, table: &str) -> bool {
        self.columns()
            .iter()
            .any(|c| c.table.as_deref() == Some(table))
    }

    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    /// Rebuild a predicate from conjuncts; a single conjunct is returned bare.
    pub fn conjunction(mut preds: Vec<Expr>) -> Option<Expr> {
        match preds.len() {
            0 => None,
            1 => preds.pop(),
            _ => Some(Expr::And(preds)),
        }
    }

    /// True when the expression contains at least one `col = col` conjunct.
    pub fn has_equi_predicate(&self) -> bool {
        self.conjuncts().iter().any(|c| {
            matches!(
                c,
                Expr::BinaryOp { op: BinaryOp::Eq, left, right }
                    if matches!((left.as_ref(), right.as_ref()), (Expr::Column(_), Expr::Column(_)))
            )
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::BinaryOp { op, left, right } => write!(f, "{left} {op} {right}"),
            Expr::UnaryOp { op, operand } => write!(f, "{op:?}({operand})"),
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                let sep = if matches!(self, Expr::And(_)) { " AND " } else { " OR " };
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{sep}")?;
                    }
                    write!(f, "{e}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// Only `Inner` and `Cross` are symmetric; the rest fix which side is which.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
    Cross,
}

impl JoinType {
    pub fn is_commutative(self) -> bool {
        matches!(self, JoinType::Inner | JoinType::Cross)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggExpr {
    pub func: AggFunc,
    pub arg: Expr,
    pub distinct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
    pub nulls_first: bool,
}

impl SortKey {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            ascending: true,
            nulls_first: false,
        }
    }
}

/// How rows are spread across workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Distribution {
    Single,
    Broadcast,
    Hash(Vec<Expr>),
    RoundRobin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildSide {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOp {
    Scan {
        table: TableRef,
        columns: Vec<ColumnRef>,
        predicate: Option<Expr>,
    },
    Filter {
        predicate: Expr,
    },
    Project {
        exprs: Vec<Expr>,
        aliases: Vec<String>,
    },
    Join {
        join_type: JoinType,
        condition: Expr,
    },
    Aggregate {
        group_by: Vec<Expr>,
        aggregates: Vec<AggExpr>,
    },
    Sort {
        order: Vec<SortKey>,
    },
    Limit {
        offset: u64,
        count: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalOp {
    SeqScan {
        table: TableRef,
        columns: Vec<ColumnRef>,
        predicate: Option<Expr>,
    },
    Filter {
        predicate: Expr,
    },
    Project {
        exprs: Vec<Expr>,
        aliases: Vec<String>,
    },
    HashJoin {
        join_type: JoinType,
        build_side: BuildSide,
        condition: Expr,
    },
    /// Needs both inputs sorted on the join keys.
    MergeJoin {
        join_type: JoinType,
        condition: Expr,
    },
    NestedLoopJoin {
        join_type: JoinType,
        condition: Expr,
    },
    HashAggregate {
        group_by: Vec<Expr>,
        aggregates: Vec<AggExpr>,
    },
    /// Needs input sorted on the group-by keys.
    StreamAggregate {
        group_by: Vec<Expr>,
        aggregates: Vec<AggExpr>,
    },
    SortOp {
        order: Vec<SortKey>,
    },
    Exchange {
        distribution: Distribution,
    },
    Limit {
        offset: u64,
        count: u64,
    },
}

impl fmt::Display for PhysicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicalOp::SeqScan { table, predicate, .. } => match predicate {
                Some(p) => write!(f, "SeqScan({table}, {p})"),
                None => write!(f, "SeqScan({table})"),
            },
            PhysicalOp::Filter { predicate } => write!(f, "Filter({predicate})"),
            PhysicalOp::Project { exprs, .. } => write!(f, "Project[{}]", exprs.len()),
            PhysicalOp::HashJoin {
                join_type,
                build_side,
                condition,
            } => write!(f, "HashJoin({join_type:?}, build={build_side:?}, {condition})"),
            PhysicalOp::MergeJoin {
                join_type,
                condition,
            } => write!(f, "MergeJoin({join_type:?}, {condition})"),
            PhysicalOp::NestedLoopJoin {
                join_type,
                condition,
            } => write!(f, "NestedLoopJoin({join_type:?}, {condition})"),
            PhysicalOp::HashAggregate { group_by, .. } => {
                write!(f, "HashAggregate[{} keys]", group_by.len())
            }
            PhysicalOp::StreamAggregate { group_by, .. } => {
                write!(f, "StreamAggregate[{} keys]", group_by.len())
            }
            PhysicalOp::SortOp { order } => write!(f, "Sort[{} keys]", order.len()),
            PhysicalOp::Exchange { distribution } => write!(f, "Exchange({distribution:?})"),
            PhysicalOp::Limit { offset, count } => write!(f, "Limit({offset}, {count})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Logical(LogicalOp),
    Physical(PhysicalOp),
}

impl Operator {
    pub fn is_logical(&self) -> bool {
        matches!(self, Operator::Logical(_))
    }

    pub fn is_physical(&self) -> bool {
        matches!(self, Operator::Physical(_))
    }

    pub fn as_physical(&self) -> Option<&PhysicalOp> {
        match self {
            Operator::Physical(p) => Some(p),
            Operator::Logical(_) => None,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Operator::Logical(l) => OpKind::Logical(l.kind()),
            Operator::Physical(p) => OpKind::Physical(p.kind()),
        }
    }
}

/// Operator discriminant without payload, used by pattern matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Logical(LogicalOpKind),
    Physical(PhysicalOpKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOpKind {
    Scan,
    Filter,
    Project,
    Join,
    Aggregate,
    Sort,
    Limit,
}

impl LogicalOp {
    pub fn kind(&self) -> LogicalOpKind {
        match self {
            LogicalOp::Scan { .. } => LogicalOpKind::Scan,
            LogicalOp::Filter { .. } => LogicalOpKind::Filter,
            LogicalOp::Project { .. } => LogicalOpKind::Project,
            LogicalOp::Join { .. } => LogicalOpKind::Join,
            LogicalOp::Aggregate { .. } => LogicalOpKind::Aggregate,
            LogicalOp::Sort { .. } => LogicalOpKind::Sort,
            LogicalOp::Limit { .. } => LogicalOpKind::Limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalOpKind {
    SeqScan,
    Filter,
    Project,
    HashJoin,
    MergeJoin,
    NestedLoopJoin,
    HashAggregate,
    StreamAggregate,
    SortOp,
    Exchange,
    Limit,
}

impl PhysicalOp {
    pub fn kind(&self) -> PhysicalOpKind {
        match self {
            PhysicalOp::SeqScan { .. } => PhysicalOpKind::SeqScan,
            PhysicalOp::Filter { .. } => PhysicalOpKind::Filter,
            PhysicalOp::Project { .. } => PhysicalOpKind::Project,
            PhysicalOp::HashJoin { .. } => PhysicalOpKind::HashJoin,
            PhysicalOp::MergeJoin { .. } => PhysicalOpKind::MergeJoin,
            PhysicalOp::NestedLoopJoin { .. } => PhysicalOpKind::NestedLoopJoin,
            PhysicalOp::HashAggregate { .. } => PhysicalOpKind::HashAggregate,
            PhysicalOp::StreamAggregate { .. } => PhysicalOpKind::StreamAggregate,
            PhysicalOp::SortOp { .. } => PhysicalOpKind::SortOp,
            PhysicalOp::Exchange { .. } => PhysicalOpKind::Exchange,
            PhysicalOp::Limit { .. } => PhysicalOpKind::Limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conjunction_roundtrip() {
        let a = Expr::eq(Expr::column("a", "x"), Expr::column("b", "y"));
        let b = Expr::eq(Expr::column("b", "z"), Expr::column("c", "w"));
        assert_eq!(Expr::conjunction(vec![a.clone()]), Some(a.clone()));
        assert_eq!(Expr::conjunction(vec![]), None);

        let both = Expr::conjunction(vec![a, b]).unwrap();
        assert_eq!(both.conjuncts().len(), 2);
        assert!(both.references_table("c"));
        assert!(!both.references_table("d"));
    }

    #[test]
    fn test_has_equi_predicate() {
        let equi = Expr::eq(Expr::column("a", "x"), Expr::column("b", "y"));
        assert!(equi.has_equi_predicate());

        let range = Expr::BinaryOp {
            op: BinaryOp::Lt,
            left: Box::new(Expr::column("a", "x")),
            right: Box::new(Expr::Literal(ScalarValue::Int64(10))),
        };
        assert!(!range.has_equi_predicate());
        assert!(Expr::And(vec![range, equi]).has_equi_predicate());
    }

    #[test]
    fn test_float_literals_hash_by_value() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(ScalarValue::Float64(OrderedFloat(1.5)));
        assert!(set.contains(&ScalarValue::Float64(OrderedFloat(1.5))));
        assert!(!set.contains(&ScalarValue::Float64(OrderedFloat(2.5))));
    }
}
