//! Generic predicate trees handed down by the host planner.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use extab_core::{like_match, TableSchema, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    In,
    Between,
    IsNull,
}

impl CompareOp {
    /// IN and BETWEEN take a column followed by a list of literals.
    pub fn is_multi(self) -> bool {
        matches!(self, CompareOp::In | CompareOp::Between)
    }

    /// The complementary binary operator, for folding a negation.
    pub fn complement(self) -> Option<CompareOp> {
        match self {
            CompareOp::Eq => Some(CompareOp::Ne),
            CompareOp::Ne => Some(CompareOp::Eq),
            CompareOp::Lt => Some(CompareOp::Ge),
            CompareOp::Ge => Some(CompareOp::Lt),
            CompareOp::Gt => Some(CompareOp::Le),
            CompareOp::Le => Some(CompareOp::Gt),
            _ => None,
        }
    }

    /// The operator with its operands swapped (`a < b` is `b > a`).
    pub fn mirrored(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Ge => CompareOp::Le,
            other => other,
        }
    }

    /// Whether `ord` satisfies a binary ordering operator.
    pub fn accepts(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
            _ => false,
        }
    }
}

/// A column named in a predicate, optionally qualified by its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(name: &str) -> Self {
        Self {
            table: None,
            name: name.to_string(),
        }
    }

    pub fn qualified(table: &str, name: &str) -> Self {
        Self {
            table: Some(table.to_string()),
            name: name.to_string(),
        }
    }

    /// Position of the column in `schema`, if it belongs to that table.
    pub fn resolve(&self, schema: &TableSchema) -> Option<usize> {
        match &self.table {
            Some(t) if !t.eq_ignore_ascii_case(&schema.name) => None,
            _ => schema.column_index(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Column(ColumnRef),
    Literal(Value),
}

impl Operand {
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Operand::Column(c) => Some(c),
            Operand::Literal(_) => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Operand::Literal(v) => Some(v),
            Operand::Column(_) => None,
        }
    }
}

/// A single comparison. `negated` applies to the whole comparison
/// (`NOT IN`, `NOT BETWEEN`, `NOT LIKE`, `IS NOT NULL`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub op: CompareOp,
    #[serde(default)]
    pub negated: bool,
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum PredicateNode {
    Compare(Comparison),
    And { children: Vec<PredicateNode> },
    Or { children: Vec<PredicateNode> },
}

impl PredicateNode {
    pub fn compare(op: CompareOp, column: &str, value: impl Into<Value>) -> Self {
        PredicateNode::Compare(Comparison {
            op,
            negated: false,
            operands: vec![
                Operand::Column(ColumnRef::new(column)),
                Operand::Literal(value.into()),
            ],
        })
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(CompareOp::Eq, column, value)
    }

    pub fn in_list(column: &str, values: Vec<Value>) -> Self {
        let mut operands = vec![Operand::Column(ColumnRef::new(column))];
        operands.extend(values.into_iter().map(Operand::Literal));
        PredicateNode::Compare(Comparison {
            op: CompareOp::In,
            negated: false,
            operands,
        })
    }

    pub fn between(column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        PredicateNode::Compare(Comparison {
            op: CompareOp::Between,
            negated: false,
            operands: vec![
                Operand::Column(ColumnRef::new(column)),
                Operand::Literal(low.into()),
                Operand::Literal(high.into()),
            ],
        })
    }

    pub fn is_null(column: &str) -> Self {
        PredicateNode::Compare(Comparison {
            op: CompareOp::IsNull,
            negated: false,
            operands: vec![Operand::Column(ColumnRef::new(column))],
        })
    }

    pub fn and(children: Vec<PredicateNode>) -> Self {
        PredicateNode::And { children }
    }

    pub fn or(children: Vec<PredicateNode>) -> Self {
        PredicateNode::Or { children }
    }

    /// Negate a comparison node; conjunctions are returned unchanged.
    pub fn negate(self) -> Self {
        match self {
            PredicateNode::Compare(mut c) => {
                c.negated = !c.negated;
                PredicateNode::Compare(c)
            }
            other => other,
        }
    }

    /// Three-valued evaluation against a full-width row of `schema`.
    /// `None` is UNKNOWN.
    pub fn evaluate(&self, schema: &TableSchema, row: &[Value]) -> Option<bool> {
        match self {
            PredicateNode::Compare(c) => c.evaluate(schema, row),
            PredicateNode::And { children } => {
                let mut result = Some(true);
                for child in children {
                    match child.evaluate(schema, row) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            PredicateNode::Or { children } => {
                let mut result = Some(false);
                for child in children {
                    match child.evaluate(schema, row) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
        }
    }

    /// Whether the row passes the predicate (UNKNOWN rejects).
    pub fn matches(&self, schema: &TableSchema, row: &[Value]) -> bool {
        self.evaluate(schema, row) == Some(true)
    }
}

impl Comparison {
    fn operand_value<'a>(
        &self,
        operand: &'a Operand,
        schema: &TableSchema,
        row: &'a [Value],
    ) -> Option<&'a Value> {
        match operand {
            Operand::Literal(v) => Some(v),
            Operand::Column(c) => c.resolve(schema).and_then(|i| row.get(i)),
        }
    }

    fn evaluate(&self, schema: &TableSchema, row: &[Value]) -> Option<bool> {
        let values: Option<Vec<&Value>> = self
            .operands
            .iter()
            .map(|o| self.operand_value(o, schema, row))
            .collect();
        let values = values?;
        let result = compare_values(self.op, &values)?;
        Some(result != self.negated)
    }
}

/// SQL semantics of `op` over already resolved operand values.
pub(crate) fn compare_values(op: CompareOp, values: &[&Value]) -> Option<bool> {
    let first = values.first()?;
    match op {
        CompareOp::IsNull => Some(first.is_null()),
        CompareOp::Like => match (first, values.get(1)?) {
            (Value::Null, _) | (_, Value::Null) => None,
            (text, Value::String(pattern)) => Some(like_match(&text.to_string(), pattern)),
            _ => None,
        },
        CompareOp::In => {
            let mut unknown = false;
            for candidate in &values[1..] {
                match first.sql_cmp(candidate) {
                    Some(Ordering::Equal) => return Some(true),
                    Some(_) => {}
                    None => unknown = true,
                }
            }
            if unknown {
                None
            } else {
                Some(false)
            }
        }
        CompareOp::Between => {
            let low = first.sql_cmp(values.get(1)?);
            let high = first.sql_cmp(values.get(2)?);
            match (low, high) {
                (Some(Ordering::Less), _) | (_, Some(Ordering::Greater)) => Some(false),
                (Some(_), Some(_)) => Some(true),
                _ => None,
            }
        }
        binary => first.sql_cmp(values.get(1)?).map(|ord| binary.accepts(ord)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extab_core::{ColumnDef, ColumnType};

    fn schema() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                ColumnDef::new("name", ColumnType::String),
                ColumnDef::new("qty", ColumnType::Integer),
            ],
        )
    }

    fn row(name: Value, qty: Value) -> Vec<Value> {
        vec![name, qty]
    }

    #[test]
    fn test_binary_comparison() {
        let s = schema();
        let r = row("a".into(), Value::Integer(7));
        assert!(PredicateNode::compare(CompareOp::Gt, "qty", 5i64).matches(&s, &r));
        assert!(!PredicateNode::compare(CompareOp::Lt, "qty", 5i64).matches(&s, &r));
        assert!(PredicateNode::eq("NAME", "a").matches(&s, &r));
    }

    #[test]
    fn test_null_is_unknown() {
        let s = schema();
        let r = row(Value::Null, Value::Integer(1));
        let p = PredicateNode::eq("name", "a");
        assert_eq!(p.evaluate(&s, &r), None);
        assert_eq!(p.clone().negate().evaluate(&s, &r), None);
        assert!(PredicateNode::is_null("name").matches(&s, &r));
        assert!(!PredicateNode::is_null("name").negate().matches(&s, &r));
    }

    #[test]
    fn test_three_valued_connectives() {
        let s = schema();
        let r = row(Value::Null, Value::Integer(1));
        let unknown = PredicateNode::eq("name", "a");
        let t = PredicateNode::eq("qty", 1i64);
        let f = PredicateNode::eq("qty", 2i64);
        assert_eq!(PredicateNode::and(vec![unknown.clone(), f.clone()]).evaluate(&s, &r), Some(false));
        assert_eq!(PredicateNode::and(vec![unknown.clone(), t.clone()]).evaluate(&s, &r), None);
        assert_eq!(PredicateNode::or(vec![unknown.clone(), t]).evaluate(&s, &r), Some(true));
        assert_eq!(PredicateNode::or(vec![unknown, f]).evaluate(&s, &r), None);
    }

    #[test]
    fn test_in_and_between() {
        let s = schema();
        let r = row("b".into(), Value::Integer(3));
        assert!(PredicateNode::in_list("name", vec!["a".into(), "b".into()]).matches(&s, &r));
        assert!(PredicateNode::in_list("name", vec!["x".into()]).negate().matches(&s, &r));
        assert!(PredicateNode::between("qty", 1i64, 3i64).matches(&s, &r));
        assert!(!PredicateNode::between("qty", 4i64, 9i64).matches(&s, &r));
        let with_null = PredicateNode::in_list("name", vec!["x".into(), Value::Null]);
        assert_eq!(with_null.evaluate(&s, &r), None);
    }

    #[test]
    fn test_like() {
        let s = schema();
        let r = row("widget".into(), Value::Integer(3));
        assert!(PredicateNode::compare(CompareOp::Like, "name", "wid%").matches(&s, &r));
        assert!(PredicateNode::compare(CompareOp::Like, "name", "x%").negate().matches(&s, &r));
    }

    #[test]
    fn test_foreign_table_column_does_not_resolve() {
        let s = schema();
        assert_eq!(ColumnRef::qualified("T", "qty").resolve(&s), Some(1));
        assert_eq!(ColumnRef::qualified("other", "qty").resolve(&s), None);
    }

    #[test]
    fn test_predicate_json() {
        let json = r#"{
            "node": "and",
            "children": [
                {"node": "compare", "op": "eq", "operands": [
                    {"column": {"name": "name"}},
                    {"literal": {"type": "string", "value": "a"}}
                ]},
                {"node": "compare", "op": "gt", "operands": [
                    {"column": {"name": "qty"}},
                    {"literal": {"type": "integer", "value": 5}}
                ]}
            ]
        }"#;
        let p: PredicateNode = serde_json::from_str(json).unwrap();
        assert_eq!(
            p,
            PredicateNode::and(vec![
                PredicateNode::eq("name", "a"),
                PredicateNode::compare(CompareOp::Gt, "qty", 5i64),
            ])
        );
    }
}
