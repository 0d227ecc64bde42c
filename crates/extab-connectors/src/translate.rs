//! Predicate translation: compiles a planner predicate into whatever the
//! target backend can evaluate (native filter, query text, command list).
//!
//! Translation never fails hard. Anything the backend cannot represent comes
//! back as [`Translation::NotPushable`] and the host filters every row.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use extab_core::{TableSchema, Value};

use crate::backend::{BackendKind, Capability, FilterTarget, SpecialColumns, TextDialect};
use crate::native::{NativeArg, NativeFilter};
use crate::predicate::{CompareOp, Comparison, Operand, PredicateNode};

/// Result of translating one predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Translation {
    Native { filter: NativeFilter },
    Text(TextFilter),
    Commands(CommandFilter),
    NotPushable,
}

impl Translation {
    pub fn is_pushable(&self) -> bool {
        !matches!(self, Translation::NotPushable)
    }

    pub fn native(&self) -> Option<&NativeFilter> {
        match self {
            Translation::Native { filter } => Some(filter),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&TextFilter> {
        match self {
            Translation::Text(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Translation::Native { filter } => write!(f, "NATIVE {}", filter),
            Translation::Text(t) => write!(f, "TEXT{}", t.where_clause()),
            Translation::Commands(c) => write!(f, "COMMANDS {:?} {:?}", c.op, c.commands),
            Translation::NotPushable => write!(f, "NOT PUSHABLE"),
        }
    }
}

/// A textual filter with the literals it embeds, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextFilter {
    pub clause: String,
    pub params: Vec<Value>,
}

impl TextFilter {
    pub fn where_clause(&self) -> String {
        format!(" WHERE {}", self.clause)
    }
}

/// Commands for command-executing backends (`col = 'cmd'` or `col IN (...)`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandFilter {
    pub op: CompareOp,
    pub commands: Vec<String>,
}

/// Translate `root` for a backend with `capability`.
///
/// The input tree is only read. The caller caches the result on the table
/// handle for the rest of the statement.
pub fn translate(root: &PredicateNode, schema: &TableSchema, capability: &Capability) -> Translation {
    let translation = match capability.filter {
        FilterTarget::Native => native_node(root, schema, capability)
            .map(|filter| Translation::Native { filter }),
        FilterTarget::Text(TextDialect::Command) => {
            command_filter(root, schema).map(Translation::Commands)
        }
        FilterTarget::Text(dialect) => {
            let builder = TextBuilder {
                schema,
                capability,
                dialect,
            };
            builder
                .node(root)
                .map(|(clause, params)| Translation::Text(TextFilter { clause, params }))
        }
        FilterTarget::None => None,
    }
    .unwrap_or(Translation::NotPushable);

    debug!(
        table = %schema.name,
        kind = %capability.kind,
        "predicate translated: {}",
        translation
    );
    translation
}

// ---------------------------------------------------------------------------
// Shared operand checks
// ---------------------------------------------------------------------------

fn pushable_literal(value: &Value) -> bool {
    !value.is_null() && value.is_serializable()
}

/// Operand shape rules common to every target. Returns `false` when the
/// comparison cannot be pushed anywhere.
fn well_formed(c: &Comparison) -> bool {
    let ops = &c.operands;
    match c.op {
        CompareOp::IsNull => ops.len() == 1 && ops[0].as_column().is_some(),
        CompareOp::In | CompareOp::Between => {
            let arity_ok = if c.op == CompareOp::Between {
                ops.len() == 3
            } else {
                ops.len() >= 2
            };
            if !arity_ok || ops[0].as_column().is_none() {
                return false;
            }
            let literals: Option<Vec<&Value>> = ops[1..].iter().map(|o| o.as_literal()).collect();
            match literals {
                Some(values) => {
                    let class = values[0].class();
                    values
                        .iter()
                        .all(|v| pushable_literal(v) && v.class() == class)
                }
                None => false,
            }
        }
        CompareOp::Like => {
            ops.len() == 2
                && ops[0].as_column().is_some()
                && matches!(ops[1].as_literal(), Some(Value::String(_)))
        }
        _ => {
            ops.len() == 2
                && ops.iter().any(|o| o.as_column().is_some())
                && ops
                    .iter()
                    .filter_map(|o| o.as_literal())
                    .all(pushable_literal)
        }
    }
}

// ---------------------------------------------------------------------------
// Native filters
// ---------------------------------------------------------------------------

fn native_node(node: &PredicateNode, schema: &TableSchema, cap: &Capability) -> Option<NativeFilter> {
    match node {
        PredicateNode::Compare(c) => native_compare(c, schema),
        PredicateNode::And { children } => {
            let mut kept = Vec::with_capacity(children.len());
            for child in children {
                match native_node(child, schema, cap) {
                    Some(f) => kept.push(f),
                    None if cap.residual_filter => {}
                    None => return None,
                }
            }
            match kept.len() {
                0 => None,
                1 => kept.pop(),
                _ => Some(NativeFilter::And(kept)),
            }
        }
        PredicateNode::Or { children } => {
            let parts: Option<Vec<NativeFilter>> = children
                .iter()
                .map(|child| native_node(child, schema, cap))
                .collect();
            match parts? {
                parts if parts.is_empty() => None,
                mut parts if parts.len() == 1 => parts.pop(),
                parts => Some(NativeFilter::Or(parts)),
            }
        }
    }
}

fn native_compare(c: &Comparison, schema: &TableSchema) -> Option<NativeFilter> {
    if !well_formed(c) {
        return None;
    }
    let args: Option<Vec<NativeArg>> = c
        .operands
        .iter()
        .map(|o| match o {
            Operand::Column(cref) => {
                let index = cref.resolve(schema)?;
                let col = &schema.columns[index];
                if col.is_virtual || col.special().is_some() {
                    return None;
                }
                Some(NativeArg::Column {
                    index,
                    name: col.name.clone(),
                })
            }
            Operand::Literal(v) => Some(NativeArg::Value(v.clone())),
        })
        .collect();
    Some(NativeFilter::Compare {
        op: c.op,
        negated: c.negated,
        args: args?,
    })
}

// ---------------------------------------------------------------------------
// Query text
// ---------------------------------------------------------------------------

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn sanitize_sql_string(s: &str, escape_backslash: bool) -> String {
    let doubled = s.replace('\'', "''");
    if escape_backslash {
        doubled.replace('\\', "\\\\")
    } else {
        doubled
    }
}

struct TextBuilder<'a> {
    schema: &'a TableSchema,
    capability: &'a Capability,
    dialect: TextDialect,
}

type Fragment = (String, Vec<Value>);

impl TextBuilder<'_> {
    fn node(&self, node: &PredicateNode) -> Option<Fragment> {
        match node {
            PredicateNode::Compare(c) => self.compare(c),
            PredicateNode::And { children } => {
                let mut kept = Vec::with_capacity(children.len());
                for child in children {
                    match self.node(child) {
                        Some(fragment) => kept.push(fragment),
                        None if self.capability.residual_filter => {}
                        None => return None,
                    }
                }
                Self::join(kept, " AND ")
            }
            PredicateNode::Or { children } => {
                let kept: Option<Vec<Fragment>> = children.iter().map(|c| self.node(c)).collect();
                Self::join(kept?, " OR ")
            }
        }
    }

    /// Parenthesize the surviving children. Each child is complete on its
    /// own, so parentheses are balanced whatever was dropped.
    fn join(parts: Vec<Fragment>, sep: &str) -> Option<Fragment> {
        if parts.is_empty() {
            return None;
        }
        let mut params = Vec::new();
        let mut texts = Vec::with_capacity(parts.len());
        for (text, p) in parts {
            texts.push(text);
            params.extend(p);
        }
        Some((format!("({})", texts.join(sep)), params))
    }

    fn column_name(&self, operand: &Operand) -> Option<String> {
        let cref = operand.as_column()?;
        let col = &self.schema.columns[cref.resolve(self.schema)?];
        match (col.special(), self.capability.special_columns) {
            (Some(sp), SpecialColumns::TabIdOnly) if sp.eq_ignore_ascii_case("TABID") => {
                Some("TABID".to_string())
            }
            (Some(sp), SpecialColumns::Any) => Some(sp),
            (Some(_), _) | (None, SpecialColumns::TabIdOnly) => None,
            (None, _) if col.is_virtual => None,
            (None, _) => Some(self.quote_identifier(&col.name)),
        }
    }

    fn quote_identifier(&self, name: &str) -> String {
        match self.capability.identifier_quote {
            Some(q) if !is_plain_identifier(name) => {
                let doubled = name.replace(q, &format!("{}{}", q, q));
                format!("{}{}{}", q, doubled, q)
            }
            _ => name.to_string(),
        }
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::String(s) => format!(
                "'{}'",
                sanitize_sql_string(s, self.capability.kind == BackendKind::Mysql)
            ),
            Value::Date(_) => format!("'{}'", value),
            other => other.to_string(),
        }
    }

    /// Render one operand and record literals as parameters.
    fn operand(&self, operand: &Operand, params: &mut Vec<Value>) -> Option<String> {
        match operand {
            Operand::Column(_) => self.column_name(operand),
            Operand::Literal(v) => {
                params.push(v.clone());
                Some(self.literal(v))
            }
        }
    }

    fn compare(&self, c: &Comparison) -> Option<Fragment> {
        if !well_formed(c) {
            return None;
        }
        if c.op.is_multi() && self.dialect == TextDialect::Wql {
            return None;
        }
        let mut params = Vec::new();
        let text = match c.op {
            CompareOp::IsNull => {
                let col = self.column_name(&c.operands[0])?;
                let test = if c.negated { " IS NOT NULL" } else { " IS NULL" };
                format!("{}{}", col, test)
            }
            CompareOp::Like => {
                let col = self.column_name(&c.operands[0])?;
                let op = if c.negated { " NOT LIKE " } else { " LIKE " };
                let pattern = self.operand(&c.operands[1], &mut params)?;
                format!("{}{}{}", col, op, pattern)
            }
            CompareOp::In => {
                let col = self.column_name(&c.operands[0])?;
                let op = if c.negated { " NOT IN (" } else { " IN (" };
                let list: Option<Vec<String>> = c.operands[1..]
                    .iter()
                    .map(|o| self.operand(o, &mut params))
                    .collect();
                format!("{}{}{})", col, op, list?.join(", "))
            }
            CompareOp::Between => {
                let col = self.column_name(&c.operands[0])?;
                let op = if c.negated { " NOT BETWEEN " } else { " BETWEEN " };
                let low = self.operand(&c.operands[1], &mut params)?;
                let high = self.operand(&c.operands[2], &mut params)?;
                format!("{}{}{} AND {}", col, op, low, high)
            }
            binary => {
                let op = if c.negated {
                    binary.complement()?
                } else {
                    binary
                };
                let left = self.operand(&c.operands[0], &mut params)?;
                let right = self.operand(&c.operands[1], &mut params)?;
                format!("{}{}{}", left, binary_token(op)?, right)
            }
        };
        Some((text, params))
    }
}

fn binary_token(op: CompareOp) -> Option<&'static str> {
    match op {
        CompareOp::Eq => Some(" = "),
        CompareOp::Ne => Some(" <> "),
        CompareOp::Lt => Some(" < "),
        CompareOp::Le => Some(" <= "),
        CompareOp::Gt => Some(" > "),
        CompareOp::Ge => Some(" >= "),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Command lists
// ---------------------------------------------------------------------------

/// Only `col = 'cmd'` or `col IN ('a', 'b')` with no negation and no
/// conjunction can be sent to a command executor.
fn command_filter(node: &PredicateNode, schema: &TableSchema) -> Option<CommandFilter> {
    let c = match node {
        PredicateNode::Compare(c) => c,
        _ => return None,
    };
    if c.negated || !matches!(c.op, CompareOp::Eq | CompareOp::In) || c.operands.len() < 2 {
        return None;
    }
    let col = &schema.columns[c.operands[0].as_column()?.resolve(schema)?];
    if col.is_virtual || col.special().is_some() {
        return None;
    }
    if c.op == CompareOp::Eq && c.operands.len() != 2 {
        return None;
    }
    let commands: Option<Vec<String>> = c.operands[1..]
        .iter()
        .map(|o| match o.as_literal() {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        })
        .collect();
    Some(CommandFilter {
        op: c.op,
        commands: commands?,
    })
}
