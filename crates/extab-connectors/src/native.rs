//! Native filter objects evaluated by local backends while reading rows.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use extab_core::Value;

use crate::predicate::{compare_values, CompareOp};

/// Argument of a native comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeArg {
    Column { index: usize, name: String },
    Value(Value),
}

/// Composable filter tree over column positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeFilter {
    Compare {
        op: CompareOp,
        negated: bool,
        args: Vec<NativeArg>,
    },
    And(Vec<NativeFilter>),
    Or(Vec<NativeFilter>),
}

impl NativeFilter {
    /// Three-valued evaluation over a full-width row.
    pub fn evaluate(&self, row: &[Value]) -> Option<bool> {
        match self {
            NativeFilter::Compare { op, negated, args } => {
                let values: Option<Vec<&Value>> = args
                    .iter()
                    .map(|arg| match arg {
                        NativeArg::Column { index, .. } => row.get(*index),
                        NativeArg::Value(v) => Some(v),
                    })
                    .collect();
                compare_values(*op, &values?).map(|b| b != *negated)
            }
            NativeFilter::And(children) => {
                let mut result = Some(true);
                for child in children {
                    match child.evaluate(row) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            NativeFilter::Or(children) => {
                let mut result = Some(false);
                for child in children {
                    match child.evaluate(row) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
        }
    }

    pub fn matches(&self, row: &[Value]) -> bool {
        self.evaluate(row) == Some(true)
    }

    /// Column positions the filter reads.
    pub fn columns(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<usize>) {
        match self {
            NativeFilter::Compare { args, .. } => {
                for arg in args {
                    if let NativeArg::Column { index, .. } = arg {
                        out.insert(*index);
                    }
                }
            }
            NativeFilter::And(children) | NativeFilter::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
        }
    }
}

impl fmt::Display for NativeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeArg::Column { index, name } => write!(f, "{}#{}", name, index),
            NativeArg::Value(Value::String(s)) => write!(f, "'{}'", s),
            NativeArg::Value(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Display for NativeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeFilter::Compare { op, negated, args } => {
                let not = if *negated { "NOT " } else { "" };
                let list = args
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{}{:?}({})", not, op, list)
            }
            NativeFilter::And(children) | NativeFilter::Or(children) => {
                let sep = if matches!(self, NativeFilter::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                let parts = children
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(sep);
                write!(f, "({})", parts)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(index: usize) -> NativeArg {
        NativeArg::Column {
            index,
            name: format!("c{}", index),
        }
    }

    #[test]
    fn test_evaluate_compare() {
        let f = NativeFilter::Compare {
            op: CompareOp::Ge,
            negated: false,
            args: vec![col(1), NativeArg::Value(Value::Integer(10))],
        };
        assert!(f.matches(&[Value::Null, Value::Integer(10)]));
        assert!(!f.matches(&[Value::Null, Value::Integer(9)]));
        assert!(!f.matches(&[Value::Null, Value::Null]));
    }

    #[test]
    fn test_columns_and_display() {
        let f = NativeFilter::And(vec![
            NativeFilter::Compare {
                op: CompareOp::Eq,
                negated: false,
                args: vec![col(0), NativeArg::Value("a".into())],
            },
            NativeFilter::Compare {
                op: CompareOp::IsNull,
                negated: true,
                args: vec![col(2)],
            },
        ]);
        assert_eq!(f.columns().into_iter().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(f.to_string(), "(Eq(c0#0, 'a') AND NOT IsNull(c2#2))");
    }

    #[test]
    fn test_or_short_circuits_unknown() {
        let f = NativeFilter::Or(vec![
            NativeFilter::Compare {
                op: CompareOp::Eq,
                negated: false,
                args: vec![col(0), NativeArg::Value("a".into())],
            },
            NativeFilter::Compare {
                op: CompareOp::Eq,
                negated: false,
                args: vec![col(1), NativeArg::Value(Value::Integer(1))],
            },
        ]);
        assert_eq!(f.evaluate(&[Value::Null, Value::Integer(1)]), Some(true));
        assert_eq!(f.evaluate(&[Value::Null, Value::Integer(2)]), None);
    }
}
