//! Glue for hosts planning with DataFusion: filter expressions to predicate
//! trees, pushdown classification, and Arrow schema/batch conversion.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryArray, Date32Array, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use chrono::{Datelike, NaiveDate};
use datafusion::logical_expr::expr::{Between, InList, Like};
use datafusion::logical_expr::{BinaryExpr, Expr, Operator, TableProviderFilterPushDown};
use datafusion::scalar::ScalarValue;
use tracing::debug;

use extab_core::{ColumnDef, ColumnType, Decimal, TableSchema, Value};

use crate::backend::Capability;
use crate::error::Result;
use crate::predicate::{ColumnRef, CompareOp, Comparison, Operand, PredicateNode};
use crate::translate::translate;

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

fn literal_value(value: &ScalarValue) -> Option<Value> {
    let v = match value {
        ScalarValue::Null => Value::Null,
        ScalarValue::Utf8(s) | ScalarValue::LargeUtf8(s) | ScalarValue::Utf8View(s) => {
            s.clone().map(Value::String).unwrap_or(Value::Null)
        }
        ScalarValue::Int8(v) => v.map(|i| Value::Integer(i64::from(i))).unwrap_or(Value::Null),
        ScalarValue::Int16(v) => v.map(|i| Value::Integer(i64::from(i))).unwrap_or(Value::Null),
        ScalarValue::Int32(v) => v.map(|i| Value::Integer(i64::from(i))).unwrap_or(Value::Null),
        ScalarValue::Int64(v) => v.map(Value::Integer).unwrap_or(Value::Null),
        ScalarValue::UInt8(v) => v.map(|i| Value::Integer(i64::from(i))).unwrap_or(Value::Null),
        ScalarValue::UInt16(v) => v.map(|i| Value::Integer(i64::from(i))).unwrap_or(Value::Null),
        ScalarValue::UInt32(v) => v.map(|i| Value::Integer(i64::from(i))).unwrap_or(Value::Null),
        ScalarValue::UInt64(v) => match v {
            Some(i) => Value::Integer(i64::try_from(*i).ok()?),
            None => Value::Null,
        },
        ScalarValue::Float32(v) => v.map(|f| Value::Double(f64::from(f))).unwrap_or(Value::Null),
        ScalarValue::Float64(v) => v.map(Value::Double).unwrap_or(Value::Null),
        ScalarValue::Decimal128(v, _, scale) => match v {
            Some(digits) => Value::Decimal(Decimal::new(*digits, u32::try_from(*scale).ok()?)),
            None => Value::Null,
        },
        ScalarValue::Date32(v) => match v {
            Some(days) => Value::Date(NaiveDate::from_num_days_from_ce_opt(
                days.checked_add(UNIX_EPOCH_CE_DAYS)?,
            )?),
            None => Value::Null,
        },
        ScalarValue::Binary(v) | ScalarValue::LargeBinary(v) => {
            v.clone().map(Value::Binary).unwrap_or(Value::Null)
        }
        _ => return None,
    };
    Some(v)
}

fn operand(expr: &Expr) -> Option<Operand> {
    match expr {
        Expr::Column(col) => Some(Operand::Column(match &col.relation {
            Some(relation) => ColumnRef::qualified(relation.table(), &col.name),
            None => ColumnRef::new(&col.name),
        })),
        Expr::Literal(value) => literal_value(value).map(Operand::Literal),
        _ => None,
    }
}

fn column_operand(expr: &Expr) -> Option<Operand> {
    operand(expr).filter(|o| o.as_column().is_some())
}

fn literal_operand(expr: &Expr) -> Option<Operand> {
    operand(expr).filter(|o| o.as_literal().is_some())
}

fn comparison(op: CompareOp, negated: bool, operands: Vec<Operand>) -> PredicateNode {
    PredicateNode::Compare(Comparison {
        op,
        negated,
        operands,
    })
}

/// Convert a DataFusion filter expression. `None` when any part of it has no
/// predicate-tree equivalent.
pub fn predicate_from_expr(expr: &Expr) -> Option<PredicateNode> {
    match expr {
        Expr::BinaryExpr(BinaryExpr { left, op, right }) => {
            let compare = match op {
                Operator::And => {
                    return Some(PredicateNode::and(vec![
                        predicate_from_expr(left)?,
                        predicate_from_expr(right)?,
                    ]))
                }
                Operator::Or => {
                    return Some(PredicateNode::or(vec![
                        predicate_from_expr(left)?,
                        predicate_from_expr(right)?,
                    ]))
                }
                Operator::Eq => CompareOp::Eq,
                Operator::NotEq => CompareOp::Ne,
                Operator::Lt => CompareOp::Lt,
                Operator::LtEq => CompareOp::Le,
                Operator::Gt => CompareOp::Gt,
                Operator::GtEq => CompareOp::Ge,
                _ => return None,
            };
            let (l, r) = (operand(left)?, operand(right)?);
            // Column first, so `5 < a` becomes `a > 5`.
            if l.as_literal().is_some() && r.as_column().is_some() {
                Some(comparison(compare.mirrored(), false, vec![r, l]))
            } else {
                Some(comparison(compare, false, vec![l, r]))
            }
        }
        Expr::Like(Like {
            negated,
            expr,
            pattern,
            escape_char,
            case_insensitive,
        }) => {
            if *case_insensitive || escape_char.is_some() {
                return None;
            }
            let pattern = literal_operand(pattern)?;
            Some(comparison(
                CompareOp::Like,
                *negated,
                vec![column_operand(expr)?, pattern],
            ))
        }
        Expr::Between(Between {
            expr,
            negated,
            low,
            high,
        }) => Some(comparison(
            CompareOp::Between,
            *negated,
            vec![column_operand(expr)?, literal_operand(low)?, literal_operand(high)?],
        )),
        Expr::InList(InList {
            expr,
            list,
            negated,
        }) => {
            let mut operands = vec![column_operand(expr)?];
            for item in list {
                operands.push(literal_operand(item)?);
            }
            Some(comparison(CompareOp::In, *negated, operands))
        }
        Expr::IsNull(inner) => Some(comparison(CompareOp::IsNull, false, vec![column_operand(inner)?])),
        Expr::IsNotNull(inner) => {
            Some(comparison(CompareOp::IsNull, true, vec![column_operand(inner)?]))
        }
        Expr::Not(inner) => match predicate_from_expr(inner)? {
            node @ PredicateNode::Compare(_) => Some(node.negate()),
            _ => None,
        },
        _ => None,
    }
}

/// Classify each filter for `TableProvider::supports_filters_pushdown`.
///
/// Pushed filters are `Inexact`: the backend may evaluate a weaker filter
/// and DataFusion re-checks every row.
pub fn supports_filters_pushdown(
    filters: &[&Expr],
    schema: &TableSchema,
    capability: &Capability,
) -> Vec<TableProviderFilterPushDown> {
    filters
        .iter()
        .map(|expr| {
            let pushable = predicate_from_expr(expr)
                .map(|p| translate(&p, schema, capability).is_pushable())
                .unwrap_or(false);
            if pushable {
                TableProviderFilterPushDown::Inexact
            } else {
                debug!(table = %schema.name, filter = %expr, "filter stays in the host");
                TableProviderFilterPushDown::Unsupported
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Schemas and batches
// ---------------------------------------------------------------------------

fn column_type_of(data_type: &DataType) -> ColumnType {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Boolean => ColumnType::Integer,
        DataType::Float16 | DataType::Float32 | DataType::Float64 => ColumnType::Double,
        DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => ColumnType::Decimal,
        DataType::Date32 | DataType::Date64 => ColumnType::Date,
        DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => {
            ColumnType::Binary
        }
        _ => ColumnType::String,
    }
}

/// Table schema for an Arrow schema. Options and indexes start empty.
pub fn table_schema_from_arrow(name: &str, schema: &Schema) -> TableSchema {
    let columns = schema
        .fields()
        .iter()
        .map(|f| {
            let mut column = ColumnDef::new(f.name(), column_type_of(f.data_type()));
            column.nullable = f.is_nullable();
            column
        })
        .collect();
    TableSchema::new(name, columns)
}

fn data_type_of(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::String => DataType::Utf8,
        ColumnType::Integer => DataType::Int64,
        // Decimal columns carry no declared scale; expose them as doubles.
        ColumnType::Double | ColumnType::Decimal => DataType::Float64,
        ColumnType::Date => DataType::Date32,
        ColumnType::Binary => DataType::Binary,
    }
}

/// Arrow schema for the stored columns of `schema`.
pub fn arrow_schema(schema: &TableSchema) -> SchemaRef {
    let fields: Vec<Field> = schema
        .columns
        .iter()
        .map(|c| Field::new(&c.name, data_type_of(c.column_type), c.nullable))
        .collect();
    Arc::new(Schema::new(fields))
}

fn date_days(date: &NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_CE_DAYS
}

/// Convert full-width rows to a record batch in the layout of
/// [`arrow_schema`]. Values that do not fit their column become NULL.
pub fn rows_to_record_batch(schema: &TableSchema, rows: &[Vec<Value>]) -> Result<RecordBatch> {
    let arrow = arrow_schema(schema);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.columns.len());

    for (i, column) in schema.columns.iter().enumerate() {
        let cells = rows.iter().map(|row| row.get(i).unwrap_or(&Value::Null));
        let array: ArrayRef = match column.column_type {
            ColumnType::Integer => Arc::new(Int64Array::from(
                cells
                    .map(|v| match v {
                        Value::Integer(i) => Some(*i),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )),
            ColumnType::Double | ColumnType::Decimal => Arc::new(Float64Array::from(
                cells.map(Value::as_f64).collect::<Vec<_>>(),
            )),
            ColumnType::Date => Arc::new(Date32Array::from(
                cells
                    .map(|v| match v {
                        Value::Date(d) => Some(date_days(d)),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )),
            ColumnType::Binary => Arc::new(BinaryArray::from(
                cells
                    .map(|v| match v {
                        Value::Binary(b) => Some(b.as_slice()),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )),
            ColumnType::String => Arc::new(StringArray::from(
                cells
                    .map(|v| match v {
                        Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .collect::<Vec<_>>(),
            )),
        };
        columns.push(array);
    }

    Ok(RecordBatch::try_new(arrow, columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use arrow::array::Array;
    use datafusion::prelude::{col, lit};

    fn schema() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                ColumnDef::new("a", ColumnType::Integer),
                ColumnDef::new("name", ColumnType::String),
                ColumnDef::new("day", ColumnType::Date),
            ],
        )
    }

    #[test]
    fn test_binary_and_mirrored() {
        let p = predicate_from_expr(&lit(5i64).lt(col("a"))).unwrap();
        assert_eq!(p, PredicateNode::compare(CompareOp::Gt, "a", 5i64));

        let p = predicate_from_expr(&col("name").eq(lit("x")).and(col("a").gt_eq(lit(1i32)))).unwrap();
        assert_eq!(
            p,
            PredicateNode::and(vec![
                PredicateNode::eq("name", "x"),
                PredicateNode::compare(CompareOp::Ge, "a", 1i64),
            ])
        );
    }

    #[test]
    fn test_lists_ranges_and_nulls() {
        let p = predicate_from_expr(&col("a").in_list(vec![lit(1i64), lit(2i64)], true)).unwrap();
        assert_eq!(
            p,
            PredicateNode::in_list("a", vec![Value::Integer(1), Value::Integer(2)]).negate()
        );
        let p = predicate_from_expr(&col("a").between(lit(1i64), lit(9i64))).unwrap();
        assert_eq!(p, PredicateNode::between("a", 1i64, 9i64));
        let p = predicate_from_expr(&col("name").is_not_null()).unwrap();
        assert_eq!(p, PredicateNode::is_null("name").negate());
        let p = predicate_from_expr(&col("name").like(lit("ab%"))).unwrap();
        assert_eq!(p, PredicateNode::compare(CompareOp::Like, "name", "ab%"));
    }

    #[test]
    fn test_date_literal() {
        let expr = col("day").eq(Expr::Literal(ScalarValue::Date32(Some(19_723))));
        let p = predicate_from_expr(&expr).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(p, PredicateNode::eq("day", day));
        assert_eq!(date_days(&day), 19_723);
    }

    #[test]
    fn test_unconvertible_expressions() {
        assert!(predicate_from_expr(&(col("a") + lit(1i64)).eq(lit(2i64))).is_none());
        assert!(predicate_from_expr(&col("name").ilike(lit("x"))).is_none());
        assert!(predicate_from_expr(&Expr::Not(Box::new(col("a").eq(lit(1i64)).or(col("a").eq(lit(2i64)))))).is_none());
    }

    #[test]
    fn test_pushdown_classification() {
        let s = schema();
        let cap = BackendKind::Csv.capability();
        let pushable = col("a").eq(lit(1i64));
        let computed = (col("a") * lit(2i64)).gt(lit(3i64));
        let result = supports_filters_pushdown(&[&pushable, &computed], &s, &cap);
        assert_eq!(
            result,
            vec![
                TableProviderFilterPushDown::Inexact,
                TableProviderFilterPushDown::Unsupported
            ]
        );
        let none = BackendKind::Xml.capability();
        assert_eq!(
            supports_filters_pushdown(&[&pushable], &s, &none),
            vec![TableProviderFilterPushDown::Unsupported]
        );
    }

    #[test]
    fn test_schema_round_trip_and_batch() {
        let arrow = Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("label", DataType::Utf8, true),
            Field::new("when", DataType::Date32, true),
        ]);
        let table = table_schema_from_arrow("x", &arrow);
        assert_eq!(table.columns[0].column_type, ColumnType::Integer);
        assert!(!table.columns[0].nullable);
        assert_eq!(table.columns[2].column_type, ColumnType::Date);

        let rows = vec![
            vec![Value::Integer(1), Value::from("a"), Value::Null],
            vec![
                Value::Integer(2),
                Value::Null,
                Value::Date(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap()),
            ],
        ];
        let batch = rows_to_record_batch(&table, &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 3);
        let dates = batch
            .column(2)
            .as_any()
            .downcast_ref::<Date32Array>()
            .unwrap();
        assert!(dates.is_null(0));
        assert_eq!(dates.value(1), 1);
    }
}
