//! Predicate compilation
//!
//! Every rule is resolved against the table schema before any worker runs:
//! the column is interned to its geometry, the comparison value is
//! pre-widened (numeric) or pre-materialized (byte-string), and membership
//! lists become hash sets. Evaluation is a branch on the rule's type tag
//! plus one little-endian field load; nothing is parsed per row.

use crate::data::{ByteStr, ByteStrBuf, PrimType};
use crate::heap::region::SharedRegion;
use crate::query::expr::{Expression, FilterOp, Literal, NormalForm, Rule};
use crate::table::schema::{Column, TableLayout};
use crate::table::Table;
use crate::{EngineError, Result};
use ahash::AHashSet;

/// Numeric comparison, shared by the integer and float rule kinds.
#[derive(Debug, Clone, Copy)]
enum NumCmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl NumCmp {
    fn from_op(op: FilterOp) -> Option<NumCmp> {
        match op {
            FilterOp::Equal => Some(NumCmp::Eq),
            FilterOp::NotEqual => Some(NumCmp::Ne),
            FilterOp::LessThan => Some(NumCmp::Lt),
            FilterOp::LessEqual => Some(NumCmp::Le),
            FilterOp::GreaterThan => Some(NumCmp::Gt),
            FilterOp::GreaterEqual => Some(NumCmp::Ge),
            _ => None,
        }
    }

    #[inline]
    fn eval<T: PartialOrd>(self, a: T, b: T) -> bool {
        match self {
            NumCmp::Eq => a == b,
            NumCmp::Ne => a != b,
            NumCmp::Lt => a < b,
            NumCmp::Le => a <= b,
            NumCmp::Gt => a > b,
            NumCmp::Ge => a >= b,
        }
    }
}

/// Pre-resolved field geometry, independent of the row index.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FieldLoc {
    /// Row-major: offset within the row.
    Row { offset: u32 },
    /// Column-major: stripe start and per-row stride.
    Stripe { data_offset: u32, size: u32 },
}

impl FieldLoc {
    pub(crate) fn of(col: &Column, layout: TableLayout) -> FieldLoc {
        match layout {
            TableLayout::RowMajor => FieldLoc::Row { offset: col.offset },
            TableLayout::ColumnMajor => FieldLoc::Stripe {
                data_offset: col.data_offset,
                size: col.size,
            },
        }
    }

    /// Absolute region offset of the field in `row`.
    #[inline]
    pub(crate) fn resolve(self, data_base: usize, row_step: usize, row: usize) -> usize {
        match self {
            FieldLoc::Row { offset } => data_base + row * row_step + offset as usize,
            FieldLoc::Stripe { data_offset, size } => {
                data_base + data_offset as usize + row * size as usize
            }
        }
    }
}

/// Affix/substring predicate on byte-strings; `negate` on the rule flips
/// the equality and containment forms.
#[derive(Debug, Clone, Copy)]
enum StrPred {
    Equal,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug)]
enum CompiledRule {
    IntCmp {
        loc: FieldLoc,
        ty: PrimType,
        cmp: NumCmp,
        target: i64,
    },
    IntIn {
        loc: FieldLoc,
        ty: PrimType,
        set: AHashSet<i64>,
        negate: bool,
    },
    FloatCmp {
        loc: FieldLoc,
        cmp: NumCmp,
        target: f64,
    },
    FloatIn {
        loc: FieldLoc,
        values: Vec<f64>,
        negate: bool,
    },
    StrCmp {
        loc: FieldLoc,
        size: u32,
        pred: StrPred,
        target: ByteStrBuf,
        negate: bool,
    },
    StrIn {
        loc: FieldLoc,
        size: u32,
        values: Vec<ByteStrBuf>,
        negate: bool,
    },
}

impl CompiledRule {
    #[inline]
    fn eval(&self, region: &SharedRegion, data_base: usize, row_step: usize, row: usize) -> bool {
        match self {
            CompiledRule::IntCmp {
                loc,
                ty,
                cmp,
                target,
            } => {
                let v = ty.load_i64(region, loc.resolve(data_base, row_step, row));
                cmp.eval(v, *target)
            }
            CompiledRule::IntIn {
                loc,
                ty,
                set,
                negate,
            } => {
                let v = ty.load_i64(region, loc.resolve(data_base, row_step, row));
                set.contains(&v) != *negate
            }
            CompiledRule::FloatCmp { loc, cmp, target } => {
                let v = region.read_f32(loc.resolve(data_base, row_step, row)) as f64;
                cmp.eval(v, *target)
            }
            CompiledRule::FloatIn {
                loc,
                values,
                negate,
            } => {
                let v = region.read_f32(loc.resolve(data_base, row_step, row)) as f64;
                values.contains(&v) != *negate
            }
            CompiledRule::StrCmp {
                loc,
                size,
                pred,
                target,
                negate,
            } => {
                let offset = loc.resolve(data_base, row_step, row);
                let field = ByteStr::from_field(region.bytes(offset, *size as usize));
                let hit = match pred {
                    StrPred::Equal => field.equals(target.view()),
                    StrPred::Contains => field.contains(target.view()),
                    StrPred::StartsWith => field.starts_with(target.view()),
                    StrPred::EndsWith => field.ends_with(target.view()),
                };
                hit != *negate
            }
            CompiledRule::StrIn {
                loc,
                size,
                values,
                negate,
            } => {
                let offset = loc.resolve(data_base, row_step, row);
                let field = ByteStr::from_field(region.bytes(offset, *size as usize));
                values.iter().any(|v| field.equals(v.view())) != *negate
            }
        }
    }
}

/// A fully resolved expression, ready for per-row evaluation.
#[derive(Debug)]
pub(crate) struct CompiledExpr {
    clauses: Vec<Vec<CompiledRule>>,
    mode: NormalForm,
    data_base: usize,
    row_step: usize,
}

impl CompiledExpr {
    pub fn compile(table: &Table, expr: &Expression, mode: NormalForm) -> Result<CompiledExpr> {
        let clauses = expr
            .clauses
            .iter()
            .map(|clause| clause.iter().map(|rule| compile_rule(table, rule)).collect())
            .collect::<Result<Vec<Vec<CompiledRule>>>>()?;
        Ok(CompiledExpr {
            clauses,
            mode,
            data_base: table.data_offset(),
            row_step: table.schema().row_step() as usize,
        })
    }

    /// Evaluate against one source row. An empty expression is `true`.
    #[inline]
    pub fn matches(&self, region: &SharedRegion, row: usize) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        let eval = |rule: &CompiledRule| rule.eval(region, self.data_base, self.row_step, row);
        match self.mode {
            NormalForm::Dnf => self
                .clauses
                .iter()
                .any(|clause| clause.iter().all(eval)),
            NormalForm::Cnf => self
                .clauses
                .iter()
                .all(|clause| clause.iter().any(eval)),
        }
    }
}

fn compile_rule(table: &Table, rule: &Rule) -> Result<CompiledRule> {
    let schema = table.schema();
    let col_index = schema.column_index(&rule.field).ok_or_else(|| {
        EngineError::SchemaMismatch(format!("rule references unknown column '{}'", rule.field))
    })?;
    let col = &schema.columns()[col_index];
    let loc = FieldLoc::of(col, schema.layout());
    let op = rule.operation;

    let unsupported = || {
        EngineError::SchemaMismatch(format!(
            "operation {:?} is not supported on column '{}' of type {}",
            op, col.name, col.ty
        ))
    };

    match col.ty {
        PrimType::Void => Err(unsupported()),
        PrimType::Bstr => {
            let (pred, negate) = match op {
                FilterOp::Equal => (StrPred::Equal, false),
                FilterOp::NotEqual => (StrPred::Equal, true),
                FilterOp::Contains => (StrPred::Contains, false),
                FilterOp::NotContains => (StrPred::Contains, true),
                FilterOp::StartsWith => (StrPred::StartsWith, false),
                FilterOp::EndsWith => (StrPred::EndsWith, false),
                FilterOp::In | FilterOp::NotIn => {
                    let values = literal_list(&rule.value, &rule.field)?
                        .iter()
                        .map(|v| literal_str(v, &rule.field))
                        .collect::<Result<Vec<ByteStrBuf>>>()?;
                    return Ok(CompiledRule::StrIn {
                        loc,
                        size: col.size,
                        values,
                        negate: op == FilterOp::NotIn,
                    });
                }
                _ => return Err(unsupported()),
            };
            Ok(CompiledRule::StrCmp {
                loc,
                size: col.size,
                pred,
                target: literal_str(&rule.value, &rule.field)?,
                negate,
            })
        }
        PrimType::F32 => {
            if op.is_membership() {
                let values = literal_list(&rule.value, &rule.field)?
                    .iter()
                    .map(|v| literal_f64(v, &rule.field))
                    .collect::<Result<Vec<f64>>>()?;
                return Ok(CompiledRule::FloatIn {
                    loc,
                    values,
                    negate: op == FilterOp::NotIn,
                });
            }
            let cmp = NumCmp::from_op(op).ok_or_else(unsupported)?;
            Ok(CompiledRule::FloatCmp {
                loc,
                cmp,
                target: literal_f64(&rule.value, &rule.field)?,
            })
        }
        ty => {
            if op.is_membership() {
                let set = literal_list(&rule.value, &rule.field)?
                    .iter()
                    .map(|v| literal_i64(v, &rule.field))
                    .collect::<Result<AHashSet<i64>>>()?;
                return Ok(CompiledRule::IntIn {
                    loc,
                    ty,
                    set,
                    negate: op == FilterOp::NotIn,
                });
            }
            let cmp = NumCmp::from_op(op).ok_or_else(unsupported)?;
            Ok(CompiledRule::IntCmp {
                loc,
                ty,
                cmp,
                target: literal_i64(&rule.value, &rule.field)?,
            })
        }
    }
}

fn literal_list<'v>(value: &'v Literal, field: &str) -> Result<&'v [Literal]> {
    match value {
        Literal::List(items) => Ok(items),
        _ => Err(EngineError::SchemaMismatch(format!(
            "membership rule on '{}' needs a list value",
            field
        ))),
    }
}

/// Integer comparison values: integers pass through, strings are parsed
/// once at compile time (values arrive as JSON scalars).
fn literal_i64(value: &Literal, field: &str) -> Result<i64> {
    match value {
        Literal::Int(v) => Ok(*v),
        Literal::Str(s) => s.trim().parse::<i64>().map_err(|_| {
            EngineError::SchemaMismatch(format!(
                "value '{}' for integer column '{}' is not an integer",
                s, field
            ))
        }),
        Literal::Float(v) => Err(EngineError::SchemaMismatch(format!(
            "value {} for integer column '{}' is not an integer",
            v, field
        ))),
        Literal::List(_) => Err(EngineError::SchemaMismatch(format!(
            "scalar rule on '{}' cannot take a list value",
            field
        ))),
    }
}

fn literal_f64(value: &Literal, field: &str) -> Result<f64> {
    match value {
        Literal::Int(v) => Ok(*v as f64),
        Literal::Float(v) => Ok(*v),
        Literal::Str(s) => s.trim().parse::<f64>().map_err(|_| {
            EngineError::SchemaMismatch(format!(
                "value '{}' for float column '{}' is not numeric",
                s, field
            ))
        }),
        Literal::List(_) => Err(EngineError::SchemaMismatch(format!(
            "scalar rule on '{}' cannot take a list value",
            field
        ))),
    }
}

fn literal_str(value: &Literal, field: &str) -> Result<ByteStrBuf> {
    match value {
        Literal::Str(s) => Ok(ByteStrBuf::from_str(s)),
        _ => Err(EngineError::SchemaMismatch(format!(
            "value for string column '{}' must be a string",
            field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::heap::Heap;
    use crate::table::schema::ColumnSpec;
    use std::sync::Arc;

    fn sample_table() -> (Arc<Heap>, Table) {
        let heap = Heap::new(64 * 1024).unwrap();
        let specs = vec![
            ColumnSpec::new("passengers", PrimType::U32),
            ColumnSpec::new("distance", PrimType::F32),
            ColumnSpec::bstr("origin", 4),
        ];
        let table = Table::create_in(&heap, &specs, 4, TableLayout::RowMajor).unwrap();
        table.add_rows(4).unwrap();
        let rows = [
            (110i64, 1089.0f64, "SEA"),
            (110, 1550.0, "SEA"),
            (190, 1080.0, "MCO"),
            (75, 210.5, "PDX"),
        ];
        for (i, (p, d, o)) in rows.iter().enumerate() {
            let mut row = table.row(i as u32).unwrap();
            row.set_named("passengers", &Value::Int(*p)).unwrap();
            row.set_named("distance", &Value::Float(*d)).unwrap();
            row.set_named("origin", &Value::from(*o)).unwrap();
        }
        (heap, table)
    }

    fn matching_rows(table: &Table, expr: &Expression, mode: NormalForm) -> Vec<u32> {
        let compiled = CompiledExpr::compile(table, expr, mode).unwrap();
        let region = table.block().region();
        (0..table.row_count())
            .filter(|&i| compiled.matches(region, i as usize))
            .collect()
    }

    #[test]
    fn test_int_comparisons() {
        let (_heap, table) = sample_table();
        let expr = Expression::new(vec![vec![Rule::new(
            "passengers",
            FilterOp::GreaterEqual,
            110,
        )]]);
        assert_eq!(matching_rows(&table, &expr, NormalForm::Dnf), [0, 1, 2]);

        let expr = Expression::new(vec![vec![Rule::new("passengers", FilterOp::NotEqual, 110)]]);
        assert_eq!(matching_rows(&table, &expr, NormalForm::Dnf), [2, 3]);
    }

    #[test]
    fn test_float_comparisons() {
        let (_heap, table) = sample_table();
        let expr = Expression::new(vec![vec![Rule::new("distance", FilterOp::LessThan, 1100)]]);
        assert_eq!(matching_rows(&table, &expr, NormalForm::Dnf), [0, 2, 3]);

        let expr = Expression::new(vec![vec![Rule::new("distance", FilterOp::Equal, 210.5)]]);
        assert_eq!(matching_rows(&table, &expr, NormalForm::Dnf), [3]);
    }

    #[test]
    fn test_string_predicates() {
        let (_heap, table) = sample_table();
        let expr = Expression::new(vec![vec![Rule::new("origin", FilterOp::Equal, "SEA")]]);
        assert_eq!(matching_rows(&table, &expr, NormalForm::Dnf), [0, 1]);

        let expr = Expression::new(vec![vec![Rule::new("origin", FilterOp::Contains, "C")]]);
        assert_eq!(matching_rows(&table, &expr, NormalForm::Dnf), [2]);

        let expr = Expression::new(vec![vec![Rule::new("origin", FilterOp::StartsWith, "P")]]);
        assert_eq!(matching_rows(&table, &expr, NormalForm::Dnf), [3]);

        let expr = Expression::new(vec![vec![Rule::new("origin", FilterOp::EndsWith, "EA")]]);
        assert_eq!(matching_rows(&table, &expr, NormalForm::Dnf), [0, 1]);
    }

    #[test]
    fn test_membership() {
        let (_heap, table) = sample_table();
        let expr = Expression::new(vec![vec![Rule::new(
            "origin",
            FilterOp::In,
            vec!["MCO", "PDX"],
        )]]);
        assert_eq!(matching_rows(&table, &expr, NormalForm::Dnf), [2, 3]);

        let expr = Expression::new(vec![vec![Rule::new(
            "passengers",
            FilterOp::NotIn,
            vec![110, 190],
        )]]);
        assert_eq!(matching_rows(&table, &expr, NormalForm::Dnf), [3]);
    }

    #[test]
    fn test_dnf_vs_cnf_nesting() {
        let (_heap, table) = sample_table();
        // [[origin==SEA, passengers==190]]: no row is both.
        let expr = Expression::new(vec![vec![
            Rule::new("origin", FilterOp::Equal, "SEA"),
            Rule::new("passengers", FilterOp::Equal, 190),
        ]]);
        assert!(matching_rows(&table, &expr, NormalForm::Dnf).is_empty());
        // Same clause in CNF is an OR: SEA rows plus the 190 row.
        assert_eq!(matching_rows(&table, &expr, NormalForm::Cnf), [0, 1, 2]);
    }

    #[test]
    fn test_empty_expression_is_true() {
        let (_heap, table) = sample_table();
        assert_eq!(
            matching_rows(&table, &Expression::empty(), NormalForm::Dnf),
            [0, 1, 2, 3]
        );
        assert_eq!(
            matching_rows(&table, &Expression::empty(), NormalForm::Cnf),
            [0, 1, 2, 3]
        );
    }

    #[test]
    fn test_string_value_coercion() {
        let (_heap, table) = sample_table();
        let expr = Expression::new(vec![vec![Rule::new("passengers", FilterOp::Equal, "190")]]);
        assert_eq!(matching_rows(&table, &expr, NormalForm::Dnf), [2]);
    }

    #[test]
    fn test_compile_rejections() {
        let (_heap, table) = sample_table();
        let bad = [
            // Unknown column.
            Rule::new("altitude", FilterOp::Equal, 1),
            // Ordering on a string column.
            Rule::new("origin", FilterOp::GreaterThan, "AAA"),
            // Substring on a numeric column.
            Rule::new("passengers", FilterOp::Contains, "1"),
            // Membership without a list.
            Rule::new("passengers", FilterOp::In, 110),
            // List on a scalar rule.
            Rule::new("passengers", FilterOp::Equal, vec![1, 2]),
            // Non-integer value on an integer column.
            Rule::new("passengers", FilterOp::Equal, 1.5),
            Rule::new("passengers", FilterOp::Equal, "lots"),
            // Non-string value on a string column.
            Rule::new("origin", FilterOp::Equal, 7),
        ];
        for rule in bad {
            let expr = Expression::new(vec![vec![rule.clone()]]);
            let err = CompiledExpr::compile(&table, &expr, NormalForm::Dnf).unwrap_err();
            assert_eq!(err.kind(), "schema_mismatch", "rule {:?}", rule);
        }
    }

    #[test]
    fn test_column_major_evaluation() {
        let heap = Heap::new(64 * 1024).unwrap();
        let specs = vec![
            ColumnSpec::new("id", PrimType::U32),
            ColumnSpec::bstr("tag", 4),
        ];
        let table = Table::create_in(&heap, &specs, 8, TableLayout::ColumnMajor).unwrap();
        for i in 0..8u32 {
            let mut row = table.row(i).unwrap();
            row.set_named("id", &Value::Int(i as i64)).unwrap();
            row.set_named("tag", &Value::from(if i % 2 == 0 { "EVN" } else { "ODD" }))
                .unwrap();
        }
        let expr = Expression::new(vec![vec![
            Rule::new("tag", FilterOp::Equal, "EVN"),
            Rule::new("id", FilterOp::GreaterThan, 2),
        ]]);
        assert_eq!(matching_rows(&table, &expr, NormalForm::Dnf), [4, 6]);
    }
}
