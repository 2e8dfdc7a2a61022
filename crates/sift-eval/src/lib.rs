#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use sift_query::{
    AggregateFn, ArithmeticOp, BinaryOp, Comparator, GroupFilter, GroupOperand, GroupSelect,
    Operand, RowFilter, RowSelect, SortDirection,
};
use sift_table::{Column, RowId, Table, TableError};
use sift_types::{TypeError, Value, ValueKind, partial_cmp_values};
use thiserror::Error;

#[cfg(feature = "tracing")]
macro_rules! trace_step {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_step {
    ($($arg:tt)*) => {};
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unknown column: {name:?}")]
    UnknownColumn { name: String },
    #[error("shape mismatch: left side has {left} values, right side has {right}")]
    ShapeMismatch { left: usize, right: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid {what}: must be non-negative, got {value}")]
    InvalidLimit { what: &'static str, value: i64 },
    #[error("unsupported operand: {context}")]
    UnsupportedOperand { context: &'static str },
    #[error("{func:?} aggregate needs a numeric column, {column:?} is {kind:?}")]
    NonNumericAggregate {
        func: AggregateFn,
        column: String,
        kind: ValueKind,
    },
    #[error("projection requires a column operand to name its result")]
    ProjectionRequiresColumn,
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// What an operand evaluates to: one value per row, a single value, or an
/// ordered list of results (the right-hand side of `IN`).
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    Column(Vec<Value>),
    Scalar(Value),
    List(Vec<EvalResult>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvalOptions {
    /// Degrade `IN` with a non-list right-hand side to plain equality instead
    /// of rejecting it. Off by default.
    pub scalar_in_equality: bool,
    /// Give rows with a missing grouping key their own partitions instead of
    /// dropping them. Off by default.
    pub keep_missing_group_keys: bool,
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    table: Table,
    options: EvalOptions,
}

impl Evaluator {
    #[must_use]
    pub fn new(table: Table) -> Self {
        Self::with_options(table, EvalOptions::default())
    }

    #[must_use]
    pub fn with_options(table: Table, options: EvalOptions) -> Self {
        Self { table, options }
    }

    #[must_use]
    pub fn table(&self) -> &Table {
        &self.table
    }

    #[must_use]
    pub fn options(&self) -> EvalOptions {
        self.options
    }

    pub fn evaluate_operand(&self, operand: &Operand) -> Result<EvalResult, EvalError> {
        self.eval_operand(operand, &self.table)
    }

    /// Evaluates a group operand across the whole table as one partition.
    pub fn evaluate_group_operand(&self, operand: &GroupOperand) -> Result<EvalResult, EvalError> {
        let all: Vec<usize> = (0..self.table.row_count()).collect();
        self.eval_group_operand(operand, &self.table, &all)
    }

    /// Runs a filter chain against the evaluator's table, oldest step first.
    pub fn apply_row_filter(&self, filter: &RowFilter) -> Result<Table, EvalError> {
        self.run_row_filter(filter, &self.table)
    }

    /// Executes a row-level select. The projection always reads the original
    /// table; `Filtered` layers intersect it with the rows their filter chain
    /// kept, in the chain's output order.
    pub fn execute_row_select(&self, select: &RowSelect) -> Result<Table, EvalError> {
        match select {
            RowSelect::Project { operand } => self.project_column(operand),
            RowSelect::Filtered { select, filter } => {
                let projected = self.execute_row_select(select)?;
                let filtered = self.run_row_filter(filter, &self.table)?;
                let by_id: HashMap<RowId, usize> = projected
                    .row_ids()
                    .iter()
                    .enumerate()
                    .map(|(pos, id)| (*id, pos))
                    .collect();
                let keep: Vec<usize> = filtered
                    .row_ids()
                    .iter()
                    .filter_map(|id| by_id.get(id).copied())
                    .collect();
                let out = projected.take_positions(&keep);
                trace_step!(
                    rows_in = projected.row_count(),
                    rows_out = out.row_count(),
                    "filter narrowed the projection"
                );
                Ok(out)
            }
        }
    }

    /// Executes a grouped select: row filters restrict the input (innermost
    /// layer first), rows partition by the group key, `Having` drops whole
    /// partitions, group ordering and limiting shape the surviving partition
    /// sequence, and the aggregate materializes one row per partition.
    pub fn execute_group_select(&self, select: &GroupSelect) -> Result<Table, EvalError> {
        let mut row_filters: Vec<&RowFilter> = Vec::new();
        let mut group_filters: Vec<&GroupFilter> = Vec::new();
        let mut node = select;
        loop {
            match node {
                GroupSelect::Filtered {
                    select,
                    row_filter,
                    group_filter,
                } => {
                    row_filters.push(row_filter.as_ref());
                    group_filters.push(group_filter.as_ref());
                    node = select.as_ref();
                }
                GroupSelect::Aggregate { operand, group_by } => {
                    return self.run_grouped(
                        operand.as_ref(),
                        group_by.as_ref(),
                        &row_filters,
                        &group_filters,
                    );
                }
            }
        }
    }

    fn project_column(&self, operand: &Operand) -> Result<Table, EvalError> {
        let Operand::Column { name } = operand else {
            return Err(EvalError::ProjectionRequiresColumn);
        };
        let column = self
            .table
            .column(&name.0)
            .ok_or_else(|| EvalError::UnknownColumn {
                name: name.0.clone(),
            })?;
        Table::with_row_ids(vec![column.clone()], self.table.row_ids().to_vec())
            .map_err(EvalError::from)
    }

    fn eval_operand(&self, operand: &Operand, table: &Table) -> Result<EvalResult, EvalError> {
        match operand {
            Operand::Column { name } => {
                let column = table.column(&name.0).ok_or_else(|| EvalError::UnknownColumn {
                    name: name.0.clone(),
                })?;
                Ok(EvalResult::Column(column.values().to_vec()))
            }
            Operand::Value { value } => Ok(EvalResult::Scalar(value.clone())),
            Operand::Binary { left, op, right } => {
                let lhs = self.eval_operand(left, table)?;
                let rhs = self.eval_operand(right, table)?;
                self.apply_binary(&lhs, *op, &rhs)
            }
            Operand::List { items } => {
                let results = items
                    .iter()
                    .map(|item| self.eval_operand(item, table))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(EvalResult::List(results))
            }
        }
    }

    fn eval_group_operand(
        &self,
        operand: &GroupOperand,
        table: &Table,
        positions: &[usize],
    ) -> Result<EvalResult, EvalError> {
        match operand {
            GroupOperand::Aggregate { func, column } => {
                let source = table.column(&column.0).ok_or_else(|| EvalError::UnknownColumn {
                    name: column.0.clone(),
                })?;
                Ok(EvalResult::Scalar(aggregate_column(
                    *func, source, positions,
                )?))
            }
            GroupOperand::Value { value } => Ok(EvalResult::Scalar(value.clone())),
            GroupOperand::Binary { left, op, right } => {
                let lhs = self.eval_group_operand(left, table, positions)?;
                let rhs = self.eval_group_operand(right, table, positions)?;
                self.apply_binary(&lhs, *op, &rhs)
            }
            GroupOperand::List { items } => {
                let results = items
                    .iter()
                    .map(|item| self.eval_group_operand(item, table, positions))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(EvalResult::List(results))
            }
        }
    }

    fn apply_binary(
        &self,
        left: &EvalResult,
        op: BinaryOp,
        right: &EvalResult,
    ) -> Result<EvalResult, EvalError> {
        match op {
            BinaryOp::Arithmetic(op) => apply_arithmetic(left, op, right),
            BinaryOp::Comparison(cmp) => self.apply_comparison(left, cmp, right),
        }
    }

    fn apply_comparison(
        &self,
        left: &EvalResult,
        cmp: Comparator,
        right: &EvalResult,
    ) -> Result<EvalResult, EvalError> {
        if matches!(cmp, Comparator::In) {
            return self.apply_membership(left, right);
        }

        match (left, right) {
            (EvalResult::List(_), _) | (_, EvalResult::List(_)) => {
                Err(EvalError::UnsupportedOperand {
                    context: "list operands only appear on the right of an IN comparison",
                })
            }
            (EvalResult::Scalar(a), EvalResult::Scalar(b)) => {
                Ok(EvalResult::Scalar(Value::Bool(compare_values(a, cmp, b)?)))
            }
            (EvalResult::Column(values), EvalResult::Scalar(b)) => {
                let out = values
                    .iter()
                    .map(|a| compare_values(a, cmp, b).map(Value::Bool))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(EvalResult::Column(out))
            }
            (EvalResult::Scalar(a), EvalResult::Column(values)) => {
                let out = values
                    .iter()
                    .map(|b| compare_values(a, cmp, b).map(Value::Bool))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(EvalResult::Column(out))
            }
            (EvalResult::Column(a), EvalResult::Column(b)) => {
                if a.len() != b.len() {
                    return Err(EvalError::ShapeMismatch {
                        left: a.len(),
                        right: b.len(),
                    });
                }
                let out = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| compare_values(x, cmp, y).map(Value::Bool))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(EvalResult::Column(out))
            }
        }
    }

    fn apply_membership(
        &self,
        left: &EvalResult,
        right: &EvalResult,
    ) -> Result<EvalResult, EvalError> {
        let EvalResult::List(items) = right else {
            if self.options.scalar_in_equality {
                // Compatibility mode: a bare right-hand side degrades IN to
                // plain equality.
                return self.apply_comparison(left, Comparator::Eq, right);
            }
            return Err(EvalError::UnsupportedOperand {
                context: "IN requires a list on the right-hand side",
            });
        };

        let mut candidates = Vec::new();
        flatten_candidates(items, &mut candidates);

        match left {
            EvalResult::Scalar(value) => Ok(EvalResult::Scalar(Value::Bool(is_member(
                value,
                &candidates,
            )))),
            EvalResult::Column(values) => Ok(EvalResult::Column(
                values
                    .iter()
                    .map(|value| Value::Bool(is_member(value, &candidates)))
                    .collect(),
            )),
            EvalResult::List(_) => Err(EvalError::UnsupportedOperand {
                context: "list operands only appear on the right of an IN comparison",
            }),
        }
    }

    fn run_row_filter(&self, filter: &RowFilter, table: &Table) -> Result<Table, EvalError> {
        match filter {
            RowFilter::Empty => Ok(table.clone()),
            RowFilter::Where {
                prev,
                left,
                cmp,
                right,
            } => {
                let current = self.run_row_filter(prev, table)?;
                let lhs = self.eval_operand(left, &current)?;
                let rhs = self.eval_operand(right, &current)?;
                let mask = self.apply_comparison(&lhs, *cmp, &rhs)?;
                let keep: Vec<usize> = match &mask {
                    EvalResult::Scalar(value) => {
                        if matches!(value, Value::Bool(true)) {
                            (0..current.row_count()).collect()
                        } else {
                            Vec::new()
                        }
                    }
                    EvalResult::Column(values) => values
                        .iter()
                        .enumerate()
                        .filter_map(|(pos, value)| {
                            matches!(value, Value::Bool(true)).then_some(pos)
                        })
                        .collect(),
                    EvalResult::List(_) => {
                        return Err(EvalError::UnsupportedOperand {
                            context: "where condition must produce a boolean mask",
                        });
                    }
                };
                let out = current.take_positions(&keep);
                trace_step!(
                    rows_in = current.row_count(),
                    rows_out = out.row_count(),
                    "where kept matching rows"
                );
                Ok(out)
            }
            RowFilter::Distinct { prev } => {
                let current = self.run_row_filter(prev, table)?;
                let mut seen = HashSet::new();
                let mut keep = Vec::new();
                for pos in 0..current.row_count() {
                    let key: Vec<RowKey<'_>> = current
                        .columns()
                        .iter()
                        .map(|column| RowKey::from_value(&column.values()[pos]))
                        .collect();
                    if seen.insert(key) {
                        keep.push(pos);
                    }
                }
                let out = current.take_positions(&keep);
                trace_step!(
                    rows_in = current.row_count(),
                    rows_out = out.row_count(),
                    "distinct dropped duplicate rows"
                );
                Ok(out)
            }
            RowFilter::OrderBy {
                prev,
                key,
                direction,
            } => {
                let current = self.run_row_filter(prev, table)?;
                let Operand::Column { name } = key.as_ref() else {
                    return Err(EvalError::UnsupportedOperand {
                        context: "order key must be a plain column",
                    });
                };
                let column = current
                    .column(&name.0)
                    .ok_or_else(|| EvalError::UnknownColumn {
                        name: name.0.clone(),
                    })?;
                let mut positions: Vec<usize> = (0..current.row_count()).collect();
                positions.sort_by(|&a, &b| {
                    order_values(&column.values()[a], &column.values()[b], *direction)
                });
                Ok(current.take_positions(&positions))
            }
            RowFilter::Limit {
                prev,
                limit,
                offset,
            } => {
                let current = self.run_row_filter(prev, table)?;
                let (limit, offset) = validate_limit(*limit, *offset)?;
                let start = offset.min(current.row_count());
                let end = start.saturating_add(limit).min(current.row_count());
                let keep: Vec<usize> = (start..end).collect();
                let out = current.take_positions(&keep);
                trace_step!(
                    rows_in = current.row_count(),
                    rows_out = out.row_count(),
                    "limit truncated rows"
                );
                Ok(out)
            }
        }
    }

    fn run_grouped(
        &self,
        operand: &GroupOperand,
        group_by: &Operand,
        row_filters: &[&RowFilter],
        group_filters: &[&GroupFilter],
    ) -> Result<Table, EvalError> {
        let mut current = self.table.clone();
        // The innermost layer's row filter runs first.
        for &filter in row_filters.iter().rev() {
            current = self.run_row_filter(filter, &current)?;
        }

        let GroupOperand::Aggregate { func, column } = operand else {
            return Err(EvalError::UnsupportedOperand {
                context: "grouped select materializes a single aggregate operand",
            });
        };

        let key_columns = group_key_columns(group_by, &current)?;
        let key_names: Vec<String> = key_columns
            .iter()
            .map(|column| column.name().to_owned())
            .collect();
        let mut partitions = partition_rows(&key_columns, current.row_count(), self.options);
        trace_step!(
            rows = current.row_count(),
            groups = partitions.len(),
            "partitioned rows by group key"
        );
        // Default output order is ascending by key; later shaping steps may
        // reorder or truncate.
        partitions.sort_by(|a, b| compare_keys(&a.key, &b.key));

        for &filter in group_filters.iter().rev() {
            partitions = self.run_group_filter_partitions(filter, &current, partitions)?;
        }

        let mut shape_steps = Vec::new();
        for &filter in group_filters.iter().rev() {
            collect_group_shape_steps(filter, &mut shape_steps);
        }
        partitions = self.apply_group_shape(&shape_steps, &current, partitions)?;

        let value_column = current
            .column(&column.0)
            .ok_or_else(|| EvalError::UnknownColumn {
                name: column.0.clone(),
            })?;
        let mut aggregates = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            aggregates.push(aggregate_column(*func, value_column, &partition.positions)?);
        }

        let mut columns = Vec::with_capacity(key_names.len() + 1);
        for (idx, name) in key_names.iter().enumerate() {
            let values = partitions
                .iter()
                .map(|partition| partition.key[idx].clone())
                .collect();
            columns.push(Column::from_values(name.clone(), values)?);
        }
        columns.push(Column::from_values(column.0.clone(), aggregates)?);

        Table::new(columns).map_err(EvalError::from)
    }

    fn run_group_filter_partitions(
        &self,
        filter: &GroupFilter,
        table: &Table,
        partitions: Vec<GroupPartition>,
    ) -> Result<Vec<GroupPartition>, EvalError> {
        match filter {
            GroupFilter::Empty => Ok(partitions),
            GroupFilter::Having {
                prev,
                left,
                cmp,
                right,
            } => {
                let current = self.run_group_filter_partitions(prev, table, partitions)?;
                let mut kept = Vec::with_capacity(current.len());
                for partition in current {
                    let lhs = self.eval_group_operand(left, table, &partition.positions)?;
                    let rhs = self.eval_group_operand(right, table, &partition.positions)?;
                    if self.group_condition_holds(&lhs, *cmp, &rhs)? {
                        kept.push(partition);
                    }
                }
                trace_step!(groups_out = kept.len(), "having kept matching groups");
                Ok(kept)
            }
            // Ordering and limiting run over the surviving partition sequence
            // once every having in the chain has been applied.
            GroupFilter::OrderBy { prev, .. } | GroupFilter::Limit { prev, .. } => {
                self.run_group_filter_partitions(prev, table, partitions)
            }
        }
    }

    fn apply_group_shape(
        &self,
        steps: &[GroupShapeStep<'_>],
        table: &Table,
        partitions: Vec<GroupPartition>,
    ) -> Result<Vec<GroupPartition>, EvalError> {
        let mut current = partitions;
        for step in steps {
            match step {
                GroupShapeStep::OrderBy { key, direction } => {
                    let mut keyed = Vec::with_capacity(current.len());
                    for partition in current {
                        let value = match self.eval_group_operand(key, table, &partition.positions)?
                        {
                            EvalResult::Scalar(value) => value,
                            EvalResult::Column(_) | EvalResult::List(_) => {
                                return Err(EvalError::UnsupportedOperand {
                                    context: "group order key must reduce to a single value",
                                });
                            }
                        };
                        keyed.push((value, partition));
                    }
                    keyed.sort_by(|(a, _), (b, _)| order_values(a, b, *direction));
                    current = keyed.into_iter().map(|(_, partition)| partition).collect();
                }
                GroupShapeStep::Limit { limit, offset } => {
                    let (limit, offset) = validate_limit(*limit, *offset)?;
                    current = current.into_iter().skip(offset).take(limit).collect();
                }
            }
        }
        Ok(current)
    }

    fn group_condition_holds(
        &self,
        left: &EvalResult,
        cmp: Comparator,
        right: &EvalResult,
    ) -> Result<bool, EvalError> {
        match self.apply_comparison(left, cmp, right)? {
            EvalResult::Scalar(value) => Ok(matches!(value, Value::Bool(true))),
            EvalResult::Column(_) | EvalResult::List(_) => Err(EvalError::UnsupportedOperand {
                context: "having condition must reduce to a single boolean",
            }),
        }
    }
}

fn apply_arithmetic(
    left: &EvalResult,
    op: ArithmeticOp,
    right: &EvalResult,
) -> Result<EvalResult, EvalError> {
    match (left, right) {
        (EvalResult::List(_), _) | (_, EvalResult::List(_)) => Err(EvalError::UnsupportedOperand {
            context: "list operands do not support arithmetic",
        }),
        (EvalResult::Scalar(a), EvalResult::Scalar(b)) => {
            Ok(EvalResult::Scalar(numeric_binary(a, op, b)?))
        }
        (EvalResult::Column(values), EvalResult::Scalar(b)) => {
            let out = values
                .iter()
                .map(|a| numeric_binary(a, op, b))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(EvalResult::Column(out))
        }
        (EvalResult::Scalar(a), EvalResult::Column(values)) => {
            let out = values
                .iter()
                .map(|b| numeric_binary(a, op, b))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(EvalResult::Column(out))
        }
        (EvalResult::Column(a), EvalResult::Column(b)) => {
            if a.len() != b.len() {
                return Err(EvalError::ShapeMismatch {
                    left: a.len(),
                    right: b.len(),
                });
            }
            let out = a
                .iter()
                .zip(b)
                .map(|(x, y)| numeric_binary(x, op, y))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(EvalResult::Column(out))
        }
    }
}

/// Numeric combination of two values, computed through `f64`. Integer inputs
/// stay integer except under division, which always widens. Missing inputs
/// yield a missing output.
fn numeric_binary(left: &Value, op: ArithmeticOp, right: &Value) -> Result<Value, EvalError> {
    if left.is_missing() || right.is_missing() {
        return Ok(Value::Null);
    }

    let lhs = left.to_f64()?;
    let rhs = right.to_f64()?;
    if matches!(op, ArithmeticOp::Div) && rhs == 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    let result = match op {
        ArithmeticOp::Add => lhs + rhs,
        ArithmeticOp::Sub => lhs - rhs,
        ArithmeticOp::Mul => lhs * rhs,
        ArithmeticOp::Div => lhs / rhs,
    };

    let integral = matches!((left, right), (Value::Int(_), Value::Int(_)))
        && !matches!(op, ArithmeticOp::Div);
    if integral
        && result.is_finite()
        && result == result.trunc()
        && result >= i64::MIN as f64
        && result <= i64::MAX as f64
    {
        Ok(Value::Int(result as i64))
    } else {
        Ok(Value::Float(result))
    }
}

fn compare_values(left: &Value, cmp: Comparator, right: &Value) -> Result<bool, EvalError> {
    Ok(comparison_holds(partial_cmp_values(left, right)?, cmp))
}

fn comparison_holds(ordering: Option<Ordering>, cmp: Comparator) -> bool {
    match ordering {
        // Missing on either side: only Ne holds, matching how NaN compares.
        None => matches!(cmp, Comparator::Ne),
        Some(ordering) => match cmp {
            Comparator::Eq => ordering == Ordering::Equal,
            Comparator::Ne => ordering != Ordering::Equal,
            Comparator::Gt => ordering == Ordering::Greater,
            Comparator::Lt => ordering == Ordering::Less,
            Comparator::Ge => ordering != Ordering::Less,
            Comparator::Le => ordering != Ordering::Greater,
            // Membership routes through apply_membership before ordering
            // comparisons; a bare In never reaches here.
            Comparator::In => false,
        },
    }
}

fn flatten_candidates(items: &[EvalResult], out: &mut Vec<Value>) {
    for item in items {
        match item {
            EvalResult::Scalar(value) => out.push(value.clone()),
            EvalResult::Column(values) => out.extend(values.iter().cloned()),
            EvalResult::List(nested) => flatten_candidates(nested, out),
        }
    }
}

/// Membership test for `IN`. Missing values are never members, and candidates
/// of an unrelated kind simply fail to match rather than erroring.
fn is_member(value: &Value, candidates: &[Value]) -> bool {
    if value.is_missing() {
        return false;
    }
    candidates
        .iter()
        .any(|candidate| matches!(partial_cmp_values(value, candidate), Ok(Some(Ordering::Equal))))
}

/// Total ordering for sort keys: missing values sort last in either
/// direction, present values order per `partial_cmp_values`.
fn order_values(left: &Value, right: &Value, direction: SortDirection) -> Ordering {
    match (left.is_missing(), right.is_missing()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ordering = match partial_cmp_values(left, right) {
                Ok(Some(ordering)) => ordering,
                // Columns are kind-uniform, so present values always compare;
                // order by kind tag to stay total if they ever do not.
                Ok(None) | Err(_) => left.kind().cmp(&right.kind()),
            };
            match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        }
    }
}

fn compare_keys(left: &[Value], right: &[Value]) -> Ordering {
    for (a, b) in left.iter().zip(right) {
        let ordering = order_values(a, b, SortDirection::Ascending);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn validate_limit(limit: i64, offset: i64) -> Result<(usize, usize), EvalError> {
    if limit < 0 {
        return Err(EvalError::InvalidLimit {
            what: "limit",
            value: limit,
        });
    }
    if offset < 0 {
        return Err(EvalError::InvalidLimit {
            what: "offset",
            value: offset,
        });
    }
    Ok((limit as usize, offset as usize))
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum RowKey<'a> {
    Null,
    Bool(bool),
    Int(i64),
    FloatBits(u64),
    Text(&'a str),
}

impl<'a> RowKey<'a> {
    fn from_value(value: &'a Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(v) => Self::Bool(*v),
            Value::Int(v) => Self::Int(*v),
            // Collapse every NaN bit pattern so NaN rows hash together.
            Value::Float(v) => Self::FloatBits(if v.is_nan() {
                f64::NAN.to_bits()
            } else {
                v.to_bits()
            }),
            Value::Text(v) => Self::Text(v.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct GroupPartition {
    key: Vec<Value>,
    positions: Vec<usize>,
}

enum GroupShapeStep<'a> {
    OrderBy {
        key: &'a GroupOperand,
        direction: SortDirection,
    },
    Limit {
        limit: i64,
        offset: i64,
    },
}

fn collect_group_shape_steps<'a>(filter: &'a GroupFilter, out: &mut Vec<GroupShapeStep<'a>>) {
    match filter {
        GroupFilter::Empty => {}
        GroupFilter::Having { prev, .. } => collect_group_shape_steps(prev, out),
        GroupFilter::OrderBy {
            prev,
            key,
            direction,
        } => {
            collect_group_shape_steps(prev, out);
            out.push(GroupShapeStep::OrderBy {
                key: key.as_ref(),
                direction: *direction,
            });
        }
        GroupFilter::Limit {
            prev,
            limit,
            offset,
        } => {
            collect_group_shape_steps(prev, out);
            out.push(GroupShapeStep::Limit {
                limit: *limit,
                offset: *offset,
            });
        }
    }
}

fn group_key_columns<'a>(group_by: &Operand, table: &'a Table) -> Result<Vec<&'a Column>, EvalError> {
    let names: Vec<&str> = match group_by {
        Operand::Column { name } => vec![name.0.as_str()],
        Operand::List { items } => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                let Operand::Column { name } = item.as_ref() else {
                    return Err(EvalError::UnsupportedOperand {
                        context: "group key lists hold plain columns",
                    });
                };
                names.push(name.0.as_str());
            }
            names
        }
        Operand::Value { .. } | Operand::Binary { .. } => {
            return Err(EvalError::UnsupportedOperand {
                context: "group key must be a column or a list of columns",
            });
        }
    };

    names
        .into_iter()
        .map(|name| {
            table.column(name).ok_or_else(|| EvalError::UnknownColumn {
                name: name.to_owned(),
            })
        })
        .collect()
}

fn partition_rows(
    key_columns: &[&Column],
    row_count: usize,
    options: EvalOptions,
) -> Vec<GroupPartition> {
    let mut slots: HashMap<Vec<RowKey<'_>>, usize> = HashMap::new();
    let mut partitions: Vec<GroupPartition> = Vec::new();

    for pos in 0..row_count {
        if !options.keep_missing_group_keys
            && key_columns
                .iter()
                .any(|column| column.values()[pos].is_missing())
        {
            continue;
        }

        let key: Vec<RowKey<'_>> = key_columns
            .iter()
            .map(|column| RowKey::from_value(&column.values()[pos]))
            .collect();
        if let Some(&slot) = slots.get(&key) {
            partitions[slot].positions.push(pos);
        } else {
            slots.insert(key, partitions.len());
            partitions.push(GroupPartition {
                key: key_columns
                    .iter()
                    .map(|column| column.values()[pos].clone())
                    .collect(),
                positions: vec![pos],
            });
        }
    }

    partitions
}

/// Folds the positions of one partition down to a single value. `Max`/`Min`
/// work on any kind that orders; `Avg` needs a numeric column. Missing values
/// are skipped, and an all-missing partition aggregates to null.
fn aggregate_column(
    func: AggregateFn,
    column: &Column,
    positions: &[usize],
) -> Result<Value, EvalError> {
    match func {
        AggregateFn::Max | AggregateFn::Min => {
            let mut best: Option<&Value> = None;
            for &pos in positions {
                let value = &column.values()[pos];
                if value.is_missing() {
                    continue;
                }
                best = match best {
                    None => Some(value),
                    Some(current) => {
                        let replace = match partial_cmp_values(value, current)? {
                            Some(Ordering::Greater) => matches!(func, AggregateFn::Max),
                            Some(Ordering::Less) => matches!(func, AggregateFn::Min),
                            _ => false,
                        };
                        Some(if replace { value } else { current })
                    }
                };
            }
            Ok(best.cloned().unwrap_or(Value::Null))
        }
        AggregateFn::Avg => {
            if !matches!(
                column.kind(),
                ValueKind::Null | ValueKind::Int | ValueKind::Float
            ) {
                return Err(EvalError::NonNumericAggregate {
                    func,
                    column: column.name().to_owned(),
                    kind: column.kind(),
                });
            }
            let mut sum = 0.0;
            let mut count = 0_usize;
            for &pos in positions {
                let value = &column.values()[pos];
                if value.is_missing() {
                    continue;
                }
                sum += value.to_f64()?;
                count += 1;
            }
            if count == 0 {
                Ok(Value::Null)
            } else {
                Ok(Value::Float(sum / count as f64))
            }
        }
    }
}
