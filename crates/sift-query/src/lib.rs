#![forbid(unsafe_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sift_types::Value;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnName(pub String);

impl From<&str> for ColumnName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ColumnName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Arithmetic(ArithmeticOp),
    Comparison(Comparator),
}

impl From<ArithmeticOp> for BinaryOp {
    fn from(op: ArithmeticOp) -> Self {
        Self::Arithmetic(op)
    }
}

impl From<Comparator> for BinaryOp {
    fn from(cmp: Comparator) -> Self {
        Self::Comparison(cmp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Max,
    Min,
    Avg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A per-row expression tree. Nodes are `Arc`-shared so the same subtree can
/// sit inside several filters or selects without being deep-cloned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operand {
    Column {
        name: ColumnName,
    },
    Value {
        value: Value,
    },
    Binary {
        left: Arc<Operand>,
        op: BinaryOp,
        right: Arc<Operand>,
    },
    List {
        items: Vec<Arc<Operand>>,
    },
}

impl Operand {
    #[must_use]
    pub fn column(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::Column {
            name: ColumnName(name.into()),
        })
    }

    #[must_use]
    pub fn value(value: impl Into<Value>) -> Arc<Self> {
        Arc::new(Self::Value {
            value: value.into(),
        })
    }

    #[must_use]
    pub fn binary(left: Arc<Self>, op: impl Into<BinaryOp>, right: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Binary {
            left,
            op: op.into(),
            right,
        })
    }

    #[must_use]
    pub fn list(items: Vec<Arc<Self>>) -> Arc<Self> {
        Arc::new(Self::List { items })
    }
}

/// A per-group expression tree. `Aggregate` folds one column of a group down
/// to a scalar; the other nodes mirror `Operand` at group granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupOperand {
    Aggregate {
        func: AggregateFn,
        column: ColumnName,
    },
    Value {
        value: Value,
    },
    Binary {
        left: Arc<GroupOperand>,
        op: BinaryOp,
        right: Arc<GroupOperand>,
    },
    List {
        items: Vec<Arc<GroupOperand>>,
    },
}

impl GroupOperand {
    #[must_use]
    pub fn aggregate(func: AggregateFn, column: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::Aggregate {
            func,
            column: ColumnName(column.into()),
        })
    }

    #[must_use]
    pub fn max(column: impl Into<String>) -> Arc<Self> {
        Self::aggregate(AggregateFn::Max, column)
    }

    #[must_use]
    pub fn min(column: impl Into<String>) -> Arc<Self> {
        Self::aggregate(AggregateFn::Min, column)
    }

    #[must_use]
    pub fn avg(column: impl Into<String>) -> Arc<Self> {
        Self::aggregate(AggregateFn::Avg, column)
    }

    #[must_use]
    pub fn value(value: impl Into<Value>) -> Arc<Self> {
        Arc::new(Self::Value {
            value: value.into(),
        })
    }

    #[must_use]
    pub fn binary(left: Arc<Self>, op: impl Into<BinaryOp>, right: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Binary {
            left,
            op: op.into(),
            right,
        })
    }

    #[must_use]
    pub fn list(items: Vec<Arc<Self>>) -> Arc<Self> {
        Arc::new(Self::List { items })
    }
}

/// A chain of row-level pipeline steps. `Empty` is the root; every other
/// variant holds the step that precedes it, so a chain applies oldest first.
/// Chains share their prefix: extending one with two different steps yields
/// two chains whose `prev` is the same allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowFilter {
    Empty,
    Where {
        prev: Arc<RowFilter>,
        left: Arc<Operand>,
        cmp: Comparator,
        right: Arc<Operand>,
    },
    Distinct {
        prev: Arc<RowFilter>,
    },
    OrderBy {
        prev: Arc<RowFilter>,
        key: Arc<Operand>,
        direction: SortDirection,
    },
    Limit {
        prev: Arc<RowFilter>,
        limit: i64,
        offset: i64,
    },
}

impl RowFilter {
    #[must_use]
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::Empty)
    }

    #[must_use]
    pub fn where_clause(
        self: Arc<Self>,
        left: Arc<Operand>,
        cmp: Comparator,
        right: Arc<Operand>,
    ) -> Arc<Self> {
        Arc::new(Self::Where {
            prev: self,
            left,
            cmp,
            right,
        })
    }

    #[must_use]
    pub fn distinct(self: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Distinct { prev: self })
    }

    #[must_use]
    pub fn order_by(self: Arc<Self>, key: Arc<Operand>) -> Arc<Self> {
        self.order_by_with(key, SortDirection::Ascending)
    }

    #[must_use]
    pub fn order_by_with(self: Arc<Self>, key: Arc<Operand>, direction: SortDirection) -> Arc<Self> {
        Arc::new(Self::OrderBy {
            prev: self,
            key,
            direction,
        })
    }

    #[must_use]
    pub fn limit(self: Arc<Self>, limit: i64) -> Arc<Self> {
        self.limit_offset(limit, 0)
    }

    #[must_use]
    pub fn limit_offset(self: Arc<Self>, limit: i64, offset: i64) -> Arc<Self> {
        Arc::new(Self::Limit {
            prev: self,
            limit,
            offset,
        })
    }
}

/// A chain of group-level pipeline steps, mirroring `RowFilter` but with
/// `GroupOperand` conditions. `Having` keeps or drops whole groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupFilter {
    Empty,
    Having {
        prev: Arc<GroupFilter>,
        left: Arc<GroupOperand>,
        cmp: Comparator,
        right: Arc<GroupOperand>,
    },
    OrderBy {
        prev: Arc<GroupFilter>,
        key: Arc<GroupOperand>,
        direction: SortDirection,
    },
    Limit {
        prev: Arc<GroupFilter>,
        limit: i64,
        offset: i64,
    },
}

impl GroupFilter {
    #[must_use]
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::Empty)
    }

    #[must_use]
    pub fn having(
        self: Arc<Self>,
        left: Arc<GroupOperand>,
        cmp: Comparator,
        right: Arc<GroupOperand>,
    ) -> Arc<Self> {
        Arc::new(Self::Having {
            prev: self,
            left,
            cmp,
            right,
        })
    }

    #[must_use]
    pub fn order_by(self: Arc<Self>, key: Arc<GroupOperand>) -> Arc<Self> {
        self.order_by_with(key, SortDirection::Ascending)
    }

    #[must_use]
    pub fn order_by_with(
        self: Arc<Self>,
        key: Arc<GroupOperand>,
        direction: SortDirection,
    ) -> Arc<Self> {
        Arc::new(Self::OrderBy {
            prev: self,
            key,
            direction,
        })
    }

    #[must_use]
    pub fn limit(self: Arc<Self>, limit: i64) -> Arc<Self> {
        self.limit_offset(limit, 0)
    }

    #[must_use]
    pub fn limit_offset(self: Arc<Self>, limit: i64, offset: i64) -> Arc<Self> {
        Arc::new(Self::Limit {
            prev: self,
            limit,
            offset,
        })
    }
}

/// A row-level query: project one column, optionally wrapped in any number of
/// `Filtered` layers that restrict and reorder the projected rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowSelect {
    Project {
        operand: Arc<Operand>,
    },
    Filtered {
        select: Arc<RowSelect>,
        filter: Arc<RowFilter>,
    },
}

impl RowSelect {
    #[must_use]
    pub fn project(operand: Arc<Operand>) -> Arc<Self> {
        Arc::new(Self::Project { operand })
    }

    #[must_use]
    pub fn filtered(select: Arc<RowSelect>, filter: Arc<RowFilter>) -> Arc<Self> {
        Arc::new(Self::Filtered { select, filter })
    }
}

/// A grouped query: partition rows by `group_by`, fold each group through an
/// aggregate operand. `Filtered` layers restrict input rows before grouping
/// and groups after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupSelect {
    Aggregate {
        operand: Arc<GroupOperand>,
        group_by: Arc<Operand>,
    },
    Filtered {
        select: Arc<GroupSelect>,
        row_filter: Arc<RowFilter>,
        group_filter: Arc<GroupFilter>,
    },
}

impl GroupSelect {
    #[must_use]
    pub fn aggregate(operand: Arc<GroupOperand>, group_by: Arc<Operand>) -> Arc<Self> {
        Arc::new(Self::Aggregate { operand, group_by })
    }

    #[must_use]
    pub fn filtered(
        select: Arc<GroupSelect>,
        row_filter: Arc<RowFilter>,
        group_filter: Arc<GroupFilter>,
    ) -> Arc<Self> {
        Arc::new(Self::Filtered {
            select,
            row_filter,
            group_filter,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sift_types::Value;

    use super::{
        AggregateFn, Comparator, GroupFilter, GroupOperand, GroupSelect, Operand, RowFilter,
        RowSelect, SortDirection,
    };

    #[test]
    fn filter_chain_keeps_oldest_step_at_the_root() {
        let chain = RowFilter::empty()
            .where_clause(Operand::column("age"), Comparator::Gt, Operand::value(18_i64))
            .distinct()
            .limit(5);

        let RowFilter::Limit { prev, limit, offset } = chain.as_ref() else {
            panic!("newest step should be the chain head");
        };
        assert_eq!((*limit, *offset), (5, 0));
        let RowFilter::Distinct { prev } = prev.as_ref() else {
            panic!("distinct should precede limit");
        };
        let RowFilter::Where { prev, cmp, .. } = prev.as_ref() else {
            panic!("where should precede distinct");
        };
        assert_eq!(*cmp, Comparator::Gt);
        assert!(matches!(prev.as_ref(), RowFilter::Empty));
    }

    #[test]
    fn extending_a_chain_shares_the_prefix() {
        let base = RowFilter::empty().where_clause(
            Operand::column("age"),
            Comparator::Ge,
            Operand::value(21_i64),
        );

        let with_distinct = Arc::clone(&base).distinct();
        let with_limit = Arc::clone(&base).limit(3);

        let RowFilter::Distinct { prev: left } = with_distinct.as_ref() else {
            panic!("distinct head");
        };
        let RowFilter::Limit { prev: right, .. } = with_limit.as_ref() else {
            panic!("limit head");
        };
        assert!(Arc::ptr_eq(left, &base));
        assert!(Arc::ptr_eq(right, &base));
    }

    #[test]
    fn order_by_defaults_to_ascending() {
        let chain = RowFilter::empty().order_by(Operand::column("name"));
        assert!(matches!(
            chain.as_ref(),
            RowFilter::OrderBy {
                direction: SortDirection::Ascending,
                ..
            }
        ));
    }

    #[test]
    fn aggregate_shorthands_expand_to_aggregate_nodes() {
        let avg = GroupOperand::avg("salary");
        let GroupOperand::Aggregate { func, column } = avg.as_ref() else {
            panic!("avg builds an aggregate node");
        };
        assert_eq!(*func, AggregateFn::Avg);
        assert_eq!(column.0, "salary");
    }

    #[test]
    fn select_tree_serde_round_trips_through_json() {
        let select = RowSelect::filtered(
            RowSelect::project(Operand::column("name")),
            RowFilter::empty()
                .where_clause(
                    Operand::column("age"),
                    Comparator::In,
                    Operand::list(vec![Operand::value(25_i64), Operand::value(30_i64)]),
                )
                .order_by_with(Operand::column("age"), SortDirection::Descending),
        );

        let encoded = serde_json::to_string(&select).expect("encode");
        let decoded: Arc<RowSelect> = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded.as_ref(), select.as_ref());
    }

    #[test]
    fn group_select_layers_nest_outward() {
        let inner = GroupSelect::aggregate(GroupOperand::max("price"), Operand::column("city"));
        let outer = GroupSelect::filtered(
            Arc::clone(&inner),
            RowFilter::empty(),
            GroupFilter::empty().having(
                GroupOperand::avg("price"),
                Comparator::Gt,
                GroupOperand::value(Value::Float(10.0)),
            ),
        );

        let GroupSelect::Filtered { select, .. } = outer.as_ref() else {
            panic!("outer layer should wrap the aggregate");
        };
        assert!(Arc::ptr_eq(select, &inner));
    }
}
