#![forbid(unsafe_code)]

//! In-process query evaluation over in-memory tables: build an expression
//! tree, hand it to an [`Evaluator`], get a result table back. No SQL parser,
//! no external database.
//!
//! ```
//! use siftql::{Column, Comparator, Evaluator, Operand, RowFilter, RowSelect, Table, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let table = Table::new(vec![
//!     Column::from_values("name", vec![Value::from("ana"), Value::from("bo")])?,
//!     Column::from_values("age", vec![Value::Int(31), Value::Int(28)])?,
//! ])?;
//!
//! let select = RowSelect::filtered(
//!     RowSelect::project(Operand::column("name")),
//!     RowFilter::empty().where_clause(
//!         Operand::column("age"),
//!         Comparator::Ge,
//!         Operand::value(30_i64),
//!     ),
//! );
//!
//! let result = Evaluator::new(table).execute_row_select(&select)?;
//! assert_eq!(result.row_count(), 1);
//! # Ok(())
//! # }
//! ```

pub use sift_eval::{EvalError, EvalOptions, EvalResult, Evaluator};
pub use sift_io::{LoadError, load_csv_path, load_csv_str, write_csv_string};
pub use sift_query::{
    AggregateFn, ArithmeticOp, BinaryOp, ColumnName, Comparator, GroupFilter, GroupOperand,
    GroupSelect, Operand, RowFilter, RowSelect, SortDirection,
};
pub use sift_table::{Column, RowId, Table, TableError};
pub use sift_types::{TypeError, Value, ValueKind};
