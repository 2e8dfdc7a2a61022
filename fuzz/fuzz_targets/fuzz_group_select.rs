#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use siftql::{Column, Evaluator, GroupSelect, Table, Value};

fn fixture() -> Table {
    Table::new(vec![
        Column::from_values("k", vec![Value::Int(1), Value::Int(2), Value::Int(1)]).expect("k"),
        Column::from_values(
            "v",
            vec![Value::Float(0.5), Value::Null, Value::Float(2.5)],
        )
        .expect("v"),
    ])
    .expect("table")
}

fuzz_target!(|data: &[u8]| {
    let Ok(select) = serde_json::from_slice::<Arc<GroupSelect>>(data) else {
        return;
    };
    let _ = Evaluator::new(fixture()).execute_group_select(&select);
});
