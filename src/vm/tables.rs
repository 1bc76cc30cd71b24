// JBasic Table Engine
// JOIN and WHERE execution behind a replaceable trait

use crate::error::{VmError, VmResult};
use crate::vm::value::{Table, Value};

/// Relational operations used by the JOIN and WHERE opcodes
pub trait TableEngine: Send + Sync {
    /// Inner join on equal values of `column`
    fn join(&self, left: &Table, right: &Table, column: &str) -> VmResult<Table>;

    /// Rows whose `column` equals `value`
    fn filter(&self, table: &Table, column: &str, value: &Value) -> VmResult<Table>;
}

fn column_of(table: &Table, column: &str) -> VmResult<usize> {
    table
        .column_index(column)
        .ok_or_else(|| VmError::no_member(&column.to_uppercase()))
}

/// Straightforward nested-loop implementation
#[derive(Debug, Default)]
pub struct NestedLoopEngine;

impl TableEngine for NestedLoopEngine {
    fn join(&self, left: &Table, right: &Table, column: &str) -> VmResult<Table> {
        let left_key = column_of(left, column)?;
        let right_key = column_of(right, column)?;

        // right-hand columns already present on the left are dropped
        let extra: Vec<usize> = (0..right.columns().len())
            .filter(|&i| !left.columns().contains(&right.columns()[i]))
            .collect();
        let names = left
            .columns()
            .iter()
            .chain(extra.iter().map(|&i| &right.columns()[i]));
        let mut joined = Table::new(names);

        for left_row in left.rows() {
            for right_row in right.rows() {
                if left_row[left_key].equals(&right_row[right_key])? {
                    let mut row = left_row.clone();
                    row.extend(extra.iter().map(|&i| right_row[i].clone()));
                    joined.push_row(row)?;
                }
            }
        }
        Ok(joined)
    }

    fn filter(&self, table: &Table, column: &str, value: &Value) -> VmResult<Table> {
        let key = column_of(table, column)?;
        let mut filtered = Table::new(table.columns());
        for row in table.rows() {
            if row[key].equals(value)? {
                filtered.push_row(row.clone())?;
            }
        }
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn people() -> Table {
        let mut table = Table::new(["id", "name"]);
        table.push_row(vec![Value::from(1), Value::from("ada")]).unwrap();
        table.push_row(vec![Value::from(2), Value::from("bob")]).unwrap();
        table
    }

    #[test]
    fn test_join_on_shared_column() {
        let mut orders = Table::new(["id", "item"]);
        orders.push_row(vec![Value::from(2), Value::from("tea")]).unwrap();
        orders.push_row(vec![Value::from(2), Value::from("jam")]).unwrap();
        orders.push_row(vec![Value::from(3), Value::from("pie")]).unwrap();

        let joined = NestedLoopEngine.join(&people(), &orders, "ID").unwrap();
        assert_eq!(joined.columns().len(), 3);
        assert_eq!(joined.row_count(), 2);
        assert_eq!(joined.row(1).unwrap().get("ITEM"), Some(&Value::from("jam")));
        assert_eq!(joined.row(0).unwrap().get("NAME"), Some(&Value::from("bob")));
    }

    #[test]
    fn test_filter() {
        let filtered = NestedLoopEngine
            .filter(&people(), "name", &Value::from("ada"))
            .unwrap();
        assert_eq!(filtered.row_count(), 1);
        let err = NestedLoopEngine
            .filter(&people(), "age", &Value::from(1))
            .unwrap_err();
        assert!(err.is(ErrorKind::NoMember));
    }
}
