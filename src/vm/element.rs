// JBasic Element Access
// 1-based array indexing, case-insensitive record members

use std::sync::Arc;

use crate::error::{VmError, VmResult};
use crate::vm::value::{require_member, Record, Value};

/// How an element write treats a missing position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Out-of-range positions fail with ArrayBounds, missing members with NoMember
    Plain,
    /// Arrays auto-extend with blank fill, records gain the member
    Create,
}

fn array_position(index: &Value, len: usize) -> VmResult<Option<usize>> {
    let n = index.to_i64()?;
    if n < 1 {
        return Err(VmError::array_bounds(n));
    }
    let position = (n - 1) as usize;
    Ok((position < len).then_some(position))
}

fn member_name(index: &Value) -> VmResult<String> {
    match index {
        Value::String(name) => Ok(name.to_string()),
        other => Err(VmError::type_mismatch(format!(
            "member name must be STRING, got {}",
            other.type_name()
        ))),
    }
}

impl Value {
    /// Plain element read
    pub fn get_element(&self, index: &Value) -> VmResult<Value> {
        match self {
            Value::Array(items) => match array_position(index, items.len())? {
                Some(position) => Ok(items[position].clone()),
                None => Err(VmError::array_bounds(index.to_i64()?)),
            },
            Value::Record(record) => {
                let name = member_name(index)?;
                require_member(record, &name).cloned()
            }
            Value::String(text) => {
                let n = index.to_i64()?;
                if n < 1 {
                    return Err(VmError::array_bounds(n));
                }
                text.chars()
                    .nth((n - 1) as usize)
                    .map(|c| Value::from(c.to_string()))
                    .ok_or_else(|| VmError::array_bounds(n))
            }
            Value::Table(table) => {
                let n = index.to_i64()?;
                if n < 1 {
                    return Err(VmError::array_bounds(n));
                }
                table
                    .row((n - 1) as usize)
                    .map(Value::record)
                    .ok_or_else(|| VmError::array_bounds(n))
            }
            other => Err(VmError::type_mismatch(format!(
                "{} is not indexable",
                other.type_name()
            ))),
        }
    }

    /// Element write. The container is copied first if it is shared.
    pub fn set_element(&mut self, index: &Value, value: Value, mode: IndexMode) -> VmResult<()> {
        match self {
            Value::Array(items) => {
                let len = items.len();
                match array_position(index, len)? {
                    Some(position) => Arc::make_mut(items)[position] = value,
                    None if mode == IndexMode::Create => {
                        let n = index.to_i64()?;
                        let target = usize::try_from(n).map_err(|_| VmError::array_bounds(n))?;
                        let fill = Value::default_of(value.kind());
                        let items = Arc::make_mut(items);
                        items
                            .try_reserve(target - len)
                            .map_err(|_| VmError::array_bounds(n))?;
                        items.resize(target - 1, fill);
                        items.push(value);
                    }
                    None => return Err(VmError::array_bounds(index.to_i64()?)),
                }
                Ok(())
            }
            Value::Record(record) => {
                let name = member_name(index)?;
                if mode == IndexMode::Plain && !record.contains(&name) {
                    return Err(VmError::no_member(&name.to_uppercase()));
                }
                Arc::make_mut(record).set(&name, value);
                Ok(())
            }
            other => Err(VmError::type_mismatch(format!(
                "cannot assign an element of {}",
                other.type_name()
            ))),
        }
    }

    /// Plain member read (`rec.FIELD`)
    pub fn get_member(&self, name: &str) -> VmResult<Value> {
        match self {
            Value::Record(record) => require_member(record, name).cloned(),
            Value::Table(table) => {
                let column = table
                    .column_index(name)
                    .ok_or_else(|| VmError::no_member(&name.to_uppercase()))?;
                Ok(Value::array(
                    table.rows().iter().map(|row| row[column].clone()).collect(),
                ))
            }
            other => Err(VmError::type_mismatch(format!(
                "{} has no members",
                other.type_name()
            ))),
        }
    }

    /// A fresh container suitable for a "create" write into an undefined variable
    pub fn container_for(index: &Value) -> Value {
        match index {
            Value::String(_) => Value::record(Record::new()),
            _ => Value::array(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::vm::value::Table;

    #[test]
    fn test_create_write_extends_with_blank_fill() {
        let mut array = Value::array(vec![Value::from(1), Value::from(2)]);
        array
            .set_element(&Value::from(5), Value::from(9), IndexMode::Create)
            .unwrap();
        assert_eq!(
            array,
            Value::array(vec![
                Value::from(1),
                Value::from(2),
                Value::from(0),
                Value::from(0),
                Value::from(9)
            ])
        );

        let mut names = Value::array(Vec::new());
        names
            .set_element(&Value::from(2), Value::from("b"), IndexMode::Create)
            .unwrap();
        assert_eq!(names, Value::array(vec![Value::from(""), Value::from("b")]));
    }

    #[test]
    fn test_plain_write_out_of_range_fails() {
        let mut array = Value::array(vec![Value::from(1)]);
        let err = array
            .set_element(&Value::from(3), Value::from(9), IndexMode::Plain)
            .unwrap_err();
        assert!(err.is(ErrorKind::ArrayBounds));
        assert_eq!(array.length().unwrap(), 1);
    }

    #[test]
    fn test_write_does_not_touch_shared_copy() {
        let original = Value::array(vec![Value::from(1)]);
        let mut alias = original.clone();
        alias
            .set_element(&Value::from(1), Value::from(2), IndexMode::Plain)
            .unwrap();
        assert_eq!(original.get_element(&Value::from(1)).unwrap(), Value::from(1));
        assert_eq!(alias.get_element(&Value::from(1)).unwrap(), Value::from(2));
    }

    #[test]
    fn test_reads() {
        let array = Value::array(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(array.get_element(&Value::from(2)).unwrap(), Value::from("b"));
        assert!(array.get_element(&Value::from(0)).unwrap_err().is(ErrorKind::ArrayBounds));
        assert!(array.get_element(&Value::from(3)).unwrap_err().is(ErrorKind::ArrayBounds));

        let record = Value::record(Record::new().with("Age", 41));
        assert_eq!(record.get_element(&Value::from("age")).unwrap(), Value::from(41));
        assert!(record.get_member("name").unwrap_err().is(ErrorKind::NoMember));

        assert_eq!(Value::from("xyz").get_element(&Value::from(2)).unwrap(), Value::from("y"));
    }

    #[test]
    fn test_record_plain_write_requires_member() {
        let mut record = Value::record(Record::new().with("a", 1));
        assert!(record
            .set_element(&Value::from("b"), Value::from(2), IndexMode::Plain)
            .unwrap_err()
            .is(ErrorKind::NoMember));
        record
            .set_element(&Value::from("b"), Value::from(2), IndexMode::Create)
            .unwrap();
        assert_eq!(record.get_member("B").unwrap(), Value::from(2));
    }

    #[test]
    fn test_table_column_and_row_access() {
        let mut table = Table::new(["id"]);
        table.push_row(vec![Value::from(7)]).unwrap();
        let table = Value::table(table);
        assert_eq!(table.get_member("ID").unwrap(), Value::array(vec![Value::from(7)]));
        let row = table.get_element(&Value::from(1)).unwrap();
        assert_eq!(row.get_member("id").unwrap(), Value::from(7));
    }

    #[test]
    fn test_create_write_with_huge_index_is_an_error() {
        let mut items = Value::array(vec![Value::from(1)]);
        let err = items
            .set_element(&Value::from(i64::MAX), Value::from(2), IndexMode::Create)
            .unwrap_err();
        assert!(err.is(ErrorKind::ArrayBounds));
        assert_eq!(items.length().unwrap(), 1);
    }
}
