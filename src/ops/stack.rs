// Stack and constant opcodes
// Provides: NOOP, STMT, PUSH*, DUP, SWAP, DROP, registers, MKARRAY, MKRECORD, MKTABLE

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{ErrorKind, Fault, VmError, VmResult};
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::value::{Record, Table, Value};

pub fn noop(_ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    Ok(Flow::Next)
}

/// Statement boundary: the evaluation stack must be empty here
pub fn stmt(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let depth = ctx.state.depth();
    if depth != 0 {
        return Err(Fault::StackNotEmpty(depth).into());
    }
    if let Some(line) = ctx.opt_int() {
        ctx.state.line = Some(line);
    }
    Ok(Flow::Next)
}

pub fn push_int(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = ctx.int()?;
    ctx.push(n);
    Ok(Flow::Next)
}

pub fn push_double(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = ctx.dbl()?;
    ctx.push(n);
    Ok(Flow::Next)
}

pub fn push_string(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let text = ctx.name()?;
    ctx.push(Value::String(text));
    Ok(Flow::Next)
}

pub fn push_bool(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let flag = ctx.int()? != 0;
    ctx.push(flag);
    Ok(Flow::Next)
}

/// Decimal text with an optional explicit scale
pub fn push_decimal(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let text = ctx.name()?;
    let mut value = Decimal::from_str(text.trim())
        .map_err(|_| VmError::with_param(ErrorKind::InvalidValue, text.to_string()))?;
    if let Some(scale) = ctx.opt_int() {
        let scale = u32::try_from(scale)
            .map_err(|_| Fault::InvalidArgument(format!("decimal scale {}", scale)))?;
        value.rescale(scale);
    }
    ctx.push(value);
    Ok(Flow::Next)
}

pub fn dup(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let top = ctx.state.peek()?.clone();
    ctx.push(top);
    Ok(Flow::Next)
}

pub fn swap(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let b = ctx.pop()?;
    let a = ctx.pop()?;
    ctx.push(b);
    ctx.push(a);
    Ok(Flow::Next)
}

pub fn discard(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = match ctx.opt_int() {
        Some(_) => ctx.count()?,
        None => 1,
    };
    ctx.pop_n(n)?;
    Ok(Flow::Next)
}

pub fn load_register(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let value = ctx.state.register(ctx.int()?)?;
    ctx.push(value);
    Ok(Flow::Next)
}

pub fn store_register(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let index = ctx.int()?;
    let value = ctx.pop()?;
    ctx.state.set_register(index, value)?;
    Ok(Flow::Next)
}

/// Element count comes from the operand, or from the stack when absent
pub fn make_array(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = match ctx.opt_int() {
        Some(_) => ctx.count()?,
        None => {
            let n = ctx.pop_i64()?;
            usize::try_from(n).map_err(|_| Fault::InvalidArgument(format!("count {}", n)))?
        }
    };
    let items = ctx.pop_n(n)?;
    ctx.push(Value::array(items.into_vec()));
    Ok(Flow::Next)
}

/// Pops `n` name/value pairs
pub fn make_record(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = ctx.count()?;
    let pairs = ctx.pop_n(n * 2)?;
    let mut record = Record::new();
    for pair in pairs.chunks(2) {
        let name = pair[0].as_str().ok_or_else(|| {
            VmError::type_mismatch(format!("member name must be STRING, got {}", pair[0].type_name()))
        })?;
        record.set(name, pair[1].clone());
    }
    ctx.push(record);
    Ok(Flow::Next)
}

/// Columns come from a comma-separated operand or an array beneath the rows
pub fn make_table(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let rows = ctx.pop()?;
    let columns: Vec<String> = match ctx.opt_str() {
        Some(list) => list.split(',').map(|c| c.trim().to_string()).collect(),
        None => match ctx.pop()? {
            Value::Array(names) => names.iter().map(|name| name.to_string()).collect(),
            other => {
                return Err(VmError::type_mismatch(format!(
                    "table columns must be an ARRAY, got {}",
                    other.type_name()
                )))
            }
        },
    };

    let mut table = Table::new(&columns);
    let rows = rows
        .as_array()
        .ok_or_else(|| VmError::type_mismatch(format!("table rows must be an ARRAY, got {}", rows.type_name())))?;
    for row in rows {
        match row {
            Value::Array(values) => table.push_row(values.to_vec())?,
            Value::Record(record) => table.push_record(record)?,
            other => {
                return Err(VmError::type_mismatch(format!(
                    "table row must be ARRAY or RECORD, got {}",
                    other.type_name()
                )))
            }
        }
    }
    ctx.push(table);
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Instruction, OpCode};
    use crate::ops::testing::step;
    use crate::vm::frame::ExecState;

    #[test]
    fn test_stmt_requires_empty_stack() {
        let mut state = ExecState::new();
        state.push(Value::from(1));
        let err = step(stmt, Instruction::new(OpCode::Stmt).with_int(10), &mut state).unwrap_err();
        assert_eq!(err.as_fault(), Some(&Fault::StackNotEmpty(1)));

        state.clear_stack();
        step(stmt, Instruction::new(OpCode::Stmt).with_int(10), &mut state).unwrap();
        assert_eq!(state.line, Some(10));
    }

    #[test]
    fn test_push_decimal_keeps_scale() {
        let mut state = ExecState::new();
        let instruction = Instruction::new(OpCode::PushDec).with_str("1.5").with_int(3);
        step(push_decimal, instruction, &mut state).unwrap();
        assert_eq!(state.pop().unwrap().to_string(), "1.500");
    }

    #[test]
    fn test_make_record_and_table() {
        let mut state = ExecState::new();
        state.push(Value::from("name"));
        state.push(Value::from("ada"));
        step(make_record, Instruction::new(OpCode::MkRecord).with_int(1), &mut state).unwrap();
        let record = state.pop().unwrap();
        assert_eq!(record.get_member("NAME").unwrap(), Value::from("ada"));

        state.push(Value::array(vec![record]));
        step(make_table, Instruction::new(OpCode::MkTable).with_str("name"), &mut state).unwrap();
        let table = state.pop().unwrap();
        assert_eq!(table.as_table().unwrap().row_count(), 1);
    }

    #[test]
    fn test_missing_operand_is_a_fault() {
        let mut state = ExecState::new();
        let err = step(push_int, Instruction::new(OpCode::PushI), &mut state).unwrap_err();
        assert!(err.is_fault());
    }
}
