// Variable opcodes
// Provides: LOAD, STORE, STOREL, CONST, READONLY, COMMON, CLEAR, FORGET, DEFINED, DIM, SETSCOPE

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::value::{Value, ValueKind};

pub fn load(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let value = match ctx.opt_int().unwrap_or(0) {
        0 => ctx.symbols.reference(&name)?,
        skip => ctx.symbols.target(skip)?.reference(&name)?,
    };
    ctx.push(value);
    Ok(Flow::Next)
}

pub fn store(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let skip = ctx.opt_int().unwrap_or(0);
    let value = ctx.pop()?;
    ctx.store(&name, skip, value)?;
    Ok(Flow::Next)
}

/// Fresh binding in the current table, shadowing any outer one
pub fn store_local(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let value = ctx.pop()?;
    let value = ctx.typed(&name, value)?;
    ctx.symbols.insert_local(&name, value)?;
    Ok(Flow::Next)
}

pub fn constant(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let value = ctx.pop()?;
    let value = ctx.typed(&name, value)?;
    ctx.symbols.insert_read_only(&name, value)?;
    Ok(Flow::Next)
}

pub fn read_only(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    ctx.symbols.mark_read_only(&name)?;
    Ok(Flow::Next)
}

/// Flag a binding to survive CHAIN, creating it blank when allowed
pub fn common(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    ctx.symbols.find_reference(&name, ctx.state.dynamic_symbols)?;
    ctx.symbols.mark_common(&name)?;
    Ok(Flow::Next)
}

pub fn clear(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    ctx.symbols.delete(&name)?;
    Ok(Flow::Next)
}

pub fn forget(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    ctx.symbols.delete_always(&name);
    Ok(Flow::Next)
}

pub fn defined(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let defined = ctx.symbols.is_defined(&name);
    ctx.push(defined);
    Ok(Flow::Next)
}

/// Declare a variable. A size of zero declares a scalar, otherwise an
/// array of blank elements. The kind comes from the operand or the suffix.
pub fn dim(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let kind = match ctx.opt_int() {
        Some(code) => ValueKind::from_code(code)
            .ok_or_else(|| VmError::with_param(ErrorKind::InvalidValue, format!("kind {}", code)))?,
        None => ValueKind::from_suffix(&name).unwrap_or(ValueKind::Integer),
    };
    let size = ctx.pop_i64()?;
    let value = match size {
        0 => Value::default_of(kind),
        n if n > 0 => Value::array(vec![Value::default_of(kind); ctx.bounded(n)?]),
        n => return Err(VmError::array_bounds(n)),
    };
    ctx.symbols.insert(&name, value)?;
    Ok(Flow::Next)
}

/// Re-root the current table at the session global table
pub fn set_scope(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let global = ctx.session.global().clone();
    ctx.symbols.set_scope(&global);
    ctx.state.locally_scoped = true;
    Ok(Flow::Next)
}
