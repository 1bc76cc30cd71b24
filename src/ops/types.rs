// Type opcodes
// Provides: CVT, TYPEOF, ISKIND

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::value::ValueKind;

fn kind_operand(ctx: &InstructionContext<'_>) -> VmResult<ValueKind> {
    let code = ctx.int()?;
    ValueKind::from_code(code)
        .ok_or_else(|| VmError::with_param(ErrorKind::InvalidValue, format!("kind {}", code)))
}

pub fn convert(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let kind = kind_operand(ctx)?;
    let mut value = ctx.pop()?;
    value.coerce(kind)?;
    ctx.push(value);
    Ok(Flow::Next)
}

pub fn type_of(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.pop()?.type_name();
    ctx.push(name);
    Ok(Flow::Next)
}

pub fn is_kind(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let kind = kind_operand(ctx)?;
    let matches = ctx.pop()?.kind() == kind;
    ctx.push(matches);
    Ok(Flow::Next)
}
