// Arithmetic and logic opcodes
// Binary operators pop (target source) and push one result

use std::cmp::Ordering;

use crate::error::VmResult;
use crate::vm::arith::BinaryOp;
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::value::Value;

fn binary(ctx: &mut InstructionContext<'_>, op: BinaryOp) -> VmResult<Flow> {
    let source = ctx.pop()?;
    let target = ctx.pop()?;
    let result = target.binary(op, &source)?;
    ctx.push(result);
    Ok(Flow::Next)
}

pub fn add(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    binary(ctx, BinaryOp::Add)
}

pub fn sub(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    binary(ctx, BinaryOp::Sub)
}

pub fn mul(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    binary(ctx, BinaryOp::Mul)
}

pub fn div(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    binary(ctx, BinaryOp::Div)
}

pub fn modulo(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    binary(ctx, BinaryOp::Mod)
}

pub fn pow(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    binary(ctx, BinaryOp::Pow)
}

pub fn neg(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let value = ctx.pop()?.negate()?;
    ctx.push(value);
    Ok(Flow::Next)
}

fn equality(ctx: &mut InstructionContext<'_>, expect: bool) -> VmResult<Flow> {
    let rhs = ctx.pop()?;
    let lhs = ctx.pop()?;
    let equal = lhs.equals(&rhs)?;
    ctx.push(equal == expect);
    Ok(Flow::Next)
}

fn ordering(ctx: &mut InstructionContext<'_>, test: fn(Ordering) -> bool) -> VmResult<Flow> {
    let rhs = ctx.pop()?;
    let lhs = ctx.pop()?;
    let order = lhs.compare(&rhs)?;
    ctx.push(test(order));
    Ok(Flow::Next)
}

pub fn eq(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    equality(ctx, true)
}

pub fn ne(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    equality(ctx, false)
}

pub fn lt(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    ordering(ctx, Ordering::is_lt)
}

pub fn le(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    ordering(ctx, Ordering::is_le)
}

pub fn gt(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    ordering(ctx, Ordering::is_gt)
}

pub fn ge(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    ordering(ctx, Ordering::is_ge)
}

fn logical(ctx: &mut InstructionContext<'_>, op: fn(bool, bool) -> bool) -> VmResult<Flow> {
    let b = ctx.pop_bool()?;
    let a = ctx.pop_bool()?;
    ctx.push(op(a, b));
    Ok(Flow::Next)
}

pub fn and(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    logical(ctx, |a, b| a && b)
}

pub fn or(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    logical(ctx, |a, b| a || b)
}

pub fn xor(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    logical(ctx, |a, b| a ^ b)
}

pub fn not(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let flag = ctx.pop_bool()?;
    ctx.push(!flag);
    Ok(Flow::Next)
}

/// Add the operand delta (default 1) to a variable in place
pub fn incr(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let delta = match (ctx.opt_int(), ctx.instruction.dbl) {
        (_, Some(d)) => Value::Double(d),
        (Some(n), None) => Value::Integer(n),
        (None, None) => Value::Integer(1),
    };
    if ctx.state.dynamic_symbols {
        ctx.symbols.find_reference(&name, true)?;
    }
    ctx.symbols.update(&name, |value| {
        *value = value.add(&delta)?;
        Ok(())
    })?;
    Ok(Flow::Next)
}
