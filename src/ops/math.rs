// Math opcodes
// Provides: ABS, INT, SGN, SQRT, EXP, LOG, SIN, COS, TAN, ATN, ROUND, MIN, MAX, RND, RANDOMIZE

use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::RoundingStrategy;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::value::Value;

fn out_of_domain(name: &str, n: f64) -> VmError {
    VmError::with_param(ErrorKind::InvalidValue, format!("{}({})", name, n))
}

fn unary(ctx: &mut InstructionContext<'_>, f: fn(f64) -> f64) -> VmResult<Flow> {
    let n = ctx.pop_f64()?;
    ctx.push(f(n));
    Ok(Flow::Next)
}

/// A double result that is integral and in range becomes INTEGER
fn integral(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::Integer(n as i64)
    } else {
        Value::Double(n)
    }
}

pub fn abs(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let value = match ctx.pop()? {
        Value::Integer(n) => n
            .checked_abs()
            .map(Value::Integer)
            .unwrap_or(Value::Double((n as f64).abs())),
        Value::Decimal(d) => Value::Decimal(d.abs()),
        other => Value::Double(other.to_f64()?.abs()),
    };
    ctx.push(value);
    Ok(Flow::Next)
}

/// Largest integer not greater than the operand
pub fn int(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let value = match ctx.pop()? {
        Value::Integer(n) => Value::Integer(n),
        Value::Decimal(d) => d
            .floor()
            .to_i64()
            .map(Value::Integer)
            .unwrap_or(Value::Decimal(d.floor())),
        other => integral(other.to_f64()?.floor()),
    };
    ctx.push(value);
    Ok(Flow::Next)
}

pub fn sgn(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let sign = match ctx.pop()? {
        Value::Integer(n) => n.signum(),
        Value::Decimal(d) if d.is_zero() => 0,
        Value::Decimal(d) => if d.is_sign_negative() { -1 } else { 1 },
        other => {
            let n = other.to_f64()?;
            if n > 0.0 {
                1
            } else if n < 0.0 {
                -1
            } else {
                0
            }
        }
    };
    ctx.push(sign);
    Ok(Flow::Next)
}

pub fn sqrt(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = ctx.pop_f64()?;
    if n < 0.0 {
        return Err(out_of_domain("SQRT", n));
    }
    ctx.push(n.sqrt());
    Ok(Flow::Next)
}

pub fn exp(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    unary(ctx, f64::exp)
}

/// Natural logarithm
pub fn ln(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = ctx.pop_f64()?;
    if n <= 0.0 {
        return Err(out_of_domain("LOG", n));
    }
    ctx.push(n.ln());
    Ok(Flow::Next)
}

pub fn sin(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    unary(ctx, f64::sin)
}

pub fn cos(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    unary(ctx, f64::cos)
}

pub fn tan(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    unary(ctx, f64::tan)
}

pub fn atn(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    unary(ctx, f64::atan)
}

/// Round half away from zero to `digits` decimal places
pub fn round(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let digits = ctx.pop_i64()?;
    let value = ctx.pop()?;
    let places = u32::try_from(digits)
        .map_err(|_| VmError::with_param(ErrorKind::InvalidValue, format!("digits {}", digits)))?;
    let rounded = match value {
        Value::Integer(n) => Value::Integer(n),
        Value::Decimal(d) => {
            Value::Decimal(d.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero))
        }
        other => {
            let n = other.to_f64()?;
            let factor = 10f64.powi(places.min(15) as i32);
            let rounded = (n * factor).round() / factor;
            if places == 0 {
                integral(rounded)
            } else {
                Value::Double(rounded)
            }
        }
    };
    ctx.push(rounded);
    Ok(Flow::Next)
}

pub fn min(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let b = ctx.pop()?;
    let a = ctx.pop()?;
    let smaller = if b.compare(&a)?.is_lt() { b } else { a };
    ctx.push(smaller);
    Ok(Flow::Next)
}

pub fn max(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let b = ctx.pop()?;
    let a = ctx.pop()?;
    let larger = if b.compare(&a)?.is_gt() { b } else { a };
    ctx.push(larger);
    Ok(Flow::Next)
}

/// Uniform double in [0, 1) from the session generator
pub fn rnd(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n: f64 = ctx.session.rng.random();
    ctx.push(n);
    Ok(Flow::Next)
}

pub fn randomize(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let seed = ctx.pop_i64()?;
    ctx.session.reseed(seed as u64);
    Ok(Flow::Next)
}
