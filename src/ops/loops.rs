// Loop opcodes
// FOR/NEXT, FOREACH, DO/LOOP and LEAVE over the lazily created loop stack

use std::sync::Arc;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::loops::{LoopControlBlock, LoopKind};
use crate::vm::value::{Value, ValueKind};

/// True while `index` has not passed `end` in the direction of `increment`.
/// A zero increment never finishes.
fn in_range(index: &Value, end: &Value, increment: &Value) -> VmResult<bool> {
    let (index, end, step) = (index.to_f64()?, end.to_f64()?, increment.to_f64()?);
    Ok(if step > 0.0 {
        index <= end
    } else if step < 0.0 {
        index >= end
    } else {
        true
    })
}

/// ( start end step -- ) binds the index, skips the body on a zero trip
pub fn for_loop(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let exit = ctx.target()?;
    let increment = ctx.pop()?;
    let end = ctx.pop()?;
    let start = ctx.pop()?;

    ctx.store(&name, 0, start.clone())?;
    if !in_range(&start, &end, &increment)? {
        return Ok(Flow::Jump(exit));
    }

    let resume = ctx.state.pc;
    ctx.state.loops().push(LoopControlBlock {
        kind: LoopKind::For { end, increment },
        index: Some(name),
        resume,
        exit,
    });
    Ok(Flow::Next)
}

pub fn next(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let symbols = ctx.symbols;
    let frame = ctx.state.loops().indexed(&name)?;
    let resume = frame.resume;

    let (value, more) = match &mut frame.kind {
        LoopKind::For { end, increment } => {
            let index = symbols.reference(&name)?.add(increment)?;
            let more = in_range(&index, end, increment)?;
            (Some(index), more)
        }
        LoopKind::ForEach { items, cursor } => {
            *cursor += 1;
            (items.get(*cursor).cloned(), *cursor < items.len())
        }
        LoopKind::Do => {
            return Err(VmError::with_param(ErrorKind::ForIndex, name.to_string()))
        }
    };

    if let Some(value) = value {
        ctx.store(&name, 0, value)?;
    }
    if more {
        Ok(Flow::Jump(resume))
    } else {
        ctx.state.loops().pop();
        Ok(Flow::Next)
    }
}

/// ( source -- ) iterates over an ARRAY snapshot of the source
pub fn for_each(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let exit = ctx.target()?;
    let source = ctx.pop()?;
    let items: Arc<Vec<Value>> = match source {
        Value::Array(items) => items,
        other => match other.coerced(ValueKind::Array)? {
            Value::Array(items) => items,
            _ => Arc::new(Vec::new()),
        },
    };

    let Some(first) = items.first().cloned() else {
        return Ok(Flow::Jump(exit));
    };
    ctx.store(&name, 0, first)?;

    let resume = ctx.state.pc;
    ctx.state.loops().push(LoopControlBlock {
        kind: LoopKind::ForEach { items, cursor: 0 },
        index: Some(name),
        resume,
        exit,
    });
    Ok(Flow::Next)
}

/// With a pre-test target the condition code runs before the first pass
pub fn do_loop(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let resume = ctx.state.pc;
    ctx.state.loops().push(LoopControlBlock {
        kind: LoopKind::Do,
        index: None,
        resume,
        exit: 0,
    });
    if ctx.branch || ctx.opt_str().is_some() || ctx.opt_int().is_some() {
        return Ok(Flow::Jump(ctx.target()?));
    }
    Ok(Flow::Next)
}

/// LOOP mode 0 forever, 1 while the condition holds, 2 until it holds
pub fn loop_end(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let mode = ctx.opt_int().unwrap_or(0);
    let resume = ctx.state.loops().do_frame()?.resume;
    let more = match mode {
        0 => true,
        1 => ctx.pop_bool()?,
        2 => !ctx.pop_bool()?,
        other => {
            return Err(VmError::with_param(
                ErrorKind::InvalidValue,
                format!("LOOP mode {}", other),
            ))
        }
    };
    if more {
        Ok(Flow::Jump(resume))
    } else {
        ctx.state.loops().pop();
        Ok(Flow::Next)
    }
}

pub fn leave(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let target = ctx.target()?;
    ctx.state.loops().pop();
    Ok(Flow::Jump(target))
}
