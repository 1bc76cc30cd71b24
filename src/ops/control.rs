// Control flow opcodes
// Branches, GOSUB, program exits, error trapping and SLEEP

use std::time::Duration;
use tracing::warn;

use crate::bytecode::stream::unbias;
use crate::error::{ErrorKind, Fault, VmError, VmResult};
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::frame::ScopeControlBlock;

pub fn goto(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    Ok(Flow::Jump(ctx.target()?))
}

pub fn branch_true(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    if ctx.pop_bool()? {
        Ok(Flow::Jump(ctx.target()?))
    } else {
        Ok(Flow::Next)
    }
}

pub fn branch_false(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    if ctx.pop_bool()? {
        Ok(Flow::Next)
    } else {
        Ok(Flow::Jump(ctx.target()?))
    }
}

/// Resolved target of the `k`-th entry of an ON GOTO/GOSUB table
fn table_entry(ctx: &InstructionContext<'_>, at: usize) -> VmResult<usize> {
    let entry = ctx
        .code()
        .get(at)
        .ok_or_else(|| VmError::from(Fault::BadAddress(at)))?;
    match (entry.is_branch(), &entry.str, entry.int) {
        (true, _, Some(address)) => Ok(address as usize),
        (false, Some(label), _) => Err(VmError::with_param(ErrorKind::UnknownLabel, label.to_string())),
        (false, None, Some(line)) => match unbias(line) {
            Some(address) => Ok(address),
            None => Err(VmError::with_param(ErrorKind::UnknownLine, line.to_string())),
        },
        _ => Err(Fault::InvalidArgument("ON table entry without target".into()).into()),
    }
}

/// Selector outside 1..=k falls through past the table
fn selected(ctx: &mut InstructionContext<'_>) -> VmResult<(Option<usize>, usize)> {
    let k = ctx.count()?;
    let selector = ctx.pop_i64()?;
    let table = ctx.state.pc;
    let after = table + k;
    if selector < 1 || selector as usize > k {
        return Ok((None, after));
    }
    Ok((Some(table_entry(ctx, table + selector as usize - 1)?), after))
}

pub fn on_goto(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    match selected(ctx)? {
        (Some(target), _) => Ok(Flow::Jump(target)),
        (None, after) => Ok(Flow::Jump(after)),
    }
}

pub fn on_gosub(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    match selected(ctx)? {
        (Some(target), after) => {
            ctx.state.push_gosub(ScopeControlBlock {
                target,
                return_address: after,
                program: ctx.program.name.clone(),
            });
            Ok(Flow::Jump(target))
        }
        (None, after) => Ok(Flow::Jump(after)),
    }
}

pub fn gosub(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let target = ctx.target()?;
    let return_address = ctx.state.pc;
    ctx.state.push_gosub(ScopeControlBlock {
        target,
        return_address,
        program: ctx.program.name.clone(),
    });
    Ok(Flow::Jump(target))
}

pub fn return_gosub(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let frame = ctx.state.pop_gosub()?;
    Ok(Flow::Jump(frame.return_address))
}

pub fn end(_ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    Ok(Flow::End)
}

/// With operand 1 the top of stack becomes the invocation result
pub fn return_value(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    if ctx.opt_int() != Some(1) {
        return Ok(Flow::Return(None));
    }
    let value = ctx.pop()?;
    ctx.symbols.insert_local("ARG$RESULT", value.clone())?;
    Ok(Flow::Return(Some(value)))
}

pub fn quit(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    Ok(Flow::Quit(ctx.opt_int().unwrap_or(0)))
}

/// Install a trap, or remove it when there is no target
pub fn on_error(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    if !ctx.branch && ctx.opt_str().is_none() && ctx.opt_int().is_none() {
        ctx.state.trap = None;
        return Ok(Flow::Next);
    }
    let handler = ctx.target()?;
    ctx.state.arm_trap(handler);
    Ok(Flow::Next)
}

/// Signal a runtime error by status code. Unknown codes become USER errors.
pub fn raise(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let code = ctx.name()?;
    let param = match ctx.opt_int() {
        Some(1) => Some(ctx.pop_string()?),
        _ => None,
    };
    let err = match (ErrorKind::from_code(&code), param) {
        (Some(kind), Some(param)) => VmError::with_param(kind, param),
        (Some(kind), None) => VmError::new(kind),
        (None, Some(param)) => VmError::with_param(ErrorKind::User, format!("{}: {}", code, param)),
        (None, None) => VmError::with_param(ErrorKind::User, code.to_string()),
    };
    Err(err)
}

/// Sleep for the popped number of seconds, clamped to the configured maximum
pub fn sleep(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let seconds = ctx.pop_f64()?;
    let requested = (seconds.max(0.0) * 1000.0) as u64;
    let limit = ctx.session.config().max_sleep_ms;
    if requested > limit {
        warn!(requested_ms = requested, limit_ms = limit, "sleep clamped");
    }
    std::thread::sleep(Duration::from_millis(requested.min(limit)));
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::ops::testing::run;
    use crate::vm::Value;

    #[test]
    fn test_gosub_and_return() {
        let (result, output) = run(r#"
            .PROGRAM MAIN
                GOSUB "SUB"
                PUSHS "back"
                PRINT
                END
            SUB:
                PUSHS "in "
                PRINT
                RETGOSUB
        "#);
        result.unwrap();
        assert_eq!(output, "in back");
    }

    #[test]
    fn test_return_without_gosub() {
        let (result, _) = run(".PROGRAM MAIN\n RETGOSUB\n");
        assert!(result.unwrap_err().is(ErrorKind::ReturnWithoutGosub));
    }

    #[test]
    fn test_on_goto_selects_entry() {
        let (result, _) = run(r#"
            .PROGRAM MAIN
                PUSHI 2
                ONGOTO 2
                GOTO "ONE"
                GOTO "TWO"
                PUSHS "none"
                RETURN 1
            ONE:
                PUSHS "one"
                RETURN 1
            TWO:
                PUSHS "two"
                RETURN 1
        "#);
        assert_eq!(result.unwrap().result, Some(Value::from("two")));
    }

    #[test]
    fn test_unknown_label_at_runtime() {
        let (result, _) = run(".PROGRAM MAIN\n GOTO \"NOWHERE\"\n");
        let err = result.unwrap_err();
        assert!(err.is(ErrorKind::UnknownLabel));
        assert_eq!(err.param.as_deref(), Some("NOWHERE"));
    }

    #[test]
    fn test_raise_known_and_user_codes() {
        let (result, _) = run(".PROGRAM MAIN\n RAISE \"ARRAYBOUNDS\"\n");
        assert!(result.unwrap_err().is(ErrorKind::ArrayBounds));
        let (result, _) = run(".PROGRAM MAIN\n PUSHS \"why\"\n RAISE \"OOPS\", 1\n");
        let err = result.unwrap_err();
        assert!(err.is(ErrorKind::User));
        assert_eq!(err.param.as_deref(), Some("OOPS: why"));
    }
}
