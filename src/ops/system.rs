// System opcodes
// Shell commands, threads, runtime assembly, named locks and clocks

use std::process::Command;
use tracing::debug;

use crate::bytecode::{assemble as assemble_source, AsmError, Program};
use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::engine::epoch_seconds;
use crate::vm::session::Permission;

/// ( command -- status )
pub fn system(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    ctx.require(Permission::System)?;
    let command = ctx.pop_string()?;
    ctx.session.flush();
    let status = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .status()
        .map_err(|err| VmError::with_param(ErrorKind::FileError, err.to_string()))?;
    debug!(%command, status = ?status.code(), "system command finished");
    ctx.push(i64::from(status.code().unwrap_or(-1)));
    Ok(Flow::Next)
}

/// ( args.. -- id ) run a catalog program on its own thread
pub fn thread(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    ctx.require(Permission::Threads)?;
    let name = ctx.name()?;
    let n = ctx.count()?;
    let args = ctx.pop_n(n)?.into_vec();
    let program = ctx.session.services().programs.get(&name)?;
    let id = ctx.session.spawn(program, args)?;
    ctx.push(id);
    Ok(Flow::Next)
}

fn listing(source: &str, name: &str) -> Result<Vec<Program>, AsmError> {
    match assemble_source(source) {
        Err(AsmError::NoProgram { .. }) => assemble_source(&format!(".PROGRAM {}\n{}", name, source)),
        assembled => assembled,
    }
}

/// ( source -- ) assemble text into the program catalog. A listing
/// without a directive becomes the program named by the operand.
pub fn assemble(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    ctx.require(Permission::Assembly)?;
    let name = ctx.name()?;
    let source = ctx.pop_string()?;
    let programs = listing(&source, &name)
        .map_err(|err| VmError::with_param(ErrorKind::InvalidValue, err.to_string()))?;
    for program in programs {
        debug!(program = %program.name, "assembled at runtime");
        ctx.session.register(program);
    }
    Ok(Flow::Next)
}

pub fn lock(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.pop_string()?;
    let session = ctx.session.id();
    ctx.session.services().locks.lock(&name, session)?;
    Ok(Flow::Next)
}

pub fn unlock(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.pop_string()?;
    let session = ctx.session.id();
    ctx.session.services().locks.unlock(&name, session)?;
    Ok(Flow::Next)
}

/// ( -- seconds ) since the Unix epoch
pub fn time(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    ctx.push(epoch_seconds());
    Ok(Flow::Next)
}

pub fn timestamp(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    ctx.push(now);
    Ok(Flow::Next)
}

/// ( -- seconds ) since this invocation started
pub fn elapsed(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let seconds = ctx.state.started.elapsed().as_secs_f64();
    ctx.push(seconds);
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::bytecode::assemble;
    use crate::config::VmConfig;
    use crate::error::ErrorKind;
    use crate::ops::testing::run;
    use crate::vm::session::{Services, Session};
    use crate::vm::Value;
    use pretty_assertions::assert_eq;

    fn sandboxed(source: &str) -> crate::error::VmError {
        let services = Arc::new(Services::new(VmConfig::sandboxed()));
        let mut session = Session::with_io(services, Box::new(std::io::sink()), Box::new(std::io::empty()));
        for program in assemble(source).unwrap() {
            session.register(program);
        }
        session.run("MAIN", Vec::new()).unwrap_err()
    }

    #[test]
    fn test_runtime_assembly_registers_program() {
        let (result, _) = run(r#"
            .PROGRAM MAIN
                PUSHS "PUSHI 6\nRETURN 1\n"
                ASM "SIX"
                CALLF "SIX", 0
                RETURN 1
        "#);
        assert_eq!(result.unwrap().result, Some(Value::from(6)));
    }

    #[test]
    fn test_runtime_assembly_error() {
        let (result, _) = run(".PROGRAM MAIN\n PUSHS \"FROB\"\n ASM \"BAD\"\n");
        assert!(result.unwrap_err().is(ErrorKind::InvalidValue));
    }

    #[test]
    fn test_lock_is_reentrant_and_unlock_requires_holder() {
        let (result, _) = run(r#"
            .PROGRAM MAIN
                PUSHS "door"
                LOCK
                PUSHS "door"
                LOCK
                PUSHS "door"
                UNLOCK
                PUSHS "window"
                UNLOCK
        "#);
        assert!(result.unwrap_err().is(ErrorKind::NotLocked));
    }

    #[test]
    fn test_privileged_opcodes_in_sandbox() {
        let err = sandboxed(".PROGRAM MAIN\n PUSHS \"true\"\n SYSTEM\n");
        assert_eq!(err.param.as_deref(), Some("SYSTEM"));
        let err = sandboxed(".PROGRAM MAIN\n THREAD \"MAIN\", 0\n");
        assert_eq!(err.param.as_deref(), Some("THREADS"));
        let err = sandboxed(".PROGRAM MAIN\n PUSHS \"END\"\n ASM \"X\"\n");
        assert!(err.is(ErrorKind::Sandbox));
    }

    #[test]
    fn test_clocks() {
        let (result, _) = run(".PROGRAM MAIN\n ELAPSED\n TIME\n TIMESTAMP\n MKARRAY 3\n RETURN 1\n");
        let value = result.unwrap().result.unwrap();
        let items = value.as_array().unwrap();
        assert!(items[0].to_f64().unwrap() >= 0.0);
        assert!(items[1].to_f64().unwrap() > 1.6e9);
        assert_eq!(items[2].to_string().len(), 19);
    }

    #[test]
    fn test_denied_opcode_leaves_stack_untouched() {
        use crate::bytecode::{Instruction, OpCode};
        use crate::ops::testing::step_with;
        use crate::vm::frame::ExecState;

        let denied = [
            (super::system as crate::ops::Handler, Instruction::new(OpCode::System)),
            (super::thread, Instruction::new(OpCode::Thread).with_str("MAIN").with_int(1)),
            (super::assemble, Instruction::new(OpCode::Asm).with_str("X")),
            (crate::ops::io::log_message, Instruction::new(OpCode::Log).with_str("INFO")),
            (crate::ops::files::open, Instruction::new(OpCode::Open).with_int(0)),
        ];
        for (handler, instruction) in denied {
            let mut state = ExecState::new();
            state.push(Value::from("kept"));
            let err = step_with(VmConfig::sandboxed(), handler, instruction, &mut state).unwrap_err();
            assert!(err.is(ErrorKind::Sandbox));
            assert_eq!(state.depth(), 1);
            assert_eq!(state.pop().unwrap(), Value::from("kept"));
        }
    }
}
