// Console opcodes
// Provides: PRINT, PRINTNL, INPUT, LOG

use tracing::{debug, error, info, trace, warn};

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::coerce::parse_number;
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::session::Permission;
use crate::vm::value::Value;

pub fn print(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let value = ctx.pop()?;
    ctx.session.write(&value.to_string())?;
    Ok(Flow::Next)
}

pub fn print_newline(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    ctx.session.write("\n")?;
    Ok(Flow::Next)
}

/// Read a console line into a variable. Numeric text becomes a number
/// unless the name carries the string suffix.
pub fn input(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let line = ctx
        .session
        .read_line()?
        .ok_or_else(|| VmError::with_param(ErrorKind::EndOfFile, "console"))?;
    let value = if name.ends_with('$') {
        Value::from(line)
    } else {
        parse_number(&line).unwrap_or_else(|| Value::from(line))
    };
    ctx.store(&name, 0, value)?;
    Ok(Flow::Next)
}

/// ( msg -- ) forward to the log at the level named by the operand
pub fn log_message(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    ctx.require(Permission::Logging)?;
    let level = ctx.name()?;
    let message = ctx.pop_string()?;
    let program = &ctx.program.name;
    match level.to_ascii_uppercase().as_str() {
        "ERROR" => error!(target: "jbasic::program", %program, "{}", message),
        "WARN" | "WARNING" => warn!(target: "jbasic::program", %program, "{}", message),
        "INFO" => info!(target: "jbasic::program", %program, "{}", message),
        "DEBUG" => debug!(target: "jbasic::program", %program, "{}", message),
        "TRACE" => trace!(target: "jbasic::program", %program, "{}", message),
        _ => {
            return Err(VmError::with_param(
                ErrorKind::InvalidValue,
                format!("log level {}", level),
            ))
        }
    }
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use crate::bytecode::assemble;
    use crate::config::VmConfig;
    use crate::error::{ErrorKind, VmResult};
    use crate::ops::testing::run;
    use crate::vm::session::{OutputBuffer, RunOutcome, Services, Session};
    use crate::vm::Value;
    use pretty_assertions::assert_eq;

    fn run_with_input(source: &str, input: &str) -> VmResult<RunOutcome> {
        let services = Arc::new(Services::new(VmConfig::default()));
        let input = Cursor::new(input.as_bytes().to_vec());
        let mut session = Session::with_io(services, Box::new(OutputBuffer::new()), Box::new(input));
        for program in assemble(source).unwrap() {
            session.register(program);
        }
        session.run("MAIN", Vec::new())
    }

    #[test]
    fn test_print_and_newline() {
        let (result, output) = run(".PROGRAM MAIN\n PUSHI 1\n PRINT\n PRINTNL\n PUSHD 2.5\n PRINT\n");
        result.unwrap();
        assert_eq!(output, "1\n2.5");
    }

    #[test]
    fn test_input_numeric_and_string() {
        let source = r#"
            .PROGRAM MAIN
                INPUT "N"
                INPUT "S$"
                LOAD "N"
                LOAD "S$"
                MKARRAY 2
                RETURN 1
        "#;
        let outcome = run_with_input(source, "42\n42\n").unwrap();
        assert_eq!(
            outcome.result,
            Some(Value::array(vec![Value::from(42), Value::from("42")]))
        );
    }

    #[test]
    fn test_input_at_end_of_console() {
        let err = run_with_input(".PROGRAM MAIN\n INPUT \"N\"\n", "").unwrap_err();
        assert!(err.is(ErrorKind::EndOfFile));
    }

    #[test]
    fn test_log_rejects_unknown_level() {
        let (result, _) = run(".PROGRAM MAIN\n PUSHS \"hi\"\n LOG \"loud\"\n");
        assert!(result.unwrap_err().is(ErrorKind::InvalidValue));
        let (result, _) = run(".PROGRAM MAIN\n PUSHS \"hi\"\n LOG \"info\"\n");
        result.unwrap();
    }
}
