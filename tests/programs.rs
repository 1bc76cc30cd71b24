// End-to-end programs through the assembler and a full session

use std::sync::Arc;

use jbasic_core::bytecode::{assemble, ByteCode, Instruction, OpCode, Program, ProgramFile, ProgramKind};
use jbasic_core::config::VmConfig;
use jbasic_core::error::{ErrorKind, Fault, VmResult};
use jbasic_core::vm::{OutputBuffer, RunOutcome, Services, Session, Value};
use pretty_assertions::assert_eq;

fn session_with(config: VmConfig) -> (Session, OutputBuffer) {
    let services = Arc::new(Services::new(config));
    let output = OutputBuffer::new();
    let session = Session::with_io(services, Box::new(output.clone()), Box::new(std::io::empty()));
    (session, output)
}

fn run_with(config: VmConfig, source: &str) -> (VmResult<RunOutcome>, String) {
    let (mut session, output) = session_with(config);
    let programs = assemble(source).unwrap();
    let main = programs[0].name.to_string();
    for program in programs {
        session.register(program);
    }
    let result = session.run(&main, Vec::new());
    (result, output.contents())
}

fn run(source: &str) -> (VmResult<RunOutcome>, String) {
    run_with(VmConfig::default(), source)
}

#[test]
fn test_onerror_binds_status_and_resumes() {
    let (result, _) = run(r#"
        .PROGRAM MAIN
            ONERROR "HANDLER"
            STMT 10
            PUSHI 1
            PUSHI 0
            DIV
            PUSHS "unreached"
            RETURN 1
        HANDLER:
            LOAD "SYS$STATUS"
            MEMBER "CODE"
            LOAD "SYS$STATUS"
            MEMBER "LINE"
            LOAD "SYS$STATUS"
            MEMBER "PROGRAM"
            MKARRAY 3
            RETURN 1
    "#);
    assert_eq!(
        result.unwrap().result,
        Some(Value::array(vec![
            Value::from("DIVZERO"),
            Value::from(10),
            Value::from("MAIN"),
        ]))
    );
}

#[test]
fn test_trap_is_taken_once() {
    let (result, _) = run(r#"
        .PROGRAM MAIN
            ONERROR "HANDLER"
            RAISE "USER"
        HANDLER:
            RAISE "ARRAYBOUNDS"
    "#);
    assert!(result.unwrap_err().is(ErrorKind::ArrayBounds));
}

#[test]
fn test_onerror_catches_callee_errors() {
    let (result, output) = run(r#"
        .PROGRAM MAIN
            ONERROR "CAUGHT"
            MKARRAY 0
            CALL "BROKEN"
            END
        CAUGHT:
            PUSHS "caught "
            PRINT
            LOAD "SYS$STATUS"
            MEMBER "PROGRAM"
            PRINT
        .PROGRAM BROKEN
            LOAD "NOPE"
    "#);
    result.unwrap();
    assert_eq!(output, "caught BROKEN");
}

#[test]
fn test_faults_are_never_trapped() {
    let (result, _) = run(r#"
        .PROGRAM MAIN
            ONERROR "HANDLER"
            DROP
        HANDLER:
            PUSHS "trapped"
            RETURN 1
    "#);
    let err = result.unwrap_err();
    assert!(err.is_fault());
    assert_eq!(err.as_fault(), Some(&Fault::StackUnderflow));
}

#[test]
fn test_unlinked_stream_is_a_fault() {
    let program = Program {
        name: Arc::from("RAW"),
        kind: ProgramKind::Program,
        locally_scoped: false,
        static_types: false,
        code: ByteCode::from_instructions(vec![Instruction::new(OpCode::Goto).with_str("THERE")]),
    };
    let (mut session, _) = session_with(VmConfig::default());
    session.register(program);
    let err = session.run("RAW", Vec::new()).unwrap_err();
    assert_eq!(err.as_fault(), Some(&Fault::Unlinked));
}

#[test]
fn test_error_trace_lists_each_invocation() {
    let (result, _) = run(r#"
        .PROGRAM MAIN
            MKARRAY 0
            CALL "OUTER"
        .PROGRAM OUTER
            MKARRAY 0
            CALL "INNER"
        .PROGRAM INNER
            PUSHI 1
            PUSHS "x"
            SUB
    "#);
    let err = result.unwrap_err();
    assert!(err.is(ErrorKind::TypeMismatch));
    let programs: Vec<&str> = err.stack_trace.iter().map(|frame| frame.program.as_str()).collect();
    assert_eq!(programs, vec!["INNER", "OUTER", "MAIN"]);
    assert_eq!(err.location.unwrap().program, "INNER");
}

#[test]
fn test_quit_status_crosses_calls() {
    let (result, output) = run(r#"
        .PROGRAM MAIN
            MKARRAY 0
            CALL "STOPPER"
            PUSHS "after"
            PRINT
        .PROGRAM STOPPER
            QUIT 3
    "#);
    let outcome = result.unwrap();
    assert_eq!(outcome.status, 3);
    assert_eq!(output, "");
}

#[test]
fn test_call_depth_is_bounded() {
    let config = VmConfig {
        max_call_depth: 8,
        ..VmConfig::default()
    };
    let (result, _) = run_with(config, r#"
        .PROGRAM MAIN
            MKARRAY 0
            CALL "MAIN"
    "#);
    assert!(result.unwrap_err().is(ErrorKind::CallDepth));
}

#[test]
fn test_locally_scoped_callee_sees_only_globals() {
    let (result, _) = run(r#"
        .PROGRAM MAIN
            PUSHI 1
            STORE "G", -1
            PUSHI 2
            STORE "MINE"
            MKARRAY 0
            CALL "ISOLATED"
            RESULT
            RETURN 1
        .PROGRAM ISOLATED
        .LOCAL
            LOAD "G"
            DEFINED "MINE"
            MKARRAY 2
            RETURN 1
    "#);
    assert_eq!(
        result.unwrap().result,
        Some(Value::array(vec![Value::from(1), Value::from(false)]))
    );
}

#[test]
fn test_static_typing_by_suffix() {
    let (result, _) = run(r#"
        .PROGRAM MAIN
        .STATIC
            PUSHS "42"
            STORE "N%"
            LOAD "N%"
            TYPEOF
            RETURN 1
    "#);
    assert_eq!(result.unwrap().result, Some(Value::from("INTEGER")));

    let (result, _) = run(r#"
        .PROGRAM MAIN
        .STATIC
            PUSHS "many"
            STORE "N%"
    "#);
    assert!(result.unwrap_err().is(ErrorKind::TypeMismatch));
}

#[test]
fn test_strict_symbols_need_declaration() {
    let config = VmConfig {
        dynamic_symbols: false,
        ..VmConfig::default()
    };
    let (result, _) = run_with(config.clone(), ".PROGRAM MAIN\n PUSHI 1\n STORE \"X\"\n");
    assert!(result.unwrap_err().is(ErrorKind::UnknownVariable));

    let (result, _) = run_with(config, r#"
        .PROGRAM MAIN
            PUSHI 0
            DIM "X"
            PUSHI 5
            STORE "X"
            LOAD "X"
            RETURN 1
    "#);
    assert_eq!(result.unwrap().result, Some(Value::from(5)));
}

#[test]
fn test_gosub_inside_for_loop() {
    let (result, output) = run(r#"
        .PROGRAM MAIN
            PUSHI 1
            PUSHI 3
            PUSHI 1
            FOR "I"
            GOSUB "SHOW"
            NEXT "I"
            END
        SHOW:
            LOAD "I"
            PUSHI 10
            MUL
            PRINT
            RETGOSUB
    "#);
    result.unwrap();
    assert_eq!(output, "102030");
}

#[test]
fn test_nested_loops_with_leave() {
    let (result, output) = run(r#"
        .PROGRAM MAIN
            PUSHI 1
            PUSHI 2
            PUSHI 1
            FOR "I"
            PUSHS "a"
            PUSHS "b"
            PUSHS "c"
            MKARRAY 3
            FOREACH "X"
            LOAD "X"
            PUSHS "b"
            EQ
            BRF "KEEP"
            LEAVE
        KEEP:
            LOAD "X"
            PRINT
            NEXT "X"
            PUSHS ";"
            PRINT
            NEXT "I"
    "#);
    result.unwrap();
    assert_eq!(output, "a;a;");
}

#[test]
fn test_chain_and_common() {
    let (result, output) = run(r#"
        .PROGRAM FIRST
            PUSHS "carried"
            STORE "NOTE$"
            COMMON "NOTE$"
            CHAIN "SECOND"
            PUSHS "not printed"
            PRINT
        .PROGRAM SECOND
            LOAD "$MODE"
            PRINT
            PUSHS " "
            PRINT
            LOAD "NOTE$"
            PRINT
    "#);
    result.unwrap();
    assert_eq!(output, "CHAIN carried");
}

#[test]
fn test_locks_are_per_session() {
    let services = Arc::new(Services::new(VmConfig::default()));
    let program = assemble(".PROGRAM GRAB\n PUSHS \"shared\"\n LOCK\n").unwrap();
    for program in program {
        services.register(program);
    }

    let mut first = Session::with_io(Arc::clone(&services), Box::new(std::io::sink()), Box::new(std::io::empty()));
    first.run("GRAB", Vec::new()).unwrap();
    assert_eq!(services.locks.holder("shared"), Some(first.id()));

    let mut second = Session::with_io(Arc::clone(&services), Box::new(std::io::sink()), Box::new(std::io::empty()));
    let err = second.run("GRAB", Vec::new()).unwrap_err();
    assert!(err.is(ErrorKind::LockHeld));

    drop(first);
    assert_eq!(services.locks.holder("shared"), None);
    second.run("GRAB", Vec::new()).unwrap();
}

#[test]
fn test_threads_share_the_root_table() {
    let (mut session, _) = session_with(VmConfig::default());
    let source = r#"
        .PROGRAM MAIN
            PUSHI 20
            PUSHI 1
            THREAD "WORKER", 2
            STORE "ID$"
            LOAD "ID$"
            LENGTH
            RETURN 1
        .PROGRAM WORKER
            ARG 1
            ARG 2
            ADD
            STORE "TOTAL", -2
    "#;
    for program in assemble(source).unwrap() {
        session.register(program);
    }
    let outcome = session.run("MAIN", Vec::new()).unwrap();
    assert_eq!(outcome.result, Some(Value::from(36)));

    let joined = session.join_threads();
    assert_eq!(joined.len(), 1);
    assert!(joined[0].1.is_ok());
    assert_eq!(session.services().root.get("TOTAL"), Some(Value::from(21)));
}

#[test]
fn test_json_bundle_runs() {
    let programs = assemble(".PROGRAM MAIN\n PUSHI 2\n PUSHI 10\n POW\n RETURN 1\n").unwrap();
    let json = ProgramFile::from_programs(&programs).to_json().unwrap();

    let (mut session, _) = session_with(VmConfig::default());
    for program in ProgramFile::parse(&json).unwrap().into_programs() {
        session.register(program);
    }
    let outcome = session.run("MAIN", Vec::new()).unwrap();
    assert_eq!(outcome.result, Some(Value::from(1024)));
}

#[test]
fn test_sandbox_denies_privileged_opcodes() {
    let (result, _) = run_with(VmConfig::sandboxed(), ".PROGRAM MAIN\n PUSHS \"x\"\n LOG \"INFO\"\n");
    let err = result.unwrap_err();
    assert!(err.is(ErrorKind::Sandbox));
    assert_eq!(err.param.as_deref(), Some("LOGGING"));

    let (result, _) = run_with(VmConfig::sandboxed(), ".PROGRAM MAIN\n PUSHS \"a\"\n LOCK\n");
    result.unwrap();
}

#[test]
fn test_program_arguments_and_count() {
    let (mut session, _) = session_with(VmConfig::default());
    for program in assemble(".PROGRAM MAIN\n ARGC\n ARG 2\n MKARRAY 2\n RETURN 1\n").unwrap() {
        session.register(program);
    }
    let outcome = session
        .run("MAIN", vec![Value::from("a"), Value::from("b")])
        .unwrap();
    assert_eq!(
        outcome.result,
        Some(Value::array(vec![Value::from(2), Value::from("b")]))
    );
}

#[test]
fn test_result_binding_is_consumed_by_caller() {
    let (result, _) = run(r#"
        .PROGRAM MAIN
            MKARRAY 0
            CALL "ANSWER"
            DEFINED "ARG$RESULT"
            RESULT
            DEFINED "ARG$RESULT"
            MKARRAY 3
            RETURN 1
        .PROGRAM ANSWER
            PUSHI 42
            RETURN 1
    "#);
    assert_eq!(
        result.unwrap().result,
        Some(Value::array(vec![Value::from(true), Value::from(42), Value::from(false)]))
    );
}

#[test]
fn test_oversized_operands_are_trappable_errors() {
    let (result, _) = run(r#"
        .PROGRAM MAIN
            ONERROR "HANDLER"
            PUSHI 9223372036854775807
            DIM "A"
        HANDLER:
            LOAD "SYS$STATUS"
            MEMBER "CODE"
            RETURN 1
    "#);
    assert_eq!(result.unwrap().result, Some(Value::from("ARRAYBOUNDS")));

    let (result, _) = run(".PROGRAM MAIN\n PUSHS \"ab\"\n PUSHI 9223372036854775807\n REPEAT\n");
    assert!(result.unwrap_err().is(ErrorKind::InvalidValue));

    let (result, _) = run(".PROGRAM MAIN\n PUSHI 1\n PUSHI 9223372036854775807\n STOREIDX \"A\"\n");
    assert!(result.unwrap_err().is(ErrorKind::ArrayBounds));
}

#[test]
fn test_trap_discards_loop_frames_of_failed_region() {
    let (result, output) = run(r#"
        .PROGRAM MAIN
            ONERROR "HANDLER"
            PUSHI 1
            PUSHI 3
            PUSHI 1
            FOR "I"
            LOAD "I"
            PRINT
            LOAD "I"
            PUSHI 2
            EQ
            BRF "SKIP"
            RAISE "USER"
        SKIP:
            NEXT "I"
            END
        HANDLER:
            NEXT "I"
    "#);
    assert_eq!(output, "12");
    assert!(result.unwrap_err().is(ErrorKind::ForIndex));
}

#[test]
fn test_trap_discards_gosub_frames_of_failed_region() {
    let (result, output) = run(r#"
        .PROGRAM MAIN
            ONERROR "HANDLER"
            GOSUB "WORK"
            PUSHS "returned"
            PRINT
            END
        WORK:
            RAISE "USER"
            RETGOSUB
        HANDLER:
            RETGOSUB
    "#);
    assert_eq!(output, "");
    assert!(result.unwrap_err().is(ErrorKind::ReturnWithoutGosub));
}
