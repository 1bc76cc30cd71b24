// JBasic Execution Engine
// The fetch-decode-execute loop and the invocation protocol shared by
// RUN, CALL, CHAIN, THREAD and local function calls

use std::sync::Arc;
use tracing::{debug, trace};

use crate::bytecode::{OpCode, Program};
use crate::error::{Fault, StackFrame, VmError, VmResult};
use crate::ops::DispatchTable;
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::frame::ExecState;
use crate::vm::session::Session;
use crate::vm::symbols::Scope;
use crate::vm::value::{Record, Value};

/// How an invocation was started, visible to programs as `$MODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Run,
    Call,
    Function,
    Method,
    Chain,
    Thread,
}

impl CallMode {
    pub fn name(&self) -> &'static str {
        match self {
            CallMode::Run => "RUN",
            CallMode::Call => "CALL",
            CallMode::Function => "FUNCTION",
            CallMode::Method => "METHOD",
            CallMode::Chain => "CHAIN",
            CallMode::Thread => "THREAD",
        }
    }
}

/// How an invocation left its stream
#[derive(Debug, Clone, PartialEq)]
pub enum Exit {
    Return(Option<Value>),
    End,
    Quit(i64),
}

/// A finished invocation and the table it ran in
#[derive(Debug)]
pub struct Outcome {
    pub exit: Exit,
    pub symbols: Scope,
}

impl Outcome {
    /// The callee's ARG$RESULT, falling back to a RETURN value
    pub fn result(&self) -> Option<Value> {
        self.symbols.local_reference("ARG$RESULT").or_else(|| match &self.exit {
            Exit::Return(value) => value.clone(),
            _ => None,
        })
    }
}

/// Everything needed to start a stream
pub struct Invocation<'a> {
    pub program: &'a Arc<Program>,
    pub symbols: Scope,
    pub args: Vec<Value>,
    pub mode: CallMode,
    pub this: Option<Value>,
    pub parent: Arc<str>,
    /// First instruction, non-zero for local functions
    pub start: usize,
}

impl<'a> Invocation<'a> {
    pub fn new(program: &'a Arc<Program>, symbols: Scope, mode: CallMode) -> Self {
        Self {
            program,
            symbols,
            args: Vec::new(),
            mode,
            this: None,
            parent: Arc::from("CONSOLE"),
            start: 0,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_this(mut self, this: Value) -> Self {
        self.this = Some(this);
        self
    }

    pub fn with_parent(mut self, parent: Arc<str>) -> Self {
        self.parent = parent;
        self
    }

    pub fn starting_at(mut self, start: usize) -> Self {
        self.start = start;
        self
    }
}

/// Seconds since the Unix epoch with millisecond precision
pub fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// One engine per session thread
pub struct Engine {
    table: DispatchTable,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            table: DispatchTable::new(),
        }
    }

    /// Run one invocation to completion, bounded by the session call depth
    pub fn invoke(&self, session: &mut Session, call: Invocation<'_>) -> VmResult<Outcome> {
        session.enter()?;
        let result = self.run_invocation(session, &call);
        session.leave();
        result.map(|exit| Outcome {
            exit,
            symbols: call.symbols,
        })
    }

    fn run_invocation(&self, session: &mut Session, call: &Invocation<'_>) -> VmResult<Exit> {
        let program = call.program;
        let symbols = &call.symbols;

        if program.locally_scoped {
            symbols.set_scope(session.global());
        }
        symbols.insert_read_only("$ARGS", Value::array(call.args.clone()))?;
        symbols.insert_read_only("$THIS", Value::string(&program.name))?;
        symbols.insert_read_only("$PARENT", Value::String(call.parent.clone()))?;
        symbols.insert_read_only("$MODE", Value::string(call.mode.name()))?;
        symbols.insert_read_only("$START_TIME", Value::Double(epoch_seconds()))?;
        if let Some(this) = &call.this {
            symbols.insert_read_only("THIS", this.clone())?;
        }

        let mut state = ExecState::new();
        state.pc = call.start;
        state.locally_scoped = program.locally_scoped;
        state.static_types = program.static_types || session.config().static_types;
        state.dynamic_symbols = session.config().dynamic_symbols;

        debug!(
            program = %program.name,
            mode = call.mode.name(),
            depth = session.depth(),
            args = call.args.len(),
            "invoking"
        );

        self.execute(session, program, &mut state, symbols)
            .map_err(|mut err| {
                err.push_frame(StackFrame::new(&*program.name, state.pc, state.line));
                err
            })
    }

    /// The fetch-decode-execute loop. Running off the end of the stream is END.
    pub fn execute(
        &self,
        session: &mut Session,
        program: &Arc<Program>,
        state: &mut ExecState,
        symbols: &Scope,
    ) -> VmResult<Exit> {
        let code = &program.code;

        while state.running {
            let pc = state.pc;
            let Some(instruction) = code.get(pc) else {
                break;
            };
            state.pc += 1;

            let step = match OpCode::decode(instruction.code) {
                Some((op, branch)) => {
                    trace!(program = %program.name, pc, op = op.mnemonic(), depth = state.depth());
                    let handler = self.table.get(op);
                    let mut ctx = InstructionContext {
                        instruction,
                        op,
                        branch,
                        program,
                        state: &mut *state,
                        symbols,
                        session: &mut *session,
                        engine: self,
                    };
                    handler(&mut ctx)
                }
                None => Err(Fault::InvalidOpcode(instruction.code).into()),
            };

            let step = step.and_then(|flow| match flow {
                Flow::Jump(address) if address > code.len() => {
                    Err(Fault::BadAddress(address).into())
                }
                flow => Ok(flow),
            });

            match step {
                Ok(Flow::Next) => {}
                Ok(Flow::Jump(address)) => state.pc = address,
                Ok(Flow::Return(value)) => return Ok(Exit::Return(value)),
                Ok(Flow::End) => return Ok(Exit::End),
                Ok(Flow::Quit(status)) => return Ok(Exit::Quit(status)),
                Err(err) => {
                    let err = err.at(&program.name, pc, state.line);
                    match state.trap.take() {
                        Some(trap) if !err.is_fault() => {
                            debug!(program = %program.name, pc, code = err.code(), "trapped error");
                            Self::bind_status(symbols, &err)?;
                            state.unwind_to(&trap);
                            state.pc = trap.handler;
                        }
                        trap => {
                            state.trap = trap;
                            state.pc = pc;
                            return Err(err);
                        }
                    }
                }
            }
        }

        Ok(Exit::End)
    }

    /// SYS$STATUS as seen by an ONERROR handler
    fn bind_status(symbols: &Scope, err: &VmError) -> VmResult<()> {
        let location = err.location.clone().unwrap_or_default();
        let status = Record::new()
            .with("CODE", err.code())
            .with("PARM", err.param.clone().unwrap_or_default())
            .with("LINE", location.line.unwrap_or(0))
            .with("PROGRAM", location.program);
        symbols.insert_local("SYS$STATUS", Value::record(status))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
