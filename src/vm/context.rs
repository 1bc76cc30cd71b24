// JBasic Instruction Context
// Everything one handler invocation may touch

use std::sync::Arc;

use crate::bytecode::{ByteCode, Instruction, OpCode, Program};
use crate::error::{ErrorKind, Fault, OperandKind, VmError, VmResult};
use crate::vm::engine::Engine;
use crate::vm::frame::{ArgList, ExecState};
use crate::vm::session::{Permission, Session};
use crate::vm::symbols::Scope;
use crate::vm::value::{Value, ValueKind};

/// What the engine does after a handler returns
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Continue with the next instruction
    Next,
    /// Continue at an address of the current stream
    Jump(usize),
    /// Leave the invocation normally, optionally with a value
    Return(Option<Value>),
    /// Stop the invocation
    End,
    /// Stop every invocation up to the driver with a status
    Quit(i64),
}

pub struct InstructionContext<'a> {
    pub instruction: &'a Instruction,
    pub op: OpCode,
    /// Decoded from the branch-capable id range
    pub branch: bool,
    pub program: &'a Arc<Program>,
    pub state: &'a mut ExecState,
    pub symbols: &'a Scope,
    pub session: &'a mut Session,
    pub engine: &'a Engine,
}

impl<'a> InstructionContext<'a> {
    pub fn code(&self) -> &ByteCode {
        &self.program.code
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.state.push(value.into());
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.state.pop()
    }

    pub fn pop_n(&mut self, n: usize) -> VmResult<ArgList> {
        self.state.pop_n(n)
    }

    pub fn pop_i64(&mut self) -> VmResult<i64> {
        self.pop()?.to_i64()
    }

    pub fn pop_f64(&mut self) -> VmResult<f64> {
        self.pop()?.to_f64()
    }

    pub fn pop_bool(&mut self) -> VmResult<bool> {
        self.pop()?.to_bool()
    }

    /// Pop any value and use its text form
    pub fn pop_string(&mut self) -> VmResult<String> {
        Ok(self.pop()?.to_string())
    }

    pub fn int(&self) -> VmResult<i64> {
        self.instruction
            .int
            .ok_or_else(|| Fault::MissingOperand(OperandKind::Integer).into())
    }

    pub fn opt_int(&self) -> Option<i64> {
        self.instruction.int
    }

    pub fn dbl(&self) -> VmResult<f64> {
        self.instruction
            .dbl
            .ok_or_else(|| Fault::MissingOperand(OperandKind::Double).into())
    }

    /// The string operand: a variable, label or program name
    pub fn name(&self) -> VmResult<Arc<str>> {
        self.instruction
            .str
            .clone()
            .ok_or_else(|| Fault::MissingOperand(OperandKind::String).into())
    }

    pub fn opt_str(&self) -> Option<&str> {
        self.instruction.str.as_deref()
    }

    /// Operand count for opcodes that take it from the instruction
    pub fn count(&self) -> VmResult<usize> {
        let n = self.int()?;
        usize::try_from(n).map_err(|_| Fault::InvalidArgument(format!("count {}", n)).into())
    }

    /// Resolved target of a branch-capable instruction
    pub fn target(&self) -> VmResult<usize> {
        if self.branch {
            let address = self.int()?;
            return usize::try_from(address)
                .map_err(|_| Fault::InvalidArgument(format!("address {}", address)).into());
        }
        if !self.code().is_linked() {
            return Err(Fault::Unlinked.into());
        }
        Err(self.unresolved())
    }

    /// Error for a plain-form target the linker could not resolve
    fn unresolved(&self) -> VmError {
        match (self.op, &self.instruction.str, self.instruction.int) {
            (OpCode::CallL, Some(name), _) => {
                VmError::with_param(ErrorKind::UnknownFunction, name.to_string())
            }
            (OpCode::For | OpCode::ForEach | OpCode::Leave, _, _) => {
                Fault::InvalidArgument(format!("{} has no matching terminator", self.op)).into()
            }
            (_, Some(label), _) => VmError::with_param(ErrorKind::UnknownLabel, label.to_string()),
            (_, None, Some(line)) => VmError::with_param(ErrorKind::UnknownLine, line.to_string()),
            (_, None, None) => Fault::MissingOperand(OperandKind::Integer).into(),
        }
    }

    /// A size or 1-based position no larger than the configured element limit
    pub fn bounded(&self, n: i64) -> VmResult<usize> {
        let limit = self.session.config().max_elements;
        usize::try_from(n)
            .ok()
            .filter(|&n| n <= limit)
            .ok_or_else(|| VmError::array_bounds(n))
    }

    pub fn require(&self, permission: Permission) -> VmResult<()> {
        self.session.require(permission)
    }

    /// Apply suffix typing when the invocation runs with static types
    pub fn typed(&self, name: &str, value: Value) -> VmResult<Value> {
        if !self.state.static_types {
            return Ok(value);
        }
        match ValueKind::from_suffix(name) {
            Some(kind) if value.kind() != kind => value.coerced(kind).map_err(|_| {
                VmError::type_mismatch(format!(
                    "{} cannot hold {}",
                    name,
                    value.type_name()
                ))
            }),
            _ => Ok(value),
        }
    }

    /// Plain assignment honoring scope skip, static typing and the
    /// dynamic-symbol flag
    pub fn store(&mut self, name: &str, skip: i64, value: Value) -> VmResult<()> {
        let value = self.typed(name, value)?;
        let target = self.symbols.target(skip)?;
        if !self.state.dynamic_symbols && !target.is_defined(name) {
            return Err(VmError::unknown_variable(&name.to_uppercase()));
        }
        target.insert(name, value)
    }
}
