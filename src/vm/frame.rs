// JBasic Execution State
// Per-invocation evaluation stack, program counter, registers and control stacks

use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ErrorKind, Fault, VmError, VmResult};
use crate::vm::loops::LoopManager;
use crate::vm::Value;

pub const REGISTER_COUNT: usize = 16;

/// Operands popped together; most opcodes take at most four
pub type ArgList = SmallVec<[Value; 4]>;

/// One pending GOSUB
#[derive(Debug, Clone)]
pub struct ScopeControlBlock {
    pub target: usize,
    pub return_address: usize,
    pub program: Arc<str>,
}

/// An armed ONERROR handler with the frame depths at the point it was armed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trap {
    pub handler: usize,
    loops: usize,
    gosubs: usize,
}

/// Mutable state of one invocation of a stream. Never shared between
/// invocations, so recursion and threads each get their own.
pub struct ExecState {
    stack: Vec<Value>,
    pub pc: usize,
    registers: [Value; REGISTER_COUNT],
    pub running: bool,
    /// STORE may create names that are not yet bound
    pub dynamic_symbols: bool,
    pub locally_scoped: bool,
    pub static_types: bool,
    loops: Option<LoopManager>,
    gosubs: Vec<ScopeControlBlock>,
    pub trap: Option<Trap>,
    pub line: Option<i64>,
    pub started: Instant,
}

impl ExecState {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(16),
            pc: 0,
            registers: std::array::from_fn(|_| Value::Integer(0)),
            running: true,
            dynamic_symbols: true,
            locally_scoped: false,
            static_types: false,
            loops: None,
            gosubs: Vec::new(),
            trap: None,
            line: None,
            started: Instant::now(),
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or_else(|| Fault::StackUnderflow.into())
    }

    /// Pop `n` values, returned in push order
    pub fn pop_n(&mut self, n: usize) -> VmResult<ArgList> {
        if n > self.stack.len() {
            return Err(Fault::StackUnderflow.into());
        }
        let at = self.stack.len() - n;
        Ok(self.stack.drain(at..).collect())
    }

    pub fn peek(&self) -> VmResult<&Value> {
        self.stack.last().ok_or_else(|| Fault::StackUnderflow.into())
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    fn register_index(index: i64) -> VmResult<usize> {
        usize::try_from(index)
            .ok()
            .filter(|&i| i < REGISTER_COUNT)
            .ok_or_else(|| Fault::InvalidArgument(format!("register {}", index)).into())
    }

    pub fn register(&self, index: i64) -> VmResult<Value> {
        Ok(self.registers[Self::register_index(index)?].clone())
    }

    pub fn set_register(&mut self, index: i64, value: Value) -> VmResult<()> {
        self.registers[Self::register_index(index)?] = value;
        Ok(())
    }

    /// The loop stack, created on first use
    pub fn loops(&mut self) -> &mut LoopManager {
        self.loops.get_or_insert_with(LoopManager::new)
    }

    pub fn has_loops(&self) -> bool {
        self.loops.as_ref().is_some_and(|loops| !loops.is_empty())
    }

    pub fn push_gosub(&mut self, frame: ScopeControlBlock) {
        self.gosubs.push(frame);
    }

    pub fn pop_gosub(&mut self) -> VmResult<ScopeControlBlock> {
        self.gosubs
            .pop()
            .ok_or_else(|| VmError::new(ErrorKind::ReturnWithoutGosub))
    }

    pub fn gosub_depth(&self) -> usize {
        self.gosubs.len()
    }

    pub fn loop_depth(&self) -> usize {
        self.loops.as_ref().map_or(0, LoopManager::depth)
    }

    /// Arm ONERROR at `handler`, remembering the current frame depths
    pub fn arm_trap(&mut self, handler: usize) {
        self.trap = Some(Trap {
            handler,
            loops: self.loop_depth(),
            gosubs: self.gosub_depth(),
        });
    }

    /// Discard the evaluation stack and every loop or GOSUB frame opened
    /// after `trap` was armed
    pub fn unwind_to(&mut self, trap: &Trap) {
        self.stack.clear();
        if let Some(loops) = &mut self.loops {
            loops.truncate(trap.loops);
        }
        self.gosubs.truncate(trap.gosubs);
    }
}

impl Default for ExecState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::loops::{LoopControlBlock, LoopKind};

    #[test]
    fn test_stack_underflow_is_a_fault() {
        let mut state = ExecState::new();
        assert!(state.pop().unwrap_err().is_fault());
        state.push(Value::from(1));
        state.push(Value::from(2));
        assert!(state.pop_n(3).unwrap_err().is_fault());
        assert_eq!(state.pop_n(2).unwrap().as_slice(), &[Value::from(1), Value::from(2)]);
    }

    #[test]
    fn test_unwind_drops_frames_opened_after_arming() {
        let mut state = ExecState::new();
        state.push_gosub(ScopeControlBlock {
            target: 1,
            return_address: 2,
            program: Arc::from("MAIN"),
        });
        state.arm_trap(9);
        let trap = state.trap.unwrap();
        state.push_gosub(ScopeControlBlock {
            target: 3,
            return_address: 4,
            program: Arc::from("MAIN"),
        });
        state.loops().push(LoopControlBlock {
            kind: LoopKind::Do,
            index: None,
            resume: 5,
            exit: 6,
        });
        state.push(Value::from(1));

        state.unwind_to(&trap);
        assert_eq!(trap.handler, 9);
        assert_eq!(state.depth(), 0);
        assert_eq!(state.gosub_depth(), 1);
        assert_eq!(state.loop_depth(), 0);
        assert_eq!(state.pop_gosub().unwrap().return_address, 2);
    }

    #[test]
    fn test_registers() {
        let mut state = ExecState::new();
        state.set_register(15, Value::from("r")).unwrap();
        assert_eq!(state.register(15).unwrap(), Value::from("r"));
        assert_eq!(state.register(0).unwrap(), Value::from(0));
        assert!(state.register(16).unwrap_err().is_fault());
        assert!(state.set_register(-1, Value::from(1)).unwrap_err().is_fault());
    }

    #[test]
    fn test_gosub_stack() {
        let mut state = ExecState::new();
        assert!(state.pop_gosub().unwrap_err().is(ErrorKind::ReturnWithoutGosub));
        state.push_gosub(ScopeControlBlock {
            target: 4,
            return_address: 2,
            program: Arc::from("MAIN"),
        });
        assert_eq!(state.pop_gosub().unwrap().return_address, 2);
        assert!(!state.has_loops());
        state.loops();
        assert!(!state.has_loops());
    }
}
