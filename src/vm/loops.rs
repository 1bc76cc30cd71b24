// JBasic Loop Control
// Active FOR, DO and FOREACH frames of one invocation

use std::sync::Arc;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::Value;

#[derive(Debug, Clone)]
pub enum LoopKind {
    For { end: Value, increment: Value },
    Do,
    ForEach { items: Arc<Vec<Value>>, cursor: usize },
}

/// Saved state of one active loop
#[derive(Debug, Clone)]
pub struct LoopControlBlock {
    pub kind: LoopKind,
    /// Index variable, absent for DO
    pub index: Option<Arc<str>>,
    /// First instruction of the body
    pub resume: usize,
    /// Instruction after the terminator
    pub exit: usize,
}

impl LoopControlBlock {
    pub fn is_do(&self) -> bool {
        matches!(self.kind, LoopKind::Do)
    }

    fn matches_index(&self, name: &str) -> bool {
        self.index.as_deref() == Some(name)
    }
}

fn index_error(name: &str) -> VmError {
    VmError::with_param(ErrorKind::ForIndex, name.to_string())
}

#[derive(Debug, Default)]
pub struct LoopManager {
    frames: Vec<LoopControlBlock>,
}

impl LoopManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: LoopControlBlock) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<LoopControlBlock> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&LoopControlBlock> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Top frame for NEXT: a FOR or FOREACH frame bound to `name`
    pub fn indexed(&mut self, name: &str) -> VmResult<&mut LoopControlBlock> {
        match self.frames.last_mut() {
            Some(frame) if !frame.is_do() && frame.matches_index(name) => Ok(frame),
            _ => Err(index_error(name)),
        }
    }

    /// Top frame for LOOP: must be a DO frame
    pub fn do_frame(&mut self) -> VmResult<&mut LoopControlBlock> {
        match self.frames.last_mut() {
            Some(frame) if frame.is_do() => Ok(frame),
            Some(frame) => Err(index_error(frame.index.as_deref().unwrap_or("LOOP"))),
            None => Err(index_error("LOOP")),
        }
    }
}
