// JBasic Bytecode Stream
// Immutable instruction array with its label, line and entry maps

use rustc_hash::FxHashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use super::instruction::Instruction;
use super::opcode::OpCode;
use crate::vm::interner::{fold, NamePool};

/// A linked (or linkable) instruction sequence
#[derive(Debug, Clone, Default)]
pub struct ByteCode {
    instructions: Vec<Instruction>,
    labels: FxHashMap<Arc<str>, usize>,
    lines: FxHashMap<i64, usize>,
    entries: FxHashMap<Arc<str>, usize>,
    linked: bool,
}

/// Decode a biased local-function address
pub fn unbias(target: i64) -> Option<usize> {
    (target < 0).then(|| (-(target + 1)) as usize)
}

pub fn bias(address: usize) -> i64 {
    -(address as i64) - 1
}

impl ByteCode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            ..Self::default()
        }
    }

    /// Append an instruction, returning its address
    pub fn push(&mut self, instruction: Instruction) -> usize {
        self.linked = false;
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(fold(name).as_ref()).copied()
    }

    pub fn line(&self, number: i64) -> Option<usize> {
        self.lines.get(&number).copied()
    }

    pub fn entry(&self, name: &str) -> Option<usize> {
        self.entries.get(fold(name).as_ref()).copied()
    }

    /// Source line of the statement containing `pc`
    pub fn line_at(&self, pc: usize) -> Option<i64> {
        self.instructions[..=pc.min(self.instructions.len().saturating_sub(1))]
            .iter()
            .rev()
            .find(|instruction| instruction.is(OpCode::Stmt))
            .and_then(|instruction| instruction.int)
    }

    /// Resolve labels, line numbers, local entries and loop exits.
    ///
    /// Resolvable targets are rewritten to the branch-capable form with the
    /// address in the integer operand. Unresolvable ones stay in plain form
    /// so execution reports them when reached.
    pub fn link(&mut self) {
        self.labels.clear();
        self.lines.clear();
        self.entries.clear();

        let mut names = NamePool::new();
        for (pc, instruction) in self.instructions.iter_mut().enumerate() {
            if let Some(s) = instruction.str.take() {
                instruction.str = Some(normalize_operand(instruction.code, s, &mut names));
            }
            match instruction.opcode() {
                Some((OpCode::Label, _)) => {
                    if let Some(name) = &instruction.str {
                        self.labels.insert(name.clone(), pc);
                    }
                }
                Some((OpCode::Entry, _)) => {
                    if let Some(name) = &instruction.str {
                        self.entries.insert(name.clone(), pc);
                    }
                }
                Some((OpCode::Stmt, _)) => {
                    if let Some(line) = instruction.int {
                        self.lines.entry(line).or_insert(pc);
                    }
                }
                _ => {}
            }
        }

        let mut resolved = 0;
        for pc in 0..self.instructions.len() {
            let Some((op, false)) = self.instructions[pc].opcode() else {
                continue;
            };
            if !op.is_branch_capable() {
                continue;
            }
            if let Some(address) = self.resolve(pc, op) {
                let instruction = &mut self.instructions[pc];
                instruction.code = op.branch_id();
                instruction.int = Some(address as i64);
                resolved += 1;
            }
        }

        self.linked = true;
        debug!(
            instructions = self.instructions.len(),
            labels = self.labels.len(),
            names = names.len(),
            branches = resolved,
            "linked stream"
        );
    }

    fn resolve(&self, pc: usize, op: OpCode) -> Option<usize> {
        let instruction = &self.instructions[pc];
        let address = match op {
            OpCode::For | OpCode::ForEach => self.matching_terminator(pc, true),
            OpCode::Leave => match instruction.int.and_then(unbias) {
                Some(address) => Some(address),
                None => self.matching_terminator(pc, false),
            },
            OpCode::CallL => match (&instruction.str, instruction.int) {
                (Some(name), _) => self.entry(name),
                (None, Some(n)) => unbias(n),
                _ => None,
            },
            _ => match (&instruction.str, instruction.int) {
                (Some(label), _) => self.label(label),
                (None, Some(n)) if n < 0 => unbias(n),
                (None, Some(line)) => self.line(line),
                (None, None) => None,
            },
        };
        address.filter(|&address| address <= self.instructions.len())
    }

    /// Address after the terminator closing the loop at `pc`.
    /// `opener` is true when `pc` itself opens the loop.
    fn matching_terminator(&self, pc: usize, opener: bool) -> Option<usize> {
        let mut depth = 0usize;
        for (offset, instruction) in self.instructions[pc + 1..].iter().enumerate() {
            let Some((op, _)) = instruction.opcode() else {
                continue;
            };
            if op.opens_loop() {
                depth += 1;
            } else if op.closes_loop() {
                if depth == 0 {
                    let terminator = pc + 1 + offset;
                    return (!opener || op == OpCode::Next).then_some(terminator + 1);
                }
                depth -= 1;
            }
        }
        None
    }

    /// Human-readable listing
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "--- {} ---", name);
        let _ = writeln!(
            out,
            "{} instructions, {}",
            self.instructions.len(),
            if self.linked { "linked" } else { "unlinked" }
        );
        for (pc, instruction) in self.instructions.iter().enumerate() {
            let _ = writeln!(out, "{:04}  {}", pc, instruction);
        }
        out
    }
}

/// Variable, label and program operands are case-insensitive; text literals are not
fn normalize_operand(code: u16, operand: Arc<str>, names: &mut NamePool) -> Arc<str> {
    match OpCode::decode(code) {
        Some((
            OpCode::PushS
            | OpCode::PushDec
            | OpCode::Raise
            | OpCode::Log
            | OpCode::MkTable
            | OpCode::Join
            | OpCode::Where,
            _,
        ))
        | None => operand,
        Some(_) => names.intern(&operand),
    }
}
