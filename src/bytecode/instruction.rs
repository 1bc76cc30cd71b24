// JBasic Instructions
// One opcode plus independently optional integer, double and string operands

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::opcode::OpCode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawInstruction", into = "RawInstruction")]
pub struct Instruction {
    pub code: u16,
    pub int: Option<i64>,
    pub dbl: Option<f64>,
    pub str: Option<Arc<str>>,
}

impl Instruction {
    pub fn new(op: OpCode) -> Self {
        Self {
            code: op.id(),
            int: None,
            dbl: None,
            str: None,
        }
    }

    pub fn with_int(mut self, n: i64) -> Self {
        self.int = Some(n);
        self
    }

    pub fn with_dbl(mut self, n: f64) -> Self {
        self.dbl = Some(n);
        self
    }

    pub fn with_str(mut self, s: &str) -> Self {
        self.str = Some(Arc::from(s));
        self
    }

    /// The opcode and whether this is its branch-capable form
    pub fn opcode(&self) -> Option<(OpCode, bool)> {
        OpCode::decode(self.code)
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.opcode(), Some((_, true)))
    }

    pub fn is(&self, op: OpCode) -> bool {
        matches!(self.opcode(), Some((code, _)) if code == op)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode() {
            Some((op, true)) => write!(f, "{:<12}", format!("{}*", op.mnemonic()))?,
            Some((op, false)) => write!(f, "{:<12}", op.mnemonic())?,
            None => write!(f, "{:<12}", format!("?{}", self.code))?,
        }
        if let Some(n) = self.int {
            write!(f, " {}", n)?;
        }
        if let Some(n) = self.dbl {
            write!(f, " {:?}", n)?;
        }
        if let Some(s) = &self.str {
            write!(f, " {:?}", s)?;
        }
        Ok(())
    }
}

/// Serialized shape: mnemonic plus whichever operands are present.
/// Branch forms serialize as their plain mnemonic with a biased address
/// (`-(addr+1)`) when no label names the target.
#[derive(Serialize, Deserialize)]
struct RawInstruction {
    op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    int: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dbl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    str: Option<String>,
}

impl TryFrom<RawInstruction> for Instruction {
    type Error = String;

    fn try_from(raw: RawInstruction) -> Result<Self, Self::Error> {
        let op = OpCode::from_mnemonic(&raw.op)
            .ok_or_else(|| format!("unknown opcode '{}'", raw.op))?;
        Ok(Self {
            code: op.id(),
            int: raw.int,
            dbl: raw.dbl,
            str: raw.str.as_deref().map(Arc::<str>::from),
        })
    }
}

impl From<Instruction> for RawInstruction {
    fn from(instruction: Instruction) -> Self {
        let (op, branch) = instruction
            .opcode()
            .unwrap_or((OpCode::Noop, false));
        Self {
            op: op.mnemonic().to_string(),
            int: match (branch, &instruction.str, instruction.int) {
                // the label or index name is enough to relink
                (true, Some(_), _) => None,
                (true, None, Some(addr)) => Some(-(addr + 1)),
                (_, _, int) => int,
            },
            dbl: instruction.dbl,
            str: instruction.str.map(|s| s.to_string()),
        }
    }
}
