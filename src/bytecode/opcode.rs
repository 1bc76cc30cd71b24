// JBasic Bytecode Instructions

/// Ids at or above this value are the branch-capable form of `id - BRANCH_OFFSET`,
/// carrying a resolved address in the integer operand.
pub const BRANCH_OFFSET: u16 = 1000;

macro_rules! opcodes {
    ($($name:ident => $mnemonic:literal),* $(,)?) => {
        /// Bytecode operation codes. Discriminants are dense, starting at zero.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum OpCode {
            $($name),*
        }

        impl OpCode {
            pub const ALL: &'static [OpCode] = &[$(OpCode::$name),*];

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(OpCode::$name => $mnemonic),*
                }
            }
        }
    };
}

opcodes! {
    // Stack and constants
    Noop => "NOOP",
    Stmt => "STMT",         // statement boundary, optional line number
    Label => "LABEL",       // branch target marker
    Entry => "ENTRY",       // local function entry marker
    PushI => "PUSHI",
    PushD => "PUSHD",
    PushS => "PUSHS",
    PushB => "PUSHB",
    PushDec => "PUSHDEC",   // decimal text, optional scale
    Dup => "DUP",
    Swap => "SWAP",
    Drop => "DROP",
    LoadR => "LOADR",       // push register
    StorR => "STORR",       // pop into register
    MkArray => "MKARRAY",
    MkRecord => "MKRECORD",
    MkTable => "MKTABLE",

    // Arithmetic and logic
    Add => "ADD",
    Sub => "SUB",
    Mul => "MUL",
    Div => "DIV",
    Mod => "MOD",
    Pow => "POW",
    Neg => "NEG",
    Eq => "EQ",
    Ne => "NE",
    Lt => "LT",
    Le => "LE",
    Gt => "GT",
    Ge => "GE",
    And => "AND",
    Or => "OR",
    Xor => "XOR",
    Not => "NOT",
    Incr => "INCR",

    // Variables
    Load => "LOAD",
    Store => "STORE",
    StoreL => "STOREL",
    Const => "CONST",
    ReadOnly => "READONLY",
    Common => "COMMON",
    Clear => "CLEAR",
    Forget => "FORGET",
    Defined => "DEFINED",
    Dim => "DIM",
    SetScope => "SETSCOPE",

    // Elements
    Index => "INDEX",
    Member => "MEMBER",
    StoreIdx => "STOREIDX",       // auto-extending element write
    UpdateIdx => "UPDATEIDX",     // plain element write
    StoreMember => "STOREMEMBER",
    Length => "LENGTH",
    Members => "MEMBERS",
    Sort => "SORT",
    SizeOf => "SIZEOF",
    Columns => "COLUMNS",

    // Types
    Cvt => "CVT",
    TypeOf => "TYPEOF",
    IsKind => "ISKIND",

    // Strings
    Left => "LEFT",
    Right => "RIGHT",
    Mid => "MID",
    Upper => "UPPER",
    Lower => "LOWER",
    Trim => "TRIM",
    Instr => "INSTR",
    Chr => "CHR",
    Asc => "ASC",
    Str => "STR",
    Val => "VAL",
    Repeat => "REPEAT",
    Replace => "REPLACE",
    Matches => "MATCHES",
    Split => "SPLIT",
    Join => "JOIN",               // string join, or table join with a column operand
    Hex => "HEX",

    // Math
    Abs => "ABS",
    Int => "INT",
    Sgn => "SGN",
    Sqrt => "SQRT",
    Exp => "EXP",
    Log => "LOG",                 // natural log, or logging with a level operand
    Sin => "SIN",
    Cos => "COS",
    Tan => "TAN",
    Atn => "ATN",
    Round => "ROUND",
    Min => "MIN",
    Max => "MAX",
    Rnd => "RND",
    Randomize => "RANDOMIZE",

    // Control flow
    Goto => "GOTO",
    Brt => "BRT",
    Brf => "BRF",
    OnGoto => "ONGOTO",
    OnGosub => "ONGOSUB",
    Gosub => "GOSUB",
    RetGosub => "RETGOSUB",
    End => "END",
    Return => "RETURN",
    Quit => "QUIT",
    OnError => "ONERROR",
    Raise => "RAISE",
    Sleep => "SLEEP",

    // Loops
    For => "FOR",
    Next => "NEXT",
    ForEach => "FOREACH",
    Do => "DO",
    Loop => "LOOP",
    Leave => "LEAVE",

    // Calls
    Call => "CALL",
    CallF => "CALLF",
    CallM => "CALLM",
    Run => "RUN",
    Chain => "CHAIN",
    CallL => "CALLL",
    Result => "RESULT",
    Arg => "ARG",
    ArgC => "ARGC",
    Invoke => "INVOKE",
    InvokeF => "INVOKEF",
    New => "NEW",

    // Console
    Print => "PRINT",
    PrintNl => "PRINTNL",
    Input => "INPUT",

    // Files
    Open => "OPEN",
    Close => "CLOSE",
    FPrint => "FPRINT",
    FInput => "FINPUT",
    FEof => "FEOF",
    Get => "GET",
    Put => "PUT",
    Seek => "SEEK",

    // Tables
    Where => "WHERE",

    // System
    System => "SYSTEM",
    Thread => "THREAD",
    Asm => "ASM",
    Lock => "LOCK",
    Unlock => "UNLOCK",
    Time => "TIME",
    Timestamp => "TIMESTAMP",
    Elapsed => "ELAPSED",
}

impl OpCode {
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_u16(id: u16) -> Option<OpCode> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn from_mnemonic(name: &str) -> Option<OpCode> {
        Self::ALL
            .iter()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(name))
            .copied()
    }

    /// Opcodes whose target the linker resolves to an address
    pub fn is_branch_capable(self) -> bool {
        matches!(
            self,
            OpCode::Goto
                | OpCode::Brt
                | OpCode::Brf
                | OpCode::Gosub
                | OpCode::OnError
                | OpCode::For
                | OpCode::ForEach
                | OpCode::Do
                | OpCode::Leave
                | OpCode::CallL
        )
    }

    pub fn branch_id(self) -> u16 {
        BRANCH_OFFSET + self.id()
    }

    /// Split a raw instruction code into its opcode and branch flag
    pub fn decode(code: u16) -> Option<(OpCode, bool)> {
        if code >= BRANCH_OFFSET {
            let op = Self::from_u16(code - BRANCH_OFFSET)?;
            op.is_branch_capable().then_some((op, true))
        } else {
            Self::from_u16(code).map(|op| (op, false))
        }
    }

    /// Loop openers tracked when the linker pairs terminators
    pub fn opens_loop(self) -> bool {
        matches!(self, OpCode::For | OpCode::ForEach | OpCode::Do)
    }

    pub fn closes_loop(self) -> bool {
        matches!(self, OpCode::Next | OpCode::Loop)
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_dense() {
        for (i, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(op.id() as usize, i);
            assert_eq!(OpCode::from_u16(op.id()), Some(*op));
        }
        assert!((OpCode::ALL.len() as u16) < BRANCH_OFFSET);
    }

    #[test]
    fn test_branch_decode() {
        assert_eq!(OpCode::decode(OpCode::Goto.branch_id()), Some((OpCode::Goto, true)));
        assert_eq!(OpCode::decode(OpCode::Goto.id()), Some((OpCode::Goto, false)));
        assert_eq!(OpCode::decode(OpCode::Add.branch_id()), None);
        assert_eq!(OpCode::decode(999), None);
    }

    #[test]
    fn test_mnemonics_are_unique() {
        for op in OpCode::ALL {
            assert_eq!(OpCode::from_mnemonic(op.mnemonic()), Some(*op));
        }
        assert_eq!(OpCode::from_mnemonic("pushi"), Some(OpCode::PushI));
    }
}
