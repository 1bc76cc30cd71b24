// JBasic Error Handling
// Status codes, internal faults and the structured error carried out of the engine

use colored::*;
use std::fmt;
use thiserror::Error;

/// Language runtime status codes.
///
/// These are the errors a running program can observe and trap with
/// `ONERROR`. Control transfer (RETURN, QUIT) never travels as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TypeMismatch,
    UnknownVariable,
    UnknownLabel,
    UnknownLine,
    UnknownProgram,
    UnknownFunction,
    UnknownClass,
    ArrayBounds,
    NoMember,
    NoActiveProgram,
    Sandbox,
    ReadOnly,
    ForIndex,
    DivideByZero,
    InvalidRecord,
    ArgumentCount,
    NoResult,
    InvalidScope,
    InvalidValue,
    ReturnWithoutGosub,
    CallDepth,
    FileError,
    EndOfFile,
    LockHeld,
    NotLocked,
    User,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 26] = [
        ErrorKind::TypeMismatch,
        ErrorKind::UnknownVariable,
        ErrorKind::UnknownLabel,
        ErrorKind::UnknownLine,
        ErrorKind::UnknownProgram,
        ErrorKind::UnknownFunction,
        ErrorKind::UnknownClass,
        ErrorKind::ArrayBounds,
        ErrorKind::NoMember,
        ErrorKind::NoActiveProgram,
        ErrorKind::Sandbox,
        ErrorKind::ReadOnly,
        ErrorKind::ForIndex,
        ErrorKind::DivideByZero,
        ErrorKind::InvalidRecord,
        ErrorKind::ArgumentCount,
        ErrorKind::NoResult,
        ErrorKind::InvalidScope,
        ErrorKind::InvalidValue,
        ErrorKind::ReturnWithoutGosub,
        ErrorKind::CallDepth,
        ErrorKind::FileError,
        ErrorKind::EndOfFile,
        ErrorKind::LockHeld,
        ErrorKind::NotLocked,
        ErrorKind::User,
    ];

    /// Status code as seen by programs (`SYS$STATUS.CODE`, `RAISE`)
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::TypeMismatch => "TYPEMISMATCH",
            ErrorKind::UnknownVariable => "UNKVAR",
            ErrorKind::UnknownLabel => "UNKLABEL",
            ErrorKind::UnknownLine => "UNKLINE",
            ErrorKind::UnknownProgram => "UNKPGM",
            ErrorKind::UnknownFunction => "UNKFUNC",
            ErrorKind::UnknownClass => "UNKCLASS",
            ErrorKind::ArrayBounds => "ARRAYBOUNDS",
            ErrorKind::NoMember => "NOMEMBER",
            ErrorKind::NoActiveProgram => "NOACTIVEPGM",
            ErrorKind::Sandbox => "SANDBOX",
            ErrorKind::ReadOnly => "READONLY",
            ErrorKind::ForIndex => "FORINDEX",
            ErrorKind::DivideByZero => "DIVZERO",
            ErrorKind::InvalidRecord => "INVRECDEF",
            ErrorKind::ArgumentCount => "ARGCOUNT",
            ErrorKind::NoResult => "NORESULT",
            ErrorKind::InvalidScope => "INVSCOPE",
            ErrorKind::InvalidValue => "INVVALUE",
            ErrorKind::ReturnWithoutGosub => "NOGOSUB",
            ErrorKind::CallDepth => "CALLDEPTH",
            ErrorKind::FileError => "FILE",
            ErrorKind::EndOfFile => "EOF",
            ErrorKind::LockHeld => "LOCKHELD",
            ErrorKind::NotLocked => "NOTLOCKED",
            ErrorKind::User => "USER",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|kind| kind.code().eq_ignore_ascii_case(code))
            .copied()
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::UnknownVariable => "unknown variable",
            ErrorKind::UnknownLabel => "unknown label",
            ErrorKind::UnknownLine => "unknown line number",
            ErrorKind::UnknownProgram => "unknown program",
            ErrorKind::UnknownFunction => "unknown function",
            ErrorKind::UnknownClass => "unknown object class",
            ErrorKind::ArrayBounds => "array index out of bounds",
            ErrorKind::NoMember => "no such record member",
            ErrorKind::NoActiveProgram => "no active program",
            ErrorKind::Sandbox => "operation not permitted",
            ErrorKind::ReadOnly => "variable is read-only",
            ErrorKind::ForIndex => "mismatched loop index",
            ErrorKind::DivideByZero => "division by zero",
            ErrorKind::InvalidRecord => "invalid record definition",
            ErrorKind::ArgumentCount => "wrong number of arguments",
            ErrorKind::NoResult => "function did not return a value",
            ErrorKind::InvalidScope => "invalid scope",
            ErrorKind::InvalidValue => "invalid value",
            ErrorKind::ReturnWithoutGosub => "RETURN without GOSUB",
            ErrorKind::CallDepth => "call depth exceeded",
            ErrorKind::FileError => "file error",
            ErrorKind::EndOfFile => "end of file",
            ErrorKind::LockHeld => "lock held by another session",
            ErrorKind::NotLocked => "lock not held",
            ErrorKind::User => "user error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Integer,
    Double,
    String,
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandKind::Integer => write!(f, "integer"),
            OperandKind::Double => write!(f, "double"),
            OperandKind::String => write!(f, "string"),
        }
    }
}

/// Internal consistency faults.
///
/// A correctly linked stream never raises these; they are reported but
/// never trapped by the language's own error handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("evaluation stack underflow")]
    StackUnderflow,
    #[error("missing {0} operand")]
    MissingOperand(OperandKind),
    #[error("invalid opcode argument: {0}")]
    InvalidArgument(String),
    #[error("opcode requires a linked stream")]
    Unlinked,
    #[error("{0} value(s) left on the stack at statement boundary")]
    StackNotEmpty(usize),
    #[error("invalid opcode {0}")]
    InvalidOpcode(u16),
    #[error("branch target {0} is outside the stream")]
    BadAddress(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    Fault(Fault),
    Runtime(ErrorKind),
}

/// Where an error stopped execution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub program: String,
    pub pc: usize,
    pub line: Option<i64>,
}

/// A call frame for error traces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub program: String,
    pub pc: usize,
    pub line: Option<i64>,
}

impl StackFrame {
    pub fn new(program: impl Into<String>, pc: usize, line: Option<i64>) -> Self {
        Self {
            program: program.into(),
            pc,
            line,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "  at {} (line {}, pc {})", self.program, line, self.pc),
            None => write!(f, "  at {} (pc {})", self.program, self.pc),
        }
    }
}

/// Main error type for the VM
#[derive(Debug, Clone)]
pub struct VmError {
    pub class: ErrorClass,
    pub param: Option<String>,
    pub location: Option<Location>,
    pub stack_trace: Vec<StackFrame>,
}

impl VmError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            class: ErrorClass::Runtime(kind),
            param: None,
            location: None,
            stack_trace: Vec::new(),
        }
    }

    pub fn with_param(kind: ErrorKind, param: impl Into<String>) -> Self {
        let mut error = Self::new(kind);
        error.param = Some(param.into());
        error
    }

    pub fn fault(fault: Fault) -> Self {
        Self {
            class: ErrorClass::Fault(fault),
            param: None,
            location: None,
            stack_trace: Vec::new(),
        }
    }

    /// The runtime status, or `None` for internal faults
    pub fn kind(&self) -> Option<ErrorKind> {
        match self.class {
            ErrorClass::Runtime(kind) => Some(kind),
            ErrorClass::Fault(_) => None,
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == Some(kind)
    }

    pub fn is_fault(&self) -> bool {
        matches!(self.class, ErrorClass::Fault(_))
    }

    pub fn as_fault(&self) -> Option<&Fault> {
        match &self.class {
            ErrorClass::Fault(fault) => Some(fault),
            ErrorClass::Runtime(_) => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match &self.class {
            ErrorClass::Runtime(kind) => kind.code(),
            ErrorClass::Fault(_) => "FAULT",
        }
    }

    /// Record the failing instruction. The innermost location wins.
    pub fn at(mut self, program: &str, pc: usize, line: Option<i64>) -> Self {
        if self.location.is_none() {
            self.location = Some(Location {
                program: program.to_string(),
                pc,
                line,
            });
        }
        self
    }

    pub fn push_frame(&mut self, frame: StackFrame) {
        self.stack_trace.push(frame);
    }

    fn message(&self) -> String {
        let base = match &self.class {
            ErrorClass::Runtime(kind) => kind.description().to_string(),
            ErrorClass::Fault(fault) => format!("internal fault: {}", fault),
        };
        match &self.param {
            Some(param) => format!("{}: {}", base, param),
            None => base,
        }
    }

    /// Format the error for the terminal
    pub fn format(&self) -> String {
        let mut output = String::new();

        let header = format!(
            "{}: {}",
            self.code().red().bold(),
            self.message().white().bold()
        );
        output.push_str(&header);

        if let Some(location) = &self.location {
            let place = match location.line {
                Some(line) => format!(" in {} at line {} (pc {})", location.program, line, location.pc),
                None => format!(" in {} (pc {})", location.program, location.pc),
            };
            output.push_str(&place.dimmed().to_string());
        }
        output.push('\n');

        if !self.stack_trace.is_empty() {
            output.push_str(&format!("\n{}:\n", "Call stack".yellow().bold()));
            for frame in &self.stack_trace {
                output.push_str(&format!("{}\n", frame));
            }
        }

        output
    }

    pub fn type_mismatch(param: impl Into<String>) -> Self {
        Self::with_param(ErrorKind::TypeMismatch, param)
    }

    pub fn unknown_variable(name: &str) -> Self {
        Self::with_param(ErrorKind::UnknownVariable, name)
    }

    pub fn array_bounds(index: i64) -> Self {
        Self::with_param(ErrorKind::ArrayBounds, index.to_string())
    }

    pub fn no_member(name: &str) -> Self {
        Self::with_param(ErrorKind::NoMember, name)
    }

    pub fn read_only(name: &str) -> Self {
        Self::with_param(ErrorKind::ReadOnly, name)
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())?;
        if let Some(location) = &self.location {
            write!(f, " in {} (pc {})", location.program, location.pc)?;
        }
        Ok(())
    }
}

impl std::error::Error for VmError {}

impl From<Fault> for VmError {
    fn from(fault: Fault) -> Self {
        Self::fault(fault)
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_lookup() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code("typemismatch"), Some(ErrorKind::TypeMismatch));
        assert_eq!(ErrorKind::from_code("NOPE"), None);
    }

    #[test]
    fn test_innermost_location_wins() {
        let error = VmError::new(ErrorKind::ArrayBounds)
            .at("INNER", 3, Some(20))
            .at("OUTER", 9, None);
        let location = error.location.unwrap();
        assert_eq!(location.program, "INNER");
        assert_eq!(location.pc, 3);
    }

    #[test]
    fn test_fault_is_not_a_runtime_status() {
        let error: VmError = Fault::StackUnderflow.into();
        assert!(error.is_fault());
        assert_eq!(error.kind(), None);
        assert_eq!(error.code(), "FAULT");
        assert!(error.to_string().contains("stack underflow"));
    }
}
