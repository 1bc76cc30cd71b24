// JBasic Execution Core
// A stack-based bytecode VM for a BASIC-family language

pub mod bytecode;
pub mod config;
pub mod error;
pub mod ops;
pub mod vm;

pub use bytecode::{assemble, load_file, Instruction, OpCode, Program, ProgramKind};
pub use config::VmConfig;
pub use error::{ErrorKind, Fault, VmError, VmResult};
pub use vm::{RunOutcome, Services, Session, Value};
