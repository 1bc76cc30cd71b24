// JBasic Bytecode
// Opcodes, instructions, linked streams and the program formats that produce them

pub mod asm;
pub mod instruction;
pub mod opcode;
pub mod program;
pub mod stream;

pub use asm::{assemble, AsmError};
pub use instruction::Instruction;
pub use opcode::{OpCode, BRANCH_OFFSET};
pub use program::{load_file, LoadError, Program, ProgramFile, ProgramKind};
pub use stream::ByteCode;
