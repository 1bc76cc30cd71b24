// JBasic Programs
// Named, linked streams plus the JSON program-file format

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::instruction::Instruction;
use super::stream::ByteCode;
use crate::vm::interner::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProgramKind {
    #[default]
    Program,
    Function,
    Verb,
}

impl ProgramKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProgramKind::Program => "PROGRAM",
            ProgramKind::Function => "FUNCTION",
            ProgramKind::Verb => "VERB",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    pub name: Arc<str>,
    pub kind: ProgramKind,
    /// Invocations re-root their table at the session global table
    pub locally_scoped: bool,
    /// STORE, ARG and INPUT coerce by name suffix
    pub static_types: bool,
    pub code: ByteCode,
}

impl Program {
    /// Build and link a program
    pub fn new(name: &str, kind: ProgramKind, instructions: Vec<Instruction>) -> Self {
        let mut code = ByteCode::from_instructions(instructions);
        code.link();
        Self {
            name: normalize(name),
            kind,
            locally_scoped: false,
            static_types: false,
            code,
        }
    }

    pub fn locally_scoped(mut self, flag: bool) -> Self {
        self.locally_scoped = flag;
        self
    }

    pub fn static_types(mut self, flag: bool) -> Self {
        self.static_types = flag;
        self
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid program file: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Asm(#[from] super::asm::AsmError),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgramEntry {
    pub name: String,
    #[serde(default)]
    pub kind: ProgramKind,
    #[serde(default)]
    pub locally_scoped: bool,
    #[serde(default)]
    pub static_types: bool,
    pub code: Vec<Instruction>,
}

/// On-disk program bundle
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProgramFile {
    /// Program to run when none is named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    pub programs: Vec<ProgramEntry>,
}

impl ProgramFile {
    pub fn parse(text: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, LoadError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_programs(programs: &[Program]) -> Self {
        Self {
            main: programs.first().map(|program| program.name.to_string()),
            programs: programs
                .iter()
                .map(|program| ProgramEntry {
                    name: program.name.to_string(),
                    kind: program.kind,
                    locally_scoped: program.locally_scoped,
                    static_types: program.static_types,
                    code: program.code.instructions().to_vec(),
                })
                .collect(),
        }
    }

    /// Link every entry into a runnable program
    pub fn into_programs(self) -> Vec<Program> {
        self.programs
            .into_iter()
            .map(|entry| {
                Program::new(&entry.name, entry.kind, entry.code)
                    .locally_scoped(entry.locally_scoped)
                    .static_types(entry.static_types)
            })
            .collect()
    }
}

/// Load a `.json` bundle or a `.jbc` assembler listing.
/// Returns the programs and the name of the main program.
pub fn load_file(path: &Path) -> Result<(Vec<Program>, Option<String>), LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
        let file = ProgramFile::parse(&text)?;
        let main = file.main.clone();
        let programs = file.into_programs();
        let main = main.or_else(|| programs.first().map(|program| program.name.to_string()));
        Ok((programs, main))
    } else {
        let programs = super::asm::assemble(&text)?;
        let main = programs.first().map(|program| program.name.to_string());
        Ok((programs, main))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::opcode::OpCode;

    #[test]
    fn test_bundle_relinks_on_load() {
        let program = Program::new(
            "main",
            ProgramKind::Program,
            vec![
                Instruction::new(OpCode::Goto).with_str("skip"),
                Instruction::new(OpCode::PushI).with_int(1),
                Instruction::new(OpCode::Label).with_str("skip"),
                Instruction::new(OpCode::Goto).with_int(-1),
            ],
        );
        assert!(program.code.get(3).unwrap().is_branch());

        let json = ProgramFile::from_programs(&[program]).to_json().unwrap();
        let programs = ProgramFile::parse(&json).unwrap().into_programs();
        let code = &programs[0].code;
        assert_eq!(programs[0].name.as_ref(), "MAIN");
        assert_eq!(code.get(0).unwrap().int, Some(2));
        assert_eq!(code.get(3).unwrap().int, Some(0));
    }

    #[test]
    fn test_defaults() {
        let file = ProgramFile::parse(
            r#"{"programs":[{"name":"f","kind":"FUNCTION","code":[{"op":"RETURN"}]}]}"#,
        )
        .unwrap();
        let programs = file.into_programs();
        assert_eq!(programs[0].kind, ProgramKind::Function);
        assert!(!programs[0].locally_scoped);
    }
}
