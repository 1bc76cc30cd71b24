// JBasic Assembler
// Text listings of bytecode, one instruction per line:
//
//   .PROGRAM MAIN          ; start a program (.FUNCTION and .VERB also work)
//   .LOCAL                 ; locally scoped invocations
//   .STATIC                ; suffix-driven static typing
//   loop:                  ; LABEL loop
//       PUSHI 1
//       STORE "X", -1

use thiserror::Error;

use super::instruction::Instruction;
use super::opcode::OpCode;
use super::program::{Program, ProgramKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("line {line}: unknown opcode '{name}'")]
    UnknownOpcode { line: usize, name: String },
    #[error("line {line}: unknown directive '{name}'")]
    UnknownDirective { line: usize, name: String },
    #[error("line {line}: {message}")]
    Operand { line: usize, message: String },
    #[error("line {line}: instruction outside of a program")]
    NoProgram { line: usize },
    #[error("line {line}: unterminated string")]
    Unterminated { line: usize },
}

#[derive(Debug, PartialEq)]
enum Token {
    Int(i64),
    Dbl(f64),
    Text(String),
}

fn tokenize(text: &str, line: usize) -> Result<Vec<Token>, AsmError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == ',' {
            chars.next();
            continue;
        }
        if c == ';' {
            break;
        }
        if c == '"' {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some(other) => value.push(other),
                        None => return Err(AsmError::Unterminated { line }),
                    },
                    Some(other) => value.push(other),
                    None => return Err(AsmError::Unterminated { line }),
                }
            }
            tokens.push(Token::Text(value));
            continue;
        }

        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == ',' || c == ';' {
                break;
            }
            word.push(c);
            chars.next();
        }
        tokens.push(classify(word));
    }
    Ok(tokens)
}

fn classify(word: String) -> Token {
    let numeric = word
        .trim_start_matches(['-', '+'])
        .starts_with(|c: char| c.is_ascii_digit() || c == '.');
    if numeric {
        if let Ok(n) = word.parse::<i64>() {
            return Token::Int(n);
        }
        if let Ok(n) = word.parse::<f64>() {
            return Token::Dbl(n);
        }
    }
    Token::Text(word)
}

fn operand_error(line: usize, op: OpCode, what: &str) -> AsmError {
    AsmError::Operand {
        line,
        message: format!("{} given more than one {} operand", op, what),
    }
}

fn instruction(op: OpCode, operands: Vec<Token>, line: usize) -> Result<Instruction, AsmError> {
    let mut instruction = Instruction::new(op);
    for token in operands {
        match token {
            Token::Int(n) if instruction.int.is_none() => instruction.int = Some(n),
            Token::Int(_) => return Err(operand_error(line, op, "integer")),
            Token::Dbl(n) if instruction.dbl.is_none() => instruction.dbl = Some(n),
            Token::Dbl(_) => return Err(operand_error(line, op, "double")),
            Token::Text(s) if instruction.str.is_none() => instruction = instruction.with_str(&s),
            Token::Text(_) => return Err(operand_error(line, op, "string")),
        }
    }
    Ok(instruction)
}

struct Pending {
    name: String,
    kind: ProgramKind,
    locally_scoped: bool,
    static_types: bool,
    code: Vec<Instruction>,
}

impl Pending {
    fn finish(self) -> Program {
        Program::new(&self.name, self.kind, self.code)
            .locally_scoped(self.locally_scoped)
            .static_types(self.static_types)
    }
}

/// Assemble a listing into linked programs, in declaration order
pub fn assemble(source: &str) -> Result<Vec<Program>, AsmError> {
    let mut programs = Vec::new();
    let mut current: Option<Pending> = None;

    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with(';') {
            continue;
        }

        if let Some(directive) = text.strip_prefix('.') {
            let mut parts = directive.split_whitespace();
            let name = parts.next().unwrap_or_default().to_uppercase();
            let kind = match name.as_str() {
                "PROGRAM" => Some(ProgramKind::Program),
                "FUNCTION" => Some(ProgramKind::Function),
                "VERB" => Some(ProgramKind::Verb),
                _ => None,
            };
            match (kind, name.as_str()) {
                (Some(kind), _) => {
                    let program_name = parts.next().ok_or_else(|| AsmError::Operand {
                        line,
                        message: format!(".{} needs a name", name),
                    })?;
                    if let Some(done) = current.take() {
                        programs.push(done.finish());
                    }
                    current = Some(Pending {
                        name: program_name.to_string(),
                        kind,
                        locally_scoped: false,
                        static_types: false,
                        code: Vec::new(),
                    });
                }
                (None, "LOCAL" | "STATIC") => {
                    let pending = current.as_mut().ok_or(AsmError::NoProgram { line })?;
                    if name == "LOCAL" {
                        pending.locally_scoped = true;
                    } else {
                        pending.static_types = true;
                    }
                }
                (None, _) => return Err(AsmError::UnknownDirective { line, name }),
            }
            continue;
        }

        let pending = current.as_mut().ok_or(AsmError::NoProgram { line })?;

        if let Some(label) = text.strip_suffix(':') {
            if !label.contains(char::is_whitespace) {
                pending
                    .code
                    .push(Instruction::new(OpCode::Label).with_str(label));
                continue;
            }
        }

        let (mnemonic, rest) = match text.find(char::is_whitespace) {
            Some(split) => (&text[..split], &text[split..]),
            None => (text, ""),
        };
        let op = OpCode::from_mnemonic(mnemonic).ok_or_else(|| AsmError::UnknownOpcode {
            line,
            name: mnemonic.to_string(),
        })?;
        let operands = tokenize(rest, line)?;
        pending.code.push(instruction(op, operands, line)?);
    }

    if let Some(done) = current.take() {
        programs.push(done.finish());
    }
    Ok(programs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_operands() {
        let programs = assemble(
            r#"
            .PROGRAM main
                PUSHI -3
                PUSHD 2.5
                PUSHS "a \"quoted\" word"   ; trailing comment
                PUSHDEC "1.50", 2
                STORE total$, -1
            "#,
        )
        .unwrap();
        let code = programs[0].code.instructions();
        assert_eq!(code[0], Instruction::new(OpCode::PushI).with_int(-3));
        assert_eq!(code[1], Instruction::new(OpCode::PushD).with_dbl(2.5));
        assert_eq!(code[2].str.as_deref(), Some("a \"quoted\" word"));
        assert_eq!(code[3].int, Some(2));
        assert_eq!(code[4].str.as_deref(), Some("TOTAL$"));
        assert_eq!(code[4].int, Some(-1));
    }

    #[test]
    fn test_programs_and_directives() {
        let programs = assemble(
            ".PROGRAM MAIN\n  CALL helper\n.FUNCTION helper\n.LOCAL\n.STATIC\n  RETURN\n",
        )
        .unwrap();
        assert_eq!(programs.len(), 2);
        assert_eq!(programs[1].name.as_ref(), "HELPER");
        assert_eq!(programs[1].kind, ProgramKind::Function);
        assert!(programs[1].locally_scoped);
        assert!(programs[1].static_types);
        assert!(!programs[0].locally_scoped);
    }

    #[test]
    fn test_labels_link() {
        let programs = assemble(".PROGRAM MAIN\n  GOTO done\n  PUSHI 1\ndone:\n  END\n").unwrap();
        let code = &programs[0].code;
        assert!(code.get(0).unwrap().is_branch());
        assert_eq!(code.get(0).unwrap().int, Some(2));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            assemble(".PROGRAM M\n  FROB 1\n").unwrap_err(),
            AsmError::UnknownOpcode {
                line: 2,
                name: "FROB".to_string()
            }
        );
        assert_eq!(assemble("  PUSHI 1\n").unwrap_err(), AsmError::NoProgram { line: 1 });
        assert!(matches!(
            assemble(".PROGRAM M\n  PUSHI 1 2\n").unwrap_err(),
            AsmError::Operand { line: 2, .. }
        ));
        assert_eq!(
            assemble(".PROGRAM M\n  PUSHS \"open\n").unwrap_err(),
            AsmError::Unterminated { line: 2 }
        );
    }
}
