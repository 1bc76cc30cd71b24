// String opcodes
// Positions are 1-based and count characters, not bytes

use regex::Regex;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::coerce::parse_number;
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::value::Value;

fn invalid(message: impl Into<String>) -> VmError {
    VmError::with_param(ErrorKind::InvalidValue, message)
}

/// Pop a character count, rejecting negatives
fn pop_count(ctx: &mut InstructionContext<'_>) -> VmResult<usize> {
    let n = ctx.pop_i64()?;
    usize::try_from(n).map_err(|_| invalid(format!("count {}", n)))
}

pub fn left(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = pop_count(ctx)?;
    let text = ctx.pop_string()?;
    ctx.push(text.chars().take(n).collect::<String>());
    Ok(Flow::Next)
}

pub fn right(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = pop_count(ctx)?;
    let text = ctx.pop_string()?;
    let len = text.chars().count();
    ctx.push(text.chars().skip(len.saturating_sub(n)).collect::<String>());
    Ok(Flow::Next)
}

pub fn mid(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let len = pop_count(ctx)?;
    let start = ctx.pop_i64()?;
    let text = ctx.pop_string()?;
    if start < 1 {
        return Err(invalid(format!("start {}", start)));
    }
    let slice: String = text.chars().skip((start - 1) as usize).take(len).collect();
    ctx.push(slice);
    Ok(Flow::Next)
}

pub fn upper(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let text = ctx.pop_string()?;
    ctx.push(text.to_uppercase());
    Ok(Flow::Next)
}

pub fn lower(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let text = ctx.pop_string()?;
    ctx.push(text.to_lowercase());
    Ok(Flow::Next)
}

pub fn trim(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let text = ctx.pop_string()?;
    ctx.push(text.trim());
    Ok(Flow::Next)
}

/// Character position of the first match, 0 when absent
pub fn instr(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let find = ctx.pop_string()?;
    let text = ctx.pop_string()?;
    let position = text
        .find(&find)
        .map(|byte| text[..byte].chars().count() as i64 + 1)
        .unwrap_or(0);
    ctx.push(position);
    Ok(Flow::Next)
}

pub fn chr(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let code = ctx.pop_i64()?;
    let c = u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| invalid(format!("character code {}", code)))?;
    ctx.push(c.to_string());
    Ok(Flow::Next)
}

pub fn asc(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let text = ctx.pop_string()?;
    let c = text
        .chars()
        .next()
        .ok_or_else(|| invalid("empty string"))?;
    ctx.push(c as i64);
    Ok(Flow::Next)
}

pub fn to_text(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let text = ctx.pop_string()?;
    ctx.push(text);
    Ok(Flow::Next)
}

/// Numeric value of text; text that is not a number reads as 0
pub fn val(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let value = match ctx.pop()? {
        Value::String(text) => parse_number(&text).unwrap_or(Value::Integer(0)),
        number if number.kind().is_numeric() => number,
        other => Value::Integer(other.to_i64()?),
    };
    ctx.push(value);
    Ok(Flow::Next)
}

pub fn repeat(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = pop_count(ctx)?;
    let text = ctx.pop_string()?;
    let limit = ctx.session.config().max_elements;
    if text.chars().count().checked_mul(n).map_or(true, |len| len > limit) {
        return Err(invalid(format!("REPEAT of {} characters {} times", text.chars().count(), n)));
    }
    ctx.push(text.repeat(n));
    Ok(Flow::Next)
}

pub fn replace(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let new = ctx.pop_string()?;
    let old = ctx.pop_string()?;
    let text = ctx.pop_string()?;
    let replaced = if old.is_empty() {
        text
    } else {
        text.replace(&old, &new)
    };
    ctx.push(replaced);
    Ok(Flow::Next)
}

pub fn matches(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let pattern = ctx.pop_string()?;
    let text = ctx.pop_string()?;
    let regex = Regex::new(&pattern).map_err(|err| invalid(err.to_string()))?;
    ctx.push(regex.is_match(&text));
    Ok(Flow::Next)
}

/// An empty delimiter splits into characters
pub fn split(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let delimiter = ctx.pop_string()?;
    let text = ctx.pop_string()?;
    let parts: Vec<Value> = if delimiter.is_empty() {
        text.chars().map(|c| Value::from(c.to_string())).collect()
    } else {
        text.split(delimiter.as_str()).map(Value::from).collect()
    };
    ctx.push(Value::array(parts));
    Ok(Flow::Next)
}

pub fn join(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let delimiter = ctx.pop_string()?;
    let items = ctx.pop()?;
    let items = items.as_array().ok_or_else(|| {
        VmError::type_mismatch(format!("cannot join {}", items.type_name()))
    })?;
    let joined = items
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(&delimiter);
    ctx.push(joined);
    Ok(Flow::Next)
}

pub fn hex(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = ctx.pop_i64()?;
    ctx.push(format!("{:X}", n));
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Instruction, OpCode};
    use crate::ops::testing::step;
    use crate::vm::frame::ExecState;

    fn apply(handler: crate::ops::Handler, args: Vec<Value>) -> VmResult<Value> {
        let mut state = ExecState::new();
        for arg in args {
            state.push(arg);
        }
        step(handler, Instruction::new(OpCode::Noop), &mut state)?;
        state.pop()
    }

    #[test]
    fn test_substrings_count_characters() {
        let text = Value::from("héllo");
        assert_eq!(apply(left, vec![text.clone(), Value::from(2)]).unwrap(), Value::from("hé"));
        assert_eq!(apply(right, vec![text.clone(), Value::from(3)]).unwrap(), Value::from("llo"));
        assert_eq!(
            apply(mid, vec![text.clone(), Value::from(2), Value::from(3)]).unwrap(),
            Value::from("éll")
        );
        assert_eq!(apply(instr, vec![text, Value::from("l")]).unwrap(), Value::from(3));
    }

    #[test]
    fn test_split_and_join() {
        let parts = apply(split, vec![Value::from("a,b,c"), Value::from(",")]).unwrap();
        assert_eq!(parts.length().unwrap(), 3);
        let joined = apply(join, vec![parts, Value::from("-")]).unwrap();
        assert_eq!(joined, Value::from("a-b-c"));
    }

    #[test]
    fn test_matches_and_bad_pattern() {
        let hit = apply(matches, vec![Value::from("abc123"), Value::from(r"^[a-z]+\d+$")]).unwrap();
        assert_eq!(hit, Value::from(true));
        let err = apply(matches, vec![Value::from("x"), Value::from("(")]).unwrap_err();
        assert!(err.is(ErrorKind::InvalidValue));
    }

    #[test]
    fn test_val_and_chr() {
        assert_eq!(apply(val, vec![Value::from(" 2.5 ")]).unwrap(), Value::from(2.5));
        assert_eq!(apply(val, vec![Value::from("abc")]).unwrap(), Value::from(0));
        assert_eq!(apply(chr, vec![Value::from(65)]).unwrap(), Value::from("A"));
        assert_eq!(apply(hex, vec![Value::from(255)]).unwrap(), Value::from("FF"));
    }

    #[test]
    fn test_repeat_beyond_element_limit() {
        assert_eq!(apply(repeat, vec![Value::from("ab"), Value::from(3)]).unwrap(), Value::from("ababab"));
        let err = apply(repeat, vec![Value::from("ab"), Value::from(i64::MAX)]).unwrap_err();
        assert!(err.is(ErrorKind::InvalidValue));
        let err = apply(repeat, vec![Value::from("ab"), Value::from(-1)]).unwrap_err();
        assert!(err.is(ErrorKind::InvalidValue));
    }
}
