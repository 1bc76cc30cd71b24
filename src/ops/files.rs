// File opcodes
// Text and fixed-layout record I/O on session file handles. Every
// opcode here checks FILE_IO before touching the stack.

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::files::FileMode;
use crate::vm::layout::RecordLayout;
use crate::vm::session::Permission;
use crate::vm::value::Value;

fn permitted(ctx: &InstructionContext<'_>) -> VmResult<()> {
    ctx.require(Permission::FileIo)
}

/// ( path -- handle )
pub fn open(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    permitted(ctx)?;
    let code = ctx.int()?;
    let mode = FileMode::from_code(code)
        .ok_or_else(|| VmError::with_param(ErrorKind::InvalidValue, format!("file mode {}", code)))?;
    let path = ctx.pop_string()?;
    let handle = ctx.session.files.open(&path, mode)?;
    ctx.push(handle);
    Ok(Flow::Next)
}

pub fn close(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    permitted(ctx)?;
    let handle = ctx.pop_i64()?;
    ctx.session.files.close(handle)?;
    Ok(Flow::Next)
}

/// ( handle value -- ) writes one line
pub fn print(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    permitted(ctx)?;
    let value = ctx.pop()?;
    let handle = ctx.pop_i64()?;
    ctx.session.files.write_text(handle, &format!("{}\n", value))?;
    Ok(Flow::Next)
}

/// ( handle -- line )
pub fn input(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    permitted(ctx)?;
    let handle = ctx.pop_i64()?;
    let line = ctx.session.files.read_line(handle)?;
    ctx.push(line);
    Ok(Flow::Next)
}

pub fn eof(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    permitted(ctx)?;
    let handle = ctx.pop_i64()?;
    let at_end = ctx.session.files.at_eof(handle)?;
    ctx.push(at_end);
    Ok(Flow::Next)
}

/// ( handle definition -- record )
pub fn get(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    permitted(ctx)?;
    let layout = RecordLayout::from_value(&ctx.pop()?)?;
    let handle = ctx.pop_i64()?;
    let bytes = ctx.session.files.read_bytes(handle, layout.size())?;
    let record = layout.decode(&bytes)?;
    ctx.push(record);
    Ok(Flow::Next)
}

/// ( handle definition record -- )
pub fn put(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    permitted(ctx)?;
    let record = ctx.pop()?;
    let layout = RecordLayout::from_value(&ctx.pop()?)?;
    let handle = ctx.pop_i64()?;
    let record = match &record {
        Value::Record(record) => record,
        other => {
            return Err(VmError::type_mismatch(format!(
                "PUT needs a RECORD, got {}",
                other.type_name()
            )))
        }
    };
    let bytes = layout.encode(record)?;
    ctx.session.files.write_bytes(handle, &bytes)?;
    Ok(Flow::Next)
}

/// ( handle position -- ) byte offset from the start
pub fn seek(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    permitted(ctx)?;
    let position = ctx.pop_i64()?;
    let handle = ctx.pop_i64()?;
    let position = u64::try_from(position)
        .map_err(|_| VmError::with_param(ErrorKind::InvalidValue, format!("position {}", position)))?;
    ctx.session.files.seek(handle, position)?;
    Ok(Flow::Next)
}
