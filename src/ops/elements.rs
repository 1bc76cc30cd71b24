// Element opcodes
// Indexing, member access and container introspection

use std::cmp::Ordering;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::element::IndexMode;
use crate::vm::layout::RecordLayout;
use crate::vm::value::Value;

pub fn index(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let index = ctx.pop()?;
    let container = ctx.pop()?;
    let element = container.get_element(&index)?;
    ctx.push(element);
    Ok(Flow::Next)
}

pub fn member(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let value = ctx.pop()?.get_member(&name)?;
    ctx.push(value);
    Ok(Flow::Next)
}

/// Write through the for-update accessor. With `Create`, an undefined
/// variable springs into existence as a container suited to the index.
fn write_element(
    ctx: &mut InstructionContext<'_>,
    index: Value,
    value: Value,
    mode: IndexMode,
) -> VmResult<()> {
    let name = ctx.name()?;
    if mode == IndexMode::Create && index.kind().is_numeric() {
        ctx.bounded(index.to_i64()?)?;
    }
    if mode == IndexMode::Create && !ctx.symbols.is_defined(&name) {
        let mut container = Value::container_for(&index);
        container.set_element(&index, value, mode)?;
        return ctx.store(&name, 0, container);
    }
    ctx.symbols
        .update(&name, |container| container.set_element(&index, value, mode))
}

pub fn store_index(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let index = ctx.pop()?;
    let value = ctx.pop()?;
    write_element(ctx, index, value, IndexMode::Create)?;
    Ok(Flow::Next)
}

pub fn update_index(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let index = ctx.pop()?;
    let value = ctx.pop()?;
    write_element(ctx, index, value, IndexMode::Plain)?;
    Ok(Flow::Next)
}

pub fn store_member(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let field = ctx.pop()?;
    let value = ctx.pop()?;
    let field = Value::string(&field.to_string());
    write_element(ctx, field, value, IndexMode::Create)?;
    Ok(Flow::Next)
}

pub fn length(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = ctx.pop()?.length()?;
    ctx.push(n as i64);
    Ok(Flow::Next)
}

/// Member names of a record, column names of a table
pub fn members(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let names = match ctx.pop()? {
        Value::Record(record) => record.names(),
        Value::Table(table) => table.columns().to_vec(),
        other => {
            return Err(VmError::type_mismatch(format!(
                "{} has no members",
                other.type_name()
            )))
        }
    };
    ctx.push(Value::array(names.into_iter().map(Value::String).collect()));
    Ok(Flow::Next)
}

/// Ascending sort of an array of scalars
pub fn sort(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let mut items = match ctx.pop()? {
        Value::Array(items) => items.as_ref().clone(),
        other => {
            return Err(VmError::type_mismatch(format!(
                "cannot sort {}",
                other.type_name()
            )))
        }
    };
    let mut failure = None;
    items.sort_by(|a, b| {
        a.compare(b).unwrap_or_else(|err| {
            failure.get_or_insert(err);
            Ordering::Equal
        })
    });
    if let Some(err) = failure {
        return Err(err);
    }
    ctx.push(Value::array(items));
    Ok(Flow::Next)
}

pub fn size_of(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let definition = ctx.pop()?;
    let layout = RecordLayout::from_value(&definition)?;
    ctx.push(layout.size() as i64);
    Ok(Flow::Next)
}

pub fn columns(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let table = ctx.pop()?;
    let table = table.as_table().ok_or_else(|| {
        VmError::with_param(ErrorKind::TypeMismatch, format!("{} is not a TABLE", table.type_name()))
    })?;
    let names = table.columns().iter().cloned().map(Value::String).collect();
    ctx.push(Value::array(names));
    Ok(Flow::Next)
}
