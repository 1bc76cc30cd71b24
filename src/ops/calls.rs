// Call opcodes
// Program calls, local functions, argument access and external objects

use std::sync::Arc;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::engine::{CallMode, Exit, Invocation, Outcome};
use crate::vm::object::ObjectRef;
use crate::vm::symbols::Scope;
use crate::vm::value::Value;

const RESULT: &str = "ARG$RESULT";

/// Arguments from an explicit count, or a single popped array without one
fn arguments(ctx: &mut InstructionContext<'_>) -> VmResult<Vec<Value>> {
    match ctx.opt_int() {
        Some(_) => {
            let n = ctx.count()?;
            Ok(ctx.pop_n(n)?.into_vec())
        }
        None => match ctx.pop()? {
            Value::Array(items) => Ok(items.as_ref().clone()),
            other => Ok(vec![other]),
        },
    }
}

/// Table a callee's own table hangs from
fn caller_scope(ctx: &InstructionContext<'_>) -> Scope {
    if ctx.state.locally_scoped {
        ctx.session.global().clone()
    } else {
        ctx.symbols.clone()
    }
}

/// Run `call` and hand QUIT back to the caller as a flow
fn finish(ctx: &mut InstructionContext<'_>, call: Invocation<'_>) -> VmResult<(Outcome, Flow)> {
    let outcome = ctx.engine.invoke(&mut *ctx.session, call)?;
    let flow = match outcome.exit {
        Exit::Quit(status) => Flow::Quit(status),
        Exit::Return(_) | Exit::End => Flow::Next,
    };
    Ok((outcome, flow))
}

/// Copy the callee's result into the caller's ARG$RESULT
fn propagate(ctx: &InstructionContext<'_>, outcome: &Outcome) -> VmResult<()> {
    match outcome.result() {
        Some(value) => ctx.symbols.insert_local(RESULT, value),
        None => Ok(()),
    }
}

/// CALL and RUN share everything except the parent table
fn call_program(
    ctx: &mut InstructionContext<'_>,
    args: Vec<Value>,
    parent: Scope,
    mode: CallMode,
) -> VmResult<Flow> {
    let name = ctx.name()?;
    let program = ctx.session.services().programs.get(&name)?;
    let symbols = parent.child(&program.name);
    let call = Invocation::new(&program, symbols, mode)
        .with_args(args)
        .with_parent(ctx.program.name.clone());
    let (outcome, flow) = finish(ctx, call)?;
    propagate(ctx, &outcome)?;
    Ok(flow)
}

pub fn call(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let args = arguments(ctx)?;
    let parent = caller_scope(ctx);
    call_program(ctx, args, parent, CallMode::Call)
}

/// RUN starts the program from the session global table
pub fn run(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let args = match ctx.opt_int() {
        Some(_) => {
            let n = ctx.count()?;
            ctx.pop_n(n)?.into_vec()
        }
        None => Vec::new(),
    };
    let parent = ctx.session.global().clone();
    call_program(ctx, args, parent, CallMode::Run)
}

/// ( args.. -- result )
pub fn call_function(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let n = ctx.count()?;
    let args = ctx.pop_n(n)?.into_vec();
    let program = ctx.session.services().programs.get(&name)?;
    let symbols = caller_scope(ctx).child(&program.name);
    let call = Invocation::new(&program, symbols, CallMode::Function)
        .with_args(args)
        .with_parent(ctx.program.name.clone());
    let (outcome, flow) = finish(ctx, call)?;
    if let Flow::Quit(_) = flow {
        return Ok(flow);
    }
    let value = outcome
        .result()
        .ok_or_else(|| VmError::with_param(ErrorKind::NoResult, name.to_string()))?;
    ctx.push(value);
    Ok(Flow::Next)
}

/// ( this args.. -- ) with THIS bound in the callee
pub fn call_method(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let n = ctx.count()?;
    let args = ctx.pop_n(n)?.into_vec();
    let this = ctx.pop()?;
    let program = ctx.session.services().programs.get(&name)?;
    let symbols = caller_scope(ctx).child(&program.name);
    let call = Invocation::new(&program, symbols, CallMode::Method)
        .with_args(args)
        .with_this(this)
        .with_parent(ctx.program.name.clone());
    let (outcome, flow) = finish(ctx, call)?;
    propagate(ctx, &outcome)?;
    Ok(flow)
}

/// Transfer to another program carrying only COMMON bindings, then end
pub fn chain(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let name = ctx.name()?;
    let program = ctx.session.services().programs.get(&name)?;
    let symbols = ctx.session.global().child(&program.name);
    symbols.adopt(ctx.symbols.commons());
    let call = Invocation::new(&program, symbols, CallMode::Chain)
        .with_parent(ctx.program.name.clone());
    let (outcome, flow) = finish(ctx, call)?;
    propagate(ctx, &outcome)?;
    match flow {
        Flow::Quit(status) => Ok(Flow::Quit(status)),
        _ => Ok(Flow::End),
    }
}

/// ( args.. argc -- ) call a function entry of the current stream
pub fn call_local(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let entry = ctx.target()?;
    let argc = ctx.pop_i64()?;
    let argc = usize::try_from(argc)
        .map_err(|_| VmError::with_param(ErrorKind::ArgumentCount, argc.to_string()))?;
    let args = ctx.pop_n(argc)?.into_vec();
    let label = ctx.opt_str().unwrap_or(ctx.program.name.as_ref()).to_string();
    let symbols = caller_scope(ctx).child(&label);
    let program = Arc::clone(ctx.program);
    let call = Invocation::new(&program, symbols, CallMode::Function)
        .with_args(args)
        .with_parent(ctx.program.name.clone())
        .starting_at(entry);
    let (outcome, flow) = finish(ctx, call)?;
    propagate(ctx, &outcome)?;
    Ok(flow)
}

/// ( -- v ) consume the last callee result
pub fn result(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let value = ctx
        .symbols
        .local_reference(RESULT)
        .ok_or_else(|| VmError::new(ErrorKind::NoResult))?;
    ctx.symbols.delete_always(RESULT);
    ctx.push(value);
    Ok(Flow::Next)
}

/// 1-based positional argument, pushed or bound to the named variable
pub fn arg(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = ctx.int()?;
    let args = ctx.symbols.reference("$ARGS")?;
    let value = usize::try_from(n)
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| args.as_array().and_then(|items| items.get(i).cloned()))
        .ok_or_else(|| VmError::with_param(ErrorKind::ArgumentCount, n.to_string()))?;
    match ctx.instruction.str.clone() {
        Some(name) => {
            let value = ctx.typed(&name, value)?;
            ctx.symbols.insert_local(&name, value)?;
        }
        None => ctx.push(value),
    }
    Ok(Flow::Next)
}

pub fn arg_count(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let n = ctx.symbols.reference("$ARGS")?.length()?;
    ctx.push(n as i64);
    Ok(Flow::Next)
}

/// Pop `argc` arguments and then the receiving object
fn receiver(ctx: &mut InstructionContext<'_>) -> VmResult<(ObjectRef, Vec<Value>)> {
    let n = ctx.count()?;
    let args = ctx.pop_n(n)?.into_vec();
    match ctx.pop()? {
        Value::Object(object) => Ok((object, args)),
        other => Err(VmError::type_mismatch(format!(
            "{} is not an OBJECT",
            other.type_name()
        ))),
    }
}

/// ( obj args.. -- ) method result discarded
pub fn invoke(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let method = ctx.name()?;
    let (object, args) = receiver(ctx)?;
    object.invoke(&method, &args)?;
    Ok(Flow::Next)
}

/// ( obj args.. -- r )
pub fn invoke_function(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let method = ctx.name()?;
    let (object, args) = receiver(ctx)?;
    let value = object
        .invoke(&method, &args)?
        .ok_or_else(|| VmError::with_param(ErrorKind::NoResult, method.to_string()))?;
    ctx.push(value);
    Ok(Flow::Next)
}

/// ( args.. -- obj )
pub fn new_object(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let class = ctx.name()?;
    let n = ctx.count()?;
    let args = ctx.pop_n(n)?.into_vec();
    let object = ctx.session.services().objects.create(&class, &args)?;
    ctx.push(object);
    Ok(Flow::Next)
}
