// JBasic Opcode Handlers
// One function per opcode, grouped by concern, resolved once per engine
// into a dense table indexed by opcode id

mod arith;
mod calls;
mod control;
mod elements;
mod files;
mod io;
mod loops;
mod math;
mod stack;
mod strings;
mod system;
mod tables;
mod types;
mod vars;

use crate::bytecode::OpCode;
use crate::error::VmResult;
use crate::vm::context::{Flow, InstructionContext};

/// Handler signature shared by every opcode
pub type Handler = fn(&mut InstructionContext<'_>) -> VmResult<Flow>;

/// The handler for an opcode. Exhaustive, so a new opcode cannot be
/// added without one.
pub fn handler_for(op: OpCode) -> Handler {
    match op {
        OpCode::Noop | OpCode::Label | OpCode::Entry => stack::noop,
        OpCode::Stmt => stack::stmt,
        OpCode::PushI => stack::push_int,
        OpCode::PushD => stack::push_double,
        OpCode::PushS => stack::push_string,
        OpCode::PushB => stack::push_bool,
        OpCode::PushDec => stack::push_decimal,
        OpCode::Dup => stack::dup,
        OpCode::Swap => stack::swap,
        OpCode::Drop => stack::discard,
        OpCode::LoadR => stack::load_register,
        OpCode::StorR => stack::store_register,
        OpCode::MkArray => stack::make_array,
        OpCode::MkRecord => stack::make_record,
        OpCode::MkTable => stack::make_table,

        OpCode::Add => arith::add,
        OpCode::Sub => arith::sub,
        OpCode::Mul => arith::mul,
        OpCode::Div => arith::div,
        OpCode::Mod => arith::modulo,
        OpCode::Pow => arith::pow,
        OpCode::Neg => arith::neg,
        OpCode::Eq => arith::eq,
        OpCode::Ne => arith::ne,
        OpCode::Lt => arith::lt,
        OpCode::Le => arith::le,
        OpCode::Gt => arith::gt,
        OpCode::Ge => arith::ge,
        OpCode::And => arith::and,
        OpCode::Or => arith::or,
        OpCode::Xor => arith::xor,
        OpCode::Not => arith::not,
        OpCode::Incr => arith::incr,

        OpCode::Load => vars::load,
        OpCode::Store => vars::store,
        OpCode::StoreL => vars::store_local,
        OpCode::Const => vars::constant,
        OpCode::ReadOnly => vars::read_only,
        OpCode::Common => vars::common,
        OpCode::Clear => vars::clear,
        OpCode::Forget => vars::forget,
        OpCode::Defined => vars::defined,
        OpCode::Dim => vars::dim,
        OpCode::SetScope => vars::set_scope,

        OpCode::Index => elements::index,
        OpCode::Member => elements::member,
        OpCode::StoreIdx => elements::store_index,
        OpCode::UpdateIdx => elements::update_index,
        OpCode::StoreMember => elements::store_member,
        OpCode::Length => elements::length,
        OpCode::Members => elements::members,
        OpCode::Sort => elements::sort,
        OpCode::SizeOf => elements::size_of,
        OpCode::Columns => elements::columns,

        OpCode::Cvt => types::convert,
        OpCode::TypeOf => types::type_of,
        OpCode::IsKind => types::is_kind,

        OpCode::Left => strings::left,
        OpCode::Right => strings::right,
        OpCode::Mid => strings::mid,
        OpCode::Upper => strings::upper,
        OpCode::Lower => strings::lower,
        OpCode::Trim => strings::trim,
        OpCode::Instr => strings::instr,
        OpCode::Chr => strings::chr,
        OpCode::Asc => strings::asc,
        OpCode::Str => strings::to_text,
        OpCode::Val => strings::val,
        OpCode::Repeat => strings::repeat,
        OpCode::Replace => strings::replace,
        OpCode::Matches => strings::matches,
        OpCode::Split => strings::split,
        OpCode::Join => join,
        OpCode::Hex => strings::hex,

        OpCode::Abs => math::abs,
        OpCode::Int => math::int,
        OpCode::Sgn => math::sgn,
        OpCode::Sqrt => math::sqrt,
        OpCode::Exp => math::exp,
        OpCode::Log => log,
        OpCode::Sin => math::sin,
        OpCode::Cos => math::cos,
        OpCode::Tan => math::tan,
        OpCode::Atn => math::atn,
        OpCode::Round => math::round,
        OpCode::Min => math::min,
        OpCode::Max => math::max,
        OpCode::Rnd => math::rnd,
        OpCode::Randomize => math::randomize,

        OpCode::Goto => control::goto,
        OpCode::Brt => control::branch_true,
        OpCode::Brf => control::branch_false,
        OpCode::OnGoto => control::on_goto,
        OpCode::OnGosub => control::on_gosub,
        OpCode::Gosub => control::gosub,
        OpCode::RetGosub => control::return_gosub,
        OpCode::End => control::end,
        OpCode::Return => control::return_value,
        OpCode::Quit => control::quit,
        OpCode::OnError => control::on_error,
        OpCode::Raise => control::raise,
        OpCode::Sleep => control::sleep,

        OpCode::For => loops::for_loop,
        OpCode::Next => loops::next,
        OpCode::ForEach => loops::for_each,
        OpCode::Do => loops::do_loop,
        OpCode::Loop => loops::loop_end,
        OpCode::Leave => loops::leave,

        OpCode::Call => calls::call,
        OpCode::CallF => calls::call_function,
        OpCode::CallM => calls::call_method,
        OpCode::Run => calls::run,
        OpCode::Chain => calls::chain,
        OpCode::CallL => calls::call_local,
        OpCode::Result => calls::result,
        OpCode::Arg => calls::arg,
        OpCode::ArgC => calls::arg_count,
        OpCode::Invoke => calls::invoke,
        OpCode::InvokeF => calls::invoke_function,
        OpCode::New => calls::new_object,

        OpCode::Print => io::print,
        OpCode::PrintNl => io::print_newline,
        OpCode::Input => io::input,

        OpCode::Open => files::open,
        OpCode::Close => files::close,
        OpCode::FPrint => files::print,
        OpCode::FInput => files::input,
        OpCode::FEof => files::eof,
        OpCode::Get => files::get,
        OpCode::Put => files::put,
        OpCode::Seek => files::seek,

        OpCode::Where => tables::filter,

        OpCode::System => system::system,
        OpCode::Thread => system::thread,
        OpCode::Asm => system::assemble,
        OpCode::Lock => system::lock,
        OpCode::Unlock => system::unlock,
        OpCode::Time => system::time,
        OpCode::Timestamp => system::timestamp,
        OpCode::Elapsed => system::elapsed,
    }
}

/// JOIN with a column operand joins tables, otherwise it joins strings
fn join(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    if ctx.opt_str().is_some() {
        tables::join(ctx)
    } else {
        strings::join(ctx)
    }
}

/// LOG with a level operand writes to the log, otherwise it is the natural log
fn log(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    if ctx.opt_str().is_some() {
        io::log_message(ctx)
    } else {
        math::ln(ctx)
    }
}

/// Dense opcode id → handler table
pub struct DispatchTable {
    handlers: Vec<Handler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self {
            handlers: OpCode::ALL.iter().map(|&op| handler_for(op)).collect(),
        }
    }

    pub fn get(&self, op: OpCode) -> Handler {
        self.handlers[op.id() as usize]
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}
