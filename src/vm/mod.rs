// JBasic Virtual Machine

pub mod arith;
pub mod coerce;
pub mod context;
pub mod element;
pub mod engine;
pub mod files;
pub mod frame;
pub mod interner;
pub mod layout;
pub mod locks;
pub mod loops;
pub mod object;
pub mod root;
pub mod session;
pub mod symbols;
pub mod tables;
pub mod value;

pub use context::{Flow, InstructionContext};
pub use engine::{CallMode, Engine, Exit, Invocation, Outcome};
pub use object::{ObjectHandle, ObjectRef, ObjectRegistry};
pub use session::{
    OutputBuffer, Permission, PermissionPolicy, PermissionSet, RunOutcome, Services, Session,
};
pub use symbols::{Scope, SKIP_GLOBAL, SKIP_ROOT};
pub use value::{Record, Table, Value, ValueKind};
