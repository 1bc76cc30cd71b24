// JBasic Sessions
// Process-wide services and the per-thread session that runs programs

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::{FxHashMap, FxHashSet};
use std::io::{self, BufRead, Write};
use std::rc::Rc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bytecode::Program;
use crate::config::VmConfig;
use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::engine::{CallMode, Engine, Exit, Invocation};
use crate::vm::files::FileTable;
use crate::vm::interner::fold;
use crate::vm::locks::LockManager;
use crate::vm::object::ObjectRegistry;
use crate::vm::root::RootTable;
use crate::vm::symbols::Scope;
use crate::vm::tables::{NestedLoopEngine, TableEngine};
use crate::vm::Value;

/// Capabilities privileged opcodes ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Threads,
    Assembly,
    System,
    Logging,
    FileIo,
}

impl Permission {
    pub const ALL: [Permission; 5] = [
        Permission::Threads,
        Permission::Assembly,
        Permission::System,
        Permission::Logging,
        Permission::FileIo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Permission::Threads => "THREADS",
            Permission::Assembly => "ASSEMBLY",
            Permission::System => "SYSTEM",
            Permission::Logging => "LOGGING",
            Permission::FileIo => "FILE_IO",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|permission| permission.name().eq_ignore_ascii_case(name))
            .copied()
    }
}

/// The boolean capability query consulted by privileged opcodes
pub trait PermissionPolicy: Send + Sync {
    fn allows(&self, permission: Permission) -> bool;
}

/// A fixed set of granted permissions
#[derive(Debug, Default, Clone)]
pub struct PermissionSet(FxHashSet<Permission>);

impl PermissionSet {
    pub fn new(granted: impl IntoIterator<Item = Permission>) -> Self {
        Self(granted.into_iter().collect())
    }
}

impl PermissionPolicy for PermissionSet {
    fn allows(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }
}

/// Programs every session resolves CALL and RUN targets against
#[derive(Default)]
pub struct ProgramCatalog {
    programs: RwLock<FxHashMap<Arc<str>, Arc<Program>>>,
}

impl ProgramCatalog {
    pub fn register(&self, program: Program) -> Arc<Program> {
        let program = Arc::new(program);
        debug!(program = %program.name, kind = program.kind.name(), "registered program");
        self.programs
            .write()
            .insert(program.name.clone(), Arc::clone(&program));
        program
    }

    pub fn get(&self, name: &str) -> VmResult<Arc<Program>> {
        self.programs
            .read()
            .get(fold(name).as_ref())
            .cloned()
            .ok_or_else(|| VmError::with_param(ErrorKind::UnknownProgram, name.to_uppercase()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.read().contains_key(fold(name).as_ref())
    }

    pub fn names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<_> = self.programs.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// State shared by every session and thread of the process
pub struct Services {
    pub root: Arc<RootTable>,
    pub locks: LockManager,
    pub programs: ProgramCatalog,
    pub objects: ObjectRegistry,
    pub config: VmConfig,
    permissions: Box<dyn PermissionPolicy>,
    tables: Box<dyn TableEngine>,
}

impl Services {
    pub fn new(config: VmConfig) -> Self {
        let granted = config.granted().unwrap_or_else(|err| {
            warn!(error = %err, "ignoring permission list");
            Vec::new()
        });
        Self {
            root: Arc::new(RootTable::new()),
            locks: LockManager::new(),
            programs: ProgramCatalog::default(),
            objects: ObjectRegistry::new(),
            config,
            permissions: Box::new(PermissionSet::new(granted)),
            tables: Box::new(NestedLoopEngine),
        }
    }

    pub fn with_permissions(mut self, policy: impl PermissionPolicy + 'static) -> Self {
        self.permissions = Box::new(policy);
        self
    }

    pub fn with_table_engine(mut self, engine: impl TableEngine + 'static) -> Self {
        self.tables = Box::new(engine);
        self
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.allows(permission)
    }

    pub fn tables(&self) -> &dyn TableEngine {
        self.tables.as_ref()
    }

    pub fn register(&self, program: Program) -> Arc<Program> {
        self.programs.register(program)
    }
}

/// Cloneable in-memory sink for session output
#[derive(Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// How a top-level run finished
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Value left in ARG$RESULT or returned by the program, if any
    pub result: Option<Value>,
    /// QUIT status, zero for a normal end
    pub status: i64,
}

pub struct ThreadHandle {
    pub id: String,
    pub program: Arc<str>,
    handle: JoinHandle<VmResult<()>>,
}

/// One user's execution context. Owned by a single thread.
pub struct Session {
    id: Uuid,
    services: Arc<Services>,
    global: Scope,
    engine: Rc<Engine>,
    output: Box<dyn Write>,
    input: Box<dyn BufRead>,
    pub files: FileTable,
    pub rng: StdRng,
    depth: usize,
    threads: Vec<ThreadHandle>,
}

impl Session {
    pub fn new(services: Arc<Services>) -> Self {
        Self::with_io(
            services,
            Box::new(io::stdout()),
            Box::new(io::BufReader::new(io::stdin())),
        )
    }

    pub fn with_io(services: Arc<Services>, output: Box<dyn Write>, input: Box<dyn BufRead>) -> Self {
        let global = Scope::global(Arc::clone(&services.root));
        Self {
            id: Uuid::new_v4(),
            services,
            global,
            engine: Rc::new(Engine::new()),
            output,
            input,
            files: FileTable::new(),
            rng: StdRng::from_os_rng(),
            depth: 0,
            threads: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn config(&self) -> &VmConfig {
        &self.services.config
    }

    pub fn global(&self) -> &Scope {
        &self.global
    }

    pub fn engine(&self) -> Rc<Engine> {
        Rc::clone(&self.engine)
    }

    /// Sandbox check run before a privileged opcode touches the stack
    pub fn require(&self, permission: Permission) -> VmResult<()> {
        if self.services.allows(permission) {
            Ok(())
        } else {
            Err(VmError::with_param(ErrorKind::Sandbox, permission.name()))
        }
    }

    pub fn write(&mut self, text: &str) -> VmResult<()> {
        self.output
            .write_all(text.as_bytes())
            .map_err(|err| VmError::with_param(ErrorKind::FileError, err.to_string()))
    }

    pub fn flush(&mut self) {
        let _ = self.output.flush();
    }

    /// Next console line, `None` at end of input
    pub fn read_line(&mut self) -> VmResult<Option<String>> {
        self.flush();
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .map_err(|err| VmError::with_param(ErrorKind::FileError, err.to_string()))?;
        if read == 0 {
            return Ok(None);
        }
        while line.ends_with(['\n', '\r']) {
            line.pop();
        }
        Ok(Some(line))
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Track call depth against the configured limit
    pub fn enter(&mut self) -> VmResult<()> {
        if self.depth >= self.services.config.max_call_depth {
            return Err(VmError::with_param(
                ErrorKind::CallDepth,
                self.depth.to_string(),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn register(&self, program: Program) -> Arc<Program> {
        self.services.register(program)
    }

    /// Run a catalog program from the top with the session global table as parent
    pub fn run(&mut self, name: &str, args: Vec<Value>) -> VmResult<RunOutcome> {
        let program = self.services.programs.get(name)?;
        let engine = self.engine();
        let symbols = self.global.child(&program.name);
        let call = Invocation::new(&program, symbols, CallMode::Run).with_args(args);
        let outcome = engine.invoke(self, call);
        self.flush();
        let outcome = outcome?;
        let result = outcome.result();
        let status = match outcome.exit {
            Exit::Quit(status) => status,
            Exit::Return(_) | Exit::End => 0,
        };
        Ok(RunOutcome { result, status })
    }

    /// Start `program` on a new OS thread with its own session
    pub fn spawn(&mut self, program: Arc<Program>, args: Vec<Value>) -> VmResult<String> {
        let id = Uuid::new_v4().to_string();
        let services = Arc::clone(&self.services);
        let name = program.name.clone();
        let thread_name = format!("jbasic-{}", &id[..8]);

        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let mut session = Session::new(services);
                let engine = session.engine();
                let symbols = session.global.child(&program.name);
                let call = Invocation::new(&program, symbols, CallMode::Thread)
                    .with_args(args)
                    .with_parent(Arc::from("THREAD"));
                let result = engine.invoke(&mut session, call).map(|_| ());
                session.flush();
                if let Err(err) = &result {
                    warn!(program = %program.name, error = %err, "thread ended with error");
                }
                result
            })
            .map_err(|err| VmError::with_param(ErrorKind::InvalidValue, err.to_string()))?;

        debug!(thread = %id, program = %name, "spawned thread");
        self.threads.push(ThreadHandle {
            id: id.clone(),
            program: name,
            handle,
        });
        Ok(id)
    }

    /// Wait for every spawned thread, in spawn order
    pub fn join_threads(&mut self) -> Vec<(String, VmResult<()>)> {
        self.threads
            .drain(..)
            .map(|thread| {
                let result = thread.handle.join().unwrap_or_else(|_| {
                    Err(VmError::with_param(
                        ErrorKind::InvalidValue,
                        format!("thread {} panicked", thread.program),
                    ))
                });
                (thread.id, result)
            })
            .collect()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let released = self.services.locks.release_all(self.id);
        if released > 0 {
            debug!(session = %self.id, released, "session teardown released locks");
        }
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_denies_without_permission() {
        let services = Arc::new(Services::new(VmConfig::sandboxed()));
        let session = Session::with_io(services, Box::new(io::sink()), Box::new(io::empty()));
        let err = session.require(Permission::FileIo).unwrap_err();
        assert!(err.is(ErrorKind::Sandbox));
        assert_eq!(err.param.as_deref(), Some("FILE_IO"));
    }

    #[test]
    fn test_custom_policy() {
        struct OnlyLogging;
        impl PermissionPolicy for OnlyLogging {
            fn allows(&self, permission: Permission) -> bool {
                permission == Permission::Logging
            }
        }
        let services = Arc::new(Services::new(VmConfig::default()).with_permissions(OnlyLogging));
        assert!(services.allows(Permission::Logging));
        assert!(!services.allows(Permission::System));
    }

    #[test]
    fn test_teardown_releases_locks() {
        let services = Arc::new(Services::new(VmConfig::default()));
        let session = Session::with_io(Arc::clone(&services), Box::new(io::sink()), Box::new(io::empty()));
        services.locks.lock("ledger", session.id()).unwrap();
        drop(session);
        assert_eq!(services.locks.holder("ledger"), None);
    }

    #[test]
    fn test_call_depth_limit() {
        let config = VmConfig {
            max_call_depth: 1,
            ..VmConfig::default()
        };
        let services = Arc::new(Services::new(config));
        let mut session = Session::with_io(services, Box::new(io::sink()), Box::new(io::empty()));
        session.enter().unwrap();
        assert!(session.enter().unwrap_err().is(ErrorKind::CallDepth));
        session.leave();
        session.enter().unwrap();
    }

    #[test]
    fn test_unknown_program() {
        let services = Arc::new(Services::new(VmConfig::default()));
        let mut session = Session::with_io(services, Box::new(io::sink()), Box::new(io::empty()));
        assert!(session.run("missing", Vec::new()).unwrap_err().is(ErrorKind::UnknownProgram));
    }
}
