// JBasic Symbol Tables
// Parent-chained name → value scopes. The chain of every session ends at its
// global table, whose lookups fall through to the process-wide root table.

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::interner::{fold, normalize};
use crate::vm::root::RootTable;
use crate::vm::value::{Value, ValueKind};

/// Scope-skip code addressing the session global table
pub const SKIP_GLOBAL: i64 = -1;
/// Scope-skip code addressing the process-wide root table
pub const SKIP_ROOT: i64 = -2;

/// One variable binding. The table owns the canonical value.
#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub read_only: bool,
    pub common: bool,
}

impl Binding {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            read_only: false,
            common: false,
        }
    }

    pub fn read_only(value: Value) -> Self {
        Self {
            value,
            read_only: true,
            common: false,
        }
    }
}

pub struct SymbolTable {
    name: Arc<str>,
    symbols: FxHashMap<Arc<str>, Binding>,
    parent: Option<Scope>,
    /// Present only on a session's global table
    root: Option<Arc<RootTable>>,
    global: bool,
    rescoped: bool,
}

/// Shared handle to a symbol table owned by one session thread
#[derive(Clone)]
pub struct Scope(Rc<RefCell<SymbolTable>>);

/// Resolved destination of a scope-skip write
pub enum Target {
    Table(Scope),
    Root(Arc<RootTable>),
}

/// The blank value a name is created with when no value is supplied
fn empty_value(name: &str) -> Value {
    Value::default_of(ValueKind::from_suffix(name).unwrap_or(ValueKind::Integer))
}

impl Scope {
    fn wrap(table: SymbolTable) -> Self {
        Self(Rc::new(RefCell::new(table)))
    }

    /// A session global table whose chain ends at `root`
    pub fn global(root: Arc<RootTable>) -> Self {
        Self::wrap(SymbolTable {
            name: normalize("GLOBAL"),
            symbols: FxHashMap::default(),
            parent: None,
            root: Some(root),
            global: true,
            rescoped: false,
        })
    }

    /// A child table for one invocation or block
    pub fn child(&self, name: &str) -> Self {
        Self::wrap(SymbolTable {
            name: normalize(name),
            symbols: FxHashMap::default(),
            parent: Some(self.clone()),
            root: None,
            global: false,
            rescoped: false,
        })
    }

    pub fn name(&self) -> Arc<str> {
        self.0.borrow().name.clone()
    }

    pub fn is_global(&self) -> bool {
        self.0.borrow().global
    }

    pub fn parent(&self) -> Option<Scope> {
        self.0.borrow().parent.clone()
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The session global table at the end of this chain
    pub fn global_scope(&self) -> Scope {
        let mut current = self.clone();
        loop {
            let parent = {
                let table = current.0.borrow();
                if table.global {
                    return current.clone();
                }
                table.parent.clone()
            };
            match parent {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }

    fn root(&self) -> Option<Arc<RootTable>> {
        self.global_scope().0.borrow().root.clone()
    }

    /// Look in this table only
    pub fn local_reference(&self, name: &str) -> Option<Value> {
        self.0
            .borrow()
            .symbols
            .get(fold(name).as_ref())
            .map(|binding| binding.value.clone())
    }

    pub fn local_binding(&self, name: &str) -> Option<Binding> {
        self.0.borrow().symbols.get(fold(name).as_ref()).cloned()
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            let table = scope.0.borrow();
            if let Some(binding) = table.symbols.get(key) {
                return Some(binding.value.clone());
            }
            if let Some(root) = &table.root {
                if let Some(value) = root.get(key) {
                    return Some(value);
                }
            }
            current = table.parent.clone();
        }
        None
    }

    /// Walk the chain; absent names are UnknownVariable
    pub fn reference(&self, name: &str) -> VmResult<Value> {
        let key = fold(name);
        self.lookup(&key)
            .ok_or_else(|| VmError::unknown_variable(&key))
    }

    /// Walk the chain. With `create`, a missing name is created blank in this table.
    pub fn find_reference(&self, name: &str, create: bool) -> VmResult<Value> {
        let key = fold(name);
        match self.lookup(&key) {
            Some(value) => Ok(value),
            None if create => {
                let value = empty_value(&key);
                self.0
                    .borrow_mut()
                    .symbols
                    .insert(Arc::from(key.as_ref()), Binding::new(value.clone()));
                Ok(value)
            }
            None => Err(VmError::unknown_variable(&key)),
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(&fold(name)).is_some()
    }

    /// Assign in this table, keeping an existing binding's common attribute
    pub fn insert(&self, name: &str, value: Value) -> VmResult<()> {
        let key = normalize(name);
        let mut table = self.0.borrow_mut();
        match table.symbols.get_mut(&key) {
            Some(binding) if binding.read_only => Err(VmError::read_only(&key)),
            Some(binding) => {
                binding.value = value;
                Ok(())
            }
            None => {
                table.symbols.insert(key, Binding::new(value));
                Ok(())
            }
        }
    }

    /// Fresh binding in this table with attributes reset
    pub fn insert_local(&self, name: &str, value: Value) -> VmResult<()> {
        self.insert_binding(name, Binding::new(value))
    }

    pub fn insert_read_only(&self, name: &str, value: Value) -> VmResult<()> {
        self.insert_binding(name, Binding::read_only(value))
    }

    fn insert_binding(&self, name: &str, binding: Binding) -> VmResult<()> {
        let key = normalize(name);
        let mut table = self.0.borrow_mut();
        if table.symbols.get(&key).is_some_and(|existing| existing.read_only) {
            return Err(VmError::read_only(&key));
        }
        table.symbols.insert(key, binding);
        Ok(())
    }

    /// Runs `f` on the table in the chain that owns `name`
    fn with_owner<R>(
        &self,
        key: &Arc<str>,
        f: impl FnOnce(&mut Binding) -> VmResult<R>,
    ) -> VmResult<R> {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            let mut table = scope.0.borrow_mut();
            if let Some(binding) = table.symbols.get_mut(key) {
                return f(binding);
            }
            current = table.parent.clone();
        }
        Err(VmError::unknown_variable(key))
    }

    pub fn mark_read_only(&self, name: &str) -> VmResult<()> {
        let key = normalize(name);
        match self.with_owner(&key, |binding| {
            binding.read_only = true;
            Ok(())
        }) {
            Err(err) if err.is(ErrorKind::UnknownVariable) => match self.root() {
                Some(root) if root.contains(&key) => root.mark_read_only(&key),
                _ => Err(err),
            },
            other => other,
        }
    }

    pub fn mark_common(&self, name: &str) -> VmResult<()> {
        let key = normalize(name);
        self.with_owner(&key, |binding| {
            binding.common = true;
            Ok(())
        })
    }

    /// Remove from this table. Read-only bindings are protected.
    pub fn delete(&self, name: &str) -> VmResult<()> {
        let key = normalize(name);
        let mut table = self.0.borrow_mut();
        match table.symbols.get(&key) {
            None => Err(VmError::unknown_variable(&key)),
            Some(binding) if binding.read_only => Err(VmError::read_only(&key)),
            Some(_) => {
                table.symbols.remove(&key);
                Ok(())
            }
        }
    }

    pub fn delete_always(&self, name: &str) {
        self.0.borrow_mut().symbols.remove(fold(name).as_ref());
    }

    /// The for-update accessor: `f` mutates the canonical value owned by
    /// whichever table in the chain holds `name`.
    pub fn update<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Value) -> VmResult<R>,
    ) -> VmResult<R> {
        let key = normalize(name);
        let mut f = Some(f);
        let result = self.with_owner(&key, |binding| {
            if binding.read_only {
                return Err(VmError::read_only(&key));
            }
            match f.take() {
                Some(f) => f(&mut binding.value),
                None => Err(VmError::unknown_variable(&key)),
            }
        });
        match (result, f) {
            (Err(err), Some(f)) if err.is(ErrorKind::UnknownVariable) => match self.root() {
                Some(root) => root.update(&key, f),
                None => Err(err),
            },
            (result, _) => result,
        }
    }

    /// Resolve a scope-skip code: 0 current, N parents up, −1 global, −2 root
    pub fn target(&self, skip: i64) -> VmResult<Target> {
        match skip {
            SKIP_ROOT => self
                .root()
                .map(Target::Root)
                .ok_or_else(|| VmError::with_param(ErrorKind::InvalidScope, "no root table")),
            SKIP_GLOBAL => Ok(Target::Table(self.global_scope())),
            n if n >= 0 => {
                let mut scope = self.clone();
                for _ in 0..n {
                    scope = scope.parent().ok_or_else(|| {
                        VmError::with_param(ErrorKind::InvalidScope, format!("skip {}", skip))
                    })?;
                }
                Ok(Target::Table(scope))
            }
            n => Err(VmError::with_param(
                ErrorKind::InvalidScope,
                format!("skip {}", n),
            )),
        }
    }

    /// Sever the parent link and re-root this table at `global`.
    /// Applies once; later calls leave the table as it is.
    pub fn set_scope(&self, global: &Scope) {
        let mut table = self.0.borrow_mut();
        if table.global || table.rescoped {
            return;
        }
        table.parent = Some(global.clone());
        table.rescoped = true;
    }

    /// Bindings of this table flagged COMMON
    pub fn commons(&self) -> Vec<(Arc<str>, Binding)> {
        self.0
            .borrow()
            .symbols
            .iter()
            .filter(|(_, binding)| binding.common)
            .map(|(name, binding)| (name.clone(), binding.clone()))
            .collect()
    }

    /// Copy bindings in verbatim, attributes included
    pub fn adopt(&self, bindings: impl IntoIterator<Item = (Arc<str>, Binding)>) {
        let mut table = self.0.borrow_mut();
        for (name, binding) in bindings {
            table.symbols.insert(name, binding);
        }
    }

    /// Names bound in this table, sorted
    pub fn names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<_> = self.0.borrow().symbols.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.0.borrow();
        write!(f, "<symbols {} ({} names)>", table.name, table.symbols.len())
    }
}

impl Target {
    pub fn insert(&self, name: &str, value: Value) -> VmResult<()> {
        match self {
            Target::Table(scope) => scope.insert(name, value),
            Target::Root(root) => root.insert(name, value),
        }
    }

    pub fn reference(&self, name: &str) -> VmResult<Value> {
        match self {
            Target::Table(scope) => scope.reference(name),
            Target::Root(root) => root
                .get(name)
                .ok_or_else(|| VmError::unknown_variable(&name.to_uppercase())),
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        match self {
            Target::Table(scope) => scope.is_defined(name),
            Target::Root(root) => root.contains(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_global() -> Scope {
        Scope::global(Arc::new(RootTable::new()))
    }

    #[test]
    fn test_insert_local_visibility() {
        let parent = session_global().child("MAIN");
        let child = parent.child("SUB");
        parent.insert_local("x", Value::from(1)).unwrap();

        assert!(parent.local_reference("X").is_some());
        assert!(child.local_reference("X").is_none());
        assert_eq!(child.reference("x").unwrap(), Value::from(1));
    }

    #[test]
    fn test_read_only_blocks_insert_but_not_delete_always() {
        let table = session_global().child("MAIN");
        table.insert_local("X", Value::from(1)).unwrap();
        table.mark_read_only("x").unwrap();

        assert!(table.insert("X", Value::from(2)).unwrap_err().is(ErrorKind::ReadOnly));
        assert!(table.delete("X").unwrap_err().is(ErrorKind::ReadOnly));
        table.delete_always("X");
        assert!(table.local_reference("X").is_none());
    }

    #[test]
    fn test_missing_names() {
        let table = session_global();
        assert!(table.reference("NOPE").unwrap_err().is(ErrorKind::UnknownVariable));
        assert!(table.delete("NOPE").unwrap_err().is(ErrorKind::UnknownVariable));
        assert_eq!(table.find_reference("COUNT", true).unwrap(), Value::from(0));
        assert_eq!(table.find_reference("NAME$", true).unwrap(), Value::from(""));
        assert!(table.local_reference("COUNT").is_some());
    }

    #[test]
    fn test_insert_keeps_common_and_insert_local_resets_it() {
        let table = session_global().child("MAIN");
        table.insert("A", Value::from(1)).unwrap();
        table.mark_common("A").unwrap();
        table.insert("A", Value::from(2)).unwrap();
        assert!(table.local_binding("A").unwrap().common);
        table.insert_local("A", Value::from(3)).unwrap();
        assert!(!table.local_binding("A").unwrap().common);
    }

    #[test]
    fn test_scope_skip_targets() {
        let global = session_global();
        let main = global.child("MAIN");
        let sub = main.child("SUB");

        sub.target(1).unwrap().insert("A", Value::from(1)).unwrap();
        assert!(main.local_reference("A").is_some());

        sub.target(SKIP_GLOBAL).unwrap().insert("B", Value::from(2)).unwrap();
        assert!(global.local_reference("B").is_some());

        sub.target(SKIP_ROOT).unwrap().insert("C", Value::from(3)).unwrap();
        assert!(global.local_reference("C").is_none());
        assert_eq!(sub.reference("C").unwrap(), Value::from(3));

        assert!(sub.target(5).err().unwrap().is(ErrorKind::InvalidScope));
    }

    #[test]
    fn test_set_scope_reroots_once() {
        let global = session_global();
        let caller = global.child("CALLER");
        caller.insert_local("SECRET", Value::from(1)).unwrap();
        global.insert_local("SHARED", Value::from(2)).unwrap();

        let callee = caller.child("CALLEE");
        assert!(callee.is_defined("SECRET"));
        callee.set_scope(&global);
        assert!(!callee.is_defined("SECRET"));
        assert!(callee.is_defined("SHARED"));
        assert!(callee.parent().unwrap().ptr_eq(&global));
    }

    #[test]
    fn test_update_mutates_owner_in_place() {
        let global = session_global();
        let main = global.child("MAIN");
        global.insert_local("TOTAL", Value::from(1)).unwrap();
        let before = main.reference("TOTAL").unwrap();

        main.update("total", |value| {
            *value = value.add(&Value::from(41))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(before, Value::from(1));
        assert_eq!(global.local_reference("TOTAL"), Some(Value::from(42)));
        assert!(main
            .update("missing", |_| Ok(()))
            .unwrap_err()
            .is(ErrorKind::UnknownVariable));
    }
}
