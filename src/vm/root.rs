// JBasic Root Symbol Table
// Process-wide bindings shared by every session and thread

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{VmError, VmResult};
use crate::vm::interner::{fold, normalize};
use crate::vm::symbols::Binding;
use crate::vm::Value;

/// The ultimate parent of every session's global table.
/// Access is synchronized per key.
#[derive(Default)]
pub struct RootTable {
    symbols: DashMap<Arc<str>, Binding>,
}

impl RootTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.symbols
            .get(fold(name).as_ref())
            .map(|binding| binding.value.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(fold(name).as_ref())
    }

    pub fn insert(&self, name: &str, value: Value) -> VmResult<()> {
        match self.symbols.entry(normalize(name)) {
            Entry::Occupied(mut entry) => {
                if entry.get().read_only {
                    return Err(VmError::read_only(entry.key()));
                }
                entry.get_mut().value = value;
            }
            Entry::Vacant(entry) => {
                entry.insert(Binding::new(value));
            }
        }
        Ok(())
    }

    pub fn insert_read_only(&self, name: &str, value: Value) -> VmResult<()> {
        match self.symbols.entry(normalize(name)) {
            Entry::Occupied(entry) if entry.get().read_only => {
                Err(VmError::read_only(entry.key()))
            }
            Entry::Occupied(mut entry) => {
                entry.insert(Binding::read_only(value));
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(Binding::read_only(value));
                Ok(())
            }
        }
    }

    pub fn mark_read_only(&self, name: &str) -> VmResult<()> {
        let key = normalize(name);
        let mut binding = self
            .symbols
            .get_mut(&key)
            .ok_or_else(|| VmError::unknown_variable(&key))?;
        binding.read_only = true;
        Ok(())
    }

    pub fn delete(&self, name: &str) -> VmResult<()> {
        let key = normalize(name);
        let read_only = self
            .symbols
            .get(&key)
            .map(|binding| binding.read_only)
            .ok_or_else(|| VmError::unknown_variable(&key))?;
        if read_only {
            return Err(VmError::read_only(&key));
        }
        self.symbols.remove(&key);
        Ok(())
    }

    pub fn delete_always(&self, name: &str) {
        self.symbols.remove(fold(name).as_ref());
    }

    /// Mutate a binding in place while holding its shard lock
    pub fn update<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Value) -> VmResult<R>,
    ) -> VmResult<R> {
        let key = normalize(name);
        let mut binding = self
            .symbols
            .get_mut(&key)
            .ok_or_else(|| VmError::unknown_variable(&key))?;
        if binding.read_only {
            return Err(VmError::read_only(&key));
        }
        f(&mut binding.value)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
