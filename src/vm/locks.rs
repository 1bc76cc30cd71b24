// JBasic Named Locks
// Advisory locks shared by all sessions of the process

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::interner::{fold, normalize};

#[derive(Debug, Clone, Copy)]
struct Holder {
    session: Uuid,
    depth: usize,
}

/// Re-entrant, non-blocking named locks keyed by session id
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<FxHashMap<Arc<str>, Holder>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `name` for `session`. Fails with LockHeld instead of waiting.
    pub fn lock(&self, name: &str, session: Uuid) -> VmResult<()> {
        let key = normalize(name);
        let mut locks = self.locks.lock();
        match locks.get_mut(&key) {
            Some(holder) if holder.session == session => {
                holder.depth += 1;
                Ok(())
            }
            Some(_) => Err(VmError::with_param(ErrorKind::LockHeld, key.to_string())),
            None => {
                debug!(lock = %key, %session, "lock acquired");
                locks.insert(key, Holder { session, depth: 1 });
                Ok(())
            }
        }
    }

    pub fn unlock(&self, name: &str, session: Uuid) -> VmResult<()> {
        let key = normalize(name);
        let mut locks = self.locks.lock();
        match locks.get_mut(&key) {
            Some(holder) if holder.session == session => {
                holder.depth -= 1;
                if holder.depth == 0 {
                    locks.remove(&key);
                    debug!(lock = %key, %session, "lock released");
                }
                Ok(())
            }
            _ => Err(VmError::with_param(ErrorKind::NotLocked, key.to_string())),
        }
    }

    pub fn holder(&self, name: &str) -> Option<Uuid> {
        self.locks
            .lock()
            .get(fold(name).as_ref())
            .map(|holder| holder.session)
    }

    /// Drop every lock held by `session`, returning how many were released
    pub fn release_all(&self, session: Uuid) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|name, holder| {
            let keep = holder.session != session;
            if !keep {
                warn!(lock = %name, %session, "releasing lock held by ending session");
            }
            keep
        });
        before - locks.len()
    }

    /// Names currently locked, sorted
    pub fn held(&self) -> Vec<Arc<str>> {
        let mut names: Vec<_> = self.locks.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
