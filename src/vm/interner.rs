// JBasic Names
// Case folding for symbol names, and the pool a stream interns its
// symbol operands into while it links

use rustc_hash::FxHashSet;
use std::borrow::Cow;
use std::sync::Arc;

/// Upper-case form of a name, borrowed when it already is upper case.
/// Lookups key on this so a hit allocates nothing.
pub fn fold(name: &str) -> Cow<'_, str> {
    if name.chars().any(|c| c.is_lowercase()) {
        Cow::Owned(name.to_uppercase())
    } else {
        Cow::Borrowed(name)
    }
}

/// Owned, case-folded key for inserting into a table
pub fn normalize(name: &str) -> Arc<str> {
    Arc::from(fold(name).as_ref())
}

/// Symbol-name operands of one stream.
///
/// Every LOAD, STORE, FOR or CALL naming the same symbol shares one
/// allocation. The pool lives for a single link pass; text literals never
/// enter it.
#[derive(Default)]
pub struct NamePool {
    names: FxHashSet<Arc<str>>,
}

impl NamePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> Arc<str> {
        let folded = fold(name);
        if let Some(shared) = self.names.get(folded.as_ref()) {
            return shared.clone();
        }
        let shared: Arc<str> = Arc::from(folded.as_ref());
        self.names.insert(shared.clone());
        shared
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_borrows_upper_case() {
        assert!(matches!(fold("COUNTER$"), Cow::Borrowed("COUNTER$")));
        assert_eq!(fold("counter$"), "COUNTER$");
    }

    #[test]
    fn test_pool_shares_allocation_per_name() {
        let mut pool = NamePool::new();
        let a = pool.intern("counter");
        let b = pool.intern("COUNTER");
        let c = pool.intern("other");
        assert_eq!(&*a, "COUNTER");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_normalize_is_not_shared() {
        let a = normalize("x");
        let b = normalize("X");
        assert_eq!(a, b);
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
