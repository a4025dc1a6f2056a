use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::{Arc, OnceLock};

/// Symbol table shared by every context in the process
///
/// Method names, constant names, instance variable names and symbol
/// literals all go through here, so two names are equal exactly when
/// their `Arc<str>` pointers are equal.
pub struct Interner {
    pool: Mutex<FxHashSet<Arc<str>>>,
}

impl Interner {
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(FxHashSet::default()),
        }
    }

    pub fn global() -> &'static Self {
        static INTERNER: OnceLock<Interner> = OnceLock::new();
        INTERNER.get_or_init(Self::new)
    }

    /// Return the canonical `Arc<str>` for a name, creating it on first use
    pub fn intern(&self, name: &str) -> Arc<str> {
        let mut pool = self.pool.lock();
        if let Some(interned) = pool.get(name) {
            return interned.clone();
        }

        let interned: Arc<str> = Arc::from(name);
        pool.insert(interned.clone());
        interned
    }

    pub fn len(&self) -> usize {
        self.pool.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.lock().is_empty()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

/// Intern a name in the global symbol table
pub fn intern(name: &str) -> Arc<str> {
    Interner::global().intern(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_same_pointer() {
        let a = intern("each_with_index");
        let b = intern("each_with_index");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_local_interner_is_independent() {
        let interner = Interner::new();
        assert!(interner.is_empty());
        let a = interner.intern("x");
        let b = intern("x");
        assert_eq!(a, b);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }
}
