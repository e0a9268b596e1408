//! Commit-once holder for the function this process serves

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use super::module::UserFunction;

pub struct ActiveFunction {
    pub callable: Arc<dyn UserFunction>,
    pub source_path: PathBuf,
}

impl fmt::Debug for ActiveFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveFunction")
            .field("arity", &self.callable.arity())
            .field("source_path", &self.source_path)
            .finish()
    }
}

/// Empty until the first successful commit, immutable afterwards.
#[derive(Default)]
pub struct ActiveSlot {
    cell: OnceLock<ActiveFunction>,
}

impl ActiveSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&ActiveFunction> {
        self.cell.get()
    }

    /// Hands `function` back if the slot was already taken.
    pub fn commit(&self, function: ActiveFunction) -> Result<(), ActiveFunction> {
        self.cell.set(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::record_fn;

    fn active(path: &str, arity: usize) -> ActiveFunction {
        ActiveFunction {
            callable: record_fn(arity, 200.0, "x"),
            source_path: PathBuf::from(path),
        }
    }

    #[test]
    fn test_commit_once() {
        let slot = ActiveSlot::new();
        assert!(slot.get().is_none());

        slot.commit(active("/userfunc/a.js", 1)).unwrap();

        let rejected = slot.commit(active("/userfunc/b.js", 2)).unwrap_err();
        assert_eq!(rejected.source_path, PathBuf::from("/userfunc/b.js"));

        let current = slot.get().unwrap();
        assert_eq!(current.source_path, PathBuf::from("/userfunc/a.js"));
        assert_eq!(current.callable.arity(), 1);
    }
}
