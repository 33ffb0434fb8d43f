//! Fault injection for index tests
//!
//! [`FaultyIndex`] wraps any index and fails forward replaces
//! (`DupMode::ReplaceOrInsert`, the mode statements use to install a new
//! tuple) once its [`FaultInjector`] countdown runs out. Restoring replaces
//! issued by rollback, prepare and GC use `DupMode::Insert` and are never
//! failed: those must not fail in a healthy system.
//!
//! # Example
//!
//! ```
//! use strata_storage::testing::{FaultInjector, FaultyIndex};
//! use strata_storage::TreeIndex;
//! use strata_core::KeyDef;
//!
//! let injector = FaultInjector::new();
//! let idx = FaultyIndex::boxed(TreeIndex::boxed("pk", KeyDef::field(0)), injector.clone());
//! injector.fail_after(0);
//! assert!(injector.is_armed());
//! # drop(idx);
//! ```

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use strata_core::{DupMode, Index, IndexError, Key, KeyDef, Tuple};

const DISARMED: i64 = -1;

/// Shared countdown controlling one or more [`FaultyIndex`] wrappers
#[derive(Debug, Clone)]
pub struct FaultInjector {
    remaining: Arc<AtomicI64>,
}

impl FaultInjector {
    /// Disarmed injector
    pub fn new() -> Self {
        FaultInjector {
            remaining: Arc::new(AtomicI64::new(DISARMED)),
        }
    }

    /// Let `n` forward replaces succeed, then fail every following one
    pub fn fail_after(&self, n: u32) {
        self.remaining.store(n as i64, Ordering::SeqCst);
    }

    /// Stop failing
    pub fn disarm(&self) {
        self.remaining.store(DISARMED, Ordering::SeqCst);
    }

    /// Whether a countdown is active
    pub fn is_armed(&self) -> bool {
        self.remaining.load(Ordering::SeqCst) != DISARMED
    }

    fn should_fail(&self) -> bool {
        let left = self.remaining.load(Ordering::SeqCst);
        if left == DISARMED {
            return false;
        }
        if left == 0 {
            return true;
        }
        self.remaining.store(left - 1, Ordering::SeqCst);
        false
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}

/// Index wrapper that fails forward replaces on demand
pub struct FaultyIndex {
    inner: Box<dyn Index>,
    injector: FaultInjector,
}

impl FaultyIndex {
    /// Wrap an index
    pub fn new(inner: Box<dyn Index>, injector: FaultInjector) -> Self {
        FaultyIndex { inner, injector }
    }

    /// Wrap and box
    pub fn boxed(inner: Box<dyn Index>, injector: FaultInjector) -> Box<dyn Index> {
        Box::new(Self::new(inner, injector))
    }
}

impl Index for FaultyIndex {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn key_def(&self) -> &KeyDef {
        self.inner.key_def()
    }

    fn replace(
        &mut self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: DupMode,
    ) -> Result<Option<Tuple>, IndexError> {
        if mode == DupMode::ReplaceOrInsert && new.is_some() && self.injector.should_fail() {
            tracing::debug!(index = self.inner.name(), "injected index allocation failure");
            return Err(IndexError::OutOfMemory(64));
        }
        self.inner.replace(old, new, mode)
    }

    fn get(&self, key: &Key) -> Option<Tuple> {
        self.inner.get(key)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn tuples(&self) -> Vec<Tuple> {
        self.inner.tuples()
    }
}
