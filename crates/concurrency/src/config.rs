//! Transaction manager configuration.

use std::time::Duration;

/// Transaction manager configuration parameters.
#[derive(Debug, Clone)]
pub struct TxManagerConfig {
    /// Garbage collector steps run before each story allocation (default: 2).
    pub gc_steps_per_story: usize,

    /// Maximum number of live stories (default: unlimited).
    ///
    /// Allocating a story beyond this fails with `OutOfMemory`.
    pub max_stories: Option<usize>,

    /// Maximum read trackers plus conflict edges per transaction
    /// (default: unlimited).
    pub txn_region_limit: Option<usize>,

    /// Maximum statement nesting depth (default: 3).
    pub max_sub_statements: usize,

    /// Transactions running longer than this are logged at commit
    /// (default: 500ms).
    pub too_long_threshold: Duration,
}

impl Default for TxManagerConfig {
    fn default() -> Self {
        TxManagerConfig {
            gc_steps_per_story: 2,
            max_stories: None,
            txn_region_limit: None,
            max_sub_statements: 3,
            too_long_threshold: Duration::from_millis(500),
        }
    }
}

impl TxManagerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set GC steps per story allocation (builder pattern).
    pub fn with_gc_steps_per_story(mut self, steps: usize) -> Self {
        self.gc_steps_per_story = steps;
        self
    }

    /// Set story quota (builder pattern).
    pub fn with_max_stories(mut self, max: usize) -> Self {
        self.max_stories = Some(max);
        self
    }

    /// Set per-transaction tracker/edge quota (builder pattern).
    pub fn with_txn_region_limit(mut self, limit: usize) -> Self {
        self.txn_region_limit = Some(limit);
        self
    }

    /// Set statement nesting limit (builder pattern).
    pub fn with_max_sub_statements(mut self, max: usize) -> Self {
        self.max_sub_statements = max;
        self
    }

    /// Set the long-transaction warning threshold (builder pattern).
    pub fn with_too_long_threshold(mut self, threshold: Duration) -> Self {
        self.too_long_threshold = threshold;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), TxManagerConfigError> {
        if self.max_sub_statements == 0 {
            return Err(TxManagerConfigError::NoSubStatements);
        }
        if self.max_stories == Some(0) {
            return Err(TxManagerConfigError::ZeroStoryQuota);
        }
        Ok(())
    }

    /// Create a configuration for tests: no background GC, so story
    /// lifetimes are fully controlled by the test.
    pub fn for_testing() -> Self {
        TxManagerConfig {
            gc_steps_per_story: 0,
            ..Self::default()
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxManagerConfigError {
    /// Nesting limit must allow at least one statement.
    #[error("max_sub_statements must be at least 1")]
    NoSubStatements,

    /// A zero story quota would reject every write.
    #[error("max_stories must be at least 1")]
    ZeroStoryQuota,
}

impl From<TxManagerConfigError> for strata_core::Error {
    fn from(e: TxManagerConfigError) -> Self {
        strata_core::Error::InvalidOperation(e.to_string())
    }
}
