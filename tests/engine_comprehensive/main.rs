//! Engine Comprehensive Test Suite
//!
//! End-to-end tests that drive the transaction manager together with the
//! journal, the commit queue and several threads.
//!
//! ## Test Tier Structure
//!
//! - **Tier 1: Journal Replay** (durability guarantees)
//!   What the journal holds reproduces the committed state on a replica.
//!
//! - **Tier 2: Synchronous Commit** (quorum handling)
//!   Transactions on synchronous spaces wait for the commit queue.
//!
//! - **Tier 3: Read Views** (isolation)
//!   Demoted readers keep a stable picture while writers move on.
//!
//! - **Tier 4: Threads** (correctness under load)
//!   Many threads sharing one manager.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test engine_comprehensive
//! cargo test --test engine_comprehensive replay
//! ```

mod test_utils;

// Tier 1: Journal Replay
mod journal_replay_tests;

// Tier 2: Synchronous Commit
mod sync_commit_tests;

// Tier 3: Read Views
mod read_view_tests;

// Tier 4: Threads
mod threaded_tests;
