//! Atomic transactions over file/VCS mutations.
//!
//! A transaction wraps a batch of operations behind a savepoint so the
//! whole batch can be undone exactly. The savepoint mechanism is
//! swappable: git-based in repositories, directory snapshots elsewhere.

pub mod manager;
pub mod savepoint;

pub use manager::{Transaction, TransactionManager, TransactionStatus};
pub use savepoint::{DirSnapshots, GitSavepoints, SavepointStore};
