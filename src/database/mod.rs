//! # Database Operations
//!
//! Transactional persistence for batch checkpoints.
//!
//! ## Key Components
//!
//! - [`datastore`] - Datastore traits and the raw [`DatastoreError`]
//! - [`transaction`] - [`TransactionWrapper`] with timeout, rollback and deadlock retry
//! - [`memory`] - [`InMemoryDatastore`] with snapshot rollback and failure injection
//! - [`postgres`] - [`PgDatastore`] on sqlx (feature `postgres`)
//!
//! Low-level failures surface as [`DatastoreError`] and are classified into
//! [`DatabaseError`] (deadlock, constraint, connection, timeout, query) at the
//! transaction boundary.

pub mod datastore;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod transaction;

pub use datastore::{CheckpointRepository, DatastoreError, TransactionalDatastore};
pub use memory::{InMemoryDatastore, MemoryOperation, MemorySession};
#[cfg(feature = "postgres")]
pub use postgres::{PgDatastore, PgSession};
pub use transaction::{
    DatabaseError, IsolationLevel, TransactionConfig, TransactionContext, TransactionWrapper,
};
