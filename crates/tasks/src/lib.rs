//! Transaction tasks for the meridian multi-partition initiator.
//!
//! This crate defines the values that flow through the initiator's
//! scheduler:
//!
//! - [`TransactionState`]: shared, internally synchronized state of one
//!   transaction (master routing maps, restart flag, fragment-response
//!   inbox)
//! - [`TxnTask`]: the tagged task value the scheduler dispatches on
//!   (MP write, MP read, N-partition, every-partition)
//! - [`RepairTask`] and [`SiteTask`]: what execution sites consume
//!
//! # Ownership
//!
//! A task admitted to a pool is logically shared: the pool executes it
//! while the scheduler may refresh its master maps during repair. All
//! mutation goes through [`TransactionState`], whose mutable surface is
//! safe to hit concurrently with execution.

mod state;
mod task;

pub use state::TransactionState;
pub use task::{RepairTask, SiteTask, TxnTask};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
