//! Execution site pools for the meridian multi-partition initiator.
//!
//! This crate provides the two building blocks the scheduler dispatches
//! into:
//!
//! - [`SiteTaskerQueue`]: unbounded many-producer single-consumer FIFO
//!   feeding one execution site
//! - [`SitePool`]: fixed-capacity pool of site slots with per-slot
//!   queues and txn-to-slot pinning, used in both the MP read-only and
//!   the N-partition role
//!
//! Pool operations are non-blocking bookkeeping: they enqueue and
//! return. All waiting happens on the consumer side of the slot queues,
//! outside the scheduler's critical section.

mod pool;
mod tasker;

pub use pool::{
    SitePool, SitePoolConfig, SitePoolError, DEFAULT_MP_READ_CAPACITY, DEFAULT_NP_CAPACITY,
};
pub use tasker::SiteTaskerQueue;
