//! Multi-partition initiator task queue.
//!
//! This crate implements the scheduler at the multi-partition initiator
//! (MPI): the single logical site through which every transaction that
//! touches more than one partition is serialized, dispatched, and
//! completed. It manages:
//!
//! - Separating the stream of reads and writes so they never execute
//!   concurrently
//! - Partition-scoped exclusion for N-partition transactions
//! - A two-lane backlog that retries refused tasks ahead of newer work
//! - Cooperative repair and restart of in-flight transactions during
//!   fault recovery or partition-leader migration
//!
//! # Concurrency
//!
//! The queue is hit concurrently from many network threads (`offer`),
//! many pool completers (`flush`), and a repair thread. One coarse
//! mutex serializes every public operation; the critical section is
//! bounded (at most the priority-lane length plus [`MAX_TASK_DEPTH`]
//! admission attempts) and all expensive work happens in the pools.

mod backlog;
mod interlock;
mod queue;

pub use queue::{MpTaskQueue, QueueStats, MAX_TASK_DEPTH};
