//! Core types for the meridian multi-partition initiator.
//!
//! This crate provides the foundational types used throughout the
//! initiator implementation:
//!
//! - **Identifiers**: `TxnId`, `PartitionId`, `HsId`
//! - **Catalog**: `CatalogContext`, the opaque catalog snapshot handed
//!   through catalog/settings updates
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crates, making it the foundation layer.

mod catalog;
mod identifiers;

pub use catalog::CatalogContext;
pub use identifiers::{HsId, PartitionId, TxnId, MP_PARTITION_ID};
