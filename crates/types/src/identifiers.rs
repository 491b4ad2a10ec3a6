//! Identifier newtypes shared across the initiator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of low bits of a [`TxnId`] holding the initiator partition.
const PARTITION_BITS: u32 = 14;
const PARTITION_MASK: u64 = (1 << PARTITION_BITS) - 1;

/// Partition id reserved for the multi-partition initiator itself.
///
/// Transactions stamped by the MPI carry this in the low bits of their
/// txn id; it is the maximum value representable in the partition field.
pub const MP_PARTITION_ID: u32 = PARTITION_MASK as u32;

/// Globally unique, monotonically assigned transaction identifier.
///
/// Packs an increasing sequence number in the high bits and the
/// assigning initiator's partition id in the low 14 bits. Ordering of
/// txn ids from the same initiator is execution order; the canonical
/// rendering is `(sequence:partition)` and every diagnostic dump uses
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Compose a txn id from a sequence number and initiator partition.
    pub fn new(sequence: u64, partition: u32) -> Self {
        debug_assert!(u64::from(partition) <= PARTITION_MASK);
        Self((sequence << PARTITION_BITS) | (u64::from(partition) & PARTITION_MASK))
    }

    /// Compose a txn id assigned by the multi-partition initiator.
    pub fn mp(sequence: u64) -> Self {
        Self::new(sequence, MP_PARTITION_ID)
    }

    /// The sequence component.
    pub fn sequence(self) -> u64 {
        self.0 >> PARTITION_BITS
    }

    /// The initiator partition component.
    pub fn partition(self) -> u32 {
        (self.0 & PARTITION_MASK) as u32
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}:{})", self.sequence(), self.partition())
    }
}

/// Identifier of a single data partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-site identifier: addresses one execution site on one host.
///
/// Host id lives in the low 32 bits, site id in the high 32 bits.
/// Rendered as `host:site`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HsId(pub u64);

impl HsId {
    /// Compose a host-site id from its parts.
    pub fn new(host: u32, site: u32) -> Self {
        Self((u64::from(site) << 32) | u64::from(host))
    }

    /// The host component.
    pub fn host(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// The site component.
    pub fn site(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for HsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host(), self.site())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_id_packing() {
        let id = TxnId::new(42, 7);
        assert_eq!(id.sequence(), 42);
        assert_eq!(id.partition(), 7);
        assert_eq!(id.to_string(), "(42:7)");
    }

    #[test]
    fn test_txn_id_mp_partition() {
        let id = TxnId::mp(1);
        assert_eq!(id.partition(), MP_PARTITION_ID);
        assert_eq!(id.sequence(), 1);
    }

    #[test]
    fn test_txn_id_ordering_tracks_sequence() {
        // Same initiator: later sequence compares greater.
        assert!(TxnId::mp(2) > TxnId::mp(1));
        assert!(TxnId::new(100, 3) > TxnId::new(99, 3));
    }

    #[test]
    fn test_hsid_packing() {
        let hsid = HsId::new(3, 9);
        assert_eq!(hsid.host(), 3);
        assert_eq!(hsid.site(), 9);
        assert_eq!(hsid.to_string(), "3:9");
    }
}
