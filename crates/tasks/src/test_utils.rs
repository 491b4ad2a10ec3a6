//! Task builders for tests.

use crate::{TransactionState, TxnTask};
use meridian_types::{HsId, PartitionId, TxnId};
use std::collections::HashMap;
use std::sync::Arc;

/// Partitions the default test topology carries.
pub const TOPOLOGY_PARTITIONS: [u32; 4] = [0, 1, 2, 3];

/// Partition-master map for the given partitions, one site per
/// partition on host 0.
pub fn masters_for(partitions: &[u32]) -> HashMap<PartitionId, HsId> {
    partitions
        .iter()
        .map(|&p| (PartitionId(p), HsId::new(0, p)))
        .collect()
}

fn default_masters() -> (Vec<HsId>, HashMap<PartitionId, HsId>) {
    let partition_masters = masters_for(&TOPOLOGY_PARTITIONS);
    let masters = partition_masters.values().copied().collect();
    (masters, partition_masters)
}

/// A multi-partition write task.
pub fn mp_write(sequence: u64) -> TxnTask {
    let (masters, partition_masters) = default_masters();
    TxnTask::MpWrite(Arc::new(TransactionState::mp(
        TxnId::mp(sequence),
        false,
        masters,
        partition_masters,
    )))
}

/// A multi-partition read-only task.
pub fn mp_read(sequence: u64) -> TxnTask {
    let (masters, partition_masters) = default_masters();
    TxnTask::MpRead(Arc::new(TransactionState::mp(
        TxnId::mp(sequence),
        true,
        masters,
        partition_masters,
    )))
}

/// An N-partition task touching the given partitions.
pub fn np(sequence: u64, partitions: &[u32]) -> TxnTask {
    TxnTask::Np(Arc::new(TransactionState::np(
        TxnId::mp(sequence),
        masters_for(partitions),
    )))
}

/// An every-partition broadcast task.
pub fn every_partition(sequence: u64) -> TxnTask {
    let (masters, _) = default_masters();
    TxnTask::EveryPartition(Arc::new(TransactionState::mp(
        TxnId::mp(sequence),
        false,
        masters,
        HashMap::new(),
    )))
}
