//! The task values the scheduler dispatches on.

use crate::TransactionState;
use meridian_types::{HsId, PartitionId, TxnId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// A transaction task queued at the multi-partition initiator.
///
/// The scheduler dispatches on the tag; the repair operations
/// (`update_masters`, `do_restart`) dispatch on it too, because the
/// N-partition variant trims the routing maps to its involved
/// partitions and the every-partition variant takes only the master
/// list.
///
/// Cloning is cheap: all variants share one [`TransactionState`].
#[derive(Clone)]
pub enum TxnTask {
    /// Multi-partition write. At most one executes cluster-wide.
    MpWrite(Arc<TransactionState>),
    /// Multi-partition read-only; runs concurrently up to pool capacity.
    MpRead(Arc<TransactionState>),
    /// N-partition transaction scoped to a named partition subset;
    /// a write with partition-scoped exclusion.
    Np(Arc<TransactionState>),
    /// Broadcast task affecting all partitions. An MP write for
    /// interlock purposes; only its repair surface is narrower.
    EveryPartition(Arc<TransactionState>),
}

impl std::fmt::Debug for TxnTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.kind_name(), self.txn_id())
    }
}

impl TxnTask {
    /// The shared transaction state.
    pub fn state(&self) -> &Arc<TransactionState> {
        match self {
            TxnTask::MpWrite(state)
            | TxnTask::MpRead(state)
            | TxnTask::Np(state)
            | TxnTask::EveryPartition(state) => state,
        }
    }

    /// The transaction id.
    pub fn txn_id(&self) -> TxnId {
        self.state().txn_id()
    }

    /// Whether the task is read-only.
    pub fn is_read_only(&self) -> bool {
        matches!(self, TxnTask::MpRead(_))
    }

    /// Whether the task is an N-partition transaction.
    pub fn is_np(&self) -> bool {
        matches!(self, TxnTask::Np(_))
    }

    /// Variant name for logs and dumps.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TxnTask::MpWrite(_) => "MpWrite",
            TxnTask::MpRead(_) => "MpRead",
            TxnTask::Np(_) => "Np",
            TxnTask::EveryPartition(_) => "EveryPartition",
        }
    }

    /// Partitions an N-partition task touches. Empty for MP variants.
    pub fn involved_partitions(&self) -> Vec<PartitionId> {
        self.state().involved_partitions().iter().copied().collect()
    }

    /// Refresh the task's routing metadata after a topology change.
    ///
    /// The N-partition variant keeps only the involved partitions; the
    /// every-partition variant keeps only the master list.
    pub fn update_masters(
        &self,
        masters: &[HsId],
        partition_masters: &HashMap<PartitionId, HsId>,
    ) {
        match self {
            TxnTask::MpWrite(state) | TxnTask::MpRead(state) => {
                state.update_masters(masters.to_vec(), partition_masters.clone());
            }
            TxnTask::Np(state) => {
                let trimmed = trim_partition_masters(state, partition_masters);
                trace!(
                    txn_id = %state.txn_id(),
                    partitions = trimmed.len(),
                    "updating n-partition task with trimmed masters"
                );
                state.update_masters(trimmed.values().copied().collect(), trimmed);
            }
            TxnTask::EveryPartition(state) => {
                state.update_masters(masters.to_vec(), HashMap::new());
            }
        }
    }

    /// Mark the transaction restarted and refresh its routing metadata.
    ///
    /// Safe to call while the task is executing; the running procedure
    /// observes the restart through its transaction state.
    pub fn do_restart(&self, masters: &[HsId], partition_masters: &HashMap<PartitionId, HsId>) {
        self.state().mark_restarted();
        self.update_masters(masters, partition_masters);
    }
}

/// Keep only the entries for partitions the transaction involves.
fn trim_partition_masters(
    state: &TransactionState,
    partition_masters: &HashMap<PartitionId, HsId>,
) -> HashMap<PartitionId, HsId> {
    partition_masters
        .iter()
        .filter(|(partition, _)| state.involved_partitions().contains(partition))
        .map(|(&partition, &master)| (partition, master))
        .collect()
}

/// Repair task injected into a site queue during fault recovery or
/// leader migration. Carries the post-change topology the site needs to
/// re-run the repair algorithm.
#[derive(Debug, Clone)]
pub struct RepairTask {
    /// Surviving master sites.
    pub masters: Vec<HsId>,
    /// Surviving per-partition masters.
    pub partition_masters: HashMap<PartitionId, HsId>,
}

impl RepairTask {
    /// Create a repair task for the given topology.
    pub fn new(masters: Vec<HsId>, partition_masters: HashMap<PartitionId, HsId>) -> Self {
        Self {
            masters,
            partition_masters,
        }
    }
}

/// Unit of work consumed by an execution site slot.
#[derive(Debug, Clone)]
pub enum SiteTask {
    /// Run (or resume) a transaction.
    Txn(TxnTask),
    /// Run the repair algorithm.
    Repair(RepairTask),
}

impl SiteTask {
    /// Txn id for transaction work; `None` for repair work.
    pub fn txn_id(&self) -> Option<TxnId> {
        match self {
            SiteTask::Txn(task) => Some(task.txn_id()),
            SiteTask::Repair(_) => None,
        }
    }

    /// Whether this is repair work.
    pub fn is_repair(&self) -> bool {
        matches!(self, SiteTask::Repair(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{masters_for, np, TOPOLOGY_PARTITIONS};

    #[test]
    fn test_np_update_masters_trims_to_involved() {
        let task = np(1, &[0, 1]);
        let global = masters_for(&TOPOLOGY_PARTITIONS);
        let masters: Vec<HsId> = global.values().copied().collect();

        task.update_masters(&masters, &global);

        let kept = task.state().partition_masters();
        assert_eq!(kept.len(), 2);
        assert!(kept.contains_key(&PartitionId(0)));
        assert!(kept.contains_key(&PartitionId(1)));

        // Masters list is exactly the trimmed map's values.
        let mut expected: Vec<HsId> = kept.values().copied().collect();
        let mut actual = task.state().masters();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_np_trim_drops_departed_partition() {
        let task = np(2, &[0, 3]);
        // New topology no longer carries partition 3.
        let global = masters_for(&[0, 1, 2]);
        let masters: Vec<HsId> = global.values().copied().collect();

        task.update_masters(&masters, &global);

        let kept = task.state().partition_masters();
        assert_eq!(kept.len(), 1);
        assert!(kept.contains_key(&PartitionId(0)));
    }

    #[test]
    fn test_every_partition_keeps_masters_only() {
        let task = crate::test_utils::every_partition(3);
        let global = masters_for(&TOPOLOGY_PARTITIONS);
        let masters: Vec<HsId> = global.values().copied().collect();

        task.update_masters(&masters, &global);

        assert_eq!(task.state().masters().len(), masters.len());
        assert!(task.state().partition_masters().is_empty());
    }

    #[test]
    fn test_do_restart_marks_state() {
        let task = crate::test_utils::mp_write(4);
        assert!(!task.state().is_restarted());
        task.do_restart(&[], &HashMap::new());
        assert!(task.state().is_restarted());
    }
}
