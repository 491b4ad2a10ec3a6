//! In-flight interlock between MP reads, MP writes, and NP transactions.

use meridian_tasks::TxnTask;
use meridian_types::{PartitionId, TxnId};
use std::collections::HashMap;
use tracing::trace;

/// Which class of in-flight work a completed txn belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completed {
    Read,
    Write,
    Np,
}

/// Tracks every in-flight transaction and decides what may run next.
///
/// The maps enforce the exclusion discipline: at most one MP write
/// cluster-wide, reads and writes never concurrent, NP transactions
/// exclusive per partition and never concurrent with any MP work. The
/// per-partition index is the inverse of the per-txn partition list and
/// the two are kept consistent at all times.
#[derive(Debug, Default)]
pub(crate) struct Interlock {
    mp_writes: HashMap<TxnId, TxnTask>,
    mp_reads: HashMap<TxnId, TxnTask>,
    np_partitions: HashMap<TxnId, Vec<PartitionId>>,
    np_by_partition: HashMap<PartitionId, HashMap<TxnId, TxnTask>>,
}

impl Interlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_writes(&self) -> bool {
        !self.mp_writes.is_empty()
    }

    pub fn has_reads(&self) -> bool {
        !self.mp_reads.is_empty()
    }

    pub fn writes_len(&self) -> usize {
        self.mp_writes.len()
    }

    pub fn reads_len(&self) -> usize {
        self.mp_reads.len()
    }

    pub fn np_len(&self) -> usize {
        self.np_partitions.len()
    }

    /// Whether the interlock alone would admit this task.
    ///
    /// Pool capacity is the caller's concern; this covers only the
    /// exclusion rules between transaction classes.
    pub fn permits(&self, task: &TxnTask) -> bool {
        if self.has_writes() {
            return false;
        }
        if task.is_np() {
            if self.has_reads() {
                return false;
            }
            let blocked = task
                .state()
                .involved_partitions()
                .iter()
                .any(|partition| self.partition_busy(*partition));
            if blocked {
                trace!(
                    target: "mp_task_queue::np",
                    txn_id = %task.txn_id(),
                    partitions = ?task.involved_partitions(),
                    "np admission refused, partition busy"
                );
                return false;
            }
            return true;
        }
        // MP read or write: excluded while any NP txn is in flight.
        if !self.np_partitions.is_empty() {
            return false;
        }
        if !task.is_read_only() && self.has_reads() {
            return false;
        }
        true
    }

    fn partition_busy(&self, partition: PartitionId) -> bool {
        self.np_by_partition
            .get(&partition)
            .is_some_and(|txns| !txns.is_empty())
    }

    /// Record an admitted MP write (or every-partition task).
    pub fn begin_write(&mut self, task: TxnTask) {
        debug_assert!(self.mp_writes.is_empty(), "second concurrent MP write");
        self.mp_writes.insert(task.txn_id(), task);
    }

    /// Record an admitted MP read.
    pub fn begin_read(&mut self, task: TxnTask) {
        self.mp_reads.insert(task.txn_id(), task);
    }

    /// Record an admitted NP transaction in both directions of the index.
    pub fn begin_np(&mut self, task: TxnTask) {
        let partitions = task.involved_partitions();
        for partition in &partitions {
            self.np_by_partition
                .entry(*partition)
                .or_default()
                .insert(task.txn_id(), task.clone());
        }
        self.np_partitions.insert(task.txn_id(), partitions);
    }

    /// Remove a completed transaction, reporting which class it was.
    ///
    /// A txn id not found in any in-flight map is a programmer error.
    pub fn complete(&mut self, txn_id: TxnId) -> Completed {
        if self.mp_reads.remove(&txn_id).is_some() {
            return Completed::Read;
        }
        if self.mp_writes.remove(&txn_id).is_some() {
            debug_assert!(self.mp_writes.is_empty());
            return Completed::Write;
        }
        let Some(partitions) = self.np_partitions.remove(&txn_id) else {
            panic!("flush for unknown txn {txn_id}");
        };
        for partition in partitions {
            if let Some(txns) = self.np_by_partition.get_mut(&partition) {
                txns.remove(&txn_id);
                if txns.is_empty() {
                    self.np_by_partition.remove(&partition);
                }
            }
        }
        Completed::Np
    }

    /// The single in-flight MP write, if any.
    pub fn write_task(&self) -> Option<&TxnTask> {
        self.mp_writes.values().next()
    }

    /// In-flight MP reads.
    pub fn read_tasks(&self) -> impl Iterator<Item = &TxnTask> {
        self.mp_reads.values()
    }

    /// In-flight MP writes.
    pub fn write_tasks(&self) -> impl Iterator<Item = &TxnTask> {
        self.mp_writes.values()
    }

    /// Ids of in-flight MP reads.
    pub fn read_ids(&self) -> Vec<TxnId> {
        self.mp_reads.keys().copied().collect()
    }

    /// One task clone per in-flight NP transaction.
    pub fn np_tasks(&self) -> Vec<TxnTask> {
        self.np_partitions
            .iter()
            .map(|(txn_id, partitions)| {
                self.np_by_partition[&partitions[0]][txn_id].clone()
            })
            .collect()
    }

    /// Per-NP-txn partition lists, for diagnostics.
    pub fn np_partition_lists(&self) -> impl Iterator<Item = (&TxnId, &Vec<PartitionId>)> {
        self.np_partitions.iter()
    }

    /// Per-partition in-flight NP txn ids, for diagnostics.
    pub fn np_by_partition(&self) -> impl Iterator<Item = (&PartitionId, Vec<TxnId>)> {
        self.np_by_partition
            .iter()
            .map(|(partition, txns)| (partition, txns.keys().copied().collect()))
    }

    /// Check the interlock invariants. Compiled out of release builds.
    pub fn assert_invariants(&self) {
        debug_assert!(
            self.mp_writes.is_empty() || self.mp_reads.is_empty(),
            "reads and writes concurrently in flight"
        );
        debug_assert!(self.mp_writes.len() <= 1, "more than one MP write in flight");
        debug_assert!(
            self.np_partitions.is_empty()
                || (self.mp_writes.is_empty() && self.mp_reads.is_empty()),
            "NP and MP work concurrently in flight"
        );
        if cfg!(debug_assertions) {
            // Per-partition exclusivity: each partition runs at most one
            // NP txn, which also gives pairwise disjointness.
            for (partition, txns) in &self.np_by_partition {
                debug_assert!(
                    txns.len() <= 1,
                    "partition {partition} running {} NP txns",
                    txns.len()
                );
            }
            // Index consistency in both directions.
            for (txn_id, partitions) in &self.np_partitions {
                for partition in partitions {
                    debug_assert!(
                        self.np_by_partition
                            .get(partition)
                            .is_some_and(|txns| txns.contains_key(txn_id)),
                        "np index missing {txn_id} for partition {partition}"
                    );
                }
            }
            for (partition, txns) in &self.np_by_partition {
                for txn_id in txns.keys() {
                    debug_assert!(
                        self.np_partitions
                            .get(txn_id)
                            .is_some_and(|partitions| partitions.contains(partition)),
                        "np index stale entry {txn_id} for partition {partition}"
                    );
                }
            }
            // A txn id lives in exactly one in-flight map.
            for txn_id in self.mp_reads.keys() {
                debug_assert!(!self.mp_writes.contains_key(txn_id));
                debug_assert!(!self.np_partitions.contains_key(txn_id));
            }
            for txn_id in self.mp_writes.keys() {
                debug_assert!(!self.np_partitions.contains_key(txn_id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_tasks::test_utils::{every_partition, mp_read, mp_write, np};

    #[test]
    fn test_write_excludes_everything() {
        let mut interlock = Interlock::new();
        interlock.begin_write(mp_write(1));

        assert!(!interlock.permits(&mp_read(2)));
        assert!(!interlock.permits(&mp_write(3)));
        assert!(!interlock.permits(&np(4, &[0])));
        interlock.assert_invariants();
    }

    #[test]
    fn test_reads_admit_reads_but_not_writes() {
        let mut interlock = Interlock::new();
        interlock.begin_read(mp_read(1));

        assert!(interlock.permits(&mp_read(2)));
        assert!(!interlock.permits(&mp_write(3)));
        assert!(!interlock.permits(&np(4, &[0])));
        assert!(!interlock.permits(&every_partition(5)));
        interlock.assert_invariants();
    }

    #[test]
    fn test_np_partition_exclusion() {
        let mut interlock = Interlock::new();
        interlock.begin_np(np(1, &[0, 1]));

        // Overlapping partition set refused, disjoint admitted.
        assert!(!interlock.permits(&np(2, &[1, 2])));
        assert!(interlock.permits(&np(3, &[3])));
        // Any MP task is refused while NP work is in flight.
        assert!(!interlock.permits(&mp_read(4)));
        assert!(!interlock.permits(&mp_write(5)));
        interlock.assert_invariants();
    }

    #[test]
    fn test_complete_reports_class_and_frees_partitions() {
        let mut interlock = Interlock::new();
        let task = np(1, &[0, 1]);
        interlock.begin_np(task.clone());

        assert_eq!(interlock.complete(task.txn_id()), Completed::Np);
        assert_eq!(interlock.np_len(), 0);
        assert!(interlock.permits(&np(2, &[1, 2])));
        interlock.assert_invariants();
    }

    #[test]
    #[should_panic(expected = "unknown txn")]
    fn test_complete_unknown_txn_panics() {
        let mut interlock = Interlock::new();
        interlock.complete(TxnId::mp(42));
    }

    #[test]
    fn test_every_partition_behaves_as_write() {
        let mut interlock = Interlock::new();
        interlock.begin_write(every_partition(1));

        assert!(interlock.has_writes());
        assert!(!interlock.permits(&mp_read(2)));
        assert_eq!(interlock.complete(TxnId::mp(1)), Completed::Write);
        interlock.assert_invariants();
    }
}
