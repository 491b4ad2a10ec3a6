//! Shared transaction state.

use meridian_messages::FragmentResponse;
use meridian_types::{HsId, PartitionId, TxnId};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Master routing view, replaced wholesale on every update so readers
/// never observe a half-applied topology change.
#[derive(Debug, Default, Clone)]
struct MasterView {
    masters: Vec<HsId>,
    partition_masters: HashMap<PartitionId, HsId>,
}

/// State of one transaction, shared between the scheduler and the pool
/// slot executing it.
///
/// Identity fields are immutable. The master routing maps sit behind an
/// internal lock and may be refreshed by repair while the transaction
/// is executing; the executing procedure always reads a complete view.
/// The fragment-response inbox is the channel through which repair
/// delivers its poisoned response.
pub struct TransactionState {
    txn_id: TxnId,
    read_only: bool,
    np: bool,
    involved_partitions: BTreeSet<PartitionId>,
    masters: Mutex<MasterView>,
    inbox: Mutex<VecDeque<FragmentResponse>>,
    inbox_ready: Condvar,
    restarted: AtomicBool,
}

impl std::fmt::Debug for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionState")
            .field("txn_id", &self.txn_id)
            .field("read_only", &self.read_only)
            .field("np", &self.np)
            .field("involved_partitions", &self.involved_partitions)
            .field("restarted", &self.restarted.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TransactionState {
    /// State for a multi-partition transaction touching every partition.
    pub fn mp(
        txn_id: TxnId,
        read_only: bool,
        masters: Vec<HsId>,
        partition_masters: HashMap<PartitionId, HsId>,
    ) -> Self {
        Self {
            txn_id,
            read_only,
            np: false,
            involved_partitions: BTreeSet::new(),
            masters: Mutex::new(MasterView {
                masters,
                partition_masters,
            }),
            inbox: Mutex::new(VecDeque::new()),
            inbox_ready: Condvar::new(),
            restarted: AtomicBool::new(false),
        }
    }

    /// State for an N-partition transaction.
    ///
    /// The partition-masters map passed in must already be scoped to
    /// the involved partitions; the involved set and the masters list
    /// are derived from it.
    pub fn np(txn_id: TxnId, partition_masters: HashMap<PartitionId, HsId>) -> Self {
        assert!(
            !partition_masters.is_empty(),
            "n-partition transaction {txn_id} names no partitions"
        );
        let involved_partitions: BTreeSet<PartitionId> =
            partition_masters.keys().copied().collect();
        let masters: Vec<HsId> = partition_masters.values().copied().collect();
        Self {
            txn_id,
            read_only: false,
            np: true,
            involved_partitions,
            masters: Mutex::new(MasterView {
                masters,
                partition_masters,
            }),
            inbox: Mutex::new(VecDeque::new()),
            inbox_ready: Condvar::new(),
            restarted: AtomicBool::new(false),
        }
    }

    /// The transaction id.
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Whether the transaction is read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the transaction is scoped to a named partition subset.
    pub fn is_np(&self) -> bool {
        self.np
    }

    /// Partitions an N-partition transaction touches (empty for MP).
    pub fn involved_partitions(&self) -> &BTreeSet<PartitionId> {
        &self.involved_partitions
    }

    /// Snapshot of the master site list.
    pub fn masters(&self) -> Vec<HsId> {
        self.masters.lock().masters.clone()
    }

    /// Snapshot of the partition-master map.
    pub fn partition_masters(&self) -> HashMap<PartitionId, HsId> {
        self.masters.lock().partition_masters.clone()
    }

    /// Replace both routing maps atomically.
    pub fn update_masters(
        &self,
        masters: Vec<HsId>,
        partition_masters: HashMap<PartitionId, HsId>,
    ) {
        let mut view = self.masters.lock();
        view.masters = masters;
        view.partition_masters = partition_masters;
    }

    /// Mark the transaction as restarted.
    pub fn mark_restarted(&self) {
        self.restarted.store(true, Ordering::Release);
    }

    /// Whether the transaction has been restarted by repair.
    pub fn is_restarted(&self) -> bool {
        self.restarted.load(Ordering::Acquire)
    }

    /// Deliver a fragment response to the executing procedure.
    ///
    /// Called from network threads for real responses and from the
    /// repair coordinator for the poisoned one. Never blocks.
    pub fn offer_received_fragment_response(&self, response: FragmentResponse) {
        let mut inbox = self.inbox.lock();
        inbox.push_back(response);
        self.inbox_ready.notify_one();
    }

    /// Take the next fragment response if one is waiting.
    pub fn poll_fragment_response(&self) -> Option<FragmentResponse> {
        self.inbox.lock().pop_front()
    }

    /// Block until a fragment response arrives or the timeout expires.
    pub fn take_fragment_response(&self, timeout: Duration) -> Option<FragmentResponse> {
        let mut inbox = self.inbox.lock();
        loop {
            if let Some(response) = inbox.pop_front() {
                return Some(response);
            }
            if self.inbox_ready.wait_for(&mut inbox, timeout).timed_out() {
                return inbox.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_messages::FragmentResponseStatus;

    fn masters_for(partitions: &[u32]) -> HashMap<PartitionId, HsId> {
        partitions
            .iter()
            .map(|&p| (PartitionId(p), HsId::new(p, 0)))
            .collect()
    }

    #[test]
    fn test_np_state_derives_involved_set() {
        let state = TransactionState::np(TxnId::mp(1), masters_for(&[0, 2]));
        assert!(state.is_np());
        assert!(!state.is_read_only());
        let involved: Vec<u32> = state.involved_partitions().iter().map(|p| p.0).collect();
        assert_eq!(involved, vec![0, 2]);
        assert_eq!(state.masters().len(), 2);
    }

    #[test]
    fn test_update_masters_replaces_wholesale() {
        let state = TransactionState::mp(TxnId::mp(1), false, vec![HsId::new(0, 0)], masters_for(&[0]));
        state.update_masters(vec![HsId::new(1, 1)], masters_for(&[1]));
        assert_eq!(state.masters(), vec![HsId::new(1, 1)]);
        assert!(state.partition_masters().contains_key(&PartitionId(1)));
        assert!(!state.partition_masters().contains_key(&PartitionId(0)));
    }

    #[test]
    fn test_inbox_delivery_and_poll() {
        let state = TransactionState::mp(TxnId::mp(3), false, vec![], HashMap::new());
        assert!(state.poll_fragment_response().is_none());

        state.offer_received_fragment_response(FragmentResponse::poison(TxnId::mp(3)));
        let response = state.poll_fragment_response().expect("response waiting");
        assert_eq!(response.status, FragmentResponseStatus::UnexpectedError);
        assert!(response.is_restart());
        assert!(state.poll_fragment_response().is_none());
    }

    #[test]
    fn test_take_wakes_on_delivery() {
        use std::sync::Arc;

        let state = Arc::new(TransactionState::mp(TxnId::mp(4), true, vec![], HashMap::new()));
        let delivering = Arc::clone(&state);
        let handle = std::thread::spawn(move || {
            delivering.offer_received_fragment_response(FragmentResponse::success(
                TxnId::mp(4),
                HsId::new(0, 1),
            ));
        });

        let response = state.take_fragment_response(Duration::from_secs(5));
        handle.join().unwrap();
        assert!(response.is_some());
    }

    #[test]
    fn test_restart_flag() {
        let state = TransactionState::mp(TxnId::mp(5), false, vec![], HashMap::new());
        assert!(!state.is_restarted());
        state.mark_restarted();
        assert!(state.is_restarted());
    }
}
