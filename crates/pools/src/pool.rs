//! Fixed-capacity pool of execution site slots.

use crate::SiteTaskerQueue;
use meridian_tasks::{RepairTask, SiteTask, TxnTask};
use meridian_types::{CatalogContext, TxnId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Default slot count for the MP read-only pool.
pub const DEFAULT_MP_READ_CAPACITY: usize = 4;

/// Default slot count for the N-partition pool.
pub const DEFAULT_NP_CAPACITY: usize = 2;

/// Errors from site pool configuration.
#[derive(Debug, Error)]
pub enum SitePoolError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for a site pool.
#[derive(Debug, Clone)]
pub struct SitePoolConfig {
    /// Number of site slots; each runs at most one transaction at a time.
    pub capacity: usize,
}

impl SitePoolConfig {
    /// Configuration with the given slot count.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Default configuration for the MP read-only role.
    pub fn mp_read_default() -> Self {
        Self::with_capacity(DEFAULT_MP_READ_CAPACITY)
    }

    /// Default configuration for the N-partition role.
    pub fn np_default() -> Self {
        Self::with_capacity(DEFAULT_NP_CAPACITY)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SitePoolError> {
        if self.capacity == 0 {
            return Err(SitePoolError::InvalidConfig(
                "capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

struct PoolState {
    /// Slot index currently running each in-flight txn.
    assignments: HashMap<TxnId, usize>,
    /// Stack of idle slot indices.
    free: Vec<usize>,
    /// Catalog version idle slots have adopted.
    catalog_version: u64,
    shutdown: bool,
}

/// Bounded set of execution site slots with per-slot task queues.
///
/// The same type serves the MP read-only and the N-partition role; the
/// label only distinguishes them in logs. Work submitted for a txn id
/// is pinned to the slot that started it, so follow-up fragments and
/// repair tasks reach the site already running the transaction.
pub struct SitePool {
    label: &'static str,
    slots: Vec<Arc<SiteTaskerQueue>>,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for SitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SitePool")
            .field("label", &self.label)
            .field("capacity", &self.slots.len())
            .field("busy", &state.assignments.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

impl SitePool {
    /// Create a pool with the given role label and configuration.
    pub fn new(label: &'static str, config: SitePoolConfig) -> Result<Self, SitePoolError> {
        config.validate()?;
        let slots = (0..config.capacity)
            .map(|_| Arc::new(SiteTaskerQueue::new()))
            .collect::<Vec<_>>();
        info!(pool = label, capacity = config.capacity, "site pool initialized");
        Ok(Self {
            label,
            slots,
            state: Mutex::new(PoolState {
                assignments: HashMap::new(),
                free: (0..config.capacity).rev().collect(),
                catalog_version: 0,
                shutdown: false,
            }),
        })
    }

    /// The role label.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Total slot count.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently running a transaction.
    pub fn busy(&self) -> usize {
        self.state.lock().assignments.len()
    }

    /// Whether a new transaction can be admitted right now.
    pub fn can_accept_work(&self) -> bool {
        let state = self.state.lock();
        !state.shutdown && !state.free.is_empty()
    }

    /// Submit work for a transaction.
    ///
    /// A txn id seen before routes to the slot already running it, so
    /// restarts land on the same site. A new txn id claims a free slot;
    /// submitting a new txn with no free slot is a programmer error —
    /// admission must be gated on [`can_accept_work`](Self::can_accept_work).
    pub fn do_work(&self, txn_id: TxnId, task: TxnTask) {
        debug_assert_eq!(task.txn_id(), txn_id);
        let slot = {
            let mut state = self.state.lock();
            assert!(!state.shutdown, "{}: do_work after shutdown", self.label);
            match state.assignments.get(&txn_id) {
                Some(&slot) => slot,
                None => {
                    let slot = match state.free.pop() {
                        Some(slot) => slot,
                        None => panic!("{}: no free slot for txn {txn_id}", self.label),
                    };
                    state.assignments.insert(txn_id, slot);
                    slot
                }
            }
        };
        debug!(pool = self.label, txn_id = %txn_id, slot, "site work submitted");
        self.slots[slot].offer(SiteTask::Txn(task));
    }

    /// Release the slot running the given transaction.
    pub fn complete_work(&self, txn_id: TxnId) {
        let mut state = self.state.lock();
        let slot = match state.assignments.remove(&txn_id) {
            Some(slot) => slot,
            None => panic!("{}: complete_work for unknown txn {txn_id}", self.label),
        };
        state.free.push(slot);
        debug!(pool = self.label, txn_id = %txn_id, slot, "site work complete");
    }

    /// Inject a repair task into the slot running the given transaction.
    pub fn repair(&self, txn_id: TxnId, task: RepairTask) {
        let slot = {
            let state = self.state.lock();
            match state.assignments.get(&txn_id) {
                Some(&slot) => slot,
                None => panic!("{}: repair for unknown txn {txn_id}", self.label),
            }
        };
        debug!(pool = self.label, txn_id = %txn_id, slot, "repair task submitted");
        self.slots[slot].offer(SiteTask::Repair(task));
    }

    /// Adopt a new catalog version.
    ///
    /// Bookkeeping only at this layer: idle slots pick the version up
    /// immediately, busy slots when their transaction completes.
    pub fn update_catalog(&self, diff_cmds: &str, context: &CatalogContext) {
        let mut state = self.state.lock();
        state.catalog_version = context.version;
        debug!(
            pool = self.label,
            version = context.version,
            diff_bytes = diff_cmds.len(),
            "catalog updated"
        );
    }

    /// Adopt new deployment settings.
    pub fn update_settings(&self, context: &CatalogContext) {
        let mut state = self.state.lock();
        state.catalog_version = context.version;
        debug!(pool = self.label, version = context.version, "settings updated");
    }

    /// Catalog version the pool last adopted.
    pub fn catalog_version(&self) -> u64 {
        self.state.lock().catalog_version
    }

    /// Shut the pool down: reject new work and close every slot queue.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        for slot in &self.slots {
            slot.close();
        }
        info!(pool = self.label, "site pool shut down");
    }

    /// The queue feeding the given slot. Used by the site runner (and
    /// tests standing in for it) to consume work.
    pub fn slot_queue(&self, slot: usize) -> &Arc<SiteTaskerQueue> {
        &self.slots[slot]
    }

    /// Slot currently running the given transaction, if any.
    pub fn slot_for(&self, txn_id: TxnId) -> Option<usize> {
        self.state.lock().assignments.get(&txn_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_tasks::test_utils::{masters_for, mp_read};

    fn read_pool(capacity: usize) -> SitePool {
        SitePool::new("mp-ro", SitePoolConfig::with_capacity(capacity)).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = SitePool::new("mp-ro", SitePoolConfig::with_capacity(0));
        assert!(result.is_err());
    }

    #[test]
    fn test_capacity_backpressure() {
        let pool = read_pool(2);
        assert!(pool.can_accept_work());

        let r1 = mp_read(1);
        let r2 = mp_read(2);
        pool.do_work(r1.txn_id(), r1.clone());
        pool.do_work(r2.txn_id(), r2.clone());
        assert!(!pool.can_accept_work());
        assert_eq!(pool.busy(), 2);

        pool.complete_work(r1.txn_id());
        assert!(pool.can_accept_work());
        assert_eq!(pool.busy(), 1);
    }

    #[test]
    fn test_repeat_submission_pins_slot() {
        let pool = read_pool(2);
        let task = mp_read(1);
        pool.do_work(task.txn_id(), task.clone());
        let slot = pool.slot_for(task.txn_id()).unwrap();

        // Follow-up work for the same txn reuses the slot even with the
        // pool otherwise full.
        let other = mp_read(2);
        pool.do_work(other.txn_id(), other.clone());
        assert!(!pool.can_accept_work());
        pool.do_work(task.txn_id(), task.clone());

        assert_eq!(pool.slot_for(task.txn_id()), Some(slot));
        assert_eq!(pool.slot_queue(slot).len(), 2);
    }

    #[test]
    fn test_repair_routes_to_running_slot() {
        let pool = read_pool(2);
        let task = mp_read(3);
        pool.do_work(task.txn_id(), task.clone());
        let slot = pool.slot_for(task.txn_id()).unwrap();

        // Drain the original submission so only the repair remains.
        pool.slot_queue(slot).poll().unwrap();
        pool.repair(task.txn_id(), RepairTask::new(vec![], masters_for(&[])));

        let queued = pool.slot_queue(slot).poll().unwrap();
        assert!(queued.is_repair());
    }

    #[test]
    #[should_panic(expected = "unknown txn")]
    fn test_complete_unknown_txn_panics() {
        let pool = read_pool(1);
        pool.complete_work(TxnId::mp(99));
    }

    #[test]
    fn test_shutdown_closes_slots() {
        let pool = read_pool(2);
        pool.shutdown();
        assert!(!pool.can_accept_work());
        assert!(!pool.slot_queue(0).offer(SiteTask::Repair(RepairTask::new(
            vec![],
            HashMap::new()
        ))));
    }

    #[test]
    fn test_catalog_version_tracked() {
        let pool = read_pool(1);
        assert_eq!(pool.catalog_version(), 0);
        pool.update_catalog("alter table", &CatalogContext::new(3));
        assert_eq!(pool.catalog_version(), 3);
        pool.update_settings(&CatalogContext::new(4));
        assert_eq!(pool.catalog_version(), 4);
    }
}
