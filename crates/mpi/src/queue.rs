//! The multi-partition initiator task queue.

use crate::backlog::{Backlog, Lane};
use crate::interlock::{Completed, Interlock};
use meridian_messages::FragmentResponse;
use meridian_pools::{SitePool, SiteTaskerQueue};
use meridian_tasks::{RepairTask, SiteTask, TxnTask};
use meridian_types::{CatalogContext, HsId, PartitionId, TxnId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Upper bound on normal-lane inspections per drain pass.
///
/// Together with the priority-lane length this bounds the synchronous
/// work done inside `offer` and `flush` while the queue lock is held.
pub const MAX_TASK_DEPTH: usize = 20;

/// Whether a drain was triggered by a producer or a completer.
///
/// Producer-triggered drains are aggressive; completer-triggered drains
/// stop after the first admission so a completer never monopolizes the
/// queue lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainMode {
    Offer,
    Flush,
}

/// Point-in-time queue depths, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// In-flight MP reads.
    pub reads: usize,
    /// In-flight MP writes (at most 1).
    pub writes: usize,
    /// In-flight NP transactions.
    pub np: usize,
    /// Tasks waiting in the normal lane.
    pub normal_backlog: usize,
    /// Tasks waiting in the priority lane.
    pub priority_backlog: usize,
}

struct SchedulerState {
    backlog: Backlog,
    interlock: Interlock,
}

/// Transaction task queue of the multi-partition initiator.
///
/// Serializes the stream of multi-partition and N-partition work:
/// reads and writes never execute concurrently, at most one MP write
/// runs cluster-wide, and NP transactions exclude each other per
/// partition and exclude all MP work. Tasks that cannot run wait in a
/// two-lane backlog drained under a single coarse mutex.
///
/// Admitted work is handed to one of three destinations: the single
/// write dispatch queue feeding the MP writer site, the MP read-only
/// site pool, or the NP site pool. Completion comes back through
/// [`flush`](Self::flush); topology changes through
/// [`repair`](Self::repair).
pub struct MpTaskQueue {
    state: Mutex<SchedulerState>,
    ro_pool: Arc<SitePool>,
    np_pool: Arc<SitePool>,
    write_queue: Arc<SiteTaskerQueue>,
}

impl MpTaskQueue {
    /// Create a queue dispatching into the given pools and write queue.
    pub fn new(
        ro_pool: Arc<SitePool>,
        np_pool: Arc<SitePool>,
        write_queue: Arc<SiteTaskerQueue>,
    ) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                backlog: Backlog::new(),
                interlock: Interlock::new(),
            }),
            ro_pool,
            np_pool,
            write_queue,
        }
    }

    /// Stick a task in the backlog and drain.
    ///
    /// Many network threads race to reach here; the queue lock
    /// serializes arrival order. Always returns `true`.
    pub fn offer(&self, task: TxnTask) -> bool {
        let mut state = self.state.lock();
        trace!(
            target: "mp_task_queue",
            txn_id = %task.txn_id(),
            kind = task.kind_name(),
            "task offered"
        );
        state.backlog.push_normal(task);
        self.drain(&mut state, DrainMode::Offer);
        self.assert_consistent(&state);
        true
    }

    /// Record completion of the transaction and drain.
    ///
    /// Removes the txn from its in-flight map, releases its pool slot,
    /// and admits follow-up work. Returns how many tasks were newly
    /// dispatched. Flushing a txn id that is not in flight is a
    /// programmer error.
    pub fn flush(&self, txn_id: TxnId) -> usize {
        let mut state = self.state.lock();
        match state.interlock.complete(txn_id) {
            Completed::Read => self.ro_pool.complete_work(txn_id),
            Completed::Write => {}
            Completed::Np => self.np_pool.complete_work(txn_id),
        }
        debug!(target: "mp_task_queue", txn_id = %txn_id, "txn flushed");
        let dispatched = self.drain(&mut state, DrainMode::Flush);
        self.assert_consistent(&state);
        dispatched
    }

    /// Re-submit the in-flight task(s) to their site(s).
    ///
    /// Called by a blocked MP transaction instead of `flush` when it
    /// must run again. The interlock is left untouched and no drain
    /// happens; pools pin repeat submissions to the slot already
    /// running the txn.
    pub fn restart(&self) {
        let state = self.state.lock();
        if state.interlock.has_reads() {
            for task in state.interlock.read_tasks() {
                self.dispatch(task.clone());
            }
        } else if state.interlock.has_writes() {
            let task = state
                .interlock
                .write_task()
                .expect("write set non-empty")
                .clone();
            self.dispatch(task);
        } else {
            for task in state.interlock.np_tasks() {
                self.dispatch(task);
            }
        }
    }

    /// Unblock in-flight work and refresh routing after a topology change.
    ///
    /// Every site assigned to the initiator runs at most one transaction
    /// at a time, and reads and writes are never concurrently in flight.
    /// Whichever set is active gets poisoned: each in-flight MP
    /// procedure is marked restarted and receives a synthetic failed
    /// fragment response so it unwinds and comes back through the
    /// backlog. For a leader-migration-only event on writes
    /// (`balance_leader`) the poison is skipped; the write finishes
    /// where it is. Backlogged tasks get their master maps refreshed in
    /// place, order preserved.
    pub fn repair(
        &self,
        repair_task: RepairTask,
        masters: &[HsId],
        partition_masters: &HashMap<PartitionId, HsId>,
        balance_leader: bool,
    ) {
        let state = self.state.lock();
        let readonly = state.interlock.has_reads();
        if readonly {
            debug!(target: "mp_task_queue", balance_leader, "repairing reads");
            for txn_id in state.interlock.read_ids() {
                self.ro_pool.repair(txn_id, repair_task.clone());
            }
        } else {
            debug!(target: "mp_task_queue", balance_leader, "repairing writes");
            if !self.write_queue.offer(SiteTask::Repair(repair_task)) {
                warn!(target: "mp_task_queue", "write dispatch queue closed, repair task dropped");
            }
        }

        let current: Vec<&TxnTask> = if readonly {
            state.interlock.read_tasks().collect()
        } else {
            state.interlock.write_tasks().collect()
        };
        for task in current {
            match task {
                TxnTask::MpWrite(_) | TxnTask::MpRead(_) => {
                    debug!(target: "mp_task_queue", txn_id = %task.txn_id(), "poisoning task");
                    task.do_restart(masters, partition_masters);
                    if !balance_leader || readonly {
                        task.state()
                            .offer_received_fragment_response(FragmentResponse::poison(
                                task.txn_id(),
                            ));
                        debug!(target: "mp_task_queue", txn_id = %task.txn_id(), "restarting txn");
                    }
                }
                // An in-flight every-partition task is not a coordinated
                // MP procedure; it finishes through its own path.
                _ => {}
            }
        }

        for task in state.backlog.iter_normal() {
            debug!(
                target: "mp_task_queue",
                txn_id = %task.txn_id(),
                kind = task.kind_name(),
                "refreshing masters on backlogged task"
            );
            task.update_masters(masters, partition_masters);
        }
        self.assert_consistent(&state);
    }

    /// Forward a catalog update to both pools.
    pub fn update_catalog(&self, diff_cmds: &str, context: &CatalogContext) {
        let _state = self.state.lock();
        self.ro_pool.update_catalog(diff_cmds, context);
        self.np_pool.update_catalog(diff_cmds, context);
    }

    /// Forward a settings update to both pools.
    pub fn update_settings(&self, context: &CatalogContext) {
        let _state = self.state.lock();
        self.ro_pool.update_settings(context);
        self.np_pool.update_settings(context);
    }

    /// Shut both pools down.
    pub fn shutdown(&self) {
        let _state = self.state.lock();
        self.ro_pool.shutdown();
        self.np_pool.shutdown();
    }

    /// How many tasks are waiting in the normal lane.
    pub fn size(&self) -> usize {
        self.state.lock().backlog.len(Lane::Normal)
    }

    /// Point-in-time depths of every queue structure.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            reads: state.interlock.reads_len(),
            writes: state.interlock.writes_len(),
            np: state.interlock.np_len(),
            normal_backlog: state.backlog.len(Lane::Normal),
            priority_backlog: state.backlog.len(Lane::Priority),
        }
    }

    /// Admit as much backlogged work as the interlock allows.
    ///
    /// Drains the priority lane first, then up to [`MAX_TASK_DEPTH`]
    /// normal-lane entries. A refused head rotates to the other lane's
    /// tail; an admitted MP write stops the pass. In flush mode the
    /// pass ends at the first admission.
    fn drain(&self, state: &mut SchedulerState, mode: DrainMode) -> usize {
        let mut dispatched = 0;
        if state.backlog.is_empty() {
            return dispatched;
        }

        let priority_rounds = state.backlog.len(Lane::Priority);
        for _ in 0..priority_rounds {
            if state.interlock.has_writes() {
                return dispatched;
            }
            if state.backlog.peek(Lane::Priority).is_none() {
                break;
            }
            if self.try_admit(state, Lane::Priority) {
                dispatched += 1;
                if mode == DrainMode::Flush {
                    return dispatched;
                }
            } else {
                state.backlog.rotate(Lane::Priority);
            }
        }

        for _ in 0..MAX_TASK_DEPTH {
            if state.backlog.peek(Lane::Normal).is_none() {
                break;
            }
            if state.interlock.has_writes() {
                return dispatched;
            }
            if self.try_admit(state, Lane::Normal) {
                dispatched += 1;
                if mode == DrainMode::Flush {
                    return dispatched;
                }
            } else {
                state.backlog.rotate(Lane::Normal);
            }
        }
        dispatched
    }

    /// Try to admit the head of the given lane.
    ///
    /// On admission the task is popped, recorded in the interlock, and
    /// dispatched; on refusal the lane is left untouched for the caller
    /// to rotate.
    fn try_admit(&self, state: &mut SchedulerState, lane: Lane) -> bool {
        {
            let Some(task) = state.backlog.peek(lane) else {
                return false;
            };
            if !state.interlock.permits(task) {
                return false;
            }
            if task.is_np() && !self.np_pool.can_accept_work() {
                return false;
            }
            if task.is_read_only() && !self.ro_pool.can_accept_work() {
                return false;
            }
        }

        let task = state.backlog.pop(lane).expect("peeked head");
        match &task {
            TxnTask::Np(_) => state.interlock.begin_np(task.clone()),
            TxnTask::MpRead(_) => state.interlock.begin_read(task.clone()),
            TxnTask::MpWrite(_) | TxnTask::EveryPartition(_) => {
                state.interlock.begin_write(task.clone())
            }
        }
        self.dispatch(task);
        true
    }

    /// Hand a task to its destination: NP pool, read pool, or the
    /// single write dispatch queue.
    fn dispatch(&self, task: TxnTask) {
        trace!(
            target: "mp_task_queue",
            txn_id = %task.txn_id(),
            kind = task.kind_name(),
            "task dispatched to site"
        );
        match &task {
            TxnTask::Np(_) => self.np_pool.do_work(task.txn_id(), task.clone()),
            TxnTask::MpRead(_) => self.ro_pool.do_work(task.txn_id(), task.clone()),
            TxnTask::MpWrite(_) | TxnTask::EveryPartition(_) => {
                if !self.write_queue.offer(SiteTask::Txn(task.clone())) {
                    warn!(
                        target: "mp_task_queue",
                        txn_id = %task.txn_id(),
                        "write dispatch queue closed, task dropped"
                    );
                }
            }
        }
    }

    /// Invariant checks after every public operation. Compiled out of
    /// release builds.
    fn assert_consistent(&self, state: &SchedulerState) {
        state.interlock.assert_invariants();
        debug_assert!(state.interlock.reads_len() <= self.ro_pool.capacity());
        debug_assert!(state.interlock.np_len() <= self.np_pool.capacity());
    }
}

impl fmt::Display for MpTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        writeln!(f, "MpTaskQueue:")?;
        writeln!(f, "\tcurrent mp reads size: {}", state.interlock.reads_len())?;
        writeln!(f, "\tcurrent mp writes size: {}", state.interlock.writes_len())?;
        writeln!(
            f,
            "\tcurrent np transaction size: {}",
            state.interlock.np_len()
        )?;
        if state.interlock.np_len() > 0 {
            for (txn_id, partitions) in state.interlock.np_partition_lists() {
                write!(f, "\t\tnp txn {txn_id} -> ")?;
                for partition in partitions {
                    write!(f, "{partition} ")?;
                }
                writeln!(f)?;
            }
            for (partition, txn_ids) in state.interlock.np_by_partition() {
                write!(f, "\t\tpartition {partition} -> ")?;
                for txn_id in txn_ids {
                    write!(f, "{txn_id} ")?;
                }
                writeln!(f)?;
            }
        }
        write!(
            f,
            "\tpriority backlog size: {}",
            state.backlog.len(Lane::Priority)
        )?;
        if let Some(head) = state.backlog.peek(Lane::Priority) {
            write!(f, ", head: {}", head.txn_id())?;
        }
        writeln!(f)?;
        write!(
            f,
            "\tnormal backlog size: {}",
            state.backlog.len(Lane::Normal)
        )?;
        if let Some(head) = state.backlog.peek(Lane::Normal) {
            write!(f, ", head: {}", head.txn_id())?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_pools::SitePoolConfig;
    use meridian_tasks::test_utils::{mp_read, mp_write, np};

    fn queue() -> MpTaskQueue {
        MpTaskQueue::new(
            Arc::new(SitePool::new("mp-ro", SitePoolConfig::mp_read_default()).unwrap()),
            Arc::new(SitePool::new("np", SitePoolConfig::np_default()).unwrap()),
            Arc::new(SiteTaskerQueue::new()),
        )
    }

    #[test]
    fn test_offer_dispatches_idle_write() {
        let queue = queue();
        assert!(queue.offer(mp_write(1)));

        let stats = queue.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.normal_backlog, 0);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_flush_reports_dispatch_count() {
        let queue = queue();
        queue.offer(mp_write(1));
        queue.offer(mp_read(2));
        assert_eq!(queue.size(), 1);

        // Completing the write admits exactly one follow-up.
        assert_eq!(queue.flush(TxnId::mp(1)), 1);
        let stats = queue.stats();
        assert_eq!(stats.writes, 0);
        assert_eq!(stats.reads, 1);
    }

    #[test]
    #[should_panic(expected = "unknown txn")]
    fn test_flush_unknown_txn_panics() {
        let queue = queue();
        queue.flush(TxnId::mp(9));
    }

    #[test]
    fn test_size_counts_normal_lane_only() {
        let queue = queue();
        queue.offer(np(1, &[0]));
        // Refused work rotates to the priority lane and leaves size() alone.
        queue.offer(np(2, &[0]));
        let stats = queue.stats();
        assert_eq!(stats.np, 1);
        assert_eq!(stats.priority_backlog, 1);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_display_dump_renders_depths() {
        let queue = queue();
        queue.offer(np(1, &[0, 2]));
        queue.offer(mp_read(2));

        let dump = queue.to_string();
        assert!(dump.contains("current np transaction size: 1"));
        assert!(dump.contains("np txn (1:16383) -> 0 2"));
        // The refused read rotated to the priority lane.
        assert!(dump.contains("priority backlog size: 1, head: (2:16383)"));
    }
}
