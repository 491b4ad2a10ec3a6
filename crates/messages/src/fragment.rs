//! Fragment response message.

use meridian_types::{HsId, TxnId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Completion status carried by a fragment response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FragmentResponseStatus {
    /// Fragment executed successfully.
    Success,
    /// Fragment failed with an error raised by user code.
    UserError,
    /// Fragment failed for a reason outside user control.
    UnexpectedError,
}

/// Error payload telling a running multi-partition procedure that its
/// transaction is being restarted and must unwind.
///
/// Downstream code converts this into a client-visible RESTART status;
/// the initiator core only manufactures and delivers it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("transaction {txn_id} restarted: {reason}")]
pub struct TransactionRestart {
    /// The transaction being restarted.
    pub txn_id: TxnId,
    /// Whether the restart was caused by a misrouted fragment rather
    /// than topology change.
    pub misrouted: bool,
    /// Human-readable cause, for diagnostics only.
    pub reason: String,
}

/// Response to a fragment of multi-partition work, sent by an execution
/// site back to the coordinating procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentResponse {
    /// Transaction the fragment belongs to.
    pub txn_id: TxnId,
    /// Site that produced the response.
    pub source: HsId,
    /// Completion status.
    pub status: FragmentResponseStatus,
    /// Present iff the response carries a transaction restart.
    pub restart: Option<TransactionRestart>,
}

impl FragmentResponse {
    /// A successful response from the given site.
    pub fn success(txn_id: TxnId, source: HsId) -> Self {
        Self {
            txn_id,
            source,
            status: FragmentResponseStatus::Success,
            restart: None,
        }
    }

    /// A synthetic failed response carrying a transaction restart.
    ///
    /// Injected by repair so the running procedure observes a
    /// restartable failure and unwinds cleanly. The source site is
    /// irrelevant for a synthetic response.
    pub fn poison(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            source: HsId(0),
            status: FragmentResponseStatus::UnexpectedError,
            restart: Some(TransactionRestart {
                txn_id,
                misrouted: false,
                reason: "transaction restarted due to fault recovery or shutdown".to_string(),
            }),
        }
    }

    /// Whether this response carries a transaction restart.
    pub fn is_restart(&self) -> bool {
        self.restart.is_some()
    }
}
