//! Messages exchanged between the initiator and execution sites.
//!
//! The initiator core is a library surface, not a wire protocol; the
//! only message it manufactures itself is the poisoned fragment
//! response injected during repair.

mod fragment;

pub use fragment::{FragmentResponse, FragmentResponseStatus, TransactionRestart};
