//! Acceptors the kind templates point their waiters at.
//!
//! Each one sees the fields its waiter projects out of the observed object, so the names it
//! reads must match the template's `result_arguments`.

use crate::waiter::{Observation, Verdict};

pub mod daemon_set;
pub mod deployment;
pub mod service;

/// Keep polling while the object can still be read.
///
/// Delete waits run with `err_graceful`, so the not-found poll ends them without reaching
/// this acceptor.
pub fn until_deleted(_observation: &Observation) -> Verdict {
    Verdict::Retry
}
