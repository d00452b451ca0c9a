//! Reconciliation storage boundary.
//!
//! Order items, the delivery ledger, and the audit trail live behind one
//! trait because a reconciliation commit must write all three as a single
//! atomic unit.

mod in_memory;
mod r#trait;

pub use in_memory::InMemoryStore;
pub use r#trait::{LedgerWrite, ReconcileStore, ReconcileTxn};
