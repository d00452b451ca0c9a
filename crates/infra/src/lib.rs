//! Infrastructure layer: reconciliation storage and the engine that
//! orchestrates atomic units of work over it.

pub mod engine;
pub mod store;

pub use engine::{
    AmendDelivery, CancelDelivery, CreateOrderItem, DriftReport, Recalculate,
    ReconciliationEngine, RecordDelivery,
};
pub use store::{InMemoryStore, LedgerWrite, ReconcileStore, ReconcileTxn};

#[cfg(test)]
mod integration_tests;
