//! Fulfillment domain module (order items, delivery items, quantity audit).
//!
//! This crate contains the business rules for incremental purchase-order
//! fulfillment, implemented purely as deterministic domain logic (no IO, no
//! HTTP, no storage). The central invariant it protects:
//!
//! ```text
//! quantity_remaining = quantity_requested − Σ(delivered over live delivery items)
//! 0 ≤ quantity_remaining ≤ quantity_requested
//! ```
//!
//! `quantity_remaining` is a private field of [`OrderItem`]; every write goes
//! through [`OrderItem::write_remaining`], which enforces the direct-write
//! guard and the bound invariants.

pub mod audit;
pub mod delivery;
pub mod order_item;

pub use audit::{AuditOperation, QuantityAuditEntry};
pub use delivery::DeliveryItem;
pub use order_item::{OrderItem, QuantityAdjustment, WriteOrigin};
