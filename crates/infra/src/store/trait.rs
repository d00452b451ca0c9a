use std::sync::Arc;

use goodsflow_core::{DeliveryItemId, OrderItemId, ReconcileResult};
use goodsflow_fulfillment::{DeliveryItem, OrderItem, QuantityAuditEntry, WriteOrigin};

/// Ledger mutation carried by a reconciliation commit.
#[derive(Debug, Clone)]
pub enum LedgerWrite {
    /// Recalculation corrects the order item without touching ledger rows.
    None,
    Insert(DeliveryItem),
    Update(DeliveryItem),
    Delete(DeliveryItemId),
}

/// One atomic reconciliation unit of work.
///
/// Constructed only inside this crate (the engine): holding a value of this
/// type is proof that the order-item write was planned through the domain
/// guard, which is what makes `commit` the single legitimate write path for
/// `quantity_remaining`. The store still re-runs the guard before applying.
#[derive(Debug, Clone)]
pub struct ReconcileTxn {
    pub(crate) order_item_id: OrderItemId,
    /// Version the order item had when this unit of work was planned.
    pub(crate) expected_version: u64,
    pub(crate) new_remaining: i64,
    pub(crate) origin: WriteOrigin,
    pub(crate) ledger_write: LedgerWrite,
    pub(crate) audit_entry: QuantityAuditEntry,
}

impl ReconcileTxn {
    pub(crate) fn new(
        order_item_id: OrderItemId,
        expected_version: u64,
        new_remaining: i64,
        origin: WriteOrigin,
        ledger_write: LedgerWrite,
        audit_entry: QuantityAuditEntry,
    ) -> Self {
        Self {
            order_item_id,
            expected_version,
            new_remaining,
            origin,
            ledger_write,
            audit_entry,
        }
    }
}

/// Transactional store for order items, delivery items and the audit trail.
///
/// ## Write paths
///
/// - **`insert_order_item`**: the initialization path (order ingestion). The
///   only write allowed to establish `remaining = requested` without going
///   through a reconciliation commit.
/// - **`update_order_item`**: the collaborator path for non-quantity fields.
///   Any change to `quantity_remaining` is rejected with
///   `DirectMutationForbidden`; `quantity_requested` is immutable.
/// - **`commit`**: the engine path, applying the order-item adjustment, the
///   ledger mutation and the audit append as one atomic unit, or nothing.
///
/// ## Concurrency
///
/// The order item row is the serialization point. `commit` checks the
/// caller's expected version against the stored version and rejects stale
/// units with `ConcurrencyConflict`; delivery and audit rows are only ever
/// written inside the same unit as an order-item adjustment.
pub trait ReconcileStore: Send + Sync {
    fn insert_order_item(&self, item: OrderItem) -> ReconcileResult<()>;

    /// Update non-quantity fields of an existing order item.
    fn update_order_item(&self, item: OrderItem) -> ReconcileResult<OrderItem>;

    /// Remove an order item that no live delivery items reference.
    ///
    /// The audit trail for the item is retained for forensic review.
    fn remove_order_item(&self, id: OrderItemId) -> ReconcileResult<()>;

    fn order_item(&self, id: OrderItemId) -> ReconcileResult<OrderItem>;

    fn delivery_item(&self, id: DeliveryItemId) -> ReconcileResult<DeliveryItem>;

    /// Live delivery items referencing the order item, oldest first.
    fn delivery_items_for(&self, order_item_id: OrderItemId)
    -> ReconcileResult<Vec<DeliveryItem>>;

    /// Audit entries for the order item in chronological order.
    fn audit_entries_for(
        &self,
        order_item_id: OrderItemId,
    ) -> ReconcileResult<Vec<QuantityAuditEntry>>;

    /// Apply one reconciliation unit of work atomically.
    ///
    /// Implementations must validate everything (version, guard, ledger
    /// references) before writing anything, so a failed commit leaves no
    /// partial state. Returns the updated order item.
    fn commit(&self, txn: ReconcileTxn) -> ReconcileResult<OrderItem>;
}

impl<S> ReconcileStore for Arc<S>
where
    S: ReconcileStore + ?Sized,
{
    fn insert_order_item(&self, item: OrderItem) -> ReconcileResult<()> {
        (**self).insert_order_item(item)
    }

    fn update_order_item(&self, item: OrderItem) -> ReconcileResult<OrderItem> {
        (**self).update_order_item(item)
    }

    fn remove_order_item(&self, id: OrderItemId) -> ReconcileResult<()> {
        (**self).remove_order_item(id)
    }

    fn order_item(&self, id: OrderItemId) -> ReconcileResult<OrderItem> {
        (**self).order_item(id)
    }

    fn delivery_item(&self, id: DeliveryItemId) -> ReconcileResult<DeliveryItem> {
        (**self).delivery_item(id)
    }

    fn delivery_items_for(
        &self,
        order_item_id: OrderItemId,
    ) -> ReconcileResult<Vec<DeliveryItem>> {
        (**self).delivery_items_for(order_item_id)
    }

    fn audit_entries_for(
        &self,
        order_item_id: OrderItemId,
    ) -> ReconcileResult<Vec<QuantityAuditEntry>> {
        (**self).audit_entries_for(order_item_id)
    }

    fn commit(&self, txn: ReconcileTxn) -> ReconcileResult<OrderItem> {
        (**self).commit(txn)
    }
}
