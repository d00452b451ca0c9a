//! Quantity reconciliation engine (application-level orchestration).
//!
//! Every public operation executes the same pipeline as one atomic unit of
//! work against the store:
//!
//! ```text
//! read current state → validate → plan adjustment (pure domain)
//!   → commit { order-item write, ledger write, audit append } atomically
//! ```
//!
//! Validation precedes any write, so rejected operations need no
//! compensating rollback. The order item is the serialization point: the
//! commit carries the version observed at read time, and the store rejects
//! stale units with `ConcurrencyConflict`. The engine retries the whole
//! operation (fresh read included) up to [`MAX_CONFLICT_RETRIES`] times and
//! then surfaces the conflict as a transient failure; it never proceeds on a
//! stale read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use goodsflow_core::{DeliveryId, DeliveryItemId, OrderItemId, ReconcileError, ReconcileResult};
use goodsflow_fulfillment::{
    AuditOperation, DeliveryItem, OrderItem, QuantityAuditEntry, WriteOrigin,
};

use crate::store::{LedgerWrite, ReconcileStore, ReconcileTxn};

/// Retry budget for optimistic commits that lose the race on an order item.
const MAX_CONFLICT_RETRIES: u32 = 8;

/// Command: open a new order item (order-ingestion boundary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderItem {
    pub order_item_id: OrderItemId,
    pub description: String,
    pub quantity_requested: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: record a partial fulfillment against an order item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDelivery {
    pub delivery_item_id: DeliveryItemId,
    pub order_item_id: OrderItemId,
    pub delivery_id: DeliveryId,
    pub delivered_quantity: i64,
    /// Smallest currency unit (e.g. cents).
    pub unit_price: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: correct the quantity of a recorded fulfillment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendDelivery {
    pub delivery_item_id: DeliveryItemId,
    pub new_delivered_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: cancel a recorded fulfillment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDelivery {
    pub delivery_item_id: DeliveryItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: recompute the remaining quantity from the ledger (operator tool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recalculate {
    pub order_item_id: OrderItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Read-only diagnostic: stored vs. ledger-derived remaining quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub order_item_id: OrderItemId,
    pub quantity_requested: i64,
    pub stored_remaining: i64,
    pub ledger_sum: i128,
}

impl DriftReport {
    /// What the remaining quantity should be according to the ledger.
    pub fn derived_remaining(&self) -> i128 {
        self.quantity_requested as i128 - self.ledger_sum
    }

    pub fn has_drift(&self) -> bool {
        self.stored_remaining as i128 != self.derived_remaining()
    }
}

/// The quantity reconciliation engine.
///
/// Owns the invariant `remaining = requested − Σ(live delivered)` and is the
/// only code path that assembles [`ReconcileTxn`] units, which is what makes
/// it the only legitimate writer of `quantity_remaining`.
#[derive(Debug)]
pub struct ReconciliationEngine<S> {
    store: S,
}

impl<S> ReconciliationEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: ReconcileStore> ReconciliationEngine<S> {
    /// Open a new order item with `remaining = requested`.
    ///
    /// The initialization write: permitted without an audit entry because it
    /// establishes the derived value rather than adjusting it.
    pub fn create_order_item(&self, cmd: CreateOrderItem) -> ReconcileResult<OrderItem> {
        let item = OrderItem::open(
            cmd.order_item_id,
            cmd.description,
            cmd.quantity_requested,
            cmd.occurred_at,
        )?;
        self.store.insert_order_item(item.clone())?;
        tracing::debug!(
            order_item = %item.id(),
            requested = item.quantity_requested(),
            "order item opened"
        );
        Ok(item)
    }

    /// Record a delivery: creates the delivery item, reduces the remaining
    /// quantity and appends a CREATE audit entry, all in one unit of work.
    pub fn record_delivery(&self, cmd: RecordDelivery) -> ReconcileResult<OrderItem> {
        self.with_retry("record_delivery", || {
            let order_item = self.store.order_item(cmd.order_item_id)?;
            let adjustment = order_item.plan_record(cmd.delivered_quantity)?;
            let delivery = DeliveryItem::new(
                cmd.delivery_item_id,
                cmd.order_item_id,
                cmd.delivery_id,
                cmd.delivered_quantity,
                cmd.unit_price,
                cmd.occurred_at,
            )?;
            let entry = QuantityAuditEntry::adjustment(
                AuditOperation::Create,
                cmd.order_item_id,
                cmd.delivery_item_id,
                order_item.quantity_remaining(),
                adjustment.new_remaining,
                cmd.occurred_at,
            );
            let updated = self.store.commit(ReconcileTxn::new(
                cmd.order_item_id,
                order_item.version(),
                adjustment.new_remaining,
                WriteOrigin::EngineAdjustment,
                LedgerWrite::Insert(delivery),
                entry,
            ))?;
            tracing::debug!(
                order_item = %cmd.order_item_id,
                delivery_item = %cmd.delivery_item_id,
                delta = adjustment.delta_applied,
                remaining = updated.quantity_remaining(),
                "delivery recorded"
            );
            Ok(updated)
        })
    }

    /// Amend a recorded delivery's quantity.
    ///
    /// A no-op (no delta, no audit entry) when the new quantity equals the
    /// recorded one.
    pub fn amend_delivery(&self, cmd: AmendDelivery) -> ReconcileResult<OrderItem> {
        self.with_retry("amend_delivery", || {
            let delivery = self.store.delivery_item(cmd.delivery_item_id)?;
            let order_item = self.store.order_item(delivery.order_item_id())?;
            let Some(adjustment) =
                order_item.plan_amend(delivery.delivered_quantity(), cmd.new_delivered_quantity)?
            else {
                return Ok(order_item);
            };
            let amended = delivery.with_quantity(cmd.new_delivered_quantity)?;
            let entry = QuantityAuditEntry::adjustment(
                AuditOperation::Update,
                order_item.id(),
                cmd.delivery_item_id,
                order_item.quantity_remaining(),
                adjustment.new_remaining,
                cmd.occurred_at,
            );
            let updated = self.store.commit(ReconcileTxn::new(
                order_item.id(),
                order_item.version(),
                adjustment.new_remaining,
                WriteOrigin::EngineAdjustment,
                LedgerWrite::Update(amended),
                entry,
            ))?;
            tracing::debug!(
                order_item = %order_item.id(),
                delivery_item = %cmd.delivery_item_id,
                delta = adjustment.delta_applied,
                remaining = updated.quantity_remaining(),
                "delivery amended"
            );
            Ok(updated)
        })
    }

    /// Cancel a recorded delivery, restoring its quantity to the order item.
    pub fn cancel_delivery(&self, cmd: CancelDelivery) -> ReconcileResult<OrderItem> {
        self.with_retry("cancel_delivery", || {
            let delivery = self.store.delivery_item(cmd.delivery_item_id)?;
            let order_item = self.store.order_item(delivery.order_item_id())?;
            let adjustment = order_item.plan_cancel(delivery.delivered_quantity())?;
            let entry = QuantityAuditEntry::adjustment(
                AuditOperation::Delete,
                order_item.id(),
                cmd.delivery_item_id,
                order_item.quantity_remaining(),
                adjustment.new_remaining,
                cmd.occurred_at,
            );
            let updated = self.store.commit(ReconcileTxn::new(
                order_item.id(),
                order_item.version(),
                adjustment.new_remaining,
                WriteOrigin::EngineAdjustment,
                LedgerWrite::Delete(cmd.delivery_item_id),
                entry,
            ))?;
            tracing::debug!(
                order_item = %order_item.id(),
                delivery_item = %cmd.delivery_item_id,
                delta = adjustment.delta_applied,
                remaining = updated.quantity_remaining(),
                "delivery cancelled"
            );
            Ok(updated)
        })
    }

    /// Recovery: recompute the remaining quantity from the live ledger and
    /// overwrite it, bypassing the origin check but not the bound invariants.
    ///
    /// Appends a RECALCULATION audit entry even when the correction is zero,
    /// so operator invocations are themselves on the record.
    pub fn recalculate(&self, cmd: Recalculate) -> ReconcileResult<OrderItem> {
        self.with_retry("recalculate", || {
            let order_item = self.store.order_item(cmd.order_item_id)?;
            let deliveries = self.store.delivery_items_for(cmd.order_item_id)?;
            let ledger_sum: i128 = deliveries
                .iter()
                .map(|d| d.delivered_quantity() as i128)
                .sum();
            let adjustment = order_item.plan_recalculate(ledger_sum)?;
            if adjustment.delta_applied != 0 {
                tracing::warn!(
                    order_item = %cmd.order_item_id,
                    stored = order_item.quantity_remaining(),
                    corrected = adjustment.new_remaining,
                    "repairing drifted remaining quantity"
                );
            }
            let entry = QuantityAuditEntry::recalculation(
                cmd.order_item_id,
                order_item.quantity_remaining(),
                adjustment.new_remaining,
                cmd.occurred_at,
            );
            self.store.commit(ReconcileTxn::new(
                cmd.order_item_id,
                order_item.version(),
                adjustment.new_remaining,
                WriteOrigin::Recalculation,
                LedgerWrite::None,
                entry,
            ))
        })
    }

    /// Diagnostic: compare the stored remaining quantity with the
    /// ledger-derived value, without writing anything.
    pub fn drift_report(&self, order_item_id: OrderItemId) -> ReconcileResult<DriftReport> {
        let order_item = self.store.order_item(order_item_id)?;
        let deliveries = self.store.delivery_items_for(order_item_id)?;
        let ledger_sum: i128 = deliveries
            .iter()
            .map(|d| d.delivered_quantity() as i128)
            .sum();
        Ok(DriftReport {
            order_item_id,
            quantity_requested: order_item.quantity_requested(),
            stored_remaining: order_item.quantity_remaining(),
            ledger_sum,
        })
    }

    /// Chronological audit trail for one order item (operator surface).
    pub fn audit_entries(
        &self,
        order_item_id: OrderItemId,
    ) -> ReconcileResult<Vec<QuantityAuditEntry>> {
        self.store.audit_entries_for(order_item_id)
    }

    /// Remove an order item that no live delivery items reference.
    pub fn remove_order_item(&self, order_item_id: OrderItemId) -> ReconcileResult<()> {
        self.store.remove_order_item(order_item_id)
    }

    /// Run one unit of work, retrying on optimistic-concurrency conflicts.
    ///
    /// Each retry re-executes the whole closure, including the fresh read;
    /// the engine never commits against a stale snapshot.
    fn with_retry<T>(
        &self,
        operation: &'static str,
        mut unit: impl FnMut() -> ReconcileResult<T>,
    ) -> ReconcileResult<T> {
        let mut attempt: u32 = 0;
        loop {
            match unit() {
                Err(ReconcileError::ConcurrencyConflict(reason))
                    if attempt < MAX_CONFLICT_RETRIES =>
                {
                    attempt += 1;
                    tracing::debug!(
                        operation,
                        attempt,
                        reason = %reason,
                        "commit lost the race, retrying with a fresh read"
                    );
                }
                other => return other,
            }
        }
    }
}
