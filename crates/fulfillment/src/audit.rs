use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use goodsflow_core::{DeliveryItemId, OrderItemId};

/// Kind of reconciliation that produced an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    /// A delivery item was created.
    Create,
    /// A delivery item's quantity was amended.
    Update,
    /// A delivery item was cancelled.
    Delete,
    /// The recovery operation overwrote the remaining quantity.
    Recalculation,
}

/// Append-only record of one remaining-quantity adjustment.
///
/// Written inside the same unit of work as the adjustment itself; an
/// adjustment with no audit record must never be observable. Entries are
/// never mutated or deleted by normal operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityAuditEntry {
    pub entry_id: Uuid,
    pub operation: AuditOperation,
    pub order_item_id: OrderItemId,
    /// `None` exactly for recalculation entries, which correct the order
    /// item without touching a specific delivery.
    pub delivery_item_id: Option<DeliveryItemId>,
    /// Remaining quantity before the adjustment.
    pub old_quantity: i64,
    /// Remaining quantity after the adjustment.
    pub new_quantity: i64,
    /// Signed change applied: `new_quantity − old_quantity`.
    pub delta_applied: i64,
    pub occurred_at: DateTime<Utc>,
}

impl QuantityAuditEntry {
    /// Entry for an engine adjustment caused by one delivery item.
    pub fn adjustment(
        operation: AuditOperation,
        order_item_id: OrderItemId,
        delivery_item_id: DeliveryItemId,
        old_quantity: i64,
        new_quantity: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            operation,
            order_item_id,
            delivery_item_id: Some(delivery_item_id),
            old_quantity,
            new_quantity,
            delta_applied: new_quantity - old_quantity,
            occurred_at,
        }
    }

    /// Entry for a recovery overwrite, tagged distinctly so forensic review
    /// can tell corrections from normal adjustments.
    pub fn recalculation(
        order_item_id: OrderItemId,
        old_quantity: i64,
        new_quantity: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            operation: AuditOperation::Recalculation,
            order_item_id,
            delivery_item_id: None,
            old_quantity,
            new_quantity,
            delta_applied: new_quantity - old_quantity,
            occurred_at,
        }
    }
}
