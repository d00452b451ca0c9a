use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use goodsflow_core::{DeliveryId, DeliveryItemId, OrderItemId, ReconcileError, ReconcileResult};

/// A recorded partial fulfillment: one delivery line against one order item.
///
/// Monetary amounts are in the smallest currency unit (e.g. cents).
/// `total_amount` is derived as `delivered_quantity × unit_price` so the two
/// stay consistent when a delivery is amended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryItem {
    id: DeliveryItemId,
    order_item_id: OrderItemId,
    delivery_id: DeliveryId,
    delivered_quantity: i64,
    unit_price: i64,
    total_amount: i64,
    occurred_at: DateTime<Utc>,
}

impl DeliveryItem {
    pub fn new(
        id: DeliveryItemId,
        order_item_id: OrderItemId,
        delivery_id: DeliveryId,
        delivered_quantity: i64,
        unit_price: i64,
        occurred_at: DateTime<Utc>,
    ) -> ReconcileResult<Self> {
        if delivered_quantity <= 0 {
            return Err(ReconcileError::validation(
                "delivered quantity must be positive",
            ));
        }
        if unit_price < 0 {
            return Err(ReconcileError::validation("unit price cannot be negative"));
        }
        let total_amount = delivered_quantity
            .checked_mul(unit_price)
            .ok_or_else(|| ReconcileError::validation("total amount overflows"))?;

        Ok(Self {
            id,
            order_item_id,
            delivery_id,
            delivered_quantity,
            unit_price,
            total_amount,
            occurred_at,
        })
    }

    pub fn id(&self) -> DeliveryItemId {
        self.id
    }

    pub fn order_item_id(&self) -> OrderItemId {
        self.order_item_id
    }

    pub fn delivery_id(&self) -> DeliveryId {
        self.delivery_id
    }

    pub fn delivered_quantity(&self) -> i64 {
        self.delivered_quantity
    }

    pub fn unit_price(&self) -> i64 {
        self.unit_price
    }

    pub fn total_amount(&self) -> i64 {
        self.total_amount
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Re-price this delivery at a corrected quantity.
    pub fn with_quantity(&self, delivered_quantity: i64) -> ReconcileResult<Self> {
        Self::new(
            self.id,
            self.order_item_id,
            self.delivery_id,
            delivered_quantity,
            self.unit_price,
            self.occurred_at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_delivery(quantity: i64, unit_price: i64) -> ReconcileResult<DeliveryItem> {
        DeliveryItem::new(
            DeliveryItemId::new(),
            OrderItemId::new(),
            DeliveryId::new(),
            quantity,
            unit_price,
            Utc::now(),
        )
    }

    #[test]
    fn total_amount_is_quantity_times_unit_price() {
        let delivery = test_delivery(30, 250).unwrap();
        assert_eq!(delivery.total_amount(), 7_500);
    }

    #[test]
    fn rejects_non_positive_quantity() {
        assert!(matches!(
            test_delivery(0, 100),
            Err(ReconcileError::Validation(_))
        ));
        assert!(matches!(
            test_delivery(-3, 100),
            Err(ReconcileError::Validation(_))
        ));
    }

    #[test]
    fn rejects_negative_unit_price() {
        assert!(matches!(
            test_delivery(10, -1),
            Err(ReconcileError::Validation(_))
        ));
    }

    #[test]
    fn rejects_overflowing_total() {
        assert!(matches!(
            test_delivery(i64::MAX, 2),
            Err(ReconcileError::Validation(_))
        ));
    }

    #[test]
    fn with_quantity_reprices_the_line() {
        let delivery = test_delivery(30, 250).unwrap();
        let amended = delivery.with_quantity(40).unwrap();
        assert_eq!(amended.id(), delivery.id());
        assert_eq!(amended.delivered_quantity(), 40);
        assert_eq!(amended.total_amount(), 10_000);

        assert!(matches!(
            delivery.with_quantity(0),
            Err(ReconcileError::Validation(_))
        ));
    }
}
