use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use goodsflow_core::{OrderItemId, ReconcileError, ReconcileResult};

/// Where a write to `quantity_remaining` originates.
///
/// Passed explicitly through every unit of work; there is no ambient
/// "recalculation in progress" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOrigin {
    /// The first write at order-item creation, establishing
    /// `remaining = requested`. Only [`OrderItem::open`] can express this.
    Initialize,
    /// An adjustment applied by the reconciliation engine.
    EngineAdjustment,
    /// An overwrite applied by the recovery operation.
    Recalculation,
}

/// A planned change to an order item's remaining quantity, not yet committed.
///
/// `delta_applied` is the signed change to `quantity_remaining`
/// (`new_remaining − old_remaining`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantityAdjustment {
    pub new_remaining: i64,
    pub delta_applied: i64,
}

/// Purchase order line item with its derived remaining quantity.
///
/// `quantity_remaining` is private: the only path that changes it is
/// [`OrderItem::write_remaining`], so every writer in every crate is forced
/// through the guard. `quantity_requested` is immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    id: OrderItemId,
    description: String,
    quantity_requested: i64,
    quantity_remaining: i64,
    version: u64,
    created_at: DateTime<Utc>,
}

impl OrderItem {
    /// Open a new order item with `remaining = requested`.
    ///
    /// This is the initialization write (origin
    /// [`WriteOrigin::Initialize`]): permitted unconditionally because it
    /// cannot express anything except `remaining == requested`.
    pub fn open(
        id: OrderItemId,
        description: impl Into<String>,
        quantity_requested: i64,
        created_at: DateTime<Utc>,
    ) -> ReconcileResult<Self> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(ReconcileError::validation("description cannot be empty"));
        }
        if quantity_requested < 0 {
            return Err(ReconcileError::validation(
                "requested quantity cannot be negative",
            ));
        }

        Ok(Self {
            id,
            description,
            quantity_requested,
            quantity_remaining: quantity_requested,
            version: 1,
            created_at,
        })
    }

    pub fn id(&self) -> OrderItemId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity_requested(&self) -> i64 {
        self.quantity_requested
    }

    /// Derived: requested minus delivered-to-date.
    pub fn quantity_remaining(&self) -> i64 {
        self.quantity_remaining
    }

    /// Optimistic concurrency token; +1 per committed write.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Update the non-quantity fields (collaborator path).
    pub fn rename(&self, description: impl Into<String>) -> ReconcileResult<Self> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(ReconcileError::validation("description cannot be empty"));
        }

        Ok(Self {
            description,
            version: self.version + 1,
            ..self.clone()
        })
    }

    /// Direct-write guard: the single path that sets `quantity_remaining`.
    ///
    /// The bound invariants `0 ≤ remaining ≤ requested` are re-validated
    /// unconditionally, independent of origin. [`WriteOrigin::Initialize`]
    /// is rejected here outright: initialization happens in [`Self::open`]
    /// and is never a legal origin for an adjustment to an existing item.
    pub fn write_remaining(
        &self,
        new_remaining: i64,
        origin: WriteOrigin,
    ) -> ReconcileResult<Self> {
        if origin == WriteOrigin::Initialize {
            return Err(ReconcileError::DirectMutationForbidden);
        }
        self.check_bounds(new_remaining, origin)?;

        Ok(Self {
            quantity_remaining: new_remaining,
            version: self.version + 1,
            ..self.clone()
        })
    }

    fn check_bounds(&self, new_remaining: i64, origin: WriteOrigin) -> ReconcileResult<()> {
        if (0..=self.quantity_requested).contains(&new_remaining) {
            return Ok(());
        }

        if origin == WriteOrigin::Recalculation {
            return Err(ReconcileError::recalculation(format!(
                "corrected remaining {new_remaining} is outside 0..={}",
                self.quantity_requested
            )));
        }

        if new_remaining < 0 {
            Err(ReconcileError::WouldUnderflow {
                would_be: new_remaining,
            })
        } else {
            Err(ReconcileError::WouldExceedRequested {
                would_be: new_remaining,
                requested: self.quantity_requested,
            })
        }
    }

    /// Plan the adjustment for recording a delivery of `delivered` units.
    pub fn plan_record(&self, delivered: i64) -> ReconcileResult<QuantityAdjustment> {
        if delivered <= 0 {
            return Err(ReconcileError::validation(
                "delivered quantity must be positive",
            ));
        }
        if delivered > self.quantity_remaining {
            return Err(ReconcileError::InsufficientRemainingQuantity {
                delivered,
                remaining: self.quantity_remaining,
            });
        }

        Ok(QuantityAdjustment {
            new_remaining: self.quantity_remaining - delivered,
            delta_applied: -delivered,
        })
    }

    /// Plan the adjustment for amending a recorded delivery from `old` to
    /// `new` units.
    ///
    /// Returns `Ok(None)` when the quantities are equal: no delta, no audit
    /// entry.
    pub fn plan_amend(&self, old: i64, new: i64) -> ReconcileResult<Option<QuantityAdjustment>> {
        if new <= 0 {
            return Err(ReconcileError::validation(
                "delivered quantity must be positive",
            ));
        }
        if new == old {
            return Ok(None);
        }

        let diff = new - old;
        let would_be = self.quantity_remaining - diff;
        if would_be < 0 {
            return Err(ReconcileError::WouldUnderflow { would_be });
        }
        if would_be > self.quantity_requested {
            return Err(ReconcileError::WouldExceedRequested {
                would_be,
                requested: self.quantity_requested,
            });
        }

        Ok(Some(QuantityAdjustment {
            new_remaining: would_be,
            delta_applied: -diff,
        }))
    }

    /// Plan the adjustment for cancelling a recorded delivery of `delivered`
    /// units.
    ///
    /// The exceed check is defensive: unreachable while invariant 1 holds,
    /// but it stops a cancel from amplifying prior drift.
    pub fn plan_cancel(&self, delivered: i64) -> ReconcileResult<QuantityAdjustment> {
        let would_be = self.quantity_remaining + delivered;
        if would_be > self.quantity_requested {
            return Err(ReconcileError::WouldExceedRequested {
                would_be,
                requested: self.quantity_requested,
            });
        }

        Ok(QuantityAdjustment {
            new_remaining: would_be,
            delta_applied: delivered,
        })
    }

    /// Plan the corrective overwrite for recovery, given the sum of delivered
    /// quantities over all live delivery items.
    pub fn plan_recalculate(&self, ledger_sum: i128) -> ReconcileResult<QuantityAdjustment> {
        let correct = self.quantity_requested as i128 - ledger_sum;
        if correct < 0 || correct > self.quantity_requested as i128 {
            return Err(ReconcileError::recalculation(format!(
                "ledger sum {ledger_sum} puts remaining at {correct}, outside 0..={}",
                self.quantity_requested
            )));
        }
        let correct = correct as i64;

        Ok(QuantityAdjustment {
            new_remaining: correct,
            delta_applied: correct - self.quantity_remaining,
        })
    }
}
