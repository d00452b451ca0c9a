use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use goodsflow_core::{DeliveryItemId, OrderItemId, ReconcileError, ReconcileResult};
use goodsflow_fulfillment::{DeliveryItem, OrderItem, QuantityAuditEntry};

use super::r#trait::{LedgerWrite, ReconcileStore, ReconcileTxn};

#[derive(Debug, Default)]
struct StoreState {
    order_items: HashMap<OrderItemId, OrderItem>,
    delivery_items: HashMap<DeliveryItemId, DeliveryItem>,
    audit_log: HashMap<OrderItemId, Vec<QuantityAuditEntry>>,
}

/// In-memory reconciliation store.
///
/// Intended for tests/dev. Not optimized for performance. A single `RwLock`
/// over the whole state gives every `commit` the all-or-nothing, isolated
/// execution the engine requires; version checks on the order item provide
/// the optimistic serialization point.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> ReconcileResult<std::sync::RwLockReadGuard<'_, StoreState>> {
        self.inner
            .read()
            .map_err(|_| ReconcileError::storage("lock poisoned"))
    }

    fn write(&self) -> ReconcileResult<std::sync::RwLockWriteGuard<'_, StoreState>> {
        self.inner
            .write()
            .map_err(|_| ReconcileError::storage("lock poisoned"))
    }
}

impl ReconcileStore for InMemoryStore {
    fn insert_order_item(&self, item: OrderItem) -> ReconcileResult<()> {
        // Initialization may only establish remaining = requested; anything
        // else is a disguised adjustment.
        if item.quantity_remaining() != item.quantity_requested() {
            return Err(ReconcileError::DirectMutationForbidden);
        }

        let mut state = self.write()?;
        if state.order_items.contains_key(&item.id()) {
            return Err(ReconcileError::conflict("order item already exists"));
        }
        state.order_items.insert(item.id(), item);
        Ok(())
    }

    fn update_order_item(&self, item: OrderItem) -> ReconcileResult<OrderItem> {
        let mut state = self.write()?;
        let stored = state
            .order_items
            .get(&item.id())
            .ok_or(ReconcileError::OrderItemNotFound)?;

        if item.version() != stored.version() + 1 {
            return Err(ReconcileError::concurrency(format!(
                "expected version {}, found {}",
                stored.version() + 1,
                item.version()
            )));
        }
        if item.quantity_remaining() != stored.quantity_remaining() {
            return Err(ReconcileError::DirectMutationForbidden);
        }
        if item.quantity_requested() != stored.quantity_requested() {
            return Err(ReconcileError::validation(
                "requested quantity is immutable after creation",
            ));
        }
        // Bound invariants re-validated unconditionally, independent of path.
        if item.quantity_remaining() < 0 || item.quantity_remaining() > item.quantity_requested()
        {
            return Err(ReconcileError::DirectMutationForbidden);
        }

        state.order_items.insert(item.id(), item.clone());
        Ok(item)
    }

    fn remove_order_item(&self, id: OrderItemId) -> ReconcileResult<()> {
        let mut state = self.write()?;
        if !state.order_items.contains_key(&id) {
            return Err(ReconcileError::OrderItemNotFound);
        }
        if state
            .delivery_items
            .values()
            .any(|d| d.order_item_id() == id)
        {
            return Err(ReconcileError::conflict(
                "order item is referenced by live delivery items",
            ));
        }
        state.order_items.remove(&id);
        Ok(())
    }

    fn order_item(&self, id: OrderItemId) -> ReconcileResult<OrderItem> {
        self.read()?
            .order_items
            .get(&id)
            .cloned()
            .ok_or(ReconcileError::OrderItemNotFound)
    }

    fn delivery_item(&self, id: DeliveryItemId) -> ReconcileResult<DeliveryItem> {
        self.read()?
            .delivery_items
            .get(&id)
            .cloned()
            .ok_or(ReconcileError::DeliveryItemNotFound)
    }

    fn delivery_items_for(
        &self,
        order_item_id: OrderItemId,
    ) -> ReconcileResult<Vec<DeliveryItem>> {
        let state = self.read()?;
        let mut items: Vec<DeliveryItem> = state
            .delivery_items
            .values()
            .filter(|d| d.order_item_id() == order_item_id)
            .cloned()
            .collect();
        items.sort_by_key(|d| (d.occurred_at(), Uuid::from(d.id())));
        Ok(items)
    }

    fn audit_entries_for(
        &self,
        order_item_id: OrderItemId,
    ) -> ReconcileResult<Vec<QuantityAuditEntry>> {
        let state = self.read()?;
        Ok(state
            .audit_log
            .get(&order_item_id)
            .cloned()
            .unwrap_or_default())
    }

    fn commit(&self, txn: ReconcileTxn) -> ReconcileResult<OrderItem> {
        let mut state = self.write()?;

        let stored = state
            .order_items
            .get(&txn.order_item_id)
            .ok_or(ReconcileError::OrderItemNotFound)?;

        if stored.version() != txn.expected_version {
            return Err(ReconcileError::concurrency(format!(
                "expected version {}, found {}",
                txn.expected_version,
                stored.version()
            )));
        }

        // Guard re-run from the stored state: last line of defense even for
        // engine-originated writes.
        let updated = stored.write_remaining(txn.new_remaining, txn.origin)?;

        if txn.audit_entry.order_item_id != txn.order_item_id {
            return Err(ReconcileError::validation(
                "audit entry references a different order item",
            ));
        }

        // Validate the ledger mutation before touching anything, so a failed
        // commit leaves no partial state.
        match &txn.ledger_write {
            LedgerWrite::None => {}
            LedgerWrite::Insert(delivery) => {
                if delivery.order_item_id() != txn.order_item_id {
                    return Err(ReconcileError::validation(
                        "delivery item references a different order item",
                    ));
                }
                if state.delivery_items.contains_key(&delivery.id()) {
                    return Err(ReconcileError::conflict("delivery item already exists"));
                }
            }
            LedgerWrite::Update(delivery) => {
                if delivery.order_item_id() != txn.order_item_id {
                    return Err(ReconcileError::validation(
                        "delivery item references a different order item",
                    ));
                }
                if !state.delivery_items.contains_key(&delivery.id()) {
                    return Err(ReconcileError::DeliveryItemNotFound);
                }
            }
            LedgerWrite::Delete(id) => match state.delivery_items.get(id) {
                None => return Err(ReconcileError::DeliveryItemNotFound),
                Some(d) if d.order_item_id() != txn.order_item_id => {
                    return Err(ReconcileError::validation(
                        "delivery item references a different order item",
                    ));
                }
                Some(_) => {}
            },
        }

        // All checks passed; apply the unit of work.
        match txn.ledger_write {
            LedgerWrite::None => {}
            LedgerWrite::Insert(delivery) | LedgerWrite::Update(delivery) => {
                state.delivery_items.insert(delivery.id(), delivery);
            }
            LedgerWrite::Delete(id) => {
                state.delivery_items.remove(&id);
            }
        }
        state
            .audit_log
            .entry(txn.order_item_id)
            .or_default()
            .push(txn.audit_entry);
        state.order_items.insert(txn.order_item_id, updated.clone());

        Ok(updated)
    }
}
