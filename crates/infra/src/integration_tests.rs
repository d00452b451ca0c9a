//! Integration tests for the full reconciliation pipeline:
//! engine → store commit → order item + ledger + audit trail.

use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;

use goodsflow_core::{DeliveryId, DeliveryItemId, OrderItemId, ReconcileError, ReconcileResult};
use goodsflow_fulfillment::{AuditOperation, OrderItem, QuantityAuditEntry, WriteOrigin};

use crate::engine::{
    AmendDelivery, CancelDelivery, CreateOrderItem, Recalculate, ReconciliationEngine,
    RecordDelivery,
};
use crate::store::{InMemoryStore, LedgerWrite, ReconcileStore, ReconcileTxn};

fn new_engine() -> ReconciliationEngine<Arc<InMemoryStore>> {
    // Run with RUST_LOG=debug to see engine commit/retry logs on failure.
    goodsflow_observability::init();
    ReconciliationEngine::new(Arc::new(InMemoryStore::new()))
}

fn open_item<S: ReconcileStore>(engine: &ReconciliationEngine<S>, requested: i64) -> OrderItem {
    engine
        .create_order_item(CreateOrderItem {
            order_item_id: OrderItemId::new(),
            description: "M6 hex bolts".to_string(),
            quantity_requested: requested,
            occurred_at: Utc::now(),
        })
        .unwrap()
}

fn record<S: ReconcileStore>(
    engine: &ReconciliationEngine<S>,
    order_item_id: OrderItemId,
    quantity: i64,
) -> (DeliveryItemId, ReconcileResult<OrderItem>) {
    let delivery_item_id = DeliveryItemId::new();
    let result = engine.record_delivery(RecordDelivery {
        delivery_item_id,
        order_item_id,
        delivery_id: DeliveryId::new(),
        delivered_quantity: quantity,
        unit_price: 250,
        occurred_at: Utc::now(),
    });
    (delivery_item_id, result)
}

/// Forge a commit that sets the remaining quantity without a matching ledger
/// change, simulating drift left behind by a historic bug.
fn inject_drift(store: &Arc<InMemoryStore>, order_item_id: OrderItemId, forged_remaining: i64) {
    let stored = store.order_item(order_item_id).unwrap();
    let entry = QuantityAuditEntry::adjustment(
        AuditOperation::Update,
        order_item_id,
        DeliveryItemId::new(),
        stored.quantity_remaining(),
        forged_remaining,
        Utc::now(),
    );
    store
        .commit(ReconcileTxn::new(
            order_item_id,
            stored.version(),
            forged_remaining,
            WriteOrigin::EngineAdjustment,
            LedgerWrite::None,
            entry,
        ))
        .unwrap();
}

#[test]
fn record_amend_cancel_walkthrough() {
    let engine = new_engine();
    let item = open_item(&engine, 100);

    let (first, result) = record(&engine, item.id(), 30);
    assert_eq!(result.unwrap().quantity_remaining(), 70);

    let (second, result) = record(&engine, item.id(), 25);
    assert_eq!(result.unwrap().quantity_remaining(), 45);

    let updated = engine
        .amend_delivery(AmendDelivery {
            delivery_item_id: first,
            new_delivered_quantity: 40,
            occurred_at: Utc::now(),
        })
        .unwrap();
    assert_eq!(updated.quantity_remaining(), 35);

    let updated = engine
        .cancel_delivery(CancelDelivery {
            delivery_item_id: second,
            occurred_at: Utc::now(),
        })
        .unwrap();
    assert_eq!(updated.quantity_remaining(), 60);

    // The ledger holds only the amended first delivery, repriced.
    let deliveries = engine.store().delivery_items_for(item.id()).unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].id(), first);
    assert_eq!(deliveries[0].delivered_quantity(), 40);
    assert_eq!(deliveries[0].total_amount(), 40 * 250);

    // Exactly one audit entry per adjustment, in chronological order.
    let trail = engine.audit_entries(item.id()).unwrap();
    let ops: Vec<_> = trail.iter().map(|e| e.operation).collect();
    assert_eq!(
        ops,
        vec![
            AuditOperation::Create,
            AuditOperation::Create,
            AuditOperation::Update,
            AuditOperation::Delete
        ]
    );
    let deltas: Vec<_> = trail.iter().map(|e| e.delta_applied).collect();
    assert_eq!(deltas, vec![-30, -25, -10, 25]);
    let transitions: Vec<_> = trail.iter().map(|e| (e.old_quantity, e.new_quantity)).collect();
    assert_eq!(transitions, vec![(100, 70), (70, 45), (45, 35), (35, 60)]);
    assert_eq!(trail[2].delivery_item_id, Some(first));
    assert_eq!(trail[3].delivery_item_id, Some(second));

    assert!(!engine.drift_report(item.id()).unwrap().has_drift());
}

#[test]
fn overdraw_is_rejected_and_leaves_no_trace() {
    let engine = new_engine();
    let item = open_item(&engine, 50);

    let (_, result) = record(&engine, item.id(), 100);
    assert_eq!(
        result.unwrap_err(),
        ReconcileError::InsufficientRemainingQuantity {
            delivered: 100,
            remaining: 50
        }
    );

    let stored = engine.store().order_item(item.id()).unwrap();
    assert_eq!(stored.quantity_remaining(), 50);
    assert_eq!(stored.version(), item.version());
    assert!(engine.store().delivery_items_for(item.id()).unwrap().is_empty());
    assert!(engine.audit_entries(item.id()).unwrap().is_empty());
}

#[test]
fn unknown_references_are_typed_failures() {
    let engine = new_engine();

    let (_, result) = record(&engine, OrderItemId::new(), 10);
    assert_eq!(result.unwrap_err(), ReconcileError::OrderItemNotFound);

    let err = engine
        .amend_delivery(AmendDelivery {
            delivery_item_id: DeliveryItemId::new(),
            new_delivered_quantity: 10,
            occurred_at: Utc::now(),
        })
        .unwrap_err();
    assert_eq!(err, ReconcileError::DeliveryItemNotFound);

    let err = engine
        .cancel_delivery(CancelDelivery {
            delivery_item_id: DeliveryItemId::new(),
            occurred_at: Utc::now(),
        })
        .unwrap_err();
    assert_eq!(err, ReconcileError::DeliveryItemNotFound);
}

#[test]
fn amend_to_equal_quantity_is_a_noop() {
    let engine = new_engine();
    let item = open_item(&engine, 100);
    let (delivery, _) = record(&engine, item.id(), 30);

    let before = engine.store().order_item(item.id()).unwrap();
    let after = engine
        .amend_delivery(AmendDelivery {
            delivery_item_id: delivery,
            new_delivered_quantity: 30,
            occurred_at: Utc::now(),
        })
        .unwrap();

    assert_eq!(after, before);
    assert_eq!(engine.audit_entries(item.id()).unwrap().len(), 1);
}

#[test]
fn amend_bounds_are_enforced() {
    let engine = new_engine();
    let item = open_item(&engine, 100);
    let (first, _) = record(&engine, item.id(), 30);
    let (_, _) = record(&engine, item.id(), 60);

    // remaining = 10; growing the first delivery by 20 would overdraw.
    let err = engine
        .amend_delivery(AmendDelivery {
            delivery_item_id: first,
            new_delivered_quantity: 50,
            occurred_at: Utc::now(),
        })
        .unwrap_err();
    assert_eq!(err, ReconcileError::WouldUnderflow { would_be: -10 });

    assert_eq!(
        engine
            .store()
            .order_item(item.id())
            .unwrap()
            .quantity_remaining(),
        10
    );
}

#[test]
fn duplicate_identifiers_conflict() {
    let engine = new_engine();
    let item = open_item(&engine, 100);

    let err = engine
        .create_order_item(CreateOrderItem {
            order_item_id: item.id(),
            description: "duplicate".to_string(),
            quantity_requested: 5,
            occurred_at: Utc::now(),
        })
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Conflict(_)));

    let (delivery, _) = record(&engine, item.id(), 10);
    let err = engine
        .record_delivery(RecordDelivery {
            delivery_item_id: delivery,
            order_item_id: item.id(),
            delivery_id: DeliveryId::new(),
            delivered_quantity: 5,
            unit_price: 100,
            occurred_at: Utc::now(),
        })
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Conflict(_)));
}

#[test]
fn direct_write_outside_the_engine_is_forbidden() {
    let engine = new_engine();
    let item = open_item(&engine, 100);
    let (_, _) = record(&engine, item.id(), 30);

    // A collaborator crafts an order item with remaining = 999 (e.g. from a
    // request payload) and pushes it through the non-engine write path.
    let stored = engine.store().order_item(item.id()).unwrap();
    let mut value = serde_json::to_value(&stored).unwrap();
    value["quantity_remaining"] = 999.into();
    value["version"] = (stored.version() + 1).into();
    let forged: OrderItem = serde_json::from_value(value).unwrap();

    let err = engine.store().update_order_item(forged).unwrap_err();
    assert_eq!(err, ReconcileError::DirectMutationForbidden);

    // Value unchanged.
    let unchanged = engine.store().order_item(item.id()).unwrap();
    assert_eq!(unchanged.quantity_remaining(), 70);

    // The same path accepts non-quantity updates.
    let renamed = unchanged.rename("M6 hex bolts, zinc plated").unwrap();
    let updated = engine.store().update_order_item(renamed).unwrap();
    assert_eq!(updated.description(), "M6 hex bolts, zinc plated");
    assert_eq!(updated.quantity_remaining(), 70);
}

#[test]
fn stale_collaborator_update_conflicts() {
    let engine = new_engine();
    let item = open_item(&engine, 100);

    let stale = item.rename("renamed from a stale read").unwrap();
    let (_, _) = record(&engine, item.id(), 10); // bumps the stored version

    let err = engine.store().update_order_item(stale).unwrap_err();
    assert!(matches!(err, ReconcileError::ConcurrencyConflict(_)));
    assert!(err.is_transient());
}

#[test]
fn remove_order_item_refuses_while_deliveries_are_live() {
    let engine = new_engine();
    let item = open_item(&engine, 100);
    let (delivery, _) = record(&engine, item.id(), 30);

    let err = engine.remove_order_item(item.id()).unwrap_err();
    assert!(matches!(err, ReconcileError::Conflict(_)));

    engine
        .cancel_delivery(CancelDelivery {
            delivery_item_id: delivery,
            occurred_at: Utc::now(),
        })
        .unwrap();
    engine.remove_order_item(item.id()).unwrap();

    assert_eq!(
        engine.store().order_item(item.id()).unwrap_err(),
        ReconcileError::OrderItemNotFound
    );
    // The audit trail outlives the order item.
    assert_eq!(engine.audit_entries(item.id()).unwrap().len(), 2);
}

#[test]
fn recalculate_repairs_injected_drift() {
    let engine = new_engine();
    let item = open_item(&engine, 100);
    let (_, _) = record(&engine, item.id(), 30);

    inject_drift(engine.store(), item.id(), 90);

    let report = engine.drift_report(item.id()).unwrap();
    assert!(report.has_drift());
    assert_eq!(report.stored_remaining, 90);
    assert_eq!(report.derived_remaining(), 70);

    let repaired = engine
        .recalculate(Recalculate {
            order_item_id: item.id(),
            occurred_at: Utc::now(),
        })
        .unwrap();
    assert_eq!(repaired.quantity_remaining(), 70);
    assert!(!engine.drift_report(item.id()).unwrap().has_drift());

    let trail = engine.audit_entries(item.id()).unwrap();
    let last = trail.last().unwrap();
    assert_eq!(last.operation, AuditOperation::Recalculation);
    assert_eq!(last.delivery_item_id, None);
    assert_eq!((last.old_quantity, last.new_quantity), (90, 70));
    assert_eq!(last.delta_applied, -20);
}

#[test]
fn recalculate_is_idempotent() {
    let engine = new_engine();
    let item = open_item(&engine, 100);
    let (_, _) = record(&engine, item.id(), 30);

    let first = engine
        .recalculate(Recalculate {
            order_item_id: item.id(),
            occurred_at: Utc::now(),
        })
        .unwrap();
    let second = engine
        .recalculate(Recalculate {
            order_item_id: item.id(),
            occurred_at: Utc::now(),
        })
        .unwrap();

    assert_eq!(first.quantity_remaining(), 70);
    assert_eq!(second.quantity_remaining(), 70);

    let trail = engine.audit_entries(item.id()).unwrap();
    let recalcs: Vec<_> = trail
        .iter()
        .filter(|e| e.operation == AuditOperation::Recalculation)
        .collect();
    assert_eq!(recalcs.len(), 2);
    assert_eq!(recalcs[0].delta_applied, 0);
    assert_eq!(recalcs[1].delta_applied, 0);
}

#[test]
fn recalculate_rejects_an_oversubscribed_ledger() {
    let engine = new_engine();
    let item = open_item(&engine, 100);
    let (_, _) = record(&engine, item.id(), 60);

    // Forge a second 60-unit delivery without an order-item adjustment: the
    // ledger now claims 120 delivered against 100 requested.
    let stored = engine.store().order_item(item.id()).unwrap();
    let forged_delivery = goodsflow_fulfillment::DeliveryItem::new(
        DeliveryItemId::new(),
        item.id(),
        DeliveryId::new(),
        60,
        250,
        Utc::now(),
    )
    .unwrap();
    let entry = QuantityAuditEntry::adjustment(
        AuditOperation::Create,
        item.id(),
        forged_delivery.id(),
        stored.quantity_remaining(),
        stored.quantity_remaining(),
        Utc::now(),
    );
    engine
        .store()
        .commit(ReconcileTxn::new(
            item.id(),
            stored.version(),
            stored.quantity_remaining(),
            WriteOrigin::EngineAdjustment,
            LedgerWrite::Insert(forged_delivery),
            entry,
        ))
        .unwrap();

    let err = engine
        .recalculate(Recalculate {
            order_item_id: item.id(),
            occurred_at: Utc::now(),
        })
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::RecalculationInvariantViolation(_)
    ));

    // The failed recovery wrote nothing.
    assert_eq!(
        engine
            .store()
            .order_item(item.id())
            .unwrap()
            .quantity_remaining(),
        40
    );
}

#[test]
fn concurrent_records_never_overdraw() {
    let engine = new_engine();
    let item = open_item(&engine, 100);
    let quantity = 15i64;

    let results: Vec<ReconcileResult<OrderItem>> = std::thread::scope(|s| {
        let engine = &engine;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let order_item_id = item.id();
                s.spawn(move || {
                    engine.record_delivery(RecordDelivery {
                        delivery_item_id: DeliveryItemId::new(),
                        order_item_id,
                        delivery_id: DeliveryId::new(),
                        delivered_quantity: quantity,
                        unit_price: 100,
                        occurred_at: Utc::now(),
                    })
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let successes = results.iter().filter(|r| r.is_ok()).count() as i64;
    assert!(successes <= 100 / quantity);

    for result in &results {
        if let Err(err) = result {
            assert!(matches!(
                err,
                ReconcileError::InsufficientRemainingQuantity { .. }
                    | ReconcileError::ConcurrencyConflict(_)
            ));
        }
    }

    // Total delivered never exceeds what was available, and the derived
    // value matches the ledger exactly.
    let stored = engine.store().order_item(item.id()).unwrap();
    assert_eq!(stored.quantity_remaining(), 100 - successes * quantity);
    assert_eq!(
        engine.audit_entries(item.id()).unwrap().len() as i64,
        successes
    );
    assert!(!engine.drift_report(item.id()).unwrap().has_drift());
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// Property: after every successful operation in a random sequence, the
    /// stored remaining quantity matches the ledger-derived value, stays in
    /// bounds, and the audit trail has exactly one entry per adjustment.
    #[test]
    fn random_operation_sequences_never_drift(
        requested in 0i64..2_000,
        ops in prop::collection::vec(
            (0u8..3, 1i64..200, any::<prop::sample::Index>()),
            1..30
        )
    ) {
        let engine = new_engine();
        let item = open_item(&engine, requested);
        let mut live: Vec<DeliveryItemId> = Vec::new();
        let mut adjustments = 0usize;

        for (kind, quantity, pick) in ops {
            match kind {
                0 => {
                    let (id, result) = record(&engine, item.id(), quantity);
                    if result.is_ok() {
                        live.push(id);
                        adjustments += 1;
                    }
                }
                1 => {
                    if !live.is_empty() {
                        let target = live[pick.index(live.len())];
                        let old = engine.store().delivery_item(target).unwrap().delivered_quantity();
                        let result = engine.amend_delivery(AmendDelivery {
                            delivery_item_id: target,
                            new_delivered_quantity: quantity,
                            occurred_at: Utc::now(),
                        });
                        if result.is_ok() && old != quantity {
                            adjustments += 1;
                        }
                    }
                }
                _ => {
                    if !live.is_empty() {
                        let target = live.remove(pick.index(live.len()));
                        engine
                            .cancel_delivery(CancelDelivery {
                                delivery_item_id: target,
                                occurred_at: Utc::now(),
                            })
                            .unwrap();
                        adjustments += 1;
                    }
                }
            }

            let report = engine.drift_report(item.id()).unwrap();
            prop_assert!(!report.has_drift());

            let stored = engine.store().order_item(item.id()).unwrap();
            prop_assert!(stored.quantity_remaining() >= 0);
            prop_assert!(stored.quantity_remaining() <= requested);
            prop_assert_eq!(engine.audit_entries(item.id()).unwrap().len(), adjustments);
        }
    }
}
