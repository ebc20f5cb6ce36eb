//! Subscription, lifecycle and property operations.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use readmodel_core::cursor::{Cursor, ReadModelName};
use readmodel_core::environment::Clock;
use readmodel_core::event::ReadModelEvent;
use readmodel_core::ledger::{Lease, ReadModelLedger};
use readmodel_core::projection::{
    ProjectionContext, ProjectionFailure, ProjectionOutcome, ProjectionResult, ProjectionTable,
};
use readmodel_core::status::{DeliveryStrategy, RunStatus};
use readmodel_core::store::{
    IndexType, ReadModelStore, SearchCondition, StoreAdapter, StoreError, TableDeclaration,
    UpdateCondition, UpdateOptions,
};
use readmodel_runtime::{
    BuildRequest, DoneReason, EngineContext, EngineError, StepOutcome, delete_property,
    get_property, list_properties, pause, reset, resubscribe, resume, status, step, subscribe,
    unsubscribe,
};
use readmodel_testing::{
    InMemoryEventSource, InMemoryLedgerStore, InMemoryStoreAdapter, init_test_tracing, test_clock,
};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

struct Harness {
    ctx: EngineContext,
    source: InMemoryEventSource,
    ledgers: InMemoryLedgerStore,
    stores: InMemoryStoreAdapter,
}

fn harness() -> Harness {
    init_test_tracing();
    let source = InMemoryEventSource::new();
    let ledgers = InMemoryLedgerStore::new();
    let stores = InMemoryStoreAdapter::new();
    let ctx = EngineContext::new(
        Arc::new(source.clone()),
        Arc::new(ledgers.clone()),
        Arc::new(stores.clone()),
    )
    .with_clock(Arc::new(test_clock()));

    Harness {
        ctx,
        source,
        ledgers,
        stores,
    }
}

fn orders() -> ReadModelName {
    ReadModelName::new("orders")
}

/// Put a ledger whose lease is held by a build that is still running.
fn lease_ledger(h: &Harness) {
    let mut ledger = h.ledgers.get(&orders()).unwrap_or_default();
    ledger.lease = Some(Lease::new(
        "running-build",
        h.ctx.clock.now(),
        h.ctx.config.lease_ttl(),
    ));
    h.ledgers.put(&orders(), ledger);
}

async fn count(_ctx: ProjectionContext, _event: ReadModelEvent) -> ProjectionResult {
    Ok(ProjectionOutcome::Continue)
}

// ============================================================================
// Subscription
// ============================================================================

#[tokio::test]
async fn test_subscribe_creates_ledger_and_registers_with_source() {
    let h = harness();
    let types = Some(vec!["OrderPlaced".to_string()]);

    subscribe(&h.ctx, &orders(), types.clone(), None).await.unwrap();

    let ledger = h.ledgers.get(&orders()).unwrap();
    assert_eq!(ledger.event_types, types);
    assert!(ledger.aggregate_ids.is_none());
    assert!(ledger.cursor.is_beginning());
    assert_eq!(h.source.subscription(&orders()), Some((types, None)));
}

#[tokio::test]
async fn test_subscribe_again_keeps_progress() {
    let h = harness();
    let mut ledger = ReadModelLedger::new(Some(vec!["OrderPlaced".into()]), None);
    ledger.cursor = Cursor::new("12");
    h.ledgers.put(&orders(), ledger);

    subscribe(&h.ctx, &orders(), None, Some(vec!["o1".into()]))
        .await
        .unwrap();

    let ledger = h.ledgers.get(&orders()).unwrap();
    assert!(ledger.event_types.is_none());
    assert_eq!(ledger.aggregate_ids, Some(vec!["o1".to_string()]));
    assert_eq!(ledger.cursor, Cursor::new("12"));
}

#[tokio::test]
async fn test_resubscribe_requires_subscription() {
    let h = harness();

    let error = resubscribe(&h.ctx, &orders(), None, None).await.unwrap_err();

    assert!(matches!(error, EngineError::NotSubscribed(_)));
    assert!(h.ledgers.get(&orders()).is_none());
    assert!(h.source.subscription(&orders()).is_none());
}

#[tokio::test]
async fn test_filter_changes_wait_for_running_build() {
    let h = harness();
    subscribe(&h.ctx, &orders(), None, None).await.unwrap();
    lease_ledger(&h);
    let before = h.ledgers.get(&orders()).unwrap();

    let types = Some(vec!["OrderShipped".to_string()]);
    let resubscribed = resubscribe(&h.ctx, &orders(), types.clone(), None).await;
    let subscribed = subscribe(&h.ctx, &orders(), types, None).await;
    let unsubscribed = unsubscribe(&h.ctx, &orders()).await;

    assert!(matches!(resubscribed, Err(EngineError::LeaseHeld(_))));
    assert!(matches!(subscribed, Err(EngineError::LeaseHeld(_))));
    assert!(matches!(unsubscribed, Err(EngineError::LeaseHeld(_))));
    assert_eq!(h.ledgers.get(&orders()).unwrap(), before);
    assert_eq!(h.source.subscription(&orders()), Some((None, None)));
}

#[tokio::test]
async fn test_resubscribe_changes_loaded_events() {
    let h = harness();
    h.source.append_all([
        ReadModelEvent::new("o1", 1, "OrderPlaced", json!({})),
        ReadModelEvent::new("o1", 2, "OrderShipped", json!({})),
    ]);
    let table = ProjectionTable::new()
        .on("OrderPlaced", count)
        .on("OrderShipped", count);
    subscribe(&h.ctx, &orders(), Some(vec!["OrderPlaced".into()]), None)
        .await
        .unwrap();

    let report = step(&h.ctx, &orders(), &BuildRequest::new(table.clone()))
        .await
        .unwrap();
    assert_eq!(report.applied, 1);

    resubscribe(&h.ctx, &orders(), Some(vec!["OrderShipped".into()]), None)
        .await
        .unwrap();
    let report = step(&h.ctx, &orders(), &BuildRequest::new(table))
        .await
        .unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(
        h.ledgers
            .get(&orders())
            .unwrap()
            .success_event
            .unwrap()
            .event_type,
        "OrderShipped"
    );
}

#[tokio::test]
async fn test_unsubscribe_removes_ledger() {
    let h = harness();
    subscribe(&h.ctx, &orders(), None, None).await.unwrap();

    unsubscribe(&h.ctx, &orders()).await.unwrap();
    assert!(h.ledgers.get(&orders()).is_none());
    assert!(h.source.subscription(&orders()).is_none());
    assert!(status(&h.ctx, &orders()).await.unwrap().is_none());

    // Unknown read model
    unsubscribe(&h.ctx, &orders()).await.unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_pause_and_resume_require_subscription() {
    let h = harness();

    assert!(matches!(
        pause(&h.ctx, &orders()).await,
        Err(EngineError::NotSubscribed(_))
    ));

    let restarts = AtomicUsize::new(0);
    let resumed = resume(&h.ctx, &orders(), || {
        restarts.fetch_add(1, Ordering::SeqCst);
    })
    .await;
    assert!(matches!(resumed, Err(EngineError::NotSubscribed(_))));
    assert_eq!(restarts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_pause_is_not_blocked_by_lease() {
    let h = harness();
    subscribe(&h.ctx, &orders(), None, None).await.unwrap();
    lease_ledger(&h);

    pause(&h.ctx, &orders()).await.unwrap();

    let ledger = h.ledgers.get(&orders()).unwrap();
    assert!(ledger.is_paused);
    assert_eq!(ledger.lease.unwrap().id, "running-build");
}

#[tokio::test]
async fn test_status_reflects_ledger() {
    let h = harness();
    subscribe(&h.ctx, &orders(), None, None).await.unwrap();

    let status_before = status(&h.ctx, &orders()).await.unwrap().unwrap();
    assert_eq!(status_before.status, RunStatus::Deliver);
    assert_eq!(status_before.delivery_strategy, DeliveryStrategy::InlineLedger);
    assert_eq!(status_before.event_subscriber, orders());

    pause(&h.ctx, &orders()).await.unwrap();
    let paused = status(&h.ctx, &orders()).await.unwrap().unwrap();
    assert_eq!(paused.status, RunStatus::Skip);

    let wire = serde_json::to_value(&paused).unwrap();
    assert_eq!(wire["status"], "skip");
    assert_eq!(wire["deliveryStrategy"], "inline-ledger");
    assert_eq!(wire["eventSubscriber"], "orders");

    let revision = h.ledgers.revision(&orders());
    status(&h.ctx, &orders()).await.unwrap();
    assert_eq!(h.ledgers.revision(&orders()), revision);
}

#[tokio::test]
async fn test_reset_of_unknown_read_model_succeeds() {
    let h = harness();

    reset(&h.ctx, &orders()).await.unwrap();
    reset(&h.ctx, &orders()).await.unwrap();

    assert_eq!(h.stores.drop_count(&orders()), 2);
    assert!(h.ledgers.get(&orders()).is_none());
}

#[tokio::test]
async fn test_reset_refuses_during_build() {
    let h = harness();
    subscribe(&h.ctx, &orders(), None, None).await.unwrap();
    lease_ledger(&h);

    let error = reset(&h.ctx, &orders()).await.unwrap_err();

    assert!(matches!(error, EngineError::LeaseHeld(_)));
    assert_eq!(h.stores.drop_count(&orders()), 0);
}

#[tokio::test]
async fn test_reset_keeps_filters_properties_and_pause() {
    let h = harness();
    let mut ledger = ReadModelLedger::new(Some(vec!["OrderPlaced".into()]), None);
    ledger.cursor = Cursor::new("40");
    ledger.is_paused = true;
    ledger.is_initialized = true;
    ledger.properties.insert("owner".into(), "billing".into());
    h.ledgers.put(&orders(), ledger);

    reset(&h.ctx, &orders()).await.unwrap();

    let ledger = h.ledgers.get(&orders()).unwrap();
    assert!(ledger.cursor.is_beginning());
    assert!(!ledger.is_initialized);
    assert!(ledger.is_paused);
    assert_eq!(ledger.event_types, Some(vec!["OrderPlaced".to_string()]));
    assert_eq!(ledger.properties.get("owner").map(String::as_str), Some("billing"));
}

/// Adapter whose `drop_read_model` parks until the gate opens.
struct GatedDrop {
    inner: InMemoryStoreAdapter,
    entered: Arc<Notify>,
    gate: Arc<Notify>,
}

impl StoreAdapter for GatedDrop {
    fn store(&self, read_model: &ReadModelName) -> Arc<dyn ReadModelStore> {
        self.inner.store(read_model)
    }

    fn drop_read_model(
        &self,
        read_model: &ReadModelName,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let read_model = read_model.clone();
        Box::pin(async move {
            self.entered.notify_one();
            self.gate.notified().await;
            self.inner.drop_read_model(&read_model).await
        })
    }
}

async fn define_orders(store: Arc<dyn ReadModelStore>) -> Result<(), ProjectionFailure> {
    store
        .define_table(
            "orders",
            TableDeclaration::new().with_index("id", IndexType::String),
        )
        .await?;
    Ok(())
}

async fn upsert_order(ctx: ProjectionContext, event: ReadModelEvent) -> ProjectionResult {
    ctx.store
        .update(
            "orders",
            SearchCondition::eq("id", event.aggregate_id.clone()),
            UpdateCondition::set("status", "placed"),
            UpdateOptions::upsert(),
        )
        .await?;
    Ok(ProjectionOutcome::Continue)
}

#[tokio::test]
async fn test_build_cannot_start_while_reset_drops_tables() {
    init_test_tracing();
    let source = InMemoryEventSource::new();
    source.append(ReadModelEvent::new("o1", 1, "OrderPlaced", json!({})));
    let ledgers = InMemoryLedgerStore::new();
    let stores = InMemoryStoreAdapter::new();
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let ctx = EngineContext::new(
        Arc::new(source),
        Arc::new(ledgers.clone()),
        Arc::new(GatedDrop {
            inner: stores.clone(),
            entered: Arc::clone(&entered),
            gate: Arc::clone(&gate),
        }),
    )
    .with_clock(Arc::new(test_clock()));
    let request = BuildRequest::new(
        ProjectionTable::new()
            .on_init(define_orders)
            .on("OrderPlaced", upsert_order),
    );

    let first = step(&ctx, &orders(), &request).await.unwrap();
    assert_eq!(first.applied, 1);

    let reset_name = orders();
    let (reset_result, during_reset) = tokio::join!(reset(&ctx, &reset_name), async {
        entered.notified().await;
        let report = step(&ctx, &orders(), &request).await;
        gate.notify_one();
        report
    });

    reset_result.unwrap();
    assert_eq!(
        during_reset.unwrap().outcome,
        StepOutcome::Done(DoneReason::LeaseHeld)
    );

    let ledger = ledgers.get(&orders()).unwrap();
    assert!(ledger.cursor.is_beginning());
    assert!(!ledger.is_initialized);
    assert!(ledger.lease.is_none());

    // The next build re-creates the tables instead of failing on them
    let rebuilt = step(&ctx, &orders(), &request).await.unwrap();
    assert_eq!(rebuilt.applied, 1);
    assert_eq!(stores.rows(&orders(), "orders").len(), 1);
    assert_eq!(
        status(&ctx, &orders()).await.unwrap().unwrap().status,
        RunStatus::Deliver
    );
}

#[tokio::test]
async fn test_failed_drop_keeps_progress_and_releases_lease() {
    let h = harness();
    let mut ledger = ReadModelLedger::new(None, None);
    ledger.cursor = Cursor::new("8");
    ledger.is_initialized = true;
    h.ledgers.put(&orders(), ledger);
    h.stores.fail_next(StoreError::Backend("disk full".into()));

    let error = reset(&h.ctx, &orders()).await.unwrap_err();

    assert!(matches!(error, EngineError::Store(StoreError::Backend(_))));
    let ledger = h.ledgers.get(&orders()).unwrap();
    assert_eq!(ledger.cursor, Cursor::new("8"));
    assert!(ledger.is_initialized);
    assert!(ledger.lease.is_none());
}

#[tokio::test]
async fn test_failed_drop_of_unknown_read_model_leaves_no_ledger() {
    let h = harness();
    h.stores.fail_next(StoreError::Backend("disk full".into()));

    assert!(reset(&h.ctx, &orders()).await.is_err());
    assert!(h.ledgers.get(&orders()).is_none());
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_properties_round_trip() {
    let h = harness();
    subscribe(&h.ctx, &orders(), None, None).await.unwrap();

    readmodel_runtime::set_property(&h.ctx, &orders(), "region", "eu")
        .await
        .unwrap();
    readmodel_runtime::set_property(&h.ctx, &orders(), "owner", "billing")
        .await
        .unwrap();

    assert_eq!(
        get_property(&h.ctx, &orders(), "region").await.unwrap(),
        Some("eu".to_string())
    );
    let all = list_properties(&h.ctx, &orders()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["owner"], "billing");

    delete_property(&h.ctx, &orders(), "region").await.unwrap();
    delete_property(&h.ctx, &orders(), "region").await.unwrap();
    assert!(
        get_property(&h.ctx, &orders(), "region")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_properties_of_unknown_read_model() {
    let h = harness();

    assert!(get_property(&h.ctx, &orders(), "k").await.unwrap().is_none());
    assert!(list_properties(&h.ctx, &orders()).await.unwrap().is_empty());
    assert!(matches!(
        readmodel_runtime::set_property(&h.ctx, &orders(), "k", "v").await,
        Err(EngineError::NotSubscribed(_))
    ));
}

#[tokio::test]
async fn test_properties_are_not_gated_by_lease() {
    let h = harness();
    subscribe(&h.ctx, &orders(), None, None).await.unwrap();
    lease_ledger(&h);

    readmodel_runtime::set_property(&h.ctx, &orders(), "k", "v")
        .await
        .unwrap();

    let ledger = h.ledgers.get(&orders()).unwrap();
    assert_eq!(ledger.properties["k"], "v");
    assert!(ledger.lease.is_some());
}
