use bank_providers::{BookingStatus, ProviderKind, RawTransaction, RetryPolicy};
use bank_sync_engine::{
    db_types::{ConnectionId, MinorUnits, NewOrder, NewPayment, Order, TransactionRecord, TransactionState},
    events::EventProducers,
    sync::{settle_payment, SettlementError},
    test_utils::{
        prepare_env::{new_test_database, random_db_path},
        ScriptedProvider,
    },
    ConnectionApi,
    LifecycleConfig,
    LifecycleManager,
    MatcherConfig,
    OrderManagement,
    ProviderRegistry,
    ReferencePatterns,
    ReviewApi,
    ReviewError,
    SqliteDatabase,
    SyncConfig,
    SyncOrchestrator,
    TransactionMatcher,
};
use chrono::NaiveDate;
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};
use tokio::runtime::Runtime;

struct Harness {
    url: String,
    db: SqliteDatabase,
    reviews: ReviewApi<SqliteDatabase>,
    connection_id: ConnectionId,
}

fn booked(id: &str, cents: i64, remittance: &str) -> RawTransaction {
    RawTransaction {
        external_id: id.to_string(),
        account_id: "ACC1".to_string(),
        amount: MinorUnits::from(cents),
        currency: "EUR".parse().unwrap(),
        value_date: None,
        booking_date: NaiveDate::from_ymd_opt(2024, 6, 1),
        payer_name: Some("Jo Bloggs".to_string()),
        payer_iban: None,
        remittance: remittance.to_string(),
        booking_status: BookingStatus::Booked,
    }
}

fn order(event: &str, code: &str, cents: i64) -> NewOrder {
    NewOrder::new("acme", event, code, "EUR".parse().unwrap(), MinorUnits::from(cents))
}

/// Inserts the orders, connects `acme` and syncs the given transactions once.
async fn setup(orders: Vec<NewOrder>, transactions: Vec<RawTransaction>) -> Harness {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let url = random_db_path();
    let db = new_test_database(&url).await;
    for o in orders {
        db.insert_order(o).await.expect("Error inserting order");
    }
    let provider = ScriptedProvider::new(ProviderKind::EnableBanking);
    provider.with_account("ACC1", "EUR", vec![transactions]);
    let registry = ProviderRegistry::new().with_provider(provider);
    let lifecycle = LifecycleManager::new(db.clone(), registry, LifecycleConfig::default(), Default::default())
        .with_retry_policy(RetryPolicy::immediate(1));
    let connections = ConnectionApi::new(lifecycle.clone(), chrono::Duration::minutes(30));
    let start = connections
        .begin_authorization("acme", ProviderKind::EnableBanking, "NORDEA_FI", "https://tickets.example.com/bank")
        .await
        .expect("Error starting authorization");
    let connection =
        connections.complete_authorization(&start.state, Some("code-1")).await.expect("Error completing authorization");
    let patterns = ReferencePatterns::with_default_order_code::<&str>(&[]).expect("Invalid patterns");
    let matcher = TransactionMatcher::new(patterns, MatcherConfig::default());
    let orchestrator = SyncOrchestrator::new(lifecycle, matcher, SyncConfig::default());
    orchestrator.sync_connection(connection.id).await;
    let reviews = ReviewApi::new(db.clone(), Default::default());
    Harness { url, db, reviews, connection_id: connection.id }
}

async fn tear_down(harness: Harness) {
    harness.db.close().await;
    if let Err(e) = Sqlite::drop_database(&harness.url).await {
        error!("🚀️ Failed to drop database {}: {e}", harness.url);
    }
}

async fn queued(h: &Harness, external_id: &str) -> TransactionRecord {
    let queue = h.reviews.review_queue("acme").await.unwrap();
    queue
        .into_iter()
        .find(|t| t.external_id == external_id)
        .unwrap_or_else(|| panic!("{external_id} is not in the review queue"))
}

async fn order_in(h: &Harness, event: &str, code: &str) -> Order {
    let orders = h.db.fetch_orders_by_code("acme", code).await.unwrap();
    orders.into_iter().find(|o| o.event == event).unwrap_or_else(|| panic!("No order {code} in {event}"))
}

#[test]
fn concurrent_approvals_pay_once() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let orders = vec![order("spring-gala", "AB12CD", 2000), order("spring-gala", "CD34EF", 2000)];
        let h = setup(orders, vec![booked("tx-1", 2000, "Gift for the evening")]).await;
        let tx = queued(&h, "tx-1").await;
        assert_eq!(tx.state, TransactionState::Unmatched);

        let first = vec!["AB12CD".to_string()];
        let second = vec!["CD34EF".to_string()];
        let (a, b) = tokio::join!(h.reviews.approve(tx.id, &first), h.reviews.approve(tx.id, &second));
        let approved = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(approved, 1, "{a:?} / {b:?}");
        let refused = if a.is_err() { a } else { b };
        assert!(matches!(refused, Err(ReviewError::NotReviewable { .. })), "{refused:?}");

        let payments = h.db.fetch_payments_for_transaction(h.connection_id, "tx-1").await.unwrap();
        assert_eq!(payments.len(), 1);
        let record = h.reviews.transaction(tx.id).await.unwrap();
        assert_eq!(record.state, TransactionState::Matched);
        assert_eq!(record.matched_orders, vec![payments[0].order_code.clone()]);
        let first = order_in(&h, "spring-gala", "AB12CD").await;
        let second = order_in(&h, "spring-gala", "CD34EF").await;
        assert_eq!(first.pending + second.pending, MinorUnits::from(2000));
        tear_down(h).await;
    });
}

#[test]
fn codes_shared_by_events_need_the_event() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let orders = vec![order("spring-gala", "AB12CD", 2000), order("autumn-fair", "AB12CD", 2000)];
        let h = setup(orders, vec![booked("tx-1", 2000, "Tickets AB12CD")]).await;
        let tx = queued(&h, "tx-1").await;

        let err = h.reviews.approve(tx.id, &["ab12cd".to_string()]).await.unwrap_err();
        assert!(matches!(err, ReviewError::AmbiguousOrder { .. }), "{err}");
        assert!(h.db.fetch_payments_for_transaction(h.connection_id, "tx-1").await.unwrap().is_empty());

        let record = h.reviews.approve(tx.id, &["autumn-fair/ab12cd".to_string()]).await.unwrap();
        assert_eq!(record.state, TransactionState::Matched);
        assert_eq!(order_in(&h, "autumn-fair", "AB12CD").await.pending, MinorUnits::from(0));
        assert_eq!(order_in(&h, "spring-gala", "AB12CD").await.pending, MinorUnits::from(2000));
        tear_down(h).await;
    });
}

#[test]
fn approval_never_pays_more_than_is_owed() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let h = setup(vec![order("spring-gala", "AB12CD", 1500)], vec![booked("tx-1", 2000, "Tickets AB12CD")]).await;
        let tx = queued(&h, "tx-1").await;
        assert_eq!(tx.state, TransactionState::NeedsReview);
        assert!(tx.message.as_deref().is_some_and(|m| m.contains("only owes 15.00")), "{:?}", tx.message);

        let record = h.reviews.approve(tx.id, &["AB12CD".to_string()]).await.unwrap();
        assert_eq!(record.state, TransactionState::Matched);
        assert!(record.message.as_deref().is_some_and(|m| m.contains("5.00 EUR more")), "{:?}", record.message);
        let payments = h.db.fetch_payments_for_transaction(h.connection_id, "tx-1").await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount, MinorUnits::from(1500));
        assert_eq!(order_in(&h, "spring-gala", "AB12CD").await.pending, MinorUnits::from(0));
        tear_down(h).await;
    });
}

#[test]
fn partial_approval_is_grouped() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let h = setup(vec![order("spring-gala", "AB12CD", 5000)], vec![booked("tx-1", 2000, "Gift")]).await;
        let tx = queued(&h, "tx-1").await;
        let record = h.reviews.approve(tx.id, &["AB12CD".to_string()]).await.unwrap();
        assert!(record.is_partial_payment());
        assert_eq!(record.payment_group_id.as_deref(), Some("AB12CD_2024-06-01"));
        assert_eq!(order_in(&h, "spring-gala", "AB12CD").await.pending, MinorUnits::from(3000));
        tear_down(h).await;
    });
}

#[test]
fn transactions_the_host_already_paid_are_refused() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let h = setup(vec![order("spring-gala", "AB12CD", 2500)], vec![booked("tx-1", 2000, "Gift")]).await;
        let tx = queued(&h, "tx-1").await;
        let target = order_in(&h, "spring-gala", "AB12CD").await;
        let payment = NewPayment {
            connection_id: h.connection_id,
            transaction_id: "tx-1".to_string(),
            order_id: target.id,
            order_code: target.code.clone(),
            amount: MinorUnits::from(2000),
            currency: "EUR".parse().unwrap(),
        };
        h.db.create_payment(payment).await.unwrap();

        let err = h.reviews.approve(tx.id, &["AB12CD".to_string()]).await.unwrap_err();
        assert!(matches!(err, ReviewError::AlreadyPaid { .. }), "{err}");
        let record = h.reviews.transaction(tx.id).await.unwrap();
        assert_eq!(record.state, TransactionState::Unmatched);
        assert_eq!(h.db.fetch_payments_for_transaction(h.connection_id, "tx-1").await.unwrap().len(), 1);
        tear_down(h).await;
    });
}

#[test]
fn settlement_never_exceeds_the_outstanding_amount() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let h = setup(vec![order("spring-gala", "AB12CD", 2500)], vec![booked("tx-1", 2000, "Gift")]).await;
        let tx = queued(&h, "tx-1").await;
        let target = order_in(&h, "spring-gala", "AB12CD").await;
        let producers = EventProducers::default();
        let err = settle_payment(&h.db, &producers, &tx, &target, MinorUnits::from(3000), true).await.unwrap_err();
        assert!(matches!(err, SettlementError::ExceedsOutstanding { .. }), "{err}");
        assert!(h.db.fetch_payments_for_transaction(h.connection_id, "tx-1").await.unwrap().is_empty());
        settle_payment(&h.db, &producers, &tx, &target, MinorUnits::from(2000), true).await.unwrap();
        assert_eq!(order_in(&h, "spring-gala", "AB12CD").await.pending, MinorUnits::from(500));
        tear_down(h).await;
    });
}
