use std::time::Duration;

use bank_providers::{BookingStatus, ProviderError, RawTransaction};
use bank_sync_engine::{
    db_types::{ConnectionState, MinorUnits, NewRefund, OrderStatus, SyncStatus, TransactionState},
    ConnectionManagement,
    OrderManagement,
};
use cucumber::{given, then, when};

use crate::cucumber::{bank_sync_world::ACCOUNT_ID, BankSyncWorld};

const ORGANIZER: &str = "acme";

fn raw_transaction(
    id: &str,
    amount: &str,
    currency: &str,
    reference: &str,
    payer: Option<String>,
    booking_status: BookingStatus,
) -> RawTransaction {
    let currency = currency.parse().expect("Invalid currency");
    let amount = MinorUnits::from_decimal_str(amount, &currency).expect("Invalid amount");
    RawTransaction {
        external_id: id.to_string(),
        account_id: ACCOUNT_ID.to_string(),
        amount,
        currency,
        value_date: None,
        booking_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 1),
        payer_name: payer,
        payer_iban: None,
        remittance: reference.to_string(),
        booking_status,
    }
}

fn add_transaction(world: &mut BankSyncWorld, transaction: RawTransaction) {
    let system = world.system_mut();
    // The same id replaces an earlier version, e.g. a pending transaction that has been booked
    for page in system.pages.iter_mut() {
        page.retain(|t| t.external_id != transaction.external_id);
    }
    if let Some(page) = system.pages.last_mut() {
        page.push(transaction);
    }
}

#[given(expr = "the bank reports a booked transaction {word} of {word} {word} with reference {string}")]
async fn booked_transaction(world: &mut BankSyncWorld, id: String, amount: String, currency: String, reference: String) {
    add_transaction(world, raw_transaction(&id, &amount, &currency, &reference, None, BookingStatus::Booked));
}

#[given(expr = "the bank reports a booked transaction {word} of {word} {word} with reference {string} from {string}")]
async fn booked_transaction_from(
    world: &mut BankSyncWorld,
    id: String,
    amount: String,
    currency: String,
    reference: String,
    payer: String,
) {
    let tx = raw_transaction(&id, &amount, &currency, &reference, Some(payer), BookingStatus::Booked);
    add_transaction(world, tx);
}

#[given(expr = "the bank reports a pending transaction {word} of {word} {word} with reference {string}")]
async fn pending_transaction(world: &mut BankSyncWorld, id: String, amount: String, currency: String, reference: String) {
    add_transaction(world, raw_transaction(&id, &amount, &currency, &reference, None, BookingStatus::Pending));
}

#[given(expr = "order {word} has a requested refund of {word} {word}")]
async fn requested_refund(world: &mut BankSyncWorld, code: String, amount: String, currency: String) {
    let db = &world.system().db;
    let order = db.fetch_order_by_code(ORGANIZER, &code).await.expect("Error fetching order").expect("No such order");
    let currency = currency.parse().expect("Invalid currency");
    let amount = MinorUnits::from_decimal_str(&amount, &currency).expect("Invalid amount");
    let refund = NewRefund { order_id: order.id, order_code: order.code, amount, currency };
    db.request_refund(refund).await.expect("Error requesting refund");
}

#[given("the bank starts a new page")]
async fn new_page(world: &mut BankSyncWorld) {
    world.system_mut().pages.push(vec![]);
}

#[given(expr = "page {int} of the account fails with a temporary error")]
async fn failing_page(world: &mut BankSyncWorld, page: usize) {
    world.system().provider.fail_page(ACCOUNT_ID, page, ProviderError::Transient("Service unavailable".into()));
}

#[given("the bank recovers")]
async fn bank_recovers(world: &mut BankSyncWorld) {
    world.system().provider.clear_page_failures();
}

#[given("the bank rejects refreshes")]
async fn reject_refreshes(world: &mut BankSyncWorld) {
    let error = ProviderError::RefreshRejected("Requisition expired".into());
    world.system().provider.fail_refresh(Some(error));
}

#[given("the bank cannot refresh right now")]
async fn defer_refreshes(world: &mut BankSyncWorld) {
    let error = ProviderError::Transient("Service unavailable".into());
    world.system().provider.fail_refresh(Some(error));
}

#[given(expr = "the bank rejects the next {int} transaction fetch(es)")]
async fn reject_fetches(world: &mut BankSyncWorld, count: u32) {
    world.system().provider.reject_next_fetches(count);
}

#[when("the sync runs")]
async fn run_sync(world: &mut BankSyncWorld) {
    let system = world.system_mut();
    system.provider.set_pages(ACCOUNT_ID, system.pages.clone());
    let report = system.orchestrator.sync_connection(system.connection_id()).await;
    system.last_report = Some(report);
    // Give the event handlers a moment
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[when("all connections are synced")]
async fn run_all(world: &mut BankSyncWorld) {
    let system = world.system_mut();
    system.provider.set_pages(ACCOUNT_ID, system.pages.clone());
    let id = system.connection_id();
    let report = system.orchestrator.run_all().await;
    system.last_report = report.connections.into_iter().find(|r| r.connection_id == id);
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[when(expr = "an admin approves transaction {word} for {string}")]
async fn approve(world: &mut BankSyncWorld, id: String, orders: String) {
    let system = world.system();
    let tx = system.transaction(&id).await;
    let codes = orders.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>();
    system.reviews.approve(tx.id, &codes).await.expect("Error approving transaction");
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[when(expr = "an admin tries to approve transaction {word} for {string}")]
async fn try_approve(world: &mut BankSyncWorld, id: String, orders: String) {
    let system = world.system();
    let tx = system.transaction(&id).await;
    let codes = orders.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>();
    let result = system.reviews.approve(tx.id, &codes).await;
    assert!(result.is_err(), "Approval should have been refused");
}

#[when(expr = "an admin discards transaction {word} because {string}")]
async fn discard(world: &mut BankSyncWorld, id: String, reason: String) {
    let system = world.system();
    let tx = system.transaction(&id).await;
    system.reviews.discard(tx.id, &reason).await.expect("Error discarding transaction");
}

#[when("the organizer reauthorizes the connection")]
async fn reauthorize(world: &mut BankSyncWorld) {
    let system = world.system();
    system.provider.fail_refresh(None);
    let start = system
        .connections
        .reauthorize(system.connection_id(), "https://tickets.example.com/bank")
        .await
        .expect("Error starting reauthorization");
    let connection =
        system.connections.complete_authorization(&start.state, None).await.expect("Error completing reauthorization");
    assert_eq!(connection.id, system.connection_id(), "Reauthorization created a new connection");
}

#[when("the organizer disconnects the connection")]
async fn disconnect(world: &mut BankSyncWorld) {
    let system = world.system();
    system.connections.disconnect(system.connection_id()).await.expect("Error disconnecting");
}

#[then(expr = "the sync status is {word}")]
async fn sync_status(world: &mut BankSyncWorld, status: String) {
    let report = world.system().last_report.as_ref().expect("No sync has run");
    assert_eq!(format!("{:?}", report.status), status, "Unexpected sync outcome: {report:?}");
}

#[then(expr = "the sync reports {int} matched, {int} ambiguous, {int} for review and {int} unmatched")]
async fn sync_counts(world: &mut BankSyncWorld, matched: u64, ambiguous: u64, review: u64, unmatched: u64) {
    let report = world.system().last_report.as_ref().expect("No sync has run");
    assert_eq!(report.matched, matched, "matched count. {report:?}");
    assert_eq!(report.ambiguous, ambiguous, "ambiguous count. {report:?}");
    assert_eq!(report.needs_review, review, "needs review count. {report:?}");
    assert_eq!(report.unmatched, unmatched, "unmatched count. {report:?}");
}

#[then(expr = "the sync reports {int} duplicate(s)")]
async fn sync_duplicates(world: &mut BankSyncWorld, duplicates: u64) {
    let report = world.system().last_report.as_ref().expect("No sync has run");
    assert_eq!(report.duplicates, duplicates, "{report:?}");
}

#[then(expr = "the sync reports {int} refund(s)")]
async fn sync_refunds(world: &mut BankSyncWorld, refunded: u64) {
    let report = world.system().last_report.as_ref().expect("No sync has run");
    assert_eq!(report.refunded, refunded, "{report:?}");
}

#[then(expr = "transaction {word} is {word}")]
async fn transaction_state(world: &mut BankSyncWorld, id: String, state: String) {
    let tx = world.system().transaction(&id).await;
    let expected = state.parse::<TransactionState>().expect("Unknown transaction state");
    assert_eq!(tx.state, expected, "{tx:?}");
}

#[then(expr = "transaction {word} is matched to {string}")]
async fn transaction_matched_to(world: &mut BankSyncWorld, id: String, orders: String) {
    let tx = world.system().transaction(&id).await;
    let mut expected = orders.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>();
    let mut actual = tx.matched_orders.clone();
    expected.sort();
    actual.sort();
    assert_eq!(tx.state, TransactionState::Matched);
    assert_eq!(actual, expected);
}

#[then(expr = "transaction {word} suggests {string}")]
async fn transaction_suggests(world: &mut BankSyncWorld, id: String, orders: String) {
    let tx = world.system().transaction(&id).await;
    let mut expected = orders.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>();
    let mut actual = tx.suggestions.iter().map(|s| s.order_code.clone()).collect::<Vec<_>>();
    expected.sort();
    actual.sort();
    assert_eq!(actual, expected, "{tx:?}");
}

#[then(expr = "transaction {word} has message containing {string}")]
async fn transaction_message(world: &mut BankSyncWorld, id: String, text: String) {
    let tx = world.system().transaction(&id).await;
    let message = tx.message.clone().unwrap_or_default();
    assert!(message.contains(&text), "Message was '{message}'");
}

#[then(expr = "transaction {word} is part of payment group {string}")]
async fn transaction_payment_group(world: &mut BankSyncWorld, id: String, group: String) {
    let tx = world.system().transaction(&id).await;
    assert!(tx.is_partial_payment(), "{tx:?}");
    assert_eq!(tx.payment_group_id.as_deref(), Some(group.as_str()));
}

#[then(expr = "transaction {word} is not a partial payment")]
async fn transaction_not_partial(world: &mut BankSyncWorld, id: String) {
    let tx = world.system().transaction(&id).await;
    assert!(!tx.is_partial_payment(), "{tx:?}");
}

#[then(expr = "there is/are {int} payment(s) for transaction {word}")]
async fn payments_for_transaction(world: &mut BankSyncWorld, count: usize, id: String) {
    let system = world.system();
    let payments =
        system.db.fetch_payments_for_transaction(system.connection_id(), &id).await.expect("Error fetching payments");
    assert_eq!(payments.len(), count, "{payments:?}");
}

#[then(expr = "{int} payment confirmation(s) were/was published")]
async fn confirmations_published(world: &mut BankSyncWorld, count: i64) {
    let published = world.system().confirmations.load(std::sync::atomic::Ordering::SeqCst);
    assert_eq!(published, count);
}

#[then(expr = "{int} reauthorization request(s) were/was published")]
async fn reauthorizations_published(world: &mut BankSyncWorld, count: i64) {
    let published = world.system().reauthorization_requests.load(std::sync::atomic::Ordering::SeqCst);
    assert_eq!(published, count);
}

#[then(expr = "order {word} is {word}")]
async fn order_status(world: &mut BankSyncWorld, code: String, status: String) {
    let order = world
        .system()
        .db
        .fetch_order_by_code(ORGANIZER, &code)
        .await
        .expect("Error fetching order")
        .expect("Order does not exist");
    assert_eq!(format!("{:?}", order.status), status);
}

#[then(expr = "order {word} still has {word} outstanding")]
async fn order_outstanding(world: &mut BankSyncWorld, code: String, amount: String) {
    let order = world
        .system()
        .db
        .fetch_order_by_code(ORGANIZER, &code)
        .await
        .expect("Error fetching order")
        .expect("Order does not exist");
    assert_eq!(order.status, OrderStatus::AwaitingPayment);
    let expected = MinorUnits::from_decimal_str(&amount, &order.currency).expect("Invalid amount");
    assert_eq!(order.pending, expected);
}

#[then(expr = "order {word} has {int} refund(s) marked {word}")]
async fn order_refunds(world: &mut BankSyncWorld, code: String, count: usize, status: String) {
    let db = &world.system().db;
    let order = db.fetch_order_by_code(ORGANIZER, &code).await.expect("Error fetching order").expect("No such order");
    let refunds = db.fetch_refunds_for_order(order.id).await.expect("Error fetching refunds");
    let marked = refunds.iter().filter(|r| format!("{:?}", r.status) == status).count();
    assert_eq!(marked, count, "{refunds:?}");
}

#[then(expr = "the connection is {word}")]
async fn connection_state(world: &mut BankSyncWorld, state: String) {
    let system = world.system();
    let connection = system
        .db
        .fetch_connection(system.connection_id())
        .await
        .expect("Error fetching connection")
        .expect("Connection does not exist");
    let expected = state.parse::<ConnectionState>().expect("Unknown connection state");
    assert_eq!(connection.state, expected);
}

#[then(expr = "the bank was asked to refresh {int} time(s)")]
async fn refresh_calls(world: &mut BankSyncWorld, count: u32) {
    assert_eq!(world.system().provider.refresh_calls(), count);
}

#[then(expr = "the bank was asked for pages {string}")]
async fn requested_pages(world: &mut BankSyncWorld, pages: String) {
    let expected = pages.split(',').map(|s| s.trim().parse::<usize>().expect("Not a page number")).collect::<Vec<_>>();
    let actual = world
        .system()
        .provider
        .requested_pages()
        .into_iter()
        .filter(|(account, _)| account == ACCOUNT_ID)
        .map(|(_, page)| page)
        .collect::<Vec<_>>();
    assert_eq!(actual, expected);
}

#[then(expr = "the review queue has {int} transaction(s)")]
async fn review_queue(world: &mut BankSyncWorld, count: usize) {
    let queue = world.system().reviews.review_queue(ORGANIZER).await.expect("Error fetching review queue");
    assert_eq!(queue.len(), count, "{queue:?}");
}

#[then("the latest sync outcome is stored on the connection")]
async fn stored_outcome(world: &mut BankSyncWorld) {
    let system = world.system();
    let report = system.last_report.clone().expect("No sync has run");
    let connection = system
        .db
        .fetch_connection(system.connection_id())
        .await
        .expect("Error fetching connection")
        .expect("Connection does not exist");
    assert_eq!(connection.last_sync_report, Some(report));
}

#[then("the bank was not asked for transactions")]
async fn no_transaction_fetches(world: &mut BankSyncWorld) {
    let requested = world.system().provider.requested_pages();
    assert!(requested.is_empty(), "Pages were requested: {requested:?}");
}
