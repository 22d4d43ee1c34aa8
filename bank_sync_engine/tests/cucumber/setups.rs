use bank_providers::ProviderKind;
use bank_sync_engine::{
    db_types::{MinorUnits, NewOrder},
    OrderManagement,
};
use cucumber::given;

use crate::cucumber::{bank_sync_world::BankSyncSystem, BankSyncWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut BankSyncWorld) {
    let system = BankSyncSystem::new().await;
    world.system = Some(system);
}

#[given(expr = "the bank grants consent for {int} days")]
async fn consent_lifetime(world: &mut BankSyncWorld, days: i64) {
    world.system().provider.set_consent_days(days);
}

#[given(expr = "organizer {string} has connected institution {string}")]
async fn connect_institution(world: &mut BankSyncWorld, organizer: String, institution: String) {
    let system = world.system_mut();
    let start = system
        .connections
        .begin_authorization(&organizer, ProviderKind::GoCardless, &institution, "https://tickets.example.com/bank")
        .await
        .expect("Error starting authorization");
    let connection =
        system.connections.complete_authorization(&start.state, None).await.expect("Error completing authorization");
    system.connection_id = Some(connection.id);
}

#[given(expr = "organizer {string} has an order {word} for {word} {word}")]
async fn open_order(world: &mut BankSyncWorld, organizer: String, code: String, amount: String, currency: String) {
    insert_order(world, organizer, code, amount, currency, None).await;
}

#[given(expr = "organizer {string} has an order {word} for {word} {word} with invoice {word}")]
async fn open_order_with_invoice(
    world: &mut BankSyncWorld,
    organizer: String,
    code: String,
    amount: String,
    currency: String,
    invoice: String,
) {
    insert_order(world, organizer, code, amount, currency, Some(invoice)).await;
}

async fn insert_order(
    world: &mut BankSyncWorld,
    organizer: String,
    code: String,
    amount: String,
    currency: String,
    invoice: Option<String>,
) {
    let currency = currency.parse().expect("Invalid currency");
    let total = MinorUnits::from_decimal_str(&amount, &currency).expect("Invalid amount");
    let mut order = NewOrder::new(&organizer, "Summer Festival", &code, currency, total);
    if let Some(invoice) = invoice {
        order = order.with_invoice(invoice);
    }
    world.system().db.insert_order(order).await.expect("Error inserting order");
}
