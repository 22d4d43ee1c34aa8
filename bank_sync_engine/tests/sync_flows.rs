use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use bank_providers::{BookingStatus, ProviderError, ProviderKind, RawTransaction, RetryPolicy};
use bank_sync_engine::{
    db_types::{ConnectionId, MinorUnits, SyncStatus},
    events::{EventHandlers, EventHooks, HookFuture},
    test_utils::{
        prepare_env::{new_test_database, random_db_path},
        ScriptedProvider,
    },
    ConnectionApi,
    ConnectionManagement,
    LifecycleConfig,
    LifecycleManager,
    MatcherConfig,
    ProviderRegistry,
    ReferencePatterns,
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
    provider: ScriptedProvider,
    orchestrator: SyncOrchestrator<SqliteDatabase, ScriptedProvider>,
    connection_id: ConnectionId,
    escalations: Arc<AtomicI64>,
}

fn transaction(id: &str, account: &str, cents: i64) -> RawTransaction {
    RawTransaction {
        external_id: id.to_string(),
        account_id: account.to_string(),
        amount: MinorUnits::from(cents),
        currency: "EUR".parse().unwrap(),
        value_date: None,
        booking_date: NaiveDate::from_ymd_opt(2024, 6, 1),
        payer_name: None,
        payer_iban: None,
        remittance: "Donation".to_string(),
        booking_status: BookingStatus::Booked,
    }
}

async fn setup(config: SyncConfig) -> Harness {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let url = random_db_path();
    let db = new_test_database(&url).await;
    let escalations = Arc::new(AtomicI64::new(0));
    let mut hooks = EventHooks::default();
    let counter = Arc::clone(&escalations);
    hooks.on_sync_failure_escalated(move |ev| -> HookFuture {
        info!("🪝️ Connection {} escalated after {} failures", ev.connection_id, ev.consecutive_failures);
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    });
    let handlers = EventHandlers::new(16, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let provider = ScriptedProvider::new(ProviderKind::EnableBanking);
    provider.with_account("ACC1", "EUR", vec![vec![transaction("tx-1", "ACC1", 1250)]]);
    let registry = ProviderRegistry::new().with_provider(provider.clone());
    let lifecycle = LifecycleManager::new(db.clone(), registry, LifecycleConfig::default(), producers)
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
    let orchestrator = SyncOrchestrator::new(lifecycle, matcher, config);
    Harness { url, db, provider, orchestrator, connection_id: connection.id, escalations }
}

async fn tear_down(harness: Harness) {
    harness.db.close().await;
    if let Err(e) = Sqlite::drop_database(&harness.url).await {
        error!("🚀️ Failed to drop database {}: {e}", harness.url);
    }
}

#[test]
fn busy_connection_is_skipped() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let h = setup(SyncConfig::default()).await;
        let claim = h.orchestrator.lifecycle().try_claim(h.connection_id).expect("Connection should be free");
        let report = h.orchestrator.sync_connection(h.connection_id).await;
        assert_eq!(report.status, SyncStatus::Busy);
        assert!(h.provider.requested_pages().is_empty());
        drop(claim);
        let report = h.orchestrator.sync_connection(h.connection_id).await;
        assert_eq!(report.status, SyncStatus::Completed);
        assert_eq!(report.unmatched, 1);
        tear_down(h).await;
    });
}

#[test]
fn concurrent_syncs_of_one_connection() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let h = setup(SyncConfig::default()).await;
        h.provider.set_delay(Some(Duration::from_millis(200)));
        let (a, b) = tokio::join!(
            h.orchestrator.sync_connection(h.connection_id),
            h.orchestrator.sync_connection(h.connection_id)
        );
        let mut statuses = vec![a.status, b.status];
        statuses.sort_by_key(|s| format!("{s:?}"));
        assert_eq!(statuses, vec![SyncStatus::Busy, SyncStatus::Completed]);
        assert_eq!(h.provider.requested_pages().len(), 1);
        tear_down(h).await;
    });
}

#[test]
fn daily_sync_limit() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let config = SyncConfig { max_syncs_per_day: 2, ..SyncConfig::default() };
        let h = setup(config).await;
        assert_eq!(h.orchestrator.sync_connection(h.connection_id).await.status, SyncStatus::Completed);
        let second = h.orchestrator.sync_connection(h.connection_id).await;
        assert_eq!(second.status, SyncStatus::Completed);
        assert_eq!(second.duplicates, 1);
        let third = h.orchestrator.sync_connection(h.connection_id).await;
        assert_eq!(third.status, SyncStatus::DailyLimitReached);
        assert_eq!(h.provider.requested_pages().len(), 2);
        let connection = h.db.fetch_connection(h.connection_id).await.unwrap().unwrap();
        let stored = connection.last_sync_report.expect("Outcome should be stored");
        assert_eq!(stored.status, SyncStatus::Completed);
        tear_down(h).await;
    });
}

#[test]
fn repeated_failures_are_escalated_once() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let config = SyncConfig { max_syncs_per_day: 100, ..SyncConfig::default() };
        let h = setup(config).await;
        h.provider.fail_list_accounts(Some(ProviderError::Transient("Service unavailable".into())));
        for _ in 0..4 {
            let report = h.orchestrator.sync_connection(h.connection_id).await;
            assert_eq!(report.status, SyncStatus::Failed);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let connection = h.db.fetch_connection(h.connection_id).await.unwrap().unwrap();
        assert_eq!(connection.consecutive_failures, 4);
        assert!(connection.needs_attention);
        assert_eq!(h.escalations.load(Ordering::SeqCst), 1);

        h.provider.fail_list_accounts(None);
        let report = h.orchestrator.sync_connection(h.connection_id).await;
        assert_eq!(report.status, SyncStatus::Completed);
        let connection = h.db.fetch_connection(h.connection_id).await.unwrap().unwrap();
        assert_eq!(connection.consecutive_failures, 0);
        assert!(!connection.needs_attention);
        tear_down(h).await;
    });
}

#[test]
fn one_failing_account_is_a_partial_failure() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let h = setup(SyncConfig::default()).await;
        h.provider.with_account("ACC2", "EUR", vec![vec![transaction("tx-2", "ACC2", 800)]]);
        h.provider.fail_page("ACC2", 0, ProviderError::AccountUnavailable("Account closed".into()));
        let report = h.orchestrator.sync_connection(h.connection_id).await;
        assert_eq!(report.status, SyncStatus::PartialFailure);
        assert_eq!(report.failed_accounts, vec!["ACC2".to_string()]);
        assert_eq!(report.unmatched, 1);
        let connection = h.db.fetch_connection(h.connection_id).await.unwrap().unwrap();
        assert_eq!(connection.consecutive_failures, 0);
        tear_down(h).await;
    });
}

#[test]
fn sync_is_stopped_when_over_budget() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let config = SyncConfig { budget: Duration::from_millis(50), ..SyncConfig::default() };
        let h = setup(config).await;
        h.provider.set_delay(Some(Duration::from_millis(500)));
        let report = h.orchestrator.sync_connection(h.connection_id).await;
        assert_eq!(report.status, SyncStatus::TimedOut);
        let connection = h.db.fetch_connection(h.connection_id).await.unwrap().unwrap();
        assert_eq!(connection.consecutive_failures, 1);
        assert_eq!(connection.last_sync_report.map(|r| r.status), Some(SyncStatus::TimedOut));
        // The claim is released once the budget runs out
        assert!(h.orchestrator.lifecycle().try_claim(h.connection_id).is_some());
        tear_down(h).await;
    });
}
