use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use bank_providers::{ProviderKind, RawTransaction, RetryPolicy};
use bank_sync_engine::{
    db_types::{ConnectionId, ConnectionSyncReport, TransactionQueryFilter, TransactionRecord},
    events::{EventHandlers, EventHooks, HookFuture},
    helpers::CredentialCipher,
    test_utils::{
        prepare_env::{create_database, random_db_path, run_migrations},
        ScriptedProvider,
    },
    ConnectionApi,
    LifecycleConfig,
    LifecycleManager,
    MatcherConfig,
    ProviderRegistry,
    ReferencePatterns,
    ReviewApi,
    SqliteDatabase,
    SyncConfig,
    SyncOrchestrator,
    TransactionManagement,
    TransactionMatcher,
};
use chrono::Duration;
use cucumber::World;
use log::*;
use tokio::time::sleep;

pub const ACCOUNT_ID: &str = "ACC1";

#[derive(Default, Debug, World)]
pub struct BankSyncWorld {
    pub system: Option<BankSyncSystem>,
}

impl BankSyncWorld {
    pub fn system(&self) -> &BankSyncSystem {
        self.system.as_ref().expect("Bank sync system not initialised")
    }

    pub fn system_mut(&mut self) -> &mut BankSyncSystem {
        self.system.as_mut().expect("Bank sync system not initialised")
    }
}

pub struct BankSyncSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub provider: ScriptedProvider,
    pub orchestrator: SyncOrchestrator<SqliteDatabase, ScriptedProvider>,
    pub connections: ConnectionApi<SqliteDatabase, ScriptedProvider>,
    pub reviews: ReviewApi<SqliteDatabase>,
    pub connection_id: Option<ConnectionId>,
    pub last_report: Option<ConnectionSyncReport>,
    /// Pages of transactions the bank will serve for [`ACCOUNT_ID`]
    pub pages: Vec<Vec<RawTransaction>>,
    pub confirmations: Arc<AtomicI64>,
    pub reauthorization_requests: Arc<AtomicI64>,
}

impl Debug for BankSyncSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BankSyncSystem ({})", self.db_path)
    }
}

impl BankSyncSystem {
    pub async fn new() -> Self {
        let url = prepare_test_env().await;
        let db = SqliteDatabase::new_with_url(&url, 5, CredentialCipher::random())
            .await
            .expect("Error creating connection to database");
        debug!("Created database: {url}");
        sleep(std::time::Duration::from_millis(50)).await;
        let confirmations = Arc::new(AtomicI64::new(0));
        let reauthorization_requests = Arc::new(AtomicI64::new(0));
        let mut hooks = EventHooks::default();
        let counter = Arc::clone(&confirmations);
        hooks.on_payment_confirmed(move |ev| -> HookFuture {
            info!("🪝️ Payment confirmed for order {}", ev.order.code);
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        });
        let counter = Arc::clone(&reauthorization_requests);
        hooks.on_reauthorization_required(move |ev| -> HookFuture {
            info!("🪝️ Connection {} needs reauthorization", ev.connection.id);
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        });
        let handlers = EventHandlers::new(16, hooks);
        let producers = handlers.producers();
        handlers.start_handlers().await;

        let provider = ScriptedProvider::new(ProviderKind::GoCardless);
        provider.with_account(ACCOUNT_ID, "EUR", vec![]);
        let registry = ProviderRegistry::new().with_provider(provider.clone());
        let lifecycle = LifecycleManager::new(db.clone(), registry, LifecycleConfig::default(), producers.clone())
            .with_retry_policy(RetryPolicy::immediate(2));
        let patterns = ReferencePatterns::with_default_order_code(&["INV".to_string()]).expect("Invalid patterns");
        let matcher = TransactionMatcher::new(patterns, MatcherConfig::default());
        let config = SyncConfig { max_syncs_per_day: 100, ..SyncConfig::default() };
        let orchestrator = SyncOrchestrator::new(lifecycle.clone(), matcher, config);
        let connections = ConnectionApi::new(lifecycle, Duration::minutes(30));
        let reviews = ReviewApi::new(db.clone(), producers);
        Self {
            db_path: url,
            db,
            provider,
            orchestrator,
            connections,
            reviews,
            connection_id: None,
            last_report: None,
            pages: vec![vec![]],
            confirmations,
            reauthorization_requests,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id.expect("No bank connection has been made")
    }

    pub async fn transaction(&self, external_id: &str) -> TransactionRecord {
        let filter = TransactionQueryFilter::default().with_connection(self.connection_id());
        let transactions = self.db.search_transactions(filter).await.expect("Error searching transactions");
        transactions
            .into_iter()
            .find(|t| t.external_id == external_id)
            .unwrap_or_else(|| panic!("Transaction {external_id} was not stored"))
    }
}

pub async fn prepare_test_env() -> String {
    let path = random_db_path();
    create_database(&path).await;
    run_migrations(&path).await;
    path
}
