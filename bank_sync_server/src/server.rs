use std::time::Duration;

use actix_web::{
    dev::{Server, Service},
    http::KeepAlive,
    middleware::Logger,
    web,
    web::ServiceConfig,
    App,
    HttpServer,
};
use bank_providers::{AnyProvider, BankProvider, EnableBankingProvider, GoCardlessProvider, StateSigner};
use bank_sync_common::Secret;
use bank_sync_engine::{
    helpers::CredentialCipher,
    BankSyncDatabase,
    ConnectionApi,
    LifecycleManager,
    ProviderRegistry,
    ReferencePatterns,
    ReviewApi,
    SqliteDatabase,
    SyncOrchestrator,
    TransactionMatcher,
};
use futures::{future::ok, FutureExt};
use log::*;
use rand::{thread_rng, RngCore};
use sha2::{Digest, Sha256};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    hooks::{logging_hooks, start_event_handlers},
    routes::{
        health,
        ApproveRoute,
        BeginAuthorizationRoute,
        CallbackRoute,
        ConnectionRoute,
        ConnectionsRoute,
        DisconnectRoute,
        DiscardRoute,
        ReauthorizeRoute,
        ReviewQueueRoute,
        SyncAllRoute,
        SyncConnectionRoute,
        TransactionRoute,
        TransactionsRoute,
    },
    sync_worker::start_sync_worker,
};

pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Everything the routes need, built once at startup and shared by every worker.
#[derive(Clone)]
pub struct BankSyncApis<B, P> {
    pub connections: ConnectionApi<B, P>,
    pub reviews: ReviewApi<B>,
    pub orchestrator: SyncOrchestrator<B, P>,
}

impl<B, P> BankSyncApis<B, P>
where
    B: BankSyncDatabase + 'static,
    P: BankProvider + Clone + 'static,
{
    pub fn configure(&self, cfg: &mut ServiceConfig) {
        cfg.app_data(web::Data::new(self.connections.clone()))
            .app_data(web::Data::new(self.reviews.clone()))
            .app_data(web::Data::new(self.orchestrator.clone()));
    }
}

/// Routes that are reachable without an API key.
pub fn public_routes<B, P>(cfg: &mut ServiceConfig)
where
    B: BankSyncDatabase + 'static,
    P: BankProvider + 'static,
{
    cfg.service(health).service(CallbackRoute::<B, P>::new());
}

/// The admin routes. They are mounted under `/api`, behind the API key check.
pub fn api_routes<B, P>(cfg: &mut ServiceConfig)
where
    B: BankSyncDatabase + 'static,
    P: BankProvider + 'static,
{
    cfg.service(ConnectionsRoute::<B, P>::new())
        .service(ConnectionRoute::<B, P>::new())
        .service(DisconnectRoute::<B, P>::new())
        .service(ReauthorizeRoute::<B, P>::new())
        .service(SyncConnectionRoute::<B, P>::new())
        .service(BeginAuthorizationRoute::<B, P>::new())
        .service(SyncAllRoute::<B, P>::new())
        .service(TransactionsRoute::<B>::new())
        .service(TransactionRoute::<B>::new())
        .service(ReviewQueueRoute::<B>::new())
        .service(ApproveRoute::<B>::new())
        .service(DiscardRoute::<B>::new());
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let cipher = credential_cipher(&config)?;
    let db = SqliteDatabase::new_with_url(&config.database_url, 25, cipher)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let apis = build_apis(&config, db).await?;
    let _worker = start_sync_worker(apis.orchestrator.clone(), apis.connections.clone(), config.sync_interval);
    let srv = create_server_instance(config, apis)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

fn credential_cipher(config: &ServerConfig) -> Result<CredentialCipher, ServerError> {
    let key = config.credential_key.reveal();
    if key.is_empty() {
        return Ok(CredentialCipher::random());
    }
    CredentialCipher::from_encoded_key(key)
        .map_err(|e| ServerError::ConfigurationError(format!("Invalid BSYNC_CREDENTIAL_KEY. {e}")))
}

fn state_signer(config: &ServerConfig) -> Result<StateSigner, ServerError> {
    let secret = match config.state_secret.reveal().as_bytes() {
        [] => {
            let mut bytes = vec![0u8; 32];
            thread_rng().fill_bytes(&mut bytes);
            bytes
        },
        s => s.to_vec(),
    };
    StateSigner::new(&Secret::new(secret), config.authorization_timeout)
        .map_err(|e| ServerError::ConfigurationError(format!("Invalid BSYNC_STATE_SECRET. {e}")))
}

fn provider_registry(config: &ServerConfig) -> Result<ProviderRegistry<AnyProvider>, ServerError> {
    let signer = state_signer(config)?;
    let mut registry = ProviderRegistry::new();
    if let Some(gc) = &config.gocardless {
        let provider = GoCardlessProvider::new(gc.clone(), signer.clone())
            .map_err(|e| ServerError::InitializeError(e.to_string()))?;
        registry = registry.with_provider(AnyProvider::from(provider));
        info!("🏦️ GoCardless provider enabled");
    }
    if let Some(eb) = &config.enable_banking {
        let provider = EnableBankingProvider::new(eb.clone(), signer)
            .map_err(|e| ServerError::InitializeError(e.to_string()))?;
        registry = registry.with_provider(AnyProvider::from(provider));
        info!("🏦️ Enable Banking provider enabled");
    }
    Ok(registry)
}

/// Wires the engine together: providers, lifecycle, matcher, orchestrator and event hooks.
pub async fn build_apis(
    config: &ServerConfig,
    db: SqliteDatabase,
) -> Result<BankSyncApis<SqliteDatabase, AnyProvider>, ServerError> {
    let registry = provider_registry(config)?;
    let producers = start_event_handlers(logging_hooks()).await;
    let lifecycle = LifecycleManager::new(db.clone(), registry, config.lifecycle.clone(), producers.clone())
        .with_retry_policy(config.retry_policy());
    let patterns = ReferencePatterns::new(&config.matcher.order_code_pattern, config.matcher.invoice_prefixes.as_slice())
        .map_err(|e| ServerError::ConfigurationError(format!("Invalid BSYNC_ORDER_CODE_PATTERN. {e}")))?;
    let matcher = TransactionMatcher::new(patterns, config.matcher.config.clone());
    let orchestrator = SyncOrchestrator::new(lifecycle.clone(), matcher, config.sync.clone());
    let connections = ConnectionApi::new(lifecycle, config.authorization_timeout);
    let reviews = ReviewApi::new(db, producers);
    Ok(BankSyncApis { connections, reviews, orchestrator })
}

/// True if the presented key matches the configured one. An empty configured key matches nothing.
pub fn api_key_matches(configured: &Secret<String>, presented: Option<&str>) -> bool {
    let configured = configured.reveal();
    match presented {
        Some(key) if !configured.is_empty() => Sha256::digest(key.as_bytes()) == Sha256::digest(configured.as_bytes()),
        _ => false,
    }
}

pub fn create_server_instance(
    config: ServerConfig,
    apis: BankSyncApis<SqliteDatabase, AnyProvider>,
) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        let api_key = config.api_key.clone();
        let api_scope = web::scope("/api")
            .wrap_fn(move |req, srv| {
                let presented = req.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
                if api_key_matches(&api_key, presented) {
                    srv.call(req).boxed_local()
                } else {
                    warn!("💻️ Rejected admin API request to {} without a valid API key", req.path());
                    ok(req.error_response(ServerError::Unauthorized)).boxed_local()
                }
            })
            .configure(api_routes::<SqliteDatabase, AnyProvider>);
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("bsync::access_log"))
            .configure(|cfg| apis.configure(cfg))
            .configure(public_routes::<SqliteDatabase, AnyProvider>)
            .service(api_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
