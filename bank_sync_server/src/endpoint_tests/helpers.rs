use actix_web::{
    dev::Service,
    http::StatusCode,
    test,
    test::TestRequest,
    web,
    App,
};
use bank_providers::{BookingStatus, ProviderKind, RawTransaction, RetryPolicy};
use bank_sync_common::{MinorUnits, Secret};
use bank_sync_engine::{
    test_utils::{
        prepare_env::{new_test_database, random_db_path},
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
    TransactionMatcher,
};
use chrono::NaiveDate;
use futures::{future::ok, FutureExt};
use log::*;
use serde_json::Value;
use sqlx::{migrate::MigrateDatabase, Sqlite};

use crate::{
    errors::ServerError,
    hooks::{logging_hooks, start_event_handlers},
    server::{api_key_matches, api_routes, public_routes, BankSyncApis, API_KEY_HEADER},
};

pub const TEST_API_KEY: &str = "endpoint-tests-api-key";
pub const REDIRECT_URI: &str = "https://tickets.example.com/bank";

pub struct TestContext {
    pub url: String,
    pub db: SqliteDatabase,
    pub provider: ScriptedProvider,
    pub apis: BankSyncApis<SqliteDatabase, ScriptedProvider>,
}

pub fn booked(id: &str, cents: i64, remittance: &str) -> RawTransaction {
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

/// A fresh database behind the full set of engine APIs, with a scripted Enable Banking provider.
pub async fn setup() -> TestContext {
    let url = random_db_path();
    let db = new_test_database(&url).await;
    let provider = ScriptedProvider::new(ProviderKind::EnableBanking);
    let producers = start_event_handlers(logging_hooks()).await;
    let registry = ProviderRegistry::new().with_provider(provider.clone());
    let lifecycle = LifecycleManager::new(db.clone(), registry, LifecycleConfig::default(), producers.clone())
        .with_retry_policy(RetryPolicy::immediate(1));
    let patterns = ReferencePatterns::with_default_order_code::<&str>(&[]).expect("Invalid patterns");
    let matcher = TransactionMatcher::new(patterns, MatcherConfig::default());
    let orchestrator = SyncOrchestrator::new(lifecycle.clone(), matcher, SyncConfig::default());
    let connections = ConnectionApi::new(lifecycle, chrono::Duration::minutes(30));
    let reviews = ReviewApi::new(db.clone(), producers);
    let apis = BankSyncApis { connections, reviews, orchestrator };
    TestContext { url, db, provider, apis }
}

pub async fn tear_down(ctx: TestContext) {
    ctx.db.close().await;
    if let Err(e) = Sqlite::drop_database(&ctx.url).await {
        error!("🚀️ Failed to drop database {}: {e}", ctx.url);
    }
}

/// Sends the request through the same routes and API key check the server uses.
pub async fn send(ctx: &TestContext, req: TestRequest) -> (StatusCode, String) {
    let api_key = Secret::new(TEST_API_KEY.to_string());
    let apis = ctx.apis.clone();
    let api_scope = web::scope("/api")
        .wrap_fn(move |req, srv| {
            let presented = req.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
            if api_key_matches(&api_key, presented) {
                srv.call(req).boxed_local()
            } else {
                ok(req.error_response(ServerError::Unauthorized)).boxed_local()
            }
        })
        .configure(api_routes::<SqliteDatabase, ScriptedProvider>);
    let app = App::new()
        .configure(move |cfg| apis.configure(cfg))
        .configure(public_routes::<SqliteDatabase, ScriptedProvider>)
        .service(api_scope);
    let service = test::init_service(app).await;
    debug!("🚀️ Making request");
    let res = test::call_service(&service, req.to_request()).await;
    let status = res.status();
    let body = String::from_utf8_lossy(&test::read_body(res).await).into_owned();
    (status, body)
}

pub fn admin_get(path: &str) -> TestRequest {
    TestRequest::get().uri(path).insert_header((API_KEY_HEADER, TEST_API_KEY))
}

pub fn admin_post(path: &str, body: Value) -> TestRequest {
    TestRequest::post().uri(path).insert_header((API_KEY_HEADER, TEST_API_KEY)).set_json(body)
}

pub fn json(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("Response is not JSON ({e}): {body}"))
}

/// Runs the redirect flow for `acme` through the endpoints and returns the new connection's id.
pub async fn connect(ctx: &TestContext) -> i64 {
    let params = serde_json::json!({
        "organizer": "acme",
        "provider": "enable_banking",
        "institution_id": "NORDEA_FI",
        "redirect_uri": REDIRECT_URI,
    });
    let (status, body) = send(ctx, admin_post("/api/authorizations", params)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let state = json(&body)["state"].as_str().expect("No state in authorization start").to_string();
    let req = TestRequest::get().uri(&format!("/callback?state={state}&code=code-1"));
    let (status, body) = send(ctx, req).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    json(&body)["id"].as_i64().expect("No connection id")
}
