//! Request handler definitions
//!
//! Define each route and its handler here. Handlers that are more than a few lines MUST go into the engine's APIs.
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Syncing talks to the bank and can take a while, so it is always
//! awaited, never blocked on.
use actix_web::{get, web, HttpResponse, Responder};
use bank_providers::BankProvider;
use bank_sync_engine::{
    db_types::{ConnectionId, TransactionQueryFilter},
    BankSyncDatabase,
    ConnectionApi,
    ConnectionManagement,
    ReviewApi,
    SyncOrchestrator,
};
use log::*;

use crate::{
    data_objects::{
        ApproveParams,
        AuthorizationParams,
        CallbackParams,
        ConnectionQuery,
        DiscardParams,
        JsonResponse,
        ReauthorizeParams,
        TransactionQuery,
    },
    errors::ServerError,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Authorization  ----------------------------------------------------
route!(begin_authorization => Post "/authorizations" impl BankSyncDatabase, BankProvider);
/// Starts connecting an organizer's bank account.
///
/// The response carries the URL to send the account holder to. When they are done, the bank redirects them back to
/// `redirect_uri`, which should end up at [`callback`].
pub async fn begin_authorization<B, P>(
    body: web::Json<AuthorizationParams>,
    api: web::Data<ConnectionApi<B, P>>,
) -> Result<HttpResponse, ServerError>
where
    B: BankSyncDatabase,
    P: BankProvider,
{
    let params = body.into_inner();
    let AuthorizationParams { organizer, provider, institution_id, redirect_uri } = &params;
    debug!("💻️ Authorization requested for {organizer} at {institution_id} via {provider}");
    let start = api.begin_authorization(organizer, *provider, institution_id, redirect_uri).await?;
    Ok(HttpResponse::Ok().json(start))
}

route!(callback => Get "/callback" impl BankSyncDatabase, BankProvider);
/// Where the bank sends the account holder back to. This route is public: the signed state token is what ties the
/// request to an authorization we started.
pub async fn callback<B, P>(
    query: web::Query<CallbackParams>,
    api: web::Data<ConnectionApi<B, P>>,
) -> Result<HttpResponse, ServerError>
where
    B: BankSyncDatabase,
    P: BankProvider,
{
    let params = query.into_inner();
    if let Some(error) = params.error {
        let reason = params.error_description.map(|d| format!("{error}: {d}")).unwrap_or(error);
        info!("💻️ Bank reported an authorization error: {reason}");
        api.cancel_authorization(&params.state, &reason).await?;
        let response = JsonResponse::failure(format!("Bank access was not granted. {reason}"));
        return Ok(HttpResponse::Conflict().json(response));
    }
    let connection = api.complete_authorization(&params.state, params.code.as_deref()).await?;
    info!("💻️ Authorization complete for connection {}", connection.id);
    Ok(HttpResponse::Ok().json(connection))
}

//----------------------------------------------   Connections  ----------------------------------------------------
route!(connections => Get "/connections" impl BankSyncDatabase, BankProvider);
pub async fn connections<B, P>(
    query: web::Query<ConnectionQuery>,
    api: web::Data<ConnectionApi<B, P>>,
) -> Result<HttpResponse, ServerError>
where
    B: BankSyncDatabase,
    P: BankProvider,
{
    let connections = api.list_connections(query.into_inner().into()).await?;
    Ok(HttpResponse::Ok().json(connections))
}

route!(connection => Get "/connections/{id}" impl BankSyncDatabase, BankProvider);
pub async fn connection<B, P>(
    path: web::Path<i64>,
    api: web::Data<ConnectionApi<B, P>>,
) -> Result<HttpResponse, ServerError>
where
    B: BankSyncDatabase,
    P: BankProvider,
{
    let overview = api.connection_overview(ConnectionId::from(path.into_inner())).await?;
    Ok(HttpResponse::Ok().json(overview))
}

route!(disconnect => Post "/connections/{id}/disconnect" impl BankSyncDatabase, BankProvider);
pub async fn disconnect<B, P>(
    path: web::Path<i64>,
    api: web::Data<ConnectionApi<B, P>>,
) -> Result<HttpResponse, ServerError>
where
    B: BankSyncDatabase,
    P: BankProvider,
{
    let id = ConnectionId::from(path.into_inner());
    info!("💻️ Disconnect requested for connection {id}");
    let connection = api.disconnect(id).await?;
    Ok(HttpResponse::Ok().json(connection))
}

route!(reauthorize => Post "/connections/{id}/reauthorize" impl BankSyncDatabase, BankProvider);
pub async fn reauthorize<B, P>(
    path: web::Path<i64>,
    body: web::Json<ReauthorizeParams>,
    api: web::Data<ConnectionApi<B, P>>,
) -> Result<HttpResponse, ServerError>
where
    B: BankSyncDatabase,
    P: BankProvider,
{
    let id = ConnectionId::from(path.into_inner());
    let start = api.reauthorize(id, &body.redirect_uri).await?;
    Ok(HttpResponse::Ok().json(start))
}

//----------------------------------------------   Sync  ----------------------------------------------------
route!(sync_connection => Post "/connections/{id}/sync" impl BankSyncDatabase, BankProvider);
/// Syncs one connection now. Subject to the same daily allowance as scheduled syncs.
pub async fn sync_connection<B, P>(
    path: web::Path<i64>,
    api: web::Data<SyncOrchestrator<B, P>>,
) -> Result<HttpResponse, ServerError>
where
    B: BankSyncDatabase,
    P: BankProvider,
{
    let id = ConnectionId::from(path.into_inner());
    if api.lifecycle().db().fetch_connection(id).await?.is_none() {
        return Err(ServerError::NoRecordFound(format!("Connection {id} does not exist")));
    }
    info!("💻️ Manual sync requested for connection {id}");
    let report = api.sync_connection(id).await;
    Ok(HttpResponse::Ok().json(report))
}

route!(sync_all => Post "/sync" impl BankSyncDatabase, BankProvider);
pub async fn sync_all<B, P>(api: web::Data<SyncOrchestrator<B, P>>) -> Result<HttpResponse, ServerError>
where
    B: BankSyncDatabase,
    P: BankProvider,
{
    info!("💻️ Manual sync of all connections requested");
    let report = api.run_all().await;
    Ok(HttpResponse::Ok().json(report))
}

//----------------------------------------------   Transactions  ----------------------------------------------------
route!(transactions => Get "/transactions" impl BankSyncDatabase);
pub async fn transactions<B: BankSyncDatabase>(
    query: web::Query<TransactionQuery>,
    api: web::Data<ReviewApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let filter = TransactionQueryFilter::try_from(query.into_inner())?;
    let transactions = api.search_transactions(filter).await?;
    Ok(HttpResponse::Ok().json(transactions))
}

route!(review_queue => Get "/review_queue/{organizer}" impl BankSyncDatabase);
pub async fn review_queue<B: BankSyncDatabase>(
    path: web::Path<String>,
    api: web::Data<ReviewApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let queue = api.review_queue(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(queue))
}

route!(transaction => Get "/transactions/{id}" impl BankSyncDatabase);
pub async fn transaction<B: BankSyncDatabase>(
    path: web::Path<i64>,
    api: web::Data<ReviewApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let transaction = api.transaction(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(transaction))
}

route!(approve => Post "/transactions/{id}/approve" impl BankSyncDatabase);
pub async fn approve<B: BankSyncDatabase>(
    path: web::Path<i64>,
    body: web::Json<ApproveParams>,
    api: web::Data<ReviewApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    info!("💻️ Approval of transaction {id} for {} requested", body.orders.join(", "));
    let transaction = api.approve(id, &body.orders).await?;
    Ok(HttpResponse::Ok().json(transaction))
}

route!(discard => Post "/transactions/{id}/discard" impl BankSyncDatabase);
pub async fn discard<B: BankSyncDatabase>(
    path: web::Path<i64>,
    body: web::Json<DiscardParams>,
    api: web::Data<ReviewApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let transaction = api.discard(id, &body.reason).await?;
    Ok(HttpResponse::Ok().json(transaction))
}
