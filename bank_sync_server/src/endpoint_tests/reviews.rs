use actix_web::http::StatusCode;
use bank_sync_common::MinorUnits;
use bank_sync_engine::{db_types::NewOrder, OrderManagement};
use serde_json::{json as body, Value};

use super::helpers::{admin_get, admin_post, booked, connect, json, send, setup, tear_down, TestContext};

/// Connects `acme`, books an order and syncs two transactions: one that needs review and one that matches nothing.
async fn seed(ctx: &TestContext) -> (i64, i64) {
    let order = NewOrder::new("acme", "spring-gala", "AB12CD", "EUR".parse().unwrap(), MinorUnits::from(2500));
    ctx.db.insert_order(order).await.expect("Error inserting order");
    ctx.provider.with_account("ACC1", "EUR", vec![vec![
        booked("tx-1", 2000, "Tickets AB 12 CD"),
        booked("tx-2", 400, "Gift for the evening"),
    ]]);
    let id = connect(ctx).await;
    let (status, body) = send(ctx, admin_post(&format!("/api/connections/{id}/sync"), body!({}))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let report = json(&body);
    assert_eq!(report["needs_review"], 1);
    assert_eq!(report["unmatched"], 1);

    let (status, body) = send(ctx, admin_get("/api/review_queue/acme")).await;
    assert_eq!(status, StatusCode::OK);
    let queue = json(&body);
    let id_of = |external_id: &str| -> i64 {
        queue
            .as_array()
            .and_then(|q| q.iter().find(|t| t["external_id"] == external_id))
            .and_then(|t| t["id"].as_i64())
            .unwrap_or_else(|| panic!("{external_id} is not in the review queue: {body}"))
    };
    (id_of("tx-1"), id_of("tx-2"))
}

#[actix_web::test]
async fn approve_a_suggested_match() {
    let _ = env_logger::try_init().ok();
    let ctx = setup().await;
    let (tx1, _) = seed(&ctx).await;

    let (status, body) = send(&ctx, admin_get(&format!("/api/transactions/{tx1}"))).await;
    assert_eq!(status, StatusCode::OK);
    let transaction = json(&body);
    assert_eq!(transaction["state"], "NeedsReview");
    assert_eq!(transaction["suggestions"][0]["order_code"], "AB12CD");

    let params = body!({ "orders": ["ab12cd"] });
    let (status, body) = send(&ctx, admin_post(&format!("/api/transactions/{tx1}/approve"), params.clone())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let transaction = json(&body);
    assert_eq!(transaction["state"], "Matched");
    assert_eq!(transaction["matched_orders"], body!(["AB12CD"]));

    let order = ctx.db.fetch_order_by_code("acme", "AB12CD").await.unwrap().expect("Order should exist");
    assert_eq!(order.pending, MinorUnits::from(500));

    // Once matched, the transaction is no longer reviewable
    let (status, _) = send(&ctx, admin_post(&format!("/api/transactions/{tx1}/approve"), params)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    tear_down(ctx).await;
}

#[actix_web::test]
async fn bad_approvals_are_refused() {
    let _ = env_logger::try_init().ok();
    let ctx = setup().await;
    let (_, tx2) = seed(&ctx).await;
    let path = format!("/api/transactions/{tx2}/approve");

    let (status, _) = send(&ctx, admin_post(&path, body!({ "orders": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = send(&ctx, admin_post(&path, body!({ "orders": ["ZZ99ZZ"] }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
    let (status, _) = send(&ctx, admin_post("/api/transactions/9999/approve", body!({ "orders": ["AB12CD"] }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&ctx, admin_get(&format!("/api/transactions/{tx2}"))).await;
    assert_eq!(json(&body)["state"], "Unmatched");
    tear_down(ctx).await;
}

#[actix_web::test]
async fn discard_and_search() {
    let _ = env_logger::try_init().ok();
    let ctx = setup().await;
    let (_, tx2) = seed(&ctx).await;

    let params = body!({ "reason": "Donation, not a ticket sale" });
    let (status, body) = send(&ctx, admin_post(&format!("/api/transactions/{tx2}/discard"), params)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let transaction = json(&body);
    assert_eq!(transaction["state"], "Discarded");
    assert_eq!(transaction["message"], "Donation, not a ticket sale");

    let (_, body) = send(&ctx, admin_get("/api/review_queue/acme")).await;
    let queue = json(&body);
    assert_eq!(queue.as_array().map(Vec::len), Some(1));
    assert_eq!(queue[0]["external_id"], "tx-1");

    let (status, body) = send(&ctx, admin_get("/api/transactions?organizer=acme&state=Discarded,Matched")).await;
    assert_eq!(status, StatusCode::OK);
    let found = json(&body);
    let ids = found.as_array().map(|a| a.iter().map(|t| t["id"].clone()).collect::<Vec<Value>>()).unwrap_or_default();
    assert_eq!(ids, vec![body!(tx2)]);

    let (status, _) = send(&ctx, admin_get("/api/transactions?state=Lost")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    tear_down(ctx).await;
}
