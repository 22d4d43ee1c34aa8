use actix_web::{http::StatusCode, test::TestRequest};
use serde_json::json as body;

use super::helpers::{admin_get, admin_post, booked, connect, json, send, setup, tear_down, REDIRECT_URI};
use crate::server::API_KEY_HEADER;

#[actix_web::test]
async fn health_needs_no_api_key() {
    let _ = env_logger::try_init().ok();
    let ctx = setup().await;
    let (status, body) = send(&ctx, TestRequest::get().uri("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
    tear_down(ctx).await;
}

#[actix_web::test]
async fn admin_api_requires_the_api_key() {
    let _ = env_logger::try_init().ok();
    let ctx = setup().await;
    let (status, body) = send(&ctx, TestRequest::get().uri("/api/connections")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json(&body)["error"], "A valid X-Api-Key header is required");
    let req = TestRequest::get().uri("/api/connections").insert_header((API_KEY_HEADER, "guess"));
    let (status, _) = send(&ctx, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = send(&ctx, admin_get("/api/connections")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[]");
    tear_down(ctx).await;
}

#[actix_web::test]
async fn authorize_then_list_and_sync() {
    let _ = env_logger::try_init().ok();
    let ctx = setup().await;
    ctx.provider.with_account("ACC1", "EUR", vec![vec![booked("tx-1", 1250, "Donation")]]);
    let id = connect(&ctx).await;

    let (status, body) = send(&ctx, admin_get("/api/connections?organizer=acme")).await;
    assert_eq!(status, StatusCode::OK);
    let connections = json(&body);
    assert_eq!(connections.as_array().map(|a| a.len()), Some(1));
    assert_eq!(connections[0]["state"], "Connected");
    assert_eq!(connections[0]["institution_id"], "NORDEA_FI");

    let (status, body) = send(&ctx, admin_get("/api/connections?organizer=someone-else")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[]");

    let (status, body) = send(&ctx, admin_post(&format!("/api/connections/{id}/sync"), body!({}))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let report = json(&body);
    assert_eq!(report["status"], "Completed");
    assert_eq!(report["unmatched"], 1);

    let (status, body) = send(&ctx, admin_get(&format!("/api/connections/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let overview = json(&body);
    assert_eq!(overview["connection"]["id"], id);
    assert_eq!(overview["connection"]["last_sync_report"]["status"], "Completed");
    assert_eq!(overview["open_reviews"], 0);
    tear_down(ctx).await;
}

#[actix_web::test]
async fn unknown_connections() {
    let _ = env_logger::try_init().ok();
    let ctx = setup().await;
    let (status, body) = send(&ctx, admin_get("/api/connections/404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
    let (status, _) = send(&ctx, admin_post("/api/connections/404/sync", body!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&ctx, admin_post("/api/connections/404/disconnect", body!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    tear_down(ctx).await;
}

#[actix_web::test]
async fn declined_authorization_creates_no_connection() {
    let _ = env_logger::try_init().ok();
    let ctx = setup().await;
    let params = body!({
        "organizer": "acme",
        "provider": "enable_banking",
        "institution_id": "NORDEA_FI",
        "redirect_uri": REDIRECT_URI,
    });
    let (status, body) = send(&ctx, admin_post("/api/authorizations", params)).await;
    assert_eq!(status, StatusCode::OK);
    let start = json(&body);
    assert!(start["url"].as_str().is_some_and(|u| u.starts_with("https://bank.example.com/")));
    let state = start["state"].as_str().expect("No state").to_string();

    let req = TestRequest::get().uri(&format!("/callback?state={state}&error=access_denied"));
    let (status, body) = send(&ctx, req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json(&body)["success"], false);

    // The attempt is closed, so the same state cannot be used again
    let req = TestRequest::get().uri(&format!("/callback?state={state}&code=code-1"));
    let (status, _) = send(&ctx, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = TestRequest::get().uri("/callback?state=not-a-state&code=code-1");
    let (status, _) = send(&ctx, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&ctx, admin_get("/api/connections")).await;
    assert_eq!(body, "[]");
    tear_down(ctx).await;
}

#[actix_web::test]
async fn disconnected_connections_stay_revoked() {
    let _ = env_logger::try_init().ok();
    let ctx = setup().await;
    ctx.provider.with_account("ACC1", "EUR", vec![vec![]]);
    let id = connect(&ctx).await;

    let (status, body) = send(&ctx, admin_post(&format!("/api/connections/{id}/disconnect"), body!({}))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json(&body)["state"], "Revoked");
    assert_eq!(ctx.provider.revoke_calls(), 1);

    let (_, body) = send(&ctx, admin_post(&format!("/api/connections/{id}/sync"), body!({}))).await;
    assert_eq!(json(&body)["status"], "Revoked");
    assert!(ctx.provider.requested_pages().is_empty());

    let params = body!({ "redirect_uri": REDIRECT_URI });
    let (status, _) = send(&ctx, admin_post(&format!("/api/connections/{id}/reauthorize"), params)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = send(&ctx, admin_get("/api/connections")).await;
    assert_eq!(body, "[]");
    let (_, body) = send(&ctx, admin_get("/api/connections?include_revoked=true")).await;
    assert_eq!(json(&body)[0]["state"], "Revoked");
    tear_down(ctx).await;
}
