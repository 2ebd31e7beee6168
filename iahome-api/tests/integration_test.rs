/// Integration tests for the IAHome API
///
/// These tests verify the full system works end-to-end:
/// - Accounts (register, login, refresh, password reset)
/// - Catalog, free-module activation and admin grants
/// - Module token issue, validation and usage recording
/// - QR codes and the public redirect
/// - Chunked uploads forwarded to the module backend
///
/// Require PostgreSQL (DATABASE_URL) and Redis (REDIS_URL).

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{
    body_json, body_text, create_module, create_profile, TestContext, TEST_PASSWORD,
    TEST_UPLOAD_MAX_BYTES,
};
use iahome_shared::models::profile::Role;
use iahome_shared::models::qr_code::QrCode;
use iahome_shared::models::user_application::UserApplication;
use iahome_shared::usage::UsageCounter;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_health() {
    let ctx = TestContext::new().await.unwrap();

    let response = ctx.send_json("GET", "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_register_login_refresh() {
    let ctx = TestContext::new().await.unwrap();
    let email = format!("new-{}@example.com", Uuid::new_v4());

    let response = ctx
        .send_json(
            "POST",
            "/v1/auth/register",
            None,
            Some(json!({ "email": email, "password": "letters4digits", "full_name": "New User" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let registered = body_json(response).await;
    assert_eq!(registered["role"], "user");
    let user_id: Uuid = registered["user_id"].as_str().unwrap().parse().unwrap();

    // Same email again, different case
    let response = ctx
        .send_json(
            "POST",
            "/v1/auth/register",
            None,
            Some(json!({ "email": email.to_uppercase(), "password": "letters4digits" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = ctx
        .send_json(
            "POST",
            "/v1/auth/login",
            None,
            Some(json!({ "email": email, "password": "wrong-password1" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = ctx
        .send_json(
            "POST",
            "/v1/auth/login",
            None,
            Some(json!({ "email": email, "password": "letters4digits" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let session = body_json(response).await;

    let response = ctx
        .send_json(
            "POST",
            "/v1/auth/refresh",
            None,
            Some(json!({ "refresh_token": session["refresh_token"] })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["access_token"].is_string());

    // An access token is not a refresh token
    let response = ctx
        .send_json(
            "POST",
            "/v1/auth/refresh",
            None,
            Some(json!({ "refresh_token": session["access_token"] })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    sqlx::query("DELETE FROM profiles WHERE id = $1")
        .bind(user_id)
        .execute(&ctx.db)
        .await
        .unwrap();
    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_weak_password_rejected() {
    let ctx = TestContext::new().await.unwrap();

    let response = ctx
        .send_json(
            "POST",
            "/v1/auth/register",
            None,
            Some(json!({ "email": format!("weak-{}@example.com", Uuid::new_v4()), "password": "onlyletters" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_password_reset_does_not_enumerate() {
    let ctx = TestContext::new().await.unwrap();

    for email in [ctx.user.email.clone(), format!("ghost-{}@example.com", Uuid::new_v4())] {
        let response = ctx
            .send_json(
                "POST",
                "/v1/auth/password-reset/request",
                None,
                Some(json!({ "email": email })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let response = ctx
        .send_json(
            "POST",
            "/v1/auth/password-reset/confirm",
            None,
            Some(json!({ "token": "bogus", "new_password": "another1pass" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // The original password still works
    let response = ctx
        .send_json(
            "POST",
            "/v1/auth/login",
            None,
            Some(json!({ "email": ctx.user.email, "password": TEST_PASSWORD })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_catalog_hides_backend_url() {
    let ctx = TestContext::new().await.unwrap();
    let module = create_module(&ctx.db, Some("http://internal:8080"), 0, Some(5))
        .await
        .unwrap();

    let response = ctx
        .send_json("GET", &format!("/v1/modules/{}", module.slug), None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["slug"], module.slug);
    assert_eq!(body["is_free"], true);
    assert!(body.get("url").is_none());

    let response = ctx
        .send_json("GET", "/v1/modules/does-not-exist", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_activate_free_module() {
    let ctx = TestContext::new().await.unwrap();
    let module = create_module(&ctx.db, None, 0, Some(3)).await.unwrap();
    let auth = ctx.user_auth();

    let response = ctx
        .send_json(
            "POST",
            "/v1/applications/activate",
            Some(&auth),
            Some(json!({ "module_slug": module.slug })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let grant = body_json(response).await;
    assert_eq!(grant["status"], "active");
    assert_eq!(grant["remaining_uses"], 3);

    // Already active: returned unchanged
    let response = ctx
        .send_json(
            "POST",
            "/v1/applications/activate",
            Some(&auth),
            Some(json!({ "module_slug": module.slug })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = ctx.send_json("GET", "/v1/applications", Some(&auth), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let grants = body_json(response).await;
    assert!(grants
        .as_array()
        .unwrap()
        .iter()
        .any(|g| g["module_slug"] == module.slug));

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_reactivation_keeps_usage() {
    let ctx = TestContext::new().await.unwrap();
    let module = create_module(&ctx.db, None, 0, Some(3)).await.unwrap();
    let auth = ctx.user_auth();
    let activate = json!({ "module_slug": module.slug });

    let response = ctx
        .send_json("POST", "/v1/applications/activate", Some(&auth), Some(activate.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let grant_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let counter = UsageCounter::new(ctx.db.clone());
    counter.record(ctx.user.id, &module.slug).await.unwrap();

    let deactivate = format!("/v1/applications/{}/deactivate", grant_id);
    let response = ctx.send_json("POST", &deactivate, Some(&auth), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Back on with the spent use still counted
    let response = ctx
        .send_json("POST", "/v1/applications/activate", Some(&auth), Some(activate.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let grant = body_json(response).await;
    assert_eq!(grant["usage_count"], 1);
    assert_eq!(grant["remaining_uses"], 2);

    counter.record(ctx.user.id, &module.slug).await.unwrap();
    counter.record(ctx.user.id, &module.slug).await.unwrap();

    // An exhausted grant cannot be renewed by switching it off and on
    let response = ctx.send_json("POST", &deactivate, Some(&auth), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = ctx
        .send_json("POST", "/v1/applications/activate", Some(&auth), Some(activate))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let grant = UserApplication::find_for_module(&ctx.db, ctx.user.id, &module.slug)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(grant.usage_count, 3);
    assert!(!grant.is_active);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_paid_module_needs_admin_grant() {
    let ctx = TestContext::new().await.unwrap();
    let module = create_module(&ctx.db, None, 1500, None).await.unwrap();

    let response = ctx
        .send_json(
            "POST",
            "/v1/applications/activate",
            Some(&ctx.user_auth()),
            Some(json!({ "module_slug": module.slug })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Users cannot grant themselves
    let grant_body = json!({ "user_id": ctx.user.id, "module_slug": module.slug, "max_usage": 10 });
    let response = ctx
        .send_json(
            "POST",
            "/v1/admin/applications",
            Some(&ctx.user_auth()),
            Some(grant_body.clone()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = ctx
        .send_json(
            "POST",
            "/v1/admin/applications",
            Some(&ctx.admin_auth()),
            Some(grant_body),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let grant = body_json(response).await;
    assert_eq!(grant["max_usage"], 10);
    assert_eq!(grant["usage_count"], 0);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_admin_module_management() {
    let ctx = TestContext::new().await.unwrap();
    let slug = common::unique_slug("admin");

    let response = ctx
        .send_json(
            "POST",
            "/v1/admin/modules",
            None,
            Some(json!({ "slug": slug, "title": "Admin tool" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = ctx
        .send_json(
            "POST",
            "/v1/admin/modules",
            Some(&ctx.admin_auth()),
            Some(json!({ "slug": "Bad Slug", "title": "Admin tool" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = ctx
        .send_json(
            "POST",
            "/v1/admin/modules",
            Some(&ctx.admin_auth()),
            Some(json!({ "slug": slug, "title": "Admin tool", "url": "http://tool:9000" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let module = body_json(response).await;
    let id = module["id"].as_str().unwrap().to_string();

    let response = ctx
        .send_json(
            "POST",
            "/v1/admin/modules",
            Some(&ctx.admin_auth()),
            Some(json!({ "slug": slug, "title": "Duplicate" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = ctx
        .send_json(
            "PUT",
            &format!("/v1/admin/modules/{}", id),
            Some(&ctx.admin_auth()),
            Some(json!({ "price_cents": 990, "url": null })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["price_cents"], 990);
    assert!(updated["url"].is_null());

    sqlx::query("DELETE FROM modules WHERE slug = $1")
        .bind(&slug)
        .execute(&ctx.db)
        .await
        .unwrap();
    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_issue_validate_and_record_usage() {
    let ctx = TestContext::new().await.unwrap();

    let response = ctx
        .send_json(
            "POST",
            "/v1/tokens/issue",
            Some(&ctx.user_auth()),
            Some(json!({ "module_slug": ctx.module.slug, "permissions": ["read", "advanced_features"] })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let issued = body_json(response).await;
    let token = issued["token"].as_str().unwrap().to_string();
    assert_eq!(issued["permissions"], json!(["read"]));
    assert!(issued["entry_url"]
        .as_str()
        .unwrap()
        .starts_with(&format!("https://iahome.test/proxy/{}/?token=", ctx.module.slug)));

    let response = ctx
        .send_json(
            "POST",
            "/v1/tokens/validate",
            None,
            Some(json!({ "token": token, "module_slug": ctx.module.slug })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let validated = body_json(response).await;
    assert_eq!(validated["valid"], true);
    assert_eq!(validated["email"], ctx.user.email);
    assert_eq!(validated["remaining_uses"], 20);

    let response = ctx
        .send_json(
            "POST",
            "/v1/usage/record",
            Some(&format!("Bearer {}", token)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let usage = body_json(response).await;
    assert_eq!(usage["usage_count"], 1);
    assert_eq!(usage["remaining"], 19);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_issue_without_grant_is_forbidden() {
    let ctx = TestContext::new().await.unwrap();
    let module = create_module(&ctx.db, None, 0, None).await.unwrap();

    let response = ctx
        .send_json(
            "POST",
            "/v1/tokens/issue",
            Some(&ctx.user_auth()),
            Some(json!({ "module_slug": module.slug })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_qr_code_lifecycle() {
    let ctx = TestContext::new().await.unwrap();
    let auth = ctx.user_auth();

    let response = ctx
        .send_json(
            "POST",
            "/v1/qr",
            Some(&auth),
            Some(json!({ "name": "Bad", "destination_url": "javascript:alert(1)" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = ctx
        .send_json(
            "POST",
            "/v1/qr",
            Some(&auth),
            Some(json!({ "name": "Flyer", "destination_url": "https://example.com/promo?x=1" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let code = created["code"].as_str().unwrap().to_string();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 8);
    assert_eq!(created["scan_url"], format!("https://iahome.test/qr/{}", code));

    for _ in 0..3 {
        let response = ctx.send_json("GET", &format!("/qr/{}", code), None, None).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://example.com/promo?x=1"
        );
    }

    let response = ctx.send_json("GET", "/v1/qr", Some(&auth), None).await;
    let listed = body_json(response).await;
    let entry = listed
        .as_array()
        .unwrap()
        .iter()
        .find(|q| q["code"] == code.as_str())
        .unwrap()
        .clone();
    assert_eq!(entry["scans"], 3);
    assert!(entry["last_scan_at"].is_string());

    // Someone else cannot delete it
    let other = create_profile(&ctx.db, Role::User).await.unwrap();
    let other_auth = format!(
        "Bearer {}",
        iahome_shared::auth::jwt::create_token(
            &iahome_shared::auth::jwt::Claims::new(
                other.id,
                Role::User,
                iahome_shared::auth::jwt::TokenType::Access
            ),
            &ctx.config.jwt.secret,
        )
        .unwrap()
    );
    let response = ctx
        .send_json("DELETE", &format!("/v1/qr/{}", id), Some(&other_auth), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = ctx
        .send_json("DELETE", &format!("/v1/qr/{}", id), Some(&auth), None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = ctx.send_json("GET", &format!("/qr/{}", code), None, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let stored = QrCode::find_by_code(&ctx.db, &code).await.unwrap().unwrap();
    assert_eq!(stored.scans, 3);

    let response = ctx.send_json("GET", "/qr/nope", None, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    sqlx::query("DELETE FROM profiles WHERE id = $1")
        .bind(other.id)
        .execute(&ctx.db)
        .await
        .unwrap();
    ctx.cleanup().await.unwrap();
}

async fn init_upload(ctx: &TestContext, file_name: &str, total_chunks: u32) -> (StatusCode, serde_json::Value) {
    let response = ctx
        .send_json(
            "POST",
            "/v1/uploads",
            Some(&ctx.user_auth()),
            Some(json!({
                "module_slug": ctx.module.slug,
                "file_name": file_name,
                "content_type": "text/plain",
                "total_chunks": total_chunks,
            })),
        )
        .await;
    let status = response.status();
    (status, body_json(response).await)
}

async fn put_chunk(ctx: &TestContext, auth: &str, id: &str, index: u32, data: impl Into<Body>) -> StatusCode {
    ctx.send(
        Request::builder()
            .method("PUT")
            .uri(format!("/v1/uploads/{}/chunks/{}", id, index))
            .header(header::AUTHORIZATION, auth)
            .body(data.into())
            .unwrap(),
    )
    .await
    .status()
}

#[tokio::test]
async fn test_chunked_upload_is_assembled_and_forwarded() {
    let ctx = TestContext::new().await.unwrap();
    let auth = ctx.user_auth();

    let (status, init) = init_upload(&ctx, "notes.txt", 3).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(init["expires_in_secs"], 300);
    let id = init["upload_id"].as_str().unwrap().to_string();

    // Out of order, with one chunk re-sent
    assert_eq!(put_chunk(&ctx, &auth, &id, 2, "gamma").await, StatusCode::OK);
    assert_eq!(put_chunk(&ctx, &auth, &id, 0, "alpha-").await, StatusCode::OK);

    let response = ctx
        .send_json("POST", &format!("/v1/uploads/{}/complete", id), Some(&auth), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("[1]"));

    assert_eq!(put_chunk(&ctx, &auth, &id, 1, "BETA-").await, StatusCode::OK);
    assert_eq!(put_chunk(&ctx, &auth, &id, 1, "beta-").await, StatusCode::OK);
    assert_eq!(put_chunk(&ctx, &auth, &id, 3, "extra").await, StatusCode::BAD_REQUEST);

    let response = ctx
        .send_json("POST", &format!("/v1/uploads/{}/complete", id), Some(&auth), None)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let delivered = body_json(response).await;
    assert_eq!(delivered["file_name"], "notes.txt");
    assert_eq!(delivered["content_type"], "text/plain");
    assert_eq!(delivered["body"], "alpha-beta-gamma");

    // Session is gone after delivery
    let response = ctx
        .send_json("POST", &format!("/v1/uploads/{}/complete", id), Some(&auth), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_upload_rules() {
    let ctx = TestContext::new().await.unwrap();

    let (status, _) = init_upload(&ctx, "../escape.txt", 1).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = init_upload(&ctx, "zero.txt", 0).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Sessions are private to their owner
    let (status, init) = init_upload(&ctx, "mine.txt", 1).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = init["upload_id"].as_str().unwrap().to_string();
    assert_eq!(
        put_chunk(&ctx, &ctx.admin_auth(), &id, 0, "data").await,
        StatusCode::NOT_FOUND
    );

    // A rejected delivery keeps the session for a retry
    let (_, init) = init_upload(&ctx, "reject.bin", 1).await;
    let id = init["upload_id"].as_str().unwrap().to_string();
    assert_eq!(put_chunk(&ctx, &ctx.user_auth(), &id, 0, "x").await, StatusCode::OK);
    let response = ctx
        .send_json(
            "POST",
            &format!("/v1/uploads/{}/complete", id),
            Some(&ctx.user_auth()),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(put_chunk(&ctx, &ctx.user_auth(), &id, 0, "y").await, StatusCode::OK);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_upload_size_is_capped() {
    let ctx = TestContext::new().await.unwrap();
    let auth = ctx.user_auth();
    let limit = TEST_UPLOAD_MAX_BYTES as usize;

    let (status, init) = init_upload(&ctx, "big.bin", 2).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = init["upload_id"].as_str().unwrap().to_string();

    let response = ctx
        .send(
            Request::builder()
                .method("PUT")
                .uri(format!("/v1/uploads/{}/chunks/0", id))
                .header(header::AUTHORIZATION, &auth)
                .body(Body::from(vec![b'a'; limit - 10]))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let chunk = body_json(response).await;
    assert_eq!(chunk["stored_bytes"], limit - 10);
    assert_eq!(chunk["max_bytes"], limit);

    let status = put_chunk(&ctx, &auth, &id, 1, vec![b'b'; 11]).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    assert_eq!(put_chunk(&ctx, &auth, &id, 1, vec![b'b'; 10]).await, StatusCode::OK);

    let response = ctx
        .send_json("POST", &format!("/v1/uploads/{}/complete", id), Some(&auth), None)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["size"], limit);

    ctx.cleanup().await.unwrap();
}
