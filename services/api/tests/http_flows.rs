//! End-to-end requests through the real router, backed by the in-memory store.

mod common;

use api_lib::{config::Config, web::router};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::{body_json, get_request, json_request, set_cookie, test_app, TestApp};
use profiler_core::{
    accounting::UNLIMITED_BALANCE,
    ports::{DatabaseService, IntentStatus},
};
use serde_json::json;
use tower::ServiceExt;

fn app_with(config: Config, with_payments: bool) -> (TestApp, Router) {
    let app = test_app(config, with_payments);
    let router = router(app.state.clone());
    (app, router)
}

fn admin_config() -> Config {
    Config {
        admin_emails: vec!["admin@example.com".to_string()],
        ..Config::default()
    }
}

async fn signup(router: &Router, email: &str) -> String {
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/signup",
            None,
            json!({"email": email, "password": "correct horse"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    set_cookie(&response, "session").expect("signup sets the session cookie")
}

#[tokio::test]
async fn health_is_public() {
    let (_, router) = app_with(Config::default(), false);
    let response = router.oneshot(get_request("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn anonymous_analysis_creates_a_session_and_charges_it() {
    let (app, router) = app_with(Config::default(), false);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/analyze",
            None,
            json!({"text": "Why would anyone do that?", "analysis_type": "cognitive", "provider": "open_ai"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = set_cookie(&response, "anon_session").expect("anonymous cookie is set");
    let body = body_json(response).await;
    assert_eq!(body["provider"], "open_ai");
    assert_eq!(body["result"]["score"], 118.0);
    assert!(body["analysis_id"].is_null());
    let charged = body["tokens_charged"].as_i64().unwrap();
    assert!(charged > 0);

    let session_id = cookie.trim_start_matches("anon_session=");
    let session = app
        .state
        .db
        .get_anonymous_session(session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.tokens_used, charged);

    // The cookie is reused rather than a new session being minted.
    let status = router
        .oneshot(get_request("/api/tokens/status", Some(&cookie)))
        .await
        .unwrap();
    assert!(set_cookie(&status, "anon_session").is_none());
    let body = body_json(status).await;
    assert_eq!(body["tier"], "free");
    assert_eq!(body["tokens_used"], charged);
}

#[tokio::test]
async fn oversized_free_request_is_refused_with_upgrade_hint() {
    let (_, router) = app_with(Config::default(), false);
    let text = "x".repeat(2_400);

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/analyze",
            None,
            json!({"text": text, "analysis_type": "intelligence", "provider": "open_ai"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "TOKEN_LIMIT_EXCEEDED");
    assert_eq!(body["upgrade_required"], true);
}

#[tokio::test]
async fn unconfigured_provider_is_a_service_error() {
    let (_, router) = app_with(Config::default(), false);
    let response = router
        .oneshot(json_request(
            "POST",
            "/api/analyze",
            None,
            json!({"text": "hello", "analysis_type": "originality", "provider": "anthropic"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "PROVIDER_NOT_CONFIGURED");
}

#[tokio::test]
async fn comprehensive_type_is_rejected_on_the_short_route() {
    let (_, router) = app_with(Config::default(), false);
    let response = router
        .oneshot(json_request(
            "POST",
            "/api/analyze",
            None,
            json!({"text": "hello", "analysis_type": "comprehensive", "provider": "heuristic"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn protected_routes_require_a_signed_in_user() {
    let (_, router) = app_with(Config::default(), false);
    let response = router.oneshot(get_request("/auth/me", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "AUTH_REQUIRED");
}

#[tokio::test]
async fn rejected_requests_do_not_mint_anonymous_sessions() {
    let (_, router) = app_with(Config::default(), false);
    for uri in ["/api/analyses", "/api/documents", "/api/tokens/history", "/auth/me"] {
        let response = router
            .clone()
            .oneshot(get_request(uri, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        assert!(set_cookie(&response, "anon_session").is_none(), "{}", uri);
    }

    // An existing anonymous session is not enough either.
    let status = router
        .clone()
        .oneshot(get_request("/api/tokens/status", None))
        .await
        .unwrap();
    let anon = set_cookie(&status, "anon_session").expect("anonymous routes still mint");
    let response = router
        .oneshot(get_request("/api/analyses", Some(&anon)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signup_login_and_me() {
    let (_, router) = app_with(Config::default(), false);
    let cookie = signup(&router, "Reader@Example.com").await;

    let me = router
        .clone()
        .oneshot(get_request("/auth/me", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);
    let body = body_json(me).await;
    assert_eq!(body["email"], "reader@example.com");
    assert_eq!(body["role"], "user");
    assert_eq!(body["token_balance"], 0);

    let duplicate = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/signup",
            None,
            json!({"email": "reader@example.com", "password": "another one"}),
        ))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);

    let wrong = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            None,
            json!({"email": "reader@example.com", "password": "wrong password"}),
        ))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(wrong).await["code"], "INVALID_CREDENTIALS");

    let login = router
        .oneshot(json_request(
            "POST",
            "/auth/login",
            None,
            json!({"email": "reader@example.com", "password": "correct horse"}),
        ))
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
    assert!(set_cookie(&login, "session").is_some());
}

#[tokio::test]
async fn registered_user_without_balance_is_refused() {
    let (_, router) = app_with(Config::default(), false);
    let cookie = signup(&router, "broke@example.com").await;

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/analyze",
            Some(&cookie),
            json!({"text": "Some text", "analysis_type": "cognitive", "provider": "open_ai"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn admin_analyses_are_stored_and_owner_scoped() {
    let (_, router) = app_with(admin_config(), false);
    let admin = signup(&router, "admin@example.com").await;

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/analyze",
            Some(&admin),
            json!({"text": "What if the premise is wrong?", "analysis_type": "cognitive", "provider": "open_ai"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["tokens_charged"], 0);
    assert!(body["tokens_remaining"].as_i64().unwrap() >= UNLIMITED_BALANCE);
    let analysis_id = body["analysis_id"].as_str().unwrap().to_string();

    let own = router
        .clone()
        .oneshot(get_request(&format!("/api/analyses/{}", analysis_id), Some(&admin)))
        .await
        .unwrap();
    assert_eq!(own.status(), StatusCode::OK);
    assert_eq!(body_json(own).await["result"]["score"], 118.0);

    let other = signup(&router, "other@example.com").await;
    let foreign = router
        .oneshot(get_request(&format!("/api/analyses/{}", analysis_id), Some(&other)))
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reports_are_fully_populated_and_retrievable() {
    let (_, router) = app_with(admin_config(), false);
    let admin = signup(&router, "admin@example.com").await;

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/reports",
            Some(&admin),
            json!({"text": "A short essay.", "provider": "open_ai"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["sections"]["intelligence"], "High.");
    assert_eq!(body["sections"]["archetype"], "The Explorer.");
    let report_id = body["report_id"].as_str().unwrap().to_string();
    let analysis_id = body["analysis_id"].as_str().unwrap().to_string();

    let by_id = router
        .clone()
        .oneshot(get_request(&format!("/api/reports/{}", report_id), Some(&admin)))
        .await
        .unwrap();
    assert_eq!(by_id.status(), StatusCode::OK);

    let by_analysis = router
        .oneshot(get_request(
            &format!("/api/analyses/{}/report", analysis_id),
            Some(&admin),
        ))
        .await
        .unwrap();
    assert_eq!(by_analysis.status(), StatusCode::OK);
    assert_eq!(body_json(by_analysis).await["id"], report_id.as_str());
}

#[tokio::test]
async fn anonymous_heuristic_report_keeps_defaults() {
    let (_, router) = app_with(Config::default(), false);
    let response = router
        .oneshot(json_request(
            "POST",
            "/api/reports",
            None,
            json!({"text": "Maybe. What if? But on the other hand, perhaps not.", "provider": "heuristic"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["provider"], "heuristic");
    assert!(body["report_id"].is_null());
    for field in [
        "intelligence",
        "abstract_thinking",
        "originality",
        "reasoning_style",
        "ambiguity_handling",
        "metacognition",
        "thinking_type",
        "cognitive_complexity",
        "thinking_quality",
        "archetype",
    ] {
        assert!(!body["sections"][field].as_str().unwrap().is_empty(), "{}", field);
    }
}

fn multipart_upload(cookie: Option<&str>, text: &str) -> Request<Body> {
    let boundary = "profiler-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nMy Essay\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"essay.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n{text}\r\n--{b}--\r\n",
        b = boundary,
        text = text
    );
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/documents")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn uploads_are_priced_and_stored_for_users() {
    let (_, router) = app_with(admin_config(), false);
    let admin = signup(&router, "admin@example.com").await;

    let response = router
        .clone()
        .oneshot(multipart_upload(Some(&admin), &"word ".repeat(250)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["title"], "My Essay");
    assert_eq!(body["word_count"], 250);
    let document_id = body["document_id"].as_str().unwrap().to_string();

    let listed = router
        .clone()
        .oneshot(get_request("/api/documents", Some(&admin)))
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    assert_eq!(body_json(listed).await[0]["id"], document_id.as_str());

    let fetched = router
        .oneshot(get_request(&format!("/api/documents/{}", document_id), Some(&admin)))
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
}

#[tokio::test]
async fn anonymous_upload_is_charged_but_not_stored() {
    let (_, router) = app_with(Config::default(), false);
    let response = router
        .oneshot(multipart_upload(None, &"word ".repeat(250)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert!(body["document_id"].is_null());
    assert_eq!(body["tokens_charged"], 30);
}

#[tokio::test]
async fn exhausted_session_cannot_upload() {
    let (app, router) = app_with(Config::default(), false);
    app.state
        .db
        .create_anonymous_session("spent", None, None)
        .await
        .unwrap();
    app.state
        .db
        .compare_and_set_session_usage("spent", 0, 1_000)
        .await
        .unwrap();

    let response = router
        .oneshot(multipart_upload(Some("anon_session=spent"), "a few words"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "UPLOAD_NOT_PERMITTED");
}

#[tokio::test]
async fn purchase_round_trip_over_http() {
    let (app, router) = app_with(Config::default(), true);
    let cookie = signup(&router, "buyer@example.com").await;

    let packages = router
        .clone()
        .oneshot(get_request("/api/payments/packages", None))
        .await
        .unwrap();
    assert_eq!(packages.status(), StatusCode::OK);

    let intent = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/payments/intent",
            Some(&cookie),
            json!({"package_id": "starter"}),
        ))
        .await
        .unwrap();
    assert_eq!(intent.status(), StatusCode::OK);
    let intent_id = body_json(intent).await["intent_id"]
        .as_str()
        .unwrap()
        .to_string();

    app.processor.set_status(&intent_id, IntentStatus::Succeeded);

    let confirm = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/payments/confirm",
            Some(&cookie),
            json!({"intent_id": intent_id}),
        ))
        .await
        .unwrap();
    assert_eq!(confirm.status(), StatusCode::OK);
    let body = body_json(confirm).await;
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["token_balance"], 5_000);

    // A second user cannot confirm someone else's intent.
    let stranger = signup(&router, "stranger@example.com").await;
    let hijack = router
        .oneshot(json_request(
            "POST",
            "/api/payments/confirm",
            Some(&stranger),
            json!({"intent_id": intent_id}),
        ))
        .await
        .unwrap();
    assert_eq!(hijack.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_rejects_bad_signatures() {
    let (_, router) = app_with(Config::default(), true);
    let request = Request::builder()
        .method("POST")
        .uri("/api/payments/webhook")
        .header("stripe-signature", "forged")
        .body(Body::from("succeeded:pi_test_1"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn payments_are_unavailable_without_a_processor() {
    let (_, router) = app_with(Config::default(), false);
    let cookie = signup(&router, "nopay@example.com").await;
    let response = router
        .oneshot(json_request(
            "POST",
            "/api/payments/intent",
            Some(&cookie),
            json!({"package_id": "starter"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
