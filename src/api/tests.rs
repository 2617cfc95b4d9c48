use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use super::routes;
use crate::auth::FakeTokenVerifier;
use crate::billing::{BillingInterval, Plan};
use crate::config::Config;
use crate::object_store::MemoryObjectStore;
use crate::store::Database;
use crate::stripe_client::FakeStripeClient;
use crate::synthesis::{FakeSynthesizer, ImageSynthesizer};
use crate::webhook::testing::{checkout_session, customer, event, sign_payload, subscription};
use crate::webhook::SIGNATURE_HEADER;
use crate::AppState;

struct TestApp {
    router: Router,
    db: Arc<Database>,
    objects: Arc<MemoryObjectStore>,
    stripe: Arc<FakeStripeClient>,
}

fn app_with(config: Config, stripe: FakeStripeClient) -> TestApp {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let objects = Arc::new(MemoryObjectStore::default());
    let stripe = Arc::new(stripe);
    let state = AppState::with_collaborators(
        config,
        db.clone(),
        Arc::new(FakeTokenVerifier),
        Some(Arc::new(FakeSynthesizer::default()) as Arc<dyn ImageSynthesizer>),
        objects.clone(),
        Some(stripe.clone() as Arc<dyn crate::stripe_client::StripeClient>),
    );
    TestApp {
        router: routes(state),
        db,
        objects,
        stripe,
    }
}

fn app() -> TestApp {
    app_with(Config::test(), FakeStripeClient::default())
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }

    async fn signup(&self, uid: &str) {
        let (status, _) = self
            .send(authed(Method::POST, "/api/users/me", uid, Body::empty()))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    async fn generate(&self, uid: &str, idempotency_key: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::post("/api/generate")
            .header(header::AUTHORIZATION, format!("Bearer token-{}", uid))
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let body = json!({ "title": "Harvest Festival", "eventType": "festival" });
        self.send(request.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn webhook(&self, payload: &Value) -> (StatusCode, Value) {
        let body = payload.to_string();
        let signature = sign_payload(body.as_bytes(), "whsec_test", chrono::Utc::now().timestamp());
        let request = Request::post("/api/webhooks/stripe")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }
}

fn authed(method: Method, uri: &str, uid: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer token-{}", uid))
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap()
}

fn checkout_completed(event_id: &str, uid: &str, plan: &str) -> Value {
    checkout_with_subscription(event_id, uid, plan, "sub_1")
}

fn checkout_with_subscription(event_id: &str, uid: &str, plan: &str, subscription_id: &str) -> Value {
    event(
        event_id,
        "checkout.session.completed",
        checkout_session(json!({
            "id": "cs_1",
            "customer": "cus_1",
            "subscription": subscription_id,
            "metadata": { "userId": uid, "planId": plan, "billing": "monthly" },
        })),
    )
}

fn subscription_deleted(event_id: &str, subscription_id: &str) -> Value {
    event(
        event_id,
        "customer.subscription.deleted",
        subscription(json!({
            "id": subscription_id,
            "customer": "cus_1",
            "status": "canceled",
        })),
    )
}

#[tokio::test]
async fn test_root_reports_version() {
    let app = app();
    let (status, body) = app
        .send(Request::get("/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().starts_with("postergen v"));
}

#[tokio::test]
async fn test_generate_requires_token() {
    let app = app();
    let request = Request::post("/api/generate")
        .body(Body::from(r#"{"title":"x","eventType":"party"}"#))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_generate_authenticates_before_reading_body() {
    let app = app();
    let request = Request::post("/api/generate")
        .header(header::AUTHORIZATION, "Bearer bogus")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_generate_rejects_malformed_body() {
    let app = app();
    app.signup("uid-1").await;
    let (status, body) = app
        .send(authed(Method::POST, "/api/generate", "uid-1", Body::from("{not json")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_generate_debits_and_lists_history() {
    let app = app();
    app.signup("uid-1").await;

    let (status, body) = app.generate("uid-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["creditsRemaining"], 4);
    let poster_id = body["posterId"].as_str().unwrap().to_string();

    let (status, me) = app
        .send(authed(Method::GET, "/api/users/me", "uid-1", Body::empty()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["credits"], 4);
    assert_eq!(me["totalGenerations"], 1);
    assert_eq!(me["creditsRemaining"], 4);

    let (status, list) = app
        .send(authed(Method::GET, "/api/posters", "uid-1", Body::empty()))
        .await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], poster_id.as_str());
    assert_eq!(list[0]["title"], "Harvest Festival");
    assert_eq!(list[0]["status"], "completed");
}

#[tokio::test]
async fn test_exhausted_credits_return_upgrade_url() {
    let app = app();
    app.signup("uid-1").await;
    for _ in 0..5 {
        let (status, _) = app.generate("uid-1", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app.generate("uid-1", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "INSUFFICIENT_CREDITS");
    assert_eq!(body["upgradeUrl"], "/pricing");
    assert_eq!(app.db.get_user("uid-1").unwrap().unwrap().credits, 0);
}

#[tokio::test]
async fn test_idempotency_key_replays_without_charge() {
    let app = app();
    app.signup("uid-1").await;

    let (_, first) = app.generate("uid-1", Some("req-42")).await;
    let (status, second) = app.generate("uid-1", Some("req-42")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["posterId"], second["posterId"]);
    assert_eq!(second["creditsRemaining"], 4);
    assert_eq!(app.objects.len(), 1);
}

#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let app = app();
    app.signup("uid-1").await;
    let (status, body) = app
        .send(authed(Method::POST, "/api/users/me", "uid-1", Body::empty()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "uid-1");
    assert_eq!(body["plan"], "free");
    assert_eq!(body["credits"], 5);
}

#[tokio::test]
async fn test_me_without_record_is_not_found() {
    let app = app();
    let (status, body) = app
        .send(authed(Method::GET, "/api/users/me", "ghost", Body::empty()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "USER_NOT_FOUND");
}

#[tokio::test]
async fn test_posters_are_private_to_their_owner() {
    let app = app();
    app.signup("uid-1").await;
    app.signup("uid-2").await;
    let (_, body) = app.generate("uid-1", None).await;
    let uri = format!("/api/posters/{}", body["posterId"].as_str().unwrap());

    let (status, _) = app
        .send(authed(Method::GET, &uri, "uid-2", Body::empty()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .send(authed(Method::DELETE, &uri, "uid-2", Body::empty()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, poster) = app
        .send(authed(Method::GET, &uri, "uid-1", Body::empty()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(poster["userId"], "uid-1");
}

#[tokio::test]
async fn test_delete_removes_image_without_refund() {
    let app = app();
    app.signup("uid-1").await;
    let (_, body) = app.generate("uid-1", None).await;
    let uri = format!("/api/posters/{}", body["posterId"].as_str().unwrap());
    assert_eq!(app.objects.len(), 1);

    let (status, _) = app
        .send(authed(Method::DELETE, &uri, "uid-1", Body::empty()))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(app.objects.len(), 0);

    let (status, _) = app
        .send(authed(Method::GET, &uri, "uid-1", Body::empty()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.db.get_user("uid-1").unwrap().unwrap().credits, 4);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let app = app();
    app.signup("uid-1").await;
    let body = checkout_completed("evt_1", "uid-1", "pro").to_string();
    let signature = sign_payload(body.as_bytes(), "whsec_wrong", chrono::Utc::now().timestamp());
    let request = Request::post("/api/webhooks/stripe")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap();

    let (status, response) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], "WEBHOOK_SIGNATURE_INVALID");
    assert_eq!(app.db.get_user("uid-1").unwrap().unwrap().plan, Plan::Free);

    let unsigned = Request::post("/api/webhooks/stripe")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = app.send(unsigned).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_activates_plan_once() {
    let app = app();
    app.signup("uid-1").await;
    let event = checkout_completed("evt_1", "uid-1", "pro");

    let (status, body) = app.webhook(&event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    let record = app.db.get_user("uid-1").unwrap().unwrap();
    assert_eq!(record.plan, Plan::Pro);
    assert_eq!(record.stripe_customer_id.as_deref(), Some("cus_1"));

    // Redelivery is acknowledged and changes nothing
    let (status, _) = app.webhook(&event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.db.processed_event_count().unwrap(), 1);
    assert_eq!(app.db.get_user("uid-1").unwrap().unwrap(), record);

    // Paid plans generate without touching credits
    let (status, body) = app.generate("uid-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["creditsRemaining"], "unlimited");
}

#[tokio::test]
async fn test_subscription_deletion_downgrades() {
    let app = app();
    app.signup("uid-1").await;
    app.webhook(&checkout_completed("evt_1", "uid-1", "business"))
        .await;

    let (status, _) = app.webhook(&subscription_deleted("evt_2", "sub_1")).await;
    assert_eq!(status, StatusCode::OK);

    let record = app.db.get_user("uid-1").unwrap().unwrap();
    assert_eq!(record.plan, Plan::Free);
    assert_eq!(record.credits, 5);
    assert_eq!(record.stripe_subscription_id, None);
}

#[tokio::test]
async fn test_replaced_subscription_deletion_keeps_new_plan() {
    let app = app();
    app.signup("uid-1").await;
    app.webhook(&checkout_with_subscription("evt_1", "uid-1", "pro", "sub_A"))
        .await;
    app.webhook(&checkout_with_subscription("evt_2", "uid-1", "business", "sub_B"))
        .await;

    let (status, _) = app.webhook(&subscription_deleted("evt_3", "sub_A")).await;
    assert_eq!(status, StatusCode::OK);

    let record = app.db.get_user("uid-1").unwrap().unwrap();
    assert_eq!(record.plan, Plan::Business);
    assert_eq!(record.credits, 0);
    assert_eq!(record.stripe_subscription_id.as_deref(), Some("sub_B"));
}

#[tokio::test]
async fn test_webhook_store_failure_is_retried_to_success() {
    let app = app();
    app.signup("uid-1").await;
    let delivery = checkout_completed("evt_1", "uid-1", "pro");

    // The dedup insert fails after the plan update inside the same transaction
    app.db
        .execute_batch(
            "CREATE TRIGGER fail_dedup BEFORE INSERT ON processed_events
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();
    let (status, body) = app.webhook(&delivery).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "WEBHOOK_PROCESSING_ERROR");
    let record = app.db.get_user("uid-1").unwrap().unwrap();
    assert_eq!(record.plan, Plan::Free);
    assert_eq!(record.credits, 5);
    assert_eq!(app.db.processed_event_count().unwrap(), 0);

    // Provider redelivers once the store recovers
    app.db.execute_batch("DROP TRIGGER fail_dedup").unwrap();
    let (status, _) = app.webhook(&delivery).await;
    assert_eq!(status, StatusCode::OK);
    let record = app.db.get_user("uid-1").unwrap().unwrap();
    assert_eq!(record.plan, Plan::Pro);
    assert_eq!(record.credits, 100);

    let (status, _) = app.webhook(&delivery).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.db.processed_event_count().unwrap(), 1);
    assert_eq!(app.db.get_user("uid-1").unwrap().unwrap(), record);
}

#[tokio::test]
async fn test_unrelated_webhook_event_is_acknowledged() {
    let app = app();
    let delivery = event("evt_9", "customer.created", customer(json!({ "id": "cus_9" })));
    let (status, body) = app.webhook(&delivery).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
}

#[tokio::test]
async fn test_checkout_creates_session() {
    let app = app();
    let request = authed(
        Method::POST,
        "/api/checkout",
        "uid-1",
        Body::from(json!({ "planId": "pro", "isYearly": true }).to_string()),
    );
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["url"].as_str().unwrap().starts_with("https://checkout.stripe.test/"));

    let sessions = app.stripe.sessions.lock().unwrap();
    assert_eq!(sessions.len(), 1);
    let params = &sessions[0];
    assert_eq!(params.plan, Plan::Pro);
    assert_eq!(params.interval, BillingInterval::Yearly);
    assert_eq!(params.user_id, "uid-1");
    assert_eq!(params.email.as_deref(), Some("uid-1@example.com"));
    assert_eq!(
        params.success_url,
        "https://postergen.test/payment/success?session_id={CHECKOUT_SESSION_ID}"
    );
    assert_eq!(params.cancel_url, "https://postergen.test/pricing");
}

#[tokio::test]
async fn test_checkout_rejects_bad_requests() {
    let app = app();
    for body in [
        json!({ "planId": "free" }),
        json!({ "planId": "enterprise" }),
        json!({}),
        json!({ "planId": "pro", "userId": "someone-else" }),
    ] {
        let request = authed(Method::POST, "/api/checkout", "uid-1", Body::from(body.to_string()));
        let (status, response) = app.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(response["code"], "INVALID_REQUEST");
    }
    assert!(app.stripe.sessions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_checkout_provider_failure_is_bad_gateway() {
    let app = app_with(Config::test(), FakeStripeClient::failing());
    let request = authed(
        Method::POST,
        "/api/checkout",
        "uid-1",
        Body::from(json!({ "planId": "business" }).to_string()),
    );
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Failed to create checkout session");
}

#[tokio::test]
async fn test_admin_flag_requires_operator_token() {
    let app = app();
    app.signup("uid-1").await;
    let body = || Body::from(json!({ "isAdmin": true }).to_string());

    // A user token is not an operator token
    let (status, _) = app
        .send(authed(Method::PUT, "/api/admin/users/uid-1/admin", "uid-1", body()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::put("/api/admin/users/uid-1/admin")
        .header(header::AUTHORIZATION, "token nope")
        .body(body())
        .unwrap();
    let (status, _) = app.send(wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!app.db.get_user("uid-1").unwrap().unwrap().is_admin);

    let right = Request::put("/api/admin/users/uid-1/admin")
        .header(header::AUTHORIZATION, "token admin-secret")
        .body(body())
        .unwrap();
    let (status, response) = app.send(right).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["isAdmin"], true);
    assert_eq!(response["creditsRemaining"], "unlimited");

    let missing = Request::put("/api/admin/users/ghost/admin")
        .header(header::AUTHORIZATION, "token admin-secret")
        .body(body())
        .unwrap();
    let (status, _) = app.send(missing).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_endpoint_closed_without_configured_token() {
    let mut config = Config::test();
    config.admin_api_token = None;
    let app = app_with(config, FakeStripeClient::default());
    app.signup("uid-1").await;

    let request = Request::put("/api/admin/users/uid-1/admin")
        .header(header::AUTHORIZATION, "token ")
        .body(Body::from(r#"{"isAdmin":true}"#))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
