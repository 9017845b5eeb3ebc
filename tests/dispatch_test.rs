//! Dispatcher behavior against a simulated push relay.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rollcall_push::notifications::vapid;
use rollcall_push::{
    DispatchSettings, Dispatcher, MemoryStore, NotificationPayload, PushSubscription,
    SubscriberFilter, SubscriberStore, Urgency, VapidKeys,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use common::{decrypt_body, subscriber};

fn settings() -> DispatchSettings {
    DispatchSettings {
        subject: "mailto:office@school.example".to_string(),
        ..DispatchSettings::default()
    }
}

fn dispatcher(store: Arc<dyn SubscriberStore>, settings: DispatchSettings) -> (Dispatcher, VapidKeys) {
    let keys = VapidKeys::generate();
    let dispatcher = Dispatcher::new(store, keys.clone(), settings).unwrap();
    (dispatcher, keys)
}

async fn relay_responding(status: u16, route: &str, server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Split `vapid t=<token>, k=<key>` into its two parameters.
fn parse_authorization(value: &str) -> (String, String) {
    let rest = value.strip_prefix("vapid ").unwrap();
    let mut token = None;
    let mut key = None;
    for part in rest.split(", ") {
        if let Some(t) = part.strip_prefix("t=") {
            token = Some(t.to_string());
        } else if let Some(k) = part.strip_prefix("k=") {
            key = Some(k.to_string());
        }
    }
    (token.unwrap(), key.unwrap())
}

#[tokio::test]
async fn test_no_subscribers_reports_message() {
    let store = Arc::new(MemoryStore::default());
    let (dispatcher, _keys) = dispatcher(store, settings());

    let report = dispatcher
        .send(&SubscriberFilter::All, &NotificationPayload::new("Absent", "Period 1"))
        .await
        .unwrap();

    assert_eq!(report.sent, 0);
    assert_eq!(report.failed, 0);
    assert!(report.results.is_empty());
    assert!(report.message.is_some());
}

#[tokio::test]
async fn test_filter_matching_nobody_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let sub = subscriber(&format!("{}/push/a", server.uri()), "parent-1");
    let store = Arc::new(MemoryStore::with_subscriptions([sub.subscription]));
    let (dispatcher, _keys) = dispatcher(store, settings());

    let report = dispatcher
        .send(
            &SubscriberFilter::Users(vec!["parent-9".to_string()]),
            &NotificationPayload::new("Absent", "Period 1"),
        )
        .await
        .unwrap();

    assert_eq!(report.sent, 0);
    assert_eq!(report.failed, 0);
    assert!(report.message.is_some());
}

#[tokio::test]
async fn test_delivered_request_is_well_formed() {
    let server = MockServer::start().await;
    relay_responding(201, "/push/device", &server).await;

    let sub = subscriber(&format!("{}/push/device", server.uri()), "parent-1");
    let store = Arc::new(MemoryStore::with_subscriptions([sub.subscription.clone()]));
    let (dispatcher, keys) = dispatcher(store, settings());

    let payload = NotificationPayload {
        tag: Some("attendance".to_string()),
        url: Some("/students/42".to_string()),
        ..NotificationPayload::new("Marked absent", "Jamie was absent in period 2")
    };
    let before = Utc::now().timestamp();
    let report = dispatcher.send(&SubscriberFilter::All, &payload).await.unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.results[0].user_id, "parent-1");
    assert_eq!(report.results[0].status, Some(201));
    assert!(report.results[0].error.is_none());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    assert_eq!(header(request, "content-type"), Some("application/octet-stream"));
    assert_eq!(header(request, "content-encoding"), Some("aes128gcm"));
    assert_eq!(header(request, "ttl"), Some("86400"));
    assert!(header(request, "urgency").is_none());

    let (token, key) = parse_authorization(header(request, "authorization").unwrap());
    assert_eq!(key, keys.public_key_base64url());
    let claims = vapid::verify(&token, &keys.public_key_bytes().unwrap()).unwrap();
    assert_eq!(claims.aud, server.uri());
    assert_eq!(claims.sub, "mailto:office@school.example");
    assert!(claims.exp >= before + 12 * 3600);
    assert!(claims.exp <= Utc::now().timestamp() + 12 * 3600);

    let plaintext = decrypt_body(&request.body, &sub.secret, &sub.auth);
    let received: NotificationPayload = serde_json::from_slice(&plaintext).unwrap();
    assert_eq!(received, payload);
}

#[tokio::test]
async fn test_urgency_and_ttl_follow_settings() {
    let server = MockServer::start().await;
    relay_responding(201, "/push/device", &server).await;

    let sub = subscriber(&format!("{}/push/device", server.uri()), "staff-3");
    let store = Arc::new(MemoryStore::with_subscriptions([sub.subscription]));
    let (dispatcher, _keys) = dispatcher(
        store,
        DispatchSettings {
            ttl: 600,
            urgency: Some(Urgency::High),
            ..settings()
        },
    );

    dispatcher
        .send(&SubscriberFilter::All, &NotificationPayload::new("Late", "Room 4"))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(header(&requests[0], "ttl"), Some("600"));
    assert_eq!(header(&requests[0], "urgency"), Some("high"));
}

#[tokio::test]
async fn test_expired_subscription_is_removed() {
    let server = MockServer::start().await;
    relay_responding(410, "/push/gone", &server).await;
    relay_responding(201, "/push/live", &server).await;

    let gone = subscriber(&format!("{}/push/gone", server.uri()), "parent-1");
    let live = subscriber(&format!("{}/push/live", server.uri()), "parent-2");
    let store = Arc::new(MemoryStore::with_subscriptions([
        gone.subscription.clone(),
        live.subscription.clone(),
    ]));
    let (dispatcher, _keys) = dispatcher(Arc::clone(&store) as Arc<dyn SubscriberStore>, settings());

    let report = dispatcher
        .send(&SubscriberFilter::All, &NotificationPayload::new("Absent", "Period 1"))
        .await
        .unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.removed(), 1);

    let first = &report.results[0];
    assert_eq!(first.user_id, "parent-1");
    assert!(!first.success);
    assert!(first.removed);
    assert_eq!(first.status, Some(410));
    assert!(first.error.as_deref().unwrap().contains("410"));

    assert_eq!(report.results[1].user_id, "parent-2");
    assert!(report.results[1].success);

    let remaining = store.snapshot().await;
    assert_eq!(remaining.len(), 1);
    assert!(!remaining.contains(&gone.subscription.endpoint));
    assert!(remaining.contains(&live.subscription.endpoint));
}

#[tokio::test]
async fn test_not_found_removes_only_that_record() {
    let server = MockServer::start().await;
    relay_responding(201, "/push/a", &server).await;
    relay_responding(404, "/push/b", &server).await;
    relay_responding(201, "/push/c", &server).await;

    let subs = ["a", "b", "c"].map(|id| subscriber(&format!("{}/push/{id}", server.uri()), "u1"));
    let store = Arc::new(MemoryStore::with_subscriptions(
        subs.iter().map(|s| s.subscription.clone()),
    ));
    let (dispatcher, _keys) = dispatcher(Arc::clone(&store) as Arc<dyn SubscriberStore>, settings());

    let report = dispatcher
        .send(
            &SubscriberFilter::Users(vec!["u1".to_string()]),
            &NotificationPayload::new("Absent", "Period 1"),
        )
        .await
        .unwrap();

    assert_eq!(report.sent, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.results[1].status, Some(404));
    assert!(report.results[1].removed);

    let remaining = store.snapshot().await;
    assert_eq!(remaining.len(), 2);
    assert!(!remaining.contains(&subs[1].subscription.endpoint));
}

#[tokio::test]
async fn test_relay_error_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push/busy"))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .expect(1)
        .mount(&server)
        .await;

    let sub = subscriber(&format!("{}/push/busy", server.uri()), "u1");
    let store = Arc::new(MemoryStore::with_subscriptions([sub.subscription.clone()]));
    let (dispatcher, _keys) = dispatcher(Arc::clone(&store) as Arc<dyn SubscriberStore>, settings());

    let report = dispatcher
        .send(&SubscriberFilter::All, &NotificationPayload::new("Absent", "Period 1"))
        .await
        .unwrap();

    assert_eq!(report.sent, 0);
    assert_eq!(report.failed, 1);
    let result = &report.results[0];
    assert_eq!(result.status, Some(503));
    assert!(!result.removed);
    let error = result.error.as_deref().unwrap();
    assert!(error.contains("503"), "{error}");
    assert!(error.contains("try later"), "{error}");

    // Transient failures keep the subscription
    assert!(store.snapshot().await.contains(&sub.subscription.endpoint));
}

#[tokio::test]
async fn test_redirect_is_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push/moved"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/elsewhere", server.uri())),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/elsewhere"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sub = subscriber(&format!("{}/push/moved", server.uri()), "u1");
    let store = Arc::new(MemoryStore::with_subscriptions([sub.subscription.clone()]));
    let (dispatcher, _keys) = dispatcher(Arc::clone(&store) as Arc<dyn SubscriberStore>, settings());

    let report = dispatcher
        .send(&SubscriberFilter::All, &NotificationPayload::new("Absent", "Period 1"))
        .await
        .unwrap();

    assert_eq!(report.sent, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.results[0].status, Some(302));
    assert!(!report.results[0].removed);
    assert!(store.snapshot().await.contains(&sub.subscription.endpoint));
}

#[tokio::test]
async fn test_malformed_keys_fail_only_that_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push/good"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let good = subscriber(&format!("{}/push/good", server.uri()), "u-good");
    let broken = PushSubscription {
        endpoint: format!("{}/push/broken", server.uri()),
        p256dh: "AAAA".to_string(),
        user_id: "u-broken".to_string(),
        ..good.subscription.clone()
    };
    let store = Arc::new(MemoryStore::with_subscriptions([
        broken,
        good.subscription.clone(),
    ]));
    let (dispatcher, _keys) = dispatcher(store, settings());

    let report = dispatcher
        .send(&SubscriberFilter::All, &NotificationPayload::new("Absent", "Period 1"))
        .await
        .unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 1);
    let broken = &report.results[0];
    assert_eq!(broken.user_id, "u-broken");
    assert!(broken.status.is_none());
    let error = broken.error.as_deref().unwrap();
    assert!(error.contains("Invalid subscription keys"), "{error}");
    assert!(error.contains("p256dh"), "{error}");
    assert!(report.results[1].success);
}

#[tokio::test]
async fn test_timeout_fails_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let sub = subscriber(&format!("{}/push/slow", server.uri()), "u1");
    let store = Arc::new(MemoryStore::with_subscriptions([sub.subscription.clone()]));
    let (dispatcher, _keys) = dispatcher(
        Arc::clone(&store) as Arc<dyn SubscriberStore>,
        DispatchSettings {
            request_timeout: Duration::from_millis(200),
            ..settings()
        },
    );

    let report = dispatcher
        .send(&SubscriberFilter::All, &NotificationPayload::new("Absent", "Period 1"))
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    let result = &report.results[0];
    assert!(result.status.is_none());
    assert!(result.error.as_deref().unwrap().starts_with("Push request failed"));
    assert!(store.snapshot().await.contains(&sub.subscription.endpoint));
}

#[tokio::test]
async fn test_results_keep_store_order_under_concurrency() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push/slow"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;
    relay_responding(201, "/push/fast", &server).await;

    let slow = subscriber(&format!("{}/push/slow", server.uri()), "first");
    let fast = subscriber(&format!("{}/push/fast", server.uri()), "second");
    let store = Arc::new(MemoryStore::with_subscriptions([
        slow.subscription,
        fast.subscription,
    ]));
    let (dispatcher, _keys) = dispatcher(store, settings());

    let report = dispatcher
        .send(&SubscriberFilter::All, &NotificationPayload::new("Absent", "Period 1"))
        .await
        .unwrap();

    let order: Vec<&str> = report.results.iter().map(|r| r.user_id.as_str()).collect();
    assert_eq!(order, vec!["first", "second"]);
    assert_eq!(report.sent, 2);
}

#[tokio::test]
async fn test_records_on_same_relay_share_token() {
    let server = MockServer::start().await;
    relay_responding(201, "/push/1", &server).await;
    relay_responding(201, "/push/2", &server).await;

    let one = subscriber(&format!("{}/push/1", server.uri()), "u1");
    let two = subscriber(&format!("{}/push/2", server.uri()), "u2");
    let store = Arc::new(MemoryStore::with_subscriptions([one.subscription, two.subscription]));
    let (dispatcher, _keys) = dispatcher(store, settings());

    dispatcher
        .send(&SubscriberFilter::All, &NotificationPayload::new("Absent", "Period 1"))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let (token_a, _) = parse_authorization(header(&requests[0], "authorization").unwrap());
    let (token_b, _) = parse_authorization(header(&requests[1], "authorization").unwrap());
    assert_eq!(token_a, token_b);

    // Same plaintext, different ciphertext: fresh ephemeral key and salt per record
    assert_ne!(requests[0].body[..86], requests[1].body[..86]);
}

#[tokio::test]
async fn test_large_payload_is_a_single_record() {
    let server = MockServer::start().await;
    relay_responding(201, "/push/device", &server).await;

    let sub = subscriber(&format!("{}/push/device", server.uri()), "u1");
    let store = Arc::new(MemoryStore::with_subscriptions([sub.subscription.clone()]));
    let (dispatcher, _keys) = dispatcher(store, settings());

    let payload = NotificationPayload::new("Weekly summary", "x".repeat(2000));
    let plaintext_len = payload.to_bytes().unwrap().len();
    let report = dispatcher.send(&SubscriberFilter::All, &payload).await.unwrap();
    assert_eq!(report.sent, 1);

    let requests = server.received_requests().await.unwrap();
    let body = &requests[0].body;
    assert_eq!(body.len(), 86 + plaintext_len + 1 + 16);
    let plaintext = decrypt_body(body, &sub.secret, &sub.auth);
    assert_eq!(plaintext, payload.to_bytes().unwrap());
}

#[tokio::test]
async fn test_oversized_payload_is_rejected_before_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let sub = subscriber(&format!("{}/push/device", server.uri()), "u1");
    let store = Arc::new(MemoryStore::with_subscriptions([sub.subscription]));
    let (dispatcher, _keys) = dispatcher(store, settings());

    let payload = NotificationPayload::new("Too long", "x".repeat(4000));
    assert!(dispatcher.send(&SubscriberFilter::All, &payload).await.is_err());
}

/// Store whose deletes always fail.
struct StickyStore {
    inner: MemoryStore,
}

#[async_trait]
impl SubscriberStore for StickyStore {
    async fn list(&self, filter: &SubscriberFilter) -> Result<Vec<PushSubscription>> {
        self.inner.list(filter).await
    }

    async fn upsert(&self, subscription: PushSubscription) -> Result<()> {
        self.inner.upsert(subscription).await
    }

    async fn remove_endpoint(&self, _endpoint: &str) -> Result<bool> {
        anyhow::bail!("database is read-only")
    }
}

#[tokio::test]
async fn test_failed_cleanup_does_not_change_result() {
    let server = MockServer::start().await;
    relay_responding(410, "/push/gone", &server).await;

    let sub = subscriber(&format!("{}/push/gone", server.uri()), "u1");
    let store = Arc::new(StickyStore {
        inner: MemoryStore::with_subscriptions([sub.subscription]),
    });
    let (dispatcher, _keys) = dispatcher(store, settings());

    let report = dispatcher
        .send(&SubscriberFilter::All, &NotificationPayload::new("Absent", "Period 1"))
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    let result = &report.results[0];
    assert_eq!(result.status, Some(410));
    assert!(!result.removed);
    assert_eq!(result.error.as_deref(), Some("Subscription expired (HTTP 410)"));
}

/// Store whose records were already deleted by someone else.
struct AlreadyRemovedStore {
    inner: MemoryStore,
}

#[async_trait]
impl SubscriberStore for AlreadyRemovedStore {
    async fn list(&self, filter: &SubscriberFilter) -> Result<Vec<PushSubscription>> {
        self.inner.list(filter).await
    }

    async fn upsert(&self, subscription: PushSubscription) -> Result<()> {
        self.inner.upsert(subscription).await
    }

    async fn remove_endpoint(&self, _endpoint: &str) -> Result<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_expired_record_already_gone_is_not_counted_removed() {
    let server = MockServer::start().await;
    relay_responding(404, "/push/gone", &server).await;

    let sub = subscriber(&format!("{}/push/gone", server.uri()), "u1");
    let store = Arc::new(AlreadyRemovedStore {
        inner: MemoryStore::with_subscriptions([sub.subscription]),
    });
    let (dispatcher, _keys) = dispatcher(store, settings());

    let report = dispatcher
        .send(&SubscriberFilter::All, &NotificationPayload::new("Absent", "Period 1"))
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.removed(), 0);
    assert_eq!(report.results[0].status, Some(404));
    assert!(!report.results[0].removed);
}
