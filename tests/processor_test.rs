use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use shop_sync::domain::commerce::{Product, ProductFields};
use shop_sync::domain::error::{ErrorKind, JobError};
use shop_sync::domain::job::{JobKind, JobOptions, JobResult, JobStatus, QueueName};
use shop_sync::domain::money::MoneyAmount;
use shop_sync::domain::provider::{Method, RemoteError, ShopifyApi};
use shop_sync::domain::webhook::{NewWebhookRecord, WebhookTopic};
use shop_sync::jobs::cleanup::CleanupJobs;
use shop_sync::jobs::email::{EmailMessage, Mailer};
use shop_sync::jobs::notification::SendNotification;
use shop_sync::jobs::order::ProcessOrder;
use shop_sync::jobs::product_sync::SyncProduct;
use shop_sync::jobs::webhook::ProcessWebhook;
use shop_sync::jobs::{JobContext, Processor};
use shop_sync::queue::QueueBackend;
use shop_sync::queue::broker::BrokerQueue;
use shop_sync::services::reconcile::Reconciler;
use shop_sync::services::supervisor::QueueSupervisor;
use shop_sync::store::CommerceStore;
use shop_sync::store::memory::MemoryStore;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type Reply = Result<serde_json::Value, RemoteError>;

/// Shopify double: answers from a queue of scripted replies and records
/// every call. An unscripted call fails as a transport error.
#[derive(Default)]
struct ScriptedShopify {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<(Method, String, Option<serde_json::Value>)>>,
}

impl ScriptedShopify {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(Method, String)> {
        self.calls
            .lock()
            .iter()
            .map(|(method, path, _)| (*method, path.clone()))
            .collect()
    }

    fn body(&self, index: usize) -> serde_json::Value {
        self.calls.lock()[index].2.clone().expect("call had no body")
    }
}

impl ShopifyApi for ScriptedShopify {
    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, RemoteError>> + Send + '_>> {
        self.calls.lock().push((method, path.to_string(), body));
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::transport(method, path, "unscripted call")));
        Box::pin(async move { reply })
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<String, JobError> {
        self.sent.lock().push(message.clone());
        Ok(format!("msg-{}", self.sent.lock().len()))
    }
}

/// Claims a job of `kind` so the context points at a live, active record.
async fn context(backend: &Arc<BrokerQueue>, kind: JobKind, attempt: i32) -> JobContext {
    backend
        .enqueue(kind.queue(), kind, json!({}), JobOptions::new())
        .await
        .unwrap();
    let mut job = backend
        .dequeue_next(kind.queue(), chrono::Utc::now())
        .await
        .unwrap()
        .unwrap();
    job.attempts = attempt;
    JobContext::new(&job, backend.clone())
}

fn mug_fields() -> ProductFields {
    ProductFields {
        title: "Big Mug".into(),
        body_html: None,
        vendor: Some("Acme".into()),
        product_type: None,
        handle: None,
        status: "active".into(),
        tags: None,
        price: MoneyAmount::new(1250).unwrap(),
        sku: Some("MUG-1".into()),
        inventory_quantity: 4,
    }
}

async fn local_product(store: &MemoryStore, remote_id: Option<&str>) -> Product {
    store
        .insert_product(&Product::new(remote_id.map(str::to_string), mug_fields()))
        .await
        .unwrap()
}

fn sync_payload(product: &Product, action: &str) -> shop_sync::jobs::product_sync::SyncProductPayload {
    serde_json::from_value(json!({ "productId": product.id, "action": action })).unwrap()
}

fn remote_product(id: i64) -> Reply {
    Ok(json!({ "product": { "id": id, "handle": "big-mug" } }))
}

// ── 1. sync_create_posts_and_records_remote_id ─────────────────────────────

#[tokio::test]
async fn sync_create_posts_and_records_remote_id() {
    let backend = Arc::new(BrokerQueue::new());
    let store = Arc::new(MemoryStore::new());
    let shopify = ScriptedShopify::new(vec![remote_product(777)]);
    let product = local_product(&store, None).await;
    let processor = SyncProduct::new(store.clone(), shopify.clone());

    let ctx = context(&backend, JobKind::SyncProduct, 1).await;
    let result = processor.process(sync_payload(&product, "create"), &ctx).await.unwrap();

    assert_eq!(result.data["shopifyProductId"], "777");
    assert_eq!(shopify.calls(), vec![(Method::Post, "/products.json".to_string())]);
    let body = shopify.body(0);
    assert_eq!(body["product"]["handle"], "big-mug");
    assert_eq!(body["product"]["variants"][0]["price"], "12.50");

    let stored = store.find_product(product.id).await.unwrap().unwrap();
    assert_eq!(stored.shopify_product_id.as_deref(), Some("777"));
    assert_eq!(stored.handle.as_deref(), Some("big-mug"));
    assert!(stored.last_synced_at.is_some());
}

// ── 2. retried_create_adopts_product_from_earlier_attempt ──────────────────
// First attempt's POST landed but the job died before recording the id.

#[tokio::test]
async fn retried_create_adopts_product_from_earlier_attempt() {
    let backend = Arc::new(BrokerQueue::new());
    let store = Arc::new(MemoryStore::new());
    let shopify = ScriptedShopify::new(vec![Ok(json!({
        "products": [
            { "id": 12, "handle": "big-mug-1" },
            { "id": 777, "handle": "big-mug" }
        ]
    }))]);
    let product = local_product(&store, None).await;
    let processor = SyncProduct::new(store.clone(), shopify.clone());

    let ctx = context(&backend, JobKind::SyncProduct, 2).await;
    processor.process(sync_payload(&product, "create"), &ctx).await.unwrap();

    assert_eq!(
        shopify.calls(),
        vec![(Method::Get, "/products.json?handle=big-mug&fields=id,handle".to_string())]
    );
    let stored = store.find_product(product.id).await.unwrap().unwrap();
    assert_eq!(stored.shopify_product_id.as_deref(), Some("777"));
}

// ── 3. retried_create_without_remote_match_posts ───────────────────────────

#[tokio::test]
async fn retried_create_without_remote_match_posts() {
    let backend = Arc::new(BrokerQueue::new());
    let store = Arc::new(MemoryStore::new());
    let shopify = ScriptedShopify::new(vec![Ok(json!({ "products": [] })), remote_product(778)]);
    let product = local_product(&store, None).await;
    let processor = SyncProduct::new(store.clone(), shopify.clone());

    let ctx = context(&backend, JobKind::SyncProduct, 3).await;
    processor.process(sync_payload(&product, "create"), &ctx).await.unwrap();

    let methods: Vec<Method> = shopify.calls().into_iter().map(|(m, _)| m).collect();
    assert_eq!(methods, vec![Method::Get, Method::Post]);
    let stored = store.find_product(product.id).await.unwrap().unwrap();
    assert_eq!(stored.shopify_product_id.as_deref(), Some("778"));
}

// ── 4. sync_update_puts_to_linked_product ──────────────────────────────────

#[tokio::test]
async fn sync_update_puts_to_linked_product() {
    let backend = Arc::new(BrokerQueue::new());
    let store = Arc::new(MemoryStore::new());
    let shopify = ScriptedShopify::new(vec![remote_product(777)]);
    let product = local_product(&store, Some("777")).await;
    let processor = SyncProduct::new(store.clone(), shopify.clone());

    let ctx = context(&backend, JobKind::SyncProduct, 1).await;
    processor.process(sync_payload(&product, "update"), &ctx).await.unwrap();

    assert_eq!(shopify.calls(), vec![(Method::Put, "/products/777.json".to_string())]);
    assert_eq!(shopify.body(0)["product"]["title"], "Big Mug");
    let stored = store.find_product(product.id).await.unwrap().unwrap();
    assert!(stored.last_synced_at.is_some());
}

// ── 5. create_for_linked_product_is_duplicate ──────────────────────────────

#[tokio::test]
async fn create_for_linked_product_is_duplicate() {
    let backend = Arc::new(BrokerQueue::new());
    let store = Arc::new(MemoryStore::new());
    let shopify = ScriptedShopify::new(vec![]);
    let product = local_product(&store, Some("777")).await;
    let processor = SyncProduct::new(store.clone(), shopify.clone());

    let ctx = context(&backend, JobKind::SyncProduct, 1).await;
    let err = processor
        .process(sync_payload(&product, "create"), &ctx)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Duplicate);
    assert!(shopify.calls().is_empty());
}

// ── 6. update_before_create_is_validation ──────────────────────────────────

#[tokio::test]
async fn update_before_create_is_validation() {
    let backend = Arc::new(BrokerQueue::new());
    let store = Arc::new(MemoryStore::new());
    let shopify = ScriptedShopify::new(vec![]);
    let product = local_product(&store, None).await;
    let processor = SyncProduct::new(store.clone(), shopify.clone());

    let ctx = context(&backend, JobKind::SyncProduct, 1).await;
    let err = processor
        .process(sync_payload(&product, "update"), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(shopify.calls().is_empty());
}

// ── 7. delete_unlinks_local_row ────────────────────────────────────────────
// A 404 means the product is already gone remotely and counts as success.

#[tokio::test]
async fn delete_unlinks_local_row() {
    for reply in [
        Ok(json!({})),
        Err(RemoteError::from_status(Method::Delete, "/products/777.json", 404, "Not Found")),
    ] {
        let backend = Arc::new(BrokerQueue::new());
        let store = Arc::new(MemoryStore::new());
        let shopify = ScriptedShopify::new(vec![reply]);
        let product = local_product(&store, Some("777")).await;
        let processor = SyncProduct::new(store.clone(), shopify.clone());

        let ctx = context(&backend, JobKind::SyncProduct, 1).await;
        let result = processor.process(sync_payload(&product, "delete"), &ctx).await.unwrap();

        assert_eq!(result.data["shopifyProductId"], "777");
        assert_eq!(shopify.calls(), vec![(Method::Delete, "/products/777.json".to_string())]);
        let stored = store.find_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.shopify_product_id, None);
    }
}

// ── 8. delete_of_removed_row_uses_payload_remote_id ────────────────────────

#[tokio::test]
async fn delete_of_removed_row_uses_payload_remote_id() {
    let backend = Arc::new(BrokerQueue::new());
    let store = Arc::new(MemoryStore::new());
    let shopify = ScriptedShopify::new(vec![Ok(json!({}))]);
    let processor = SyncProduct::new(store.clone(), shopify.clone());
    let ctx = context(&backend, JobKind::SyncProduct, 1).await;

    let payload = serde_json::from_value(json!({
        "productId": uuid::Uuid::now_v7(),
        "action": "delete",
        "shopifyProductId": "900"
    }))
    .unwrap();
    processor.process(payload, &ctx).await.unwrap();
    assert_eq!(shopify.calls(), vec![(Method::Delete, "/products/900.json".to_string())]);

    let payload = serde_json::from_value(json!({
        "productId": uuid::Uuid::now_v7(),
        "action": "delete"
    }))
    .unwrap();
    let err = processor.process(payload, &ctx).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

// ── 9. remote_failures_keep_their_kind ─────────────────────────────────────

#[tokio::test]
async fn remote_failures_keep_their_kind() {
    let path = "/products/777.json";
    let cases = [
        (RemoteError::from_status(Method::Put, path, 429, "slow down"), ErrorKind::RateLimited, true),
        (RemoteError::from_status(Method::Put, path, 503, "unavailable"), ErrorKind::Network, true),
        (RemoteError::from_status(Method::Put, path, 422, "title blank"), ErrorKind::Validation, false),
        (RemoteError::from_status(Method::Put, path, 401, "bad token"), ErrorKind::Auth, false),
        (RemoteError::transport(Method::Put, path, "connection refused"), ErrorKind::Network, true),
    ];

    for (remote, kind, retryable) in cases {
        let backend = Arc::new(BrokerQueue::new());
        let store = Arc::new(MemoryStore::new());
        let shopify = ScriptedShopify::new(vec![Err(remote)]);
        let product = local_product(&store, Some("777")).await;
        let processor = SyncProduct::new(store.clone(), shopify);

        let ctx = context(&backend, JobKind::SyncProduct, 1).await;
        let err = processor
            .process(sync_payload(&product, "update"), &ctx)
            .await
            .unwrap_err();

        assert_eq!(err.kind, kind, "{err}");
        assert_eq!(err.retryable(), retryable);
        assert_eq!(err.context["path"], path);
        let stored = store.find_product(product.id).await.unwrap().unwrap();
        assert!(stored.last_synced_at.is_none());
    }
}

// ── 10. email_notification_goes_through_mailer ─────────────────────────────

#[tokio::test]
async fn email_notification_goes_through_mailer() {
    let backend = Arc::new(BrokerQueue::new());
    let mailer = Arc::new(RecordingMailer::default());
    let processor = SendNotification::new(mailer.clone());
    let ctx = context(&backend, JobKind::SendNotification, 1).await;

    let payload = serde_json::from_value(json!({
        "channel": "email",
        "recipient": " ann@example.com ",
        "message": "Order #1001 received",
        "data": { "subject": "Your order" }
    }))
    .unwrap();
    let result = processor.process(payload, &ctx).await.unwrap();

    assert_eq!(result.data["deliveryId"], "msg-1");
    let sent = mailer.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ann@example.com");
    assert_eq!(sent[0].subject, "Your order");
    assert_eq!(sent[0].body, "Order #1001 received");
}

// ── 11. log_notification_skips_mailer ──────────────────────────────────────

#[tokio::test]
async fn log_notification_skips_mailer() {
    let backend = Arc::new(BrokerQueue::new());
    let mailer = Arc::new(RecordingMailer::default());
    let processor = SendNotification::new(mailer.clone());
    let ctx = context(&backend, JobKind::SendNotification, 1).await;

    let payload = serde_json::from_value(json!({
        "channel": "log",
        "recipient": "operations",
        "message": "Order #1001 received"
    }))
    .unwrap();
    let result = processor.process(payload, &ctx).await.unwrap();

    assert!(result.data["deliveryId"].is_null());
    assert!(mailer.sent.lock().is_empty());
}

// ── 12. bad_notifications_are_validation_errors ────────────────────────────

#[tokio::test]
async fn bad_notifications_are_validation_errors() {
    let backend = Arc::new(BrokerQueue::new());
    let mailer = Arc::new(RecordingMailer::default());
    let processor = SendNotification::new(mailer.clone());
    let ctx = context(&backend, JobKind::SendNotification, 1).await;

    for (channel, recipient) in [("sms", "+15550100"), ("email", "   "), ("email", "not-an-address")] {
        let payload = serde_json::from_value(json!({
            "channel": channel,
            "recipient": recipient,
            "message": "hi"
        }))
        .unwrap();
        let err = processor.process(payload, &ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation, "{channel}/{recipient}");
        assert!(!err.retryable());
    }
    assert!(mailer.sent.lock().is_empty());
}

// ── 13. cleanup_removes_only_finished_jobs ─────────────────────────────────

#[tokio::test]
async fn cleanup_removes_only_finished_jobs() {
    let backend = Arc::new(BrokerQueue::new());
    let email = |n: i64| json!({ "to": "a@example.com", "template": "generic", "n": n });

    for n in 0..2 {
        backend
            .enqueue(QueueName::Email, JobKind::SendEmail, email(n), JobOptions::new())
            .await
            .unwrap();
    }
    let done = backend.dequeue_next(QueueName::Email, chrono::Utc::now()).await.unwrap().unwrap();
    backend.mark_completed(done.id, &JobResult::ok("sent", json!({}))).await.unwrap();
    let failed = backend.dequeue_next(QueueName::Email, chrono::Utc::now()).await.unwrap().unwrap();
    backend
        .mark_failed(failed.id, &JobError::validation("bad template"), None)
        .await
        .unwrap();
    let pending = backend
        .enqueue(QueueName::Email, JobKind::SendEmail, email(2), JobOptions::new())
        .await
        .unwrap();

    let processor = CleanupJobs::new(QueueSupervisor::new(backend.clone()));
    let ctx = context(&backend, JobKind::CleanupJobs, 1).await;
    let payload = serde_json::from_value(json!({ "olderThanMs": 0 })).unwrap();
    let result = processor.process(payload, &ctx).await.unwrap();

    assert_eq!(result.data["email"], 2);
    assert_eq!(result.message, "removed 2 finished jobs");
    assert!(backend.get(done.id).await.unwrap().is_none());
    assert!(backend.get(failed.id).await.unwrap().is_none());
    assert_eq!(
        backend.get(pending.id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );
}

// ── 14. cleanup_defaults_to_a_day_of_retention ─────────────────────────────

#[tokio::test]
async fn cleanup_defaults_to_a_day_of_retention() {
    let backend = Arc::new(BrokerQueue::new());
    backend
        .enqueue(QueueName::Email, JobKind::SendEmail, json!({}), JobOptions::new())
        .await
        .unwrap();
    let done = backend.dequeue_next(QueueName::Email, chrono::Utc::now()).await.unwrap().unwrap();
    backend.mark_completed(done.id, &JobResult::ok("sent", json!({}))).await.unwrap();

    let processor = CleanupJobs::new(QueueSupervisor::new(backend.clone()));
    let ctx = context(&backend, JobKind::CleanupJobs, 1).await;
    let result = processor
        .process(serde_json::from_value(json!({})).unwrap(), &ctx)
        .await
        .unwrap();

    assert_eq!(result.message, "removed 0 finished jobs");
    assert!(backend.get(done.id).await.unwrap().is_some());
}

// ── Webhook processing ─────────────────────────────────────────────────────

fn order_body() -> serde_json::Value {
    json!({
        "id": 123,
        "order_number": 1001,
        "email": "ann@example.com",
        "total_price": "50.00",
        "line_items": [
            { "id": 9001, "title": "Mug", "quantity": 2, "price": "25.00" },
            { "id": 9002, "title": "Gift card sleeve", "quantity": 1, "price": "0.00" }
        ]
    })
}

fn webhook_job(event_type: &str, body: serde_json::Value, webhook_id: Option<uuid::Uuid>) -> shop_sync::jobs::webhook::WebhookJobPayload {
    serde_json::from_value(json!({
        "source": "shopify",
        "eventType": event_type,
        "payload": body,
        "webhookId": webhook_id,
        "shopDomain": "demo.myshopify.com"
    }))
    .unwrap()
}

async fn pending(backend: &BrokerQueue, queue: QueueName) -> Vec<shop_sync::domain::job::JobRecord> {
    backend.list_by_status(queue, JobStatus::Pending, 100).await.unwrap()
}

// ── 15. failed_webhook_is_recorded_and_reraised ────────────────────────────

#[tokio::test]
async fn failed_webhook_is_recorded_and_reraised() {
    let backend = Arc::new(BrokerQueue::new());
    let store = Arc::new(MemoryStore::new());
    let processor = ProcessWebhook::new(Reconciler::new(store.clone()), backend.clone());
    let ctx = context(&backend, JobKind::ProcessWebhook, 1).await;

    let record = store
        .insert_webhook(&NewWebhookRecord::new("orders/create", "demo.myshopify.com", None, "{}"))
        .await
        .unwrap();
    let err = processor
        .process(webhook_job("orders/create", json!({ "name": "#1001" }), Some(record.id)), &ctx)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Validation);
    let stored = store.find_webhook(record.id).await.unwrap().unwrap();
    assert!(!stored.processed);
    assert_eq!(stored.error_message.as_deref(), Some(err.to_string().as_str()));
    assert_eq!(store.order_count(), 0);

    let mut foreign = webhook_job("orders/create", order_body(), Some(record.id));
    foreign.source = "stripe".into();
    let err = processor.process(foreign, &ctx).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    let stored = store.find_webhook(record.id).await.unwrap().unwrap();
    assert!(stored.error_message.unwrap().contains("unsupported webhook source"));
}

// ── 16. order_create_enqueues_followups ────────────────────────────────────

#[tokio::test]
async fn order_create_enqueues_followups() {
    let backend = Arc::new(BrokerQueue::new());
    let store = Arc::new(MemoryStore::new());
    let processor = ProcessWebhook::new(Reconciler::new(store.clone()), backend.clone());
    let ctx = context(&backend, JobKind::ProcessWebhook, 1).await;

    let result = processor.process(webhook_job("orders/create", order_body(), None), &ctx).await.unwrap();
    assert_eq!(result.data["outcome"]["outcome"], "created");

    let order = store.find_order_by_remote_id("123").await.unwrap().unwrap();
    let orders = pending(&backend, QueueName::OrderProcessing).await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].kind, JobKind::ProcessOrder);
    assert_eq!(orders[0].payload["orderId"], order.id.to_string());

    let notes = pending(&backend, QueueName::Notifications).await;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].payload["channel"], "email");
    assert_eq!(notes[0].payload["recipient"], "ann@example.com");
}

// ── 17. retried_order_create_still_enqueues_followups ──────────────────────
// An earlier attempt stored the order, then died before the follow-ups.

#[tokio::test]
async fn retried_order_create_still_enqueues_followups() {
    let backend = Arc::new(BrokerQueue::new());
    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(store.clone());
    let topic = WebhookTopic::parse("orders/create").unwrap();
    reconciler.reconcile(&topic, &order_body()).await.unwrap();
    assert!(pending(&backend, QueueName::OrderProcessing).await.is_empty());

    let processor = ProcessWebhook::new(reconciler, backend.clone());
    let ctx = context(&backend, JobKind::ProcessWebhook, 2).await;
    let result = processor.process(webhook_job("orders/create", order_body(), None), &ctx).await.unwrap();

    assert_eq!(result.data["outcome"]["outcome"], "unchanged");
    assert_eq!(pending(&backend, QueueName::OrderProcessing).await.len(), 1);
    assert_eq!(pending(&backend, QueueName::Notifications).await.len(), 1);
}

// ── 18. processed_or_cancelled_orders_get_no_followups ─────────────────────

#[tokio::test]
async fn processed_or_cancelled_orders_get_no_followups() {
    let backend = Arc::new(BrokerQueue::new());
    let store = Arc::new(MemoryStore::new());
    let processor = ProcessWebhook::new(Reconciler::new(store.clone()), backend.clone());
    let ctx = context(&backend, JobKind::ProcessWebhook, 1).await;

    processor.process(webhook_job("orders/create", order_body(), None), &ctx).await.unwrap();
    let mut order = store.find_order_by_remote_id("123").await.unwrap().unwrap();
    order.processed = true;
    store.update_order(&order).await.unwrap();

    // Redelivery of a processed order.
    processor.process(webhook_job("orders/create", order_body(), None), &ctx).await.unwrap();
    assert_eq!(pending(&backend, QueueName::OrderProcessing).await.len(), 1);

    // Redelivery of an order cancelled in between.
    let mut second = order_body();
    second["id"] = json!(124);
    second["order_number"] = json!(1002);
    processor.process(webhook_job("orders/create", second.clone(), None), &ctx).await.unwrap();
    processor.process(webhook_job("orders/cancelled", second.clone(), None), &ctx).await.unwrap();
    processor.process(webhook_job("orders/create", second, None), &ctx).await.unwrap();
    assert_eq!(pending(&backend, QueueName::OrderProcessing).await.len(), 2);
}

// ── 19. zero_priced_line_item_is_processed ─────────────────────────────────

#[tokio::test]
async fn zero_priced_line_item_is_processed() {
    let backend = Arc::new(BrokerQueue::new());
    let store = Arc::new(MemoryStore::new());
    let topic = WebhookTopic::parse("orders/create").unwrap();
    let outcome = Reconciler::new(store.clone())
        .reconcile(&topic, &order_body())
        .await
        .unwrap();
    let order_id = outcome.entity_id().unwrap();

    let processor = ProcessOrder::new(store.clone());
    let ctx = context(&backend, JobKind::ProcessOrder, 1).await;
    let payload = serde_json::from_value(json!({ "orderId": order_id })).unwrap();
    let result = processor.process(payload, &ctx).await.unwrap();

    assert_eq!(result.data["itemCount"], 2);
    assert_eq!(result.data["itemsTotal"], "50.00");
    assert!(store.find_order(order_id).await.unwrap().unwrap().processed);

    let payload = serde_json::from_value(json!({ "orderId": order_id })).unwrap();
    let err = processor.process(payload, &ctx).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Duplicate);
}
