use chrono::Utc;
use serde_json::json;
use shop_sync::domain::error::JobError;
use shop_sync::domain::job::{JobKind, JobOptions, JobResult, JobStatus, QueueName};
use shop_sync::queue::redis_broker::RedisQueue;
use shop_sync::queue::{QueueBackend, STALL_ERROR};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// Each test gets its own key prefix, so they can run in parallel on one server.
async fn fresh() -> RedisQueue {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
    let prefix = format!("shop_sync_test_{}", Uuid::now_v7());
    RedisQueue::connect_with_prefix(&url, &prefix)
        .await
        .expect("redis reachable")
}

async fn enqueue_email(queue: &RedisQueue, options: JobOptions) -> Uuid {
    queue
        .enqueue(
            QueueName::Email,
            JobKind::SendEmail,
            json!({ "to": "a@example.com", "subject": "s", "body": "b" }),
            options,
        )
        .await
        .unwrap()
        .id
}

// ── 1. claim_order_is_priority_then_fifo ───────────────────────────────────

#[tokio::test]
#[ignore = "requires redis"]
async fn claim_order_is_priority_then_fifo() {
    let queue = fresh().await;
    assert_eq!(queue.name(), "redis");

    let low = enqueue_email(&queue, JobOptions::new().with_priority(1)).await;
    let high_a = enqueue_email(&queue, JobOptions::new().with_priority(9)).await;
    let high_b = enqueue_email(&queue, JobOptions::new().with_priority(9)).await;

    let mut order = Vec::new();
    while let Some(job) = queue.dequeue_next(QueueName::Email, Utc::now()).await.unwrap() {
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.attempts, 1);
        order.push(job.id);
    }
    assert_eq!(order, vec![high_a, high_b, low]);
}

// ── 2. concurrent_claims_never_share_a_job ─────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires redis"]
async fn concurrent_claims_never_share_a_job() {
    let queue = Arc::new(fresh().await);

    for _ in 0..40 {
        enqueue_email(&queue, JobOptions::new()).await;
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = queue.dequeue_next(QueueName::Email, Utc::now()).await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(all.len(), 40);
    assert_eq!(unique.len(), 40, "a job was delivered twice");
}

// ── 3. delayed_job_is_not_due_until_scheduled ──────────────────────────────

#[tokio::test]
#[ignore = "requires redis"]
async fn delayed_job_is_not_due_until_scheduled() {
    let queue = fresh().await;

    let id = enqueue_email(&queue, JobOptions::new().with_delay(Duration::from_secs(60))).await;

    assert!(queue.dequeue_next(QueueName::Email, Utc::now()).await.unwrap().is_none());
    let counts = queue.count_by_status(QueueName::Email, Utc::now()).await.unwrap();
    assert_eq!(counts.delayed, 1);
    assert_eq!(counts.waiting, 0);

    let later = Utc::now() + chrono::Duration::seconds(61);
    let job = queue.dequeue_next(QueueName::Email, later).await.unwrap().unwrap();
    assert_eq!(job.id, id);
}

// ── 4. retry_then_exhaustion ───────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires redis"]
async fn retry_then_exhaustion() {
    let queue = fresh().await;
    let id = enqueue_email(&queue, JobOptions::new().with_max_attempts(2)).await;
    let err = JobError::network("ECONNREFUSED");

    let job = queue.dequeue_next(QueueName::Email, Utc::now()).await.unwrap().unwrap();
    let retry_at = Utc::now() + chrono::Duration::seconds(30);
    queue.mark_failed(job.id, &err, Some(retry_at)).await.unwrap();

    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert!(queue.dequeue_next(QueueName::Email, Utc::now()).await.unwrap().is_none());

    let due = retry_at + chrono::Duration::seconds(1);
    let job = queue.dequeue_next(QueueName::Email, due).await.unwrap().unwrap();
    assert_eq!(job.attempts, 2);
    queue.mark_failed(job.id, &err, Some(due)).await.unwrap();

    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("ECONNREFUSED"));
    assert!(job.processed_at.is_some());
}

// ── 5. completed_job_cannot_fail_afterwards ────────────────────────────────

#[tokio::test]
#[ignore = "requires redis"]
async fn completed_job_cannot_fail_afterwards() {
    let queue = fresh().await;
    enqueue_email(&queue, JobOptions::new()).await;

    let job = queue.dequeue_next(QueueName::Email, Utc::now()).await.unwrap().unwrap();
    queue
        .mark_completed(job.id, &JobResult::ok("sent", json!({})))
        .await
        .unwrap();

    let err = queue
        .mark_failed(job.id, &JobError::unknown("late"), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot move"), "got: {err}");
    let job = queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
}

// ── 6. paused_queue_yields_nothing ─────────────────────────────────────────

#[tokio::test]
#[ignore = "requires redis"]
async fn paused_queue_yields_nothing() {
    let queue = fresh().await;
    enqueue_email(&queue, JobOptions::new()).await;

    queue.pause(QueueName::Email).await.unwrap();
    queue.pause(QueueName::Email).await.unwrap();
    assert!(queue.is_paused(QueueName::Email).await.unwrap());
    assert!(!queue.is_paused(QueueName::OrderProcessing).await.unwrap());
    assert!(queue.dequeue_next(QueueName::Email, Utc::now()).await.unwrap().is_none());
    assert!(queue.count_by_status(QueueName::Email, Utc::now()).await.unwrap().paused);

    queue.resume(QueueName::Email).await.unwrap();
    assert!(queue.dequeue_next(QueueName::Email, Utc::now()).await.unwrap().is_some());
}

// ── 7. clean_respects_cutoff_limit_and_live_jobs ───────────────────────────

#[tokio::test]
#[ignore = "requires redis"]
async fn clean_respects_cutoff_limit_and_live_jobs() {
    let queue = fresh().await;

    for _ in 0..3 {
        enqueue_email(&queue, JobOptions::new()).await;
        let job = queue.dequeue_next(QueueName::Email, Utc::now()).await.unwrap().unwrap();
        queue
            .mark_completed(job.id, &JobResult::ok("sent", json!({})))
            .await
            .unwrap();
    }
    let pending = enqueue_email(&queue, JobOptions::new()).await;
    enqueue_email(&queue, JobOptions::new()).await;
    let active = queue.dequeue_next(QueueName::Email, Utc::now()).await.unwrap().unwrap();

    // Just finished, so nothing is an hour old.
    let removed = queue
        .clean(QueueName::Email, Duration::from_secs(3600), &[JobStatus::Completed], 100)
        .await
        .unwrap();
    assert_eq!(removed, 0);

    let all = [JobStatus::Pending, JobStatus::Active, JobStatus::Completed, JobStatus::Failed];
    let removed = queue
        .clean(QueueName::Email, Duration::ZERO, &all, 2)
        .await
        .unwrap();
    assert_eq!(removed, 2);
    let removed = queue
        .clean(QueueName::Email, Duration::ZERO, &all, 100)
        .await
        .unwrap();
    assert_eq!(removed, 1);

    assert!(queue.get(pending).await.unwrap().is_some());
    assert!(queue.get(active.id).await.unwrap().is_some());
    let counts = queue.count_by_status(QueueName::Email, Utc::now()).await.unwrap();
    assert_eq!(counts.completed, 0);
    assert_eq!(counts.active, 1);
}

// ── 8. stalled_job_is_requeued_then_failed ─────────────────────────────────

#[tokio::test]
#[ignore = "requires redis"]
async fn stalled_job_is_requeued_then_failed() {
    let queue = fresh().await;
    let id = enqueue_email(&queue, JobOptions::new()).await;
    let stall = Duration::from_secs(30);

    let job = queue.dequeue_next(QueueName::Email, Utc::now()).await.unwrap().unwrap();
    queue.mark_active(job.id).await.unwrap();

    // Lease still fresh.
    let report = queue.recover_stalled(Utc::now(), stall, 1).await.unwrap();
    assert!(report.is_empty());

    let later = Utc::now() + chrono::Duration::seconds(31);
    let report = queue.recover_stalled(later, stall, 1).await.unwrap();
    assert_eq!(report.requeued, vec![id]);
    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.stalled_count, 1);

    queue.dequeue_next(QueueName::Email, later).await.unwrap().unwrap();
    let much_later = later + chrono::Duration::seconds(31);
    let report = queue.recover_stalled(much_later, stall, 1).await.unwrap();
    assert_eq!(report.failed, vec![id]);
    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(STALL_ERROR));
}

// ── 9. queues_sharing_a_server_stay_apart ──────────────────────────────────

#[tokio::test]
#[ignore = "requires redis"]
async fn queues_sharing_a_server_stay_apart() {
    let first = fresh().await;
    let second = fresh().await;
    assert_ne!(first.prefix(), second.prefix());

    let id = enqueue_email(&first, JobOptions::new()).await;
    assert!(second.get(id).await.unwrap().is_none());
    assert!(second.dequeue_next(QueueName::Email, Utc::now()).await.unwrap().is_none());
    assert_eq!(first.dequeue_next(QueueName::Email, Utc::now()).await.unwrap().unwrap().id, id);
}
