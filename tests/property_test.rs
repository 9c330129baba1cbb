use proptest::prelude::*;
use shop_sync::domain::error::{ErrorKind, JobError};
use shop_sync::domain::job::{JobKind, JobStatus, QueueName};
use shop_sync::domain::money::MoneyAmount;
use shop_sync::domain::retry::{FailReason, RetryDecision, RetryPolicy};
use shop_sync::domain::webhook::WebhookTopic;
use shop_sync::services::reconcile::{ReconcileOutcome, Reconciler};
use shop_sync::store::memory::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

fn arb_kind() -> impl Strategy<Value = ErrorKind> {
    prop_oneof![
        Just(ErrorKind::Validation),
        Just(ErrorKind::NotFound),
        Just(ErrorKind::Auth),
        Just(ErrorKind::Network),
        Just(ErrorKind::RateLimited),
        Just(ErrorKind::Duplicate),
        Just(ErrorKind::Unknown),
    ]
}

fn arb_queue() -> impl Strategy<Value = QueueName> {
    proptest::sample::select(QueueName::ALL.to_vec())
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    /// Each retry waits twice as long as the previous one until the cap.
    #[test]
    fn backoff_doubles_until_cap(base_ms in 1u64..5_000, attempts in 1i32..30) {
        let policy = RetryPolicy::new(Duration::from_millis(base_ms));
        let this = policy.backoff(attempts);
        let next = policy.backoff(attempts + 1);
        prop_assert!(this <= policy.max_backoff);
        if this * 2 <= policy.max_backoff {
            prop_assert_eq!(next, this * 2);
        } else {
            prop_assert_eq!(next, policy.max_backoff);
        }
    }

    /// Default policy starts at 2s.
    #[test]
    fn first_retry_waits_base(kind in arb_kind()) {
        let err = JobError::new(kind, "x");
        match RetryPolicy::default().decide(1, 3, &err) {
            RetryDecision::Retry { delay } => {
                prop_assert!(kind.retryable());
                prop_assert_eq!(delay, Duration::from_millis(2000));
            }
            RetryDecision::Fail { reason } => {
                prop_assert!(!kind.retryable());
                prop_assert_eq!(reason, FailReason::NonRetryable);
            }
        }
    }

    /// Never retry once the attempt budget is spent, whatever the error.
    #[test]
    fn exhausted_never_retries(kind in arb_kind(), max in 1i32..10, extra in 0i32..5) {
        let err = JobError::new(kind, "x");
        let decision = RetryPolicy::default().decide(max + extra, max, &err);
        let is_fail = matches!(decision, RetryDecision::Fail { .. });
        prop_assert!(is_fail);
    }

    /// as_str → try_from roundtrip is identity for queue names.
    #[test]
    fn queue_name_roundtrip(queue in arb_queue()) {
        prop_assert_eq!(QueueName::try_from(queue.as_str()).unwrap(), queue);
    }

    /// Every kind maps back through its name and owns exactly one queue.
    #[test]
    fn job_kind_roundtrip(kind in proptest::sample::select(JobKind::ALL.to_vec())) {
        prop_assert_eq!(JobKind::try_from(kind.as_str()).unwrap(), kind);
        prop_assert!(QueueName::ALL.contains(&kind.queue()));
    }

    /// Completed and failed are terminal; nothing leaves them.
    #[test]
    fn terminal_statuses_are_final(
        next in prop_oneof![
            Just(JobStatus::Pending),
            Just(JobStatus::Active),
            Just(JobStatus::Completed),
            Just(JobStatus::Failed),
        ]
    ) {
        for terminal in [JobStatus::Completed, JobStatus::Failed] {
            prop_assert!(terminal.is_terminal());
            prop_assert!(!terminal.can_transition_to(&next));
        }
    }

    /// Decimal prices parse to exact cents.
    #[test]
    fn money_parses_two_decimals(units in 0i64..1_000_000, cents in 0i64..100) {
        let parsed = MoneyAmount::parse_decimal(&format!("{units}.{cents:02}")).unwrap();
        prop_assert_eq!(parsed.cents(), units * 100 + cents);
    }

    /// Replaying the same delivery any number of times leaves one order with
    /// one row per line item.
    #[test]
    fn order_reconcile_is_idempotent(
        order_id in 1u64..1_000_000,
        item_ids in proptest::collection::hash_set(1u64..10_000, 1..5),
        replays in 1usize..4,
    ) {
        let line_items: Vec<_> = item_ids
            .iter()
            .map(|id| serde_json::json!({ "id": id, "title": "Item", "quantity": 1, "price": "1.00" }))
            .collect();
        let payload = serde_json::json!({
            "id": order_id,
            "order_number": order_id,
            "total_price": format!("{}.00", line_items.len()),
            "line_items": line_items,
        });
        let topic = WebhookTopic::parse("orders/create").unwrap();

        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone());
        let rt = runtime();
        let (first, rest) = rt.block_on(async {
            let first = reconciler.reconcile(&topic, &payload).await.unwrap();
            let mut rest = Vec::new();
            for _ in 0..replays {
                rest.push(reconciler.reconcile(&topic, &payload).await.unwrap());
            }
            (first, rest)
        });

        let id = first.entity_id().unwrap();
        prop_assert_eq!(first, ReconcileOutcome::Created(id));
        for outcome in rest {
            prop_assert_eq!(outcome, ReconcileOutcome::Unchanged(id));
        }
        prop_assert_eq!(store.order_count(), 1);
        let items = rt.block_on(async {
            use shop_sync::store::CommerceStore;
            store.list_order_items(id).await.unwrap()
        });
        prop_assert_eq!(items.len(), item_ids.len());
    }
}
