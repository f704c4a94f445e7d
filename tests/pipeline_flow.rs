//! End-to-end tests of the queue pipeline over the in-memory log store.

mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{eventually, fast_config, harness, RecordingPush, ScriptedChat};
use interview_queue::metrics::MetricsCollector;
use interview_queue::queue::{Envelope, Priority, PushKey, RequestTopic};
use interview_queue::stream::{GroupStart, LogStore};

const REQUESTS: &str = "ai:requests";
const RESPONSES: &str = "ai:responses";
const REQUEST_GROUP: &str = "ai-service-group";
const RESPONSE_GROUP: &str = "websocket-response-group";
const WAIT: Duration = Duration::from_secs(5);

fn envelopes(store: &interview_queue::stream::MemoryLogStore, stream: &str) -> Vec<Envelope> {
    store
        .records(stream)
        .iter()
        .map(|r| Envelope::from_record(r).expect("valid envelope"))
        .collect()
}

#[tokio::test]
async fn test_enqueued_question_request_shape() {
    let h = harness(fast_config(), ScriptedChat::default(), RecordingPush::default());

    let message_id = h
        .pipeline
        .requests()
        .request_opening_question(42, 7)
        .await
        .expect("enqueue")
        .expect("enabled");

    let records = envelopes(&h.store, REQUESTS);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message_id, message_id);
    assert_eq!(records[0].topic, "ai.question_generation");
    assert_eq!(records[0].priority, Priority::High);
    assert_eq!(records[0].retry_count, 0);

    let raw = &h.store.records(REQUESTS)[0];
    assert_eq!(raw.field("priority"), Some("high"));
    assert_eq!(raw.field("retryCount"), Some("0"));
}

#[tokio::test]
async fn test_successful_request_is_acked_once_and_pushed() {
    let h = harness(
        fast_config(),
        ScriptedChat::default(),
        RecordingPush::with_online(&[PushKey::Session(42)]),
    );
    h.pipeline.start().await.expect("start");

    h.pipeline
        .requests()
        .request_opening_question(42, 7)
        .await
        .expect("enqueue");

    let push = h.push.clone();
    eventually(WAIT, || {
        push.sent_types(PushKey::Session(42))
            .contains(&"session_state_update".to_string())
    })
    .await;
    let store = h.store.clone();
    eventually(WAIT, || {
        store.pending_ids(REQUESTS, REQUEST_GROUP).is_empty()
            && store.pending_ids(RESPONSES, RESPONSE_GROUP).is_empty()
    })
    .await;

    // Give a redelivery the chance to show up.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.chat.generations.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.records(REQUESTS).len(), 1);
    assert_eq!(h.chat.saved.lock().unwrap().len(), 1);

    let types = h.push.sent_types(PushKey::Session(42));
    assert!(types.contains(&"ai_processing_status".to_string()));
    assert!(types.contains(&"ai_response".to_string()));

    h.pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_feedback_succeeds_on_third_attempt() {
    let h = harness(fast_config(), ScriptedChat::failing(2), RecordingPush::default());
    h.pipeline.start().await.expect("start");

    let origin = h
        .pipeline
        .requests()
        .request_feedback(5, 1, "Ownership moves values", Some(2))
        .await
        .expect("enqueue")
        .expect("enabled");

    let sessions = h.sessions.clone();
    eventually(WAIT, || sessions.calls.lock().unwrap().len() == 2).await;
    let store = h.store.clone();
    eventually(WAIT, || store.pending_ids(REQUESTS, REQUEST_GROUP).is_empty()).await;

    assert_eq!(h.chat.generations.load(Ordering::SeqCst), 3);
    assert_eq!(
        *h.sessions.calls.lock().unwrap(),
        vec!["next:5".to_string(), "completed:5".to_string()]
    );

    let attempts = envelopes(&h.store, REQUESTS);
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        attempts.iter().map(|e| e.retry_count).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(attempts.iter().all(|e| e.origin() == origin));

    h.pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_always_failing_request_is_poison_dropped() {
    let h = harness(
        fast_config().with_max_retries(3),
        ScriptedChat::always_failing(),
        RecordingPush::default(),
    );
    let metrics = MetricsCollector::new();
    let poisoned_before = metrics.poison_drops(REQUESTS, "ai.feedback_generation");
    h.pipeline.start().await.expect("start");

    h.pipeline
        .requests()
        .request_feedback(9, 1, "answer", None)
        .await
        .expect("enqueue");

    let chat = h.chat.clone();
    eventually(WAIT, || chat.generations.load(Ordering::SeqCst) >= 3).await;
    let store = h.store.clone();
    eventually(WAIT, || store.pending_ids(REQUESTS, REQUEST_GROUP).is_empty()).await;
    eventually(WAIT, || {
        metrics.poison_drops(REQUESTS, "ai.feedback_generation") > poisoned_before
    })
    .await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.chat.generations.load(Ordering::SeqCst), 3);
    assert_eq!(h.store.records(REQUESTS).len(), 3);
    assert!(h.store.pending_ids(REQUESTS, REQUEST_GROUP).is_empty());
    assert!(h.sessions.calls.lock().unwrap().is_empty());
    assert_eq!(
        metrics.poison_drops(REQUESTS, "ai.feedback_generation"),
        poisoned_before + 1
    );

    h.pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_backoff_does_not_delay_other_messages() {
    let backoff = Duration::from_millis(1500);
    let h = harness(
        fast_config().with_workers(1).with_retry_delays(backoff, backoff),
        ScriptedChat::failing(1),
        RecordingPush::default(),
    );
    h.pipeline.start().await.expect("start");

    h.pipeline
        .requests()
        .request_opening_question(11, 3)
        .await
        .expect("enqueue");
    let chat = h.chat.clone();
    eventually(WAIT, || chat.generations.load(Ordering::SeqCst) == 1).await;

    // The only worker must be free while the failed question waits out its backoff.
    let enqueued = tokio::time::Instant::now();
    h.pipeline
        .requests()
        .request_single_embedding("What is a lifetime?", "q:3", None)
        .await
        .expect("enqueue");
    let embeddings = h.embeddings.clone();
    eventually(WAIT, || embeddings.cached.load(Ordering::SeqCst) == 1).await;
    assert!(enqueued.elapsed() < Duration::from_millis(700));
    assert_eq!(h.chat.generations.load(Ordering::SeqCst), 1);

    let chat = h.chat.clone();
    eventually(WAIT, || chat.saved.lock().unwrap().len() == 1).await;
    let store = h.store.clone();
    eventually(WAIT, || store.pending_ids(REQUESTS, REQUEST_GROUP).is_empty()).await;
    assert_eq!(h.chat.generations.load(Ordering::SeqCst), 2);

    h.pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_message_ids_unique_and_labelled() {
    let h = harness(fast_config(), ScriptedChat::failing(1), RecordingPush::default());
    h.pipeline.start().await.expect("start");

    let requests = h.pipeline.requests();
    requests.request_opening_question(1, 1).await.expect("enqueue");
    requests
        .request_single_embedding("text", "cache:1", None)
        .await
        .expect("enqueue");
    requests
        .request_final_evaluation(2, Some("last".into()))
        .await
        .expect("enqueue");
    requests
        .request_similarity_check(3, 4, "answer")
        .await
        .expect("enqueue");

    let chat = h.chat.clone();
    let embeddings = h.embeddings.clone();
    eventually(WAIT, || {
        chat.saved.lock().unwrap().len() == 2 && embeddings.cached.load(Ordering::SeqCst) == 1
    })
    .await;
    let store = h.store.clone();
    eventually(WAIT, || store.pending_ids(REQUESTS, REQUEST_GROUP).is_empty()).await;
    h.pipeline.shutdown().await.expect("shutdown");

    // One failed generation, one republished attempt.
    assert_eq!(h.store.records(REQUESTS).len(), 5);

    let mut ids = HashSet::new();
    for stream in [REQUESTS, RESPONSES] {
        for record in h.store.records(stream) {
            let priority = record.field("priority").expect("priority field");
            assert!(["high", "medium", "low"].contains(&priority));
            let env = Envelope::from_record(&record).expect("envelope");
            assert!(ids.insert(env.message_id), "duplicate message id");
        }
    }
}

#[tokio::test]
async fn test_disabled_topic_appends_nothing() {
    let config = fast_config().with_topic_enabled(RequestTopic::FinalEvaluation, false);
    let h = harness(config, ScriptedChat::default(), RecordingPush::default());

    let result = h
        .pipeline
        .requests()
        .request_final_evaluation(1, None)
        .await
        .expect("no error");
    assert!(result.is_none());
    assert!(!h.store.exists(REQUESTS).await.expect("exists"));
}

#[tokio::test]
async fn test_deleted_group_is_recreated_by_health_check() {
    let h = harness(
        fast_config(),
        ScriptedChat::default(),
        RecordingPush::with_online(&[PushKey::Session(77)]),
    );
    h.pipeline.start().await.expect("start");

    assert!(h
        .store
        .destroy_group(REQUESTS, REQUEST_GROUP)
        .await
        .expect("destroy"));

    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if h.store
            .group_exists(REQUESTS, REQUEST_GROUP)
            .await
            .expect("exists")
        {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "group not recreated");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    h.pipeline
        .requests()
        .request_opening_question(77, 1)
        .await
        .expect("enqueue");
    let push = h.push.clone();
    eventually(WAIT, || push.sent_types(PushKey::Session(77)).contains(&"ai_response".to_string())).await;

    h.pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_trim_keeps_pending_entries_reachable() {
    let h = harness(fast_config(), ScriptedChat::default(), RecordingPush::default());
    h.store
        .create_group(REQUESTS, "audit", GroupStart::Latest)
        .await
        .expect("group");

    for session in 0..6 {
        h.pipeline
            .requests()
            .request_opening_question(session, 1)
            .await
            .expect("enqueue");
    }
    let delivered = h
        .store
        .read_new(REQUESTS, "audit", "auditor", 2, Duration::ZERO)
        .await
        .expect("read");
    h.store
        .ack(REQUESTS, "audit", &[delivered[0].id])
        .await
        .expect("ack");

    let report = h
        .pipeline
        .monitor()
        .trim_stream(REQUESTS, 1)
        .await
        .expect("trim");

    assert!(report.clamped);
    let pending = h.store.pending_ids(REQUESTS, "audit");
    assert_eq!(pending, vec![delivered[1].id]);
    for id in pending {
        assert!(h.store.get(REQUESTS, id).await.expect("get").is_some());
    }
    assert_eq!(h.store.len(REQUESTS).await.expect("len"), 5);
}

#[tokio::test]
async fn test_absent_connection_still_acks_response() {
    let h = harness(fast_config(), ScriptedChat::default(), RecordingPush::default());
    h.pipeline.start().await.expect("start");

    h.pipeline
        .responses()
        .send_user_notification(3, "Your report is ready", "info")
        .await
        .expect("send");

    let pipeline = &h.pipeline;
    eventually(WAIT, || {
        pipeline
            .delivery()
            .map_or(false, |d| d.pool_stats().tasks_completed == 1)
    })
    .await;
    let store = h.store.clone();
    eventually(WAIT, || store.pending_ids(RESPONSES, RESPONSE_GROUP).is_empty()).await;
    // At-most-once: nothing is retried for an offline user.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.store.records(RESPONSES).len(), 1);
    assert!(h.push.sent.lock().unwrap().is_empty());

    h.pipeline.shutdown().await.expect("shutdown");
}
