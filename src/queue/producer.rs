//! Request and response enqueuers.
//!
//! Both enqueuers build an [`Envelope`] and append it as one record. An
//! append failure is returned to the caller. A disabled request topic, or
//! disabled response delivery, turns the call into a silent no-op
//! (`Ok(None)`), so callers must not depend on the enqueue for correctness.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::envelope::{Envelope, Payload, Priority};
use super::topics::{AiRequest, EmbeddingItem, ResponseMessage, SessionState};
use crate::config::{QueueConfig, TopicsConfig};
use crate::error::EnqueueError;
use crate::metrics::MetricsCollector;
use crate::stream::{LogStore, RecordId};

/// Appends an envelope to `stream`.
pub(crate) async fn append_envelope(
    store: &dyn LogStore,
    stream: &str,
    envelope: &Envelope,
) -> Result<RecordId, EnqueueError> {
    let fields = envelope.to_fields()?;
    store
        .append(stream, &fields)
        .await
        .map_err(|source| EnqueueError::Transport {
            stream: stream.to_string(),
            source,
        })
}

/// Producer for the request stream.
#[derive(Clone)]
pub struct RequestEnqueuer {
    store: Arc<dyn LogStore>,
    stream: String,
    enabled: bool,
    topics: TopicsConfig,
    metrics: MetricsCollector,
}

impl RequestEnqueuer {
    pub fn new(store: Arc<dyn LogStore>, config: &QueueConfig) -> Self {
        Self {
            store,
            stream: config.streams.requests.clone(),
            enabled: config.enabled,
            topics: config.topics.clone(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Appends a request unless its topic is disabled.
    ///
    /// Returns the new envelope's `messageId`, or `None` when disabled.
    ///
    /// # Errors
    ///
    /// Returns `EnqueueError::Transport` if the log store rejects the append.
    pub async fn enqueue(&self, request: AiRequest) -> Result<Option<Uuid>, EnqueueError> {
        let topic = request.topic();
        if !self.enabled || !self.topics.is_enabled(topic) {
            debug!(topic = %topic, "Topic disabled, skipping enqueue");
            return Ok(None);
        }

        let envelope = Envelope::new(
            topic.as_str(),
            request.to_payload(Utc::now()),
            request.priority(),
        );
        let record_id = append_envelope(self.store.as_ref(), &self.stream, &envelope).await?;
        self.metrics
            .record_enqueue(&self.stream, topic.as_str(), envelope.priority);

        info!(
            stream = %self.stream,
            topic = %topic,
            kind = request.kind(),
            priority = %envelope.priority,
            message_id = %envelope.message_id,
            record_id = %record_id,
            session_id = ?request.session_id(),
            "Enqueued AI request"
        );

        Ok(Some(envelope.message_id))
    }

    pub async fn request_opening_question(
        &self,
        session_id: i64,
        question_id: i64,
    ) -> Result<Option<Uuid>, EnqueueError> {
        self.enqueue(AiRequest::QuestionGeneration {
            session_id,
            question_id,
        })
        .await
    }

    /// Requests feedback on an answer. Without `next_question_id` the
    /// feedback closes the interview with a final evaluation.
    pub async fn request_feedback(
        &self,
        session_id: i64,
        current_question_id: i64,
        user_answer: impl Into<String>,
        next_question_id: Option<i64>,
    ) -> Result<Option<Uuid>, EnqueueError> {
        self.enqueue(AiRequest::FeedbackGeneration {
            session_id,
            current_question_id,
            user_answer: user_answer.into(),
            next_question_id,
        })
        .await
    }

    pub async fn request_final_evaluation(
        &self,
        session_id: i64,
        last_answer: Option<String>,
    ) -> Result<Option<Uuid>, EnqueueError> {
        self.enqueue(AiRequest::FinalEvaluation {
            session_id,
            last_answer: last_answer.unwrap_or_default(),
        })
        .await
    }

    pub async fn request_single_embedding(
        &self,
        text: impl Into<String>,
        cache_key: impl Into<String>,
        context: Option<String>,
    ) -> Result<Option<Uuid>, EnqueueError> {
        self.enqueue(AiRequest::SingleEmbedding {
            text: text.into(),
            cache_key: cache_key.into(),
            context: context.unwrap_or_default(),
        })
        .await
    }

    pub async fn request_batch_embedding(
        &self,
        batch_id: impl Into<String>,
        items: Vec<EmbeddingItem>,
    ) -> Result<Option<Uuid>, EnqueueError> {
        self.enqueue(AiRequest::BatchEmbedding {
            batch_id: batch_id.into(),
            items,
        })
        .await
    }

    pub async fn request_similarity_check(
        &self,
        session_id: i64,
        question_id: i64,
        user_answer: impl Into<String>,
    ) -> Result<Option<Uuid>, EnqueueError> {
        self.enqueue(AiRequest::SimilarityCheck {
            session_id,
            question_id,
            user_answer: user_answer.into(),
        })
        .await
    }
}

/// Producer for the response stream.
#[derive(Clone)]
pub struct ResponseEnqueuer {
    store: Arc<dyn LogStore>,
    stream: String,
    enabled: bool,
    metrics: MetricsCollector,
}

impl ResponseEnqueuer {
    pub fn new(store: Arc<dyn LogStore>, config: &QueueConfig) -> Self {
        Self {
            store,
            stream: config.streams.responses.clone(),
            enabled: config.responses.enabled,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Appends a delivery-ready message.
    ///
    /// Returns `None` without appending when response delivery is disabled;
    /// nothing would consume the stream.
    pub async fn send(&self, message: ResponseMessage) -> Result<Option<Uuid>, EnqueueError> {
        let topic = message.topic();
        if !self.enabled {
            debug!(topic = %topic, key = %message.push_key(), "Response delivery disabled, skipping enqueue");
            return Ok(None);
        }

        let priority: Priority = message.priority();
        let payload: Payload = message.to_payload();
        let envelope = Envelope::new(topic.as_str(), payload, priority);

        let record_id = append_envelope(self.store.as_ref(), &self.stream, &envelope).await?;
        self.metrics
            .record_enqueue(&self.stream, topic.as_str(), priority);

        debug!(
            stream = %self.stream,
            topic = %topic,
            key = %message.push_key(),
            message_id = %envelope.message_id,
            record_id = %record_id,
            "Enqueued response"
        );

        Ok(Some(envelope.message_id))
    }

    pub async fn send_ai_response(
        &self,
        session_id: i64,
        message: impl Into<String>,
        current_state: SessionState,
    ) -> Result<Option<Uuid>, EnqueueError> {
        self.send(ResponseMessage::AiResponse {
            session_id,
            message: message.into(),
            current_state,
        })
        .await
    }

    pub async fn send_processing_status(
        &self,
        session_id: i64,
        status: impl Into<String>,
        detail: impl Into<String>,
    ) -> Result<Option<Uuid>, EnqueueError> {
        self.send(ResponseMessage::ProcessingStatus {
            session_id,
            status: status.into(),
            detail: detail.into(),
        })
        .await
    }

    pub async fn send_session_state(
        &self,
        session_id: i64,
        state: SessionState,
        chat_enabled: bool,
    ) -> Result<Option<Uuid>, EnqueueError> {
        self.send(ResponseMessage::SessionState {
            session_id,
            state,
            chat_enabled,
        })
        .await
    }

    pub async fn send_user_notification(
        &self,
        user_id: i64,
        message: impl Into<String>,
        notification_type: impl Into<String>,
    ) -> Result<Option<Uuid>, EnqueueError> {
        self.send(ResponseMessage::UserNotification {
            user_id,
            message: message.into(),
            notification_type: notification_type.into(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::queue::RequestTopic;
    use crate::stream::flaky::FlakyLogStore;
    use crate::stream::MemoryLogStore;

    fn setup(config: &QueueConfig) -> (Arc<MemoryLogStore>, RequestEnqueuer, ResponseEnqueuer) {
        let store = Arc::new(MemoryLogStore::new());
        let requests = RequestEnqueuer::new(store.clone(), config);
        let responses = ResponseEnqueuer::new(store.clone(), config);
        (store, requests, responses)
    }

    async fn envelopes(store: &MemoryLogStore, stream: &str) -> Vec<Envelope> {
        store
            .records(stream)
            .iter()
            .map(|r| Envelope::from_record(r).expect("valid envelope"))
            .collect()
    }

    #[tokio::test]
    async fn test_opening_question_record() {
        let config = QueueConfig::default();
        let (store, requests, _) = setup(&config);

        let id = requests
            .request_opening_question(42, 7)
            .await
            .expect("enqueue")
            .expect("topic enabled");

        let records = envelopes(&store, "ai:requests").await;
        assert_eq!(records.len(), 1);
        let env = &records[0];
        assert_eq!(env.message_id, id);
        assert_eq!(env.topic, "ai.question_generation");
        assert_eq!(env.priority, Priority::High);
        assert_eq!(env.retry_count, 0);
        assert_eq!(env.payload.get("sessionId"), Some(&serde_json::json!(42)));
    }

    #[tokio::test]
    async fn test_disabled_topic_appends_nothing() {
        let config =
            QueueConfig::default().with_topic_enabled(RequestTopic::EmbeddingCalculation, false);
        let (store, requests, _) = setup(&config);

        let result = requests
            .request_single_embedding("text", "key", None)
            .await
            .expect("no error");
        assert!(result.is_none());
        let result = requests
            .request_similarity_check(1, 2, "answer")
            .await
            .expect("no error");
        assert!(result.is_none());

        assert!(store.records("ai:requests").is_empty());
    }

    #[tokio::test]
    async fn test_every_request_is_labelled() {
        let config = QueueConfig::default();
        let (store, requests, _) = setup(&config);

        requests.request_opening_question(1, 1).await.expect("enqueue");
        requests.request_feedback(1, 1, "a", Some(2)).await.expect("enqueue");
        requests.request_final_evaluation(1, None).await.expect("enqueue");
        requests.request_single_embedding("t", "k", None).await.expect("enqueue");
        requests
            .request_batch_embedding(
                "b",
                vec![EmbeddingItem {
                    text: "t".into(),
                    cache_key: "k".into(),
                }],
            )
            .await
            .expect("enqueue");
        requests.request_similarity_check(1, 1, "a").await.expect("enqueue");

        let records = envelopes(&store, "ai:requests").await;
        let priorities: Vec<Priority> = records.iter().map(|e| e.priority).collect();
        assert_eq!(
            priorities,
            vec![
                Priority::High,
                Priority::High,
                Priority::Low,
                Priority::Medium,
                Priority::Medium,
                Priority::High,
            ]
        );
        let mut ids: Vec<Uuid> = records.iter().map(|e| e.message_id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 6);
    }

    #[tokio::test]
    async fn test_response_enqueuer_topics() {
        let config = QueueConfig::default();
        let (store, _, responses) = setup(&config);

        responses
            .send_ai_response(3, "hello", SessionState::WaitingForUserAnswer)
            .await
            .expect("send");
        responses
            .send_user_notification(8, "maintenance", "warning")
            .await
            .expect("send");

        let records = envelopes(&store, "ai:responses").await;
        assert_eq!(records[0].topic, "ws.ai_response");
        assert_eq!(records[0].priority, Priority::High);
        assert_eq!(records[1].topic, "ws.user_notification");
        assert_eq!(records[1].priority, Priority::Low);
        assert!(store.records("ai:requests").is_empty());
    }

    #[tokio::test]
    async fn test_disabled_delivery_appends_no_response() {
        let config = QueueConfig::default().with_response_delivery(false);
        let (store, _, responses) = setup(&config);

        let result = responses
            .send_ai_response(3, "hello", SessionState::WaitingForUserAnswer)
            .await
            .expect("no error");
        assert!(result.is_none());
        let result = responses
            .send_session_state(3, SessionState::WaitingForUserAnswer, true)
            .await
            .expect("no error");
        assert!(result.is_none());

        assert!(!store.exists("ai:responses").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_append_failure_reaches_caller() {
        let config = QueueConfig::default();
        let store = Arc::new(FlakyLogStore::new());
        store.refuse_appends(true);
        let requests = RequestEnqueuer::new(store.clone(), &config);
        let responses = ResponseEnqueuer::new(store.clone(), &config);

        let err = requests
            .request_opening_question(42, 7)
            .await
            .expect_err("append refused");
        match err {
            EnqueueError::Transport { stream, source } => {
                assert_eq!(stream, "ai:requests");
                assert!(matches!(source, StoreError::ConnectionFailed(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = responses
            .send_processing_status(42, "generating", "...")
            .await
            .expect_err("append refused");
        assert!(matches!(err, EnqueueError::Transport { .. }));
        assert!(store.inner.records("ai:requests").is_empty());
    }
}
