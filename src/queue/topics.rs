//! Typed message kinds carried on the request and response streams.
//!
//! Topic strings only exist on the wire. Inside the crate every message is
//! one of the closed enums below, so handlers are matched exhaustively.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::envelope::{Payload, Priority};
use crate::error::ProcessingError;

/// Topics of the request stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestTopic {
    QuestionGeneration,
    FeedbackGeneration,
    EmbeddingCalculation,
    FinalEvaluation,
}

impl RequestTopic {
    pub const ALL: [RequestTopic; 4] = [
        RequestTopic::QuestionGeneration,
        RequestTopic::FeedbackGeneration,
        RequestTopic::EmbeddingCalculation,
        RequestTopic::FinalEvaluation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestTopic::QuestionGeneration => "ai.question_generation",
            RequestTopic::FeedbackGeneration => "ai.feedback_generation",
            RequestTopic::EmbeddingCalculation => "ai.embedding_calculation",
            RequestTopic::FinalEvaluation => "ai.final_evaluation",
        }
    }

    pub fn parse(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == topic)
    }
}

impl fmt::Display for RequestTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topics of the response stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseTopic {
    AiResponse,
    ProcessingStatus,
    SessionState,
    UserNotification,
}

impl ResponseTopic {
    pub const ALL: [ResponseTopic; 4] = [
        ResponseTopic::AiResponse,
        ResponseTopic::ProcessingStatus,
        ResponseTopic::SessionState,
        ResponseTopic::UserNotification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseTopic::AiResponse => "ws.ai_response",
            ResponseTopic::ProcessingStatus => "ws.processing_status",
            ResponseTopic::SessionState => "ws.session_state",
            ResponseTopic::UserNotification => "ws.user_notification",
        }
    }

    pub fn parse(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == topic)
    }

    /// Fixed lane of every message on this topic.
    pub fn priority(&self) -> Priority {
        match self {
            ResponseTopic::AiResponse => Priority::High,
            ResponseTopic::ProcessingStatus | ResponseTopic::SessionState => Priority::Medium,
            ResponseTopic::UserNotification => Priority::Low,
        }
    }
}

impl fmt::Display for ResponseTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interview session state as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Started,
    WaitingForUserAnswer,
    AiProcessing,
    AiAnalyzing,
    AiFeedback,
    InterviewCompleted,
    SessionEnded,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Started => "STARTED",
            SessionState::WaitingForUserAnswer => "WAITING_FOR_USER_ANSWER",
            SessionState::AiProcessing => "AI_PROCESSING",
            SessionState::AiAnalyzing => "AI_ANALYZING",
            SessionState::AiFeedback => "AI_FEEDBACK",
            SessionState::InterviewCompleted => "INTERVIEW_COMPLETED",
            SessionState::SessionEnded => "SESSION_ENDED",
            SessionState::Error => "ERROR",
        }
    }

    pub fn parse(state: &str) -> Option<Self> {
        [
            SessionState::Started,
            SessionState::WaitingForUserAnswer,
            SessionState::AiProcessing,
            SessionState::AiAnalyzing,
            SessionState::AiFeedback,
            SessionState::InterviewCompleted,
            SessionState::SessionEnded,
            SessionState::Error,
        ]
        .into_iter()
        .find(|s| s.as_str() == state)
    }

    /// Whether the client may type while an AI response in this state is shown.
    pub fn allows_chat_input(&self) -> bool {
        *self != SessionState::AiProcessing
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One text of a batch embedding request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingItem {
    pub text: String,
    pub cache_key: String,
}

/// A unit of AI work on the request stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AiRequest {
    QuestionGeneration {
        session_id: i64,
        question_id: i64,
    },
    /// Feedback on an answer, followed by the next question when
    /// `next_question_id` is set, or by the final evaluation otherwise.
    FeedbackGeneration {
        session_id: i64,
        current_question_id: i64,
        user_answer: String,
        next_question_id: Option<i64>,
    },
    FinalEvaluation {
        session_id: i64,
        last_answer: String,
    },
    SingleEmbedding {
        text: String,
        cache_key: String,
        context: String,
    },
    BatchEmbedding {
        batch_id: String,
        items: Vec<EmbeddingItem>,
    },
    SimilarityCheck {
        session_id: i64,
        question_id: i64,
        user_answer: String,
    },
}

const TYPE_OPENING_QUESTION: &str = "opening_question";
const TYPE_FEEDBACK: &str = "feedback_with_next_question";
const TYPE_FINAL_EVALUATION: &str = "final_evaluation";
const TYPE_SINGLE_EMBEDDING: &str = "single_embedding";
const TYPE_BATCH_EMBEDDING: &str = "batch_embedding";
const TYPE_SIMILARITY_CHECK: &str = "similarity_check";

impl AiRequest {
    pub fn topic(&self) -> RequestTopic {
        match self {
            AiRequest::QuestionGeneration { .. } => RequestTopic::QuestionGeneration,
            AiRequest::FeedbackGeneration { .. } => RequestTopic::FeedbackGeneration,
            AiRequest::FinalEvaluation { .. } => RequestTopic::FinalEvaluation,
            AiRequest::SingleEmbedding { .. }
            | AiRequest::BatchEmbedding { .. }
            | AiRequest::SimilarityCheck { .. } => RequestTopic::EmbeddingCalculation,
        }
    }

    /// Question and feedback work and similarity checks block the user and
    /// run in the high lane; cache warm-up is medium, the final report low.
    pub fn priority(&self) -> Priority {
        match self {
            AiRequest::QuestionGeneration { .. }
            | AiRequest::FeedbackGeneration { .. }
            | AiRequest::SimilarityCheck { .. } => Priority::High,
            AiRequest::SingleEmbedding { .. } | AiRequest::BatchEmbedding { .. } => {
                Priority::Medium
            }
            AiRequest::FinalEvaluation { .. } => Priority::Low,
        }
    }

    /// The `type` tag written into the payload.
    pub fn kind(&self) -> &'static str {
        match self {
            AiRequest::QuestionGeneration { .. } => TYPE_OPENING_QUESTION,
            AiRequest::FeedbackGeneration { .. } => TYPE_FEEDBACK,
            AiRequest::FinalEvaluation { .. } => TYPE_FINAL_EVALUATION,
            AiRequest::SingleEmbedding { .. } => TYPE_SINGLE_EMBEDDING,
            AiRequest::BatchEmbedding { .. } => TYPE_BATCH_EMBEDDING,
            AiRequest::SimilarityCheck { .. } => TYPE_SIMILARITY_CHECK,
        }
    }

    /// Session the request belongs to, if any.
    pub fn session_id(&self) -> Option<i64> {
        match self {
            AiRequest::QuestionGeneration { session_id, .. }
            | AiRequest::FeedbackGeneration { session_id, .. }
            | AiRequest::FinalEvaluation { session_id, .. }
            | AiRequest::SimilarityCheck { session_id, .. } => Some(*session_id),
            AiRequest::SingleEmbedding { .. } | AiRequest::BatchEmbedding { .. } => None,
        }
    }

    /// Builds the envelope payload.
    pub fn to_payload(&self, requested_at: DateTime<Utc>) -> Payload {
        let body = match self {
            AiRequest::QuestionGeneration {
                session_id,
                question_id,
            } => json!({ "sessionId": session_id, "questionId": question_id }),
            AiRequest::FeedbackGeneration {
                session_id,
                current_question_id,
                user_answer,
                next_question_id,
            } => {
                let mut body = json!({
                    "sessionId": session_id,
                    "currentQuestionId": current_question_id,
                    "userAnswer": user_answer,
                });
                if let Some(next) = next_question_id {
                    body["nextQuestionId"] = json!(next);
                }
                body
            }
            AiRequest::FinalEvaluation {
                session_id,
                last_answer,
            } => json!({ "sessionId": session_id, "lastAnswer": last_answer }),
            AiRequest::SingleEmbedding {
                text,
                cache_key,
                context,
            } => json!({ "text": text, "cacheKey": cache_key, "context": context }),
            AiRequest::BatchEmbedding { batch_id, items } => json!({
                "batchId": batch_id,
                "batchSize": items.len(),
                "textList": items,
            }),
            AiRequest::SimilarityCheck {
                session_id,
                question_id,
                user_answer,
            } => json!({
                "sessionId": session_id,
                "questionId": question_id,
                "userAnswer": user_answer,
            }),
        };

        let mut payload = match body {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        payload.insert("type".into(), json!(self.kind()));
        payload.insert("requestTime".into(), json!(requested_at.timestamp_millis()));
        payload
    }

    /// Decodes and validates a request payload.
    ///
    /// Missing identifiers fail with [`ProcessingError::Validation`]; an
    /// embedding payload with an unknown `type` fails with
    /// [`ProcessingError::UnknownEmbeddingType`].
    pub fn decode(topic: RequestTopic, payload: &Payload) -> Result<Self, ProcessingError> {
        let fields = Fields {
            topic: topic.as_str(),
            payload,
        };

        match topic {
            RequestTopic::QuestionGeneration => Ok(AiRequest::QuestionGeneration {
                session_id: fields.long("sessionId")?,
                question_id: fields.long("questionId")?,
            }),
            RequestTopic::FeedbackGeneration => Ok(AiRequest::FeedbackGeneration {
                session_id: fields.long("sessionId")?,
                current_question_id: fields.long("currentQuestionId")?,
                user_answer: fields.text("userAnswer")?,
                next_question_id: optional_long(payload, "nextQuestionId").filter(|id| *id > 0),
            }),
            RequestTopic::FinalEvaluation => Ok(AiRequest::FinalEvaluation {
                session_id: fields.long("sessionId")?,
                last_answer: optional_text(payload, "lastAnswer").unwrap_or_default(),
            }),
            RequestTopic::EmbeddingCalculation => {
                let kind = optional_text(payload, "type").unwrap_or_default();
                match kind.as_str() {
                    TYPE_SINGLE_EMBEDDING => Ok(AiRequest::SingleEmbedding {
                        text: fields.text("text")?,
                        cache_key: fields.text("cacheKey")?,
                        context: optional_text(payload, "context").unwrap_or_default(),
                    }),
                    TYPE_BATCH_EMBEDDING => {
                        let items = payload
                            .get("textList")
                            .cloned()
                            .and_then(|list| serde_json::from_value(list).ok())
                            .ok_or_else(|| ProcessingError::validation(topic.as_str(), "textList"))?;
                        Ok(AiRequest::BatchEmbedding {
                            batch_id: fields.text("batchId")?,
                            items,
                        })
                    }
                    TYPE_SIMILARITY_CHECK => Ok(AiRequest::SimilarityCheck {
                        session_id: fields.long("sessionId")?,
                        question_id: fields.long("questionId")?,
                        user_answer: fields.text("userAnswer")?,
                    }),
                    _ => Err(ProcessingError::UnknownEmbeddingType(kind)),
                }
            }
        }
    }
}

/// Required-field accessors bound to one topic for error reporting.
struct Fields<'a> {
    topic: &'a str,
    payload: &'a Payload,
}

impl Fields<'_> {
    fn long(&self, key: &'static str) -> Result<i64, ProcessingError> {
        optional_long(self.payload, key).ok_or_else(|| ProcessingError::validation(self.topic, key))
    }

    fn text(&self, key: &'static str) -> Result<String, ProcessingError> {
        optional_text(self.payload, key).ok_or_else(|| ProcessingError::validation(self.topic, key))
    }
}

/// Reads an integer that producers may have written as a number or a string.
pub fn optional_long(payload: &Payload, key: &str) -> Option<i64> {
    match payload.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn optional_text(payload: &Payload, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Target of a push: a live session connection or a user connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushKey {
    Session(i64),
    User(i64),
}

impl fmt::Display for PushKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushKey::Session(id) => write!(f, "session:{id}"),
            PushKey::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// A delivery-ready message on the response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseMessage {
    AiResponse {
        session_id: i64,
        message: String,
        current_state: SessionState,
    },
    ProcessingStatus {
        session_id: i64,
        status: String,
        detail: String,
    },
    SessionState {
        session_id: i64,
        state: SessionState,
        chat_enabled: bool,
    },
    UserNotification {
        user_id: i64,
        message: String,
        notification_type: String,
    },
}

impl ResponseMessage {
    pub fn topic(&self) -> ResponseTopic {
        match self {
            ResponseMessage::AiResponse { .. } => ResponseTopic::AiResponse,
            ResponseMessage::ProcessingStatus { .. } => ResponseTopic::ProcessingStatus,
            ResponseMessage::SessionState { .. } => ResponseTopic::SessionState,
            ResponseMessage::UserNotification { .. } => ResponseTopic::UserNotification,
        }
    }

    pub fn priority(&self) -> Priority {
        self.topic().priority()
    }

    pub fn push_key(&self) -> PushKey {
        match self {
            ResponseMessage::AiResponse { session_id, .. }
            | ResponseMessage::ProcessingStatus { session_id, .. }
            | ResponseMessage::SessionState { session_id, .. } => PushKey::Session(*session_id),
            ResponseMessage::UserNotification { user_id, .. } => PushKey::User(*user_id),
        }
    }

    /// Builds the envelope payload.
    pub fn to_payload(&self) -> Payload {
        let body = match self {
            ResponseMessage::AiResponse {
                session_id,
                message,
                current_state,
            } => json!({
                "sessionId": session_id,
                "message": message,
                "currentState": current_state,
            }),
            ResponseMessage::ProcessingStatus {
                session_id,
                status,
                detail,
            } => json!({ "sessionId": session_id, "status": status, "progress": detail }),
            ResponseMessage::SessionState {
                session_id,
                state,
                chat_enabled,
            } => json!({
                "sessionId": session_id,
                "currentState": state,
                "chatInputEnabled": chat_enabled,
            }),
            ResponseMessage::UserNotification {
                user_id,
                message,
                notification_type,
            } => json!({
                "userId": user_id,
                "message": message,
                "notificationType": notification_type,
            }),
        };
        match body {
            Value::Object(map) => map,
            _ => Payload::new(),
        }
    }

    /// Decodes a response payload.
    pub fn decode(topic: ResponseTopic, payload: &Payload) -> Result<Self, ProcessingError> {
        let fields = Fields {
            topic: topic.as_str(),
            payload,
        };
        let state = |key: &'static str| {
            optional_text(payload, key)
                .and_then(|s| SessionState::parse(&s))
                .ok_or_else(|| ProcessingError::validation(topic.as_str(), key))
        };

        match topic {
            ResponseTopic::AiResponse => Ok(ResponseMessage::AiResponse {
                session_id: fields.long("sessionId")?,
                message: fields.text("message")?,
                current_state: state("currentState")?,
            }),
            ResponseTopic::ProcessingStatus => Ok(ResponseMessage::ProcessingStatus {
                session_id: fields.long("sessionId")?,
                status: fields.text("status")?,
                detail: optional_text(payload, "progress").unwrap_or_default(),
            }),
            ResponseTopic::SessionState => Ok(ResponseMessage::SessionState {
                session_id: fields.long("sessionId")?,
                state: state("currentState")?,
                chat_enabled: payload
                    .get("chatInputEnabled")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            ResponseTopic::UserNotification => Ok(ResponseMessage::UserNotification {
                user_id: fields.long("userId")?,
                message: fields.text("message")?,
                notification_type: optional_text(payload, "notificationType")
                    .unwrap_or_else(|| "info".to_string()),
            }),
        }
    }

    /// The JSON body pushed to the client.
    pub fn client_body(&self, sent_at: DateTime<Utc>) -> Value {
        let timestamp = sent_at.timestamp_millis();
        match self {
            ResponseMessage::AiResponse {
                session_id,
                message,
                current_state,
            } => json!({
                "type": "ai_response",
                "sessionId": session_id,
                "message": message,
                "currentState": current_state,
                "chatInputEnabled": current_state.allows_chat_input(),
                "timestamp": timestamp,
            }),
            ResponseMessage::ProcessingStatus {
                session_id,
                status,
                detail,
            } => json!({
                "type": "ai_processing_status",
                "sessionId": session_id,
                "status": status,
                "progress": detail,
                "timestamp": timestamp,
            }),
            ResponseMessage::SessionState {
                session_id,
                state,
                chat_enabled,
            } => json!({
                "type": "session_state_update",
                "sessionId": session_id,
                "currentState": state,
                "chatInputEnabled": chat_enabled,
                "timestamp": timestamp,
            }),
            ResponseMessage::UserNotification {
                user_id,
                message,
                notification_type,
            } => json!({
                "type": "notification",
                "userId": user_id,
                "message": message,
                "notificationType": notification_type,
                "timestamp": timestamp,
            }),
        }
    }
}
