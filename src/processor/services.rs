//! Downstream services invoked by the message processor.
//!
//! They belong to the surrounding application and are only consumed here as
//! request/response black boxes that may fail.

use async_trait::async_trait;

use crate::error::CollaboratorError;
use crate::queue::EmbeddingItem;

/// An interview question as needed for prompt building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: i64,
    pub text: String,
}

impl Question {
    pub fn new(id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// Chat orchestration: text generation and conversation persistence.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Loads a question; `Ok(None)` if it does not exist.
    async fn fetch_question(&self, question_id: i64) -> Result<Option<Question>, CollaboratorError>;

    async fn generate_opening_message(&self, question: &Question)
        -> Result<String, CollaboratorError>;

    async fn generate_feedback_with_next_question(
        &self,
        user_answer: &str,
        previous_question_id: i64,
        next_question: &Question,
    ) -> Result<String, CollaboratorError>;

    async fn generate_final_feedback(
        &self,
        session_id: i64,
        last_answer: &str,
        last_question_id: Option<i64>,
    ) -> Result<String, CollaboratorError>;

    /// Persists an AI message in the session transcript.
    async fn save_ai_message(&self, session_id: i64, content: &str)
        -> Result<(), CollaboratorError>;
}

/// Interview session state transitions.
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn move_to_next_question(&self, session_id: i64) -> Result<(), CollaboratorError>;

    async fn increment_completed_questions(&self, session_id: i64)
        -> Result<(), CollaboratorError>;

    async fn end_session(&self, session_id: i64) -> Result<(), CollaboratorError>;

    /// The question answered last, if any.
    async fn previous_question_id(&self, session_id: i64)
        -> Result<Option<i64>, CollaboratorError>;
}

/// Embedding-backed semantic cache.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    async fn calculate_and_cache(
        &self,
        text: &str,
        cache_key: &str,
        context: &str,
    ) -> Result<(), CollaboratorError>;

    /// Embeds and caches every item; returns how many were cached.
    async fn batch_calculate(&self, items: &[EmbeddingItem]) -> Result<usize, CollaboratorError>;

    /// Whether the answer is close enough to a cached reference answer.
    async fn check_answer_similarity(
        &self,
        session_id: i64,
        question_id: i64,
        user_answer: &str,
    ) -> Result<bool, CollaboratorError>;
}
