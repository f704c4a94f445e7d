//! AI request handling.
//!
//! `MessageProcessor` decodes a request envelope into an [`AiRequest`] and
//! runs the matching handler. Session-facing handlers always leave the
//! client with something to show: on failure they enqueue a fallback chat
//! message with input re-enabled, then return the error so the retry policy
//! still applies.
//!
//! State changes and their client pushes are separate calls with no
//! transaction around them; a failure between the two leaves the session
//! advanced without the client being told.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::services::{ChatService, EmbeddingCache, Question, SessionService};
use crate::error::ProcessingError;
use crate::queue::topics::optional_long;
use crate::queue::{AiRequest, EmbeddingItem, Envelope, RequestTopic, ResponseEnqueuer, SessionState};
use crate::scheduler::MessageHandler;

const QUESTION_FALLBACK: &str = "The AI could not prepare the question right now. Please try again shortly.";
const FEEDBACK_FALLBACK: &str = "The AI could not respond right now. Please try again shortly.";
const FINAL_FALLBACK: &str = "Thank you for taking part in this interview! The AI evaluation is \
     unavailable right now, but your effort is appreciated. Good luck with your job search!";
const DEFAULT_FINAL_EVALUATION: &str = "Thank you for completing the interview! You showed a solid \
     technical foundation. Keep learning and practicing, and good luck with your job search!";
const QUESTION_NOT_FOUND: &str = "Sorry, the question could not be loaded.";
const NEXT_QUESTION_NOT_FOUND: &str = "Sorry, the next question could not be loaded.";

/// Processing-status values pushed while work is underway.
pub const STATUS_GENERATING: &str = "generating";
pub const STATUS_EVALUATING: &str = "evaluating";
pub const STATUS_SIMILARITY_CHECKED: &str = "similarity_checked";

fn default_opening(question: &Question) -> String {
    format!(
        "The interview starts now. Please answer the following question:\n\n{}",
        question.text
    )
}

/// Handles envelopes from the request stream.
pub struct MessageProcessor {
    chat: Arc<dyn ChatService>,
    sessions: Arc<dyn SessionService>,
    embeddings: Arc<dyn EmbeddingCache>,
    responses: ResponseEnqueuer,
}

impl MessageProcessor {
    pub fn new(
        chat: Arc<dyn ChatService>,
        sessions: Arc<dyn SessionService>,
        embeddings: Arc<dyn EmbeddingCache>,
        responses: ResponseEnqueuer,
    ) -> Self {
        Self {
            chat,
            sessions,
            embeddings,
            responses,
        }
    }

    /// Runs the handler for a decoded request.
    pub async fn process(&self, request: AiRequest) -> Result<(), ProcessingError> {
        match request {
            AiRequest::QuestionGeneration {
                session_id,
                question_id,
            } => {
                let result = self.opening_question(session_id, question_id).await;
                if let Err(e) = &result {
                    error!(session_id, question_id, error = %e, "Opening question generation failed");
                    self.send_fallback(RequestTopic::QuestionGeneration, session_id)
                        .await;
                }
                result
            }
            AiRequest::FeedbackGeneration {
                session_id,
                current_question_id,
                user_answer,
                next_question_id,
            } => {
                let result = self
                    .feedback(session_id, current_question_id, &user_answer, next_question_id)
                    .await;
                if let Err(e) = &result {
                    error!(session_id, current_question_id, error = %e, "Feedback generation failed");
                    self.send_fallback(RequestTopic::FeedbackGeneration, session_id)
                        .await;
                }
                result
            }
            AiRequest::FinalEvaluation {
                session_id,
                last_answer,
            } => {
                let result = self.final_evaluation(session_id, &last_answer).await;
                if let Err(e) = &result {
                    error!(session_id, error = %e, "Final evaluation failed");
                    self.send_fallback(RequestTopic::FinalEvaluation, session_id)
                        .await;
                }
                result
            }
            AiRequest::SingleEmbedding {
                text,
                cache_key,
                context,
            } => {
                self.embeddings
                    .calculate_and_cache(&text, &cache_key, &context)
                    .await?;
                debug!(cache_key = %cache_key, "Embedding cached");
                Ok(())
            }
            AiRequest::BatchEmbedding { batch_id, items } => self.batch_embedding(&batch_id, &items).await,
            AiRequest::SimilarityCheck {
                session_id,
                question_id,
                user_answer,
            } => {
                let similar = self
                    .embeddings
                    .check_answer_similarity(session_id, question_id, &user_answer)
                    .await?;
                debug!(session_id, question_id, similar, "Answer similarity checked");
                self.responses
                    .send_processing_status(
                        session_id,
                        STATUS_SIMILARITY_CHECKED,
                        if similar { "match" } else { "no_match" },
                    )
                    .await?;
                Ok(())
            }
        }
    }

    async fn opening_question(&self, session_id: i64, question_id: i64) -> Result<(), ProcessingError> {
        self.responses
            .send_processing_status(
                session_id,
                STATUS_GENERATING,
                "AI is preparing the opening question...",
            )
            .await?;

        let Some(question) = self.chat.fetch_question(question_id).await? else {
            // Retrying cannot make the question appear.
            error!(session_id, question_id, "Question not found");
            self.responses
                .send_ai_response(session_id, QUESTION_NOT_FOUND, SessionState::Error)
                .await?;
            self.responses
                .send_session_state(session_id, SessionState::Error, false)
                .await?;
            return Ok(());
        };

        let mut message = self.chat.generate_opening_message(&question).await?;
        if message.trim().is_empty() {
            warn!(session_id, question_id, "Empty opening message, using default");
            message = default_opening(&question);
        }

        self.chat.save_ai_message(session_id, &message).await?;
        self.responses
            .send_ai_response(session_id, &message, SessionState::WaitingForUserAnswer)
            .await?;
        self.responses
            .send_session_state(session_id, SessionState::WaitingForUserAnswer, true)
            .await?;

        info!(
            session_id,
            question_id,
            response_len = message.len(),
            "Opening question generated"
        );
        Ok(())
    }

    async fn feedback(
        &self,
        session_id: i64,
        current_question_id: i64,
        user_answer: &str,
        next_question_id: Option<i64>,
    ) -> Result<(), ProcessingError> {
        self.responses
            .send_processing_status(session_id, STATUS_GENERATING, "AI is generating feedback...")
            .await?;

        let (message, state, chat_enabled) = match next_question_id {
            Some(next_id) => {
                let Some(next_question) = self.chat.fetch_question(next_id).await? else {
                    error!(session_id, next_question_id = next_id, "Next question not found");
                    self.responses
                        .send_ai_response(session_id, NEXT_QUESTION_NOT_FOUND, SessionState::Error)
                        .await?;
                    return Ok(());
                };

                let message = self
                    .chat
                    .generate_feedback_with_next_question(user_answer, current_question_id, &next_question)
                    .await?;
                self.sessions.move_to_next_question(session_id).await?;
                self.sessions.increment_completed_questions(session_id).await?;
                (message, SessionState::WaitingForUserAnswer, true)
            }
            None => {
                let message = self
                    .chat
                    .generate_final_feedback(session_id, user_answer, Some(current_question_id))
                    .await?;
                self.sessions.end_session(session_id).await?;
                (message, SessionState::InterviewCompleted, false)
            }
        };

        self.chat.save_ai_message(session_id, &message).await?;
        self.responses
            .send_ai_response(session_id, &message, state)
            .await?;
        self.responses
            .send_session_state(session_id, state, chat_enabled)
            .await?;

        info!(
            session_id,
            current_question_id,
            has_next = next_question_id.is_some(),
            "Feedback generated"
        );
        Ok(())
    }

    async fn final_evaluation(&self, session_id: i64, last_answer: &str) -> Result<(), ProcessingError> {
        self.responses
            .send_processing_status(
                session_id,
                STATUS_EVALUATING,
                "AI is writing the final evaluation...",
            )
            .await?;

        let last_question_id = self.sessions.previous_question_id(session_id).await?;
        let mut evaluation = self
            .chat
            .generate_final_feedback(session_id, last_answer, last_question_id)
            .await?;
        if evaluation.trim().is_empty() {
            warn!(session_id, "Empty final evaluation, using default");
            evaluation = DEFAULT_FINAL_EVALUATION.to_string();
        }

        self.chat.save_ai_message(session_id, &evaluation).await?;
        self.sessions.end_session(session_id).await?;
        self.responses
            .send_ai_response(session_id, &evaluation, SessionState::InterviewCompleted)
            .await?;
        self.responses
            .send_session_state(session_id, SessionState::InterviewCompleted, false)
            .await?;

        info!(
            session_id,
            evaluation_len = evaluation.len(),
            "Final evaluation generated"
        );
        Ok(())
    }

    async fn batch_embedding(&self, batch_id: &str, items: &[EmbeddingItem]) -> Result<(), ProcessingError> {
        if items.is_empty() {
            debug!(batch_id, "Empty embedding batch");
            return Ok(());
        }
        let cached = self.embeddings.batch_calculate(items).await?;
        info!(batch_id, size = items.len(), cached, "Embedding batch cached");
        Ok(())
    }

    /// Enqueues the degraded message for a failed session-facing request.
    ///
    /// Best effort: enqueue failures are logged and otherwise ignored.
    async fn send_fallback(&self, topic: RequestTopic, session_id: i64) {
        let (message, state, chat_enabled) = match topic {
            RequestTopic::QuestionGeneration => {
                (QUESTION_FALLBACK, SessionState::WaitingForUserAnswer, true)
            }
            RequestTopic::FeedbackGeneration => {
                (FEEDBACK_FALLBACK, SessionState::WaitingForUserAnswer, true)
            }
            RequestTopic::FinalEvaluation => (FINAL_FALLBACK, SessionState::InterviewCompleted, false),
            RequestTopic::EmbeddingCalculation => return,
        };

        // Chat input reflects the state below; the chat line itself is an error notice.
        let shown_state = if topic == RequestTopic::FinalEvaluation {
            SessionState::InterviewCompleted
        } else {
            SessionState::Error
        };

        if let Err(e) = self
            .responses
            .send_ai_response(session_id, message, shown_state)
            .await
        {
            error!(session_id, error = %e, "Failed to enqueue fallback message");
        }
        if let Err(e) = self
            .responses
            .send_session_state(session_id, state, chat_enabled)
            .await
        {
            error!(session_id, error = %e, "Failed to enqueue fallback state");
        }

        if topic == RequestTopic::FinalEvaluation {
            if let Err(e) = self.sessions.end_session(session_id).await {
                error!(session_id, error = %e, "Failed to end session after evaluation failure");
            }
        }
    }
}

#[async_trait]
impl MessageHandler for MessageProcessor {
    async fn handle(&self, envelope: &Envelope) -> Result<(), ProcessingError> {
        let topic = RequestTopic::parse(&envelope.topic)
            .ok_or_else(|| ProcessingError::UnknownTopic(envelope.topic.clone()))?;

        debug!(
            topic = %topic,
            message_id = %envelope.message_id,
            retry_count = envelope.retry_count,
            "Processing AI request"
        );

        let request = match AiRequest::decode(topic, &envelope.payload) {
            Ok(request) => request,
            Err(e) => {
                if !e.is_unroutable() {
                    if let Some(session_id) = optional_long(&envelope.payload, "sessionId") {
                        self.send_fallback(topic, session_id).await;
                    }
                }
                return Err(e);
            }
        };

        self.process(request).await
    }
}
