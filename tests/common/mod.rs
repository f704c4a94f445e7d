//! Shared fakes for the pipeline integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use interview_queue::config::{LaneSettings, LanesConfig, MonitorConfig};
use interview_queue::delivery::PushChannel;
use interview_queue::processor::{ChatService, EmbeddingCache, Question, SessionService};
use interview_queue::queue::{EmbeddingItem, PushKey};
use interview_queue::stream::MemoryLogStore;
use interview_queue::{CollaboratorError, Collaborators, PushError, QueueConfig, QueuePipeline};

/// Chat service whose generation calls fail a fixed number of times.
#[derive(Default)]
pub struct ScriptedChat {
    failures_left: AtomicUsize,
    always_fail: bool,
    pub generations: AtomicUsize,
    pub saved: Mutex<Vec<(i64, String)>>,
}

impl ScriptedChat {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Default::default()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Default::default()
        }
    }

    fn attempt(&self, reply: String) -> Result<String, CollaboratorError> {
        self.generations.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(CollaboratorError::failed("chat", "upstream unavailable"));
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(CollaboratorError::failed("chat", "upstream unavailable"));
        }
        Ok(reply)
    }
}

#[async_trait]
impl ChatService for ScriptedChat {
    async fn fetch_question(&self, question_id: i64) -> Result<Option<Question>, CollaboratorError> {
        Ok(Some(Question::new(question_id, format!("Question {question_id}"))))
    }

    async fn generate_opening_message(&self, question: &Question) -> Result<String, CollaboratorError> {
        self.attempt(format!("Let's begin. {}", question.text))
    }

    async fn generate_feedback_with_next_question(
        &self,
        _user_answer: &str,
        _previous_question_id: i64,
        next_question: &Question,
    ) -> Result<String, CollaboratorError> {
        self.attempt(format!("Nice answer. Next: {}", next_question.text))
    }

    async fn generate_final_feedback(
        &self,
        _session_id: i64,
        _last_answer: &str,
        _last_question_id: Option<i64>,
    ) -> Result<String, CollaboratorError> {
        self.attempt("Thanks for the interview.".to_string())
    }

    async fn save_ai_message(&self, session_id: i64, content: &str) -> Result<(), CollaboratorError> {
        self.saved
            .lock()
            .unwrap()
            .push((session_id, content.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSessions {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SessionService for RecordingSessions {
    async fn move_to_next_question(&self, session_id: i64) -> Result<(), CollaboratorError> {
        self.calls.lock().unwrap().push(format!("next:{session_id}"));
        Ok(())
    }

    async fn increment_completed_questions(&self, session_id: i64) -> Result<(), CollaboratorError> {
        self.calls.lock().unwrap().push(format!("completed:{session_id}"));
        Ok(())
    }

    async fn end_session(&self, session_id: i64) -> Result<(), CollaboratorError> {
        self.calls.lock().unwrap().push(format!("end:{session_id}"));
        Ok(())
    }

    async fn previous_question_id(&self, _session_id: i64) -> Result<Option<i64>, CollaboratorError> {
        Ok(None)
    }
}

#[derive(Default)]
pub struct CountingEmbeddings {
    pub cached: AtomicUsize,
}

#[async_trait]
impl EmbeddingCache for CountingEmbeddings {
    async fn calculate_and_cache(&self, _: &str, _: &str, _: &str) -> Result<(), CollaboratorError> {
        self.cached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn batch_calculate(&self, items: &[EmbeddingItem]) -> Result<usize, CollaboratorError> {
        self.cached.fetch_add(items.len(), Ordering::SeqCst);
        Ok(items.len())
    }

    async fn check_answer_similarity(&self, _: i64, _: i64, _: &str) -> Result<bool, CollaboratorError> {
        Ok(false)
    }
}

/// Push channel with a fixed set of live keys.
#[derive(Default)]
pub struct RecordingPush {
    pub online: Mutex<Vec<PushKey>>,
    pub sent: Mutex<Vec<(PushKey, serde_json::Value)>>,
}

impl RecordingPush {
    pub fn with_online(keys: &[PushKey]) -> Self {
        Self {
            online: Mutex::new(keys.to_vec()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_types(&self, key: PushKey) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, body)| body["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl PushChannel for RecordingPush {
    async fn send(&self, key: &PushKey, message: &str) -> Result<bool, PushError> {
        if !self.online.lock().unwrap().contains(key) {
            return Ok(false);
        }
        let body: serde_json::Value = serde_json::from_str(message)?;
        self.sent.lock().unwrap().push((*key, body));
        Ok(true)
    }
}

pub struct Harness {
    pub store: Arc<MemoryLogStore>,
    pub chat: Arc<ScriptedChat>,
    pub sessions: Arc<RecordingSessions>,
    pub embeddings: Arc<CountingEmbeddings>,
    pub push: Arc<RecordingPush>,
    pub pipeline: QueuePipeline,
}

/// Fast lanes, short reads and millisecond backoff.
pub fn fast_config() -> QueueConfig {
    let lanes = LanesConfig::uniform(LaneSettings::new(10, 5));
    QueueConfig::default()
        .with_block_timeout(Duration::from_millis(20))
        .with_retry_delays(Duration::from_millis(1), Duration::from_millis(5))
        .with_request_lanes(lanes)
        .with_response_lanes(lanes)
        .with_shutdown_timeout(Duration::from_secs(5))
        .with_monitor(MonitorConfig {
            group_check_interval_secs: 1,
            ..Default::default()
        })
}

pub fn harness(config: QueueConfig, chat: ScriptedChat, push: RecordingPush) -> Harness {
    let store = Arc::new(MemoryLogStore::new());
    let chat = Arc::new(chat);
    let sessions = Arc::new(RecordingSessions::default());
    let embeddings = Arc::new(CountingEmbeddings::default());
    let push = Arc::new(push);
    let pipeline = QueuePipeline::new(
        config,
        store.clone(),
        Collaborators {
            chat: chat.clone(),
            sessions: sessions.clone(),
            embeddings: embeddings.clone(),
            push: push.clone(),
        },
    )
    .expect("valid pipeline");
    Harness {
        store,
        chat,
        sessions,
        embeddings,
        push,
        pipeline,
    }
}

/// Polls `check` until it holds, failing the test after `timeout`.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within {timeout:?}");
}
