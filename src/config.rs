//! Queue pipeline configuration.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `QUEUE_*` environment variables (plus `REDIS_URL`), then validation.
//!
//! ```yaml
//! redis_url: redis://localhost:6379
//! streams:
//!   requests: ai:requests
//!   responses: ai:responses
//! processors:
//!   workers: 5
//!   max_retries: 3
//! topics:
//!   final_evaluation: false
//! ```
//!
//! A lane table (`request_lanes`, `response_lanes`) is replaced as a whole,
//! so all three priorities must be given when one is overridden.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::{Priority, RequestTopic};
use crate::stream::GroupStart;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading a configuration file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("Invalid configuration file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Stream names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    pub requests: String,
    pub responses: String,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            requests: "ai:requests".to_string(),
            responses: "ai:responses".to_string(),
        }
    }
}

/// Request-side consumer group settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub group: String,
    pub consumer_name: String,
    /// How long one read waits for new records.
    pub block_timeout_ms: u64,
    /// Where a freshly created group starts reading.
    pub group_start: GroupStart,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: "ai-service-group".to_string(),
            consumer_name: "ai-consumer".to_string(),
            block_timeout_ms: 2000,
            group_start: GroupStart::Latest,
        }
    }
}

/// Response-side delivery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseDeliveryConfig {
    /// When disabled, no response dispatcher is started.
    pub enabled: bool,
    pub group: String,
    pub consumer_name: String,
}

impl Default for ResponseDeliveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group: "websocket-response-group".to_string(),
            consumer_name: "ws-consumer".to_string(),
        }
    }
}

/// Worker pool and retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Concurrent AI handlers.
    pub workers: usize,
    /// Tasks admitted beyond `workers` before dispatch is rejected.
    pub queue_capacity: usize,
    /// Concurrent push deliveries.
    pub push_workers: usize,
    /// Total delivery attempts per message.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 20,
            push_workers: 4,
            max_retries: 3,
            retry_base_delay_ms: 5000,
            retry_max_delay_ms: 60_000,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Per-topic enablement flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub question_generation: bool,
    pub feedback_generation: bool,
    pub embedding_calculation: bool,
    pub final_evaluation: bool,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            question_generation: true,
            feedback_generation: true,
            embedding_calculation: true,
            final_evaluation: true,
        }
    }
}

impl TopicsConfig {
    pub fn is_enabled(&self, topic: RequestTopic) -> bool {
        match topic {
            RequestTopic::QuestionGeneration => self.question_generation,
            RequestTopic::FeedbackGeneration => self.feedback_generation,
            RequestTopic::EmbeddingCalculation => self.embedding_calculation,
            RequestTopic::FinalEvaluation => self.final_evaluation,
        }
    }

    pub fn set(&mut self, topic: RequestTopic, enabled: bool) {
        match topic {
            RequestTopic::QuestionGeneration => self.question_generation = enabled,
            RequestTopic::FeedbackGeneration => self.feedback_generation = enabled,
            RequestTopic::EmbeddingCalculation => self.embedding_calculation = enabled,
            RequestTopic::FinalEvaluation => self.final_evaluation = enabled,
        }
    }
}

/// Cadence of one priority lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneSettings {
    pub interval_ms: u64,
    pub batch_size: usize,
}

impl LaneSettings {
    pub fn new(interval_ms: u64, batch_size: usize) -> Self {
        Self {
            interval_ms,
            batch_size,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Lane cadences of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanesConfig {
    pub high: LaneSettings,
    pub medium: LaneSettings,
    pub low: LaneSettings,
    /// Records a lane may hold parked for another lane; reads shrink once
    /// any lane is at this limit.
    #[serde(default = "default_max_parked")]
    pub max_parked: usize,
}

impl LanesConfig {
    pub fn request_defaults() -> Self {
        Self {
            high: LaneSettings::new(500, 3),
            medium: LaneSettings::new(1000, 5),
            low: LaneSettings::new(2000, 2),
            max_parked: default_max_parked(),
        }
    }

    pub fn response_defaults() -> Self {
        Self {
            high: LaneSettings::new(200, 5),
            medium: LaneSettings::new(500, 8),
            low: LaneSettings::new(1000, 10),
            max_parked: default_max_parked(),
        }
    }

    /// The same cadence on every lane.
    pub fn uniform(settings: LaneSettings) -> Self {
        Self {
            high: settings,
            medium: settings,
            low: settings,
            max_parked: default_max_parked(),
        }
    }

    pub fn with_max_parked(mut self, max_parked: usize) -> Self {
        self.max_parked = max_parked;
        self
    }

    pub fn get(&self, priority: Priority) -> LaneSettings {
        match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

fn default_max_parked() -> usize {
    100
}

fn default_request_lanes() -> LanesConfig {
    LanesConfig::request_defaults()
}

fn default_response_lanes() -> LanesConfig {
    LanesConfig::response_defaults()
}

/// Monitor duty schedules and retention bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub depth_interval_secs: u64,
    /// Depth above which a backlog warning is logged.
    pub depth_threshold: u64,
    pub trim_interval_secs: u64,
    pub request_max_len: u64,
    pub response_max_len: u64,
    /// Records older than this are eligible for trimming.
    pub max_age_secs: u64,
    pub group_check_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            depth_interval_secs: 60,
            depth_threshold: 100,
            trim_interval_secs: 3600,
            request_max_len: 1000,
            response_max_len: 500,
            max_age_secs: 6 * 3600,
            group_check_interval_secs: 300,
        }
    }
}

/// Configuration of the whole queue pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub redis_url: String,
    /// Master switch; when off every enqueue is a no-op.
    pub enabled: bool,
    pub streams: StreamsConfig,
    pub consumer: ConsumerConfig,
    pub responses: ResponseDeliveryConfig,
    pub processors: ProcessorConfig,
    pub topics: TopicsConfig,
    #[serde(default = "default_request_lanes")]
    pub request_lanes: LanesConfig,
    #[serde(default = "default_response_lanes")]
    pub response_lanes: LanesConfig,
    pub monitor: MonitorConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            enabled: true,
            streams: StreamsConfig::default(),
            consumer: ConsumerConfig::default(),
            responses: ResponseDeliveryConfig::default(),
            processors: ProcessorConfig::default(),
            topics: TopicsConfig::default(),
            request_lanes: LanesConfig::request_defaults(),
            response_lanes: LanesConfig::response_defaults(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from an optional YAML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, an
    /// environment variable is malformed, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML file; missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Creates configuration from defaults and environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: log store connection URL
    /// - `QUEUE_ENABLED`: master enqueue switch
    /// - `QUEUE_REQUEST_STREAM` / `QUEUE_RESPONSE_STREAM`: stream names
    /// - `QUEUE_GROUP` / `QUEUE_CONSUMER`: request consumer group and name
    /// - `QUEUE_BLOCK_TIMEOUT_MS`: read block timeout
    /// - `QUEUE_WORKERS` / `QUEUE_CAPACITY` / `QUEUE_PUSH_WORKERS`: pool sizes
    /// - `QUEUE_MAX_RETRIES`: delivery attempts per message
    /// - `QUEUE_RETRY_BASE_DELAY_MS` / `QUEUE_RETRY_MAX_DELAY_MS`: backoff bounds
    /// - `QUEUE_TOPIC_QUESTION_GENERATION`, `QUEUE_TOPIC_FEEDBACK_GENERATION`,
    ///   `QUEUE_TOPIC_EMBEDDING_CALCULATION`, `QUEUE_TOPIC_FINAL_EVALUATION`:
    ///   per-topic flags
    /// - `QUEUE_MONITOR_ENABLED`, `QUEUE_DEPTH_THRESHOLD`, `QUEUE_MAX_AGE_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("REDIS_URL") {
            self.redis_url = val;
        }
        if let Some(val) = lookup("QUEUE_ENABLED") {
            self.enabled = parse_env_bool(&val, "QUEUE_ENABLED")?;
        }

        if let Some(val) = lookup("QUEUE_REQUEST_STREAM") {
            self.streams.requests = val;
        }
        if let Some(val) = lookup("QUEUE_RESPONSE_STREAM") {
            self.streams.responses = val;
        }

        if let Some(val) = lookup("QUEUE_GROUP") {
            self.consumer.group = val;
        }
        if let Some(val) = lookup("QUEUE_CONSUMER") {
            self.consumer.consumer_name = val;
        }
        if let Some(val) = lookup("QUEUE_BLOCK_TIMEOUT_MS") {
            self.consumer.block_timeout_ms = parse_env_value(&val, "QUEUE_BLOCK_TIMEOUT_MS")?;
        }

        if let Some(val) = lookup("QUEUE_WORKERS") {
            self.processors.workers = parse_env_value(&val, "QUEUE_WORKERS")?;
        }
        if let Some(val) = lookup("QUEUE_CAPACITY") {
            self.processors.queue_capacity = parse_env_value(&val, "QUEUE_CAPACITY")?;
        }
        if let Some(val) = lookup("QUEUE_PUSH_WORKERS") {
            self.processors.push_workers = parse_env_value(&val, "QUEUE_PUSH_WORKERS")?;
        }
        if let Some(val) = lookup("QUEUE_MAX_RETRIES") {
            self.processors.max_retries = parse_env_value(&val, "QUEUE_MAX_RETRIES")?;
        }
        if let Some(val) = lookup("QUEUE_RETRY_BASE_DELAY_MS") {
            self.processors.retry_base_delay_ms =
                parse_env_value(&val, "QUEUE_RETRY_BASE_DELAY_MS")?;
        }
        if let Some(val) = lookup("QUEUE_RETRY_MAX_DELAY_MS") {
            self.processors.retry_max_delay_ms = parse_env_value(&val, "QUEUE_RETRY_MAX_DELAY_MS")?;
        }

        for (key, topic) in [
            ("QUEUE_TOPIC_QUESTION_GENERATION", RequestTopic::QuestionGeneration),
            ("QUEUE_TOPIC_FEEDBACK_GENERATION", RequestTopic::FeedbackGeneration),
            ("QUEUE_TOPIC_EMBEDDING_CALCULATION", RequestTopic::EmbeddingCalculation),
            ("QUEUE_TOPIC_FINAL_EVALUATION", RequestTopic::FinalEvaluation),
        ] {
            if let Some(val) = lookup(key) {
                self.topics.set(topic, parse_env_bool(&val, key)?);
            }
        }

        if let Some(val) = lookup("QUEUE_MONITOR_ENABLED") {
            self.monitor.enabled = parse_env_bool(&val, "QUEUE_MONITOR_ENABLED")?;
        }
        if let Some(val) = lookup("QUEUE_DEPTH_THRESHOLD") {
            self.monitor.depth_threshold = parse_env_value(&val, "QUEUE_DEPTH_THRESHOLD")?;
        }
        if let Some(val) = lookup("QUEUE_MAX_AGE_SECS") {
            self.monitor.max_age_secs = parse_env_value(&val, "QUEUE_MAX_AGE_SECS")?;
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn fail(message: &str) -> Result<(), ConfigError> {
            Err(ConfigError::ValidationFailed(message.to_string()))
        }

        if self.redis_url.is_empty() {
            return fail("redis_url cannot be empty");
        }
        if self.streams.requests.is_empty() || self.streams.responses.is_empty() {
            return fail("stream names cannot be empty");
        }
        if self.streams.requests == self.streams.responses {
            return fail("request and response streams must be distinct");
        }
        if self.consumer.group.is_empty() || self.responses.group.is_empty() {
            return fail("consumer group names cannot be empty");
        }
        if self.consumer.consumer_name.is_empty() || self.responses.consumer_name.is_empty() {
            return fail("consumer names cannot be empty");
        }

        if self.processors.workers == 0 {
            return fail("workers must be greater than 0");
        }
        if self.processors.push_workers == 0 {
            return fail("push_workers must be greater than 0");
        }
        if self.processors.max_retries == 0 {
            return fail("max_retries must be at least 1");
        }
        if self.processors.retry_base_delay_ms > self.processors.retry_max_delay_ms {
            return fail("retry_base_delay_ms cannot exceed retry_max_delay_ms");
        }

        for (name, lanes) in [
            ("request_lanes", &self.request_lanes),
            ("response_lanes", &self.response_lanes),
        ] {
            if lanes.max_parked == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "{name}.max_parked must be greater than 0"
                )));
            }
            for priority in Priority::ALL {
                let lane = lanes.get(priority);
                if lane.interval_ms == 0 || lane.batch_size == 0 {
                    return Err(ConfigError::ValidationFailed(format!(
                        "{name}.{priority} needs a positive interval and batch size"
                    )));
                }
            }
        }

        if self.monitor.request_max_len == 0 || self.monitor.response_max_len == 0 {
            return fail("stream max lengths must be greater than 0");
        }
        if self.monitor.depth_interval_secs == 0
            || self.monitor.trim_interval_secs == 0
            || self.monitor.group_check_interval_secs == 0
        {
            return fail("monitor intervals must be greater than 0");
        }

        Ok(())
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.consumer.block_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.processors.shutdown_timeout_secs)
    }

    /// Whether enqueue calls for `topic` should append anything.
    pub fn topic_enabled(&self, topic: RequestTopic) -> bool {
        self.enabled && self.topics.is_enabled(topic)
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    pub fn with_streams(mut self, requests: impl Into<String>, responses: impl Into<String>) -> Self {
        self.streams.requests = requests.into();
        self.streams.responses = responses.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.processors.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.processors.queue_capacity = capacity;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.processors.max_retries = max_retries;
        self
    }

    /// Sets the exponential backoff bounds.
    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.processors.retry_base_delay_ms = base.as_millis() as u64;
        self.processors.retry_max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.consumer.block_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_group_start(mut self, start: GroupStart) -> Self {
        self.consumer.group_start = start;
        self
    }

    pub fn with_topic_enabled(mut self, topic: RequestTopic, enabled: bool) -> Self {
        self.topics.set(topic, enabled);
        self
    }

    pub fn with_request_lanes(mut self, lanes: LanesConfig) -> Self {
        self.request_lanes = lanes;
        self
    }

    /// Turns the response stream and its push delivery on or off.
    pub fn with_response_delivery(mut self, enabled: bool) -> Self {
        self.responses.enabled = enabled;
        self
    }

    pub fn with_response_lanes(mut self, lanes: LanesConfig) -> Self {
        self.response_lanes = lanes;
        self
    }

    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.processors.shutdown_timeout_secs = timeout.as_secs();
        self
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.streams.requests, "ai:requests");
        assert_eq!(config.streams.responses, "ai:responses");
        assert_eq!(config.consumer.group, "ai-service-group");
        assert_eq!(config.responses.group, "websocket-response-group");
        assert_eq!(config.processors.max_retries, 3);
        assert_eq!(config.block_timeout(), Duration::from_millis(2000));
        assert_eq!(config.request_lanes.get(Priority::High), LaneSettings::new(500, 3));
        assert_eq!(config.response_lanes.get(Priority::Low), LaneSettings::new(1000, 10));
        assert_eq!(config.monitor.request_max_len, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = QueueConfig::new()
            .with_streams("req", "resp")
            .with_workers(2)
            .with_max_retries(5)
            .with_topic_enabled(RequestTopic::FinalEvaluation, false);

        assert_eq!(config.streams.requests, "req");
        assert_eq!(config.processors.workers, 2);
        assert_eq!(config.processors.max_retries, 5);
        assert!(!config.topic_enabled(RequestTopic::FinalEvaluation));
        assert!(config.topic_enabled(RequestTopic::QuestionGeneration));
    }

    #[test]
    fn test_master_switch_disables_all_topics() {
        let mut config = QueueConfig::default();
        config.enabled = false;
        for topic in RequestTopic::ALL {
            assert!(!config.topic_enabled(topic));
        }
    }

    #[test]
    fn test_validation_failures() {
        let config = QueueConfig::default().with_workers(0);
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(_))));

        let config = QueueConfig::default().with_streams("same", "same");
        assert!(config.validate().is_err());

        let config = QueueConfig::default().with_max_retries(0);
        assert!(config.validate().is_err());

        let mut lanes = LanesConfig::request_defaults();
        lanes.medium.batch_size = 0;
        let config = QueueConfig::default().with_request_lanes(lanes);
        assert!(config.validate().is_err());

        let lanes = LanesConfig::response_defaults().with_max_parked(0);
        let config = QueueConfig::default().with_response_lanes(lanes);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("REDIS_URL", "redis://cache:6380"),
            ("QUEUE_WORKERS", "12"),
            ("QUEUE_TOPIC_EMBEDDING_CALCULATION", "off"),
            ("QUEUE_GROUP", "ai-group-2"),
        ]
        .into_iter()
        .collect();

        let mut config = QueueConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .expect("valid overrides");

        assert_eq!(config.redis_url, "redis://cache:6380");
        assert_eq!(config.processors.workers, 12);
        assert_eq!(config.consumer.group, "ai-group-2");
        assert!(!config.topics.embedding_calculation);
    }

    #[test]
    fn test_env_invalid_value() {
        let mut config = QueueConfig::default();
        let err = config
            .apply_env(|key| (key == "QUEUE_MAX_RETRIES").then(|| "three".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("QUEUE_MAX_RETRIES"));
    }

    #[test]
    fn test_yaml_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "streams:\n  requests: custom:requests\nprocessors:\n  workers: 9\ntopics:\n  final_evaluation: false\nrequest_lanes:\n  high: {{ interval_ms: 100, batch_size: 4 }}\n  medium: {{ interval_ms: 1000, batch_size: 5 }}\n  low: {{ interval_ms: 2000, batch_size: 2 }}"
        )
        .expect("write");

        let config = QueueConfig::from_yaml_file(file.path()).expect("parse");
        assert_eq!(config.streams.requests, "custom:requests");
        assert_eq!(config.streams.responses, "ai:responses");
        assert_eq!(config.processors.workers, 9);
        assert_eq!(config.processors.max_retries, 3);
        assert!(!config.topics.final_evaluation);
        assert!(config.topics.question_generation);
        assert_eq!(config.request_lanes.high, LaneSettings::new(100, 4));
        assert_eq!(config.request_lanes.max_parked, 100);
        assert_eq!(config.response_lanes, LanesConfig::response_defaults());
    }

    #[test]
    fn test_group_start_from_yaml() {
        let config = QueueConfig::from_yaml_str("consumer:\n  group_start: beginning\n")
            .expect("parse");
        assert_eq!(config.consumer.group_start, GroupStart::Beginning);
        assert_eq!(config.consumer.group, "ai-service-group");
    }
}
