//! Assembly of the full queue pipeline.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{ConfigError, QueueConfig};
use crate::delivery::{PushChannel, ResponseDispatcher};
use crate::error::StoreError;
use crate::metrics::init_metrics;
use crate::monitor::StreamMonitor;
use crate::processor::{ChatService, EmbeddingCache, MessageProcessor, SessionService};
use crate::queue::{AckRetryManager, RequestEnqueuer, ResponseEnqueuer, RetryPolicy};
use crate::scheduler::{
    PriorityScheduler, SchedulerConfig, SchedulerError, WorkerPool, WorkerPoolConfig,
};
use crate::stream::{LogStore, RedisLogStore};

/// Errors that can occur while assembling or running the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Log store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// External services the pipeline calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub chat: Arc<dyn ChatService>,
    pub sessions: Arc<dyn SessionService>,
    pub embeddings: Arc<dyn EmbeddingCache>,
    pub push: Arc<dyn PushChannel>,
}

/// Producers, both schedulers and the monitor over one log store.
pub struct QueuePipeline {
    config: QueueConfig,
    store: Arc<dyn LogStore>,
    requests: RequestEnqueuer,
    responses: ResponseEnqueuer,
    processing: PriorityScheduler,
    delivery: Option<PriorityScheduler>,
    monitor: Arc<StreamMonitor>,
}

impl QueuePipeline {
    /// Connects to the Redis server named in the configuration.
    pub async fn connect(config: QueueConfig, collaborators: Collaborators) -> Result<Self, PipelineError> {
        let store = RedisLogStore::connect(&config.redis_url).await?;
        Self::new(config, Arc::new(store), collaborators)
    }

    /// Wires the pipeline over an existing store. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn LogStore>,
        collaborators: Collaborators,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if let Err(e) = init_metrics() {
            warn!(error = %e, "Metrics registration failed, continuing without metrics");
        }

        let policy = RetryPolicy::from_config(&config);
        let requests = RequestEnqueuer::new(Arc::clone(&store), &config);
        let responses = ResponseEnqueuer::new(Arc::clone(&store), &config);

        let processor = MessageProcessor::new(
            collaborators.chat,
            collaborators.sessions,
            collaborators.embeddings,
            responses.clone(),
        );
        let processing_pool = Arc::new(WorkerPool::new(
            WorkerPoolConfig::new("ai-processor", config.processors.workers)
                .with_queue_capacity(config.processors.queue_capacity)
                .with_shutdown_timeout(config.shutdown_timeout()),
        ));
        let processing = PriorityScheduler::new(
            SchedulerConfig {
                stream: config.streams.requests.clone(),
                group: config.consumer.group.clone(),
                consumer: config.consumer.consumer_name.clone(),
                group_start: config.consumer.group_start,
                block_timeout: config.block_timeout(),
                lanes: config.request_lanes,
            },
            Arc::clone(&store),
            Arc::new(processor),
            AckRetryManager::new(
                Arc::clone(&store),
                config.streams.requests.clone(),
                config.consumer.group.clone(),
                policy,
            ),
            processing_pool,
        );

        let delivery = config.responses.enabled.then(|| {
            let push_pool = Arc::new(WorkerPool::new(
                WorkerPoolConfig::new("push-delivery", config.processors.push_workers)
                    .with_queue_capacity(config.processors.queue_capacity)
                    .with_shutdown_timeout(config.shutdown_timeout()),
            ));
            PriorityScheduler::new(
                SchedulerConfig {
                    stream: config.streams.responses.clone(),
                    group: config.responses.group.clone(),
                    consumer: config.responses.consumer_name.clone(),
                    group_start: config.consumer.group_start,
                    block_timeout: config.block_timeout(),
                    lanes: config.response_lanes,
                },
                Arc::clone(&store),
                Arc::new(ResponseDispatcher::new(collaborators.push)),
                AckRetryManager::new(
                    Arc::clone(&store),
                    config.streams.responses.clone(),
                    config.responses.group.clone(),
                    policy,
                ),
                push_pool,
            )
        });

        let monitor = Arc::new(StreamMonitor::new(Arc::clone(&store), config.clone()));

        Ok(Self {
            config,
            store,
            requests,
            responses,
            processing,
            delivery,
            monitor,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// Producer handed to the business layer.
    pub fn requests(&self) -> &RequestEnqueuer {
        &self.requests
    }

    pub fn responses(&self) -> &ResponseEnqueuer {
        &self.responses
    }

    pub fn monitor(&self) -> &Arc<StreamMonitor> {
        &self.monitor
    }

    pub fn processing(&self) -> &PriorityScheduler {
        &self.processing
    }

    pub fn delivery(&self) -> Option<&PriorityScheduler> {
        self.delivery.as_ref()
    }

    /// Creates the consumer groups and starts every loop.
    pub async fn start(&self) -> Result<(), PipelineError> {
        self.processing.start().await?;
        if let Some(delivery) = &self.delivery {
            if let Err(e) = delivery.start().await {
                // Leave nothing half-running.
                if let Err(stop) = self.processing.shutdown().await {
                    error!(error = %stop, "Failed to stop request processing after start failure");
                }
                return Err(e.into());
            }
        }
        self.monitor.start();

        info!(
            requests = %self.config.streams.requests,
            responses = %self.config.streams.responses,
            delivery = self.delivery.is_some(),
            monitor = self.config.monitor.enabled,
            "Queue pipeline started"
        );
        Ok(())
    }

    /// Stops the monitor and both schedulers, draining their pools.
    ///
    /// Both schedulers are always asked to stop; the first error is
    /// returned.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        info!("Shutting down queue pipeline");
        self.monitor.shutdown().await;

        let processing = self.processing.shutdown().await;
        let delivery = match &self.delivery {
            Some(delivery) => delivery.shutdown().await,
            None => Ok(()),
        };

        processing?;
        delivery?;
        info!("Queue pipeline stopped");
        Ok(())
    }
}
