//! Best-effort analytics ledger.
//!
//! Every ingested post is copied to the ledger after it is indexed. Failures
//! here never reach the client; the pipeline logs and counts them. Whether the
//! ledger is live is decided at startup from configuration.

use crate::config::LedgerConfig;
use crate::model::{MediaKind, Post, PostId};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to create producer: {0}")]
    CreationError(String),

    #[error("Failed to serialize entry: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Failed to send entry to topic {topic}: {message}")]
    SendError { topic: String, message: String },
}

/// One ledger row: the columns the offline analysis dump reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub post_id: String,
    pub user: String,
    pub message: String,
    pub lat: f64,
    pub lon: f64,
    pub media_kind: MediaKind,
    pub score: f64,
}

impl LedgerEntry {
    pub fn new(id: &PostId, post: &Post) -> Self {
        Self {
            post_id: id.to_string(),
            user: post.author.clone(),
            message: post.message.clone(),
            lat: post.location.lat,
            lon: post.location.lon,
            media_kind: post.media_kind,
            score: post.score,
        }
    }
}

/// Secondary analytics sink
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;
}

/// Ledger used when the feature is switched off
pub struct NoopLedger;

#[async_trait]
impl Ledger for NoopLedger {
    async fn record(&self, _entry: &LedgerEntry) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Ledger that produces JSON entries to a Kafka topic, keyed by post id
pub struct KafkaLedger {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaLedger {
    pub fn new(config: &LedgerConfig) -> Result<Self, LedgerError> {
        info!(
            bootstrap_servers = %config.bootstrap_servers,
            topic = %config.topic,
            "Creating Kafka ledger producer"
        );

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("message.timeout.ms", config.timeout_ms.to_string())
            .create()
            .map_err(|e| LedgerError::CreationError(e.to_string()))?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }
}

#[async_trait]
impl Ledger for KafkaLedger {
    #[instrument(skip(self, entry), fields(topic = %self.topic, post_id = %entry.post_id))]
    async fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let payload = serde_json::to_vec(entry)?;
        let record = FutureRecord::to(&self.topic)
            .key(&entry.post_id)
            .payload(&payload);

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _)| LedgerError::SendError {
                topic: self.topic.clone(),
                message: e.to_string(),
            })?;

        debug!(partition, offset, "Ledger entry delivered");
        Ok(())
    }
}

impl Drop for KafkaLedger {
    fn drop(&mut self) {
        info!("Shutting down Kafka ledger producer");
        if let Err(e) = self.producer.flush(Timeout::After(Duration::from_secs(5))) {
            warn!("Failed to flush ledger producer on shutdown: {}", e);
        }
    }
}

/// Pick the ledger implementation for this deployment
pub fn from_config(config: &LedgerConfig) -> Result<Arc<dyn Ledger>, LedgerError> {
    if config.enabled {
        Ok(Arc::new(KafkaLedger::new(config)?))
    } else {
        info!("Analytics ledger disabled");
        Ok(Arc::new(NoopLedger))
    }
}
