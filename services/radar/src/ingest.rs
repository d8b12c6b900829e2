use crate::blob_store::{content_type_for, BlobStore, BlobStoreError};
use crate::ledger::{Ledger, LedgerEntry};
use crate::media::{self, ImageScorer, ScoringError};
use crate::model::{Location, Post, PostId};
use crate::post_index::{IndexError, PostIndex};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

/// Failure of one ingestion stage; the pipeline stops at the first one
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no media attached")]
    MissingMedia,

    #[error("image analysis failed: {0}")]
    Scoring(#[source] ScoringError),

    #[error("blob upload failed: {0}")]
    BlobStore(#[source] BlobStoreError),

    /// The blob for `id` was written before this failure and is left in place.
    #[error("index write for post {id} failed: {source}")]
    Index {
        id: PostId,
        #[source]
        source: IndexError,
    },
}

impl IngestError {
    /// Stage label used in logs and metrics
    pub fn stage(&self) -> &'static str {
        match self {
            IngestError::MissingMedia => "media",
            IngestError::Scoring(_) => "scoring",
            IngestError::BlobStore(_) => "blob",
            IngestError::Index { .. } => "index",
        }
    }
}

/// Attached media file
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub filename: String,
    pub data: Bytes,
}

/// Fields of a post submission, already extracted from the request
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub location: Location,
    pub message: String,
    pub media: Option<MediaUpload>,
}

/// Parse a coordinate field, falling back to 0.0 when it is missing or malformed
pub fn parse_coordinate(raw: &str) -> f64 {
    raw.parse().unwrap_or(0.0)
}

/// Runs a submission through scoring, blob write, index write and ledger copy
pub struct PostIngestor {
    scorer: Arc<dyn ImageScorer>,
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn PostIndex>,
    ledger: Arc<dyn Ledger>,
}

impl PostIngestor {
    pub fn new(
        scorer: Arc<dyn ImageScorer>,
        blobs: Arc<dyn BlobStore>,
        index: Arc<dyn PostIndex>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        Self {
            scorer,
            blobs,
            index,
            ledger,
        }
    }

    /// Ingest one submission on behalf of `author`.
    ///
    /// The blob write always precedes the index write, and the ledger copy is
    /// spawned only after the index write succeeded.
    #[instrument(skip(self, submission), fields(author = %author))]
    pub async fn ingest(&self, author: &str, submission: Submission) -> Result<PostId, IngestError> {
        let started = Instant::now();
        let result = self.run(author, submission).await;

        match &result {
            Ok(_) => {
                metrics::counter!("radar.posts.ingested").increment(1);
                metrics::histogram!("radar.ingest.duration_seconds")
                    .record(started.elapsed().as_secs_f64());
            }
            Err(e) => {
                metrics::counter!("radar.posts.failed", "stage" => e.stage()).increment(1);
            }
        }

        result
    }

    async fn run(&self, author: &str, submission: Submission) -> Result<PostId, IngestError> {
        let media = submission.media.ok_or(IngestError::MissingMedia)?;
        let id = PostId::generate();

        let extension = media::extension(&media.filename);
        let mut post = Post {
            author: author.to_string(),
            message: submission.message,
            location: submission.location,
            media_url: String::new(),
            media_kind: media::classify(&media.filename),
            score: 0.0,
        };

        if media::should_score(&media.filename) {
            post.score = self
                .scorer
                .score(&media.data)
                .await
                .map_err(IngestError::Scoring)?;
        }

        post.media_url = self
            .blobs
            .put_public(id.as_str(), media.data, content_type_for(extension))
            .await
            .map_err(IngestError::BlobStore)?;

        if let Err(source) = self.index.put(&id, &post).await {
            error!(
                post_id = %id,
                media_url = %post.media_url,
                "Index write failed; blob left orphaned"
            );
            return Err(IngestError::Index { id, source });
        }

        info!(post_id = %id, media_kind = post.media_kind.as_str(), "Post saved");

        let ledger = Arc::clone(&self.ledger);
        let entry = LedgerEntry::new(&id, &post);
        tokio::spawn(async move {
            if let Err(e) = ledger.record(&entry).await {
                metrics::counter!("radar.ledger.failures").increment(1);
                warn!(post_id = %entry.post_id, error = %e, "Ledger write failed");
            }
        });

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerError;
    use crate::media::MockImageScorer;
    use crate::model::MediaKind;
    use crate::post_index::{PostQuery, RawHit};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingBlobs {
        keys: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl BlobStore for RecordingBlobs {
        async fn put_public(
            &self,
            key: &str,
            _data: Bytes,
            _content_type: &str,
        ) -> Result<String, BlobStoreError> {
            if self.fail {
                return Err(BlobStoreError::Upload {
                    key: key.to_string(),
                    message: "bucket missing".to_string(),
                });
            }
            self.keys.lock().unwrap().push(key.to_string());
            Ok(format!("https://media.example.com/{key}"))
        }
    }

    #[derive(Default)]
    struct RecordingIndex {
        posts: Mutex<Vec<(PostId, Post)>>,
        fail: bool,
    }

    #[async_trait]
    impl PostIndex for RecordingIndex {
        async fn put(&self, id: &PostId, post: &Post) -> Result<(), IndexError> {
            if self.fail {
                return Err(IndexError::Rejected {
                    status: 500,
                    body: String::new(),
                });
            }
            self.posts.lock().unwrap().push((id.clone(), post.clone()));
            Ok(())
        }

        async fn query(&self, _query: &PostQuery) -> Result<Vec<RawHit>, IndexError> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<(), IndexError> {
            Ok(())
        }
    }

    struct ChannelLedger {
        tx: mpsc::UnboundedSender<LedgerEntry>,
    }

    #[async_trait]
    impl Ledger for ChannelLedger {
        async fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
            self.tx.send(entry.clone()).ok();
            Ok(())
        }
    }

    struct FailingLedger;

    #[async_trait]
    impl Ledger for FailingLedger {
        async fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
            Err(LedgerError::SendError {
                topic: "post-ledger".to_string(),
                message: format!("broker down for {}", entry.post_id),
            })
        }
    }

    fn submission(filename: &str) -> Submission {
        Submission {
            location: Location::new(37.0, -122.0),
            message: "hi".to_string(),
            media: Some(MediaUpload {
                filename: filename.to_string(),
                data: Bytes::from_static(b"\xff\xd8\xff"),
            }),
        }
    }

    fn unused_scorer() -> Arc<MockImageScorer> {
        let mut scorer = MockImageScorer::new();
        scorer.expect_score().never();
        Arc::new(scorer)
    }

    fn scorer_returning(score: f64) -> Arc<MockImageScorer> {
        let mut scorer = MockImageScorer::new();
        scorer.expect_score().times(1).returning(move |_| Ok(score));
        Arc::new(scorer)
    }

    #[test]
    fn test_parse_coordinate_falls_back_to_zero() {
        assert_eq!(parse_coordinate("37.5"), 37.5);
        assert_eq!(parse_coordinate("-122"), -122.0);
        assert_eq!(parse_coordinate(""), 0.0);
        assert_eq!(parse_coordinate("north"), 0.0);
    }

    #[tokio::test]
    async fn test_jpeg_is_scored_and_indexed() {
        let blobs = Arc::new(RecordingBlobs::default());
        let index = Arc::new(RecordingIndex::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ingestor = PostIngestor::new(
            scorer_returning(0.93),
            blobs.clone(),
            index.clone(),
            Arc::new(ChannelLedger { tx }),
        );

        let id = ingestor.ingest("alice", submission("photo.jpeg")).await.unwrap();

        let posts = index.posts.lock().unwrap().clone();
        assert_eq!(posts.len(), 1);
        let (indexed_id, post) = &posts[0];
        assert_eq!(indexed_id, &id);
        assert_eq!(post.author, "alice");
        assert_eq!(post.media_kind, MediaKind::Image);
        assert_eq!(post.score, 0.93);
        assert_eq!(post.media_url, format!("https://media.example.com/{id}"));
        assert_eq!(blobs.keys.lock().unwrap().as_slice(), [id.to_string()]);

        let entry = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.post_id, id.to_string());
        assert_eq!(entry.user, "alice");
    }

    #[tokio::test]
    async fn test_png_is_not_scored() {
        let index = Arc::new(RecordingIndex::default());
        let ingestor = PostIngestor::new(
            unused_scorer(),
            Arc::new(RecordingBlobs::default()),
            index.clone(),
            Arc::new(crate::ledger::NoopLedger),
        );

        ingestor.ingest("alice", submission("photo.png")).await.unwrap();

        let posts = index.posts.lock().unwrap();
        assert_eq!(posts[0].1.media_kind, MediaKind::Image);
        assert_eq!(posts[0].1.score, 0.0);
    }

    #[tokio::test]
    async fn test_video_and_unknown_kinds() {
        let index = Arc::new(RecordingIndex::default());
        let ingestor = PostIngestor::new(
            unused_scorer(),
            Arc::new(RecordingBlobs::default()),
            index.clone(),
            Arc::new(crate::ledger::NoopLedger),
        );

        ingestor.ingest("alice", submission("clip.mp4")).await.unwrap();
        ingestor.ingest("alice", submission("notes.txt")).await.unwrap();

        let posts = index.posts.lock().unwrap();
        assert_eq!(posts[0].1.media_kind, MediaKind::Video);
        assert_eq!(posts[1].1.media_kind, MediaKind::Unknown);
    }

    #[tokio::test]
    async fn test_missing_media_writes_nothing() {
        let blobs = Arc::new(RecordingBlobs::default());
        let index = Arc::new(RecordingIndex::default());
        let ingestor = PostIngestor::new(
            unused_scorer(),
            blobs.clone(),
            index.clone(),
            Arc::new(crate::ledger::NoopLedger),
        );

        let result = ingestor
            .ingest(
                "alice",
                Submission {
                    media: None,
                    ..submission("photo.jpeg")
                },
            )
            .await;

        assert!(matches!(result, Err(IngestError::MissingMedia)));
        assert!(blobs.keys.lock().unwrap().is_empty());
        assert!(index.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scoring_failure_stops_before_upload() {
        let mut scorer = MockImageScorer::new();
        scorer
            .expect_score()
            .times(1)
            .returning(|_| Err(ScoringError::EmptyPrediction));
        let blobs = Arc::new(RecordingBlobs::default());
        let ingestor = PostIngestor::new(
            Arc::new(scorer),
            blobs.clone(),
            Arc::new(RecordingIndex::default()),
            Arc::new(crate::ledger::NoopLedger),
        );

        let result = ingestor.ingest("alice", submission("photo.jpeg")).await;

        assert!(matches!(result, Err(IngestError::Scoring(_))));
        assert!(blobs.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blob_failure_skips_index_write() {
        let index = Arc::new(RecordingIndex::default());
        let ingestor = PostIngestor::new(
            unused_scorer(),
            Arc::new(RecordingBlobs {
                fail: true,
                ..Default::default()
            }),
            index.clone(),
            Arc::new(crate::ledger::NoopLedger),
        );

        let result = ingestor.ingest("alice", submission("photo.png")).await;

        assert!(matches!(result, Err(IngestError::BlobStore(_))));
        assert!(index.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_failure_leaves_blob_and_skips_ledger() {
        let blobs = Arc::new(RecordingBlobs::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ingestor = PostIngestor::new(
            unused_scorer(),
            blobs.clone(),
            Arc::new(RecordingIndex {
                fail: true,
                ..Default::default()
            }),
            Arc::new(ChannelLedger { tx }),
        );

        let result = ingestor.ingest("alice", submission("photo.png")).await;

        match result {
            Err(IngestError::Index { id, .. }) => {
                assert_eq!(blobs.keys.lock().unwrap().as_slice(), [id.to_string()]);
            }
            other => panic!("expected index failure, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ledger_failure_does_not_fail_ingest() {
        let ingestor = PostIngestor::new(
            unused_scorer(),
            Arc::new(RecordingBlobs::default()),
            Arc::new(RecordingIndex::default()),
            Arc::new(FailingLedger),
        );

        assert!(ingestor.ingest("alice", submission("photo.png")).await.is_ok());
    }

    #[test]
    fn test_stage_labels_are_distinct() {
        let stages = [
            IngestError::MissingMedia.stage(),
            IngestError::Scoring(ScoringError::EmptyPrediction).stage(),
            IngestError::BlobStore(BlobStoreError::Upload {
                key: String::new(),
                message: String::new(),
            })
            .stage(),
            IngestError::Index {
                id: PostId::generate(),
                source: IndexError::Rejected {
                    status: 500,
                    body: String::new(),
                },
            }
            .stage(),
        ];

        for (i, a) in stages.iter().enumerate() {
            for b in &stages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
