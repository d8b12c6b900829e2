use crate::model::{Location, Post};
use crate::post_index::{IndexError, PostIndex, PostQuery, RawHit};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Radius used when the caller gives none
pub const DEFAULT_RADIUS_KM: f64 = 200.0;

/// Inclusive lower bound of the attribute cluster query
pub const CLUSTER_THRESHOLD: f64 = 0.9;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search range: {0:?}")]
    InvalidRange(String),

    #[error("post index query failed: {0}")]
    Index(#[from] IndexError),
}

/// Parse the optional `range` parameter (kilometers) into a radius
pub fn parse_radius_km(raw: Option<&str>) -> Result<f64, SearchError> {
    let raw = match raw {
        None | Some("") => return Ok(DEFAULT_RADIUS_KM),
        Some(raw) => raw,
    };

    match raw.parse::<f64>() {
        Ok(km) if km.is_finite() && km > 0.0 => Ok(km),
        _ => Err(SearchError::InvalidRange(raw.to_string())),
    }
}

/// Hits split into decoded posts and the ids of hits that did not decode
#[derive(Debug, Default)]
pub struct DecodedHits {
    pub posts: Vec<Post>,
    pub failed: Vec<String>,
}

/// Decode raw hits into posts, keeping track of the ones that fail
pub fn decode_hits(hits: Vec<RawHit>) -> DecodedHits {
    let mut decoded = DecodedHits::default();

    for hit in hits {
        match serde_json::from_value::<Post>(hit.source) {
            Ok(post) => decoded.posts.push(post),
            Err(e) => {
                warn!(hit_id = %hit.id, error = %e, "Dropping undecodable search hit");
                decoded.failed.push(hit.id);
            }
        }
    }

    if !decoded.failed.is_empty() {
        metrics::counter!("radar.search.hits_dropped").increment(decoded.failed.len() as u64);
    }

    decoded
}

/// Distance and attribute queries over indexed posts
pub struct SearchService {
    index: Arc<dyn PostIndex>,
}

impl SearchService {
    pub fn new(index: Arc<dyn PostIndex>) -> Self {
        Self { index }
    }

    /// Every post within `radius_km` of `center`, in index order
    #[instrument(skip(self))]
    pub async fn nearby(&self, center: Location, radius_km: f64) -> Result<Vec<Post>, SearchError> {
        self.run(PostQuery::Within { center, radius_km }).await
    }

    /// Every post whose numeric `field` is at least [`CLUSTER_THRESHOLD`].
    ///
    /// `field` is passed through to the index unchecked.
    #[instrument(skip(self))]
    pub async fn cluster(&self, field: &str) -> Result<Vec<Post>, SearchError> {
        self.run(PostQuery::AtLeast {
            field: field.to_string(),
            min: CLUSTER_THRESHOLD,
        })
        .await
    }

    async fn run(&self, query: PostQuery) -> Result<Vec<Post>, SearchError> {
        let hits = self.index.query(&query).await?;
        let decoded = decode_hits(hits);

        debug!(
            found = decoded.posts.len(),
            dropped = decoded.failed.len(),
            "Search finished"
        );

        Ok(decoded.posts)
    }
}
