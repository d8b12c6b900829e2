use crate::config::ElasticsearchConfig;
use crate::model::{Location, Post, PostId};
use async_trait::async_trait;
use elasticsearch::{
    http::transport::{BuildError, SingleNodeConnectionPool, TransportBuilder},
    http::response::Response,
    http::StatusCode,
    indices::{IndicesCreateParts, IndicesExistsParts},
    params::Refresh,
    Elasticsearch, IndexParts, SearchParts,
};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

/// Name of the geo-point field every distance query targets
pub const LOCATION_FIELD: &str = "location";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid Elasticsearch URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to build transport: {0}")]
    TransportBuild(#[from] BuildError),
    #[error("transport error: {0}")]
    Transport(#[from] elasticsearch::Error),
    #[error("Elasticsearch rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Query over the post index
#[derive(Debug, Clone, PartialEq)]
pub enum PostQuery {
    /// Posts whose location lies within `radius_km` of `center`
    Within { center: Location, radius_km: f64 },
    /// Posts whose numeric `field` is at least `min`
    AtLeast { field: String, min: f64 },
}

impl PostQuery {
    /// Elasticsearch query DSL for this query
    pub fn to_dsl(&self) -> Value {
        match self {
            PostQuery::Within { center, radius_km } => json!({
                "geo_distance": {
                    "distance": format!("{}km", radius_km),
                    LOCATION_FIELD: { "lat": center.lat, "lon": center.lon }
                }
            }),
            PostQuery::AtLeast { field, min } => {
                let mut bounds = serde_json::Map::new();
                bounds.insert(field.clone(), json!({ "gte": min }));
                json!({ "range": Value::Object(bounds) })
            }
        }
    }
}

/// One search hit, not yet decoded into a post
#[derive(Debug, Clone, Deserialize)]
pub struct RawHit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Value,
}

/// Record store holding indexed posts
#[async_trait]
pub trait PostIndex: Send + Sync {
    /// Write a post under `id`; the write is visible to the next search once this returns.
    async fn put(&self, id: &PostId, post: &Post) -> Result<(), IndexError>;

    /// Run a query and return every raw hit
    async fn query(&self, query: &PostQuery) -> Result<Vec<RawHit>, IndexError>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<(), IndexError>;
}

/// Build a client for a single-node cluster
pub fn connect(config: &ElasticsearchConfig) -> Result<Elasticsearch, IndexError> {
    let parsed = Url::parse(&config.url)?;
    let pool = SingleNodeConnectionPool::new(parsed);
    let transport = TransportBuilder::new(pool)
        .timeout(config.timeout())
        .build()?;

    Ok(Elasticsearch::new(transport))
}

/// Turn a non-2xx response into `IndexError::Rejected`
async fn ensure_success(response: Response) -> Result<Response, IndexError> {
    let status = response.status_code();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(IndexError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// Elasticsearch-backed post index
#[derive(Clone)]
pub struct ElasticsearchPostIndex {
    client: Elasticsearch,
    post_index: String,
    user_index: String,
    max_results: u32,
}

impl ElasticsearchPostIndex {
    pub fn new(client: Elasticsearch, config: &ElasticsearchConfig) -> Self {
        Self {
            client,
            post_index: config.post_index.clone(),
            user_index: config.user_index.clone(),
            max_results: config.max_results,
        }
    }

    /// Create the post and user indices if they do not exist yet.
    ///
    /// The post index declares `location` as `geo_point`; distance queries
    /// fail against an index where it was dynamically mapped.
    pub async fn bootstrap(&self) -> Result<(), IndexError> {
        self.ensure_index(&self.post_index, Some(post_index_mappings()))
            .await?;
        self.ensure_index(&self.user_index, None).await?;
        Ok(())
    }

    async fn ensure_index(&self, index: &str, body: Option<Value>) -> Result<(), IndexError> {
        let exists_response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await?;

        if index_exists(exists_response.status_code())? {
            debug!(index = %index, "Index already exists");
            return Ok(());
        }

        let indices = self.client.indices();
        let create = indices.create(IndicesCreateParts::Index(index));
        let response = match body {
            Some(body) => create.body(body).send().await?,
            None => create.send().await?,
        };
        let status = response.status_code();
        let text = response.text().await?;

        if index_created(status, &text)? {
            info!(index = %index, "Index created");
        } else {
            info!(index = %index, "Index created concurrently by another instance");
        }
        Ok(())
    }
}

/// Interpret an index-exists check: 200 exists, 404 missing, anything else fails
fn index_exists(status: StatusCode) -> Result<bool, IndexError> {
    if status.is_success() {
        Ok(true)
    } else if status == StatusCode::NOT_FOUND {
        Ok(false)
    } else {
        Err(IndexError::Rejected {
            status: status.as_u16(),
            body: String::new(),
        })
    }
}

/// Interpret an index-create response.
///
/// `Ok(false)` when another instance created the index between the check and the create.
fn index_created(status: StatusCode, body: &str) -> Result<bool, IndexError> {
    if status.is_success() {
        return Ok(true);
    }
    if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
        return Ok(false);
    }
    Err(IndexError::Rejected {
        status: status.as_u16(),
        body: body.to_string(),
    })
}

fn post_index_mappings() -> Value {
    json!({
        "mappings": {
            "properties": {
                LOCATION_FIELD: { "type": "geo_point" }
            }
        }
    })
}

#[async_trait]
impl PostIndex for ElasticsearchPostIndex {
    #[instrument(skip(self, post), fields(post_id = %id))]
    async fn put(&self, id: &PostId, post: &Post) -> Result<(), IndexError> {
        let response = self
            .client
            .index(IndexParts::IndexId(&self.post_index, id.as_str()))
            .body(post)
            .refresh(Refresh::WaitFor)
            .send()
            .await?;
        ensure_success(response).await?;

        debug!("Post indexed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn query(&self, query: &PostQuery) -> Result<Vec<RawHit>, IndexError> {
        let body = json!({
            "size": self.max_results,
            "query": query.to_dsl(),
        });

        let response = self
            .client
            .search(SearchParts::Index(&[self.post_index.as_str()]))
            .body(body)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let search_response: SearchResponse = response.json().await?;
        debug!(
            took_ms = search_response.took,
            hits = search_response.hits.hits.len(),
            "Search completed"
        );

        Ok(search_response.hits.hits)
    }

    async fn ping(&self) -> Result<(), IndexError> {
        let response = self.client.ping().send().await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    took: u64,
    hits: InnerHits,
}

#[derive(Debug, Deserialize)]
struct InnerHits {
    hits: Vec<RawHit>,
}
