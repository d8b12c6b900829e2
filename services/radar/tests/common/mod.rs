//! In-memory collaborators for driving the router without external services.

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use radar_service::blob_store::BlobStoreError;
use radar_service::config::ApiConfig;
use radar_service::media::ScoringError;
use radar_service::{
    create_router, AppState, BlobStore, CredentialError, CredentialStore, ImageScorer, IndexError,
    Location, NoopLedger, Post, PostId, PostIndex, PostIngestor, PostQuery, RawHit,
    SearchService, TokenService, User, UserStore,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SECRET: &[u8] = b"test-secret";

#[derive(Default)]
pub struct MemoryUsers {
    users: Mutex<HashMap<String, User>>,
}

#[async_trait]
impl UserStore for MemoryUsers {
    async fn find(&self, username: &str) -> Result<Option<User>, CredentialError> {
        Ok(self.users.lock().unwrap().get(username).cloned())
    }

    async fn insert_new(&self, user: &User) -> Result<(), CredentialError> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(&user.username) {
            return Err(CredentialError::AlreadyExists);
        }
        users.insert(user.username.clone(), user.clone());
        Ok(())
    }
}

/// Post index evaluating queries in memory; distances use the haversine formula
#[derive(Default)]
pub struct MemoryPosts {
    pub posts: Mutex<Vec<(PostId, Post)>>,
    pub queries: AtomicUsize,
}

fn distance_km(a: Location, b: Location) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0088;
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

fn matches(query: &PostQuery, post: &Post) -> bool {
    match query {
        PostQuery::Within { center, radius_km } => distance_km(*center, post.location) <= *radius_km,
        PostQuery::AtLeast { field, min } => serde_json::to_value(post)
            .ok()
            .and_then(|v| v.get(field).and_then(|f| f.as_f64()))
            .map_or(false, |v| v >= *min),
    }
}

#[async_trait]
impl PostIndex for MemoryPosts {
    async fn put(&self, id: &PostId, post: &Post) -> Result<(), IndexError> {
        self.posts.lock().unwrap().push((id.clone(), post.clone()));
        Ok(())
    }

    async fn query(&self, query: &PostQuery) -> Result<Vec<RawHit>, IndexError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, post)| matches(query, post))
            .map(|(id, post)| RawHit {
                id: id.to_string(),
                source: serde_json::to_value(post).unwrap(),
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBlobs {
    pub objects: Mutex<HashMap<String, Bytes>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn put_public(
        &self,
        key: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<String, BlobStoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Upload {
                key: key.to_string(),
                message: "access denied".to_string(),
            });
        }
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(format!("https://media.example.com/{key}"))
    }
}

/// Deterministic scorer that counts its invocations
pub struct CountingScorer {
    pub score: f64,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ImageScorer for CountingScorer {
    async fn score(&self, _image: &[u8]) -> Result<f64, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.score)
    }
}

pub struct TestApp {
    pub router: Router,
    pub tokens: Arc<TokenService>,
    pub posts: Arc<MemoryPosts>,
    pub blobs: Arc<MemoryBlobs>,
    pub scorer: Arc<CountingScorer>,
}

pub fn api_config() -> ApiConfig {
    ApiConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        prefix: "/api/v1".to_string(),
        max_upload_bytes: 1024 * 1024,
        cors_origins: Vec::new(),
    }
}

pub fn test_app() -> TestApp {
    let tokens = Arc::new(TokenService::new(SECRET, chrono::Duration::hours(24)));
    let posts = Arc::new(MemoryPosts::default());
    let blobs = Arc::new(MemoryBlobs::default());
    let scorer = Arc::new(CountingScorer {
        score: 0.95,
        calls: AtomicUsize::new(0),
    });

    let state = AppState {
        tokens: tokens.clone(),
        credentials: Arc::new(CredentialStore::new(Arc::new(MemoryUsers::default()))),
        ingestor: Arc::new(PostIngestor::new(
            scorer.clone(),
            blobs.clone(),
            posts.clone(),
            Arc::new(NoopLedger),
        )),
        search: Arc::new(SearchService::new(posts.clone())),
        index: posts.clone(),
    };

    TestApp {
        router: create_router(state, &api_config()),
        tokens,
        posts,
        blobs,
        scorer,
    }
}
