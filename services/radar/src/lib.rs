//! Radar Service
//!
//! Location-aware post sharing backend. Authenticated users submit a message,
//! a coordinate and a media file; the service stores the media in S3, scores
//! JPEG images with an external analysis model, indexes the post in
//! Elasticsearch under a geo-point field, and answers radius-based "nearby"
//! queries plus a numeric-range "cluster" query.
//!
//! ## Features
//!
//! - **Token-gated API**: HS256 bearer tokens issued at login guard every post
//!   and search route
//! - **Ordered ingestion**: media upload, then index write with read-after-write
//!   refresh, then a best-effort copy to the analytics ledger
//! - **Geo search**: `geo_distance` queries against the `location` geo-point
//! - **Cluster search**: `range` queries over any numeric post field
//!
//! ## Architecture
//!
//! ```text
//!  HTTP (axum)                                        Collaborators
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ /login       │──▶│ Credential   │──▶│ ES user      │
//! │ /signup      │   │ Store        │   │ index        │
//! └──────────────┘   └──────────────┘   └──────────────┘
//!        │
//!        ▼ bearer token
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ /post        │──▶│ Post         │──▶│ Image scorer │
//! └──────────────┘   │ Ingestor     │──▶│ S3 bucket    │
//!                    │              │──▶│ ES post index│
//!                    │              │┄┄▶│ Kafka ledger │
//!                    └──────────────┘   └──────────────┘
//! ┌──────────────┐   ┌──────────────┐          ▲
//! │ /search      │──▶│ Search       │──────────┘
//! │ /cluster     │   │ Service      │
//! └──────────────┘   └──────────────┘
//! ```

pub mod api;
pub mod blob_store;
pub mod config;
pub mod credentials;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod media;
pub mod model;
pub mod post_index;
pub mod search;
pub mod token;

pub use api::{create_router, AppState};
pub use blob_store::{BlobStore, S3BlobStore};
pub use config::Config;
pub use credentials::{CredentialError, CredentialStore, ElasticsearchUserStore, UserStore};
pub use error::ApiError;
pub use ingest::{IngestError, MediaUpload, PostIngestor, Submission};
pub use ledger::{KafkaLedger, Ledger, LedgerEntry, NoopLedger};
pub use media::{classify, HttpImageScorer, ImageScorer};
pub use model::{Location, MediaKind, Post, PostId, User};
pub use post_index::{ElasticsearchPostIndex, IndexError, PostIndex, PostQuery, RawHit};
pub use search::SearchService;
pub use token::{Claims, TokenService};
