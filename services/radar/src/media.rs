use crate::config::ScoringConfig;
use crate::model::MediaKind;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

/// The only extension the analysis model accepts
pub const SCORED_EXTENSION: &str = ".jpeg";

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("failed to build analysis client: {0}")]
    Client(String),
    #[error("analysis request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("analysis response had no prediction")]
    EmptyPrediction,
}

/// Extension of the final path component, dot included (`"photo.jpeg"` -> `".jpeg"`)
pub fn extension(filename: &str) -> &str {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    match name.rfind('.') {
        Some(idx) => &name[idx..],
        None => "",
    }
}

/// Classify media by exact, case-sensitive extension match
pub fn classify(filename: &str) -> MediaKind {
    match extension(filename) {
        ".jpeg" | ".jpg" | ".gif" | ".png" => MediaKind::Image,
        ".mov" | ".mp4" | ".avi" | ".flv" | ".wmv" => MediaKind::Video,
        _ => MediaKind::Unknown,
    }
}

/// Whether this file goes through image analysis.
///
/// Only `.jpeg` qualifies; `.jpg`, `.png` and `.gif` are images but are not scored.
pub fn should_score(filename: &str) -> bool {
    extension(filename) == SCORED_EXTENSION
}

/// Image-analysis collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageScorer: Send + Sync {
    async fn score(&self, image: &[u8]) -> Result<f64, ScoringError>;
}

/// Scorer backed by an online prediction endpoint.
///
/// Request: `{"instances": [{"image_bytes": {"b64": "..."}}]}`
/// Response: `{"predictions": [{"score": 0.97}]}`
pub struct HttpImageScorer {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    score: f64,
}

impl HttpImageScorer {
    pub fn new(config: &ScoringConfig) -> Result<Self, ScoringError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ScoringError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

fn prediction_request(image: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "instances": [
            { "image_bytes": { "b64": STANDARD.encode(image) } }
        ]
    })
}

#[async_trait]
impl ImageScorer for HttpImageScorer {
    #[instrument(skip(self, image), fields(size_bytes = image.len()))]
    async fn score(&self, image: &[u8]) -> Result<f64, ScoringError> {
        let response: PredictionResponse = self
            .client
            .post(&self.endpoint)
            .json(&prediction_request(image))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let score = response
            .predictions
            .first()
            .map(|p| p.score)
            .ok_or(ScoringError::EmptyPrediction)?;

        debug!(score, "Image scored");
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(extension("photo.jpeg"), ".jpeg");
        assert_eq!(extension("archive.tar.gz"), ".gz");
        assert_eq!(extension("dir.d/noext"), "");
        assert_eq!(extension("noext"), "");
        assert_eq!(extension(""), "");
    }

    #[test]
    fn test_classify_images() {
        for name in ["a.jpeg", "a.jpg", "a.gif", "a.png"] {
            assert_eq!(classify(name), MediaKind::Image, "{name}");
        }
    }

    #[test]
    fn test_classify_videos() {
        for name in ["a.mov", "a.mp4", "a.avi", "a.flv", "a.wmv"] {
            assert_eq!(classify(name), MediaKind::Video, "{name}");
        }
    }

    #[test]
    fn test_classify_unknown() {
        for name in ["a.JPEG", "a.webp", "a", "a.mp3", "jpeg"] {
            assert_eq!(classify(name), MediaKind::Unknown, "{name}");
        }
    }

    #[test]
    fn test_only_jpeg_is_scored() {
        assert!(should_score("photo.jpeg"));
        assert!(!should_score("photo.jpg"));
        assert!(!should_score("photo.png"));
        assert!(!should_score("photo.gif"));
        assert!(!should_score("photo.JPEG"));
        assert!(!should_score("clip.mp4"));
    }

    #[test]
    fn test_prediction_request_encodes_image() {
        let body = prediction_request(b"abc");
        assert_eq!(body["instances"][0]["image_bytes"]["b64"], "YWJj");
    }

    #[test]
    fn test_prediction_response_parsing() {
        let response: PredictionResponse =
            serde_json::from_str(r#"{"predictions":[{"score":0.97,"label":"face"}]}"#).unwrap();
        assert_eq!(response.predictions[0].score, 0.97);

        let empty: PredictionResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.predictions.is_empty());
    }
}
