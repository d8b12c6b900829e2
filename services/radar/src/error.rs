use crate::credentials::CredentialError;
use crate::ingest::IngestError;
use crate::search::SearchError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Errors surfaced to HTTP clients.
///
/// Each variant renders a fixed plain-text message; the underlying cause is
/// logged where the error is produced and never sent to the client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Failed to parse JSON input from client")]
    MalformedJson,

    #[error("Invalid username or password")]
    InvalidSignup,

    #[error("User already exists.")]
    UserExists,

    #[error("Wrong username or password")]
    WrongCredentials,

    #[error("Failed to read from ElasticSearch")]
    UserLookupFailed,

    #[error("Failed to save to ElasticSearch")]
    UserSaveFailed,

    #[error("Failed to generate token")]
    TokenSigningFailed,

    #[error("Failed to parse multipart form")]
    MalformedForm,

    #[error("Image is not available")]
    MediaUnavailable,

    #[error("Failed to annotate the image")]
    ScoringFailed,

    #[error("Failed to save image to storage")]
    BlobStoreFailed,

    #[error("Failed to save post to ElasticSearch")]
    IndexWriteFailed,

    #[error("Failed to read post from ElasticSearch")]
    SearchFailed,

    #[error("Invalid search range")]
    InvalidRange,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedJson
            | ApiError::InvalidSignup
            | ApiError::UserExists
            | ApiError::MalformedForm
            | ApiError::MediaUnavailable
            | ApiError::InvalidRange => StatusCode::BAD_REQUEST,
            ApiError::WrongCredentials => StatusCode::UNAUTHORIZED,
            ApiError::UserLookupFailed
            | ApiError::UserSaveFailed
            | ApiError::TokenSigningFailed
            | ApiError::ScoringFailed
            | ApiError::BlobStoreFailed
            | ApiError::IndexWriteFailed
            | ApiError::SearchFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a login failure
    pub fn from_login(err: CredentialError) -> Self {
        match err {
            CredentialError::StoreUnavailable(_) => ApiError::UserLookupFailed,
            CredentialError::WrongCredentials | CredentialError::AlreadyExists => {
                ApiError::WrongCredentials
            }
        }
    }

    /// Map a signup failure
    pub fn from_signup(err: CredentialError) -> Self {
        match err {
            CredentialError::AlreadyExists => ApiError::UserExists,
            CredentialError::StoreUnavailable(_) | CredentialError::WrongCredentials => {
                ApiError::UserSaveFailed
            }
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::MissingMedia => ApiError::MediaUnavailable,
            IngestError::Scoring(_) => ApiError::ScoringFailed,
            IngestError::BlobStore(_) => ApiError::BlobStoreFailed,
            IngestError::Index { .. } => ApiError::IndexWriteFailed,
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidRange(_) => ApiError::InvalidRange,
            SearchError::Index(_) => ApiError::SearchFailed,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
