use crate::model::User;
use crate::post_index::IndexError;
use async_trait::async_trait;
use elasticsearch::{http::StatusCode, params::Refresh, CreateParts, Elasticsearch, GetParts};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum CredentialError {
    /// Unknown username or mismatched password; the two are not distinguished
    #[error("wrong username or password")]
    WrongCredentials,

    #[error("user already exists")]
    AlreadyExists,

    #[error("user store unavailable: {0}")]
    StoreUnavailable(#[from] IndexError),
}

/// Account records keyed by username
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find(&self, username: &str) -> Result<Option<User>, CredentialError>;

    /// Insert only if no record exists under the username; `AlreadyExists` otherwise.
    async fn insert_new(&self, user: &User) -> Result<(), CredentialError>;
}

/// Whether `username` matches `[a-z0-9_]+`
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_'))
}

/// Whether signup input is acceptable: valid username, non-empty password
pub fn is_valid_signup(user: &User) -> bool {
    is_valid_username(&user.username) && !user.password.is_empty()
}

/// Verifies and creates accounts
pub struct CredentialStore {
    store: Arc<dyn UserStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, password))]
    pub async fn verify(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        // No stored account can carry a name signup would reject.
        if !is_valid_username(username) {
            return Err(CredentialError::WrongCredentials);
        }

        match self.store.find(username).await? {
            Some(user) if user.password == password => {
                info!("Login accepted");
                Ok(())
            }
            _ => Err(CredentialError::WrongCredentials),
        }
    }

    /// Create an account. Format validation is the caller's job.
    #[instrument(skip(self, user), fields(username = %user.username))]
    pub async fn create(&self, user: &User) -> Result<(), CredentialError> {
        if self.store.find(&user.username).await?.is_some() {
            return Err(CredentialError::AlreadyExists);
        }

        self.store.insert_new(user).await?;
        info!("User added");
        Ok(())
    }
}

/// User index in Elasticsearch, one document per username
pub struct ElasticsearchUserStore {
    client: Elasticsearch,
    index: String,
}

impl ElasticsearchUserStore {
    pub fn new(client: Elasticsearch, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<User>,
}

#[async_trait]
impl UserStore for ElasticsearchUserStore {
    async fn find(&self, username: &str) -> Result<Option<User>, CredentialError> {
        let response = self
            .client
            .get(GetParts::IndexId(&self.index, username))
            .send()
            .await
            .map_err(IndexError::from)?;

        let status = response.status_code();
        let body = response.text().await.map_err(IndexError::from)?;
        lookup_result(status, &body)
    }

    async fn insert_new(&self, user: &User) -> Result<(), CredentialError> {
        let response = self
            .client
            .create(CreateParts::IndexId(&self.index, &user.username))
            .body(user)
            .refresh(Refresh::WaitFor)
            .send()
            .await
            .map_err(IndexError::from)?;

        let status = response.status_code();
        let body = response.text().await.map_err(IndexError::from)?;
        if let Err(e) = create_result(status, &body) {
            if matches!(e, CredentialError::AlreadyExists) {
                warn!(username = %user.username, "Concurrent signup lost create race");
            }
            return Err(e);
        }

        debug!(username = %user.username, "User document created");
        Ok(())
    }
}

/// Interpret a get-by-id response; 404 means no such user
fn lookup_result(status: StatusCode, body: &str) -> Result<Option<User>, CredentialError> {
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(rejected(status, body).into());
    }

    let doc: GetResponse = serde_json::from_str(body).map_err(IndexError::from)?;
    Ok(if doc.found { doc.source } else { None })
}

/// Interpret a create-only write; 409 means the username is taken
fn create_result(status: StatusCode, body: &str) -> Result<(), CredentialError> {
    if status == StatusCode::CONFLICT {
        return Err(CredentialError::AlreadyExists);
    }
    if !status.is_success() {
        return Err(rejected(status, body).into());
    }
    Ok(())
}

fn rejected(status: StatusCode, body: &str) -> IndexError {
    IndexError::Rejected {
        status: status.as_u16(),
        body: body.to_string(),
    }
}
