//! REST client implementation

use crate::api::EntityApi;
use crate::error::{RestError, RestResult};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tablesync_types::{AuthToken, Patch, SubscriptionKey, SyncedEntity};
use tracing::{debug, info, instrument, warn};

/// Default request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Longest body excerpt used as an error message
const MAX_ERROR_BODY: usize = 200;

/// Structured error body returned by the backend
#[derive(Debug, Deserialize)]
struct ErrorBody {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Success body, either bare or wrapped in `{"data": ...}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope<R> {
    Wrapped { data: R },
    Bare(R),
}

impl<R> Envelope<R> {
    fn into_inner(self) -> R {
        match self {
            Self::Wrapped { data } => data,
            Self::Bare(inner) => inner,
        }
    }
}

/// REST client for the list / patch collaborators
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct RestClient {
    http_client: Client,
    base_url: Url,
    token: Option<AuthToken>,
}

impl RestClient {
    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> RestResult<Self> {
        let base_url =
            Url::parse(&config.base_url).map_err(|_| RestError::InvalidUrl(config.base_url.clone()))?;
        if base_url.cannot_be_a_base() {
            return Err(RestError::InvalidUrl(config.base_url));
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_deref().unwrap_or("tablesync-rest/0.1.0"))
            .build()?;

        info!("Created REST client for {}", base_url);

        Ok(Self {
            http_client,
            base_url,
            token: None,
        })
    }

    /// Return a client that authenticates with `token`
    pub fn with_token(&self, token: AuthToken) -> Self {
        Self {
            http_client: self.http_client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    /// Check if the client carries a token
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Base URL all endpoints are built from
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/{segments...}`
    fn endpoint(&self, segments: &[&str]) -> RestResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RestError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<R: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, &str)],
        body: Option<&Patch>,
    ) -> RestResult<R> {
        let mut request = self.http_client.request(method, url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose());
        }
        if let Some(patch) = body {
            request = request.json(patch);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        parse_response(status, &body)
    }
}

/// Map a raw response onto the entity type or a [`RestError`]
fn parse_response<R: DeserializeOwned>(status: StatusCode, body: &str) -> RestResult<R> {
    let error_message = || {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| excerpt(body, status))
    };

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RestError::Unauthorized(error_message()));
    }
    if !status.is_success() {
        return Err(RestError::Api {
            status: status.as_u16(),
            message: error_message(),
        });
    }

    // Some handlers answer 200 with an error body
    if let Ok(err) = serde_json::from_str::<ErrorBody>(body) {
        if err.status == "error" {
            return Err(RestError::Api {
                status: status.as_u16(),
                message: err.message.unwrap_or_else(|| "unknown error".into()),
            });
        }
    }

    serde_json::from_str::<Envelope<R>>(body)
        .map(Envelope::into_inner)
        .map_err(|e| RestError::Parse(e.to_string()))
}

fn excerpt(body: &str, status: StatusCode) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status.to_string();
    }
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl<T: SyncedEntity> EntityApi<T> for RestClient {
    #[instrument(skip(self), fields(collection = T::CHANNEL.collection()))]
    async fn list(&self, key: &SubscriptionKey) -> RestResult<Vec<T>> {
        let url = self.endpoint(&[T::CHANNEL.collection()])?;
        debug!("Listing {} for {}", T::CHANNEL, key);

        let entities: Vec<T> = self
            .send(Method::GET, url, &[("subscriptionKey", key.as_str())], None)
            .await
            .map_err(|e| {
                warn!("List {} failed: {}", T::CHANNEL, e);
                e
            })?;

        debug!("Listed {} {}", entities.len(), T::CHANNEL);
        Ok(entities)
    }

    #[instrument(skip(self, patch), fields(collection = T::CHANNEL.collection()))]
    async fn update(&self, key: &SubscriptionKey, id: &str, patch: &Patch) -> RestResult<T> {
        let url = self.endpoint(&[T::CHANNEL.collection(), id])?;
        debug!(
            "Patching {} {} for {} with {} field(s)",
            T::CHANNEL,
            id,
            key,
            patch.len()
        );

        self.send(Method::PATCH, url, &[], Some(patch))
            .await
            .map_err(|e| {
                warn!("Patch {} {} failed: {}", T::CHANNEL, id, e);
                e
            })
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url.as_str())
            .field("has_token", &self.has_token())
            .finish()
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL, e.g. `https://api.example.com/v1`
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Custom user agent
    pub user_agent: Option<String>,
}

impl ClientConfig {
    /// Create a configuration for a base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: None,
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}
