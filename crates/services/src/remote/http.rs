use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use url::Url;

use reading_core::model::{BookId, ReadingSession, SessionId};

use super::{NewSession, ProgressRemote, ProgressUpdate, SyncOutcome};
use crate::error::RemoteError;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub base_url: Url,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

impl RemoteConfig {
    /// Build a config for `base_url` with the default timeout and no token.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Config` if the URL cannot be parsed or cannot carry a path.
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| RemoteError::Config(format!("base url {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Config(format!(
                "base url {base_url} cannot carry a path"
            )));
        }
        Ok(Self {
            base_url,
            api_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.api_token = (!token.trim().is_empty()).then_some(token);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read `READING_API_BASE_URL`, `READING_API_TOKEN` and `READING_API_TIMEOUT_SECS`.
    ///
    /// Returns `Ok(None)` when no base URL is set.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Config` if the base URL or timeout is malformed.
    pub fn from_env() -> Result<Option<Self>, RemoteError> {
        let Some(base_url) = env::var("READING_API_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
        else {
            return Ok(None);
        };
        let mut config = Self::new(&base_url)?;
        if let Ok(token) = env::var("READING_API_TOKEN") {
            config = config.with_token(token);
        }
        if let Ok(raw) = env::var("READING_API_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| RemoteError::Config(format!("timeout {raw:?} is not a number")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(Some(config))
    }

    /// Resolve `segments` below the base URL's path.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::Config(format!("base url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// `reqwest`-backed implementation of [`ProgressRemote`].
#[derive(Clone)]
pub struct HttpProgressRemote {
    client: Client,
    config: RemoteConfig,
}

impl HttpProgressRemote {
    /// Build a client honoring the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Http` if the TLS backend cannot be initialised.
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::from_status(status));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProgressRemote for HttpProgressRemote {
    async fn sync_progress(&self, update: &ProgressUpdate) -> Result<SyncOutcome, RemoteError> {
        let url = self.config.endpoint(&["progress"])?;
        let response = self.send(self.client.post(url).json(update)).await?;
        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(SyncOutcome::default());
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn create_session(&self, request: &NewSession) -> Result<ReadingSession, RemoteError> {
        let url = self.config.endpoint(&["sessions"])?;
        let response = self.send(self.client.post(url).json(request)).await?;
        Ok(response.json().await?)
    }

    async fn active_session(
        &self,
        book_id: &BookId,
    ) -> Result<Option<ReadingSession>, RemoteError> {
        let url = self.config.endpoint(&["sessions", "active"])?;
        let request = self
            .client
            .get(url)
            .query(&[("entityId", book_id.as_str())]);
        let response = self.authorize(request).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(RemoteError::from_status(status)),
        }
    }

    async fn end_session(&self, session_id: &SessionId) -> Result<(), RemoteError> {
        let url = self
            .config
            .endpoint(&["sessions", session_id.as_str(), "end"])?;
        self.send(self.client.post(url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_extend_base_path() {
        let config = RemoteConfig::new("https://api.example.com/v1/").unwrap();
        assert_eq!(
            config.endpoint(&["progress"]).unwrap().as_str(),
            "https://api.example.com/v1/progress"
        );
        let config = RemoteConfig::new("https://api.example.com/v1").unwrap();
        assert_eq!(
            config.endpoint(&["sessions", "s/1", "end"]).unwrap().as_str(),
            "https://api.example.com/v1/sessions/s%2F1/end"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(RemoteConfig::new("not a url").is_err());
        assert!(RemoteConfig::new("mailto:reader@example.com").is_err());
    }

    #[test]
    fn blank_token_is_ignored() {
        let config = RemoteConfig::new("https://api.example.com")
            .unwrap()
            .with_token("  ");
        assert!(config.api_token.is_none());
    }
}
