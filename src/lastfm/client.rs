//! HTTP transport for the Last.fm web service.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{RemoteCall, RemoteResponse};
use crate::cache::{CacheDirectives, Params};
use crate::error::RemoteError;
use crate::{HuginnError, Result};

/// Default Last.fm API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://ws.audioscrobbler.com/2.0/";

const USER_AGENT: &str = concat!("huginn/", env!("CARGO_PKG_VERSION"));

/// Error body returned by the API, with either a 200 or a 4xx status.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: u32,
    #[serde(default)]
    message: String,
}

fn parse_error_body(body: &[u8]) -> Option<RemoteError> {
    let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
    Some(RemoteError::new(parsed.error, parsed.message))
}

/// `reqwest`-backed [`RemoteCall`] against the Last.fm JSON API.
///
/// ```rust,no_run
/// # use huginn::lastfm::LastFmClient;
/// # fn main() -> huginn::Result<()> {
/// let client = LastFmClient::new("my-api-key")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LastFmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LastFmClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_timeout(api_key, Duration::from_secs(30))
    }

    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        })
    }

    /// Point the client at another endpoint (a proxy, or a test server).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RemoteCall for LastFmClient {
    async fn call(&self, method: &str, params: &Params) -> Result<RemoteResponse> {
        let mut query: Vec<(&str, &str)> = vec![
            ("method", method),
            ("api_key", self.api_key.as_str()),
            ("format", "json"),
        ];
        query.extend(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        debug!(method, "calling last.fm");
        let response = self.http.get(&self.base_url).query(&query).send().await?;

        let status = response.status();
        let directives = CacheDirectives::from_headers(
            response
                .headers()
                .iter()
                .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
        );
        let body = response.bytes().await?;

        if let Some(error) = parse_error_body(&body) {
            debug!(method, code = error.code, message = %error.message, "last.fm returned an error");
            return Ok(RemoteResponse {
                directives,
                outcome: Err(error),
            });
        }

        if !status.is_success() {
            let message: String = String::from_utf8_lossy(&body).chars().take(200).collect();
            return Err(HuginnError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(RemoteResponse {
            directives,
            outcome: Ok(body.to_vec()),
        })
    }
}
