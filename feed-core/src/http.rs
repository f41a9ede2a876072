use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::transport::{FeedTransport, PageRequest, RemotePage};

/// [`FeedTransport`] over HTTP with per-request timeout and bounded retries.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
    max_retries: u8,
    retry_backoff: Duration,
}

impl HttpTransport {
    pub fn new(client: Client, base_url: &str) -> Result<Self, FeedError> {
        let defaults = FeedConfig::default();
        Ok(Self {
            client,
            base_url: normalize_base(base_url)?,
            request_timeout: defaults.request_timeout(),
            max_retries: defaults.max_retries,
            retry_backoff: defaults.retry_backoff(),
        })
    }

    pub fn from_config(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            base_url: normalize_base(&config.base_url)?,
            request_timeout: config.request_timeout(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
        })
    }

    pub fn with_retries(mut self, max_retries: u8, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn build_url(&self, request: &PageRequest) -> Result<Url, FeedError> {
        let mut url = self.base_url.join(request.endpoint.trim_start_matches('/'))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &request.limit.to_string());
            if let Some(offset) = &request.offset {
                query.append_pair("offset", &offset.to_string());
            }
            if request.as_activities {
                query.append_pair("as_activities", "1");
            }
            if request.inject_boost {
                query.append_pair("inject_boost", "1");
            }
            for (key, value) in &request.params {
                match value {
                    Value::Null => {}
                    Value::String(s) => {
                        query.append_pair(key, s);
                    }
                    Value::Bool(b) => {
                        query.append_pair(key, if *b { "1" } else { "0" });
                    }
                    other => {
                        query.append_pair(key, &other.to_string());
                    }
                }
            }
        }
        Ok(url)
    }

    async fn get_once(&self, url: &Url) -> Result<RemotePage, FeedError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice::<RemotePage>(&bytes)?)
    }
}

fn normalize_base(base_url: &str) -> Result<Url, FeedError> {
    // Url::join drops the last segment unless the base ends with a slash.
    if base_url.ends_with('/') {
        Ok(Url::parse(base_url)?)
    } else {
        Ok(Url::parse(&format!("{base_url}/"))?)
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn get(&self, request: &PageRequest) -> Result<RemotePage, FeedError> {
        let url = self.build_url(request)?;
        let mut attempt: u8 = 0;
        loop {
            match self.get_once(&url).await {
                Ok(page) => {
                    debug!(url = %url, count = page.entities.len(), "fetched page");
                    return Ok(page);
                }
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(url = %url, error = %err, attempt, "transient fetch failure, retrying");
                    tokio::time::sleep(self.retry_backoff * u32::from(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
