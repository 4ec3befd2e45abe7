use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use log::debug;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, RANGE, USER_AGENT,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use thiserror::Error;
use url::Url;

use crate::config::{DEFAULT_USER_AGENT, Timeouts};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {}s fetching {url}", timeout.as_secs())]
    Timeout { url: String, timeout: Duration },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    fn from_reqwest(url: &Url, source: reqwest::Error, timeout: Duration) -> Self {
        if source.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout,
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                source,
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

#[derive(Debug)]
pub struct Head {
    pub url: Url,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    timeouts: Timeouts,
}

impl Fetcher {
    pub fn new(user_agent: Option<String>, timeouts: Timeouts) -> Result<Self> {
        Ok(Fetcher {
            client: build_client(user_agent, timeouts.stream)?,
            timeouts,
        })
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub async fn fetch_text(&self, url: &Url) -> Result<Page, FetchError> {
        let timeout = self.timeouts.page;
        let response = self
            .send(self.client.get(url.clone()).timeout(timeout), url, timeout)
            .await?;
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|err| FetchError::from_reqwest(url, err, timeout))?;

        debug!("Fetched {} ({} bytes)", final_url, body.len());
        Ok(Page {
            url: final_url,
            body,
        })
    }

    pub async fn fetch_head(&self, url: &Url) -> Result<Head, FetchError> {
        let timeout = self.timeouts.page;
        let response = self
            .send(self.client.head(url.clone()).timeout(timeout), url, timeout)
            .await?;

        Ok(Head {
            url: response.url().clone(),
            headers: response.headers().clone(),
        })
    }

    pub async fn fetch_bytes(&self, url: &Url) -> Result<Bytes, FetchError> {
        let timeout = self.timeouts.segment;
        let response = self
            .send(self.client.get(url.clone()).timeout(timeout), url, timeout)
            .await?;
        response
            .bytes()
            .await
            .map_err(|err| FetchError::from_reqwest(url, err, timeout))
    }

    /// `first_byte` only bounds the wait for headers. A 416 answer to a
    /// ranged request is returned rather than rejected.
    pub async fn open(
        &self,
        url: &Url,
        range: Option<&str>,
        first_byte: Duration,
    ) -> Result<Response, FetchError> {
        let mut request = self.client.get(url.clone());
        let mut accept = None;
        if let Some(range) = range {
            request = request.header(RANGE, range);
            accept = Some(StatusCode::RANGE_NOT_SATISFIABLE);
        }
        self.send_accepting(request, url, first_byte, accept).await
    }

    pub async fn open_segment(&self, url: &Url) -> Result<Response, FetchError> {
        let timeout = self.timeouts.segment;
        self.send(self.client.get(url.clone()).timeout(timeout), url, timeout)
            .await
    }

    async fn send(
        &self,
        request: RequestBuilder,
        url: &Url,
        timeout: Duration,
    ) -> Result<Response, FetchError> {
        self.send_accepting(request, url, timeout, None).await
    }

    async fn send_accepting(
        &self,
        request: RequestBuilder,
        url: &Url,
        timeout: Duration,
        accept: Option<StatusCode>,
    ) -> Result<Response, FetchError> {
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                timeout,
            })?
            .map_err(|err| FetchError::from_reqwest(url, err, timeout))?;

        let status = response.status();
        if !status.is_success() && Some(status) != accept {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }
}

fn build_client(user_agent: Option<String>, read_timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    let agent = user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&agent).context("Invalid user agent value")?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7"),
    );

    Client::builder()
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .read_timeout(read_timeout)
        .build()
        .context("Failed to build HTTP client")
}
