//! HTTP client for a godless node, used by the plumbing CLI.

use anyhow::{anyhow, bail, Context as _, Result};
use serde::Deserialize;

use crate::api::{ReflectionType, Request, Response};
use crate::http::{BINARY_MIME, QUERY_MIME};

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
}

impl Client {
    /// `service_addr` is the node's base address, e.g. `http://127.0.0.1:8085`.
    pub fn new(service_addr: &str) -> Self {
        Client {
            http: reqwest::Client::new(),
            endpoint: format!("{}/api/query/run", service_addr.trim_end_matches('/')),
        }
    }

    /// Send query source text; the node compiles it.
    pub async fn send_query_text(&self, source: &str) -> Result<Response> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, QUERY_MIME)
            .body(source.to_string())
            .send()
            .await
            .context("sending query")?;
        Self::read_response(response).await
    }

    /// Send a binary-encoded request.
    pub async fn send(&self, request: &Request) -> Result<Response> {
        let body = postcard::to_allocvec(request).context("encoding request")?;
        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, BINARY_MIME)
            .body(body)
            .send()
            .await
            .context("sending request")?;
        Self::read_response(response).await
    }

    pub async fn send_reflection(&self, kind: ReflectionType) -> Result<Response> {
        self.send(&Request::Reflect(kind)).await
    }

    async fn read_response(response: reqwest::Response) -> Result<Response> {
        let status = response.status();
        let body = response.bytes().await.context("reading response body")?;

        if status.is_success() {
            return postcard::from_bytes(&body)
                .map_err(|err| anyhow!("bad binary response: {err}"));
        }

        // Errors come back as JSON; anything else is plain text.
        if let Ok(wire) = serde_json::from_slice::<WireError>(&body) {
            bail!("server error ({status}): {}", wire.error);
        }
        bail!(
            "server error ({status}): {}",
            String::from_utf8_lossy(&body).trim()
        )
    }
}
