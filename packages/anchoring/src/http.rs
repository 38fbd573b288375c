//! HTTP ledger client.
//!
//! ```text
//! POST {base}/anchors        {"anchors": [{"key": hex, "value": hex}, ...]}
//! GET  {base}/anchors/{key}  200 {"key": hex, "value": hex} | 404
//! ```

use std::time::Duration;

use async_trait::async_trait;
use ownables_event_chain::{Anchor, Hash};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{AnchorError, Result};
use crate::ledger::LedgerClient;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct AnchorRequest<'a> {
    anchors: &'a [Anchor],
}

#[derive(Deserialize)]
struct LookupResponse {
    value: Hash,
}

/// A ledger reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: Client,
    base_url: Url,
}

impl HttpLedger {
    /// Create a client for the ledger at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::from_parts(client, Url::parse(base_url)?))
    }

    /// Use an existing client.
    pub fn from_parts(client: Client, mut base_url: Url) -> Self {
        // Url::join replaces the last segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }
}

fn transport(e: reqwest::Error) -> AnchorError {
    if e.is_connect() || e.is_timeout() {
        AnchorError::Unreachable(e.to_string())
    } else {
        AnchorError::Http(e)
    }
}

async fn rejected(response: Response) -> AnchorError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    AnchorError::Rejected { status, body }
}

#[async_trait]
impl LedgerClient for HttpLedger {
    async fn anchor(&self, anchors: &[Anchor]) -> Result<()> {
        let url = self.url("anchors")?;
        debug!(url = %url, anchors = anchors.len(), "submitting anchors");

        let response = self
            .client
            .post(url)
            .json(&AnchorRequest { anchors })
            .send()
            .await
            .map_err(transport)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(rejected(response).await)
        }
    }

    async fn lookup(&self, key: &Hash) -> Result<Option<Hash>> {
        let url = self.url(&format!("anchors/{}", key.to_hex()))?;
        let response = self.client.get(url).send().await.map_err(transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response.bytes().await.map_err(transport)?;
                let found: LookupResponse = serde_json::from_slice(&bytes)?;
                Ok(Some(found.value))
            }
            _ => Err(rejected(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let ledger = HttpLedger::new("https://ledger.example/api/v1").unwrap();
        assert_eq!(ledger.base_url().as_str(), "https://ledger.example/api/v1/");
        assert_eq!(
            ledger.url("anchors").unwrap().as_str(),
            "https://ledger.example/api/v1/anchors"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            HttpLedger::new("not a url"),
            Err(AnchorError::Url(_))
        ));
    }
}
