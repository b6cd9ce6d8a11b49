//! HTTP client for a Photon endpoint

use crate::error::{PhotonError, Result};
use crate::parse::parse_response;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use types::AddressResponse;
use url::Url;

/// Layers requested from Photon, in query order
pub const LAYERS: [&str; 5] = ["city", "street", "house", "locality", "district"];

#[derive(Debug, Clone)]
pub struct PhotonClient {
    endpoint: Url,
    http: Client,
}

impl PhotonClient {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        // Every call runs on its own short-lived runtime, so pooled
        // connections would outlive the runtime that drives them
        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self { endpoint, http })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Query URL for `input`
    pub fn query_url(&self, input: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .extend_pairs(LAYERS.iter().map(|layer| ("layer", *layer)));
        let query = format!("{}&q={}", url.query().unwrap_or_default(), encode_unreserved(input));
        url.set_query(Some(&query));
        url
    }

    pub async fn guesses(&self, input: &str) -> Result<AddressResponse> {
        let url = self.query_url(input);
        debug!(%url, "Querying Photon");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PhotonError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        parse_response(&body)
    }
}

/// Percent-encode every byte outside the RFC 3986 unreserved set, so a
/// space becomes `%20` rather than the form encoding `+`
pub fn encode_unreserved(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Parse a configured endpoint URL
pub fn parse_endpoint(raw: &str) -> Result<Url> {
    Url::parse(raw.trim()).map_err(|source| PhotonError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}
