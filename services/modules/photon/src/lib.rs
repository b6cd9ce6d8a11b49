//! Address Typeahead
//!
//! Serves `/address` by forwarding the query to a Photon geocoding
//! endpoint and translating its GeoJSON features into address guesses.
//! Claims the same path as the station geocoder, so at most one of the
//! two can be enabled on a controller.

pub mod client;
pub mod error;
pub mod parse;

pub use client::PhotonClient;
pub use error::PhotonError;

use controller::{ControllerError, DispatchContext, InitContext, Module, OpMetadata, ParamSpec, Registry, Result};
use std::time::Duration;
use tracing::{debug, info};
use types::{AddressRequest, Message, MsgPtr};
use url::Url;

pub const MODULE_ID: &str = "photon";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

pub struct Photon {
    url: Option<Url>,
    timeout: Duration,
}

impl Default for Photon {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl Photon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }
}

impl Module for Photon {
    fn name(&self) -> &str {
        "Address Typeahead"
    }

    fn id(&self) -> &str {
        MODULE_ID
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("url", "Photon API endpoint"),
            ParamSpec::optional("timeout_ms", "request timeout in milliseconds", DEFAULT_TIMEOUT_MS),
        ]
    }

    fn set_param(&mut self, name: &str, value: &str) -> std::result::Result<(), String> {
        match name {
            "url" => {
                self.url = Some(client::parse_endpoint(value).map_err(|e| e.to_string())?);
                Ok(())
            }
            "timeout_ms" => {
                let ms: u64 = value
                    .trim()
                    .parse()
                    .map_err(|e| format!("expected milliseconds, got {:?} ({})", value, e))?;
                if ms == 0 {
                    return Err("must be at least 1".to_string());
                }
                self.timeout = Duration::from_millis(ms);
                Ok(())
            }
            other => Err(format!("unknown parameter {}", other)),
        }
    }

    fn init(&mut self, registry: &mut Registry, _ctx: &InitContext) -> Result<()> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| ControllerError::configuration(MODULE_ID, "missing required parameter url"))?;
        let client = PhotonClient::new(url, self.timeout)
            .map_err(|e| ControllerError::configuration(MODULE_ID, e.to_string()))?;
        info!(endpoint = %client.endpoint(), "Photon typeahead enabled");

        registry.register_op(
            "/address",
            move |msg: MsgPtr, _ctx: DispatchContext| {
                let client = client.clone();
                async move { lookup(&client, msg).await }
            },
            OpMetadata::new("Address typeahead via Photon"),
        )
    }
}

async fn lookup(client: &PhotonClient, msg: MsgPtr) -> Result<MsgPtr> {
    let input = msg.expect_content::<AddressRequest>()?.input.clone();
    let response = client
        .guesses(&input)
        .await
        .map_err(|e| ControllerError::handler(msg.target(), e))?;
    debug!(%input, guesses = response.guesses.len(), "Photon answered");

    Ok(Message::from_content(msg.target(), response).into_shared())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params() {
        let mut photon = Photon::new();
        assert!(photon.set_param("url", "::").is_err());
        assert!(photon.set_param("timeout_ms", "0").is_err());
        photon.set_param("url", "http://localhost:2322/api").unwrap();
        assert_eq!(photon.url().map(Url::as_str), Some("http://localhost:2322/api"));
    }

    #[test]
    fn test_init_without_url_fails() {
        let mut photon = Photon::new();
        let mut registry = Registry::new();
        let err = photon.init(&mut registry, &InitContext::new(None, 1)).unwrap_err();
        assert!(matches!(err, ControllerError::Configuration { .. }));
        assert!(!registry.has_op("/address"));
    }
}
