//! Photon client errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhotonError {
    #[error("Invalid Photon URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Photon request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Photon returned HTTP {status}")]
    Status { status: u16 },

    #[error("Photon response: Bad JSON: {message}")]
    BadJson { message: String },

    #[error("Photon response: feature {index} is malformed: {reason}")]
    InvalidFeature { index: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, PhotonError>;
