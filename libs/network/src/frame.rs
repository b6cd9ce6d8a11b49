//! Wire frames exchanged with a remote peer
//!
//! ```text
//! client                                  peer
//!   │ ── Hello { target } ───────────────► │
//!   │ ◄──────────────── Register { paths } │   handshake
//!   │ ── Request { id, message } ────────► │
//!   │ ◄────────────── Response { id, .. }  │   call
//!   │ ── Publish { message } ────────────► │   fire-and-forget
//!   │ ── Goodbye ────────────────────────► │   orderly close
//! ```
//!
//! Frames are JSON documents behind a 4-byte big-endian length prefix
//! (see [`crate::tcp`]).

use crate::error::{Result, TransportError};
use serde::{Deserialize, Serialize};
use types::{ErrorPayload, MsgPtr};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    /// Opens the handshake; `target` filters the advertised paths
    Hello { target: String },

    /// Paths the peer serves
    Register { paths: Vec<String> },

    Request { id: u64, message: MsgPtr },

    Response {
        id: u64,
        outcome: std::result::Result<MsgPtr, ErrorPayload>,
    },

    Publish { message: MsgPtr },

    Goodbye,
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Register { .. } => "register",
            Frame::Request { .. } => "request",
            Frame::Response { .. } => "response",
            Frame::Publish { .. } => "publish",
            Frame::Goodbye => "goodbye",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| TransportError::protocol_with_source("Failed to encode frame", e))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| TransportError::protocol_with_source("Failed to decode frame", e))
    }
}
