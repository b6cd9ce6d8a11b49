//! Network Infrastructure
//!
//! Transport used by remotes: a controller connects to a peer controller,
//! learns the paths it serves, and forwards calls and publishes over a
//! single TCP connection.

pub mod error;
pub mod frame;
pub mod tcp;

// Re-export commonly used types
pub use error::{Result, TransportError};
pub use frame::Frame;
pub use tcp::{connect, split, FrameReader, FrameWriter};
