//! # Transit Message Types
//!
//! Message envelope and payload definitions shared by the controller,
//! every module and every remote peer.
//!
//! ## Design Philosophy
//!
//! - **Immutable envelopes**: a [`Message`] never changes after construction
//!   and is shared as [`MsgPtr`] (`Arc<Message>`) across worker threads
//! - **Closed payload union**: [`MsgContent`] lists every payload the system
//!   understands; the payload tag ([`ContentType`]) is derived from the
//!   variant so tag and body cannot disagree
//! - **Wire-ready**: every type is serde-serializable, remotes ship the same
//!   structs over their connection without a second schema
//!
//! ## Quick Start
//!
//! ```rust
//! use types::{AddressRequest, ContentType, Message, MsgContent};
//!
//! let msg = Message::new(
//!     "/address",
//!     MsgContent::AddressRequest(AddressRequest::new("Darmstadt Hbf")),
//! );
//!
//! assert_eq!(msg.target(), "/address");
//! assert_eq!(msg.content_type(), ContentType::AddressRequest);
//! assert_eq!(
//!     msg.content_as::<AddressRequest>().map(|r| r.input.as_str()),
//!     Some("Darmstadt Hbf")
//! );
//! ```

pub mod address;
pub mod message;

pub use address::{Address, AddressRequest, AddressResponse, Position, Region};
pub use message::{
    Content, ContentType, ErrorPayload, IntoMessage, Message, MsgContent, MsgPtr,
    TypeMismatch,
};
