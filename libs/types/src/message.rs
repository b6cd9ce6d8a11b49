//! Message envelope
//!
//! A [`Message`] is the only thing that travels between callers, modules
//! and remotes. The controller inspects nothing but [`Message::target`];
//! everything else is for the handler on the other end.

use crate::address::{AddressRequest, AddressResponse};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

static MESSAGE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_message_id() -> u64 {
    MESSAGE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Shared, immutable message handle
pub type MsgPtr = Arc<Message>;

/// Payload tag, derived from the [`MsgContent`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Empty,
    AddressRequest,
    AddressResponse,
    Json,
    Error,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentType::Empty => "Empty",
            ContentType::AddressRequest => "AddressRequest",
            ContentType::AddressResponse => "AddressResponse",
            ContentType::Json => "Json",
            ContentType::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Failure transported as a message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable error kind, e.g. `no_handler` or `handler`
    pub kind: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Discriminated payload union
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "content_type", content = "content")]
pub enum MsgContent {
    /// No body; used when calling an operation by bare target
    Empty,
    AddressRequest(AddressRequest),
    AddressResponse(AddressResponse),
    /// Opaque structured body for operations without a dedicated schema
    Json(serde_json::Value),
    Error(ErrorPayload),
}

impl MsgContent {
    pub fn content_type(&self) -> ContentType {
        match self {
            MsgContent::Empty => ContentType::Empty,
            MsgContent::AddressRequest(_) => ContentType::AddressRequest,
            MsgContent::AddressResponse(_) => ContentType::AddressResponse,
            MsgContent::Json(_) => ContentType::Json,
            MsgContent::Error(_) => ContentType::Error,
        }
    }
}

/// Typed access to a [`MsgContent`] variant
pub trait Content: Sized {
    const CONTENT_TYPE: ContentType;

    fn from_content(content: &MsgContent) -> Option<&Self>;

    fn into_content(self) -> MsgContent;
}

macro_rules! impl_content {
    ($ty:ty, $variant:ident) => {
        impl Content for $ty {
            const CONTENT_TYPE: ContentType = ContentType::$variant;

            fn from_content(content: &MsgContent) -> Option<&Self> {
                match content {
                    MsgContent::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn into_content(self) -> MsgContent {
                MsgContent::$variant(self)
            }
        }
    };
}

impl_content!(AddressRequest, AddressRequest);
impl_content!(AddressResponse, AddressResponse);
impl_content!(serde_json::Value, Json);
impl_content!(ErrorPayload, Error);

/// Payload did not have the expected type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unexpected content type for {target}: expected {expected}, got {actual}")]
pub struct TypeMismatch {
    pub target: String,
    pub expected: ContentType,
    pub actual: ContentType,
}

/// Immutable, routable message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: u64,
    target: String,
    content: MsgContent,
}

impl Message {
    /// Create a message with a fresh process-unique id
    pub fn new(target: impl Into<String>, content: MsgContent) -> Self {
        Self {
            id: next_message_id(),
            target: target.into(),
            content,
        }
    }

    /// Message without a body
    pub fn empty(target: impl Into<String>) -> Self {
        Self::new(target, MsgContent::Empty)
    }

    /// Message from a typed payload
    pub fn from_content<T: Content>(target: impl Into<String>, content: T) -> Self {
        Self::new(target, content.into_content())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Hierarchical target path, e.g. `/address`
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn content(&self) -> &MsgContent {
        &self.content
    }

    pub fn content_type(&self) -> ContentType {
        self.content.content_type()
    }

    pub fn content_as<T: Content>(&self) -> Option<&T> {
        T::from_content(&self.content)
    }

    /// Like [`Message::content_as`] but reports the mismatch
    pub fn expect_content<T: Content>(&self) -> Result<&T, TypeMismatch> {
        T::from_content(&self.content).ok_or_else(|| TypeMismatch {
            target: self.target.clone(),
            expected: T::CONTENT_TYPE,
            actual: self.content_type(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self.content, MsgContent::Error(_))
    }

    pub fn into_shared(self) -> MsgPtr {
        Arc::new(self)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}[{} {}]", self.id, self.target, self.content_type())
    }
}

/// Anything `call`/`publish` accept as a message
pub trait IntoMessage {
    fn into_message(self) -> MsgPtr;
}

impl IntoMessage for MsgPtr {
    fn into_message(self) -> MsgPtr {
        self
    }
}

impl IntoMessage for &MsgPtr {
    fn into_message(self) -> MsgPtr {
        Arc::clone(self)
    }
}

impl IntoMessage for Message {
    fn into_message(self) -> MsgPtr {
        Arc::new(self)
    }
}

impl IntoMessage for &str {
    fn into_message(self) -> MsgPtr {
        Arc::new(Message::empty(self))
    }
}

impl IntoMessage for String {
    fn into_message(self) -> MsgPtr {
        Arc::new(Message::empty(self))
    }
}
