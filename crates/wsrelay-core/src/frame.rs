//! Frames relayed between peers.
//!
//! The relay never interprets payloads. Fragments are forwarded as they
//! arrive, so a data frame carries its own `is_final` flag and continuation
//! frames pass through untouched.

use bytes::Bytes;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent when the relay tears a connection down after a transport
/// failure. 1006 is reserved for local reporting and may not appear on the
/// wire (RFC 6455 §7.4.1).
pub const CLOSE_ABNORMAL: u16 = 1011;

/// Payload kind of a data frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataKind {
    /// UTF-8 text.
    Text,
    /// Opaque bytes.
    Binary,
    /// A non-initial fragment of a text or binary message.
    Continuation,
}

impl DataKind {
    /// Short label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Continuation => "continuation",
        }
    }
}

/// Status code and reason carried by a close frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close status code.
    pub code: u16,
    /// Human-readable reason, possibly empty.
    pub reason: String,
}

impl CloseFrame {
    /// Build a close frame.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Close frame the relay sends after a transport failure.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }
}

/// One message unit read from or written to a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Text, binary or continuation data.
    Data {
        /// What the payload holds.
        kind: DataKind,
        /// Raw payload bytes.
        payload: Bytes,
        /// Whether this is the last fragment of its message.
        is_final: bool,
    },
    /// Close request or reply. `None` is a close without a status code.
    Close(Option<CloseFrame>),
}

impl Frame {
    /// A complete text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Data {
            kind: DataKind::Text,
            payload: Bytes::from(text.into()),
            is_final: true,
        }
    }

    /// A complete binary message.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Data {
            kind: DataKind::Binary,
            payload: data.into(),
            is_final: true,
        }
    }

    /// A single fragment of a larger message.
    pub fn fragment(kind: DataKind, payload: impl Into<Bytes>, is_final: bool) -> Self {
        Self::Data {
            kind,
            payload: payload.into(),
            is_final,
        }
    }

    /// A close frame with a status code and reason.
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close(Some(CloseFrame::new(code, reason)))
    }

    /// Whether this is a close frame.
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }

    /// Data payload, empty for close frames.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Data { payload, .. } => payload,
            Self::Close(_) => &[],
        }
    }

    /// Short label for logs and metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Data { kind, .. } => kind.as_str(),
            Self::Close(_) => "close",
        }
    }
}
