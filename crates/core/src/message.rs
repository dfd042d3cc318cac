//! Call, response and event messages
//!
//! On the wire every message is a type tag plus four machine words
//! ([`RawMessage`]). Inside the bridge messages are typed: an incoming
//! [`Call`] borrows its payload bytes from the caller, while [`Response`]
//! and [`Event`] own their data and are flattened back into the four-word
//! layout only when handed across the boundary.

use crate::error::{Error, ErrorCode, Result};
use crate::handle::Handle;
use bytes::Bytes;

/// Numeric message-type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum MessageType {
    Error = 0xffff,

    BufferAllocate = 0x8001,
    BufferFree = 0x8002,
    BufferAccess = 0x8003,

    ConnectionAllocate = 0x9001,
    ConnectionFree = 0x9002,
    ConnectionCreateOffer = 0x9003,
    ConnectionCreateAnswer = 0x9004,
    ConnectionSetLocalDescription = 0x9005,
    ConnectionSetRemoteDescription = 0x9006,
    ConnectionAddIceCandidate = 0x9007,
    ConnectionCreateDataChannel = 0x9008,

    ConnectionOnIceCandidate = 0x9801,
    ConnectionOnStateChange = 0x9802,
    ConnectionOnDataChannel = 0x9803,

    ChannelFree = 0xa002,
    ChannelSend = 0xa003,

    ChannelOnOpen = 0xa801,
    ChannelOnClose = 0xa802,
    ChannelOnMessage = 0xa803,
}

impl MessageType {
    /// Decode a numeric tag
    pub fn from_raw(raw: usize) -> Option<Self> {
        use MessageType::*;
        Some(match raw {
            0xffff => Error,
            0x8001 => BufferAllocate,
            0x8002 => BufferFree,
            0x8003 => BufferAccess,
            0x9001 => ConnectionAllocate,
            0x9002 => ConnectionFree,
            0x9003 => ConnectionCreateOffer,
            0x9004 => ConnectionCreateAnswer,
            0x9005 => ConnectionSetLocalDescription,
            0x9006 => ConnectionSetRemoteDescription,
            0x9007 => ConnectionAddIceCandidate,
            0x9008 => ConnectionCreateDataChannel,
            0x9801 => ConnectionOnIceCandidate,
            0x9802 => ConnectionOnStateChange,
            0x9803 => ConnectionOnDataChannel,
            0xa002 => ChannelFree,
            0xa003 => ChannelSend,
            0xa801 => ChannelOnOpen,
            0xa802 => ChannelOnClose,
            0xa803 => ChannelOnMessage,
            _ => return None,
        })
    }

    /// Numeric tag written to the wire
    pub fn as_raw(self) -> usize {
        self as usize
    }

    /// Whether a call of this type is answered with a response
    ///
    /// Free-style calls are fire-and-forget; every other call needs a
    /// response callback.
    pub fn requires_response(self) -> bool {
        !matches!(
            self,
            MessageType::BufferFree | MessageType::ConnectionFree | MessageType::ChannelFree
        )
    }
}

/// A message in its four-word wire layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawMessage {
    pub ty: usize,
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub d: usize,
}

impl RawMessage {
    pub fn new(ty: usize, a: usize, b: usize, c: usize, d: usize) -> Self {
        Self { ty, a, b, c, d }
    }
}

/// A decoded incoming call
///
/// Payload slices borrow caller memory and are only valid for the duration
/// of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call<'a> {
    BufferAllocate { len: usize },
    BufferFree { buffer: Handle },
    BufferAccess { buffer: Handle },

    ConnectionAllocate { config: &'a [u8] },
    ConnectionFree { connection: Handle },
    CreateOffer { connection: Handle, options: Option<&'a [u8]> },
    CreateAnswer { connection: Handle, options: Option<&'a [u8]> },
    SetLocalDescription { connection: Handle, description: &'a [u8] },
    SetRemoteDescription { connection: Handle, description: &'a [u8] },
    AddIceCandidate { connection: Handle, candidate: &'a [u8] },
    CreateDataChannel { connection: Handle, options: Option<&'a [u8]> },

    ChannelFree { channel: Handle },
    ChannelSend { channel: Handle, buffer: Handle },
}

impl<'a> Call<'a> {
    /// Wire tag of this call
    pub fn message_type(&self) -> MessageType {
        match self {
            Call::BufferAllocate { .. } => MessageType::BufferAllocate,
            Call::BufferFree { .. } => MessageType::BufferFree,
            Call::BufferAccess { .. } => MessageType::BufferAccess,
            Call::ConnectionAllocate { .. } => MessageType::ConnectionAllocate,
            Call::ConnectionFree { .. } => MessageType::ConnectionFree,
            Call::CreateOffer { .. } => MessageType::ConnectionCreateOffer,
            Call::CreateAnswer { .. } => MessageType::ConnectionCreateAnswer,
            Call::SetLocalDescription { .. } => MessageType::ConnectionSetLocalDescription,
            Call::SetRemoteDescription { .. } => MessageType::ConnectionSetRemoteDescription,
            Call::AddIceCandidate { .. } => MessageType::ConnectionAddIceCandidate,
            Call::CreateDataChannel { .. } => MessageType::ConnectionCreateDataChannel,
            Call::ChannelFree { .. } => MessageType::ChannelFree,
            Call::ChannelSend { .. } => MessageType::ChannelSend,
        }
    }

    /// Whether this call is answered with a response
    pub fn requires_response(&self) -> bool {
        self.message_type().requires_response()
    }

    /// Decode a call from its raw slots
    ///
    /// Response-only and event-only tags are rejected as `InvalidCallType`.
    ///
    /// # Safety
    ///
    /// Every non-null pointer slot must reference `len` readable bytes that
    /// stay valid and unmodified for `'a`.
    pub unsafe fn from_raw(msg: &RawMessage) -> Result<Call<'a>> {
        let ty = MessageType::from_raw(msg.ty).ok_or(Error::InvalidCallType(msg.ty))?;
        let handle = Handle::from_raw(msg.a);

        Ok(match ty {
            MessageType::BufferAllocate => Call::BufferAllocate { len: msg.a },
            MessageType::BufferFree => Call::BufferFree { buffer: handle },
            MessageType::BufferAccess => Call::BufferAccess { buffer: handle },

            MessageType::ConnectionAllocate => Call::ConnectionAllocate {
                config: required(msg.a, msg.b)?,
            },
            MessageType::ConnectionFree => Call::ConnectionFree { connection: handle },
            MessageType::ConnectionCreateOffer => Call::CreateOffer {
                connection: handle,
                options: optional(msg.b, msg.c)?,
            },
            MessageType::ConnectionCreateAnswer => Call::CreateAnswer {
                connection: handle,
                options: optional(msg.b, msg.c)?,
            },
            MessageType::ConnectionSetLocalDescription => Call::SetLocalDescription {
                connection: handle,
                description: required(msg.b, msg.c)?,
            },
            MessageType::ConnectionSetRemoteDescription => Call::SetRemoteDescription {
                connection: handle,
                description: required(msg.b, msg.c)?,
            },
            MessageType::ConnectionAddIceCandidate => Call::AddIceCandidate {
                connection: handle,
                candidate: required(msg.b, msg.c)?,
            },
            MessageType::ConnectionCreateDataChannel => Call::CreateDataChannel {
                connection: handle,
                options: optional(msg.b, msg.c)?,
            },

            MessageType::ChannelFree => Call::ChannelFree { channel: handle },
            MessageType::ChannelSend => Call::ChannelSend {
                channel: handle,
                buffer: Handle::from_raw(msg.b),
            },

            MessageType::Error
            | MessageType::ConnectionOnIceCandidate
            | MessageType::ConnectionOnStateChange
            | MessageType::ConnectionOnDataChannel
            | MessageType::ChannelOnOpen
            | MessageType::ChannelOnClose
            | MessageType::ChannelOnMessage => return Err(Error::InvalidCallType(msg.ty)),
        })
    }
}

/// Borrow a payload from a pointer and length slot pair
///
/// A null pointer with a zero length is "absent".
unsafe fn payload<'a>(ptr: usize, len: usize) -> Result<Option<&'a [u8]>> {
    if ptr == 0 {
        if len == 0 {
            return Ok(None);
        }
        return Err(Error::deserialization(format!(
            "null payload pointer with length {}",
            len
        )));
    }
    Ok(Some(std::slice::from_raw_parts(ptr as *const u8, len)))
}

/// Required payloads treat "absent" as an empty document.
unsafe fn required<'a>(ptr: usize, len: usize) -> Result<&'a [u8]> {
    Ok(payload(ptr, len)?.unwrap_or(&[]))
}

/// Optional payloads treat an empty document as "absent".
unsafe fn optional<'a>(ptr: usize, len: usize) -> Result<Option<&'a [u8]>> {
    Ok(payload(ptr, len)?.filter(|bytes| !bytes.is_empty()))
}

fn bytes_slots(bytes: &[u8]) -> (usize, usize) {
    if bytes.is_empty() {
        (0, 0)
    } else {
        (bytes.as_ptr() as usize, bytes.len())
    }
}

/// Location of a buffer's storage, handed to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferView {
    pub handle: Handle,
    /// Null for zero-length buffers
    pub ptr: *mut u8,
    pub len: usize,
}

/// Synchronous reply to a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Error { code: ErrorCode, message: String },
    BufferAllocate(BufferView),
    BufferAccess(BufferView),
    ConnectionAllocate { connection: Handle },
    CreateOffer { description: Vec<u8> },
    CreateAnswer { description: Vec<u8> },
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
    CreateDataChannel { channel: Handle },
    ChannelSend { sent: usize },
}

impl Response {
    /// Error response for a failed call
    pub fn error(err: &Error) -> Self {
        Response::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }

    /// Wire tag of this response
    pub fn message_type(&self) -> MessageType {
        match self {
            Response::Error { .. } => MessageType::Error,
            Response::BufferAllocate(_) => MessageType::BufferAllocate,
            Response::BufferAccess(_) => MessageType::BufferAccess,
            Response::ConnectionAllocate { .. } => MessageType::ConnectionAllocate,
            Response::CreateOffer { .. } => MessageType::ConnectionCreateOffer,
            Response::CreateAnswer { .. } => MessageType::ConnectionCreateAnswer,
            Response::SetLocalDescription => MessageType::ConnectionSetLocalDescription,
            Response::SetRemoteDescription => MessageType::ConnectionSetRemoteDescription,
            Response::AddIceCandidate => MessageType::ConnectionAddIceCandidate,
            Response::CreateDataChannel { .. } => MessageType::ConnectionCreateDataChannel,
            Response::ChannelSend { .. } => MessageType::ChannelSend,
        }
    }

    /// Flatten into the wire layout
    ///
    /// Pointer slots borrow from `self` and are only valid while it lives.
    pub fn to_raw(&self) -> RawMessage {
        let ty = self.message_type().as_raw();
        match self {
            Response::Error { code, message } => {
                let (ptr, len) = bytes_slots(message.as_bytes());
                RawMessage::new(ty, code.as_raw(), ptr, len, 0)
            }
            Response::BufferAllocate(view) | Response::BufferAccess(view) => {
                RawMessage::new(ty, view.handle.as_raw(), view.ptr as usize, view.len, 0)
            }
            Response::ConnectionAllocate { connection } => {
                RawMessage::new(ty, connection.as_raw(), 0, 0, 0)
            }
            Response::CreateOffer { description } | Response::CreateAnswer { description } => {
                let (ptr, len) = bytes_slots(description);
                RawMessage::new(ty, ptr, len, 0, 0)
            }
            Response::SetLocalDescription
            | Response::SetRemoteDescription
            | Response::AddIceCandidate => RawMessage::new(ty, 0, 0, 0, 0),
            Response::CreateDataChannel { channel } => {
                RawMessage::new(ty, channel.as_raw(), 0, 0, 0)
            }
            Response::ChannelSend { sent } => RawMessage::new(ty, *sent, 0, 0, 0),
        }
    }
}

/// Peer-connection state codes forwarded in `ConnectionOnStateChange`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ConnectionState {
    Unspecified = 0,
    New = 1,
    Connecting = 2,
    Connected = 3,
    Disconnected = 4,
    Failed = 5,
    Closed = 6,
}

impl ConnectionState {
    pub fn as_raw(self) -> usize {
        self as usize
    }
}

/// Unsolicited notification delivered to the event sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Error {
        code: ErrorCode,
        message: String,
        handle: Option<Handle>,
    },
    IceCandidate {
        connection: Handle,
        /// `RTCIceCandidateInit` JSON
        candidate: Vec<u8>,
    },
    StateChange {
        connection: Handle,
        state: ConnectionState,
    },
    DataChannel {
        connection: Handle,
        channel: Handle,
    },
    ChannelOpen {
        channel: Handle,
    },
    ChannelClose {
        channel: Handle,
    },
    ChannelMessage {
        channel: Handle,
        data: Bytes,
        is_string: bool,
    },
}

impl Event {
    /// Error event, optionally tied to the object that raised it
    pub fn error(err: &Error, handle: Option<Handle>) -> Self {
        Event::Error {
            code: err.code(),
            message: err.to_string(),
            handle,
        }
    }

    /// Wire tag of this event
    pub fn message_type(&self) -> MessageType {
        match self {
            Event::Error { .. } => MessageType::Error,
            Event::IceCandidate { .. } => MessageType::ConnectionOnIceCandidate,
            Event::StateChange { .. } => MessageType::ConnectionOnStateChange,
            Event::DataChannel { .. } => MessageType::ConnectionOnDataChannel,
            Event::ChannelOpen { .. } => MessageType::ChannelOnOpen,
            Event::ChannelClose { .. } => MessageType::ChannelOnClose,
            Event::ChannelMessage { .. } => MessageType::ChannelOnMessage,
        }
    }

    /// Flatten into the wire layout
    ///
    /// Pointer slots borrow from `self` and are only valid while it lives.
    pub fn to_raw(&self) -> RawMessage {
        let ty = self.message_type().as_raw();
        match self {
            Event::Error {
                code,
                message,
                handle,
            } => {
                let (ptr, len) = bytes_slots(message.as_bytes());
                let handle = handle.map(Handle::as_raw).unwrap_or(0);
                RawMessage::new(ty, code.as_raw(), ptr, len, handle)
            }
            Event::IceCandidate {
                connection,
                candidate,
            } => {
                let (ptr, len) = bytes_slots(candidate);
                RawMessage::new(ty, connection.as_raw(), ptr, len, 0)
            }
            Event::StateChange { connection, state } => {
                RawMessage::new(ty, connection.as_raw(), state.as_raw(), 0, 0)
            }
            Event::DataChannel {
                connection,
                channel,
            } => RawMessage::new(ty, connection.as_raw(), channel.as_raw(), 0, 0),
            Event::ChannelOpen { channel } | Event::ChannelClose { channel } => {
                RawMessage::new(ty, channel.as_raw(), 0, 0, 0)
            }
            Event::ChannelMessage {
                channel,
                data,
                is_string,
            } => {
                let (ptr, len) = bytes_slots(data);
                RawMessage::new(ty, channel.as_raw(), ptr, len, *is_string as usize)
            }
        }
    }
}
