//! Handle-based boundary bridge for WebRTC peer connections
//!
//! This crate exposes byte buffers, peer connections and data channels to a
//! foreign caller that can only exchange machine words and invoke function
//! pointers.
//!
//! # Features
//!
//! - **Generation-checked handles**: a freed handle never resolves again, even
//!   after its slot is reused
//! - **Synchronous call/response**: every call is answered before it returns
//! - **Asynchronous events**: engine notifications are queued and delivered on
//!   one dedicated thread, in order
//! - **Zero-copy buffers**: the caller writes straight into bridge-owned storage
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Foreign caller                                          │
//! │  ↓ (type tag + four machine words)                       │
//! │  Bridge::dispatch                                        │
//! │  ├─ HandleTable<BridgeObject>                            │
//! │  │   ├─ Buffer                                           │
//! │  │   ├─ Connection  ── EngineRuntime (tokio, webrtc-rs)  │
//! │  │   └─ Channel                                          │
//! │  └─ EventEmitter  ← engine listeners                     │
//! │     ↓ (rtc-bridge-events thread)                         │
//! │  Event sink                                              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use rtc_bridge_core::{Bridge, BridgeConfig, Call, Response};
//!
//! # fn main() -> rtc_bridge_core::Result<()> {
//! let bridge = Bridge::new(BridgeConfig::default())?;
//!
//! let handle = match bridge.call(Call::BufferAllocate { len: 5 })? {
//!     Some(Response::BufferAllocate(view)) => view.handle,
//!     other => panic!("unexpected response: {:?}", other),
//! };
//! assert_eq!(bridge.live_handles(), 1);
//!
//! bridge.dispatch(Call::BufferFree { buffer: handle }, None)?;
//! assert_eq!(bridge.live_handles(), 0);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod bridge;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod handle;
pub mod logging;
pub mod message;
pub mod object;
pub mod runtime;

// Re-exports for public API
pub use bridge::{Bridge, Respond};
pub use config::{BridgeConfig, ClosedCallPolicy, ConfigError};
pub use error::{Error, ErrorCode, Result};
pub use event::{EventSender, EventSink};
pub use handle::{Handle, HandleTable};
pub use message::{BufferView, Call, ConnectionState, Event, MessageType, RawMessage, Response};
pub use object::{BridgeObject, ObjectTable};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
