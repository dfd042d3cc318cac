//! Data channels
//!
//! A [`Channel`] wraps one engine data channel, created locally through
//! CreateDataChannel or announced by the remote peer. The foreign side owns
//! the handle either way and must free it.

use crate::buffer::Buffer;
use crate::event::EventSender;
use crate::handle::Handle;
use crate::message::Event;
use crate::object::{self, BridgeObject, ObjectTable};
use crate::runtime::EngineRuntime;
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// Data channel registered in the handle table
pub struct Channel {
    handle: Handle,
    connection: Handle,
    label: String,
    /// Shared with engine listeners
    closed: Arc<AtomicBool>,
    inner: Mutex<Option<Arc<RTCDataChannel>>>,
}

impl Channel {
    /// Register an engine channel without listeners
    pub(crate) fn register(
        objects: &ObjectTable,
        connection: Handle,
        dc: &Arc<RTCDataChannel>,
    ) -> Result<Arc<Channel>> {
        object::register(
            objects,
            |handle| Channel {
                handle,
                connection,
                label: dc.label().to_string(),
                closed: Arc::new(AtomicBool::new(false)),
                inner: Mutex::new(Some(Arc::clone(dc))),
            },
            BridgeObject::Channel,
        )
    }

    /// Promote engine callbacks to events
    pub(crate) fn install_listeners(&self, dc: &RTCDataChannel, events: &EventSender) {
        let handle = self.handle;

        let closed = Arc::clone(&self.closed);
        let events_open = events.clone();
        dc.on_open(Box::new(move || {
            Box::pin(async move {
                if closed.load(Ordering::Acquire) {
                    return;
                }
                debug!("Data channel {} opened", handle);
                events_open.emit(Event::ChannelOpen { channel: handle });
            })
        }));

        let closed = Arc::clone(&self.closed);
        let events_close = events.clone();
        dc.on_close(Box::new(move || {
            let closed = Arc::clone(&closed);
            let events = events_close.clone();
            Box::pin(async move {
                if closed.load(Ordering::Acquire) {
                    return;
                }
                debug!("Data channel {} closed", handle);
                events.emit(Event::ChannelClose { channel: handle });
            })
        }));

        let closed = Arc::clone(&self.closed);
        let events_error = events.clone();
        dc.on_error(Box::new(move |err| {
            let closed = Arc::clone(&closed);
            let events = events_error.clone();
            Box::pin(async move {
                if closed.load(Ordering::Acquire) {
                    return;
                }
                warn!("Data channel {} error: {}", handle, err);
                events.emit(Event::error(&Error::engine(err.to_string()), Some(handle)));
            })
        }));

        let closed = Arc::clone(&self.closed);
        let events_message = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let closed = Arc::clone(&closed);
            let events = events_message.clone();
            Box::pin(async move {
                if closed.load(Ordering::Acquire) {
                    return;
                }
                events.emit(Event::ChannelMessage {
                    channel: handle,
                    data: msg.data,
                    is_string: msg.is_string,
                });
            })
        }));
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Handle of the owning connection
    pub fn connection(&self) -> Handle {
        self.connection
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Send the buffer's contents as one binary message
    ///
    /// Locks the channel, then the buffer. Returns the number of bytes sent.
    pub fn send(&self, buffer: &Buffer, runtime: &EngineRuntime) -> Result<usize> {
        let guard = self.inner.lock();
        let dc = guard.as_ref().cloned().ok_or(Error::Closed(self.handle))?;
        let data = buffer.with_bytes(Bytes::copy_from_slice)?;
        let len = data.len();

        let sent = runtime.run(async move { dc.send(&data).await })?.map_err(|e| {
            Error::engine(format!("Failed to send on channel {}: {}", self.handle, e))
        })?;

        debug!("Sent {} of {} bytes on channel {}", sent, len, self.handle);
        Ok(sent)
    }

    /// Close the engine channel and drop the handle mapping. Idempotent.
    pub fn free(&self, objects: &ObjectTable, runtime: &EngineRuntime) {
        let mut guard = self.inner.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dc = guard.take();
        objects.invalidate(self.handle);

        if let Some(dc) = dc {
            match runtime.run(async move { dc.close().await }) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to close channel {}: {}", self.handle, e),
                Err(e) => warn!("Failed to close channel {}: {}", self.handle, e),
            }
        }
        info!(
            "Freed channel {} of connection {}",
            self.handle, self.connection
        );
    }
}
