//! Peer connections
//!
//! A [`Connection`] wraps one engine `RTCPeerConnection`. Negotiation calls
//! run on the engine runtime while the connection's lock is held, so calls on
//! the same handle never interleave. Engine listeners installed at allocation
//! turn ICE candidates, state changes and incoming data channels into events;
//! they hold only a weak reference to the object table and go quiet once the
//! connection is freed.

pub mod config;

pub use config::{
    AnswerOptions, ConnectionConfig, DataChannelOptions, IceServerConfig, OfferOptions,
    SessionDescriptionJson,
};

use crate::channel::Channel;
use crate::event::EventSender;
use crate::handle::Handle;
use crate::message::{ConnectionState, Event};
use crate::object::{self, BridgeObject, ObjectTable};
use crate::runtime::EngineRuntime;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified => ConnectionState::Unspecified,
            RTCPeerConnectionState::New => ConnectionState::New,
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

/// Peer connection registered in the handle table
pub struct Connection {
    handle: Handle,
    /// Shared with engine listeners
    closed: Arc<AtomicBool>,
    peer: Mutex<Option<Arc<RTCPeerConnection>>>,
}

impl Connection {
    /// Build an engine session from a JSON configuration and register it
    #[instrument(skip_all, fields(config_len = config.len()))]
    pub fn allocate(
        objects: &Arc<ObjectTable>,
        runtime: &EngineRuntime,
        events: &EventSender,
        config: &[u8],
    ) -> Result<Arc<Connection>> {
        let rtc_config = ConnectionConfig::from_json(config)?.to_rtc_configuration()?;

        let peer = runtime.run(new_peer_connection(rtc_config))??;

        let closed = Arc::new(AtomicBool::new(false));
        let registered = object::register(
            objects,
            |handle| Connection {
                handle,
                closed: Arc::clone(&closed),
                peer: Mutex::new(Some(Arc::clone(&peer))),
            },
            BridgeObject::Connection,
        );
        let connection = match registered {
            Ok(connection) => connection,
            Err(e) => {
                close_peer(runtime, peer, "unregistered connection");
                return Err(e);
            }
        };

        install_listeners(
            &peer,
            connection.handle,
            closed,
            Arc::downgrade(objects),
            events.clone(),
        );

        info!("Allocated connection {}", connection.handle);
        Ok(connection)
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Run an engine operation with the connection locked
    fn with_peer<F, Fut, T>(&self, runtime: &EngineRuntime, op: F) -> Result<T>
    where
        F: FnOnce(Arc<RTCPeerConnection>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.peer.lock();
        let peer = guard.as_ref().cloned().ok_or(Error::Closed(self.handle))?;
        runtime.run(op(peer))?
    }

    /// Create an offer; returns the `{"type","sdp"}` JSON
    pub fn create_offer(
        &self,
        runtime: &EngineRuntime,
        options: Option<OfferOptions>,
    ) -> Result<Vec<u8>> {
        debug!("Creating offer on connection {}", self.handle);
        let desc = self.with_peer(runtime, move |peer| async move {
            peer.create_offer(options.map(Into::into))
                .await
                .map_err(|e| Error::engine(format!("Failed to create offer: {}", e)))
        })?;
        SessionDescriptionJson::from(&desc).to_json()
    }

    /// Create an answer; returns the `{"type","sdp"}` JSON
    pub fn create_answer(
        &self,
        runtime: &EngineRuntime,
        options: Option<AnswerOptions>,
    ) -> Result<Vec<u8>> {
        debug!("Creating answer on connection {}", self.handle);
        let desc = self.with_peer(runtime, move |peer| async move {
            peer.create_answer(options.map(Into::into))
                .await
                .map_err(|e| Error::engine(format!("Failed to create answer: {}", e)))
        })?;
        SessionDescriptionJson::from(&desc).to_json()
    }

    pub fn set_local_description(&self, runtime: &EngineRuntime, description: &[u8]) -> Result<()> {
        let desc = SessionDescriptionJson::from_json(description)?.into_rtc()?;
        debug!(
            "Setting local {} description on connection {}",
            desc.sdp_type, self.handle
        );
        self.with_peer(runtime, move |peer| async move {
            peer.set_local_description(desc)
                .await
                .map_err(|e| Error::engine(format!("Failed to set local description: {}", e)))
        })
    }

    pub fn set_remote_description(
        &self,
        runtime: &EngineRuntime,
        description: &[u8],
    ) -> Result<()> {
        let desc = SessionDescriptionJson::from_json(description)?.into_rtc()?;
        debug!(
            "Setting remote {} description on connection {}",
            desc.sdp_type, self.handle
        );
        self.with_peer(runtime, move |peer| async move {
            peer.set_remote_description(desc)
                .await
                .map_err(|e| Error::engine(format!("Failed to set remote description: {}", e)))
        })
    }

    /// Add a remote candidate given as `RTCIceCandidateInit` JSON
    pub fn add_ice_candidate(&self, runtime: &EngineRuntime, candidate: &[u8]) -> Result<()> {
        let candidate: RTCIceCandidateInit = serde_json::from_slice(candidate)?;
        debug!(
            "Adding ICE candidate on connection {}: {}",
            self.handle, candidate.candidate
        );
        self.with_peer(runtime, move |peer| async move {
            peer.add_ice_candidate(candidate)
                .await
                .map_err(|e| Error::engine(format!("Failed to add ICE candidate: {}", e)))
        })
    }

    /// Create a local data channel and register it
    pub fn create_data_channel(
        &self,
        objects: &ObjectTable,
        runtime: &EngineRuntime,
        events: &EventSender,
        options: Option<DataChannelOptions>,
    ) -> Result<Arc<Channel>> {
        let options = options.unwrap_or_default();
        let init = options.to_init();
        let label = options.label.clone();

        // Registration happens under the lock so a concurrent free cannot
        // slip in between creation and registration.
        let guard = self.peer.lock();
        let peer = guard.as_ref().cloned().ok_or(Error::Closed(self.handle))?;
        let dc = runtime.run(async move {
            peer.create_data_channel(&label, Some(init))
                .await
                .map_err(|e| Error::engine(format!("Failed to create data channel: {}", e)))
        })??;

        let channel = Channel::register(objects, self.handle, &dc)?;
        channel.install_listeners(&dc, events);
        drop(guard);

        info!(
            "Created data channel {} ({:?}) on connection {}",
            channel.handle(),
            channel.label(),
            self.handle
        );
        Ok(channel)
    }

    /// Close the engine session and drop the handle mapping
    ///
    /// Idempotent. Channels created on this connection stay registered until
    /// their own handles are freed.
    pub fn free(&self, objects: &ObjectTable, runtime: &EngineRuntime) {
        let mut guard = self.peer.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let peer = guard.take();
        objects.invalidate(self.handle);

        if let Some(peer) = peer {
            close_peer(runtime, peer, &self.handle.to_string());
        }
        info!("Freed connection {}", self.handle);
    }
}

fn close_peer(runtime: &EngineRuntime, peer: Arc<RTCPeerConnection>, name: &str) {
    match runtime.run(async move { peer.close().await }) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to close connection {}: {}", name, e),
        Err(e) => warn!("Failed to close connection {}: {}", name, e),
    }
}

async fn new_peer_connection(config: RTCConfiguration) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| Error::engine(format!("Failed to register codecs: {}", e)))?;

    let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
        .map_err(|e| Error::engine(format!("Failed to register interceptors: {}", e)))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptor_registry)
        .build();

    let peer = api
        .new_peer_connection(config)
        .await
        .map_err(|e| Error::engine(format!("Failed to create peer connection: {}", e)))?;

    Ok(Arc::new(peer))
}

fn install_listeners(
    peer: &RTCPeerConnection,
    handle: Handle,
    closed: Arc<AtomicBool>,
    objects: Weak<ObjectTable>,
    events: EventSender,
) {
    let closed_ice = Arc::clone(&closed);
    let events_ice = events.clone();
    peer.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let closed = Arc::clone(&closed_ice);
        let events = events_ice.clone();

        Box::pin(async move {
            // `None` marks the end of gathering and is not forwarded.
            let Some(candidate) = candidate else {
                return;
            };
            if closed.load(Ordering::Acquire) {
                return;
            }

            let json = candidate
                .to_json()
                .map_err(|e| e.to_string())
                .and_then(|init| serde_json::to_vec(&init).map_err(|e| e.to_string()));

            match json {
                Ok(candidate) => events.emit(Event::IceCandidate {
                    connection: handle,
                    candidate,
                }),
                Err(e) => {
                    warn!("Failed to serialize ICE candidate on {}: {}", handle, e);
                    let err = Error::engine(format!("Failed to serialize ICE candidate: {}", e));
                    events.emit(Event::error(&err, Some(handle)));
                }
            }
        })
    }));

    let closed_state = Arc::clone(&closed);
    let events_state = events.clone();
    peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let closed = Arc::clone(&closed_state);
        let events = events_state.clone();

        Box::pin(async move {
            if closed.load(Ordering::Acquire) {
                return;
            }
            debug!("Connection {} state: {}", handle, state);
            events.emit(Event::StateChange {
                connection: handle,
                state: state.into(),
            });
        })
    }));

    peer.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let closed = Arc::clone(&closed);
        let objects = objects.clone();
        let events = events.clone();

        Box::pin(async move {
            accept_data_channel(handle, &closed, &objects, &events, dc).await;
        })
    }));
}

async fn accept_data_channel(
    connection: Handle,
    closed: &AtomicBool,
    objects: &Weak<ObjectTable>,
    events: &EventSender,
    dc: Arc<RTCDataChannel>,
) {
    let objects = match objects.upgrade() {
        Some(objects) if !closed.load(Ordering::Acquire) => objects,
        _ => {
            debug!("Rejecting data channel {:?} on closed connection", dc.label());
            let _ = dc.close().await;
            return;
        }
    };

    match Channel::register(&objects, connection, &dc) {
        Ok(channel) => {
            info!(
                "Incoming data channel {} ({:?}) on connection {}",
                channel.handle(),
                channel.label(),
                connection
            );
            // Announce the channel before any of its own events can fire.
            events.emit(Event::DataChannel {
                connection,
                channel: channel.handle(),
            });
            channel.install_listeners(&dc, events);
        }
        Err(e) => {
            warn!("Failed to register incoming data channel: {}", e);
            events.emit(Event::error(&e, Some(connection)));
            let _ = dc.close().await;
        }
    }
}
