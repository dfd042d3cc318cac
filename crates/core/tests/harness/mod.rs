//! Shared helpers for bridge integration tests
//!
//! Basic usage pattern:
//!
//! 1. Create a bridge with `new_bridge()` or `bridge_with_policy()`
//! 2. Attach an `EventLog` if the test needs engine events
//! 3. Drive calls through `Bridge::call` and the `expect_*` helpers

#![allow(dead_code)]

use rtc_bridge_core::{
    Bridge, BridgeConfig, BufferView, Call, ClosedCallPolicy, ErrorCode, Event, Handle, Response,
};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default wait for engine events
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize test logging
pub fn init_logging() {
    rtc_bridge_core::logging::init_tracing(&BridgeConfig {
        log_filter: "warn,rtc_bridge_core=debug".to_string(),
        ..Default::default()
    });
}

pub fn new_bridge() -> Bridge {
    bridge_with_policy(ClosedCallPolicy::Error)
}

pub fn bridge_with_policy(closed_calls: ClosedCallPolicy) -> Bridge {
    init_logging();
    Bridge::new(BridgeConfig {
        worker_threads: 2,
        closed_calls,
        ..Default::default()
    })
    .expect("bridge")
}

/// Call that must produce a response
pub fn respond(bridge: &Bridge, call: Call<'_>) -> Response {
    bridge
        .call(call)
        .expect("dispatch")
        .expect("call produced no response")
}

/// Call that must fail; returns the error code and message
pub fn expect_error(bridge: &Bridge, call: Call<'_>) -> (ErrorCode, String) {
    match respond(bridge, call) {
        Response::Error { code, message } => (code, message),
        other => panic!("expected error response, got {:?}", other),
    }
}

pub fn allocate_buffer(bridge: &Bridge, len: usize) -> BufferView {
    match respond(bridge, Call::BufferAllocate { len }) {
        Response::BufferAllocate(view) => view,
        other => panic!("unexpected response: {:?}", other),
    }
}

/// Allocate a buffer holding `bytes`
pub fn buffer_with(bridge: &Bridge, bytes: &[u8]) -> Handle {
    let view = allocate_buffer(bridge, bytes.len());
    if !bytes.is_empty() {
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), view.ptr, bytes.len()) };
    }
    view.handle
}

pub fn allocate_connection(bridge: &Bridge) -> Handle {
    allocate_connection_with(bridge, "{}")
}

pub fn allocate_connection_with(bridge: &Bridge, config: &str) -> Handle {
    match respond(
        bridge,
        Call::ConnectionAllocate {
            config: config.as_bytes(),
        },
    ) {
        Response::ConnectionAllocate { connection } => connection,
        other => panic!("unexpected response: {:?}", other),
    }
}

pub fn create_data_channel(bridge: &Bridge, connection: Handle, options: Option<&str>) -> Handle {
    match respond(
        bridge,
        Call::CreateDataChannel {
            connection,
            options: options.map(str::as_bytes),
        },
    ) {
        Response::CreateDataChannel { channel } => channel,
        other => panic!("unexpected response: {:?}", other),
    }
}

pub fn create_offer(bridge: &Bridge, connection: Handle) -> Vec<u8> {
    match respond(
        bridge,
        Call::CreateOffer {
            connection,
            options: None,
        },
    ) {
        Response::CreateOffer { description } => description,
        other => panic!("unexpected response: {:?}", other),
    }
}

pub fn create_answer(bridge: &Bridge, connection: Handle) -> Vec<u8> {
    match respond(
        bridge,
        Call::CreateAnswer {
            connection,
            options: None,
        },
    ) {
        Response::CreateAnswer { description } => description,
        other => panic!("unexpected response: {:?}", other),
    }
}

pub fn set_local(bridge: &Bridge, connection: Handle, description: &[u8]) {
    let response = respond(
        bridge,
        Call::SetLocalDescription {
            connection,
            description,
        },
    );
    assert_eq!(response, Response::SetLocalDescription);
}

pub fn set_remote(bridge: &Bridge, connection: Handle, description: &[u8]) {
    let response = respond(
        bridge,
        Call::SetRemoteDescription {
            connection,
            description,
        },
    );
    assert_eq!(response, Response::SetRemoteDescription);
}

/// Full offer/answer exchange between two connections of one bridge
pub fn negotiate(bridge: &Bridge, offerer: Handle, answerer: Handle) {
    let offer = create_offer(bridge, offerer);
    set_local(bridge, offerer, &offer);
    set_remote(bridge, answerer, &offer);

    let answer = create_answer(bridge, answerer);
    set_local(bridge, answerer, &answer);
    set_remote(bridge, offerer, &answer);
}

/// Parse a description response into `(type, sdp)`
pub fn parse_description(description: &[u8]) -> (String, String) {
    let value: serde_json::Value = serde_json::from_slice(description).expect("description json");
    (
        value["type"].as_str().expect("type").to_string(),
        value["sdp"].as_str().expect("sdp").to_string(),
    )
}

/// Records every event delivered to the bridge's sink
pub struct EventLog {
    rx: Receiver<Event>,
}

impl EventLog {
    pub fn attach(bridge: &Bridge) -> Self {
        let (tx, rx) = channel();
        bridge.set_event_sink(Some(Arc::new(move |event: &Event| {
            let _ = tx.send(event.clone());
        })));
        Self { rx }
    }

    /// Wait for the first event `select` accepts, skipping the rest
    pub fn wait_for<T>(
        &self,
        timeout: Duration,
        mut select: impl FnMut(&Event) -> Option<T>,
    ) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(event) => {
                    if let Some(found) = select(&event) {
                        return Some(found);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }

    /// Every event delivered within `window`
    pub fn drain(&self, window: Duration) -> Vec<Event> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        while let Ok(event) = self
            .rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        {
            events.push(event);
        }
        events
    }
}
