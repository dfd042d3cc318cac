//! C ABI entry points, driven the way a foreign host would
//!
//! All tests share the process-wide bridge, so none of them asserts on the
//! global live handle count.

use rtc_bridge_ffi::{
    rtc_bridge_invoke, rtc_bridge_live_handles, rtc_bridge_on_event, rtc_bridge_version,
};
use std::ffi::{c_void, CStr};
use std::sync::mpsc::{channel, Sender};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const ERROR: usize = 0xffff;
const BUFFER_ALLOCATE: usize = 0x8001;
const BUFFER_FREE: usize = 0x8002;
const BUFFER_ACCESS: usize = 0x8003;
const CONNECTION_ALLOCATE: usize = 0x9001;
const CONNECTION_FREE: usize = 0x9002;
const CONNECTION_CREATE_OFFER: usize = 0x9003;

/// One message copied out of a callback
#[derive(Debug, Clone, PartialEq, Eq)]
struct Message {
    ty: usize,
    a: usize,
    b: usize,
    c: usize,
    d: usize,
    payload: Vec<u8>,
}

impl Message {
    unsafe fn copy(ty: usize, a: usize, b: usize, c: usize, d: usize) -> Self {
        let (ptr, len) = match ty {
            ERROR => (b, c),
            CONNECTION_CREATE_OFFER => (a, b),
            _ => (0, 0),
        };
        let payload = if ptr == 0 {
            Vec::new()
        } else {
            std::slice::from_raw_parts(ptr as *const u8, len).to_vec()
        };
        Message {
            ty,
            a,
            b,
            c,
            d,
            payload,
        }
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

unsafe extern "C" fn collect(usr: *mut c_void, ty: usize, a: usize, b: usize, c: usize, d: usize) {
    let out = &mut *(usr as *mut Vec<Message>);
    out.push(Message::copy(ty, a, b, c, d));
}

unsafe extern "C" fn forward(usr: *mut c_void, ty: usize, a: usize, b: usize, c: usize, d: usize) {
    let tx = &*(usr as *const Mutex<Sender<Message>>);
    let _ = tx.lock().unwrap().send(Message::copy(ty, a, b, c, d));
}

fn invoke(ty: usize, a: usize, b: usize, c: usize, d: usize) -> (usize, Vec<Message>) {
    let mut out: Vec<Message> = Vec::new();
    let status = unsafe {
        rtc_bridge_invoke(
            ty,
            a,
            b,
            c,
            d,
            Some(collect),
            &mut out as *mut Vec<Message> as *mut c_void,
        )
    };
    (status, out)
}

/// Call that must be answered with exactly one message
fn answer(ty: usize, a: usize, b: usize, c: usize, d: usize) -> Message {
    let (status, mut out) = invoke(ty, a, b, c, d);
    assert_eq!(status, 0);
    assert_eq!(out.len(), 1, "responses: {:?}", out);
    out.remove(0)
}

#[test]
fn test_buffer_lifecycle() {
    let allocated = answer(BUFFER_ALLOCATE, 4, 0, 0, 0);
    assert_eq!(allocated.ty, BUFFER_ALLOCATE);
    assert_ne!(allocated.a, 0);
    assert_ne!(allocated.b, 0);
    assert_eq!(allocated.c, 4);
    assert!(rtc_bridge_live_handles() >= 1);

    unsafe { std::ptr::copy_nonoverlapping(b"ping".as_ptr(), allocated.b as *mut u8, 4) };

    let accessed = answer(BUFFER_ACCESS, allocated.a, 0, 0, 0);
    assert_eq!((accessed.a, accessed.b, accessed.c), (allocated.a, allocated.b, 4));
    let bytes = unsafe { std::slice::from_raw_parts(accessed.b as *const u8, accessed.c) };
    assert_eq!(bytes, b"ping");

    // Free calls produce no response, even with a callback.
    let (status, out) = invoke(BUFFER_FREE, allocated.a, 0, 0, 0);
    assert_eq!(status, 0);
    assert!(out.is_empty());

    let closed = answer(BUFFER_ACCESS, allocated.a, 0, 0, 0);
    assert_eq!((closed.ty, closed.a), (ERROR, 4));
}

#[test]
fn test_free_without_callback() {
    let allocated = answer(BUFFER_ALLOCATE, 0, 0, 0, 0);
    assert_eq!(allocated.b, 0);
    assert_eq!(allocated.c, 0);

    let status =
        unsafe { rtc_bridge_invoke(BUFFER_FREE, allocated.a, 0, 0, 0, None, std::ptr::null_mut()) };
    assert_eq!(status, 0);

    // Unknown handles are a silent no-op.
    let status =
        unsafe { rtc_bridge_invoke(BUFFER_FREE, 0xdead, 0, 0, 0, None, std::ptr::null_mut()) };
    assert_eq!(status, 0);
}

#[test]
fn test_invalid_call_type_is_answered() {
    let error = answer(0x4242, 0, 0, 0, 0);
    assert_eq!(error.ty, ERROR);
    assert_eq!(error.a, 1);
    assert!(error.text().contains("0x4242"), "message: {}", error.text());
}

#[test]
fn test_missing_callback_returns_code() {
    let status =
        unsafe { rtc_bridge_invoke(BUFFER_ALLOCATE, 8, 0, 0, 0, None, std::ptr::null_mut()) };
    assert_eq!(status, 2);

    let status = unsafe { rtc_bridge_invoke(0x4343, 0, 0, 0, 0, None, std::ptr::null_mut()) };
    assert_eq!(status, 1);
}

#[test]
fn test_null_payload_with_length() {
    let error = answer(CONNECTION_ALLOCATE, 0, 10, 0, 0);
    assert_eq!(error.ty, ERROR);
    assert_eq!(error.a, 5);
}

#[test]
fn test_connection_offer() {
    let config = br#"{"iceServers":[]}"#;
    let allocated = answer(
        CONNECTION_ALLOCATE,
        config.as_ptr() as usize,
        config.len(),
        0,
        0,
    );
    assert_eq!(allocated.ty, CONNECTION_ALLOCATE);
    let connection = allocated.a;
    assert_ne!(connection, 0);

    let offer = answer(CONNECTION_CREATE_OFFER, connection, 0, 0, 0);
    assert_eq!(offer.ty, CONNECTION_CREATE_OFFER);
    let description: serde_json::Value = serde_json::from_slice(&offer.payload).unwrap();
    assert_eq!(description["type"], "offer");
    assert!(description["sdp"].as_str().unwrap().starts_with("v=0"));

    let (status, out) = invoke(CONNECTION_FREE, connection, 0, 0, 0);
    assert_eq!(status, 0);
    assert!(out.is_empty());

    let closed = answer(CONNECTION_CREATE_OFFER, connection, 0, 0, 0);
    assert_eq!((closed.ty, closed.a), (ERROR, 4));
}

#[test]
fn test_event_sink_receives_unanswerable_errors() {
    let (tx, rx) = channel::<Message>();
    // Leaked: the sink may still be called until it is cleared.
    let usr = Box::into_raw(Box::new(Mutex::new(tx))) as *mut c_void;
    assert_eq!(unsafe { rtc_bridge_on_event(Some(forward), usr) }, 0);

    let status = unsafe {
        rtc_bridge_invoke(CONNECTION_ALLOCATE, 0, 0, 0, 0, None, std::ptr::null_mut())
    };
    assert_eq!(status, 2);

    let deadline = Instant::now() + Duration::from_secs(10);
    let event = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = rx.recv_timeout(remaining).expect("no error event");
        if event.ty == ERROR && event.text().contains("0x9001") {
            break event;
        }
    };
    assert_eq!(event.a, 2);
    assert_eq!(event.d, 0);

    assert_eq!(unsafe { rtc_bridge_on_event(None, std::ptr::null_mut()) }, 0);
}

#[test]
fn test_version() {
    let version = unsafe { CStr::from_ptr(rtc_bridge_version()) };
    assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
}
