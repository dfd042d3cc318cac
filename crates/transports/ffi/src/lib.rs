//! C ABI for the rtc-bridge message boundary
//!
//! One process-wide [`Bridge`] is created on first use, configured from the
//! environment (`RTC_BRIDGE_*`, `RUST_LOG`). Every entry point contains
//! panics; a foreign caller only ever sees Error messages.
//!
//! Entry points return `0` on success or an error code when the failure
//! could not be delivered as a response (see `include/rtc_bridge.h`).

#![warn(clippy::all)]

use rtc_bridge_core::logging::init_tracing;
use rtc_bridge_core::{
    Bridge, BridgeConfig, Error, ErrorCode, Event, EventSink, RawMessage, Response,
};
use std::any::Any;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

/// Foreign callback receiving one message in wire layout
///
/// Pointer slots are only valid for the duration of the call.
pub type MessageCallback = Option<
    unsafe extern "C" fn(usr: *mut c_void, ty: usize, a: usize, b: usize, c: usize, d: usize),
>;

static BRIDGE: OnceLock<Result<Bridge, String>> = OnceLock::new();

fn bridge() -> Result<&'static Bridge, Error> {
    BRIDGE
        .get_or_init(|| {
            let config = BridgeConfig::from_env();
            init_tracing(&config);
            Bridge::new(config).map_err(|e| {
                error!("Failed to start bridge: {}", e);
                e.to_string()
            })
        })
        .as_ref()
        .map_err(|reason| Error::Internal(format!("Bridge unavailable: {}", reason)))
}

/// Opaque caller context handed back on every callback
#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// The caller guarantees its context may be used from the event thread.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn get(self) -> *mut c_void {
        self.0
    }
}

unsafe fn deliver(
    cb: unsafe extern "C" fn(*mut c_void, usize, usize, usize, usize, usize),
    usr: UserData,
    msg: &RawMessage,
) {
    cb(usr.get(), msg.ty, msg.a, msg.b, msg.c, msg.d);
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Set, or clear with a null `cb`, the process-wide event sink
///
/// Events are delivered on the `rtc-bridge-events` thread, one at a time.
///
/// # Safety
///
/// `cb` must stay callable, and `usr` valid for it, until the sink is
/// replaced or cleared.
#[no_mangle]
pub unsafe extern "C" fn rtc_bridge_on_event(cb: MessageCallback, usr: *mut c_void) -> usize {
    let usr = UserData(usr);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let sink = cb.map(|cb| {
            Arc::new(move |event: &Event| {
                let msg = event.to_raw();
                unsafe { deliver(cb, usr, &msg) };
            }) as Arc<dyn EventSink>
        });
        let installed = sink.is_some();
        bridge()?.set_event_sink(sink);
        info!(
            "Event sink {}",
            if installed { "installed" } else { "cleared" }
        );
        Ok::<_, Error>(())
    }));

    match outcome {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            error!("{}", err);
            err.code().as_raw()
        }
        Err(panic) => {
            error!("Panic while setting event sink: {}", panic_message(&*panic));
            ErrorCode::Internal.as_raw()
        }
    }
}

/// Perform one call
///
/// Response-requiring calls are answered through `cb` exactly once before
/// this returns (unless silenced by the closed-call policy). Free calls
/// ignore `cb`.
///
/// Returns `0`, or the code of a failure that could not be answered: a
/// missing response callback, or an undecodable call without one.
///
/// # Safety
///
/// Pointer slots must reference readable memory of the paired length for the
/// duration of the call. `cb`, when non-null, must be safe to call with
/// `usr` on the calling thread.
#[no_mangle]
pub unsafe extern "C" fn rtc_bridge_invoke(
    call_type: usize,
    a: usize,
    b: usize,
    c: usize,
    d: usize,
    cb: MessageCallback,
    usr: *mut c_void,
) -> usize {
    let msg = RawMessage::new(call_type, a, b, c, d);
    let usr = UserData(usr);
    let mut responded = false;

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let bridge = bridge()?;
        match cb {
            Some(cb) => {
                let mut respond = |response: &Response| {
                    responded = true;
                    unsafe { deliver(cb, usr, &response.to_raw()) };
                };
                bridge.invoke_raw(&msg, Some(&mut respond))
            }
            None => bridge.invoke_raw(&msg, None),
        }
    }));

    let err = match outcome {
        Ok(Ok(())) => return 0,
        Ok(Err(err)) => err,
        Err(panic) => Error::Internal(format!(
            "Panic in call {:#x}: {}",
            call_type,
            panic_message(&*panic)
        )),
    };

    match cb {
        Some(cb) if !responded => {
            deliver(cb, usr, &Response::error(&err).to_raw());
            0
        }
        _ => {
            // The dispatcher already reported its own unanswerable failures.
            if err.code() == ErrorCode::Internal {
                error!("{}", err);
            }
            err.code().as_raw()
        }
    }
}

/// Number of live handles of every kind, `0` if the bridge is unavailable
#[no_mangle]
pub extern "C" fn rtc_bridge_live_handles() -> usize {
    catch_unwind(|| bridge().map(Bridge::live_handles).unwrap_or(0)).unwrap_or(0)
}

/// Crate version as a NUL-terminated string
#[no_mangle]
pub extern "C" fn rtc_bridge_version() -> *const std::ffi::c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr().cast()
}
