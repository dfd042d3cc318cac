//! Buffer allocate / access / free through the dispatcher

mod harness;

use harness::*;
use rtc_bridge_core::{Call, ErrorCode, Handle, Response};

#[test]
fn test_allocate_access_free() {
    let bridge = new_bridge();

    let view = allocate_buffer(&bridge, 5);
    assert_eq!(view.len, 5);
    assert!(!view.ptr.is_null());

    let access = match respond(&bridge, Call::BufferAccess { buffer: view.handle }) {
        Response::BufferAccess(access) => access,
        other => panic!("unexpected response: {:?}", other),
    };
    assert_eq!(access, view);
    let bytes = unsafe { std::slice::from_raw_parts(access.ptr, access.len) };
    assert_eq!(bytes, &[0u8; 5]);

    bridge
        .dispatch(Call::BufferFree { buffer: view.handle }, None)
        .unwrap();

    let (code, _) = expect_error(&bridge, Call::BufferAccess { buffer: view.handle });
    assert_eq!(code, ErrorCode::Closed);
    assert_eq!(bridge.live_handles(), 0);
}

#[test]
fn test_zero_length_buffer() {
    let bridge = new_bridge();

    let view = allocate_buffer(&bridge, 0);
    assert!(view.ptr.is_null());
    assert_eq!(view.len, 0);
    assert_ne!(view.handle.as_raw(), 0);

    match respond(&bridge, Call::BufferAccess { buffer: view.handle }) {
        Response::BufferAccess(access) => {
            assert!(access.ptr.is_null());
            assert_eq!(access.len, 0);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_caller_writes_are_kept() {
    let bridge = new_bridge();
    let handle = buffer_with(&bridge, b"hello");

    match respond(&bridge, Call::BufferAccess { buffer: handle }) {
        Response::BufferAccess(view) => {
            let bytes = unsafe { std::slice::from_raw_parts(view.ptr, view.len) };
            assert_eq!(bytes, b"hello");
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_double_free_is_noop() {
    let bridge = new_bridge();
    let first = allocate_buffer(&bridge, 8).handle;

    bridge.dispatch(Call::BufferFree { buffer: first }, None).unwrap();
    bridge.dispatch(Call::BufferFree { buffer: first }, None).unwrap();

    // The slot is reused under a new generation; the stale handle stays dead.
    let second = allocate_buffer(&bridge, 8).handle;
    assert_ne!(first, second);
    bridge.dispatch(Call::BufferFree { buffer: first }, None).unwrap();
    assert_eq!(bridge.live_handles(), 1);

    let (code, _) = expect_error(&bridge, Call::BufferAccess { buffer: first });
    assert_eq!(code, ErrorCode::Closed);
    assert!(matches!(
        respond(&bridge, Call::BufferAccess { buffer: second }),
        Response::BufferAccess(_)
    ));
}

#[test]
fn test_unknown_handle() {
    let bridge = new_bridge();

    let (code, message) = expect_error(
        &bridge,
        Call::BufferAccess {
            buffer: Handle::from_raw(0xdead),
        },
    );
    assert_eq!(code, ErrorCode::HandleNotFound);
    assert!(message.contains("0xdead"));

    // Free of an unknown handle is silent.
    bridge
        .dispatch(
            Call::BufferFree {
                buffer: Handle::from_raw(0xdead),
            },
            None,
        )
        .unwrap();
}

#[test]
fn test_free_with_callback_produces_no_response() {
    let bridge = new_bridge();
    let handle = allocate_buffer(&bridge, 1).handle;

    let response = bridge.call(Call::BufferFree { buffer: handle }).unwrap();
    assert!(response.is_none());
    assert_eq!(bridge.live_handles(), 0);
}

#[test]
fn test_oversized_allocation_is_answered() {
    let bridge = new_bridge();

    for len in [usize::MAX, isize::MAX as usize, isize::MAX as usize - 1] {
        let (code, message) = expect_error(&bridge, Call::BufferAllocate { len });
        assert_eq!(code, ErrorCode::Internal, "len: {}", len);
        assert!(message.contains("allocate"), "message: {}", message);
    }
    assert_eq!(bridge.live_handles(), 0);

    // The bridge keeps serving calls afterwards.
    let view = allocate_buffer(&bridge, 16);
    assert_eq!(view.len, 16);
}
