//! Byte buffers shared with the caller
//!
//! A buffer's storage is allocated once, zero-filled, and never resized, so
//! the pointer handed out by Allocate and Access stays valid until Free.

use crate::handle::Handle;
use crate::message::BufferView;
use crate::object::{self, BridgeObject, ObjectTable};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

struct BufferState {
    closed: bool,
    data: Box<[u8]>,
}

/// Fixed-size byte storage registered in the handle table
pub struct Buffer {
    handle: Handle,
    state: Mutex<BufferState>,
}

impl Buffer {
    /// Allocate `len` zeroed bytes and register them
    pub fn allocate(objects: &ObjectTable, len: usize) -> Result<Arc<Buffer>> {
        let mut data = Vec::<u8>::new();
        data.try_reserve_exact(len).map_err(|e| {
            Error::Internal(format!("Failed to allocate {} byte buffer: {}", len, e))
        })?;
        data.resize(len, 0u8);
        let data = data.into_boxed_slice();
        let buffer = object::register(
            objects,
            |handle| Buffer {
                handle,
                state: Mutex::new(BufferState {
                    closed: false,
                    data,
                }),
            },
            BridgeObject::Buffer,
        )?;
        info!("Allocated buffer {} ({} bytes)", buffer.handle, len);
        Ok(buffer)
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Pointer and length of the storage; `(null, 0)` when empty
    pub fn view(&self) -> Result<BufferView> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Closed(self.handle));
        }
        let len = state.data.len();
        let ptr = if len == 0 {
            std::ptr::null_mut()
        } else {
            state.data.as_mut_ptr()
        };
        Ok(BufferView {
            handle: self.handle,
            ptr,
            len,
        })
    }

    /// Run `f` over the current contents
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let state = self.state.lock();
        if state.closed {
            return Err(Error::Closed(self.handle));
        }
        Ok(f(&state.data))
    }

    /// Release the storage; returns `false` if already freed
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.data = Box::default();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Free the buffer and drop its handle mapping
    pub fn free(&self, objects: &ObjectTable) {
        if self.close() {
            objects.invalidate(self.handle);
            info!("Freed buffer {}", self.handle);
        }
    }
}
