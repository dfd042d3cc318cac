//! Objects stored in the handle table

use crate::buffer::Buffer;
use crate::channel::Channel;
use crate::connection::Connection;
use crate::handle::{Handle, HandleTable};
use crate::{Error, Result};
use std::sync::Arc;

/// Enum-tagged owner of every live bridge object
#[derive(Clone)]
pub enum BridgeObject {
    Buffer(Arc<Buffer>),
    Connection(Arc<Connection>),
    Channel(Arc<Channel>),
}

impl BridgeObject {
    /// Human-readable kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeObject::Buffer(_) => "buffer",
            BridgeObject::Connection(_) => "connection",
            BridgeObject::Channel(_) => "channel",
        }
    }
}

impl std::fmt::Debug for BridgeObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeObject::Buffer(b) => write!(f, "Buffer({})", b.handle()),
            BridgeObject::Connection(c) => write!(f, "Connection({})", c.handle()),
            BridgeObject::Channel(c) => write!(f, "Channel({})", c.handle()),
        }
    }
}

/// The process-wide object registry
pub type ObjectTable = HandleTable<BridgeObject>;

/// Register an object that needs to know its own handle
pub(crate) fn register<O>(
    objects: &ObjectTable,
    build: impl FnOnce(Handle) -> O,
    wrap: fn(Arc<O>) -> BridgeObject,
) -> Result<Arc<O>> {
    let mut created = None;
    objects.allocate_with(|handle| {
        let object = Arc::new(build(handle));
        created = Some(Arc::clone(&object));
        wrap(object)
    })?;
    created.ok_or_else(|| Error::Internal("object registration failed".to_string()))
}

/// Look up a live object, telling freed handles apart from unknown ones
pub(crate) fn resolve(objects: &ObjectTable, handle: Handle) -> Result<BridgeObject> {
    objects.resolve(handle).map_err(|e| {
        if objects.is_retired(handle) {
            Error::Closed(handle)
        } else {
            e
        }
    })
}

macro_rules! resolve_kind {
    ($name:ident, $variant:ident, $ty:ty, $kind:literal) => {
        pub(crate) fn $name(objects: &ObjectTable, handle: Handle) -> Result<Arc<$ty>> {
            match resolve(objects, handle)? {
                BridgeObject::$variant(object) => Ok(object),
                _ => Err(Error::WrongKind {
                    handle,
                    expected: $kind,
                }),
            }
        }
    };
}

resolve_kind!(resolve_buffer, Buffer, Buffer, "buffer");
resolve_kind!(resolve_connection, Connection, Connection, "connection");
resolve_kind!(resolve_channel, Channel, Channel, "channel");
