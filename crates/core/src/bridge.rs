//! Message dispatcher
//!
//! [`Bridge`] owns the object table, the engine runtime and the event emitter.
//! Calls execute on the caller's thread and are answered synchronously,
//! before [`Bridge::dispatch`] returns.

use crate::buffer::Buffer;
use crate::config::{BridgeConfig, ClosedCallPolicy};
use crate::connection::config::parse_options;
use crate::connection::Connection;
use crate::event::{EventEmitter, EventSink};
use crate::handle::Handle;
use crate::message::{Call, Event, RawMessage, Response};
use crate::object::{self, BridgeObject, ObjectTable};
use crate::runtime::EngineRuntime;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Response callback handed to [`Bridge::dispatch`]
pub type Respond<'r> = &'r mut dyn FnMut(&Response);

/// A bridge instance
pub struct Bridge {
    config: BridgeConfig,
    objects: Arc<ObjectTable>,
    emitter: EventEmitter,
    runtime: EngineRuntime,
}

impl Bridge {
    /// Start the engine runtime and the event thread
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Internal(format!("Invalid configuration: {}", e)))?;

        let runtime = EngineRuntime::new(config.worker_threads)?;
        let emitter = EventEmitter::new()?;

        info!(
            "Bridge started (workers: {}, closed calls: {:?})",
            config.worker_threads, config.closed_calls
        );

        Ok(Self {
            config,
            objects: Arc::new(ObjectTable::with_kinds(BridgeObject::kind)),
            emitter,
            runtime,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Replace the event sink, returning the previous one
    pub fn set_event_sink(&self, sink: Option<Arc<dyn EventSink>>) -> Option<Arc<dyn EventSink>> {
        self.emitter.set_sink(sink)
    }

    /// Number of live handles of every kind
    pub fn live_handles(&self) -> usize {
        self.objects.len()
    }

    /// Execute one call
    ///
    /// Free calls need no callback and never produce a response. Every other
    /// call needs `respond`, which is invoked exactly once before this returns,
    /// unless the closed-call policy is `silent` and the target was freed.
    ///
    /// Returns `Err` only when a response-requiring call arrives without a
    /// callback; the call is then not executed and the failure is also
    /// reported as an Error event.
    pub fn dispatch(&self, call: Call<'_>, respond: Option<Respond<'_>>) -> Result<()> {
        let ty = call.message_type();

        if !call.requires_response() {
            self.free(call);
            return Ok(());
        }

        let Some(respond) = respond else {
            return Err(self.report_unanswerable(Error::MissingResponseCallback(ty.as_raw())));
        };

        let target = silenceable_target(&call);
        match self.execute(call) {
            Ok(response) => respond(&response),
            Err(err) if self.is_silenced(target, &err) => {
                debug!("Dropping response to {:?}: {}", ty, err);
            }
            Err(err) => {
                debug!("{:?} failed: {}", ty, err);
                respond(&Response::error(&err));
            }
        }
        Ok(())
    }

    /// Execute one call and return its response, if any
    pub fn call(&self, call: Call<'_>) -> Result<Option<Response>> {
        let mut response = None;
        let mut respond = |r: &Response| response = Some(r.clone());
        self.dispatch(call, Some(&mut respond))?;
        Ok(response)
    }

    /// Decode and execute a call given in wire layout
    ///
    /// A call that fails to decode is answered with an Error response, or
    /// reported as an Error event when there is no callback.
    ///
    /// # Safety
    ///
    /// Every non-null pointer slot of `msg` must reference readable memory of
    /// the length given in the paired slot, valid for the whole call.
    pub unsafe fn invoke_raw(&self, msg: &RawMessage, respond: Option<Respond<'_>>) -> Result<()> {
        match Call::from_raw(msg) {
            Ok(call) => self.dispatch(call, respond),
            Err(err) => match respond {
                Some(respond) => {
                    debug!("Rejecting call {:#x}: {}", msg.ty, err);
                    respond(&Response::error(&err));
                    Ok(())
                }
                None => Err(self.report_unanswerable(err)),
            },
        }
    }

    fn report_unanswerable(&self, err: Error) -> Error {
        error!("{}", err);
        if self.emitter.has_sink() {
            self.emitter.emit(Event::error(&err, None));
        }
        err
    }

    /// Only a call on its own freed connection or channel goes unanswered
    fn is_silenced(&self, target: Option<Handle>, err: &Error) -> bool {
        if self.config.closed_calls != ClosedCallPolicy::Silent {
            return false;
        }
        match (target, err) {
            (Some(target), Error::Closed(handle)) if *handle == target => matches!(
                self.objects.retired_kind(target),
                Some("connection") | Some("channel")
            ),
            _ => false,
        }
    }

    fn execute(&self, call: Call<'_>) -> Result<Response> {
        let objects = &self.objects;
        let runtime = &self.runtime;

        match call {
            Call::BufferAllocate { len } => {
                let buffer = Buffer::allocate(objects, len)?;
                Ok(Response::BufferAllocate(buffer.view()?))
            }
            Call::BufferAccess { buffer } => {
                let buffer = object::resolve_buffer(objects, buffer)?;
                Ok(Response::BufferAccess(buffer.view()?))
            }

            Call::ConnectionAllocate { config } => {
                let connection =
                    Connection::allocate(objects, runtime, &self.emitter.sender(), config)?;
                Ok(Response::ConnectionAllocate {
                    connection: connection.handle(),
                })
            }
            Call::CreateOffer {
                connection,
                options,
            } => {
                let connection = object::resolve_connection(objects, connection)?;
                let description = connection.create_offer(runtime, parse_options(options)?)?;
                Ok(Response::CreateOffer { description })
            }
            Call::CreateAnswer {
                connection,
                options,
            } => {
                let connection = object::resolve_connection(objects, connection)?;
                let description = connection.create_answer(runtime, parse_options(options)?)?;
                Ok(Response::CreateAnswer { description })
            }
            Call::SetLocalDescription {
                connection,
                description,
            } => {
                object::resolve_connection(objects, connection)?
                    .set_local_description(runtime, description)?;
                Ok(Response::SetLocalDescription)
            }
            Call::SetRemoteDescription {
                connection,
                description,
            } => {
                object::resolve_connection(objects, connection)?
                    .set_remote_description(runtime, description)?;
                Ok(Response::SetRemoteDescription)
            }
            Call::AddIceCandidate {
                connection,
                candidate,
            } => {
                object::resolve_connection(objects, connection)?
                    .add_ice_candidate(runtime, candidate)?;
                Ok(Response::AddIceCandidate)
            }
            Call::CreateDataChannel {
                connection,
                options,
            } => {
                let connection = object::resolve_connection(objects, connection)?;
                let channel = connection.create_data_channel(
                    objects,
                    runtime,
                    &self.emitter.sender(),
                    parse_options(options)?,
                )?;
                Ok(Response::CreateDataChannel {
                    channel: channel.handle(),
                })
            }

            Call::ChannelSend { channel, buffer } => {
                let channel = object::resolve_channel(objects, channel)?;
                let buffer = object::resolve_buffer(objects, buffer)?;
                let sent = channel.send(&buffer, runtime)?;
                Ok(Response::ChannelSend { sent })
            }

            Call::BufferFree { .. } | Call::ConnectionFree { .. } | Call::ChannelFree { .. } => {
                Err(Error::Internal(format!(
                    "{:?} produces no response",
                    call.message_type()
                )))
            }
        }
    }

    fn free(&self, call: Call<'_>) {
        let (handle, expected) = match call {
            Call::BufferFree { buffer } => (buffer, "buffer"),
            Call::ConnectionFree { connection } => (connection, "connection"),
            Call::ChannelFree { channel } => (channel, "channel"),
            _ => return,
        };

        match self.objects.resolve(handle) {
            Ok(object) if object.kind() == expected => self.free_object(object),
            Ok(object) => warn!(
                "Ignoring {} free of {} handle {}",
                expected,
                object.kind(),
                handle
            ),
            Err(_) => debug!("Free of unknown or freed handle {}", handle),
        }
    }

    fn free_object(&self, object: BridgeObject) {
        match object {
            BridgeObject::Buffer(buffer) => buffer.free(&self.objects),
            BridgeObject::Connection(connection) => connection.free(&self.objects, &self.runtime),
            BridgeObject::Channel(channel) => channel.free(&self.objects, &self.runtime),
        }
    }

    /// Free every live object
    ///
    /// Handles are invalidated; the caller's copies become stale.
    pub fn shutdown(&self) {
        let mut objects: Vec<(Handle, BridgeObject)> = self.objects.drain();
        if objects.is_empty() {
            return;
        }
        info!("Releasing {} live objects", objects.len());

        // Channels before the connections that carry them.
        objects.sort_by_key(|(_, object)| match object {
            BridgeObject::Channel(_) => 0,
            BridgeObject::Connection(_) => 1,
            BridgeObject::Buffer(_) => 2,
        });
        for (_, object) in objects {
            self.free_object(object);
        }
    }
}

/// Handle whose closure may silence the response to `call`
fn silenceable_target(call: &Call<'_>) -> Option<Handle> {
    match *call {
        Call::CreateOffer { connection, .. }
        | Call::CreateAnswer { connection, .. }
        | Call::SetLocalDescription { connection, .. }
        | Call::SetRemoteDescription { connection, .. }
        | Call::AddIceCandidate { connection, .. }
        | Call::CreateDataChannel { connection, .. } => Some(connection),
        Call::ChannelSend { channel, .. } => Some(channel),
        _ => None,
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
