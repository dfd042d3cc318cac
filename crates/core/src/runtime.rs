//! Engine runtime
//!
//! The WebRTC engine is async; calls arrive on arbitrary foreign threads and
//! must complete before they return. Each engine operation is spawned onto a
//! dedicated multi-threaded tokio runtime and the calling thread blocks on the
//! join handle. Blocking on a join handle (rather than `Runtime::block_on`)
//! works from any thread, including runtime threads and the event thread, so
//! re-entrant calls from an event callback cannot deadlock the runtime.

use crate::{Error, Result};
use std::future::Future;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

/// Thread name of engine workers
pub const ENGINE_THREAD_NAME: &str = "rtc-bridge-engine";

/// Multi-threaded tokio runtime hosting the engine
pub struct EngineRuntime {
    runtime: Option<Runtime>,
}

impl EngineRuntime {
    /// Build the runtime with `worker_threads` workers
    pub fn new(worker_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name(ENGINE_THREAD_NAME)
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build engine runtime: {}", e)))?;

        debug!("Engine runtime started with {} workers", worker_threads);

        Ok(Self {
            runtime: Some(runtime),
        })
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| Error::Internal("Engine runtime shut down".to_string()))
    }

    /// Run a future on the engine and wait for its output
    pub fn run<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let task = self.runtime()?.spawn(future);
        futures::executor::block_on(task)
            .map_err(|e| Error::engine(format!("Engine task failed: {}", e)))
    }
}

impl Drop for EngineRuntime {
    fn drop(&mut self) {
        // Dropping a runtime from inside an async context panics;
        // background shutdown is allowed anywhere.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_returns_output() {
        let rt = EngineRuntime::new(1).unwrap();
        let value = rt.run(async { 40 + 2 }).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_run_on_engine_thread() {
        let rt = EngineRuntime::new(2).unwrap();
        let name = rt
            .run(async { std::thread::current().name().map(str::to_string) })
            .unwrap();
        assert_eq!(name.as_deref(), Some(ENGINE_THREAD_NAME));
    }

    #[test]
    fn test_panicking_task_is_engine_error() {
        let rt = EngineRuntime::new(1).unwrap();
        let err = rt
            .run(async {
                panic!("boom");
            })
            .unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::EngineFailure);
    }

    #[test]
    fn test_nested_run_from_engine_thread() {
        let rt = std::sync::Arc::new(EngineRuntime::new(2).unwrap());
        let inner = std::sync::Arc::clone(&rt);
        let value = rt
            .run(async move {
                // Blocks one worker while the nested task runs on another.
                tokio::task::block_in_place(|| inner.run(async { 7 }))
            })
            .unwrap()
            .unwrap();
        assert_eq!(value, 7);
    }
}
