use crate::value::{Exception, Payload, Value};

/// Per-thread execution context the host runtime maintains (spec
/// §4.C): call-frame chain, recursion depth, current exception triple,
/// tracing flag, contextvars context. This crate does not know the
/// concrete shape of any of that — it only needs to capture it,
/// install it, and bump a version counter when contextvars come back
/// (spec §4.C, last bullet). Grounded in `original_source`'s
/// `TPythonState.cpp`/`greenlet_thread_state.hpp` for *what* the
/// shuttled fields are; spec §4.C already enumerates them.
pub trait HostContext: Send + 'static {
    /// Invalidates any cache that assumed the contextvars context was
    /// unchanged. A no-op for hosts without a contextvars analogue.
    fn bump_context_version(&mut self) {}
}

/// The context used when no host is installed (unit tests, and pure
/// Rust embeddings with no surrounding scripting runtime).
#[derive(Debug, Default)]
pub struct NullContext;

impl HostContext for NullContext {}

/// A unit of deferred work, handed to the host's pending-call
/// primitive (spec §6, "a pending-call primitive usable from any
/// thread without the execution lock"; spec §4.G/§5).
pub type PendingJob = Box<dyn FnOnce() + Send>;

/// The four capabilities spec §6 says the core requires "from the
/// host": reading/writing the thread's execution context, invoking a
/// callable, a pending-call primitive, and (per spec §5's reentrancy
/// hazard note) disabling/enabling GC around context capture.
///
/// Exactly one `Host` is installed per process (see
/// [`crate::Runtime::install`]) — mirroring the fact that a real
/// embedding (e.g. greenlet inside CPython) is always compiled
/// against one concrete host, never generic over many.
pub trait Host: Send + Sync + 'static {
    fn capture_context(&self) -> Box<dyn HostContext>;
    fn install_context(&self, context: Box<dyn HostContext>);

    /// The callable-invocation primitive (spec §6). Defaults to simply
    /// calling the body; a host may override this to wrap invocation
    /// with its own call-depth tracking or frame-chain bookkeeping.
    fn invoke(&self, body: crate::value::Body, payload: Payload) -> Result<Value, Exception> {
        body(payload)
    }

    /// Schedules `job` to run on this thread without requiring the
    /// host's global execution lock (spec §6); used by the cross-
    /// thread cleanup queue (spec §4.G) and by native TLS destructors
    /// on platforms that support them (spec §5).
    fn pending_call(&self, job: PendingJob);

    /// Brackets context-capture points that may allocate (spec §5,
    /// "Reentrancy hazard"). No-op by default.
    fn gc_disable(&self) {}
    fn gc_enable(&self) {}
}

/// The `Host` used when the engine is embedded with no surrounding
/// scripting runtime (this crate's own tests, and pure-Rust callers
/// that only want stackful coroutines with no host context to
/// shuttle).
#[derive(Default)]
pub struct NullHost;

impl Host for NullHost {
    fn capture_context(&self) -> Box<dyn HostContext> {
        Box::new(NullContext)
    }

    fn install_context(&self, _context: Box<dyn HostContext>) {}

    fn pending_call(&self, job: PendingJob) {
        // No thread to hand this off to without a host-provided
        // scheduler; run it inline immediately.
        job();
    }
}
