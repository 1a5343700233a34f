//! Stackful, cooperatively scheduled coroutines ("tasklets") for
//! embedding in a host scripting runtime.
//!
//! A tasklet is a unit of execution with its own saved register state
//! that shares its OS thread's native call stack with every other
//! tasklet on that thread: only one tasklet per thread ever actually
//! runs at a time, and control only ever moves between them when one
//! explicitly switches into another. There is no preemption, no
//! async I/O integration, and no migrating a tasklet to a different
//! thread once it has started — all of that is the host's job, not
//! this crate's.
//!
//! The entry points most callers need are [`Tasklet::new`],
//! [`Tasklet::switch`], [`current`], and [`Runtime::install`].

#![allow(dead_code)]

pub mod arch;
mod cleanup;
mod context;
pub mod error;
pub mod host;
mod registry;
mod stack;
pub mod tasklet;
mod switch_;
pub mod value;

#[cfg(test)]
mod tests_support;

use std::sync::OnceLock;

pub use error::{MisuseKind, TaskletError};
pub use host::{Host, HostContext, NullHost, PendingJob};
pub use registry::{TraceEvent, Tracer};
pub use tasklet::{State, Tasklet};
pub use value::{Body, Exception, ExitSignal, Payload, Shaped, Value};

static HOST: OnceLock<Box<dyn Host>> = OnceLock::new();

/// The single `Host` installed for this process (spec §6). Falls back
/// to [`NullHost`] the first time anything needs a host and none has
/// been installed yet — the same "works standalone, richer with a
/// real embedding" default the engine's own tests rely on.
pub(crate) fn global_host() -> &'static dyn Host {
    HOST.get_or_init(|| Box::new(NullHost)).as_ref()
}

/// Tunable knobs for the engine (spec §9). The only one that exists
/// today controls the initial capacity of a stack-eviction buffer;
/// everything else about the engine's behavior is fixed by spec.
#[derive(Debug, Clone, Copy)]
pub struct TaskletConfig {
    pub initial_copy_capacity: usize,
}

impl Default for TaskletConfig {
    fn default() -> Self {
        TaskletConfig {
            initial_copy_capacity: stack::INITIAL_COPY_CAPACITY,
        }
    }
}

/// Process-wide installation point for a [`Host`] implementation.
///
/// Grounded in the teacher's `Kernel::from_tasks`/`Kernel::new`
/// constructors (`kernel/src/lib.rs`), which are likewise the single
/// place a concrete set of tasks and an idle task get wired into one
/// kernel instance before anything runs.
pub struct Runtime;

impl Runtime {
    /// Installs `host` as the process-wide [`Host`]. Only the first
    /// call on a given process has any effect; later calls are
    /// no-ops, since every tasklet created so far may already be
    /// holding references that assume one fixed host.
    pub fn install(host: impl Host) {
        let _ = HOST.set(Box::new(host));
    }

    /// Like [`Runtime::install`], additionally recording `config`.
    /// Currently `config` only affects newly-allocated eviction
    /// buffers (spec §9); it has no effect on tasklets already alive.
    pub fn with_config(host: impl Host, config: TaskletConfig) {
        CONFIG.set(config);
        Self::install(host);
    }
}

struct ConfigCell(std::sync::Mutex<TaskletConfig>);
impl ConfigCell {
    const fn new() -> Self {
        ConfigCell(std::sync::Mutex::new(TaskletConfig {
            initial_copy_capacity: stack::INITIAL_COPY_CAPACITY,
        }))
    }
    fn set(&self, config: TaskletConfig) {
        *self.0.lock().unwrap() = config;
    }
    fn get(&self) -> TaskletConfig {
        *self.0.lock().unwrap()
    }
}
static CONFIG: ConfigCell = ConfigCell::new();

/// The initial capacity a freshly allocated stack-eviction buffer is
/// given (spec §9's one configuration knob), as last set by
/// [`Runtime::with_config`] — [`stack::INITIAL_COPY_CAPACITY`] if
/// nothing has overridden it.
pub(crate) fn initial_copy_capacity() -> usize {
    CONFIG.get().initial_copy_capacity
}

/// The tasklet currently running on this thread (spec §4.F). Building
/// a thread's implicit root tasklet the first time this (or anything
/// else tasklet-related) is called on it.
pub fn current() -> Tasklet {
    registry::current()
}

/// This thread's root tasklet — the one representing its native call
/// stack before any tasklet was ever switched into (spec §4.D
/// "Creation").
pub fn root() -> Tasklet {
    registry::root()
}

/// Services this thread's share of the cross-thread cleanup queue
/// (spec §4.G): every tasklet belonging to this thread whose last
/// handle was dropped elsewhere gets the same resurrect-and-throw
/// teardown [`Drop for Tasklet`](Tasklet) runs for a same-thread drop.
/// A host with its own idle/pending-call hook should call this
/// periodically, since nothing else on this thread triggers it.
/// Returns the ids of the tasklets torn down.
pub fn reap_cleanup_queue() -> Vec<u64> {
    cleanup::reap_pending()
}

/// Installs `tracer` as this thread's tracer (spec §6 `set_trace`),
/// returning whatever was previously installed.
pub fn set_trace(tracer: Option<Tracer>) -> Option<Tracer> {
    registry::set_tracer(tracer)
}

/// This thread's installed tracer, if any (spec §6 `get_trace`).
pub fn get_trace() -> Option<Tracer> {
    registry::get_tracer()
}
