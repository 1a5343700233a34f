//! Component F (spec §4.F): per-thread bookkeeping — which tasklet is
//! current, the lazily-built root tasklet every thread gets, and the
//! ordered chain of tasklets sharing this thread's native stack.
//!
//! Grounded in the teacher's scheduler run-queue
//! (`kernel/src/scheduler.rs` tracks "the currently running task" per
//! core the same way this tracks it per OS thread) and in
//! `original_source`'s `greenlet_thread_state.hpp`, which is exactly
//! this: one `ThreadState` per OS thread holding the current greenlet
//! and the ordered stack chain.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use crate::error::TaskletError;
use crate::stack;
use crate::tasklet::{State, Tasklet, TaskletInner};
use crate::value::Exception;

/// A single tracer per thread (spec §4.F/§4.E "Tracing"), invoked with
/// an event name and the `(source, destination)` pair of tasklets
/// involved in the switch that just completed.
pub type Tracer = Arc<dyn Fn(TraceEvent, &Tasklet, &Tasklet) -> Result<(), Exception> + Send + Sync>;

/// Which of the two event names spec §4.E fires a tracer with:
/// `switch` when arguments were handed over, `throw` when an exception
/// was staged instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Switch,
    Throw,
}

struct ThreadState {
    /// The implicit root tasklet every thread has (spec §4.D
    /// "Creation": "a root tasklet... is created lazily"), representing
    /// the thread's own native call stack before any tasklet ran.
    root: Tasklet,
    current: Tasklet,
    /// Tasklets sharing this thread's native stack, ordered by
    /// descending `stack_stop` — shallowest (closest to the thread's
    /// entry point) first, matching spec §4.B's chain order.
    chain: Vec<Tasklet>,
    /// This thread's installed tracer, if any (spec §3.2).
    tracer: Option<Tracer>,
}

impl Drop for ThreadState {
    /// Spec §9's stated default for tasklets still Suspended when their
    /// owning thread exits: force them Dead in place, without running
    /// any cleanup (see DESIGN.md Open Question 1). Also records this
    /// thread as exited so a later cross-thread `switch`/`throw` at it
    /// observes `MisuseKind::ThreadExited` rather than the generic
    /// wrong-thread error.
    fn drop(&mut self) {
        for t in &self.chain {
            let mut state = t.inner.state.lock().unwrap();
            if *state == State::Suspended {
                log::warn!(
                    "tasklet {} forced dead in place: its owning thread exited while it was suspended",
                    t.inner.id
                );
                *state = State::Dead;
            }
        }
        EXITED_THREADS.lock().unwrap().insert(std::thread::current().id());
    }
}

static EXITED_THREADS: Mutex<HashSet<ThreadId>> = Mutex::new(HashSet::new());

/// Whether `id` names a thread whose `ThreadState` has already been
/// torn down (spec §7 `MisuseKind::ThreadExited`).
pub(crate) fn thread_has_exited(id: ThreadId) -> bool {
    EXITED_THREADS.lock().unwrap().contains(&id)
}

thread_local! {
    static STATE: RefCell<Option<ThreadState>> = const { RefCell::new(None) };
}

fn make_root() -> Tasklet {
    let root = Tasklet {
        inner: std::sync::Arc::new(TaskletInner {
            id: 0,
            thread_id: std::thread::current().id(),
            state: std::sync::Mutex::new(State::Running),
            stack: std::sync::Mutex::new(stack::StackSpan {
                // The root's `floor` (spec.md's `stack_start`) is set
                // the first time something is evicted below it; until
                // then nothing needs to know its exact bound.
                ceiling: usize::MAX,
                floor: 0,
                saved: None,
            }),
            regs: std::sync::Mutex::new(crate::arch::RegisterFile::default()),
            parent: std::sync::Mutex::new(None),
            body: std::sync::Mutex::new(None),
            name: std::sync::Mutex::new(Some("<root>".to_string())),
            host_context: std::sync::Mutex::new(None),
            scratch: std::sync::Mutex::new(crate::tasklet::Scratch::Empty),
            woken_by: std::sync::Mutex::new(None),
        }),
    };
    root
}

fn with_state<R>(f: impl FnOnce(&mut ThreadStateHandle) -> R) -> R {
    STATE.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            let root = make_root();
            *slot = Some(ThreadState {
                current: root.clone(),
                chain: vec![root.clone()],
                root,
                tracer: None,
            });
        }
        let state = slot.as_mut().unwrap();
        f(&mut ThreadStateHandle { state })
    })
}

struct ThreadStateHandle<'a> {
    state: &'a mut ThreadState,
}

/// The currently running tasklet on this thread, building the lazy
/// root tasklet on first use (spec §4.D "Creation").
pub(crate) fn current() -> Tasklet {
    with_state(|h| h.state.current.clone())
}

pub(crate) fn root() -> Tasklet {
    with_state(|h| h.state.root.clone())
}

pub(crate) fn set_current(t: Tasklet) {
    with_state(|h| h.state.current = t);
}

/// Installs `tracer` as this thread's tracer (spec §6 `set_trace`),
/// returning whatever was previously installed.
pub(crate) fn set_tracer(tracer: Option<Tracer>) -> Option<Tracer> {
    with_state(|h| std::mem::replace(&mut h.state.tracer, tracer))
}

/// This thread's installed tracer, if any (spec §6 `get_trace`).
pub(crate) fn get_tracer() -> Option<Tracer> {
    with_state(|h| h.state.tracer.clone())
}

/// Evicts this thread's tracer (spec §4.E "Tracing": "An error raised
/// from the tracer removes it from the thread").
pub(crate) fn clear_tracer() {
    with_state(|h| h.state.tracer = None);
}

/// Registers a newly-born tasklet on this thread's chain, recording
/// where its stack range begins. Called once, at first entry.
pub(crate) fn register_born(t: &Tasklet, ceiling: usize) {
    with_state(|h| {
        t.inner.stack.lock().unwrap().ceiling = ceiling;
        let pos = h
            .state
            .chain
            .iter()
            .position(|c| c.inner.stack.lock().unwrap().floor < ceiling)
            .unwrap_or(h.state.chain.len());
        h.state.chain.insert(pos, t.clone());
    })
}

pub(crate) fn unregister(t: &Tasklet) {
    with_state(|h| h.state.chain.retain(|c| c != t));
}

/// Evicts every chain entry whose owned range lies inside (or
/// straddles) the region `target` is about to reclaim on the native
/// stack (spec §4.B): entries with `stack_stop` strictly less than
/// `target`'s are entirely nested inside it and evicted in full;
/// an entry whose range straddles `target`'s `stack_stop` has only
/// the portion below it evicted, since the rest sits above the range
/// that's about to be overwritten and stays live on the native stack.
/// `target` itself is skipped — it's the one about to be *restored*,
/// not reclaimed — and so is anything already evicted.
pub(crate) fn evict_down_to(current: &Tasklet, target: &Tasklet, live_from: usize) -> Result<(), TaskletError> {
    current.inner.stack.lock().unwrap().floor = live_from;

    let target_ceiling = target.inner.stack.lock().unwrap().ceiling;
    with_state(|h| -> Result<(), TaskletError> {
        for t in h.state.chain.iter() {
            let mut span = t.inner.stack.lock().unwrap();
            if span.saved.is_some() || !span.is_born() || t == target {
                continue;
            }
            if span.ceiling < target_ceiling {
                // Entirely inside the region `target` is about to
                // occupy: evict all of it.
                let limit = span.ceiling;
                drop(span);
                unsafe { stack::evict(&mut t.inner.stack.lock().unwrap(), limit)? };
            } else if span.floor < target_ceiling && target_ceiling < span.ceiling {
                // Straddles `target_ceiling`: only the portion below
                // it is about to be overwritten.
                drop(span);
                unsafe { stack::evict(&mut t.inner.stack.lock().unwrap(), target_ceiling)? };
            }
        }
        Ok(())
    })
}

/// Restores `target`'s evicted range back onto the real stack,
/// immediately before switching into it.
pub(crate) fn restore_for_resume(target: &Tasklet) {
    let mut span = target.inner.stack.lock().unwrap();
    if span.saved.is_some() {
        unsafe { stack::restore(&mut span) };
    }
}
