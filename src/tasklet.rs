//! Component D (spec §4.D): the tasklet object and its lifecycle.
//!
//! Grounded in the teacher's `Tcb` (`kernel/src/tcb.rs`): a handle
//! (`Tasklet`) wrapping a reference-counted inner record
//! (`TaskletInner`) that owns the saved register file, the stack
//! span, and the parent link, the same three things `Tcb` keeps for
//! a kernel task — minus the teacher's capability table and region
//! list, which have no counterpart here (see DESIGN.md).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use crate::arch::RegisterFile;
use crate::error::{MisuseKind, TaskletError};
use crate::host::HostContext;
use crate::stack::StackSpan;
use crate::value::{Body, Exception, Payload};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// The four states spec §4.D derives from `(stack_stop, stack_start)`
/// (this crate's `StackSpan::ceiling`/`floor`, see `stack.rs`): Unborn
/// (never entered), Running (this thread's current tasklet), Suspended
/// (born, not current, stack possibly evicted), Dead (body has
/// returned, raised, or been torn down).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unborn,
    Running,
    Suspended,
    Dead,
}

pub(crate) struct TaskletInner {
    pub(crate) id: u64,
    pub(crate) thread_id: ThreadId,
    pub(crate) state: Mutex<State>,
    pub(crate) stack: Mutex<StackSpan>,
    pub(crate) regs: Mutex<RegisterFile>,
    pub(crate) parent: Mutex<Option<Tasklet>>,
    pub(crate) body: Mutex<Option<Body>>,
    pub(crate) name: Mutex<Option<String>>,
    pub(crate) host_context: Mutex<Option<Box<dyn HostContext>>>,
    /// Staged on the target right before a switch, consumed by the
    /// trampoline or by the woken-up `switch`/`throw` call on the
    /// other side (spec §3.3 "switch_scratch").
    pub(crate) scratch: Mutex<Scratch>,
    /// Stashed by the resumer immediately before the register-level
    /// jump into this tasklet, so that once it wakes up it knows who
    /// just switched into it (spec §4.E "Tracing": source = the
    /// tasklet we just came from). Taken (cleared) the moment it's
    /// read.
    pub(crate) woken_by: Mutex<Option<Tasklet>>,
}

#[derive(Default)]
pub(crate) enum Scratch {
    #[default]
    Empty,
    Payload(Payload),
    Raise(Exception),
}

/// A handle to a tasklet (spec §3.1). Cheap to clone — internally an
/// `Arc`, mirroring the teacher's own `TaskPtr` wrapper around `Tcb`
/// (`kernel/src/task_ptr.rs`).
#[derive(Clone)]
pub struct Tasklet {
    pub(crate) inner: Arc<TaskletInner>,
}

impl fmt::Debug for Tasklet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tasklet")
            .field("id", &self.inner.id)
            .field("state", &*self.inner.state.lock().unwrap())
            .finish()
    }
}

impl PartialEq for Tasklet {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Tasklet {}

impl Tasklet {
    /// Creates a new Unborn tasklet on the current thread, with
    /// `parent` set to the calling thread's current tasklet (spec
    /// §4.D "Creation").
    pub fn new(body: Body) -> Self {
        let parent = crate::registry::current();
        Tasklet {
            inner: Arc::new(TaskletInner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                thread_id: std::thread::current().id(),
                state: Mutex::new(State::Unborn),
                stack: Mutex::new(StackSpan::unborn()),
                regs: Mutex::new(RegisterFile::default()),
                parent: Mutex::new(Some(parent)),
                body: Mutex::new(Some(body)),
                name: Mutex::new(None),
                host_context: Mutex::new(None),
                scratch: Mutex::new(Scratch::Empty),
                woken_by: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> State {
        *self.inner.state.lock().unwrap()
    }

    pub fn is_dead(&self) -> bool {
        self.state() == State::Dead
    }

    /// Spec §6's supplemented `is_current` operation.
    pub fn is_current(&self) -> bool {
        crate::registry::current() == *self
    }

    pub fn name(&self) -> Option<String> {
        self.inner.name.lock().unwrap().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.inner.name.lock().unwrap() = Some(name.into());
    }

    pub fn parent(&self) -> Option<Tasklet> {
        self.inner.parent.lock().unwrap().clone()
    }

    /// Reassigns this tasklet's parent (spec §4.D "Parent
    /// reassignment"). Rejects a cycle (the proposed parent is `self`
    /// or a descendant of `self`) and rejects moving to a parent on a
    /// different OS thread once this tasklet has already run.
    pub fn set_parent(&self, new_parent: Tasklet) -> Result<(), TaskletError> {
        if new_parent.thread_id_raw() != self.inner.thread_id && self.state() != State::Unborn {
            return Err(TaskletError::Misuse(MisuseKind::CrossThreadParent));
        }
        let mut walker = Some(new_parent.clone());
        while let Some(t) = walker {
            if t == *self {
                return Err(TaskletError::Misuse(MisuseKind::CyclicParent));
            }
            walker = t.parent();
        }
        *self.inner.parent.lock().unwrap() = Some(new_parent);
        Ok(())
    }

    pub(crate) fn thread_id_raw(&self) -> ThreadId {
        self.inner.thread_id
    }

    /// Switches execution into this tasklet, carrying `payload`
    /// across (spec §4.E). Blocks the calling tasklet until something
    /// switches back into it.
    pub fn switch(&self, payload: Payload) -> Result<crate::value::Shaped, Exception> {
        crate::switch_::switch_to(self, payload)
    }

    /// Switches into this tasklet, but has it resume by raising
    /// `exc` instead of returning normally (spec §4.E "throw").
    pub fn throw(&self, exc: Exception) -> Result<crate::value::Shaped, Exception> {
        crate::switch_::throw_to(self, exc)
    }
}

/// Teardown (spec §4.D "Teardown"), run on a tasklet's owning thread
/// while at least one extra strong reference to it is held (so the
/// `Arc` doesn't hit zero and recursively drop out from under us
/// mid-switch): (a) the caller holding `t` counts as the "resurrect"
/// step, (b) switch into it throwing the exit sentinel so its body
/// unwinds, (c)/(d) once the switch returns, the caller's own `Arc`
/// drop (or the resurrected handle's, for the cross-thread path)
/// naturally performs the "re-check and release" step — nothing left
/// to do here, Rust's refcounting already is that check.
pub(crate) fn teardown_now(t: &Tasklet) {
    if t.state() != State::Suspended {
        return;
    }
    debug_assert_eq!(
        t.inner.thread_id,
        std::thread::current().id(),
        "teardown_now must run on the tasklet's own thread"
    );
    let _ = t.throw(crate::value::ExitSignal::as_exception());
}

impl Drop for Tasklet {
    /// Spec §4.D "Teardown": when the last handle to a Suspended,
    /// non-root tasklet drops, it must be resurrected long enough to
    /// run its own unwind. `Arc::strong_count` tells us whether this
    /// is really the last handle; if another clone is still alive
    /// (including the temporary one this function creates to survive
    /// the switch below), there's nothing to do — that other handle's
    /// own drop will make this same decision again.
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) > 1 {
            return;
        }
        let state = *self.inner.state.lock().unwrap();
        if state != State::Suspended {
            return;
        }
        if std::thread::current().id() != self.inner.thread_id {
            crate::cleanup::defer_foreign_teardown(Tasklet {
                inner: self.inner.clone(),
            });
            return;
        }
        let resurrected = Tasklet {
            inner: self.inner.clone(),
        };
        teardown_now(&resurrected);
        // `resurrected`'s own drop runs next (still inside this
        // function, as its scope ends): strong_count is 2 at that
        // point (this `self` plus `resurrected`), so it's a no-op, and
        // the final release happens via ordinary `Arc` drop glue once
        // both handles are gone.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tasklet_is_unborn() {
        let crate::tests_support::Fixture { .. } = crate::tests_support::Fixture::install();
        let t = Tasklet::new(Box::new(|_| Ok(crate::value::Value::new(()))));
        assert_eq!(t.state(), State::Unborn);
        assert!(!t.is_dead());
    }

    #[test]
    fn set_parent_rejects_cycle() {
        let crate::tests_support::Fixture { .. } = crate::tests_support::Fixture::install();
        let a = Tasklet::new(Box::new(|_| Ok(crate::value::Value::new(()))));
        let b = Tasklet::new(Box::new(|_| Ok(crate::value::Value::new(()))));
        b.set_parent(a.clone()).unwrap();
        assert!(matches!(
            a.set_parent(b.clone()),
            Err(TaskletError::Misuse(MisuseKind::CyclicParent))
        ));
    }
}
