//! Component E (spec §4.E): the switch orchestrator. Everything else
//! in this crate exists to make the handful of functions in this
//! module correct: they are the only place a register-level jump
//! actually happens.
//!
//! Grounded in the teacher's `Kernel::syscall` dispatch
//! (`kernel/src/lib.rs`), which is the one place the teacher's kernel
//! crosses from "ordinary Rust control flow" into "something that
//! changes which task is running" — the same seam this module sits on.

use std::sync::Arc;

use crate::arch::{self, RegisterFile};
use crate::context;
use crate::error::TaskletError;
use crate::host::Host;
use crate::registry;
use crate::registry::TraceEvent;
use crate::tasklet::{Scratch, State, Tasklet, TaskletInner};
use crate::value::{Exception, ExitSignal, Payload, Shaped, Value};

/// Walks up from `target` while it's Dead, landing on the first live
/// ancestor (spec §4.E, "switching to a dead tasklet switches instead
/// into its nearest living ancestor"). Falls back to the thread's root.
fn effective_target(target: &Tasklet) -> Tasklet {
    let mut candidate = target.clone();
    while candidate.state() == State::Dead {
        candidate = match candidate.parent() {
            Some(p) => p,
            None => return registry::root(),
        };
    }
    candidate
}

fn validate(target: &Tasklet) -> Result<(), TaskletError> {
    if registry::thread_has_exited(target.thread_id_raw()) {
        return Err(TaskletError::Misuse(crate::error::MisuseKind::ThreadExited));
    }
    if target.thread_id_raw() != std::thread::current().id() {
        return Err(TaskletError::Misuse(crate::error::MisuseKind::WrongThread));
    }
    Ok(())
}

pub(crate) fn switch_to(target: &Tasklet, payload: Payload) -> Result<Shaped, Exception> {
    do_switch(target, Scratch::Payload(payload))
}

pub(crate) fn throw_to(target: &Tasklet, exc: Exception) -> Result<Shaped, Exception> {
    do_switch(target, Scratch::Raise(exc))
}

fn do_switch(target: &Tasklet, outgoing: Scratch) -> Result<Shaped, Exception> {
    if let Err(e) = validate(target) {
        return Err(Exception::new(Value::new(e)));
    }
    let target = effective_target(target);
    let current = registry::current();
    let event = match &outgoing {
        Scratch::Raise(_) => TraceEvent::Throw,
        _ => TraceEvent::Switch,
    };

    if current == target {
        // Switching to yourself is a same-thread no-op handoff: the
        // staged value comes straight back, but it still counts as a
        // completed switch for tracing purposes (spec §8 R2).
        if let Err(e) = fire_trace(event, &current, &current) {
            return Err(e);
        }
        return match outgoing {
            Scratch::Payload(p) => Ok(p.into_shaped()),
            Scratch::Raise(e) => Err(e),
            Scratch::Empty => Ok(Shaped::Unit),
        };
    }

    *target.inner.scratch.lock().unwrap() = outgoing;

    let host = crate::global_host();
    if let Err(e) = raw_switch(host, &current, &target) {
        return Err(Exception::new(Value::new(e)));
    }

    // --- we have resumed; `current` is this tasklet itself ---
    let source = current.inner.woken_by.lock().unwrap().take();
    let outcome = std::mem::take(&mut *current.inner.scratch.lock().unwrap());
    let event = match &outcome {
        Scratch::Raise(_) => TraceEvent::Throw,
        _ => TraceEvent::Switch,
    };
    if let Some(source) = source {
        if let Err(e) = fire_trace(event, &source, &current) {
            return Err(e);
        }
    }

    match outcome {
        Scratch::Payload(p) => Ok(p.into_shaped()),
        Scratch::Raise(e) => Err(e),
        Scratch::Empty => Ok(Shaped::Unit),
    }
}

/// Invokes this thread's tracer, if any (spec §4.E "Tracing"). A
/// tracer that errors is evicted and its error becomes the outcome of
/// the switch that was in progress (spec §4.E: "converts the
/// in-progress switch into an exception delivery at the destination").
fn fire_trace(event: TraceEvent, source: &Tasklet, destination: &Tasklet) -> Result<(), Exception> {
    let Some(tracer) = registry::get_tracer() else {
        return Ok(());
    };
    if let Err(e) = tracer(event, source, destination) {
        log::warn!("tracer raised; evicting it from this thread");
        registry::clear_tracer();
        return Err(e);
    }
    Ok(())
}

/// Performs one full switch: stages the host context, evicts/restores
/// the stack chain, and does the register-level jump (spec §4.E
/// steps 1-4). Returns once something switches back into `from`.
fn raw_switch(host: &dyn Host, from: &Tasklet, to: &Tasklet) -> Result<(), TaskletError> {
    context::capture_outgoing(host, &from.inner);
    *from.inner.state.lock().unwrap() = State::Suspended;
    registry::set_current(to.clone());

    let here: u8 = 0;
    let live_from = &here as *const u8 as usize;
    if let Err(e) = registry::evict_down_to(from, to, live_from) {
        // Abort in place: undo the bookkeeping flips above and leave
        // both tasklets exactly as they were (spec §7, Allocation).
        *from.inner.state.lock().unwrap() = State::Running;
        registry::set_current(from.clone());
        return Err(e);
    }
    registry::restore_for_resume(to);

    // So that when `to` wakes up — possibly much later, via a
    // completely different call stack — it knows who just switched
    // into it (spec §4.E "Tracing": source = the tasklet we just came
    // from).
    *to.inner.woken_by.lock().unwrap() = Some(from.clone());

    let mut out = RegisterFile::default();
    let born = to.inner.stack.lock().unwrap().is_born();
    *to.inner.state.lock().unwrap() = State::Running;
    if born {
        let target_regs = *to.inner.regs.lock().unwrap();
        unsafe { arch::switch_resume(&mut out, &target_regs) };
    } else {
        let arg = Arc::into_raw(to.inner.clone()) as *mut ();
        unsafe { arch::switch_first_entry(&mut out, trampoline_entry, arg) };
    }

    // --- execution resumes here once something switches back into `from` ---
    *from.inner.regs.lock().unwrap() = out;
    *from.inner.state.lock().unwrap() = State::Running;
    registry::set_current(from.clone());
    context::install_incoming(host, &from.inner);
    Ok(())
}

/// The first-entry trampoline (spec §4.D "Creation" / "Normal exit").
/// Runs once, on a brand new tasklet's very first switch-in; consumes
/// the body, invokes it through the host, and on return tears down
/// into the next tasklet without ever returning to its caller.
unsafe extern "C" fn trampoline_entry(arg: *mut ()) -> ! {
    let here: u8 = 0;
    let ceiling = &here as *const u8 as usize;

    let inner = unsafe { Arc::from_raw(arg as *const TaskletInner) };
    let me = Tasklet { inner };
    registry::register_born(&me, ceiling);

    let incoming = std::mem::take(&mut *me.inner.scratch.lock().unwrap());
    let host = crate::global_host();
    context::install_incoming(host, &me.inner);

    let event = match &incoming {
        Scratch::Raise(_) => TraceEvent::Throw,
        _ => TraceEvent::Switch,
    };
    if let Some(source) = me.inner.woken_by.lock().unwrap().take() {
        if let Err(e) = fire_trace(event, &source, &me) {
            return finish(me, Err(e));
        }
    }

    let payload = match incoming {
        Scratch::Raise(exc) => return finish(me, Err(exc)),
        Scratch::Payload(payload) => payload,
        Scratch::Empty => Payload::None,
    };
    let body = me
        .inner
        .body
        .lock()
        .unwrap()
        .take()
        .expect("tasklet body consumed exactly once");
    let result = host.invoke(body, payload);

    finish(me, result)
}

/// Normal or exceptional exit of a tasklet's body (spec §4.D "Normal
/// exit"): marks it Dead, hands the outcome to its nearest living
/// ancestor, and switches away for good. Never returns.
fn finish(me: Tasklet, result: Result<Value, Exception>) -> ! {
    *me.inner.state.lock().unwrap() = State::Dead;
    registry::unregister(&me);

    // spec §4.D "Normal exit": an uncaught exit sentinel is not an
    // uncaught exception as far as the parent is concerned — it's
    // translated into an ordinary return of its payload.
    let result = match result {
        Err(e) => ExitSignal::translate(e),
        ok => ok,
    };

    let next = effective_target(&me.parent().unwrap_or_else(registry::root));
    *next.inner.scratch.lock().unwrap() = match result {
        Ok(v) => Scratch::Payload(Payload::args(vec![v])),
        Err(e) => Scratch::Raise(e),
    };

    let host = crate::global_host();
    context::capture_outgoing(host, &me.inner);
    registry::set_current(next.clone());

    let here: u8 = 0;
    let live_from = &here as *const u8 as usize;
    // A dead tasklet never needs its own range restorable again, so an
    // allocation failure here would be unrecoverable; fall back to the
    // diagnostic abort path spec §7 reserves for genuinely impossible states.
    if registry::evict_down_to(&me, &next, live_from).is_err() {
        fatal_impossible("allocation failure while tearing down a tasklet");
    }
    registry::restore_for_resume(&next);

    // Falling off the end of a body is indistinguishable, from the
    // parent's point of view, from the parent having called
    // `me.switch(result)` (spec §4.E.4's tracing "source"/"destination"
    // apply here too); `next`'s own resume path (either `do_switch`'s
    // tail or `trampoline_entry`) reads this back and fires the tracer.
    *next.inner.woken_by.lock().unwrap() = Some(me.clone());

    let mut discard = RegisterFile::default();
    let born = next.inner.stack.lock().unwrap().is_born();
    *next.inner.state.lock().unwrap() = State::Running;
    unsafe {
        if born {
            let regs = *next.inner.regs.lock().unwrap();
            arch::switch_resume(&mut discard, &regs);
        } else {
            let arg = Arc::into_raw(next.inner.clone()) as *mut ();
            arch::switch_first_entry(&mut discard, trampoline_entry, arg);
        }
    }
    unreachable!("a dead tasklet's stack slot is never switched back into")
}

/// spec §7's `FatalImpossible`: a state the implementation's own
/// invariants say cannot happen. Logs and aborts rather than
/// unwinding into code that assumed those invariants held.
pub(crate) fn fatal_impossible(msg: &str) -> ! {
    log::error!("fatal invariant violation in tasklet engine: {msg}");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MisuseKind, TaskletError};
    use crate::tests_support::Fixture;
    use std::sync::mpsc::channel;

    #[test]
    fn switching_into_a_child_runs_its_body_and_returns_its_value() {
        let _fixture = Fixture::install();
        let child = Tasklet::new(Box::new(|payload| {
            let n = match payload {
                Payload::Args(mut args) => args.pop().unwrap().downcast::<i32>().unwrap(),
                _ => 0,
            };
            Ok(Value::new(n + 1))
        }));

        let shaped = child.switch(Payload::args(vec![Value::new(41i32)])).unwrap();
        match shaped {
            Shaped::Single(v) => assert_eq!(v.downcast::<i32>().unwrap(), 42),
            other => panic!("expected Single(42), got {other:?}"),
        }
        assert!(child.is_dead());
    }

    #[test]
    fn throwing_an_ordinary_exception_into_a_suspended_child_surfaces_uncaught_at_root() {
        // spec.md §8 scenario 3.
        let _fixture = Fixture::install();
        let child = Tasklet::new(Box::new(|_payload| {
            crate::current().parent().unwrap().switch(Payload::None)?;
            Ok(Value::new(()))
        }));
        child.switch(Payload::None).unwrap();
        assert_eq!(child.state(), State::Suspended);

        let exc = Exception::new(Value::new("E".to_string()));
        let err = child.throw(exc).unwrap_err();
        assert_eq!(err.value.downcast::<String>().unwrap(), "E");
        assert!(child.is_dead());
    }

    #[test]
    fn grandchild_falling_off_the_end_surfaces_at_root_through_the_child() {
        // spec.md §8 scenario 4.
        let _fixture = Fixture::install();
        let child = Tasklet::new(Box::new(move |_payload| {
            // Created here, not by the test thread, so its parent link
            // (spec.md §4.D "Creation": "parent set to the calling
            // thread's current tasklet") is this child, not the root.
            let grandchild = Tasklet::new(Box::new(|_payload| Ok(Value::new(7i32))));
            let r = match grandchild.switch(Payload::None)? {
                Shaped::Single(v) => v,
                other => panic!("expected Single(_), got {other:?}"),
            };
            crate::current().parent().unwrap().switch(Payload::args(vec![r]))?;
            Ok(Value::new(()))
        }));

        let shaped = child.switch(Payload::None).unwrap();
        match shaped {
            Shaped::Single(v) => assert_eq!(v.downcast::<i32>().unwrap(), 7),
            other => panic!("expected Single(7), got {other:?}"),
        }
    }

    #[test]
    fn throwing_exit_sentinel_into_suspended_child_surfaces_its_payload_as_a_normal_return() {
        let _fixture = Fixture::install();
        let child = Tasklet::new(Box::new(|_payload| {
            crate::current().parent().unwrap().switch(Payload::None)?;
            Ok(Value::new(()))
        }));
        child.switch(Payload::None).unwrap();
        assert_eq!(child.state(), State::Suspended);

        let shaped = child
            .throw(ExitSignal::as_exception_with(Value::new(99i32)))
            .unwrap();
        match shaped {
            Shaped::Single(v) => assert_eq!(v.downcast::<i32>().unwrap(), 99),
            other => panic!("expected Single(99), got {other:?}"),
        }
        assert!(child.is_dead());
    }

    #[test]
    fn self_switch_fires_tracer_for_spec_r2() {
        let _fixture = Fixture::install();
        let calls: Arc<std::sync::Mutex<Vec<(TraceEvent, u64, u64)>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = calls.clone();
        crate::set_trace(Some(Arc::new(move |event, source, destination| {
            recorded.lock().unwrap().push((event, source.id(), destination.id()));
            Ok(())
        })));

        let me = crate::current();
        me.switch(Payload::None).unwrap();

        let seen = calls.lock().unwrap();
        assert_eq!(*seen, vec![(TraceEvent::Switch, me.id(), me.id())]);
        drop(seen);
        crate::set_trace(None);
    }

    #[test]
    fn tracer_error_evicts_tracer_and_becomes_the_switch_outcome() {
        let _fixture = Fixture::install();
        crate::set_trace(Some(Arc::new(|_event, _source, _destination| {
            Err(Exception::new(Value::new("boom".to_string())))
        })));

        let me = crate::current();
        let err = me.switch(Payload::None).unwrap_err();
        assert_eq!(err.value.downcast::<String>().unwrap(), "boom");
        assert!(crate::get_trace().is_none());
    }

    #[test]
    fn switching_to_a_tasklet_whose_owning_thread_exited_is_rejected() {
        let (send_child, recv_child) = channel::<Tasklet>();
        let worker = std::thread::spawn(move || {
            let _fixture = Fixture::install();
            let child = Tasklet::new(Box::new(|_payload| {
                crate::current().parent().unwrap().switch(Payload::None)?;
                Ok(Value::new(()))
            }));
            child.switch(Payload::None).unwrap();
            send_child.send(child).unwrap();
        });
        worker.join().unwrap();

        let child = recv_child.recv().unwrap();
        let err = child.switch(Payload::None).unwrap_err();
        let misuse = err
            .value
            .downcast::<TaskletError>()
            .expect("misuse error value");
        assert!(matches!(misuse, TaskletError::Misuse(MisuseKind::ThreadExited)));
    }
}
