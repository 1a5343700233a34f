//! Component G (spec §4.G): the cross-thread cleanup queue. A
//! tasklet's last handle can be dropped from any thread; if it's not
//! the thread the tasklet actually runs on, there is no way to switch
//! into it to run its teardown from here (switching only ever happens
//! from the thread a tasklet belongs to), so the handle itself — kept
//! alive by the extra reference this module holds — is queued for the
//! owning thread to run the real teardown dance on later (spec §4.D
//! "Teardown", §4.G). If that thread has already exited, its own
//! `ThreadState` teardown (`registry::ThreadState`'s `Drop`) already
//! forced the tasklet Dead in place, so reaping it here is a no-op.
//!
//! Grounded in `original_source`'s `greenlet_thread_state.hpp`, which
//! keeps exactly this kind of deferred deletion list per thread state,
//! and in the teacher's `registry.rs`, whose port table is the
//! closest the teacher comes to a structure addressed by id instead
//! of by direct handle.

use std::sync::Mutex;

use crate::tasklet::{self, Tasklet};

static PENDING: Mutex<Vec<Tasklet>> = Mutex::new(Vec::new());

/// Records that `t`'s last handle was dropped from a thread other
/// than the one it runs on, while still Suspended. `t` itself is an
/// extra strong reference — the "resurrect" step of spec §4.D
/// "Teardown" — kept alive here until its owning thread services the
/// queue (or exits, at which point its own thread-local teardown wins
/// the race and marks it Dead without running cleanup).
pub(crate) fn defer_foreign_teardown(t: Tasklet) {
    log::warn!(
        "tasklet {} dropped from a different thread while suspended; \
         queued for its owning thread to tear down",
        t.id()
    );
    PENDING.lock().unwrap().push(t);
}

/// Services every queued tasklet that belongs to the calling thread:
/// runs the same resurrect-and-throw-the-exit-sentinel teardown
/// [`Drop for Tasklet`](crate::tasklet::Tasklet) would have run had it
/// been dropped on its own thread to begin with. Tasklets belonging to
/// other threads are left queued. A host should call this
/// periodically (e.g. from its own idle/pending-call hook) so
/// cross-thread drops eventually get torn down rather than merely
/// logged. Returns the ids serviced.
pub fn reap_pending() -> Vec<u64> {
    let this = std::thread::current().id();
    let mine: Vec<Tasklet> = {
        let mut guard = PENDING.lock().unwrap();
        let mut mine = Vec::new();
        guard.retain(|t| {
            if t.thread_id_raw() == this {
                mine.push(t.clone());
                false
            } else {
                true
            }
        });
        mine
    };

    let mut ids = Vec::with_capacity(mine.len());
    for t in &mine {
        ids.push(t.id());
        tasklet::teardown_now(t);
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasklet::State;
    use crate::tests_support::Fixture;
    use crate::value::{Payload, Value};
    use std::sync::mpsc::channel;

    #[test]
    fn dropping_a_suspended_tasklet_from_a_foreign_thread_queues_it_for_its_own() {
        let (send_child, recv_child) = channel::<Tasklet>();
        let (send_go, recv_go) = channel::<()>();
        let (send_done, recv_done) = channel::<usize>();

        let worker = std::thread::spawn(move || {
            let _fixture = Fixture::install();
            let child = Tasklet::new(Box::new(|_payload| {
                let me = crate::current();
                let parent = me.parent().expect("created with a parent");
                parent.switch(Payload::None)?;
                Ok(Value::new(()))
            }));
            child.switch(Payload::None).unwrap();
            assert_eq!(child.state(), State::Suspended);
            send_child.send(child).unwrap();

            // Wait for the main thread to have dropped its handle and
            // asked us to service our own cleanup queue.
            recv_go.recv().unwrap();
            let reaped = reap_pending();
            send_done.send(reaped.len()).unwrap();
        });

        let child = recv_child.recv().unwrap();
        drop(child);
        // Not the worker's own thread, so this thread's reap leaves it queued.
        assert!(reap_pending().is_empty());

        send_go.send(()).unwrap();
        assert_eq!(recv_done.recv().unwrap(), 1);
        worker.join().unwrap();
    }
}
