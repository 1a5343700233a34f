//! Component C (spec §4.C): the host-thread context shuttle. A
//! thread's execution context belongs to whichever tasklet is
//! currently running on it; every switch must hand it off.
//!
//! Grounded in `original_source`'s `TPythonState.cpp`, which performs
//! exactly this handoff around CPython's switch (saving the
//! outgoing thread state's frame/recursion-depth/exception fields and
//! installing the incoming one) — generalized here behind the `Host`
//! trait instead of calling into a concrete runtime.

use crate::host::Host;
use crate::tasklet::TaskletInner;

/// Captures the current thread's host context off of `outgoing` and
/// stashes it on the tasklet object, so it can be handed back if this
/// tasklet is ever resumed. Called immediately before the register
/// switch.
///
/// Brackets the capture with `gc_disable`/`gc_enable` (spec §5
/// "Reentrancy hazard": capturing this context may itself allocate,
/// and a GC running mid-capture could observe the thread's context in
/// a state that belongs to neither the outgoing nor the incoming
/// tasklet).
pub(crate) fn capture_outgoing(host: &dyn Host, outgoing: &TaskletInner) {
    host.gc_disable();
    let ctx = host.capture_context();
    host.gc_enable();
    *outgoing.host_context.lock().unwrap() = Some(ctx);
}

/// Installs `incoming`'s previously captured host context (or, on
/// first entry, leaves the thread's context as the host set it up)
/// and bumps its version counter (spec §4.C, last bullet: "a
/// contextvars-style context object... is swapped back in... with its
/// internal version counter bumped"). Called immediately after the
/// register switch completes.
pub(crate) fn install_incoming(host: &dyn Host, incoming: &TaskletInner) {
    let mut slot = incoming.host_context.lock().unwrap();
    if let Some(mut ctx) = slot.take() {
        ctx.bump_context_version();
        host.install_context(ctx);
    }
}
