//! Component A (spec §4.A): the platform-specific stack-switch
//! primitive. Everything above this module deals in addresses and
//! byte ranges; everything in here deals in actual registers.
//!
//! Grounded in the teacher's `arch/mod.rs` cfg-gated re-export
//! dispatch (`sphw-k5`'s `kernel/src/arch/mod.rs` picks between
//! `rv64`/`cortex_m`/`dummy` the same way this picks between
//! `x86_64`/`aarch64`/`dummy`), and in `arch/rv64.rs`'s explicit,
//! register-by-register save/restore style for the shape of the asm
//! itself — adapted from a trap-handler entry/exit pair to a
//! symmetric coroutine switch.
//!
//! Design note (spec §9, "No inlining on the stack trampolines";
//! DESIGN.md Open Question 3): these functions are `#[naked]`, same
//! as the teacher's `_start_trap`. A naked function has no
//! compiler-generated prologue or epilogue, so the explicit `ret`/
//! `jmp` at the end of the asm is the *only* control-transfer that
//! happens — which is exactly what's required here, since the
//! function's "return" address is whatever the resuming tasklet
//! stored there, not its own caller's.

#[cfg(all(feature = "x86_64", target_arch = "x86_64"))]
mod x86_64;
#[cfg(all(feature = "x86_64", target_arch = "x86_64"))]
pub(crate) use self::x86_64::*;

#[cfg(all(feature = "aarch64", target_arch = "aarch64"))]
mod aarch64;
#[cfg(all(feature = "aarch64", target_arch = "aarch64"))]
pub(crate) use self::aarch64::*;

#[cfg(not(any(
    all(feature = "x86_64", target_arch = "x86_64"),
    all(feature = "aarch64", target_arch = "aarch64"),
)))]
mod dummy;
#[cfg(not(any(
    all(feature = "x86_64", target_arch = "x86_64"),
    all(feature = "aarch64", target_arch = "aarch64"),
)))]
pub(crate) use self::dummy::*;

/// A snapshot of the callee-saved registers plus the resume address,
/// captured by a tasklet right before it suspends and consulted when
/// something later switches back into it. Lives on each tasklet
/// (`TaskletInner::resume_regs`), mirroring the teacher's
/// `Tcb::saved_state: arch::SavedThreadState` field (`kernel/src/tcb.rs`).
/// `regs` holds whatever callee-saved general registers an arch needs
/// beyond `sp`/`fp`/`ip` — x86_64 uses 5 of the 6 slots (rbx, r12-r15),
/// aarch64 uses all 6 (x19-x24). Offsets are fixed (`sp`@0, `fp`@8,
/// `regs`@16, `ip`@64) since the naked asm in each backend addresses
/// this struct by raw byte offset rather than through field access.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub(crate) struct RegisterFile {
    pub(crate) sp: u64,
    pub(crate) fp: u64,
    pub(crate) regs: [u64; 6],
    pub(crate) ip: u64,
}

/// The first-entry trampoline's C-ABI signature. `arg` is an
/// `Arc<crate::tasklet::TaskletInner>` pointer produced by
/// `Arc::into_raw`.
pub(crate) type EntryFn = unsafe extern "C" fn(arg: *mut ()) -> !;
