use core::arch::naked_asm;

use super::{EntryFn, RegisterFile};

// SysV x86_64: rbx, rbp, r12-r15 are callee-saved; rsp is handled
// separately since it's the whole point. `RegisterFile::regs` holds
// rbx, r12, r13, r14, r15 in that order (fp holds rbp).

/// Saves the caller's register file into `*out_self`, then restores
/// `*target` and jumps into it as if returning from *its* call to
/// `switch_resume`/`switch_first_entry`.
///
/// # Safety
/// `out_self` must be writable and `target` must hold a register file
/// previously captured by this function or [`switch_first_entry`] on
/// this same architecture, with a stack pointer that is still valid
/// (the stack it points into has not been freed or reused).
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch_resume(out_self: *mut RegisterFile, target: *const RegisterFile) {
    naked_asm!(
        // Capture our own resume point: the label `2` below, which is
        // nothing but a `ret` back to our caller.
        "lea rax, [rip + 2f]",
        "mov [rdi + 0], rsp",
        "mov [rdi + 8], rbp",
        "mov [rdi + 16], rbx",
        "mov [rdi + 24], r12",
        "mov [rdi + 32], r13",
        "mov [rdi + 40], r14",
        "mov [rdi + 48], r15",
        "mov [rdi + 64], rax",
        // Load the target's registers. `rsi` (the only argument we
        // still need) is loaded last so the loads above don't clobber it.
        "mov rsp, [rsi + 0]",
        "mov rbp, [rsi + 8]",
        "mov rbx, [rsi + 16]",
        "mov r12, [rsi + 24]",
        "mov r13, [rsi + 32]",
        "mov r14, [rsi + 40]",
        "mov r15, [rsi + 48]",
        "jmp qword ptr [rsi + 64]",
        "2:",
        "ret",
    )
}

/// Like [`switch_resume`], but the target has never run. There is no
/// register file to restore yet, so instead of loading one this jumps
/// straight into `entry(arg)` *without moving `rsp`* — the new
/// tasklet starts running one frame deeper on the same shared native
/// stack the caller was already on (spec §4.B: tasklets share one
/// physical stack; a brand new one simply begins wherever the stack
/// pointer already was). `entry` must never return (it ends by
/// switching away, never by a normal `ret`).
///
/// # Safety
/// `entry`/`arg` must be a valid extern "C" entry point and its
/// argument; the caller must not be relying on anything below the
/// current `rsp` surviving (it's about to become live stack for the
/// new tasklet).
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch_first_entry(out_self: *mut RegisterFile, entry: EntryFn, arg: *mut ()) {
    naked_asm!(
        "lea rax, [rip + 2f]",
        "mov [rdi + 0], rsp",
        "mov [rdi + 8], rbp",
        "mov [rdi + 16], rbx",
        "mov [rdi + 24], r12",
        "mov [rdi + 32], r13",
        "mov [rdi + 40], r14",
        "mov [rdi + 48], r15",
        "mov [rdi + 64], rax",
        // rsi = entry, rdx = arg (incoming SysV args 2-3); rsp untouched.
        "mov rdi, rdx",
        "jmp rsi",
        "2:",
        "ret",
    )
}
