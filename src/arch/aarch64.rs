use core::arch::naked_asm;

use super::{EntryFn, RegisterFile};

// AAPCS64: x19-x28 and x29 (fp)/x30 (lr) are callee-saved. We only
// carry x19-x24 in `RegisterFile::regs` (six slots, x25-x28 are not
// used by the trampoline or by Rust-generated leaf code on the switch
// path); `fp` holds x29 and `ip` holds the saved x30.

/// See [`super::x86_64::switch_resume`]; same contract, AArch64 ABI.
///
/// # Safety
/// Same as the x86_64 counterpart.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch_resume(out_self: *mut RegisterFile, target: *const RegisterFile) {
    naked_asm!(
        "adr x8, 2f",
        "mov x9, sp",
        "stp x9, x29, [x0, #0]",
        "stp x19, x20, [x0, #16]",
        "stp x21, x22, [x0, #32]",
        "stp x23, x24, [x0, #48]",
        "str x8, [x0, #64]",
        "ldp x9, x29, [x1, #0]",
        "mov sp, x9",
        "ldp x19, x20, [x1, #16]",
        "ldp x21, x22, [x1, #32]",
        "ldp x23, x24, [x1, #48]",
        "ldr x8, [x1, #64]",
        "br x8",
        "2:",
        "ret",
    )
}

/// See [`super::x86_64::switch_first_entry`]; same contract, AArch64
/// ABI — `sp` is left untouched, the new tasklet continues one frame
/// deeper on the caller's own stack.
///
/// # Safety
/// Same as the x86_64 counterpart.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch_first_entry(out_self: *mut RegisterFile, entry: EntryFn, arg: *mut ()) {
    naked_asm!(
        "adr x8, 2f",
        "mov x9, sp",
        "stp x9, x29, [x0, #0]",
        "stp x19, x20, [x0, #16]",
        "stp x21, x22, [x0, #32]",
        "stp x23, x24, [x0, #48]",
        "str x8, [x0, #64]",
        // x1 = entry, x2 = arg (incoming AAPCS64 args 2-3); sp untouched.
        "mov x0, x2",
        "br x1",
        "2:",
        "ret",
    )
}
