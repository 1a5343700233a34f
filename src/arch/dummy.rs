use super::{EntryFn, RegisterFile};

/// Stub backend for architectures with no asm implementation above.
/// Matches the teacher's own `arch/dummy.rs`: the crate still builds,
/// but anything that actually tries to switch stacks panics instead of
/// silently corrupting memory.
///
/// # Safety
/// Never safe to call; exists only so the crate links on an
/// unsupported target.
pub(crate) unsafe extern "C" fn switch_resume(_out_self: *mut RegisterFile, _target: *const RegisterFile) {
    unimplemented!("no stack-switch backend for this target architecture")
}

/// See [`switch_resume`].
///
/// # Safety
/// Never safe to call.
pub(crate) unsafe extern "C" fn switch_first_entry(_out_self: *mut RegisterFile, _entry: EntryFn, _arg: *mut ()) {
    unimplemented!("no stack-switch backend for this target architecture")
}
