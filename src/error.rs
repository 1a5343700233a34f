use std::fmt;

/// Error taxonomy for the tasklet engine (spec §7).
///
/// Mirrors the teacher's flat `KernelError` shape (`sphw-k5`'s
/// `src/lib.rs`): one variant per failure mode, no wrapping error
/// crate. `Display`/`Error` are hand-written rather than derived,
/// since this crate is a hosted library whose errors are propagated
/// with `?` by callers (the teacher's `KernelError` never left a
/// `no_std` leaf crate, so it never needed `Display`).
///
/// `FatalImpossible` is deliberately absent: per spec §7 it never
/// returns to a caller, it writes a diagnostic and aborts the process
/// (see [`crate::switch_::fatal_impossible`]).
#[derive(Debug)]
pub enum TaskletError {
    /// Switch/throw/parent-set across tasklets whose lineage roots
    /// differ, whose thread has exited, or that would create a cycle
    /// or a cross-thread parent link.
    Misuse(MisuseKind),
    /// `throw()` called with something that isn't an exception class,
    /// instance, or traceback (or a traceback that isn't one).
    Argument(&'static str),
    /// Heap allocation for a stack-eviction buffer failed. The
    /// in-progress switch is aborted, leaving both tasklets in their
    /// pre-switch state.
    Allocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisuseKind {
    /// Target belongs to a different OS thread than the caller.
    WrongThread,
    /// Target's owning thread has already exited.
    ThreadExited,
    /// Reassigning `parent` would introduce a cycle.
    CyclicParent,
    /// Reassigning `parent` to a tasklet on another thread, after this
    /// tasklet has already started.
    CrossThreadParent,
}

impl fmt::Display for TaskletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskletError::Misuse(kind) => write!(f, "tasklet misuse: {kind}"),
            TaskletError::Argument(msg) => write!(f, "invalid argument: {msg}"),
            TaskletError::Allocation => write!(f, "allocation failed while evicting a tasklet stack"),
        }
    }
}

impl fmt::Display for MisuseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            MisuseKind::WrongThread => "target does not belong to the current thread",
            MisuseKind::ThreadExited => "target's owning thread has already exited",
            MisuseKind::CyclicParent => "proposed parent is a descendant of this tasklet",
            MisuseKind::CrossThreadParent => "proposed parent belongs to another thread",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for TaskletError {}
