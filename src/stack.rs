//! Component B (spec §4.B): the stack chain and the save/restore
//! engine that lets many tasklets share one native OS stack.
//!
//! Grounded in the teacher's `tcb.rs`, which keeps a `stack_bounds`
//! pair per task and a free-list of reusable stack regions; this
//! module keeps the same "bounds describe ownership of a byte range"
//! idea but replaces region reuse with the spec's heap-eviction
//! scheme, since tasklets (unlike the teacher's tasks) share one
//! physical stack rather than each getting a dedicated one.
//!
//! Naming note: spec.md §3.1 names the fixed, high-address boundary
//! `stack_stop` (root's is the maximum address) and the moving,
//! low-address "deepest point reached" boundary `stack_start`. This
//! module calls the same two boundaries `ceiling` and `floor`
//! respectively, since "start"/"stop" read, on first glance, as if
//! they moved in address order rather than in time order — `ceiling`
//! and `floor` name what each one actually is (a fixed top, a
//! sinking bottom) rather than which field changes.

use crate::error::TaskletError;

/// How many bytes a freshly allocated eviction buffer starts with
/// (spec §9's only configuration knob). Evicting a deeper stack than
/// this just grows the `Vec` as usual; this only avoids a handful of
/// reallocations for the common case.
pub(crate) const INITIAL_COPY_CAPACITY: usize = 4096;

/// The portion of the shared native stack a single tasklet owns,
/// plus its heap copy while suspended.
///
/// `ceiling` is the high-address end: fixed the moment the tasklet is
/// born (the native stack pointer at the point its parent switched
/// into it) and never changed again — spec.md's `stack_stop`. `floor`
/// is the low-address end: it moves every time the tasklet is evicted
/// further down by something switching past it, and it's what orders
/// the per-thread chain (spec §4.B, "ordered by descending
/// `stack_stop`") — spec.md's `stack_start`.
#[derive(Debug, Default)]
pub(crate) struct StackSpan {
    pub(crate) ceiling: usize,
    pub(crate) floor: usize,
    /// `Some` while this tasklet's slice of the native stack has been
    /// evicted to the heap (i.e. while it is Suspended and something
    /// below it on the chain is Running); `None` while Running or
    /// Unborn.
    pub(crate) saved: Option<Vec<u8>>,
}

impl StackSpan {
    pub(crate) fn unborn() -> Self {
        StackSpan {
            ceiling: 0,
            floor: 0,
            saved: None,
        }
    }

    /// True once this tasklet has actually run at least one
    /// instruction (spec §4.D's Unborn/Running/Suspended/Dead
    /// derivation: Unborn iff spec.md's `stack_stop` — this module's
    /// `ceiling` — is unset).
    pub(crate) fn is_born(&self) -> bool {
        self.ceiling != 0
    }

    /// Whether the live address `addr` currently falls inside this
    /// tasklet's owned range. Used to find which suspended tasklets on
    /// the chain straddle the range a resuming tasklet is about to
    /// reclaim.
    pub(crate) fn owns(&self, addr: usize) -> bool {
        self.is_born() && addr >= self.floor && addr < self.ceiling
    }

    /// Number of live bytes this span currently covers.
    pub(crate) fn len(&self) -> usize {
        self.ceiling.saturating_sub(self.floor)
    }
}

/// Copies the live bytes of `span` in the address range `[floor,
/// limit)` on the real, shared native stack into a freshly allocated
/// heap buffer. Called on a tasklet right before something else
/// reclaims (overwrites) that range of the native stack.
///
/// `limit` is `span.ceiling` when the entry lies entirely inside the
/// region being reclaimed, or the reclaiming target's own `ceiling`
/// when this entry only straddles it (spec §4.B: "if a chain entry
/// straddles T... only the portion below T is copied") — the bytes
/// from `limit` up to `span.ceiling` are left on the native stack,
/// untouched, in either case.
///
/// # Safety
/// The caller must guarantee `span`'s `[floor, limit)` range is still
/// mapped, still belongs to this tasklet (no one else has started
/// overwriting it yet), and that no other live reference into that
/// range survives past this call.
pub(crate) unsafe fn evict(span: &mut StackSpan, limit: usize) -> Result<(), TaskletError> {
    debug_assert!(span.saved.is_none(), "double eviction of one stack span");
    debug_assert!(limit > span.floor && limit <= span.ceiling);
    let len = limit - span.floor;
    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(len.max(crate::initial_copy_capacity()))
        .map_err(|_| TaskletError::Allocation)?;
    buf.resize(len, 0);
    std::ptr::copy_nonoverlapping(span.floor as *const u8, buf.as_mut_ptr(), len);
    span.saved = Some(buf);
    Ok(())
}

/// Copies a previously evicted span back down onto the real native
/// stack at its original address and clears the heap copy. Called on
/// a tasklet immediately before switching into it.
///
/// # Safety
/// The caller must guarantee `span`'s original address range is
/// currently free (nothing else is using it — in particular, every
/// tasklet whose range overlapped it must already have been evicted
/// further, per spec §4.B's straddling-entry rule) and large enough
/// to receive the copy.
pub(crate) unsafe fn restore(span: &mut StackSpan) {
    if let Some(buf) = span.saved.take() {
        std::ptr::copy_nonoverlapping(buf.as_ptr(), span.floor as *mut u8, buf.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unborn_owns_nothing() {
        let span = StackSpan::unborn();
        assert!(!span.is_born());
        assert!(!span.owns(0x1000));
        assert_eq!(span.len(), 0);
    }

    #[test]
    fn owns_is_half_open_descending() {
        let span = StackSpan {
            ceiling: 0x2000,
            floor: 0x1000,
            saved: None,
        };
        assert!(span.owns(0x1000));
        assert!(span.owns(0x1fff));
        assert!(!span.owns(0x2000));
        assert!(!span.owns(0xfff));
        assert_eq!(span.len(), 0x1000);
    }

    #[test]
    fn evict_then_restore_round_trips_bytes() {
        let mut backing = [0u8; 64];
        for (i, b) in backing.iter_mut().enumerate() {
            *b = i as u8;
        }
        let ceiling = backing.as_ptr() as usize + backing.len();
        let floor = backing.as_ptr() as usize;
        let mut span = StackSpan {
            ceiling,
            floor,
            saved: None,
        };

        unsafe {
            evict(&mut span, ceiling).unwrap();
        }
        assert!(span.saved.is_some());
        assert_eq!(span.saved.as_ref().unwrap(), &backing[..]);

        // Clobber the "live" range to prove restore actually writes it back.
        backing.fill(0xAA);
        unsafe {
            restore(&mut span);
        }
        assert!(span.saved.is_none());
        for (i, b) in backing.iter().enumerate() {
            assert_eq!(*b, i as u8);
        }
    }

    #[test]
    fn evict_with_a_limit_below_ceiling_only_copies_the_straddled_portion() {
        let mut backing = [0u8; 64];
        for (i, b) in backing.iter_mut().enumerate() {
            *b = i as u8;
        }
        let ceiling = backing.as_ptr() as usize + backing.len();
        let floor = backing.as_ptr() as usize;
        let limit = floor + 16;
        let mut span = StackSpan {
            ceiling,
            floor,
            saved: None,
        };

        unsafe {
            evict(&mut span, limit).unwrap();
        }
        let saved = span.saved.as_ref().unwrap();
        assert_eq!(saved.len(), 16);
        assert_eq!(&saved[..], &backing[..16]);

        // The portion above `limit` was left untouched on the "native
        // stack" (spec §4.B straddling-entry rule).
        assert_eq!(&backing[16..], &(16u8..64).collect::<Vec<u8>>()[..]);
    }
}
