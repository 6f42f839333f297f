//! Shared slot ownership
//!
//! A `SlotLease` owns one registry slot. Handles copied from one another
//! share a single lease through `Rc`, so the strong count is the number of
//! live handles and the slot is released exactly once, when the last of
//! them goes away. Handles that capture the same runtime value
//! independently get separate leases and separate slots.

use std::rc::Rc;

use tracing::trace;

use crate::context::RuntimeContext;
use crate::runtime::Slot;

/// Ownership of one registry slot
pub(crate) struct SlotLease<'ctx> {
    ctx: &'ctx RuntimeContext,
    slot: Slot,
}

impl<'ctx> SlotLease<'ctx> {
    /// Take ownership of a freshly referenced slot
    pub(crate) fn new(ctx: &'ctx RuntimeContext, slot: Slot) -> Rc<Self> {
        trace!(%slot, "slot captured");
        Rc::new(SlotLease { ctx, slot })
    }

    #[inline]
    pub(crate) fn slot(&self) -> Slot {
        self.slot
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        trace!(slot = %self.slot, "slot released");
        self.ctx.release_slot(self.slot);
    }
}
