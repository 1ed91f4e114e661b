//! Single-slot mailbox for host exceptions raised under a fallible call.
//!
//! The slot holds a handle, not the value itself, so the module can take
//! ownership of the fault object with one poll. A new fault replaces an
//! unread one; the caller gets the displaced handle back to release it.

use crate::heap::Handle;

#[derive(Debug, Default)]
pub struct ErrorSlot {
    pending: Option<Handle>,
    overwritten: u64,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` as the pending fault, returning an unread one it displaced.
    pub fn store(&mut self, handle: Handle) -> Option<Handle> {
        let displaced = self.pending.replace(handle);
        if displaced.is_some() {
            self.overwritten += 1;
        }
        displaced
    }

    /// Read and clear the pending fault.
    pub fn take(&mut self) -> Option<Handle> {
        self.pending.take()
    }

    pub fn peek(&self) -> Option<Handle> {
        self.pending
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// How many unread faults have been discarded by a newer one.
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_fault_displaces_unread_one() {
        let mut slot = ErrorSlot::new();
        assert_eq!(slot.store(Handle(40)), None);
        assert_eq!(slot.store(Handle(41)), Some(Handle(40)));
        assert_eq!(slot.overwritten(), 1);
        assert_eq!(slot.take(), Some(Handle(41)));
        assert!(!slot.is_pending());
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn reading_between_faults_loses_nothing() {
        let mut slot = ErrorSlot::new();
        slot.store(Handle(40));
        assert_eq!(slot.take(), Some(Handle(40)));
        assert_eq!(slot.store(Handle(41)), None);
        assert_eq!(slot.peek(), Some(Handle(41)));
        assert_eq!(slot.overwritten(), 0);
    }
}
