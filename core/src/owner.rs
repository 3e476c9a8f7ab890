//! A cell whose contents may only be touched from the owner thread.
//!
//! The native tray is not thread safe and is often `!Send`. Rather than lock
//! it, [`OwnerCell`] checks that every access happens on the thread that owns
//! it, which makes sharing the cell itself sound.

use std::cell::{RefCell, RefMut};
use std::mem::ManuallyDrop;
use std::thread::{self, ThreadId};

use log::warn;

/// Why an [`OwnerCell`] access was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Called from a thread other than the owner.
    WrongThread,
    /// The value is already borrowed further up the owner's stack.
    Busy,
    /// The value has been taken out.
    Empty,
}

pub struct OwnerCell<T> {
    owner: ThreadId,
    value: ManuallyDrop<RefCell<Option<T>>>,
}

// SAFETY: the value is only reachable through `try_with`/`take`, both of which
// refuse access from any thread but `owner`, and `Drop` only drops a present
// value on `owner`. `T` therefore never crosses threads.
unsafe impl<T> Send for OwnerCell<T> {}
unsafe impl<T> Sync for OwnerCell<T> {}

impl<T> OwnerCell<T> {
    pub fn new(owner: ThreadId, value: T) -> Self {
        Self {
            owner,
            value: ManuallyDrop::new(RefCell::new(Some(value))),
        }
    }

    pub fn is_owner(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Borrow the value mutably for the duration of `f`.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, Access> {
        let mut slot = self.borrow()?;
        match slot.as_mut() {
            Some(value) => Ok(f(value)),
            None => Err(Access::Empty),
        }
    }

    /// Move the value out, leaving the cell empty.
    pub fn take(&self) -> Result<Option<T>, Access> {
        Ok(self.borrow()?.take())
    }

    fn borrow(&self) -> Result<RefMut<'_, Option<T>>, Access> {
        if !self.is_owner() {
            return Err(Access::WrongThread);
        }
        self.value.try_borrow_mut().map_err(|_| Access::Busy)
    }
}

impl<T> Drop for OwnerCell<T> {
    fn drop(&mut self) {
        if self.is_owner() || self.value.get_mut().is_none() {
            // SAFETY: dropped exactly once, here. Off the owner thread the
            // slot is empty, so no `T` is dropped.
            unsafe { ManuallyDrop::drop(&mut self.value) };
        } else {
            warn!("Owner cell dropped off its owner thread while holding a value; leaking it");
        }
    }
}
