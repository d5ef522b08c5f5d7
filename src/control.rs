use std::ops::Deref;
use std::rc::Rc;

use crate::error::Result;

/// Uniform contract of the subsystems a controller starts and stops as a unit.
pub trait Control {
    fn name(&self) -> &'static str;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Release everything the subsystem holds. Calling it again is a no-op.
    fn destroy(&self) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// A manager reference that records whether this holder owns it.
///
/// A nested controller binds to its parent's managers as `Borrowed` and
/// must never destroy them.
pub enum Shared<T: ?Sized> {
    Owned(Rc<T>),
    Borrowed(Rc<T>),
}

impl<T: ?Sized> Shared<T> {
    pub fn is_owned(&self) -> bool {
        matches!(self, Shared::Owned(_))
    }

    pub fn rc(&self) -> &Rc<T> {
        match self {
            Shared::Owned(rc) | Shared::Borrowed(rc) => rc,
        }
    }

    /// A borrowed handle to the same value, for binding a child.
    pub fn lend(&self) -> Shared<T> {
        Shared::Borrowed(self.rc().clone())
    }

    pub fn ptr_eq(&self, other: &Shared<T>) -> bool {
        Rc::ptr_eq(self.rc(), other.rc())
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        match self {
            Shared::Owned(rc) => Shared::Owned(rc.clone()),
            Shared::Borrowed(rc) => Shared::Borrowed(rc.clone()),
        }
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.rc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lend_keeps_identity() {
        let owned = Shared::Owned(Rc::new(5));
        let borrowed = owned.lend();
        assert!(owned.is_owned());
        assert!(!borrowed.is_owned());
        assert!(owned.ptr_eq(&borrowed));
        assert_eq!(*borrowed, 5);
    }
}
