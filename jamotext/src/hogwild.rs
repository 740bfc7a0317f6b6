//! Shared mutable cell for lock-free SGD.
//!
//! Workers write to the same matrices without synchronization; row updates
//! race and the races are tolerated, which is the usual Hogwild training
//! scheme. This cell is the entire unsafe surface of the trainer.

use std::cell::UnsafeCell;
use std::sync::Arc;

pub struct Hogwild<T>(Arc<UnsafeCell<T>>);

unsafe impl<T: Send> Send for Hogwild<T> {}
unsafe impl<T: Send> Sync for Hogwild<T> {}

impl<T> Clone for Hogwild<T> {
    fn clone(&self) -> Self {
        Hogwild(Arc::clone(&self.0))
    }
}

impl<T> Hogwild<T> {
    pub fn new(value: T) -> Self {
        Hogwild(Arc::new(UnsafeCell::new(value)))
    }

    pub fn get(&self) -> &T {
        unsafe { &*self.0.get() }
    }

    /// Mutable access without exclusivity. Callers accept racy writes.
    #[allow(clippy::mut_from_ref)]
    pub fn get_mut(&self) -> &mut T {
        unsafe { &mut *self.0.get() }
    }

    /// Recovers the value once every clone is gone.
    pub fn into_inner(self) -> Option<T> {
        Arc::try_unwrap(self.0).ok().map(UnsafeCell::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_mutation_and_unwrap() {
        let cell = Hogwild::new(vec![0i32; 4]);
        let other = cell.clone();
        other.get_mut()[2] = 7;
        assert_eq!(cell.get()[2], 7);
        drop(other);
        assert_eq!(cell.into_inner().unwrap(), vec![0, 0, 7, 0]);
    }

    #[test]
    fn test_into_inner_fails_while_shared() {
        let cell = Hogwild::new(1u8);
        let _other = cell.clone();
        assert!(cell.into_inner().is_none());
    }
}
