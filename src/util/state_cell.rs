use std::sync::RwLock;

/// Shared cell for values read far more often than written.
///
/// Readers clone the current value; writers hold the lock only long enough
/// to swap or adjust it. Never held across an await point.
#[derive(Debug)]
pub(crate) struct StateCell<T> {
    inner: RwLock<T>,
}

impl<T: Clone> StateCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    pub fn get(&self) -> T {
        self.inner.read().expect("state cell poisoned").clone()
    }

    pub fn set(&self, value: T) {
        *self.inner.write().expect("state cell poisoned") = value;
    }

    /// Runs `f` against the current value under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.write().expect("state cell poisoned"))
    }
}
