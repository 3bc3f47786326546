//! Explicitly invalidated cache cells.
//!
//! Derived values such as a condition's `n_rows_selected` or an action's
//! `rows_all_false` are stored next to the entity they describe. A
//! [`Cached`] is either fresh (holds a value) or stale (null). Mutations that
//! affect the value call [`Cached::invalidate`]; readers recompute on demand.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cached<T>(Option<T>);

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> Cached<T> {
    pub fn stale() -> Self {
        Self(None)
    }

    pub fn fresh(value: T) -> Self {
        Self(Some(value))
    }

    /// Rebuild from a nullable stored column.
    pub fn from_option(value: Option<T>) -> Self {
        Self(value)
    }

    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    pub fn set(&mut self, value: T) {
        self.0 = Some(value);
    }

    pub fn invalidate(&mut self) {
        self.0 = None;
    }

    pub fn is_stale(&self) -> bool {
        self.0.is_none()
    }

    /// Return the cached value, computing and storing it when stale.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        compute: impl FnOnce() -> Result<T, E>,
    ) -> Result<&T, E> {
        let value = match self.0.take() {
            Some(value) => value,
            None => compute()?,
        };
        Ok(self.0.insert(value))
    }
}

impl<T: Copy> Cached<T> {
    pub fn value(&self) -> Option<T> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_until_set() {
        let mut cell: Cached<usize> = Cached::stale();
        assert!(cell.is_stale());
        cell.set(3);
        assert_eq!(cell.value(), Some(3));
        cell.invalidate();
        assert!(cell.is_stale());
    }

    #[test]
    fn computes_once() {
        let mut cell: Cached<usize> = Cached::stale();
        let mut calls = 0;
        for _ in 0..2 {
            let v = cell
                .get_or_try_insert_with(|| {
                    calls += 1;
                    Ok::<_, ()>(7)
                })
                .unwrap();
            assert_eq!(*v, 7);
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn serializes_as_nullable() {
        assert_eq!(serde_json::to_string(&Cached::fresh(true)).unwrap(), "true");
        assert_eq!(serde_json::to_string(&Cached::<bool>::stale()).unwrap(), "null");
    }
}
