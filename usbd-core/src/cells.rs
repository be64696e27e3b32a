// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Single-threaded interior-mutability cells.
//!
//! The core and class engines are only ever driven from one logical caller
//! at a time (the controller's interrupt/poll entry point, or the
//! application's cooperative poll loop draining a pending flag set by that
//! entry point) so plain `Cell`-based wrappers are sufficient; there is no
//! need for a `Mutex`. This mirrors the `OptionalCell`/`TakeCell` shape used
//! throughout the teacher codebase's capsules, kept local here rather than
//! pinned as a path/version dependency on a crate not available to build
//! against.

use core::cell::Cell;

/// A `Cell<Option<T>>` with ergonomic helpers for the common "maybe
/// present" access pattern used for optional callback clients.
pub struct OptionalCell<T> {
    value: Cell<Option<T>>,
}

impl<T> OptionalCell<T> {
    pub const fn empty() -> Self {
        Self {
            value: Cell::new(None),
        }
    }

    pub const fn new(value: T) -> Self {
        Self {
            value: Cell::new(Some(value)),
        }
    }

    pub fn set(&self, value: T) {
        self.value.set(Some(value));
    }

    pub fn clear(&self) {
        self.value.set(None);
    }

    pub fn is_some(&self) -> bool {
        // SAFETY-free: peek without moving out, `T: Copy` is the only
        // accessor that could consume, and callers use `map`/`take`.
        let was = self.value.take();
        let is_some = was.is_some();
        self.value.set(was);
        is_some
    }

    pub fn map<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let inner = self.value.take();
        let result = inner.as_ref().map(f);
        self.value.set(inner);
        result
    }
}

impl<T: Copy> OptionalCell<T> {
    pub fn get(&self) -> Option<T> {
        self.value.get()
    }
}

/// A one-shot holder for a `&'static mut` buffer, modelled on the teacher's
/// `TakeCell`: callers `take()` the buffer out to work on it and `replace()`
/// it (or a different buffer of the same type) when done.
pub struct TakeCell<'a, T: ?Sized> {
    value: Cell<Option<&'a mut T>>,
}

impl<'a, T: ?Sized> TakeCell<'a, T> {
    pub const fn empty() -> Self {
        Self {
            value: Cell::new(None),
        }
    }

    pub fn new(value: &'a mut T) -> Self {
        Self {
            value: Cell::new(Some(value)),
        }
    }

    pub fn take(&self) -> Option<&'a mut T> {
        self.value.take()
    }

    pub fn replace(&self, value: &'a mut T) -> Option<&'a mut T> {
        self.value.replace(Some(value))
    }

    pub fn is_some(&self) -> bool {
        let was = self.value.take();
        let is_some = was.is_some();
        self.value.set(was);
        is_some
    }

    pub fn map<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut inner = self.value.take()?;
        let result = f(&mut inner);
        self.value.set(Some(inner));
        Some(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn optional_cell_round_trips() {
        let cell: OptionalCell<u32> = OptionalCell::empty();
        assert!(!cell.is_some());
        cell.set(42);
        assert_eq!(cell.map(|v| *v), Some(42));
        assert!(cell.is_some());
        cell.clear();
        assert!(!cell.is_some());
    }

    #[test]
    fn take_cell_round_trips() {
        let mut buf = [0u8; 4];
        let cell: TakeCell<[u8; 4]> = TakeCell::new(&mut buf);
        let taken = cell.take().unwrap();
        taken[0] = 7;
        assert!(!cell.is_some());
        cell.replace(taken);
        assert!(cell.is_some());
        cell.map(|b| b[1] = 9);
        let back = cell.take().unwrap();
        assert_eq!(back[0], 7);
        assert_eq!(back[1], 9);
    }
}
