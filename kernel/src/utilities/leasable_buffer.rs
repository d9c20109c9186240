// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Leasable buffers: a `'static` buffer plus the window a lower layer may
//! touch.
//!
//! The owner narrows the buffer to a window with `slice`, hands it down, and
//! calls `reset()` once it comes back to recover the whole allocation.
//! Descriptor replies lease a window of a read-only table; bulk transfers
//! lease a window of the RAM transfer buffer without copying it.
//!
//! ```rust,ignore
//! let mut window = SubSliceMut::new(buffer);
//! window.slice(offset..offset + length);
//! assert_eq!(window.len(), length);
//! window.reset();
//! ```

use core::ops::{Bound, Range, RangeBounds};

/// Narrow `active` to `range`, taken relative to `active` and clamped to it.
fn narrow<R: RangeBounds<usize>>(active: &Range<usize>, range: R) -> Range<usize> {
    let len = active.end - active.start;
    let start = match range.start_bound() {
        Bound::Included(&s) => s,
        Bound::Excluded(&s) => s.saturating_add(1),
        Bound::Unbounded => 0,
    }
    .min(len);
    let end = match range.end_bound() {
        Bound::Included(&e) => e.saturating_add(1),
        Bound::Excluded(&e) => e,
        Bound::Unbounded => len,
    }
    .clamp(start, len);

    active.start + start..active.start + end
}

/// A writable lease.
#[derive(Debug, PartialEq)]
pub struct SubSliceMut<'a, T> {
    internal: &'a mut [T],
    window: Range<usize>,
}

/// A read-only lease.
#[derive(Debug, PartialEq)]
pub struct SubSlice<'a, T> {
    internal: &'a [T],
    window: Range<usize>,
}

impl<'a, T> SubSliceMut<'a, T> {
    pub fn new(buffer: &'a mut [T]) -> Self {
        let len = buffer.len();
        SubSliceMut {
            internal: buffer,
            window: 0..len,
        }
    }

    /// Make the entire buffer accessible again.
    pub fn reset(&mut self) {
        self.window = 0..self.internal.len();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.internal[self.window.clone()]
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.internal[self.window.clone()]
    }

    pub fn slice<R: RangeBounds<usize>>(&mut self, range: R) {
        self.window = narrow(&self.window, range);
    }
}

impl<'a, T> SubSlice<'a, T> {
    pub fn new(buffer: &'a [T]) -> Self {
        SubSlice {
            internal: buffer,
            window: 0..buffer.len(),
        }
    }

    pub fn reset(&mut self) {
        self.window = 0..self.internal.len();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.internal[self.window.clone()]
    }

    pub fn slice<R: RangeBounds<usize>>(&mut self, range: R) {
        self.window = narrow(&self.window, range);
    }
}

/// Either kind of lease. Only the mutable one can be received into.
#[derive(Debug, PartialEq)]
pub enum SubSliceMutImmut<'a, T> {
    Immutable(SubSlice<'a, T>),
    Mutable(SubSliceMut<'a, T>),
}

impl<'a, T> SubSliceMutImmut<'a, T> {
    pub fn reset(&mut self) {
        match self {
            SubSliceMutImmut::Immutable(buf) => buf.reset(),
            SubSliceMutImmut::Mutable(buf) => buf.reset(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SubSliceMutImmut::Immutable(buf) => buf.len(),
            SubSliceMutImmut::Mutable(buf) => buf.len(),
        }
    }

    pub fn slice<R: RangeBounds<usize>>(&mut self, range: R) {
        match self {
            SubSliceMutImmut::Immutable(buf) => buf.slice(range),
            SubSliceMutImmut::Mutable(buf) => buf.slice(range),
        }
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            SubSliceMutImmut::Immutable(buf) => buf.as_slice(),
            SubSliceMutImmut::Mutable(buf) => buf.as_slice(),
        }
    }

    /// `None` for a read-only lease.
    pub fn as_mut_slice(&mut self) -> Option<&mut [T]> {
        match self {
            SubSliceMutImmut::Immutable(_) => None,
            SubSliceMutImmut::Mutable(buf) => Some(buf.as_mut_slice()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{SubSlice, SubSliceMut, SubSliceMutImmut};

    #[test]
    fn nested_slices_are_relative() {
        let mut raw = [0u8, 1, 2, 3, 4, 5, 6, 7];
        let mut s = SubSliceMut::new(&mut raw);
        s.slice(2..);
        s.slice(1..4);
        assert_eq!(s.as_slice(), &[3, 4, 5]);
        s.as_mut_slice()[2] = 50;
        s.reset();
        assert_eq!(s.len(), 8);
        assert_eq!(s.as_slice()[5], 50);
    }

    #[test]
    fn slice_is_clamped_to_window() {
        let raw = [9u8; 4];
        let mut s = SubSlice::new(&raw);
        s.slice(1..100);
        assert_eq!(s.len(), 3);
        s.slice(10..);
        assert_eq!(s.len(), 0);
        s.slice(..=usize::MAX);
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn immutable_lease_has_no_mutable_view() {
        static TABLE: [u8; 3] = [1, 2, 3];
        let mut lease = SubSliceMutImmut::Immutable(SubSlice::new(&TABLE));
        assert!(lease.as_mut_slice().is_none());
        lease.slice(..2);
        assert_eq!(lease.as_slice(), &[1, 2]);
        lease.reset();
        assert_eq!(lease.len(), 3);
    }
}
