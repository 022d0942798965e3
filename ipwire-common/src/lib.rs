// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Low-level building blocks shared between the `ipwire` crates.

#![forbid(unsafe_code)]

mod cursor;

pub use cursor::{Cursor, Truncated};

use core::array;

/// A fixed-capacity buffer that stores up to `N` elements inline.
#[derive(Clone, Copy, Debug)]
pub struct Buffer<T: Copy, const N: usize> {
    buf: [T; N],
    buf_len: usize,
}

impl<T: Copy + Default, const N: usize> Buffer<T, N> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer holding a copy of `slice`, or `None` if `slice` holds more than `N`
    /// elements.
    #[inline]
    pub fn from_slice(slice: &[T]) -> Option<Self> {
        let mut buffer = Self::new();
        buffer.try_append(slice)?;
        Some(buffer)
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.buf[..self.buf_len]
    }

    /// Appends the provided elements to the buffer, returning `None` (and leaving the buffer
    /// unmodified) if insufficient space is available.
    #[inline]
    pub fn try_append(&mut self, slice: &[T]) -> Option<()> {
        let dst = self.buf.get_mut(self.buf_len..self.buf_len + slice.len())?;
        dst.copy_from_slice(slice);
        self.buf_len += slice.len();
        Some(())
    }

    /// Truncates the buffer to the specified length. Does nothing if `len` exceeds the current
    /// length of the buffer.
    #[inline]
    pub fn truncate(&mut self, len: usize) {
        self.buf_len = self.buf_len.min(len);
    }

    /// The length of the stored buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf_len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf_len == 0
    }

    /// The number of unused elements in the buffer.
    #[inline]
    pub fn remaining(&self) -> usize {
        N - self.buf_len
    }
}

impl<T: Copy + Default, const N: usize> Default for Buffer<T, N> {
    #[inline]
    fn default() -> Self {
        Self {
            buf: array::from_fn(|_| T::default()),
            buf_len: 0,
        }
    }
}

// Equality only considers the occupied portion of the buffer.
impl<T: Copy + Default + PartialEq, const N: usize> PartialEq for Buffer<T, N> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Copy + Default + Eq, const N: usize> Eq for Buffer<T, N> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_rejects_overflow() {
        let mut buffer = Buffer::<u8, 4>::new();
        assert_eq!(buffer.try_append(&[1, 2, 3]), Some(()));
        assert_eq!(buffer.try_append(&[4, 5]), None);
        assert_eq!(buffer.as_slice(), &[1, 2, 3]);
        assert_eq!(buffer.remaining(), 1);
    }

    #[test]
    fn buffer_equality_ignores_stale_tail() {
        let mut a = Buffer::<u8, 8>::from_slice(&[9, 9, 9]).unwrap();
        a.truncate(1);
        let b = Buffer::<u8, 8>::from_slice(&[9]).unwrap();
        assert_eq!(a, b);
        assert!(Buffer::<u8, 2>::from_slice(&[1, 2, 3]).is_none());
    }
}
