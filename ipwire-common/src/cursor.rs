// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use thiserror::Error;

/// A read was attempted past the limit of a [`Cursor`].
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
#[error("insufficient bytes: needed {needed}, {available} available")]
pub struct Truncated {
    /// The number of bytes the read required.
    pub needed: usize,
    /// The number of bytes that remained before the cursor's limit.
    pub available: usize,
}

/// A read position over a borrowed byte slice.
///
/// Headers are decoded back-to-back from a single buffer, so every decoder takes a
/// `&mut Cursor` and leaves it positioned immediately after the bytes it consumed. All
/// multi-byte integers are read in network (big-endian) byte order.
///
/// A cursor carries a `limit` in addition to its position; no read may cross the limit even if
/// the underlying slice is longer. Decoders of length-delimited regions (an IPv6 extension
/// header's option area, say) narrow the limit for the duration of the region and then restore
/// it with [`Cursor::set_limit`].
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    limit: usize,
}

impl<'a> Cursor<'a> {
    #[inline]
    pub fn new(bytes: &'a [u8]) -> Self {
        Cursor {
            bytes,
            pos: 0,
            limit: bytes.len(),
        }
    }

    /// The absolute offset of the next byte to be read.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The absolute offset that reads may not cross.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The number of bytes between the current position and the limit.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.pos)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Sets a new limit, returning the previous one.
    ///
    /// The limit is clamped to the length of the underlying slice.
    #[inline]
    pub fn set_limit(&mut self, limit: usize) -> usize {
        core::mem::replace(&mut self.limit, limit.min(self.bytes.len()))
    }

    /// Checks that at least `len` bytes remain without consuming them.
    #[inline]
    pub fn ensure(&self, len: usize) -> Result<(), Truncated> {
        if self.remaining() < len {
            Err(Truncated {
                needed: len,
                available: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    /// Moves the cursor to the absolute offset `pos`, which may not exceed the limit.
    #[inline]
    pub fn seek(&mut self, pos: usize) -> Result<(), Truncated> {
        if pos > self.limit {
            return Err(Truncated {
                needed: pos.saturating_sub(self.pos),
                available: self.remaining(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    #[inline]
    pub fn skip(&mut self, len: usize) -> Result<(), Truncated> {
        self.ensure(len)?;
        self.pos += len;
        Ok(())
    }

    #[inline]
    pub fn peek_u8(&self) -> Result<u8, Truncated> {
        self.ensure(1)?;
        Ok(self.bytes[self.pos])
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, Truncated> {
        let [byte] = self.read_array::<1>()?;
        Ok(byte)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, Truncated> {
        self.read_array().map(u16::from_be_bytes)
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, Truncated> {
        self.read_array().map(u32::from_be_bytes)
    }

    #[inline]
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Truncated> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_slice(N)?);
        Ok(array)
    }

    /// Consumes and returns the next `len` bytes.
    #[inline]
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], Truncated> {
        self.ensure(len)?;
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// The bytes between the current position and the limit, without consuming them.
    #[inline]
    pub fn remaining_slice(&self) -> &'a [u8] {
        self.bytes.get(self.pos..self.limit).unwrap_or(&[])
    }
}
