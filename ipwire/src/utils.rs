// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # General utility functions
//!
//! Internet checksum arithmetic and the alignment helpers shared by the header codecs.

/// Computes the one's complement sum of `bytes` taken as big-endian 16-bit words.
///
/// An odd trailing byte is padded with a zero byte on the right.
pub fn ones_complement_16bit(bytes: &[u8]) -> u16 {
    let mut chunks = bytes.chunks_exact(2);
    let mut res = chunks
        .by_ref()
        .fold(0u16, |acc, w| ones_complement_add(acc, u16::from_be_bytes([w[0], w[1]])));
    if let [last] = chunks.remainder() {
        res = ones_complement_add(res, u16::from(*last) << 8);
    }
    res
}

/// Adds two 16-bit values with end-around carry.
#[inline]
pub fn ones_complement_add(a: u16, b: u16) -> u16 {
    let (new, carry) = a.overflowing_add(b);
    new.wrapping_add(u16::from(carry))
}

/// Adds a 32-bit value as two 16-bit words.
#[inline]
pub fn ones_complement_add_u32(a: u16, b: u32) -> u16 {
    ones_complement_add(ones_complement_add(a, (b >> 16) as u16), b as u16)
}

/// The Internet checksum (RFC 1071) of `bytes`.
#[inline]
pub fn internet_checksum(bytes: &[u8]) -> u16 {
    !ones_complement_16bit(bytes)
}

/// Rounds `len` up to the nearest multiple of `T`.
#[inline]
pub const fn padded_length<const T: usize>(len: usize) -> usize {
    if len % T == 0 {
        len
    } else {
        len + (T - (len % T))
    }
}

/// Rounds `value` down to the nearest multiple of `divisor`.
#[inline]
pub const fn closest_divisible_by(value: usize, divisor: usize) -> usize {
    value - (value % divisor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn odd_length_header_sample() {
        let bytes = hex!("45 00 00 73 c7 00 40 00 40 11 00 00 c0 a8 00 01 c0 a8 00");
        assert_eq!(bytes.len(), 19);
        assert_eq!(internet_checksum(&bytes), 0xf227);
    }

    #[test]
    fn valid_header_sums_to_zero() {
        let header = hex!("45 00 00 73 00 00 40 00 40 11 b8 61 c0 a8 00 01 c0 a8 00 c7");
        assert_eq!(internet_checksum(&header), 0);

        let mut zeroed = header;
        zeroed[10] = 0;
        zeroed[11] = 0;
        assert_eq!(internet_checksum(&zeroed), 0xb861);
    }

    #[test]
    fn end_around_carry() {
        assert_eq!(ones_complement_add(0xffff, 0x0001), 0x0001);
        assert_eq!(ones_complement_add(0x8000, 0x8000), 0x0001);
        assert_eq!(ones_complement_add_u32(0, 0x0001_ffff), 0x0001);
    }

    #[test]
    fn alignment_helpers() {
        assert_eq!(padded_length::<4>(0), 0);
        assert_eq!(padded_length::<4>(5), 8);
        assert_eq!(padded_length::<8>(16), 16);
        assert_eq!(closest_divisible_by(980, 8), 976);
        assert_eq!(closest_divisible_by(952, 8), 952);
    }
}
