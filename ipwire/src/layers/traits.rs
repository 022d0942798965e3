// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Traits shared by every header type, along with the generic TLV reader used by option lists.

use ipwire_common::Cursor;

use crate::error::{Error, Result};
use crate::layers::ip::{IpHeader, IpProtocol};

/// Serializes a header into its wire representation.
pub trait ToBytes {
    /// Appends the wire representation of `self` to `bytes`.
    fn to_bytes_extended(&self, bytes: &mut Vec<u8>);

    /// Returns the wire representation of `self`.
    #[inline]
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.to_bytes_extended(&mut bytes);
        bytes
    }
}

/// Decodes a header from a cursor, leaving the cursor positioned immediately after it.
pub trait FromCursor: Sized {
    fn from_cursor(cursor: &mut Cursor<'_>) -> Result<Self>;

    /// Decodes a header from the start of `bytes`. Trailing bytes are ignored.
    #[inline]
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_cursor(&mut Cursor::new(bytes))
    }
}

/// What to do with a freshly computed checksum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChecksumMode {
    /// Overwrite the checksum carried by the header.
    #[default]
    Update,
    /// Compare against the checksum carried by the header; a mismatch is an error.
    Verify,
    /// Compare against the checksum carried by the header; a mismatch is logged.
    Warn,
}

impl ChecksumMode {
    /// Compares a header's `stored` checksum with the `computed` one according to this mode.
    /// `Update` always succeeds.
    pub(crate) fn check(self, layer: &'static str, stored: u16, computed: u16) -> Result<()> {
        if stored == computed {
            return Ok(());
        }
        match self {
            ChecksumMode::Update => Ok(()),
            ChecksumMode::Verify => Err(Error::ChecksumMismatch {
                layer,
                expected: stored,
                computed,
            }),
            ChecksumMode::Warn => {
                tracing::warn!(layer, stored, computed, "checksum mismatch");
                Ok(())
            }
        }
    }
}

/// An upper-layer header that carries ports and a checksum covering an IP pseudo-header.
pub trait TransportHeader: ToBytes {
    /// The layer name used in errors.
    const NAME: &'static str;

    /// The IP protocol number identifying this header.
    fn protocol(&self) -> IpProtocol;

    fn source_port(&self) -> u16;

    fn destination_port(&self) -> u16;

    fn checksum(&self) -> u16;

    fn set_checksum(&mut self, checksum: u16);

    /// The length of the header in bytes.
    fn header_len(&self) -> usize;

    /// The byte offset of the checksum field within the header.
    fn checksum_offset(&self) -> usize;

    /// Computes the checksum over the IP pseudo-header, this header (with its checksum field
    /// zeroed) and `payload`.
    fn pseudo_header_checksum(&self, ip: &IpHeader, payload: &[u8]) -> Result<u16> {
        let segment = segment_with_zeroed_checksum(self, self.checksum_offset(), payload);
        ip.pseudo_header_checksum(self.protocol(), &segment, Self::NAME)
    }

    /// Computes the checksum of this header and either stores or verifies it, per `mode`.
    fn compute_checksum(
        &mut self,
        ip: &IpHeader,
        payload: &[u8],
        mode: ChecksumMode,
    ) -> Result<u16> {
        let computed = self.pseudo_header_checksum(ip, payload)?;
        match mode {
            ChecksumMode::Update => self.set_checksum(computed),
            _ => mode.check(Self::NAME, self.checksum(), computed)?,
        }
        Ok(computed)
    }
}

/// Serializes `header` followed by `payload`, with the two checksum bytes at `checksum_offset`
/// set to zero.
pub(crate) fn segment_with_zeroed_checksum<H: ToBytes + ?Sized>(
    header: &H,
    checksum_offset: usize,
    payload: &[u8],
) -> Vec<u8> {
    let mut segment = Vec::new();
    header.to_bytes_extended(&mut segment);
    if let Some(field) = segment.get_mut(checksum_offset..checksum_offset + 2) {
        field.fill(0);
    }
    segment.extend_from_slice(payload);
    segment
}

// =============================================================================
//                               TLV Option Lists
// =============================================================================

/// How the length octet of a TLV is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TlvLength {
    /// The length covers the type and length octets as well as the data (IPv4 and TCP options).
    Total,
    /// The length covers only the data (IPv6 Hop-by-Hop and Destination options).
    Data,
}

/// A single undecoded entry of a TLV list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RawTlv<'a> {
    /// Offset of the entry's type octet from the start of the list.
    pub offset: usize,
    pub kind: u8,
    /// `None` for single-octet entries that carry no length.
    pub data: Option<&'a [u8]>,
}

/// Iterates over a length-bounded TLV list.
///
/// The cursor's limit is narrowed to the end of the list for as long as the reader lives, so
/// an entry claiming to run past the list fails with a short read rather than consuming bytes of
/// whatever follows. Iteration ends at the end of the list, after yielding the terminator kind
/// (if any), or after the first error.
pub(crate) struct TlvReader<'c, 'a> {
    cursor: &'c mut Cursor<'a>,
    layer: &'static str,
    start: usize,
    saved_limit: usize,
    singletons: &'static [u8],
    terminator: Option<u8>,
    length: TlvLength,
    done: bool,
}

impl<'c, 'a> TlvReader<'c, 'a> {
    pub fn new(
        cursor: &'c mut Cursor<'a>,
        len: usize,
        layer: &'static str,
        singletons: &'static [u8],
        terminator: Option<u8>,
        length: TlvLength,
    ) -> Result<Self> {
        cursor.ensure(len).map_err(Error::too_short(layer))?;
        let start = cursor.position();
        let saved_limit = cursor.set_limit(start + len);
        Ok(TlvReader {
            cursor,
            layer,
            start,
            saved_limit,
            singletons,
            terminator,
            length,
            done: false,
        })
    }

    /// Moves the cursor to the end of the list, skipping anything left unread.
    pub fn finish(self) -> Result<()> {
        let end = self.cursor.limit();
        self.cursor.seek(end).map_err(Error::too_short(self.layer))
    }

    fn read_entry(&mut self) -> Result<RawTlv<'a>> {
        let offset = self.cursor.position() - self.start;
        let kind = self.cursor.read_u8().map_err(Error::too_short(self.layer))?;
        if self.singletons.contains(&kind) {
            if self.terminator == Some(kind) {
                self.done = true;
            }
            return Ok(RawTlv {
                offset,
                kind,
                data: None,
            });
        }

        let length = self.cursor.read_u8().map_err(Error::too_short(self.layer))? as usize;
        let data_len = match self.length {
            TlvLength::Total if length < 2 => {
                return Err(Error::malformed(
                    self.layer,
                    "option length field contained too small a value",
                ))
            }
            TlvLength::Total => length - 2,
            TlvLength::Data => length,
        };
        let data = self
            .cursor
            .read_slice(data_len)
            .map_err(Error::too_short(self.layer))?;

        Ok(RawTlv {
            offset,
            kind,
            data: Some(data),
        })
    }
}

impl<'a> Iterator for TlvReader<'_, 'a> {
    type Item = Result<RawTlv<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.cursor.is_empty() {
            return None;
        }
        let entry = self.read_entry();
        if entry.is_err() {
            self.done = true;
        }
        Some(entry)
    }
}

impl Drop for TlvReader<'_, '_> {
    fn drop(&mut self) {
        self.cursor.set_limit(self.saved_limit);
    }
}
