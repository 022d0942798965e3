// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use ipwire_common::Cursor;

use crate::error::{Error, Result};
use crate::layers::ip::{IpHeader, IpProtocol};
use crate::layers::traits::{ChecksumMode, FromCursor, ToBytes, TransportHeader};

const LAYER: &str = "UDP";

pub(crate) const UDP_HEADER_LEN: usize = 8;
const UDP_CHECKSUM_OFFSET: usize = 6;

/// A UDP (User Datagram Protocol) header.
///
/// ## Packet Layout
/// ```txt
///    .    Octet 0    .    Octet 1    .    Octet 2    .    Octet 3    .
///    |0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  0 |          Source Port          |        Destination Port       |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  4 |             Length            |            Checksum           |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdpHeader {
    pub(crate) source_port: u16,
    pub(crate) destination_port: u16,
    pub(crate) length: u16,
    pub(crate) checksum: u16,
}

impl UdpHeader {
    /// Creates a header for a datagram carrying `payload_len` bytes, with a zero checksum.
    pub fn new(source_port: u16, destination_port: u16, payload_len: usize) -> Result<Self> {
        let length = u16::try_from(UDP_HEADER_LEN + payload_len)
            .map_err(|_| Error::build(LAYER, "datagram length exceeds 65535 bytes"))?;
        Ok(UdpHeader {
            source_port,
            destination_port,
            length,
            checksum: 0,
        })
    }

    /// The length of the header and its data in bytes.
    #[inline]
    pub fn length(&self) -> u16 {
        self.length
    }

    /// The number of data bytes following the header.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.length as usize - UDP_HEADER_LEN
    }
}

impl FromCursor for UdpHeader {
    fn from_cursor(cursor: &mut Cursor<'_>) -> Result<Self> {
        cursor
            .ensure(UDP_HEADER_LEN)
            .map_err(Error::too_short(LAYER))?;
        let source_port = cursor.read_u16()?;
        let destination_port = cursor.read_u16()?;
        let length = cursor.read_u16()?;
        let checksum = cursor.read_u16()?;

        if (length as usize) < UDP_HEADER_LEN {
            return Err(Error::malformed(
                LAYER,
                "length field was less than the 8-byte header",
            ));
        }

        Ok(UdpHeader {
            source_port,
            destination_port,
            length,
            checksum,
        })
    }
}

impl ToBytes for UdpHeader {
    fn to_bytes_extended(&self, bytes: &mut Vec<u8>) {
        bytes.extend(self.source_port.to_be_bytes());
        bytes.extend(self.destination_port.to_be_bytes());
        bytes.extend(self.length.to_be_bytes());
        bytes.extend(self.checksum.to_be_bytes());
    }
}

impl TransportHeader for UdpHeader {
    const NAME: &'static str = LAYER;

    #[inline]
    fn protocol(&self) -> IpProtocol {
        IpProtocol::Udp
    }

    #[inline]
    fn source_port(&self) -> u16 {
        self.source_port
    }

    #[inline]
    fn destination_port(&self) -> u16 {
        self.destination_port
    }

    #[inline]
    fn checksum(&self) -> u16 {
        self.checksum
    }

    #[inline]
    fn set_checksum(&mut self, checksum: u16) {
        self.checksum = checksum;
    }

    #[inline]
    fn header_len(&self) -> usize {
        UDP_HEADER_LEN
    }

    #[inline]
    fn checksum_offset(&self) -> usize {
        UDP_CHECKSUM_OFFSET
    }

    /// As for other transport headers, except that a computed checksum of zero is sent as
    /// `0xffff`, and a received zero checksum over IPv4 means none was computed.
    fn compute_checksum(
        &mut self,
        ip: &IpHeader,
        payload: &[u8],
        mode: ChecksumMode,
    ) -> Result<u16> {
        let computed = match self.pseudo_header_checksum(ip, payload)? {
            0 => 0xffff,
            sum => sum,
        };
        match mode {
            ChecksumMode::Update => self.checksum = computed,
            _ if self.checksum == 0 && matches!(ip, IpHeader::V4(_)) => (),
            _ => mode.check(LAYER, self.checksum, computed)?,
        }
        Ok(computed)
    }
}
