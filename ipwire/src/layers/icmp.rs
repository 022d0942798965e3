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
use crate::layers::traits::{segment_with_zeroed_checksum, ChecksumMode, ToBytes};
use crate::utils;

pub(crate) const ICMP_HEADER_LEN: usize = 8;
const ICMP_CHECKSUM_OFFSET: usize = 2;

/// Which ICMP the header belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IcmpVersion {
    /// ICMP for IPv4 (RFC 792), IP protocol 1.
    V4,
    /// ICMPv6 (RFC 4443), IP protocol 58.
    V6,
}

impl IcmpVersion {
    #[inline]
    pub fn protocol(self) -> IpProtocol {
        match self {
            IcmpVersion::V4 => IpProtocol::Icmp,
            IcmpVersion::V6 => IpProtocol::Ipv6Icmp,
        }
    }

    #[inline]
    fn layer_name(self) -> &'static str {
        match self {
            IcmpVersion::V4 => "ICMP",
            IcmpVersion::V6 => "ICMPv6",
        }
    }
}

/// The fixed 8-byte header shared by every ICMP and ICMPv6 message.
///
/// Message-specific fields (echo identifiers, MTU values, the invoking packet...) are left to
/// the payload and the last four header bytes; this type interprets only the type, code and
/// checksum.
///
/// ## Packet Layout
/// ```txt
///    .    Octet 0    .    Octet 1    .    Octet 2    .    Octet 3    .
///    |0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  0 |      Type     |      Code     |            Checksum           |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  4 |                         Rest of Header                        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IcmpHeader {
    pub(crate) version: IcmpVersion,
    pub icmp_type: u8,
    pub code: u8,
    pub(crate) checksum: u16,
    pub rest_of_header: [u8; 4],
}

impl IcmpHeader {
    /// Creates a header with a zero checksum.
    #[inline]
    pub fn new(version: IcmpVersion, icmp_type: u8, code: u8, rest_of_header: [u8; 4]) -> Self {
        IcmpHeader {
            version,
            icmp_type,
            code,
            checksum: 0,
            rest_of_header,
        }
    }

    pub fn decode(version: IcmpVersion, cursor: &mut Cursor<'_>) -> Result<Self> {
        let bytes = cursor
            .read_array::<ICMP_HEADER_LEN>()
            .map_err(Error::too_short(version.layer_name()))?;
        Ok(IcmpHeader {
            version,
            icmp_type: bytes[0],
            code: bytes[1],
            checksum: u16::from_be_bytes([bytes[2], bytes[3]]),
            rest_of_header: [bytes[4], bytes[5], bytes[6], bytes[7]],
        })
    }

    #[inline]
    pub fn version(&self) -> IcmpVersion {
        self.version
    }

    #[inline]
    pub fn protocol(&self) -> IpProtocol {
        self.version.protocol()
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    #[inline]
    pub fn set_checksum(&mut self, checksum: u16) {
        self.checksum = checksum;
    }

    #[inline]
    pub fn header_len(&self) -> usize {
        ICMP_HEADER_LEN
    }

    /// Computes the message checksum and stores or verifies it per `mode`.
    ///
    /// The ICMPv4 checksum covers the message alone; the ICMPv6 checksum also covers the IPv6
    /// pseudo-header.
    pub fn compute_checksum(
        &mut self,
        ip: &IpHeader,
        payload: &[u8],
        mode: ChecksumMode,
    ) -> Result<u16> {
        let layer = self.version.layer_name();
        let segment = segment_with_zeroed_checksum(self, ICMP_CHECKSUM_OFFSET, payload);
        let computed = match (self.version, ip) {
            (IcmpVersion::V4, IpHeader::V4(_)) => utils::internet_checksum(&segment),
            (IcmpVersion::V6, IpHeader::V6(_)) => {
                ip.pseudo_header_checksum(IpProtocol::Ipv6Icmp, &segment, layer)?
            }
            _ => {
                return Err(Error::malformed(
                    layer,
                    "ICMP version does not match the IP version",
                ))
            }
        };

        match mode {
            ChecksumMode::Update => self.checksum = computed,
            _ => mode.check(layer, self.checksum, computed)?,
        }
        Ok(computed)
    }
}

impl ToBytes for IcmpHeader {
    fn to_bytes_extended(&self, bytes: &mut Vec<u8>) {
        bytes.push(self.icmp_type);
        bytes.push(self.code);
        bytes.extend(self.checksum.to_be_bytes());
        bytes.extend(self.rest_of_header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn echo_request_checksum() {
        // Echo request, id 1, sequence 1, payload "abcd".
        let ip = IpHeader::create(
            Ipv4Addr::new(10, 0, 0, 1).into(),
            Ipv4Addr::new(10, 0, 0, 2).into(),
            IpProtocol::Icmp,
            12,
        )
        .unwrap();
        let mut header = IcmpHeader::new(IcmpVersion::V4, 8, 0, hex!("00 01 00 01"));
        let computed = header
            .compute_checksum(&ip, b"abcd", ChecksumMode::Update)
            .unwrap();
        assert_eq!(computed, 0x3337);

        let mut bytes = header.to_bytes();
        bytes.extend_from_slice(b"abcd");
        assert_eq!(utils::internet_checksum(&bytes), 0);

        let parsed = IcmpHeader::decode(IcmpVersion::V4, &mut Cursor::new(&bytes)).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn icmpv6_uses_pseudo_header() {
        let ip = IpHeader::create(
            Ipv6Addr::LOCALHOST.into(),
            Ipv6Addr::LOCALHOST.into(),
            IpProtocol::Ipv6Icmp,
            8,
        )
        .unwrap();
        let mut header = IcmpHeader::new(IcmpVersion::V6, 128, 0, [0, 7, 0, 1]);
        let with_pseudo = header
            .compute_checksum(&ip, &[], ChecksumMode::Update)
            .unwrap();
        let without_pseudo = utils::internet_checksum(&hex!("80 00 00 00 00 07 00 01"));
        assert_ne!(with_pseudo, without_pseudo);
        header
            .compute_checksum(&ip, &[], ChecksumMode::Verify)
            .unwrap();
    }

    #[test]
    fn version_mismatch_is_malformed() {
        let ip = IpHeader::create(
            Ipv6Addr::LOCALHOST.into(),
            Ipv6Addr::LOCALHOST.into(),
            IpProtocol::Ipv6Icmp,
            8,
        )
        .unwrap();
        let mut header = IcmpHeader::new(IcmpVersion::V4, 8, 0, [0; 4]);
        let err = header
            .compute_checksum(&ip, &[], ChecksumMode::Update)
            .unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn truncated_header_is_too_short() {
        let err = IcmpHeader::decode(IcmpVersion::V6, &mut Cursor::new(&[0x80, 0, 0])).unwrap_err();
        assert!(err.is_too_short());
    }
}
