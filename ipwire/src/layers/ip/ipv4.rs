// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::net::Ipv4Addr;

use bitflags::bitflags;
use ipwire_common::Cursor;

use super::options::{self, Ipv4Option};
use super::{IpProtocol, DEFAULT_TTL};
use crate::error::{Error, Result};
use crate::ident::PacketIdGenerator;
use crate::layers::traits::{ChecksumMode, FromCursor, ToBytes};
use crate::utils;

const LAYER: &str = "IPv4";

pub(crate) const IPV4_MIN_HEADER_LEN: usize = 20;
pub(crate) const IPV4_MAX_HEADER_LEN: usize = 60;
const IPV4_CHECKSUM_OFFSET: usize = 10;
pub(crate) const IPV4_MAX_FRAGMENT_OFFSET: u16 = 0x1fff;

bitflags! {
    /// Flags available in an IPv4 header, positioned as in the top three bits of octet 6.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Ipv4Flags: u8 {
        const RESERVED = 0b_1000_0000;
        const DONT_FRAGMENT = 0b_0100_0000;
        const MORE_FRAGMENTS = 0b_0010_0000;
    }
}

/// An IPv4 (Internet Protocol version 4) header.
///
/// ## Packet Layout
/// ```txt
///    .    Octet 0    .    Octet 1    .    Octet 2    .    Octet 3    .
///    |0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  0 |Version|  IHL  |    DSCP   |ECN|          Total Length         |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  4 |         Identification        |Flags|     Fragment Offset     |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  8 |  Time to Live |    Protocol   |        Header Checksum        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// 12 |                         Source Address                        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// 16 |                      Destination Address                      |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// 20 Z                      Options and Padding                      Z
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// `ihl` may describe more bytes than the options occupy; the remainder is zero padding.
/// The header checksum is recomputed every time the header is serialized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
    pub(crate) ihl: u8,
    pub(crate) dscp: u8,
    pub(crate) ecn: u8,
    pub(crate) total_length: u16,
    pub(crate) identification: u16,
    pub(crate) flags: Ipv4Flags,
    pub(crate) fragment_offset: u16,
    pub(crate) ttl: u8,
    pub(crate) protocol: IpProtocol,
    pub(crate) checksum: u16,
    pub(crate) source: Ipv4Addr,
    pub(crate) destination: Ipv4Addr,
    pub(crate) options: Vec<Ipv4Option>,
}

impl Ipv4Header {
    /// Starts building a header carrying `protocol` from `source` to `destination`.
    #[inline]
    pub fn builder(
        source: Ipv4Addr,
        destination: Ipv4Addr,
        protocol: IpProtocol,
    ) -> Ipv4HeaderBuilder {
        Ipv4HeaderBuilder {
            ihl: None,
            dscp: 0,
            ecn: 0,
            identification: None,
            flags: Ipv4Flags::empty(),
            fragment_offset: 0,
            ttl: DEFAULT_TTL,
            protocol: protocol.canonical(),
            source,
            destination,
            options: Vec::new(),
            payload_len: 0,
            checksum: None,
        }
    }

    /// The header length in 32-bit words.
    #[inline]
    pub fn ihl(&self) -> u8 {
        self.ihl
    }

    /// The Differentiated Services Code Point (6 bits).
    #[inline]
    pub fn dscp(&self) -> u8 {
        self.dscp
    }

    /// The Explicit Congestion Notification codepoint (2 bits).
    #[inline]
    pub fn ecn(&self) -> u8 {
        self.ecn
    }

    /// The length of the datagram (header and payload) in bytes.
    #[inline]
    pub fn total_length(&self) -> u16 {
        self.total_length
    }

    #[inline]
    pub fn identification(&self) -> u16 {
        self.identification
    }

    #[inline]
    pub fn flags(&self) -> Ipv4Flags {
        self.flags
    }

    #[inline]
    pub fn dont_fragment(&self) -> bool {
        self.flags.contains(Ipv4Flags::DONT_FRAGMENT)
    }

    #[inline]
    pub fn more_fragments(&self) -> bool {
        self.flags.contains(Ipv4Flags::MORE_FRAGMENTS)
    }

    /// Indicates whether this is the final (or only) fragment of its datagram.
    #[inline]
    pub fn last_fragment(&self) -> bool {
        !self.more_fragments()
    }

    /// The offset of this fragment's payload within the datagram, in units of 8 bytes.
    #[inline]
    pub fn fragment_offset(&self) -> u16 {
        self.fragment_offset
    }

    #[inline]
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    #[inline]
    pub fn protocol(&self) -> IpProtocol {
        self.protocol
    }

    /// The header checksum, as computed at construction or as found on the wire.
    #[inline]
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    #[inline]
    pub fn source(&self) -> Ipv4Addr {
        self.source
    }

    #[inline]
    pub fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    #[inline]
    pub fn options(&self) -> &[Ipv4Option] {
        &self.options
    }

    /// The length of the header in bytes.
    #[inline]
    pub fn header_len(&self) -> usize {
        self.ihl as usize * 4
    }

    /// The number of bytes following the header.
    #[inline]
    pub fn payload_len(&self) -> usize {
        (self.total_length as usize).saturating_sub(self.header_len())
    }

    /// Computes the checksum of the header as it would be serialized.
    pub fn compute_checksum(&self) -> u16 {
        let mut bytes = Vec::with_capacity(self.header_len());
        self.write_fields(&mut bytes);
        utils::internet_checksum(&bytes)
    }

    /// Compares the stored checksum with the computed one. [`ChecksumMode::Update`] is
    /// accepted but checks nothing, since the header itself is immutable.
    pub fn verify_checksum(&self, mode: ChecksumMode) -> Result<()> {
        mode.check(LAYER, self.checksum, self.compute_checksum())
    }

    pub(crate) fn refresh_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// Checks every invariant relating the header's fields, returning the violated one.
    pub(crate) fn invariant_violation(&self) -> Option<&'static str> {
        let header_len = self.header_len();
        if !(IPV4_MIN_HEADER_LEN..=IPV4_MAX_HEADER_LEN).contains(&header_len) {
            return Some("IHL must be between 5 and 15");
        }
        if IPV4_MIN_HEADER_LEN + options::options_len(&self.options) > header_len {
            return Some("IHL too small for the header's options");
        }
        if (self.total_length as usize) < header_len {
            return Some("total length is smaller than the header");
        }
        if self.dscp > 0x3f || self.ecn > 0x03 {
            return Some("DSCP or ECN value too wide for its field");
        }
        if self.fragment_offset > IPV4_MAX_FRAGMENT_OFFSET {
            return Some("fragment offset exceeds 13 bits");
        }
        None
    }

    /// Writes the header with a zeroed checksum field.
    fn write_fields(&self, bytes: &mut Vec<u8>) {
        let start = bytes.len();
        bytes.push(0x40 | self.ihl);
        bytes.push((self.dscp << 2) | self.ecn);
        bytes.extend(self.total_length.to_be_bytes());
        bytes.extend(self.identification.to_be_bytes());
        let flags_offset = (u16::from(self.flags.bits()) << 8) | self.fragment_offset;
        bytes.extend(flags_offset.to_be_bytes());
        bytes.push(self.ttl);
        bytes.push(self.protocol.into());
        bytes.extend([0, 0]);
        bytes.extend(self.source.octets());
        bytes.extend(self.destination.octets());
        for option in &self.options {
            option.encode(bytes);
        }
        bytes.resize(start + self.header_len(), 0);
    }
}

impl FromCursor for Ipv4Header {
    fn from_cursor(cursor: &mut Cursor<'_>) -> Result<Self> {
        let first = cursor.peek_u8().map_err(Error::too_short(LAYER))?;
        if first >> 4 != 4 {
            return Err(Error::malformed(LAYER, "version field was not 4"));
        }
        let ihl = first & 0x0f;
        if (ihl as usize) * 4 < IPV4_MIN_HEADER_LEN {
            return Err(Error::malformed(
                LAYER,
                "IHL field was less than the minimum of 5",
            ));
        }
        cursor
            .ensure(ihl as usize * 4)
            .map_err(Error::too_short(LAYER))?;

        let [_, tos] = cursor.read_array::<2>()?;
        let total_length = cursor.read_u16()?;
        let identification = cursor.read_u16()?;
        let flags_offset = cursor.read_u16()?;
        let ttl = cursor.read_u8()?;
        let protocol = IpProtocol::from(cursor.read_u8()?);
        let checksum = cursor.read_u16()?;
        let source = Ipv4Addr::from(cursor.read_array::<4>()?);
        let destination = Ipv4Addr::from(cursor.read_array::<4>()?);
        let options = options::parse_options(
            cursor,
            ihl as usize * 4 - IPV4_MIN_HEADER_LEN,
        )?;

        let header = Ipv4Header {
            ihl,
            dscp: tos >> 2,
            ecn: tos & 0x03,
            total_length,
            identification,
            flags: Ipv4Flags::from_bits_truncate((flags_offset >> 8) as u8),
            fragment_offset: flags_offset & IPV4_MAX_FRAGMENT_OFFSET,
            ttl,
            protocol,
            checksum,
            source,
            destination,
            options,
        };

        match header.invariant_violation() {
            Some(reason) => Err(Error::malformed(LAYER, reason)),
            None => Ok(header),
        }
    }
}

impl ToBytes for Ipv4Header {
    fn to_bytes_extended(&self, bytes: &mut Vec<u8>) {
        let start = bytes.len();
        self.write_fields(bytes);
        let checksum = utils::internet_checksum(&bytes[start..]);
        bytes[start + IPV4_CHECKSUM_OFFSET..start + IPV4_CHECKSUM_OFFSET + 2]
            .copy_from_slice(&checksum.to_be_bytes());
    }
}

/// Assembles an [`Ipv4Header`], deriving its length and checksum fields.
#[derive(Clone, Debug)]
pub struct Ipv4HeaderBuilder {
    ihl: Option<u8>,
    dscp: u8,
    ecn: u8,
    identification: Option<u16>,
    flags: Ipv4Flags,
    fragment_offset: u16,
    ttl: u8,
    protocol: IpProtocol,
    source: Ipv4Addr,
    destination: Ipv4Addr,
    options: Vec<Ipv4Option>,
    payload_len: usize,
    checksum: Option<u16>,
}

impl Ipv4HeaderBuilder {
    /// Sets the header length in 32-bit words. By default the smallest length that fits the
    /// options is used.
    #[inline]
    pub fn ihl(mut self, ihl: u8) -> Self {
        self.ihl = Some(ihl);
        self
    }

    #[inline]
    pub fn dscp(mut self, dscp: u8) -> Self {
        self.dscp = dscp;
        self
    }

    #[inline]
    pub fn ecn(mut self, ecn: u8) -> Self {
        self.ecn = ecn;
        self
    }

    /// Sets the Identification field. By default the next id of the [`PacketIdGenerator`]
    /// passed to [`build_with`](Self::build_with) is used.
    #[inline]
    pub fn identification(mut self, identification: u16) -> Self {
        self.identification = Some(identification);
        self
    }

    #[inline]
    pub fn dont_fragment(mut self, dont_fragment: bool) -> Self {
        self.flags.set(Ipv4Flags::DONT_FRAGMENT, dont_fragment);
        self
    }

    #[inline]
    pub fn more_fragments(mut self, more_fragments: bool) -> Self {
        self.flags.set(Ipv4Flags::MORE_FRAGMENTS, more_fragments);
        self
    }

    /// Sets the fragment offset, in units of 8 bytes.
    #[inline]
    pub fn fragment_offset(mut self, fragment_offset: u16) -> Self {
        self.fragment_offset = fragment_offset;
        self
    }

    #[inline]
    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    #[inline]
    pub fn option(mut self, option: Ipv4Option) -> Self {
        self.options.push(option);
        self
    }

    #[inline]
    pub fn options(mut self, options: Vec<Ipv4Option>) -> Self {
        self.options = options;
        self
    }

    /// Sets the number of bytes that will follow the header.
    #[inline]
    pub fn payload_len(mut self, payload_len: usize) -> Self {
        self.payload_len = payload_len;
        self
    }

    /// Sets the Header Checksum field verbatim instead of computing it.
    ///
    /// The value is only seen by [`Ipv4Header::checksum`] and [`Ipv4Header::verify_checksum`].
    /// Serialization always writes the computed checksum, so the header re-parsed from
    /// [`ToBytes::to_bytes`] carries the computed value instead.
    #[inline]
    pub fn checksum(mut self, checksum: u16) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Builds the header, drawing an Identification from the process-wide generator if none
    /// was set.
    #[inline]
    pub fn build(self) -> Result<Ipv4Header> {
        self.build_with(PacketIdGenerator::global())
    }

    pub fn build_with(mut self, ids: &PacketIdGenerator) -> Result<Ipv4Header> {
        options::normalize_options(&mut self.options)?;

        let options_len = options::options_len(&self.options);
        let ihl = match self.ihl {
            Some(ihl) => ihl,
            None => {
                let words = utils::padded_length::<4>(IPV4_MIN_HEADER_LEN + options_len) / 4;
                u8::try_from(words).map_err(|_| Error::build(LAYER, "options exceed 40 bytes"))?
            }
        };

        let total_length = u16::try_from(ihl as usize * 4 + self.payload_len)
            .map_err(|_| Error::build(LAYER, "total length exceeds 65535 bytes"))?;

        let mut header = Ipv4Header {
            ihl,
            dscp: self.dscp,
            ecn: self.ecn,
            total_length,
            identification: self
                .identification
                .unwrap_or_else(|| ids.next_ipv4_id()),
            flags: self.flags,
            fragment_offset: self.fragment_offset,
            ttl: self.ttl,
            protocol: self.protocol,
            checksum: 0,
            source: self.source,
            destination: self.destination,
            options: self.options,
        };

        if let Some(reason) = header.invariant_violation() {
            return Err(Error::build(LAYER, reason));
        }
        match self.checksum {
            Some(checksum) => header.checksum = checksum,
            None => header.refresh_checksum(),
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::ip::{RouteOption, SecurityOption};
    use hex_literal::hex;

    const SAMPLE: [u8; 20] = hex!("45 00 00 73 00 00 40 00 40 11 b8 61 c0 a8 00 01 c0 a8 00 c7");

    fn with_options() -> Ipv4Header {
        Ipv4Header::builder(
            Ipv4Addr::new(10, 1, 2, 3),
            Ipv4Addr::new(10, 3, 2, 1),
            IpProtocol::Udp,
        )
        .identification(0x1c46)
        .ttl(17)
        .dscp(46)
        .ecn(1)
        .option(Ipv4Option::LooseSourceRoute(RouteOption {
            pointer: 4,
            route: vec![Ipv4Addr::new(172, 16, 0, 1)],
        }))
        .option(Ipv4Option::NoOperation)
        .option(Ipv4Option::Security(SecurityOption {
            security: 0xf135,
            compartments: 0,
            handling_restrictions: 0,
            transmission_control: 0,
        }))
        .payload_len(12)
        .build()
        .unwrap()
    }

    #[test]
    fn parse_sample() {
        let header = Ipv4Header::from_bytes(&SAMPLE).unwrap();
        assert_eq!(header.ihl(), 5);
        assert_eq!(header.total_length(), 0x73);
        assert!(header.dont_fragment());
        assert!(header.last_fragment());
        assert_eq!(header.ttl(), 64);
        assert_eq!(header.protocol(), IpProtocol::Udp);
        assert_eq!(header.checksum(), 0xb861);
        assert_eq!(header.source(), Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(header.destination(), Ipv4Addr::new(192, 168, 0, 199));
        assert_eq!(header.payload_len(), 0x73 - 20);
        header.verify_checksum(ChecksumMode::Verify).unwrap();
        assert_eq!(header.to_bytes(), SAMPLE.to_vec());
    }

    #[test]
    fn options_round_trip() {
        let header = with_options();
        assert_eq!(header.ihl(), 10);
        assert_eq!(header.total_length(), 52);

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 40);
        assert_eq!(bytes, header.to_bytes());
        assert_eq!(utils::internet_checksum(&bytes), 0);

        let mut cursor = Cursor::new(&bytes);
        assert_eq!(Ipv4Header::from_cursor(&mut cursor).unwrap(), header);
        assert!(cursor.is_empty());
    }

    #[test]
    fn ihl_larger_than_options_pads_with_zeros() {
        let header = Ipv4Header::builder(
            Ipv4Addr::new(192, 0, 2, 1),
            Ipv4Addr::new(192, 0, 2, 2),
            IpProtocol::Tcp,
        )
        .ihl(6)
        .identification(1)
        .build()
        .unwrap();

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[20..], &[0, 0, 0, 0]);

        let mut cursor = Cursor::new(&bytes);
        let parsed = Ipv4Header::from_cursor(&mut cursor).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn trailing_end_of_option_list_is_padding() {
        let header = Ipv4Header::builder(
            Ipv4Addr::new(192, 0, 2, 1),
            Ipv4Addr::new(192, 0, 2, 2),
            IpProtocol::Tcp,
        )
        .option(Ipv4Option::NoOperation)
        .option(Ipv4Option::EndOfOptionList)
        .build()
        .unwrap();
        assert_eq!(header.options(), &[Ipv4Option::NoOperation]);
        assert_eq!(header.ihl(), 6);
        assert_eq!(Ipv4Header::from_bytes(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn truncation_is_too_short() {
        let bytes = with_options().to_bytes();
        for len in 0..bytes.len() {
            let err = Ipv4Header::from_bytes(&bytes[..len]).unwrap_err();
            assert!(err.is_too_short(), "truncated to {len}: {err:?}");
        }
    }

    #[test]
    fn structural_violations_are_malformed() {
        let mut bytes = SAMPLE;
        bytes[0] = 0x65;
        assert!(Ipv4Header::from_bytes(&bytes).unwrap_err().is_malformed());

        bytes[0] = 0x44;
        assert!(Ipv4Header::from_bytes(&bytes).unwrap_err().is_malformed());

        let mut bytes = SAMPLE;
        bytes[2] = 0;
        bytes[3] = 0x10;
        assert!(Ipv4Header::from_bytes(&bytes).unwrap_err().is_malformed());
    }

    #[test]
    fn ihl_too_small_for_options() {
        let err = Ipv4Header::builder(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            IpProtocol::Tcp,
        )
        .ihl(5)
        .option(Ipv4Option::StreamId(7))
        .build()
        .unwrap_err();
        assert!(matches!(err, Error::Build { .. }));
    }

    #[test]
    fn checksum_verification_modes() {
        let mut bytes = SAMPLE;
        bytes[11] ^= 0xff;
        let header = Ipv4Header::from_bytes(&bytes).unwrap();
        assert!(matches!(
            header.verify_checksum(ChecksumMode::Verify),
            Err(Error::ChecksumMismatch {
                expected: 0xb89e,
                computed: 0xb861,
                ..
            })
        ));
        header.verify_checksum(ChecksumMode::Warn).unwrap();
        // Serialization always emits the correct checksum.
        assert_eq!(header.to_bytes(), SAMPLE.to_vec());
    }

    #[test]
    fn explicit_checksum_is_kept() {
        let header = Ipv4Header::builder(
            Ipv4Addr::new(192, 0, 2, 1),
            Ipv4Addr::new(192, 0, 2, 2),
            IpProtocol::Udp,
        )
        .identification(9)
        .checksum(0x1234)
        .build()
        .unwrap();
        assert_eq!(header.checksum(), 0x1234);
        assert!(header.verify_checksum(ChecksumMode::Verify).is_err());

        let reparsed = Ipv4Header::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(reparsed.checksum(), header.compute_checksum());
        assert_ne!(reparsed, header);
        assert!(reparsed.verify_checksum(ChecksumMode::Verify).is_ok());
    }
}
