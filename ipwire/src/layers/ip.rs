// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Internet Protocol (IPv4 and IPv6) and related data structures.
//!
//! [`IpHeader`] is the entry point for decoding: it dispatches on the version nibble to
//! [`Ipv4Header`] or [`Ipv6Header`], each of which consumes its options or extension-header
//! chain and leaves the cursor at the start of the upper-layer header.

mod extension;
mod ipv4;
mod ipv6;
mod options;

pub use extension::*;
pub use ipv4::*;
pub use ipv6::*;
pub use options::*;

use std::net::IpAddr;

use ipwire_common::Cursor;
use ipwire_macros::WireEnum;

use crate::error::{Error, Result};
use crate::ident::PacketIdGenerator;
use crate::layers::traits::{FromCursor, ToBytes};
use crate::utils;

/// The default TTL (IPv4) or Hop Limit (IPv6) of constructed headers.
pub const DEFAULT_TTL: u8 = 64;

/// The Version number of an Internet Protocol (IP) packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, WireEnum)]
pub enum IpVersion {
    /// Internet Protocol, Version 4 (see RFC 791)
    #[wire(4)]
    Ipv4,
    /// Internet Protocol, Version 6 (see RFC 8200)
    #[wire(6)]
    Ipv6,
    #[wire(other)]
    Other(u8),
}

/// An IANA-assigned Internet Protocol number, as carried in the IPv4 Protocol field and the
/// IPv6 Next Header field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, WireEnum)]
pub enum IpProtocol {
    /// IPv6 Hop-by-Hop Option
    #[wire(0)]
    HopByHop,
    /// Internet Control Message Protocol
    #[wire(1)]
    Icmp,
    /// Transmission Control Protocol
    #[wire(6)]
    Tcp,
    /// User Datagram Protocol
    #[wire(17)]
    Udp,
    /// Routing Header for IPv6
    #[wire(43)]
    Ipv6Route,
    /// Fragment Header for IPv6
    #[wire(44)]
    Ipv6Frag,
    /// Encapsulating Security Payload
    #[wire(50)]
    Esp,
    /// Authentication Header
    #[wire(51)]
    Ah,
    /// ICMP for IPv6
    #[wire(58)]
    Ipv6Icmp,
    /// No Next Header for IPv6
    #[wire(59)]
    Ipv6NoNxt,
    /// Destination Options for IPv6
    #[wire(60)]
    Ipv6Opts,
    /// Mobility Extension Header for IPv6
    #[wire(135)]
    Mobility,
    /// Host Identity Protocol
    #[wire(139)]
    Hip,
    /// Shim6 Protocol
    #[wire(140)]
    Shim6,
    /// Use for experimentation and testing (RFC 3692)
    #[wire(253)]
    Experiment1,
    /// Use for experimentation and testing (RFC 3692)
    #[wire(254)]
    Experiment2,
    #[wire(other)]
    Other(u8),
}

impl IpProtocol {
    /// Indicates whether the value names an IPv6 extension header rather than an upper-layer
    /// protocol.
    pub fn is_ipv6_extension(&self) -> bool {
        matches!(
            self,
            IpProtocol::HopByHop
                | IpProtocol::Ipv6Route
                | IpProtocol::Ipv6Frag
                | IpProtocol::Esp
                | IpProtocol::Ah
                | IpProtocol::Ipv6Opts
                | IpProtocol::Mobility
                | IpProtocol::Hip
                | IpProtocol::Shim6
                | IpProtocol::Experiment1
                | IpProtocol::Experiment2
        )
    }
}

/// An IPv4 or IPv6 header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IpHeader {
    V4(Ipv4Header),
    V6(Ipv6Header),
}

impl IpHeader {
    /// Creates a minimal header (no options or extension headers) for an upper-layer segment of
    /// `payload_len` bytes, drawing the IPv4 Identification from the process-wide generator.
    ///
    /// `source` and `destination` must belong to the same address family.
    #[inline]
    pub fn create(
        source: IpAddr,
        destination: IpAddr,
        protocol: IpProtocol,
        payload_len: usize,
    ) -> Result<Self> {
        Self::create_with(
            PacketIdGenerator::global(),
            source,
            destination,
            protocol,
            payload_len,
        )
    }

    /// Like [`IpHeader::create`], drawing identifiers from `ids`.
    pub fn create_with(
        ids: &PacketIdGenerator,
        source: IpAddr,
        destination: IpAddr,
        protocol: IpProtocol,
        payload_len: usize,
    ) -> Result<Self> {
        match (source, destination) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => Ipv4Header::builder(src, dst, protocol)
                .payload_len(payload_len)
                .build_with(ids)
                .map(IpHeader::V4),
            (IpAddr::V6(src), IpAddr::V6(dst)) => Ipv6Header::builder(src, dst, protocol)
                .payload_len(payload_len)
                .build()
                .map(IpHeader::V6),
            _ => Err(Error::build(
                "IP",
                "source and destination addresses belong to different families",
            )),
        }
    }

    /// Decodes a header and the payload its length fields declare, leaving the cursor after the
    /// payload.
    ///
    /// Unlike [`crate::Packet`], this does not interpret the payload, so it accepts any
    /// fragment of a datagram.
    pub fn parse_datagram(cursor: &mut Cursor<'_>) -> Result<(IpHeader, Vec<u8>)> {
        let header = IpHeader::from_cursor(cursor)?;
        let payload = cursor
            .read_slice(header.payload_len())
            .map_err(Error::too_short(header.layer_name()))?;
        Ok((header, payload.to_vec()))
    }

    #[inline]
    pub fn version(&self) -> IpVersion {
        match self {
            IpHeader::V4(_) => IpVersion::Ipv4,
            IpHeader::V6(_) => IpVersion::Ipv6,
        }
    }

    /// The protocol of the header immediately following the IP header. For IPv6 this is the
    /// first extension header, if any.
    #[inline]
    pub fn protocol(&self) -> IpProtocol {
        match self {
            IpHeader::V4(h) => h.protocol(),
            IpHeader::V6(h) => h.next_header(),
        }
    }

    /// The protocol of the upper-layer header, found after any IPv6 extension headers.
    #[inline]
    pub fn next_header_protocol(&self) -> IpProtocol {
        match self {
            IpHeader::V4(h) => h.protocol(),
            IpHeader::V6(h) => h.next_header_protocol(),
        }
    }

    #[inline]
    pub fn source(&self) -> IpAddr {
        match self {
            IpHeader::V4(h) => IpAddr::V4(h.source()),
            IpHeader::V6(h) => IpAddr::V6(h.source()),
        }
    }

    #[inline]
    pub fn destination(&self) -> IpAddr {
        match self {
            IpHeader::V4(h) => IpAddr::V4(h.destination()),
            IpHeader::V6(h) => IpAddr::V6(h.destination()),
        }
    }

    /// The length of the header in bytes, including IPv4 options or IPv6 extension headers.
    #[inline]
    pub fn header_len(&self) -> usize {
        match self {
            IpHeader::V4(h) => h.header_len(),
            IpHeader::V6(h) => h.header_len(),
        }
    }

    /// The number of bytes following the header (that is, the upper-layer header and its data).
    #[inline]
    pub fn payload_len(&self) -> usize {
        match self {
            IpHeader::V4(h) => h.payload_len(),
            IpHeader::V6(h) => h.upper_layer_len(),
        }
    }

    /// The length of the whole datagram in bytes.
    #[inline]
    pub fn total_len(&self) -> usize {
        match self {
            IpHeader::V4(h) => h.total_length() as usize,
            IpHeader::V6(h) => h.total_len(),
        }
    }

    /// Indicates whether this header describes a fragment that does not start its datagram.
    #[inline]
    pub fn is_trailing_fragment(&self) -> bool {
        match self {
            IpHeader::V4(h) => h.fragment_offset() != 0,
            IpHeader::V6(h) => h
                .fragment_header()
                .is_some_and(|frag| frag.fragment_offset != 0),
        }
    }

    /// Indicates whether the datagram is a fragment of a larger one, initial or not.
    #[inline]
    pub fn is_fragment(&self) -> bool {
        match self {
            IpHeader::V4(h) => h.more_fragments() || h.fragment_offset() != 0,
            IpHeader::V6(h) => h.fragment_header().is_some(),
        }
    }

    #[inline]
    pub(crate) fn layer_name(&self) -> &'static str {
        match self {
            IpHeader::V4(_) => "IPv4",
            IpHeader::V6(_) => "IPv6",
        }
    }

    /// Computes the Internet checksum of `segment` (an upper-layer header with its checksum
    /// field zeroed, followed by its data) prefixed with this header's pseudo-header.
    ///
    /// The pseudo-header names the upper-layer protocol found after any extension headers; it
    /// must be `protocol`, the protocol of the header being checksummed.
    pub(crate) fn pseudo_header_checksum(
        &self,
        protocol: IpProtocol,
        segment: &[u8],
        layer: &'static str,
    ) -> Result<u16> {
        let next_header = self.next_header_protocol();
        if next_header != protocol {
            return Err(Error::malformed(
                layer,
                "pseudo-header next header does not match the upper-layer protocol",
            ));
        }

        let mut sum = match self {
            IpHeader::V4(h) => {
                let len = u16::try_from(segment.len())
                    .map_err(|_| Error::build(layer, "segment too long for an IPv4 datagram"))?;
                let mut sum = utils::ones_complement_16bit(&h.source().octets());
                sum = utils::ones_complement_add(sum, utils::ones_complement_16bit(&h.destination().octets()));
                sum = utils::ones_complement_add(sum, u16::from(u8::from(next_header)));
                utils::ones_complement_add(sum, len)
            }
            IpHeader::V6(h) => {
                let len = u32::try_from(segment.len())
                    .map_err(|_| Error::build(layer, "segment too long for an IPv6 datagram"))?;
                let mut sum = utils::ones_complement_16bit(&h.source().octets());
                sum = utils::ones_complement_add(
                    sum,
                    utils::ones_complement_16bit(&h.final_destination().octets()),
                );
                sum = utils::ones_complement_add_u32(sum, len);
                utils::ones_complement_add_u32(sum, u32::from(u8::from(next_header)))
            }
        };

        // Every preceding field is an even number of bytes, so the segment's words line up.
        sum = utils::ones_complement_add(sum, utils::ones_complement_16bit(segment));
        Ok(!sum)
    }
}

impl FromCursor for IpHeader {
    fn from_cursor(cursor: &mut Cursor<'_>) -> Result<Self> {
        let first = cursor.peek_u8().map_err(Error::too_short("IP"))?;
        match IpVersion::from(first >> 4) {
            IpVersion::Ipv4 => Ipv4Header::from_cursor(cursor).map(IpHeader::V4),
            IpVersion::Ipv6 => Ipv6Header::from_cursor(cursor).map(IpHeader::V6),
            IpVersion::Other(_) => Err(Error::malformed("IP", "unrecognized IP version")),
        }
    }
}

impl ToBytes for IpHeader {
    #[inline]
    fn to_bytes_extended(&self, bytes: &mut Vec<u8>) {
        match self {
            IpHeader::V4(h) => h.to_bytes_extended(bytes),
            IpHeader::V6(h) => h.to_bytes_extended(bytes),
        }
    }
}

impl From<Ipv4Header> for IpHeader {
    #[inline]
    fn from(header: Ipv4Header) -> Self {
        IpHeader::V4(header)
    }
}

impl From<Ipv6Header> for IpHeader {
    #[inline]
    fn from(header: Ipv6Header) -> Self {
        IpHeader::V6(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn protocol_registry_is_total() {
        for value in 0..=u8::MAX {
            assert_eq!(u8::from(IpProtocol::from(value)), value);
        }
        assert_eq!(IpProtocol::from(6), IpProtocol::Tcp);
        assert_eq!(IpProtocol::from(200), IpProtocol::Other(200));
        assert!(IpProtocol::Ipv6Frag.is_ipv6_extension());
        assert!(!IpProtocol::Ipv6Icmp.is_ipv6_extension());
    }

    #[test]
    fn create_normalizes_registered_protocols() {
        let v4 = IpHeader::create(
            Ipv4Addr::new(192, 0, 2, 1).into(),
            Ipv4Addr::new(192, 0, 2, 2).into(),
            IpProtocol::Other(253),
            0,
        )
        .unwrap();
        assert_eq!(v4.protocol(), IpProtocol::Experiment1);
        assert_eq!(IpHeader::from_bytes(&v4.to_bytes()).unwrap(), v4);

        let v6 = IpHeader::create(
            Ipv6Addr::LOCALHOST.into(),
            Ipv6Addr::LOCALHOST.into(),
            IpProtocol::Other(6),
            0,
        )
        .unwrap();
        assert_eq!(v6.next_header_protocol(), IpProtocol::Tcp);
        assert_eq!(IpHeader::from_bytes(&v6.to_bytes()).unwrap(), v6);

        assert_eq!(IpProtocol::Other(200).canonical(), IpProtocol::Other(200));
    }

    #[test]
    fn create_rejects_mixed_families() {
        let err = IpHeader::create(
            Ipv4Addr::LOCALHOST.into(),
            Ipv6Addr::LOCALHOST.into(),
            IpProtocol::Udp,
            8,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Build { .. }));
    }

    #[test]
    fn create_derives_lengths() {
        let ids = PacketIdGenerator::new(7);
        let v4 = IpHeader::create_with(
            &ids,
            Ipv4Addr::new(10, 0, 0, 1).into(),
            Ipv4Addr::new(10, 0, 0, 2).into(),
            IpProtocol::Tcp,
            24,
        )
        .unwrap();
        assert_eq!(v4.header_len(), 20);
        assert_eq!(v4.payload_len(), 24);
        assert_eq!(v4.total_len(), 44);
        let IpHeader::V4(inner) = &v4 else { unreachable!() };
        assert_eq!(inner.identification(), 7);

        let v6 = IpHeader::create(
            Ipv6Addr::LOCALHOST.into(),
            Ipv6Addr::LOCALHOST.into(),
            IpProtocol::Udp,
            100,
        )
        .unwrap();
        assert_eq!(v6.header_len(), 40);
        assert_eq!(v6.payload_len(), 100);
        assert_eq!(v6.total_len(), 140);
        assert_eq!(v6.next_header_protocol(), IpProtocol::Udp);
    }

    #[test]
    fn version_dispatch() {
        let v4 = hex!("45 00 00 14 00 00 40 00 40 11 00 00 7f 00 00 01 7f 00 00 01");
        let mut cursor = Cursor::new(&v4);
        let header = IpHeader::from_cursor(&mut cursor).unwrap();
        assert_eq!(header.version(), IpVersion::Ipv4);
        assert_eq!(cursor.position(), 20);

        let err = IpHeader::from_bytes(&hex!("55 00 00 14")).unwrap_err();
        assert!(err.is_malformed());
        assert!(IpHeader::from_bytes(&[]).unwrap_err().is_too_short());
    }

    #[test]
    fn parse_datagram_reads_declared_payload() {
        let header = IpHeader::create(
            Ipv4Addr::new(192, 0, 2, 1).into(),
            Ipv4Addr::new(192, 0, 2, 2).into(),
            IpProtocol::Other(200),
            4,
        )
        .unwrap();
        let mut bytes = header.to_bytes();
        bytes.extend_from_slice(b"abcd");
        bytes.extend_from_slice(&[0; 6]);

        let mut cursor = Cursor::new(&bytes);
        let (parsed, payload) = IpHeader::parse_datagram(&mut cursor).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(payload, b"abcd");
        assert_eq!(cursor.remaining(), 6);

        let err = IpHeader::parse_datagram(&mut Cursor::new(&bytes[..22])).unwrap_err();
        assert!(err.is_too_short());
    }
}
