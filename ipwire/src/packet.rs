// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Whole packets: an IP header, the upper-layer header it announces and the data after it.

use std::net::IpAddr;

use ipwire_common::Cursor;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::ident::PacketIdGenerator;
use crate::layers::ip::IpHeader;
use crate::layers::traits::{ChecksumMode, FromCursor, ToBytes};
use crate::layers::NextHeader;

/// Options controlling how [`Packet::from_cursor_with`] treats a decoded packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// What to do with the IPv4 header checksum and the upper-layer checksum. `None` keeps
    /// both exactly as received.
    pub checksums: Option<ChecksumMode>,
}

/// An IP packet carrying a TCP, UDP or ICMP message.
///
/// The IP header's length fields always account for exactly the upper-layer header and the
/// payload held alongside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    ip: IpHeader,
    next_header: NextHeader,
    payload: Vec<u8>,
}

impl Packet {
    /// Assembles a packet from existing headers, checking that they agree with each other and
    /// with the payload. Checksums are kept as given.
    pub fn new(ip: IpHeader, next_header: NextHeader, payload: Vec<u8>) -> Result<Self> {
        let layer = ip.layer_name();
        if ip.next_header_protocol() != next_header.protocol() {
            return Err(Error::build(
                layer,
                "upper-layer protocol does not match the header that follows",
            ));
        }
        if ip.payload_len() != next_header.header_len() + payload.len() {
            return Err(Error::build(
                layer,
                "payload length does not match the upper-layer header and data",
            ));
        }
        if let NextHeader::Udp(udp) = &next_header {
            if udp.length() as usize != ip.payload_len() {
                return Err(Error::build(
                    "UDP",
                    "length field does not match the datagram",
                ));
            }
        }

        Ok(Packet {
            ip,
            next_header,
            payload,
        })
    }

    /// Creates a minimal IP header for `next_header` and `payload`, then fills in the
    /// upper-layer checksum. Identifiers come from the process-wide generator.
    #[inline]
    pub fn build(
        source: IpAddr,
        destination: IpAddr,
        next_header: NextHeader,
        payload: Vec<u8>,
    ) -> Result<Self> {
        Self::build_with(
            PacketIdGenerator::global(),
            source,
            destination,
            next_header,
            payload,
        )
    }

    /// Like [`Packet::build`], drawing identifiers from `ids`.
    pub fn build_with(
        ids: &PacketIdGenerator,
        source: IpAddr,
        destination: IpAddr,
        mut next_header: NextHeader,
        payload: Vec<u8>,
    ) -> Result<Self> {
        let ip = IpHeader::create_with(
            ids,
            source,
            destination,
            next_header.protocol(),
            next_header.header_len() + payload.len(),
        )?;
        next_header.compute_checksum(&ip, &payload, ChecksumMode::Update)?;
        Self::new(ip, next_header, payload)
    }

    /// Decodes a packet, taking checksums verbatim.
    #[inline]
    pub fn from_cursor(cursor: &mut Cursor<'_>) -> Result<Self> {
        Self::from_cursor_with(cursor, ParseOptions::default())
    }

    /// Decodes a packet, leaving the cursor after the bytes its IP header accounts for. Anything
    /// beyond them (link-layer padding, say) is left unread.
    ///
    /// A fragment other than the first carries no upper-layer header and yields
    /// [`Error::NotSupported`]; use [`IpHeader::parse_datagram`] for those. The upper-layer
    /// checksum of an initial fragment covers data it does not hold, so it is never checked.
    #[instrument(skip_all, level = "trace")]
    pub fn from_cursor_with(cursor: &mut Cursor<'_>, options: ParseOptions) -> Result<Self> {
        let mut ip = IpHeader::from_cursor(cursor)?;
        if ip.is_trailing_fragment() {
            return Err(Error::NotSupported("decoding a non-initial fragment as a packet"));
        }

        let payload_len = ip.payload_len();
        cursor
            .ensure(payload_len)
            .map_err(Error::too_short(ip.layer_name()))?;
        let end = cursor.position() + payload_len;
        let outer_limit = cursor.set_limit(end);
        let upper = Self::read_upper(&ip, cursor);
        cursor.set_limit(outer_limit);
        let (mut next_header, payload) = upper?;

        let fragment = ip.is_fragment();
        if let NextHeader::Udp(udp) = &next_header {
            if !fragment && udp.length() as usize != payload_len {
                return Err(Error::malformed(
                    "UDP",
                    "length field does not match the IP payload length",
                ));
            }
        }

        if let Some(mode) = options.checksums {
            if let IpHeader::V4(header) = &mut ip {
                match mode {
                    ChecksumMode::Update => header.refresh_checksum(),
                    _ => header.verify_checksum(mode)?,
                }
            }
            if !fragment {
                next_header.compute_checksum(&ip, &payload, mode)?;
            }
        }

        Ok(Packet {
            ip,
            next_header,
            payload,
        })
    }

    /// Reads the upper-layer header and the rest of the (limited) cursor.
    fn read_upper(ip: &IpHeader, cursor: &mut Cursor<'_>) -> Result<(NextHeader, Vec<u8>)> {
        let next_header = NextHeader::from_cursor(ip, cursor)?;
        let payload = cursor.remaining_slice().to_vec();
        cursor.skip(payload.len())?;
        Ok((next_header, payload))
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_cursor(&mut Cursor::new(bytes))
    }

    #[inline]
    pub fn ip(&self) -> &IpHeader {
        &self.ip
    }

    #[inline]
    pub fn next_header(&self) -> &NextHeader {
        &self.next_header
    }

    /// The data following the upper-layer header.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn into_parts(self) -> (IpHeader, NextHeader, Vec<u8>) {
        (self.ip, self.next_header, self.payload)
    }

    /// The length of the encoded packet in bytes.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.ip.total_len()
    }

    /// Recomputes the IPv4 header checksum (if any) and the upper-layer checksum, then stores
    /// or verifies them according to `mode`. Returns the upper-layer checksum.
    pub fn compute_checksum(&mut self, mode: ChecksumMode) -> Result<u16> {
        if let IpHeader::V4(header) = &mut self.ip {
            match mode {
                ChecksumMode::Update => header.refresh_checksum(),
                _ => header.verify_checksum(mode)?,
            }
        }
        self.next_header
            .compute_checksum(&self.ip, &self.payload, mode)
    }

    /// Splits the packet into IP fragments of at most `max_size` bytes each. The upper-layer
    /// header travels in the first fragment's data.
    #[inline]
    pub fn fragment(&self, max_size: usize) -> Result<Vec<(IpHeader, Vec<u8>)>> {
        self.fragment_with(PacketIdGenerator::global(), max_size)
    }

    /// Like [`Packet::fragment`], drawing any IPv6 fragment identification from `ids`.
    pub fn fragment_with(
        &self,
        ids: &PacketIdGenerator,
        max_size: usize,
    ) -> Result<Vec<(IpHeader, Vec<u8>)>> {
        let mut upper = self.next_header.to_bytes();
        upper.extend_from_slice(&self.payload);
        self.ip.fragment_with(ids, max_size, &upper)
    }

    /// Reassembles fragments (in any order) and decodes the upper-layer header of the result.
    pub fn reassemble(fragments: &[(IpHeader, Vec<u8>)]) -> Result<Self> {
        let (ip, data) = IpHeader::reassemble(fragments)?;
        let mut cursor = Cursor::new(&data);
        let next_header = NextHeader::from_cursor(&ip, &mut cursor)?;
        let payload = cursor.remaining_slice().to_vec();
        Self::new(ip, next_header, payload).map_err(|e| match e {
            Error::Build { layer, reason } => Error::Malformed { layer, reason },
            e => e,
        })
    }
}

impl ToBytes for Packet {
    fn to_bytes_extended(&self, bytes: &mut Vec<u8>) {
        self.ip.to_bytes_extended(bytes);
        self.next_header.to_bytes_extended(bytes);
        bytes.extend_from_slice(&self.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::tcp::TcpHeader;
    use crate::layers::udp::UdpHeader;
    use crate::layers::ip::IpProtocol;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn tcp_v4(payload: &[u8]) -> Packet {
        let tcp = TcpHeader::builder(49152, 80)
            .sequence(0x0102_0304)
            .psh(true)
            .ack(true)
            .acknowledgment(1)
            .window(1024)
            .build();
        Packet::build_with(
            &PacketIdGenerator::new(0x4000),
            Ipv4Addr::new(192, 168, 1, 10).into(),
            Ipv4Addr::new(192, 168, 1, 20).into(),
            tcp.into(),
            payload.to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn ipv4_tcp_round_trip() {
        let packet = tcp_v4(b"test");
        assert_eq!(packet.total_len(), 44);
        assert_ne!(packet.next_header().checksum(), 0);

        let mut bytes = packet.to_bytes();
        assert_eq!(bytes.len(), 44);
        // Ethernet pads short frames; the padding is not part of the packet.
        bytes.extend_from_slice(&[0; 6]);

        let mut cursor = Cursor::new(&bytes);
        let options = ParseOptions {
            checksums: Some(ChecksumMode::Verify),
        };
        let parsed = Packet::from_cursor_with(&mut cursor, options).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.payload(), b"test");
        assert_eq!(cursor.remaining(), 6);
    }

    #[test]
    fn checksum_modes_on_parse() {
        let packet = tcp_v4(b"test");
        let mut bytes = packet.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x20;

        // Taken verbatim by default.
        let mut parsed = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.payload(), b"tesT");

        let verify = ParseOptions {
            checksums: Some(ChecksumMode::Verify),
        };
        let err = Packet::from_cursor_with(&mut Cursor::new(&bytes), verify).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { layer: "TCP", .. }));
        assert!(err.is_malformed());

        let warn = ParseOptions {
            checksums: Some(ChecksumMode::Warn),
        };
        Packet::from_cursor_with(&mut Cursor::new(&bytes), warn).unwrap();

        parsed.compute_checksum(ChecksumMode::Update).unwrap();
        parsed.compute_checksum(ChecksumMode::Verify).unwrap();
        assert_ne!(parsed.next_header().checksum(), packet.next_header().checksum());
    }

    #[test]
    fn truncated_packets_are_too_short() {
        let bytes = tcp_v4(b"test").to_bytes();
        for len in 0..bytes.len() {
            let err = Packet::from_bytes(&bytes[..len]).unwrap_err();
            assert!(err.is_too_short(), "truncated to {len}: {err:?}");
        }
    }

    #[test]
    fn udp_length_must_match() {
        let packet = Packet::build(
            Ipv4Addr::LOCALHOST.into(),
            Ipv4Addr::LOCALHOST.into(),
            UdpHeader::new(5353, 5353, 4).unwrap().into(),
            b"abcd".to_vec(),
        )
        .unwrap();
        let mut bytes = packet.to_bytes();
        bytes[25] = 10;
        assert!(Packet::from_bytes(&bytes).unwrap_err().is_malformed());
    }

    #[test]
    fn new_rejects_inconsistent_parts() {
        let packet = tcp_v4(b"test");
        let (ip, tcp, _) = packet.into_parts();
        let err = Packet::new(ip.clone(), tcp.clone(), b"testing".to_vec()).unwrap_err();
        assert!(matches!(err, Error::Build { .. }));

        let udp = UdpHeader::new(1, 2, 12).unwrap();
        let err = Packet::new(ip, udp.into(), b"test".to_vec()).unwrap_err();
        assert!(matches!(err, Error::Build { .. }));

        let err = Packet::build(
            Ipv4Addr::LOCALHOST.into(),
            Ipv6Addr::LOCALHOST.into(),
            tcp,
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Build { .. }));
    }

    #[test]
    fn ipv4_fragments_reassemble_into_packet() {
        let payload: Vec<u8> = (0..600u16).map(|i| i as u8).collect();
        let packet = tcp_v4(&payload);
        let fragments = packet.fragment(256).unwrap();
        assert_eq!(fragments.len(), 3);

        // Only the first fragment decodes as a packet.
        let mut first = fragments[0].0.to_bytes();
        first.extend_from_slice(&fragments[0].1);
        let initial = Packet::from_bytes(&first).unwrap();
        assert_eq!(initial.next_header(), packet.next_header());

        let mut second = fragments[1].0.to_bytes();
        second.extend_from_slice(&fragments[1].1);
        assert!(matches!(
            Packet::from_bytes(&second),
            Err(Error::NotSupported(_))
        ));

        assert_eq!(Packet::reassemble(&fragments).unwrap(), packet);
    }

    #[test]
    fn ipv6_large_segment_fragments_into_six() {
        let ids = PacketIdGenerator::new(1);
        let payload: Vec<u8> = (0..5000u32).map(|i| (i * 7) as u8).collect();
        let tcp = TcpHeader::builder(443, 50000).ack(true).build();
        let packet = Packet::build_with(
            &ids,
            Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1).into(),
            Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2).into(),
            tcp.into(),
            payload.clone(),
        )
        .unwrap();
        assert_eq!(packet.ip().next_header_protocol(), IpProtocol::Tcp);

        let fragments = packet.fragment_with(&ids, 1000).unwrap();
        assert_eq!(fragments.len(), 6);

        // Through the wire and back, in reverse order.
        let mut wire = Vec::new();
        for (header, data) in fragments.iter().rev() {
            header.to_bytes_extended(&mut wire);
            wire.extend_from_slice(data);
        }
        let mut cursor = Cursor::new(&wire);
        let mut received = Vec::new();
        while !cursor.is_empty() {
            received.push(IpHeader::parse_datagram(&mut cursor).unwrap());
        }
        assert_eq!(received.len(), 6);

        let joined = Packet::reassemble(&received).unwrap();
        assert_eq!(joined.payload(), payload.as_slice());
        assert_eq!(joined, packet);
        joined.clone().compute_checksum(ChecksumMode::Verify).unwrap();
    }
}
