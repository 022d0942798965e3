// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The headers implemented by this library.
//!
//! Tightly related headers share a module: [`Ipv4Header`](ip::Ipv4Header),
//! [`Ipv6Header`](ip::Ipv6Header), the IPv4 options and the IPv6 extension headers all live in
//! [`ip`]. The headers that may follow an IP header are gathered in [`NextHeader`], and the
//! [`traits`] module holds the traits they have in common.

pub mod icmp;
pub mod ip;
pub mod tcp;
pub mod traits;
pub mod udp;

use ipwire_common::Cursor;

use crate::error::{Error, Result};
use crate::layers::icmp::{IcmpHeader, IcmpVersion};
use crate::layers::ip::{IpHeader, IpProtocol};
use crate::layers::tcp::TcpHeader;
use crate::layers::traits::{ChecksumMode, FromCursor, ToBytes, TransportHeader};
use crate::layers::udp::UdpHeader;

/// The upper-layer header carried by an IP packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextHeader {
    Tcp(TcpHeader),
    Udp(UdpHeader),
    Icmp(IcmpHeader),
}

impl NextHeader {
    /// Decodes the upper-layer header that `ip` announces.
    ///
    /// The cursor should be bounded to the IP payload so that an upper-layer header claiming
    /// more bytes than the datagram holds fails as too short.
    pub fn from_cursor(ip: &IpHeader, cursor: &mut Cursor<'_>) -> Result<Self> {
        match ip.next_header_protocol() {
            IpProtocol::Tcp => TcpHeader::from_cursor(cursor).map(NextHeader::Tcp),
            IpProtocol::Udp => UdpHeader::from_cursor(cursor).map(NextHeader::Udp),
            IpProtocol::Icmp => IcmpHeader::decode(IcmpVersion::V4, cursor).map(NextHeader::Icmp),
            IpProtocol::Ipv6Icmp => {
                IcmpHeader::decode(IcmpVersion::V6, cursor).map(NextHeader::Icmp)
            }
            _ => Err(Error::malformed(
                ip.layer_name(),
                "unknown upper-layer protocol",
            )),
        }
    }

    /// The IP protocol number of the header.
    #[inline]
    pub fn protocol(&self) -> IpProtocol {
        match self {
            NextHeader::Tcp(h) => h.protocol(),
            NextHeader::Udp(h) => h.protocol(),
            NextHeader::Icmp(h) => h.protocol(),
        }
    }

    /// The length of the header in bytes.
    #[inline]
    pub fn header_len(&self) -> usize {
        match self {
            NextHeader::Tcp(h) => h.header_len(),
            NextHeader::Udp(h) => h.header_len(),
            NextHeader::Icmp(h) => h.header_len(),
        }
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        match self {
            NextHeader::Tcp(h) => h.checksum(),
            NextHeader::Udp(h) => h.checksum(),
            NextHeader::Icmp(h) => h.checksum(),
        }
    }

    /// Computes the header's checksum over `ip`'s pseudo-header (where one applies), the header
    /// itself and `payload`, then stores or verifies it according to `mode`.
    pub fn compute_checksum(
        &mut self,
        ip: &IpHeader,
        payload: &[u8],
        mode: ChecksumMode,
    ) -> Result<u16> {
        match self {
            NextHeader::Tcp(h) => h.compute_checksum(ip, payload, mode),
            NextHeader::Udp(h) => h.compute_checksum(ip, payload, mode),
            NextHeader::Icmp(h) => h.compute_checksum(ip, payload, mode),
        }
    }
}

impl ToBytes for NextHeader {
    fn to_bytes_extended(&self, bytes: &mut Vec<u8>) {
        match self {
            NextHeader::Tcp(h) => h.to_bytes_extended(bytes),
            NextHeader::Udp(h) => h.to_bytes_extended(bytes),
            NextHeader::Icmp(h) => h.to_bytes_extended(bytes),
        }
    }
}

impl From<TcpHeader> for NextHeader {
    #[inline]
    fn from(header: TcpHeader) -> Self {
        NextHeader::Tcp(header)
    }
}

impl From<UdpHeader> for NextHeader {
    #[inline]
    fn from(header: UdpHeader) -> Self {
        NextHeader::Udp(header)
    }
}

impl From<IcmpHeader> for NextHeader {
    #[inline]
    fn from(header: IcmpHeader) -> Self {
        NextHeader::Icmp(header)
    }
}
