// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::net::Ipv6Addr;

use ipwire_common::Cursor;

use super::extension::{
    self, AuthenticationHeader, FragmentHeader, Ipv6ExtensionHeader, OptionsHeader, RoutingHeader,
};
use super::{IpProtocol, DEFAULT_TTL};
use crate::error::{Error, Result, RoutingDirective};
use crate::layers::traits::{FromCursor, ToBytes};

const LAYER: &str = "IPv6";

pub(crate) const IPV6_HEADER_LEN: usize = 40;
pub(crate) const IPV6_MAX_FLOW_LABEL: u32 = 0xfffff;

/// An IPv6 (Internet Protocol version 6) header, along with its chain of extension headers.
///
/// ## Packet Layout
/// ```txt
///    .    Octet 0    .    Octet 1    .    Octet 2    .    Octet 3    .
///    |0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  0 |Version| Traffic Class |               Flow Label              |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  4 |         Payload Length        |  Next Header  |   Hop Limit   |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  8 Z                         Source Address                        Z
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// 24 Z                      Destination Address                      Z
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// 40 Z                 Extension Headers (optional)                  Z
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The Payload Length field counts the extension headers as well as the upper-layer data;
/// [`Ipv6Header::upper_layer_len`] excludes them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv6Header {
    pub(crate) traffic_class: u8,
    pub(crate) flow_label: u32,
    pub(crate) payload_length: u16,
    pub(crate) next_header: IpProtocol,
    pub(crate) hop_limit: u8,
    pub(crate) source: Ipv6Addr,
    pub(crate) destination: Ipv6Addr,
    pub(crate) extensions: Vec<Ipv6ExtensionHeader>,
}

impl Ipv6Header {
    /// Starts building a header from `source` to `destination` whose extension chain ends in
    /// `upper_protocol`.
    #[inline]
    pub fn builder(
        source: Ipv6Addr,
        destination: Ipv6Addr,
        upper_protocol: IpProtocol,
    ) -> Ipv6HeaderBuilder {
        Ipv6HeaderBuilder {
            traffic_class: 0,
            flow_label: 0,
            hop_limit: DEFAULT_TTL,
            source,
            destination,
            upper_protocol: upper_protocol.canonical(),
            extensions: Vec::new(),
            payload_len: 0,
        }
    }

    #[inline]
    pub fn traffic_class(&self) -> u8 {
        self.traffic_class
    }

    /// The 20-bit flow label.
    #[inline]
    pub fn flow_label(&self) -> u32 {
        self.flow_label
    }

    /// The Payload Length field: extension headers plus upper-layer data, in bytes.
    #[inline]
    pub fn payload_length(&self) -> u16 {
        self.payload_length
    }

    /// The Next Header field of the fixed header. When extension headers are present this is
    /// the type of the first one.
    #[inline]
    pub fn next_header(&self) -> IpProtocol {
        self.next_header
    }

    /// The protocol following the last extension header.
    pub fn next_header_protocol(&self) -> IpProtocol {
        self.extensions
            .last()
            .map_or(self.next_header, Ipv6ExtensionHeader::next_header)
    }

    #[inline]
    pub fn hop_limit(&self) -> u8 {
        self.hop_limit
    }

    #[inline]
    pub fn source(&self) -> Ipv6Addr {
        self.source
    }

    #[inline]
    pub fn destination(&self) -> Ipv6Addr {
        self.destination
    }

    /// The destination used in upper-layer checksums (RFC 8200 section 8.1).
    ///
    /// At the originating node of a packet carrying a Type 2 Routing header with segments left,
    /// this is the home address from the routing header rather than the Destination Address.
    pub fn final_destination(&self) -> Ipv6Addr {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                Ipv6ExtensionHeader::Routing(RoutingHeader::Type2(h)) if h.segments_left > 0 => {
                    Some(h.home_address)
                }
                _ => None,
            })
            .unwrap_or(self.destination)
    }

    #[inline]
    pub fn extensions(&self) -> &[Ipv6ExtensionHeader] {
        &self.extensions
    }

    /// The Fragment header of the chain, if the packet is a fragment.
    pub fn fragment_header(&self) -> Option<&FragmentHeader> {
        self.extensions.iter().find_map(|ext| match ext {
            Ipv6ExtensionHeader::Fragment(h) => Some(h),
            _ => None,
        })
    }

    /// The combined length of all extension headers in bytes.
    #[inline]
    pub fn extensions_len(&self) -> usize {
        self.extensions.iter().map(Ipv6ExtensionHeader::byte_len).sum()
    }

    /// The length of the fixed header and all extension headers in bytes.
    #[inline]
    pub fn header_len(&self) -> usize {
        IPV6_HEADER_LEN + self.extensions_len()
    }

    /// The number of bytes following the extension headers.
    #[inline]
    pub fn upper_layer_len(&self) -> usize {
        (self.payload_length as usize).saturating_sub(self.extensions_len())
    }

    /// The length of the whole packet in bytes.
    #[inline]
    pub fn total_len(&self) -> usize {
        IPV6_HEADER_LEN + self.payload_length as usize
    }

    /// Reads extension headers until the chain reaches an upper-layer protocol.
    fn parse_chain(
        cursor: &mut Cursor<'_>,
        mut next: IpProtocol,
    ) -> Result<Vec<Ipv6ExtensionHeader>> {
        let mut extensions = Vec::new();
        let mut offset = IPV6_HEADER_LEN;

        while next.is_ipv6_extension() {
            let ext = match next {
                IpProtocol::HopByHop if !extensions.is_empty() => {
                    return Err(Error::malformed(
                        LAYER,
                        "Hop-by-Hop Options header must immediately follow the IPv6 header",
                    ))
                }
                IpProtocol::HopByHop => Ipv6ExtensionHeader::HopByHop(OptionsHeader::decode(cursor)?),
                IpProtocol::Ipv6Opts => {
                    Ipv6ExtensionHeader::DestinationOptions(OptionsHeader::decode(cursor)?)
                }
                IpProtocol::Ipv6Route => {
                    let routing = RoutingHeader::read(cursor)?;
                    match routing.directive(offset) {
                        Some(directive @ RoutingDirective::Fatal { .. }) => {
                            return Err(Error::Routing(directive))
                        }
                        Some(directive) => {
                            tracing::debug!(%directive, "ignoring IPv6 routing header");
                        }
                        None => (),
                    }
                    Ipv6ExtensionHeader::Routing(routing)
                }
                IpProtocol::Ipv6Frag => {
                    Ipv6ExtensionHeader::Fragment(FragmentHeader::decode(cursor)?)
                }
                IpProtocol::Ah => {
                    Ipv6ExtensionHeader::Authentication(AuthenticationHeader::decode(cursor)?)
                }
                IpProtocol::Esp => {
                    return Err(Error::NotSupported(
                        "IPv6 Encapsulating Security Payload header",
                    ))
                }
                _ => return Err(Error::NotSupported("IPv6 extension header type")),
            };

            offset += ext.byte_len();
            next = ext.next_header();
            let trailing_fragment = matches!(
                &ext,
                Ipv6ExtensionHeader::Fragment(frag) if frag.fragment_offset != 0
            );
            extensions.push(ext);

            // What follows a non-initial fragment's Fragment header is fragment data.
            if trailing_fragment {
                break;
            }
        }

        Ok(extensions)
    }
}

impl FromCursor for Ipv6Header {
    fn from_cursor(cursor: &mut Cursor<'_>) -> Result<Self> {
        let first = cursor.peek_u8().map_err(Error::too_short(LAYER))?;
        if first >> 4 != 6 {
            return Err(Error::malformed(LAYER, "version field was not 6"));
        }
        cursor
            .ensure(IPV6_HEADER_LEN)
            .map_err(Error::too_short(LAYER))?;

        let word = cursor.read_u32()?;
        let payload_length = cursor.read_u16()?;
        let next_header = IpProtocol::from(cursor.read_u8()?);
        let hop_limit = cursor.read_u8()?;
        let source = Ipv6Addr::from(cursor.read_array::<16>()?);
        let destination = Ipv6Addr::from(cursor.read_array::<16>()?);

        // The chain may not extend past Payload Length. When the whole payload is present an
        // overrun is a malformed header; otherwise the datagram is merely short.
        let payload_end = cursor.position() + payload_length as usize;
        let complete = payload_end <= cursor.limit();
        let saved_limit = cursor.set_limit(payload_end.min(cursor.limit()));
        let extensions = Self::parse_chain(cursor, next_header);
        cursor.set_limit(saved_limit);
        let extensions = extensions.map_err(|e| match e {
            Error::TooShort { .. } if complete => {
                Error::malformed(LAYER, "extension headers exceed the payload length")
            }
            e => e,
        })?;

        let header = Ipv6Header {
            traffic_class: (word >> 20) as u8,
            flow_label: word & IPV6_MAX_FLOW_LABEL,
            payload_length,
            next_header,
            hop_limit,
            source,
            destination,
            extensions,
        };

        Ok(header)
    }
}

impl ToBytes for Ipv6Header {
    fn to_bytes_extended(&self, bytes: &mut Vec<u8>) {
        let word = (6 << 28) | (u32::from(self.traffic_class) << 20) | self.flow_label;
        bytes.extend(word.to_be_bytes());
        bytes.extend(self.payload_length.to_be_bytes());
        bytes.push(self.next_header.into());
        bytes.push(self.hop_limit);
        bytes.extend(self.source.octets());
        bytes.extend(self.destination.octets());
        for ext in &self.extensions {
            ext.encode(bytes);
        }
    }
}

/// Assembles an [`Ipv6Header`], linking its extension chain and deriving Payload Length.
#[derive(Clone, Debug)]
pub struct Ipv6HeaderBuilder {
    traffic_class: u8,
    flow_label: u32,
    hop_limit: u8,
    source: Ipv6Addr,
    destination: Ipv6Addr,
    upper_protocol: IpProtocol,
    extensions: Vec<Ipv6ExtensionHeader>,
    payload_len: usize,
}

impl Ipv6HeaderBuilder {
    #[inline]
    pub fn traffic_class(mut self, traffic_class: u8) -> Self {
        self.traffic_class = traffic_class;
        self
    }

    /// Sets the flow label, which must fit in 20 bits.
    ///
    /// The bound is inclusive: `0xfffff`, the largest value the field holds, is accepted.
    #[inline]
    pub fn flow_label(mut self, flow_label: u32) -> Self {
        self.flow_label = flow_label;
        self
    }

    #[inline]
    pub fn hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    /// Appends an extension header to the chain. Next Header fields are rewritten by
    /// [`build`](Self::build), so whatever the header carries is ignored.
    #[inline]
    pub fn extension(mut self, extension: Ipv6ExtensionHeader) -> Self {
        self.extensions.push(extension);
        self
    }

    #[inline]
    pub fn extensions(mut self, extensions: Vec<Ipv6ExtensionHeader>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Sets the number of bytes that will follow the extension headers.
    #[inline]
    pub fn payload_len(mut self, payload_len: usize) -> Self {
        self.payload_len = payload_len;
        self
    }

    pub fn build(mut self) -> Result<Ipv6Header> {
        if self.flow_label > IPV6_MAX_FLOW_LABEL {
            return Err(Error::build(LAYER, "flow label exceeds 20 bits"));
        }
        if self.upper_protocol.is_ipv6_extension() {
            return Err(Error::build(
                LAYER,
                "upper-layer protocol names an extension header",
            ));
        }
        if self
            .extensions
            .iter()
            .skip(1)
            .any(|ext| matches!(ext, Ipv6ExtensionHeader::HopByHop(_)))
        {
            return Err(Error::build(
                LAYER,
                "Hop-by-Hop Options header must come first in the chain",
            ));
        }
        self.extensions
            .iter()
            .try_for_each(Ipv6ExtensionHeader::validate)?;

        let extensions_len: usize = self
            .extensions
            .iter()
            .map(Ipv6ExtensionHeader::byte_len)
            .sum();
        let payload_length = u16::try_from(extensions_len + self.payload_len)
            .map_err(|_| Error::build(LAYER, "payload length exceeds 65535 bytes"))?;
        let next_header = extension::link_chain(&mut self.extensions, self.upper_protocol);

        Ok(Ipv6Header {
            traffic_class: self.traffic_class,
            flow_label: self.flow_label,
            payload_length,
            next_header,
            hop_limit: self.hop_limit,
            source: self.source,
            destination: self.destination,
            extensions: self.extensions,
        })
    }
}
