// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! IPv6 extension headers (RFC 8200 section 4).

use std::net::Ipv6Addr;

use ipwire_common::Cursor;
use ipwire_macros::WireEnum;

use super::IpProtocol;
use crate::error::{Error, Result, RoutingDirective};
use crate::layers::traits::{TlvLength, TlvReader};
use crate::utils;

const LAYER: &str = "IPv6";

const FRAGMENT_HEADER_LEN: usize = 8;
const TYPE2_ROUTING_HEADER_LEN: usize = 24;
const MAX_EXTENSION_LEN: usize = (u8::MAX as usize + 1) * 8;

/// Routing header types (IANA "IPv6 Routing Types").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, WireEnum)]
pub enum RoutingType {
    /// Source Route (deprecated, RFC 5095)
    #[wire(0)]
    SourceRoute,
    /// Nimrod (deprecated)
    #[wire(1)]
    Nimrod,
    /// Type 2 Routing Header (RFC 6275)
    #[wire(2)]
    Type2,
    /// RPL Source Route Header (RFC 6554)
    #[wire(3)]
    RplSourceRoute,
    /// Segment Routing Header (RFC 8754)
    #[wire(4)]
    SegmentRouting,
    /// CRH-16 (RFC 9631)
    #[wire(5)]
    Crh16,
    /// CRH-32 (RFC 9631)
    #[wire(6)]
    Crh32,
    /// RFC 3692-style Experiment 1
    #[wire(253)]
    Experiment1,
    /// RFC 3692-style Experiment 2
    #[wire(254)]
    Experiment2,
    #[wire(255)]
    Reserved,
    #[wire(other)]
    Unknown(u8),
}

/// An extension header in the chain following an IPv6 header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ipv6ExtensionHeader {
    HopByHop(OptionsHeader),
    DestinationOptions(OptionsHeader),
    Routing(RoutingHeader),
    Fragment(FragmentHeader),
    Authentication(AuthenticationHeader),
}

impl Ipv6ExtensionHeader {
    /// The Next Header value that identifies this extension header.
    pub fn extension_type(&self) -> IpProtocol {
        match self {
            Ipv6ExtensionHeader::HopByHop(_) => IpProtocol::HopByHop,
            Ipv6ExtensionHeader::DestinationOptions(_) => IpProtocol::Ipv6Opts,
            Ipv6ExtensionHeader::Routing(_) => IpProtocol::Ipv6Route,
            Ipv6ExtensionHeader::Fragment(_) => IpProtocol::Ipv6Frag,
            Ipv6ExtensionHeader::Authentication(_) => IpProtocol::Ah,
        }
    }

    /// The type of the header that follows this one.
    pub fn next_header(&self) -> IpProtocol {
        match self {
            Ipv6ExtensionHeader::HopByHop(h) | Ipv6ExtensionHeader::DestinationOptions(h) => {
                h.next_header
            }
            Ipv6ExtensionHeader::Routing(h) => h.next_header(),
            Ipv6ExtensionHeader::Fragment(h) => h.next_header,
            Ipv6ExtensionHeader::Authentication(h) => h.next_header,
        }
    }

    pub(crate) fn set_next_header(&mut self, next_header: IpProtocol) {
        match self {
            Ipv6ExtensionHeader::HopByHop(h) | Ipv6ExtensionHeader::DestinationOptions(h) => {
                h.next_header = next_header
            }
            Ipv6ExtensionHeader::Routing(RoutingHeader::Type2(h)) => h.next_header = next_header,
            Ipv6ExtensionHeader::Routing(RoutingHeader::Generic(h)) => h.next_header = next_header,
            Ipv6ExtensionHeader::Fragment(h) => h.next_header = next_header,
            Ipv6ExtensionHeader::Authentication(h) => h.next_header = next_header,
        }
    }

    /// The header's own length field: 8-octet units beyond the first 8 octets, or for the
    /// Authentication header 4-octet units minus 2.
    pub fn length(&self) -> u8 {
        match self {
            Ipv6ExtensionHeader::Authentication(_) => (self.byte_len() / 4 - 2) as u8,
            Ipv6ExtensionHeader::Fragment(_) => 0,
            _ => (self.byte_len() / 8 - 1) as u8,
        }
    }

    /// The encoded length of the header in bytes; always a multiple of 8.
    pub fn byte_len(&self) -> usize {
        match self {
            Ipv6ExtensionHeader::HopByHop(h) | Ipv6ExtensionHeader::DestinationOptions(h) => {
                h.byte_len()
            }
            Ipv6ExtensionHeader::Routing(h) => h.byte_len(),
            Ipv6ExtensionHeader::Fragment(_) => FRAGMENT_HEADER_LEN,
            Ipv6ExtensionHeader::Authentication(h) => h.byte_len(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let len = self.byte_len();
        if len % 8 != 0 {
            return Err(Error::build(
                LAYER,
                "extension header length is not a multiple of 8",
            ));
        }
        if len > MAX_EXTENSION_LEN {
            return Err(Error::build(LAYER, "extension header exceeds 2048 bytes"));
        }

        match self {
            Ipv6ExtensionHeader::HopByHop(h) | Ipv6ExtensionHeader::DestinationOptions(h) => {
                h.options.iter().try_for_each(Ipv6Tlv::validate)
            }
            Ipv6ExtensionHeader::Routing(RoutingHeader::Generic(h))
                if h.routing_type == RoutingType::Type2 =>
            {
                Err(Error::build(
                    LAYER,
                    "type 2 routing headers must use RoutingHeader::Type2",
                ))
            }
            Ipv6ExtensionHeader::Fragment(h) if h.fragment_offset > 0x1fff => Err(Error::build(
                LAYER,
                "fragment offset exceeds 13 bits",
            )),
            _ => Ok(()),
        }
    }

    pub(crate) fn encode(&self, bytes: &mut Vec<u8>) {
        match self {
            Ipv6ExtensionHeader::HopByHop(h) | Ipv6ExtensionHeader::DestinationOptions(h) => {
                h.encode(bytes)
            }
            Ipv6ExtensionHeader::Routing(h) => h.encode(bytes),
            Ipv6ExtensionHeader::Fragment(h) => h.encode(bytes),
            Ipv6ExtensionHeader::Authentication(h) => h.encode(bytes),
        }
    }
}

/// Sets the Next Header link of every header in `extensions` so that the chain ends in
/// `upper`, returning the value the IPv6 header itself must carry.
pub(crate) fn link_chain(extensions: &mut [Ipv6ExtensionHeader], upper: IpProtocol) -> IpProtocol {
    extensions.iter_mut().rev().fold(upper, |next, ext| {
        ext.set_next_header(next);
        ext.extension_type()
    })
}

/// Reads the Next Header and Hdr Ext Len octets common to most extension headers, returning
/// the next header and the header's total length in bytes.
fn read_prefix(cursor: &mut Cursor<'_>) -> Result<(IpProtocol, usize)> {
    let next_header = IpProtocol::from(cursor.read_u8().map_err(Error::too_short(LAYER))?);
    let len = cursor.read_u8().map_err(Error::too_short(LAYER))?;
    Ok((next_header, (len as usize + 1) * 8))
}

// =============================================================================
//                    Hop-by-Hop and Destination Options
// =============================================================================

const IPV6_OPT_PAD1: u8 = 0;
const IPV6_OPT_PADN: u8 = 1;

/// A Type-Length-Value option carried in a Hop-by-Hop or Destination Options header.
///
/// Pad1 (type 0) is a single octet with no length or data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv6Tlv {
    pub option_type: u8,
    pub data: Vec<u8>,
}

impl Ipv6Tlv {
    #[inline]
    pub fn new(option_type: u8, data: Vec<u8>) -> Self {
        Ipv6Tlv { option_type, data }
    }

    #[inline]
    pub fn pad1() -> Self {
        Ipv6Tlv::new(IPV6_OPT_PAD1, Vec::new())
    }

    /// A PadN option occupying `len` bytes in total (`len >= 2`).
    #[inline]
    pub fn pad_n(len: usize) -> Self {
        Ipv6Tlv::new(IPV6_OPT_PADN, vec![0; len.saturating_sub(2)])
    }

    /// The action to take if the option is not recognized (the top two bits of its type).
    #[inline]
    pub fn unrecognized_action(&self) -> u8 {
        self.option_type >> 6
    }

    /// Indicates whether the option's data may change en route.
    #[inline]
    pub fn may_change(&self) -> bool {
        self.option_type & 0b_0010_0000 != 0
    }

    #[inline]
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        match self.option_type {
            IPV6_OPT_PAD1 => 1,
            _ => 2 + self.data.len(),
        }
    }

    fn validate(&self) -> Result<()> {
        match self.option_type {
            IPV6_OPT_PAD1 if !self.data.is_empty() => {
                Err(Error::build(LAYER, "Pad1 option may not carry data"))
            }
            _ if self.data.len() > u8::MAX as usize => {
                Err(Error::build(LAYER, "option data exceeds 255 bytes"))
            }
            _ => Ok(()),
        }
    }

    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.push(self.option_type);
        if self.option_type != IPV6_OPT_PAD1 {
            bytes.push(self.data.len() as u8);
            bytes.extend_from_slice(&self.data);
        }
    }
}

/// The body of a Hop-by-Hop Options or Destination Options header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionsHeader {
    pub(crate) next_header: IpProtocol,
    pub(crate) options: Vec<Ipv6Tlv>,
}

impl OptionsHeader {
    /// Creates a header from options whose encoding (plus the 2-byte header prefix) already
    /// fills a multiple of 8 bytes.
    ///
    /// The Next Header link is filled in when the header is placed into an [`super::Ipv6Header`].
    pub fn new(options: Vec<Ipv6Tlv>) -> Result<Self> {
        let header = OptionsHeader {
            next_header: IpProtocol::Ipv6NoNxt,
            options,
        };
        if header.byte_len() % 8 != 0 {
            return Err(Error::build(
                LAYER,
                "options do not fill a multiple of 8 bytes",
            ));
        }
        Ok(header)
    }

    /// Creates a header from `options`, appending Pad1 or PadN to reach 8-byte alignment.
    pub fn padded(mut options: Vec<Ipv6Tlv>) -> Result<Self> {
        let len = 2 + options.iter().map(Ipv6Tlv::byte_len).sum::<usize>();
        match utils::padded_length::<8>(len) - len {
            0 => (),
            1 => options.push(Ipv6Tlv::pad1()),
            pad => options.push(Ipv6Tlv::pad_n(pad)),
        }
        Self::new(options)
    }

    #[inline]
    pub fn next_header(&self) -> IpProtocol {
        self.next_header
    }

    #[inline]
    pub fn options(&self) -> &[Ipv6Tlv] {
        &self.options
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        2 + self.options.iter().map(Ipv6Tlv::byte_len).sum::<usize>()
    }

    pub(crate) fn decode(cursor: &mut Cursor<'_>) -> Result<Self> {
        let (next_header, total_len) = read_prefix(cursor)?;
        let mut reader = TlvReader::new(
            cursor,
            total_len - 2,
            LAYER,
            &[IPV6_OPT_PAD1],
            None,
            TlvLength::Data,
        )?;

        let mut options = Vec::new();
        for raw in reader.by_ref() {
            let raw = raw?;
            options.push(Ipv6Tlv::new(raw.kind, raw.data.unwrap_or_default().to_vec()));
        }
        reader.finish()?;

        Ok(OptionsHeader {
            next_header,
            options,
        })
    }

    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.push(self.next_header.into());
        bytes.push((self.byte_len() / 8 - 1) as u8);
        for option in &self.options {
            option.encode(bytes);
        }
    }
}

// =============================================================================
//                                   Routing
// =============================================================================

/// An IPv6 Routing header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingHeader {
    /// The Mobile IPv6 Type 2 Routing header.
    Type2(Type2RoutingHeader),
    /// Any other routing type, with its type-specific data kept verbatim.
    Generic(GenericRoutingHeader),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Type2RoutingHeader {
    pub(crate) next_header: IpProtocol,
    pub segments_left: u8,
    pub home_address: Ipv6Addr,
}

impl Type2RoutingHeader {
    #[inline]
    pub fn new(home_address: Ipv6Addr) -> Self {
        Type2RoutingHeader {
            next_header: IpProtocol::Ipv6NoNxt,
            segments_left: 1,
            home_address,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericRoutingHeader {
    pub(crate) next_header: IpProtocol,
    pub routing_type: RoutingType,
    pub segments_left: u8,
    /// Everything after the Segments Left octet; `4 + data.len()` must be a multiple of 8.
    pub data: Vec<u8>,
}

impl GenericRoutingHeader {
    #[inline]
    pub fn new(routing_type: RoutingType, segments_left: u8, data: Vec<u8>) -> Self {
        GenericRoutingHeader {
            next_header: IpProtocol::Ipv6NoNxt,
            routing_type,
            segments_left,
            data,
        }
    }
}

impl RoutingHeader {
    /// Decodes a Routing header, applying RFC 8200's rules for unrecognized routing types.
    ///
    /// `offset` is the position of the Routing header relative to the start of its IPv6 header;
    /// it locates the Routing Type field for a fatal directive. Whether or not a directive is
    /// returned, the cursor is left after the whole Routing header.
    pub fn decode(cursor: &mut Cursor<'_>, offset: usize) -> Result<Self> {
        let header = Self::read(cursor)?;
        match header.directive(offset) {
            Some(directive) => Err(Error::Routing(directive)),
            None => Ok(header),
        }
    }

    /// Decodes a Routing header without interpreting its routing type.
    pub(crate) fn read(cursor: &mut Cursor<'_>) -> Result<Self> {
        let (next_header, total_len) = read_prefix(cursor)?;
        let routing_type = RoutingType::from(cursor.read_u8().map_err(Error::too_short(LAYER))?);
        let segments_left = cursor.read_u8().map_err(Error::too_short(LAYER))?;
        let data = cursor
            .read_slice(total_len - 4)
            .map_err(Error::too_short(LAYER))?;

        match routing_type {
            RoutingType::Type2 => {
                if total_len != TYPE2_ROUTING_HEADER_LEN {
                    return Err(Error::malformed(
                        LAYER,
                        "type 2 routing header must be 24 bytes",
                    ));
                }
                let mut addr = [0u8; 16];
                addr.copy_from_slice(&data[4..]);
                Ok(RoutingHeader::Type2(Type2RoutingHeader {
                    next_header,
                    segments_left,
                    home_address: Ipv6Addr::from(addr),
                }))
            }
            _ => Ok(RoutingHeader::Generic(GenericRoutingHeader {
                next_header,
                routing_type,
                segments_left,
                data: data.to_vec(),
            })),
        }
    }

    /// The directive RFC 8200 section 4.4 prescribes for this header, if its routing type is
    /// one this crate does not process.
    pub fn directive(&self, offset: usize) -> Option<RoutingDirective> {
        let RoutingHeader::Generic(h) = self else {
            return None;
        };

        Some(match h.segments_left {
            0 => RoutingDirective::Skip {
                routing_type: h.routing_type,
                next_header: h.next_header,
                skipped: self.byte_len(),
            },
            segments_left => RoutingDirective::Fatal {
                routing_type: h.routing_type,
                segments_left,
                pointer: (offset + 2) as u32,
            },
        })
    }

    #[inline]
    pub fn routing_type(&self) -> RoutingType {
        match self {
            RoutingHeader::Type2(_) => RoutingType::Type2,
            RoutingHeader::Generic(h) => h.routing_type,
        }
    }

    #[inline]
    pub fn segments_left(&self) -> u8 {
        match self {
            RoutingHeader::Type2(h) => h.segments_left,
            RoutingHeader::Generic(h) => h.segments_left,
        }
    }

    #[inline]
    pub fn next_header(&self) -> IpProtocol {
        match self {
            RoutingHeader::Type2(h) => h.next_header,
            RoutingHeader::Generic(h) => h.next_header,
        }
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        match self {
            RoutingHeader::Type2(_) => TYPE2_ROUTING_HEADER_LEN,
            RoutingHeader::Generic(h) => 4 + h.data.len(),
        }
    }

    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.push(self.next_header().into());
        bytes.push((self.byte_len() / 8 - 1) as u8);
        bytes.push(self.routing_type().into());
        bytes.push(self.segments_left());
        match self {
            RoutingHeader::Type2(h) => {
                bytes.extend([0; 4]);
                bytes.extend(h.home_address.octets());
            }
            RoutingHeader::Generic(h) => bytes.extend_from_slice(&h.data),
        }
    }
}

// =============================================================================
//                                  Fragment
// =============================================================================

/// An IPv6 Fragment header.
///
/// The reserved fields are ignored on receipt and sent as zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentHeader {
    pub(crate) next_header: IpProtocol,
    /// The offset of the fragment's data, in units of 8 bytes, relative to the start of the
    /// fragmentable part of the original packet.
    pub fragment_offset: u16,
    pub more_fragments: bool,
    pub identification: u32,
}

impl FragmentHeader {
    #[inline]
    pub fn new(fragment_offset: u16, more_fragments: bool, identification: u32) -> Self {
        FragmentHeader {
            next_header: IpProtocol::Ipv6NoNxt,
            fragment_offset,
            more_fragments,
            identification,
        }
    }

    #[inline]
    pub fn next_header(&self) -> IpProtocol {
        self.next_header
    }

    pub(crate) fn decode(cursor: &mut Cursor<'_>) -> Result<Self> {
        let bytes = cursor
            .read_array::<FRAGMENT_HEADER_LEN>()
            .map_err(Error::too_short(LAYER))?;
        let offset_flags = u16::from_be_bytes([bytes[2], bytes[3]]);
        Ok(FragmentHeader {
            next_header: IpProtocol::from(bytes[0]),
            fragment_offset: offset_flags >> 3,
            more_fragments: offset_flags & 0x0001 != 0,
            identification: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.push(self.next_header.into());
        bytes.push(0);
        let offset_flags = (self.fragment_offset << 3) | u16::from(self.more_fragments);
        bytes.extend(offset_flags.to_be_bytes());
        bytes.extend(self.identification.to_be_bytes());
    }
}

// =============================================================================
//                               Authentication
// =============================================================================

/// An IP Authentication Header (RFC 4302).
///
/// The Integrity Check Value is carried opaquely; it is neither computed nor verified here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticationHeader {
    pub(crate) next_header: IpProtocol,
    pub spi: u32,
    pub sequence: u32,
    pub icv: Vec<u8>,
}

impl AuthenticationHeader {
    #[inline]
    pub fn new(spi: u32, sequence: u32, icv: Vec<u8>) -> Self {
        AuthenticationHeader {
            next_header: IpProtocol::Ipv6NoNxt,
            spi,
            sequence,
            icv,
        }
    }

    #[inline]
    pub fn next_header(&self) -> IpProtocol {
        self.next_header
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        12 + self.icv.len()
    }

    pub(crate) fn decode(cursor: &mut Cursor<'_>) -> Result<Self> {
        let next_header = IpProtocol::from(cursor.read_u8().map_err(Error::too_short(LAYER))?);
        let payload_len = cursor.read_u8().map_err(Error::too_short(LAYER))?;
        let total_len = (payload_len as usize + 2) * 4;
        if total_len < 12 || total_len % 8 != 0 {
            return Err(Error::malformed(
                LAYER,
                "authentication header length must be a multiple of 8 and at least 12",
            ));
        }
        cursor
            .ensure(total_len - 2)
            .map_err(Error::too_short(LAYER))?;
        cursor.skip(2)?;
        let spi = cursor.read_u32()?;
        let sequence = cursor.read_u32()?;
        let icv = cursor.read_slice(total_len - 12)?.to_vec();

        Ok(AuthenticationHeader {
            next_header,
            spi,
            sequence,
            icv,
        })
    }

    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.push(self.next_header.into());
        bytes.push((self.byte_len() / 4 - 2) as u8);
        bytes.extend([0, 0]);
        bytes.extend(self.spi.to_be_bytes());
        bytes.extend(self.sequence.to_be_bytes());
        bytes.extend_from_slice(&self.icv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use test_case::test_case;

    fn encoded(ext: &Ipv6ExtensionHeader) -> Vec<u8> {
        let mut bytes = Vec::new();
        ext.encode(&mut bytes);
        bytes
    }

    #[test]
    fn options_header_with_pad1_and_padn() {
        let bytes = hex!("3a 00 00 05 01 00 01 00");
        let mut cursor = Cursor::new(&bytes);
        let header = OptionsHeader::decode(&mut cursor).unwrap();
        assert_eq!(cursor.position(), 8);
        assert_eq!(header.next_header(), IpProtocol::Ipv6Icmp);
        assert_eq!(
            header.options(),
            &[
                Ipv6Tlv::pad1(),
                Ipv6Tlv::new(5, vec![0]),
                Ipv6Tlv::pad_n(2),
            ]
        );
        let ext = Ipv6ExtensionHeader::HopByHop(header);
        assert_eq!(ext.length(), 0);
        assert_eq!(encoded(&ext), bytes.to_vec());
    }

    #[test]
    fn options_stop_at_declared_length() {
        // The second 8-byte block belongs to whatever follows the header.
        let bytes = hex!("06 00 01 04 00 00 00 00 ff ff ff ff ff ff ff ff");
        let mut cursor = Cursor::new(&bytes);
        let header = OptionsHeader::decode(&mut cursor).unwrap();
        assert_eq!(header.options(), &[Ipv6Tlv::pad_n(6)]);
        assert_eq!(cursor.position(), 8);
        assert_eq!(cursor.remaining(), 8);
    }

    #[test]
    fn padded_options_align() {
        let jumbo = Ipv6Tlv::new(0xc2, vec![0, 1, 0, 0, 0, 0]);
        let header = OptionsHeader::padded(vec![jumbo]).unwrap();
        assert_eq!(header.byte_len(), 16);
        assert_eq!(header.options().last(), Some(&Ipv6Tlv::pad_n(6)));

        let header = OptionsHeader::padded(vec![Ipv6Tlv::new(5, vec![0, 0, 0])]).unwrap();
        assert_eq!(header.byte_len(), 8);
        assert_eq!(header.options().last(), Some(&Ipv6Tlv::pad1()));

        assert!(OptionsHeader::new(vec![Ipv6Tlv::new(5, vec![0, 0, 0])]).is_err());
    }

    #[test]
    fn option_tlv_overrunning_header_is_too_short() {
        let bytes = hex!("06 00 05 08 00 00 00 00 00 00");
        let err = OptionsHeader::decode(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(err.is_too_short());
    }

    #[test]
    fn type2_routing_header() {
        let bytes = hex!(
            "06 02 02 01 00 00 00 00"
            "20 01 0d b8 00 00 00 00 00 00 00 00 00 00 00 01"
        );
        let mut cursor = Cursor::new(&bytes);
        let header = RoutingHeader::decode(&mut cursor, 40).unwrap();
        assert_eq!(
            header,
            RoutingHeader::Type2(Type2RoutingHeader {
                next_header: IpProtocol::Tcp,
                segments_left: 1,
                home_address: "2001:db8::1".parse().unwrap(),
            })
        );
        assert!(cursor.is_empty());
        assert_eq!(
            encoded(&Ipv6ExtensionHeader::Routing(header)),
            bytes.to_vec()
        );
    }

    #[test]
    fn deprecated_source_route_without_segments_is_skipped() {
        let bytes = hex!(
            "11 02 00 00 00 00 00 00"
            "20 01 0d b8 00 00 00 00 00 00 00 00 00 00 00 02"
            "aa bb"
        );
        let mut cursor = Cursor::new(&bytes);
        let err = RoutingHeader::decode(&mut cursor, 40).unwrap_err();
        assert_eq!(
            err,
            Error::Routing(RoutingDirective::Skip {
                routing_type: RoutingType::SourceRoute,
                next_header: IpProtocol::Udp,
                skipped: 24,
            })
        );
        assert_eq!(cursor.position(), 24);
    }

    #[test]
    fn deprecated_source_route_with_segments_is_fatal() {
        let bytes = hex!(
            "11 02 00 01 00 00 00 00"
            "20 01 0d b8 00 00 00 00 00 00 00 00 00 00 00 02"
        );
        let err = RoutingHeader::decode(&mut Cursor::new(&bytes), 48).unwrap_err();
        let Error::Routing(directive) = err else {
            panic!("expected a routing directive, got {err:?}");
        };
        assert!(directive.is_fatal());
        assert_eq!(
            directive,
            RoutingDirective::Fatal {
                routing_type: RoutingType::SourceRoute,
                segments_left: 1,
                pointer: 50,
            }
        );
    }

    #[test]
    fn fragment_header_fields() {
        let bytes = hex!("06 00 00 79 de ad be ef");
        let header = FragmentHeader::decode(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.next_header(), IpProtocol::Tcp);
        assert_eq!(header.fragment_offset, 15);
        assert!(header.more_fragments);
        assert_eq!(header.identification, 0xdeadbeef);
        assert_eq!(
            encoded(&Ipv6ExtensionHeader::Fragment(header)),
            bytes.to_vec()
        );
    }

    #[test]
    fn authentication_header_round_trip() {
        let bytes = hex!(
            "06 04 00 00 00 00 01 00 00 00 00 07"
            "01 02 03 04 05 06 07 08 09 0a 0b 0c"
        );
        let header = AuthenticationHeader::decode(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.spi, 0x100);
        assert_eq!(header.sequence, 7);
        assert_eq!(header.icv.len(), 12);
        let ext = Ipv6ExtensionHeader::Authentication(header);
        assert_eq!(ext.byte_len(), 24);
        assert_eq!(ext.length(), 4);
        assert_eq!(encoded(&ext), bytes.to_vec());
    }

    #[test]
    fn misaligned_authentication_header_is_malformed() {
        let bytes = hex!("06 01 00 00 00 00 01 00 00 00 00 07");
        let err = AuthenticationHeader::decode(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(err.is_malformed());
    }

    fn options(c: &mut Cursor<'_>) -> Result<()> {
        OptionsHeader::decode(c).map(drop)
    }

    fn fragment(c: &mut Cursor<'_>) -> Result<()> {
        FragmentHeader::decode(c).map(drop)
    }

    fn routing(c: &mut Cursor<'_>) -> Result<()> {
        RoutingHeader::read(c).map(drop)
    }

    #[test_case(&hex!("06 00 01 04 00 00 00 00"), options ; "options")]
    #[test_case(&hex!("06 00 00 79 de ad be ef"), fragment ; "fragment")]
    #[test_case(&hex!("06 02 02 01 00 00 00 00 20 01 0d b8 00 00 00 00 00 00 00 00 00 00 00 01"), routing ; "type 2 routing")]
    fn truncation_is_too_short(bytes: &[u8], decode: fn(&mut Cursor<'_>) -> Result<()>) {
        for len in 0..bytes.len() {
            let err = decode(&mut Cursor::new(&bytes[..len])).unwrap_err();
            assert!(err.is_too_short(), "truncated to {len}: {err:?}");
        }
        decode(&mut Cursor::new(bytes)).unwrap();
    }

    #[test]
    fn chain_links_follow_order() {
        let mut chain = vec![
            Ipv6ExtensionHeader::HopByHop(OptionsHeader::padded(vec![]).unwrap()),
            Ipv6ExtensionHeader::Routing(RoutingHeader::Type2(Type2RoutingHeader::new(
                Ipv6Addr::LOCALHOST,
            ))),
            Ipv6ExtensionHeader::DestinationOptions(OptionsHeader::padded(vec![]).unwrap()),
        ];
        let first = link_chain(&mut chain, IpProtocol::Udp);
        assert_eq!(first, IpProtocol::HopByHop);
        assert_eq!(chain[0].next_header(), IpProtocol::Ipv6Route);
        assert_eq!(chain[1].next_header(), IpProtocol::Ipv6Opts);
        assert_eq!(chain[2].next_header(), IpProtocol::Udp);
    }
}
