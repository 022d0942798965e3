// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Transmission Control Protocol header (RFC 9293) and its options.

mod isn;

pub use isn::IsnGenerator;

use std::net::{IpAddr, SocketAddr};

use bitflags::bitflags;
use ipwire_common::{Buffer, Cursor};
use ipwire_macros::WireEnum;

use crate::error::{Error, Result};
use crate::layers::ip::IpProtocol;
use crate::layers::traits::{FromCursor, RawTlv, TlvLength, TlvReader, ToBytes, TransportHeader};
use crate::utils;

const LAYER: &str = "TCP";

const TCP_MIN_HEADER_LEN: usize = 20;
const TCP_MIN_DATA_OFFSET: u8 = 5;
const TCP_MAX_DATA_OFFSET: u8 = 15;
const TCP_CHECKSUM_OFFSET: usize = 16;
const MAX_TCP_OPTIONS_LEN: usize = 40;

const TCP_OPT_LEN_MSS: usize = 4;
const TCP_OPT_LEN_TIMESTAMP: usize = 10;

/// The largest amount of data an unsupported option can carry: 40 bytes of option space, minus
/// the kind and length octets.
pub const MAX_UNSUPPORTED_OPTION_DATA: usize = MAX_TCP_OPTIONS_LEN - 2;

/// A TCP (Transmission Control Protocol) header.
///
/// ## Packet Layout
/// ```txt
///    .    Octet 0    .    Octet 1    .    Octet 2    .    Octet 3    .
///    |0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  0 |          Source Port          |        Destination Port       |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  4 |                        Sequence Number                        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  8 |                     Acknowledgment Number                     |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// 12 |  Offset | Rsvd|C|E|U|A|P|R|S|F|            Window             |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// 16 |           Checksum            |         Urgent Pointer        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// 20 Z                      Options and Padding                      Z
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Headers are assembled with a [`TcpHeaderBuilder`], which derives the data offset from the
/// option list. Decoded headers keep the data offset found on the wire, so any extra padding
/// the sender inserted is reproduced when the header is serialized again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpHeader {
    pub(crate) source_port: u16,
    pub(crate) destination_port: u16,
    pub(crate) sequence: u32,
    pub(crate) acknowledgment: u32,
    pub(crate) data_offset: u8,
    pub(crate) reserved: u8,
    pub(crate) flags: TcpFlags,
    pub(crate) window: u16,
    pub(crate) checksum: u16,
    pub(crate) urgent_pointer: u16,
    pub(crate) options: Vec<TcpOption>,
}

impl TcpHeader {
    /// Starts building a header with no flags, no options and a zero sequence number.
    #[inline]
    pub fn builder(source_port: u16, destination_port: u16) -> TcpHeaderBuilder {
        TcpHeaderBuilder {
            source_port,
            destination_port,
            sequence: 0,
            acknowledgment: 0,
            data_offset: None,
            reserved: 0,
            flags: TcpFlags::empty(),
            window: 0,
            checksum: 0,
            urgent_pointer: 0,
            options: Vec::new(),
        }
    }

    /// Returns a builder initialized from this header.
    ///
    /// The builder keeps this header's data offset until the option list is changed.
    pub fn to_builder(&self) -> TcpHeaderBuilder {
        TcpHeaderBuilder {
            source_port: self.source_port,
            destination_port: self.destination_port,
            sequence: self.sequence,
            acknowledgment: self.acknowledgment,
            data_offset: Some(self.data_offset),
            reserved: self.reserved,
            flags: self.flags,
            window: self.window,
            checksum: self.checksum,
            urgent_pointer: self.urgent_pointer,
            options: self.options.clone(),
        }
    }

    #[inline]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    #[inline]
    pub fn acknowledgment(&self) -> u32 {
        self.acknowledgment
    }

    /// The header length in 32-bit words.
    #[inline]
    pub fn data_offset(&self) -> u8 {
        self.data_offset
    }

    /// The four reserved bits between the data offset and the flags.
    #[inline]
    pub fn reserved(&self) -> u8 {
        self.reserved
    }

    #[inline]
    pub fn flags(&self) -> TcpFlags {
        self.flags
    }

    #[inline]
    pub fn window(&self) -> u16 {
        self.window
    }

    #[inline]
    pub fn urgent_pointer(&self) -> u16 {
        self.urgent_pointer
    }

    #[inline]
    pub fn options(&self) -> &[TcpOption] {
        &self.options
    }

    /// The Maximum Segment Size advertised in the options, if any.
    pub fn mss(&self) -> Option<u16> {
        self.options.iter().find_map(|opt| match opt {
            TcpOption::MaximumSegmentSize(mss) => Some(*mss),
            _ => None,
        })
    }
}

impl FromCursor for TcpHeader {
    fn from_cursor(cursor: &mut Cursor<'_>) -> Result<Self> {
        cursor
            .ensure(TCP_MIN_HEADER_LEN)
            .map_err(Error::too_short(LAYER))?;

        let source_port = cursor.read_u16()?;
        let destination_port = cursor.read_u16()?;
        let sequence = cursor.read_u32()?;
        let acknowledgment = cursor.read_u32()?;
        let [offset_reserved, flags] = cursor.read_array::<2>()?;
        let window = cursor.read_u16()?;
        let checksum = cursor.read_u16()?;
        let urgent_pointer = cursor.read_u16()?;

        let data_offset = offset_reserved >> 4;
        if data_offset < TCP_MIN_DATA_OFFSET {
            return Err(Error::malformed(
                LAYER,
                "data offset field was less than the minimum of 5",
            ));
        }

        let options_len = data_offset as usize * 4 - TCP_MIN_HEADER_LEN;
        let mut reader = TlvReader::new(
            cursor,
            options_len,
            LAYER,
            &[TCP_OPT_KIND_EOL, TCP_OPT_KIND_NOP],
            Some(TCP_OPT_KIND_EOL),
            TlvLength::Total,
        )?;
        let mut options = Vec::new();
        for raw in reader.by_ref() {
            let raw = raw?;
            // A zero byte inside a partly filled word is padding rather than an option.
            if raw.kind == TCP_OPT_KIND_EOL && raw.offset % 4 != 0 {
                break;
            }
            options.push(TcpOption::decode(raw)?);
        }
        reader.finish()?;

        Ok(TcpHeader {
            source_port,
            destination_port,
            sequence,
            acknowledgment,
            data_offset,
            reserved: offset_reserved & 0x0f,
            flags: TcpFlags::from_bits_retain(flags),
            window,
            checksum,
            urgent_pointer,
            options,
        })
    }
}

impl ToBytes for TcpHeader {
    fn to_bytes_extended(&self, bytes: &mut Vec<u8>) {
        let start = bytes.len();
        bytes.extend(self.source_port.to_be_bytes());
        bytes.extend(self.destination_port.to_be_bytes());
        bytes.extend(self.sequence.to_be_bytes());
        bytes.extend(self.acknowledgment.to_be_bytes());
        bytes.push((self.data_offset << 4) | self.reserved);
        bytes.push(self.flags.bits());
        bytes.extend(self.window.to_be_bytes());
        bytes.extend(self.checksum.to_be_bytes());
        bytes.extend(self.urgent_pointer.to_be_bytes());
        for option in &self.options {
            option.encode(bytes);
        }
        bytes.resize(start + self.header_len(), 0);
    }
}

impl TransportHeader for TcpHeader {
    const NAME: &'static str = LAYER;

    #[inline]
    fn protocol(&self) -> IpProtocol {
        IpProtocol::Tcp
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
        self.data_offset as usize * 4
    }

    #[inline]
    fn checksum_offset(&self) -> usize {
        TCP_CHECKSUM_OFFSET
    }
}

/// Assembles a [`TcpHeader`].
///
/// Every change to the option list recomputes the data offset and fails if the options no
/// longer fit in the 40 bytes available to them.
#[derive(Clone, Debug)]
pub struct TcpHeaderBuilder {
    source_port: u16,
    destination_port: u16,
    sequence: u32,
    acknowledgment: u32,
    data_offset: Option<u8>,
    reserved: u8,
    flags: TcpFlags,
    window: u16,
    checksum: u16,
    urgent_pointer: u16,
    options: Vec<TcpOption>,
}

impl TcpHeaderBuilder {
    #[inline]
    pub fn sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Sets the sequence number to an RFC 6528 initial sequence number for the connection
    /// between `source` and `destination` and this builder's ports.
    pub fn initial_sequence(
        mut self,
        isn: &IsnGenerator,
        source: IpAddr,
        destination: IpAddr,
    ) -> Self {
        self.sequence = isn.generate(
            SocketAddr::new(source, self.source_port),
            SocketAddr::new(destination, self.destination_port),
        );
        self
    }

    #[inline]
    pub fn acknowledgment(mut self, acknowledgment: u32) -> Self {
        self.acknowledgment = acknowledgment;
        self
    }

    #[inline]
    pub fn window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    #[inline]
    pub fn urgent_pointer(mut self, urgent_pointer: u16) -> Self {
        self.urgent_pointer = urgent_pointer;
        self
    }

    /// Sets the checksum carried by the header. Usually left at zero and filled in by
    /// [`TransportHeader::compute_checksum`].
    #[inline]
    pub fn checksum(mut self, checksum: u16) -> Self {
        self.checksum = checksum;
        self
    }

    /// Replaces all eight flag bits.
    #[inline]
    pub fn flags(mut self, flags: TcpFlags) -> Self {
        self.flags = flags;
        self
    }

    #[inline]
    pub fn cwr(self, set: bool) -> Self {
        self.flag(TcpFlags::CWR, set)
    }

    #[inline]
    pub fn ece(self, set: bool) -> Self {
        self.flag(TcpFlags::ECE, set)
    }

    #[inline]
    pub fn urg(self, set: bool) -> Self {
        self.flag(TcpFlags::URG, set)
    }

    #[inline]
    pub fn ack(self, set: bool) -> Self {
        self.flag(TcpFlags::ACK, set)
    }

    #[inline]
    pub fn psh(self, set: bool) -> Self {
        self.flag(TcpFlags::PSH, set)
    }

    #[inline]
    pub fn rst(self, set: bool) -> Self {
        self.flag(TcpFlags::RST, set)
    }

    #[inline]
    pub fn syn(self, set: bool) -> Self {
        self.flag(TcpFlags::SYN, set)
    }

    #[inline]
    pub fn fin(self, set: bool) -> Self {
        self.flag(TcpFlags::FIN, set)
    }

    #[inline]
    fn flag(mut self, flag: TcpFlags, set: bool) -> Self {
        self.flags.set(flag, set);
        self
    }

    /// Appends an option, failing if the header would exceed 15 words or if the option follows
    /// an End of Option List.
    pub fn add_option(mut self, option: TcpOption) -> Result<Self> {
        if matches!(self.options.last(), Some(TcpOption::EndOfOptionList)) {
            return Err(Error::build(
                LAYER,
                "options may not follow End of Option List",
            ));
        }
        self.options.push(option);
        self.data_offset = Some(data_offset_for(&self.options)?);
        Ok(self)
    }

    /// Removes every option, shrinking the header to 20 bytes.
    #[inline]
    pub fn clear_options(mut self) -> Self {
        self.options.clear();
        self.data_offset = Some(TCP_MIN_DATA_OFFSET);
        self
    }

    pub fn build(mut self) -> TcpHeader {
        let data_offset = self.data_offset.unwrap_or(TCP_MIN_DATA_OFFSET);
        // A final End of Option List that falls inside padding encodes as that padding.
        if matches!(self.options.last(), Some(TcpOption::EndOfOptionList)) {
            let eol_offset: usize = self.options[..self.options.len() - 1]
                .iter()
                .map(TcpOption::byte_len)
                .sum();
            if eol_offset % 4 != 0 {
                self.options.pop();
            }
        }

        TcpHeader {
            source_port: self.source_port,
            destination_port: self.destination_port,
            sequence: self.sequence,
            acknowledgment: self.acknowledgment,
            data_offset,
            reserved: self.reserved,
            flags: self.flags,
            window: self.window,
            checksum: self.checksum,
            urgent_pointer: self.urgent_pointer,
            options: self.options,
        }
    }
}

/// The smallest data offset whose option area fits `options`.
fn data_offset_for(options: &[TcpOption]) -> Result<u8> {
    let options_len: usize = options.iter().map(TcpOption::byte_len).sum();
    let words = (TCP_MIN_HEADER_LEN + utils::padded_length::<4>(options_len)) / 4;
    match u8::try_from(words) {
        Ok(words) if words <= TCP_MAX_DATA_OFFSET => Ok(words),
        _ => Err(Error::build(LAYER, "options exceed 40 bytes")),
    }
}

// =============================================================================
//                         Inner Field Data Structures
// =============================================================================

bitflags! {
    /// The eight flag bits of octet 13.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TcpFlags: u8 {
        const CWR = 0b_1000_0000;
        const ECE = 0b_0100_0000;
        const URG = 0b_0010_0000;
        const ACK = 0b_0001_0000;
        const PSH = 0b_0000_1000;
        const RST = 0b_0000_0100;
        const SYN = 0b_0000_0010;
        const FIN = 0b_0000_0001;
    }
}

impl From<u8> for TcpFlags {
    #[inline]
    fn from(value: u8) -> Self {
        TcpFlags::from_bits_retain(value)
    }
}

const TCP_OPT_KIND_EOL: u8 = 0;
const TCP_OPT_KIND_NOP: u8 = 1;

/// TCP option kinds (IANA "TCP Option Kind Numbers").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, WireEnum)]
pub enum TcpOptionKind {
    #[wire(0)]
    EndOfOptionList,
    #[wire(1)]
    NoOperation,
    #[wire(2)]
    MaximumSegmentSize,
    #[wire(3)]
    WindowScale,
    #[wire(4)]
    SackPermitted,
    #[wire(5)]
    Sack,
    #[wire(8)]
    Timestamp,
    #[wire(28)]
    UserTimeout,
    #[wire(29)]
    Authentication,
    #[wire(30)]
    Multipath,
    #[wire(other)]
    Other(u8),
}

/// A single TCP option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpOption {
    /// End of Option List.
    ///
    /// Marks the end of the option list; bytes following it are padding. Only kept in a decoded
    /// header when it begins a 32-bit word of the option area.
    EndOfOptionList,
    /// No operation. Used to align later options on word boundaries.
    NoOperation,
    /// Maximum Segment Size: the largest segment the sender is willing to receive.
    MaximumSegmentSize(u16),
    Timestamp { value: u32, echo_reply: u32 },
    /// Any other option, with its data carried verbatim.
    Unsupported {
        kind: u8,
        data: Buffer<u8, MAX_UNSUPPORTED_OPTION_DATA>,
    },
}

impl TcpOption {
    /// Creates an option of a kind this crate does not interpret. Fails if `data` exceeds 38
    /// bytes or if `kind` names an option with a typed variant.
    pub fn unsupported(kind: u8, data: &[u8]) -> Result<Self> {
        if matches!(
            TcpOptionKind::from(kind),
            TcpOptionKind::EndOfOptionList
                | TcpOptionKind::NoOperation
                | TcpOptionKind::MaximumSegmentSize
                | TcpOptionKind::Timestamp
        ) {
            return Err(Error::build(LAYER, "option kind has a dedicated variant"));
        }
        let data = Buffer::from_slice(data)
            .ok_or_else(|| Error::build(LAYER, "option data exceeds 38 bytes"))?;
        Ok(TcpOption::Unsupported { kind, data })
    }

    pub fn kind(&self) -> TcpOptionKind {
        match self {
            TcpOption::EndOfOptionList => TcpOptionKind::EndOfOptionList,
            TcpOption::NoOperation => TcpOptionKind::NoOperation,
            TcpOption::MaximumSegmentSize(_) => TcpOptionKind::MaximumSegmentSize,
            TcpOption::Timestamp { .. } => TcpOptionKind::Timestamp,
            TcpOption::Unsupported { kind, .. } => TcpOptionKind::from(*kind),
        }
    }

    /// The encoded length of the option in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            TcpOption::EndOfOptionList | TcpOption::NoOperation => 1,
            TcpOption::MaximumSegmentSize(_) => TCP_OPT_LEN_MSS,
            TcpOption::Timestamp { .. } => TCP_OPT_LEN_TIMESTAMP,
            TcpOption::Unsupported { data, .. } => 2 + data.len(),
        }
    }

    fn decode(raw: RawTlv<'_>) -> Result<Self> {
        let data = raw.data.unwrap_or_default();
        match TcpOptionKind::from(raw.kind) {
            TcpOptionKind::EndOfOptionList => Ok(TcpOption::EndOfOptionList),
            TcpOptionKind::NoOperation => Ok(TcpOption::NoOperation),
            TcpOptionKind::MaximumSegmentSize => match *data {
                [hi, lo] => Ok(TcpOption::MaximumSegmentSize(u16::from_be_bytes([hi, lo]))),
                _ => Err(Error::malformed(LAYER, "MSS option length was not 4")),
            },
            TcpOptionKind::Timestamp => match *data {
                [a, b, c, d, e, f, g, h] => Ok(TcpOption::Timestamp {
                    value: u32::from_be_bytes([a, b, c, d]),
                    echo_reply: u32::from_be_bytes([e, f, g, h]),
                }),
                _ => Err(Error::malformed(LAYER, "Timestamp option length was not 10")),
            },
            _ => Ok(TcpOption::Unsupported {
                kind: raw.kind,
                // The TLV reader bounds every entry by the 40-byte option area.
                data: Buffer::from_slice(data).ok_or_else(|| {
                    Error::malformed(LAYER, "option data exceeds 38 bytes")
                })?,
            }),
        }
    }

    fn encode(&self, bytes: &mut Vec<u8>) {
        match self {
            TcpOption::EndOfOptionList => bytes.push(TCP_OPT_KIND_EOL),
            TcpOption::NoOperation => bytes.push(TCP_OPT_KIND_NOP),
            TcpOption::MaximumSegmentSize(mss) => {
                bytes.extend([self.kind().into(), TCP_OPT_LEN_MSS as u8]);
                bytes.extend(mss.to_be_bytes());
            }
            TcpOption::Timestamp { value, echo_reply } => {
                bytes.extend([self.kind().into(), TCP_OPT_LEN_TIMESTAMP as u8]);
                bytes.extend(value.to_be_bytes());
                bytes.extend(echo_reply.to_be_bytes());
            }
            TcpOption::Unsupported { kind, data } => {
                bytes.extend([*kind, self.byte_len() as u8]);
                bytes.extend_from_slice(data.as_slice());
            }
        }
    }
}
