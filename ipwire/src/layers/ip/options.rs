// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! IPv4 options (RFC 791 section 3.1).

use std::net::Ipv4Addr;

use ipwire_common::Cursor;
use ipwire_macros::WireEnum;

use crate::error::{Error, Result};
use crate::layers::traits::{RawTlv, TlvLength, TlvReader};

const LAYER: &str = "IPv4 option";

const OPT_COPIED_BIT: u8 = 0b_1000_0000;
const OPT_CLASS_MASK: u8 = 0b_0110_0000;
const OPT_NUMBER_MASK: u8 = 0b_0001_1111;

/// Registered IPv4 option types decoded by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, WireEnum)]
pub enum Ipv4OptionType {
    /// End of Option List
    #[wire(0x00)]
    EndOfOptionList,
    /// No Operation
    #[wire(0x01)]
    NoOperation,
    /// Record Route
    #[wire(0x07)]
    RecordRoute,
    /// Time Stamp
    #[wire(0x44)]
    Timestamp,
    /// Security
    #[wire(0x82)]
    Security,
    /// Loose Source and Record Route
    #[wire(0x83)]
    LooseSourceRoute,
    /// Stream Identifier
    #[wire(0x88)]
    StreamId,
    /// Strict Source and Record Route
    #[wire(0x89)]
    StrictSourceRoute,
    /// Any type not decoded by this crate.
    #[wire(other)]
    Other(u8),
}

/// The class of an IPv4 option, held in bits 1-2 of the option type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ipv4OptionClass {
    Control,
    Reserved1,
    DebuggingMeasurement,
    Reserved3,
}

impl From<u8> for Ipv4OptionClass {
    /// Uses the class bits of an option type octet.
    #[inline]
    fn from(option_type: u8) -> Self {
        match (option_type & OPT_CLASS_MASK) >> 5 {
            0 => Ipv4OptionClass::Control,
            1 => Ipv4OptionClass::Reserved1,
            2 => Ipv4OptionClass::DebuggingMeasurement,
            _ => Ipv4OptionClass::Reserved3,
        }
    }
}

/// An option within an IPv4 header.
///
/// End of Option List and No Operation are single octets; every other option is encoded as a
/// type octet, a length octet counting the whole option, and data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ipv4Option {
    /// Marks the end of the option list. Anything after it is padding.
    EndOfOptionList,
    /// Used between options, e.g. to align a subsequent option.
    NoOperation,
    Security(SecurityOption),
    LooseSourceRoute(RouteOption),
    StrictSourceRoute(RouteOption),
    RecordRoute(RouteOption),
    /// Carries a SATNET stream identifier.
    StreamId(u16),
    Timestamp(TimestampOption),
    /// An option of a type not decoded by this crate, kept byte-for-byte.
    Unknown { option_type: u8, data: Vec<u8> },
}

/// The (RFC 791) Security option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecurityOption {
    pub security: u16,
    pub compartments: u16,
    pub handling_restrictions: u16,
    /// Transmission Control Code; only the low 24 bits are encoded.
    pub transmission_control: u32,
}

/// The body shared by the Loose Source Route, Strict Source Route and Record Route options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteOption {
    /// Octet offset (from the start of the option) of the next address to process.
    pub pointer: u8,
    pub route: Vec<Ipv4Addr>,
}

/// The Internet Timestamp option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimestampOption {
    pub pointer: u8,
    /// Number of modules unable to register a timestamp; only the low 4 bits are encoded.
    pub overflow: u8,
    pub flag: TimestampFlag,
    pub entries: Vec<TimestampEntry>,
}

/// The contents of each Timestamp option entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampFlag {
    /// Timestamps only.
    TimestampsOnly = 0,
    /// Each timestamp is preceded by the address of the registering module.
    WithAddresses = 1,
    /// Timestamps are registered only by the prespecified addresses.
    Prespecified = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimestampEntry {
    /// Absent exactly when the option's flag is [`TimestampFlag::TimestampsOnly`].
    pub address: Option<Ipv4Addr>,
    pub timestamp: u32,
}

impl Ipv4Option {
    /// The type octet of the option.
    pub fn option_type(&self) -> u8 {
        let kind = match self {
            Ipv4Option::EndOfOptionList => Ipv4OptionType::EndOfOptionList,
            Ipv4Option::NoOperation => Ipv4OptionType::NoOperation,
            Ipv4Option::Security(_) => Ipv4OptionType::Security,
            Ipv4Option::LooseSourceRoute(_) => Ipv4OptionType::LooseSourceRoute,
            Ipv4Option::StrictSourceRoute(_) => Ipv4OptionType::StrictSourceRoute,
            Ipv4Option::RecordRoute(_) => Ipv4OptionType::RecordRoute,
            Ipv4Option::StreamId(_) => Ipv4OptionType::StreamId,
            Ipv4Option::Timestamp(_) => Ipv4OptionType::Timestamp,
            Ipv4Option::Unknown { option_type, .. } => return *option_type,
        };
        kind.into()
    }

    /// Indicates whether the option must be copied into every fragment of a datagram.
    #[inline]
    pub fn is_copied(&self) -> bool {
        self.option_type() & OPT_COPIED_BIT != 0
    }

    #[inline]
    pub fn option_class(&self) -> Ipv4OptionClass {
        Ipv4OptionClass::from(self.option_type())
    }

    /// The option number (the low 5 bits of the type octet).
    #[inline]
    pub fn number(&self) -> u8 {
        self.option_type() & OPT_NUMBER_MASK
    }

    /// The encoded length of the option in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            Ipv4Option::EndOfOptionList | Ipv4Option::NoOperation => 1,
            Ipv4Option::Security(_) => 11,
            Ipv4Option::LooseSourceRoute(r)
            | Ipv4Option::StrictSourceRoute(r)
            | Ipv4Option::RecordRoute(r) => 3 + 4 * r.route.len(),
            Ipv4Option::StreamId(_) => 4,
            Ipv4Option::Timestamp(ts) => {
                let entry_len = match ts.flag {
                    TimestampFlag::TimestampsOnly => 4,
                    _ => 8,
                };
                4 + entry_len * ts.entries.len()
            }
            Ipv4Option::Unknown { data, .. } => 2 + data.len(),
        }
    }

    /// Checks that the option can be encoded faithfully.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.byte_len() > u8::MAX as usize {
            return Err(Error::build(LAYER, "option exceeds the maximum encodable length"));
        }

        match self {
            Ipv4Option::Security(sec) if sec.transmission_control > 0x00ff_ffff => Err(
                Error::build(LAYER, "transmission control code exceeds 24 bits"),
            ),
            Ipv4Option::Timestamp(ts) => {
                if ts.overflow > 0x0f {
                    return Err(Error::build(LAYER, "timestamp overflow exceeds 4 bits"));
                }
                let with_addresses = ts.flag != TimestampFlag::TimestampsOnly;
                if ts.entries.iter().any(|e| e.address.is_some() != with_addresses) {
                    return Err(Error::build(
                        LAYER,
                        "timestamp entries do not match the option's flag",
                    ));
                }
                Ok(())
            }
            Ipv4Option::Unknown { option_type, .. } => {
                match Ipv4OptionType::from(*option_type) {
                    Ipv4OptionType::Other(_) => Ok(()),
                    _ => Err(Error::build(
                        LAYER,
                        "unknown option uses the type of a decoded option",
                    )),
                }
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn decode(raw: RawTlv<'_>) -> Result<Self> {
        let data = match raw.data {
            None if raw.kind == u8::from(Ipv4OptionType::EndOfOptionList) => {
                return Ok(Ipv4Option::EndOfOptionList)
            }
            None => return Ok(Ipv4Option::NoOperation),
            Some(data) => data,
        };

        let option = match Ipv4OptionType::from(raw.kind) {
            Ipv4OptionType::Security => match *data {
                [s0, s1, c0, c1, h0, h1, t0, t1, t2] => Ipv4Option::Security(SecurityOption {
                    security: u16::from_be_bytes([s0, s1]),
                    compartments: u16::from_be_bytes([c0, c1]),
                    handling_restrictions: u16::from_be_bytes([h0, h1]),
                    transmission_control: u32::from_be_bytes([0, t0, t1, t2]),
                }),
                _ => return Err(Error::malformed(LAYER, "security option length must be 11")),
            },
            Ipv4OptionType::LooseSourceRoute => Ipv4Option::LooseSourceRoute(decode_route(data)?),
            Ipv4OptionType::StrictSourceRoute => {
                Ipv4Option::StrictSourceRoute(decode_route(data)?)
            }
            Ipv4OptionType::RecordRoute => Ipv4Option::RecordRoute(decode_route(data)?),
            Ipv4OptionType::StreamId => match *data {
                [a, b] => Ipv4Option::StreamId(u16::from_be_bytes([a, b])),
                _ => return Err(Error::malformed(LAYER, "stream identifier length must be 4")),
            },
            Ipv4OptionType::Timestamp => Ipv4Option::Timestamp(decode_timestamp(data)?),
            Ipv4OptionType::EndOfOptionList
            | Ipv4OptionType::NoOperation
            | Ipv4OptionType::Other(_) => Ipv4Option::Unknown {
                option_type: raw.kind,
                data: data.to_vec(),
            },
        };

        Ok(option)
    }

    pub(crate) fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.push(self.option_type());
        if let Ipv4Option::EndOfOptionList | Ipv4Option::NoOperation = self {
            return;
        }
        bytes.push(self.byte_len() as u8);

        match self {
            Ipv4Option::EndOfOptionList | Ipv4Option::NoOperation => (),
            Ipv4Option::Security(sec) => {
                bytes.extend(sec.security.to_be_bytes());
                bytes.extend(sec.compartments.to_be_bytes());
                bytes.extend(sec.handling_restrictions.to_be_bytes());
                bytes.extend(&sec.transmission_control.to_be_bytes()[1..]);
            }
            Ipv4Option::LooseSourceRoute(r)
            | Ipv4Option::StrictSourceRoute(r)
            | Ipv4Option::RecordRoute(r) => {
                bytes.push(r.pointer);
                for addr in &r.route {
                    bytes.extend(addr.octets());
                }
            }
            Ipv4Option::StreamId(id) => bytes.extend(id.to_be_bytes()),
            Ipv4Option::Timestamp(ts) => {
                bytes.push(ts.pointer);
                bytes.push((ts.overflow << 4) | ts.flag as u8);
                for entry in &ts.entries {
                    if let Some(addr) = entry.address {
                        bytes.extend(addr.octets());
                    }
                    bytes.extend(entry.timestamp.to_be_bytes());
                }
            }
            Ipv4Option::Unknown { data, .. } => bytes.extend_from_slice(data),
        }
    }
}

fn decode_route(data: &[u8]) -> Result<RouteOption> {
    let (&pointer, addrs) = data
        .split_first()
        .ok_or(Error::malformed(LAYER, "route option missing pointer"))?;
    if addrs.len() % 4 != 0 {
        return Err(Error::malformed(
            LAYER,
            "route data length must be a multiple of 4",
        ));
    }

    Ok(RouteOption {
        pointer,
        route: addrs
            .chunks_exact(4)
            .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
            .collect(),
    })
}

fn decode_timestamp(data: &[u8]) -> Result<TimestampOption> {
    let [pointer, oflw_flg, ref rest @ ..] = *data else {
        return Err(Error::malformed(LAYER, "timestamp option shorter than 4 bytes"));
    };

    let flag = match oflw_flg & 0x0f {
        0 => TimestampFlag::TimestampsOnly,
        1 => TimestampFlag::WithAddresses,
        3 => TimestampFlag::Prespecified,
        _ => return Err(Error::malformed(LAYER, "unrecognized timestamp flag")),
    };

    let entry_len = match flag {
        TimestampFlag::TimestampsOnly => 4,
        _ => 8,
    };
    if rest.len() % entry_len != 0 {
        return Err(Error::malformed(
            LAYER,
            "timestamp data is not a whole number of entries",
        ));
    }

    let entries = rest
        .chunks_exact(entry_len)
        .map(|chunk| match *chunk {
            [a, b, c, d, t0, t1, t2, t3] => TimestampEntry {
                address: Some(Ipv4Addr::new(a, b, c, d)),
                timestamp: u32::from_be_bytes([t0, t1, t2, t3]),
            },
            _ => TimestampEntry {
                address: None,
                timestamp: u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            },
        })
        .collect();

    Ok(TimestampOption {
        pointer,
        overflow: oflw_flg >> 4,
        flag,
        entries,
    })
}

/// Decodes the `len`-byte option area of an IPv4 header, leaving the cursor at its end.
///
/// End of Option List terminates the list; it and whatever follows it are padding, so the
/// returned list never ends in [`Ipv4Option::EndOfOptionList`].
pub(crate) fn parse_options(cursor: &mut Cursor<'_>, len: usize) -> Result<Vec<Ipv4Option>> {
    let mut reader = TlvReader::new(
        cursor,
        len,
        "IPv4",
        &[0x00, 0x01],
        Some(0x00),
        TlvLength::Total,
    )?;

    let mut options = Vec::new();
    for raw in reader.by_ref() {
        options.push(Ipv4Option::decode(raw?)?);
    }
    reader.finish()?;

    normalize_options(&mut options)?;
    Ok(options)
}

/// Validates an option list and drops a trailing End of Option List, which encodes the same as
/// the zero padding that follows the options.
pub(crate) fn normalize_options(options: &mut Vec<Ipv4Option>) -> Result<()> {
    if let Some(eol) = options
        .iter()
        .position(|o| *o == Ipv4Option::EndOfOptionList)
    {
        if eol + 1 != options.len() {
            return Err(Error::build(
                "IPv4",
                "options may not follow End of Option List",
            ));
        }
        options.pop();
    }

    options.iter().try_for_each(Ipv4Option::validate)
}

/// The encoded length of an option list, excluding padding.
#[inline]
pub(crate) fn options_len(options: &[Ipv4Option]) -> usize {
    options.iter().map(Ipv4Option::byte_len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn parse(bytes: &[u8]) -> Result<Vec<Ipv4Option>> {
        let mut cursor = Cursor::new(bytes);
        let options = parse_options(&mut cursor, bytes.len())?;
        assert_eq!(cursor.position(), bytes.len());
        Ok(options)
    }

    fn encode(options: &[Ipv4Option]) -> Vec<u8> {
        let mut bytes = Vec::new();
        options.iter().for_each(|o| o.encode(&mut bytes));
        bytes
    }

    #[test]
    fn type_octet_bits() {
        let lsrr = Ipv4Option::LooseSourceRoute(RouteOption {
            pointer: 4,
            route: vec![],
        });
        assert!(lsrr.is_copied());
        assert_eq!(lsrr.option_class(), Ipv4OptionClass::Control);
        assert_eq!(lsrr.number(), 3);

        let ts = Ipv4Option::Timestamp(TimestampOption {
            pointer: 5,
            overflow: 0,
            flag: TimestampFlag::TimestampsOnly,
            entries: vec![],
        });
        assert!(!ts.is_copied());
        assert_eq!(ts.option_class(), Ipv4OptionClass::DebuggingMeasurement);
        assert_eq!(ts.number(), 4);

        assert!(!Ipv4Option::RecordRoute(RouteOption {
            pointer: 4,
            route: vec![]
        })
        .is_copied());
    }

    #[test]
    fn record_route_and_padding() {
        let bytes = hex!("07 0b 04 c0 a8 00 01 0a 00 00 01 01 00 00 00 00");
        let options = parse(&bytes).unwrap();
        assert_eq!(
            options,
            vec![
                Ipv4Option::RecordRoute(RouteOption {
                    pointer: 4,
                    route: vec![Ipv4Addr::new(192, 168, 0, 1), Ipv4Addr::new(10, 0, 0, 1)],
                }),
                Ipv4Option::NoOperation,
            ]
        );
        assert_eq!(encode(&options), bytes[..12].to_vec());
    }

    #[test]
    fn security_and_stream_id() {
        let bytes = hex!("82 0b 00 00 00 01 00 02 00 00 03 88 04 12 34");
        let options = parse(&bytes).unwrap();
        assert_eq!(
            options,
            vec![
                Ipv4Option::Security(SecurityOption {
                    security: 0,
                    compartments: 1,
                    handling_restrictions: 2,
                    transmission_control: 3,
                }),
                Ipv4Option::StreamId(0x1234),
            ]
        );
        assert_eq!(encode(&options), bytes.to_vec());
    }

    #[test]
    fn timestamp_with_addresses() {
        let bytes = hex!("44 0c 0d 21 0a 00 00 01 00 00 01 00");
        let options = parse(&bytes).unwrap();
        let Ipv4Option::Timestamp(ts) = &options[0] else {
            panic!("expected timestamp option");
        };
        assert_eq!(ts.overflow, 2);
        assert_eq!(ts.flag, TimestampFlag::WithAddresses);
        assert_eq!(
            ts.entries,
            vec![TimestampEntry {
                address: Some(Ipv4Addr::new(10, 0, 0, 1)),
                timestamp: 256,
            }]
        );
        assert_eq!(encode(&options), bytes.to_vec());
    }

    #[test]
    fn unknown_option_passes_through() {
        let bytes = hex!("9e 06 de ad be ef");
        let options = parse(&bytes).unwrap();
        assert_eq!(
            options,
            vec![Ipv4Option::Unknown {
                option_type: 0x9e,
                data: vec![0xde, 0xad, 0xbe, 0xef],
            }]
        );
        assert_eq!(encode(&options), bytes.to_vec());
    }

    #[test]
    fn known_type_with_bad_length() {
        assert!(parse(&hex!("88 03 00 00")).unwrap_err().is_malformed());
        assert!(parse(&hex!("07 04 04 00")).unwrap_err().is_malformed());
        assert!(parse(&hex!("44 08 05 02 00 00 00 00")).unwrap_err().is_malformed());
    }

    #[test]
    fn truncated_option_is_too_short() {
        let bytes = hex!("07 0b 04 c0 a8 00 01 0a 00 00 01 00");
        for len in 1..11 {
            let mut cursor = Cursor::new(&bytes[..len]);
            let err = parse_options(&mut cursor, len).unwrap_err();
            assert!(err.is_too_short(), "len {len}: {err:?}");
        }
        // The area itself extends past the available bytes.
        let mut cursor = Cursor::new(&bytes[..4]);
        assert!(parse_options(&mut cursor, 8).unwrap_err().is_too_short());
    }

    #[test]
    fn trailing_end_of_list_is_dropped() {
        let mut options = vec![Ipv4Option::NoOperation, Ipv4Option::EndOfOptionList];
        normalize_options(&mut options).unwrap();
        assert_eq!(options, vec![Ipv4Option::NoOperation]);

        let mut misplaced = vec![Ipv4Option::EndOfOptionList, Ipv4Option::NoOperation];
        assert!(matches!(
            normalize_options(&mut misplaced),
            Err(Error::Build { .. })
        ));
    }

    #[test]
    fn unknown_may_not_shadow_known_type() {
        let mut options = vec![Ipv4Option::Unknown {
            option_type: 0x07,
            data: vec![4],
        }];
        assert!(normalize_options(&mut options).is_err());
    }
}
