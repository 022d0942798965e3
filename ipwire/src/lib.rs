// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Encoding, decoding and fragmentation of IPv4 and IPv6 packets.
//!
//! The [`layers`] module models each header (IPv4 with its options, IPv6 with its extension
//! header chain, TCP, UDP and ICMP). [`Packet`] ties an IP header to the upper-layer header it
//! announces, and the [`fragment`] module splits datagrams into fragments and joins them back.
//!
//! All decoding reads from an [`ipwire_common::Cursor`], which bounds every read and reports
//! short input as [`Error::TooShort`].

#![forbid(unsafe_code)]
#![allow(clippy::len_without_is_empty)]

pub mod error;
pub mod fragment;
pub mod ident;
pub mod layers;
pub mod packet;
pub mod utils;

pub use ipwire_common::Cursor;

pub use error::{Error, Result, RoutingDirective};
pub use ident::PacketIdGenerator;
pub use layers::ip::{IpHeader, IpProtocol, Ipv4Header, Ipv6Header};
pub use layers::traits::{ChecksumMode, FromCursor, ToBytes, TransportHeader};
pub use layers::NextHeader;
pub use packet::{Packet, ParseOptions};
