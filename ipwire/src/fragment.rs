// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Fragmentation and reassembly of IP datagrams.
//!
//! A datagram is handled as a header plus the bytes that follow it (for IPv6, the bytes that
//! follow its extension headers). Fragmenting produces one such pair per fragment; reassembly
//! takes them back in any order.

mod ipv4;
mod ipv6;

use crate::error::{Error, Result};
use crate::ident::PacketIdGenerator;
use crate::layers::ip::{IpHeader, Ipv4Header, Ipv6Header};

/// The smallest amount of data a fragment may carry.
pub const MIN_FRAGMENT_PAYLOAD: usize = 8;

/// Checks that `max_size` is usable as a fragment size and returns the largest multiple of 8
/// bytes of data a fragment with an `unfragmentable_len`-byte header can carry.
pub(crate) fn chunk_size(
    layer: &'static str,
    max_size: usize,
    unfragmentable_len: usize,
) -> Result<usize> {
    if max_size < MIN_FRAGMENT_PAYLOAD || max_size % 8 != 0 {
        return Err(Error::build(
            layer,
            "fragment size must be a non-zero multiple of 8",
        ));
    }
    match crate::utils::closest_divisible_by(max_size.saturating_sub(unfragmentable_len), 8) {
        0 => Err(Error::build(
            layer,
            "fragment size leaves no room for data after the header",
        )),
        chunk => Ok(chunk),
    }
}

impl IpHeader {
    /// Splits the datagram made of this header and `payload` into fragments of at most
    /// `max_size` bytes each, drawing any IPv6 fragment identification from the process-wide
    /// generator.
    #[inline]
    pub fn fragment(&self, max_size: usize, payload: &[u8]) -> Result<Vec<(IpHeader, Vec<u8>)>> {
        self.fragment_with(PacketIdGenerator::global(), max_size, payload)
    }

    /// Like [`IpHeader::fragment`], drawing identifiers from `ids`.
    pub fn fragment_with(
        &self,
        ids: &PacketIdGenerator,
        max_size: usize,
        payload: &[u8],
    ) -> Result<Vec<(IpHeader, Vec<u8>)>> {
        match self {
            IpHeader::V4(h) => Ok(h
                .fragment(max_size, payload)?
                .into_iter()
                .map(|(h, data)| (IpHeader::V4(h), data))
                .collect()),
            IpHeader::V6(h) => Ok(h
                .fragment_with(ids, max_size, payload)?
                .into_iter()
                .map(|(h, data)| (IpHeader::V6(h), data))
                .collect()),
        }
    }

    /// Rebuilds a datagram from its fragments, which may be given in any order.
    ///
    /// Every fragment must be of the same IP version.
    pub fn reassemble(fragments: &[(IpHeader, Vec<u8>)]) -> Result<(IpHeader, Vec<u8>)> {
        let Some((first, _)) = fragments.first() else {
            return Err(Error::malformed("IP", "no fragments to reassemble"));
        };

        match first {
            IpHeader::V4(_) => {
                let parts = fragments
                    .iter()
                    .map(|(h, data)| match h {
                        IpHeader::V4(h) => Ok((h, data.as_slice())),
                        IpHeader::V6(_) => Err(mixed_versions()),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let (header, data) = Ipv4Header::reassemble_parts(parts)?;
                Ok((IpHeader::V4(header), data))
            }
            IpHeader::V6(_) => {
                let parts = fragments
                    .iter()
                    .map(|(h, data)| match h {
                        IpHeader::V6(h) => Ok((h, data.as_slice())),
                        IpHeader::V4(_) => Err(mixed_versions()),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let (header, data) = Ipv6Header::reassemble_parts(parts)?;
                Ok((IpHeader::V6(header), data))
            }
        }
    }
}

fn mixed_versions() -> Error {
    Error::malformed("IP", "fragments belong to different IP versions")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::ip::IpProtocol;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[test]
    fn chunk_size_rounds_down() {
        assert_eq!(chunk_size("test", 1000, 20).unwrap(), 976);
        assert_eq!(chunk_size("test", 1000, 48).unwrap(), 952);
        assert!(matches!(
            chunk_size("test", 64, 60),
            Err(Error::Build { .. })
        ));
        assert!(chunk_size("test", 1001, 20).is_err());
        assert!(chunk_size("test", 0, 20).is_err());
    }

    #[test]
    fn dispatch_round_trip() {
        let payload: Vec<u8> = (0..=255).cycle().take(300).collect();
        let ids = PacketIdGenerator::new(40);
        let endpoints: [(IpAddr, IpAddr); 2] = [
            (Ipv4Addr::new(10, 0, 0, 1).into(), Ipv4Addr::new(10, 0, 0, 2).into()),
            (Ipv6Addr::LOCALHOST.into(), Ipv6Addr::UNSPECIFIED.into()),
        ];
        for (src, dst) in endpoints {
            let header =
                IpHeader::create_with(&ids, src, dst, IpProtocol::Udp, payload.len()).unwrap();
            let mut fragments = header.fragment_with(&ids, 128, &payload).unwrap();
            assert!(fragments.len() > 2);
            fragments.reverse();
            let (joined, data) = IpHeader::reassemble(&fragments).unwrap();
            assert_eq!(data, payload);
            assert_eq!(joined.payload_len(), payload.len());
            assert_eq!(joined.next_header_protocol(), IpProtocol::Udp);
        }
    }

    #[test]
    fn mixed_versions_are_rejected() {
        let v4 = IpHeader::create(
            Ipv4Addr::LOCALHOST.into(),
            Ipv4Addr::LOCALHOST.into(),
            IpProtocol::Udp,
            8,
        )
        .unwrap();
        let v6 = IpHeader::create(
            Ipv6Addr::LOCALHOST.into(),
            Ipv6Addr::LOCALHOST.into(),
            IpProtocol::Udp,
            8,
        )
        .unwrap();
        let err = IpHeader::reassemble(&[(v4, vec![0; 8]), (v6, vec![0; 8])]).unwrap_err();
        assert!(err.is_malformed());
        assert!(IpHeader::reassemble(&[]).unwrap_err().is_malformed());
    }
}
