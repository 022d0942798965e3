// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use tracing::instrument;

use crate::error::{Error, Result};
use crate::fragment;
use crate::ident::PacketIdGenerator;
use crate::layers::ip::{
    link_chain, FragmentHeader, Ipv6ExtensionHeader, Ipv6Header, IPV6_HEADER_LEN,
};

const LAYER: &str = "IPv6";

const FRAGMENT_HEADER_LEN: usize = 8;
const MAX_FRAGMENT_OFFSET: usize = 0x1fff;

/// The number of leading extension headers that every fragment repeats: everything up to and
/// including the last Routing header, or a leading Hop-by-Hop header when there is none.
fn per_fragment_len(extensions: &[Ipv6ExtensionHeader]) -> usize {
    extensions
        .iter()
        .rposition(|ext| matches!(ext, Ipv6ExtensionHeader::Routing(_)))
        .map(|idx| idx + 1)
        .unwrap_or_else(|| {
            usize::from(matches!(
                extensions.first(),
                Some(Ipv6ExtensionHeader::HopByHop(_))
            ))
        })
}

fn encoded(extensions: &[Ipv6ExtensionHeader]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for ext in extensions {
        ext.encode(&mut bytes);
    }
    bytes
}

impl Ipv6Header {
    /// Splits the packet made of this header and `payload` (the bytes after its extension
    /// headers) into fragments of at most `max_size` bytes each, drawing the identification
    /// from the process-wide generator.
    #[inline]
    pub fn fragment(&self, max_size: usize, payload: &[u8]) -> Result<Vec<(Ipv6Header, Vec<u8>)>> {
        self.fragment_with(PacketIdGenerator::global(), max_size, payload)
    }

    /// Like [`Ipv6Header::fragment`], drawing the identification from `ids`.
    ///
    /// Every fragment repeats the per-fragment extension headers followed by a Fragment header.
    /// The first fragment also carries the remaining extension headers; their bytes count
    /// towards the fragmentable part, so the data paired with later fragments starts at
    /// offsets relative to them.
    #[instrument(skip_all, level = "trace", fields(max_size = max_size))]
    pub fn fragment_with(
        &self,
        ids: &PacketIdGenerator,
        max_size: usize,
        payload: &[u8],
    ) -> Result<Vec<(Ipv6Header, Vec<u8>)>> {
        if payload.len() != self.upper_layer_len() {
            return Err(Error::malformed(
                LAYER,
                "payload length does not match the header's payload length",
            ));
        }
        if self.fragment_header().is_some() {
            return Err(Error::malformed(LAYER, "packet is already a fragment"));
        }

        let split = per_fragment_len(&self.extensions);
        let (per_fragment, rest) = self.extensions.split_at(split);
        let per_fragment_bytes: usize = per_fragment.iter().map(Ipv6ExtensionHeader::byte_len).sum();
        let chunk = fragment::chunk_size(
            LAYER,
            max_size,
            IPV6_HEADER_LEN + per_fragment_bytes + FRAGMENT_HEADER_LEN,
        )?;

        let rest_bytes = encoded(rest);
        if chunk < rest_bytes.len() {
            return Err(Error::build(
                LAYER,
                "fragment size cannot hold the extension headers of the first fragment",
            ));
        }

        let mut fragmentable = rest_bytes;
        let rest_len = fragmentable.len();
        fragmentable.extend_from_slice(payload);

        let upper = self.next_header_protocol();
        // Every Fragment header names the first header of the fragmentable part.
        let fragmentable_type = rest.first().map_or(upper, Ipv6ExtensionHeader::extension_type);
        let identification = ids.next_fragment_id();
        let pieces: Vec<&[u8]> = fragmentable.chunks(chunk).collect();
        let count = pieces.len();

        let mut fragments = Vec::with_capacity(count);
        for (idx, piece) in pieces.into_iter().enumerate() {
            let offset = idx * chunk / 8;
            if offset > MAX_FRAGMENT_OFFSET {
                return Err(Error::build(LAYER, "fragment offset exceeds 13 bits"));
            }
            let fragment_header =
                FragmentHeader::new(offset as u16, idx + 1 < count, identification);

            let mut extensions = per_fragment.to_vec();
            extensions.push(Ipv6ExtensionHeader::Fragment(fragment_header));
            let (data, chain_end) = match idx {
                0 => {
                    extensions.extend_from_slice(rest);
                    (&piece[rest_len..], upper)
                }
                _ => (piece, fragmentable_type),
            };
            let next_header = link_chain(&mut extensions, chain_end);
            let extensions_len: usize =
                extensions.iter().map(Ipv6ExtensionHeader::byte_len).sum();
            let payload_length = u16::try_from(extensions_len + data.len())
                .map_err(|_| Error::build(LAYER, "payload length exceeds 65535 bytes"))?;

            let header = Ipv6Header {
                payload_length,
                next_header,
                extensions,
                ..self.clone()
            };
            fragments.push((header, data.to_vec()));
        }

        tracing::trace!(
            fragments = fragments.len(),
            identification,
            "fragmented IPv6 packet"
        );
        Ok(fragments)
    }

    /// Rebuilds a packet from fragments given in any order.
    ///
    /// The fragments must share an identification and address pair, and must cover the
    /// fragmentable part from offset 0 without gaps or overlap, with only the last being
    /// final. The result takes its fields and extension headers from the fragment at offset 0,
    /// with the Fragment header removed.
    #[inline]
    pub fn reassemble(fragments: &[(Ipv6Header, Vec<u8>)]) -> Result<(Ipv6Header, Vec<u8>)> {
        Self::reassemble_parts(
            fragments
                .iter()
                .map(|(header, data)| (header, data.as_slice()))
                .collect(),
        )
    }

    #[instrument(skip_all, level = "trace", fields(fragments = parts.len()))]
    pub(crate) fn reassemble_parts(
        parts: Vec<(&Ipv6Header, &[u8])>,
    ) -> Result<(Ipv6Header, Vec<u8>)> {
        let mut parts = parts
            .into_iter()
            .map(|(header, data)| {
                header
                    .fragment_header()
                    .map(|frag| (*frag, header, data))
                    .ok_or_else(|| Error::malformed(LAYER, "packet has no Fragment header"))
            })
            .collect::<Result<Vec<_>>>()?;
        parts.sort_by_key(|(frag, _, _)| frag.fragment_offset);

        let Some(&(first_frag, first, _)) = parts.first() else {
            return Err(Error::malformed(LAYER, "no fragments to reassemble"));
        };
        if first_frag.fragment_offset != 0 {
            return Err(Error::malformed(LAYER, "first fragment is missing"));
        }

        let frag_idx = first
            .extensions
            .iter()
            .position(|ext| matches!(ext, Ipv6ExtensionHeader::Fragment(_)))
            .ok_or_else(|| Error::malformed(LAYER, "packet has no Fragment header"))?;
        let rest = &first.extensions[frag_idx + 1..];
        let mut fragmentable = encoded(rest);
        let rest_len = fragmentable.len();

        let last = parts.len() - 1;
        for (idx, (frag, header, data)) in parts.iter().enumerate() {
            if frag.identification != first_frag.identification
                || header.source != first.source
                || header.destination != first.destination
            {
                return Err(Error::malformed(
                    LAYER,
                    "fragments belong to different packets",
                ));
            }
            if data.len() != header.upper_layer_len() {
                return Err(Error::malformed(
                    LAYER,
                    "fragment data does not match its header's payload length",
                ));
            }
            let expected = match idx {
                0 => 0,
                _ => fragmentable.len(),
            };
            if frag.fragment_offset as usize * 8 != expected {
                return Err(Error::malformed(
                    LAYER,
                    "fragments overlap or leave a gap",
                ));
            }
            match (idx == last, frag.more_fragments) {
                (false, false) => {
                    return Err(Error::malformed(LAYER, "more than one final fragment"))
                }
                (true, true) => return Err(Error::malformed(LAYER, "final fragment is missing")),
                _ => (),
            }
            fragmentable.extend_from_slice(data);
        }

        let upper = first.next_header_protocol();
        let mut extensions = first.extensions.clone();
        extensions.remove(frag_idx);
        let next_header = link_chain(&mut extensions, upper);
        let extensions_len: usize = extensions.iter().map(Ipv6ExtensionHeader::byte_len).sum();
        let payload = fragmentable.split_off(rest_len);
        let payload_length = u16::try_from(extensions_len + payload.len())
            .map_err(|_| Error::malformed(LAYER, "reassembled packet exceeds 65535 bytes"))?;

        let header = Ipv6Header {
            payload_length,
            next_header,
            extensions,
            ..first.clone()
        };

        tracing::trace!(bytes = payload.len(), "reassembled IPv6 packet");
        Ok((header, payload))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::ident::PacketIdGenerator;
    use crate::layers::ip::{
        GenericRoutingHeader, IpProtocol, Ipv6ExtensionHeader, Ipv6Header, Ipv6Tlv,
        OptionsHeader, RoutingHeader, RoutingType,
    };
    use crate::layers::traits::{FromCursor, ToBytes};
    use std::net::Ipv6Addr;

    fn addrs() -> (Ipv6Addr, Ipv6Addr) {
        (
            "2001:db8::1".parse().unwrap(),
            "2001:db8::2".parse().unwrap(),
        )
    }

    fn hop_by_hop() -> Ipv6ExtensionHeader {
        Ipv6ExtensionHeader::HopByHop(OptionsHeader::new(vec![Ipv6Tlv::pad_n(6)]).unwrap())
    }

    fn destination_options() -> Ipv6ExtensionHeader {
        Ipv6ExtensionHeader::DestinationOptions(
            OptionsHeader::new(vec![Ipv6Tlv::pad_n(14)]).unwrap(),
        )
    }

    fn spent_route() -> Ipv6ExtensionHeader {
        Ipv6ExtensionHeader::Routing(RoutingHeader::Generic(GenericRoutingHeader::new(
            RoutingType::SegmentRouting,
            0,
            vec![0; 4],
        )))
    }

    fn packet(
        extensions: Vec<Ipv6ExtensionHeader>,
        payload_len: usize,
    ) -> (Ipv6Header, Vec<u8>) {
        let (src, dst) = addrs();
        let header = Ipv6Header::builder(src, dst, IpProtocol::Tcp)
            .flow_label(0x12345)
            .extensions(extensions)
            .payload_len(payload_len)
            .build()
            .unwrap();
        let payload = (0..payload_len).map(|i| (i % 253) as u8).collect();
        (header, payload)
    }

    #[test]
    fn large_segment_fragments_and_reassembles() {
        // 20-byte TCP header followed by 5000 bytes of data.
        let (header, payload) = packet(Vec::new(), 5020);
        let ids = PacketIdGenerator::new(0x1000);
        let fragments = header.fragment_with(&ids, 1000, &payload).unwrap();
        assert_eq!(fragments.len(), 6);

        for (idx, (frag, data)) in fragments.iter().enumerate() {
            assert!(frag.total_len() <= 1000);
            assert_eq!(frag.next_header(), IpProtocol::Ipv6Frag);
            assert_eq!(frag.next_header_protocol(), IpProtocol::Tcp);
            assert_eq!(frag.upper_layer_len(), data.len());
            let fh = frag.fragment_header().unwrap();
            assert_eq!(fh.fragment_offset as usize, idx * 952 / 8);
            assert_eq!(fh.more_fragments, idx < 5);
            assert_eq!(fh.identification, 0x1000);
        }

        let mut shuffled = fragments;
        shuffled.rotate_left(4);
        let (joined, data) = Ipv6Header::reassemble(&shuffled).unwrap();
        assert_eq!(data, payload);
        assert_eq!(joined, header);
    }

    #[test]
    fn fragments_survive_the_wire() {
        let (header, payload) = packet(vec![hop_by_hop(), destination_options()], 200);
        let fragments = header
            .fragment_with(&PacketIdGenerator::new(7), 128, &payload)
            .unwrap();
        let parsed: Vec<_> = fragments
            .iter()
            .map(|(frag, data)| {
                let mut bytes = frag.to_bytes();
                bytes.extend_from_slice(data);
                let parsed = Ipv6Header::from_bytes(&bytes).unwrap();
                let data = bytes[parsed.header_len()..].to_vec();
                (parsed, data)
            })
            .collect();
        assert_eq!(parsed, fragments);

        let (joined, data) = Ipv6Header::reassemble(&parsed).unwrap();
        assert_eq!(joined, header);
        assert_eq!(data, payload);
    }

    #[test]
    fn fragment_headers_agree_on_next_header() {
        let (header, payload) = packet(vec![destination_options()], 200);
        let fragments = header
            .fragment_with(&PacketIdGenerator::new(3), 128, &payload)
            .unwrap();
        assert_eq!(fragments.len(), 3);

        for (frag, _) in &fragments {
            assert_eq!(frag.next_header(), IpProtocol::Ipv6Frag);
            assert_eq!(
                frag.fragment_header().unwrap().next_header,
                IpProtocol::Ipv6Opts
            );
        }
        assert_eq!(fragments[0].0.next_header_protocol(), IpProtocol::Tcp);

        let (joined, data) = Ipv6Header::reassemble(&fragments).unwrap();
        assert_eq!(joined, header);
        assert_eq!(data, payload);
    }

    #[test]
    fn routing_header_is_repeated_in_every_fragment() {
        let (header, payload) = packet(
            vec![hop_by_hop(), spent_route(), destination_options()],
            100,
        );
        let fragments = header
            .fragment_with(&PacketIdGenerator::new(1), 96, &payload)
            .unwrap();
        assert!(fragments.len() > 2);

        let (first, first_data) = &fragments[0];
        assert_eq!(first_data.len(), 16);
        assert!(matches!(
            first.extensions(),
            [
                Ipv6ExtensionHeader::HopByHop(_),
                Ipv6ExtensionHeader::Routing(_),
                Ipv6ExtensionHeader::Fragment(_),
                Ipv6ExtensionHeader::DestinationOptions(_),
            ]
        ));
        for (idx, (frag, _)) in fragments.iter().enumerate().skip(1) {
            assert!(matches!(
                frag.extensions(),
                [
                    Ipv6ExtensionHeader::HopByHop(_),
                    Ipv6ExtensionHeader::Routing(_),
                    Ipv6ExtensionHeader::Fragment(_),
                ]
            ));
            assert_eq!(frag.fragment_header().unwrap().fragment_offset as usize, idx * 4);
        }

        let (joined, data) = Ipv6Header::reassemble(&fragments).unwrap();
        assert_eq!(joined, header);
        assert_eq!(data, payload);
    }

    #[test]
    fn small_packet_is_one_atomic_fragment() {
        let (header, payload) = packet(Vec::new(), 16);
        let fragments = header
            .fragment_with(&PacketIdGenerator::new(9), 1280, &payload)
            .unwrap();
        assert_eq!(fragments.len(), 1);
        let fh = fragments[0].0.fragment_header().unwrap();
        assert_eq!(fh.fragment_offset, 0);
        assert!(!fh.more_fragments);
        assert_eq!(fh.identification, 9);
        assert_eq!(Ipv6Header::reassemble(&fragments).unwrap(), (header, payload));
    }

    #[test]
    fn invalid_requests_fail() {
        let ids = PacketIdGenerator::new(0);
        let (header, payload) = packet(vec![destination_options()], 100);
        assert!(header
            .fragment_with(&ids, 128, &payload[1..])
            .unwrap_err()
            .is_malformed());
        for size in [0, 12, 48] {
            assert!(matches!(
                header.fragment_with(&ids, size, &payload),
                Err(Error::Build { .. })
            ));
        }
        // The 16-byte Destination Options header does not fit a single 8-byte chunk.
        assert!(matches!(
            header.fragment_with(&ids, 56, &payload),
            Err(Error::Build { .. })
        ));

        let fragments = header.fragment_with(&ids, 128, &payload).unwrap();
        let (fragment, data) = &fragments[1];
        assert!(fragment
            .fragment_with(&ids, 64, data)
            .unwrap_err()
            .is_malformed());
    }

    #[test]
    fn reassembly_rejects_inconsistent_sets() {
        let ids = PacketIdGenerator::new(0x77);
        let (header, payload) = packet(Vec::new(), 300);
        let fragments = header.fragment_with(&ids, 128, &payload).unwrap();
        assert_eq!(fragments.len(), 4);

        let mut gap = fragments.clone();
        gap.remove(1);
        assert!(Ipv6Header::reassemble(&gap).unwrap_err().is_malformed());
        assert!(Ipv6Header::reassemble(&fragments[..3]).unwrap_err().is_malformed());
        assert!(Ipv6Header::reassemble(&fragments[1..]).unwrap_err().is_malformed());

        // Same layout, but a fresh identification.
        let other = header.fragment_with(&ids, 128, &payload).unwrap();
        let mut mixed = fragments.clone();
        mixed[2] = other[2].clone();
        assert!(Ipv6Header::reassemble(&mixed).unwrap_err().is_malformed());

        let mut unfragmented = fragments.clone();
        unfragmented[0] = (header, payload[..80].to_vec());
        assert!(Ipv6Header::reassemble(&unfragmented).unwrap_err().is_malformed());

        assert!(Ipv6Header::reassemble(&[]).unwrap_err().is_malformed());
    }
}
