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
use crate::layers::ip::{Ipv4Flags, Ipv4Header, Ipv4Option, IPV4_MAX_FRAGMENT_OFFSET};

const LAYER: &str = "IPv4";

impl Ipv4Header {
    /// Splits the datagram made of this header and `payload` into fragments of at most
    /// `max_size` bytes (header included) each.
    ///
    /// `max_size` must be a multiple of 8. The first fragment keeps every option; later ones
    /// keep only the options whose copied flag is set. If this header is itself a fragment,
    /// offsets continue from its own and the final piece keeps its More Fragments flag.
    #[instrument(skip_all, level = "trace", fields(id = self.identification, max_size = max_size))]
    pub fn fragment(&self, max_size: usize, payload: &[u8]) -> Result<Vec<(Ipv4Header, Vec<u8>)>> {
        if payload.len() != self.payload_len() {
            return Err(Error::malformed(
                LAYER,
                "payload length does not match the header's total length",
            ));
        }
        if self.dont_fragment() {
            return Err(Error::build(LAYER, "Don't Fragment flag is set"));
        }
        let chunk = fragment::chunk_size(LAYER, max_size, self.header_len())?;

        let copied: Vec<Ipv4Option> = self
            .options
            .iter()
            .filter(|opt| opt.is_copied())
            .cloned()
            .collect();

        let mut pieces: Vec<&[u8]> = payload.chunks(chunk).collect();
        if pieces.is_empty() {
            pieces.push(&[]);
        }

        let count = pieces.len();
        let mut fragments = Vec::with_capacity(count);
        for (idx, data) in pieces.into_iter().enumerate() {
            let offset = u16::try_from(self.fragment_offset as usize + idx * chunk / 8)
                .ok()
                .filter(|offset| *offset <= IPV4_MAX_FRAGMENT_OFFSET)
                .ok_or_else(|| Error::build(LAYER, "fragment offset exceeds 13 bits"))?;
            let more_fragments = idx + 1 < count || self.more_fragments();

            let builder = Ipv4Header::builder(self.source, self.destination, self.protocol)
                .dscp(self.dscp)
                .ecn(self.ecn)
                .identification(self.identification)
                .more_fragments(more_fragments)
                .fragment_offset(offset)
                .ttl(self.ttl)
                .payload_len(data.len());
            let builder = match idx {
                0 => builder.ihl(self.ihl).options(self.options.clone()),
                _ => builder.options(copied.clone()),
            };
            fragments.push((builder.build()?, data.to_vec()));
        }

        tracing::trace!(fragments = fragments.len(), "fragmented IPv4 datagram");
        Ok(fragments)
    }

    /// Rebuilds a datagram from fragments given in any order.
    ///
    /// The fragments must share an identification, protocol and address pair, must cover the
    /// datagram from offset 0 without gaps or overlap, and exactly one of them (the one at the
    /// highest offset) must be final. The result takes every field but the lengths and flags
    /// from the fragment at offset 0.
    #[inline]
    pub fn reassemble(fragments: &[(Ipv4Header, Vec<u8>)]) -> Result<(Ipv4Header, Vec<u8>)> {
        Self::reassemble_parts(
            fragments
                .iter()
                .map(|(header, data)| (header, data.as_slice()))
                .collect(),
        )
    }

    #[instrument(skip_all, level = "trace", fields(fragments = parts.len()))]
    pub(crate) fn reassemble_parts(
        mut parts: Vec<(&Ipv4Header, &[u8])>,
    ) -> Result<(Ipv4Header, Vec<u8>)> {
        parts.sort_by_key(|(header, _)| header.fragment_offset);
        let Some(&(first, _)) = parts.first() else {
            return Err(Error::malformed(LAYER, "no fragments to reassemble"));
        };
        if first.fragment_offset != 0 {
            return Err(Error::malformed(LAYER, "first fragment is missing"));
        }

        let mut payload = Vec::new();
        let last = parts.len() - 1;
        for (idx, (header, data)) in parts.iter().enumerate() {
            if header.identification != first.identification
                || header.protocol != first.protocol
                || header.source != first.source
                || header.destination != first.destination
            {
                return Err(Error::malformed(
                    LAYER,
                    "fragments belong to different datagrams",
                ));
            }
            if data.len() != header.payload_len() {
                return Err(Error::malformed(
                    LAYER,
                    "fragment data does not match its header's total length",
                ));
            }
            if header.fragment_offset as usize * 8 != payload.len() {
                return Err(Error::malformed(
                    LAYER,
                    "fragments overlap or leave a gap",
                ));
            }
            match (idx == last, header.more_fragments()) {
                (false, false) => {
                    return Err(Error::malformed(LAYER, "more than one final fragment"))
                }
                (true, true) => return Err(Error::malformed(LAYER, "final fragment is missing")),
                _ => (),
            }
            payload.extend_from_slice(data);
        }

        let mut header = first.clone();
        header.flags.remove(Ipv4Flags::MORE_FRAGMENTS);
        header.total_length = u16::try_from(header.header_len() + payload.len())
            .map_err(|_| Error::malformed(LAYER, "reassembled datagram exceeds 65535 bytes"))?;
        header.refresh_checksum();

        tracing::trace!(bytes = payload.len(), "reassembled IPv4 datagram");
        Ok((header, payload))
    }
}
