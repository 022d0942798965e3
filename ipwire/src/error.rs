// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types returned while decoding, encoding or fragmenting packets.

use core::fmt;

use ipwire_common::Truncated;
use thiserror::Error;

use crate::layers::ip::{IpProtocol, RoutingType};

/// A convenience alias for results produced by this crate.
pub type Result<T> = core::result::Result<T, Error>;

/// The error returned by any fallible `ipwire` operation.
///
/// Decoders fail fast: the first violation found is returned and nothing is retried.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Fewer bytes remain than a length declared by the packet itself requires.
    ///
    /// The caller may recover by waiting for more data or dropping the datagram.
    #[error("{layer}: packet too short (needed {needed} bytes, {available} available)")]
    TooShort {
        layer: &'static str,
        needed: usize,
        available: usize,
    },
    /// A field holds a value that violates the structure of its header.
    #[error("{layer}: malformed header: {reason}")]
    Malformed {
        layer: &'static str,
        reason: &'static str,
    },
    /// A checksum did not match the one computed over the packet.
    #[error("{layer}: checksum mismatch (header carries {expected:#06x}, computed {computed:#06x})")]
    ChecksumMismatch {
        layer: &'static str,
        expected: u16,
        computed: u16,
    },
    /// An IPv6 Routing header requires action from the caller.
    #[error("IPv6 routing header: {0}")]
    Routing(RoutingDirective),
    /// The packet uses a feature this crate does not decode.
    #[error("{0} is not supported")]
    NotSupported(&'static str),
    /// A header could not be constructed from the values supplied.
    #[error("{layer}: invalid construction: {reason}")]
    Build {
        layer: &'static str,
        reason: &'static str,
    },
}

impl Error {
    #[inline]
    pub(crate) fn malformed(layer: &'static str, reason: &'static str) -> Self {
        Error::Malformed { layer, reason }
    }

    #[inline]
    pub(crate) fn build(layer: &'static str, reason: &'static str) -> Self {
        Error::Build { layer, reason }
    }

    /// Attributes a cursor short-read to the given layer.
    #[inline]
    pub(crate) fn too_short(layer: &'static str) -> impl FnOnce(Truncated) -> Self {
        move |t| Error::TooShort {
            layer,
            needed: t.needed,
            available: t.available,
        }
    }

    /// Indicates whether more input could resolve this error.
    #[inline]
    pub fn is_too_short(&self) -> bool {
        matches!(self, Error::TooShort { .. })
    }

    /// Indicates whether this error represents a structural violation, including a failed
    /// checksum verification.
    #[inline]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::Malformed { .. } | Error::ChecksumMismatch { .. })
    }
}

impl From<Truncated> for Error {
    #[inline]
    fn from(t: Truncated) -> Self {
        Error::too_short("buffer")(t)
    }
}

/// The action RFC 8200 section 4.4 prescribes for a Routing header whose type is not understood.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingDirective {
    /// The packet must be discarded and an ICMP Parameter Problem (code 0) sent to its source,
    /// pointing at the Routing Type field.
    Fatal {
        routing_type: RoutingType,
        segments_left: u8,
        /// Offset of the Routing Type field from the start of the IPv6 header.
        pointer: u32,
    },
    /// The Routing header must be ignored and processing continues with `next_header`.
    Skip {
        routing_type: RoutingType,
        next_header: IpProtocol,
        /// Bytes occupied by the ignored header, including its fixed fields.
        skipped: usize,
    },
}

impl RoutingDirective {
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, RoutingDirective::Fatal { .. })
    }
}

impl fmt::Display for RoutingDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingDirective::Fatal {
                routing_type,
                segments_left,
                pointer,
            } => write!(
                f,
                "unrecognized routing type {} with {} segments left; discard (parameter problem at offset {})",
                u8::from(*routing_type),
                segments_left,
                pointer
            ),
            RoutingDirective::Skip {
                routing_type,
                next_header,
                skipped,
            } => write!(
                f,
                "unrecognized routing type {} with no segments left; ignoring {} bytes, continuing at next header {}",
                u8::from(*routing_type),
                skipped,
                u8::from(*next_header)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_maps_to_too_short() {
        let err = Error::from(Truncated {
            needed: 4,
            available: 1,
        });
        assert!(err.is_too_short());
        assert!(!err.is_malformed());
    }

    #[test]
    fn checksum_mismatch_is_malformed() {
        let err = Error::ChecksumMismatch {
            layer: "TCP",
            expected: 1,
            computed: 2,
        };
        assert!(err.is_malformed());
        assert_eq!(
            err.to_string(),
            "TCP: checksum mismatch (header carries 0x0001, computed 0x0002)"
        );
    }
}
