// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Identifier state shared by packet encoders.

use core::sync::atomic::{AtomicU32, Ordering};

static GLOBAL_IDS: PacketIdGenerator = PacketIdGenerator::new(1);

/// A source of IPv4 Identification and IPv6 fragment Identification values.
///
/// Each counter is a single atomic that is incremented once per value handed out, so headers
/// constructed concurrently from different threads always receive distinct identifiers (modulo
/// wraparound). Encoders that need an identifier accept a `&PacketIdGenerator`; tests construct
/// their own with a known seed to get deterministic output.
#[derive(Debug)]
pub struct PacketIdGenerator {
    ipv4: AtomicU32,
    ipv6_fragment: AtomicU32,
}

impl PacketIdGenerator {
    /// Creates a generator whose first IPv4 id and first IPv6 fragment identification are both
    /// `seed`.
    pub const fn new(seed: u32) -> Self {
        PacketIdGenerator {
            ipv4: AtomicU32::new(seed),
            ipv6_fragment: AtomicU32::new(seed),
        }
    }

    /// The process-wide generator.
    ///
    /// Its counters start from 1 each time the process starts and are never persisted.
    #[inline]
    pub fn global() -> &'static PacketIdGenerator {
        &GLOBAL_IDS
    }

    /// The next IPv4 Identification value. Wraps after 65535.
    #[inline]
    pub fn next_ipv4_id(&self) -> u16 {
        self.ipv4.fetch_add(1, Ordering::Relaxed) as u16
    }

    /// The next IPv6 fragment Identification value.
    #[inline]
    pub fn next_fragment_id(&self) -> u32 {
        self.ipv6_fragment.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for PacketIdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}
