// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Initial Sequence Number generation (RFC 6528).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

static GLOBAL_ISN: Lazy<IsnGenerator> = Lazy::new(IsnGenerator::new);

/// Generates TCP initial sequence numbers as `ISN = M + F(localip, localport, remoteip,
/// remoteport, secretkey)`, where `M` is a timer ticking every 4 microseconds.
///
/// The time origin and the secret are fixed when the generator is created and only read
/// afterwards, so a generator may be shared freely between threads.
#[derive(Debug)]
pub struct IsnGenerator {
    origin: Instant,
    secret: u64,
}

impl IsnGenerator {
    /// Creates a generator with a fresh random secret whose clock starts now.
    pub fn new() -> Self {
        Self::with_secret(rand::random::<u64>())
    }

    /// Creates a generator with the given secret whose clock starts now.
    pub fn with_secret(secret: u64) -> Self {
        IsnGenerator {
            origin: Instant::now(),
            secret,
        }
    }

    /// The process-wide generator, created on first use.
    #[inline]
    pub fn global() -> &'static IsnGenerator {
        &GLOBAL_ISN
    }

    /// The initial sequence number for a connection from `local` to `remote`.
    pub fn generate(&self, local: SocketAddr, remote: SocketAddr) -> u32 {
        self.isn_at(self.origin.elapsed(), local, remote)
    }

    fn isn_at(&self, elapsed: Duration, local: SocketAddr, remote: SocketAddr) -> u32 {
        let ticks = (elapsed.as_micros() / 4) as u32;
        ticks.wrapping_add(self.offset(local, remote))
    }

    /// The pseudorandom function F.
    fn offset(&self, local: SocketAddr, remote: SocketAddr) -> u32 {
        let mut hasher = DefaultHasher::new();
        self.secret.hash(&mut hasher);
        local.hash(&mut hasher);
        remote.hash(&mut hasher);
        hasher.finish() as u32
    }
}

impl Default for IsnGenerator {
    fn default() -> Self {
        Self::new()
    }
}
