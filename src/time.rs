// Copyright 2024 The gossipsub-core Authors
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! A monotonic clock abstraction.
//!
//! The transport/driver that embeds this crate owns the real clock and the
//! heartbeat timer; the core only ever asks a [`Clock`] for "now". This keeps
//! every TTL, backoff and decay computation deterministic under test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant as StdInstant};

/// A point in monotonic time, relative to an arbitrary epoch chosen by the
/// [`Clock`] implementation.
pub type Instant = StdInstant;

/// Injected monotonic clock.
///
/// Implementations must be monotonic (never go backwards) but need not be
/// wall-clock: a test clock can jump forward arbitrarily to exercise TTL and
/// decay logic without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real system clock, backed by [`std::time::Instant`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        StdInstant::now()
    }
}

/// A manually-advanced clock for deterministic tests.
///
/// Starts at an arbitrary fixed instant and only moves forward when
/// [`TestClock::advance`] is called.
#[derive(Debug)]
pub struct TestClock {
    base: Instant,
    offset_millis: AtomicU64,
}

impl TestClock {
    pub fn new() -> Self {
        TestClock {
            base: StdInstant::now(),
            offset_millis: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        self.offset_millis
            .fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_millis.load(Ordering::SeqCst))
    }
}
