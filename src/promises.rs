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

//! IWANT promise ledger: tracks which peers we asked for which message ids,
//! and at which deadline, so the heartbeat can penalize peers who never
//! followed up.

use crate::message::MessageId;
use crate::peer_id::PeerId;
use crate::time::Instant;
use fnv::FnvHashMap;
use std::sync::Mutex;

struct Inner {
    promises: FnvHashMap<(PeerId, MessageId), Instant>,
}

/// Outstanding IWANT promises, keyed by `(peer, message id)`.
pub struct GossipPromises {
    inner: Mutex<Inner>,
}

impl Default for GossipPromises {
    fn default() -> Self {
        Self::new()
    }
}

impl GossipPromises {
    pub fn new() -> Self {
        GossipPromises {
            inner: Mutex::new(Inner {
                promises: FnvHashMap::default(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("promises lock poisoned")
    }

    /// Records that `peer` was asked (via IWANT) for each of `ids`, with the
    /// given deadline. Does not overwrite an earlier, still-live promise.
    pub fn add_promise(&self, peer: PeerId, ids: &[MessageId], expires_at: Instant) {
        let mut inner = self.lock();
        for id in ids {
            inner
                .promises
                .entry((peer.clone(), id.clone()))
                .or_insert(expires_at);
        }
    }

    /// Clears every outstanding promise for `id`, across all peers, because
    /// the message was delivered.
    pub fn message_delivered(&self, id: &MessageId) {
        let mut inner = self.lock();
        inner.promises.retain(|(_, msg_id), _| msg_id != id);
    }

    /// Removes and counts expired, unfulfilled promises, grouped by peer.
    /// Called once per heartbeat.
    pub fn get_broken_promises(&self, now: Instant) -> FnvHashMap<PeerId, u32> {
        let mut inner = self.lock();
        let mut broken: FnvHashMap<PeerId, u32> = FnvHashMap::default();
        inner.promises.retain(|(peer, _), expiry| {
            if *expiry <= now {
                *broken.entry(peer.clone()).or_insert(0) += 1;
                false
            } else {
                true
            }
        });
        broken
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        let mut inner = self.lock();
        inner.promises.retain(|(p, _), _| p != peer);
    }

    /// Drops every outstanding promise. Used by router shutdown.
    pub fn clear(&self) {
        self.lock().promises.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().promises.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Clock, TestClock};
    use std::time::Duration;

    fn peer(n: u8) -> PeerId {
        PeerId::new(vec![n])
    }

    #[test]
    fn unexpired_promise_is_not_broken() {
        let promises = GossipPromises::new();
        let clock = TestClock::new();
        promises.add_promise(peer(1), &[MessageId::new(vec![1])], clock.now() + Duration::from_secs(10));
        assert!(promises.get_broken_promises(clock.now()).is_empty());
    }

    #[test]
    fn expired_unfulfilled_promise_is_broken() {
        let promises = GossipPromises::new();
        let clock = TestClock::new();
        promises.add_promise(peer(1), &[MessageId::new(vec![1])], clock.now() + Duration::from_secs(5));
        clock.advance(Duration::from_secs(6));
        let broken = promises.get_broken_promises(clock.now());
        assert_eq!(broken.get(&peer(1)), Some(&1));
    }

    #[test]
    fn message_delivered_clears_promise_for_all_peers() {
        let promises = GossipPromises::new();
        let clock = TestClock::new();
        let id = MessageId::new(vec![1]);
        promises.add_promise(peer(1), &[id.clone()], clock.now() + Duration::from_secs(5));
        promises.add_promise(peer(2), &[id.clone()], clock.now() + Duration::from_secs(5));
        promises.message_delivered(&id);
        clock.advance(Duration::from_secs(6));
        assert!(promises.get_broken_promises(clock.now()).is_empty());
    }

    #[test]
    fn broken_promises_are_counted_per_peer() {
        let promises = GossipPromises::new();
        let clock = TestClock::new();
        promises.add_promise(
            peer(1),
            &[MessageId::new(vec![1]), MessageId::new(vec![2])],
            clock.now() + Duration::from_secs(5),
        );
        clock.advance(Duration::from_secs(6));
        let broken = promises.get_broken_promises(clock.now());
        assert_eq!(broken.get(&peer(1)), Some(&2));
    }

    #[test]
    fn remove_peer_drops_its_promises() {
        let promises = GossipPromises::new();
        let clock = TestClock::new();
        promises.add_promise(peer(1), &[MessageId::new(vec![1])], clock.now() + Duration::from_secs(5));
        promises.remove_peer(&peer(1));
        assert!(promises.is_empty());
    }
}
