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

//! Per-peer metadata: protocol version, direction, subscriptions, topic
//! backoffs and the per-peer IDONTWANT table.

use crate::config::{Direction, ProtocolVersion};
use crate::message::MessageId;
use crate::peer_id::PeerId;
use crate::time::Instant;
use crate::topic::TopicHash;
use fnv::FnvHashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// The maximum number of IDONTWANT entries retained per peer; further
/// inserts are silently dropped (spec §4.5).
pub const MAX_IDONTWANT_ENTRIES_PER_PEER: usize = 10_000;

/// Snapshot of everything the router tracks about one connected peer.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub peer_id: PeerId,
    pub version: ProtocolVersion,
    pub direction: Direction,
    pub subscriptions: HashSet<TopicHash>,
    pub connected_at: Instant,
    pub last_seen: Instant,
    pub backoffs: HashMap<TopicHash, Instant>,
    pub iwant_count: u64,
    pub pending_graft: HashSet<TopicHash>,
    dont_want: FnvHashMap<MessageId, Instant>,
}

impl PeerState {
    pub fn new(peer_id: PeerId, version: ProtocolVersion, direction: Direction, now: Instant) -> Self {
        PeerState {
            peer_id,
            version,
            direction,
            subscriptions: HashSet::new(),
            connected_at: now,
            last_seen: now,
            backoffs: HashMap::new(),
            iwant_count: 0,
            pending_graft: HashSet::new(),
            dont_want: FnvHashMap::default(),
        }
    }

    pub fn is_backed_off(&self, topic: &TopicHash, now: Instant) -> bool {
        self.backoffs.get(topic).map_or(false, |expiry| *expiry > now)
    }

    pub fn set_backoff(&mut self, topic: TopicHash, expires_at: Instant) {
        self.backoffs.insert(topic, expires_at);
    }

    /// Inserts an IDONTWANT entry, silently dropping it if the peer's table
    /// is already at capacity.
    pub fn record_dont_want(&mut self, id: MessageId, expires_at: Instant) {
        if self.dont_want.len() >= MAX_IDONTWANT_ENTRIES_PER_PEER && !self.dont_want.contains_key(&id) {
            return;
        }
        self.dont_want.insert(id, expires_at);
    }

    pub fn has_dont_want(&self, id: &MessageId, now: Instant) -> bool {
        self.dont_want.get(id).map_or(false, |expiry| *expiry > now)
    }

    /// Drops expired IDONTWANT entries. Called from the heartbeat.
    pub fn cleanup_dont_want(&mut self, now: Instant) {
        self.dont_want.retain(|_, expiry| *expiry > now);
    }

    pub fn cleanup_backoffs(&mut self, now: Instant) {
        self.backoffs.retain(|_, expiry| *expiry > now);
    }
}

struct Inner {
    peers: HashMap<PeerId, PeerState>,
}

/// Owns every connected peer's [`PeerState`] behind one lock.
pub struct PeerStateManager {
    inner: Mutex<Inner>,
}

impl Default for PeerStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerStateManager {
    pub fn new() -> Self {
        PeerStateManager {
            inner: Mutex::new(Inner {
                peers: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("peer state lock poisoned")
    }

    pub fn insert(&self, state: PeerState) {
        self.lock().peers.insert(state.peer_id.clone(), state);
    }

    pub fn remove(&self, peer: &PeerId) -> Option<PeerState> {
        self.lock().peers.remove(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.lock().peers.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.lock().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a clone of the peer's state, if connected.
    pub fn get(&self, peer: &PeerId) -> Option<PeerState> {
        self.lock().peers.get(peer).cloned()
    }

    /// Copy-modify-store: reads the peer's state, runs `f` on a mutable
    /// clone, writes it back. No-op (returns `None`) if the peer is not
    /// connected.
    pub fn update_peer<R>(&self, peer: &PeerId, f: impl FnOnce(&mut PeerState) -> R) -> Option<R> {
        let mut inner = self.lock();
        let state = inner.peers.get_mut(peer)?;
        Some(f(state))
    }

    /// Drops every connected peer's state. Used by router shutdown.
    pub fn clear(&self) {
        self.lock().peers.clear();
    }

    pub fn all_peer_ids(&self) -> Vec<PeerId> {
        self.lock().peers.keys().cloned().collect()
    }

    pub fn peers_subscribed_to(&self, topic: &TopicHash) -> Vec<PeerId> {
        self.lock()
            .peers
            .values()
            .filter(|p| p.subscriptions.contains(topic))
            .map(|p| p.peer_id.clone())
            .collect()
    }

    pub fn peers_not_backed_off(&self, topic: &TopicHash, now: Instant) -> Vec<PeerId> {
        self.lock()
            .peers
            .values()
            .filter(|p| !p.is_backed_off(topic, now))
            .map(|p| p.peer_id.clone())
            .collect()
    }

    pub fn outbound_peers_subscribed_to(&self, topic: &TopicHash) -> Vec<PeerId> {
        self.lock()
            .peers
            .values()
            .filter(|p| p.subscriptions.contains(topic) && p.direction == Direction::Outbound)
            .map(|p| p.peer_id.clone())
            .collect()
    }

    pub fn version_of(&self, peer: &PeerId) -> Option<ProtocolVersion> {
        self.lock().peers.get(peer).map(|p| p.version)
    }

    /// Drops expired backoffs and IDONTWANT entries for every connected
    /// peer. Called from the heartbeat.
    pub fn cleanup(&self, now: Instant) {
        let mut inner = self.lock();
        for peer in inner.peers.values_mut() {
            peer.cleanup_backoffs(now);
            peer.cleanup_dont_want(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Clock, SystemClock, TestClock};
    use std::time::Duration;

    fn peer(n: u8) -> PeerId {
        PeerId::new(vec![n])
    }

    fn manager_with_peer(id: u8, direction: Direction, now: Instant) -> PeerStateManager {
        let mgr = PeerStateManager::new();
        mgr.insert(PeerState::new(peer(id), ProtocolVersion::V1_1, direction, now));
        mgr
    }

    #[test]
    fn insert_remove_contains() {
        let clock = SystemClock;
        let mgr = manager_with_peer(1, Direction::Inbound, clock.now());
        assert!(mgr.contains(&peer(1)));
        mgr.remove(&peer(1));
        assert!(!mgr.contains(&peer(1)));
    }

    #[test]
    fn update_peer_is_copy_modify_store() {
        let clock = SystemClock;
        let mgr = manager_with_peer(1, Direction::Inbound, clock.now());
        let t = TopicHash::from_raw("a");
        mgr.update_peer(&peer(1), |p| {
            p.subscriptions.insert(t.clone());
        });
        assert!(mgr.get(&peer(1)).unwrap().subscriptions.contains(&t));
    }

    #[test]
    fn backoff_expires() {
        let clock = TestClock::new();
        let mgr = manager_with_peer(1, Direction::Inbound, clock.now());
        let t = TopicHash::from_raw("a");
        mgr.update_peer(&peer(1), |p| p.set_backoff(t.clone(), clock.now() + Duration::from_secs(60)));
        assert!(mgr.get(&peer(1)).unwrap().is_backed_off(&t, clock.now()));
        clock.advance(Duration::from_secs(61));
        assert!(!mgr.get(&peer(1)).unwrap().is_backed_off(&t, clock.now()));
    }

    #[test]
    fn dont_want_table_caps_at_10000() {
        let clock = SystemClock;
        let mut state = PeerState::new(peer(1), ProtocolVersion::V1_2, Direction::Inbound, clock.now());
        let expiry = clock.now() + Duration::from_secs(60);
        for i in 0..MAX_IDONTWANT_ENTRIES_PER_PEER + 10 {
            let id = MessageId::new((i as u32).to_be_bytes().to_vec());
            state.record_dont_want(id, expiry);
        }
        assert_eq!(state.dont_want.len(), MAX_IDONTWANT_ENTRIES_PER_PEER);
    }

    #[test]
    fn outbound_peers_subscribed_to_filters_direction() {
        let clock = SystemClock;
        let mgr = PeerStateManager::new();
        mgr.insert(PeerState::new(peer(1), ProtocolVersion::V1_1, Direction::Outbound, clock.now()));
        mgr.insert(PeerState::new(peer(2), ProtocolVersion::V1_1, Direction::Inbound, clock.now()));
        let t = TopicHash::from_raw("a");
        mgr.update_peer(&peer(1), |p| { p.subscriptions.insert(t.clone()); });
        mgr.update_peer(&peer(2), |p| { p.subscriptions.insert(t.clone()); });
        let outbound = mgr.outbound_peers_subscribed_to(&t);
        assert_eq!(outbound, vec![peer(1)]);
    }

    #[test]
    fn cleanup_drops_expired_backoffs_and_dont_wants() {
        let clock = TestClock::new();
        let mgr = manager_with_peer(1, Direction::Inbound, clock.now());
        let t = TopicHash::from_raw("a");
        mgr.update_peer(&peer(1), |p| {
            p.set_backoff(t.clone(), clock.now() + Duration::from_secs(10));
            p.record_dont_want(MessageId::new(vec![1]), clock.now() + Duration::from_secs(10));
        });
        clock.advance(Duration::from_secs(11));
        mgr.cleanup(clock.now());
        let state = mgr.get(&peer(1)).unwrap();
        assert!(!state.is_backed_off(&t, clock.now()));
        assert!(!state.has_dont_want(&MessageId::new(vec![1]), clock.now()));
    }
}
