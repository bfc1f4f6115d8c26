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

//! Per-topic mesh and fanout membership, and the local subscription
//! registry. A single lock covers all of it so every operation here is
//! atomic with respect to the others (spec §4.4, §5).

use crate::peer_id::PeerId;
use crate::time::{Clock, Instant};
use crate::topic::TopicHash;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// Outcome of [`MeshState::try_subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Success,
    AlreadySubscribed,
    LimitReached(usize),
}

#[derive(Default)]
struct TopicMesh {
    mesh_peers: HashSet<PeerId>,
    fanout_peers: HashSet<PeerId>,
    last_published_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    subscriptions: HashSet<TopicHash>,
    topics: HashMap<TopicHash, TopicMesh>,
}

impl Inner {
    fn topic_mut(&mut self, topic: &TopicHash) -> &mut TopicMesh {
        self.topics.entry(topic.clone()).or_default()
    }
}

/// Mesh/fanout state for every topic, behind one mutex.
pub struct MeshState {
    inner: Mutex<Inner>,
}

impl Default for MeshState {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshState {
    pub fn new() -> Self {
        MeshState {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mesh state lock poisoned")
    }

    pub fn try_subscribe(&self, topic: &TopicHash, max_subscriptions: usize) -> SubscribeOutcome {
        let mut inner = self.lock();
        if inner.subscriptions.contains(topic) {
            return SubscribeOutcome::AlreadySubscribed;
        }
        if inner.subscriptions.len() >= max_subscriptions {
            return SubscribeOutcome::LimitReached(max_subscriptions);
        }
        inner.subscriptions.insert(topic.clone());
        SubscribeOutcome::Success
    }

    pub fn is_subscribed(&self, topic: &TopicHash) -> bool {
        self.lock().subscriptions.contains(topic)
    }

    pub fn subscriptions(&self) -> Vec<TopicHash> {
        self.lock().subscriptions.iter().cloned().collect()
    }

    /// Clears mesh membership for `topic` and returns the mesh set that was
    /// there (for the caller to send PRUNE to). Fanout and last-published
    /// state are retained for a possible future publish.
    pub fn unsubscribe(&self, topic: &TopicHash) -> HashSet<PeerId> {
        let mut inner = self.lock();
        inner.subscriptions.remove(topic);
        match inner.topics.get_mut(topic) {
            Some(mesh) => std::mem::take(&mut mesh.mesh_peers),
            None => HashSet::new(),
        }
    }

    pub fn add_to_mesh(&self, topic: &TopicHash, peer: PeerId) {
        let mut inner = self.lock();
        let mesh = inner.topic_mut(topic);
        mesh.fanout_peers.remove(&peer);
        mesh.mesh_peers.insert(peer);
    }

    pub fn remove_from_mesh(&self, topic: &TopicHash, peer: &PeerId) {
        if let Some(mesh) = self.lock().topics.get_mut(topic) {
            mesh.mesh_peers.remove(peer);
        }
    }

    pub fn is_in_mesh(&self, topic: &TopicHash, peer: &PeerId) -> bool {
        self.lock()
            .topics
            .get(topic)
            .map_or(false, |m| m.mesh_peers.contains(peer))
    }

    pub fn mesh_peers(&self, topic: &TopicHash) -> HashSet<PeerId> {
        self.lock()
            .topics
            .get(topic)
            .map(|m| m.mesh_peers.clone())
            .unwrap_or_default()
    }

    pub fn mesh_peer_count(&self, topic: &TopicHash) -> usize {
        self.lock().topics.get(topic).map_or(0, |m| m.mesh_peers.len())
    }

    pub fn touch_fanout(&self, topic: &TopicHash, peer: PeerId, clock: &dyn Clock) {
        let mut inner = self.lock();
        let mesh = inner.topic_mut(topic);
        if !mesh.mesh_peers.contains(&peer) {
            mesh.fanout_peers.insert(peer);
        }
        mesh.last_published_at = Some(clock.now());
    }

    /// Records a publish to `topic` without necessarily adding a peer (used
    /// when flood-publishing through the mesh rather than fanout).
    pub fn record_publish(&self, topic: &TopicHash, clock: &dyn Clock) {
        let mut inner = self.lock();
        inner.topic_mut(topic).last_published_at = Some(clock.now());
    }

    pub fn fanout_peers(&self, topic: &TopicHash) -> HashSet<PeerId> {
        self.lock()
            .topics
            .get(topic)
            .map(|m| m.fanout_peers.clone())
            .unwrap_or_default()
    }

    /// Drops fanout for topics we are not subscribed to whose last publish
    /// is older than `ttl`.
    pub fn cleanup_fanout(&self, ttl: Duration, clock: &dyn Clock) {
        let now = clock.now();
        let mut inner = self.lock();
        let subscribed = inner.subscriptions.clone();
        for (topic, mesh) in inner.topics.iter_mut() {
            if subscribed.contains(topic) {
                continue;
            }
            let expired = mesh
                .last_published_at
                .map_or(false, |t| now.duration_since(t) > ttl);
            if expired {
                mesh.fanout_peers.clear();
            }
        }
    }

    /// Drops all mesh/fanout/subscription state. Used by router shutdown.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.subscriptions.clear();
        inner.topics.clear();
    }

    pub fn remove_peer_from_all(&self, peer: &PeerId) {
        let mut inner = self.lock();
        for mesh in inner.topics.values_mut() {
            mesh.mesh_peers.remove(peer);
            mesh.fanout_peers.remove(peer);
        }
    }

    /// Chooses which mesh peers to prune down to `target_count`: inbound
    /// peers first, then outbound peers only beyond `protect_outbound`.
    /// Random within each category.
    pub fn select_peers_for_prune(
        &self,
        topic: &TopicHash,
        target_count: usize,
        protect_outbound: usize,
        outbound_peers: &HashSet<PeerId>,
    ) -> Vec<PeerId> {
        let mesh = self.mesh_peers(topic);
        if mesh.len() <= target_count {
            return Vec::new();
        }
        let mut inbound: Vec<PeerId> = mesh.iter().filter(|p| !outbound_peers.contains(*p)).cloned().collect();
        let mut outbound: Vec<PeerId> = mesh.iter().filter(|p| outbound_peers.contains(*p)).cloned().collect();

        let mut rng = rand::thread_rng();
        inbound.shuffle(&mut rng);
        outbound.shuffle(&mut rng);

        let to_remove = mesh.len() - target_count;
        let mut victims = Vec::with_capacity(to_remove);

        while victims.len() < to_remove && !inbound.is_empty() {
            victims.push(inbound.pop().unwrap());
        }
        while victims.len() < to_remove && outbound.len() > protect_outbound {
            victims.push(outbound.pop().unwrap());
        }
        victims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemClock;

    fn topic(name: &str) -> TopicHash {
        TopicHash::from_raw(name)
    }

    fn peer(n: u8) -> PeerId {
        PeerId::new(vec![n])
    }

    #[test]
    fn try_subscribe_is_atomic() {
        let mesh = MeshState::new();
        let t = topic("a");
        assert_eq!(mesh.try_subscribe(&t, 10), SubscribeOutcome::Success);
        assert_eq!(mesh.try_subscribe(&t, 10), SubscribeOutcome::AlreadySubscribed);
    }

    #[test]
    fn try_subscribe_enforces_limit() {
        let mesh = MeshState::new();
        assert_eq!(mesh.try_subscribe(&topic("a"), 1), SubscribeOutcome::Success);
        assert_eq!(
            mesh.try_subscribe(&topic("b"), 1),
            SubscribeOutcome::LimitReached(1)
        );
    }

    #[test]
    fn mesh_and_fanout_are_mutually_exclusive() {
        let mesh = MeshState::new();
        let t = topic("a");
        let clock = SystemClock;
        mesh.touch_fanout(&t, peer(1), &clock);
        assert!(mesh.fanout_peers(&t).contains(&peer(1)));
        mesh.add_to_mesh(&t, peer(1));
        assert!(mesh.is_in_mesh(&t, &peer(1)));
        assert!(!mesh.fanout_peers(&t).contains(&peer(1)));
    }

    #[test]
    fn unsubscribe_returns_mesh_and_clears_it() {
        let mesh = MeshState::new();
        let t = topic("a");
        mesh.try_subscribe(&t, 10);
        mesh.add_to_mesh(&t, peer(1));
        mesh.add_to_mesh(&t, peer(2));
        let returned = mesh.unsubscribe(&t);
        assert_eq!(returned.len(), 2);
        assert_eq!(mesh.mesh_peer_count(&t), 0);
        assert!(!mesh.is_subscribed(&t));
    }

    #[test]
    fn select_for_prune_protects_outbound_quota() {
        let mesh = MeshState::new();
        let t = topic("a");
        for p in 1..=6u8 {
            mesh.add_to_mesh(&t, peer(p));
        }
        let outbound: HashSet<PeerId> = [peer(5), peer(6)].into_iter().collect();
        let victims = mesh.select_peers_for_prune(&t, 4, 2, &outbound);
        assert_eq!(victims.len(), 2);
        // both protected outbound peers must survive
        assert!(!victims.contains(&peer(5)));
        assert!(!victims.contains(&peer(6)));
    }

    #[test]
    fn remove_peer_from_all_clears_every_topic() {
        let mesh = MeshState::new();
        mesh.add_to_mesh(&topic("a"), peer(1));
        mesh.add_to_mesh(&topic("b"), peer(1));
        mesh.remove_peer_from_all(&peer(1));
        assert!(!mesh.is_in_mesh(&topic("a"), &peer(1)));
        assert!(!mesh.is_in_mesh(&topic("b"), &peer(1)));
    }
}
