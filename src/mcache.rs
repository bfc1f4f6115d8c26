// Copyright 2018 Parity Technologies (UK) Ltd.
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

//! Sliding window cache of recently-seen messages, used to serve IWANT
//! replays and to build IHAVE gossip.
//!
//! The cache is a fixed ring of `history_length` buckets; bucket 0 is always
//! "this heartbeat". [`MessageCache::shift`] rotates the ring once per
//! heartbeat, discarding the oldest bucket and its messages.

use crate::message::{GossipsubMessage, MessageId};
use crate::topic::TopicHash;
use fnv::FnvHashMap;
use std::collections::VecDeque;

pub struct MessageCache {
    history_gossip: usize,
    history: VecDeque<Vec<MessageId>>,
    messages: FnvHashMap<MessageId, GossipsubMessage>,
}

impl MessageCache {
    /// `history_length` total buckets, of which the first `history_gossip`
    /// are eligible for IHAVE gossip. Invariant: `history_gossip <=
    /// history_length`.
    pub fn new(history_length: usize, history_gossip: usize) -> Self {
        assert!(history_gossip <= history_length);
        let mut history = VecDeque::with_capacity(history_length);
        for _ in 0..history_length {
            history.push_back(Vec::new());
        }
        MessageCache {
            history_gossip,
            history,
            messages: FnvHashMap::default(),
        }
    }

    /// Inserts `msg` into bucket 0, unless it is already cached.
    pub fn put(&mut self, msg: GossipsubMessage) {
        if self.messages.contains_key(&msg.id) {
            return;
        }
        self.history[0].push(msg.id.clone());
        self.messages.insert(msg.id.clone(), msg);
    }

    pub fn get(&self, id: &MessageId) -> Option<&GossipsubMessage> {
        self.messages.get(id)
    }

    pub fn get_multiple<'a>(
        &'a self,
        ids: impl IntoIterator<Item = &'a MessageId>,
    ) -> Vec<&'a GossipsubMessage> {
        ids.into_iter().filter_map(|id| self.messages.get(id)).collect()
    }

    /// Ids in the first `history_gossip` buckets whose stored message's topic
    /// matches `topic`.
    pub fn get_gossip_ids(&self, topic: &TopicHash) -> Vec<MessageId> {
        self.history
            .iter()
            .take(self.history_gossip)
            .flat_map(|bucket| bucket.iter())
            .filter(|id| {
                self.messages
                    .get(id)
                    .map_or(false, |m| &m.topic == topic)
            })
            .cloned()
            .collect()
    }

    /// Rotates the ring: drops the oldest bucket (and its messages), prepends
    /// a fresh empty bucket. Total bucket count is preserved.
    pub fn shift(&mut self) {
        if let Some(oldest) = self.history.pop_back() {
            for id in &oldest {
                self.messages.remove(id);
            }
        }
        self.history.push_front(Vec::new());
    }

    /// Drops every cached message and bucket contents. Used by router
    /// shutdown.
    pub fn clear(&mut self) {
        self.messages.clear();
        for bucket in self.history.iter_mut() {
            bucket.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_id::PeerId;

    fn msg(id: u8, topic: &str) -> GossipsubMessage {
        GossipsubMessage {
            id: MessageId::new(vec![id]),
            source: Some(PeerId::new(vec![0])),
            sequence_number: Some(vec![id]),
            topic: TopicHash::from_raw(topic),
            data: vec![id],
            signature: None,
            key: None,
        }
    }

    #[test]
    fn put_then_get() {
        let mut cache = MessageCache::new(5, 3);
        cache.put(msg(1, "t"));
        assert!(cache.get(&MessageId::new(vec![1])).is_some());
        assert!(cache.get(&MessageId::new(vec![2])).is_none());
    }

    #[test]
    fn duplicate_put_is_ignored() {
        let mut cache = MessageCache::new(5, 3);
        cache.put(msg(1, "t"));
        cache.put(msg(1, "t"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn gossip_ids_respect_window_and_topic() {
        let mut cache = MessageCache::new(3, 2);
        cache.put(msg(1, "a"));
        cache.put(msg(2, "b"));
        cache.shift();
        cache.put(msg(3, "a"));
        // bucket 0 = {3}, bucket 1 = {1, 2}, bucket 2 = {} (gossip window = 2)
        let mut ids = cache.get_gossip_ids(&TopicHash::from_raw("a"));
        ids.sort();
        assert_eq!(ids, vec![MessageId::new(vec![1]), MessageId::new(vec![3])]);
    }

    #[test]
    fn shift_evicts_oldest_bucket() {
        let mut cache = MessageCache::new(2, 2);
        cache.put(msg(1, "t"));
        cache.shift();
        cache.put(msg(2, "t"));
        cache.shift();
        // after two shifts the bucket holding id 1 should be gone
        assert!(cache.get(&MessageId::new(vec![1])).is_none());
        assert!(cache.get(&MessageId::new(vec![2])).is_some());
    }

    #[test]
    fn get_multiple_skips_absent_ids() {
        let mut cache = MessageCache::new(5, 3);
        cache.put(msg(1, "t"));
        let ids = [MessageId::new(vec![1]), MessageId::new(vec![99])];
        let found = cache.get_multiple(&ids);
        assert_eq!(found.len(), 1);
    }

    #[cfg(test)]
    mod quickcheck_props {
        use super::*;
        use quickcheck::quickcheck;

        quickcheck! {
            fn put_then_get_round_trips(id: u8, topic: String, data: Vec<u8>) -> bool {
                let mut cache = MessageCache::new(5, 3);
                let message = GossipsubMessage {
                    id: MessageId::new(vec![id]),
                    source: Some(PeerId::new(vec![0])),
                    sequence_number: Some(vec![id]),
                    topic: TopicHash::from_raw(topic),
                    data,
                    signature: None,
                    key: None,
                };
                cache.put(message.clone());
                cache.get(&message.id) == Some(&message)
            }
        }
    }
}
