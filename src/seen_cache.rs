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

//! Bounded LRU + TTL cache of delivered message ids, used purely for dedup.
//!
//! Membership here means "do not redeliver locally" (invariant 5); it says
//! nothing about whether we can still serve an IWANT for the id — that is
//! [`crate::mcache::MessageCache`]'s job.

use crate::message::MessageId;
use crate::time::{Clock, Instant};
use fnv::FnvHashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

struct Entry {
    expires_at: Instant,
}

struct Inner {
    entries: FnvHashMap<MessageId, Entry>,
    order: VecDeque<MessageId>,
}

/// A bounded, TTL-expiring set of message ids.
pub struct SeenCache {
    max_size: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl SeenCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        SeenCache {
            max_size,
            ttl,
            inner: Mutex::new(Inner {
                entries: FnvHashMap::default(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Inserts `id`. Returns `true` if this is the first time we've seen it
    /// (or it had already expired), `false` if it is a live duplicate.
    pub fn add(&self, id: MessageId, clock: &dyn Clock) -> bool {
        let now = clock.now();
        let mut inner = self.inner.lock().expect("seen cache lock poisoned");

        if let Some(entry) = inner.entries.get(&id) {
            if entry.expires_at > now {
                return false;
            }
        }

        inner.entries.insert(
            id.clone(),
            Entry {
                expires_at: now + self.ttl,
            },
        );
        inner.order.push_back(id);

        while inner.order.len() > self.max_size {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
        true
    }

    /// Whether `id` is present and not expired.
    pub fn contains(&self, id: &MessageId, clock: &dyn Clock) -> bool {
        let now = clock.now();
        let inner = self.inner.lock().expect("seen cache lock poisoned");
        inner
            .entries
            .get(id)
            .map_or(false, |entry| entry.expires_at > now)
    }

    /// Drops every expired entry. Called from the heartbeat.
    pub fn cleanup(&self, clock: &dyn Clock) {
        let now = clock.now();
        let mut inner = self.inner.lock().expect("seen cache lock poisoned");
        inner.entries.retain(|_, entry| entry.expires_at > now);
        let live: std::collections::HashSet<_> = inner.entries.keys().cloned().collect();
        inner.order.retain(|id| live.contains(id));
    }

    /// Drops every entry. Used by router shutdown.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("seen cache lock poisoned");
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("seen cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TestClock;

    #[test]
    fn first_insert_is_new_second_is_duplicate() {
        let cache = SeenCache::new(100, Duration::from_secs(60));
        let clock = TestClock::new();
        let id = MessageId::new(vec![1]);
        assert!(cache.add(id.clone(), &clock));
        assert!(!cache.add(id, &clock));
    }

    #[test]
    fn expired_entries_are_treated_as_new() {
        let cache = SeenCache::new(100, Duration::from_secs(10));
        let clock = TestClock::new();
        let id = MessageId::new(vec![1]);
        assert!(cache.add(id.clone(), &clock));
        clock.advance(Duration::from_secs(11));
        assert!(!cache.contains(&id, &clock));
        assert!(cache.add(id, &clock));
    }

    #[test]
    fn evicts_oldest_when_over_capacity() {
        let cache = SeenCache::new(2, Duration::from_secs(600));
        let clock = TestClock::new();
        cache.add(MessageId::new(vec![1]), &clock);
        cache.add(MessageId::new(vec![2]), &clock);
        cache.add(MessageId::new(vec![3]), &clock);
        assert!(!cache.contains(&MessageId::new(vec![1]), &clock));
        assert!(cache.contains(&MessageId::new(vec![3]), &clock));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn cleanup_drops_expired() {
        let cache = SeenCache::new(100, Duration::from_secs(5));
        let clock = TestClock::new();
        cache.add(MessageId::new(vec![1]), &clock);
        clock.advance(Duration::from_secs(6));
        cache.cleanup(&clock);
        assert_eq!(cache.len(), 0);
    }
}
