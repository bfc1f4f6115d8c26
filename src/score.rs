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

//! Peer scoring: a global counter per peer plus four per-topic components
//! (P1 time-in-mesh, P2 first-message-deliveries, P3/P3b mesh-delivery
//! deficit and failure penalty, P4 invalid-message-deliveries), IP
//! colocation Sybil defense and IWANT promise-duplicate tracking.
//!
//! Every method here takes its own lock and releases it before calling back
//! into another component; nothing in this module ever holds two locks at
//! once (delivery-rate and IP-colocation penalties are computed from a
//! snapshot, then applied after the snapshot's lock is dropped).

use crate::config::{PeerScoreParams, TopicScoreParams};
use crate::peer_id::PeerId;
use crate::time::{Clock, Instant};
use crate::topic::TopicHash;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
#[cfg(test)]
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IwantOutcome {
    Accepted,
    Excessive(u32),
}

#[derive(Default, Clone, Copy)]
struct TopicCounters {
    mesh_joined_at: Option<Instant>,
    first_message_deliveries: f64,
    mesh_message_deliveries: f64,
    mesh_message_deliveries_active_since: Option<Instant>,
    mesh_failure_penalty: f64,
    invalid_message_deliveries: f64,
}

impl TopicCounters {
    fn score(&self, params: &TopicScoreParams, clock_now: Instant) -> f64 {
        let p1 = self
            .mesh_joined_at
            .map(|joined| {
                let quanta = clock_now.duration_since(joined).as_secs_f64()
                    / params.time_in_mesh_quantum.as_secs_f64().max(f64::EPSILON);
                quanta.min(params.time_in_mesh_cap) * params.time_in_mesh_weight
            })
            .unwrap_or(0.0);

        let p2 = self.first_message_deliveries.min(params.first_message_deliveries_cap)
            * params.first_message_deliveries_weight;

        let p3 = if self
            .mesh_message_deliveries_active_since
            .map_or(false, |since| clock_now.duration_since(since) >= params.mesh_message_deliveries_activation)
        {
            let deficit = (params.mesh_message_deliveries_threshold
                - self.mesh_message_deliveries.min(params.mesh_message_deliveries_cap))
            .max(0.0);
            deficit * deficit * params.mesh_message_deliveries_weight
        } else {
            0.0
        };

        let p3b = self.mesh_failure_penalty * params.mesh_failure_penalty_weight;

        let p4 = self.invalid_message_deliveries * self.invalid_message_deliveries * params.invalid_message_deliveries_weight;

        p1 + p2 + p3 + p3b + p4
    }

    fn decay(&mut self, params: &TopicScoreParams) {
        self.first_message_deliveries *= params.first_message_deliveries_decay;
        self.mesh_message_deliveries *= params.mesh_message_deliveries_decay;
        self.mesh_failure_penalty *= params.mesh_failure_penalty_decay;
        self.invalid_message_deliveries *= params.invalid_message_deliveries_decay;
    }

    fn is_negligible(&self) -> bool {
        self.first_message_deliveries.abs() < 0.001
            && self.mesh_message_deliveries.abs() < 0.001
            && self.mesh_failure_penalty.abs() < 0.001
            && self.invalid_message_deliveries.abs() < 0.001
            && self.mesh_joined_at.is_none()
    }
}

#[derive(Default)]
struct PeerRecord {
    global_score: f64,
    last_decay: Option<Instant>,
    topics: HashMap<TopicHash, TopicCounters>,
    protected: bool,
}

struct IwantTrack {
    count: u32,
    window_start: Instant,
}

struct ScoreState {
    peers: HashMap<PeerId, PeerRecord>,
    topic_weights: HashMap<TopicHash, TopicScoreParams>,
    iwant_tracking: HashMap<(PeerId, crate::message::MessageId), IwantTrack>,
    expected_deliveries: HashMap<PeerId, u64>,
    actual_deliveries: HashMap<PeerId, u64>,
    ip_registrations: HashMap<IpAddr, Vec<PeerId>>,
    peer_ips: HashMap<PeerId, IpAddr>,
}

/// Peer scorer for every connected peer.
pub struct PeerScorer {
    params: PeerScoreParams,
    default_topic_params: TopicScoreParams,
    state: Mutex<ScoreState>,
}

fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        other => other,
    }
}

impl PeerScorer {
    pub fn new(params: PeerScoreParams, default_topic_params: TopicScoreParams) -> Self {
        PeerScorer {
            params,
            default_topic_params,
            state: Mutex::new(ScoreState {
                peers: HashMap::new(),
                topic_weights: HashMap::new(),
                iwant_tracking: HashMap::new(),
                expected_deliveries: HashMap::new(),
                actual_deliveries: HashMap::new(),
                ip_registrations: HashMap::new(),
                peer_ips: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScoreState> {
        self.state.lock().expect("scorer lock poisoned")
    }

    pub fn set_topic_params(&self, topic: TopicHash, params: TopicScoreParams) {
        self.lock().topic_weights.insert(topic, params);
    }

    fn topic_params_for<'a>(state: &'a ScoreState, default: &'a TopicScoreParams, topic: &TopicHash) -> &'a TopicScoreParams {
        state.topic_weights.get(topic).unwrap_or(default)
    }

    pub fn add_peer(&self, peer: PeerId, protected: bool) {
        let mut state = self.lock();
        state.peers.entry(peer).or_default().protected = protected;
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        let mut state = self.lock();
        state.peers.remove(peer);
        state.expected_deliveries.remove(peer);
        state.actual_deliveries.remove(peer);
        state.iwant_tracking.retain(|(p, _), _| p != peer);
        if let Some(ip) = state.peer_ips.remove(peer) {
            if let Some(list) = state.ip_registrations.get_mut(&ip) {
                list.retain(|p| p != peer);
                if list.is_empty() {
                    state.ip_registrations.remove(&ip);
                }
            }
        }
    }

    /// Protected (direct) peers always score 0.0 from this path: they are
    /// never graylisted, pruned or penalized, and excluded from median
    /// computations by the caller.
    pub fn compute_score(&self, peer: &PeerId, now: Instant) -> f64 {
        let state = self.lock();
        let Some(record) = state.peers.get(peer) else {
            return 0.0;
        };
        if record.protected {
            return 0.0;
        }
        let mut total = record.global_score;
        for (topic, counters) in &record.topics {
            let params = Self::topic_params_for(&state, &self.default_topic_params, topic);
            total += params.topic_weight * counters.score(params, now);
        }
        total
    }

    pub fn is_graylisted(&self, peer: &PeerId, now: Instant) -> bool {
        self.compute_score(peer, now) < self.params.graylist_threshold
    }

    fn topic_mut<'a>(record: &'a mut PeerRecord, topic: &TopicHash) -> &'a mut TopicCounters {
        record.topics.entry(topic.clone()).or_default()
    }

    pub fn peer_joined_mesh(&self, peer: &PeerId, topic: &TopicHash, now: Instant) {
        let mut state = self.lock();
        if let Some(record) = state.peers.get_mut(peer) {
            let counters = Self::topic_mut(record, topic);
            counters.mesh_joined_at = Some(now);
            counters.mesh_message_deliveries_active_since = Some(now);
        }
    }

    /// On leaving the mesh while in deficit, accumulates `deficit^2` into the
    /// mesh-failure-penalty counter (P3b).
    pub fn peer_left_mesh(&self, peer: &PeerId, topic: &TopicHash, now: Instant) {
        let mut state = self.lock();
        let params = *Self::topic_params_for(&state, &self.default_topic_params, topic);
        if let Some(record) = state.peers.get_mut(peer) {
            let counters = Self::topic_mut(record, topic);
            let in_deficit = counters
                .mesh_message_deliveries_active_since
                .map_or(false, |since| now.duration_since(since) >= params.mesh_message_deliveries_activation)
                && counters.mesh_message_deliveries < params.mesh_message_deliveries_threshold;
            if in_deficit {
                let deficit = params.mesh_message_deliveries_threshold - counters.mesh_message_deliveries;
                counters.mesh_failure_penalty += deficit * deficit;
            }
            counters.mesh_joined_at = None;
            counters.mesh_message_deliveries_active_since = None;
        }
    }

    pub fn record_first_message_delivery(&self, peer: &PeerId, topic: &TopicHash) {
        let mut state = self.lock();
        let params = *Self::topic_params_for(&state, &self.default_topic_params, topic);
        if let Some(record) = state.peers.get_mut(peer) {
            let counters = Self::topic_mut(record, topic);
            counters.first_message_deliveries = (counters.first_message_deliveries + 1.0).min(params.first_message_deliveries_cap);
        }
    }

    pub fn record_mesh_message_delivery(&self, peer: &PeerId, topic: &TopicHash) {
        let mut state = self.lock();
        let params = *Self::topic_params_for(&state, &self.default_topic_params, topic);
        if let Some(record) = state.peers.get_mut(peer) {
            let counters = Self::topic_mut(record, topic);
            counters.mesh_message_deliveries = (counters.mesh_message_deliveries + 1.0).min(params.mesh_message_deliveries_cap);
        }
    }

    pub fn record_invalid_message(&self, peer: &PeerId, topic: &TopicHash) {
        let mut state = self.lock();
        if let Some(record) = state.peers.get_mut(peer) {
            let counters = Self::topic_mut(record, topic);
            counters.invalid_message_deliveries += 1.0;
        }
        let penalty = self.params.invalid_message_penalty;
        if let Some(record) = state.peers.get_mut(peer) {
            record.global_score += penalty;
        }
    }

    fn penalize(&self, peer: &PeerId, delta: f64) {
        let mut state = self.lock();
        if let Some(record) = state.peers.get_mut(peer) {
            if !record.protected {
                record.global_score += delta;
            }
        }
    }

    pub fn record_duplicate_message(&self, peer: &PeerId) {
        self.penalize(peer, self.params.duplicate_message_penalty);
    }

    pub fn record_graft_during_backoff(&self, peer: &PeerId) {
        self.penalize(peer, self.params.graft_backoff_penalty);
    }

    pub fn record_broken_promise(&self, peer: &PeerId, count: u32) {
        self.penalize(peer, self.params.broken_promise_penalty * count as f64);
    }

    pub fn record_excessive_iwant(&self, peer: &PeerId) {
        self.penalize(peer, self.params.excessive_iwant_penalty);
    }

    pub fn record_topic_mismatch(&self, peer: &PeerId) {
        self.penalize(peer, self.params.topic_mismatch_penalty);
    }

    /// Tracks an IWANT request for `(peer, id)`; once the peer asks for the
    /// same id `iwant_duplicate_threshold` or more times within the tracking
    /// window, further requests are reported `Excessive`. The window resets
    /// once it expires.
    pub fn track_iwant_request(&self, peer: &PeerId, id: crate::message::MessageId, now: Instant) -> IwantOutcome {
        let mut state = self.lock();
        let key = (peer.clone(), id);
        let window = self.params.iwant_tracking_window;
        let threshold = self.params.iwant_duplicate_threshold;
        let track = state.iwant_tracking.entry(key).or_insert(IwantTrack {
            count: 0,
            window_start: now,
        });
        if now.duration_since(track.window_start) >= window {
            track.count = 0;
            track.window_start = now;
        }
        track.count += 1;
        if track.count >= threshold {
            IwantOutcome::Excessive(track.count)
        } else {
            IwantOutcome::Accepted
        }
    }

    pub fn record_expected_message(&self, peer: &PeerId) {
        let mut state = self.lock();
        *state.expected_deliveries.entry(peer.clone()).or_insert(0) += 1;
    }

    pub fn record_message_delivery(&self, peer: &PeerId) {
        let mut state = self.lock();
        *state.actual_deliveries.entry(peer.clone()).or_insert(0) += 1;
    }

    /// Computes delivery-rate deficits from a snapshot, then applies
    /// penalties after releasing the tracking lock.
    pub fn apply_delivery_rate_penalties(&self) {
        let deficits: Vec<(PeerId, f64)> = {
            let mut state = self.lock();
            let min_rate = self.params.min_delivery_rate;
            let result = state
                .expected_deliveries
                .iter()
                .filter_map(|(peer, &expected)| {
                    if expected == 0 {
                        return None;
                    }
                    let delivered = *state.actual_deliveries.get(peer).unwrap_or(&0);
                    let rate = delivered as f64 / expected as f64;
                    if rate < min_rate {
                        Some((peer.clone(), min_rate - rate))
                    } else {
                        None
                    }
                })
                .collect();
            state.expected_deliveries.clear();
            state.actual_deliveries.clear();
            result
        };
        for (peer, deficit) in deficits {
            self.penalize(&peer, self.params.low_delivery_penalty * deficit);
        }
    }

    /// Number of peers currently registered on `ip` (after normalization).
    pub fn ip_peer_count(&self, ip: IpAddr) -> usize {
        let ip = normalize_ip(ip);
        self.lock().ip_registrations.get(&ip).map_or(0, Vec::len)
    }

    /// Drops every peer record and tracking table. Used by router shutdown.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.peers.clear();
        state.iwant_tracking.clear();
        state.expected_deliveries.clear();
        state.actual_deliveries.clear();
        state.ip_registrations.clear();
        state.peer_ips.clear();
    }

    /// Registers `peer`'s address for IP-colocation tracking, normalizing
    /// IPv4-mapped-IPv6 addresses. Penalizes every peer on an IP once its
    /// peer count exceeds the configured threshold.
    pub fn register_peer_ip(&self, peer: &PeerId, ip: IpAddr) {
        let ip = normalize_ip(ip);
        let offenders: Vec<PeerId> = {
            let mut state = self.lock();
            state.peer_ips.insert(peer.clone(), ip);
            let list = state.ip_registrations.entry(ip).or_default();
            if !list.contains(peer) {
                list.push(peer.clone());
            }
            let threshold = self.params.ip_colocation_threshold;
            if list.len() > threshold {
                list.clone()
            } else {
                Vec::new()
            }
        };
        if offenders.is_empty() {
            return;
        }
        let excess = (offenders.len() - self.params.ip_colocation_threshold) as f64;
        for peer in &offenders {
            self.penalize(peer, self.params.ip_colocation_penalty * excess);
        }
    }

    /// Decays global and per-topic counters for every peer whose last decay
    /// was at least `decay_interval` ago; drops topic entries that have
    /// decayed to negligible.
    pub fn apply_decay_to_all(&self, clock: &dyn Clock) {
        let now = clock.now();
        let mut state = self.lock();
        let decay_interval = self.params.decay_interval;
        let decay_factor = self.params.global_decay_factor;
        let decay_to_zero = self.params.decay_to_zero;
        let default_topic_params = self.default_topic_params;
        let topic_weights = state.topic_weights.clone();

        for record in state.peers.values_mut() {
            let due = record.last_decay.map_or(true, |last| now.duration_since(last) >= decay_interval);
            if !due {
                continue;
            }
            let elapsed = record.last_decay.map_or(decay_interval, |last| now.duration_since(last));
            let k = (elapsed.as_secs_f64() / decay_interval.as_secs_f64().max(f64::EPSILON)).floor().max(1.0);
            record.global_score *= decay_factor.powf(k);
            if record.global_score.abs() < decay_to_zero {
                record.global_score = 0.0;
            }
            record.last_decay = Some(now);

            record.topics.retain(|topic, counters| {
                let params = topic_weights.get(topic).unwrap_or(&default_topic_params);
                counters.decay(params);
                !counters.is_negligible()
            });
        }
    }

    pub fn sort_by_score(&self, peers: &mut [PeerId], now: Instant) {
        let scores: HashMap<PeerId, f64> = peers.iter().map(|p| (p.clone(), self.compute_score(p, now))).collect();
        peers.sort_by(|a, b| scores[b].partial_cmp(&scores[a]).unwrap_or(std::cmp::Ordering::Equal));
    }

    pub fn filter_graylisted(&self, peers: &[PeerId], now: Instant) -> Vec<PeerId> {
        peers.iter().filter(|p| !self.is_graylisted(p, now)).cloned().collect()
    }

    pub fn select_best_peers(&self, peers: &[PeerId], count: usize, now: Instant) -> Vec<PeerId> {
        let mut sorted = peers.to_vec();
        self.sort_by_score(&mut sorted, now);
        sorted.truncate(count);
        sorted
    }

    /// Median score over the given peers, excluding protected ones, as
    /// required for opportunistic-graft and mesh-median computations.
    pub fn median_score(&self, peers: &[PeerId], now: Instant) -> f64 {
        let state = self.lock();
        let mut scores: Vec<f64> = peers
            .iter()
            .filter(|p| !state.peers.get(*p).map_or(false, |r| r.protected))
            .map(|p| {
                drop_guard_free_score(&state, &self.default_topic_params, p, now)
            })
            .collect();
        drop(state);
        if scores.is_empty() {
            return 0.0;
        }
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = scores.len() / 2;
        if scores.len() % 2 == 0 {
            (scores[mid - 1] + scores[mid]) / 2.0
        } else {
            scores[mid]
        }
    }
}

fn drop_guard_free_score(state: &ScoreState, default: &TopicScoreParams, peer: &PeerId, now: Instant) -> f64 {
    let Some(record) = state.peers.get(peer) else {
        return 0.0;
    };
    if record.protected {
        return 0.0;
    }
    let mut total = record.global_score;
    for (topic, counters) in &record.topics {
        let params = state.topic_weights.get(topic).unwrap_or(default);
        total += params.topic_weight * counters.score(params, now);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TestClock;

    fn peer(n: u8) -> PeerId {
        PeerId::new(vec![n])
    }

    fn scorer() -> PeerScorer {
        PeerScorer::new(PeerScoreParams::default(), TopicScoreParams::default())
    }

    #[test]
    fn unknown_peer_scores_zero() {
        let s = scorer();
        let clock = TestClock::new();
        assert_eq!(s.compute_score(&peer(1), clock.now()), 0.0);
    }

    #[test]
    fn protected_peer_always_scores_zero() {
        let s = scorer();
        let clock = TestClock::new();
        s.add_peer(peer(1), true);
        s.record_graft_during_backoff(&peer(1));
        assert_eq!(s.compute_score(&peer(1), clock.now()), 0.0);
    }

    #[test]
    fn penalties_lower_global_score() {
        let s = scorer();
        let clock = TestClock::new();
        s.add_peer(peer(1), false);
        s.record_duplicate_message(&peer(1));
        assert!(s.compute_score(&peer(1), clock.now()) < 0.0);
    }

    #[test]
    fn graylist_threshold() {
        let s = scorer();
        let clock = TestClock::new();
        s.add_peer(peer(1), false);
        for _ in 0..20 {
            s.record_invalid_message(&peer(1), &TopicHash::from_raw("t"));
        }
        assert!(s.is_graylisted(&peer(1), clock.now()));
    }

    #[test]
    fn time_in_mesh_bonus_grows_and_caps() {
        let s = scorer();
        let clock = TestClock::new();
        let t = TopicHash::from_raw("a");
        s.add_peer(peer(1), false);
        s.peer_joined_mesh(&peer(1), &t, clock.now());
        clock.advance(Duration::from_secs(3));
        let score_early = s.compute_score(&peer(1), clock.now());
        clock.advance(Duration::from_secs(100));
        let score_capped = s.compute_score(&peer(1), clock.now());
        assert!(score_early > 0.0);
        assert!(score_capped >= score_early);
    }

    #[test]
    fn iwant_tracking_flags_excessive_duplicates() {
        let s = scorer();
        let clock = TestClock::new();
        let id = crate::message::MessageId::new(vec![1]);
        assert_eq!(s.track_iwant_request(&peer(1), id.clone(), clock.now()), IwantOutcome::Accepted);
        assert_eq!(s.track_iwant_request(&peer(1), id.clone(), clock.now()), IwantOutcome::Accepted);
        assert_eq!(
            s.track_iwant_request(&peer(1), id, clock.now()),
            IwantOutcome::Excessive(3)
        );
    }

    #[test]
    fn iwant_tracking_window_resets() {
        let s = scorer();
        let clock = TestClock::new();
        let id = crate::message::MessageId::new(vec![1]);
        s.track_iwant_request(&peer(1), id.clone(), clock.now());
        s.track_iwant_request(&peer(1), id.clone(), clock.now());
        clock.advance(Duration::from_secs(11));
        assert_eq!(s.track_iwant_request(&peer(1), id, clock.now()), IwantOutcome::Accepted);
    }

    #[test]
    fn ip_colocation_penalizes_beyond_threshold() {
        let s = scorer();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        for i in 1..=5u8 {
            s.add_peer(peer(i), false);
            s.register_peer_ip(&peer(i), ip);
        }
        let clock = TestClock::new();
        assert!(s.compute_score(&peer(5), clock.now()) < 0.0);
    }

    #[test]
    fn ipv4_mapped_ipv6_normalizes_to_ipv4() {
        let s = scorer();
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let mapped: IpAddr = "::ffff:10.0.0.1".parse().unwrap();
        for i in 1..=4u8 {
            s.add_peer(peer(i), false);
            s.register_peer_ip(&peer(i), if i % 2 == 0 { v4 } else { mapped });
        }
        let clock = TestClock::new();
        assert!(s.compute_score(&peer(4), clock.now()) < 0.0);
    }

    #[test]
    fn delivery_rate_penalty_applies_below_threshold() {
        let s = scorer();
        s.add_peer(peer(1), false);
        for _ in 0..10 {
            s.record_expected_message(&peer(1));
        }
        s.record_message_delivery(&peer(1));
        s.apply_delivery_rate_penalties();
        let clock = TestClock::new();
        assert!(s.compute_score(&peer(1), clock.now()) < 0.0);
    }

    #[test]
    fn decay_reduces_penalty_over_time() {
        let s = scorer();
        let clock = TestClock::new();
        s.add_peer(peer(1), false);
        s.record_duplicate_message(&peer(1));
        let before = s.compute_score(&peer(1), clock.now());
        clock.advance(Duration::from_secs(5));
        s.apply_decay_to_all(&clock);
        let after = s.compute_score(&peer(1), clock.now());
        assert!(after > before);
    }

    #[test]
    fn median_score_excludes_protected_peers() {
        let s = scorer();
        let clock = TestClock::new();
        s.add_peer(peer(1), false);
        s.add_peer(peer(2), true);
        s.record_duplicate_message(&peer(2));
        let median = s.median_score(&[peer(1), peer(2)], clock.now());
        assert_eq!(median, 0.0);
    }

    #[test]
    fn mesh_failure_penalty_recorded_on_deficit_leave() {
        let s = scorer();
        let clock = TestClock::new();
        let t = TopicHash::from_raw("a");
        s.add_peer(peer(1), false);
        s.peer_joined_mesh(&peer(1), &t, clock.now());
        clock.advance(Duration::from_secs(10));
        s.peer_left_mesh(&peer(1), &t, clock.now());
        assert!(s.compute_score(&peer(1), clock.now()) < 0.0);
    }
}
