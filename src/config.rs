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

//! Router tuning knobs.
//!
//! [`Config`] groups every option named in the specification's
//! configuration table; [`ConfigBuilder`] mirrors the teacher's
//! `GossipsubConfigBuilder` pattern of chained `&mut self -> &mut Self`
//! setters with a final `build()`.

use crate::message::{GossipsubMessage, MessageId};
use std::sync::Arc;
use std::time::Duration;

/// How strictly an inbound message's authenticity fields are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Require source, non-empty seqno and a valid signature.
    Strict,
    /// A present signature must verify; an absent one is accepted.
    Permissive,
    /// Source/seqno/signature must all be absent.
    Anonymous,
    /// Skip authenticity checks entirely.
    None,
}

/// How messages this node publishes are authenticated.
#[derive(Clone)]
pub enum MessageAuthenticity {
    /// Sign every message with the given identity; requires `signing_key`.
    Signed,
    /// Attach our `PeerId` and a random sequence number, unsigned.
    Author,
    /// No source, no seqno, no signature; requires a custom message-id fn.
    Anonymous,
}

/// A custom message-id function, boxed for storage in [`Config`].
pub type MessageIdFn = Arc<dyn Fn(&GossipsubMessage) -> MessageId + Send + Sync>;

/// Protocol version a peer negotiated, in increasing order of capability.
/// `floodsub < V1_0 < V1_1 < V1_2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    Floodsub,
    V1_0,
    V1_1,
    V1_2,
}

impl ProtocolVersion {
    pub fn supports_idontwant(self) -> bool {
        self >= ProtocolVersion::V1_2
    }

    pub fn is_floodsub(self) -> bool {
        self == ProtocolVersion::Floodsub
    }
}

/// Direction a connection to a peer was established in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Per-topic score weights and decay factors (spec §4.6).
#[derive(Debug, Clone, Copy)]
pub struct TopicScoreParams {
    pub topic_weight: f64,
    pub time_in_mesh_weight: f64,
    pub time_in_mesh_cap: f64,
    pub time_in_mesh_quantum: Duration,
    pub first_message_deliveries_weight: f64,
    pub first_message_deliveries_cap: f64,
    pub first_message_deliveries_decay: f64,
    pub mesh_message_deliveries_weight: f64,
    pub mesh_message_deliveries_decay: f64,
    pub mesh_message_deliveries_threshold: f64,
    pub mesh_message_deliveries_cap: f64,
    pub mesh_message_deliveries_activation: Duration,
    pub mesh_failure_penalty_weight: f64,
    pub mesh_failure_penalty_decay: f64,
    pub invalid_message_deliveries_weight: f64,
    pub invalid_message_deliveries_decay: f64,
}

impl Default for TopicScoreParams {
    fn default() -> Self {
        TopicScoreParams {
            topic_weight: 1.0,
            time_in_mesh_weight: 0.01,
            time_in_mesh_cap: 10.0,
            time_in_mesh_quantum: Duration::from_secs(1),
            first_message_deliveries_weight: 1.0,
            first_message_deliveries_cap: 10.0,
            first_message_deliveries_decay: 0.5,
            mesh_message_deliveries_weight: -1.0,
            mesh_message_deliveries_decay: 0.5,
            mesh_message_deliveries_threshold: 1.0,
            mesh_message_deliveries_cap: 10.0,
            mesh_message_deliveries_activation: Duration::from_secs(5),
            mesh_failure_penalty_weight: -1.0,
            mesh_failure_penalty_decay: 0.5,
            invalid_message_deliveries_weight: -1.0,
            invalid_message_deliveries_decay: 0.3,
        }
    }
}

/// Global scorer parameters, the decay/threshold knobs of spec §4.6/§6.
#[derive(Debug, Clone, Copy)]
pub struct PeerScoreParams {
    pub decay_interval: Duration,
    pub decay_to_zero: f64,
    pub graylist_threshold: f64,
    pub accept_px_threshold: f64,
    pub opportunistic_graft_threshold: f64,
    pub ip_colocation_threshold: usize,
    pub ip_colocation_penalty: f64,
    pub graft_backoff_penalty: f64,
    pub duplicate_message_penalty: f64,
    pub invalid_message_penalty: f64,
    pub broken_promise_penalty: f64,
    pub excessive_iwant_penalty: f64,
    pub topic_mismatch_penalty: f64,
    pub global_decay_factor: f64,
    pub iwant_tracking_window: Duration,
    pub iwant_duplicate_threshold: u32,
    pub min_delivery_rate: f64,
    pub low_delivery_penalty: f64,
}

impl Default for PeerScoreParams {
    fn default() -> Self {
        PeerScoreParams {
            decay_interval: Duration::from_secs(1),
            decay_to_zero: 0.001,
            graylist_threshold: -80.0,
            accept_px_threshold: 0.0,
            opportunistic_graft_threshold: 0.0,
            ip_colocation_threshold: 3,
            ip_colocation_penalty: -10.0,
            graft_backoff_penalty: -5.0,
            duplicate_message_penalty: -0.1,
            invalid_message_penalty: -1.0,
            broken_promise_penalty: -10.0,
            excessive_iwant_penalty: -0.5,
            topic_mismatch_penalty: -1.0,
            global_decay_factor: 0.5,
            iwant_tracking_window: Duration::from_secs(10),
            iwant_duplicate_threshold: 3,
            min_delivery_rate: 0.5,
            low_delivery_penalty: -1.0,
        }
    }
}

/// Every tuning knob the router consults, per spec §6.
#[derive(Clone)]
pub struct Config {
    pub mesh_n: usize,
    pub mesh_n_low: usize,
    pub mesh_n_high: usize,
    pub mesh_outbound_min: usize,
    pub max_peers_per_topic: usize,
    pub max_subscriptions: usize,
    pub history_length: usize,
    pub history_gossip: usize,
    pub seen_cache_size: usize,
    pub seen_ttl: Duration,
    pub prune_backoff: Duration,
    pub iwant_followup_time: Duration,
    pub max_iwant_messages: usize,
    pub max_ihave_messages: usize,
    pub gossip_degree: usize,
    pub flood_publish: bool,
    pub flood_publish_max_peers: usize,
    pub fanout_ttl: Duration,
    pub max_transmit_size: usize,
    pub validation_mode: ValidationMode,
    pub message_authenticity: MessageAuthenticity,
    pub message_id_fn: Option<MessageIdFn>,
    pub enable_peer_exchange: bool,
    pub prune_peers: usize,
    pub accept_px_threshold: f64,
    pub opportunistic_graft_threshold: f64,
    pub opportunistic_graft_peers: usize,
    pub idontwant_threshold: usize,
    pub idontwant_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub default_topic_score_params: TopicScoreParams,
    pub peer_score_params: PeerScoreParams,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mesh_n: 6,
            mesh_n_low: 4,
            mesh_n_high: 12,
            mesh_outbound_min: 2,
            max_peers_per_topic: 12,
            max_subscriptions: 1024,
            history_length: 5,
            history_gossip: 3,
            seen_cache_size: 10_000,
            seen_ttl: Duration::from_secs(120),
            prune_backoff: Duration::from_secs(60),
            iwant_followup_time: Duration::from_secs(3),
            max_iwant_messages: 128,
            max_ihave_messages: 256,
            gossip_degree: 6,
            flood_publish: true,
            flood_publish_max_peers: 32,
            fanout_ttl: Duration::from_secs(60),
            max_transmit_size: 1024 * 1024,
            validation_mode: ValidationMode::Strict,
            message_authenticity: MessageAuthenticity::Signed,
            message_id_fn: None,
            enable_peer_exchange: false,
            prune_peers: 16,
            accept_px_threshold: 0.0,
            opportunistic_graft_threshold: 0.0,
            opportunistic_graft_peers: 2,
            idontwant_threshold: 1024,
            idontwant_ttl: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(1),
            default_topic_score_params: TopicScoreParams::default(),
            peer_score_params: PeerScoreParams::default(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builds a [`Config`] by overriding fields on top of the defaults.
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mesh_n(&mut self, n: usize) -> &mut Self {
        self.config.mesh_n = n;
        self
    }

    pub fn mesh_n_low(&mut self, n: usize) -> &mut Self {
        self.config.mesh_n_low = n;
        self
    }

    pub fn mesh_n_high(&mut self, n: usize) -> &mut Self {
        self.config.mesh_n_high = n;
        self
    }

    pub fn mesh_outbound_min(&mut self, n: usize) -> &mut Self {
        self.config.mesh_outbound_min = n;
        self
    }

    pub fn max_peers_per_topic(&mut self, n: usize) -> &mut Self {
        self.config.max_peers_per_topic = n;
        self
    }

    pub fn max_subscriptions(&mut self, n: usize) -> &mut Self {
        self.config.max_subscriptions = n;
        self
    }

    pub fn history_length(&mut self, n: usize) -> &mut Self {
        self.config.history_length = n;
        self
    }

    pub fn history_gossip(&mut self, n: usize) -> &mut Self {
        self.config.history_gossip = n;
        self
    }

    pub fn seen_cache_size(&mut self, n: usize) -> &mut Self {
        self.config.seen_cache_size = n;
        self
    }

    pub fn seen_ttl(&mut self, d: Duration) -> &mut Self {
        self.config.seen_ttl = d;
        self
    }

    pub fn prune_backoff(&mut self, d: Duration) -> &mut Self {
        self.config.prune_backoff = d;
        self
    }

    pub fn iwant_followup_time(&mut self, d: Duration) -> &mut Self {
        self.config.iwant_followup_time = d;
        self
    }

    pub fn max_transmit_size(&mut self, n: usize) -> &mut Self {
        self.config.max_transmit_size = n;
        self
    }

    pub fn validation_mode(&mut self, mode: ValidationMode) -> &mut Self {
        self.config.validation_mode = mode;
        self
    }

    pub fn message_authenticity(&mut self, authenticity: MessageAuthenticity) -> &mut Self {
        self.config.message_authenticity = authenticity;
        self
    }

    pub fn message_id_fn(
        &mut self,
        f: impl Fn(&GossipsubMessage) -> MessageId + Send + Sync + 'static,
    ) -> &mut Self {
        self.config.message_id_fn = Some(Arc::new(f));
        self
    }

    pub fn flood_publish(&mut self, enabled: bool) -> &mut Self {
        self.config.flood_publish = enabled;
        self
    }

    pub fn enable_peer_exchange(&mut self, enabled: bool) -> &mut Self {
        self.config.enable_peer_exchange = enabled;
        self
    }

    pub fn idontwant_threshold(&mut self, n: usize) -> &mut Self {
        self.config.idontwant_threshold = n;
        self
    }

    pub fn heartbeat_interval(&mut self, d: Duration) -> &mut Self {
        self.config.heartbeat_interval = d;
        self
    }

    pub fn peer_score_params(&mut self, params: PeerScoreParams) -> &mut Self {
        self.config.peer_score_params = params;
        self
    }

    pub fn default_topic_score_params(&mut self, params: TopicScoreParams) -> &mut Self {
        self.config.default_topic_score_params = params;
        self
    }

    pub fn build(&self) -> Config {
        self.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_gossipsub() {
        let cfg = Config::default();
        assert_eq!(cfg.mesh_n, 6);
        assert_eq!(cfg.mesh_n_low, 4);
        assert_eq!(cfg.mesh_n_high, 12);
        assert_eq!(cfg.mesh_outbound_min, 2);
        assert_eq!(cfg.history_length, 5);
        assert_eq!(cfg.history_gossip, 3);
        assert_eq!(cfg.fanout_ttl, Duration::from_secs(60));
    }

    #[test]
    fn builder_overrides_only_requested_fields() {
        let cfg = ConfigBuilder::new().mesh_n(8).build();
        assert_eq!(cfg.mesh_n, 8);
        assert_eq!(cfg.mesh_n_low, 4);
    }
}
