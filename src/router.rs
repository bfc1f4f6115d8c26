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

//! The router: orchestrates mesh, peer state, scoring and caches behind the
//! public surface a transport drives — `handleRPC` in, `(peer, Rpc)` batches
//! and an event stream out.
//!
//! Every public method takes whatever locks it needs, does its work, and
//! releases them before returning; nothing here ever holds two component
//! locks at the same time (see the module-level notes on [`crate::score`]).

use crate::config::{Config, Direction, MessageAuthenticity, ProtocolVersion, ValidationMode};
use crate::error::RouterError;
use crate::event::{Event, PenaltyReason, ValidationOutcome};
use crate::mcache::MessageCache;
use crate::mesh::{MeshState, SubscribeOutcome};
use crate::message::{
    default_message_id, ControlBatch, ControlGraft, ControlIDontWant, ControlIHave, ControlIWant,
    ControlPrune, GossipsubMessage, MessageId, Rpc, Subscription,
};
use crate::peer_id::PeerId;
use crate::peer_state::{PeerState, PeerStateManager};
use crate::promises::GossipPromises;
use crate::score::{IwantOutcome, PeerScorer};
use crate::time::{Clock, Instant};
use crate::topic::{Topic, TopicHash};
use log::{debug, error, trace, warn};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Signs outbound messages when [`MessageAuthenticity::Signed`] is
/// configured. Signature schemes themselves are out of scope.
pub trait MessageSigner: Send + Sync {
    fn public_key_bytes(&self) -> Vec<u8>;
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

/// Verifies a signed message's signature during the authenticity check.
pub trait MessageVerifier: Send + Sync {
    fn verify(&self, public_key_bytes: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// Gates local subscription requests and inbound subscription
/// announcements.
pub trait SubscriptionFilter: Send + Sync {
    fn can_subscribe(&self, _topic: &TopicHash) -> bool {
        true
    }

    /// Returns the subscriptions to actually apply, or rejects the whole RPC.
    fn filter_incoming_subscriptions(
        &self,
        _from: &PeerId,
        subscriptions: &[Subscription],
    ) -> Result<Vec<Subscription>, ()> {
        Ok(subscriptions.to_vec())
    }
}

/// Outcome of an application-level message validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Accept,
    Reject,
    Ignore,
}

/// A per-topic application validator.
pub trait MessageValidator: Send + Sync {
    fn validate(&self, message: &GossipsubMessage, from: &PeerId) -> ValidationResult;
}

/// The result of feeding one inbound RPC through the router: a response to
/// send back to its sender, plus forwards/gossip to deliver to other peers.
#[derive(Debug, Default, Clone)]
pub struct RpcOutcome {
    pub response: Rpc,
    pub forwards: Vec<(PeerId, Rpc)>,
}

const LOG_TARGET: &str = "gossipsub-core";

fn signing_bytes(msg: &GossipsubMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(msg.topic.as_str().as_bytes());
    if let Some(seqno) = &msg.sequence_number {
        buf.extend_from_slice(seqno);
    }
    buf.extend_from_slice(&msg.data);
    buf
}

fn merge_rpc(map: &mut HashMap<PeerId, Rpc>, peer: PeerId, rpc: Rpc) {
    let entry = map.entry(peer).or_default();
    entry.subscriptions.extend(rpc.subscriptions);
    entry.messages.extend(rpc.messages);
    if let Some(control) = rpc.control {
        let batch = entry.control.get_or_insert_with(ControlBatch::default);
        batch.graft.extend(control.graft);
        batch.prune.extend(control.prune);
        batch.ihave.extend(control.ihave);
        batch.iwant.extend(control.iwant);
        batch.idontwant.extend(control.idontwant);
    }
}

/// Everything the router needs at construction time.
pub struct RouterParams {
    pub config: Config,
    pub local_peer_id: PeerId,
    pub clock: Arc<dyn Clock>,
    pub signer: Option<Arc<dyn MessageSigner>>,
    pub verifier: Option<Arc<dyn MessageVerifier>>,
    pub subscription_filter: Option<Arc<dyn SubscriptionFilter>>,
    pub direct_peers: Vec<PeerId>,
}

/// Orchestrates mesh state, peer state, scoring and caches; the single
/// entry point a transport drives.
pub struct Router {
    config: Config,
    local_peer_id: PeerId,
    clock: Arc<dyn Clock>,
    signer: Option<Arc<dyn MessageSigner>>,
    verifier: Option<Arc<dyn MessageVerifier>>,
    subscription_filter: Option<Arc<dyn SubscriptionFilter>>,
    validators: Mutex<HashMap<TopicHash, Arc<dyn MessageValidator>>>,
    direct_peers: Mutex<HashSet<PeerId>>,
    local_subscriptions: Mutex<HashMap<TopicHash, Sender<GossipsubMessage>>>,
    mesh: MeshState,
    peers: PeerStateManager,
    scorer: PeerScorer,
    seen: crate::seen_cache::SeenCache,
    mcache: Mutex<MessageCache>,
    promises: GossipPromises,
    events_tx: Mutex<Option<Sender<Event>>>,
}

impl Router {
    pub fn new(params: RouterParams) -> (Self, Receiver<Event>) {
        let (tx, rx) = channel();
        let direct_peers: HashSet<PeerId> = params.direct_peers.into_iter().collect();
        let scorer = PeerScorer::new(
            params.config.peer_score_params,
            params.config.default_topic_score_params,
        );
        for peer in &direct_peers {
            scorer.add_peer(peer.clone(), true);
        }
        let router = Router {
            seen: crate::seen_cache::SeenCache::new(params.config.seen_cache_size, params.config.seen_ttl),
            mcache: Mutex::new(MessageCache::new(params.config.history_length, params.config.history_gossip)),
            mesh: MeshState::new(),
            peers: PeerStateManager::new(),
            scorer,
            promises: GossipPromises::new(),
            validators: Mutex::new(HashMap::new()),
            direct_peers: Mutex::new(direct_peers),
            local_subscriptions: Mutex::new(HashMap::new()),
            events_tx: Mutex::new(Some(tx)),
            config: params.config,
            local_peer_id: params.local_peer_id,
            clock: params.clock,
            signer: params.signer,
            verifier: params.verifier,
            subscription_filter: params.subscription_filter,
        };
        (router, rx)
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = self.events_tx.lock().expect("events lock poisoned").as_ref() {
            let _ = tx.send(event);
        }
    }

    fn compute_message_id(&self, msg: &GossipsubMessage) -> MessageId {
        match &self.config.message_id_fn {
            Some(f) => f(msg),
            None => default_message_id(msg),
        }
    }

    // ---- Validators -----------------------------------------------------

    pub fn set_validator(&self, topic: TopicHash, validator: Arc<dyn MessageValidator>) {
        self.validators.lock().expect("validators lock poisoned").insert(topic, validator);
    }

    pub fn remove_validator(&self, topic: &TopicHash) {
        self.validators.lock().expect("validators lock poisoned").remove(topic);
    }

    // ---- Direct peers -----------------------------------------------------

    pub fn add_direct_peer(&self, peer: PeerId) {
        self.direct_peers.lock().expect("direct peers lock poisoned").insert(peer.clone());
        if self.peers.contains(&peer) {
            self.scorer.add_peer(peer.clone(), true);
        }
        self.emit(Event::DirectPeerAdded(peer));
    }

    pub fn remove_direct_peer(&self, peer: &PeerId) {
        self.direct_peers.lock().expect("direct peers lock poisoned").remove(peer);
        if self.peers.contains(peer) {
            self.scorer.add_peer(peer.clone(), false);
        }
        self.emit(Event::DirectPeerRemoved(peer.clone()));
    }

    fn is_direct(&self, peer: &PeerId) -> bool {
        self.direct_peers.lock().expect("direct peers lock poisoned").contains(peer)
    }

    // ---- Subscription -----------------------------------------------------

    pub fn subscribe(&self, topic: &Topic) -> Result<Receiver<GossipsubMessage>, RouterError> {
        let topic_hash = topic.hash();
        if let Some(filter) = &self.subscription_filter {
            if !filter.can_subscribe(&topic_hash) {
                return Err(RouterError::SubscriptionNotAllowed);
            }
        }
        match self.mesh.try_subscribe(&topic_hash, self.config.max_subscriptions) {
            SubscribeOutcome::AlreadySubscribed => return Err(RouterError::AlreadySubscribed),
            SubscribeOutcome::LimitReached(n) => return Err(RouterError::MaxSubscriptionsReached(n)),
            SubscribeOutcome::Success => {}
        }
        let (tx, rx) = channel();
        self.local_subscriptions.lock().expect("subscriptions lock poisoned").insert(topic_hash.clone(), tx);
        debug!(target: LOG_TARGET, "subscribed to topic {}", topic_hash);
        self.emit(Event::Subscribed(topic_hash));
        Ok(rx)
    }

    pub fn unsubscribe(&self, topic: &TopicHash) -> HashSet<PeerId> {
        self.local_subscriptions.lock().expect("subscriptions lock poisoned").remove(topic);
        let mesh_peers = self.mesh.unsubscribe(topic);
        debug!(target: LOG_TARGET, "unsubscribed from topic {}, dropping {} mesh peers", topic, mesh_peers.len());
        self.emit(Event::Unsubscribed(topic.clone()));
        mesh_peers
    }

    // ---- Peer lifecycle -----------------------------------------------------

    pub fn handle_peer_connected(
        &self,
        peer: PeerId,
        version: ProtocolVersion,
        direction: Direction,
        remote_addr: Option<IpAddr>,
    ) {
        let now = self.now();
        self.peers.insert(PeerState::new(peer.clone(), version, direction, now));
        self.scorer.add_peer(peer.clone(), self.is_direct(&peer));
        if let Some(ip) = remote_addr {
            self.scorer.register_peer_ip(&peer, ip);
            let count = self.scorer.ip_peer_count(ip);
            if count > self.config.peer_score_params.ip_colocation_threshold {
                warn!(target: LOG_TARGET, "peer {} shares an address with {} other peers, suspecting sybil", peer, count);
                self.emit(Event::SybilSuspected(peer.clone()));
                self.emit(Event::PeerPenalized(peer.clone(), PenaltyReason::IpColocation));
            }
        }
        trace!(target: LOG_TARGET, "peer {} connected ({:?}, {:?})", peer, version, direction);
        self.emit(Event::PeerConnected(peer));
    }

    pub fn handle_peer_disconnected(&self, peer: &PeerId) {
        self.mesh.remove_peer_from_all(peer);
        self.peers.remove(peer);
        self.scorer.remove_peer(peer);
        self.promises.remove_peer(peer);
        trace!(target: LOG_TARGET, "peer {} disconnected", peer);
        self.emit(Event::PeerDisconnected(peer.clone()));
    }

    // ---- Publish -----------------------------------------------------

    pub fn publish(&self, topic: &Topic, data: Vec<u8>) -> Result<MessageId, RouterError> {
        if data.len() > self.config.max_transmit_size {
            warn!(target: LOG_TARGET, "refusing to publish {} bytes, exceeds max_transmit_size of {}", data.len(), self.config.max_transmit_size);
            return Err(RouterError::MessageTooLarge {
                size: data.len(),
                max: self.config.max_transmit_size,
            });
        }
        let topic_hash = topic.hash();

        let mut msg = GossipsubMessage {
            id: MessageId::new(Vec::new()),
            source: None,
            sequence_number: None,
            topic: topic_hash.clone(),
            data,
            signature: None,
            key: None,
        };

        match &self.config.message_authenticity {
            MessageAuthenticity::Signed => {
                let signer = self.signer.as_ref().ok_or(RouterError::SigningKeyRequired)?;
                msg.source = Some(self.local_peer_id.clone());
                msg.sequence_number = Some(random_seqno());
                let signature = signer.sign(&signing_bytes(&msg));
                msg.signature = Some(signature);
                msg.key = Some(signer.public_key_bytes());
            }
            MessageAuthenticity::Author => {
                msg.source = Some(self.local_peer_id.clone());
                msg.sequence_number = Some(random_seqno());
            }
            MessageAuthenticity::Anonymous => {
                if self.config.message_id_fn.is_none() {
                    return Err(RouterError::AnonymousModeRequiresCustomMessageId);
                }
            }
        }

        msg.id = self.compute_message_id(&msg);
        let id = msg.id.clone();

        self.seen.add(id.clone(), &*self.clock);
        self.mcache.lock().expect("mcache lock poisoned").put(msg.clone());
        if !self.mesh.is_subscribed(&topic_hash) {
            self.mesh.record_publish(&topic_hash, &*self.clock);
        }
        trace!(target: LOG_TARGET, "published message {} on topic {}", id, topic_hash);
        self.emit(Event::MessagePublished(id.clone(), topic_hash));
        Ok(id)
    }

    /// The set of peers a just-published message should be sent to: mesh if
    /// subscribed else fanout, plus direct peers, plus (if flood-publish is
    /// enabled) the first `flood_publish_max_peers` topic subscribers.
    pub fn peers_for_publish(&self, topic: &TopicHash) -> Vec<PeerId> {
        let mut targets: HashSet<PeerId> = if self.mesh.is_subscribed(topic) {
            self.mesh.mesh_peers(topic)
        } else {
            self.mesh.fanout_peers(topic)
        };
        targets.extend(self.direct_peers.lock().expect("direct peers lock poisoned").iter().cloned());
        if self.config.flood_publish {
            let mut subs = self.peers.peers_subscribed_to(topic);
            subs.truncate(self.config.flood_publish_max_peers);
            targets.extend(subs);
        }
        targets.into_iter().collect()
    }

    // ---- RPC ingress -----------------------------------------------------

    pub fn handle_rpc(&self, from: &PeerId, rpc: Rpc) -> RpcOutcome {
        let now = self.now();

        let subs = match &self.subscription_filter {
            Some(filter) => match filter.filter_incoming_subscriptions(from, &rpc.subscriptions) {
                Ok(s) => s,
                Err(()) => return RpcOutcome::default(),
            },
            None => rpc.subscriptions,
        };
        for sub in &subs {
            self.peers.update_peer(from, |p| {
                if sub.subscribe {
                    p.subscriptions.insert(sub.topic.clone());
                } else {
                    p.subscriptions.remove(&sub.topic);
                }
            });
            if sub.subscribe {
                self.emit(Event::PeerSubscribed(from.clone(), sub.topic.clone()));
            } else {
                self.mesh.remove_from_mesh(&sub.topic, from);
                self.emit(Event::PeerUnsubscribed(from.clone(), sub.topic.clone()));
            }
        }

        let mut forwards: HashMap<PeerId, Rpc> = HashMap::new();
        for msg in rpc.messages {
            self.process_inbound_message(msg, from, now, &mut forwards);
        }

        let mut response = Rpc::default();
        if let Some(version) = self.peers.version_of(from) {
            if !version.is_floodsub() {
                if let Some(control) = rpc.control {
                    self.handle_control(from, control, version, now, &mut response);
                }
            }
        }

        RpcOutcome {
            response,
            forwards: forwards.into_iter().collect(),
        }
    }

    // ---- Message pipeline -----------------------------------------------------

    fn check_authenticity(&self, msg: &GossipsubMessage) -> Result<(), ()> {
        match self.config.validation_mode {
            ValidationMode::None => Ok(()),
            ValidationMode::Anonymous => {
                if msg.source.is_some() || msg.sequence_number.is_some() || msg.signature.is_some() {
                    Err(())
                } else {
                    Ok(())
                }
            }
            ValidationMode::Strict => {
                if msg.source.is_none() {
                    return Err(());
                }
                if msg.sequence_number.as_ref().map_or(true, |s| s.is_empty()) {
                    return Err(());
                }
                self.verify_signature(msg)
            }
            ValidationMode::Permissive => match (&msg.signature, &msg.key) {
                (Some(_), Some(_)) => self.verify_signature(msg),
                (None, None) => Ok(()),
                _ => Err(()),
            },
        }
    }

    fn verify_signature(&self, msg: &GossipsubMessage) -> Result<(), ()> {
        let (Some(sig), Some(key)) = (&msg.signature, &msg.key) else {
            return Err(());
        };
        let Some(verifier) = self.verifier.as_ref() else {
            error!(target: LOG_TARGET, "strict/permissive validation requires a signature but no MessageVerifier is configured");
            return Err(());
        };
        if verifier.verify(key, &signing_bytes(msg), sig) {
            Ok(())
        } else {
            Err(())
        }
    }

    fn process_inbound_message(
        &self,
        mut msg: GossipsubMessage,
        from: &PeerId,
        now: Instant,
        forwards: &mut HashMap<PeerId, Rpc>,
    ) {
        // a. graylisted sender: drop without processing.
        if self.scorer.is_graylisted(from, now) {
            trace!(target: LOG_TARGET, "dropping message from graylisted peer {}", from);
            return;
        }

        // b. recompute id under a custom message-id function.
        if self.config.message_id_fn.is_some() {
            msg.id = self.compute_message_id(&msg);
        } else if msg.id.as_bytes().is_empty() {
            msg.id = default_message_id(&msg);
        }

        // c. dedup.
        if !self.seen.add(msg.id.clone(), &*self.clock) {
            self.scorer.record_duplicate_message(from);
            return;
        }

        // d. resolve any outstanding IWANT promise.
        self.promises.message_delivered(&msg.id);

        // e. structural validation.
        if msg.topic.as_str().is_empty() {
            warn!(target: LOG_TARGET, "rejecting structurally invalid message {} from {}", msg.id, from);
            self.scorer.record_invalid_message(from, &msg.topic);
            self.emit(Event::MessageValidated(msg.id.clone(), ValidationOutcome::Reject));
            return;
        }

        // f. authenticity / validation mode.
        if self.check_authenticity(&msg).is_err() {
            warn!(target: LOG_TARGET, "rejecting message {} from {}: authenticity check failed", msg.id, from);
            self.scorer.record_invalid_message(from, &msg.topic);
            self.emit(Event::MessageValidated(msg.id.clone(), ValidationOutcome::Reject));
            return;
        }

        // g. application validator.
        let validator = self.validators.lock().expect("validators lock poisoned").get(&msg.topic).cloned();
        if let Some(validator) = validator {
            match validator.validate(&msg, from) {
                ValidationResult::Reject => {
                    self.scorer.record_invalid_message(from, &msg.topic);
                    self.emit(Event::MessageValidated(msg.id.clone(), ValidationOutcome::Reject));
                    return;
                }
                ValidationResult::Ignore => {
                    self.emit(Event::MessageValidated(msg.id.clone(), ValidationOutcome::Ignore));
                    return;
                }
                ValidationResult::Accept => {}
            }
        }

        // h. scoring on success.
        self.scorer.record_first_message_delivery(from, &msg.topic);
        if self.mesh.is_in_mesh(&msg.topic, from) {
            self.scorer.record_mesh_message_delivery(from, &msg.topic);
        }

        // i. deliver & cache.
        trace!(target: LOG_TARGET, "accepted message {} from {} on topic {}", msg.id, from, msg.topic);
        self.mcache.lock().expect("mcache lock poisoned").put(msg.clone());
        if let Some(tx) = self.local_subscriptions.lock().expect("subscriptions lock poisoned").get(&msg.topic) {
            let _ = tx.send(msg.clone());
        }
        self.emit(Event::MessageReceived(from.clone(), msg.id.clone(), msg.topic.clone()));

        // j. forward to mesh ∪ direct ∪ floodsub subscribers, minus sender
        // and minus peers who told us they don't want this id.
        let mut targets: HashSet<PeerId> = self.mesh.mesh_peers(&msg.topic);
        targets.extend(self.direct_peers.lock().expect("direct peers lock poisoned").iter().cloned());
        for peer in self.peers.peers_subscribed_to(&msg.topic) {
            if matches!(self.peers.version_of(&peer), Some(v) if v.is_floodsub()) {
                targets.insert(peer);
            }
        }
        targets.remove(from);

        for target in targets {
            let skip = self.peers.get(&target).map_or(false, |p| p.has_dont_want(&msg.id, now));
            if skip {
                self.emit(Event::MessageSkippedByIdontWant(target, msg.id.clone()));
                continue;
            }
            forwards.entry(target.clone()).or_default().messages.push(msg.clone());
            self.emit(Event::MessageForwarded(target, msg.id.clone()));
        }

        // k. IDONTWANT emission for large payloads, v1.2+ mesh peers only.
        if self.config.idontwant_threshold > 0 && msg.data.len() >= self.config.idontwant_threshold {
            for peer in self.mesh.mesh_peers(&msg.topic) {
                if &peer == from {
                    continue;
                }
                if matches!(self.peers.version_of(&peer), Some(v) if v.supports_idontwant()) {
                    forwards
                        .entry(peer.clone())
                        .or_default()
                        .control
                        .get_or_insert_with(ControlBatch::default)
                        .idontwant
                        .push(ControlIDontWant {
                            message_ids: vec![msg.id.clone()],
                        });
                    self.emit(Event::IdontWantSent(peer, 1));
                }
            }
        }
    }

    // ---- Control messages -----------------------------------------------------

    fn handle_control(
        &self,
        from: &PeerId,
        control: ControlBatch,
        version: ProtocolVersion,
        now: Instant,
        response: &mut Rpc,
    ) {
        if !control.ihave.is_empty() {
            self.handle_ihave(from, &control.ihave, now, response);
        }
        if !control.iwant.is_empty() {
            self.handle_iwant(from, &control.iwant, now, response);
        }
        for graft in &control.graft {
            self.handle_graft(from, &graft.topic, now, response);
        }
        for prune in &control.prune {
            self.handle_prune(from, prune, now);
        }
        if version.supports_idontwant() {
            for idontwant in &control.idontwant {
                self.peers.update_peer(from, |p| {
                    for id in &idontwant.message_ids {
                        p.record_dont_want(id.clone(), now + self.config.idontwant_ttl);
                    }
                });
                self.emit(Event::IdontWantReceived(from.clone(), idontwant.message_ids.len()));
            }
        }
    }

    fn handle_ihave(&self, from: &PeerId, ihaves: &[ControlIHave], now: Instant, response: &mut Rpc) {
        let mut wanted = Vec::new();
        {
            let mcache = self.mcache.lock().expect("mcache lock poisoned");
            for ihave in ihaves {
                self.emit(Event::IhaveReceived(from.clone(), ihave.topic.clone(), ihave.message_ids.len()));
                for id in &ihave.message_ids {
                    if wanted.len() >= self.config.max_iwant_messages {
                        break;
                    }
                    if mcache.get(id).is_none() {
                        wanted.push(id.clone());
                    }
                }
            }
        }
        if wanted.is_empty() {
            return;
        }
        debug!(target: LOG_TARGET, "requesting {} messages from {} via IWANT", wanted.len(), from);
        let expiry = now + self.config.iwant_followup_time;
        self.promises.add_promise(from.clone(), &wanted, expiry);
        self.emit(Event::IwantSent(from.clone(), wanted.len()));
        response
            .control
            .get_or_insert_with(ControlBatch::default)
            .iwant
            .push(ControlIWant { message_ids: wanted });
    }

    fn handle_iwant(&self, from: &PeerId, iwants: &[ControlIWant], now: Instant, response: &mut Rpc) {
        if self.scorer.is_graylisted(from, now) {
            return;
        }
        let mcache = self.mcache.lock().expect("mcache lock poisoned");
        for iwant in iwants {
            for id in &iwant.message_ids {
                if let IwantOutcome::Excessive(_) = self.scorer.track_iwant_request(from, id.clone(), now) {
                    self.scorer.record_excessive_iwant(from);
                }
                if let Some(msg) = mcache.get(id) {
                    response.messages.push(msg.clone());
                }
            }
        }
    }

    fn handle_graft(&self, from: &PeerId, topic: &TopicHash, now: Instant, response: &mut Rpc) {
        let is_direct = self.is_direct(from);
        let peer_snapshot = self.peers.get(from);
        let subscribed = peer_snapshot.as_ref().map_or(false, |p| p.subscriptions.contains(topic));
        let backed_off = peer_snapshot.as_ref().map_or(false, |p| p.is_backed_off(topic, now));

        if !subscribed {
            trace!(target: LOG_TARGET, "pruning {} from {}: graft for topic we don't see them subscribed to", from, topic);
            self.peers.update_peer(from, |p| p.set_backoff(topic.clone(), now + self.config.prune_backoff));
            self.push_prune(response, topic.clone());
            return;
        }
        if backed_off && !is_direct {
            warn!(target: LOG_TARGET, "peer {} grafted topic {} during backoff, penalizing", from, topic);
            self.scorer.record_graft_during_backoff(from);
            self.emit(Event::PeerPenalized(from.clone(), PenaltyReason::GraftDuringBackoff));
            self.peers.update_peer(from, |p| p.set_backoff(topic.clone(), now + self.config.prune_backoff));
            self.push_prune(response, topic.clone());
            return;
        }
        if self.mesh.mesh_peer_count(topic) >= self.config.max_peers_per_topic {
            trace!(target: LOG_TARGET, "pruning {} from {}: mesh already at capacity", from, topic);
            self.peers.update_peer(from, |p| p.set_backoff(topic.clone(), now + self.config.prune_backoff));
            self.push_prune(response, topic.clone());
            return;
        }

        debug!(target: LOG_TARGET, "peer {} grafted into mesh for topic {}", from, topic);
        self.mesh.add_to_mesh(topic, from.clone());
        self.scorer.peer_joined_mesh(from, topic, now);
        self.emit(Event::PeerJoinedMesh(from.clone(), topic.clone()));
        self.emit(Event::Grafted(from.clone(), topic.clone()));
    }

    fn push_prune(&self, response: &mut Rpc, topic: TopicHash) {
        response.control.get_or_insert_with(ControlBatch::default).prune.push(ControlPrune {
            topic,
            backoff: Some(self.config.prune_backoff.as_secs()),
            peers: Vec::new(),
        });
    }

    fn handle_prune(&self, from: &PeerId, prune: &ControlPrune, now: Instant) {
        if self.mesh.is_in_mesh(&prune.topic, from) {
            debug!(target: LOG_TARGET, "peer {} pruned from mesh for topic {}", from, prune.topic);
            self.mesh.remove_from_mesh(&prune.topic, from);
            self.scorer.peer_left_mesh(from, &prune.topic, now);
            self.emit(Event::PeerLeftMesh(from.clone(), prune.topic.clone()));
            self.emit(Event::Pruned(from.clone(), prune.topic.clone()));
        }
        if let Some(backoff_secs) = prune.backoff {
            let topic = prune.topic.clone();
            self.peers.update_peer(from, |p| p.set_backoff(topic, now + Duration::from_secs(backoff_secs)));
        }
        if !prune.peers.is_empty() {
            let sender_score = self.scorer.compute_score(from, now);
            self.emit(Event::PeerExchangeReceived(from.clone(), prune.peers.len()));
            if sender_score >= self.config.accept_px_threshold {
                // Budget is `max(configured prunePeers, received count)`: since
                // the received list can never exceed its own length, this never
                // actually truncates. Preserved as specified rather than guessed.
                let budget = self.config.prune_peers.max(prune.peers.len());
                let mut candidates: Vec<PeerId> =
                    prune.peers.iter().filter(|p| **p != self.local_peer_id).cloned().collect();
                candidates.truncate(budget);
                self.emit(Event::PeerExchangeConnect(candidates));
            } else {
                self.emit(Event::PeerExchangeRejected(from.clone()));
            }
        }
    }

    // ---- Heartbeat -----------------------------------------------------

    fn select_px_candidates(&self, topic: &TopicHash, exclude: &PeerId, now: Instant) -> Vec<PeerId> {
        if !self.config.enable_peer_exchange {
            return Vec::new();
        }
        let mut candidates: Vec<PeerId> = self
            .peers
            .peers_subscribed_to(topic)
            .into_iter()
            .filter(|p| p != exclude && *p != self.local_peer_id && self.scorer.compute_score(p, now) >= 0.0)
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(self.config.prune_peers);
        candidates
    }

    /// Per-topic mesh sizing: fills meshes below `mesh_n_low`, prunes meshes
    /// above `mesh_n_high`, and tops up the outbound quota.
    pub fn maintain_mesh(&self) -> Vec<(PeerId, Rpc)> {
        let now = self.now();
        let mut outputs: HashMap<PeerId, Rpc> = HashMap::new();
        let direct: HashSet<PeerId> = self.direct_peers.lock().expect("direct peers lock poisoned").clone();

        for topic in self.mesh.subscriptions() {
            let mesh_count = self.mesh.mesh_peer_count(&topic);

            if mesh_count < self.config.mesh_n_low {
                let deficit = self.config.mesh_n.saturating_sub(mesh_count);
                debug!(target: LOG_TARGET, "topic {} mesh below low watermark ({} < {}), grafting up to {} peers", topic, mesh_count, self.config.mesh_n_low, deficit);
                let mut candidates: Vec<PeerId> = self
                    .peers
                    .peers_not_backed_off(&topic, now)
                    .into_iter()
                    .filter(|p| {
                        !direct.contains(p)
                            && !self.mesh.is_in_mesh(&topic, p)
                            && self.peers.get(p).map_or(false, |ps| ps.subscriptions.contains(&topic))
                    })
                    .collect();
                candidates = self.scorer.filter_graylisted(&candidates, now);
                for peer in self.scorer.select_best_peers(&candidates, deficit, now) {
                    self.mesh.add_to_mesh(&topic, peer.clone());
                    self.scorer.peer_joined_mesh(&peer, &topic, now);
                    self.emit(Event::PeerJoinedMesh(peer.clone(), topic.clone()));
                    self.emit(Event::Grafted(peer.clone(), topic.clone()));
                    merge_rpc(
                        &mut outputs,
                        peer,
                        Rpc {
                            control: Some(ControlBatch {
                                graft: vec![ControlGraft { topic: topic.clone() }],
                                ..ControlBatch::default()
                            }),
                            ..Rpc::default()
                        },
                    );
                }
            } else if mesh_count > self.config.mesh_n_high {
                let outbound_peers: HashSet<PeerId> =
                    self.peers.outbound_peers_subscribed_to(&topic).into_iter().collect();
                let mut victims =
                    self.mesh.select_peers_for_prune(&topic, self.config.mesh_n, self.config.mesh_outbound_min, &outbound_peers);
                victims.retain(|p| !direct.contains(p));
                debug!(target: LOG_TARGET, "topic {} mesh above high watermark ({} > {}), pruning {} peers", topic, mesh_count, self.config.mesh_n_high, victims.len());
                for peer in victims {
                    self.mesh.remove_from_mesh(&topic, &peer);
                    self.scorer.peer_left_mesh(&peer, &topic, now);
                    let topic_clone = topic.clone();
                    self.peers.update_peer(&peer, |p| p.set_backoff(topic_clone, now + self.config.prune_backoff));
                    self.emit(Event::PeerLeftMesh(peer.clone(), topic.clone()));
                    self.emit(Event::Pruned(peer.clone(), topic.clone()));
                    let px = self.select_px_candidates(&topic, &peer, now);
                    merge_rpc(
                        &mut outputs,
                        peer,
                        Rpc {
                            control: Some(ControlBatch {
                                prune: vec![ControlPrune {
                                    topic: topic.clone(),
                                    backoff: Some(self.config.prune_backoff.as_secs()),
                                    peers: px,
                                }],
                                ..ControlBatch::default()
                            }),
                            ..Rpc::default()
                        },
                    );
                }
            }

            let outbound_in_mesh: HashSet<PeerId> = self
                .peers
                .outbound_peers_subscribed_to(&topic)
                .into_iter()
                .filter(|p| self.mesh.is_in_mesh(&topic, p))
                .collect();
            if outbound_in_mesh.len() < self.config.mesh_outbound_min {
                let deficit = self.config.mesh_outbound_min - outbound_in_mesh.len();
                debug!(target: LOG_TARGET, "topic {} below outbound quota ({} < {}), grafting {} outbound peers", topic, outbound_in_mesh.len(), self.config.mesh_outbound_min, deficit);
                let mut candidates: Vec<PeerId> = self
                    .peers
                    .outbound_peers_subscribed_to(&topic)
                    .into_iter()
                    .filter(|p| {
                        !direct.contains(p)
                            && !self.mesh.is_in_mesh(&topic, p)
                            && !self.peers.get(p).map_or(false, |ps| ps.is_backed_off(&topic, now))
                    })
                    .collect();
                candidates = self.scorer.filter_graylisted(&candidates, now);
                candidates.retain(|p| self.scorer.compute_score(p, now) >= 0.0);
                for peer in self.scorer.select_best_peers(&candidates, deficit, now) {
                    self.mesh.add_to_mesh(&topic, peer.clone());
                    self.scorer.peer_joined_mesh(&peer, &topic, now);
                    self.emit(Event::OutboundQuotaGraft(peer.clone(), topic.clone()));
                    merge_rpc(
                        &mut outputs,
                        peer,
                        Rpc {
                            control: Some(ControlBatch {
                                graft: vec![ControlGraft { topic: topic.clone() }],
                                ..ControlBatch::default()
                            }),
                            ..Rpc::default()
                        },
                    );
                }
            }
        }
        outputs.into_iter().collect()
    }

    /// Grafts high-scoring non-mesh peers into topics whose mesh median
    /// score has fallen below `opportunistic_graft_threshold`.
    pub fn opportunistic_graft(&self) -> Vec<(PeerId, Rpc)> {
        let now = self.now();
        let mut outputs: HashMap<PeerId, Rpc> = HashMap::new();
        let direct: HashSet<PeerId> = self.direct_peers.lock().expect("direct peers lock poisoned").clone();

        for topic in self.mesh.subscriptions() {
            let mesh_set = self.mesh.mesh_peers(&topic);
            let non_direct_mesh: Vec<PeerId> = mesh_set.iter().filter(|p| !direct.contains(*p)).cloned().collect();
            if non_direct_mesh.is_empty() {
                continue;
            }
            let median = self.scorer.median_score(&non_direct_mesh, now);
            if median >= self.config.opportunistic_graft_threshold {
                continue;
            }
            let mut candidates: Vec<PeerId> = self
                .peers
                .peers_subscribed_to(&topic)
                .into_iter()
                .filter(|p| !mesh_set.contains(p) && !direct.contains(p) && self.scorer.compute_score(p, now) > median)
                .collect();
            self.scorer.sort_by_score(&mut candidates, now);
            candidates.truncate(self.config.opportunistic_graft_peers);
            debug!(target: LOG_TARGET, "topic {} mesh median score {:.2} below threshold, opportunistically grafting {} peers", topic, median, candidates.len());
            for peer in candidates {
                self.mesh.add_to_mesh(&topic, peer.clone());
                self.scorer.peer_joined_mesh(&peer, &topic, now);
                self.emit(Event::OpportunisticGraft(peer.clone(), topic.clone()));
                merge_rpc(
                    &mut outputs,
                    peer,
                    Rpc {
                        control: Some(ControlBatch {
                            graft: vec![ControlGraft { topic: topic.clone() }],
                            ..ControlBatch::default()
                        }),
                        ..Rpc::default()
                    },
                );
            }
        }
        outputs.into_iter().collect()
    }

    /// Sends IHAVE gossip for each subscribed topic to a random sample of
    /// non-mesh subscribers.
    pub fn generate_gossip(&self) -> Vec<(PeerId, Rpc)> {
        let mut outputs: HashMap<PeerId, Rpc> = HashMap::new();
        for topic in self.mesh.subscriptions() {
            let mut ids = {
                let mcache = self.mcache.lock().expect("mcache lock poisoned");
                mcache.get_gossip_ids(&topic)
            };
            if ids.is_empty() {
                continue;
            }
            ids.truncate(self.config.max_ihave_messages);

            let mesh_set = self.mesh.mesh_peers(&topic);
            let mut candidates: Vec<PeerId> =
                self.peers.peers_subscribed_to(&topic).into_iter().filter(|p| !mesh_set.contains(p)).collect();
            candidates.shuffle(&mut rand::thread_rng());
            candidates.truncate(self.config.gossip_degree);
            trace!(target: LOG_TARGET, "gossiping {} message ids for topic {} to {} peers", ids.len(), topic, candidates.len());

            for peer in candidates {
                merge_rpc(
                    &mut outputs,
                    peer,
                    Rpc {
                        control: Some(ControlBatch {
                            ihave: vec![ControlIHave {
                                topic: topic.clone(),
                                message_ids: ids.clone(),
                            }],
                            ..ControlBatch::default()
                        }),
                        ..Rpc::default()
                    },
                );
            }
        }
        outputs.into_iter().collect()
    }

    pub fn shift_message_cache(&self) {
        self.mcache.lock().expect("mcache lock poisoned").shift();
    }

    pub fn cleanup_fanout(&self) {
        self.mesh.cleanup_fanout(self.config.fanout_ttl, &*self.clock);
    }

    pub fn cleanup_seen_cache(&self) {
        self.seen.cleanup(&*self.clock);
    }

    pub fn cleanup_backoffs_and_idontwants(&self) {
        self.peers.cleanup(self.now());
    }

    pub fn check_broken_promises(&self) {
        let broken = self.promises.get_broken_promises(self.now());
        for (peer, count) in broken {
            warn!(target: LOG_TARGET, "peer {} broke {} IWANT promises", peer, count);
            self.scorer.record_broken_promise(&peer, count);
            self.emit(Event::BrokenPromisesDetected(peer, count));
        }
    }

    pub fn perform_scoring_maintenance(&self) {
        self.scorer.apply_delivery_rate_penalties();
        self.scorer.apply_decay_to_all(&*self.clock);
    }

    /// Runs one full heartbeat tick in the mandated order: mesh maintenance,
    /// opportunistic graft, gossip generation, cache shift, cleanups, broken
    /// promises, then scoring maintenance. Returns the RPCs to send.
    pub fn heartbeat(&self) -> Vec<(PeerId, Rpc)> {
        trace!(target: LOG_TARGET, "heartbeat tick");
        let mut merged: HashMap<PeerId, Rpc> = HashMap::new();
        for (peer, rpc) in self.maintain_mesh() {
            merge_rpc(&mut merged, peer, rpc);
        }
        for (peer, rpc) in self.opportunistic_graft() {
            merge_rpc(&mut merged, peer, rpc);
        }
        for (peer, rpc) in self.generate_gossip() {
            merge_rpc(&mut merged, peer, rpc);
        }
        self.shift_message_cache();
        self.cleanup_fanout();
        self.cleanup_seen_cache();
        self.cleanup_backoffs_and_idontwants();
        self.check_broken_promises();
        self.perform_scoring_maintenance();
        merged.into_iter().collect()
    }

    /// Tears down every component and closes the event channel.
    pub fn shutdown(&self) {
        debug!(target: LOG_TARGET, "shutting down router");
        self.mesh.clear();
        self.peers.clear();
        self.scorer.clear();
        self.promises.clear();
        self.seen.clear();
        self.mcache.lock().expect("mcache lock poisoned").clear();
        self.validators.lock().expect("validators lock poisoned").clear();
        self.direct_peers.lock().expect("direct peers lock poisoned").clear();
        self.local_subscriptions.lock().expect("subscriptions lock poisoned").clear();
        *self.events_tx.lock().expect("events lock poisoned") = None;
    }
}

fn random_seqno() -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::time::TestClock;

    fn peer(n: u8) -> PeerId {
        PeerId::new(vec![n])
    }

    fn router_with_config(config: Config) -> (Router, Receiver<Event>) {
        Router::new(RouterParams {
            config,
            local_peer_id: peer(0),
            clock: Arc::new(TestClock::new()),
            signer: None,
            verifier: None,
            subscription_filter: None,
            direct_peers: Vec::new(),
        })
    }

    fn connect(router: &Router, id: u8, version: ProtocolVersion, topic: &TopicHash) {
        router.handle_peer_connected(peer(id), version, Direction::Outbound, None);
        router.peers.update_peer(&peer(id), |p| {
            p.subscriptions.insert(topic.clone());
        });
    }

    #[test]
    fn graft_accepted_when_subscribed_and_not_backed_off() {
        let (router, _rx) = router_with_config(Config::default());
        let t = Topic::new("t");
        router.subscribe(&t).unwrap();
        connect(&router, 1, ProtocolVersion::V1_1, &t.hash());

        let rpc = Rpc {
            control: Some(ControlBatch {
                graft: vec![ControlGraft { topic: t.hash() }],
                ..ControlBatch::default()
            }),
            ..Rpc::default()
        };
        let outcome = router.handle_rpc(&peer(1), rpc);
        assert!(outcome.response.control.map_or(true, |c| c.prune.is_empty()));
        assert!(router.mesh.is_in_mesh(&t.hash(), &peer(1)));
    }

    #[test]
    fn graft_during_backoff_is_penalized_and_pruned() {
        let (router, _rx) = router_with_config(Config::default());
        let t = Topic::new("t");
        router.subscribe(&t).unwrap();
        connect(&router, 1, ProtocolVersion::V1_1, &t.hash());
        router.peers.update_peer(&peer(1), |p| p.set_backoff(t.hash(), router.now() + Duration::from_secs(60)));

        let before = router.scorer.compute_score(&peer(1), router.now());
        let rpc = Rpc {
            control: Some(ControlBatch {
                graft: vec![ControlGraft { topic: t.hash() }],
                ..ControlBatch::default()
            }),
            ..Rpc::default()
        };
        let outcome = router.handle_rpc(&peer(1), rpc);
        let after = router.scorer.compute_score(&peer(1), router.now());
        assert!(after < before);
        let control = outcome.response.control.unwrap();
        assert_eq!(control.prune.len(), 1);
        assert_eq!(control.prune[0].backoff, Some(router.config.prune_backoff.as_secs()));
    }

    #[test]
    fn duplicate_message_is_penalized_and_not_forwarded_twice() {
        let (router, _rx) = router_with_config(Config::default());
        let t = Topic::new("t");
        router.subscribe(&t).unwrap();
        connect(&router, 1, ProtocolVersion::V1_1, &t.hash());
        connect(&router, 2, ProtocolVersion::V1_1, &t.hash());

        let msg = GossipsubMessage {
            id: MessageId::new(vec![9]),
            source: None,
            sequence_number: None,
            topic: t.hash(),
            data: vec![1, 2, 3],
            signature: None,
            key: None,
        };
        let rpc1 = Rpc {
            messages: vec![msg.clone()],
            ..Rpc::default()
        };
        let out1 = router.handle_rpc(&peer(1), rpc1);
        assert!(!out1.forwards.is_empty());

        let before = router.scorer.compute_score(&peer(2), router.now());
        let rpc2 = Rpc {
            messages: vec![msg],
            ..Rpc::default()
        };
        let out2 = router.handle_rpc(&peer(2), rpc2);
        assert!(out2.forwards.is_empty());
        assert!(router.scorer.compute_score(&peer(2), router.now()) < before);
    }

    #[test]
    fn publish_respects_max_transmit_size() {
        let mut cfg = Config::default();
        cfg.max_transmit_size = 4;
        let (router, _rx) = router_with_config(cfg);
        let t = Topic::new("t");
        let err = router.publish(&t, vec![0u8; 10]).unwrap_err();
        assert_eq!(err, RouterError::MessageTooLarge { size: 10, max: 4 });
    }

    #[test]
    fn anonymous_publish_requires_custom_message_id() {
        let mut cfg = ConfigBuilder::new().build();
        cfg.message_authenticity = MessageAuthenticity::Anonymous;
        let (router, _rx) = router_with_config(cfg);
        let t = Topic::new("t");
        let err = router.publish(&t, vec![1]).unwrap_err();
        assert_eq!(err, RouterError::AnonymousModeRequiresCustomMessageId);
    }

    #[test]
    fn idontwant_suppresses_forward_to_that_peer() {
        let mut cfg = Config::default();
        cfg.idontwant_threshold = 1;
        let (router, _rx) = router_with_config(cfg);
        let t = Topic::new("t");
        router.subscribe(&t).unwrap();
        connect(&router, 1, ProtocolVersion::V1_1, &t.hash());
        connect(&router, 2, ProtocolVersion::V1_2, &t.hash());

        let id = MessageId::new(vec![1]);
        router.peers.update_peer(&peer(2), |p| p.record_dont_want(id.clone(), router.now() + Duration::from_secs(10)));

        let msg = GossipsubMessage {
            id,
            source: None,
            sequence_number: None,
            topic: t.hash(),
            data: vec![1, 2, 3],
            signature: None,
            key: None,
        };
        let outcome = router.handle_rpc(&peer(1), Rpc { messages: vec![msg], ..Rpc::default() });
        assert!(outcome.forwards.iter().all(|(p, _)| *p != peer(2)));
    }

    #[test]
    fn heartbeat_fills_undersized_mesh() {
        let mut cfg = Config::default();
        cfg.mesh_n = 2;
        cfg.mesh_n_low = 1;
        cfg.mesh_n_high = 4;
        let (router, _rx) = router_with_config(cfg);
        let t = Topic::new("t");
        router.subscribe(&t).unwrap();
        connect(&router, 1, ProtocolVersion::V1_1, &t.hash());
        connect(&router, 2, ProtocolVersion::V1_1, &t.hash());

        let grafts = router.maintain_mesh();
        assert!(!grafts.is_empty());
        assert!(router.mesh.mesh_peer_count(&t.hash()) >= 1);
    }

    #[test]
    fn direct_peer_is_never_graylisted_or_penalized() {
        let (router, _rx) = router_with_config(Config::default());
        router.add_direct_peer(peer(1));
        router.handle_peer_connected(peer(1), ProtocolVersion::V1_1, Direction::Outbound, None);
        router.scorer.record_graft_during_backoff(&peer(1));
        assert_eq!(router.scorer.compute_score(&peer(1), router.now()), 0.0);
        assert!(!router.scorer.is_graylisted(&peer(1), router.now()));
    }

    #[test]
    fn shutdown_clears_state_and_closes_events() {
        let (router, rx) = router_with_config(Config::default());
        let t = Topic::new("t");
        router.subscribe(&t).unwrap();
        router.shutdown();
        assert!(router.mesh.subscriptions().is_empty());
        assert!(rx.try_recv().is_err() || matches!(rx.recv(), Err(_)));
    }
}
