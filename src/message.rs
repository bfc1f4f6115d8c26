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

//! The message and RPC shapes the router operates on.
//!
//! Wire encoding (protobuf) is out of scope for this crate; these types are
//! the unambiguous target a codec crate marshals to and from.

use crate::peer_id::PeerId;
use crate::topic::TopicHash;
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque message identifier, derived either by default (`source || seqno`)
/// or by a caller-supplied function over the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Vec<u8>);

impl MessageId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        MessageId(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_fmt::HexFmt(&self.0))
    }
}

/// Default message-id function: `sha256(source || seqno)`, truncated the way
/// the reference implementation derives an id when the publisher signs with a
/// sequence number. Falls back to hashing the payload when source/seqno are
/// absent (anonymous authenticity requires a custom function instead, see
/// [`crate::config::MessageAuthenticity`]).
pub fn default_message_id(msg: &GossipsubMessage) -> MessageId {
    let mut hasher = Sha256::new();
    if let Some(source) = &msg.source {
        hasher.update(source.as_bytes());
    }
    if let Some(seqno) = &msg.sequence_number {
        hasher.update(seqno);
    } else {
        hasher.update(&msg.data);
    }
    MessageId::new(hasher.finalize().to_vec())
}

/// A single pub/sub message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipsubMessage {
    pub id: MessageId,
    pub source: Option<PeerId>,
    pub sequence_number: Option<Vec<u8>>,
    pub topic: TopicHash,
    pub data: Vec<u8>,
    pub signature: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
}

impl GossipsubMessage {
    /// Recomputes `id` using `f` and returns a copy with the new id. Used
    /// when the router is configured with a custom message-id function.
    pub fn with_id(mut self, f: impl Fn(&GossipsubMessage) -> MessageId) -> Self {
        self.id = f(&self);
        self
    }
}

/// A subscribe/unsubscribe announcement carried in an [`Rpc`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: TopicHash,
    pub subscribe: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlGraft {
    pub topic: TopicHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPrune {
    pub topic: TopicHash,
    pub backoff: Option<u64>,
    pub peers: Vec<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlIHave {
    pub topic: TopicHash,
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlIWant {
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlIDontWant {
    pub message_ids: Vec<MessageId>,
}

/// The control batch of an [`Rpc`]; absent when a peer has nothing to graft,
/// prune or gossip about this round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlBatch {
    pub graft: Vec<ControlGraft>,
    pub prune: Vec<ControlPrune>,
    pub ihave: Vec<ControlIHave>,
    pub iwant: Vec<ControlIWant>,
    pub idontwant: Vec<ControlIDontWant>,
}

impl ControlBatch {
    pub fn is_empty(&self) -> bool {
        self.graft.is_empty()
            && self.prune.is_empty()
            && self.ihave.is_empty()
            && self.iwant.is_empty()
            && self.idontwant.is_empty()
    }
}

/// A single RPC frame exchanged with a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rpc {
    pub subscriptions: Vec<Subscription>,
    pub messages: Vec<GossipsubMessage>,
    pub control: Option<ControlBatch>,
}

impl Rpc {
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
            && self.messages.is_empty()
            && self.control.as_ref().map_or(true, ControlBatch::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(source: Option<&str>, seqno: Option<&[u8]>, data: &[u8]) -> GossipsubMessage {
        GossipsubMessage {
            id: MessageId::new(vec![]),
            source: source.map(|s| PeerId::new(s.as_bytes().to_vec())),
            sequence_number: seqno.map(|s| s.to_vec()),
            topic: TopicHash::from_raw("t"),
            data: data.to_vec(),
            signature: None,
            key: None,
        }
    }

    #[test]
    fn default_id_is_deterministic() {
        let a = msg(Some("p1"), Some(&[1, 2, 3]), b"hello");
        let b = msg(Some("p1"), Some(&[1, 2, 3]), b"hello");
        assert_eq!(default_message_id(&a), default_message_id(&b));
    }

    #[test]
    fn default_id_differs_by_source() {
        let a = msg(Some("p1"), Some(&[1, 2, 3]), b"hello");
        let b = msg(Some("p2"), Some(&[1, 2, 3]), b"hello");
        assert_ne!(default_message_id(&a), default_message_id(&b));
    }

    #[test]
    fn empty_rpc_is_empty() {
        assert!(Rpc::default().is_empty());
        let mut rpc = Rpc::default();
        rpc.control = Some(ControlBatch::default());
        assert!(rpc.is_empty());
    }
}
