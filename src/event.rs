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

//! Observable events the router emits. The driver embedding this crate
//! decides what to do with them (metrics, logging, peer-exchange dialing);
//! the core only ever produces them.

use crate::message::MessageId;
use crate::peer_id::PeerId;
use crate::topic::TopicHash;

/// Why a message failed application validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Reject,
    Ignore,
}

/// A protocol violation or misbehavior that earned a peer a score penalty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PenaltyReason {
    GraftDuringBackoff,
    DuplicateMessage,
    InvalidMessage,
    BrokenPromise,
    ExcessiveIwant,
    TopicMismatch,
    IpColocation,
}

/// Everything the router can report back to its embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Subscribed(TopicHash),
    Unsubscribed(TopicHash),
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    PeerSubscribed(PeerId, TopicHash),
    PeerUnsubscribed(PeerId, TopicHash),
    PeerJoinedMesh(PeerId, TopicHash),
    PeerLeftMesh(PeerId, TopicHash),
    Grafted(PeerId, TopicHash),
    Pruned(PeerId, TopicHash),
    IhaveReceived(PeerId, TopicHash, usize),
    IwantSent(PeerId, usize),
    MessagePublished(MessageId, TopicHash),
    MessageReceived(PeerId, MessageId, TopicHash),
    MessageForwarded(PeerId, MessageId),
    MessageValidated(MessageId, ValidationOutcome),
    MessageSkippedByIdontWant(PeerId, MessageId),
    IdontWantSent(PeerId, usize),
    IdontWantReceived(PeerId, usize),
    BrokenPromisesDetected(PeerId, u32),
    PeerPenalized(PeerId, PenaltyReason),
    SybilSuspected(PeerId),
    PeerExchangeReceived(PeerId, usize),
    PeerExchangeRejected(PeerId),
    PeerExchangeConnect(Vec<PeerId>),
    OpportunisticGraft(PeerId, TopicHash),
    OutboundQuotaGraft(PeerId, TopicHash),
    DirectPeerAdded(PeerId),
    DirectPeerRemoved(PeerId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_comparable() {
        let a = Event::Subscribed(TopicHash::from_raw("t"));
        let b = Event::Subscribed(TopicHash::from_raw("t"));
        assert_eq!(a, b);
    }
}
