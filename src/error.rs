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

//! Error types for every fallible boundary of the crate.
//!
//! Internal pipeline failures (malformed RPCs, failing validators) are never
//! surfaced through these types: they are reported as [`crate::event::Event`]s
//! plus a score penalty. These errors are returned only from the public API
//! calls that a caller can get wrong (publishing, subscribing, sealing an
//! envelope).

/// Errors produced while sealing, opening or (un)marshalling a
/// [`crate::envelope::Envelope`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("field too large: {0} bytes")]
    FieldTooLarge(usize),
    #[error("malformed envelope encoding")]
    InvalidFormat,
    #[error("payload type does not match the type the envelope was opened as")]
    PayloadTypeMismatch,
}

/// Errors produced by [`crate::envelope::PeerRecord`] encoding/decoding.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PeerRecordError {
    #[error("too many addresses: {0}")]
    TooManyAddresses(usize),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Errors returned from the [`crate::router::Router`] public API.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("already subscribed to topic")]
    AlreadySubscribed,
    #[error("maximum subscriptions reached: {0}")]
    MaxSubscriptionsReached(usize),
    #[error("subscription to topic rejected by the subscription filter")]
    SubscriptionNotAllowed,
    #[error("message of {size} bytes exceeds the configured maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },
    #[error("a signing key is required to publish under this authenticity mode")]
    SigningKeyRequired,
    #[error("anonymous authenticity mode requires a custom message-id function")]
    AnonymousModeRequiresCustomMessageId,
}
