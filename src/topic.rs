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

//! Topic identifiers.
//!
//! A [`Topic`] is the human-meaningful handle an application subscribes and
//! publishes with; [`TopicHash`] is the opaque key actually used in every map
//! (mesh, fanout, subscriptions) so that a topic never needs to be cloned in
//! full just to index into a `HashMap`.

use std::fmt;

/// A topic, identified by a plain utf-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Topic(name.into())
    }

    pub fn hash(&self) -> TopicHash {
        TopicHash(self.0.clone())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Topic(s.to_owned())
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Topic(s)
    }
}

/// The opaque key a [`Topic`] hashes to; what mesh/fanout/subscription maps
/// are actually keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicHash(String);

impl TopicHash {
    pub fn from_raw(raw: impl Into<String>) -> Self {
        TopicHash(raw.into())
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<TopicHash> for TopicHash {
    fn as_ref(&self) -> &TopicHash {
        self
    }
}

impl From<Topic> for TopicHash {
    fn from(t: Topic) -> Self {
        t.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_hash_is_stable() {
        let t = Topic::new("blocks");
        assert_eq!(t.hash(), t.hash());
        assert_eq!(t.hash().as_str(), "blocks");
    }
}
