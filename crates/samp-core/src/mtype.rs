use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::value::MapValue;
use crate::HubError;

/// Prefix reserved for messages synthesised by the hub itself.
pub const HUB_RESERVED_PREFIX: &str = "samp.hub.";

/// A dot-separated, case-sensitive message-type string.
///
/// Each atom is a non-empty run of ASCII alphanumerics, `_`, or `-`;
/// atoms are joined by single dots. `table.load.votable` and
/// `samp.hub.event.register` are well-formed; empty atoms, leading or
/// trailing dots, and any other characters are not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MType(String);

impl MType {
    pub fn parse(raw: &str) -> Result<Self, HubError> {
        check_atoms(raw)?;
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for mtypes in the `samp.hub.` namespace, which only the hub
    /// itself may send.
    pub fn is_hub_reserved(&self) -> bool {
        self.0.starts_with(HUB_RESERVED_PREFIX)
    }
}

impl fmt::Display for MType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MType {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MType::parse(s)
    }
}

fn check_atoms(raw: &str) -> Result<(), HubError> {
    if raw.is_empty() {
        return Err(HubError::InvalidArgument("empty mtype".into()));
    }
    for atom in raw.split('.') {
        if atom.is_empty() {
            return Err(HubError::InvalidArgument(format!(
                "malformed mtype {raw:?}: empty atom"
            )));
        }
        if !atom
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(HubError::InvalidArgument(format!(
                "malformed mtype {raw:?}: illegal character in atom {atom:?}"
            )));
        }
    }
    Ok(())
}

/// One subscription entry: an exact mtype, a prefix pattern written
/// `P.*`, or the catch-all `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionPattern {
    Exact(MType),
    /// Matches any mtype beginning with `<stem>.`; the stem itself is not
    /// matched.
    Prefix(String),
    Any,
}

impl SubscriptionPattern {
    pub fn parse(raw: &str) -> Result<Self, HubError> {
        if raw == "*" {
            return Ok(SubscriptionPattern::Any);
        }
        if let Some(stem) = raw.strip_suffix(".*") {
            check_atoms(stem)?;
            return Ok(SubscriptionPattern::Prefix(stem.to_owned()));
        }
        if raw.contains('*') {
            return Err(HubError::InvalidArgument(format!(
                "malformed subscription pattern {raw:?}: wildcard only allowed as final atom"
            )));
        }
        Ok(SubscriptionPattern::Exact(MType::parse(raw)?))
    }

    /// Match specificity: exact beats prefix, longer prefixes beat shorter
    /// ones, `*` loses to everything.
    fn specificity(&self) -> usize {
        match self {
            SubscriptionPattern::Exact(_) => usize::MAX,
            SubscriptionPattern::Prefix(stem) => stem.len() + 1,
            SubscriptionPattern::Any => 0,
        }
    }

    pub fn matches(&self, mtype: &MType) -> bool {
        match self {
            SubscriptionPattern::Exact(exact) => exact == mtype,
            SubscriptionPattern::Prefix(stem) => {
                mtype.as_str().len() > stem.len() + 1
                    && mtype.as_str().starts_with(stem)
                    && mtype.as_str().as_bytes()[stem.len()] == b'.'
            }
            SubscriptionPattern::Any => true,
        }
    }
}

impl fmt::Display for SubscriptionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionPattern::Exact(mtype) => f.write_str(mtype.as_str()),
            SubscriptionPattern::Prefix(stem) => write!(f, "{stem}.*"),
            SubscriptionPattern::Any => f.write_str("*"),
        }
    }
}

/// A client's declared subscriptions: pattern strings mapped to optional
/// annotation maps carried back to message senders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subscriptions(BTreeMap<String, MapValue>);

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pattern: &str, annotations: MapValue) -> Result<(), HubError> {
        SubscriptionPattern::parse(pattern)?;
        self.0.insert(pattern.to_owned(), annotations);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The raw pattern → annotation entries, in key order.
    pub fn entries(&self) -> &BTreeMap<String, MapValue> {
        &self.0
    }

    /// Checks every key parses as a pattern; run before accepting a
    /// client-declared map.
    pub fn validate(&self) -> Result<(), HubError> {
        for pattern in self.0.keys() {
            SubscriptionPattern::parse(pattern)?;
        }
        Ok(())
    }

    /// Returns the annotations of the most specific entry matching
    /// `mtype`, or `None` if no entry matches.
    ///
    /// An exact entry is preferred over any wildcard; among wildcards the
    /// longest stem wins.
    pub fn matcher(&self, mtype: &MType) -> Option<&MapValue> {
        let mut best: Option<(usize, &MapValue)> = None;
        for (raw, annotations) in &self.0 {
            // Unparseable keys cannot appear post-validate; skip defensively.
            let Ok(pattern) = SubscriptionPattern::parse(raw) else {
                continue;
            };
            if !pattern.matches(mtype) {
                continue;
            }
            let rank = pattern.specificity();
            if best.map_or(true, |(current, _)| rank > current) {
                best = Some((rank, annotations));
            }
        }
        best.map(|(_, annotations)| annotations)
    }

    pub fn is_subscribed(&self, mtype: &MType) -> bool {
        self.matcher(mtype).is_some()
    }
}
