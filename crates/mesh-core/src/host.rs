//! Hostname matching.
//!
//! Hostnames are FQDNs with optional leading wildcards (`*.example.com`).
//! Destination-rule and cluster-local lookups use most-specific-first
//! matching: buckets keep their host lists pre-sorted so lookup is a
//! linear scan with early exit.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A service hostname, possibly wildcarded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hostname(String);

impl Hostname {
    /// Create a hostname from a string.
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }

    /// The hostname as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this hostname is a wildcard (`*` or `*.suffix`).
    pub fn is_wildcard(&self) -> bool {
        self.0.starts_with('*')
    }

    /// Whether this hostname matches `other`.
    ///
    /// `*.example.com` matches `foo.example.com` and `*.example.com`, but
    /// not `example.com`. Exact hostnames match only themselves. A bare
    /// `*` matches everything.
    pub fn matches(&self, other: &Hostname) -> bool {
        if self.0 == "*" {
            return true;
        }
        if self.is_wildcard() {
            let suffix = &self.0[1..];
            if other.is_wildcard() {
                // *.foo.com matches *.bar.foo.com but not the reverse.
                other.0.len() >= self.0.len() && other.0.ends_with(suffix)
            } else {
                other.0.len() > suffix.len() && other.0.ends_with(suffix)
            }
        } else {
            self.0 == other.0
        }
    }

    /// Specificity used for most-specific-first ordering: exact hosts
    /// before wildcards, longer names before shorter ones.
    fn specificity(&self) -> (bool, usize) {
        (!self.is_wildcard(), self.0.len())
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Hostname {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Hostname {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Sort hosts most-specific-first, the order lookup buckets are kept in.
pub fn sort_most_specific(hosts: &mut [Hostname]) {
    hosts.sort_by(|a, b| b.specificity().cmp(&a.specificity()));
}

/// Find the most specific host in `hosts` matching `needle`.
///
/// `hosts` must already be sorted most-specific-first; the first match
/// wins.
pub fn most_specific_host_match<'a>(
    needle: &Hostname,
    hosts: &'a [Hostname],
) -> Option<&'a Hostname> {
    hosts.iter().find(|h| h.matches(needle))
}
