//! Push requests and the merge law.
//!
//! A [`PushRequest`] travels from change-event handlers through the
//! debouncer and the per-connection push queue. Bursts are collapsed by
//! [`PushRequest::merge`]; an empty configs-updated set means "everything
//! changed" and always wins a merge.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use mesh_core::ConfigKey;

use crate::context::PushContext;

/// Why a push was requested. A fixed set, to bound metric cardinality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TriggerReason {
    /// An endpoint changed.
    Endpoint,
    /// A config object changed.
    Config,
    /// A service changed.
    Service,
    /// A single proxy changed (labels, locality).
    Proxy,
    /// Global configuration changed (mesh config).
    Global,
    /// A secret changed.
    Secret,
    /// A debug-triggered push.
    Debug,
    /// Trigger could not be classified.
    Unknown,
}

impl TriggerReason {
    /// Stable label used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Endpoint => "endpoint",
            TriggerReason::Config => "config",
            TriggerReason::Service => "service",
            TriggerReason::Proxy => "proxy",
            TriggerReason::Global => "global",
            TriggerReason::Secret => "secret",
            TriggerReason::Debug => "debug",
            TriggerReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to push configuration to proxies.
#[derive(Clone)]
pub struct PushRequest {
    /// Whether a full push (snapshot rebuild, proxy state refresh) is
    /// required. Incremental pushes reuse the current snapshot.
    pub full: bool,

    /// Configs that changed. Empty means everything changed and every
    /// proxy gets an update; otherwise only proxies depending on one of
    /// these keys are pushed.
    pub configs_updated: HashSet<ConfigKey>,

    /// Snapshot to push from. None until the debouncer has built one.
    pub push: Option<Arc<PushContext>>,

    /// When the push entered the queue. Does not include debounce time.
    pub start: Instant,

    /// Trigger reasons, concatenated across merges (not deduplicated, or
    /// bursts would be undercounted).
    pub reasons: Vec<TriggerReason>,
}

impl PushRequest {
    /// A full push for everything.
    pub fn full(reason: TriggerReason) -> Self {
        Self {
            full: true,
            configs_updated: HashSet::new(),
            push: None,
            start: Instant::now(),
            reasons: vec![reason],
        }
    }

    /// A full push scoped to one changed config.
    pub fn for_config(key: ConfigKey, reason: TriggerReason) -> Self {
        Self {
            full: true,
            configs_updated: [key].into_iter().collect(),
            push: None,
            start: Instant::now(),
            reasons: vec![reason],
        }
    }

    /// An incremental push scoped to the given configs.
    pub fn incremental(
        configs: impl IntoIterator<Item = ConfigKey>,
        reason: TriggerReason,
    ) -> Self {
        Self {
            full: false,
            configs_updated: configs.into_iter().collect(),
            push: None,
            start: Instant::now(),
            reasons: vec![reason],
        }
    }

    /// Merge two requests.
    ///
    /// The law: full is the OR; configs-updated is the union only when
    /// both sides are non-empty (empty means "everything" and absorbs the
    /// other side); reasons concatenate; the snapshot is the later one;
    /// the start is the earlier one.
    pub fn merge(mut self, other: PushRequest) -> PushRequest {
        let start = self.start.min(other.start);
        let full = self.full || other.full;

        // The other push context is presumed later and more up to date.
        let push = other.push.or(self.push);

        let mut reasons = std::mem::take(&mut self.reasons);
        reasons.extend(other.reasons);

        let configs_updated =
            if self.configs_updated.is_empty() || other.configs_updated.is_empty() {
                HashSet::new()
            } else {
                let mut merged = self.configs_updated;
                merged.extend(other.configs_updated);
                merged
            };

        PushRequest {
            full,
            configs_updated,
            push,
            start,
            reasons,
        }
    }
}

impl fmt::Debug for PushRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushRequest")
            .field("full", &self.full)
            .field("configs_updated", &self.configs_updated.len())
            .field("reasons", &self.reasons)
            .field("has_push", &self.push.is_some())
            .finish()
    }
}
