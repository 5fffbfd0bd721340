//! Per-channel runtime state and the decision of whether a desired name
//! should be handed to the executor right now.
//!
//! Nothing in here is persisted. The table starts empty and can be cleared at
//! any time: the executor compares against the live channel name before
//! writing, so a forgotten `last_applied_name` only costs one extra read.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::Instant;

use crate::{config::EnforcementPolicy, ids::ChannelId, platform::PlatformError};

/// What the engine remembers about one enforced channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRuntimeState {
    pub last_applied_name: Option<String>,
    pub last_attempt_at: Option<Instant>,
    pub last_success_at: Option<Instant>,
    pub backoff_until: Option<Instant>,
    pub last_evaluated_at: Option<Instant>,

    /// The name most recently handed to the executor.
    pub last_requested_name: Option<String>,

    /// Requests handed to the executor that have not finished yet.
    pub(crate) outstanding: usize,

    /// An evaluation is armed and waiting for its due time.
    pub(crate) pending: bool,

    /// The next evaluation should check the live name even if the desired
    /// name matches `last_applied_name`.
    pub(crate) revalidate: bool,
}

impl ResourceRuntimeState {
    pub fn in_backoff(&self, now: Instant) -> bool {
        self.backoff_until.is_some_and(|until| now < until)
    }

    /// Earliest moment the cooldown allows another attempt.
    pub fn cooldown_ready_at(&self, cooldown: Duration) -> Option<Instant> {
        self.last_attempt_at.map(|attempt| attempt + cooldown)
    }

    /// The name the channel will carry once queued work has drained.
    pub fn expected_name(&self) -> Option<&str> {
        if self.outstanding > 0 {
            self.last_requested_name.as_deref()
        } else {
            self.last_applied_name.as_deref()
        }
    }

    pub(crate) fn record_request(&mut self, name: &str, now: Instant) {
        self.last_attempt_at = Some(now);
        self.last_requested_name = Some(name.to_owned());
        self.outstanding += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// The desired name is the one last applied, or the one still queued.
    Unchanged,

    /// The desired name sanitized down to nothing.
    EmptyName,

    /// The previous attempt was too recent.
    Cooldown { ready_at: Instant },

    /// A transient error put the channel in backoff.
    Backoff { until: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Queue,
    Suppress(SuppressReason),
}

/// Decides what to do with `desired` for a channel in `state`.
///
/// A forced evaluation skips the unchanged and cooldown checks but still
/// honors backoff.
pub fn decide(
    state: &ResourceRuntimeState,
    desired: &str,
    forced: bool,
    now: Instant,
    policy: &EnforcementPolicy,
) -> Decision {
    if desired.is_empty() {
        return Decision::Suppress(SuppressReason::EmptyName);
    }

    if !forced && state.expected_name() == Some(desired) {
        return Decision::Suppress(SuppressReason::Unchanged);
    }

    if !forced {
        if let Some(ready_at) = state.cooldown_ready_at(policy.cooldown) {
            if now < ready_at {
                return Decision::Suppress(SuppressReason::Cooldown { ready_at });
            }
        }
    }

    if let Some(until) = state.backoff_until.filter(|until| now < *until) {
        return Decision::Suppress(SuppressReason::Backoff { until });
    }

    Decision::Queue
}

/// The in-memory table of [`ResourceRuntimeState`], keyed by channel.
#[derive(Debug, Default)]
pub struct RuntimeTable {
    states: Mutex<HashMap<ChannelId, ResourceRuntimeState>>,
}

impl RuntimeTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn states(&self) -> MutexGuard<'_, HashMap<ChannelId, ResourceRuntimeState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, channel: ChannelId) -> Option<ResourceRuntimeState> {
        self.states().get(&channel).cloned()
    }

    /// Runs `update` against the channel's state, creating it if needed.
    pub fn update<R>(
        &self,
        channel: ChannelId,
        update: impl FnOnce(&mut ResourceRuntimeState) -> R,
    ) -> R {
        update(self.states().entry(channel).or_default())
    }

    pub fn forget(&self, channel: ChannelId) {
        self.states().remove(&channel);
    }

    pub fn clear(&self) {
        self.states().clear();
    }

    pub fn len(&self) -> usize {
        self.states().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states().is_empty()
    }

    /// Marks one request for `channel` as finished. A channel forgotten in
    /// the meantime is not recreated.
    pub fn finish_request(&self, channel: ChannelId) {
        if let Some(state) = self.states().get_mut(&channel) {
            state.outstanding = state.outstanding.saturating_sub(1);
        }
    }

    pub fn record_success(&self, channel: ChannelId, name: &str, now: Instant) {
        self.update(channel, |state| {
            state.last_applied_name = Some(name.to_owned());
            state.last_success_at = Some(now);
            state.backoff_until = None;
        });
    }

    /// Puts the channel in backoff after `error` and returns when it ends.
    pub fn record_backoff(
        &self,
        channel: ChannelId,
        error: &PlatformError,
        minimum: Duration,
        now: Instant,
    ) -> Instant {
        let until = now + error.backoff(minimum);
        self.update(channel, |state| {
            // Never shorten a window that is already running.
            let until = state.backoff_until.map_or(until, |current| current.max(until));
            state.backoff_until = Some(until);
            until
        })
    }
}
