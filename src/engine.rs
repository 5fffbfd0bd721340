use std::sync::Arc;

use serde::Serialize;
use tokio::time::{sleep_until, Instant};

use crate::{
    config::EnforcementPolicy,
    executor::{EngineStats, Executor, RenameOutcome, RenameRequest},
    ids::ChannelId,
    intake::{Signal, Trigger},
    platform::{with_timeout, Platform, PlatformError},
    sanitize::sanitize,
    scheduler::{decide, Decision, RuntimeTable, SuppressReason},
    snapshot::LiveSnapshot,
    store::{NameLock, StateStore},
    template::resolve,
};

/// The name enforcement engine.
///
/// Cloning is cheap; every clone drives the same runtime table and executor.
/// All methods that spawn work must be called from within a tokio runtime.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    platform: Arc<dyn Platform>,
    store: Arc<dyn StateStore>,
    policy: EnforcementPolicy,
    runtime: Arc<RuntimeTable>,
    executor: Arc<Executor>,
    stats: Arc<EngineStats>,
}

/// Result of one evaluation of a channel.
#[derive(Debug)]
pub(crate) enum Evaluation {
    NotLocked,
    Suppressed(SuppressReason),
    Queued(tokio::sync::oneshot::Receiver<RenameOutcome>),
    Failed(PlatformError),
}

/// What [`Engine::enforce_now`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforceOutcome {
    NotLocked,
    Suppressed(SuppressReason),
    Executed(RenameOutcome),

    /// Live state could not be read.
    Failed(PlatformError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub locked_channels: usize,
    pub tracked_channels: usize,
    pub renames_applied: u64,
    pub renames_already_current: u64,
    pub renames_deferred: u64,
    pub renames_failed: u64,
}

impl Engine {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn StateStore>,
        policy: EnforcementPolicy,
    ) -> Self {
        let runtime = Arc::new(RuntimeTable::new());
        let stats = Arc::new(EngineStats::default());
        let executor = Arc::new(Executor::new(
            Arc::clone(&platform),
            Arc::clone(&runtime),
            Arc::clone(&stats),
            policy,
        ));

        Self {
            inner: Arc::new(EngineInner {
                platform,
                store,
                policy,
                runtime,
                executor,
                stats,
            }),
        }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.inner.platform
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.inner.store
    }

    pub fn policy(&self) -> &EnforcementPolicy {
        &self.inner.policy
    }

    pub fn runtime(&self) -> &RuntimeTable {
        &self.inner.runtime
    }

    pub fn status(&self) -> StatusReport {
        let stats = &self.inner.stats;
        StatusReport {
            locked_channels: self.inner.store.all_locks().len(),
            tracked_channels: self.inner.runtime.len(),
            renames_applied: stats.applied(),
            renames_already_current: stats.already_current(),
            renames_deferred: stats.deferred(),
            renames_failed: stats.failed(),
        }
    }

    /// Asks the engine to look at a channel again.
    ///
    /// Forced signals are evaluated right away. Everything else is debounced:
    /// the evaluation runs once the settle delay and the channel's cooldown
    /// have both passed, and signals arriving before then fold into it.
    pub fn reconsider(&self, signal: Signal) {
        let channel = signal.channel_id;

        if signal.trigger.is_forced() {
            let engine = self.clone();
            tokio::spawn(async move {
                let outcome = engine.enforce_now(channel, true).await;
                log::debug!("Forced enforcement of {}: {:?}", channel, outcome);
            });
            return;
        }

        if self.inner.store.lock(signal.guild_id, channel).is_none() {
            log::trace!("Ignoring {:?} for unlocked channel {}", signal.trigger, channel);
            return;
        }

        let now = Instant::now();
        let policy = &self.inner.policy;
        let due = self.inner.runtime.update(channel, |state| {
            state.revalidate |= signal.trigger.revalidates();

            let settled = now + policy.settle_delay;
            match state.cooldown_ready_at(policy.cooldown) {
                Some(ready_at) => settled.max(ready_at),
                None => settled,
            }
        });

        self.arm(channel, due);
    }

    /// Signals every locked channel.
    pub fn sweep(&self) {
        let locks = self.inner.store.all_locks();
        log::trace!("Sweeping {} locked channel(s)", locks.len());

        for NameLock {
            guild_id,
            channel_id,
            ..
        } in locks
        {
            self.reconsider(Signal {
                guild_id,
                channel_id,
                trigger: Trigger::Sweep,
            });
        }
    }

    /// Evaluates `channel` immediately and waits for the executor's verdict.
    /// With `forced`, the unchanged and cooldown checks are skipped.
    pub async fn enforce_now(&self, channel: ChannelId, forced: bool) -> EnforceOutcome {
        match self.evaluate(channel, forced).await {
            Evaluation::NotLocked => EnforceOutcome::NotLocked,
            Evaluation::Suppressed(reason) => EnforceOutcome::Suppressed(reason),
            Evaluation::Failed(err) => EnforceOutcome::Failed(err),
            Evaluation::Queued(receiver) => match receiver.await {
                Ok(outcome) => EnforceOutcome::Executed(outcome),
                Err(_) => EnforceOutcome::Failed(PlatformError::Unavailable(
                    "rename worker stopped".to_owned(),
                )),
            },
        }
    }

    /// Schedules an evaluation of `channel` at `due` unless one is already
    /// waiting.
    fn arm(&self, channel: ChannelId, due: Instant) {
        let armed = self.inner.runtime.update(channel, |state| {
            !std::mem::replace(&mut state.pending, true)
        });
        if !armed {
            log::trace!("Evaluation of {} already pending", channel);
            return;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            sleep_until(due).await;
            engine
                .inner
                .runtime
                .update(channel, |state| state.pending = false);
            engine.evaluate(channel, false).await;
        });
    }

    pub(crate) async fn evaluate(&self, channel: ChannelId, forced: bool) -> Evaluation {
        let inner = &self.inner;

        let Some(lock) = inner.store.lock_for_channel(channel) else {
            inner.runtime.forget(channel);
            return Evaluation::NotLocked;
        };

        let timeout = inner.policy.call_timeout;
        let snapshot = match LiveSnapshot::gather(
            inner.platform.as_ref(),
            inner.store.as_ref(),
            lock.guild_id,
            channel,
            &lock.template,
            timeout,
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(err) => return self.read_failed(channel, err),
        };

        let fallback = inner.store.fallback_format(lock.guild_id, channel);
        let desired = sanitize(&resolve(&lock.template, &snapshot, fallback.as_deref()));

        let revalidate = inner.runtime.update(channel, |state| {
            std::mem::take(&mut state.revalidate)
                && state.last_applied_name.as_deref() == Some(desired.as_str())
        });
        if revalidate {
            match with_timeout(timeout, inner.platform.channel_name(channel)).await {
                Ok(live) if live == desired => {}
                Ok(live) => {
                    log::info!(
                        "Channel {} was renamed to {:?} outside of the lock",
                        channel,
                        live
                    );
                    inner
                        .runtime
                        .update(channel, |state| state.last_applied_name = None);
                }
                Err(err) => return self.read_failed(channel, err),
            }
        }

        let now = Instant::now();
        let decision = inner.runtime.update(channel, |state| {
            state.last_evaluated_at = Some(now);
            let decision = decide(state, &desired, forced, now, &inner.policy);
            if decision == Decision::Queue {
                state.record_request(&desired, now);
            }
            decision
        });

        match decision {
            Decision::Queue => {
                log::debug!("Queueing rename of {} to {:?}", channel, desired);
                Evaluation::Queued(inner.executor.enqueue(RenameRequest {
                    guild_id: lock.guild_id,
                    channel_id: channel,
                    desired,
                }))
            }
            Decision::Suppress(reason) => {
                match reason {
                    SuppressReason::Cooldown { ready_at } => {
                        log::trace!("{} cooling down; re-evaluating later", channel);
                        self.arm(channel, ready_at);
                    }
                    SuppressReason::EmptyName => log::warn!(
                        "Template {:?} for channel {} resolves to an empty name",
                        lock.template,
                        channel
                    ),
                    SuppressReason::Unchanged | SuppressReason::Backoff { .. } => {}
                }
                Evaluation::Suppressed(reason)
            }
        }
    }

    fn read_failed(&self, channel: ChannelId, err: PlatformError) -> Evaluation {
        if err.is_transient() {
            let until = self.inner.runtime.record_backoff(
                channel,
                &err,
                self.inner.policy.backoff,
                Instant::now(),
            );
            log::warn!(
                "Could not read live state for {} ({}); backing off for {:?}",
                channel,
                err,
                until.saturating_duration_since(Instant::now())
            );
        } else {
            log::warn!("Could not read live state for {}: {}", channel, err);
        }
        Evaluation::Failed(err)
    }
}
