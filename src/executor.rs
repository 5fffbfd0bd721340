//! Applies renames, one at a time per channel.
//!
//! Each channel with queued work gets its own worker task. The worker drains
//! the channel's FIFO and exits once it is empty; the next enqueue starts a new
//! one. Distinct channels never wait on each other.

use std::{
    collections::{hash_map::Entry, HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use tokio::{sync::oneshot, time::Instant};

use crate::{
    config::EnforcementPolicy,
    ids::{ChannelId, GuildId},
    platform::{with_timeout, Platform, PlatformError},
    scheduler::RuntimeTable,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRequest {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub desired: String,
}

/// What became of one [`RenameRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    /// The platform accepted the new name.
    Applied,

    /// The channel already carried the desired name; nothing was written.
    AlreadyCurrent,

    /// A transient error, now or earlier, holds the channel until `until`.
    BackedOff { until: Instant },

    /// A permanent error. The request is dropped; the lock stays in place.
    Failed(PlatformError),
}

/// Counters shown on the status endpoint.
#[derive(Debug, Default)]
pub struct EngineStats {
    applied: AtomicU64,
    already_current: AtomicU64,
    deferred: AtomicU64,
    failed: AtomicU64,
}

impl EngineStats {
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn already_current(&self) -> u64 {
        self.already_current.load(Ordering::Relaxed)
    }

    pub fn deferred(&self) -> u64 {
        self.deferred.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct QueuedRename {
    request: RenameRequest,
    reply: oneshot::Sender<RenameOutcome>,
}

pub(crate) struct Executor {
    platform: Arc<dyn Platform>,
    runtime: Arc<RuntimeTable>,
    stats: Arc<EngineStats>,
    policy: EnforcementPolicy,

    /// A channel has an entry exactly while its worker is alive.
    queues: Mutex<HashMap<ChannelId, VecDeque<QueuedRename>>>,
}

impl Executor {
    pub fn new(
        platform: Arc<dyn Platform>,
        runtime: Arc<RuntimeTable>,
        stats: Arc<EngineStats>,
        policy: EnforcementPolicy,
    ) -> Self {
        Self {
            platform,
            runtime,
            stats,
            policy,
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<ChannelId, VecDeque<QueuedRename>>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of channels with a live worker.
    pub fn active_workers(&self) -> usize {
        self.queues().len()
    }

    /// Queues `request` behind any earlier request for the same channel. The
    /// receiver resolves once the request has been processed. Must be called
    /// from within a tokio runtime.
    pub fn enqueue(self: &Arc<Self>, request: RenameRequest) -> oneshot::Receiver<RenameOutcome> {
        let (reply, receiver) = oneshot::channel();
        let channel = request.channel_id;
        let queued = QueuedRename { request, reply };

        match self.queues().entry(channel) {
            Entry::Occupied(mut entry) => {
                log::trace!("Queued rename behind running worker for {}", channel);
                entry.get_mut().push_back(queued);
            }
            Entry::Vacant(entry) => {
                entry.insert(VecDeque::from([queued]));

                let executor = Arc::clone(self);
                tokio::spawn(async move { executor.drain(channel).await });
            }
        }

        receiver
    }

    async fn drain(&self, channel: ChannelId) {
        log::trace!("Rename worker for {} started", channel);

        loop {
            let next = {
                let mut queues = self.queues();
                match queues.get_mut(&channel).and_then(VecDeque::pop_front) {
                    Some(next) => next,
                    None => {
                        queues.remove(&channel);
                        break;
                    }
                }
            };

            let outcome = self.apply(&next.request).await;
            self.runtime.finish_request(channel);

            // The caller may have stopped listening; that's fine.
            let _ = next.reply.send(outcome);
        }

        log::trace!("Rename worker for {} finished", channel);
    }

    async fn apply(&self, request: &RenameRequest) -> RenameOutcome {
        let channel = request.channel_id;
        let timeout = self.policy.call_timeout;

        if let Some(until) = self
            .runtime
            .get(channel)
            .and_then(|state| state.backoff_until)
            .filter(|until| Instant::now() < *until)
        {
            EngineStats::bump(&self.stats.deferred);
            return RenameOutcome::BackedOff { until };
        }

        let current = match with_timeout(timeout, self.platform.channel_name(channel)).await {
            Ok(current) => current,
            Err(err) => return self.failed(request, err),
        };

        if current == request.desired {
            log::debug!("Channel {} is already named {:?}", channel, current);
            self.runtime
                .record_success(channel, &request.desired, Instant::now());
            EngineStats::bump(&self.stats.already_current);
            return RenameOutcome::AlreadyCurrent;
        }

        match with_timeout(
            timeout,
            self.platform.rename_channel(channel, &request.desired),
        )
        .await
        {
            Ok(()) => {
                log::info!(
                    "Renamed channel {} in guild {}: {:?} -> {:?}",
                    channel,
                    request.guild_id,
                    current,
                    request.desired
                );
                self.runtime
                    .record_success(channel, &request.desired, Instant::now());
                EngineStats::bump(&self.stats.applied);
                RenameOutcome::Applied
            }
            Err(err) => self.failed(request, err),
        }
    }

    fn failed(&self, request: &RenameRequest, err: PlatformError) -> RenameOutcome {
        let channel = request.channel_id;

        if err.is_transient() {
            let until = self
                .runtime
                .record_backoff(channel, &err, self.policy.backoff, Instant::now());
            log::warn!(
                "Could not rename channel {} ({}); backing off for {:?}",
                channel,
                err,
                until.saturating_duration_since(Instant::now())
            );
            EngineStats::bump(&self.stats.deferred);
            RenameOutcome::BackedOff { until }
        } else {
            log::error!(
                "Dropping rename of channel {} in guild {} to {:?}: {}",
                channel,
                request.guild_id,
                request.desired,
                err
            );
            EngineStats::bump(&self.stats.failed);
            RenameOutcome::Failed(err)
        }
    }
}
