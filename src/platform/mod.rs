//! The chat platform the engine enforces names on.
//!
//! Everything the engine needs from the outside world goes through the
//! [`Platform`] trait. `InMemoryPlatform` is a scripted implementation used by
//! tests; `DiscordPlatform` talks to Discord through serenity.

mod discord;
mod in_memory;

use std::{collections::BTreeSet, future::Future, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::ids::{ChannelId, GuildId, RoleId};

pub use discord::{DiscordHandler, DiscordPlatform};
pub use in_memory::InMemoryPlatform;

/// A member currently connected to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveMember {
    pub display_name: String,
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("rate limited by the platform")]
    Throttled { retry_after: Option<Duration> },

    #[error("platform call timed out")]
    Timeout,

    #[error("platform unavailable: {0}")]
    Unavailable(String),

    #[error("channel not found")]
    NotFound,

    #[error("missing permissions to manage the channel")]
    Forbidden,

    #[error("request rejected by the platform: {0}")]
    Rejected(String),
}

impl PlatformError {
    /// Transient errors are retried by the next reconsideration once the
    /// backoff window passes. Everything else drops the pending rename.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Throttled { .. } | PlatformError::Timeout | PlatformError::Unavailable(_)
        )
    }

    /// How long to stay away from the channel after this error, given the
    /// configured minimum.
    pub fn backoff(&self, minimum: Duration) -> Duration {
        match self {
            PlatformError::Throttled {
                retry_after: Some(retry_after),
            } => minimum.max(*retry_after),
            _ => minimum,
        }
    }
}

#[async_trait]
pub trait Platform: Send + Sync + 'static {
    /// Members connected to `channel`, in a stable order.
    async fn live_members(&self, channel: ChannelId) -> Result<Vec<LiveMember>, PlatformError>;

    /// Non-bot members of `guild` whose presence isn't offline. With a role
    /// filter, only members holding at least one of those roles count.
    async fn online_count(
        &self,
        guild: GuildId,
        role_filter: Option<&BTreeSet<RoleId>>,
    ) -> Result<u64, PlatformError>;

    /// The name the channel carries right now.
    async fn channel_name(&self, channel: ChannelId) -> Result<String, PlatformError>;

    /// The guild owning `channel`.
    async fn channel_guild(&self, channel: ChannelId) -> Result<GuildId, PlatformError>;

    async fn rename_channel(&self, channel: ChannelId, name: &str) -> Result<(), PlatformError>;
}

/// Runs a platform call under a deadline. Running out of time is reported as
/// [`PlatformError::Timeout`].
pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, PlatformError>>,
) -> Result<T, PlatformError> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(PlatformError::Timeout))
}
