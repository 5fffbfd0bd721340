//! Persistent configuration: name locks, fallback formats and moderator roles.
//!
//! The engine only relies on per-key atomic reads and writes. `MemoryStore`
//! keeps everything in process; `JsonFileStore` mirrors it to three JSON files
//! after every mutation.

mod json_file;
mod memory;

use std::{collections::BTreeSet, io, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::ids::{ChannelId, GuildId, RoleId};

pub use json_file::{JsonFileStore, FORMATS_FILE, LOCKS_FILE, MOD_ROLES_FILE};
pub use memory::MemoryStore;

/// A channel whose name is under enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameLock {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub template: String,
}

pub trait StateStore: Send + Sync + 'static {
    fn lock(&self, guild: GuildId, channel: ChannelId) -> Option<String>;

    /// Finds the lock for `channel` without knowing its guild.
    fn lock_for_channel(&self, channel: ChannelId) -> Option<NameLock>;

    fn set_lock(&self, guild: GuildId, channel: ChannelId, template: &str)
        -> Result<(), StoreError>;

    /// Returns whether a lock was removed.
    fn remove_lock(&self, guild: GuildId, channel: ChannelId) -> Result<bool, StoreError>;

    /// Locks of one guild, ordered by channel.
    fn guild_locks(&self, guild: GuildId) -> Vec<NameLock>;

    /// Every lock across all guilds.
    fn all_locks(&self) -> Vec<NameLock>;

    fn fallback_format(&self, guild: GuildId, channel: ChannelId) -> Option<String>;

    fn set_fallback_format(
        &self,
        guild: GuildId,
        channel: ChannelId,
        format: &str,
    ) -> Result<(), StoreError>;

    /// Fallback formats of one guild, ordered by channel.
    fn guild_fallback_formats(&self, guild: GuildId) -> Vec<(ChannelId, String)>;

    /// Empty when the guild has no moderator roles configured.
    fn moderator_roles(&self, guild: GuildId) -> BTreeSet<RoleId>;

    fn set_moderator_roles(&self, guild: GuildId, roles: BTreeSet<RoleId>)
        -> Result<(), StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not valid store data", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}
