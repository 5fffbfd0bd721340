use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::ids::{ChannelId, GuildId, RoleId};

use super::{NameLock, StateStore, StoreError};

pub(crate) type ChannelMap = BTreeMap<GuildId, BTreeMap<ChannelId, String>>;
pub(crate) type RoleMap = BTreeMap<GuildId, BTreeSet<RoleId>>;

/// A store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    locks: RwLock<ChannelMap>,
    formats: RwLock<ChannelMap>,
    mod_roles: RwLock<RoleMap>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(locks: ChannelMap, formats: ChannelMap, mod_roles: RoleMap) -> Self {
        Self {
            locks: RwLock::new(locks),
            formats: RwLock::new(formats),
            mod_roles: RwLock::new(mod_roles),
        }
    }

    pub(crate) fn locks_snapshot(&self) -> ChannelMap {
        read(&self.locks).clone()
    }

    pub(crate) fn formats_snapshot(&self) -> ChannelMap {
        read(&self.formats).clone()
    }

    pub(crate) fn mod_roles_snapshot(&self) -> RoleMap {
        read(&self.mod_roles).clone()
    }

    pub(crate) fn replace_locks(&self, locks: ChannelMap) {
        *write(&self.locks) = locks;
    }

    pub(crate) fn replace_formats(&self, formats: ChannelMap) {
        *write(&self.formats) = formats;
    }

    pub(crate) fn replace_mod_roles(&self, mod_roles: RoleMap) {
        *write(&self.mod_roles) = mod_roles;
    }
}

/// Removes one channel entry, dropping the guild once it has none left.
pub(crate) fn remove_channel_entry(
    map: &mut ChannelMap,
    guild: GuildId,
    channel: ChannelId,
) -> bool {
    let Some(channels) = map.get_mut(&guild) else {
        return false;
    };

    let removed = channels.remove(&channel).is_some();
    if channels.is_empty() {
        map.remove(&guild);
    }
    removed
}

pub(crate) fn set_guild_roles(map: &mut RoleMap, guild: GuildId, roles: BTreeSet<RoleId>) {
    if roles.is_empty() {
        map.remove(&guild);
    } else {
        map.insert(guild, roles);
    }
}

fn guild_entries(map: &ChannelMap, guild: GuildId) -> Vec<(ChannelId, String)> {
    map.get(&guild)
        .map(|channels| {
            channels
                .iter()
                .map(|(channel, value)| (*channel, value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

impl StateStore for MemoryStore {
    fn lock(&self, guild: GuildId, channel: ChannelId) -> Option<String> {
        read(&self.locks)
            .get(&guild)
            .and_then(|channels| channels.get(&channel))
            .cloned()
    }

    fn lock_for_channel(&self, channel: ChannelId) -> Option<NameLock> {
        read(&self.locks).iter().find_map(|(guild, channels)| {
            channels.get(&channel).map(|template| NameLock {
                guild_id: *guild,
                channel_id: channel,
                template: template.clone(),
            })
        })
    }

    fn set_lock(
        &self,
        guild: GuildId,
        channel: ChannelId,
        template: &str,
    ) -> Result<(), StoreError> {
        write(&self.locks)
            .entry(guild)
            .or_default()
            .insert(channel, template.to_owned());
        Ok(())
    }

    fn remove_lock(&self, guild: GuildId, channel: ChannelId) -> Result<bool, StoreError> {
        Ok(remove_channel_entry(&mut write(&self.locks), guild, channel))
    }

    fn guild_locks(&self, guild: GuildId) -> Vec<NameLock> {
        guild_entries(&read(&self.locks), guild)
            .into_iter()
            .map(|(channel_id, template)| NameLock {
                guild_id: guild,
                channel_id,
                template,
            })
            .collect()
    }

    fn all_locks(&self) -> Vec<NameLock> {
        read(&self.locks)
            .iter()
            .flat_map(|(guild, channels)| {
                channels.iter().map(|(channel, template)| NameLock {
                    guild_id: *guild,
                    channel_id: *channel,
                    template: template.clone(),
                })
            })
            .collect()
    }

    fn fallback_format(&self, guild: GuildId, channel: ChannelId) -> Option<String> {
        read(&self.formats)
            .get(&guild)
            .and_then(|channels| channels.get(&channel))
            .cloned()
    }

    fn set_fallback_format(
        &self,
        guild: GuildId,
        channel: ChannelId,
        format: &str,
    ) -> Result<(), StoreError> {
        write(&self.formats)
            .entry(guild)
            .or_default()
            .insert(channel, format.to_owned());
        Ok(())
    }

    fn guild_fallback_formats(&self, guild: GuildId) -> Vec<(ChannelId, String)> {
        guild_entries(&read(&self.formats), guild)
    }

    fn moderator_roles(&self, guild: GuildId) -> BTreeSet<RoleId> {
        read(&self.mod_roles)
            .get(&guild)
            .cloned()
            .unwrap_or_default()
    }

    fn set_moderator_roles(
        &self,
        guild: GuildId,
        roles: BTreeSet<RoleId>,
    ) -> Result<(), StoreError> {
        set_guild_roles(&mut write(&self.mod_roles), guild, roles);
        Ok(())
    }
}
