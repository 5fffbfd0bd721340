use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;

use crate::ids::{ChannelId, GuildId, RoleId, UserId};

use super::{LiveMember, Platform, PlatformError};

/// A scripted, in-process platform.
///
/// Channels, members, presence and roles are set up through plain methods;
/// every rename that reaches the platform is recorded so callers can assert on
/// exactly which provider writes happened. Failures can be queued per channel,
/// and renames and reads can each be given an artificial latency.
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    channels: HashMap<ChannelId, ChannelEntry>,
    members: HashMap<(GuildId, UserId), MemberEntry>,
    renames: Vec<(ChannelId, String)>,
    rename_failures: HashMap<ChannelId, VecDeque<PlatformError>>,
    rename_latency: Option<Duration>,
    read_latency: Option<Duration>,
    in_flight: HashMap<ChannelId, usize>,
    max_in_flight: HashMap<ChannelId, usize>,
}

#[derive(Debug)]
struct ChannelEntry {
    guild: GuildId,
    name: String,
    connected: Vec<UserId>,
}

#[derive(Debug)]
struct MemberEntry {
    display_name: String,
    is_bot: bool,
    online: bool,
    roles: BTreeSet<RoleId>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_channel(&self, guild: GuildId, channel: ChannelId, name: &str) {
        self.inner().channels.insert(
            channel,
            ChannelEntry {
                guild,
                name: name.to_owned(),
                connected: Vec::new(),
            },
        );
    }

    pub fn remove_channel(&self, channel: ChannelId) {
        self.inner().channels.remove(&channel);
    }

    /// Renames a channel behind the engine's back, like a moderator would.
    pub fn set_channel_name(&self, channel: ChannelId, name: &str) {
        if let Some(entry) = self.inner().channels.get_mut(&channel) {
            entry.name = name.to_owned();
        }
    }

    /// Adds an online, role-less member.
    pub fn add_member(&self, guild: GuildId, user: UserId, display_name: &str) {
        self.insert_member(guild, user, display_name, false);
    }

    pub fn add_bot(&self, guild: GuildId, user: UserId, display_name: &str) {
        self.insert_member(guild, user, display_name, true);
    }

    fn insert_member(&self, guild: GuildId, user: UserId, display_name: &str, is_bot: bool) {
        self.inner().members.insert(
            (guild, user),
            MemberEntry {
                display_name: display_name.to_owned(),
                is_bot,
                online: true,
                roles: BTreeSet::new(),
            },
        );
    }

    pub fn set_online(&self, guild: GuildId, user: UserId, online: bool) {
        if let Some(member) = self.inner().members.get_mut(&(guild, user)) {
            member.online = online;
        }
    }

    pub fn grant_role(&self, guild: GuildId, user: UserId, role: RoleId) {
        if let Some(member) = self.inner().members.get_mut(&(guild, user)) {
            member.roles.insert(role);
        }
    }

    /// Connects `user` to `channel`, disconnecting them from any other channel.
    pub fn join(&self, channel: ChannelId, user: UserId) {
        let mut inner = self.inner();
        for entry in inner.channels.values_mut() {
            entry.connected.retain(|connected| *connected != user);
        }
        if let Some(entry) = inner.channels.get_mut(&channel) {
            entry.connected.push(user);
        }
    }

    pub fn leave(&self, channel: ChannelId, user: UserId) {
        if let Some(entry) = self.inner().channels.get_mut(&channel) {
            entry.connected.retain(|connected| *connected != user);
        }
    }

    /// The next rename of `channel` fails with `error` instead of applying.
    pub fn fail_next_rename(&self, channel: ChannelId, error: PlatformError) {
        self.inner()
            .rename_failures
            .entry(channel)
            .or_default()
            .push_back(error);
    }

    pub fn set_rename_latency(&self, latency: Duration) {
        self.inner().rename_latency = Some(latency);
    }

    /// Delays every live-state read: members, online counts and channel names.
    pub fn set_read_latency(&self, latency: Duration) {
        self.inner().read_latency = Some(latency);
    }

    async fn read_delay(&self) {
        let latency = self.inner().read_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// The channel's current name without going through the async trait.
    pub fn name_of(&self, channel: ChannelId) -> Option<String> {
        self.inner()
            .channels
            .get(&channel)
            .map(|entry| entry.name.clone())
    }

    /// Every rename call that reached the platform, including failed ones.
    pub fn rename_calls(&self) -> Vec<(ChannelId, String)> {
        self.inner().renames.clone()
    }

    pub fn rename_calls_for(&self, channel: ChannelId) -> Vec<String> {
        self.inner()
            .renames
            .iter()
            .filter(|(renamed, _)| *renamed == channel)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Highest number of renames ever running at once on `channel`.
    pub fn max_concurrent_renames(&self, channel: ChannelId) -> usize {
        self.inner()
            .max_in_flight
            .get(&channel)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Platform for InMemoryPlatform {
    async fn live_members(&self, channel: ChannelId) -> Result<Vec<LiveMember>, PlatformError> {
        self.read_delay().await;

        let inner = self.inner();
        let entry = inner.channels.get(&channel).ok_or(PlatformError::NotFound)?;

        Ok(entry
            .connected
            .iter()
            .filter_map(|user| inner.members.get(&(entry.guild, *user)))
            .map(|member| LiveMember {
                display_name: member.display_name.clone(),
                is_bot: member.is_bot,
            })
            .collect())
    }

    async fn online_count(
        &self,
        guild: GuildId,
        role_filter: Option<&BTreeSet<RoleId>>,
    ) -> Result<u64, PlatformError> {
        self.read_delay().await;

        let inner = self.inner();

        let count = inner
            .members
            .iter()
            .filter(|((member_guild, _), _)| *member_guild == guild)
            .filter(|(_, member)| !member.is_bot && member.online)
            .filter(|(_, member)| match role_filter {
                Some(roles) => !member.roles.is_disjoint(roles),
                None => true,
            })
            .count();

        Ok(count as u64)
    }

    async fn channel_name(&self, channel: ChannelId) -> Result<String, PlatformError> {
        self.read_delay().await;
        self.name_of(channel).ok_or(PlatformError::NotFound)
    }

    async fn channel_guild(&self, channel: ChannelId) -> Result<GuildId, PlatformError> {
        self.inner()
            .channels
            .get(&channel)
            .map(|entry| entry.guild)
            .ok_or(PlatformError::NotFound)
    }

    async fn rename_channel(&self, channel: ChannelId, name: &str) -> Result<(), PlatformError> {
        let latency = {
            let mut inner = self.inner();
            inner.renames.push((channel, name.to_owned()));

            let in_flight = inner.in_flight.entry(channel).or_default();
            *in_flight += 1;
            let current = *in_flight;
            let max = inner.max_in_flight.entry(channel).or_default();
            *max = (*max).max(current);

            inner.rename_latency
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner();
        if let Some(in_flight) = inner.in_flight.get_mut(&channel) {
            *in_flight -= 1;
        }

        if let Some(error) = inner
            .rename_failures
            .get_mut(&channel)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let entry = inner
            .channels
            .get_mut(&channel)
            .ok_or(PlatformError::NotFound)?;
        entry.name = name.to_owned();
        Ok(())
    }
}
