use std::time::Duration;

use crate::{
    ids::{ChannelId, GuildId},
    platform::{with_timeout, Platform, PlatformError},
    store::StateStore,
    template::Placeholders,
};

/// Live state a single template resolution reads. Built fresh for every
/// resolution and never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSnapshot {
    /// Non-bot members connected to the channel, in platform order.
    pub member_display_names: Vec<String>,
    pub online_member_count: u64,
    pub online_moderator_count: u64,
}

impl LiveSnapshot {
    pub fn member_count(&self) -> usize {
        self.member_display_names.len()
    }

    /// Reads only the parts of live state `template` refers to. Each read is
    /// bounded by `timeout`.
    pub async fn gather(
        platform: &dyn Platform,
        store: &dyn StateStore,
        guild: GuildId,
        channel: ChannelId,
        template: &str,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let placeholders = Placeholders::scan(template);
        let mut snapshot = LiveSnapshot::default();

        if placeholders.needs_members() {
            snapshot.member_display_names = with_timeout(timeout, platform.live_members(channel))
                .await?
                .into_iter()
                .filter(|member| !member.is_bot)
                .map(|member| member.display_name)
                .collect();
        }

        if placeholders.needs_online() {
            snapshot.online_member_count =
                with_timeout(timeout, platform.online_count(guild, None)).await?;
        }

        if placeholders.needs_online_mods() {
            let roles = store.moderator_roles(guild);
            if !roles.is_empty() {
                snapshot.online_moderator_count =
                    with_timeout(timeout, platform.online_count(guild, Some(&roles))).await?;
            }
        }

        Ok(snapshot)
    }
}
