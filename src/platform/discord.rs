//! Discord, through serenity's cache and HTTP client.

use std::{
    collections::BTreeSet,
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use serenity::{
    all::{Context, EventHandler, GuildChannel, Message, OnlineStatus, Presence, Ready, VoiceState},
    builder::EditChannel,
    cache::Cache,
    http::{Http, HttpError},
    model::id as discord,
};

use crate::{
    commands::{CommandContext, CommandHandler},
    ids::{ChannelId, GuildId, RoleId},
    intake::{EventSender, IntakeEvent},
};

use super::{LiveMember, Platform, PlatformError};

struct Connection {
    cache: Arc<Cache>,
    http: Arc<Http>,
}

/// [`Platform`] backed by a serenity client.
///
/// The engine has to exist before the client does, because the client's event
/// handler feeds the engine. The platform is therefore created empty and
/// [attached](DiscordPlatform::attach) once the client is built. Calls made
/// before that fail with [`PlatformError::Unavailable`].
#[derive(Default)]
pub struct DiscordPlatform {
    connection: OnceLock<Connection>,
}

impl DiscordPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, cache: Arc<Cache>, http: Arc<Http>) {
        if self.connection.set(Connection { cache, http }).is_err() {
            log::warn!("Discord platform was already attached to a client");
        }
    }

    fn connection(&self) -> Result<&Connection, PlatformError> {
        self.connection
            .get()
            .ok_or_else(|| PlatformError::Unavailable("not connected to Discord".to_owned()))
    }

    /// Serenity ids must be non-zero.
    fn channel_id(channel: ChannelId) -> Result<discord::ChannelId, PlatformError> {
        match channel.get() {
            0 => Err(PlatformError::NotFound),
            id => Ok(discord::ChannelId::new(id)),
        }
    }

    /// Finds the cached guild that owns `channel`.
    fn owning_guild(cache: &Cache, channel: discord::ChannelId) -> Option<discord::GuildId> {
        cache.guilds().into_iter().find(|guild_id| {
            cache
                .guild(*guild_id)
                .is_some_and(|guild| guild.channels.contains_key(&channel))
        })
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    async fn live_members(&self, channel: ChannelId) -> Result<Vec<LiveMember>, PlatformError> {
        let connection = self.connection()?;
        let channel = Self::channel_id(channel)?;
        let guild_id =
            Self::owning_guild(&connection.cache, channel).ok_or(PlatformError::NotFound)?;
        let guild = connection
            .cache
            .guild(guild_id)
            .ok_or(PlatformError::NotFound)?;

        let mut members: Vec<(LiveMember, discord::UserId)> = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel))
            .filter_map(|state| {
                let member = guild
                    .members
                    .get(&state.user_id)
                    .or(state.member.as_ref())?;
                Some((
                    LiveMember {
                        display_name: member.display_name().to_owned(),
                        is_bot: member.user.bot,
                    },
                    state.user_id,
                ))
            })
            .collect();

        // The cache is a hash map; sort so the same members always produce
        // the same name.
        members.sort_by(|(a, a_id), (b, b_id)| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a_id.cmp(b_id))
        });

        Ok(members.into_iter().map(|(member, _)| member).collect())
    }

    async fn online_count(
        &self,
        guild: GuildId,
        role_filter: Option<&BTreeSet<RoleId>>,
    ) -> Result<u64, PlatformError> {
        let connection = self.connection()?;
        if guild.get() == 0 {
            return Err(PlatformError::NotFound);
        }
        let guild = connection
            .cache
            .guild(discord::GuildId::new(guild.get()))
            .ok_or(PlatformError::NotFound)?;

        let count = guild
            .presences
            .iter()
            .filter(|(_, presence)| {
                !matches!(presence.status, OnlineStatus::Offline | OnlineStatus::Invisible)
            })
            .filter(|(user_id, presence)| match guild.members.get(*user_id) {
                Some(member) => {
                    !member.user.bot
                        && role_filter.map_or(true, |roles| {
                            member
                                .roles
                                .iter()
                                .any(|role| roles.contains(&RoleId(role.get())))
                        })
                }
                None => role_filter.is_none() && !presence.user.bot.unwrap_or(false),
            })
            .count();

        Ok(count as u64)
    }

    async fn channel_name(&self, channel: ChannelId) -> Result<String, PlatformError> {
        let connection = self.connection()?;
        let channel = Self::channel_id(channel)?;
        let guild_id =
            Self::owning_guild(&connection.cache, channel).ok_or(PlatformError::NotFound)?;

        connection
            .cache
            .guild(guild_id)
            .and_then(|guild| guild.channels.get(&channel).map(|c| c.name.clone()))
            .ok_or(PlatformError::NotFound)
    }

    async fn channel_guild(&self, channel: ChannelId) -> Result<GuildId, PlatformError> {
        let connection = self.connection()?;
        Self::owning_guild(&connection.cache, Self::channel_id(channel)?)
            .map(|guild_id| GuildId(guild_id.get()))
            .ok_or(PlatformError::NotFound)
    }

    async fn rename_channel(&self, channel: ChannelId, name: &str) -> Result<(), PlatformError> {
        let connection = self.connection()?;
        Self::channel_id(channel)?
            .edit(connection.http.as_ref(), EditChannel::new().name(name))
            .await
            .map(|_| ())
            .map_err(map_error)
    }
}

fn map_error(err: serenity::Error) -> PlatformError {
    match &err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            classify_status(response.status_code.as_u16(), &response.error.message)
        }
        _ => PlatformError::Unavailable(err.to_string()),
    }
}

fn classify_status(status: u16, message: &str) -> PlatformError {
    match status {
        429 => PlatformError::Throttled { retry_after: None },
        403 => PlatformError::Forbidden,
        404 => PlatformError::NotFound,
        400..=499 => PlatformError::Rejected(format!("HTTP {status}: {message}")),
        _ => PlatformError::Unavailable(format!("HTTP {status}: {message}")),
    }
}

/// Gateway event handler. Platform events go to the intake; messages go to
/// the command layer.
pub struct DiscordHandler {
    events: EventSender,
    commands: CommandHandler,
}

impl DiscordHandler {
    pub fn new(events: EventSender, commands: CommandHandler) -> Self {
        Self { events, commands }
    }
}

#[serenity::async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        log::info!(
            "Logged in as {} ({} guild(s))",
            ready.user.name,
            ready.guilds.len()
        );
    }

    async fn cache_ready(&self, _ctx: Context, guilds: Vec<discord::GuildId>) {
        log::debug!("Cache ready for {} guild(s)", guilds.len());
        self.events.send(IntakeEvent::Connected);
    }

    async fn message(&self, ctx: Context, message: Message) {
        if message.author.bot {
            return;
        }
        let Some(guild_id) = message.guild_id else {
            return;
        };

        let command_ctx = CommandContext {
            guild_id: GuildId(guild_id.get()),
            channel_id: ChannelId(message.channel_id.get()),
        };

        let Some(reply) = self
            .commands
            .handle_message(command_ctx, &message.content)
            .await
        else {
            return;
        };

        if let Err(err) = message.channel_id.say(&ctx.http, reply).await {
            log::warn!(
                "Could not reply in channel {}: {}",
                message.channel_id,
                err
            );
        }
    }

    async fn voice_state_update(&self, _ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new
            .guild_id
            .or_else(|| old.as_ref().and_then(|old| old.guild_id))
        else {
            return;
        };

        self.events.send(IntakeEvent::VoiceStateChanged {
            guild_id: GuildId(guild_id.get()),
            before: old
                .and_then(|old| old.channel_id)
                .map(|channel| ChannelId(channel.get())),
            after: new.channel_id.map(|channel| ChannelId(channel.get())),
        });
    }

    async fn channel_update(&self, _ctx: Context, _old: Option<GuildChannel>, new: GuildChannel) {
        self.events.send(IntakeEvent::ChannelUpdated {
            guild_id: GuildId(new.guild_id.get()),
            channel_id: ChannelId(new.id.get()),
        });
    }

    async fn presence_update(&self, _ctx: Context, _new_data: Presence) {
        self.events.send(IntakeEvent::PresenceChanged);
    }
}
