//! The text command layer: parses `!command` messages and runs them against
//! the store and the engine.

use std::{collections::BTreeSet, fmt::Write as _};

use thiserror::Error;

use crate::{
    engine::{EnforceOutcome, Engine},
    executor::RenameOutcome,
    ids::{ChannelId, ChannelRef, GuildId, RoleId},
    platform::with_timeout,
    template::PLACEHOLDERS,
};

/// Where a command was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandContext {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    VariableList,
    Rename {
        target: Option<ChannelId>,
        name: String,
    },
    LockName {
        target: Option<ChannelId>,
        template: String,
    },
    UnlockName {
        target: Option<ChannelId>,
    },
    LockedList,
    SetFormat {
        target: Option<ChannelId>,
        format: String,
    },
    ShowFormat,

    /// An empty set clears the guild's moderator roles.
    SetModRole {
        roles: BTreeSet<RoleId>,
    },
}

/// A command that was recognized but couldn't be parsed. The message is the
/// reply sent back to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("⚠️ Usage: `{prefix}{usage}`")]
    Usage { prefix: String, usage: &'static str },

    #[error("⚠️ Invalid channel reference.")]
    InvalidChannel,

    #[error("⚠️ `{0}` is not a role mention or role ID.")]
    InvalidRole(String),
}

impl Command {
    /// Parses `content` as a command. Returns `None` for messages that aren't
    /// commands at all, including unknown command names.
    pub fn parse(prefix: &str, content: &str) -> Option<Result<Self, CommandError>> {
        let body = content.trim().strip_prefix(prefix)?;
        let (name, rest) = split_first(body);
        let usage = |usage: &'static str| CommandError::Usage {
            prefix: prefix.to_owned(),
            usage,
        };

        let command = match name.to_lowercase().as_str() {
            "help" => Ok(Command::Help),
            "status" => Ok(Command::Status),
            "variablelist" => Ok(Command::VariableList),
            "lockedlist" => Ok(Command::LockedList),
            "showformat" => Ok(Command::ShowFormat),

            "rename" => targeted(rest)
                .map(|(target, name)| Command::Rename { target, name })
                .ok_or_else(|| usage("rename [channel] <new name>")),

            "lockname" => targeted(rest)
                .map(|(target, template)| Command::LockName { target, template })
                .ok_or_else(|| usage("lockname [channel] <desired-name>")),

            "setformat" => targeted(rest)
                .map(|(target, format)| Command::SetFormat { target, format })
                .ok_or_else(|| usage("setformat [channel] <format>")),

            "unlockname" => match rest {
                "" => Ok(Command::UnlockName { target: None }),
                reference => ChannelRef::parse(reference)
                    .map(|ChannelRef(channel)| Command::UnlockName {
                        target: Some(channel),
                    })
                    .ok_or(CommandError::InvalidChannel),
            },

            "setmodrole" => parse_roles(rest, || usage("setmodrole <@role|id> [more roles...]")),

            _ => return None,
        };

        Some(command)
    }
}

/// Splits off the first whitespace-delimited word.
fn split_first(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (text, ""),
    }
}

/// Parses `[channel] <text>`. A leading channel reference only counts as a
/// target when text follows it; otherwise the whole argument is the text.
fn targeted(args: &str) -> Option<(Option<ChannelId>, String)> {
    let (first, rest) = split_first(args);
    if first.is_empty() {
        return None;
    }

    match ChannelRef::parse(first) {
        Some(ChannelRef(channel)) if !rest.is_empty() => Some((Some(channel), unquote(rest))),
        Some(_) => None,
        None => Some((None, unquote(args.trim()))),
    }
}

fn unquote(text: &str) -> String {
    for quote in ['"', '\'', '`'] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.to_owned();
        }
    }
    text.to_owned()
}

fn parse_roles(
    args: &str,
    usage: impl FnOnce() -> CommandError,
) -> Result<Command, CommandError> {
    if args.is_empty() {
        return Err(usage());
    }
    if args.eq_ignore_ascii_case("clear") || args.eq_ignore_ascii_case("none") {
        return Ok(Command::SetModRole {
            roles: BTreeSet::new(),
        });
    }

    args.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|word| !word.is_empty())
        .map(|word| {
            RoleId::parse_mention(word).ok_or_else(|| CommandError::InvalidRole(word.to_owned()))
        })
        .collect::<Result<BTreeSet<_>, _>>()
        .map(|roles| Command::SetModRole { roles })
}

/// Runs commands for one bot.
#[derive(Clone)]
pub struct CommandHandler {
    engine: Engine,
    prefix: String,
}

impl CommandHandler {
    pub fn new(engine: Engine, prefix: impl Into<String>) -> Self {
        Self {
            engine,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Handles one message. Returns the reply to send, if any.
    pub async fn handle_message(&self, ctx: CommandContext, content: &str) -> Option<String> {
        let command = match Command::parse(&self.prefix, content)? {
            Ok(command) => command,
            Err(err) => return Some(err.to_string()),
        };

        log::debug!(
            "Running {:?} in channel {} of guild {}",
            command,
            ctx.channel_id,
            ctx.guild_id
        );
        Some(self.execute(ctx, command).await)
    }

    pub async fn execute(&self, ctx: CommandContext, command: Command) -> String {
        match command {
            Command::Help => help_text(&self.prefix),
            Command::Status => {
                let count = self.engine.store().guild_locks(ctx.guild_id).len();
                format!("✅ I'm online and currently locking {count} channel(s) in this server.")
            }
            Command::VariableList => variable_list(),
            Command::Rename { target, name } => self.rename(ctx, target, &name).await,
            Command::LockName { target, template } => self.lock_name(ctx, target, template).await,
            Command::UnlockName { target } => self.unlock_name(ctx, target).await,
            Command::LockedList => self.locked_list(ctx).await,
            Command::SetFormat { target, format } => self.set_format(ctx, target, format).await,
            Command::ShowFormat => self.show_format(ctx).await,
            Command::SetModRole { roles } => self.set_mod_role(ctx, roles),
        }
    }

    /// Resolves the channel a command applies to, making sure it exists in
    /// the guild the command came from.
    async fn resolve_target(
        &self,
        ctx: CommandContext,
        target: Option<ChannelId>,
    ) -> Result<ChannelId, String> {
        let Some(channel) = target else {
            return Ok(ctx.channel_id);
        };

        if self.channel_exists(ctx.guild_id, channel).await {
            Ok(channel)
        } else {
            Err("⚠️ Could not find the channel.".to_owned())
        }
    }

    async fn channel_exists(&self, guild: GuildId, channel: ChannelId) -> bool {
        let timeout = self.engine.policy().call_timeout;
        matches!(
            with_timeout(timeout, self.engine.platform().channel_guild(channel)).await,
            Ok(found) if found == guild
        )
    }

    async fn rename(&self, ctx: CommandContext, target: Option<ChannelId>, name: &str) -> String {
        let channel = match self.resolve_target(ctx, target).await {
            Ok(channel) => channel,
            Err(reply) => return reply,
        };

        if let Some(locked) = self.engine.store().lock(ctx.guild_id, channel) {
            return format!(
                "🚫 Rename attempt blocked for <#{channel}>.\nName is locked as `{locked}`."
            );
        }

        let new_name = name.replace(' ', "-").to_lowercase();
        let platform = self.engine.platform();
        let timeout = self.engine.policy().call_timeout;

        let old_name = match with_timeout(timeout, platform.channel_name(channel)).await {
            Ok(old_name) => old_name,
            Err(err) => return format!("❌ Failed to rename: {err}"),
        };

        match with_timeout(timeout, platform.rename_channel(channel, &new_name)).await {
            Ok(()) => {
                log::info!(
                    "Renamed channel {} by command: {:?} -> {:?}",
                    channel,
                    old_name,
                    new_name
                );
                format!("✅ Renamed <#{channel}> from `{old_name}` to `{new_name}`.")
            }
            Err(err) => format!("❌ Failed to rename: {err}"),
        }
    }

    async fn lock_name(
        &self,
        ctx: CommandContext,
        target: Option<ChannelId>,
        template: String,
    ) -> String {
        let channel = match self.resolve_target(ctx, target).await {
            Ok(channel) => channel,
            Err(reply) => return reply,
        };

        if let Err(err) = self.engine.store().set_lock(ctx.guild_id, channel, &template) {
            log::error!("Could not save lock for {}: {}", channel, err);
            return format!("❌ Could not save the lock: {err}");
        }
        log::info!("Locked channel {} as {:?}", channel, template);

        let mut reply = format!("🔐 Locked name of <#{channel}> as `{template}`.");
        match self.engine.enforce_now(channel, true).await {
            EnforceOutcome::Executed(RenameOutcome::Failed(err)) | EnforceOutcome::Failed(err) => {
                let _ = write!(reply, "\n⚠️ Could not apply it yet: {err}");
            }
            EnforceOutcome::Executed(RenameOutcome::BackedOff { .. }) => {
                reply.push_str("\n⏳ Rate limited; the name will be applied shortly.");
            }
            _ => {}
        }
        reply
    }

    async fn unlock_name(&self, ctx: CommandContext, target: Option<ChannelId>) -> String {
        let channel = match self.resolve_target(ctx, target).await {
            Ok(channel) => channel,
            Err(reply) => return reply,
        };

        match self.engine.store().remove_lock(ctx.guild_id, channel) {
            Ok(true) => {
                self.engine.runtime().forget(channel);
                log::info!("Unlocked channel {}", channel);
                format!("🔓 Unlocked name for <#{channel}>.")
            }
            Ok(false) => "⚠️ This channel isn't being auto-renamed or wasn't found.".to_owned(),
            Err(err) => {
                log::error!("Could not save unlock of {}: {}", channel, err);
                format!("❌ Could not save the change: {err}")
            }
        }
    }

    async fn locked_list(&self, ctx: CommandContext) -> String {
        let locks = self.engine.store().guild_locks(ctx.guild_id);
        if locks.is_empty() {
            return "ℹ️ No channels are currently locked in this server.".to_owned();
        }

        let mut message = "**🔒 Locked Channels:**\n".to_owned();
        for lock in locks {
            let label = self.channel_label(ctx.guild_id, lock.channel_id).await;
            let _ = writeln!(message, "- {} ➝ `{}`", label, lock.template);
        }
        message
    }

    async fn set_format(
        &self,
        ctx: CommandContext,
        target: Option<ChannelId>,
        format: String,
    ) -> String {
        let channel = match self.resolve_target(ctx, target).await {
            Ok(channel) => channel,
            Err(reply) => return reply,
        };

        let store = self.engine.store();
        if store.lock(ctx.guild_id, channel).is_none() {
            return "🚫 You can only set fallback format for locked channels containing dynamic \
                    variables."
                .to_owned();
        }

        if let Err(err) = store.set_fallback_format(ctx.guild_id, channel, &format) {
            log::error!("Could not save fallback format for {}: {}", channel, err);
            return format!("❌ Could not save the format: {err}");
        }

        self.engine.enforce_now(channel, true).await;
        format!("✅ Fallback format for <#{channel}> set to `{format}`.")
    }

    async fn show_format(&self, ctx: CommandContext) -> String {
        let formats = self.engine.store().guild_fallback_formats(ctx.guild_id);
        if formats.is_empty() {
            return "ℹ️ No fallback formats set in this server.".to_owned();
        }

        let mut message = "**📐 Channel-Specific Fallback Formats:**\n".to_owned();
        for (channel, format) in formats {
            let label = self.channel_label(ctx.guild_id, channel).await;
            let _ = writeln!(message, "- {} ➝ `{}`", label, format);
        }
        message
    }

    fn set_mod_role(&self, ctx: CommandContext, roles: BTreeSet<RoleId>) -> String {
        let mentions = roles
            .iter()
            .map(|role| format!("<@&{role}>"))
            .collect::<Vec<_>>()
            .join(", ");

        if let Err(err) = self.engine.store().set_moderator_roles(ctx.guild_id, roles) {
            log::error!("Could not save moderator roles for {}: {}", ctx.guild_id, err);
            return format!("❌ Could not save moderator roles: {err}");
        }

        if mentions.is_empty() {
            "🛡️ Cleared the moderator roles.".to_owned()
        } else {
            format!("🛡️ Set {mentions} as moderator role(s).")
        }
    }

    async fn channel_label(&self, guild: GuildId, channel: ChannelId) -> String {
        if self.channel_exists(guild, channel).await {
            format!("<#{channel}>")
        } else {
            format!("(Missing {channel})")
        }
    }
}

fn help_text(prefix: &str) -> String {
    const HELP: &str = "**📜 Renamer Bot – Command List**
➡️ You can use channel mentions (like `#channel`), links, or raw channel IDs.

**🆘 {p}help**
➝ Shows this help message.

**✅ {p}status**
➝ Shows if the bot is online and how many channels are locked.

**✏️ {p}rename**
`{p}rename new-name` ➝ Renames the current channel.
`{p}rename #channel new-name` ➝ Renames a specific channel.

**🔒 {p}lockname**
`{p}lockname desired-name` ➝ Locks the *current channel*.
`{p}lockname #channel desired-name` ➝ Locks a *specific channel*.

**🔓 {p}unlockname**
`{p}unlockname` ➝ Unlocks the *current channel*.
`{p}unlockname #channel` ➝ Unlocks a *specific channel*.

**📃 {p}lockedlist**
➝ Shows all currently locked channels and their names.

**📐 {p}setformat**
`{p}setformat format` ➝ Set fallback format for this channel.
`{p}setformat #channel format` ➝ Set fallback format for another channel.

**📊 {p}showformat**
➝ Shows all channels with a custom fallback format.

**🛡️ {p}setmodrole [roles...]**
➝ Set which roles count as moderators for `{onlinemods}`. `{p}setmodrole clear` removes them.

**🔧 {p}variablelist**
➝ Shows available dynamic name variables.";

    HELP.replace("{p}", prefix)
}

fn variable_list() -> String {
    let mut message = "**🔧 Available Variables:**\n".to_owned();
    for (placeholder, description) in PLACEHOLDERS {
        let _ = writeln!(message, "- `{}` ➝ {}", placeholder, description);
    }
    message
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::EnforcementPolicy,
        ids::UserId,
        platform::{InMemoryPlatform, PlatformError},
        store::{MemoryStore, StateStore},
    };

    const GUILD: GuildId = GuildId(900_000_000_000_000_001);
    const TEXT: ChannelId = ChannelId(100_000_000_000_000_001);
    const VOICE: ChannelId = ChannelId(100_000_000_000_000_002);
    const ELSEWHERE: ChannelId = ChannelId(100_000_000_000_000_003);

    const CTX: CommandContext = CommandContext {
        guild_id: GUILD,
        channel_id: TEXT,
    };

    fn setup() -> (Arc<InMemoryPlatform>, Arc<MemoryStore>, CommandHandler) {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.add_channel(GUILD, TEXT, "general");
        platform.add_channel(GUILD, VOICE, "voice");
        platform.add_channel(GuildId(5), ELSEWHERE, "other-guild");
        platform.add_member(GUILD, UserId(1), "Ruki");
        platform.add_member(GUILD, UserId(2), "Jul");

        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(platform.clone(), store.clone(), EnforcementPolicy::default());
        (platform, store, CommandHandler::new(engine, "!"))
    }

    fn parse(content: &str) -> Option<Result<Command, CommandError>> {
        Command::parse("!", content)
    }

    #[test]
    fn parses_targets_and_text() {
        assert_eq!(
            parse("!lockname <#100000000000000002> {vc}"),
            Some(Ok(Command::LockName {
                target: Some(VOICE),
                template: "{vc}".to_owned()
            }))
        );
        assert_eq!(
            parse("!lockname Team — {count} active"),
            Some(Ok(Command::LockName {
                target: None,
                template: "Team — {count} active".to_owned()
            }))
        );
        assert_eq!(
            parse("!rename 100000000000000002 \"Late Night\""),
            Some(Ok(Command::Rename {
                target: Some(VOICE),
                name: "Late Night".to_owned()
            }))
        );
    }

    #[test]
    fn ignores_non_commands() {
        assert_eq!(parse("hello there"), None);
        assert_eq!(parse("!dance"), None);
        assert_eq!(Command::parse("?", "!help"), None);
    }

    #[test]
    fn reports_usage_and_bad_references() {
        insta::assert_snapshot!(
            parse("!lockname").unwrap().unwrap_err().to_string(),
            @"⚠️ Usage: `!lockname [channel] <desired-name>`"
        );
        assert!(matches!(
            parse("!rename <#100000000000000002>"),
            Some(Err(CommandError::Usage { .. }))
        ));
        assert_eq!(
            parse("!unlockname lobby"),
            Some(Err(CommandError::InvalidChannel))
        );
    }

    #[test]
    fn parses_mod_roles() {
        assert_eq!(
            parse("!setmodrole <@&11> 22, <@&33>"),
            Some(Ok(Command::SetModRole {
                roles: BTreeSet::from([RoleId(11), RoleId(22), RoleId(33)])
            }))
        );
        assert_eq!(
            parse("!setmodrole clear"),
            Some(Ok(Command::SetModRole {
                roles: BTreeSet::new()
            }))
        );
        assert_eq!(
            parse("!setmodrole mods"),
            Some(Err(CommandError::InvalidRole("mods".to_owned())))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lockname_applies_immediately() {
        let (platform, store, handler) = setup();
        platform.join(VOICE, UserId(1));
        platform.join(VOICE, UserId(2));

        let reply = handler
            .handle_message(CTX, "!lockname <#100000000000000002> {vc}")
            .await
            .unwrap();

        insta::assert_snapshot!(reply, @"🔐 Locked name of <#100000000000000002> as `{vc}`.");
        assert_eq!(store.lock(GUILD, VOICE).as_deref(), Some("{vc}"));
        assert_eq!(platform.name_of(VOICE).as_deref(), Some("ruki-and-jul"));
    }

    #[tokio::test(start_paused = true)]
    async fn lockname_reports_permanent_failure() {
        let (platform, _store, handler) = setup();
        platform.fail_next_rename(VOICE, PlatformError::Forbidden);

        let reply = handler
            .handle_message(CTX, "!lockname <#100000000000000002> lobby")
            .await
            .unwrap();
        assert!(
            reply.ends_with("Could not apply it yet: missing permissions to manage the channel")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rename_blocked_while_locked() {
        let (platform, store, handler) = setup();
        store.set_lock(GUILD, TEXT, "general").unwrap();

        let reply = handler.handle_message(CTX, "!rename Chill Zone").await.unwrap();
        assert_eq!(
            reply,
            "🚫 Rename attempt blocked for <#100000000000000001>.\nName is locked as `general`."
        );
        assert!(platform.rename_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rename_unlocked_channel() {
        let (platform, _store, handler) = setup();

        let reply = handler.handle_message(CTX, "!rename Chill Zone").await.unwrap();
        insta::assert_snapshot!(
            reply,
            @"✅ Renamed <#100000000000000001> from `general` to `chill-zone`."
        );
        assert_eq!(platform.name_of(TEXT).as_deref(), Some("chill-zone"));
    }

    #[tokio::test(start_paused = true)]
    async fn channel_in_other_guild_is_not_found() {
        let (_platform, store, handler) = setup();

        let reply = handler
            .handle_message(CTX, "!lockname <#100000000000000003> {vc}")
            .await
            .unwrap();
        assert_eq!(reply, "⚠️ Could not find the channel.");
        assert!(store.all_locks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn setformat_requires_lock() {
        let (_platform, store, handler) = setup();

        let reply = handler
            .handle_message(CTX, "!setformat {count} hanging out")
            .await
            .unwrap();
        assert!(reply.starts_with("🚫"));
        assert_eq!(store.fallback_format(GUILD, TEXT), None);

        store.set_lock(GUILD, TEXT, "{vc}").unwrap();
        let reply = handler
            .handle_message(CTX, "!setformat {count} hanging out")
            .await
            .unwrap();
        assert_eq!(
            reply,
            "✅ Fallback format for <#100000000000000001> set to `{count} hanging out`."
        );
        assert_eq!(
            store.fallback_format(GUILD, TEXT).as_deref(),
            Some("{count} hanging out")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lists_mark_missing_channels() {
        let (platform, store, handler) = setup();
        store.set_lock(GUILD, VOICE, "{vc}").unwrap();
        store.set_lock(GUILD, ChannelId(100_000_000_000_000_009), "gone").unwrap();
        platform.set_channel_name(VOICE, "no-one-in-vc");

        let reply = handler.handle_message(CTX, "!lockedlist").await.unwrap();
        assert_eq!(
            reply,
            "**🔒 Locked Channels:**\n\
             - <#100000000000000002> ➝ `{vc}`\n\
             - (Missing 100000000000000009) ➝ `gone`\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_and_status() {
        let (_platform, store, handler) = setup();
        store.set_lock(GUILD, TEXT, "general").unwrap();

        let status = handler.handle_message(CTX, "!status").await.unwrap();
        assert_eq!(
            status,
            "✅ I'm online and currently locking 1 channel(s) in this server."
        );

        let reply = handler.handle_message(CTX, "!unlockname").await.unwrap();
        assert_eq!(reply, "🔓 Unlocked name for <#100000000000000001>.");
        let reply = handler.handle_message(CTX, "!unlockname").await.unwrap();
        assert_eq!(
            reply,
            "⚠️ This channel isn't being auto-renamed or wasn't found."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn setmodrole_stores_roles() {
        let (_platform, store, handler) = setup();

        let reply = handler
            .handle_message(CTX, "!setmodrole <@&11> <@&22>")
            .await
            .unwrap();
        assert_eq!(reply, "🛡️ Set <@&11>, <@&22> as moderator role(s).");
        assert_eq!(
            store.moderator_roles(GUILD),
            BTreeSet::from([RoleId(11), RoleId(22)])
        );
    }

    #[tokio::test]
    async fn help_uses_prefix() {
        let (_platform, _store, handler) = setup();
        let handler = CommandHandler::new(handler.engine.clone(), "?");

        let help = handler.handle_message(CTX, "?help").await.unwrap();
        assert!(help.contains("`?lockname #channel desired-name`"));
        assert!(!help.contains("!lockname"));

        let variables = handler.handle_message(CTX, "?variablelist").await.unwrap();
        assert!(variables.contains("- `{onlinemods}` ➝ "));
    }
}
