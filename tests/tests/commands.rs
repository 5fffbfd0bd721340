use pretty_assertions::assert_eq;

use libnamelock::{CommandContext, CommandHandler};

use crate::namelock_test::harness::{Harness, GUILD, LOBBY, STAGE};

fn in_lobby() -> CommandContext {
    CommandContext {
        guild_id: GUILD,
        channel_id: LOBBY,
    }
}

#[tokio::test(start_paused = true)]
async fn lock_blocks_manual_rename_until_unlocked() {
    let mut harness = Harness::new();
    harness.connect(LOBBY, "Ruki");
    let commands = CommandHandler::new(harness.engine.clone(), "!");

    let reply = commands.handle_message(in_lobby(), "!lockname {vc}").await;
    assert_eq!(
        reply.as_deref(),
        Some(format!("🔐 Locked name of <#{LOBBY}> as `{{vc}}`.").as_str())
    );
    assert_eq!(harness.platform.name_of(LOBBY).as_deref(), Some("ruki"));

    let reply = commands
        .handle_message(in_lobby(), "!rename Party Time")
        .await;
    assert_eq!(
        reply,
        Some(format!(
            "🚫 Rename attempt blocked for <#{LOBBY}>.\nName is locked as `{{vc}}`."
        ))
    );

    let reply = commands.handle_message(in_lobby(), "!unlockname").await;
    assert_eq!(reply, Some(format!("🔓 Unlocked name for <#{LOBBY}>.")));

    let reply = commands
        .handle_message(in_lobby(), "!rename Party Time")
        .await;
    assert_eq!(
        reply,
        Some(format!(
            "✅ Renamed <#{LOBBY}> from `ruki` to `party-time`."
        ))
    );
}

#[tokio::test(start_paused = true)]
async fn targets_other_channels_by_mention() {
    let mut harness = Harness::new();
    harness.connect(STAGE, "Ruki");
    harness.connect(STAGE, "Jul");
    let commands = CommandHandler::new(harness.engine.clone(), "?");

    let reply = commands
        .handle_message(in_lobby(), &format!("?lockname <#{STAGE}> \"{{count}} on stage\""))
        .await;
    assert_eq!(
        reply,
        Some(format!("🔐 Locked name of <#{STAGE}> as `{{count}} on stage`."))
    );
    assert_eq!(harness.platform.name_of(STAGE).as_deref(), Some("2-on-stage"));

    let reply = commands.handle_message(in_lobby(), "?lockedlist").await;
    assert_eq!(
        reply,
        Some(format!(
            "**🔒 Locked Channels:**\n- <#{STAGE}> ➝ `{{count}} on stage`\n"
        ))
    );
}

#[tokio::test(start_paused = true)]
async fn ignores_chatter_and_unknown_commands() {
    let harness = Harness::new();
    let commands = CommandHandler::new(harness.engine.clone(), "!");

    assert_eq!(commands.handle_message(in_lobby(), "hello there").await, None);
    assert_eq!(commands.handle_message(in_lobby(), "!dance").await, None);
    assert!(harness.platform.rename_calls().is_empty());
}
