use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::Instant;

use libnamelock::{
    platform::PlatformError, EnforceOutcome, EnforcementPolicy, RenameOutcome, Trigger,
};

use crate::namelock_test::harness::{settle, Harness, GUILD, LOBBY, STAGE};

#[tokio::test(start_paused = true)]
async fn two_members_are_joined_with_and() {
    let mut harness = Harness::new();
    harness.lock(LOBBY, "{vc}");
    harness.connect(LOBBY, "Ruki");
    harness.connect(LOBBY, "Jul");

    harness.signal(LOBBY, Trigger::VoiceMembership);
    settle().await;

    assert_eq!(harness.platform.name_of(LOBBY).as_deref(), Some("ruki-and-jul"));
    assert_eq!(harness.renames(LOBBY), vec!["ruki-and-jul"]);
}

#[tokio::test(start_paused = true)]
async fn count_template_reflects_crowd() {
    let mut harness = Harness::new();
    harness.lock(LOBBY, "Team {count} active");
    for index in 0..12 {
        harness.connect(LOBBY, &format!("Player {index}"));
    }

    harness.signal(LOBBY, Trigger::VoiceMembership);
    settle().await;

    assert_eq!(harness.renames(LOBBY), vec!["team-12-active"]);
}

#[tokio::test(start_paused = true)]
async fn crowded_channel_uses_fallback_format() {
    let mut harness = Harness::new();
    harness.lock(LOBBY, "{vc}");
    for name in ["Ruki", "Jul", "Mika", "Sora", "Aki"] {
        harness.connect(LOBBY, name);
    }

    harness.signal(LOBBY, Trigger::VoiceMembership);
    settle().await;
    assert_eq!(harness.platform.name_of(LOBBY).as_deref(), Some("5-in-vc"));

    harness
        .store
        .set_fallback_format(GUILD, LOBBY, "{count} gaming")
        .unwrap();
    assert_eq!(
        harness.engine.enforce_now(LOBBY, true).await,
        EnforceOutcome::Executed(RenameOutcome::Applied)
    );
    assert_eq!(harness.platform.name_of(LOBBY).as_deref(), Some("5-gaming"));
}

#[tokio::test(start_paused = true)]
async fn correct_name_is_never_rewritten() {
    let mut harness = Harness::new();
    harness.lock(LOBBY, "{vc}");
    harness.connect(LOBBY, "Ruki");
    harness.platform.set_channel_name(LOBBY, "ruki");

    for trigger in [
        Trigger::VoiceMembership,
        Trigger::ResourceUpdate,
        Trigger::Sweep,
        Trigger::Presence,
    ] {
        harness.signal(LOBBY, trigger);
        settle().await;
        harness.engine.sweep();
        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    assert!(harness.platform.rename_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn burst_of_joins_converges_in_one_write() {
    let mut harness = Harness::new();
    harness.lock(LOBBY, "{vc}");

    for name in ["Ruki", "Jul", "Mika"] {
        harness.connect(LOBBY, name);
        harness.signal(LOBBY, Trigger::VoiceMembership);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    settle().await;

    assert_eq!(harness.renames(LOBBY), vec!["ruki,-jul,-and-mika"]);
}

#[tokio::test(start_paused = true)]
async fn throttled_channel_waits_out_retry_after() {
    let mut harness = Harness::new();
    harness.lock(LOBBY, "{vc}");
    harness.connect(LOBBY, "Ruki");
    harness.platform.fail_next_rename(
        LOBBY,
        PlatformError::Throttled {
            retry_after: Some(Duration::from_secs(45)),
        },
    );

    let start = Instant::now();
    harness.signal(LOBBY, Trigger::VoiceMembership);
    settle().await;
    assert_eq!(harness.renames(LOBBY), vec!["ruki"]);
    assert_eq!(harness.platform.name_of(LOBBY).as_deref(), Some("lobby"));

    // Neither new events nor sweeps may touch the channel before the
    // throttle window closes.
    harness.connect(LOBBY, "Jul");
    harness.signal(LOBBY, Trigger::VoiceMembership);
    tokio::time::sleep_until(start + Duration::from_secs(40)).await;
    harness.engine.sweep();
    settle().await;
    assert_eq!(harness.renames(LOBBY).len(), 1);

    tokio::time::sleep_until(start + Duration::from_secs(47)).await;
    harness.engine.sweep();
    settle().await;

    assert_eq!(harness.renames(LOBBY), vec!["ruki", "ruki-and-jul"]);
    assert_eq!(harness.engine.status().renames_deferred, 1);
    assert_eq!(harness.engine.status().renames_applied, 1);
}

#[tokio::test(start_paused = true)]
async fn renames_are_serialized_per_channel_only() {
    let harness = Harness::new();
    harness.platform.set_rename_latency(Duration::from_secs(2));
    harness.lock(LOBBY, "lobby-locked");
    harness.lock(STAGE, "stage-locked");

    let start = Instant::now();
    let engine = &harness.engine;
    let (first, second, other) = tokio::join!(
        engine.enforce_now(LOBBY, true),
        engine.enforce_now(LOBBY, true),
        engine.enforce_now(STAGE, true),
    );

    assert_eq!(first, EnforceOutcome::Executed(RenameOutcome::Applied));
    assert_eq!(second, EnforceOutcome::Executed(RenameOutcome::AlreadyCurrent));
    assert_eq!(other, EnforceOutcome::Executed(RenameOutcome::Applied));

    assert_eq!(harness.platform.max_concurrent_renames(LOBBY), 1);
    assert_eq!(harness.renames(LOBBY), vec!["lobby-locked"]);
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_keeps_the_lock() {
    let mut harness = Harness::new();
    harness.lock(LOBBY, "{vc}");
    harness.connect(LOBBY, "Ruki");
    harness
        .platform
        .fail_next_rename(LOBBY, PlatformError::Forbidden);

    assert_eq!(
        harness.engine.enforce_now(LOBBY, true).await,
        EnforceOutcome::Executed(RenameOutcome::Failed(PlatformError::Forbidden))
    );
    assert_eq!(harness.store.lock(GUILD, LOBBY).as_deref(), Some("{vc}"));

    // Permanent errors don't open a backoff window.
    assert_eq!(
        harness.engine.enforce_now(LOBBY, true).await,
        EnforceOutcome::Executed(RenameOutcome::Applied)
    );
}

#[tokio::test(start_paused = true)]
async fn trailing_change_after_cooldown_is_applied() {
    let mut harness = Harness::with_policy(EnforcementPolicy {
        cooldown: Duration::from_secs(10),
        ..EnforcementPolicy::default()
    });
    harness.lock(LOBBY, "{count} inside");

    harness.connect(LOBBY, "Ruki");
    harness.signal(LOBBY, Trigger::VoiceMembership);
    settle().await;

    harness.connect(LOBBY, "Jul");
    harness.signal(LOBBY, Trigger::VoiceMembership);
    settle().await;
    assert_eq!(harness.renames(LOBBY), vec!["1-inside"]);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.renames(LOBBY), vec!["1-inside", "2-inside"]);
}

#[tokio::test(start_paused = true)]
async fn deleted_channel_is_skipped() {
    let mut harness = Harness::new();
    harness.lock(LOBBY, "{vc}");
    harness.connect(LOBBY, "Ruki");
    harness.platform.remove_channel(LOBBY);

    assert_eq!(
        harness.engine.enforce_now(LOBBY, true).await,
        EnforceOutcome::Failed(PlatformError::NotFound)
    );
    harness.signal(LOBBY, Trigger::VoiceMembership);
    settle().await;
    assert!(harness.platform.rename_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn change_back_during_slow_rename_is_not_lost() {
    let mut harness = Harness::new();
    harness.lock(LOBBY, "{count}-x");
    harness.connect(LOBBY, "Ruki");
    assert_eq!(
        harness.engine.enforce_now(LOBBY, true).await,
        EnforceOutcome::Executed(RenameOutcome::Applied)
    );
    harness.platform.set_rename_latency(Duration::from_secs(8));

    let start = Instant::now();
    let jul = harness.connect(LOBBY, "Jul");
    harness.signal(LOBBY, Trigger::VoiceMembership);

    // Jul leaves while the rename to "2-x" is still running.
    tokio::time::sleep_until(start + Duration::from_secs(6)).await;
    harness.platform.leave(LOBBY, jul);
    harness.signal(LOBBY, Trigger::VoiceMembership);

    tokio::time::sleep_until(start + Duration::from_secs(50)).await;
    assert_eq!(harness.renames(LOBBY), vec!["1-x", "2-x", "1-x"]);
    assert_eq!(harness.platform.name_of(LOBBY).as_deref(), Some("1-x"));
    assert_eq!(harness.platform.max_concurrent_renames(LOBBY), 1);
}
