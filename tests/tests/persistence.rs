use std::sync::Arc;

use pretty_assertions::assert_eq;

use libnamelock::{
    store::{JsonFileStore, StateStore, LOCKS_FILE},
    EnforceOutcome, EnforcementPolicy, RenameOutcome,
};

use crate::namelock_test::harness::{settle, Harness, GUILD, LOBBY};

#[tokio::test(start_paused = true)]
async fn locks_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
        let mut harness = Harness::with_store(store, EnforcementPolicy::default());
        harness.connect(LOBBY, "Ruki");
        harness.lock(LOBBY, "{vc}");

        assert_eq!(
            harness.engine.enforce_now(LOBBY, true).await,
            EnforceOutcome::Executed(RenameOutcome::Applied)
        );
    }

    let contents = std::fs::read_to_string(dir.path().join(LOCKS_FILE)).unwrap();
    let document: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(document[GUILD.to_string()][LOBBY.to_string()], "{vc}");

    // A fresh process has an empty runtime table. The channel already carries
    // the right name, so the first sweep must not write anything.
    let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    assert_eq!(store.lock(GUILD, LOBBY).as_deref(), Some("{vc}"));

    let mut harness = Harness::with_store(store, EnforcementPolicy::default());
    harness.platform.set_channel_name(LOBBY, "ruki");
    harness.connect(LOBBY, "Ruki");

    harness.engine.sweep();
    settle().await;

    assert!(harness.platform.rename_calls().is_empty());
    assert_eq!(harness.engine.status().renames_already_current, 1);
}

#[tokio::test(start_paused = true)]
async fn clearing_runtime_state_is_safe() {
    let mut harness = Harness::new();
    harness.lock(LOBBY, "{vc}");
    harness.connect(LOBBY, "Ruki");

    harness.engine.enforce_now(LOBBY, true).await;
    harness.engine.runtime().clear();

    harness.engine.sweep();
    settle().await;

    assert_eq!(harness.renames(LOBBY), vec!["ruki"]);
    assert!(harness.engine.runtime().get(LOBBY).is_some());
}
