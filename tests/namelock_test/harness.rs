use std::{sync::Arc, time::Duration};

use libnamelock::{
    ids::{ChannelId, GuildId, UserId},
    platform::InMemoryPlatform,
    store::{MemoryStore, StateStore},
    EnforcementPolicy, Engine, Signal, Trigger,
};

pub const GUILD: GuildId = GuildId(900_000_000_000_000_001);
pub const LOBBY: ChannelId = ChannelId(900_000_000_000_000_100);
pub const STAGE: ChannelId = ChannelId(900_000_000_000_000_200);

/// An engine wired to an in-memory platform and store.
pub struct Harness {
    pub platform: Arc<InMemoryPlatform>,
    pub store: Arc<dyn StateStore>,
    pub engine: Engine,
    next_user: u64,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(EnforcementPolicy::default())
    }

    pub fn with_policy(policy: EnforcementPolicy) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), policy)
    }

    pub fn with_store(store: Arc<dyn StateStore>, policy: EnforcementPolicy) -> Self {
        init_test_logging();

        let platform = Arc::new(InMemoryPlatform::new());
        platform.add_channel(GUILD, LOBBY, "lobby");
        platform.add_channel(GUILD, STAGE, "stage");

        let engine = Engine::new(platform.clone(), store.clone(), policy);

        Self {
            platform,
            store,
            engine,
            next_user: 1,
        }
    }

    pub fn lock(&self, channel: ChannelId, template: &str) {
        self.store.set_lock(GUILD, channel, template).unwrap();
    }

    /// Adds a member and connects them to `channel`, without signalling.
    pub fn connect(&mut self, channel: ChannelId, display_name: &str) -> UserId {
        let user = UserId(self.next_user);
        self.next_user += 1;

        self.platform.add_member(GUILD, user, display_name);
        self.platform.join(channel, user);
        user
    }

    pub fn signal(&self, channel: ChannelId, trigger: Trigger) {
        self.engine.reconsider(Signal {
            guild_id: GUILD,
            channel_id: channel,
            trigger,
        });
    }

    pub fn renames(&self, channel: ChannelId) -> Vec<String> {
        self.platform.rename_calls_for(channel)
    }
}

/// Lets every armed evaluation run. Only meaningful with paused time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_secs(3)).await;
}

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
