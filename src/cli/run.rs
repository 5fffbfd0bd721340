use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context};
use clap::Parser;
use serenity::{all::GatewayIntents, Client};

use crate::{
    commands::CommandHandler,
    config::ConfigFile,
    engine::Engine,
    intake::IntakeProcessor,
    platform::{DiscordHandler, DiscordPlatform},
    store::{JsonFileStore, StateStore},
    web::KeepAliveServer,
};

use super::resolve_path;

/// Connect to Discord and keep locked channel names enforced.
#[derive(Debug, Parser)]
pub struct RunCommand {
    /// Directory holding the config file, persisted locks and logs.
    #[clap(long, default_value = ".")]
    pub data_dir: PathBuf,

    /// Bot token. Falls back to the `DISCORD_TOKEN` environment variable.
    #[clap(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Port for the keep-alive HTTP server. Defaults to `keepAlivePort`, or
    /// `8080`.
    #[clap(long)]
    pub port: Option<u16>,

    /// Address for the keep-alive HTTP server. Defaults to
    /// `keepAliveAddress`, or `0.0.0.0`.
    #[clap(long)]
    pub address: Option<IpAddr>,

    /// Minimum time between two renames of the same channel, e.g. `5s`.
    #[clap(long, value_parser = humantime::parse_duration)]
    pub cooldown: Option<Duration>,

    /// How often every lock is re-checked, e.g. `1m`.
    #[clap(long, value_parser = humantime::parse_duration)]
    pub sweep_interval: Option<Duration>,
}

impl RunCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let data_dir = resolve_path(&self.data_dir);

        let config = ConfigFile::load_from_dir(&data_dir)?;
        let mut policy = config.policy()?;
        if let Some(cooldown) = self.cooldown {
            policy.cooldown = cooldown;
        }
        if let Some(sweep_interval) = self.sweep_interval {
            if sweep_interval.is_zero() {
                bail!("--sweep-interval must be greater than zero");
            }
            policy.sweep_interval = sweep_interval;
        }

        let Some(token) = self.token.filter(|token| !token.trim().is_empty()) else {
            bail!("No bot token given. Pass --token or set DISCORD_TOKEN.");
        };

        let keep_alive_address = SocketAddr::new(
            self.address.unwrap_or_else(|| config.keep_alive_address()),
            self.port.unwrap_or_else(|| config.keep_alive_port()),
        );

        let store = Arc::new(
            JsonFileStore::open(data_dir.clone())
                .with_context(|| format!("Could not open the store in {}", data_dir.display()))?,
        );
        log::info!(
            "Enforcing {} locked channel(s) stored in {}",
            store.all_locks().len(),
            data_dir.display()
        );

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("namelock-worker")
            .build()
            .context("Could not start the async runtime")?;

        let platform = Arc::new(DiscordPlatform::new());
        let engine = Engine::new(platform.clone(), store, policy);

        let (_intake, events) =
            IntakeProcessor::start(engine.clone(), runtime.handle().clone(), policy.sweep_interval)
                .context("Could not start the intake thread")?;

        let commands = CommandHandler::new(engine.clone(), config.command_prefix());
        let handler = DiscordHandler::new(events, commands);

        runtime.block_on(async move {
            let listener = KeepAliveServer::bind(keep_alive_address)
                .await
                .with_context(|| format!("Could not bind {keep_alive_address}"))?;
            let (stop_server, server_stopped) = tokio::sync::oneshot::channel::<()>();
            let server = tokio::spawn(KeepAliveServer::new(engine).serve(listener, async {
                let _ = server_stopped.await;
            }));

            let intents = GatewayIntents::GUILDS
                | GatewayIntents::GUILD_MEMBERS
                | GatewayIntents::GUILD_PRESENCES
                | GatewayIntents::GUILD_VOICE_STATES
                | GatewayIntents::GUILD_MESSAGES
                | GatewayIntents::MESSAGE_CONTENT;

            let mut client = Client::builder(&token, intents)
                .event_handler(handler)
                .await
                .context("Could not create the Discord client")?;
            platform.attach(client.cache.clone(), client.http.clone());

            let shard_manager = client.shard_manager.clone();
            let result = tokio::select! {
                result = client.start() => result.context("Discord client stopped"),
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Shutting down...");
                    Ok(())
                }
            };

            shard_manager.shutdown_all().await;
            let _ = stop_server.send(());
            let _ = server.await;

            result
        })
    }
}
