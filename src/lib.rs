pub mod cli;
pub mod commands;
pub mod config;
pub mod ids;
pub mod intake;
pub mod logging;
pub mod platform;
pub mod store;

mod engine;
mod executor;
mod sanitize;
mod scheduler;
mod snapshot;
mod template;
mod web;

pub use commands::{Command, CommandContext, CommandError, CommandHandler};
pub use config::{ConfigError, ConfigFile, EnforcementPolicy};
pub use engine::{EnforceOutcome, Engine, StatusReport};
pub use executor::{EngineStats, RenameOutcome, RenameRequest};
pub use intake::{EventSender, IntakeEvent, IntakeProcessor, Signal, Trigger};
pub use sanitize::sanitize;
pub use scheduler::{decide, Decision, ResourceRuntimeState, RuntimeTable, SuppressReason};
pub use snapshot::LiveSnapshot;
pub use template::{resolve, Placeholders, PLACEHOLDERS};
pub use web::KeepAliveServer;
