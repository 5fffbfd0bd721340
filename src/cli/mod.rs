//! Defines the namelock CLI through clap types.

mod render;
mod run;

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use clap::Parser;
use thiserror::Error;

pub use self::render::RenderCommand;
pub use self::run::RunCommand;

/// Command line options that namelock accepts, defined using the clap crate.
#[derive(Debug, Parser)]
#[clap(name = "namelock", version, about)]
pub struct Options {
    #[clap(flatten)]
    pub global: GlobalOptions,

    /// Subcommand to run in this invocation.
    #[clap(subcommand)]
    pub subcommand: Subcommand,
}

impl Options {
    pub fn run(self) -> anyhow::Result<()> {
        match self.subcommand {
            Subcommand::Run(subcommand) => subcommand.run(),
            Subcommand::Render(subcommand) => subcommand.run(),
        }
    }
}

#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Sets verbosity level. Can be specified multiple times.
    #[clap(long("verbose"), short, global(true), action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Set color behavior. Valid values are auto, always, and never.
    #[clap(long("color"), global(true), default_value("auto"))]
    pub color: ColorChoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl FromStr for ColorChoice {
    type Err = ColorChoiceParseError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        match source {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(ColorChoiceParseError {
                attempted: source.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Error)]
#[error("Invalid color choice '{attempted}'. Valid values are: auto, always, never")]
pub struct ColorChoiceParseError {
    attempted: String,
}

#[derive(Debug, Parser)]
pub enum Subcommand {
    Run(RunCommand),
    Render(RenderCommand),
}

impl Subcommand {
    /// The directory holding state and config, for subcommands that have one.
    pub fn data_dir(&self) -> Option<&Path> {
        match self {
            Subcommand::Run(cmd) => Some(&cmd.data_dir),
            Subcommand::Render(_) => None,
        }
    }

    pub fn command_name(&self) -> &'static str {
        match self {
            Subcommand::Run(_) => "run",
            Subcommand::Render(_) => "render",
        }
    }
}

/// Resolves a possibly relative path against the working directory.
pub fn resolve_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    match std::env::current_dir() {
        Ok(current) => current.join(path),
        Err(_) => path.to_path_buf(),
    }
}
