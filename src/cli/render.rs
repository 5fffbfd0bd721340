use clap::Parser;

use crate::{sanitize::sanitize, snapshot::LiveSnapshot, template::resolve};

/// Resolve a name template offline and print what the channel would be
/// called.
#[derive(Debug, Parser)]
pub struct RenderCommand {
    /// Template to resolve, e.g. `{vc}` or `team {count} active`.
    pub template: String,

    /// Display name of a connected member. Repeat for each member.
    #[clap(long = "member")]
    pub members: Vec<String>,

    /// Value for `{online}`.
    #[clap(long, default_value_t = 0)]
    pub online: u64,

    /// Value for `{onlinemods}`.
    #[clap(long, default_value_t = 0)]
    pub online_mods: u64,

    /// Fallback format used by `{vc}` for empty or crowded channels.
    #[clap(long)]
    pub fallback: Option<String>,
}

impl RenderCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let (resolved, sanitized) = self.render();

        println!("resolved:  {resolved}");
        println!("sanitized: {sanitized}");

        if sanitized.is_empty() {
            log::warn!("Template resolves to an empty name; it would never be applied.");
        }

        Ok(())
    }

    fn render(&self) -> (String, String) {
        let snapshot = LiveSnapshot {
            member_display_names: self.members.clone(),
            online_member_count: self.online,
            online_moderator_count: self.online_mods,
        };

        let resolved = resolve(&self.template, &snapshot, self.fallback.as_deref());
        let sanitized = sanitize(&resolved);
        (resolved, sanitized)
    }
}
