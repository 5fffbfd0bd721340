//! Resolves name templates against a live snapshot.
//!
//! Templates are plain strings containing `{placeholder}` tokens. Resolution
//! is a single left-to-right pass: substituted values are never re-scanned, so
//! a member called `{count}` stays literally `{count}`. Unknown or malformed
//! placeholders are copied through verbatim.
//!
//! `{vc}` is exclusive. When a template contains it, only `{vc}` tokens are
//! expanded and every other placeholder is left untouched.

use crate::snapshot::LiveSnapshot;

/// Fallback used for `{vc}` when nobody is connected and no format is set.
pub const DEFAULT_EMPTY_FALLBACK: &str = "no one in VC";

/// Fallback used for `{vc}` when four or more members are connected and no
/// format is set.
pub const DEFAULT_CROWD_FALLBACK: &str = "{count} in VC";

/// Every placeholder the resolver understands, with a short description.
pub const PLACEHOLDERS: &[(&str, &str)] = &[
    (
        "{vc}",
        "Dynamic VC member names or fallback (e.g. `Ruki`, `Ruki and Jul`, `5 in VC`)",
    ),
    ("{count}", "Number of users in VC"),
    ("{online}", "Total online users in the server"),
    ("{onlinemods}", "Online members with a moderator role"),
];

/// Which placeholders a template references. Used to skip live reads the
/// template doesn't need and to decide which channels care about presence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Placeholders {
    pub vc: bool,
    pub count: bool,
    pub online: bool,
    pub online_mods: bool,
}

impl Placeholders {
    pub fn scan(template: &str) -> Self {
        let mut found = Placeholders::default();

        for_each_token(template, |name| match name {
            "vc" => found.vc = true,
            "count" => found.count = true,
            "online" => found.online = true,
            "onlinemods" => found.online_mods = true,
            _ => {}
        });

        found
    }

    pub fn needs_members(&self) -> bool {
        self.vc || self.count
    }

    /// Presence placeholders only count when `{vc}` isn't masking them.
    pub fn needs_online(&self) -> bool {
        !self.vc && self.online
    }

    pub fn needs_online_mods(&self) -> bool {
        !self.vc && self.online_mods
    }

    pub fn uses_presence(&self) -> bool {
        self.needs_online() || self.needs_online_mods()
    }
}

/// Resolves `template` against `snapshot`.
///
/// `fallback_format` overrides the text `{vc}` falls back to when the channel
/// is empty or has four or more members. Any `{count}` inside the fallback is
/// replaced by the live member count.
pub fn resolve(template: &str, snapshot: &LiveSnapshot, fallback_format: Option<&str>) -> String {
    let placeholders = Placeholders::scan(template);

    if placeholders.vc {
        let vc = vc_value(snapshot, fallback_format);
        return expand(template, |name| (name == "vc").then(|| vc.clone()));
    }

    expand(template, |name| match name {
        "count" => Some(snapshot.member_count().to_string()),
        "online" => Some(snapshot.online_member_count.to_string()),
        "onlinemods" => Some(snapshot.online_moderator_count.to_string()),
        _ => None,
    })
}

fn vc_value(snapshot: &LiveSnapshot, fallback_format: Option<&str>) -> String {
    let names = &snapshot.member_display_names;

    match names.as_slice() {
        [] => fallback_text(fallback_format, DEFAULT_EMPTY_FALLBACK, 0),
        [only] => only.clone(),
        [first, second] => format!("{} and {}", first, second),
        [first, second, third] => format!("{}, {}, and {}", first, second, third),
        _ => fallback_text(fallback_format, DEFAULT_CROWD_FALLBACK, names.len()),
    }
}

fn fallback_text(configured: Option<&str>, default: &str, count: usize) -> String {
    configured
        .unwrap_or(default)
        .replace("{count}", &count.to_string())
}

/// Copies `template` into a new string, asking `lookup` for the value of each
/// `{name}` token. Tokens `lookup` declines are kept as written.
fn expand(template: &str, mut lookup: impl FnMut(&str) -> Option<String>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match token_end(after) {
            Some(close) => {
                let name = &after[..close];
                match lookup(name) {
                    Some(value) => output.push_str(&value),
                    None => {
                        output.push('{');
                        output.push_str(name);
                        output.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                output.push('{');
                rest = after;
            }
        }
    }

    output.push_str(rest);
    output
}

fn for_each_token(template: &str, mut visit: impl FnMut(&str)) {
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match token_end(after) {
            Some(close) => {
                visit(&after[..close]);
                rest = &after[close + 1..];
            }
            None => rest = after,
        }
    }
}

/// Byte offset of the `}` closing a token, or `None` when another `{` or the
/// end of input comes first.
fn token_end(after_open: &str) -> Option<usize> {
    let end = after_open.find(['{', '}'])?;
    (after_open.as_bytes()[end] == b'}').then_some(end)
}
