//! Platform identifiers.
//!
//! Discord snowflakes routinely exceed 2^53, so they are kept as `u64` and
//! written to disk as decimal strings. Reading accepts both strings and bare
//! integers so files written by older tooling still load.

use std::{fmt, num::ParseIntError, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(source: &str) -> Result<Self, Self::Err> {
                source.trim().parse().map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(SnowflakeVisitor).map(Self)
            }
        }
    };
}

snowflake!(
    /// A tenant grouping channels, members and roles.
    GuildId
);
snowflake!(
    /// A renameable channel inside a guild.
    ChannelId
);
snowflake!(RoleId);
snowflake!(UserId);

static CHANNEL_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:<#(\d{17,20})>|(\d{17,20})|https?://(?:[a-z]+\.)?discord(?:app)?\.com/channels/\d+/(\d{17,20})/?)$",
    )
    .expect("channel reference regex is valid")
});

/// A channel reference typed by a user: a `<#id>` mention, a bare ID, or a
/// `discord.com/channels/<guild>/<channel>` link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRef(pub ChannelId);

impl ChannelRef {
    pub fn parse(text: &str) -> Option<Self> {
        let captures = CHANNEL_REF.captures(text.trim())?;
        let digits = captures
            .get(1)
            .or_else(|| captures.get(2))
            .or_else(|| captures.get(3))?;
        digits.as_str().parse().ok().map(Self)
    }
}

impl RoleId {
    /// Parses a `<@&id>` role mention or a bare ID.
    pub fn parse_mention(text: &str) -> Option<Self> {
        let text = text.trim();
        let digits = text
            .strip_prefix("<@&")
            .and_then(|rest| rest.strip_suffix('>'))
            .unwrap_or(text);

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

struct SnowflakeVisitor;

impl<'de> Visitor<'de> for SnowflakeVisitor {
    type Value = u64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a snowflake ID as a decimal string or unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
        Ok(value)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
        u64::try_from(value).map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
        value
            .trim()
            .parse()
            .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
    }
}
