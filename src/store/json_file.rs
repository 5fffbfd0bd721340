use std::{
    collections::{BTreeMap, BTreeSet},
    io::{self, Write as _},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use fs_err as fs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::ids::{ChannelId, GuildId, RoleId};

use super::{
    memory::{remove_channel_entry, set_guild_roles, ChannelMap, RoleMap},
    MemoryStore, NameLock, StateStore, StoreError,
};

pub const LOCKS_FILE: &str = "protected_names.json";
pub const FORMATS_FILE: &str = "format_fallbacks.json";
pub const MOD_ROLES_FILE: &str = "mod_roles.json";

/// A store persisted as three JSON documents inside a data directory.
///
/// Each document is a nested object keyed by guild ID then channel ID, with
/// IDs written as strings. Reads are served from memory; every mutation
/// rewrites the affected document through a temporary file so a crash never
/// leaves a half-written file behind.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    memory: MemoryStore,

    /// Serializes file writes so two mutations can't interleave their
    /// snapshots on disk.
    write_guard: Mutex<()>,
}

/// `mod_roles.json` used to hold a single role per guild.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRoles {
    Many(BTreeSet<RoleId>),
    One(RoleId),
}

impl JsonFileStore {
    /// Loads the store from `dir`, creating the directory if needed. Missing
    /// files are treated as empty.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Write {
            path: dir.clone(),
            source,
        })?;

        let locks: ChannelMap = load_document(&dir.join(LOCKS_FILE))?;
        let formats: ChannelMap = load_document(&dir.join(FORMATS_FILE))?;
        let stored_roles: BTreeMap<GuildId, StoredRoles> =
            load_document(&dir.join(MOD_ROLES_FILE))?;

        let mod_roles: RoleMap = stored_roles
            .into_iter()
            .map(|(guild, roles)| {
                let roles = match roles {
                    StoredRoles::Many(roles) => roles,
                    StoredRoles::One(role) => BTreeSet::from([role]),
                };
                (guild, roles)
            })
            .filter(|(_, roles)| !roles.is_empty())
            .collect();

        log::debug!(
            "Loaded {} locked channel(s) from {}",
            locks.values().map(BTreeMap::len).sum::<usize>(),
            dir.display()
        );

        Ok(Self {
            dir,
            memory: MemoryStore::from_parts(locks, formats, mod_roles),
            write_guard: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `value` to `file_name`. Callers hold the write guard and only
    /// commit the new value to memory once this succeeds.
    fn persist<T: Serialize>(&self, file_name: &str, value: &T) -> Result<(), StoreError> {
        let path = self.dir.join(file_name);
        let contents = serde_json::to_vec_pretty(value)?;
        write_atomic(&self.dir, &path, &contents)
            .map_err(|source| StoreError::Write { path, source })
    }

    fn writing(&self) -> MutexGuard<'_, ()> {
        self.write_guard.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn load_document<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_owned(),
                source,
            })
        }
    };

    serde_json::from_slice(&contents).map_err(|source| StoreError::Parse {
        path: path.to_owned(),
        source,
    })
}

fn write_atomic(dir: &Path, path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.flush()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

impl StateStore for JsonFileStore {
    fn lock(&self, guild: GuildId, channel: ChannelId) -> Option<String> {
        self.memory.lock(guild, channel)
    }

    fn lock_for_channel(&self, channel: ChannelId) -> Option<NameLock> {
        self.memory.lock_for_channel(channel)
    }

    fn set_lock(
        &self,
        guild: GuildId,
        channel: ChannelId,
        template: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.writing();

        let mut locks = self.memory.locks_snapshot();
        locks
            .entry(guild)
            .or_default()
            .insert(channel, template.to_owned());

        self.persist(LOCKS_FILE, &locks)?;
        self.memory.replace_locks(locks);
        Ok(())
    }

    fn remove_lock(&self, guild: GuildId, channel: ChannelId) -> Result<bool, StoreError> {
        let _guard = self.writing();

        let mut locks = self.memory.locks_snapshot();
        if !remove_channel_entry(&mut locks, guild, channel) {
            return Ok(false);
        }

        self.persist(LOCKS_FILE, &locks)?;
        self.memory.replace_locks(locks);
        Ok(true)
    }

    fn guild_locks(&self, guild: GuildId) -> Vec<NameLock> {
        self.memory.guild_locks(guild)
    }

    fn all_locks(&self) -> Vec<NameLock> {
        self.memory.all_locks()
    }

    fn fallback_format(&self, guild: GuildId, channel: ChannelId) -> Option<String> {
        self.memory.fallback_format(guild, channel)
    }

    fn set_fallback_format(
        &self,
        guild: GuildId,
        channel: ChannelId,
        format: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.writing();

        let mut formats = self.memory.formats_snapshot();
        formats
            .entry(guild)
            .or_default()
            .insert(channel, format.to_owned());

        self.persist(FORMATS_FILE, &formats)?;
        self.memory.replace_formats(formats);
        Ok(())
    }

    fn guild_fallback_formats(&self, guild: GuildId) -> Vec<(ChannelId, String)> {
        self.memory.guild_fallback_formats(guild)
    }

    fn moderator_roles(&self, guild: GuildId) -> BTreeSet<RoleId> {
        self.memory.moderator_roles(guild)
    }

    fn set_moderator_roles(
        &self,
        guild: GuildId,
        roles: BTreeSet<RoleId>,
    ) -> Result<(), StoreError> {
        let _guard = self.writing();

        let mut mod_roles = self.memory.mod_roles_snapshot();
        set_guild_roles(&mut mod_roles, guild, roles);

        self.persist(MOD_ROLES_FILE, &mod_roles)?;
        self.memory.replace_mod_roles(mod_roles);
        Ok(())
    }
}
