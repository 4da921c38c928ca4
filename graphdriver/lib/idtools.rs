//! User-namespace id mapping and ownership-aware directory creation.

use std::{
    fmt, fs, io,
    os::unix::fs::{DirBuilderExt, MetadataExt},
    path::{Path, PathBuf},
    str::FromStr,
};

use nix::unistd::{chown, getegid, geteuid, Gid, Uid};
use serde::{Deserialize, Serialize};

use crate::{DriverError, DriverResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A contiguous range of ids mapped from a container namespace onto the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdMap {
    /// The first id inside the container.
    pub container_id: u32,

    /// The host id `container_id` maps to.
    pub host_id: u32,

    /// The number of ids in the range.
    pub size: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl IdMap {
    /// Creates a new mapping.
    pub fn new(container_id: u32, host_id: u32, size: u32) -> Self {
        Self {
            container_id,
            host_id,
            size,
        }
    }

    /// Translates a container id to its host id if this range covers it.
    pub fn to_host(&self, container_id: u32) -> Option<u32> {
        let offset = container_id.checked_sub(self.container_id)?;
        if offset >= self.size {
            return None;
        }

        self.host_id.checked_add(offset)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Translates `container_id` through `maps`. An empty map list is the identity mapping.
pub fn to_host(container_id: u32, maps: &[IdMap]) -> Option<u32> {
    if maps.is_empty() {
        return Some(container_id);
    }

    maps.iter().find_map(|m| m.to_host(container_id))
}

/// Resolves the host uid/gid that act as root for layers created by a driver.
///
/// With no maps the daemon's own effective uid/gid is root. Otherwise container id 0 must
/// be covered by both the uid and gid maps.
pub fn root_pair(uid_maps: &[IdMap], gid_maps: &[IdMap]) -> DriverResult<(u32, u32)> {
    let uid = if uid_maps.is_empty() {
        geteuid().as_raw()
    } else {
        to_host(0, uid_maps).ok_or_else(|| {
            DriverError::InvalidIdMapping("container uid 0 is not mapped to a host uid".into())
        })?
    };

    let gid = if gid_maps.is_empty() {
        getegid().as_raw()
    } else {
        to_host(0, gid_maps).ok_or_else(|| {
            DriverError::InvalidIdMapping("container gid 0 is not mapped to a host gid".into())
        })?
    };

    Ok((uid, gid))
}

/// Creates `path` and any missing ancestors with `mode`, then hands the newly created
/// directories to `uid`:`gid`. Directories that already existed are left untouched.
///
/// Existing components are resolved through symlinks, so a home reached through a symlinked
/// directory is accepted.
pub fn mkdir_all_as(path: &Path, mode: u32, uid: u32, gid: u32) -> DriverResult<()> {
    let mut missing: Vec<PathBuf> = Vec::new();
    let mut cursor = Some(path);
    while let Some(p) = cursor {
        match fs::metadata(p) {
            Ok(m) if m.is_dir() => break,
            Ok(_) => return Err(DriverError::NotADirectory(p.to_path_buf())),
            Err(e)
                if e.kind() == io::ErrorKind::NotFound
                    || e.raw_os_error() == Some(libc::ENOTDIR) =>
            {
                missing.push(p.to_path_buf())
            }
            Err(e) => return Err(e.into()),
        }
        cursor = p.parent();
    }

    for dir in missing.iter().rev() {
        match fs::DirBuilder::new().mode(mode).create(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }

        let metadata = fs::symlink_metadata(dir)?;
        if metadata.uid() != uid || metadata.gid() != gid {
            chown(dir, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))?;
        }
        tracing::debug!("created {} owned by {}:{}", dir.display(), uid, gid);
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for IdMap {
    type Err = DriverError;

    /// Parses `container:host:size`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            || DriverError::InvalidIdMapping(format!("expected container:host:size, got {s:?}"));

        let parts: Vec<&str> = s.split(':').collect();
        let [container, host, size] = parts.as_slice() else {
            return Err(invalid());
        };

        let parse = |v: &str| v.trim().parse::<u32>().map_err(|_| invalid());
        Ok(IdMap::new(parse(container)?, parse(host)?, parse(size)?))
    }
}

impl fmt::Display for IdMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.container_id, self.host_id, self.size)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
