use std::{
    io::{self, Write},
    path::Path,
};

use chrono::Utc;
use tar::{Builder, EntryType, Header};

use crate::{utils::WHITEOUT_PREFIX, DriverResult};

use super::{Change, ChangeKind};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Writes `changes` as an uncompressed tar stream, reading content from `root`.
///
/// Added and modified paths are archived from `root` without following symlinks; directories
/// contribute only their own entry. Deleted paths become empty `.wh.<name>` whiteout entries.
pub fn export_changes<W: Write>(root: &Path, changes: &[Change], writer: W) -> DriverResult<W> {
    let mut builder = Builder::new(writer);
    builder.follow_symlinks(false);

    let whiteout_mtime = Utc::now().timestamp().max(0) as u64;

    for change in changes {
        let relative = change.relative_path();
        match change.kind {
            ChangeKind::Delete => {
                let name = relative
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let whiteout = relative
                    .parent()
                    .unwrap_or_else(|| Path::new(""))
                    .join(format!("{WHITEOUT_PREFIX}{name}"));

                let mut header = Header::new_gnu();
                header.set_entry_type(EntryType::Regular);
                header.set_size(0);
                header.set_mode(0o644);
                header.set_mtime(whiteout_mtime);
                builder.append_data(&mut header, &whiteout, io::empty())?;
                tracing::debug!("exported whiteout: {}", whiteout.display());
            }
            ChangeKind::Add | ChangeKind::Modify => {
                builder.append_path_with_name(root.join(relative), relative)?;
                tracing::debug!("exported {}: {}", change.kind, relative.display());
            }
        }
    }

    Ok(builder.into_inner()?)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
