//! Security-label relabeling of layer storage paths.

use std::{fmt, io, path::Path};

use crate::{DriverError, DriverResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The extended attribute that carries a path's SELinux context.
pub const SELINUX_XATTR: &str = "security.selinux";

/// Present when SELinux is enabled on the host.
const SELINUX_ENFORCE_PATH: &str = "/sys/fs/selinux/enforce";

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Applies a mount label to a path.
///
/// Drivers call this after allocating storage for a new layer. A failure fails the create.
pub trait MountLabeler: fmt::Debug + Send + Sync {
    /// Relabels `path` with `label`. `shared` requests a label that several containers may use.
    fn relabel(&self, path: &Path, label: &str, shared: bool) -> DriverResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Relabels through the `security.selinux` attribute when SELinux is enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelinuxLabeler;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SelinuxLabeler {
    /// Returns `true` if SELinux is enabled on this host.
    pub fn enabled() -> bool {
        Path::new(SELINUX_ENFORCE_PATH).exists()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl MountLabeler for SelinuxLabeler {
    fn relabel(&self, path: &Path, label: &str, shared: bool) -> DriverResult<()> {
        if label.is_empty() || !Self::enabled() {
            tracing::debug!("skipping relabel of {}", path.display());
            return Ok(());
        }

        let label = if shared {
            shared_label(label)
        } else {
            label.to_string()
        };

        let relabel_err = |source: io::Error| DriverError::Relabel {
            path: path.to_path_buf(),
            label: label.clone(),
            source,
        };

        let mut value = label.clone().into_bytes();
        value.push(0);
        xattr::set(path, SELINUX_XATTR, &value).map_err(relabel_err)?;

        tracing::debug!("relabeled {} with {}", path.display(), label);
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Drops the MCS categories from a label so it can be shared between containers.
fn shared_label(label: &str) -> String {
    let parts: Vec<&str> = label.splitn(4, ':').collect();
    match parts.as_slice() {
        [user, role, ty, _level] => format!("{user}:{role}:{ty}:s0"),
        _ => label.to_string(),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
