use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a driver operation.
pub type DriverResult<T> = Result<T, DriverError>;

/// An error that occurred during a layer driver operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum DriverError {
    /// A layer with the same id already exists.
    #[error("layer already exists: {0}")]
    LayerExists(String),

    /// The layer does not exist or has already been removed.
    #[error("layer does not exist: {0}")]
    LayerNotFound(String),

    /// The parent layer named at creation time does not exist.
    #[error("parent layer does not exist: {0}")]
    ParentNotFound(String),

    /// No driver is registered under the requested name.
    #[error("no driver registered under name: {0}")]
    DriverNotFound(String),

    /// No registered driver could be initialized on this host.
    #[error("no supported storage driver found")]
    NoSupportedDriver,

    /// A driver was registered twice under the same name.
    #[error("driver already registered: {0}")]
    DuplicateDriver(String),

    /// The host lacks support required by the driver.
    #[error("driver `{driver}` not supported: {reason}")]
    DriverNotSupported {
        /// The driver name.
        driver: String,

        /// Why the host cannot run the driver.
        reason: String,
    },

    /// A storage option the backing technology cannot honor.
    #[error("storage option `{key}` not supported by driver `{driver}`")]
    UnsupportedStorageOption {
        /// The driver name.
        driver: String,

        /// The rejected option key.
        key: String,
    },

    /// A driver option the driver does not recognize.
    #[error("unknown option `{key}` for driver `{driver}`")]
    UnknownDriverOption {
        /// The driver name.
        driver: String,

        /// The rejected option key.
        key: String,
    },

    /// A malformed option value.
    #[error("invalid option `{key}`: {reason}")]
    InvalidOption {
        /// The option key.
        key: String,

        /// What is wrong with it.
        reason: String,
    },

    /// A layer id that cannot name a storage area.
    #[error("invalid layer id: {0:?}")]
    InvalidLayerId(String),

    /// The uid/gid maps do not resolve a root identity.
    #[error("invalid id mapping: {0}")]
    InvalidIdMapping(String),

    /// The resolved layer path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A diff entry tried to escape the layer root.
    #[error("diff entry escapes layer root: {0}")]
    PathEscapesRoot(PathBuf),

    /// Persisted layer metadata could not be decoded.
    #[error("corrupt layer metadata for {id}: {source}")]
    CorruptMetadata {
        /// The layer id.
        id: String,

        /// The decode error.
        #[source]
        source: serde_json::Error,
    },

    /// Relabeling a layer path failed.
    #[error("failed to relabel {path} with {label:?}: {source}")]
    Relabel {
        /// The path being labeled.
        path: PathBuf,

        /// The requested label.
        label: String,

        /// The underlying failure.
        #[source]
        source: io::Error,
    },

    /// A configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A JSON encode or decode failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A walk over a layer tree failed.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// A system call failed.
    #[error("system call error: {0}")]
    Nix(#[from] nix::Error),

    /// An I/O error from the backing storage.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Custom error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// The class of a [`DriverError`], used by callers that only care about the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The id already exists.
    Conflict,

    /// The layer or driver does not exist.
    NotFound,

    /// The backing technology or host cannot provide the requested feature.
    Unsupported,

    /// On-disk state is not what the driver expects.
    InvalidState,

    /// The caller supplied a malformed argument.
    InvalidArgument,

    /// Opaque failure from the underlying storage.
    Io,
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DriverError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> DriverError {
        DriverError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns the class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::LayerExists(_) | DriverError::DuplicateDriver(_) => ErrorKind::Conflict,
            DriverError::LayerNotFound(_)
            | DriverError::ParentNotFound(_)
            | DriverError::DriverNotFound(_)
            | DriverError::NoSupportedDriver => ErrorKind::NotFound,
            DriverError::DriverNotSupported { .. }
            | DriverError::UnsupportedStorageOption { .. }
            | DriverError::UnknownDriverOption { .. } => ErrorKind::Unsupported,
            DriverError::NotADirectory(_) | DriverError::CorruptMetadata { .. } => {
                ErrorKind::InvalidState
            }
            DriverError::InvalidOption { .. }
            | DriverError::InvalidLayerId(_)
            | DriverError::InvalidIdMapping(_)
            | DriverError::PathEscapesRoot(_)
            | DriverError::ConfigParse(_) => ErrorKind::InvalidArgument,
            DriverError::Relabel { .. }
            | DriverError::Json(_)
            | DriverError::Walk(_)
            | DriverError::Nix(_)
            | DriverError::Io(_)
            | DriverError::Custom(_) => ErrorKind::Io,
        }
    }

    /// Returns `true` if this error is a conflict on an existing id.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Returns `true` if this error reports a missing layer or driver.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns `true` if the host or backing technology lacks the requested support.
    pub fn is_unsupported(&self) -> bool {
        self.kind() == ErrorKind::Unsupported
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `DriverResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> DriverResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
