use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for weft operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    /// Control-flow sentinel: the config file changed on disk and the
    /// running command should be re-entered with a freshly loaded config.
    #[error("reloading config")]
    Reload,

    #[error("finished command with errors")]
    CommandErrors,

    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid environment [{name}]: ({})", reasons.join(","))]
    InvalidEnvironment { name: String, reasons: Vec<String> },

    #[error("environment does not exist in this environments list")]
    EnvDoesNotExist,

    #[error("environment was found but not defined")]
    EnvNotDefined,

    #[error("no environments defined, nothing to write")]
    NoEnvironmentsDefined,

    #[error("environment name cannot be blank")]
    BlankEnvironmentName,

    #[error("could not load any valid environments")]
    NoEnvironmentsLoaded,

    #[error("config file not found at {path:?}")]
    NotFound { path: PathBuf },

    #[error("invalid {format} found while loading the config file: {message}")]
    Malformed { format: String, message: String },

    #[error("invalid duration value: {0}")]
    InvalidDuration(String),

    #[error("more than one environment specified for a single environment command")]
    SingleEnvironmentOnly,

    #[error("cannot make changes to the live theme without --allow-live")]
    LiveTheme,
}

/// Transport-related errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error(
        "DNS problem while connecting to the storefront API, this indicates a problem with your internet connection"
    )]
    ConnectionIssue,

    #[error("invalid proxy URI {0:?}")]
    InvalidProxyUrl(String),

    #[error("invalid domain {0:?}")]
    InvalidDomain(String),

    #[error("environment is read-only")]
    ReadOnlyEnvironment,

    #[error("request failed after {attempts} retries")]
    RetriesExhausted { attempts: u32 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors mapped from remote API responses
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("provided store domain does not exist")]
    ShopDomainNotFound,

    #[error("requested theme was not found")]
    ThemeNotFound,

    #[error("this file is not part of your theme")]
    NotPartOfTheme,

    #[error("this file is critical and removing it would cause your theme to become non-functional")]
    CriticalFile,

    #[error("asset has no name so it could not be processed")]
    MissingAssetName,

    #[error("theme name is required to create a theme")]
    ThemeNameRequired,

    #[error("cannot get info without a theme id")]
    InfoWithoutThemeId,

    #[error("cannot publish a theme without a theme id set")]
    PublishWithoutThemeId,

    #[error("no available themes")]
    NoThemes,

    #[error("{0}")]
    Api(String),

    #[error("unexpected response status {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },
}

/// Errors from reading or writing theme files on disk
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("requested asset is a directory")]
    IsDirectory,

    #[error("could not read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("could not write {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("could not decode {key}: {message}")]
    Decode { key: String, message: String },
}

/// Errors from the filesystem watcher
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("could not watch directory {path:?}: {message}")]
    Setup { path: PathBuf, message: String },

    #[error("watch channel closed unexpectedly")]
    ChannelClosed,
}

impl Error {
    /// Failures that end the environment's run immediately. Everything else is
    /// recorded against the failing asset and the run continues.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Config(_) | Error::Reload => true,
            Error::Transport(TransportError::ConnectionIssue) => true,
            Error::Transport(TransportError::ReadOnlyEnvironment) => true,
            Error::Transport(TransportError::InvalidProxyUrl(_)) => true,
            Error::Remote(RemoteError::ShopDomainNotFound) => true,
            _ => false,
        }
    }
}

/// Result type alias for weft operations
pub type Result<T> = std::result::Result<T, Error>;
