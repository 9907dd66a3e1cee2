pub mod configure;
pub mod deploy;
pub mod download;
pub mod get;
pub mod new;
pub mod publish;
pub mod remove;
pub mod upload;
pub mod version;
pub mod watch;

use colored::Colorize;
use weft::error::Error;

/// Error display helper for the CLI.
pub fn display_error(error: &Error) {
    // per-asset failures were already reported in the run summary
    if matches!(error, Error::CommandErrors) {
        return;
    }

    eprintln!("{} {}", "✗".bright_red().bold(), error);

    match error {
        Error::Config(_) => {
            eprintln!("  {} Check your config file or pass --password, --theme-id and --store", "└".bright_cyan());
        }
        Error::Transport(weft::error::TransportError::ConnectionIssue) => {
            eprintln!("  {} Check your internet connection and the store domain", "└".bright_cyan());
        }
        Error::Remote(weft::error::RemoteError::ShopDomainNotFound) => {
            eprintln!("  {} Check the configured store domain", "└".bright_cyan());
        }
        _ => {}
    }
}
