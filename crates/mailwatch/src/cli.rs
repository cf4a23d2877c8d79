//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "mailwatch", author, version, about, propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Override the default configuration file path
    #[arg(long, short, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll every configured mailbox until interrupted
    Run,

    /// Grant mailwatch read-only access to one mailbox
    ///
    /// Opens the provider's consent page, then asks for the authorization
    /// code (or the whole URL the browser was redirected to) and stores the
    /// resulting credential.
    Authorize {
        /// Mailbox address, as listed in the configuration
        account: String,

        /// Print the consent URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
}
