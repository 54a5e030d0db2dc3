//! Command line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "caskfsd", version)]
#[command(about = "Mount an object-store container as a local filesystem")]
pub struct Args {
    /// Default log level; RUST_LOG overrides it.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: tracing::Level,

    /// Directory for daily rolling log files, in addition to stdout.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount a remote container.
    Remote {
        /// Directory to mount the filesystem on.
        #[arg(long = "mountPath")]
        mount_path: PathBuf,

        /// Storage account name.
        #[arg(long = "accountName")]
        account_name: String,

        /// Shared access key for the storage account.
        #[arg(long = "accountKey")]
        account_key: String,

        /// Container to mount.
        #[arg(long = "containerName")]
        container_name: String,
    },

    /// Mirror a local directory through the same filesystem core.
    Loopback {
        /// Directory that backs the filesystem.
        root: PathBuf,

        /// Directory to mount the filesystem on.
        mountpoint: PathBuf,
    },
}
