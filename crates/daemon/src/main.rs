use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use caskfs_daemon::cli::{Args, Command};
use caskfs_daemon::fs::CaskFs;
use caskfs_daemon::mount;
use caskfs_store::{BackingStore, LoopbackStore, RemoteStore};

/// Initialize logging. Returns guards that must be kept alive for the
/// duration of the program.
fn init_logging(args: &Args) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    let default = tracing::level_filters::LevelFilter::from_level(args.log_level);
    let mut guards = Vec::new();

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(stdout_filter);

    if let Some(log_dir) = &args.log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!("warning: failed to create log directory {log_dir:?}: {e}");
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "caskfs.log");
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_filter = EnvFilter::builder()
            .with_default_directive(default.into())
            .from_env_lossy();
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_filter(file_filter);

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(stdout_layer).init();
    }

    guards
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guards = init_logging(&args);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match args.command {
        Command::Remote {
            mount_path,
            account_name,
            account_key,
            container_name,
        } => {
            info!(account = %account_name, container = %container_name, "validating credentials");
            let store = match rt.block_on(RemoteStore::connect(
                &account_name,
                &account_key,
                &container_name,
            )) {
                Ok(store) => Arc::new(store) as Arc<dyn BackingStore>,
                Err(e) => {
                    error!("credential validation failed: {e}");
                    std::process::exit(1);
                }
            };

            let fs = Arc::new(CaskFs::new(rt.handle().clone(), store));
            let options = mount::mount_options("remote", Some(&account_name));
            mount::mount(fs, &mount_path, &options)?;
        }
        Command::Loopback { root, mountpoint } => {
            let store = match LoopbackStore::open(&root) {
                Ok(store) => Arc::new(store) as Arc<dyn BackingStore>,
                Err(e) => {
                    error!("loopback root rejected: {e}");
                    std::process::exit(1);
                }
            };

            let fs = Arc::new(CaskFs::new(rt.handle().clone(), store));
            let options = mount::mount_options("loopback", None);
            mount::mount(fs, &mountpoint, &options)?;
        }
    }

    info!("unmounted cleanly");
    Ok(())
}
