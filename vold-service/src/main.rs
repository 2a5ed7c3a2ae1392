// SPDX-License-Identifier: GPL-3.0-only

//! voldd - volume and disk lifecycle daemon
//!
//! Wires the Linux collaborators into the volume manager, exposes the
//! control plane on the D-Bus system bus and follows kernel block hotplug.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};
use vold_service::config::DEFAULT_CONFIG_PATH;
use vold_service::{Adapters, Context, DaemonConfig, VolumeManager};
use vold_sys::{
    DmCryptBackend, LinuxAppFuse, LinuxSystem, ProcfsProcessTable, SdcardLauncher,
    SystemCommandRunner, fs_tools,
};
use zbus::connection::Builder as ConnectionBuilder;

mod handler;
mod hotplug;

use handler::{OBJECT_PATH, VolumeManagerHandler};

#[derive(Debug, Parser)]
#[command(version, about = "Volume and disk lifecycle daemon")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short)]
    verbose: bool,
}

fn build_adapters(config: &DaemonConfig) -> Adapters {
    let commands = Arc::new(SystemCommandRunner::new());
    Adapters {
        commands: commands.clone(),
        system: Arc::new(LinuxSystem::new(config.unmount.force_unmount_delay())),
        crypto: Arc::new(DmCryptBackend::new(
            commands,
            config.paths.key_dir.join("user_keys"),
        )),
        overlay: Arc::new(SdcardLauncher::new(&config.overlay.binary)),
        processes: Arc::new(ProcfsProcessTable::new()),
        appfuse: Arc::new(LinuxAppFuse::new(&config.paths.appfuse)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "vold_service=debug,vold_sys=debug,warn"
    } else {
        "vold_service=info,vold_sys=info,warn"
    };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting voldd v{}", env!("CARGO_PKG_VERSION"));

    // Check if running as root
    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("voldd must run as root");
        anyhow::bail!("Service must run with root privileges");
    }

    let config = DaemonConfig::load(&args.config)?;
    let disk_sources = config.disk_sources()?;
    tracing::info!("Loaded {} disk sources", disk_sources.len());

    let supported = fs_tools::detect_supported();
    tracing::info!(
        "Supported filesystems: {}",
        supported
            .iter()
            .map(|fs| fs.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let adapters = build_adapters(&config);
    let ctx = Arc::new(Context::new(adapters, config, supported));
    let manager = Arc::new(VolumeManager::new(ctx, disk_sources));

    let connection = ConnectionBuilder::system()?
        .name("org.vold.VolumeManager")?
        .serve_at(OBJECT_PATH, VolumeManagerHandler::new(manager.clone()))?
        .build()
        .await?;
    tracing::info!("Service registered on D-Bus system bus");
    tracing::info!("  - org.vold.VolumeManager at {}", OBJECT_PATH);

    handler::forward_events(&connection, &manager).await?;
    manager.start().await?;
    hotplug::monitor_block_events(manager.clone())?;
    tracing::info!("Block hotplug monitoring enabled");

    tracing::info!("Service ready, waiting for requests...");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    manager.shutdown().await?;
    tracing::info!("voldd shutting down");
    Ok(())
}
