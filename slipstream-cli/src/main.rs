//! Slipstream CLI - streams video out of BitTorrent swarms over HTTP.
//!
//! Maps command-line flags onto the slipstream configuration, wires a swarm
//! client into a coordinator and runs the HTTP server until shutdown. The
//! bundled in-process swarm simulator stands in for a real engine; a
//! production deployment swaps in an adapter implementing
//! `slipstream_core::SwarmClient`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use slipstream_core::config::ProxyConfig;
use slipstream_core::swarm::sim::{SimSwarmClient, SyntheticSeed};
use slipstream_core::{CliLogLevel, Coordinator, EventSink, SlipstreamConfig, init_tracing};
use slipstream_web::run_server;

#[derive(Parser)]
#[command(name = "slipstream")]
#[command(about = "Streams video out of BitTorrent swarms over HTTP")]
struct Cli {
    /// Listen port for the swarm engine
    #[arg(long, default_value_t = 6881)]
    bittorrent_port: u16,

    /// HTTP listen port
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Download rate limit in KiB/s (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_download_rate: u64,

    /// Upload rate limit in KiB/s (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_upload_rate: u64,

    /// Proxy type; only SOCKS5 is recognized
    #[arg(long)]
    proxy_type: Option<String>,

    /// Proxy host
    #[arg(long)]
    proxy_host: Option<String>,

    /// Proxy port
    #[arg(long)]
    proxy_port: Option<u16>,

    /// Proxy username
    #[arg(long)]
    proxy_user: Option<String>,

    /// Proxy password
    #[arg(long)]
    proxy_password: Option<String>,

    /// Enable UPnP and NAT-PMP port mapping
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    upnp_natpmp: bool,

    /// Keep payload files when an idle torrent is removed
    #[arg(long)]
    keep_files: bool,

    /// Seconds without connections before a torrent is paused
    #[arg(long, default_value_t = 30)]
    inactivity_pause_timeout: u64,

    /// Further seconds before a paused torrent is removed
    #[arg(long, default_value_t = 60)]
    inactivity_remove_timeout: u64,

    /// Exit when this process disappears
    #[arg(long)]
    parent_pid: Option<u32>,

    /// Default save location for torrent payloads
    #[arg(long, default_value = ".")]
    download_dir: PathBuf,

    /// Analytics project token; events are dropped when absent
    #[arg(long)]
    analytics_token: Option<String>,

    /// Console log level
    #[arg(long, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,
}

impl Cli {
    fn into_config(self) -> SlipstreamConfig {
        let mut config = SlipstreamConfig::default();

        config.swarm.listen_port = self.bittorrent_port;
        config.swarm.download_rate_limit =
            (self.max_download_rate > 0).then(|| self.max_download_rate * 1024);
        config.swarm.upload_rate_limit =
            (self.max_upload_rate > 0).then(|| self.max_upload_rate * 1024);
        config.swarm.enable_upnp_natpmp = self.upnp_natpmp;
        if self.proxy_type.as_deref() == Some("SOCKS5")
            && let (Some(host), Some(port)) = (self.proxy_host, self.proxy_port)
        {
            config.swarm.proxy = Some(ProxyConfig {
                host,
                port,
                username: self.proxy_user,
                password: self.proxy_password,
            });
        }

        config.http.port = self.http_port;
        config.http.parent_pid = self.parent_pid;

        config.lifecycle.inactivity_pause_timeout =
            Duration::from_secs(self.inactivity_pause_timeout);
        config.lifecycle.inactivity_remove_timeout =
            Duration::from_secs(self.inactivity_remove_timeout);
        config.lifecycle.keep_files = self.keep_files;

        config.storage.download_dir = self.download_dir;
        config.analytics.token = self.analytics_token;

        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let log_level = cli.log_level;
    init_tracing(log_level.as_tracing_level(), None)?;

    let config = cli.into_config();
    let events = EventSink::new(&config.analytics);
    let swarm = Arc::new(SimSwarmClient::with_synthetic_seed(SyntheticSeed::default()));
    let coordinator = Coordinator::new(swarm, config, events);

    coordinator.start().await?;
    tracing::info!("coordinator started");

    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                coordinator.trigger_shutdown();
            }
        });
    }

    run_server(coordinator.clone()).await?;
    coordinator.stop().await?;
    tracing::info!("coordinator stopped");
    Ok(())
}
