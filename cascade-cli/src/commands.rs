//! CLI command implementations

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cascade_core::catalog::{ContentScan, FfmpegTranscoder, RenditionCatalog, scan_content_dir};
use cascade_core::client::{CatalogClient, ClientError, ServerReply};
use cascade_core::config::{CascadeConfig, ReadyHandshake, TargetHost};
use cascade_core::media::{MediaFormat, Transport};
use cascade_core::session::SessionContext;
use cascade_core::stream::FfmpegLauncher;
use cascade_core::usage::{CsvUsageLog, NoopUsageRecorder, UsageRecorder};
use cascade_core::{CascadeError, ConnectionDispatcher, Result};
use clap::Subcommand;
use serde::Serialize;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build the catalog and serve streaming sessions
    Serve {
        /// Directory holding <title>-<N>p.<format> files
        #[arg(long)]
        content_dir: Option<PathBuf>,
        /// Address to listen on
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Confirm every stream start with a READY line
        #[arg(long)]
        ready_handshake: bool,
        /// Client-side port the stream is sent to
        #[arg(long)]
        stream_port: Option<u16>,
        /// Send every stream to this host instead of the client address
        #[arg(long)]
        stream_host: Option<String>,
        /// CSV file receiving one row per stream start
        #[arg(long, conflicts_with = "no_stats")]
        stats_file: Option<PathBuf>,
        /// Disable the usage statistics file
        #[arg(long)]
        no_stats: bool,
        /// Serve what is on disk without synthesizing missing renditions
        #[arg(long)]
        skip_synthesis: bool,
        /// Path to the ffmpeg binary
        #[arg(long)]
        ffmpeg: Option<PathBuf>,
    },
    /// Scan a content directory and complete its rendition matrix
    Scan {
        /// Directory holding <title>-<N>p.<format> files
        #[arg(long)]
        content_dir: Option<PathBuf>,
        /// Only report what would be synthesized
        #[arg(long)]
        dry_run: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Path to the ffmpeg binary
        #[arg(long)]
        ffmpeg: Option<PathBuf>,
    },
    /// Ask a running server which renditions fit a bandwidth
    Catalog {
        /// Server address
        #[arg(long, default_value = "127.0.0.1:8888")]
        server: SocketAddr,
        /// Container format
        #[arg(long, default_value = "mp4")]
        format: MediaFormat,
        /// Available bandwidth in Mbps
        #[arg(long)]
        bandwidth: f64,
    },
    /// Request a stream and hold the session until Ctrl-C
    Play {
        /// Server address
        #[arg(long, default_value = "127.0.0.1:8888")]
        server: SocketAddr,
        /// Container format
        #[arg(long, default_value = "mp4")]
        format: MediaFormat,
        /// Available bandwidth in Mbps
        #[arg(long)]
        bandwidth: f64,
        /// Rendition to stream, e.g. demo-720p.mp4
        #[arg(long)]
        file: String,
        /// Transport protocol; chosen by the server when omitted
        #[arg(long)]
        protocol: Option<Transport>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Serve {
            content_dir,
            listen,
            ready_handshake,
            stream_port,
            stream_host,
            stats_file,
            no_stats,
            skip_synthesis,
            ffmpeg,
        } => {
            let mut config = CascadeConfig::from_env();
            if let Some(dir) = content_dir {
                config.catalog.content_dir = dir;
            }
            if let Some(addr) = listen {
                config.server.listen_addr = addr;
            }
            if ready_handshake {
                config.server.ready_handshake = ReadyHandshake::Announce;
            }
            if let Some(port) = stream_port {
                config.stream.target_port = port;
            }
            if let Some(host) = stream_host {
                config.stream.target_host = TargetHost::Fixed(host);
            }
            if let Some(path) = stats_file {
                config.stream.stats_file = Some(path);
            }
            if no_stats {
                config.stream.stats_file = None;
            }
            if skip_synthesis {
                config.catalog.synthesize = false;
            }
            if let Some(path) = ffmpeg {
                config.catalog.ffmpeg_path = path.clone();
                config.stream.ffmpeg_path = path;
            }
            serve(config).await
        }
        Commands::Scan {
            content_dir,
            dry_run,
            json,
            ffmpeg,
        } => {
            let mut config = CascadeConfig::from_env();
            if let Some(dir) = content_dir {
                config.catalog.content_dir = dir;
            }
            if let Some(path) = ffmpeg {
                config.catalog.ffmpeg_path = path;
            }
            scan(config, dry_run, json).await
        }
        Commands::Catalog {
            server,
            format,
            bandwidth,
        } => show_catalog(server, format, bandwidth).await,
        Commands::Play {
            server,
            format,
            bandwidth,
            file,
            protocol,
        } => play(server, format, bandwidth, file, protocol).await,
    }
}

/// Build the catalog and run the dispatcher until Ctrl-C
///
/// # Errors
/// - `CascadeError::Catalog` - Content directory missing or unreadable
/// - `CascadeError::Io` - Listener or stats file could not be opened
pub async fn serve(config: CascadeConfig) -> Result<()> {
    let catalog = load_catalog(&config).await?;
    if catalog.is_empty() {
        tracing::warn!(
            "No renditions found in {}; clients will receive empty listings",
            catalog.content_dir().display()
        );
    }

    let usage: Arc<dyn UsageRecorder> = match &config.stream.stats_file {
        Some(path) => Arc::new(CsvUsageLog::open(path).await?),
        None => Arc::new(NoopUsageRecorder),
    };
    let launcher = Arc::new(FfmpegLauncher::new(&config.stream.ffmpeg_path));
    let context = SessionContext::new(&config, catalog, launcher, usage);

    let dispatcher = ConnectionDispatcher::bind(config.server.listen_addr, context).await?;
    println!("Streaming server listening on {}", dispatcher.local_addr()?);

    dispatcher
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    println!("Server stopped");
    Ok(())
}

async fn load_catalog(config: &CascadeConfig) -> Result<RenditionCatalog> {
    let content_dir = &config.catalog.content_dir;
    if !config.catalog.synthesize {
        return Ok(RenditionCatalog::scan_only(content_dir).await?);
    }

    let transcoder = FfmpegTranscoder::new(&config.catalog.ffmpeg_path);
    if !transcoder.is_available().await {
        tracing::warn!(
            "{} is not runnable; missing renditions will not be synthesized",
            config.catalog.ffmpeg_path.display()
        );
    }
    let catalog = RenditionCatalog::build(content_dir, &transcoder, &config.policy).await?;

    for key in catalog.missing() {
        tracing::warn!("Rendition {} is unavailable", key.filename());
    }
    Ok(catalog)
}

/// Scan the content directory, optionally synthesizing missing renditions
///
/// # Errors
/// - `CascadeError::Catalog` - Content directory missing or unreadable
/// - `CascadeError::Io` - JSON output failed
pub async fn scan(config: CascadeConfig, dry_run: bool, json: bool) -> Result<()> {
    if dry_run {
        let plan = scan_content_dir(&config.catalog.content_dir).await?;
        if json {
            print_json(&plan)?;
        } else {
            print_plan(&config.catalog.content_dir, &plan);
        }
        return Ok(());
    }

    let catalog = load_catalog(&config).await?;
    if json {
        print_json(&catalog.view())?;
        return Ok(());
    }

    println!("Catalog of {}:", catalog.content_dir().display());
    for title in catalog.titles() {
        println!("  {} (native {})", title.title, title.native);
    }
    for rendition in catalog.renditions() {
        let origin = if rendition.synthesized { "synthesized" } else { "on disk" };
        println!("  {:<32} {}", rendition.filename(), origin);
    }
    if !catalog.missing().is_empty() {
        println!("Unavailable after synthesis:");
        for key in catalog.missing() {
            println!("  {}", key.filename());
        }
    }
    println!("{} renditions", catalog.len());

    Ok(())
}

fn print_plan(content_dir: &Path, plan: &ContentScan) {
    println!("Content directory {}:", content_dir.display());
    for title in &plan.titles {
        println!("  {} (native {})", title.title, title.native);
    }
    if plan.jobs.is_empty() {
        println!("Nothing to synthesize");
        return;
    }
    println!("Would synthesize {} renditions:", plan.jobs.len());
    for job in &plan.jobs {
        println!(
            "  {} <- {}",
            job.key.filename(),
            job.source.file_name().map(|name| name.to_string_lossy()).unwrap_or_default()
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{text}");
    Ok(())
}

/// Print the renditions a server offers for the given capabilities
///
/// # Errors
/// - `CascadeError::Client` - Server unreachable or connection lost
pub async fn show_catalog(server: SocketAddr, format: MediaFormat, bandwidth: f64) -> Result<()> {
    let mut client = CatalogClient::connect(server).await?;
    let listing = client.negotiate(format, bandwidth).await?;

    if let Some(advisory) = &listing.advisory {
        println!("{advisory}");
    }
    for file in &listing.files {
        println!("{file}");
    }
    if listing.is_empty() && listing.advisory.is_none() {
        println!("No {format} renditions available");
    }

    client.close().await?;
    Ok(())
}

/// Request a stream and keep the session open until Ctrl-C
///
/// # Errors
/// - `CascadeError::Client` - Server unreachable or connection lost
/// - `CascadeError::Configuration` - Requested file was not offered
pub async fn play(
    server: SocketAddr,
    format: MediaFormat,
    bandwidth: f64,
    file: String,
    protocol: Option<Transport>,
) -> Result<()> {
    let mut client = CatalogClient::connect(server).await?;
    let listing = client.negotiate(format, bandwidth).await?;

    if let Some(advisory) = listing.advisory {
        return Err(CascadeError::Configuration { reason: advisory });
    }
    if !listing.files.contains(&file) {
        client.close().await?;
        return Err(CascadeError::Configuration {
            reason: format!("{file} is not offered at {bandwidth} Mbps in {format}"),
        });
    }

    client.request(&file, protocol).await?;
    match protocol {
        Some(transport) => println!("Requested {file} via {transport}; press Ctrl-C to stop"),
        None => println!("Requested {file}; press Ctrl-C to stop"),
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            reply = client.read_reply(Duration::from_secs(1)) => match reply {
                Ok(Some(ServerReply::Ready)) => println!("Stream started"),
                Ok(Some(ServerReply::Error(reason))) => println!("Server could not start the stream: {reason}"),
                Ok(Some(ServerReply::Other(line))) => println!("{line}"),
                Ok(None) => {}
                Err(ClientError::ConnectionClosed) => {
                    println!("Server closed the session");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            },
        }
    }

    client.close().await?;
    println!("Session closed");
    Ok(())
}
