//! Binary entrypoint for the sliplink CLI.
//!
//! Commands:
//! - `attach [--port <path>]` - run the link engine against a serial device
//! - `init` - create a starter `config.toml`
//! - `probe [--port <path>] [--timeout <s>]` - listen briefly and report what
//!   the device is sending, as JSON
//! - `send --text <msg> | --hex <bytes>` - encode and transmit one frame
//!
//! See the library crate docs for module-level details: `sliplink::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use sliplink::config::Config;

#[cfg(feature = "serial")]
use anyhow::anyhow;
#[cfg(feature = "serial")]
use log::{debug, warn};
#[cfg(feature = "serial")]
use std::time::Duration;

#[cfg(feature = "serial")]
use sliplink::config::LinkConfig;
#[cfg(feature = "serial")]
use sliplink::link::{FrameKind, LinkEvent, SerialLink};
#[cfg(feature = "serial")]
use sliplink::logutil::{hex_snippet, text_preview};
#[cfg(feature = "serial")]
use sliplink::slip::RingStats;

#[derive(Parser)]
#[command(name = "sliplink")]
#[command(about = "SLIP framing engine for serial-attached network devices")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach to a serial device and run the link engine
    Attach {
        /// Serial device path (overrides link.port)
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate (overrides link.baud_rate)
        #[arg(short = 'b', long)]
        baud: Option<u32>,
    },
    /// Create a starter configuration file
    Init,
    /// Listen for a few seconds and report what the device is sending
    Probe {
        /// Serial device path (overrides link.port)
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate (overrides link.baud_rate)
        #[arg(short = 'b', long)]
        baud: Option<u32>,
        /// Seconds to listen before reporting
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,
    },
    /// Encode and transmit a single frame
    Send {
        /// Serial device path (overrides link.port)
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate (overrides link.baud_rate)
        #[arg(short = 'b', long)]
        baud: Option<u32>,
        /// Payload as UTF-8 text
        #[arg(long, conflicts_with = "hex")]
        text: Option<String>,
        /// Payload as hex digits, whitespace allowed
        #[arg(long)]
        hex: Option<String>,
        /// Milliseconds to wait for the frame to reach the wire
        #[arg(long, default_value_t = 200)]
        linger_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to configure logging; `init` has nothing to load yet.
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Attach { port, baud } => {
            #[cfg(feature = "serial")]
            {
                let config = match pre_config {
                    Some(config) => config,
                    None => Config::load(&cli.config).await?,
                };
                info!("Starting sliplink v{}", env!("CARGO_PKG_VERSION"));
                let link_cfg = effective_link_config(&config, port, baud);
                let link = SerialLink::open(&link_cfg).await?;
                info!(
                    "Attached to {} at {} baud (flow: {:?}, ring: {} bytes)",
                    link_cfg.port, link_cfg.baud_rate, link_cfg.flow_control, link_cfg.ring_capacity
                );
                run_attached(link, link_cfg.stats_interval_secs).await;
            }
            #[cfg(not(feature = "serial"))]
            {
                let _ = (port, baud);
                anyhow::bail!("this build has no serial support; rebuild with the 'serial' feature");
            }
        }
        Commands::Init => {
            info!("Writing starter configuration");
            if tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
                anyhow::bail!("{} already exists; remove it first", cli.config);
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Probe {
            port,
            baud,
            timeout,
        } => {
            #[cfg(feature = "serial")]
            {
                let config = match pre_config {
                    Some(config) => config,
                    None => Config::load(&cli.config).await?,
                };
                match sliplink::link::list_ports() {
                    Ok(ports) if !ports.is_empty() => {
                        info!("Serial ports visible: {}", ports.join(", "));
                    }
                    Ok(_) => info!("No serial ports visible"),
                    Err(e) => warn!("Port enumeration failed: {}", e),
                }
                let link_cfg = effective_link_config(&config, port, baud);
                run_probe(&link_cfg, timeout).await?;
            }
            #[cfg(not(feature = "serial"))]
            {
                let _ = (port, baud, timeout);
                anyhow::bail!("this build has no serial support; rebuild with the 'serial' feature");
            }
        }
        Commands::Send {
            port,
            baud,
            text,
            hex,
            linger_ms,
        } => {
            #[cfg(feature = "serial")]
            {
                let config = match pre_config {
                    Some(config) => config,
                    None => Config::load(&cli.config).await?,
                };
                let payload = match (text, hex) {
                    (Some(text), None) => text.into_bytes(),
                    (None, Some(hex)) => parse_hex(&hex)?,
                    _ => return Err(anyhow!("pass exactly one of --text or --hex")),
                };
                let link_cfg = effective_link_config(&config, port, baud);
                let link = SerialLink::open(&link_cfg).await?;
                info!(
                    "Sending {} byte frame to {}",
                    payload.len(),
                    link_cfg.port
                );
                link.send_frame(payload)?;
                // Give the transmit pump time to reach the wire.
                tokio::time::sleep(Duration::from_millis(linger_ms)).await;
                link.shutdown().await;
            }
            #[cfg(not(feature = "serial"))]
            {
                let _ = (port, baud, text, hex, linger_ms);
                anyhow::bail!("this build has no serial support; rebuild with the 'serial' feature");
            }
        }
    }

    Ok(())
}

/// Config port/baud with any command line overrides applied.
#[cfg(feature = "serial")]
fn effective_link_config(config: &Config, port: Option<String>, baud: Option<u32>) -> LinkConfig {
    let mut link = config.link.clone();
    if let Some(port) = port {
        link.port = port;
    }
    if let Some(baud) = baud {
        link.baud_rate = baud;
    }
    link
}

/// Event loop for `attach`: show frames until Ctrl-C or the device goes away.
#[cfg(feature = "serial")]
async fn run_attached(mut link: SerialLink, stats_secs: u64) {
    let mut stats_tick = tokio::time::interval(Duration::from_secs(stats_secs.max(1)));
    stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    stats_tick.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            _ = stats_tick.tick(), if stats_secs > 0 => {
                log_stats(&link.stats());
            }
            event = link.recv() => {
                match event {
                    Some(LinkEvent::Frame { kind, data }) => display_frame(kind, &data),
                    Some(LinkEvent::SourceClosed) => {
                        warn!("byte source closed; detaching");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    log_stats(&link.stats());
    link.shutdown().await;
}

/// Listen for `timeout` seconds, then print a JSON summary and exit with 0
/// when the device produced at least one frame.
#[cfg(feature = "serial")]
async fn run_probe(link_cfg: &LinkConfig, timeout: u64) -> Result<()> {
    let mut link = SerialLink::open(link_cfg).await?;
    info!("Probing {} for {}s", link_cfg.port, timeout);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout);
    let mut frames: u64 = 0;
    let mut datagrams: u64 = 0;
    let mut text_frames: u64 = 0;
    let mut other_frames: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            event = link.recv() => {
                match event {
                    Some(LinkEvent::Frame { kind, .. }) => {
                        frames += 1;
                        match kind {
                            FrameKind::Ipv4 | FrameKind::Ipv6 => datagrams += 1,
                            FrameKind::DebugLine | FrameKind::Diagnostic => text_frames += 1,
                            _ => other_frames += 1,
                        }
                    }
                    Some(LinkEvent::SourceClosed) | None => break,
                }
            }
        }
    }

    let stats = link.stats();
    link.shutdown().await;

    let status_ok = frames > 0;
    if !status_ok {
        warn!(
            "No frames in {}s. The device may be silent, on a different baud rate, or not speaking SLIP.",
            timeout
        );
    }
    let payload = serde_json::json!({
        "status": if status_ok { "ok" } else { "silent" },
        "port": link_cfg.port,
        "baud": link_cfg.baud_rate,
        "frames": frames,
        "datagrams": datagrams,
        "text_frames": text_frames,
        "other_frames": other_frames,
        "sealed": stats.frames_sealed,
        "delivered": stats.frames_delivered,
        "overflows": stats.overflows,
        "bad_escapes": stats.bad_escapes,
        "discarded_bytes": stats.discarded_bytes,
        "timeout_seconds": timeout,
    });
    println!("{}", payload);
    std::process::exit(if status_ok { 0 } else { 1 });
}

#[cfg(feature = "serial")]
fn display_frame(kind: FrameKind, data: &[u8]) {
    match kind {
        FrameKind::DebugLine => info!("device: {}", text_preview(&data[1..])),
        FrameKind::Diagnostic => info!("device: {}", text_preview(data)),
        FrameKind::Command | FrameKind::Query => {
            info!("{:?} frame: {}", kind, text_preview(data));
        }
        FrameKind::Ipv4 | FrameKind::Ipv6 => {
            info!("{:?} datagram: {} bytes", kind, data.len());
            debug!("payload: {}", hex_snippet(data, 64));
        }
        FrameKind::Opaque => {
            info!("opaque frame: {} bytes", data.len());
            debug!("payload: {}", hex_snippet(data, 64));
        }
    }
}

#[cfg(feature = "serial")]
fn log_stats(stats: &RingStats) {
    info!(
        "ring: sealed={} delivered={} overflows={} bad_escapes={} discarded_bytes={} oversized_drops={}",
        stats.frames_sealed,
        stats.frames_delivered,
        stats.overflows,
        stats.bad_escapes,
        stats.discarded_bytes,
        stats.oversized_drops
    );
}

/// Parse a hex payload like "c0 01 ff" or "c001ff".
#[cfg(feature = "serial")]
fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() % 2 != 0 {
        return Err(anyhow!("hex payload must have an even number of digits"));
    }
    (0..compact.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&compact[i..i + 2], 16)
                .map_err(|_| anyhow!("invalid hex byte '{}'", &compact[i..i + 2]))
        })
        .collect()
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .map(|c| level_from_str(&c.logging.level))
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    let mut file_format_installed = false;
    if let Some(ref file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
        {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

            // When stdout is a terminal, echo log lines to the console as
            // well as the file; under redirection the file alone gets them.
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }

                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
            file_format_installed = true;
        }
    }
    if !file_format_installed {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}

fn level_from_str(level: &str) -> log::LevelFilter {
    match level {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}
