// kv4p -- receive with a KV4P-HT radio dongle from the command line.
//
// Usage:
//   kv4p --freq 162.4
//   kv4p --dev /dev/ttyUSB0 --band uhf --freq 446.0 --bw narrow --squelch 20
//   kv4p --reset --scan --freq 144.0 --wait 5m
//   kv4p --list
//
// RX audio plays through the default output device when built with
// `--features audio,opus`.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing_subscriber::EnvFilter;

use kv4p_core::{Band, Bandwidth, Filters, format_freq_mhz, squelch_from_percent};
use kv4p_protocol::{DeviceSession, RadioConfig, SessionBuilder};
use kv4p_transport::discovery::list_dongle_ports;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Tune a KV4P-HT dongle and listen.
#[derive(Parser, Debug)]
#[command(name = "kv4p", version, about)]
struct Cli {
    /// Serial device (e.g. /dev/ttyUSB0). Auto-detected when omitted.
    #[arg(long)]
    dev: Option<String>,

    /// Serial baud rate.
    #[arg(long, default_value_t = kv4p_transport::DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Reset the board before connecting.
    #[arg(long)]
    reset: bool,

    /// Band (vhf, uhf). Chosen from the frequency when omitted.
    #[arg(long)]
    band: Option<Band>,

    /// Bandwidth (wide = 25 kHz, narrow = 12.5 kHz).
    #[arg(long, default_value = "wide")]
    bw: Bandwidth,

    /// Frequency in MHz.
    #[arg(long, default_value_t = 162.4)]
    freq: f64,

    /// Squelch level, 0-100.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    squelch: u8,

    /// Pre-emphasis filter.
    #[arg(long)]
    pre: bool,

    /// High-pass filter.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    high: bool,

    /// Low-pass filter.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    low: bool,

    /// Scan from --freq to the top of the band and stop on the first signal.
    #[arg(long)]
    scan: bool,

    /// Volume, 0-100.
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(0..=100))]
    volume: u8,

    /// Receive time before exiting (e.g. 90s, 5m, 500ms).
    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    wait: Duration,

    /// Enable debug output.
    #[arg(long)]
    debug: bool,

    /// List attached dongles (and audio outputs) and exit.
    #[arg(long)]
    list: bool,

    /// Audio output device name. Uses the system default when omitted.
    #[cfg(feature = "audio")]
    #[arg(long)]
    audio_device: Option<String>,
}

/// Parse `90s`, `5m`, `500ms`, or a bare number of seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit) = s
        .find(|c: char| !c.is_ascii_digit())
        .map_or((s, ""), |i| s.split_at(i));
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {s}"))?;

    let secs = |scale: u64| {
        n.checked_mul(scale)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration too long: {s}"))
    };
    match unit {
        "" | "s" => Ok(Duration::from_secs(n)),
        "ms" => Ok(Duration::from_millis(n)),
        "m" => secs(60),
        "h" => secs(3600),
        _ => Err(format!("invalid duration unit in {s} (expected ms, s, m or h)")),
    }
}

impl Cli {
    fn radio_config(&self) -> RadioConfig {
        RadioConfig {
            band: self.band,
            bandwidth: self.bw,
            frequency_mhz: self.freq,
            squelch: squelch_from_percent(self.squelch),
            filters: Filters {
                pre_emphasis: self.pre,
                high_pass: self.high,
                low_pass: self.low,
            },
            volume: f32::from(self.volume) / 100.0,
            reset: self.reset,
        }
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_list() -> Result<()> {
    let ports = list_dongle_ports().context("failed to enumerate serial ports")?;

    if ports.is_empty() {
        println!("No dongles found.");
    } else {
        println!("{:<24}  {:<9}  {}", "Port", "VID:PID", "Product");
        println!("{:<24}  {:<9}  {}", "-".repeat(24), "-".repeat(9), "-------");
        for p in &ports {
            println!(
                "{:<24}  {:04X}:{:04X}  {}",
                p.port_name,
                p.vid,
                p.pid,
                p.product.as_deref().unwrap_or("-")
            );
        }
    }

    #[cfg(feature = "audio")]
    {
        let devices = kv4p_transport::list_output_devices()
            .context("failed to enumerate audio devices")?;
        println!();
        println!("{:<40}  {:>6}  {:>8}", "Audio Output", "Rate", "Channels");
        println!("{:<40}  {:>6}  {:>8}", "-".repeat(40), "------", "--------");
        for d in &devices {
            println!("{:<40}  {:>6}  {:>8}", d.name, d.sample_rate, d.channels);
        }
    }

    Ok(())
}

/// Bring the dongle up, optionally scan, then listen for `--wait`.
async fn cmd_listen(session: &DeviceSession, cli: &Cli) -> Result<()> {
    let config = cli.radio_config();

    if !session
        .bring_up(&config)
        .await
        .context("bring-up failed")?
    {
        bail!("dongle did not answer the handshake (try --reset)");
    }

    if let Some(version) = session.version().await {
        println!(
            "Firmware v{} (hardware {}, radio status '{}')",
            version.version,
            version.hardware_version,
            char::from(version.radio_status).escape_default()
        );
    }

    if cli.scan {
        println!("Scanning...");
        let (_, start) = config.resolve();
        match session.scan(start).await.context("scan failed")? {
            Some(mhz) => println!("Signal at {}", format_freq_mhz(mhz)),
            None => println!("Nothing found"),
        }
    }

    let state = session.state().await;
    println!(
        "Listening on {} ({}, {})",
        format_freq_mhz(state.frequency_mhz),
        state.band,
        state.bandwidth
    );

    #[cfg(feature = "audio")]
    let _playback = {
        let mut playback = kv4p_transport::AudioPlayback::new(cli.audio_device.as_deref());
        playback
            .start(session.audio().clone())
            .context("failed to start audio playback")?;
        playback
    };

    println!("Press Ctrl+C to exit");
    tokio::time::sleep(cli.wait).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Shutdown signals
// ---------------------------------------------------------------------------

/// Process signals that end a listen session.
///
/// Ctrl+C everywhere; on unix also SIGTERM, SIGHUP and SIGQUIT.
struct ShutdownSignals {
    #[cfg(unix)]
    terminate: Option<Signal>,
    #[cfg(unix)]
    hangup: Option<Signal>,
    #[cfg(unix)]
    quit: Option<Signal>,
}

impl ShutdownSignals {
    /// Register the handlers. Must be called inside the runtime.
    #[cfg(unix)]
    fn new() -> Self {
        ShutdownSignals {
            terminate: listen_for(SignalKind::terminate(), "SIGTERM"),
            hangup: listen_for(SignalKind::hangup(), "SIGHUP"),
            quit: listen_for(SignalKind::quit(), "SIGQUIT"),
        }
    }

    #[cfg(not(unix))]
    fn new() -> Self {
        ShutdownSignals {}
    }

    /// Wait for the first shutdown signal and return its name.
    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = ctrl_c() => "SIGINT",
            _ = next_signal(&mut self.terminate) => "SIGTERM",
            _ = next_signal(&mut self.hangup) => "SIGHUP",
            _ = next_signal(&mut self.quit) => "SIGQUIT",
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        ctrl_c().await;
        "Ctrl+C"
    }
}

#[cfg(unix)]
fn listen_for(kind: SignalKind, name: &str) -> Option<Signal> {
    signal(kind)
        .inspect_err(|e| tracing::warn!(error = %e, "Cannot listen for {name}"))
        .ok()
}

/// Resolves on the next delivery; never resolves without a handler.
#[cfg(unix)]
async fn next_signal(sig: &mut Option<Signal>) {
    if let Some(sig) = sig {
        if sig.recv().await.is_some() {
            return;
        }
    }
    std::future::pending::<()>().await
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl+C");
        std::future::pending::<()>().await
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    // Listing does not need a connection.
    if cli.list {
        return cmd_list();
    }

    let mut builder = SessionBuilder::new()
        .baud_rate(cli.baud)
        .debug(cli.debug)
        .on_ptt(|down| println!("PTT {}", if down { "pressed" } else { "released" }));
    if let Some(dev) = &cli.dev {
        builder = builder.serial_port(dev);
    }
    let session = builder.build().await.context("failed to open dongle")?;

    let mut signals = ShutdownSignals::new();
    let result = tokio::select! {
        r = cmd_listen(&session, &cli) => r,
        name = signals.recv() => {
            println!();
            tracing::info!(signal = name, "Shutting down");
            Ok(())
        }
    };

    if let Err(e) = session.shutdown().await {
        tracing::warn!(error = %e, "Shutdown incomplete");
    }
    result
}
