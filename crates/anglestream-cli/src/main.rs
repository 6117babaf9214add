//! `anglestream` – command line front end.
//!
//! * `anglestream serve` starts the streaming server and feeds it the demo
//!   dance from a producer thread. **Ctrl-C** stops the listener and waits for
//!   every client session to finish its current tick.
//! * `anglestream watch` connects as a consumer and prints every frame.
//! * `anglestream init-config` writes `~/.anglestream/config.toml` with the
//!   default settings.

mod config;
mod demo;
mod telemetry;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anglestream_client::StreamClient;
use anglestream_server::AngleServer;
use anglestream_types::{Frame, StreamError};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::{error, warn};

/// Stream live joint angles over TCP.
#[derive(Parser, Debug)]
#[command(name = "anglestream", version, about)]
struct Cli {
    /// Config file (defaults to ~/.anglestream/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server with the demo producer.
    Serve(ServeArgs),
    /// Connect to a server and print the frames it sends.
    Watch(WatchArgs),
    /// Write a config file with the default settings.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Bind host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Milliseconds between lines sent to each client (overrides config).
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Comma-separated joint keys in wire order (overrides config).
    #[arg(long, value_delimiter = ',')]
    joints: Option<Vec<String>>,

    /// Drop a client whose single write blocks longer than this.
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// Demo producer update rate.
    #[arg(long, default_value_t = 10.0)]
    producer_hz: f64,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Server host (defaults to the configured host).
    #[arg(long)]
    host: Option<String>,

    /// Server port (defaults to the configured port).
    #[arg(long)]
    port: Option<u16>,

    /// Print each frame as a JSON object.
    #[arg(long)]
    json: bool,

    /// Exit after this many frames.
    #[arg(long)]
    count: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = telemetry::init_tracing("anglestream");

    let config_path = cli.config.clone().unwrap_or_else(config::config_path);

    if let Command::InitConfig { force } = cli.command {
        return report(init_config(&config_path, force));
    }

    let cfg = match config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Serve(args) => runtime.block_on(serve(cfg, args)),
        Command::Watch(args) => runtime.block_on(watch(cfg, args)),
        Command::InitConfig { .. } => unreachable!("handled before the runtime starts"),
    };
    report(result)
}

fn report(result: Result<(), StreamError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// serve
// ─────────────────────────────────────────────────────────────────────────────

async fn serve(cfg: config::Config, args: ServeArgs) -> Result<(), StreamError> {
    if !(args.producer_hz.is_finite() && args.producer_hz > 0.0) {
        return Err(StreamError::Config(format!(
            "producer rate must be positive, got {}",
            args.producer_hz
        )));
    }

    let joints = args.joints.unwrap_or(cfg.joint_keys);
    let server = AngleServer::new(joints)?
        .with_host(args.host.unwrap_or(cfg.host))
        .with_port(args.port.unwrap_or(cfg.port))
        .with_interval(Duration::from_millis(args.interval_ms.unwrap_or(cfg.send_interval_ms)))
        .with_write_timeout(args.write_timeout_ms.map(Duration::from_millis));

    let handle = server.start().await?;
    println!(
        "  {} streaming {} joint(s) on {} every {:?}",
        "✓".green().bold(),
        server.store().keys().len(),
        handle.local_addr().to_string().bold(),
        server.interval()
    );
    println!("  Press {} to stop.", "Ctrl-C".bold());

    let signal = handle.shutdown_signal();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping server …".yellow().bold());
        signal.trigger();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process another way");
    }

    let period = Duration::from_secs_f64(1.0 / args.producer_hz);
    let producer = demo::spawn_dance(server.store(), handle.shutdown_signal(), period)
        .map_err(|e| StreamError::Config(format!("failed to spawn demo producer: {e}")))?;

    handle.join().await?;
    if producer.join().is_err() {
        warn!("demo producer thread panicked");
    }

    println!("  {}", "✓ Server stopped.".green());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// watch
// ─────────────────────────────────────────────────────────────────────────────

async fn watch(cfg: config::Config, args: WatchArgs) -> Result<(), StreamError> {
    let host = args.host.unwrap_or(cfg.host);
    let port = args.port.unwrap_or(cfg.port);

    let mut client = StreamClient::connect(&host, port).await?;
    eprintln!("  Connected to {}", format!("{host}:{port}").bold());

    let mut received: u64 = 0;
    while let Some(frame) = client.next_frame().await? {
        if args.json {
            let json = serde_json::to_string(&frame)
                .map_err(|e| StreamError::Parse(format!("frame serialization failed: {e}")))?;
            println!("{json}");
        } else {
            println!("{}", render_frame(&frame));
        }

        received += 1;
        if args.count.is_some_and(|n| received >= n) {
            break;
        }
    }

    eprintln!(
        "  Stream ended: {} frame(s), {} malformed line(s) skipped",
        received,
        client.skipped()
    );
    Ok(())
}

fn render_frame(frame: &Frame) -> String {
    let mut out = format!("{} {:>8.3}", "t".dimmed(), frame.t);
    for joint in &frame.joints {
        let [x, y, z] = joint.angles;
        out.push_str(&format!(
            "  {} [{x:>9.4} {y:>9.4} {z:>9.4}]",
            joint.key.cyan()
        ));
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// init-config
// ─────────────────────────────────────────────────────────────────────────────

fn init_config(path: &Path, force: bool) -> Result<(), StreamError> {
    if path.exists() && !force {
        return Err(StreamError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    config::save_to(&config::Config::default(), path)?;
    println!(
        "  {} Config saved to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}
