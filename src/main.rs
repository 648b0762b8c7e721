//! flexprobe CLI - try SmartSDR API commands against a live radio.
//!
//! Finds the radio, sends the given commands, and prints every reply,
//! status broadcast and stray line the radio produces until Ctrl-C.
//! See the `flexprobe` library for the protocol engine.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flexprobe::script::{self, ScriptedCommand};
use flexprobe::{
    discovery, CommandResponse, Config, ProtocolError, Session, StatusBroadcast, StatusFilter,
    Verbosity,
};
use mimalloc::MiMalloc;
use tokio::task::JoinSet;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "flexprobe")]
#[command(version)]
#[command(about = "Probe a FlexRadio with raw SmartSDR API commands")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for a discovery beacon and print it
    Discover {
        /// Seconds to listen (defaults to the configured discovery timeout)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Connect, send commands and print everything the radio says
    Probe {
        /// Radio address; discovered on the LAN when omitted
        #[arg(long)]
        address: Option<IpAddr>,
        /// TCP port, overriding the advertised and configured port
        #[arg(long)]
        port: Option<u16>,
        /// Send commands as CD (verbose replies) unless the script says otherwise
        #[arg(long)]
        debug: bool,
        /// File with one command per line
        #[arg(long)]
        script: Option<PathBuf>,
        /// Only print status broadcasts for these topics (repeatable)
        #[arg(long = "topic")]
        topics: Vec<String>,
        /// Exit once every command has been answered instead of waiting for Ctrl-C
        #[arg(long)]
        once: bool,
        /// Commands to send after the script; `info` and the common
        /// subscriptions when neither is given
        commands: Vec<String>,
    },
    /// Print the effective configuration
    Config,
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

fn print_reply(sequence: u32, result: &Result<CommandResponse, ProtocolError>) {
    match result {
        Ok(response) => println!("{} R {response}", timestamp()),
        Err(e) => println!("{} ! #{sequence} {e}", timestamp()),
    }
}

fn print_status(status: &StatusBroadcast) {
    println!("{} S {}|{}", timestamp(), status.origin, status.body);
}

async fn discover(config: &Config, timeout: Option<u64>) -> Result<()> {
    let mut config = config.clone();
    if let Some(secs) = timeout {
        config.discovery_timeout_secs = secs;
    }
    println!("Looking for a Flex on this network...");
    let beacon = discovery::discover(&config)
        .await
        .context("Discovery failed")?;

    println!("Flex discovery packet found: {beacon}");
    let mut pairs: Vec<_> = beacon.payload.iter().collect();
    pairs.sort();
    for (key, value) in pairs {
        println!("  {key}={value}");
    }
    Ok(())
}

struct ProbeArgs {
    address: Option<IpAddr>,
    port: Option<u16>,
    debug: bool,
    script: Option<PathBuf>,
    topics: Vec<String>,
    once: bool,
    commands: Vec<String>,
}

async fn probe(config: &Config, args: ProbeArgs) -> Result<()> {
    let mut commands: Vec<ScriptedCommand> = match &args.script {
        Some(path) => script::load(path)?,
        None => Vec::new(),
    };
    commands.extend(args.commands.iter().filter_map(|c| script::parse_line(c)));
    let commands = script::or_defaults(commands);

    let addr = match args.address {
        Some(ip) => SocketAddr::new(ip, args.port.unwrap_or(config.session_port)),
        None => {
            println!("Looking for a Flex on this network...");
            let beacon = discovery::discover(config)
                .await
                .context("Discovery failed")?;
            println!("Found {beacon}");
            let addr = beacon.session_address(config.session_port);
            args.port.map_or(addr, |port| SocketAddr::new(addr.ip(), port))
        }
    };

    let mut session = Session::connect(addr, config)
        .await
        .with_context(|| format!("Can't connect to radio at {addr}"))?;
    let radio = session.handle();

    let filters = if args.topics.is_empty() {
        vec![StatusFilter::All]
    } else {
        args.topics.into_iter().map(StatusFilter::Topic).collect()
    };
    for filter in filters {
        let mut subscription = radio.subscribe(filter);
        tokio::spawn(async move {
            while let Some(status) = subscription.recv().await {
                print_status(&status);
            }
        });
    }
    if let Some(mut diagnostics) = session.take_diagnostics() {
        tokio::spawn(async move {
            while let Some(line) = diagnostics.recv().await {
                println!("{} ? {line}", timestamp());
            }
        });
    }

    // Queue everything first so ids follow script order, then wait concurrently
    let default = Verbosity::from_debug(args.debug);
    let timeout = radio.command_timeout();
    let mut waiters = JoinSet::new();
    for command in &commands {
        let pending = radio.send_command(&command.text, command.verbosity_or(default))?;
        waiters.spawn(async move {
            let sequence = pending.sequence();
            (sequence, pending.wait(timeout).await)
        });
    }

    let replies = async move {
        while let Some(joined) = waiters.join_next().await {
            match joined {
                Ok((sequence, result)) => print_reply(sequence, &result),
                Err(e) => log::error!("Reply task failed: {e}"),
            }
        }
    };
    let replies_then_maybe_wait = async {
        replies.await;
        if !args.once {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            println!("Exiting...");
        }
        () = radio.closed() => {}
        () = replies_then_maybe_wait => {}
    }

    session.close();
    let stats = radio.stats();
    let outcome = session.wait().await;
    log::info!(
        "Session stats: {}",
        serde_json::to_string(&stats).unwrap_or_default()
    );
    if stats.anomalies() > 0 {
        log::info!("{} protocol anomalies during session", stats.anomalies());
    }
    outcome.context("Session ended with an error")
}

#[tokio::main]
async fn main() -> Result<()> {
    // FLEXPROBE_LOG_FILE redirects logs so they don't interleave with probe output
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Ok(path) = std::env::var("FLEXPROBE_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        logger.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    logger.format_timestamp_secs().init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Discover { timeout } => discover(&config, timeout).await?,
        Commands::Probe {
            address,
            port,
            debug,
            script,
            topics,
            once,
            commands,
        } => {
            probe(
                &config,
                ProbeArgs {
                    address,
                    port,
                    debug,
                    script,
                    topics,
                    once,
                    commands,
                },
            )
            .await?;
        }
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
    }

    Ok(())
}
