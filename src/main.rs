// Codeguard - Main Entry Point
//
// Command line front end for the issuance service:
// - serve: HTTP API with background delivery and housekeeping
// - policy: print the effective configuration
// - demo: drive a few requests through an in-process service

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codeguard::clock::{Clock, ManualClock, SystemClock};
use codeguard::config::{ChannelKind, Config};
use codeguard::delivery::{DeliveryChannel, DeliveryDispatcher, LogChannel, WebhookChannel};
use codeguard::issuance::{IssuanceService, Outcome};
use codeguard::server::{self, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Codeguard: rate-limited verification code issuance
#[derive(Parser, Debug)]
#[command(name = "codeguard")]
#[command(author = "Codeguard Contributors")]
#[command(version)]
#[command(about = "Rate-limited verification code issuance", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API
    Serve,
    /// Print the effective configuration
    Policy,
    /// Send a burst of requests for one recipient through an in-process service
    Demo {
        /// Recipient email address
        recipient: String,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value_t = 4)]
        requests: u32,

        /// Simulated seconds between requests
        #[arg(long, default_value_t = 200, value_parser = clap::value_parser!(u64).range(0..=31_536_000))]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    init_tracing(&config, args.verbose)?;

    match args.command {
        Some(Commands::Serve) => serve(config).await?,
        Some(Commands::Policy) => print_policy(&config)?,
        Some(Commands::Demo {
            recipient,
            requests,
            interval_secs,
        }) => demo(&config, &recipient, requests, interval_secs).await?,
        None => {
            info!("No command specified. Use \"codeguard --help\" for usage.");
        }
    }

    Ok(())
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

fn build_channel(config: &Config) -> Result<Arc<dyn DeliveryChannel>> {
    Ok(match config.delivery.channel {
        ChannelKind::Log => Arc::new(LogChannel),
        ChannelKind::Webhook => {
            let url = config
                .delivery
                .url
                .clone()
                .context("Webhook delivery requires a url")?;
            Arc::new(WebhookChannel::new(
                url,
                config.delivery.auth_token.clone(),
                config.delivery.timeout_secs,
            ))
        }
    })
}

fn build_service(config: &Config, clock: Arc<dyn Clock>) -> Result<IssuanceService> {
    let (dispatcher, _worker) = DeliveryDispatcher::spawn(
        build_channel(config)?,
        config.delivery.queue_capacity,
        config.delivery.retry.clone(),
        clock.clone(),
    );

    Ok(IssuanceService::new(config.policy, dispatcher)?
        .with_clock(clock)
        .with_code_config(config.codes.clone()))
}

async fn serve(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let service = build_service(&config, Arc::new(SystemClock))?;

    info!(
        channel = service.dispatcher().channel_name(),
        max_per_window = config.policy.max_per_window,
        cooldown_secs = config.policy.cooldown_secs,
        window_secs = config.policy.window_secs,
        "Codeguard v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let state = AppState {
        service,
        metrics_enabled: config.metrics.enabled,
    };
    server::serve(
        state,
        addr,
        Duration::from_secs(config.server.housekeeping_interval_secs),
    )
    .await
}

fn print_policy(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    if shown.delivery.auth_token.is_some() {
        shown.delivery.auth_token = Some("<redacted>".to_string());
    }
    let text = toml::to_string_pretty(&shown).context("Failed to render configuration")?;
    println!("{}", text);
    Ok(())
}

async fn demo(config: &Config, recipient: &str, requests: u32, interval_secs: u64) -> Result<()> {
    let clock = ManualClock::default();
    let service = build_service(config, Arc::new(clock.clone()))?;
    let start = clock.now();

    for n in 1..=requests {
        if n > 1 {
            clock.advance(chrono::Duration::seconds(interval_secs as i64));
        }
        let elapsed = (clock.now() - start).num_seconds();

        match service.request_code(recipient).await? {
            Outcome::Admitted(admission) => println!(
                "request {} (t+{}s): admitted, code {} expires at {}",
                n, elapsed, admission.code_id, admission.expires_at
            ),
            Outcome::Rejected(rejection) => println!(
                "request {} (t+{}s): rejected ({}), retry after {}s: {}",
                n,
                elapsed,
                rejection.reason.as_str(),
                rejection.retry_after_secs(),
                rejection.message()
            ),
        }
    }

    let usage = service.usage(recipient).await?;
    println!(
        "usage: {} of {} sent in window, {} remaining",
        usage.sent_in_window, usage.max_per_window, usage.remaining
    );

    // Let the log channel drain before exiting
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
