use anyhow::Context;
use auto_monitor::{
    app::{self, RunMode},
    config::read_config_file,
};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Collects host and service metrics, stores them and raises alerts")]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "/etc/auto-monitor/config.json")]
    config: String,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Collect and evaluate without writing to the store or notifying
    #[arg(long)]
    dry_run: bool,

    /// Keep running until SIGINT or SIGTERM
    #[arg(short, long)]
    daemon: bool,
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("auto_monitor", level),
        ("sqlx", LevelFilter::WARN),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let mut config = read_config_file(&args.config)?;
    config.apply_env_overrides();

    let mode = RunMode {
        verbose: args.verbose,
        dry_run: args.dry_run,
        daemon: args.daemon,
    };

    let status = app::run(config, mode)
        .await
        .context("monitoring engine failed")?;

    info!(
        ticks = status.ticks_completed,
        samples = status.samples_written,
        events = status.events_recorded,
        storage_degraded = status.storage_degraded,
        "exiting"
    );

    Ok(())
}
