use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transfer_engine::{run_drill, BookingEngine, DrillPlan};
use transfer_store::Config;

fn build_cli() -> Command {
    let defaults = DrillPlan::default();
    Command::new("transfer-drill")
        .about("Race concurrent bookings at one schedule and verify seat accounting")
        .arg(
            Arg::new("attempts")
                .long("attempts")
                .short('n')
                .value_parser(value_parser!(usize))
                .default_value(defaults.attempts.to_string())
                .help("Concurrent booking attempts"),
        )
        .arg(
            Arg::new("seats")
                .long("seats")
                .short('s')
                .value_parser(value_parser!(i32))
                .default_value(defaults.seats_per_attempt.to_string())
                .help("Passengers per attempt"),
        )
        .arg(
            Arg::new("capacity")
                .long("capacity")
                .short('c')
                .value_parser(value_parser!(i32))
                .default_value(defaults.capacity.to_string())
                .help("Seats on the provisioned schedule"),
        )
        .arg(
            Arg::new("memory")
                .long("memory")
                .action(ArgAction::SetTrue)
                .help("Use the in-process store instead of the configured database"),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .help("Print Prometheus metrics after the run"),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transfer_engine=info,transfer_booking=info,transfer_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let matches = build_cli().get_matches();
    let plan = DrillPlan {
        attempts: matches.get_one::<usize>("attempts").copied().unwrap_or(20),
        seats_per_attempt: matches.get_one::<i32>("seats").copied().unwrap_or(1),
        capacity: matches.get_one::<i32>("capacity").copied().unwrap_or(10),
        ..DrillPlan::default()
    };

    let engine = if matches.get_flag("memory") {
        tracing::info!("Running drill against the in-memory store");
        BookingEngine::in_memory(&Default::default())?
    } else {
        let config = Config::load().context("Failed to load config")?;
        BookingEngine::connect(&config)
            .await
            .context("Failed to connect booking engine")?
    };

    let summary = run_drill(&engine, plan).await.context("Drill failed")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if matches.get_flag("metrics") {
        print!("{}", engine.render_metrics()?);
    }
    Ok(())
}
