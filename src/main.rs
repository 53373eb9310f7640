use clap::{Arg, Command};
use std::time::Duration;

use research_orchestrator_runtime::{Orchestrator, OrchestratorConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let matches = Command::new("research-orchestrator")
        .version(VERSION)
        .about("Durable job orchestrator for chained deep-research agent workflows")
        .subcommand(
            Command::new("run")
                .about("Start the worker runtime and serve the deep-research queue")
                .arg(
                    Arg::new("grace-seconds")
                        .long("grace-seconds")
                        .value_name("SECONDS")
                        .help("Drain grace period on shutdown")
                        .default_value("30"),
                ),
        )
        .subcommand(Command::new("doctor").about("Print the resolved configuration and exit"))
        .get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match OrchestratorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    match matches.subcommand() {
        Some(("run", sub)) => run(config, sub).await,
        Some(("doctor", _)) => doctor(config),
        _ => {
            eprintln!("no subcommand given, try `run` or `doctor`");
            std::process::exit(1);
        }
    }
}

async fn run(config: OrchestratorConfig, sub: &clap::ArgMatches) {
    let grace_seconds: u64 = sub
        .get_one::<String>("grace-seconds")
        .expect("grace-seconds has a default value")
        .parse()
        .unwrap_or(30);

    let orchestrator = match Orchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("failed to assemble orchestrator: {e}");
            std::process::exit(1);
        }
    };

    orchestrator.start();
    tracing::info!("worker runtime started, serving the deep-research queue");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }

    tracing::info!("shutdown requested, draining in-flight jobs");
    orchestrator.shutdown(Duration::from_secs(grace_seconds)).await;
}

fn doctor(config: OrchestratorConfig) {
    println!("iterations.semi_autonomous_cap = {}", config.iterations.semi_autonomous_cap);
    println!("workers.deep_research.concurrency = {}", config.workers.deep_research.concurrency);
    println!("workers.chat.concurrency = {}", config.workers.chat.concurrency);
    println!("workers.file_ingest.concurrency = {}", config.workers.file_ingest.concurrency);
    println!("workers.paper.concurrency = {}", config.workers.paper.concurrency);
    println!("agents.primary_literature = {:?}", config.agents.primary_literature);
    println!("agents.primary_analysis = {}", config.agents.primary_analysis);
    println!("logging.level = {}", config.logging.level);
}
