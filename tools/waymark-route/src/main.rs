use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use waymark_common::LatLon;
use waymark_route::ch::validate::validate_random_pairs;
use waymark_route::formats::{graph_file, index_file};
use waymark_route::{
    server, BuilderConfig, HierarchyBuilder, RouteRequest, RoutingMode, ServiceConfig, ServiceState,
    VehicleParams, VehicleType,
};

#[derive(Parser)]
#[command(name = "waymark-route")]
#[command(about = "Contraction-hierarchy routing with hazard-aware ranking", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Contract a graph and write the hierarchy index
    BuildCh {
        /// Input graph file (graph.wgr)
        #[arg(long)]
        graph: PathBuf,
        /// Output index file (index.wch)
        #[arg(short, long)]
        output: PathBuf,
        /// Settled-node limit for each witness search
        #[arg(long, default_value = "500")]
        witness_limit: usize,
        /// Compare this many random pairs against Dijkstra before writing
        #[arg(long, default_value = "0")]
        validate: usize,
    },
    /// Check an existing index against Dijkstra on random pairs
    Validate {
        #[arg(long)]
        graph: PathBuf,
        #[arg(long)]
        index: PathBuf,
        #[arg(long, default_value = "1000")]
        queries: usize,
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Route once through the full provider chain
    Route {
        /// Service configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,
        /// Start coordinate (lat,lon)
        #[arg(long)]
        from: String,
        /// End coordinate (lat,lon)
        #[arg(long)]
        to: String,
        /// Rank candidates by hazard exposure
        #[arg(long)]
        avoid_hazards: bool,
        #[arg(long, default_value = "car")]
        vehicle: String,
        #[arg(long, default_value = "fastest")]
        mode: String,
    },
    /// Start the HTTP API with background health probes
    Serve {
        /// Service configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,
        /// Overrides the port of `server.bind`
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::BuildCh {
            graph,
            output,
            witness_limit,
            validate,
        } => {
            let g = graph_file::read(&graph)
                .with_context(|| format!("loading graph {}", graph.display()))?;
            let config = BuilderConfig {
                witness_settle_limit: witness_limit,
            };
            let (index, stats) =
                HierarchyBuilder::build(&g, config).context("hierarchy failed integrity checks")?;

            if validate > 0 {
                let report = validate_random_pairs(&g, &index, validate, 42);
                println!("{}", serde_json::to_string_pretty(&report)?);
                if !report.is_clean() {
                    bail!(
                        "{} of {} validation queries disagree with Dijkstra; index not written",
                        report.incorrect,
                        report.n_tests
                    );
                }
            }

            index_file::write(&output, &index, &g)
                .with_context(|| format!("writing index {}", output.display()))?;
            info!(path = %output.display(), "index written");
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Validate {
            graph,
            index,
            queries,
            seed,
        } => {
            let g = graph_file::read(&graph)
                .with_context(|| format!("loading graph {}", graph.display()))?;
            let ch = index_file::read(&index, &g)
                .with_context(|| format!("loading index {}", index.display()))?;
            let start = Instant::now();
            let report = validate_random_pairs(&g, &ch, queries, seed);
            info!(elapsed_ms = start.elapsed().as_millis() as u64, "validation finished");
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                bail!("{} of {} queries disagree with Dijkstra", report.incorrect, report.n_tests);
            }
        }
        Commands::Route {
            config,
            from,
            to,
            avoid_hazards,
            vehicle,
            mode,
        } => {
            let config = ServiceConfig::load(&config)
                .with_context(|| format!("reading config {}", config.display()))?;
            let state = ServiceState::load(config).context("loading service state")?;
            let request = RouteRequest {
                start: from.parse::<LatLon>()?,
                end: to.parse::<LatLon>()?,
                vehicle: VehicleParams {
                    vehicle_type: vehicle.parse::<VehicleType>()?,
                    routing_mode: mode.parse::<RoutingMode>()?,
                },
                hazard_avoidance: avoid_hazards,
                preferences: state.default_preferences.clone(),
            };
            let start = Instant::now();
            let routes = state.orchestrator.route(&request).await?;
            info!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                source = %routes.source,
                "route computed"
            );
            println!("{}", serde_json::to_string_pretty(&routes)?);
        }
        Commands::Serve { config, port } => {
            let config = ServiceConfig::load(&config)
                .with_context(|| format!("reading config {}", config.display()))?;
            let bind = match port {
                Some(port) => {
                    let mut addr: SocketAddr = config
                        .server
                        .bind
                        .parse()
                        .with_context(|| format!("invalid server.bind '{}'", config.server.bind))?;
                    addr.set_port(port);
                    addr.to_string()
                }
                None => config.server.bind.clone(),
            };
            let state = Arc::new(ServiceState::load(config).context("loading service state")?);

            let token = CancellationToken::new();
            let tasks = state.spawn_background(&token);
            let shutdown = token.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("shutdown requested"),
                    Err(e) => {
                        warn!(error = %e, "cannot listen for Ctrl-C");
                        return;
                    }
                }
                shutdown.cancel();
            });

            server::serve(state, &bind, token.clone()).await?;
            token.cancel();
            for task in tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "background task ended abnormally");
                }
            }
        }
    }

    Ok(())
}
