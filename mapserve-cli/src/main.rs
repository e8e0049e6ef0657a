//! MapServe CLI - Command-line interface
//!
//! Inspects the map catalog, manages the index cache, runs one-off routing
//! requests and keeps the core loaded with its maintenance tasks.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mapserve::geo::{LatLon, QuadRect};

use commands::common::{parse_bbox, parse_point, GlobalArgs};
use commands::index::IndexAction;
use commands::route::RouteArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "mapserve", version, about = "Map file serving and routing core")]
struct Cli {
    /// Config file (default: ~/.config/mapserve/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Map directory, overriding the config file
    #[arg(long, global = true)]
    maps_dir: Option<PathBuf>,

    /// Shared routing file, overriding the config file
    #[arg(long, global = true)]
    routing_file: Option<PathBuf>,

    /// Also write daily log files to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List map files in the catalog
    Files {
        /// Only files covering this point (LAT,LON)
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true, conflicts_with = "bbox")]
        covering: Option<LatLon>,
        /// Only files intersecting this box (NORTH,WEST,SOUTH,EAST)
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: Option<QuadRect>,
    },
    /// Manage the persistent file index cache
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// List routing modes and their parameters
    Modes {
        #[arg(long)]
        json: bool,
    },
    /// Compute a route
    Route {
        /// Profile followed by parameters, e.g. "car,short_way"
        #[arg(long, default_value = "car")]
        params: String,
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        from: LatLon,
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        to: LatLon,
        /// Intermediate points, in order
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        via: Vec<LatLon>,
        /// Road ids to avoid
        #[arg(long)]
        avoid: Vec<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Snap a point sequence onto the road graph
    Approximate {
        #[arg(long, default_value = "car")]
        params: String,
        #[arg(long = "point", value_parser = parse_point, allow_hyphen_values = true, required = true)]
        points: Vec<LatLon>,
        #[arg(long)]
        json: bool,
    },
    /// Find roads near a point
    Geocode {
        #[arg(value_parser = parse_point, allow_hyphen_values = true)]
        point: LatLon,
    },
    /// Show how a parameter string is resolved
    Params {
        /// Profile followed by parameters, e.g. "bicycle,hhoff,avoid=12;13"
        input: String,
    },
    /// Keep the core loaded and run maintenance until Ctrl+C
    Maintain {
        /// Seconds between status lines
        #[arg(long, default_value_t = 60)]
        status_interval: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let _log_guard = mapserve::logging::init(cli.log_dir.as_deref()).map_err(CliError::Logging)?;

    let global = GlobalArgs {
        config: cli.config,
        maps_dir: cli.maps_dir,
        routing_file: cli.routing_file,
    };

    match cli.command {
        Commands::Files { covering, bbox } => {
            let query = covering.map(QuadRect::from_point).or(bbox);
            commands::files::run(&global, query)
        }
        Commands::Index { action } => commands::index::run(&global, action),
        Commands::Modes { json } => commands::modes::run(&global, json),
        Commands::Route {
            params,
            from,
            to,
            via,
            avoid,
            json,
        } => commands::route::run(
            &global,
            RouteArgs {
                params,
                from,
                to,
                via,
                avoid,
                json,
            },
        ),
        Commands::Approximate { params, points, json } => {
            commands::route::run_approximate(&global, &params, &points, json)
        }
        Commands::Geocode { point } => commands::route::run_geocode(&global, point),
        Commands::Params { input } => commands::params::run(&global, &input),
        Commands::Maintain { status_interval } => {
            commands::maintain::run(&global, Duration::from_secs(status_interval.max(1)))
        }
    }
}
