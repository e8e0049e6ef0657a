//! Route, approximate and geocode commands.

use mapserve::geo::LatLon;
use mapserve::routing::{RouteOutcome, RouteProgress};

use super::common::{build_app, load_config, print_json, GlobalArgs};
use crate::error::CliError;

/// Arguments for the route command.
pub struct RouteArgs {
    pub params: String,
    pub from: LatLon,
    pub to: LatLon,
    pub via: Vec<LatLon>,
    pub avoid: Vec<u64>,
    pub json: bool,
}

/// Run the route command.
pub fn run(global: &GlobalArgs, args: RouteArgs) -> Result<(), CliError> {
    let app = build_app(load_config(global)?)?;
    let outcome = app.orchestrator().route(
        &args.params,
        args.from,
        args.to,
        &args.via,
        &args.avoid,
        &RouteProgress::new(),
    )?;
    report(&outcome, args.json)
}

/// Run the approximate command.
pub fn run_approximate(global: &GlobalArgs, params: &str, points: &[LatLon], json: bool) -> Result<(), CliError> {
    let app = build_app(load_config(global)?)?;
    let outcome = app.orchestrator().approximate(params, points, &RouteProgress::new())?;
    report(&outcome, json)
}

/// Run the geocode command.
pub fn run_geocode(global: &GlobalArgs, point: LatLon) -> Result<(), CliError> {
    let app = build_app(load_config(global)?)?;
    let outcome = app.orchestrator().geocode(point.lat, point.lon);
    print_json(&outcome)
}

fn report(outcome: &RouteOutcome, json: bool) -> Result<(), CliError> {
    if json {
        let mut value = serde_json::to_value(outcome)?;
        value["diagnostics"] = outcome.diagnostics.to_json();
        return print_json(&value);
    }

    let d = &outcome.diagnostics;
    println!("Status:   {}", serde_json::to_value(outcome.status)?.as_str().unwrap_or("?"));
    println!("Distance: {:.1} km", d.distance_m / 1000.0);
    println!("Time:     {:.0} min", d.time_s / 60.0);
    println!("Segments: {}", outcome.segments.len());
    println!("Strategy: {}", d.strategy);
    if let Some(provider) = &d.online_provider {
        println!("Provider: {}", provider);
    }
    println!("Files:    {}", d.files.len());
    println!("Cached:   {}", if d.cache_hit { "yes" } else { "no" });
    println!("Calc:     {:.3} s (routing {:.3} s)", d.calc_time_s, d.routing_time_s);
    for (phase, secs) in &d.phases {
        println!("  {:<12} {:.3} s", phase, secs);
    }
    Ok(())
}
